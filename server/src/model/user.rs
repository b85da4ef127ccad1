use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::FieldErrors;

pub const DEFAULT_PLAN: &str = "free";

/// A registered dealer, keyed by the identity provider's subject.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(rename = "firebase_uid")]
    pub external_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub business_name: Option<String>,
    pub license_number: Option<String>,
    pub plan: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Profile {
    pub display_name: Option<String>,
    pub business_name: Option<String>,
    pub license_number: Option<String>,
}

/// Partial profile change. The outer `Option` is "field present in the
/// request", the inner one is the new value (`None` clears it).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileUpdate {
    pub display_name: Option<Option<String>>,
    pub business_name: Option<Option<String>>,
    pub license_number: Option<Option<String>>,
}

const PROFILE_FIELDS: [(&str, &str); 3] = [
    ("display_name", "Display name must be a string"),
    ("business_name", "Business name must be a string"),
    ("license_number", "License number must be a string"),
];

impl UserRecord {
    pub fn register(external_id: &str, email: &str, profile: Profile, now: DateTime<Utc>) -> Self {
        UserRecord {
            id: new_user_id(),
            external_id: external_id.to_string(),
            email: email.to_string(),
            display_name: profile.display_name,
            business_name: profile.business_name,
            license_number: profile.license_number,
            plan: DEFAULT_PLAN.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.business_name.is_none() && self.license_number.is_none()
    }

    pub fn apply(&self, user: &mut UserRecord, now: DateTime<Utc>) {
        if let Some(v) = &self.display_name {
            user.display_name = v.clone();
        }
        if let Some(v) = &self.business_name {
            user.business_name = v.clone();
        }
        if let Some(v) = &self.license_number {
            user.license_number = v.clone();
        }
        user.updated_at = now;
    }
}

fn new_user_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("user_{}", &id[..16])
}

/// `Ok(None)` for absent, null or empty; `Err(())` for a non-string.
fn profile_value(body: &Map<String, Value>, field: &str) -> Result<Option<String>, ()> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(()),
    }
}

pub fn parse_registration(body: &Map<String, Value>) -> Result<Profile, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut values = Vec::with_capacity(PROFILE_FIELDS.len());
    for (field, message) in PROFILE_FIELDS.iter() {
        match profile_value(body, field) {
            Ok(v) => values.push(v),
            Err(()) => {
                errors.insert(field.to_string(), message.to_string());
                values.push(None);
            }
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    let mut values = values.into_iter();
    Ok(Profile {
        display_name: values.next().flatten(),
        business_name: values.next().flatten(),
        license_number: values.next().flatten(),
    })
}

pub fn parse_profile_update(body: &Map<String, Value>) -> Result<ProfileUpdate, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut update = ProfileUpdate::default();
    for (field, message) in PROFILE_FIELDS.iter() {
        if !body.contains_key(*field) {
            continue;
        }
        let value = match profile_value(body, field) {
            Ok(v) => v,
            Err(()) => {
                errors.insert(field.to_string(), message.to_string());
                continue;
            }
        };
        match *field {
            "display_name" => update.display_name = Some(value),
            "business_name" => update.business_name = Some(value),
            _ => update.license_number = Some(value),
        }
    }
    if errors.is_empty() {
        Ok(update)
    } else {
        Err(errors)
    }
}
