use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::FieldErrors;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Buy => "buy",
            TransactionType::Sell => "sell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buy" => Some(TransactionType::Buy),
            "sell" => Some(TransactionType::Sell),
            _ => None,
        }
    }
}

/// The caller-editable part of a transaction record: what was traded, with
/// whom, and how the counterparty's identity was checked.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransactionInput {
    pub transaction_type: TransactionType,
    pub item_name: String,
    pub item_category: Option<String>,
    pub quantity: i64,
    pub price: i64,
    pub transaction_date: String,
    pub counterparty_name: String,
    pub counterparty_address: String,
    pub counterparty_age: Option<i64>,
    pub counterparty_occupation: Option<String>,
    pub id_verification_type: String,
    pub id_verification_number: Option<String>,
    pub photo_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub details: TransactionInput,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub count: i64,
    pub buy_count: i64,
    pub sell_count: i64,
    pub buy_total: i64,
    pub sell_total: i64,
}

impl Transaction {
    pub fn create(user_id: &str, details: TransactionInput, now: DateTime<Utc>) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            details,
            created_at: now,
            updated_at: now,
        }
    }

    /// Year and month of the trade itself (not of the record's creation).
    pub fn trade_month(&self) -> Option<(i32, u32)> {
        trade_date(&self.details.transaction_date).map(|d| {
            use chrono::Datelike;
            (d.year(), d.month())
        })
    }
}

impl ListQuery {
    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.limit
    }
}

impl MonthlySummary {
    pub fn empty(year: i32, month: u32) -> Self {
        MonthlySummary { year, month, ..Default::default() }
    }

    pub fn add(&mut self, transaction: &TransactionInput) {
        self.count += 1;
        match transaction.transaction_type {
            TransactionType::Buy => {
                self.buy_count += 1;
                self.buy_total += transaction.price;
            }
            TransactionType::Sell => {
                self.sell_count += 1;
                self.sell_total += transaction.price;
            }
        }
    }
}

/// `YYYY-MM`, the prefix every stored `transaction_date` starts with.
pub fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp; the calendar date is the
/// first ten characters in both cases.
fn trade_date(value: &str) -> Option<NaiveDate> {
    if DateTime::parse_from_rfc3339(value).is_err() && value.len() != 10 {
        return None;
    }
    value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

struct FieldReader<'a> {
    body: &'a Map<String, Value>,
    errors: FieldErrors,
}

impl<'a> FieldReader<'a> {
    fn fail(&mut self, field: &str, message: String) {
        self.errors.entry(field.to_string()).or_insert(message);
    }

    fn required_str(&mut self, field: &str) -> String {
        match self.body.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                self.fail(field, format!("{} is required", field));
                String::new()
            }
            Some(_) => {
                self.fail(field, format!("{} must be a string", field));
                String::new()
            }
        }
    }

    fn optional_str(&mut self, field: &str) -> Option<String> {
        match self.body.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.fail(field, format!("{} must be a string", field));
                None
            }
        }
    }

    fn integer(&mut self, field: &str, value: &Value, min: i64, max: i64) -> Option<i64> {
        match value.as_i64() {
            Some(n) if n >= min && n <= max => Some(n),
            _ => {
                self.fail(field, format!("{} must be an integer between {} and {}", field, min, max));
                None
            }
        }
    }

    fn required_int(&mut self, field: &str, min: i64, max: i64) -> i64 {
        match self.body.get(field) {
            None | Some(Value::Null) => {
                self.fail(field, format!("{} is required", field));
                0
            }
            Some(value) => self.integer(field, value, min, max).unwrap_or(0),
        }
    }

    fn optional_int(&mut self, field: &str, min: i64, max: i64) -> Option<i64> {
        match self.body.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => self.integer(field, value, min, max),
        }
    }
}

impl TransactionInput {
    /// Validate a request body, collecting every field problem at once.
    pub fn from_json(body: &Map<String, Value>) -> Result<Self, FieldErrors> {
        let mut r = FieldReader { body, errors: FieldErrors::new() };

        let kind = r.required_str("transaction_type");
        let transaction_type = TransactionType::parse(&kind);
        if transaction_type.is_none() && !kind.is_empty() {
            r.fail("transaction_type", "transaction_type must be 'buy' or 'sell'".to_string());
        }
        let item_name = r.required_str("item_name");
        let item_category = r.optional_str("item_category");
        let quantity = r.optional_int("quantity", 1, 1_000_000).unwrap_or(1);
        let price = r.required_int("price", 0, 1_000_000_000_000);
        let transaction_date = r.required_str("transaction_date");
        if !transaction_date.is_empty() && trade_date(&transaction_date).is_none() {
            r.fail("transaction_date", "transaction_date must be a date (YYYY-MM-DD)".to_string());
        }
        let counterparty_name = r.required_str("counterparty_name");
        let counterparty_address = r.required_str("counterparty_address");
        let counterparty_age = r.optional_int("counterparty_age", 0, 150);
        let counterparty_occupation = r.optional_str("counterparty_occupation");
        let id_verification_type = r.required_str("id_verification_type");
        let id_verification_number = r.optional_str("id_verification_number");
        let photo_url = r.optional_str("photo_url");
        let notes = r.optional_str("notes");

        match transaction_type {
            Some(transaction_type) if r.errors.is_empty() => Ok(TransactionInput {
                transaction_type,
                item_name,
                item_category,
                quantity,
                price,
                transaction_date,
                counterparty_name,
                counterparty_address,
                counterparty_age,
                counterparty_occupation,
                id_verification_type,
                id_verification_number,
                photo_url,
                notes,
            }),
            _ => Err(r.errors),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_input(kind: TransactionType, price: i64, date: &str) -> TransactionInput {
    TransactionInput {
        transaction_type: kind,
        item_name: "Seiko watch".to_string(),
        item_category: Some("watches".to_string()),
        quantity: 1,
        price,
        transaction_date: date.to_string(),
        counterparty_name: "Yamada Taro".to_string(),
        counterparty_address: "Tokyo, Chiyoda 1-1".to_string(),
        counterparty_age: Some(42),
        counterparty_occupation: None,
        id_verification_type: "drivers_license".to_string(),
        id_verification_number: None,
        photo_url: None,
        notes: None,
    }
}
