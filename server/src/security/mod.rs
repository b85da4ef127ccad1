//! Bearer-token identity gate.
//!
//! [`IdentityGate`] wraps protected scopes. It reads the `Authorization`
//! header, decodes and validates the token's claims, and (in `Required`
//! mode) resolves the subject to a registered user. Handlers receive the
//! result through the [`AuthContext`] and [`VerifiedIdentity`] extractors.

mod authorization;
mod claims;
mod identity;
mod signature;

pub use identity::IdentityGate;
pub use signature::KeySet;

const ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Claims that passed validation. Lives for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedIdentity {
    pub external_id: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
}

/// A verified identity bound to a registered user.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthContext {
    pub external_id: String,
    pub email: Option<String>,
    pub user_id: String,
    pub plan: String,
}

/// The only issuer accepted for `project_id`.
pub fn expected_issuer(project_id: &str) -> String {
    format!("{}{}", ISSUER_PREFIX, project_id)
}
