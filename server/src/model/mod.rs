mod image;
mod plan;
mod transaction;
mod user;

use std::collections::BTreeMap;

pub use image::ImageKind;
pub use plan::{month_start, PlanLimits, Quota};
pub use transaction::{
    month_key,
    ListQuery,
    MonthlySummary,
    Transaction,
    TransactionInput,
    TransactionType,
    MAX_PAGE_SIZE,
};
#[cfg(test)]
pub(crate) use transaction::sample_input;
pub use user::{
    parse_profile_update,
    parse_registration,
    Profile,
    ProfileUpdate,
    UserRecord,
    DEFAULT_PLAN,
};

/// Per-field validation messages, keyed by request field name.
pub type FieldErrors = BTreeMap<String, String>;
