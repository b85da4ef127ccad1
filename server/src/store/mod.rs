//! Persistence seams. Handlers and the identity gate only see these traits;
//! the binary picks an implementation from `storage.backend`.
//!
//! All methods are blocking. Async callers go through [`blocking`], which
//! moves the call onto the actix blocking pool.

mod images;
mod memory;
mod sql;

use std::sync::Arc;

use actix_web::error::BlockingError;
use actix_web::web;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{ListQuery, MonthlySummary, ProfileUpdate, Transaction, TransactionInput, UserRecord};

pub use images::{FsImageStore, MemoryImageStore};
pub use memory::{MemoryTransactionStore, MemoryUserDirectory};
pub use sql::{OracleTransactionStore, OracleUserDirectory};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Maps identity-provider subjects to registered users.
pub trait UserDirectory: Send + Sync {
    fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Fails with [`StoreError::Conflict`] when the external id is taken.
    fn insert(&self, user: &UserRecord) -> StoreResult<()>;

    /// Returns the updated record, or `None` if no such user exists.
    fn update_profile(
        &self,
        external_id: &str,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserRecord>>;
}

/// Transaction records, always scoped by the owning user's internal id.
pub trait TransactionStore: Send + Sync {
    /// Ordered by `transaction_date` descending.
    fn list(&self, user_id: &str, query: &ListQuery) -> StoreResult<Vec<Transaction>>;

    fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<Transaction>>;

    fn insert(&self, transaction: &Transaction) -> StoreResult<()>;

    fn update(
        &self,
        user_id: &str,
        id: &str,
        details: &TransactionInput,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Transaction>>;

    /// `true` if a record was removed.
    fn delete(&self, user_id: &str, id: &str) -> StoreResult<bool>;

    /// Records created at or after `since`.
    fn count_created_since(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<u64>;

    fn count_all(&self, user_id: &str) -> StoreResult<u64>;

    /// Totals over records whose trade date falls in the given month.
    fn monthly_summary(&self, user_id: &str, year: i32, month: u32) -> StoreResult<MonthlySummary>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub trait ImageStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> StoreResult<()>;

    fn get(&self, key: &str) -> StoreResult<Option<StoredImage>>;
}

pub type SharedDirectory = Arc<dyn UserDirectory>;
pub type SharedTransactions = Arc<dyn TransactionStore>;
pub type SharedImages = Arc<dyn ImageStore>;

/// Run a store call on the blocking pool.
pub async fn blocking<F, T>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    web::block(f).await.map_err(|err| match err {
        BlockingError::Error(err) => err,
        BlockingError::Canceled => StoreError::Backend("blocking call canceled".to_string()),
    })
}
