use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::{StoreError, StoreResult, TransactionStore, UserDirectory};
use crate::model::{ListQuery, MonthlySummary, ProfileUpdate, Transaction, TransactionInput, UserRecord};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

/// Users keyed by external id. Counts lookups and can be switched into a
/// failing state, which the gate tests rely on.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find_by_external_id` calls so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("user directory unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<UserRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(external_id).cloned())
    }

    fn insert(&self, user: &UserRecord) -> StoreResult<()> {
        self.check_available()?;
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(&user.external_id) {
            return Err(StoreError::Conflict);
        }
        users.insert(user.external_id.clone(), user.clone());
        Ok(())
    }

    fn update_profile(
        &self,
        external_id: &str,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserRecord>> {
        self.check_available()?;
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users.get_mut(external_id).map(|user| {
            update.apply(user, now);
            user.clone()
        }))
    }
}

#[derive(Default)]
pub struct MemoryTransactionStore {
    records: RwLock<HashMap<String, Transaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_search(t: &Transaction, search: &Option<String>) -> bool {
    match search {
        Some(s) => t.details.item_name.contains(s.as_str()) || t.details.counterparty_name.contains(s.as_str()),
        None => true,
    }
}

impl TransactionStore for MemoryTransactionStore {
    fn list(&self, user_id: &str, query: &ListQuery) -> StoreResult<Vec<Transaction>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut owned: Vec<&Transaction> = records
            .values()
            .filter(|t| t.user_id == user_id && matches_search(t, &query.search))
            .collect();
        owned.sort_by(|a, b| {
            b.details
                .transaction_date
                .cmp(&a.details.transaction_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(owned
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<Transaction>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(id).filter(|t| t.user_id == user_id).cloned())
    }

    fn insert(&self, transaction: &Transaction) -> StoreResult<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(&transaction.id) {
            return Err(StoreError::Conflict);
        }
        records.insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    fn update(
        &self,
        user_id: &str,
        id: &str,
        details: &TransactionInput,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Transaction>> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.get_mut(id).filter(|t| t.user_id == user_id).map(|t| {
            t.details = details.clone();
            t.updated_at = now;
            t.clone()
        }))
    }

    fn delete(&self, user_id: &str, id: &str) -> StoreResult<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        let owned = records.get(id).map_or(false, |t| t.user_id == user_id);
        if owned {
            records.remove(id);
        }
        Ok(owned)
    }

    fn count_created_since(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<u64> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|t| t.user_id == user_id && t.created_at >= since)
            .count() as u64)
    }

    fn count_all(&self, user_id: &str) -> StoreResult<u64> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.values().filter(|t| t.user_id == user_id).count() as u64)
    }

    fn monthly_summary(&self, user_id: &str, year: i32, month: u32) -> StoreResult<MonthlySummary> {
        let records = self.records.read().map_err(poisoned)?;
        let mut summary = MonthlySummary::empty(year, month);
        records
            .values()
            .filter(|t| t.user_id == user_id && t.trade_month() == Some((year, month)))
            .for_each(|t| summary.add(&t.details));
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{sample_input, Profile, TransactionType};

    fn user(external_id: &str) -> UserRecord {
        UserRecord::register(external_id, "dealer@example.com", Profile::default(), Utc::now())
    }

    fn record(user_id: &str, item: &str, date: &str) -> Transaction {
        let mut input = sample_input(TransactionType::Buy, 1000, date);
        input.item_name = item.to_string();
        Transaction::create(user_id, input, Utc::now())
    }

    #[test]
    fn lookups_are_counted_and_idempotent() {
        let directory = MemoryUserDirectory::new();
        let stored = user("abc123");
        directory.insert(&stored).unwrap();

        let first = directory.find_by_external_id("abc123").unwrap().unwrap();
        let second = directory.find_by_external_id("abc123").unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, stored.id);
        assert_eq!(directory.lookups(), 2);
        assert!(directory.find_by_external_id("nobody").unwrap().is_none());
    }

    #[test]
    fn external_id_is_unique() {
        let directory = MemoryUserDirectory::new();
        directory.insert(&user("abc123")).unwrap();
        assert!(matches!(directory.insert(&user("abc123")), Err(StoreError::Conflict)));
    }

    #[test]
    fn unavailable_directory_fails_lookups() {
        let directory = MemoryUserDirectory::new();
        directory.set_unavailable(true);
        assert!(matches!(directory.find_by_external_id("abc123"), Err(StoreError::Backend(_))));
    }

    #[test]
    fn update_profile_of_missing_user_is_none() {
        let directory = MemoryUserDirectory::new();
        let result = directory
            .update_profile("ghost", &ProfileUpdate::default(), Utc::now())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn list_is_scoped_sorted_and_paged() {
        let store = MemoryTransactionStore::new();
        store.insert(&record("user_a", "camera", "2026-10-01")).unwrap();
        store.insert(&record("user_a", "watch", "2026-10-05")).unwrap();
        store.insert(&record("user_a", "ring", "2026-09-20")).unwrap();
        store.insert(&record("user_b", "guitar", "2026-10-09")).unwrap();

        let page = |page, limit| {
            store
                .list("user_a", &ListQuery { page, limit, search: None })
                .unwrap()
                .into_iter()
                .map(|t| t.details.item_name)
                .collect::<Vec<_>>()
        };
        assert_eq!(page(1, 20), vec!["watch", "camera", "ring"]);
        assert_eq!(page(1, 2), vec!["watch", "camera"]);
        assert_eq!(page(2, 2), vec!["ring"]);
    }

    #[test]
    fn list_search_matches_item_or_counterparty() {
        let store = MemoryTransactionStore::new();
        store.insert(&record("user_a", "camera", "2026-10-01")).unwrap();
        store.insert(&record("user_a", "watch", "2026-10-05")).unwrap();

        let query = ListQuery { page: 1, limit: 20, search: Some("cam".into()) };
        assert_eq!(store.list("user_a", &query).unwrap().len(), 1);

        let query = ListQuery { page: 1, limit: 20, search: Some("Yamada".into()) };
        assert_eq!(store.list("user_a", &query).unwrap().len(), 2);
    }

    #[test]
    fn foreign_records_are_invisible() {
        let store = MemoryTransactionStore::new();
        let t = record("user_a", "camera", "2026-10-01");
        store.insert(&t).unwrap();

        assert!(store.get("user_b", &t.id).unwrap().is_none());
        assert!(store
            .update("user_b", &t.id, &t.details, Utc::now())
            .unwrap()
            .is_none());
        assert!(!store.delete("user_b", &t.id).unwrap());
        assert!(store.delete("user_a", &t.id).unwrap());
        assert!(store.get("user_a", &t.id).unwrap().is_none());
    }

    #[test]
    fn counts_and_summary() {
        let store = MemoryTransactionStore::new();
        let mut old = record("user_a", "camera", "2026-09-01");
        old.created_at = Utc::now() - chrono::Duration::days(60);
        store.insert(&old).unwrap();
        store.insert(&record("user_a", "watch", "2026-10-05")).unwrap();
        let mut sale = record("user_a", "ring", "2026-10-07");
        sale.details.transaction_type = TransactionType::Sell;
        sale.details.price = 2500;
        store.insert(&sale).unwrap();

        let since = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.count_created_since("user_a", since).unwrap(), 2);
        assert_eq!(store.count_all("user_a").unwrap(), 3);
        assert_eq!(store.count_all("user_b").unwrap(), 0);

        let summary = store.monthly_summary("user_a", 2026, 10).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.buy_total, 1000);
        assert_eq!(summary.sell_total, 2500);
    }
}
