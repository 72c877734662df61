//! Account selection for platform fan-out.
//!
//! Each target platform needs exactly one active, selected account per
//! dispatch. Selection prefers the healthiest account (lowest failure
//! ratio), breaking ties by least-recent use so load spreads across
//! accounts. Every dispatched call reports back through `record_usage`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::RegistrationError;
use crate::model::PlatformAccount;
use crate::store::SqliteStore;

/// Account resolution and usage accounting over the durable store.
pub struct AccountPool {
    store: Arc<SqliteStore>,
}

impl AccountPool {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Pick one account per requested platform. Platforms without any
    /// active account are absent from the result; an empty result is an
    /// error because no work could be dispatched at all.
    pub fn select(
        &self,
        platforms: &[String],
    ) -> Result<HashMap<String, PlatformAccount>, RegistrationError> {
        let accounts = self.store.active_accounts(platforms)?;
        let mut by_platform: HashMap<String, Vec<PlatformAccount>> = HashMap::new();
        for account in accounts {
            by_platform
                .entry(account.platform.clone())
                .or_default()
                .push(account);
        }

        let mut selected = HashMap::new();
        for (platform, mut candidates) in by_platform {
            candidates.sort_by(compare_accounts);
            if let Some(best) = candidates.into_iter().next() {
                selected.insert(platform, best);
            }
        }

        if selected.is_empty() {
            return Err(RegistrationError::NoActiveAccounts {
                platforms: platforms.to_vec(),
            });
        }
        Ok(selected)
    }

    /// Record one dispatched call against an account.
    pub fn record_usage(&self, account_id: &str, success: bool) -> Result<(), RegistrationError> {
        self.store.record_account_usage(account_id, success)?;
        Ok(())
    }
}

/// Healthiest first, then least recently used, then fewest total calls.
fn compare_accounts(a: &PlatformAccount, b: &PlatformAccount) -> std::cmp::Ordering {
    a.failure_ratio()
        .partial_cmp(&b.failure_ratio())
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| match (&a.last_used_at, &b.last_used_at) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(y),
        })
        .then_with(|| a.api_calls_total.cmp(&b.api_calls_total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn account(id: &str, platform: &str) -> PlatformAccount {
        PlatformAccount {
            id: id.into(),
            platform: platform.into(),
            label: id.into(),
            active: true,
            selected: true,
            api_calls_total: 0,
            api_failures: 0,
            last_used_at: None,
        }
    }

    fn pool_with(accounts: &[PlatformAccount]) -> AccountPool {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for a in accounts {
            store.upsert_account(a).unwrap();
        }
        AccountPool::new(store)
    }

    #[test]
    fn selects_one_account_per_platform() {
        let pool = pool_with(&[
            account("c1", "coupang"),
            account("n1", "naver"),
            account("n2", "naver"),
        ]);
        let selected = pool
            .select(&["coupang".to_string(), "naver".to_string()])
            .unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected["coupang"].id, "c1");
    }

    #[test]
    fn no_accounts_at_all_is_an_error() {
        let pool = pool_with(&[]);
        let err = pool.select(&["coupang".to_string()]).unwrap_err();
        assert!(matches!(err, RegistrationError::NoActiveAccounts { .. }));
    }

    #[test]
    fn platform_without_account_is_simply_absent() {
        let pool = pool_with(&[account("c1", "coupang")]);
        let selected = pool
            .select(&["coupang".to_string(), "naver".to_string()])
            .unwrap();
        assert!(selected.contains_key("coupang"));
        assert!(!selected.contains_key("naver"));
    }

    #[test]
    fn healthier_account_wins() {
        let mut sick = account("sick", "coupang");
        sick.api_calls_total = 10;
        sick.api_failures = 5;
        let mut healthy = account("healthy", "coupang");
        healthy.api_calls_total = 10;
        healthy.api_failures = 0;
        healthy.last_used_at = Some(Utc::now());

        let pool = pool_with(&[sick, healthy]);
        let selected = pool.select(&["coupang".to_string()]).unwrap();
        assert_eq!(selected["coupang"].id, "healthy");
    }

    #[test]
    fn least_recently_used_breaks_health_ties() {
        let mut older = account("older", "coupang");
        older.last_used_at = Some(Utc::now() - Duration::hours(2));
        let mut newer = account("newer", "coupang");
        newer.last_used_at = Some(Utc::now());

        let pool = pool_with(&[newer, older]);
        let selected = pool.select(&["coupang".to_string()]).unwrap();
        assert_eq!(selected["coupang"].id, "older");
    }

    #[test]
    fn usage_feeds_back_into_selection() {
        let pool = pool_with(&[account("a", "coupang"), account("b", "coupang")]);
        // Burn account a's health.
        pool.record_usage("a", false).unwrap();
        pool.record_usage("a", false).unwrap();
        pool.record_usage("b", true).unwrap();

        let selected = pool.select(&["coupang".to_string()]).unwrap();
        assert_eq!(selected["coupang"].id, "b");
    }
}
