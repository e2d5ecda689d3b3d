use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::TARGET_WEB_REQUEST;

/// A browser user agent: several publishers (and the Google News article
/// viewer) serve bot user agents an empty shell.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_REDIRECTS: usize = 8;

static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .cookie_store(true)
        .build()
        .expect("failed to build HTTP client")
});

static RESOLVER_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(RESOLVE_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .expect("failed to build resolver client")
});

/// Shared client for scraping and feed fetching.
pub fn client() -> &'static reqwest::Client {
    &CLIENT
}

/// Redirect-following client used for final-URL resolution.
pub fn resolver_client() -> &'static reqwest::Client {
    &RESOLVER_CLIENT
}

/// A per-day request budget with an explicit calendar-date reset.
///
/// The search API enforces a daily quota; this counter is owned by whoever
/// constructs the provider and handed to it by reference, so there is no
/// hidden global state to reset in tests.
pub struct DailyBudget {
    limit: u32,
    state: Mutex<(NaiveDate, u32)>,
}

impl DailyBudget {
    pub fn new(limit: u32) -> Self {
        DailyBudget {
            limit,
            state: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    /// Consume one request from today's budget. Returns false when the
    /// budget is exhausted; the count rolls over at UTC midnight.
    pub fn try_acquire(&self) -> bool {
        let today = Utc::now().date_naive();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.0 != today {
            *state = (today, 0);
        }
        if state.1 >= self.limit {
            warn!(target: TARGET_WEB_REQUEST, "Daily request budget of {} exhausted", self.limit);
            return false;
        }
        state.1 += 1;
        true
    }

    pub fn used_today(&self) -> u32 {
        let today = Utc::now().date_naive();
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.0 != today {
            0
        } else {
            state.1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhaustion() {
        let budget = DailyBudget::new(2);
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        assert_eq!(budget.used_today(), 2);
    }
}
