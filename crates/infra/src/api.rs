//! External API boundary.
//!
//! Only the three outcomes of a call matter to the pipeline; transport and
//! authentication live behind [`ExternalApi`].

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

use uploader_core::ObjectRef;
use uploader_events::ApiStatus;

pub const DEFAULT_FAILURE_PATTERN: &str = "(?i)fail";
pub const DEFAULT_REJECT_PATTERN: &str = "(?i)reject";
pub const DEFAULT_TRANSIENT_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest<'a> {
    pub object: &'a ObjectRef,
    /// Time since the object was last modified.
    pub elapsed: Duration,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiOutcome {
    Succeeded,
    Failed,
    Rejected,
}

impl From<ApiOutcome> for ApiStatus {
    fn from(outcome: ApiOutcome) -> Self {
        match outcome {
            ApiOutcome::Succeeded => ApiStatus::Succeeded,
            ApiOutcome::Failed => ApiStatus::Failed,
            ApiOutcome::Rejected => ApiStatus::Rejected,
        }
    }
}

pub trait ExternalApi: Send + Sync + core::fmt::Debug {
    fn call(&self, request: &ApiRequest<'_>) -> ApiOutcome;
}

/// Name-and-age classification of an upload.
///
/// A name matching the failure pattern fails while the object is younger
/// than the transient window and succeeds afterwards. Otherwise a name
/// matching the reject pattern is rejected. Everything else succeeds.
#[derive(Debug, Clone)]
pub struct OutcomePolicy {
    failure: Regex,
    reject: Regex,
    transient_window: Duration,
}

impl OutcomePolicy {
    pub fn new(
        failure_pattern: &str,
        reject_pattern: &str,
        transient_window: Duration,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            failure: Regex::new(failure_pattern)?,
            reject: Regex::new(reject_pattern)?,
            transient_window,
        })
    }

    pub fn transient_window(&self) -> Duration {
        self.transient_window
    }

    pub fn classify(&self, file_name: &str, elapsed: Duration) -> ApiOutcome {
        if self.failure.is_match(file_name) && elapsed < self.transient_window {
            ApiOutcome::Failed
        } else if self.reject.is_match(file_name) {
            ApiOutcome::Rejected
        } else {
            ApiOutcome::Succeeded
        }
    }
}

/// Stand-in for the real API: classifies by file name and age.
#[derive(Debug, Clone)]
pub struct SimulatedApi {
    policy: OutcomePolicy,
}

impl SimulatedApi {
    pub fn new(policy: OutcomePolicy) -> Self {
        Self { policy }
    }
}

impl ExternalApi for SimulatedApi {
    fn call(&self, request: &ApiRequest<'_>) -> ApiOutcome {
        let outcome = self.policy.classify(request.object.file_name(), request.elapsed);
        tracing::debug!(
            object = %request.object,
            elapsed_secs = request.elapsed.num_seconds(),
            ?outcome,
            "simulated api call"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(s: i64) -> Duration {
        Duration::seconds(s)
    }

    fn standard() -> OutcomePolicy {
        OutcomePolicy::new(
            DEFAULT_FAILURE_PATTERN,
            DEFAULT_REJECT_PATTERN,
            secs(DEFAULT_TRANSIENT_WINDOW_SECS),
        )
        .unwrap()
    }

    #[test]
    fn failure_names_fail_inside_the_window_only() {
        let policy = standard();
        assert_eq!(policy.classify("foo-fail.json", secs(10)), ApiOutcome::Failed);
        assert_eq!(policy.classify("foo-FAIL.json", secs(119)), ApiOutcome::Failed);
        assert_eq!(policy.classify("foo-fail.json", secs(120)), ApiOutcome::Succeeded);
    }

    #[test]
    fn reject_applies_when_failure_branch_does_not() {
        let policy = standard();
        assert_eq!(policy.classify("bar-reject.csv", secs(0)), ApiOutcome::Rejected);
        assert_eq!(policy.classify("fail-reject.csv", secs(5)), ApiOutcome::Failed);
        assert_eq!(policy.classify("fail-reject.csv", secs(500)), ApiOutcome::Rejected);
        assert_eq!(policy.classify("ok.txt", secs(1)), ApiOutcome::Succeeded);
    }

    #[test]
    fn simulated_api_matches_on_file_name_not_prefix() {
        let api = SimulatedApi::new(standard());
        let object = ObjectRef::new("inbound", "failures/ok.txt").unwrap();
        let request = ApiRequest {
            object: &object,
            elapsed: secs(1),
        };
        assert_eq!(api.call(&request), ApiOutcome::Succeeded);
    }

    #[test]
    fn custom_patterns_are_honored() {
        let policy = OutcomePolicy::new("^retry-", "^deny-", secs(30)).unwrap();
        assert_eq!(policy.classify("retry-a.bin", secs(29)), ApiOutcome::Failed);
        assert_eq!(policy.classify("deny-a.bin", secs(0)), ApiOutcome::Rejected);
        assert!(OutcomePolicy::new("(", "x", secs(1)).is_err());
    }

    proptest! {
        #[test]
        fn failure_escalates_at_the_window(stem in "[a-z]{0,8}", elapsed in 0i64..600) {
            let policy = standard();
            let name = format!("{stem}fail.json");
            prop_assume!(!stem.contains("reject"));
            let expected = if elapsed < 120 { ApiOutcome::Failed } else { ApiOutcome::Succeeded };
            prop_assert_eq!(policy.classify(&name, secs(elapsed)), expected);
        }

        #[test]
        fn reject_ignores_elapsed(stem in "[a-z]{0,8}", elapsed in -60i64..100_000) {
            prop_assume!(!stem.contains("fail"));
            let policy = standard();
            let name = format!("{stem}-reject.csv");
            prop_assert_eq!(policy.classify(&name, secs(elapsed)), ApiOutcome::Rejected);
        }
    }
}
