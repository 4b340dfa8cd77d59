use core::str::FromStr;

use serde::{Deserialize, Serialize};

use uploader_core::DomainError;

/// Status carried by every status event.
///
/// `Succeeded` and `Rejected` are terminal; `Failed` loops back through the
/// retry queue; `ReadyForApi` is the only status the API-invocation handler
/// accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    ReadyForApi,
    Succeeded,
    Failed,
    Rejected,
}

impl ApiStatus {
    pub const ALL: [ApiStatus; 4] = [
        ApiStatus::ReadyForApi,
        ApiStatus::Succeeded,
        ApiStatus::Failed,
        ApiStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::ReadyForApi => "ready_for_api",
            ApiStatus::Succeeded => "succeeded",
            ApiStatus::Failed => "failed",
            ApiStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApiStatus::Succeeded | ApiStatus::Rejected)
    }
}

impl core::fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::unknown_status(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for status in ApiStatus::ALL {
            assert_eq!(status.as_str().parse::<ApiStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("new_object_received".parse::<ApiStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ApiStatus::Succeeded.is_terminal());
        assert!(ApiStatus::Rejected.is_terminal());
        assert!(!ApiStatus::Failed.is_terminal());
        assert!(!ApiStatus::ReadyForApi.is_terminal());
    }
}
