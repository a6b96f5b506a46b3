use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON body returned by every failing relay, grant or push endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct RelayErrorBody {
    /// Short, stable description of the failed operation.
    pub error: String,
    /// Underlying cause, when one is reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RelayErrorBody {
    /// Creates an error body with just a summary.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// Creates an error body with a summary and details.
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }

    #[must_use]
    pub const fn has_details(&self) -> bool {
        self.details.is_some()
    }
}

impl std::fmt::Display for RelayErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.error, details),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for RelayErrorBody {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_only_body_omits_details() {
        let body = RelayErrorBody::new("failed to trim chat log");
        assert!(!body.has_details());
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"error":"failed to trim chat log"}"#
        );
    }

    #[test]
    fn body_with_details_serializes_both_fields() {
        let body = RelayErrorBody::with_details("failed to send message", "store offline");
        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "failed to send message");
        assert_eq!(json["details"], "store offline");
    }

    #[test]
    fn display_joins_error_and_details() {
        let body = RelayErrorBody::with_details("grant refused", "socket_id missing");
        assert_eq!(body.to_string(), "grant refused: socket_id missing");
        assert_eq!(RelayErrorBody::new("plain").to_string(), "plain");
    }
}
