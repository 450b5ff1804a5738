//! Operation outcomes and their transport-neutral envelope.
//!
//! `Outcome<T>` is what request layers hand back to their callers: either a
//! typed payload or a classified failure. Serialized, it becomes
//! `{success, message, kind, data}` with absent fields omitted.

use serde::{Serialize, Serializer};

use crate::error::{BridgeError, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success {
        message: Option<String>,
        data: T,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        hint: Option<String>,
    },
}

impl<T> Outcome<T> {
    pub fn ok(data: T) -> Self {
        Outcome::Success {
            message: None,
            data,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: T) -> Self {
        Outcome::Success {
            message: Some(message.into()),
            data,
        }
    }

    pub fn failure(err: &BridgeError) -> Self {
        Outcome::Failure {
            kind: err.kind(),
            message: err.to_string(),
            hint: err.suggestion().map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Success { message, .. } => message.as_deref(),
            Outcome::Failure { message, .. } => Some(message),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success { message, data } => Outcome::Success {
                message,
                data: f(data),
            },
            Outcome::Failure {
                kind,
                message,
                hint,
            } => Outcome::Failure {
                kind,
                message,
                hint,
            },
        }
    }
}

impl<T> From<Result<T, BridgeError>> for Outcome<T> {
    fn from(result: Result<T, BridgeError>) -> Self {
        match result {
            Ok(data) => Outcome::ok(data),
            Err(e) => Outcome::failure(&e),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            Outcome::Success { message, data } => Envelope {
                success: true,
                message: message.as_deref(),
                kind: None,
                hint: None,
                data: Some(data),
            },
            Outcome::Failure {
                kind,
                message,
                hint,
            } => Envelope {
                success: false,
                message: Some(message),
                kind: Some(*kind),
                hint: hint.as_deref(),
                data: None,
            },
        };
        envelope.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope() {
        let outcome = Outcome::ok_with("Saved", 42u64);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"success": true, "message": "Saved", "data": 42})
        );
    }

    #[test]
    fn unit_success_has_null_data() {
        let outcome: Outcome<()> = Ok(()).into();
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"success": true, "data": null})
        );
    }

    #[test]
    fn failure_envelope_carries_kind() {
        let outcome: Outcome<()> = Err(BridgeError::NotConnected).into();
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["kind"], "not_connected");
        assert_eq!(value["message"], "Not connected");
        assert!(value.get("data").is_none());
        assert!(value["hint"].as_str().unwrap().contains("Connect"));
    }

    #[test]
    fn map_preserves_failure() {
        let outcome: Outcome<u8> = Err(BridgeError::NotFound { path: "/x".into() }).into();
        let mapped = outcome.map(|n| n as u32 + 1);
        assert!(!mapped.is_success());
        assert_eq!(mapped.message(), Some("Not found: /x"));
    }
}
