//! Boundary Translation
//!
//! The single place where external status representations meet
//! [`InstanceStatus`]. Callers may send upper-case names or the legacy
//! numeric codes; anything else is a validation error. Outbound statuses
//! are always the names [`InstanceStatus`] serializes to.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::instance::{InstanceFilter, InstanceStatus};

/// `(status, wire name, legacy code)`
const STATUS_TABLE: [(InstanceStatus, &str, u8); 6] = [
    (InstanceStatus::Pending, "PENDING", 0),
    (InstanceStatus::Running, "RUNNING", 1),
    (InstanceStatus::Paused, "PAUSED", 2),
    (InstanceStatus::Completed, "COMPLETED", 3),
    (InstanceStatus::Failed, "FAILED", 4),
    (InstanceStatus::Cancelled, "CANCELLED", 5),
];

/// A status as received from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireStatus {
    Code(i64),
    Name(String),
}

impl WireStatus {
    pub fn resolve(&self) -> Result<InstanceStatus> {
        match self {
            Self::Code(code) => status_from_code(*code),
            Self::Name(name) => status_from_name(name),
        }
    }
}

pub fn status_from_name(name: &str) -> Result<InstanceStatus> {
    let wanted = name.trim();
    // Numeric codes sometimes arrive as strings
    if let Ok(code) = wanted.parse::<i64>() {
        return status_from_code(code);
    }
    STATUS_TABLE
        .iter()
        .find(|(_, n, _)| n.eq_ignore_ascii_case(wanted))
        .map(|(s, _, _)| *s)
        .ok_or_else(|| EngineError::validation(format!("Unknown instance status '{}'", name)))
}

pub fn status_from_code(code: i64) -> Result<InstanceStatus> {
    STATUS_TABLE
        .iter()
        .find(|(_, _, c)| i64::from(*c) == code)
        .map(|(s, _, _)| *s)
        .ok_or_else(|| EngineError::validation(format!("Unknown instance status code {}", code)))
}

/// Instance filter as received from outside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceQuery {
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub status: Vec<WireStatus>,
}

impl InstanceQuery {
    pub fn into_filter(self) -> Result<InstanceFilter> {
        let status = self
            .status
            .iter()
            .map(WireStatus::resolve)
            .collect::<Result<Vec<_>>>()?;
        Ok(InstanceFilter {
            workflow_name: self.workflow_name,
            namespace: self.namespace,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_covers_every_status() {
        for status in InstanceStatus::ALL {
            assert!(STATUS_TABLE.iter().any(|(s, _, _)| *s == status));
        }
        for (status, name, code) in STATUS_TABLE {
            assert_eq!(name, status.as_str());
            assert_eq!(status_from_name(name).unwrap(), status);
            assert_eq!(status_from_code(i64::from(code)).unwrap(), status);
            assert_eq!(serde_json::to_value(status).unwrap(), json!(name));
        }
    }

    #[test]
    fn test_legacy_codes() {
        assert_eq!(status_from_code(0).unwrap(), InstanceStatus::Pending);
        assert_eq!(status_from_code(5).unwrap(), InstanceStatus::Cancelled);
        assert_eq!(status_from_name("4").unwrap(), InstanceStatus::Failed);
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!(matches!(status_from_code(6), Err(EngineError::Validation(_))));
        assert!(matches!(status_from_code(-1), Err(EngineError::Validation(_))));
        assert!(matches!(status_from_name("DONE"), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_query_from_mixed_json() {
        let query: InstanceQuery = serde_json::from_value(json!({
            "workflowName": "Sample",
            "status": ["RUNNING", 2, "completed"]
        }))
        .unwrap();
        let filter = query.into_filter().unwrap();
        assert_eq!(
            filter.status,
            vec![
                InstanceStatus::Running,
                InstanceStatus::Paused,
                InstanceStatus::Completed
            ]
        );
        assert_eq!(filter.workflow_name.as_deref(), Some("Sample"));
    }

    #[test]
    fn test_query_with_bad_status() {
        let query = InstanceQuery {
            status: vec![WireStatus::Code(9)],
            ..InstanceQuery::default()
        };
        assert!(query.into_filter().is_err());
    }
}
