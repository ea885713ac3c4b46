use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Invoice,
    Complaint,
    Resolution,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Complaint => "complaint",
            Self::Resolution => "resolution",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invoice" => Some(Self::Invoice),
            "complaint" => Some(Self::Complaint),
            "resolution" => Some(Self::Resolution),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One entry of the ledger's audit trail. `entity_id` is the id of the
/// invoice, complaint or resolution named by `category`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub category: AuditCategory,
    pub entity_id: i64,
    pub event_type: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        category: AuditCategory,
        entity_id: i64,
        event_type: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            category,
            entity_id,
            event_type: event_type.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn success(category: AuditCategory, entity_id: i64, event_type: impl Into<String>) -> Self {
        Self::new(category, entity_id, event_type, AuditOutcome::Success)
    }

    pub fn rejected(
        category: AuditCategory,
        entity_id: i64,
        event_type: impl Into<String>,
    ) -> Self {
        Self::new(category, entity_id, event_type, AuditOutcome::Rejected)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditCategory, AuditEvent, AuditOutcome};

    #[test]
    fn rejected_event_keeps_metadata_in_key_order() {
        let event = AuditEvent::rejected(AuditCategory::Complaint, 42, "resolution.rejected")
            .with_metadata("reason", "invalid_state")
            .with_metadata("employee_id", "3");

        assert_eq!(event.outcome, AuditOutcome::Rejected);
        assert_eq!(event.entity_id, 42);
        let keys = event.metadata.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(keys, vec!["employee_id", "reason"]);
    }

    #[test]
    fn events_get_distinct_ids() {
        let first = AuditEvent::success(AuditCategory::Invoice, 1, "invoice.created");
        let second = AuditEvent::success(AuditCategory::Invoice, 1, "invoice.created");
        assert_ne!(first.event_id, second.event_id);
    }

    #[test]
    fn labels_round_trip() {
        for category in [AuditCategory::Invoice, AuditCategory::Complaint, AuditCategory::Resolution]
        {
            assert_eq!(AuditCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(AuditOutcome::parse("rejected"), Some(AuditOutcome::Rejected));
        assert_eq!(AuditOutcome::parse("failed"), None);
    }
}
