use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crm_types::{Choice, ContactId, FieldDescriptor, FieldKey, RecordId};

/// Lifecycle of a merge session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Finalizing,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InProgress => "in progress",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        })
    }
}

/// The wizard's bookkeeping for one primary/duplicate pair.
///
/// Holds contact ids only; contact data lives in the record store.
#[derive(Clone, Debug, Serialize)]
pub struct MergeSession {
    pub id: RecordId,
    pub primary_id: ContactId,
    pub duplicate_id: ContactId,
    pub field_order: Vec<FieldDescriptor>,
    pub current_field_index: usize,
    pub field_choices: BTreeMap<FieldKey, Choice>,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
}

impl MergeSession {
    /// A fresh session at the first field with default choices seeded.
    pub fn new(primary_id: ContactId, duplicate_id: ContactId) -> Self {
        let field_order = FieldDescriptor::standard_order();
        let field_choices = field_order
            .iter()
            .map(|d| (d.key, Choice::default_for(d.kind)))
            .collect();
        Self {
            id: RecordId::generate(),
            primary_id,
            duplicate_id,
            field_order,
            current_field_index: 0,
            field_choices,
            status: SessionStatus::InProgress,
            opened_at: Utc::now(),
        }
    }

    pub fn current_field(&self) -> FieldDescriptor {
        self.field_order[self.current_field_index]
    }

    pub fn is_last_field(&self) -> bool {
        self.current_field_index + 1 == self.field_order.len()
    }

    pub fn choice(&self, field: FieldKey) -> Option<&Choice> {
        self.field_choices.get(&field)
    }

    /// One-based position and total, for display.
    pub fn progress(&self) -> (usize, usize) {
        (self.current_field_index + 1, self.field_order.len())
    }
}
