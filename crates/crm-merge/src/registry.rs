use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};

/// What finalization does with rows that reference the duplicate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentAction {
    /// Rewrite the foreign key to point at the primary.
    #[default]
    Transfer,
    /// Delete the rows outright.
    Purge,
}

impl fmt::Display for DependentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transfer => "transfer",
            Self::Purge => "purge",
        })
    }
}

/// One `(table, column)` pair holding a contact foreign key.
///
/// With a `counterpart`, only rows whose `column` names the duplicate *and*
/// whose `counterpart` column names the primary are touched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentTable {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub action: DependentAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<String>,
}

impl DependentTable {
    pub fn transfer(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            action: DependentAction::Transfer,
            counterpart: None,
        }
    }

    pub fn purge(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            action: DependentAction::Purge,
            counterpart: None,
        }
    }

    /// Restrict the entry to rows pairing the duplicate with the primary.
    pub fn paired_with(mut self, counterpart: impl Into<String>) -> Self {
        self.counterpart = Some(counterpart.into());
        self
    }
}

impl fmt::Display for DependentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)?;
        if let Some(counterpart) = &self.counterpart {
            write!(f, "+{counterpart}")?;
        }
        write!(f, " ({})", self.action)
    }
}

/// Tables whose `contact_id` is moved to the primary on finalization.
const CONTACT_ID_TABLES: [&str; 15] = [
    "interactions",
    "notes_contacts",
    "contact_email_threads",
    "attachments",
    "deals_contacts",
    "meeting_contacts",
    "investments_contacts",
    "contact_chats",
    "chat",
    "email_participants",
    "contact_emails",
    "contact_mobiles",
    "contact_tags",
    "contact_cities",
    "contact_companies",
];

/// The set of dependent tables consulted by finalization.
///
/// All purge entries run before any transfer entry. Within each phase entries
/// run concurrently, so no entry may depend on another of the same action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependentRegistry {
    entries: Vec<DependentTable>,
}

impl DependentRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The compiled-in registry for the standard contact schema.
    pub fn standard() -> Self {
        let mut entries: Vec<DependentTable> = CONTACT_ID_TABLES
            .iter()
            .map(|t| DependentTable::transfer(*t, "contact_id"))
            .collect();
        entries.push(DependentTable::transfer("emails", "sender_contact_id"));
        entries.push(DependentTable::transfer("deals", "introducer"));
        // The pair being merged is dropped; pairings with third contacts
        // follow the duplicate onto the primary.
        entries.push(
            DependentTable::purge("contact_duplicates", "primary_contact_id")
                .paired_with("duplicate_contact_id"),
        );
        entries.push(
            DependentTable::purge("contact_duplicates", "duplicate_contact_id")
                .paired_with("primary_contact_id"),
        );
        entries.push(DependentTable::transfer("contact_duplicates", "primary_contact_id"));
        entries.push(DependentTable::transfer("contact_duplicates", "duplicate_contact_id"));
        entries.push(DependentTable::purge("keep_in_touch", "contact_id"));
        Self { entries }
    }

    pub fn from_entries(entries: Vec<DependentTable>) -> MergeResult<Self> {
        let registry = Self { entries };
        registry.validate()?;
        Ok(registry)
    }

    /// Append an entry, rejecting blanks and repeated entries.
    pub fn with(mut self, entry: DependentTable) -> MergeResult<Self> {
        self.entries.push(entry);
        self.validate()?;
        Ok(self)
    }

    pub fn entries(&self) -> &[DependentTable] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependentTable> {
        self.entries.iter()
    }

    /// Number of entries with the given action.
    pub fn count(&self, action: DependentAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    pub fn validate(&self) -> MergeResult<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            let blank_counterpart = entry
                .counterpart
                .as_deref()
                .is_some_and(|c| c.trim().is_empty() || c == entry.column);
            if entry.table.trim().is_empty() || entry.column.trim().is_empty() || blank_counterpart
            {
                return Err(MergeError::Config(format!(
                    "registry entry has a blank or repeated column: {entry}"
                )));
            }
            let key = (
                entry.table.as_str(),
                entry.column.as_str(),
                entry.action,
                entry.counterpart.as_deref(),
            );
            if !seen.insert(key) {
                return Err(MergeError::Config(format!("registry lists {entry} twice")));
            }
        }
        Ok(())
    }
}

impl Default for DependentRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_shape() {
        let r = DependentRegistry::standard();
        assert_eq!(r.len(), 22);
        assert_eq!(r.count(DependentAction::Transfer), 19);
        assert_eq!(r.count(DependentAction::Purge), 3);
        assert!(r.validate().is_ok());
        assert!(r
            .iter()
            .any(|e| e.table == "emails" && e.column == "sender_contact_id"));
        assert!(r.iter().any(|e| e.table == "deals" && e.column == "introducer"));
    }

    #[test]
    fn duplicate_pairs_are_rejected() {
        let err = DependentRegistry::standard()
            .with(DependentTable::transfer("interactions", "contact_id"))
            .unwrap_err();
        assert!(matches!(err, MergeError::Config(_)));
    }

    #[test]
    fn blank_entries_are_rejected() {
        let err = DependentRegistry::from_entries(vec![DependentTable::purge("notes", " ")]);
        assert!(err.is_err());
    }

    #[test]
    fn same_table_different_column_is_fine() {
        let r = DependentRegistry::empty()
            .with(DependentTable::transfer("deals", "owner_id"))
            .unwrap()
            .with(DependentTable::transfer("deals", "introducer"))
            .unwrap();
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn action_defaults_to_transfer_in_serde() {
        let entry: DependentTable =
            serde_json::from_str(r#"{"table": "notes", "column": "author_id"}"#).unwrap();
        assert_eq!(entry.action, DependentAction::Transfer);
    }

    #[test]
    fn display_format() {
        let e = DependentTable::purge("keep_in_touch", "contact_id");
        assert_eq!(e.to_string(), "keep_in_touch.contact_id (purge)");
        let pair = DependentTable::purge("contact_duplicates", "duplicate_contact_id")
            .paired_with("primary_contact_id");
        assert_eq!(
            pair.to_string(),
            "contact_duplicates.duplicate_contact_id+primary_contact_id (purge)"
        );
    }

    #[test]
    fn counterpart_must_name_another_column() {
        let err = DependentRegistry::from_entries(vec![
            DependentTable::purge("contact_duplicates", "primary_contact_id")
                .paired_with("primary_contact_id"),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn counterpart_round_trips_through_serde() {
        let entry: DependentTable = serde_json::from_str(
            r#"{"table": "contact_duplicates", "column": "duplicate_contact_id",
                "action": "purge", "counterpart": "primary_contact_id"}"#,
        )
        .unwrap();
        assert_eq!(entry.counterpart.as_deref(), Some("primary_contact_id"));
        let plain = serde_json::to_value(DependentTable::transfer("deals", "introducer")).unwrap();
        assert!(plain.get("counterpart").is_none());
    }
}
