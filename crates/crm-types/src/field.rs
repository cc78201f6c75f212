use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// How a merge field is reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Single-valued attribute on the contact row.
    Scalar,
    /// One-to-many child set reconciled item by item.
    Collection,
}

/// The fields an operator walks through, in wizard order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Name,
    Category,
    JobRole,
    Linkedin,
    Score,
    KeepInTouchFrequency,
    Cities,
    Tags,
    Emails,
    Mobiles,
    Companies,
}

impl FieldKey {
    pub const ALL: [FieldKey; 11] = [
        FieldKey::Name,
        FieldKey::Category,
        FieldKey::JobRole,
        FieldKey::Linkedin,
        FieldKey::Score,
        FieldKey::KeepInTouchFrequency,
        FieldKey::Cities,
        FieldKey::Tags,
        FieldKey::Emails,
        FieldKey::Mobiles,
        FieldKey::Companies,
    ];

    pub fn kind(self) -> FieldKind {
        match self {
            Self::Name
            | Self::Category
            | Self::JobRole
            | Self::Linkedin
            | Self::Score
            | Self::KeepInTouchFrequency => FieldKind::Scalar,
            Self::Cities | Self::Tags | Self::Emails | Self::Mobiles | Self::Companies => {
                FieldKind::Collection
            }
        }
    }

    pub fn is_collection(self) -> bool {
        self.kind() == FieldKind::Collection
    }

    /// Stable snake_case key, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Category => "category",
            Self::JobRole => "job_role",
            Self::Linkedin => "linkedin",
            Self::Score => "score",
            Self::KeepInTouchFrequency => "keep_in_touch_frequency",
            Self::Cities => "cities",
            Self::Tags => "tags",
            Self::Emails => "emails",
            Self::Mobiles => "mobiles",
            Self::Companies => "companies",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Category => "Category",
            Self::JobRole => "Job Role",
            Self::Linkedin => "LinkedIn",
            Self::Score => "Score",
            Self::KeepInTouchFrequency => "Keep in Touch",
            Self::Cities => "Cities",
            Self::Tags => "Tags",
            Self::Emails => "Emails",
            Self::Mobiles => "Mobiles",
            Self::Companies => "Companies",
        }
    }

    pub fn descriptor(self) -> FieldDescriptor {
        FieldDescriptor {
            key: self,
            kind: self.kind(),
            label: self.label(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| TypeError::UnknownField(s.to_string()))
    }
}

/// A merge field as presented to the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub key: FieldKey,
    pub kind: FieldKind,
    pub label: &'static str,
}

/// The fixed wizard order: scalar fields first, then the collections.
pub const FIELD_ORDER: [FieldKey; 11] = FieldKey::ALL;

impl FieldDescriptor {
    /// Descriptors for [`FIELD_ORDER`].
    pub fn standard_order() -> Vec<FieldDescriptor> {
        FIELD_ORDER.iter().map(|k| k.descriptor()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_precede_collections() {
        let order = FieldDescriptor::standard_order();
        assert_eq!(order.len(), 11);
        let first_collection = order
            .iter()
            .position(|d| d.kind == FieldKind::Collection)
            .unwrap();
        assert!(order[..first_collection]
            .iter()
            .all(|d| d.kind == FieldKind::Scalar));
        assert!(order[first_collection..]
            .iter()
            .all(|d| d.kind == FieldKind::Collection));
        assert_eq!(order[0].key, FieldKey::Name);
        assert_eq!(order[10].key, FieldKey::Companies);
    }

    #[test]
    fn key_string_roundtrip() {
        for key in FieldKey::ALL {
            assert_eq!(key.as_str().parse::<FieldKey>().unwrap(), key);
            let json = serde_json::to_string(&key).unwrap();
            assert_eq!(json, format!("\"{}\"", key.as_str()));
        }
        assert!("nickname".parse::<FieldKey>().is_err());
    }

    #[test]
    fn descriptor_carries_label() {
        let d = FieldKey::KeepInTouchFrequency.descriptor();
        assert_eq!(d.label, "Keep in Touch");
        assert_eq!(d.kind, FieldKind::Scalar);
    }
}
