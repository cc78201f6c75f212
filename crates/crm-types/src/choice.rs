use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::FieldKind;
use crate::value::ScalarValue;

/// Operator decision for one merge field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "value", rename_all = "kebab-case")]
pub enum Choice {
    /// Leave the primary's value untouched.
    KeepPrimary,
    /// Overwrite the primary with the duplicate's value.
    KeepDuplicate,
    /// Overwrite the primary with an operator-supplied value.
    EditCustom(ScalarValue),
    /// Union both collections (item-level actions decide the details).
    Combine,
}

impl Choice {
    /// The choice a field starts with when a session opens.
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Scalar => Self::KeepPrimary,
            FieldKind::Collection => Self::Combine,
        }
    }

    /// Whether this choice is meaningful for a field of `kind`.
    pub fn applies_to(&self, kind: FieldKind) -> bool {
        match kind {
            FieldKind::Scalar => !matches!(self, Self::Combine),
            FieldKind::Collection => matches!(self, Self::Combine | Self::KeepPrimary),
        }
    }

    /// Whether resolving this choice writes to the primary contact.
    pub fn writes_primary(&self) -> bool {
        matches!(self, Self::KeepDuplicate | Self::EditCustom(_))
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepPrimary => f.write_str("keep-primary"),
            Self::KeepDuplicate => f.write_str("keep-duplicate"),
            Self::EditCustom(v) => write!(f, "edit-custom({v})"),
            Self::Combine => f.write_str("combine"),
        }
    }
}
