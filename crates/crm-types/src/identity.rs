use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parse an identifier, rejecting empty or whitespace-bearing input.
            pub fn parse(s: &str) -> Result<Self, TypeError> {
                if s.is_empty() || s.chars().any(char::is_whitespace) {
                    return Err(TypeError::InvalidId(s.to_string()));
                }
                Ok(Self(s.to_string()))
            }

            /// Generate a fresh time-ordered identifier (UUID v7).
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            /// The identifier as stored in the record store.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The identifier as a row value for filters and patches.
            pub fn to_value(&self) -> Value {
                Value::String(self.0.clone())
            }

            /// Read an identifier out of a row value.
            ///
            /// Numeric keys are accepted and rendered as decimal strings.
            pub fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::String(s) => Self::parse(s).ok(),
                    Value::Number(n) => Some(Self(n.to_string())),
                    _ => None,
                }
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({}{})"), $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a contact record (`contacts.contact_id`).
    ///
    /// A merge session only ever holds contact ids, never the records
    /// themselves: the record store owns the lifecycle of both contacts.
    ContactId,
    "c:"
);

string_id!(
    /// Identifier of any non-contact row: collection link rows and the shared
    /// lookup entities (tags, cities, companies) they point at.
    RecordId,
    "r:"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_empty_and_whitespace() {
        assert!(ContactId::parse("").is_err());
        assert!(ContactId::parse("a b").is_err());
        assert!(RecordId::parse("\t").is_err());
        assert!(ContactId::parse("c-1").is_ok());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn value_conversions() {
        let id = ContactId::parse("abc").unwrap();
        assert_eq!(id.to_value(), Value::String("abc".into()));
        assert_eq!(ContactId::from_value(&id.to_value()), Some(id));
        assert_eq!(
            RecordId::from_value(&serde_json::json!(42)),
            Some(RecordId::parse("42").unwrap())
        );
        assert_eq!(RecordId::from_value(&Value::Null), None);
    }

    #[test]
    fn debug_and_display() {
        let id = ContactId::parse("p1").unwrap();
        assert_eq!(format!("{id}"), "p1");
        assert_eq!(format!("{id:?}"), "ContactId(c:p1)");
    }

    #[test]
    fn serde_is_transparent() {
        let id = RecordId::parse("x9").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"x9\"");
        let parsed: RecordId = serde_json::from_str("\"x9\"").unwrap();
        assert_eq!(parsed, id);
    }
}
