//! Record-store schema for contacts and their collection fields.
//!
//! Each collection field is a link table owned through `contact_id`. Three of
//! them (tags, cities, companies) link to shared lookup entities; the other
//! two store their values inline. Every link row carries an `is_primary`
//! default flag.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crm_store::{Join, Row};
use crm_types::FieldKey;

use crate::error::{MergeError, MergeResult};

pub const CONTACTS_TABLE: &str = "contacts";
pub const CONTACT_ID: &str = "contact_id";
pub const DEFAULT_FLAG: &str = "is_primary";
pub const KEEP_IN_TOUCH_TABLE: &str = "keep_in_touch";
pub const MODIFIED_AT: &str = "last_modified_at";

/// Relationship recorded when an added company link names none.
pub const DEFAULT_RELATIONSHIP: &str = "not_set";
/// Type recorded when an added email or mobile names none.
pub const DEFAULT_POINT_TYPE: &str = "personal";

/// A shared entity table referenced by a link table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupSpec {
    pub table: &'static str,
    pub id_column: &'static str,
}

/// Where a collection field lives and how its items are identified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectionSpec {
    pub field: FieldKey,
    pub link_table: &'static str,
    pub item_id: &'static str,
    pub lookup: Option<LookupSpec>,
}

const SPECS: [CollectionSpec; 5] = [
    CollectionSpec {
        field: FieldKey::Cities,
        link_table: "contact_cities",
        item_id: "entry_id",
        lookup: Some(LookupSpec {
            table: "cities",
            id_column: "city_id",
        }),
    },
    CollectionSpec {
        field: FieldKey::Tags,
        link_table: "contact_tags",
        item_id: "entry_id",
        lookup: Some(LookupSpec {
            table: "tags",
            id_column: "tag_id",
        }),
    },
    CollectionSpec {
        field: FieldKey::Emails,
        link_table: "contact_emails",
        item_id: "email_id",
        lookup: None,
    },
    CollectionSpec {
        field: FieldKey::Mobiles,
        link_table: "contact_mobiles",
        item_id: "mobile_id",
        lookup: None,
    },
    CollectionSpec {
        field: FieldKey::Companies,
        link_table: "contact_companies",
        item_id: "contact_companies_id",
        lookup: Some(LookupSpec {
            table: "companies",
            id_column: "company_id",
        }),
    },
];

impl CollectionSpec {
    /// Table layout for a collection field.
    pub fn for_field(field: FieldKey) -> MergeResult<&'static CollectionSpec> {
        SPECS
            .iter()
            .find(|s| s.field == field)
            .ok_or_else(|| MergeError::Validation(format!("{field} is not a collection field")))
    }

    pub fn all() -> &'static [CollectionSpec] {
        &SPECS
    }

    /// Joins needed to read the natural key of a link row.
    pub fn joins(&self) -> Vec<Join> {
        self.lookup
            .map(|l| vec![Join::on(l.table, l.id_column)])
            .unwrap_or_default()
    }

    /// The natural key of a link row read with [`Self::joins`].
    ///
    /// Two items with equal keys are the same real-world value.
    pub fn natural_key(&self, row: &Row) -> String {
        match self.field {
            FieldKey::Emails => normalize_email(text(row, "email")),
            FieldKey::Mobiles => normalize_mobile(text(row, "mobile")),
            FieldKey::Tags => normalize_name(text(joined(row, "tags"), "name")),
            FieldKey::Cities => {
                let city = joined(row, "cities");
                city_key(text(city, "name"), text(city, "country"))
            }
            FieldKey::Companies => company_key(
                &value_key(row.get("company_id")),
                text(row, "relationship"),
            ),
            _ => String::new(),
        }
    }

    /// A short label for listings.
    pub fn display(&self, row: &Row) -> String {
        match self.field {
            FieldKey::Emails => text(row, "email").to_string(),
            FieldKey::Mobiles => text(row, "mobile").to_string(),
            FieldKey::Tags => text(joined(row, "tags"), "name").to_string(),
            FieldKey::Cities => {
                let city = joined(row, "cities");
                match text(city, "country") {
                    "" => text(city, "name").to_string(),
                    country => format!("{}, {country}", text(city, "name")),
                }
            }
            FieldKey::Companies => {
                let name = text(joined(row, "companies"), "name");
                match text(row, "relationship") {
                    "" => name.to_string(),
                    rel => format!("{name} ({rel})"),
                }
            }
            _ => String::new(),
        }
    }
}

/// An item an operator asks to add to the primary's collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewItem {
    Email {
        email: String,
        #[serde(default)]
        label: Option<String>,
    },
    Mobile {
        mobile: String,
        #[serde(default)]
        label: Option<String>,
    },
    Tag {
        name: String,
    },
    City {
        name: String,
        #[serde(default)]
        country: Option<String>,
    },
    Company {
        name: String,
        #[serde(default)]
        relationship: Option<String>,
    },
}

impl NewItem {
    pub fn field(&self) -> FieldKey {
        match self {
            Self::Email { .. } => FieldKey::Emails,
            Self::Mobile { .. } => FieldKey::Mobiles,
            Self::Tag { .. } => FieldKey::Tags,
            Self::City { .. } => FieldKey::Cities,
            Self::Company { .. } => FieldKey::Companies,
        }
    }

    /// Reject blank input before anything is written.
    pub fn validate(&self) -> MergeResult<()> {
        let (what, value) = match self {
            Self::Email { email, .. } => ("email", email.as_str()),
            Self::Mobile { mobile, .. } => ("mobile", mobile.as_str()),
            Self::Tag { name } => ("tag name", name.as_str()),
            Self::City { name, .. } => ("city name", name.as_str()),
            Self::Company { name, .. } => ("company name", name.as_str()),
        };
        if value.trim().is_empty() {
            return Err(MergeError::Validation(format!("{what} must not be empty")));
        }
        if let Self::Email { email, .. } = self {
            if !email.contains('@') {
                return Err(MergeError::Validation(format!("not an email address: {email}")));
            }
        }
        if let Self::Mobile { mobile, .. } = self {
            if normalize_mobile(mobile).trim_start_matches('+').is_empty() {
                return Err(MergeError::Validation(format!("not a phone number: {mobile}")));
            }
        }
        Ok(())
    }

    /// Key used to find an existing lookup entity, case-insensitive.
    pub fn lookup_key(&self) -> Option<String> {
        match self {
            Self::Tag { name } | Self::Company { name, .. } => Some(normalize_name(name)),
            Self::City { name, country } => {
                Some(city_key(name, country.as_deref().unwrap_or_default()))
            }
            _ => None,
        }
    }

    /// Natural key of the lookup row `entity`, comparable with [`Self::lookup_key`].
    pub fn entity_key(&self, entity: &Row) -> String {
        match self {
            Self::City { .. } => city_key(text(entity, "name"), text(entity, "country")),
            _ => normalize_name(text(entity, "name")),
        }
    }

    /// A new lookup row for this item.
    pub fn entity_row(&self) -> Row {
        let mut row = Row::new();
        match self {
            Self::Tag { name } => {
                row.insert("name".into(), Value::from(name.trim()));
            }
            Self::City { name, country } => {
                row.insert("name".into(), Value::from(name.trim()));
                row.insert(
                    "country".into(),
                    country
                        .as_deref()
                        .map(|c| Value::from(c.trim()))
                        .unwrap_or(Value::Null),
                );
            }
            Self::Company { name, .. } => {
                row.insert("name".into(), Value::from(name.trim()));
                row.insert("category".into(), Value::from("Inbox"));
            }
            _ => {}
        }
        row
    }

    /// Natural key of the link row that would be created, given the linked
    /// entity id for lookup-backed fields.
    pub fn natural_key(&self, entity_id: Option<&Value>) -> String {
        match self {
            Self::Email { email, .. } => normalize_email(email),
            Self::Mobile { mobile, .. } => normalize_mobile(mobile),
            Self::Tag { name } => normalize_name(name),
            Self::City { name, country } => city_key(name, country.as_deref().unwrap_or_default()),
            Self::Company { relationship, .. } => company_key(
                &value_key(entity_id),
                relationship.as_deref().unwrap_or(DEFAULT_RELATIONSHIP),
            ),
        }
    }

    /// The link row to insert (without owner or default flag).
    pub fn link_row(&self, entity_id: Option<&Value>) -> Row {
        let mut row = Row::new();
        let point_type = |label: &Option<String>| {
            Value::from(label.as_deref().unwrap_or(DEFAULT_POINT_TYPE))
        };
        match self {
            Self::Email { email, label } => {
                row.insert("email".into(), Value::from(normalize_email(email)));
                row.insert("type".into(), point_type(label));
            }
            Self::Mobile { mobile, label } => {
                row.insert("mobile".into(), Value::from(normalize_mobile(mobile)));
                row.insert("type".into(), point_type(label));
            }
            Self::Tag { .. } | Self::City { .. } | Self::Company { .. } => {
                if let Some(lookup) = CollectionSpec::for_field(self.field())
                    .ok()
                    .and_then(|s| s.lookup)
                {
                    row.insert(
                        lookup.id_column.into(),
                        entity_id.cloned().unwrap_or(Value::Null),
                    );
                }
                if let Self::Company { relationship, .. } = self {
                    row.insert(
                        "relationship".into(),
                        Value::from(relationship.as_deref().unwrap_or(DEFAULT_RELATIONSHIP)),
                    );
                }
            }
        }
        row
    }
}

impl fmt::Display for NewItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email { email, .. } => f.write_str(email),
            Self::Mobile { mobile, .. } => f.write_str(mobile),
            Self::Tag { name } => f.write_str(name),
            Self::City { name, country: Some(c) } => write!(f, "{name}, {c}"),
            Self::City { name, country: None } => f.write_str(name),
            Self::Company { name, .. } => f.write_str(name),
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Digits only, keeping a leading `+`.
pub fn normalize_mobile(mobile: &str) -> String {
    let trimmed = mobile.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if trimmed.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn city_key(name: &str, country: &str) -> String {
    format!("{}|{}", normalize_name(name), country.trim())
}

fn company_key(company_id: &str, relationship: &str) -> String {
    let relationship = match relationship.trim() {
        "" => DEFAULT_RELATIONSHIP,
        r => r,
    };
    format!("{company_id}|{relationship}")
}

/// A row value rendered as a comparable string.
pub fn value_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn text<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).and_then(Value::as_str).unwrap_or_default()
}

fn joined<'a>(row: &'a Row, alias: &str) -> &'a Row {
    static EMPTY: std::sync::OnceLock<Row> = std::sync::OnceLock::new();
    row.get(alias)
        .and_then(Value::as_object)
        .unwrap_or_else(|| EMPTY.get_or_init(Row::new))
}
