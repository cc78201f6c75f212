use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::field::FieldKey;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Composite name field. Both parts are always written together.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub first: Option<String>,
    pub last: Option<String>,
}

impl PersonName {
    pub fn new(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first: non_empty(first.into()),
            last: non_empty(last.into()),
        }
    }

    /// Split free text on the first whitespace run: "Ada King Lovelace"
    /// becomes first = "Ada", last = "King Lovelace".
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.split_once(char::is_whitespace) {
            Some((first, last)) => Self::new(first, last.trim()),
            None => Self::new(s, ""),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.last.is_none()
    }
}

impl fmt::Display for PersonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.first, &self.last) {
            (Some(first), Some(last)) => write!(f, "{first} {last}"),
            (Some(only), None) | (None, Some(only)) => f.write_str(only),
            (None, None) => f.write_str("(no name)"),
        }
    }
}

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident, $err:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            /// Matches the stored label, ignoring ASCII case and surrounding
            /// whitespace.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| TypeError::$err(s.to_string()))
            }
        }
    };
}

labelled_enum!(
    /// Relationship category of a contact. The set is closed: free-text edits
    /// must name one of these. `NotSet` and `Inbox` both count as empty.
    Category, UnknownCategory {
        NotSet => "Not Set",
        Inbox => "Inbox",
        Founder => "Founder",
        ProfessionalInvestor => "Professional Investor",
        Manager => "Manager",
        Team => "Team",
        Advisor => "Advisor",
        Supplier => "Supplier",
        FriendAndFamily => "Friend and Family",
        Institution => "Institution",
        Media => "Media",
        Student => "Student",
        Skip => "Skip",
        WhatsappGroup => "WhatsApp Group Contact",
        SubscriberNewsletter => "SUBSCRIBER NEWSLETTER",
        Other => "Other",
    }
);

labelled_enum!(
    /// Keep-in-touch cadence. `NotSet` is the stored default and counts as
    /// empty.
    Cadence, UnknownCadence {
        NotSet => "Not Set",
        Weekly => "Weekly",
        Monthly => "Monthly",
        Quarterly => "Quarterly",
        TwicePerYear => "Twice per Year",
        OncePerYear => "Once per Year",
        DoNotKeepInTouch => "Do not keep in touch",
    }
);

/// The value of one scalar field of a contact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Name(PersonName),
    Category(Category),
    Text(Option<String>),
    Score(Option<u8>),
    Cadence(Cadence),
}

impl ScalarValue {
    /// Read the value of `key` out of a `contacts` row.
    ///
    /// Missing columns read as the empty value of the field.
    pub fn from_row(key: FieldKey, row: &Map<String, Value>) -> Result<Self, TypeError> {
        let text = |column: &str| {
            row.get(column)
                .and_then(Value::as_str)
                .and_then(|s| non_empty(s.to_string()))
        };
        match key {
            FieldKey::Name => Ok(Self::Name(PersonName {
                first: text("first_name"),
                last: text("last_name"),
            })),
            FieldKey::Category => match text("category") {
                Some(s) => Ok(Self::Category(s.parse()?)),
                None => Ok(Self::Category(Category::NotSet)),
            },
            FieldKey::JobRole => Ok(Self::Text(text("job_role"))),
            FieldKey::Linkedin => Ok(Self::Text(text("linkedin"))),
            FieldKey::Score => match row.get("score") {
                None | Some(Value::Null) => Ok(Self::Score(None)),
                Some(v) => {
                    let n = v.as_i64().ok_or_else(|| TypeError::Mismatch {
                        field: key.to_string(),
                        reason: format!("expected an integer, found {v}"),
                    })?;
                    Ok(Self::Score(Some(checked_score(n)?)))
                }
            },
            FieldKey::KeepInTouchFrequency => match text("keep_in_touch_frequency") {
                Some(s) => Ok(Self::Cadence(s.parse()?)),
                None => Ok(Self::Cadence(Cadence::NotSet)),
            },
            other => Err(TypeError::Mismatch {
                field: other.to_string(),
                reason: "collection fields have no scalar value".into(),
            }),
        }
    }

    /// Parse operator-supplied text for an `edit-custom` choice.
    pub fn parse_for(key: FieldKey, input: &str) -> Result<Self, TypeError> {
        let value = match key {
            FieldKey::Name => Self::Name(PersonName::parse(input)),
            FieldKey::Category => Self::Category(input.parse()?),
            FieldKey::JobRole | FieldKey::Linkedin => Self::Text(non_empty(input.trim().into())),
            FieldKey::Score => {
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    Self::Score(None)
                } else {
                    let n: i64 = trimmed.parse().map_err(|_| TypeError::Mismatch {
                        field: key.to_string(),
                        reason: format!("not a number: {trimmed}"),
                    })?;
                    Self::Score(Some(checked_score(n)?))
                }
            }
            FieldKey::KeepInTouchFrequency => Self::Cadence(input.parse()?),
            other => {
                return Err(TypeError::Mismatch {
                    field: other.to_string(),
                    reason: "collection fields have no scalar value".into(),
                })
            }
        };
        value.validate(key)?;
        Ok(value)
    }

    /// Check that this value is an acceptable replacement for `key`.
    ///
    /// The name must keep at least one non-empty part; every other field
    /// accepts its empty value.
    pub fn validate(&self, key: FieldKey) -> Result<(), TypeError> {
        let mismatch = || TypeError::Mismatch {
            field: key.to_string(),
            reason: format!("{} value", self.type_name()),
        };
        match (key, self) {
            (FieldKey::Name, Self::Name(name)) => {
                if name.is_empty() {
                    return Err(TypeError::Empty { field: "name" });
                }
                Ok(())
            }
            (FieldKey::Category, Self::Category(_)) => Ok(()),
            (FieldKey::JobRole | FieldKey::Linkedin, Self::Text(_)) => Ok(()),
            (FieldKey::Score, Self::Score(score)) => match score {
                Some(s) => checked_score(i64::from(*s)).map(|_| ()),
                None => Ok(()),
            },
            (FieldKey::KeepInTouchFrequency, Self::Cadence(_)) => Ok(()),
            _ => Err(mismatch()),
        }
    }

    /// The column patch that writes this value onto a `contacts` row.
    pub fn to_patch(&self, key: FieldKey) -> Map<String, Value> {
        let mut patch = Map::new();
        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        match self {
            Self::Name(name) => {
                patch.insert("first_name".into(), opt(&name.first));
                patch.insert("last_name".into(), opt(&name.last));
            }
            Self::Category(c) => {
                patch.insert("category".into(), Value::String(c.as_str().into()));
            }
            Self::Text(t) => {
                patch.insert(key.as_str().into(), opt(t));
            }
            Self::Score(s) => {
                patch.insert("score".into(), s.map(Value::from).unwrap_or(Value::Null));
            }
            Self::Cadence(c) => {
                patch.insert(
                    "keep_in_touch_frequency".into(),
                    Value::String(c.as_str().into()),
                );
            }
        }
        patch
    }

    /// Whether the value counts as "missing" for merge suggestions.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Name(name) => name.is_empty(),
            Self::Category(c) => matches!(c, Category::NotSet | Category::Inbox),
            Self::Text(t) => t.is_none(),
            Self::Score(s) => s.is_none(),
            Self::Cadence(c) => *c == Cadence::NotSet,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Category(_) => "category",
            Self::Text(_) => "text",
            Self::Score(_) => "score",
            Self::Cadence(_) => "cadence",
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Category(c) => write!(f, "{c}"),
            Self::Text(Some(t)) => f.write_str(t),
            Self::Text(None) | Self::Score(None) => f.write_str("-"),
            Self::Score(Some(s)) => write!(f, "{s}"),
            Self::Cadence(c) => write!(f, "{c}"),
        }
    }
}

fn checked_score(n: i64) -> Result<u8, TypeError> {
    if (i64::from(MIN_SCORE)..=i64::from(MAX_SCORE)).contains(&n) {
        Ok(n as u8)
    } else {
        Err(TypeError::ScoreOutOfRange(n))
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
