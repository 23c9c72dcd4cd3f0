//! Typed representation of a request setting rule, both as it is observed on the remote service
//! ([`RemoteRule`]) and as it is declared locally ([`DeclaredRule`]).
//!
//! External, loosely-shaped input enters through [`DeclaredRuleInput`] and is validated exactly
//! once when converted into a [`DeclaredRule`]. Everything past that boundary works with fixed-shape
//! records.
use serde::Serialize;
use snafu::Snafu;
use strum::{AsRefStr, Display, EnumIter};

mod declared;
mod enums;
mod remote;

pub use declared::*;
pub use enums::*;
pub use remote::*;

/// Errors raised while validating declared input at the configuration boundary.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ValidationError {
    #[snafu(display("invalid value {value:?} for field {field}"))]
    InvalidEnumeration { field: RuleField, value: String },

    #[snafu(display("rule name must not be empty"))]
    MissingRuleName,

    #[snafu(display("rule name {name:?} is declared more than once"))]
    DuplicateRuleName { name: String },
}

/// Every field of a declared rule, named by the key it carries in the flattened map.
#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Display,
    EnumIter,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleField {
    Name,
    RequestCondition,
    DefaultHost,
    Xff,
    MaxStaleAge,
    Action,
    BypassBusyWait,
    ForceMiss,
    ForceSsl,
    GeoHeaders,
    TimerSupport,
}

impl RuleField {
    /// Returns the value a declared rule carries for this field when nothing was configured.
    ///
    /// The name is the identity of a rule and has no default.
    pub fn default_value(self) -> Option<FieldValue> {
        let value = match self {
            Self::Name => return None,
            Self::RequestCondition | Self::DefaultHost => FieldValue::Text(String::new()),
            Self::Xff => FieldValue::Text(ForwardedForPolicy::default().to_string()),
            Self::Action => FieldValue::Text(RequestAction::default().to_string()),
            Self::MaxStaleAge => FieldValue::Integer(0),
            Self::BypassBusyWait
            | Self::ForceMiss
            | Self::ForceSsl
            | Self::GeoHeaders
            | Self::TimerSupport => FieldValue::Bool(false),
        };

        Some(value)
    }
}

/// A single value inside the flattened declarative map.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(u32),
    Text(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
