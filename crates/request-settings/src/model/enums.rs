use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The action a request setting forces onto matching requests.
///
/// The empty string is a real value here: it means "no action override" and is the state a rule
/// is in when the action was never declared. It is never written out as a literal `"unset"`.
#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum RequestAction {
    /// No action override, rendered as `""`.
    #[default]
    #[strum(serialize = "")]
    Unset,

    /// Force a cache lookup.
    #[strum(serialize = "lookup")]
    Lookup,

    /// Pass the request straight to the backend.
    #[strum(serialize = "pass")]
    Pass,
}

impl RequestAction {
    pub fn is_unset(self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl TryFrom<String> for RequestAction {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequestAction> for String {
    fn from(value: RequestAction) -> Self {
        value.to_string()
    }
}

/// How the `X-Forwarded-For` header is treated for matching requests.
#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum ForwardedForPolicy {
    /// Header handling is left to the service default, rendered as `""`.
    #[default]
    #[strum(serialize = "")]
    Unset,

    #[strum(serialize = "clear")]
    Clear,

    #[strum(serialize = "leave")]
    Leave,

    #[strum(serialize = "append")]
    Append,

    #[strum(to_string = "append_all", serialize = "append-all")]
    AppendAll,

    #[strum(serialize = "overwrite")]
    Overwrite,
}

impl ForwardedForPolicy {
    pub fn is_unset(self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl TryFrom<String> for ForwardedForPolicy {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ForwardedForPolicy> for String {
    fn from(value: ForwardedForPolicy) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", RequestAction::Unset)]
    #[case("lookup", RequestAction::Lookup)]
    #[case("pass", RequestAction::Pass)]
    fn valid_action(#[case] input: &str, #[case] expected: RequestAction) {
        let action = RequestAction::from_str(input).expect("valid request action");
        assert_eq!(action, expected);
        assert_eq!(action.to_string(), input);
    }

    #[rstest]
    #[case("unset")]
    #[case("Lookup")]
    #[case("deliver")]
    fn invalid_action(#[case] input: &str) {
        RequestAction::from_str(input).expect_err("invalid request action");
    }

    #[rstest]
    #[case("", ForwardedForPolicy::Unset)]
    #[case("clear", ForwardedForPolicy::Clear)]
    #[case("leave", ForwardedForPolicy::Leave)]
    #[case("append", ForwardedForPolicy::Append)]
    #[case("append_all", ForwardedForPolicy::AppendAll)]
    #[case("append-all", ForwardedForPolicy::AppendAll)]
    #[case("overwrite", ForwardedForPolicy::Overwrite)]
    fn valid_forwarded_for(#[case] input: &str, #[case] expected: ForwardedForPolicy) {
        let policy = ForwardedForPolicy::from_str(input).expect("valid forwarded-for policy");
        assert_eq!(policy, expected);
    }

    #[test]
    fn append_all_renders_with_underscore() {
        assert_eq!(ForwardedForPolicy::AppendAll.to_string(), "append_all");
        assert_eq!(ForwardedForPolicy::AppendAll.as_ref(), "append_all");
    }

    #[test]
    fn unset_action_serializes_to_empty_string() {
        let yaml = serde_yaml::to_string(&RequestAction::Unset).expect("serializable action");
        assert_eq!(yaml.trim(), "''");

        let action: RequestAction = serde_yaml::from_str("''").expect("deserializable action");
        assert_eq!(action, RequestAction::Unset);
    }
}
