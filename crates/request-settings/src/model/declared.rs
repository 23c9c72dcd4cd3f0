use std::{
    collections::{BTreeMap, btree_map},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ensure};

use crate::model::{
    DuplicateRuleNameSnafu, FieldValue, ForwardedForPolicy, InvalidEnumerationSnafu,
    MissingRuleNameSnafu, RemoteRule, RequestAction, RuleField, ValidationError,
};

/// A request setting rule as supplied by the declarative configuration loader.
///
/// Every optional field may be omitted and enumerations are still raw strings. Convert into a
/// [`DeclaredRule`] with [`TryFrom`] to validate the enumerations and complete the defaults.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeclaredRuleInput {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xff: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stale_age: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_busy_wait: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_miss: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_ssl: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_headers: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_support: Option<bool>,
}

/// The flattened, default-completed form of a request setting rule.
///
/// Every field is always present. Strings default to `""`, the maximum stale age to `0` and all
/// flags to `false`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct DeclaredRule {
    pub name: String,
    pub request_condition: String,
    pub default_host: String,
    pub xff: ForwardedForPolicy,
    pub max_stale_age: u32,
    pub action: RequestAction,
    pub bypass_busy_wait: bool,
    pub force_miss: bool,
    pub force_ssl: bool,
    pub geo_headers: bool,
    pub timer_support: bool,
}

impl TryFrom<DeclaredRuleInput> for DeclaredRule {
    type Error = ValidationError;

    fn try_from(input: DeclaredRuleInput) -> Result<Self, Self::Error> {
        ensure!(!input.name.is_empty(), MissingRuleNameSnafu);

        let xff = parse_enumeration(RuleField::Xff, input.xff)?;
        let action = parse_enumeration(RuleField::Action, input.action)?;

        Ok(Self {
            name: input.name,
            request_condition: input.request_condition.unwrap_or_default(),
            default_host: input.default_host.unwrap_or_default(),
            xff,
            max_stale_age: input.max_stale_age.unwrap_or_default(),
            action,
            bypass_busy_wait: input.bypass_busy_wait.unwrap_or(false),
            force_miss: input.force_miss.unwrap_or(false),
            force_ssl: input.force_ssl.unwrap_or(false),
            geo_headers: input.geo_headers.unwrap_or(false),
            timer_support: input.timer_support.unwrap_or(false),
        })
    }
}

fn parse_enumeration<T>(field: RuleField, value: Option<String>) -> Result<T, ValidationError>
where
    T: FromStr + Default,
{
    match value {
        None => Ok(T::default()),
        Some(value) => T::from_str(&value)
            .ok()
            .context(InvalidEnumerationSnafu { field, value }),
    }
}

impl DeclaredRule {
    /// Creates a rule with the given name and every other field at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the current value of `field`.
    pub fn field(&self, field: RuleField) -> FieldValue {
        match field {
            RuleField::Name => self.name.as_str().into(),
            RuleField::RequestCondition => self.request_condition.as_str().into(),
            RuleField::DefaultHost => self.default_host.as_str().into(),
            RuleField::Xff => self.xff.to_string().into(),
            RuleField::MaxStaleAge => self.max_stale_age.into(),
            RuleField::Action => self.action.to_string().into(),
            RuleField::BypassBusyWait => self.bypass_busy_wait.into(),
            RuleField::ForceMiss => self.force_miss.into(),
            RuleField::ForceSsl => self.force_ssl.into(),
            RuleField::GeoHeaders => self.geo_headers.into(),
            RuleField::TimerSupport => self.timer_support.into(),
        }
    }

    /// Renders the rule as the flat key/value map used by the declarative layer.
    pub fn to_map(&self) -> BTreeMap<String, FieldValue> {
        use strum::IntoEnumIterator;

        RuleField::iter()
            .map(|field| (field.to_string(), self.field(field)))
            .collect()
    }

    /// Builds the full-record create payload for this rule.
    ///
    /// An unset action or forwarded-for policy is omitted from the payload instead of being sent
    /// as a value.
    pub fn to_remote(&self, service_id: &str, service_version: u32) -> RemoteRule {
        RemoteRule {
            name: self.name.clone(),
            request_condition: Some(self.request_condition.clone()),
            default_host: Some(self.default_host.clone()),
            xff: (!self.xff.is_unset()).then_some(self.xff),
            max_stale_age: Some(self.max_stale_age),
            action: (!self.action.is_unset()).then_some(self.action),
            bypass_busy_wait: Some(self.bypass_busy_wait),
            force_miss: Some(self.force_miss),
            force_ssl: Some(self.force_ssl),
            geo_headers: Some(self.geo_headers),
            timer_support: Some(self.timer_support),
            service_id: Some(service_id.to_owned()),
            service_version: Some(service_version),
            created_at: None,
            updated_at: None,
        }
    }
}

/// A set of declared rules keyed by their unique name.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DeclaredRuleSet(BTreeMap<String, DeclaredRule>);

impl DeclaredRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `rule` to the set, rejecting it if a rule with the same name is already present.
    pub fn try_insert(&mut self, rule: DeclaredRule) -> Result<(), ValidationError> {
        match self.0.entry(rule.name.clone()) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(rule);
                Ok(())
            }
            btree_map::Entry::Occupied(entry) => DuplicateRuleNameSnafu {
                name: entry.key().clone(),
            }
            .fail(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DeclaredRule> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterates over the rules ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &DeclaredRule> {
        self.0.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<DeclaredRule>> for DeclaredRuleSet {
    type Error = ValidationError;

    fn try_from(rules: Vec<DeclaredRule>) -> Result<Self, Self::Error> {
        let mut set = Self::new();
        for rule in rules {
            set.try_insert(rule)?;
        }

        Ok(set)
    }
}

impl TryFrom<Vec<DeclaredRuleInput>> for DeclaredRuleSet {
    type Error = ValidationError;

    fn try_from(inputs: Vec<DeclaredRuleInput>) -> Result<Self, Self::Error> {
        inputs
            .into_iter()
            .map(DeclaredRule::try_from)
            .collect::<Result<Vec<_>, _>>()
            .and_then(Self::try_from)
    }
}

impl<'a> IntoIterator for &'a DeclaredRuleSet {
    type IntoIter = btree_map::Values<'a, String, DeclaredRule>;
    type Item = &'a DeclaredRule;

    fn into_iter(self) -> Self::IntoIter {
        self.0.values()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[test]
    fn omitted_fields_are_completed_with_defaults() {
        let input = DeclaredRuleInput {
            name: "alt_backend".to_owned(),
            max_stale_age: Some(90),
            ..Default::default()
        };

        let rule = DeclaredRule::try_from(input).expect("valid declared rule");

        assert_eq!(rule.action, RequestAction::Unset);
        assert_eq!(rule.xff, ForwardedForPolicy::Unset);
        assert_eq!(rule.request_condition, "");
        assert_eq!(rule.max_stale_age, 90);
        assert!(!rule.force_ssl);
    }

    #[rstest]
    #[case::action(
        DeclaredRuleInput { name: "a".to_owned(), action: Some("unset".to_owned()), ..Default::default() },
        RuleField::Action,
        "unset"
    )]
    #[case::xff(
        DeclaredRuleInput { name: "a".to_owned(), xff: Some("prepend".to_owned()), ..Default::default() },
        RuleField::Xff,
        "prepend"
    )]
    fn invalid_enumeration(
        #[case] input: DeclaredRuleInput,
        #[case] field: RuleField,
        #[case] value: &str,
    ) {
        let error = DeclaredRule::try_from(input).expect_err("invalid enumeration");
        assert_eq!(
            error,
            ValidationError::InvalidEnumeration {
                field,
                value: value.to_owned()
            }
        );
    }

    #[test]
    fn empty_name_is_rejected() {
        let error = DeclaredRule::try_from(DeclaredRuleInput::default()).expect_err("empty name");
        assert_eq!(error, ValidationError::MissingRuleName);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let error = DeclaredRuleSet::try_from(vec![
            DeclaredRule::new("alt_backend"),
            DeclaredRule::new("other"),
            DeclaredRule::new("alt_backend"),
        ])
        .expect_err("duplicate rule name");

        assert_eq!(
            error,
            ValidationError::DuplicateRuleName {
                name: "alt_backend".to_owned()
            }
        );
    }

    #[test]
    fn rule_set_iterates_by_name() {
        let set = DeclaredRuleSet::try_from(vec![
            DeclaredRule::new("zeta"),
            DeclaredRule::new("alpha"),
        ])
        .expect("unique rule names");

        assert_eq!(set.names().collect::<Vec<_>>(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn unset_enumerations_are_omitted_from_payload() {
        let rule = DeclaredRule {
            max_stale_age: 90,
            ..DeclaredRule::new("alt_backend")
        };

        let remote = rule.to_remote("service", 3);

        assert_eq!(remote.action, None);
        assert_eq!(remote.xff, None);
        assert_eq!(remote.max_stale_age, Some(90));
        assert_eq!(remote.service_version, Some(3));
    }

    #[test]
    fn input_from_yaml() {
        let inputs: Vec<DeclaredRuleInput> = serde_yaml::from_str(indoc! {"
            - name: alt_backend
              request_condition: serve_alt_backend
              default_host: other.example.com
              xff: append
              max_stale_age: 90
            - name: force_tls
              force_ssl: true
              action: pass
        "})
        .expect("valid YAML input");

        let set = DeclaredRuleSet::try_from(inputs).expect("valid declared rules");
        let alt_backend = set.get("alt_backend").expect("alt_backend is declared");
        let force_tls = set.get("force_tls").expect("force_tls is declared");

        assert_eq!(alt_backend.xff, ForwardedForPolicy::Append);
        assert_eq!(alt_backend.action, RequestAction::Unset);
        assert_eq!(force_tls.action, RequestAction::Pass);
        assert!(force_tls.force_ssl);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        serde_yaml::from_str::<DeclaredRuleInput>("name: a\nhash_keys: foo\n")
            .expect_err("unknown key");
    }
}
