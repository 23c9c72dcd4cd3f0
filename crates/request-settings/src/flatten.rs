//! Projection of remote records into their flattened declarative form.
use crate::model::{DeclaredRule, RemoteRule};

/// Flattens `remote_rules` into declared rules, one output per input and in the same order.
///
/// Every optional field the remote record omits is completed with its default. The transform
/// never fails and never filters.
pub fn flatten(remote_rules: &[RemoteRule]) -> Vec<DeclaredRule> {
    remote_rules.iter().map(DeclaredRule::from).collect()
}

impl From<&RemoteRule> for DeclaredRule {
    fn from(remote: &RemoteRule) -> Self {
        Self {
            name: remote.name.clone(),
            request_condition: remote.request_condition.clone().unwrap_or_default(),
            default_host: remote.default_host.clone().unwrap_or_default(),
            xff: remote.xff.unwrap_or_default(),
            max_stale_age: remote.max_stale_age.unwrap_or(0),
            action: remote.action.unwrap_or_default(),
            bypass_busy_wait: remote.bypass_busy_wait.unwrap_or(false),
            force_miss: remote.force_miss.unwrap_or(false),
            force_ssl: remote.force_ssl.unwrap_or(false),
            geo_headers: remote.geo_headers.unwrap_or(false),
            timer_support: remote.timer_support.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::model::{FieldValue, ForwardedForPolicy, RequestAction, RuleField};

    fn alt_backend() -> RemoteRule {
        RemoteRule {
            name: "alt_backend".to_owned(),
            request_condition: Some("serve_alt_backend".to_owned()),
            default_host: Some("other.example.com".to_owned()),
            xff: Some(ForwardedForPolicy::Append),
            max_stale_age: Some(90),
            action: Some(RequestAction::Pass),
            bypass_busy_wait: Some(false),
            force_miss: Some(false),
            force_ssl: Some(false),
            geo_headers: Some(false),
            timer_support: Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn flatten_to_declared_map() {
        let flattened = flatten(&[alt_backend()]);

        let expected: BTreeMap<String, FieldValue> = [
            ("name", FieldValue::from("alt_backend")),
            ("request_condition", "serve_alt_backend".into()),
            ("default_host", "other.example.com".into()),
            ("xff", "append".into()),
            ("max_stale_age", FieldValue::Integer(90)),
            ("action", "pass".into()),
            ("bypass_busy_wait", false.into()),
            ("force_miss", false.into()),
            ("force_ssl", false.into()),
            ("geo_headers", false.into()),
            ("timer_support", false.into()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();

        assert_eq!(flattened.len(), 1);
        assert_eq!(flattened[0].to_map(), expected);
    }

    #[rstest]
    #[case::zero_value(RemoteRule { name: "bare".to_owned(), ..Default::default() })]
    #[case::populated(alt_backend())]
    fn flattened_rules_are_total(#[case] remote: RemoteRule) {
        let map = flatten(&[remote])[0].to_map();

        for field in RuleField::iter() {
            assert!(map.contains_key(field.as_ref()), "missing key {field}");
        }
    }

    #[test]
    fn zero_value_record_yields_defaults() {
        let flattened = flatten(&[RemoteRule {
            name: "bare".to_owned(),
            ..Default::default()
        }]);

        assert_eq!(flattened, vec![DeclaredRule::new("bare")]);
        for field in RuleField::iter().filter(|field| *field != RuleField::Name) {
            assert_eq!(Some(flattened[0].field(field)), field.default_value());
        }
    }

    #[test]
    fn explicit_empty_action_is_kept() {
        let flattened = flatten(&[RemoteRule {
            action: Some(RequestAction::Unset),
            ..alt_backend()
        }]);

        assert_eq!(
            flattened[0].field(RuleField::Action),
            FieldValue::Text(String::new())
        );
    }

    #[test]
    fn order_and_cardinality_are_preserved() {
        let names = ["zeta", "alpha", "zeta", "mid"];
        let remote: Vec<_> = names
            .iter()
            .map(|name| RemoteRule {
                name: (*name).to_owned(),
                ..Default::default()
            })
            .collect();

        let flattened = flatten(&remote);

        assert_eq!(
            flattened.iter().map(|rule| rule.name.as_str()).collect::<Vec<_>>(),
            names
        );
    }

    #[test]
    fn empty_input() {
        assert!(flatten(&[]).is_empty());
    }
}
