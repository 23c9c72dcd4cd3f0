//! Post-apply comparison of the remote rules of a version against the declared rules.
//!
//! Remote records are stripped of their timestamps, flattened and compared field by field,
//! together with the service identity the remote service assigned to them.
use serde::Serialize;
use snafu::{OptionExt, Snafu, ensure};
use tracing::warn;

use crate::{
    diff::field_deltas,
    model::{DeclaredRule, DeclaredRuleSet, RemoteRule},
};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("request setting count mismatch, expected {expected}, got {actual}"))]
    CountMismatch { expected: usize, actual: usize },

    #[snafu(display("request setting {rule_name:?} is missing from the remote version"))]
    MissingRule { rule_name: String },

    #[snafu(display(
        "request setting {rule_name:?} differs in {fields:?}, expected {expected:?}, got {actual:?}"
    ))]
    FieldMismatch {
        rule_name: String,
        fields: Vec<String>,
        expected: Box<ObservedRule>,
        actual: Box<ObservedRule>,
    },
}

/// A flattened rule together with the identity of the version it belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ObservedRule {
    #[serde(flatten)]
    pub rule: DeclaredRule,
    pub service_id: Option<String>,
    pub service_version: Option<u32>,
}

impl ObservedRule {
    /// The rule as it is expected to be stored in `service_version` of `service_id`.
    pub fn expected(rule: &DeclaredRule, service_id: &str, service_version: u32) -> Self {
        Self {
            rule: rule.clone(),
            service_id: Some(service_id.to_owned()),
            service_version: Some(service_version),
        }
    }

    /// Projects a remote record, ignoring its timestamps.
    pub fn observed(remote: &RemoteRule) -> Self {
        let remote = remote.clone().without_timestamps();

        Self {
            rule: DeclaredRule::from(&remote),
            service_id: remote.service_id,
            service_version: remote.service_version,
        }
    }

    /// Names every field in which `self` and `other` differ.
    fn differing_fields(&self, other: &Self) -> Vec<String> {
        let mut fields: Vec<String> = field_deltas(&self.rule, &other.rule)
            .into_iter()
            .map(|delta| delta.field.to_string())
            .collect();

        if self.service_id != other.service_id {
            fields.push("service_id".to_owned());
        }
        if self.service_version != other.service_version {
            fields.push("service_version".to_owned());
        }

        fields
    }
}

/// Checks that `remote` holds exactly the rules of `expected`, as stored in `service_version` of
/// `service_id`.
pub fn verify_rules(
    service_id: &str,
    service_version: u32,
    expected: &DeclaredRuleSet,
    remote: &[RemoteRule],
) -> Result<(), Error> {
    ensure!(
        remote.len() == expected.len(),
        CountMismatchSnafu {
            expected: expected.len(),
            actual: remote.len(),
        }
    );

    for rule in expected {
        verify_rule(service_id, service_version, rule, remote)?;
    }

    Ok(())
}

/// Locates `expected` by name in `remote` and compares it field by field.
pub fn verify_rule(
    service_id: &str,
    service_version: u32,
    expected: &DeclaredRule,
    remote: &[RemoteRule],
) -> Result<(), Error> {
    let actual = remote
        .iter()
        .find(|rule| rule.name == expected.name)
        .map(ObservedRule::observed)
        .context(MissingRuleSnafu {
            rule_name: &expected.name,
        })?;
    let expected = ObservedRule::expected(expected, service_id, service_version);

    if expected == actual {
        return Ok(());
    }

    let fields = expected.differing_fields(&actual);
    warn!(
        rule.name = %expected.rule.name,
        ?fields,
        "remote request setting does not match the declared one"
    );

    FieldMismatchSnafu {
        rule_name: expected.rule.name.clone(),
        fields,
        expected: Box::new(expected),
        actual: Box::new(actual),
    }
    .fail()
}
