//! Field-level comparison of two declared rule sets.
//!
//! Rules are matched by name. A name present only in the new set is added, one present only in
//! the old set is removed and a name present in both with any differing field is changed. A
//! changed rule is always replaced as a whole, so every differing field is reported, including
//! fields that moved back to their default.
use std::collections::{BTreeMap, btree_map};

use serde::Serialize;
use strum::{Display, IntoEnumIterator};

use crate::model::{DeclaredRule, DeclaredRuleSet, FieldValue, RuleField};

/// Whether a field moved away from its default or back to it.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum DeltaKind {
    /// The field now carries an explicit, non-default value.
    Set,

    /// The field reverted to its default value.
    Cleared,
}

/// A single differing field of a changed rule.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FieldDelta {
    pub field: RuleField,
    pub before: FieldValue,
    pub after: FieldValue,
    pub kind: DeltaKind,
}

impl FieldDelta {
    fn new(field: RuleField, before: FieldValue, after: FieldValue) -> Self {
        let kind = match field.default_value() {
            Some(default) if default == after => DeltaKind::Cleared,
            _ => DeltaKind::Set,
        };

        Self {
            field,
            before,
            after,
            kind,
        }
    }
}

/// The classification of a changeset entry.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// The change of one rule between the old and the new declared set.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum RuleChange {
    Added(DeclaredRule),
    Removed(DeclaredRule),
    Changed {
        before: DeclaredRule,
        after: DeclaredRule,
        deltas: Vec<FieldDelta>,
    },
}

impl RuleChange {
    pub fn name(&self) -> &str {
        match self {
            Self::Added(rule) | Self::Removed(rule) => &rule.name,
            Self::Changed { after, .. } => &after.name,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Added(_) => ChangeKind::Added,
            Self::Removed(_) => ChangeKind::Removed,
            Self::Changed { .. } => ChangeKind::Changed,
        }
    }

    /// Returns the differing fields of a changed rule, empty for additions and removals.
    pub fn deltas(&self) -> &[FieldDelta] {
        match self {
            Self::Changed { deltas, .. } => deltas,
            Self::Added(_) | Self::Removed(_) => &[],
        }
    }

    /// Returns the rule as it should exist once the change is applied, if it should exist at all.
    pub fn desired(&self) -> Option<&DeclaredRule> {
        match self {
            Self::Added(rule) | Self::Changed { after: rule, .. } => Some(rule),
            Self::Removed(_) => None,
        }
    }
}

/// The set of rule changes between two declared sets, ordered by rule name.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Changeset(BTreeMap<String, RuleChange>);

impl Changeset {
    pub fn get(&self, name: &str) -> Option<&RuleChange> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleChange> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Counts the entries of the given kind.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.iter().filter(|change| change.kind() == kind).count()
    }
}

impl<'a> IntoIterator for &'a Changeset {
    type IntoIter = btree_map::Values<'a, String, RuleChange>;
    type Item = &'a RuleChange;

    fn into_iter(self) -> Self::IntoIter {
        self.0.values()
    }
}

/// Computes the changeset which turns `before` into `after`.
pub fn diff(before: &DeclaredRuleSet, after: &DeclaredRuleSet) -> Changeset {
    let mut changes = BTreeMap::new();

    for old in before {
        match after.get(&old.name) {
            None => {
                changes.insert(old.name.clone(), RuleChange::Removed(old.clone()));
            }
            Some(new) => {
                let deltas = field_deltas(old, new);
                if !deltas.is_empty() {
                    changes.insert(
                        new.name.clone(),
                        RuleChange::Changed {
                            before: old.clone(),
                            after: new.clone(),
                            deltas,
                        },
                    );
                }
            }
        }
    }

    for new in after.iter().filter(|new| !before.contains(&new.name)) {
        changes.insert(new.name.clone(), RuleChange::Added(new.clone()));
    }

    Changeset(changes)
}

/// Lists every field whose value differs between `before` and `after`, in field order.
pub fn field_deltas(before: &DeclaredRule, after: &DeclaredRule) -> Vec<FieldDelta> {
    RuleField::iter()
        .filter_map(|field| {
            let old = before.field(field);
            let new = after.field(field);
            (old != new).then(|| FieldDelta::new(field, old, new))
        })
        .collect()
}
