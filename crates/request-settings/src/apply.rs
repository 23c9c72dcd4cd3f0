//! The versioned apply protocol.
//!
//! Versions of a service are immutable once activated, so the [`Reconciler`] never patches a
//! rule in place. It resolves the version the service points at, clones it into a draft if it is
//! active or locked, replaces every changed rule in the draft by deleting and recreating it, and
//! finally compares the draft against the declared rules:
//!
//! ```text
//! Resolved -> Cloned -> Mutated -> Verified
//!        \         \          \
//!         +---------+----------+--> Failed
//! ```
//!
//! Activating the verified draft is a separate step the caller triggers via
//! [`Reconciler::activate`].
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{StreamExt, stream};
use serde::Serialize;
use snafu::{ResultExt, Snafu, ensure};
use strum::Display;
use tracing::{debug, info, instrument, warn};

use crate::{
    client::RemoteClient,
    config::ReconcilerOptions,
    diff::{Changeset, RuleChange, diff},
    flatten::flatten,
    model::{DeclaredRule, DeclaredRuleSet, ServiceVersion},
    verify,
};

/// Defines all error variants which can occur while reconciling request settings.
///
/// Remote failures carry the error of the [`RemoteClient`] implementation as their source.
#[derive(Debug, Snafu)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to resolve the active version of service {service_id:?}"))]
    ResolveVersion { source: E, service_id: String },

    #[snafu(display("failed to clone version {version} of service {service_id:?}"))]
    CloneVersion {
        source: E,
        service_id: String,
        version: u32,
    },

    #[snafu(display(
        "failed to {operation} request setting {rule_name:?} in version {version} of service {service_id:?}"
    ))]
    RemoteCall {
        source: E,
        operation: OperationKind,
        rule_name: String,
        service_id: String,
        version: u32,
    },

    #[snafu(display(
        "failed to list the request settings of version {version} of service {service_id:?}"
    ))]
    ListRules {
        source: E,
        service_id: String,
        version: u32,
    },

    #[snafu(display("failed to activate version {version} of service {service_id:?}"))]
    ActivateVersion {
        source: E,
        service_id: String,
        version: u32,
    },

    #[snafu(display(
        "version {version} of service {service_id:?} is active or locked and must be cloned before it can be changed"
    ))]
    VersionNotMutable { service_id: String, version: u32 },

    #[snafu(display(
        "the request settings of version {version} of service {service_id:?} do not match the declared ones"
    ))]
    ReconciliationMismatch {
        source: verify::Error,
        service_id: String,
        version: u32,
    },
}

/// The states an apply run moves through.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
pub enum ApplyState {
    /// The version the service points at is known.
    Resolved,

    /// A draft was cloned from the resolved version.
    Cloned,

    /// All rule changes were applied to the draft.
    Mutated,

    /// The draft matches the declared rules.
    Verified,

    Failed,
}

/// The result of a successful apply run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Outcome {
    /// [`ApplyState::Resolved`] if nothing had to change, [`ApplyState::Mutated`] if verification
    /// was skipped and [`ApplyState::Verified`] otherwise.
    pub state: ApplyState,

    pub service_id: String,

    /// The version holding the declared rules. This is a draft the caller may activate, unless
    /// nothing had to change.
    pub version: u32,

    pub changeset: Changeset,
}

/// The kind of a remote rule operation.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Delete,
    Create,
}

/// A single remote operation on a rule of a draft version.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Operation {
    Delete { name: String },
    Create(DeclaredRule),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Delete { .. } => OperationKind::Delete,
            Self::Create(_) => OperationKind::Create,
        }
    }

    pub fn rule_name(&self) -> &str {
        match self {
            Self::Delete { name } => name,
            Self::Create(rule) => &rule.name,
        }
    }
}

/// The ordered operations for one rule. Operations of different plans are independent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RulePlan {
    pub name: String,
    pub operations: Vec<Operation>,
}

/// Turns a changeset into per-rule operation plans, ordered by rule name.
///
/// Removed rules are deleted, added rules are created and changed rules are replaced, with the
/// delete always preceding the create.
pub fn plan(changeset: &Changeset) -> Vec<RulePlan> {
    changeset
        .iter()
        .map(|change| {
            let operations = match change {
                RuleChange::Added(rule) => vec![Operation::Create(rule.clone())],
                RuleChange::Removed(rule) => vec![Operation::Delete {
                    name: rule.name.clone(),
                }],
                RuleChange::Changed { before, after, .. } => vec![
                    Operation::Delete {
                        name: before.name.clone(),
                    },
                    Operation::Create(after.clone()),
                ],
            };

            RulePlan {
                name: change.name().to_owned(),
                operations,
            }
        })
        .collect()
}

/// Applies declared request settings to a versioned remote service.
///
/// The remote client is injected at construction. Independent services can be reconciled
/// concurrently by independent reconcilers or by calling [`Reconciler::reconcile`] concurrently,
/// as no state is shared between runs.
#[derive(Debug)]
pub struct Reconciler<C> {
    client: C,
    options: ReconcilerOptions,
}

impl<C> Reconciler<C>
where
    C: RemoteClient,
{
    pub fn new(client: C, options: ReconcilerOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Brings the request settings of `service_id` from the `before` to the `after` state.
    ///
    /// The changes land in a draft version which is returned in the [`Outcome`] and left for the
    /// caller to activate. If `before` and `after` are equal, no remote mutation is issued.
    ///
    /// Dropping the returned future aborts the run without issuing any further remote calls. The
    /// draft is left as is and discarding it is up to the caller.
    #[instrument(skip(self, before, after))]
    pub async fn reconcile(
        &self,
        service_id: &str,
        before: &DeclaredRuleSet,
        after: &DeclaredRuleSet,
    ) -> Result<Outcome, Error<C::Error>> {
        self.run(service_id, before, after)
            .await
            .inspect_err(|error| warn!(state = %ApplyState::Failed, %error, "reconciliation failed"))
    }

    async fn run(
        &self,
        service_id: &str,
        before: &DeclaredRuleSet,
        after: &DeclaredRuleSet,
    ) -> Result<Outcome, Error<C::Error>> {
        let changeset = diff(before, after);

        let resolved = self
            .client
            .active_version(service_id)
            .await
            .context(ResolveVersionSnafu { service_id })?;
        info!(
            state = %ApplyState::Resolved,
            service.version = resolved.number,
            changes = changeset.len(),
            "resolved service version"
        );

        if changeset.is_empty() {
            info!("declared request settings are unchanged, nothing to apply");
            return Ok(Outcome {
                state: ApplyState::Resolved,
                service_id: service_id.to_owned(),
                version: resolved.number,
                changeset,
            });
        }

        let draft = if resolved.is_mutable() && !self.options.always_clone {
            resolved
        } else {
            let number = self
                .client
                .clone_version(service_id, resolved.number)
                .await
                .context(CloneVersionSnafu {
                    service_id,
                    version: resolved.number,
                })?;
            info!(
                state = %ApplyState::Cloned,
                service.version = number,
                source.version = resolved.number,
                "cloned service version into draft"
            );

            ServiceVersion::draft(number)
        };

        self.apply_changeset(service_id, &draft, changeset, after)
            .await
    }

    /// Applies the changes between `before` and `after` directly to `version`, which must be a
    /// draft.
    #[instrument(skip(self, before, after), fields(service.version = version.number))]
    pub async fn apply_to_version(
        &self,
        service_id: &str,
        version: &ServiceVersion,
        before: &DeclaredRuleSet,
        after: &DeclaredRuleSet,
    ) -> Result<Outcome, Error<C::Error>> {
        self.apply_changeset(service_id, version, diff(before, after), after)
            .await
    }

    async fn apply_changeset(
        &self,
        service_id: &str,
        version: &ServiceVersion,
        changeset: Changeset,
        after: &DeclaredRuleSet,
    ) -> Result<Outcome, Error<C::Error>> {
        ensure!(
            version.is_mutable(),
            VersionNotMutableSnafu {
                service_id,
                version: version.number,
            }
        );

        self.execute(service_id, version.number, plan(&changeset))
            .await?;
        info!(
            state = %ApplyState::Mutated,
            service.version = version.number,
            "applied request setting changes"
        );

        if self.options.skip_verification {
            return Ok(Outcome {
                state: ApplyState::Mutated,
                service_id: service_id.to_owned(),
                version: version.number,
                changeset,
            });
        }

        self.verify(service_id, version.number, after).await?;
        info!(
            state = %ApplyState::Verified,
            service.version = version.number,
            "remote request settings match the declared ones"
        );

        Ok(Outcome {
            state: ApplyState::Verified,
            service_id: service_id.to_owned(),
            version: version.number,
            changeset,
        })
    }

    /// Executes the rule plans, keeping up to `max_concurrent_rules` of them in flight.
    ///
    /// Once a plan fails no further plan is started. Plans already in flight run to completion,
    /// so no rule is left deleted but not recreated by a sibling failure. The first failure in
    /// rule name order is returned.
    async fn execute(
        &self,
        service_id: &str,
        version: u32,
        plans: Vec<RulePlan>,
    ) -> Result<(), Error<C::Error>> {
        let failed = AtomicBool::new(false);

        let results: Vec<_> = stream::iter(plans)
            .map(|rule_plan| {
                let failed = &failed;
                async move {
                    if failed.load(Ordering::Acquire) {
                        debug!(
                            rule.name = %rule_plan.name,
                            "skipping request setting after an earlier failure"
                        );
                        return Ok(());
                    }

                    let result = self
                        .execute_rule_plan(service_id, version, rule_plan)
                        .await;
                    if result.is_err() {
                        failed.store(true, Ordering::Release);
                    }

                    result
                }
            })
            .buffered(self.options.max_concurrent_rules.get())
            .collect()
            .await;

        results.into_iter().collect()
    }

    async fn execute_rule_plan(
        &self,
        service_id: &str,
        version: u32,
        rule_plan: RulePlan,
    ) -> Result<(), Error<C::Error>> {
        for operation in rule_plan.operations {
            let kind = operation.kind();
            debug!(
                rule.name = operation.rule_name(),
                %kind,
                service.version = version,
                "issuing request setting operation"
            );

            let result = match &operation {
                Operation::Delete { name } => self.client.delete(service_id, version, name).await,
                Operation::Create(rule) => self
                    .client
                    .create(service_id, version, rule.to_remote(service_id, version))
                    .await
                    .map(|_| ()),
            };

            // Returning here skips the create paired with a failed delete.
            result
                .inspect_err(|error| {
                    warn!(rule.name = operation.rule_name(), %kind, %error, "request setting operation failed");
                })
                .with_context(|_| RemoteCallSnafu {
                    operation: kind,
                    rule_name: operation.rule_name(),
                    service_id,
                    version,
                })?;
        }

        Ok(())
    }

    async fn verify(
        &self,
        service_id: &str,
        version: u32,
        expected: &DeclaredRuleSet,
    ) -> Result<(), Error<C::Error>> {
        let remote = self
            .client
            .list(service_id, version)
            .await
            .context(ListRulesSnafu {
                service_id,
                version,
            })?;

        verify::verify_rules(service_id, version, expected, &remote).context(
            ReconciliationMismatchSnafu {
                service_id,
                version,
            },
        )
    }

    /// Reads the request settings of a version back into their declared form.
    ///
    /// Used to show drift between the declared rules and the remote service.
    #[instrument(skip(self))]
    pub async fn observe(
        &self,
        service_id: &str,
        version: u32,
    ) -> Result<Vec<DeclaredRule>, Error<C::Error>> {
        let remote = self
            .client
            .list(service_id, version)
            .await
            .context(ListRulesSnafu {
                service_id,
                version,
            })?;

        Ok(flatten(&remote))
    }

    /// Promotes `version` to be the active version of the service.
    #[instrument(skip(self))]
    pub async fn activate(
        &self,
        service_id: &str,
        version: u32,
    ) -> Result<ServiceVersion, Error<C::Error>> {
        let activated = self
            .client
            .activate_version(service_id, version)
            .await
            .context(ActivateVersionSnafu {
                service_id,
                version,
            })?;
        info!(service.version = version, "activated service version");

        Ok(activated)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::model::RequestAction;

    fn set(rules: Vec<DeclaredRule>) -> DeclaredRuleSet {
        DeclaredRuleSet::try_from(rules).expect("unique rule names")
    }

    #[test]
    fn replace_deletes_before_creating() {
        let before = set(vec![DeclaredRule::new("alt_backend")]);
        let after = set(vec![DeclaredRule {
            action: RequestAction::Lookup,
            ..DeclaredRule::new("alt_backend")
        }]);

        let plans = plan(&diff(&before, &after));

        assert_eq!(plans.len(), 1);
        assert_eq!(
            plans[0]
                .operations
                .iter()
                .map(Operation::kind)
                .collect::<Vec<_>>(),
            vec![OperationKind::Delete, OperationKind::Create]
        );
    }

    #[rstest]
    #[case::added(vec![], vec![DeclaredRule::new("a")], vec![OperationKind::Create])]
    #[case::removed(vec![DeclaredRule::new("a")], vec![], vec![OperationKind::Delete])]
    #[case::unchanged(vec![DeclaredRule::new("a")], vec![DeclaredRule::new("a")], vec![])]
    fn single_rule_plans(
        #[case] before: Vec<DeclaredRule>,
        #[case] after: Vec<DeclaredRule>,
        #[case] expected: Vec<OperationKind>,
    ) {
        let plans = plan(&diff(&set(before), &set(after)));

        let kinds: Vec<_> = plans
            .iter()
            .flat_map(|rule_plan| rule_plan.operations.iter().map(Operation::kind))
            .collect();
        assert_eq!(kinds, expected);
    }

    #[test]
    fn plans_are_ordered_by_name() {
        let before = set(vec![DeclaredRule::new("b"), DeclaredRule::new("c")]);
        let after = set(vec![
            DeclaredRule::new("a"),
            DeclaredRule {
                force_miss: true,
                ..DeclaredRule::new("c")
            },
        ]);

        let names: Vec<_> = plan(&diff(&before, &after))
            .into_iter()
            .map(|rule_plan| rule_plan.name)
            .collect();

        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
