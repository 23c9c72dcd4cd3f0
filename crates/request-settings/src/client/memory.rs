//! An in-process [`RemoteClient`] which keeps every service version in memory.
//!
//! It behaves like the remote service where it matters to the engine: only draft versions accept
//! writes, rule names are unique per version, and the service assigns identity and timestamps on
//! create. Every call is recorded, and failures or list omissions can be injected.
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use jiff::Timestamp;
use snafu::{OptionExt, Snafu, ensure};
use strum::Display;
use tokio::sync::Mutex;

use crate::{
    client::RemoteClient,
    model::{RemoteRule, ServiceVersion},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("service {service_id:?} does not exist"))]
    UnknownService { service_id: String },

    #[snafu(display("version {version} of service {service_id:?} does not exist"))]
    UnknownVersion { service_id: String, version: u32 },

    #[snafu(display("version {version} of service {service_id:?} is not a draft"))]
    VersionLocked { service_id: String, version: u32 },

    #[snafu(display("request setting {name:?} already exists in version {version}"))]
    RuleExists { name: String, version: u32 },

    #[snafu(display("request setting {name:?} does not exist in version {version}"))]
    UnknownRule { name: String, version: u32 },

    #[snafu(display("injected {kind} failure"))]
    Injected { kind: CallKind },
}

/// The remote operations the client records.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum CallKind {
    ActiveVersion,
    CloneVersion,
    List,
    Create,
    Delete,
    ActivateVersion,
}

/// A recorded remote call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    pub kind: CallKind,
    pub service_id: String,
    pub version: Option<u32>,
    pub rule_name: Option<String>,
}

impl Call {
    pub fn new(kind: CallKind, service_id: &str, version: Option<u32>) -> Self {
        Self {
            kind,
            service_id: service_id.to_owned(),
            version,
            rule_name: None,
        }
    }

    pub fn create(service_id: &str, version: u32, rule_name: &str) -> Self {
        Self {
            rule_name: Some(rule_name.to_owned()),
            ..Self::new(CallKind::Create, service_id, Some(version))
        }
    }

    pub fn delete(service_id: &str, version: u32, rule_name: &str) -> Self {
        Self {
            rule_name: Some(rule_name.to_owned()),
            ..Self::new(CallKind::Delete, service_id, Some(version))
        }
    }
}

#[derive(Debug)]
struct Failure {
    kind: CallKind,
    rule_name: Option<String>,
}

impl Failure {
    fn matches(&self, kind: CallKind, rule_name: Option<&str>) -> bool {
        self.kind == kind
            && self
                .rule_name
                .as_deref()
                .is_none_or(|name| Some(name) == rule_name)
    }
}

#[derive(Debug)]
struct VersionSlot {
    info: ServiceVersion,
    rules: BTreeMap<String, RemoteRule>,
}

#[derive(Debug, Default)]
struct State {
    services: BTreeMap<String, BTreeMap<u32, VersionSlot>>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    hidden_rules: BTreeSet<String>,
}

impl State {
    fn record(&mut self, call: Call) -> Result<(), Error> {
        let injected = self
            .failures
            .iter()
            .any(|failure| failure.matches(call.kind, call.rule_name.as_deref()));
        let kind = call.kind;
        self.calls.push(call);

        ensure!(!injected, InjectedSnafu { kind });
        Ok(())
    }

    fn versions_mut(&mut self, service_id: &str) -> Result<&mut BTreeMap<u32, VersionSlot>, Error> {
        self.services
            .get_mut(service_id)
            .context(UnknownServiceSnafu { service_id })
    }

    fn slot_mut(&mut self, service_id: &str, version: u32) -> Result<&mut VersionSlot, Error> {
        self.versions_mut(service_id)?
            .get_mut(&version)
            .context(UnknownVersionSnafu {
                service_id,
                version,
            })
    }

    fn draft_mut(&mut self, service_id: &str, version: u32) -> Result<&mut VersionSlot, Error> {
        let slot = self.slot_mut(service_id, version)?;
        ensure!(
            slot.info.is_mutable(),
            VersionLockedSnafu {
                service_id,
                version
            }
        );

        Ok(slot)
    }
}

/// See the [module documentation](self).
#[derive(Debug, Default)]
pub struct InMemoryClient {
    state: Mutex<State>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `version` of `service_id`, holding `rules`.
    ///
    /// The service identity of each rule is filled in, and if `version` is active every other
    /// version of the service is deactivated.
    pub fn with_version(
        mut self,
        service_id: &str,
        version: ServiceVersion,
        rules: impl IntoIterator<Item = RemoteRule>,
    ) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let rule = RemoteRule {
                    service_id: Some(service_id.to_owned()),
                    service_version: Some(version.number),
                    ..rule
                };
                (rule.name.clone(), rule)
            })
            .collect();

        let versions = self
            .state
            .get_mut()
            .services
            .entry(service_id.to_owned())
            .or_default();
        if version.active {
            for slot in versions.values_mut() {
                slot.info.active = false;
            }
        }
        versions.insert(
            version.number,
            VersionSlot {
                info: version,
                rules,
            },
        );

        self
    }

    /// Makes every call of `kind` fail, or only those for `rule_name` if one is given.
    pub fn with_failure(mut self, kind: CallKind, rule_name: Option<&str>) -> Self {
        self.state.get_mut().failures.push(Failure {
            kind,
            rule_name: rule_name.map(ToOwned::to_owned),
        });

        self
    }

    /// Omits the rule called `name` from every list result, while keeping it stored.
    pub fn with_hidden_rule(mut self, name: &str) -> Self {
        self.state.get_mut().hidden_rules.insert(name.to_owned());
        self
    }

    /// Returns all calls issued so far, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Returns the stored rules of a version without recording a call.
    pub async fn rules(&self, service_id: &str, version: u32) -> Option<Vec<RemoteRule>> {
        let state = self.state.lock().await;
        let slot = state.services.get(service_id)?.get(&version)?;
        Some(slot.rules.values().cloned().collect())
    }

    /// Returns a version of a service without recording a call.
    pub async fn version(&self, service_id: &str, version: u32) -> Option<ServiceVersion> {
        let state = self.state.lock().await;
        Some(state.services.get(service_id)?.get(&version)?.info)
    }
}

#[async_trait]
impl RemoteClient for InMemoryClient {
    type Error = Error;

    async fn active_version(&self, service_id: &str) -> Result<ServiceVersion, Self::Error> {
        let mut state = self.state.lock().await;
        state.record(Call::new(CallKind::ActiveVersion, service_id, None))?;

        let versions = state.versions_mut(service_id)?;
        versions
            .values()
            .find(|slot| slot.info.active)
            .or_else(|| versions.values().next_back())
            .map(|slot| slot.info)
            .context(UnknownServiceSnafu { service_id })
    }

    async fn clone_version(&self, service_id: &str, version: u32) -> Result<u32, Self::Error> {
        let mut state = self.state.lock().await;
        state.record(Call::new(CallKind::CloneVersion, service_id, Some(version)))?;

        let source_rules = state.slot_mut(service_id, version)?.rules.clone();
        let versions = state.versions_mut(service_id)?;
        let number = versions.keys().next_back().map_or(1, |last| last + 1);

        let rules = source_rules
            .into_iter()
            .map(|(name, rule)| {
                let rule = RemoteRule {
                    service_version: Some(number),
                    ..rule
                };
                (name, rule)
            })
            .collect();

        versions.insert(
            number,
            VersionSlot {
                info: ServiceVersion::draft(number),
                rules,
            },
        );

        Ok(number)
    }

    async fn list(&self, service_id: &str, version: u32) -> Result<Vec<RemoteRule>, Self::Error> {
        let mut state = self.state.lock().await;
        state.record(Call::new(CallKind::List, service_id, Some(version)))?;

        let hidden_rules = state.hidden_rules.clone();
        let slot = state.slot_mut(service_id, version)?;

        Ok(slot
            .rules
            .values()
            .filter(|rule| !hidden_rules.contains(&rule.name))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        service_id: &str,
        version: u32,
        rule: RemoteRule,
    ) -> Result<RemoteRule, Self::Error> {
        let mut state = self.state.lock().await;
        state.record(Call::create(service_id, version, &rule.name))?;

        let slot = state.draft_mut(service_id, version)?;
        ensure!(
            !slot.rules.contains_key(&rule.name),
            RuleExistsSnafu {
                name: rule.name,
                version
            }
        );

        let now = Timestamp::now();
        let stored = RemoteRule {
            service_id: Some(service_id.to_owned()),
            service_version: Some(version),
            created_at: Some(now),
            updated_at: Some(now),
            ..rule
        };
        slot.rules.insert(stored.name.clone(), stored.clone());

        Ok(stored)
    }

    async fn delete(&self, service_id: &str, version: u32, name: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        state.record(Call::delete(service_id, version, name))?;

        state
            .draft_mut(service_id, version)?
            .rules
            .remove(name)
            .map(|_| ())
            .context(UnknownRuleSnafu { name, version })
    }

    async fn activate_version(
        &self,
        service_id: &str,
        version: u32,
    ) -> Result<ServiceVersion, Self::Error> {
        let mut state = self.state.lock().await;
        state.record(Call::new(
            CallKind::ActivateVersion,
            service_id,
            Some(version),
        ))?;

        // Ensure the target exists before touching any other version.
        state.slot_mut(service_id, version)?;

        let versions = state.versions_mut(service_id)?;
        for slot in versions.values_mut() {
            slot.info.active = false;
        }

        let slot = state.slot_mut(service_id, version)?;
        slot.info.active = true;
        slot.info.locked = true;

        Ok(slot.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = "service";

    fn client() -> InMemoryClient {
        InMemoryClient::new().with_version(
            SERVICE,
            ServiceVersion {
                number: 1,
                active: true,
                locked: true,
            },
            [RemoteRule {
                name: "alt_backend".to_owned(),
                max_stale_age: Some(90),
                ..Default::default()
            }],
        )
    }

    #[tokio::test]
    async fn clone_copies_rules_into_new_draft() {
        let client = client();

        let draft = client.clone_version(SERVICE, 1).await.expect("clone succeeds");
        let rules = client.list(SERVICE, draft).await.expect("list succeeds");

        assert_eq!(draft, 2);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].service_version, Some(2));
        assert_eq!(
            client.version(SERVICE, 2).await,
            Some(ServiceVersion::draft(2))
        );
    }

    #[tokio::test]
    async fn locked_versions_reject_writes() {
        let client = client();

        let error = client
            .delete(SERVICE, 1, "alt_backend")
            .await
            .expect_err("version 1 is locked");

        assert!(matches!(error, Error::VersionLocked { version: 1, .. }));
    }

    #[tokio::test]
    async fn create_assigns_identity_and_timestamps() {
        let client = client();
        let draft = client.clone_version(SERVICE, 1).await.expect("clone succeeds");

        let stored = client
            .create(
                SERVICE,
                draft,
                RemoteRule {
                    name: "fresh".to_owned(),
                    ..Default::default()
                },
            )
            .await
            .expect("create succeeds");

        assert_eq!(stored.service_id.as_deref(), Some(SERVICE));
        assert_eq!(stored.service_version, Some(draft));
        assert!(stored.created_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let client = client();
        let draft = client.clone_version(SERVICE, 1).await.expect("clone succeeds");

        let error = client
            .create(
                SERVICE,
                draft,
                RemoteRule {
                    name: "alt_backend".to_owned(),
                    ..Default::default()
                },
            )
            .await
            .expect_err("alt_backend already exists");

        assert!(matches!(error, Error::RuleExists { .. }));
    }

    #[tokio::test]
    async fn activation_moves_the_active_version() {
        let client = client();
        let draft = client.clone_version(SERVICE, 1).await.expect("clone succeeds");

        let activated = client
            .activate_version(SERVICE, draft)
            .await
            .expect("activation succeeds");

        assert!(activated.active && activated.locked);
        assert_eq!(
            client.active_version(SERVICE).await.expect("service exists"),
            activated
        );
        let previous = client.version(SERVICE, 1).await.expect("version 1 exists");
        assert!(!previous.active);
    }

    #[tokio::test]
    async fn injected_failures_are_recorded() {
        let client = client().with_failure(CallKind::CloneVersion, None);

        let error = client
            .clone_version(SERVICE, 1)
            .await
            .expect_err("clone failure is injected");

        assert!(matches!(error, Error::Injected { kind: CallKind::CloneVersion }));
        assert_eq!(
            client.calls().await,
            vec![Call::new(CallKind::CloneVersion, SERVICE, Some(1))]
        );
    }

    #[tokio::test]
    async fn hidden_rules_are_omitted_from_lists() {
        let client = client().with_hidden_rule("alt_backend");

        let rules = client.list(SERVICE, 1).await.expect("list succeeds");

        assert!(rules.is_empty());
        assert_eq!(client.rules(SERVICE, 1).await.map(|rules| rules.len()), Some(1));
    }
}
