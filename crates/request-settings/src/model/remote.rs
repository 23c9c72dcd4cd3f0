use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::{ForwardedForPolicy, RequestAction};

/// A request setting rule as returned by the remote service.
///
/// The remote record may omit any optional field. [`crate::flatten`] completes the missing ones
/// with their defaults.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RemoteRule {
    /// Unique within one service version.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xff: Option<ForwardedForPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stale_age: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RequestAction>,

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

    /// Assigned by the remote service on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,

    /// Assigned by the remote service on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_version: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl RemoteRule {
    /// Drops the system-assigned timestamps, which never take part in comparisons.
    pub fn without_timestamps(self) -> Self {
        Self {
            created_at: None,
            updated_at: None,
            ..self
        }
    }
}

/// A single configuration generation of a service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ServiceVersion {
    pub number: u32,

    /// Whether this version currently serves traffic.
    pub active: bool,

    /// Whether this version was frozen, e.g. because it was active at some point.
    pub locked: bool,
}

impl ServiceVersion {
    /// Returns a not yet activated, unlocked version.
    pub fn draft(number: u32) -> Self {
        Self {
            number,
            active: false,
            locked: false,
        }
    }

    /// Rules may only be created or deleted on draft versions.
    pub fn is_mutable(self) -> bool {
        !self.active && !self.locked
    }
}
