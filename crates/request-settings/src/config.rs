//! Options which tune how the [`Reconciler`](crate::apply::Reconciler) applies changes.
//!
//! The options can be loaded from a YAML file or, with the `clap` feature enabled, flattened into
//! a clap-based CLI where every flag can also be provided via environment variable.
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read reconciler options from {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse reconciler options from {path:?}"))]
    ParseYaml {
        source: serde_yaml::Error,
        path: PathBuf,
    },
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[cfg_attr(feature = "clap", command(next_help_heading = "Reconciler Options"))]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerOptions {
    /// Don't compare the remote rules against the declared ones after applying changes.
    ///
    /// The draft version is left unverified, which makes a later activation riskier.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub skip_verification: bool,

    /// Clone the resolved version even if it is still a draft.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub always_clone: bool,

    /// The maximum number of distinct rules whose remote calls may be in flight at once.
    ///
    /// Calls for the same rule are always issued one after another.
    #[cfg_attr(feature = "clap", arg(long, env, default_value = "1"))]
    pub max_concurrent_rules: NonZeroUsize,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            skip_verification: false,
            always_clone: false,
            max_concurrent_rules: NonZeroUsize::MIN,
        }
    }
}

impl ReconcilerOptions {
    /// Loads the options from the YAML file at `path`. Omitted keys keep their default.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;

        serde_yaml::from_str(&contents).context(ParseYamlSnafu { path })
    }
}
