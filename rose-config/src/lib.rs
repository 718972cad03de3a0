#[macro_use]
extern crate tracing;

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use miette::{Context as _, IntoDiagnostic as _};

pub mod layout;
pub mod misc;
pub mod output;
pub mod utils;

pub use crate::layout::*;
pub use crate::misc::*;
pub use crate::output::{Output, Outputs, Transform};
pub use crate::utils::FloatOrInt;

#[derive(knuffel::Decode, Debug, PartialEq)]
pub struct Config {
    #[knuffel(child, default)]
    pub transactions: Transactions,
    #[knuffel(child, default)]
    pub panel: Panel,
    #[knuffel(child, default)]
    pub decorations: Decorations,
    #[knuffel(child, default)]
    pub damage: Damage,
    #[knuffel(child, default)]
    pub workspaces: Workspaces,
    #[knuffel(children(name = "output"))]
    pub outputs: Outputs,
}

#[derive(Debug, Clone)]
pub enum ConfigPath {
    /// Explicitly set config path.
    Explicit(PathBuf),

    /// Default config path: the user path if it exists, otherwise the system path.
    Regular {
        /// User config path, usually `$XDG_CONFIG_HOME/rose/config.kdl`.
        user_path: PathBuf,
        /// System config path, usually `/etc/rose/config.kdl`.
        system_path: PathBuf,
    },
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let contents = fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let config = Self::parse(
            path.file_name()
                .and_then(OsStr::to_str)
                .unwrap_or("config.kdl"),
            &contents,
        )
        .context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        let _span = tracy_client::span!("Config::parse");
        knuffel::parse(filename, text)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse(
            "default-config.kdl",
            include_str!("../../resources/default-config.kdl"),
        )
        .unwrap()
    }
}

impl ConfigPath {
    /// Loads the config.
    ///
    /// Returns `Ok(None)` if neither the user nor the system config exists, in which case the
    /// caller should fall back to the defaults.
    pub fn load(&self) -> miette::Result<Option<Config>> {
        let _span = tracy_client::span!("ConfigPath::load");

        let path = match self {
            ConfigPath::Explicit(path) => path.as_path(),
            ConfigPath::Regular {
                user_path,
                system_path,
            } => {
                if user_path.exists() {
                    user_path.as_path()
                } else if system_path.exists() {
                    system_path.as_path()
                } else {
                    return Ok(None);
                }
            }
        };

        Config::load(path).map(Some).context("error loading config")
    }
}
