use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable naming a provider configuration file.
pub const CONFIG_FILE_ENV: &str = "PYOPENDDS_CONFIG_FILE";

pub const MAX_DEBUG_LEVEL: i64 = 10;

/// Arguments for the provider's command-line style initializer.
#[derive(Debug, Clone)]
pub struct InitOptions {
    args: Vec<String>,
    default_rtps: bool,
    debug_level: Option<i64>,
    config_file: Option<PathBuf>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            default_rtps: true,
            debug_level: None,
            config_file: None,
        }
    }
}

impl InitOptions {
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Install the default RTPS discovery and transport (on by default).
    pub fn with_default_rtps(mut self, default_rtps: bool) -> Self {
        self.default_rtps = default_rtps;
        self
    }

    /// Provider debug level, 0 to 10.
    pub fn with_debug_level(mut self, level: i64) -> Self {
        self.debug_level = Some(level);
        self
    }

    /// Provider configuration file. Takes precedence over
    /// `PYOPENDDS_CONFIG_FILE`.
    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn default_rtps(&self) -> bool {
        self.default_rtps
    }

    /// The argument vector handed to the provider.
    pub fn to_args(&self) -> Result<Vec<String>> {
        let mut args = self.args.clone();

        if let Some(level) = self.debug_level {
            if !(0..=MAX_DEBUG_LEVEL).contains(&level) {
                return Err(Error::Range {
                    target: "opendds_debug_level (0..=10)",
                    value: level.to_string(),
                });
            }
            args.push("-DCPSDebugLevel".to_string());
            args.push(level.to_string());
        }

        let config_file = self
            .config_file
            .clone()
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));
        if let Some(path) = config_file {
            debug!("[INIT] using config file {}", path.display());
            args.push("-DCPSConfigFile".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        Ok(args)
    }
}
