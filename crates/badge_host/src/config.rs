//! Configuration resolution.
//!
//! The configuration string is handed to the module untouched as
//! `location.search`. [`BadgeOptions`] is a read-only view of it that the host
//! uses for its own decisions (log verbosity, diagnostics); parsing it never
//! changes what the module sees.

use core::fmt::{Display, Formatter, Result as FmtResult};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use url::Url;
use url::form_urlencoded;

/// Configuration used when no argument is given.
pub const DEFAULT_CONFIGURATION: &str = "debug=1&initial_facilitator_poll_interval=10";

/// Query-string-shaped configuration, opaque to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigurationString(String);

impl ConfigurationString {
    /// Wrap `raw` without validating it.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The string as supplied.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The value `location.search` takes: the string behind a `?`.
    pub fn location_search(&self) -> String {
        format!("?{}", self.0)
    }
}

impl Display for ConfigurationString {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(&self.0)
    }
}

/// Pick the supplied configuration, or the default when there is none.
///
/// A supplied value replaces the default entirely, even when empty.
pub fn resolve_configuration(input: Option<String>) -> ConfigurationString {
    input.map_or_else(
        || ConfigurationString::new(DEFAULT_CONFIGURATION),
        ConfigurationString::new,
    )
}

/// A configuration value the host could not interpret.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A boolean key had an unrecognized value.
    #[error("ignoring {key}={value}: expected 1, 0, true, false, yes or no")]
    InvalidFlag {
        /// Parameter name.
        key: String,
        /// Value as given.
        value: String,
    },
    /// A numeric key was not a non-negative number.
    #[error("ignoring {key}={value}: expected a non-negative number of seconds")]
    InvalidNumber {
        /// Parameter name.
        key: String,
        /// Value as given.
        value: String,
    },
    /// A URL key did not parse.
    #[error("ignoring {key}={value}: {reason}")]
    InvalidUrl {
        /// Parameter name.
        key: String,
        /// Value as given.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// A key appeared more than once; the first value is used.
    #[error("{key} given more than once; using the first value")]
    Duplicate {
        /// Parameter name.
        key: String,
    },
}

/// Host-side view of the configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BadgeOptions {
    /// `debug`: raise host log verbosity.
    pub debug: bool,
    /// `initial_facilitator_poll_interval`, in seconds.
    pub initial_facilitator_poll_interval: Option<f64>,
    /// `facilitator`: where the module will register.
    pub facilitator: Option<Url>,
    /// Every other key, first occurrence wins.
    pub extra: BTreeMap<String, String>,
}

impl BadgeOptions {
    /// Read the known keys out of `configuration`. Never fails; values that do
    /// not parse are reported as warnings and left at their defaults.
    pub fn from_configuration(configuration: &ConfigurationString) -> (Self, Vec<ConfigWarning>) {
        let mut options = Self::default();
        let mut warnings = Vec::new();
        let mut seen = BTreeSet::new();

        for (key, value) in form_urlencoded::parse(configuration.as_str().as_bytes()) {
            let key = key.into_owned();
            let value = value.into_owned();
            if !seen.insert(key.clone()) {
                warnings.push(ConfigWarning::Duplicate { key });
                continue;
            }

            match key.as_str() {
                "debug" => match parse_flag(&value) {
                    Some(flag) => options.debug = flag,
                    None => warnings.push(ConfigWarning::InvalidFlag { key, value }),
                },
                "initial_facilitator_poll_interval" => match value.trim().parse::<f64>() {
                    Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => {
                        options.initial_facilitator_poll_interval = Some(seconds);
                    }
                    _ => warnings.push(ConfigWarning::InvalidNumber { key, value }),
                },
                "facilitator" => match Url::parse(&value) {
                    Ok(url) => options.facilitator = Some(url),
                    Err(error) => warnings.push(ConfigWarning::InvalidUrl {
                        key,
                        value,
                        reason: error.to_string(),
                    }),
                },
                _ => {
                    options.extra.insert(key, value);
                }
            }
        }
        (options, warnings)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}
