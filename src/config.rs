//! Configuration loading and validation.
//!
//! The configuration document holds the client token and an ordered list of
//! redirect rules. It is read from a TOML or JSON file (chosen by extension),
//! or from the `ECHOBOT_CONFIG_JSON` environment variable. `${VAR}`
//! placeholders inside string values are substituted from the environment
//! after parsing, so a value may contain any character.
//!
//! # Example
//!
//! ```toml
//! token = "${DISCORD_TOKEN}"
//!
//! [relay]
//! dedup_scope = "global"
//!
//! [[redirects]]
//! sources = ["111111111111111111"]
//! destinations = ["222222222222222222", "333333333333333333"]
//!
//! [redirects.options]
//! title = "Announcements"
//! use_rich_embed = true
//! include_source_attribution = true
//! ```
//!
//! Validation is all-or-nothing: the first problem found is reported as a
//! [`ConfigError`] and no rule set is produced.

use crate::redirect::{
    find_loop, DedupScope, MinimumLengthPolicy, RedirectOptions, RedirectRule, RuleError, Snowflake,
};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "ECHOBOT_CONFIG";

/// Environment variable holding an inline JSON configuration document.
pub const CONFIG_INLINE_VAR: &str = "ECHOBOT_CONFIG_JSON";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config.json", "config.toml"];

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {0} does not exist, please create one")]
    NotFound(PathBuf),

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("failed to parse JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("invalid placeholder pattern: {0}")]
    Placeholder(#[from] regex::Error),

    #[error("the configuration document must be a table/object")]
    NotADocument,

    #[error("the client token is missing from the configuration")]
    MissingToken,

    #[error("no redirects are defined, nothing would be relayed")]
    NoRedirects,

    #[error("the redirects are not formatted as a list")]
    RedirectsNotList,

    #[error("redirect #{index}: {field} are not formatted as a list")]
    NotAList { index: usize, field: &'static str },

    #[error("redirect #{index}: {field} contain an invalid channel ID: {value}")]
    InvalidChannelId {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("redirect #{index}: invalid options: {reason}")]
    InvalidOptions { index: usize, reason: String },

    #[error("redirect #{index} is invalid: {source}")]
    InvalidRedirect {
        index: usize,
        #[source]
        source: RuleError,
    },

    #[error("invalid [{section}] settings: {reason}")]
    InvalidSettings {
        section: &'static str,
        reason: String,
    },
}

/// Relay-wide behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub dedup_scope: DedupScope,
    pub minimum_length_policy: MinimumLengthPolicy,
}

/// Who may issue administrative commands, and how they are recognised.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Prefix that marks a message as a command (e.g. `.eb reload`)
    pub command_prefix: String,

    /// User IDs allowed to issue commands; empty disables commands
    pub admins: Vec<String>,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            admins: Vec::new(),
        }
    }
}

fn default_command_prefix() -> String {
    ".eb".to_string()
}

impl AdminSettings {
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }
}

/// A configuration that passed every check.
pub struct ValidatedConfig {
    token: SecretString,
    redirects: Vec<RedirectRule>,
    pub relay: RelaySettings,
    pub admin: AdminSettings,
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("token", &"[REDACTED]")
            .field("redirects", &self.redirects)
            .field("relay", &self.relay)
            .field("admin", &self.admin)
            .finish()
    }
}

impl ValidatedConfig {
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Rules in configuration order.
    pub fn redirects(&self) -> &[RedirectRule] {
        &self.redirects
    }

    pub fn into_redirects(self) -> Vec<RedirectRule> {
        self.redirects
    }
}

/// Where the configuration document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),

    /// An inline JSON document
    Inline(String),
}

impl ConfigSource {
    /// Resolve the source from the environment.
    ///
    /// `ECHOBOT_CONFIG_JSON` wins if set; otherwise `ECHOBOT_CONFIG` names a
    /// file; otherwise the first of `config.json`, `config.toml` that exists.
    pub fn from_env() -> Self {
        if let Ok(inline) = env::var(CONFIG_INLINE_VAR) {
            return ConfigSource::Inline(inline);
        }

        if let Ok(path) = env::var(CONFIG_PATH_VAR) {
            return ConfigSource::File(PathBuf::from(path));
        }

        let path = DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
        ConfigSource::File(path)
    }

    /// Read and parse the document without validating it.
    pub fn read(&self) -> Result<Value, ConfigError> {
        match self {
            ConfigSource::Inline(content) => {
                debug!("Parsing inline JSON configuration");
                let mut document = parse_json(content)?;
                substitute_env_vars(&mut document)?;
                Ok(document)
            }
            ConfigSource::File(path) => {
                let mut document = read_file(path)?;
                substitute_env_vars(&mut document)?;
                Ok(document)
            }
        }
    }

    /// Read, parse and validate the configuration.
    pub fn load(&self) -> Result<ValidatedConfig, ConfigError> {
        let document = self.read()?;
        let config = validate(&document)?;

        info!(
            source = %self,
            redirects = config.redirects.len(),
            dedup_scope = ?config.relay.dedup_scope,
            "Configuration loaded"
        );

        Ok(config)
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Inline(_) => write!(f, "${}", CONFIG_INLINE_VAR),
        }
    }
}

fn read_file(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    info!(path = %path.display(), "Loading configuration");

    let content = fs::read_to_string(path)?;

    if path.extension().is_some_and(|e| e == "toml") {
        debug!("Parsing TOML configuration");
        parse_toml(&content)
    } else {
        debug!("Parsing JSON configuration");
        parse_json(&content)
    }
}

fn parse_toml(content: &str) -> Result<Value, ConfigError> {
    let table: toml::Table = toml::from_str(content)?;
    Ok(serde_json::to_value(table)?)
}

fn parse_json(content: &str) -> Result<Value, ConfigError> {
    Ok(serde_json::from_str(content)?)
}

/// Validate a parsed configuration document.
///
/// Checks, stopping at the first failure:
/// 1. `token` is present and non-empty
/// 2. `redirects` is present, a list, and non-empty
/// 3. every rule has non-empty `sources` and `destinations` lists
/// 4. no rule shares a channel between its sources and destinations
///
/// Rule options and the `[relay]`/`[admin]` sections are checked after that.
pub fn validate(document: &Value) -> Result<ValidatedConfig, ConfigError> {
    let document = document.as_object().ok_or(ConfigError::NotADocument)?;

    let token = match document.get("token") {
        Some(Value::String(token)) if !token.trim().is_empty() => token.clone(),
        _ => return Err(ConfigError::MissingToken),
    };

    let redirects = match document.get("redirects") {
        None | Some(Value::Null) => return Err(ConfigError::NoRedirects),
        Some(Value::Array(list)) if list.is_empty() => return Err(ConfigError::NoRedirects),
        Some(Value::Array(list)) => list,
        Some(_) => return Err(ConfigError::RedirectsNotList),
    };

    let sides = redirects
        .iter()
        .enumerate()
        .map(|(index, raw)| rule_sides(index, raw))
        .collect::<Result<Vec<_>, _>>()?;

    for (index, (sources, destinations)) in sides.iter().enumerate() {
        if let Some(looping) = find_loop(sources, destinations) {
            return Err(ConfigError::InvalidRedirect {
                index,
                source: RuleError::Loop(looping.clone()),
            });
        }
    }

    let redirects = redirects
        .iter()
        .zip(sides)
        .enumerate()
        .map(|(index, (raw, (sources, destinations)))| {
            let options = rule_options(index, raw)?;
            RedirectRule::new(sources, destinations, options)
                .map_err(|source| ConfigError::InvalidRedirect { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let relay = settings_section::<RelaySettings>(document, "relay")?;
    let admin = settings_section::<AdminSettings>(document, "admin")?;

    Ok(ValidatedConfig {
        token: SecretString::from(token),
        redirects,
        relay,
        admin,
    })
}

/// A rule's channel lists, both non-empty.
fn rule_sides(index: usize, raw: &Value) -> Result<(Vec<String>, Vec<String>), ConfigError> {
    let sources = channel_list(index, raw.get("sources"), "sources")?;
    let destinations = channel_list(index, raw.get("destinations"), "destinations")?;

    let empty = if sources.is_empty() {
        Some(RuleError::NoSources)
    } else if destinations.is_empty() {
        Some(RuleError::NoDestinations)
    } else {
        None
    };

    match empty {
        Some(source) => Err(ConfigError::InvalidRedirect { index, source }),
        None => Ok((sources, destinations)),
    }
}

fn rule_options(index: usize, raw: &Value) -> Result<RedirectOptions, ConfigError> {
    match raw.get("options") {
        None | Some(Value::Null) => Ok(RedirectOptions::default()),
        Some(options) => {
            RedirectOptions::deserialize(options).map_err(|e| ConfigError::InvalidOptions {
                index,
                reason: e.to_string(),
            })
        }
    }
}

/// Read a list of channel IDs. A missing list is treated as empty so the
/// rule-level check reports it; anything other than a list is malformed.
fn channel_list(
    index: usize,
    value: Option<&Value>,
    field: &'static str,
) -> Result<Vec<String>, ConfigError> {
    let list = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(list)) => list,
        Some(_) => return Err(ConfigError::NotAList { index, field }),
    };

    list.iter()
        .map(|item| {
            channel_id(item).ok_or_else(|| ConfigError::InvalidChannelId {
                index,
                field,
                value: item.to_string(),
            })
        })
        .collect()
}

fn channel_id(value: &Value) -> Option<String> {
    Snowflake::deserialize(value).ok().and_then(Snowflake::into_id)
}

fn settings_section<T>(
    document: &serde_json::Map<String, Value>,
    section: &'static str,
) -> Result<T, ConfigError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match document.get(section) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => T::deserialize(value).map_err(|e| ConfigError::InvalidSettings {
            section,
            reason: e.to_string(),
        }),
    }
}

/// Substitute environment variables in the format ${VAR_NAME} in every
/// string value of the document. Keys are left alone.
fn substitute_env_vars(document: &mut Value) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    substitute_in(document, &re);
    Ok(())
}

fn substitute_in(value: &mut Value, re: &Regex) {
    match value {
        Value::String(s) if re.is_match(s) => *s = substitute_str(s, re),
        Value::Array(items) => items.iter_mut().for_each(|item| substitute_in(item, re)),
        Value::Object(map) => map.values_mut().for_each(|item| substitute_in(item, re)),
        _ => {}
    }
}

fn substitute_str(content: &str, re: &Regex) -> String {
    let substituted = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    });

    substituted.into_owned()
}

/// Compare two tokens without exposing either in logs.
pub fn same_token(a: &SecretString, b: &SecretString) -> bool {
    a.expose_secret() == b.expose_secret()
}
