//! Redirect rules and their per-rule options.
//!
//! A [`RedirectRule`] only exists in validated form: every rule has at least
//! one source, at least one destination, and no channel appears on both
//! sides. [`RedirectRule::new`] enforces this.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

/// Embed color used when a rule asks for a rich embed without choosing one.
pub const DEFAULT_EMBED_COLOR: u32 = 30975;

/// Largest color value a rich embed accepts (24-bit RGB). Larger values are
/// clamped to it.
pub const MAX_EMBED_COLOR: u32 = 0xFF_FFFF;

/// Formatting and filtering options attached to a redirect rule.
///
/// Every option is off by default. Legacy camelCase keys from older
/// `config.json` files are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedirectOptions {
    /// Title shown above relayed messages
    pub title: Option<String>,

    /// Send a rich embed instead of plain text
    #[serde(alias = "useRichEmbed", alias = "richEmbed")]
    pub use_rich_embed: bool,

    /// Left-border color of the embed; [`DEFAULT_EMBED_COLOR`] when unset
    #[serde(alias = "richEmbedColor")]
    pub rich_embed_color: Option<u32>,

    #[serde(alias = "removeEveryoneMention", alias = "removeEveryone")]
    pub remove_everyone_mention: bool,

    #[serde(alias = "removeHereMention", alias = "removeHere")]
    pub remove_here_mention: bool,

    /// Attribute the message to its author and source channel
    #[serde(alias = "includeSourceAttribution", alias = "includeSource")]
    pub include_source_attribution: bool,

    /// Relay the description of a "rich" embedded block instead of the raw text
    #[serde(alias = "copyEmbeddedRichContent", alias = "copyRichEmbed")]
    pub copy_embedded_rich_content: bool,

    #[serde(alias = "copyAttachments")]
    pub copy_attachments: bool,

    /// Drop bodies shorter than this many characters
    #[serde(alias = "minimumLength", alias = "minLength")]
    pub minimum_length: Option<usize>,

    /// Only relay messages from these author IDs (empty means everyone)
    #[serde(alias = "allowList", deserialize_with = "id_set")]
    pub allow_list: Option<HashSet<String>>,
}

impl RedirectOptions {
    /// The embed color to use, falling back to [`DEFAULT_EMBED_COLOR`].
    pub fn embed_color(&self) -> u32 {
        self.rich_embed_color.unwrap_or(DEFAULT_EMBED_COLOR)
    }

    /// Whether `author_id` may be relayed under these options.
    pub fn allows_author(&self, author_id: &str) -> bool {
        match &self.allow_list {
            Some(list) if !list.is_empty() => list.contains(author_id),
            _ => true,
        }
    }

    /// Title, treating an empty string as unset.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }
}

/// A channel or user ID as written in a config document. Discord IDs are
/// strings on the wire, but bare integers are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum Snowflake {
    Text(String),
    Number(u64),
}

impl Snowflake {
    /// The ID as a string, or `None` if it is blank.
    pub(crate) fn into_id(self) -> Option<String> {
        match self {
            Snowflake::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Snowflake::Text(_) => None,
            Snowflake::Number(n) => Some(n.to_string()),
        }
    }
}

fn id_set<'de, D>(deserializer: D) -> Result<Option<HashSet<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(ids) = Option::<Vec<Snowflake>>::deserialize(deserializer)? else {
        return Ok(None);
    };

    ids.into_iter()
        .map(|id| id.into_id().ok_or_else(|| D::Error::custom("blank ID in list")))
        .collect::<Result<HashSet<_>, _>>()
        .map(Some)
}

/// Reasons a single rule is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("it has no sources")]
    NoSources,

    #[error("it has no destinations")]
    NoDestinations,

    #[error("channel {0} is both a source and a destination, which would loop forever")]
    Loop(String),
}

/// A validated mapping from source channels to destination channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRule {
    sources: Vec<String>,
    destinations: Vec<String>,
    options: RedirectOptions,
}

impl RedirectRule {
    /// Build a rule, rejecting empty sides and source/destination overlap.
    ///
    /// Repeated IDs on either side collapse to their first occurrence. An
    /// embed color above [`MAX_EMBED_COLOR`] is clamped.
    pub fn new(
        sources: Vec<String>,
        destinations: Vec<String>,
        mut options: RedirectOptions,
    ) -> Result<Self, RuleError> {
        let sources = dedup_ids(sources);
        let destinations = dedup_ids(destinations);

        if sources.is_empty() {
            return Err(RuleError::NoSources);
        }
        if destinations.is_empty() {
            return Err(RuleError::NoDestinations);
        }
        if let Some(looping) = find_loop(&sources, &destinations) {
            return Err(RuleError::Loop(looping.clone()));
        }
        if let Some(color) = options.rich_embed_color.filter(|c| *c > MAX_EMBED_COLOR) {
            warn!(color, max = MAX_EMBED_COLOR, "Embed color out of range, clamping");
            options.rich_embed_color = Some(MAX_EMBED_COLOR);
        }

        Ok(Self {
            sources,
            destinations,
            options,
        })
    }

    /// Source channel IDs, in configuration order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Destination channel IDs, in delivery order.
    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    pub fn options(&self) -> &RedirectOptions {
        &self.options
    }

    pub fn has_source(&self, channel_id: &str) -> bool {
        self.sources.iter().any(|s| s == channel_id)
    }
}

/// The first source that is also a destination.
pub fn find_loop<'a>(sources: &'a [String], destinations: &[String]) -> Option<&'a String> {
    sources.iter().find(|s| destinations.contains(s))
}

fn dedup_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// How the minimum-length filter treats rich-embed bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinimumLengthPolicy {
    /// Only plain-text bodies are measured; embed bodies always pass
    #[default]
    PlainTextOnly,

    /// Embed bodies are measured by their description length
    IncludeEmbedDescription,
}

/// Granularity of the consecutive-duplicate guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// One slot shared by every rule and destination
    #[default]
    Global,

    /// One slot per destination channel
    PerDestination,
}
