//! Message types flowing through the relay.
//!
//! An [`InboundMessage`] is the platform-neutral view of a chat message
//! observed on some channel. The transformer turns it into outbound
//! [`Content`] (plain text or a rich [`Embed`]) plus an optional header,
//! which the dispatcher hands to a [`ChatClient`](crate::dispatch::ChatClient).

use serde::{Deserialize, Serialize};

/// A file attached to a message, referenced by URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Where the file can be downloaded from
    pub url: String,

    /// Original filename
    pub filename: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// An embedded rich-content block carried by an inbound message.
///
/// Only blocks of kind `"rich"` are ever copied; link previews, images and
/// videos arrive with other kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedContent {
    /// Block kind as reported by the platform (e.g. "rich", "link", "image")
    pub kind: String,

    /// Description text, if the block has one
    pub description: Option<String>,
}

impl EmbeddedContent {
    pub fn rich(description: impl Into<String>) -> Self {
        Self {
            kind: "rich".to_string(),
            description: Some(description.into()),
        }
    }

    pub fn is_rich(&self) -> bool {
        self.kind == "rich"
    }
}

/// A message received on some channel.
///
/// # Fields
///
/// - `channel_id`: channel the message was posted in; used for rule matching
/// - `author_id` / `author_name`: identity used for allow-listing and attribution
/// - `guild_name` / `channel_name`: human-readable source path ("guild/channel")
/// - `content`: raw message text
/// - `attachments`: uploaded files
/// - `embeds`: embedded rich-content blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,

    pub author_id: String,

    /// Display name of the author
    pub author_name: String,

    /// Name of the guild (server); `None` for direct messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_name: Option<String>,

    /// Display name of the source channel
    pub channel_name: String,

    pub content: String,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub embeds: Vec<EmbeddedContent>,
}

impl InboundMessage {
    /// Create a message with the required fields and no guild, attachments or embeds.
    pub fn new(
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let channel_id = channel_id.into();
        let author_id = author_id.into();
        Self {
            channel_name: channel_id.clone(),
            author_name: author_id.clone(),
            channel_id,
            author_id,
            guild_name: None,
            content: content.into(),
            attachments: Vec::new(),
            embeds: Vec::new(),
        }
    }

    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author_name = name.into();
        self
    }

    /// Set the guild and channel display names used in the source path.
    pub fn with_location(mut self, guild: impl Into<String>, channel: impl Into<String>) -> Self {
        self.guild_name = Some(guild.into());
        self.channel_name = channel.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_embed(mut self, embed: EmbeddedContent) -> Self {
        self.embeds.push(embed);
        self
    }

    /// Human-readable source path, `guild/channel`.
    pub fn source_path(&self) -> String {
        match &self.guild_name {
            Some(guild) => format!("{}/{}", guild, self.channel_name),
            None => format!("Direct Message/{}", self.channel_name),
        }
    }

    /// Description of the last embedded block of kind "rich", if any.
    pub fn rich_description(&self) -> Option<&str> {
        self.embeds
            .iter()
            .filter(|e| e.is_rich())
            .filter_map(|e| e.description.as_deref())
            .last()
    }
}

/// A named field on a rich embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// A rich embed: structured message with title, color, description and fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn is_empty(&self) -> bool {
        self.title.as_deref().map_or(true, str::is_empty)
            && self.description.as_deref().map_or(true, str::is_empty)
            && self.fields.is_empty()
    }
}

/// Outbound content in one of the two formats a destination accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    Embed { embed: Embed },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn embed(embed: Embed) -> Self {
        Content::Embed { embed }
    }

    pub fn is_embed(&self) -> bool {
        matches!(self, Content::Embed { .. })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text { text } => text.is_empty(),
            Content::Embed { embed } => embed.is_empty(),
        }
    }

    /// The textual payload: the text itself, or an embed's description.
    pub fn as_text(&self) -> &str {
        match self {
            Content::Text { text } => text,
            Content::Embed { embed } => embed.description.as_deref().unwrap_or(""),
        }
    }
}

/// The main relayed message: content plus any copied attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub content: Content,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Body {
    pub fn is_empty(&self) -> bool {
        self.content.as_text().is_empty() && self.attachments.is_empty()
    }

    /// Value compared against the dedup slot.
    ///
    /// The textual payload followed by each attachment URL on its own line,
    /// so attachment-only bodies with different files are not mistaken for
    /// duplicates of one another.
    pub fn dedup_key(&self) -> String {
        let mut key = self.content.as_text().to_string();
        for attachment in &self.attachments {
            key.push('\n');
            key.push_str(&attachment.url);
        }
        key
    }
}

/// A single message to be posted to a destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: Content,
    pub attachments: Vec<Attachment>,

    /// Transport-level idempotency token; carries no domain meaning
    pub nonce: u64,
}
