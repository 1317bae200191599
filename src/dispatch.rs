//! Delivery of transformed messages to destination channels.
//!
//! The [`ChatClient`] trait is the seam to the chat platform: look up a
//! channel, post a message. [`DeliveryDispatcher`] walks a rule's
//! destinations strictly in order and, for each one:
//!
//! 1. resolves the channel (missing or non-text channels fail this destination only)
//! 2. consults the dedup slot; an identical body skips header and body together
//! 3. sends the header (if any), waits for it, then sends the body
//! 4. records the body in the dedup slot once it has been sent
//!
//! A failure at any step is reported for that destination and delivery
//! moves on to the next one.
//!
//! ## Implementing a client
//!
//! ```rust,ignore
//! use echobot::dispatch::{ChannelInfo, ChatClient, DeliveryError};
//! use echobot::message::OutboundMessage;
//! use async_trait::async_trait;
//!
//! struct Loopback;
//!
//! #[async_trait]
//! impl ChatClient for Loopback {
//!     async fn channel(&self, id: &str) -> Option<ChannelInfo> {
//!         Some(ChannelInfo::text(id, "loopback", None))
//!     }
//!
//!     async fn send(&self, _channel: &ChannelInfo, message: OutboundMessage) -> Result<(), DeliveryError> {
//!         println!("{}", message.content.as_text());
//!         Ok(())
//!     }
//! }
//! ```

use crate::message::{Content, InboundMessage, OutboundMessage};
use crate::redirect::DedupScope;
use crate::transform::Transformed;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while delivering to one destination.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The destination channel does not exist or is not visible
    #[error("destination channel {0} was not found")]
    ChannelNotFound(String),

    /// The destination exists but cannot receive text messages
    #[error("destination channel {0} is not a text channel")]
    NotTextChannel(String),

    /// An attachment could not be fetched for re-upload
    #[error("attachment '{filename}' could not be copied: {reason}")]
    Attachment { filename: String, reason: String },

    /// The platform rejected or failed the send
    #[error("send failed: {0}")]
    Send(String),
}

impl DeliveryError {
    /// Whether this is a resolution failure (as opposed to a send failure).
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            DeliveryError::ChannelNotFound(_) | DeliveryError::NotTextChannel(_)
        )
    }
}

/// The broad kind of a channel, as far as relaying cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Accepts text messages (guild text, news, threads, DMs)
    Text,
    Voice,
    Category,
    Other,
}

/// A resolved destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub guild_name: Option<String>,
    pub kind: ChannelKind,
}

impl ChannelInfo {
    pub fn text(id: impl Into<String>, name: impl Into<String>, guild_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            guild_name,
            kind: ChannelKind::Text,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == ChannelKind::Text
    }

    /// Human-readable path, `guild/channel`.
    pub fn path(&self) -> String {
        match &self.guild_name {
            Some(guild) => format!("{}/{}", guild, self.name),
            None => self.name.clone(),
        }
    }
}

/// The chat platform as seen by the relay.
///
/// Implementations must complete `send` only once the platform has accepted
/// the message, since header-then-body ordering relies on it.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Look up a channel by ID. `None` if it does not exist or is not visible.
    async fn channel(&self, channel_id: &str) -> Option<ChannelInfo>;

    /// Post a message to a text channel.
    async fn send(&self, channel: &ChannelInfo, message: OutboundMessage) -> Result<(), DeliveryError>;
}

/// Fresh transport-level idempotency token for one send.
pub fn next_nonce() -> u64 {
    (uuid::Uuid::new_v4().as_u128() >> 64) as u64
}

/// The consecutive-duplicate guard.
///
/// Holds the most recently delivered body, either one slot for the whole
/// process ([`DedupScope::Global`]) or one per destination.
///
/// With the global slot, every destination of an inbound message is compared
/// against the value the slot held when that message began processing
/// ([`DedupState::begin_message`]), so one message never suppresses itself
/// across its own destinations.
#[derive(Debug, Clone, Default)]
pub struct DedupState {
    scope: DedupScope,
    last: Option<String>,
    baseline: Option<String>,
    per_destination: HashMap<String, String>,
}

impl DedupState {
    pub fn new(scope: DedupScope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    pub fn scope(&self) -> DedupScope {
        self.scope
    }

    /// Mark the start of a new inbound message.
    pub fn begin_message(&mut self) {
        self.baseline = self.last.clone();
    }

    /// The last recorded body for `destination`.
    pub fn last(&self, destination: &str) -> Option<&str> {
        match self.scope {
            DedupScope::Global => self.last.as_deref(),
            DedupScope::PerDestination => self.per_destination.get(destination).map(String::as_str),
        }
    }

    pub fn is_duplicate(&self, destination: &str, key: &str) -> bool {
        match self.scope {
            DedupScope::Global => self.baseline.as_deref() == Some(key),
            DedupScope::PerDestination => self.last(destination) == Some(key),
        }
    }

    pub fn record(&mut self, destination: &str, key: String) {
        match self.scope {
            DedupScope::Global => self.last = Some(key),
            DedupScope::PerDestination => {
                self.per_destination.insert(destination.to_string(), key);
            }
        }
    }
}

/// What happened at one destination.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Header (if any) and body were sent
    Delivered { header_sent: bool },

    /// Identical to the last delivered body; nothing was sent
    Duplicate,

    Failed(DeliveryError),
}

/// Outcome for one destination of one rule.
#[derive(Debug)]
pub struct DestinationResult {
    pub destination: String,
    pub outcome: DeliveryOutcome,
}

impl DestinationResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Duplicate)
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        match &self.outcome {
            DeliveryOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Sends transformed messages to destinations, one at a time.
#[derive(Debug, Default)]
pub struct DeliveryDispatcher {
    dedup: DedupState,
}

impl DeliveryDispatcher {
    pub fn new(scope: DedupScope) -> Self {
        Self {
            dedup: DedupState::new(scope),
        }
    }

    pub fn dedup(&self) -> &DedupState {
        &self.dedup
    }

    /// Call once per inbound message, before its first delivery.
    pub fn begin_message(&mut self) {
        self.dedup.begin_message();
    }

    /// Deliver to every destination in order, isolating failures.
    ///
    /// `origin` is only used for log context.
    pub async fn deliver(
        &mut self,
        client: &dyn ChatClient,
        destinations: &[String],
        transformed: &Transformed,
        origin: &InboundMessage,
    ) -> Vec<DestinationResult> {
        let mut results = Vec::with_capacity(destinations.len());

        for destination in destinations {
            let outcome = match self.deliver_one(client, destination, transformed, origin).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        author = %origin.author_name,
                        source = %origin.source_path(),
                        destination = %destination,
                        error = %e,
                        "Could not redirect message"
                    );
                    DeliveryOutcome::Failed(e)
                }
            };

            results.push(DestinationResult {
                destination: destination.clone(),
                outcome,
            });
        }

        results
    }

    async fn deliver_one(
        &mut self,
        client: &dyn ChatClient,
        destination: &str,
        transformed: &Transformed,
        origin: &InboundMessage,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let channel = client
            .channel(destination)
            .await
            .ok_or_else(|| DeliveryError::ChannelNotFound(destination.to_string()))?;

        if !channel.is_text() {
            return Err(DeliveryError::NotTextChannel(destination.to_string()));
        }

        // header-only deliveries have nothing to compare
        let key = transformed.body.dedup_key();
        if !key.is_empty() && self.dedup.is_duplicate(destination, &key) {
            info!(
                author = %origin.author_name,
                source = %origin.source_path(),
                destination = %channel.path(),
                "Skipping duplicate of the last relayed message"
            );
            return Ok(DeliveryOutcome::Duplicate);
        }

        info!(
            author = %origin.author_name,
            source = %origin.source_path(),
            destination = %channel.path(),
            "Redirecting message"
        );

        let header_sent = match &transformed.header {
            Some(header) => {
                send(client, &channel, header.clone(), Vec::new()).await?;
                true
            }
            None => false,
        };

        if transformed.body.is_empty() {
            debug!(destination = %channel.path(), "Body is empty, header only");
        } else {
            send(
                client,
                &channel,
                transformed.body.content.clone(),
                transformed.body.attachments.clone(),
            )
            .await?;
        }

        if !key.is_empty() {
            self.dedup.record(destination, key);
        }

        Ok(DeliveryOutcome::Delivered { header_sent })
    }
}

async fn send(
    client: &dyn ChatClient,
    channel: &ChannelInfo,
    content: Content,
    attachments: Vec<crate::message::Attachment>,
) -> Result<(), DeliveryError> {
    let message = OutboundMessage {
        content,
        attachments,
        nonce: next_nonce(),
    };
    debug!(destination = %channel.id, nonce = message.nonce, "Sending");
    client.send(channel, message).await
}
