//! Discord transport built on serenity.
//!
//! The gateway handler does no work of its own: it pushes every message
//! event into a bounded queue. [`Session::run`] hands that queue to
//! [`session::drive`], which relays one message at a time.
//!
//! serenity runs each event handler call on its own task. Arrival order
//! therefore depends on the runtime running those tasks in spawn order,
//! which is why the binary uses the current-thread runtime.

use crate::admin::AdminConsole;
use crate::dispatch::{ChannelInfo, ChannelKind, ChatClient, DeliveryError};
use crate::engine::RelayEngine;
use crate::message::{Attachment, Content, Embed, EmbeddedContent, InboundMessage, OutboundMessage};
use crate::session::{self, GatewayEvent, SessionOutcome};
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serenity::all::{
    Channel, ChannelId, ChannelType, Client, Context, CreateAttachment, CreateEmbed,
    CreateMessage, EventHandler, GatewayIntents, Message, Ready,
};
use serenity::model::channel::Nonce;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Gateway events buffered while a message is being relayed.
const QUEUE_CAPACITY: usize = 1000;

/// Failures of the gateway session. All of them end the session; the
/// caller decides whether to reconnect.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create client: {0}")]
    Login(#[source] serenity::Error),

    #[error("gateway connection failed: {0}")]
    Transport(#[source] serenity::Error),

    #[error("gateway closed unexpectedly")]
    Closed,

    #[error("gateway task failed: {0}")]
    Task(String),
}

struct Handler {
    events: mpsc::Sender<DiscordEvent>,
    downloader: reqwest::Client,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        let event = DiscordEvent {
            ctx,
            msg,
            downloader: self.downloader.clone(),
        };
        if self.events.send(event).await.is_err() {
            debug!("Session queue closed, dropping message event");
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "Signed into Discord");
    }
}

/// [`ChatClient`] over a gateway context.
pub struct DiscordClient {
    ctx: Context,
    downloader: reqwest::Client,
}

impl DiscordClient {
    pub fn new(ctx: Context, downloader: reqwest::Client) -> Self {
        Self { ctx, downloader }
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, DeliveryError> {
        let failed = |e: reqwest::Error| DeliveryError::Attachment {
            filename: attachment.filename.clone(),
            reason: e.to_string(),
        };

        let response = self
            .downloader
            .get(&attachment.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?;

        let bytes = response.bytes().await.map_err(failed)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn channel(&self, channel_id: &str) -> Option<ChannelInfo> {
        let id = parse_channel_id(channel_id)?;

        let channel = match id.to_channel(&self.ctx).await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(channel = %channel_id, error = %e, "Channel lookup failed");
                return None;
            }
        };

        Some(channel_info(&self.ctx, channel))
    }

    async fn send(&self, channel: &ChannelInfo, message: OutboundMessage) -> Result<(), DeliveryError> {
        let id = parse_channel_id(&channel.id)
            .ok_or_else(|| DeliveryError::ChannelNotFound(channel.id.clone()))?;

        let mut builder = message_builder(message.nonce);

        builder = match message.content {
            Content::Text { text } if text.is_empty() => builder,
            Content::Text { text } => builder.content(text),
            Content::Embed { embed } => builder.embed(create_embed(embed)),
        };

        for attachment in &message.attachments {
            let bytes = self.download(attachment).await?;
            builder = builder.add_file(CreateAttachment::bytes(bytes, attachment.filename.clone()));
        }

        id.send_message(&self.ctx, builder)
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))?;

        Ok(())
    }
}

/// Discord drops a second message carrying an enforced nonce it has seen recently.
fn message_builder(nonce: u64) -> CreateMessage {
    CreateMessage::new()
        .nonce(Nonce::Number(nonce))
        .enforce_nonce(true)
}

fn parse_channel_id(channel_id: &str) -> Option<ChannelId> {
    channel_id
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
}

fn channel_info(ctx: &Context, channel: Channel) -> ChannelInfo {
    match channel {
        Channel::Guild(channel) => {
            let guild_name = ctx.cache.guild(channel.guild_id).map(|g| g.name.clone());
            let kind = match channel.kind {
                ChannelType::Text
                | ChannelType::News
                | ChannelType::PublicThread
                | ChannelType::PrivateThread
                | ChannelType::NewsThread => ChannelKind::Text,
                ChannelType::Voice | ChannelType::Stage => ChannelKind::Voice,
                ChannelType::Category => ChannelKind::Category,
                _ => ChannelKind::Other,
            };

            ChannelInfo {
                id: channel.id.to_string(),
                name: channel.name,
                guild_name,
                kind,
            }
        }
        Channel::Private(channel) => {
            ChannelInfo::text(channel.id.to_string(), channel.recipient.name, None)
        }
        other => ChannelInfo {
            id: other.id().to_string(),
            name: other.id().to_string(),
            guild_name: None,
            kind: ChannelKind::Other,
        },
    }
}

fn create_embed(embed: Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new();

    if let Some(title) = embed.title {
        builder = builder.title(title);
    }
    if let Some(color) = embed.color {
        builder = builder.colour(color);
    }
    if let Some(description) = embed.description {
        builder = builder.description(description);
    }
    for field in embed.fields {
        builder = builder.field(field.name, field.value, false);
    }

    builder
}

/// Convert a gateway message, resolving guild and channel names through
/// the cache where possible.
async fn inbound_message(ctx: &Context, msg: &Message) -> InboundMessage {
    let author_name = msg
        .author
        .global_name
        .clone()
        .unwrap_or_else(|| msg.author.name.clone());

    let mut inbound = InboundMessage::new(
        msg.channel_id.to_string(),
        msg.author.id.to_string(),
        msg.content.clone(),
    )
    .with_author_name(author_name);

    inbound.guild_name = msg.guild_id.map(|id| {
        ctx.cache
            .guild(id)
            .map(|g| g.name.clone())
            .unwrap_or_else(|| id.to_string())
    });

    inbound.channel_name = match msg.channel_id.to_channel(ctx).await {
        Ok(Channel::Guild(channel)) => channel.name,
        Ok(Channel::Private(channel)) => channel.recipient.name,
        _ => msg.channel_id.to_string(),
    };

    inbound.attachments = msg
        .attachments
        .iter()
        .map(|a| Attachment::new(a.url.clone(), a.filename.clone()))
        .collect();

    inbound.embeds = msg
        .embeds
        .iter()
        .map(|e| EmbeddedContent {
            kind: e.kind.clone().unwrap_or_default(),
            description: e.description.clone(),
        })
        .collect();

    inbound
}

/// A message event as it left the gateway handler.
pub struct DiscordEvent {
    ctx: Context,
    msg: Message,
    downloader: reqwest::Client,
}

#[async_trait]
impl GatewayEvent for DiscordEvent {
    type Client = DiscordClient;

    async fn resolve(self) -> (DiscordClient, InboundMessage) {
        let message = inbound_message(&self.ctx, &self.msg).await;
        (DiscordClient::new(self.ctx, self.downloader), message)
    }
}

/// One gateway connection.
pub struct Session {
    client: Client,
    events: mpsc::Receiver<DiscordEvent>,
}

impl Session {
    /// Build a client for `token`. The connection itself is opened by [`Session::run`].
    pub async fn connect(token: &SecretString) -> Result<Self, SessionError> {
        let (tx, events) = mpsc::channel(QUEUE_CAPACITY);

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler {
            events: tx,
            downloader: reqwest::Client::new(),
        };
        let client = Client::builder(token.expose_secret(), intents)
            .event_handler(handler)
            .await
            .map_err(SessionError::Login)?;

        Ok(Self { client, events })
    }

    /// Relay messages until shutdown (`Ok`) or until the gateway fails (`Err`).
    /// Events still queued when the gateway fails are dropped with the session.
    pub async fn run(
        self,
        engine: &mut RelayEngine,
        console: &mut AdminConsole,
        shutdown: &ShutdownSignal,
    ) -> Result<(), SessionError> {
        let Session {
            mut client,
            mut events,
        } = self;

        let mut stop = shutdown.subscribe();
        if shutdown.is_shutdown() {
            return Ok(());
        }

        let shard_manager = client.shard_manager.clone();
        let mut gateway: JoinHandle<Result<(), serenity::Error>> =
            tokio::spawn(async move { client.start().await });

        match session::drive(&mut gateway, &mut events, &mut stop, engine, console).await {
            SessionOutcome::Shutdown => {
                shard_manager.shutdown_all().await;
                if tokio::time::timeout(shutdown.timeout(), &mut gateway).await.is_err() {
                    warn!("Gateway did not close in time");
                    gateway.abort();
                }
                Ok(())
            }
            SessionOutcome::GatewayEnded(result) => Err(session_error(result)),
        }
    }
}

fn session_error(
    result: Result<Result<(), serenity::Error>, tokio::task::JoinError>,
) -> SessionError {
    match result {
        Ok(Ok(())) => SessionError::Closed,
        Ok(Err(e)) => SessionError::Transport(e),
        Err(e) => SessionError::Task(e.to_string()),
    }
}
