//! Executes administrative commands against a running relay.
//!
//! Commands are only recognised when at least one admin is configured. Once
//! recognised, a command is never relayed, whoever sent it; only admins get
//! it executed.

use crate::command::{self, Command, CommandError};
use crate::config::{same_token, AdminSettings, ConfigSource, ValidatedConfig};
use crate::dispatch::{next_nonce, ChatClient};
use crate::engine::RelayEngine;
use crate::message::{Content, InboundMessage, OutboundMessage};
use crate::redirect::{RedirectOptions, RedirectRule};
use crate::shutdown::ShutdownSignal;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

pub const PING_REPLY: &str = "Process running.";

/// What an admin command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    Pinged,
    Reloaded { redirects: usize },
    RedirectAdded,
    Exit,

    /// Parsed or executed with an error; the reply explains it
    Failed(String),

    /// A command from someone who is not an admin
    Ignored,
}

pub struct AdminConsole {
    settings: AdminSettings,
    source: ConfigSource,
    token: SecretString,
    shutdown: ShutdownSignal,
}

impl AdminConsole {
    pub fn new(config: &ValidatedConfig, source: ConfigSource, shutdown: ShutdownSignal) -> Self {
        Self {
            settings: config.admin.clone(),
            source,
            token: SecretString::from(config.token().expose_secret().to_owned()),
            shutdown,
        }
    }

    pub fn settings(&self) -> &AdminSettings {
        &self.settings
    }

    /// Handle `message` if it is a command.
    ///
    /// Returns `None` for ordinary messages, which should be relayed.
    pub async fn handle(
        &mut self,
        engine: &mut RelayEngine,
        client: &dyn ChatClient,
        message: &InboundMessage,
    ) -> Option<AdminAction> {
        if self.settings.admins.is_empty() {
            return None;
        }

        let parsed = command::parse(&message.content, &self.settings.command_prefix)?;

        if !self.settings.is_admin(&message.author_id) {
            warn!(
                author = %message.author_name,
                author_id = %message.author_id,
                "Ignoring command from non-admin"
            );
            return Some(AdminAction::Ignored);
        }

        let (action, reply) = match parsed {
            Ok(command) => {
                info!(verb = command.verb(), author = %message.author_name, "Admin command");
                self.execute(command, engine)
            }
            Err(e) => (AdminAction::Failed(e.to_string()), usage(&e)),
        };

        self.reply(client, &message.channel_id, reply).await;

        if action == AdminAction::Exit {
            self.shutdown.trigger();
        }

        Some(action)
    }

    fn execute(&mut self, command: Command, engine: &mut RelayEngine) -> (AdminAction, String) {
        match command {
            Command::Ping => (AdminAction::Pinged, PING_REPLY.to_string()),
            Command::Exit => (AdminAction::Exit, "Shutting down.".to_string()),
            Command::Reload => match self.source.load() {
                Ok(config) => {
                    if !same_token(&self.token, config.token()) {
                        warn!("Token changed; the new token is used after a restart");
                    }
                    engine.reload(&config);
                    self.settings = config.admin.clone();

                    let redirects = config.redirects().len();
                    (
                        AdminAction::Reloaded { redirects },
                        format!("Reloaded {} redirect(s).", redirects),
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Reload failed, keeping current redirects");
                    (
                        AdminAction::Failed(e.to_string()),
                        format!("Reload failed: {}", e),
                    )
                }
            },
            Command::AddRedirect {
                sources,
                destinations,
                title,
                color,
            } => {
                let options = RedirectOptions {
                    title,
                    use_rich_embed: color.is_some(),
                    rich_embed_color: color,
                    ..RedirectOptions::default()
                };

                match RedirectRule::new(sources, destinations, options) {
                    Ok(rule) => {
                        let reply = format!(
                            "Redirect added: {} -> {}",
                            rule.sources().join(", "),
                            rule.destinations().join(", ")
                        );
                        engine.add_redirect(rule);
                        (AdminAction::RedirectAdded, reply)
                    }
                    Err(e) => (
                        AdminAction::Failed(e.to_string()),
                        format!("Redirect rejected: {}", e),
                    ),
                }
            }
        }
    }

    async fn reply(&self, client: &dyn ChatClient, channel_id: &str, text: String) {
        let Some(channel) = client.channel(channel_id).await else {
            warn!(channel = %channel_id, "Cannot reply, channel not found");
            return;
        };

        let message = OutboundMessage {
            content: Content::text(text),
            attachments: Vec::new(),
            nonce: next_nonce(),
        };

        if let Err(e) = client.send(&channel, message).await {
            warn!(channel = %channel.path(), error = %e, "Failed to send command reply");
        }
    }
}

fn usage(error: &CommandError) -> String {
    format!(
        "{}. Commands: ping, reload, exit, add-redirect --source <ids> --dest <ids> [--title <text>] [--color <n>]",
        error
    )
}
