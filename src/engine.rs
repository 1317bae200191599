//! The relay engine.
//!
//! [`RelayEngine`] owns everything the relay needs between messages: the
//! redirect index, the transformer, and the dispatcher with its dedup slot.
//! [`RelayEngine::handle_message`] is the single entry point; callers feed
//! it one message at a time and must not start the next message until the
//! previous call has returned.
//!
//! ```text
//! InboundMessage
//!     │
//!     ▼
//! RedirectIndex ──► rule #0 ──► transform ──► deliver to each destination
//!               └─► rule #2 ──► transform ──► deliver to each destination
//! ```

use crate::config::{RelaySettings, ValidatedConfig};
use crate::dispatch::{ChatClient, DeliveryDispatcher, DestinationResult};
use crate::message::InboundMessage;
use crate::redirect::RedirectRule;
use crate::router::RedirectIndex;
use crate::transform::{DropReason, MessageTransformer, TransformOutcome};
use tracing::{debug, info, warn};

/// What happened to a message under one matching rule.
#[derive(Debug)]
pub enum RuleOutcome {
    Dropped(DropReason),
    Delivered(Vec<DestinationResult>),
}

/// Outcome for one matching rule.
#[derive(Debug)]
pub struct RuleReport {
    /// Position of the rule in the configuration
    pub rule: usize,
    pub outcome: RuleOutcome,
}

/// Result of relaying one inbound message.
#[derive(Debug, Default)]
pub struct RelayReport {
    pub rules: Vec<RuleReport>,
}

impl RelayReport {
    /// Whether any rule matched the message's channel.
    pub fn matched(&self) -> bool {
        !self.rules.is_empty()
    }

    fn destinations(&self) -> impl Iterator<Item = &DestinationResult> {
        self.rules.iter().flat_map(|r| match &r.outcome {
            RuleOutcome::Delivered(results) => results.as_slice(),
            RuleOutcome::Dropped(_) => &[],
        })
    }

    pub fn delivered_count(&self) -> usize {
        self.destinations().filter(|d| d.is_delivered()).count()
    }

    pub fn duplicate_count(&self) -> usize {
        self.destinations().filter(|d| d.is_duplicate()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.destinations().filter(|d| d.error().is_some()).count()
    }

    pub fn dropped_count(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| matches!(r.outcome, RuleOutcome::Dropped(_)))
            .count()
    }
}

/// Matches, transforms and delivers inbound messages.
#[derive(Debug)]
pub struct RelayEngine {
    index: RedirectIndex,
    transformer: MessageTransformer,
    dispatcher: DeliveryDispatcher,
    settings: RelaySettings,
}

impl RelayEngine {
    pub fn new(config: &ValidatedConfig) -> Self {
        Self::from_rules(config.redirects().to_vec(), config.relay.clone())
    }

    pub fn from_rules(rules: Vec<RedirectRule>, settings: RelaySettings) -> Self {
        Self {
            index: RedirectIndex::new(rules),
            transformer: MessageTransformer::new(settings.minimum_length_policy),
            dispatcher: DeliveryDispatcher::new(settings.dedup_scope),
            settings,
        }
    }

    pub fn index(&self) -> &RedirectIndex {
        &self.index
    }

    pub fn dispatcher(&self) -> &DeliveryDispatcher {
        &self.dispatcher
    }

    /// Relay one message through every rule whose sources include its channel.
    pub async fn handle_message(
        &mut self,
        client: &dyn ChatClient,
        message: &InboundMessage,
    ) -> RelayReport {
        let mut report = RelayReport::default();

        if !self.index.is_source(&message.channel_id) {
            return report;
        }

        self.dispatcher.begin_message();

        for (position, rule) in self.index.matching_rules(&message.channel_id) {
            let outcome = match self.transformer.transform(message, rule.options()) {
                TransformOutcome::Dropped(reason) => {
                    info!(
                        rule = position,
                        author = %message.author_name,
                        source = %message.source_path(),
                        reason = %reason,
                        "Message dropped"
                    );
                    RuleOutcome::Dropped(reason)
                }
                TransformOutcome::Relay(transformed) => {
                    let results = self
                        .dispatcher
                        .deliver(client, rule.destinations(), &transformed, message)
                        .await;
                    RuleOutcome::Delivered(results)
                }
            };

            report.rules.push(RuleReport {
                rule: position,
                outcome,
            });
        }

        if report.failure_count() > 0 {
            warn!(
                source = %message.source_path(),
                delivered = report.delivered_count(),
                failures = report.failure_count(),
                "Message relayed with failures"
            );
        } else {
            debug!(
                source = %message.source_path(),
                rules = report.rules.len(),
                delivered = report.delivered_count(),
                duplicates = report.duplicate_count(),
                dropped = report.dropped_count(),
                "Message relayed"
            );
        }

        report
    }

    /// Replace the whole rule set with a freshly validated configuration.
    ///
    /// The dedup slot survives unless the dedup scope changed.
    pub fn reload(&mut self, config: &ValidatedConfig) {
        self.index = RedirectIndex::new(config.redirects().to_vec());
        self.transformer = MessageTransformer::new(config.relay.minimum_length_policy);
        if config.relay.dedup_scope != self.settings.dedup_scope {
            self.dispatcher = DeliveryDispatcher::new(config.relay.dedup_scope);
        }
        self.settings = config.relay.clone();

        info!(
            redirects = self.index.len(),
            sources = self.index.source_count(),
            "Redirects reloaded"
        );
    }

    /// Append a rule after the existing ones.
    pub fn add_redirect(&mut self, rule: RedirectRule) {
        let mut rules = self.index.rules().to_vec();
        rules.push(rule);
        self.index = RedirectIndex::new(rules);

        info!(redirects = self.index.len(), "Redirect added");
    }
}
