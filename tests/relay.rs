//! End-to-end relay behaviour against an in-memory chat client.

use async_trait::async_trait;
use echobot::config::{validate, RelaySettings};
use echobot::dispatch::{ChannelInfo, ChannelKind, ChatClient, DeliveryError};
use echobot::message::{Attachment, Content, InboundMessage, OutboundMessage};
use echobot::redirect::{DedupScope, RedirectOptions, RedirectRule};
use echobot::RelayEngine;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct RecordingClient {
    channels: HashMap<String, ChannelInfo>,
    failing: HashSet<String>,
    sent: Mutex<Vec<(String, OutboundMessage)>>,
}

impl RecordingClient {
    fn with_text_channels(ids: &[&str]) -> Self {
        let channels = ids
            .iter()
            .map(|id| (id.to_string(), ChannelInfo::text(*id, format!("chan-{}", id), Some("Guild".into()))))
            .collect();
        Self {
            channels,
            failing: HashSet::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn add_voice(mut self, id: &str) -> Self {
        self.channels.insert(
            id.to_string(),
            ChannelInfo {
                id: id.to_string(),
                name: "lounge".to_string(),
                guild_name: Some("Guild".to_string()),
                kind: ChannelKind::Voice,
            },
        );
        self
    }

    fn failing_on(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn texts(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(dest, msg)| (dest.clone(), msg.content.as_text().to_string()))
            .collect()
    }

    fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for RecordingClient {
    async fn channel(&self, channel_id: &str) -> Option<ChannelInfo> {
        self.channels.get(channel_id).cloned()
    }

    async fn send(&self, channel: &ChannelInfo, message: OutboundMessage) -> Result<(), DeliveryError> {
        if self.failing.contains(&channel.id) {
            return Err(DeliveryError::Send("rate limited".to_string()));
        }
        self.sent.lock().unwrap().push((channel.id.clone(), message));
        Ok(())
    }
}

fn rule(sources: &[&str], destinations: &[&str], options: RedirectOptions) -> RedirectRule {
    RedirectRule::new(
        sources.iter().map(|s| s.to_string()).collect(),
        destinations.iter().map(|s| s.to_string()).collect(),
        options,
    )
    .unwrap()
}

fn plain_engine(rules: Vec<RedirectRule>) -> RelayEngine {
    RelayEngine::from_rules(rules, RelaySettings::default())
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

#[tokio::test]
async fn hello_reaches_both_destinations_then_repeat_is_suppressed() {
    let config = validate(&json!({
        "token": "t",
        "redirects": [{ "sources": ["C1"], "destinations": ["C2", "C3"] }]
    }))
    .unwrap();
    let mut engine = RelayEngine::new(&config);
    let client = RecordingClient::with_text_channels(&["C2", "C3"]);

    let first = engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "hello"))
        .await;
    assert_eq!(first.delivered_count(), 2);
    assert_eq!(engine.dispatcher().dedup().last("C2"), Some("hello"));

    let second = engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "hello"))
        .await;
    assert_eq!(second.delivered_count(), 0);
    assert_eq!(second.duplicate_count(), 2);

    // no header, body unmodified
    assert_eq!(client.texts(), pairs(&[("C2", "hello"), ("C3", "hello")]));
}

#[tokio::test]
async fn dedup_only_looks_back_one_message() {
    let mut engine = plain_engine(vec![rule(&["C1"], &["C2"], RedirectOptions::default())]);
    let client = RecordingClient::with_text_channels(&["C2"]);

    for text in ["one", "one", "two", "two", "one"] {
        engine
            .handle_message(&client, &InboundMessage::new("C1", "A", text))
            .await;
    }

    assert_eq!(
        client.texts(),
        pairs(&[("C2", "one"), ("C2", "two"), ("C2", "one")])
    );
}

#[tokio::test]
async fn unmatched_channel_delivers_nothing() {
    let mut engine = plain_engine(vec![rule(&["C1"], &["C2"], RedirectOptions::default())]);
    let client = RecordingClient::with_text_channels(&["C1", "C2"]);

    let report = engine
        .handle_message(&client, &InboundMessage::new("C2", "A", "hello"))
        .await;

    assert!(!report.matched());
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn resolution_failures_do_not_stop_siblings() {
    let mut engine = plain_engine(vec![
        rule(&["C1"], &["MISSING", "VOICE", "C2"], RedirectOptions::default()),
        rule(&["C1"], &["C3"], RedirectOptions::default()),
    ]);
    let client = RecordingClient::with_text_channels(&["C2", "C3"]).add_voice("VOICE");

    let report = engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "hi"))
        .await;

    assert_eq!(report.failure_count(), 2);
    assert_eq!(report.delivered_count(), 2);
    assert_eq!(client.texts(), pairs(&[("C2", "hi"), ("C3", "hi")]));
}

#[tokio::test]
async fn send_failure_is_isolated_and_not_recorded() {
    let mut engine = RelayEngine::from_rules(
        vec![rule(&["C1"], &["C2", "C3"], RedirectOptions::default())],
        RelaySettings {
            dedup_scope: DedupScope::PerDestination,
            ..RelaySettings::default()
        },
    );
    let client = RecordingClient::with_text_channels(&["C2", "C3"]).failing_on("C2");

    let report = engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "hi"))
        .await;

    assert_eq!(report.failure_count(), 1);
    assert_eq!(client.texts(), pairs(&[("C3", "hi")]));
    assert_eq!(engine.dispatcher().dedup().last("C2"), None);
    assert_eq!(engine.dispatcher().dedup().last("C3"), Some("hi"));
}

#[tokio::test]
async fn filters_apply_per_rule() {
    let options = RedirectOptions {
        minimum_length: Some(10),
        allow_list: Some(["A".to_string()].into_iter().collect()),
        remove_everyone_mention: true,
        ..RedirectOptions::default()
    };
    let mut engine = plain_engine(vec![rule(&["C1"], &["C2"], options)]);
    let client = RecordingClient::with_text_channels(&["C2"]);

    // too short
    engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "short"))
        .await;
    // wrong author
    engine
        .handle_message(&client, &InboundMessage::new("C1", "B", "long enough text"))
        .await;
    // long enough only before stripping
    let report = engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "@everyone hi"))
        .await;
    assert_eq!(report.dropped_count(), 1);

    engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "twelve chars"))
        .await;

    assert_eq!(client.texts(), pairs(&[("C2", "twelve chars")]));
}

#[tokio::test]
async fn embed_rule_sends_header_then_body() {
    let options = RedirectOptions {
        title: Some("News".to_string()),
        use_rich_embed: true,
        include_source_attribution: true,
        copy_attachments: true,
        ..RedirectOptions::default()
    };
    let mut engine = plain_engine(vec![rule(&["C1"], &["C2"], options)]);
    let client = RecordingClient::with_text_channels(&["C2"]);

    let message = InboundMessage::new("C1", "A", "patch is out")
        .with_author_name("alice")
        .with_location("Game", "announcements")
        .with_attachment(Attachment::new("https://cdn.example/notes.txt", "notes.txt"));

    engine.handle_message(&client, &message).await;

    let sent = client.sent();
    assert_eq!(sent.len(), 2);

    let Content::Embed { embed: header } = &sent[0].1.content else {
        panic!("header should be an embed");
    };
    assert_eq!(header.title.as_deref(), Some("News"));
    assert_eq!(header.fields[0].value, "alice in Game/announcements");
    assert!(sent[0].1.attachments.is_empty());

    let Content::Embed { embed: body } = &sent[1].1.content else {
        panic!("body should be an embed");
    };
    assert_eq!(body.color, Some(30975));
    assert_eq!(body.description.as_deref(), Some("patch is out"));
    assert_eq!(sent[1].1.attachments.len(), 1);

    assert_ne!(sent[0].1.nonce, sent[1].1.nonce);
}

#[tokio::test]
async fn global_dedup_spans_rules() {
    let mut engine = plain_engine(vec![
        rule(&["C1"], &["D1"], RedirectOptions::default()),
        rule(&["C5"], &["D2"], RedirectOptions::default()),
    ]);
    let client = RecordingClient::with_text_channels(&["D1", "D2"]);

    engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "same"))
        .await;
    engine
        .handle_message(&client, &InboundMessage::new("C5", "A", "same"))
        .await;

    assert_eq!(client.texts(), pairs(&[("D1", "same")]));
}

#[tokio::test]
async fn per_destination_dedup_keeps_rules_independent() {
    let mut engine = RelayEngine::from_rules(
        vec![
            rule(&["C1"], &["D1"], RedirectOptions::default()),
            rule(&["C5"], &["D2"], RedirectOptions::default()),
        ],
        RelaySettings {
            dedup_scope: DedupScope::PerDestination,
            ..RelaySettings::default()
        },
    );
    let client = RecordingClient::with_text_channels(&["D1", "D2"]);

    engine
        .handle_message(&client, &InboundMessage::new("C1", "A", "same"))
        .await;
    engine
        .handle_message(&client, &InboundMessage::new("C5", "A", "same"))
        .await;

    assert_eq!(client.texts(), pairs(&[("D1", "same"), ("D2", "same")]));
}
