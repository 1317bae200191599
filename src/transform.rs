//! Message transformation.
//!
//! [`MessageTransformer::transform`] turns an inbound message into what a
//! rule wants posted: an optional header and a body, each either plain text
//! or a rich embed depending on `use_rich_embed`. A message can also be
//! withheld, which is a [`DropReason`], not an error.
//!
//! Steps, in order:
//!
//! 1. allow-list check on the author
//! 2. body text = raw text, or a "rich" block's description with `copy_embedded_rich_content`
//! 3. strip `@everyone` / `@here` (plain substring removal)
//! 4. minimum-length check
//! 5. attachments copied with `copy_attachments`
//! 6. header and body assembled; if both come out empty the message is dropped

use crate::message::{Body, Content, Embed, EmbedField, InboundMessage};
use crate::redirect::{MinimumLengthPolicy, RedirectOptions};
use std::fmt;

const EVERYONE_MENTION: &str = "@everyone";
const HERE_MENTION: &str = "@here";

/// Why a message was intentionally not relayed under a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The author is not on the rule's allow-list
    AuthorNotAllowed,

    /// The body is shorter than the rule's minimum length
    TooShort { length: usize, minimum: usize },

    /// Nothing would be left to send
    Empty,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::AuthorNotAllowed => write!(f, "author not on allow-list"),
            DropReason::TooShort { length, minimum } => {
                write!(f, "body length {} below minimum {}", length, minimum)
            }
            DropReason::Empty => write!(f, "nothing to send"),
        }
    }
}

/// Header and body ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub header: Option<Content>,
    pub body: Body,
}

/// Result of transforming one message for one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Relay(Transformed),
    Dropped(DropReason),
}

/// Applies a rule's options to inbound messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageTransformer {
    minimum_length_policy: MinimumLengthPolicy,
}

impl MessageTransformer {
    pub fn new(minimum_length_policy: MinimumLengthPolicy) -> Self {
        Self {
            minimum_length_policy,
        }
    }

    pub fn minimum_length_policy(&self) -> MinimumLengthPolicy {
        self.minimum_length_policy
    }

    pub fn transform(&self, message: &InboundMessage, options: &RedirectOptions) -> TransformOutcome {
        if !options.allows_author(&message.author_id) {
            return TransformOutcome::Dropped(DropReason::AuthorNotAllowed);
        }

        let text = relayed_text(message, options);

        if let Some(minimum) = options.minimum_length {
            let measured = !options.use_rich_embed
                || self.minimum_length_policy == MinimumLengthPolicy::IncludeEmbedDescription;
            let length = text.chars().count();
            if measured && length < minimum {
                return TransformOutcome::Dropped(DropReason::TooShort { length, minimum });
            }
        }

        let attachments = if options.copy_attachments {
            message.attachments.clone()
        } else {
            Vec::new()
        };

        let header = build_header(message, options);
        let body = Body {
            content: build_body_content(message, options, text),
            attachments,
        };

        if header.is_none() && body.is_empty() {
            return TransformOutcome::Dropped(DropReason::Empty);
        }

        TransformOutcome::Relay(Transformed { header, body })
    }
}

/// The message text after content selection and mention stripping.
fn relayed_text(message: &InboundMessage, options: &RedirectOptions) -> String {
    let mut text = match message.rich_description() {
        Some(description) if options.copy_embedded_rich_content => description.to_string(),
        _ => message.content.clone(),
    };

    if options.remove_everyone_mention {
        text = text.replace(EVERYONE_MENTION, "");
    }
    if options.remove_here_mention {
        text = text.replace(HERE_MENTION, "");
    }

    text
}

fn attribution(message: &InboundMessage) -> String {
    format!("{} in {}", message.author_name, message.source_path())
}

fn build_header(message: &InboundMessage, options: &RedirectOptions) -> Option<Content> {
    let title = options.title();
    let attribute = options.include_source_attribution;

    if title.is_none() && !attribute {
        return None;
    }

    if options.use_rich_embed {
        let mut embed = Embed {
            title: title.map(str::to_string),
            color: Some(options.embed_color()),
            ..Embed::default()
        };
        if attribute {
            embed.fields.push(EmbedField {
                name: "Author".to_string(),
                value: attribution(message),
            });
        }
        return Some(Content::embed(embed));
    }

    let mut lines = Vec::new();
    if let Some(title) = title {
        lines.push(format!("**{}**", title));
    }
    if attribute {
        lines.push(format!("*{}*", attribution(message)));
    }
    Some(Content::text(lines.join("\n")))
}

fn build_body_content(message: &InboundMessage, options: &RedirectOptions, text: String) -> Content {
    if options.use_rich_embed {
        return Content::embed(Embed {
            color: Some(options.embed_color()),
            description: Some(text).filter(|t| !t.is_empty()),
            ..Embed::default()
        });
    }

    let mut body = String::new();
    if let Some(title) = options.title() {
        body.push_str(&format!("**{}**\n\n", title));
    }
    body.push_str(&text);
    if options.include_source_attribution {
        body.push_str(&format!("\n\n*Source: {}*", message.source_path()));
    }
    Content::text(body)
}
