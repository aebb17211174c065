//! Inbound chat events.
//!
//! A message carries plain content plus any structured embeds. Each embed is
//! flattened to plain text, one line per populated part, and matched as its
//! own unit; non-empty content is one more unit.

use serde::{Deserialize, Serialize};

use crate::alert::RESERVED_TITLES;

/// One name/value field of an embed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbedField {
    /// Field label.
    pub name: String,
    /// Field body.
    pub value: String,
}

/// Structured rich content attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Embed {
    /// Embed title; also used to recognise the bot's own messages.
    #[serde(default)]
    pub title: Option<String>,
    /// Author display name.
    #[serde(default)]
    pub author: Option<String>,
    /// Free-form body text.
    #[serde(default)]
    pub description: Option<String>,
    /// Name/value fields, in display order.
    #[serde(default)]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    /// True if the title marks this as one of the bot's own messages.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.title
            .as_deref()
            .is_some_and(|t| RESERVED_TITLES.iter().any(|r| t.contains(r)))
    }

    /// Title, author, description, then each field's name and value, each
    /// followed by a newline.
    #[must_use]
    pub fn flatten(&self) -> String {
        let mut out = String::new();
        for part in [&self.title, &self.author, &self.description].into_iter().flatten() {
            if !part.is_empty() {
                out.push_str(part);
                out.push('\n');
            }
        }
        for field in &self.fields {
            out.push_str(&field.name);
            out.push('\n');
            out.push_str(&field.value);
            out.push('\n');
        }
        out
    }
}

/// A message observed on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Channel the message arrived on.
    pub channel_id: String,
    /// Plain message text.
    #[serde(default)]
    pub content: String,
    /// Structured rich content.
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

impl InboundEvent {
    /// A plain-text event with no embeds.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
            embeds: Vec::new(),
        }
    }

    /// Adds an embed.
    #[must_use]
    pub fn with_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    /// Texts to match: the content if non-blank, then every non-reserved embed.
    #[must_use]
    pub fn text_units(&self) -> Vec<String> {
        let mut units = Vec::with_capacity(1 + self.embeds.len());
        if !self.content.trim().is_empty() {
            units.push(self.content.clone());
        }
        units.extend(
            self.embeds
                .iter()
                .filter(|e| !e.is_reserved())
                .map(Embed::flatten),
        );
        units
    }
}
