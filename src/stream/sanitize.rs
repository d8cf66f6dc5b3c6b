//! Text sanitizers applied to relayed content

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// Pure text filter.
///
/// Must only ever see complete characters; [`SanitizingStream`](super::SanitizingStream)
/// guarantees that for streamed input.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

impl<F> Sanitizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn sanitize(&self, text: &str) -> String {
        self(text)
    }
}

/// Pictographs, presentation emoji, modifiers and non-ASCII emoji
/// components (ZWJ, variation selectors, regional indicators, tags).
/// ASCII components such as digits, `#` and `*` are kept.
static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\p{Extended_Pictographic}|\p{Emoji_Presentation}|\p{Emoji_Modifier_Base}|\p{Emoji_Modifier}|[\p{Emoji_Component}&&[^\x00-\x7F]]",
    )
    .expect("emoji pattern is valid")
});

/// Remove emoji from `text`
pub fn strip_emojis(text: &str) -> String {
    EMOJI.replace_all(text, "").into_owned()
}

/// Strips emoji
#[derive(Debug, Clone, Copy, Default)]
pub struct EmojiFilter;

impl Sanitizer for EmojiFilter {
    fn sanitize(&self, text: &str) -> String {
        strip_emojis(text)
    }
}

/// Leaves text untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Sanitizer for Passthrough {
    fn sanitize(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Configurable sanitizer choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizerKind {
    #[default]
    Emoji,
    None,
}

impl SanitizerKind {
    pub fn build(self) -> Arc<dyn Sanitizer> {
        match self {
            SanitizerKind::Emoji => Arc::new(EmojiFilter),
            SanitizerKind::None => Arc::new(Passthrough),
        }
    }
}

impl FromStr for SanitizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emoji" => Ok(SanitizerKind::Emoji),
            "none" | "off" => Ok(SanitizerKind::None),
            other => Err(format!("unknown sanitizer '{}' (expected emoji|none)", other)),
        }
    }
}
