use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChorusResult;
use crate::parser::ParserOptions;
use crate::parser::SummaryPolicy;
use crate::reveal::DEFAULT_REVEAL_INTERVAL;
use crate::roster::ConversationMode;
use crate::roster::Roster;
use crate::state::UiTheme;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub conversation: ConversationConfig,
    pub reveal: RevealConfig,
    pub feed: FeedConfig,
    pub ui: UiConfig,
}

impl Config {
    /// The configured roster file, or the built-in cast.
    pub fn roster(&self) -> ChorusResult<Arc<Roster>> {
        match &self.conversation.roster_path {
            Some(path) => Ok(Arc::new(Roster::load(path)?)),
            None => Ok(Roster::builtin()),
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            summary: self.conversation.summary,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    pub mode: ConversationMode,
    /// Starting speakers; empty means the roster's personas.
    pub speakers: Vec<String>,
    pub summary: SummaryPolicy,
    pub roster_path: Option<PathBuf>,
    pub history_dir: Option<PathBuf>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            mode: ConversationMode::Generic,
            speakers: Vec::new(),
            summary: SummaryPolicy::default(),
            roster_path: None,
            history_dir: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RevealConfig {
    pub interval_ms: u64,
    pub force_show_all: bool,
}

impl RevealConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_REVEAL_INTERVAL.as_millis() as u64,
            force_show_all: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    /// `scripted` or `ollama`.
    pub default_source: String,
    pub default_model: Option<String>,
    /// Characters per chunk for the scripted source.
    pub chunk_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_source: "scripted".to_string(),
            default_model: None,
            chunk_size: 24,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UiConfig {
    pub theme: UiTheme,
    pub hide_silent: bool,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_the_built_in_behaviour() {
        let config = Config::default();
        assert_eq!(config.conversation.mode, ConversationMode::Generic);
        assert_eq!(config.reveal.interval(), DEFAULT_REVEAL_INTERVAL);
        assert_eq!(config.parser_options(), ParserOptions::default());
        assert_eq!(config.feed.default_source, "scripted");
        assert!(config.roster().is_ok());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let reveal = RevealConfig {
            interval_ms: 0,
            force_show_all: false,
        };
        assert_eq!(reveal.interval(), Duration::from_millis(1));
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"conversation":{"mode":"themed","summary":"reopen"},"ui":{"theme":"neon-noir"}}"#,
        )
        .expect("config");
        assert_eq!(config.conversation.mode, ConversationMode::Themed);
        assert_eq!(config.conversation.summary, SummaryPolicy::Reopen);
        assert_eq!(config.ui.theme, UiTheme::NeonNoir);
        assert_eq!(config.reveal.interval_ms, 650);
    }
}
