use std::time::Instant;

use super::persistence::ReplayedConversation;
use super::speakers::MessageId;
use super::state::ClearReason;
use super::state::LogEntry;
use super::state::UiTheme;

#[derive(Debug, Clone)]
pub enum ChatAction {
    User(UserAction),
    Runtime(RuntimeAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    SendMessage(String),
    /// Accepts a persona name or an archetype code in either mode.
    ToggleSpeaker(String),
    SetSpeakers(Vec<String>),
    ToggleForceShowAll,
    ToggleSilentPlaceholders,
    SetTheme(UiTheme),
    CycleTheme,
    ClearConversation,
}

#[derive(Debug, Clone)]
pub enum RuntimeAction {
    AppendReplyChunk { id: MessageId, chunk: String },
    FinishReply { id: MessageId },
    AbortReply { id: MessageId, reason: String },
    RevealTick { now: Instant },
    LoadHistory(ReplayedConversation),
    ResetConversation(ClearReason),
    ClearLogs(ClearReason),
    AppendLog(String),
    AppendStructuredLog(LogEntry),
}

impl UserAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send-message",
            Self::ToggleSpeaker(_) => "toggle-speaker",
            Self::SetSpeakers(_) => "set-speakers",
            Self::ToggleForceShowAll => "toggle-force-show-all",
            Self::ToggleSilentPlaceholders => "toggle-silent-placeholders",
            Self::SetTheme(_) => "set-theme",
            Self::CycleTheme => "cycle-theme",
            Self::ClearConversation => "clear-conversation",
        }
    }
}

impl RuntimeAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AppendReplyChunk { .. } => "append-reply-chunk",
            Self::FinishReply { .. } => "finish-reply",
            Self::AbortReply { .. } => "abort-reply",
            Self::RevealTick { .. } => "reveal-tick",
            Self::LoadHistory(_) => "load-history",
            Self::ResetConversation(_) => "reset-conversation",
            Self::ClearLogs(_) => "clear-logs",
            Self::AppendLog(_) => "append-log",
            Self::AppendStructuredLog(_) => "append-structured-log",
        }
    }
}
