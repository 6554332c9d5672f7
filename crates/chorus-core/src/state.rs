use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::parser::ParsedReply;
use crate::parser::ReplyParser;
use crate::resolver::presenter_for;
use crate::resolver::RolePresenter;
use crate::reveal::RevealController;
use crate::roster::ConversationMode;
use crate::roster::Roster;
use crate::speakers::AllowList;
use crate::speakers::MessageId;
use crate::speakers::SpeakerSnapshots;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

impl Author {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "you",
            Self::Assistant => "ensemble",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            Self::User => "u",
            Self::Assistant => "a",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Streaming,
    Complete,
    Aborted,
}

impl ReplyStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author: Author,
    pub text: String,
    pub status: ReplyStatus,
}

impl ChatMessage {
    pub fn is_assistant(&self) -> bool {
        self.author == Author::Assistant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UiTheme {
    Classic,
    Cyberpunk,
    NeonNoir,
    SolarFlare,
    ForestZen,
}

impl UiTheme {
    pub fn label(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Cyberpunk => "cyberpunk",
            Self::NeonNoir => "neon-noir",
            Self::SolarFlare => "solar-flare",
            Self::ForestZen => "forest-zen",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Classic => Self::Cyberpunk,
            Self::Cyberpunk => Self::NeonNoir,
            Self::NeonNoir => Self::SolarFlare,
            Self::SolarFlare => Self::ForestZen,
            Self::ForestZen => Self::Classic,
        }
    }
}

impl Default for UiTheme {
    fn default() -> Self {
        Self::Classic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    SessionReset,
    UserRequest,
}

impl ClearReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::SessionReset => "session-reset",
            Self::UserRequest => "user-request",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    App,
    Feed,
    Speakers,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub seq: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: LogSource, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            level,
            source,
            message: message.into(),
        }
    }
}

/// Bounded session log shown next to the transcript. Oldest entries are
/// evicted first; `seq` restarts at 1 after a clear.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    cap: usize,
    next_seq: u64,
    buf: VecDeque<LogEntry>,
}

impl LogBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            next_seq: 1,
            buf: VecDeque::with_capacity(cap),
        }
    }

    pub fn append(&mut self, mut entry: LogEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;

        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.next_seq = 1;
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.buf.iter()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChatCustomization {
    pub theme: UiTheme,
    pub show_silent: bool,
}

#[derive(Debug, Clone)]
pub struct ChatState {
    pub title: Arc<str>,
    pub mode: ConversationMode,
    pub parser: ReplyParser,
    pub presenter: Arc<dyn RolePresenter>,
    /// Live speaker selection; historical messages use their snapshot.
    pub speakers: AllowList,
    pub messages: Vec<ChatMessage>,
    pub streaming: Option<MessageId>,
    pub snapshots: SpeakerSnapshots,
    pub reveal: RevealController,
    pub customization: ChatCustomization,
    pub logs: LogBuffer,
    next_message_seq: u64,
}

impl ChatState {
    pub fn new(title: impl Into<Arc<str>>, mode: ConversationMode, parser: ReplyParser) -> Self {
        let roster = Arc::clone(parser.roster());
        let speakers = AllowList::canonical(roster.default_speakers(mode), &roster, mode);
        Self {
            title: title.into(),
            mode,
            presenter: presenter_for(mode, roster),
            parser,
            speakers,
            messages: Vec::new(),
            streaming: None,
            snapshots: SpeakerSnapshots::default(),
            reveal: RevealController::default(),
            customization: ChatCustomization {
                theme: UiTheme::default(),
                show_silent: true,
            },
            logs: LogBuffer::new(500),
            next_message_seq: 1,
        }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        self.parser.roster()
    }

    pub fn allocate_id(&mut self, author: Author) -> MessageId {
        let id = MessageId::new(format!("{}-{}", author.id_prefix(), self.next_message_seq));
        self.next_message_seq += 1;
        id
    }

    /// Keeps newly allocated ids clear of ids that came from history.
    pub fn reserve_ids_after(&mut self, messages: &[ChatMessage]) {
        let highest = messages
            .iter()
            .filter_map(|message| message.id.as_str().rsplit_once('-'))
            .filter_map(|(_, seq)| seq.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        self.next_message_seq = self.next_message_seq.max(highest.saturating_add(1));
    }

    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|message| &message.id == id)
    }

    pub fn assistant_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.messages
            .iter()
            .filter(|message| message.is_assistant())
            .map(|message| &message.id)
    }

    /// The render-pass half of snapshot binding: every assistant message
    /// without a snapshot gets the next queued send, or the live speakers.
    pub fn bind_snapshots(&mut self) -> usize {
        let ids: Vec<MessageId> = self.assistant_ids().cloned().collect();
        self.snapshots.bind(&ids, &self.speakers)
    }

    pub fn speakers_for(&self, id: &MessageId) -> &AllowList {
        self.snapshots.resolve(id, &self.speakers)
    }

    pub fn parse(&self, message: &ChatMessage) -> ParsedReply {
        if message.is_assistant() {
            self.parser.parse(&message.text, self.mode)
        } else {
            ParsedReply::plain(&message.text)
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn log(&mut self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        self.logs.append(LogEntry::new(level, source, message));
    }
}
