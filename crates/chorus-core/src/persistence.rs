use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ChorusResult;
use crate::roster::ConversationMode;
use crate::speakers::AllowList;
use crate::speakers::MessageId;
use crate::state::Author;
use crate::state::ChatMessage;
use crate::state::ReplyStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistedChatEvent {
    ConversationStarted {
        mode: ConversationMode,
    },
    UserMessage {
        id: MessageId,
        text: String,
    },
    AssistantMessage {
        id: MessageId,
        text: String,
        status: ReplyStatus,
        /// Absent in records written before snapshots were stored.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speakers: Option<AllowList>,
    },
    ConversationCleared {
        reason: String,
    },
}

impl PersistedChatEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ConversationStarted { .. } => "conversation_started",
            Self::UserMessage { .. } => "user_message",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::ConversationCleared { .. } => "conversation_cleared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChatRecord {
    pub seq: u64,
    pub ts_ms: i64,
    #[serde(flatten)]
    pub event: PersistedChatEvent,
}

/// Append-only JSONL log of one conversation directory.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    snapshot_path: PathBuf,
    next_seq: u64,
}

impl ConversationStore {
    pub fn open(path: impl AsRef<Path>) -> ChorusResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existing = load_records(path.as_path())?;
        let next_seq = existing
            .iter()
            .map(|record| record.seq)
            .max()
            .map_or(1, |seq| seq.saturating_add(1));
        let snapshot_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("conversation-snapshot.json");
        Ok(Self {
            path,
            snapshot_path,
            next_seq,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, event: PersistedChatEvent) -> ChorusResult<u64> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        let record = PersistedChatRecord {
            seq,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            event,
        };
        let line = serde_json::to_string(&record)?;
        append_line(self.path.as_path(), line.as_str())?;
        tracing::debug!(seq, kind = record.event.label(), "appended conversation record");
        Ok(seq)
    }

    pub fn load(&self) -> ChorusResult<Vec<PersistedChatRecord>> {
        load_records(self.path.as_path())
    }

    pub fn load_since(&self, seq_exclusive: u64) -> ChorusResult<Vec<PersistedChatRecord>> {
        let records = self.load()?;
        Ok(records
            .into_iter()
            .filter(|record| record.seq > seq_exclusive)
            .collect())
    }

    pub fn save_snapshot(&self, snapshot: &PersistedConversationSnapshot) -> ChorusResult<()> {
        let encoded = serde_json::to_vec(snapshot)?;
        let mut file = open_private(&self.snapshot_path, false)?;
        file.write_all(&encoded)?;
        file.flush()?;
        Ok(())
    }

    pub fn load_snapshot(&self) -> ChorusResult<Option<PersistedConversationSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.snapshot_path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Snapshot plus the records appended after it.
    pub fn replay(&self) -> ChorusResult<ReplayedConversation> {
        match self.load_snapshot()? {
            Some(snapshot) => {
                let tail = self.load_since(snapshot.seq)?;
                Ok(replay_conversation_from(Some(snapshot.conversation), &tail))
            }
            None => Ok(replay_conversation(&self.load()?)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayedConversation {
    pub mode: Option<ConversationMode>,
    pub messages: Vec<ChatMessage>,
    /// Speaker snapshots keyed by assistant message, in message order.
    pub snapshots: Vec<(MessageId, AllowList)>,
    pub last_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConversationSnapshot {
    pub version: u8,
    pub seq: u64,
    pub conversation: ReplayedConversation,
}

pub fn replay_conversation(records: &[PersistedChatRecord]) -> ReplayedConversation {
    replay_conversation_from(None, records)
}

pub fn replay_conversation_from(
    initial: Option<ReplayedConversation>,
    records: &[PersistedChatRecord],
) -> ReplayedConversation {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|record| record.seq);

    let mut replayed = initial.unwrap_or_default();
    for record in sorted {
        replayed.last_seq = replayed.last_seq.max(record.seq);
        match record.event {
            PersistedChatEvent::ConversationStarted { mode } => {
                replayed.mode = Some(mode);
            }
            PersistedChatEvent::UserMessage { id, text } => {
                upsert(
                    &mut replayed.messages,
                    ChatMessage {
                        id,
                        author: Author::User,
                        text,
                        status: ReplyStatus::Complete,
                    },
                );
            }
            PersistedChatEvent::AssistantMessage {
                id,
                text,
                status,
                speakers,
            } => {
                // A reply persisted mid-stream was cut off by the process exiting.
                let status = match status {
                    ReplyStatus::Streaming => ReplyStatus::Aborted,
                    other => other,
                };
                if let Some(speakers) = speakers {
                    replayed.snapshots.retain(|(bound, _)| bound != &id);
                    replayed.snapshots.push((id.clone(), speakers));
                }
                upsert(
                    &mut replayed.messages,
                    ChatMessage {
                        id,
                        author: Author::Assistant,
                        text,
                        status,
                    },
                );
            }
            PersistedChatEvent::ConversationCleared { .. } => {
                replayed.messages.clear();
                replayed.snapshots.clear();
            }
        }
    }

    replayed
}

fn upsert(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    match messages.iter_mut().find(|existing| existing.id == message.id) {
        Some(existing) => *existing = message,
        None => messages.push(message),
    }
}

fn load_records(path: &Path) -> ChorusResult<Vec<PersistedChatRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PersistedChatRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => tracing::warn!(%err, "skipping unreadable conversation record"),
        }
    }
    Ok(records)
}

/// Opens `path` with owner-only permissions, appending or truncating.
fn open_private(path: &Path, append: bool) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    if append {
        opts.create(true).append(true);
    } else {
        opts.create(true).write(true).truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = open_private(path, true)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}
