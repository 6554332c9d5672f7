use std::sync::Arc;

use super::actions::ChatAction;
use super::actions::RuntimeAction;
use super::actions::UserAction;
use super::persistence::PersistedChatEvent;
use super::persistence::ReplayedConversation;
use super::roster::ConversationMode;
use super::speakers::AllowList;
use super::speakers::MessageId;
use super::state::Author;
use super::state::ChatMessage;
use super::state::ChatState;
use super::state::ClearReason;
use super::state::LogLevel;
use super::state::LogSource;
use super::state::ReplyStatus;
use super::view::reveal_total;
use super::view::visible_blocks;

/// Prior turns forwarded with each new message.
pub const CONTEXT_MESSAGES: usize = 8;
const MAX_CONTEXT_CHARS: usize = 16_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChorusEffect {
    RequestFrame,
    /// Start streaming a reply into the assistant message `id`.
    RequestReply {
        id: MessageId,
        message: String,
        context: Option<String>,
        speakers: AllowList,
        mode: ConversationMode,
    },
    /// One finished block handed to speech synthesis. `role` is `None` for a
    /// reply without attribution.
    Speak {
        message: MessageId,
        role: Option<String>,
        voice: String,
        text: String,
    },
    Persist(PersistedChatEvent),
}

pub fn reduce(state: &mut ChatState, action: ChatAction) -> Vec<ChorusEffect> {
    match action {
        ChatAction::User(user) => reduce_user(state, user),
        ChatAction::Runtime(runtime) => reduce_runtime(state, runtime),
    }
}

fn reduce_user(state: &mut ChatState, action: UserAction) -> Vec<ChorusEffect> {
    match action {
        UserAction::SendMessage(text) => send_message(state, text),
        UserAction::ToggleSpeaker(token) => {
            let roster = Arc::clone(state.roster());
            let Some(role) = roster.canonicalize(&token, state.mode) else {
                state.log(
                    LogLevel::Warn,
                    LogSource::Speakers,
                    format!("unknown speaker '{}'", token.trim()),
                );
                return vec![ChorusEffect::RequestFrame];
            };
            let was_on = state.speakers.contains(&role);
            let now_on = state.speakers.toggle(&role, state.mode);
            let message = match (was_on, now_on) {
                (false, false) => format!("speaker limit reached; {role} not added"),
                (_, true) => format!("{role} joined the conversation"),
                (true, false) => format!("{role} left the conversation"),
            };
            let level = if was_on || now_on {
                LogLevel::Info
            } else {
                LogLevel::Warn
            };
            state.log(level, LogSource::Speakers, message);
            vec![ChorusEffect::RequestFrame]
        }
        UserAction::SetSpeakers(roles) => {
            let roster = Arc::clone(state.roster());
            let known: Vec<String> = roles
                .iter()
                .filter_map(|role| roster.canonicalize(role, state.mode))
                .collect();
            state.speakers = AllowList::canonical(known, &roster, state.mode);
            let summary = state.speakers.as_slice().join(", ");
            state.log(
                LogLevel::Info,
                LogSource::Speakers,
                format!("speakers set to [{summary}]"),
            );
            vec![ChorusEffect::RequestFrame]
        }
        UserAction::ToggleForceShowAll => {
            let force = !state.reveal.force_show_all();
            state.reveal.set_force_show_all(force);
            vec![ChorusEffect::RequestFrame]
        }
        UserAction::ToggleSilentPlaceholders => {
            state.customization.show_silent = !state.customization.show_silent;
            vec![ChorusEffect::RequestFrame]
        }
        UserAction::SetTheme(theme) => {
            state.customization.theme = theme;
            vec![ChorusEffect::RequestFrame]
        }
        UserAction::CycleTheme => {
            state.customization.theme = state.customization.theme.next();
            vec![ChorusEffect::RequestFrame]
        }
        UserAction::ClearConversation => {
            let reason = ClearReason::UserRequest;
            clear_conversation(state, reason);
            vec![
                ChorusEffect::Persist(PersistedChatEvent::ConversationCleared {
                    reason: reason.label().to_string(),
                }),
                ChorusEffect::RequestFrame,
            ]
        }
    }
}

fn send_message(state: &mut ChatState, text: String) -> Vec<ChorusEffect> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Vec::new();
    }
    if let Some(active) = state.streaming.clone() {
        state.log(
            LogLevel::Warn,
            LogSource::App,
            format!("reply {active} is still streaming; message not sent"),
        );
        return vec![ChorusEffect::RequestFrame];
    }

    let context = build_chat_context(state);
    state.snapshots.record_send(&state.speakers);

    let user_id = state.allocate_id(Author::User);
    state.messages.push(ChatMessage {
        id: user_id.clone(),
        author: Author::User,
        text: text.clone(),
        status: ReplyStatus::Complete,
    });

    let reply_id = state.allocate_id(Author::Assistant);
    state.messages.push(ChatMessage {
        id: reply_id.clone(),
        author: Author::Assistant,
        text: String::new(),
        status: ReplyStatus::Streaming,
    });
    state.streaming = Some(reply_id.clone());
    state.reveal.observe(&reply_id);
    sync_snapshots(state);

    let speakers = state.speakers_for(&reply_id).clone();
    tracing::debug!(reply = %reply_id, speakers = speakers.len(), "message sent");

    vec![
        ChorusEffect::Persist(PersistedChatEvent::UserMessage {
            id: user_id,
            text: text.clone(),
        }),
        ChorusEffect::RequestReply {
            id: reply_id,
            message: text,
            context,
            speakers,
            mode: state.mode,
        },
        ChorusEffect::RequestFrame,
    ]
}

fn reduce_runtime(state: &mut ChatState, action: RuntimeAction) -> Vec<ChorusEffect> {
    match action {
        RuntimeAction::AppendReplyChunk { id, chunk } => {
            match state.message_mut(&id) {
                Some(message) if message.status == ReplyStatus::Streaming => {
                    message.text.push_str(&chunk);
                }
                _ => {
                    tracing::debug!(reply = %id, "dropping chunk for inactive reply");
                    return Vec::new();
                }
            }
            state.reveal.observe(&id);
            sync_snapshots(state);
            vec![ChorusEffect::RequestFrame]
        }
        RuntimeAction::FinishReply { id } => {
            if !settle_reply(state, &id, ReplyStatus::Complete) {
                return Vec::new();
            }
            let mut effects = speak_effects(state, &id);
            effects.push(persist_reply(state, &id));
            effects.push(ChorusEffect::RequestFrame);
            effects
        }
        RuntimeAction::AbortReply { id, reason } => {
            if !settle_reply(state, &id, ReplyStatus::Aborted) {
                return Vec::new();
            }
            state.log(
                LogLevel::Warn,
                LogSource::Feed,
                format!("reply {id} aborted: {reason}"),
            );
            vec![persist_reply(state, &id), ChorusEffect::RequestFrame]
        }
        RuntimeAction::RevealTick { now } => {
            let Some(id) = state.reveal.message().cloned() else {
                return Vec::new();
            };
            let total = state
                .message(&id)
                .map_or(0, |message| reveal_total(state, message));
            if state.reveal.poll(now, total) {
                vec![ChorusEffect::RequestFrame]
            } else {
                Vec::new()
            }
        }
        RuntimeAction::LoadHistory(replayed) => {
            load_history(state, replayed);
            vec![ChorusEffect::RequestFrame]
        }
        RuntimeAction::ResetConversation(reason) => {
            clear_conversation(state, reason);
            vec![ChorusEffect::RequestFrame]
        }
        RuntimeAction::ClearLogs(reason) => {
            state.logs.clear();
            tracing::debug!(reason = reason.label(), "session log cleared");
            vec![ChorusEffect::RequestFrame]
        }
        RuntimeAction::AppendLog(value) => {
            state.log(LogLevel::Info, LogSource::App, value);
            Vec::new()
        }
        RuntimeAction::AppendStructuredLog(entry) => {
            state.logs.append(entry);
            Vec::new()
        }
    }
}

/// Moves a streaming reply to `status`. Returns false when `id` is not the
/// reply being streamed.
fn settle_reply(state: &mut ChatState, id: &MessageId, status: ReplyStatus) -> bool {
    match state.message_mut(id) {
        Some(message) if message.status == ReplyStatus::Streaming => {
            message.status = status;
        }
        _ => {
            tracing::debug!(reply = %id, status = status.label(), "ignoring settle for inactive reply");
            return false;
        }
    }
    if state.streaming.as_ref() == Some(id) {
        state.streaming = None;
    }
    sync_snapshots(state);
    true
}

fn speak_effects(state: &ChatState, id: &MessageId) -> Vec<ChorusEffect> {
    let Some(message) = state.message(id) else {
        return Vec::new();
    };
    let parsed = state.parse(message);
    if !parsed.is_multi_role() {
        let text = message.text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        return vec![ChorusEffect::Speak {
            message: id.clone(),
            role: None,
            voice: state.presenter.voice(""),
            text: text.to_string(),
        }];
    }

    let speakers = state.speakers_for(id);
    visible_blocks(&parsed, speakers, state.mode, state.roster())
        .into_iter()
        .filter(|block| !block.text.is_empty())
        .map(|block| ChorusEffect::Speak {
            message: id.clone(),
            role: Some(block.role.clone()),
            voice: state.presenter.voice(&block.role),
            text: block.text.clone(),
        })
        .collect()
}

fn persist_reply(state: &ChatState, id: &MessageId) -> ChorusEffect {
    let (text, status) = state
        .message(id)
        .map_or((String::new(), ReplyStatus::Aborted), |message| {
            (message.text.clone(), message.status)
        });
    ChorusEffect::Persist(PersistedChatEvent::AssistantMessage {
        id: id.clone(),
        text,
        status,
        speakers: state.snapshots.get(id).cloned(),
    })
}

fn load_history(state: &mut ChatState, replayed: ReplayedConversation) {
    if let Some(mode) = replayed.mode {
        if mode != state.mode {
            state.log(
                LogLevel::Warn,
                LogSource::App,
                format!(
                    "history was recorded in {} mode; showing it in {} mode",
                    mode.label(),
                    state.mode.label()
                ),
            );
        }
    }

    state.snapshots.clear();
    for (id, speakers) in replayed.snapshots {
        state.snapshots.restore(id, speakers);
    }
    state.reserve_ids_after(&replayed.messages);
    state.messages = replayed.messages;
    state.streaming = None;
    state.reveal.reset();

    let unbound = sync_snapshots(state);
    if unbound > 0 {
        state.log(
            LogLevel::Debug,
            LogSource::Speakers,
            format!("{unbound} restored replies had no speaker snapshot; using live speakers"),
        );
    }
    let count = state.messages.len();
    state.log(
        LogLevel::Info,
        LogSource::App,
        format!("restored {count} messages"),
    );
}

fn clear_conversation(state: &mut ChatState, reason: ClearReason) {
    state.messages.clear();
    state.snapshots.clear();
    state.streaming = None;
    state.reveal.reset();
    state.logs.clear();
    state.log(
        LogLevel::Info,
        LogSource::App,
        format!("conversation cleared ({})", reason.label()),
    );
}

fn sync_snapshots(state: &mut ChatState) -> usize {
    state.bind_snapshots()
}

fn build_chat_context(state: &ChatState) -> Option<String> {
    let recent: Vec<&ChatMessage> = state
        .messages
        .iter()
        .filter(|message| message.status == ReplyStatus::Complete && !message.text.is_empty())
        .collect();
    let start = recent.len().saturating_sub(CONTEXT_MESSAGES);

    let mut context = String::new();
    for message in &recent[start..] {
        let line = format!("{}: {}\n", message.author.label(), message.text.trim());
        if context.len() + line.len() > MAX_CONTEXT_CHARS {
            context.push_str("... (truncated)\n");
            break;
        }
        context.push_str(&line);
    }

    if context.is_empty() {
        None
    } else {
        Some(context)
    }
}

#[cfg(test)]
mod tests;
