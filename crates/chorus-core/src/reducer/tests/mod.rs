pub(super) use std::time::Duration;
pub(super) use std::time::Instant;

pub(super) use super::reduce;
pub(super) use super::ChorusEffect;
pub(super) use crate::actions::ChatAction;
pub(super) use crate::actions::RuntimeAction;
pub(super) use crate::actions::UserAction;
pub(super) use crate::parser::ParserOptions;
pub(super) use crate::parser::ReplyParser;
pub(super) use crate::persistence::PersistedChatEvent;
pub(super) use crate::persistence::ReplayedConversation;
pub(super) use crate::reveal::RevealController;
pub(super) use crate::roster::ConversationMode;
pub(super) use crate::roster::Roster;
pub(super) use crate::speakers::AllowList;
pub(super) use crate::speakers::MessageId;
pub(super) use crate::state::Author;
pub(super) use crate::state::ChatMessage;
pub(super) use crate::state::ChatState;
pub(super) use crate::state::ClearReason;
pub(super) use crate::state::LogBuffer;
pub(super) use crate::state::LogEntry;
pub(super) use crate::state::LogLevel;
pub(super) use crate::state::LogSource;
pub(super) use crate::state::ReplyStatus;
pub(super) use crate::view::project_message;

mod projection;
mod reply_lifecycle;
mod reveal_flow;

const TICK: Duration = Duration::from_millis(100);

fn state(mode: ConversationMode) -> ChatState {
    let parser =
        ReplyParser::new(Roster::builtin(), ParserOptions::default()).expect("builtin parser");
    let mut state = ChatState::new("test", mode, parser);
    state.reveal = RevealController::new(TICK);
    state
}

fn themed() -> ChatState {
    state(ConversationMode::Themed)
}

fn generic() -> ChatState {
    state(ConversationMode::Generic)
}

fn run_user(state: &mut ChatState, action: UserAction) -> Vec<ChorusEffect> {
    reduce(state, ChatAction::User(action))
}

fn run_runtime(state: &mut ChatState, action: RuntimeAction) -> Vec<ChorusEffect> {
    reduce(state, ChatAction::Runtime(action))
}

fn set_speakers(state: &mut ChatState, roles: &[&str]) {
    run_user(
        state,
        UserAction::SetSpeakers(roles.iter().map(|role| role.to_string()).collect()),
    );
}

/// Sends `text` and returns the id of the assistant message it opened.
fn send(state: &mut ChatState, text: &str) -> MessageId {
    let effects = run_user(state, UserAction::SendMessage(text.to_string()));
    effects
        .into_iter()
        .find_map(|effect| match effect {
            ChorusEffect::RequestReply { id, .. } => Some(id),
            _ => None,
        })
        .expect("send requests a reply")
}

fn stream(state: &mut ChatState, id: &MessageId, chunk: &str) -> Vec<ChorusEffect> {
    run_runtime(
        state,
        RuntimeAction::AppendReplyChunk {
            id: id.clone(),
            chunk: chunk.to_string(),
        },
    )
}

fn finish(state: &mut ChatState, id: &MessageId) -> Vec<ChorusEffect> {
    run_runtime(state, RuntimeAction::FinishReply { id: id.clone() })
}

/// Full send/stream/finish round with one chunk.
fn exchange(state: &mut ChatState, prompt: &str, reply: &str) -> MessageId {
    let id = send(state, prompt);
    stream(state, &id, reply);
    finish(state, &id);
    id
}

fn tick(state: &mut ChatState, now: Instant) -> Vec<ChorusEffect> {
    run_runtime(state, RuntimeAction::RevealTick { now })
}

fn labels(state: &ChatState, id: &MessageId) -> Vec<String> {
    let message = state.message(id).expect("message exists");
    project_message(state, message)
        .blocks
        .into_iter()
        .map(|block| block.label)
        .collect()
}
