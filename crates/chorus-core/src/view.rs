//! Render-ready projection of chat messages.
//!
//! Views are rebuilt from [`ChatState`] on every frame and hold no state of
//! their own, so the TUI and the `render` subcommand draw from the same data.

use serde::Serialize;

use crate::parser::ParsedReply;
use crate::parser::RoleBlock;
use crate::resolver::silent_roles;
use crate::resolver::RolePresenter;
use crate::roster::ConversationMode;
use crate::roster::RoleColor;
use crate::roster::Roster;
use crate::speakers::AllowList;
use crate::speakers::MessageId;
use crate::state::Author;
use crate::state::ChatMessage;
use crate::state::ChatState;
use crate::state::ReplyStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockView {
    pub role: String,
    pub label: String,
    pub emoji: String,
    pub color: RoleColor,
    pub avatar: Option<String>,
    pub voice: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SilentView {
    pub role: String,
    pub label: String,
    pub emoji: String,
    pub color: RoleColor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: MessageId,
    pub author: Author,
    pub status: ReplyStatus,
    pub intro: String,
    pub blocks: Vec<BlockView>,
    /// Visible blocks still held back by the reveal.
    pub pending_blocks: usize,
    pub silent: Vec<SilentView>,
    pub outro: String,
    /// No role attribution; `intro` carries the whole text.
    pub plain: bool,
}

/// Blocks a reply may show under `speakers`. Themed replies hide roles outside
/// the allow-list; generic replies show every block.
pub fn visible_blocks<'a>(
    parsed: &'a ParsedReply,
    speakers: &AllowList,
    mode: ConversationMode,
    roster: &Roster,
) -> Vec<&'a RoleBlock> {
    match mode {
        ConversationMode::Generic => parsed.roles.iter().collect(),
        ConversationMode::Themed => {
            let allowed: Vec<String> = speakers
                .iter()
                .map(|role| roster.canonical_or_raw(role, mode))
                .collect();
            parsed
                .roles
                .iter()
                .filter(|block| allowed.contains(&roster.canonical_or_raw(&block.role, mode)))
                .collect()
        }
    }
}

/// Number of blocks the reveal walks through for `message`.
pub fn reveal_total(state: &ChatState, message: &ChatMessage) -> usize {
    if !message.is_assistant() {
        return 0;
    }
    let parsed = state.parse(message);
    let speakers = state.speakers_for(&message.id);
    visible_blocks(&parsed, speakers, state.mode, state.roster()).len()
}

pub fn block_view(presenter: &dyn RolePresenter, block: &RoleBlock) -> BlockView {
    BlockView {
        role: block.role.clone(),
        label: presenter.label(&block.role),
        emoji: presenter.emoji(&block.role),
        color: presenter.color(&block.role),
        avatar: presenter.avatar(&block.role),
        voice: presenter.voice(&block.role),
        text: block.text.clone(),
    }
}

fn silent_view(presenter: &dyn RolePresenter, role: &str) -> SilentView {
    SilentView {
        role: role.to_string(),
        label: presenter.label(role),
        emoji: presenter.emoji(role),
        color: presenter.color(role),
    }
}

pub fn project_message(state: &ChatState, message: &ChatMessage) -> MessageView {
    let mut view = MessageView {
        id: message.id.clone(),
        author: message.author,
        status: message.status,
        intro: String::new(),
        blocks: Vec::new(),
        pending_blocks: 0,
        silent: Vec::new(),
        outro: String::new(),
        plain: true,
    };

    let parsed = state.parse(message);
    if !message.is_assistant() || !parsed.is_multi_role() {
        view.intro = message.text.trim().to_string();
        return view;
    }

    let presenter = state.presenter.as_ref();
    let roster = state.roster();
    let speakers = state.speakers_for(&message.id);
    let visible = visible_blocks(&parsed, speakers, state.mode, roster);

    // Only the message the reveal is tracking is sliced; history shows in full.
    let shown = if state.reveal.message() == Some(&message.id) {
        state.reveal.visible_count(visible.len())
    } else {
        visible.len()
    };

    view.plain = false;
    view.intro = parsed.intro.clone();
    view.blocks = visible
        .iter()
        .take(shown)
        .map(|block| block_view(presenter, block))
        .collect();
    view.pending_blocks = visible.len() - shown;

    if view.pending_blocks == 0 {
        view.outro = parsed.outro.clone();
    }

    if message.status != ReplyStatus::Streaming && state.customization.show_silent {
        let spoken = visible.iter().map(|block| block.role.as_str());
        view.silent = silent_roles(speakers, spoken, state.mode, roster)
            .iter()
            .map(|role| silent_view(presenter, role))
            .collect();
    }

    view
}

pub fn project_conversation(state: &ChatState) -> Vec<MessageView> {
    state
        .messages
        .iter()
        .map(|message| project_message(state, message))
        .collect()
}
