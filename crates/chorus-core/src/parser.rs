//! Decomposes one freeform model reply into intro, attributed role blocks and
//! outro.
//!
//! Line classification drives a three-state machine:
//!
//! ```text
//!             tag                     marker
//! Preamble ─────────▶ InRole ─────────────────▶ InOutro
//!    │                 ▲  │ tag (close + open)     │
//!    │ marker          │  └────────┘               │ tag, under SummaryPolicy::Reopen
//!    └─────────────────┼──────────▶ InOutro ───────┘
//! ```
//!
//! The parser keeps no state between calls, so re-parsing a growing stream
//! prefix on every chunk is safe: a block only closes when a later tag shows
//! up, and closed blocks never change text again.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Captures;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ChorusError;
use crate::error::ChorusResult;
use crate::roster::ConversationMode;
use crate::roster::Roster;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleBlock {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedReply {
    pub intro: String,
    pub roles: Vec<RoleBlock>,
    pub outro: String,
}

impl ParsedReply {
    /// Reply with no attribution at all: everything is intro.
    pub fn plain(text: &str) -> Self {
        Self {
            intro: text.trim().to_string(),
            roles: Vec::new(),
            outro: String::new(),
        }
    }

    pub fn is_multi_role(&self) -> bool {
        !self.roles.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.intro.is_empty() && self.roles.is_empty() && self.outro.is_empty()
    }
}

/// What a role tag after a summary marker does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryPolicy {
    /// The summary runs to the end of the reply; later tags are summary text.
    #[default]
    Terminal,
    /// A later tag closes the summary and resumes role parsing.
    Reopen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    pub summary: SummaryPolicy,
}

const SUMMARY_MARKERS: &[&str] = &[
    "总而言之",
    "综上所述",
    "总结一下",
    "in conclusion",
    "in summary",
    "conclusion",
    "summary",
    "总结",
    "小结",
    "综上",
];

// Bullets, quote markers, numbered items and headings, in any mix.
const DECORATION: &str = r"(?:[-*+•>]\s*|#{1,6}\s*|\d{1,3}[.)、]\s*)*";
const EMPHASIS: &str = r"(?:\*\*|__|\*|_)?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Tag,
    Marker,
    Plain,
}

#[derive(Debug)]
enum Line<'a> {
    Tag { role: String, rest: &'a str },
    Marker { rest: &'a str },
    Plain(&'a str),
}

impl Line<'_> {
    fn kind(&self) -> LineKind {
        match self {
            Self::Tag { .. } => LineKind::Tag,
            Self::Marker { .. } => LineKind::Marker,
            Self::Plain(_) => LineKind::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    InRole,
    InOutro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    AppendIntro,
    AppendRole,
    AppendOutro,
    OpenRole,
    EnterOutro,
}

fn transition(state: State, kind: LineKind, policy: SummaryPolicy) -> (State, Effect) {
    match (state, kind, policy) {
        (State::Preamble, LineKind::Plain, _) => (State::Preamble, Effect::AppendIntro),
        (State::Preamble, LineKind::Tag, _) => (State::InRole, Effect::OpenRole),
        (State::Preamble, LineKind::Marker, _) => (State::InOutro, Effect::EnterOutro),

        (State::InRole, LineKind::Plain, _) => (State::InRole, Effect::AppendRole),
        (State::InRole, LineKind::Tag, _) => (State::InRole, Effect::OpenRole),
        (State::InRole, LineKind::Marker, _) => (State::InOutro, Effect::EnterOutro),

        (State::InOutro, LineKind::Plain, _) => (State::InOutro, Effect::AppendOutro),
        (State::InOutro, _, SummaryPolicy::Terminal) => (State::InOutro, Effect::AppendOutro),
        (State::InOutro, LineKind::Tag, SummaryPolicy::Reopen) => {
            (State::InRole, Effect::OpenRole)
        }
        (State::InOutro, LineKind::Marker, SummaryPolicy::Reopen) => {
            (State::InOutro, Effect::EnterOutro)
        }
    }
}

struct Machine<'a> {
    state: State,
    policy: SummaryPolicy,
    intro: Vec<&'a str>,
    outro: Vec<&'a str>,
    open: Option<(String, Vec<&'a str>)>,
    blocks: Vec<RoleBlock>,
}

impl<'a> Machine<'a> {
    fn new(policy: SummaryPolicy) -> Self {
        Self {
            state: State::Preamble,
            policy,
            intro: Vec::new(),
            outro: Vec::new(),
            open: None,
            blocks: Vec::new(),
        }
    }

    fn feed(&mut self, raw: &'a str, line: Line<'a>) {
        let (next, effect) = transition(self.state, line.kind(), self.policy);
        match (effect, line) {
            (Effect::AppendIntro, _) => self.intro.push(raw),
            (Effect::AppendOutro, _) => self.outro.push(raw),
            (Effect::AppendRole, _) => {
                if let Some((_, lines)) = self.open.as_mut() {
                    lines.push(raw);
                }
            }
            (Effect::OpenRole, Line::Tag { role, rest }) => {
                self.close_role();
                self.open = Some((role, vec![rest]));
            }
            (Effect::EnterOutro, Line::Marker { rest }) => {
                self.close_role();
                self.outro.push(rest);
            }
            // The table only pairs OpenRole with tags and EnterOutro with
            // markers.
            (Effect::OpenRole | Effect::EnterOutro, _) => {}
        }
        self.state = next;
    }

    fn close_role(&mut self) {
        if let Some((role, lines)) = self.open.take() {
            self.blocks.push(RoleBlock {
                role,
                text: lines.join("\n").trim().to_string(),
            });
        }
    }

    fn finish(mut self) -> ParsedReply {
        self.close_role();
        ParsedReply {
            intro: self.intro.join("\n").trim().to_string(),
            roles: self.blocks,
            outro: self.outro.join("\n").trim().to_string(),
        }
    }
}

/// Reply parser bound to one roster's alphabets.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    roster: Arc<Roster>,
    options: ParserOptions,
    role_tag: Regex,
    summary_marker: Regex,
}

impl ReplyParser {
    pub fn new(roster: Arc<Roster>, options: ParserOptions) -> ChorusResult<Self> {
        let mut tokens: Vec<&str> = roster.tokens().filter(|token| !token.is_empty()).collect();
        tokens.sort_by_key(|token| std::cmp::Reverse(token.chars().count()));
        let alternation = tokens
            .iter()
            .map(|token| regex::escape(token))
            .collect::<Vec<_>>()
            .join("|");
        let role_tag = Regex::new(&format!(
            r"(?i)^(?P<lead>\s*{DECORATION}{EMPHASIS})\s*(?P<token>{alternation})\s*(?P<close>{EMPHASIS})\s*[:：]\s*(?P<rest>.*)$"
        ))
        .map_err(|err| ChorusError::InvalidRoster(format!("role tag pattern: {err}")))?;

        let markers = SUMMARY_MARKERS
            .iter()
            .map(|marker| regex::escape(marker))
            .collect::<Vec<_>>()
            .join("|");
        let summary_marker = Regex::new(&format!(
            r"(?i)^(?P<lead>\s*{DECORATION}{EMPHASIS})\s*(?:{markers})\s*(?P<close>{EMPHASIS})\s*(?:[:：]\s*(?P<rest>.*)|$)"
        ))
        .map_err(|err| ChorusError::InvalidRoster(format!("summary pattern: {err}")))?;

        Ok(Self {
            roster,
            options,
            role_tag,
            summary_marker,
        })
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn parse(&self, text: &str, mode: ConversationMode) -> ParsedReply {
        let mut machine = Machine::new(self.options.summary);
        let mut line_count = 0_usize;
        for raw in text.lines() {
            line_count += 1;
            let line = self.classify(raw, mode);
            machine.feed(raw, line);
        }
        let parsed = machine.finish();
        tracing::trace!(
            mode = mode.label(),
            lines = line_count,
            roles = parsed.roles.len(),
            has_outro = !parsed.outro.is_empty(),
            "parsed reply"
        );
        parsed
    }

    fn classify<'a>(&self, raw: &'a str, mode: ConversationMode) -> Line<'a> {
        if let Some(caps) = self.role_tag.captures(raw) {
            if let (Some(token), Some(rest)) = (caps.name("token"), caps.name("rest")) {
                if let Some(role) = self.roster.canonicalize(token.as_str(), mode) {
                    return Line::Tag {
                        role,
                        rest: tag_remainder(&caps, rest.as_str()),
                    };
                }
            }
        }
        if let Some(caps) = self.summary_marker.captures(raw) {
            let rest = caps
                .name("rest")
                .map_or("", |rest| tag_remainder(&caps, rest.as_str()));
            return Line::Marker { rest };
        }
        Line::Plain(raw)
    }
}

/// Emphasis run touching the start of a tag, as in `**INTJ`. A run followed by
/// whitespace is a bullet, not emphasis.
fn opening_emphasis(lead: &str) -> &str {
    if lead.ends_with(char::is_whitespace) {
        return "";
    }
    let bare = lead.trim_end_matches(['*', '_']);
    &lead[bare.len()..]
}

/// Text after a tag's colon. An emphasis opened before the tag and closed only
/// after the colon (`**ESTJ：** text`) is dropped; any other emphasis belongs
/// to the content.
fn tag_remainder<'a>(caps: &Captures<'_>, rest: &'a str) -> &'a str {
    let closed_before_colon = caps.name("close").is_some_and(|close| !close.as_str().is_empty());
    let opener = caps.name("lead").map_or("", |lead| opening_emphasis(lead.as_str()));
    if closed_before_colon || opener.is_empty() {
        return rest.trim();
    }
    rest.strip_prefix(opener).unwrap_or(rest).trim()
}

static BUILTIN_PARSER: OnceLock<Option<ReplyParser>> = OnceLock::new();

/// Parses `text` with the built-in roster and default options.
pub fn parse_reply(text: &str, mode: ConversationMode) -> ParsedReply {
    let parser = BUILTIN_PARSER.get_or_init(|| {
        ReplyParser::new(Roster::builtin(), ParserOptions::default())
            .map_err(|err| tracing::warn!(error = %err, "builtin reply parser unavailable"))
            .ok()
    });
    match parser {
        Some(parser) => parser.parse(text, mode),
        None => ParsedReply::plain(text),
    }
}
