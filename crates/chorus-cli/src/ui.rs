use std::collections::HashMap;
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;

use chorus_core::actions::{ChatAction, RuntimeAction, UserAction};
use chorus_core::persistence::ConversationStore;
use chorus_core::reducer::{reduce, ChorusEffect};
use chorus_core::roster::RoleColor;
use chorus_core::speakers::MessageId;
use chorus_core::state::{
    Author, ChatState, LogEntry, LogLevel, LogSource, ReplyStatus, UiTheme,
};
use chorus_core::view::{project_conversation, MessageView};
use chorus_feed::contracts::{FeedEvent, ReplyRequest};
use chorus_feed::source::{spawn_reply, ReplySource};

const SPEAKER_SLOTS: usize = 5;
const LOG_PANEL_LINES: usize = 4;

struct TuiGuard;

impl Drop for TuiGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
    }
}

pub fn run(
    mut state: ChatState,
    store: &mut ConversationStore,
    source: Arc<dyn ReplySource>,
) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, crossterm::cursor::Hide)?;
    let _guard = TuiGuard;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    run_app(&mut terminal, &mut state, store, source).map_err(|e| e.into())
}

/// Everything the event loop needs besides the state itself.
struct Session<'a> {
    store: &'a mut ConversationStore,
    source: Arc<dyn ReplySource>,
    tx: mpsc::Sender<(MessageId, FeedEvent)>,
    /// Last diagnostic per reply, used as the abort reason for empty replies.
    feed_notes: HashMap<MessageId, String>,
    input: String,
}

impl Session<'_> {
    fn apply(&mut self, state: &mut ChatState, effects: Vec<ChorusEffect>) {
        for effect in effects {
            match &effect {
                ChorusEffect::RequestFrame => {}
                ChorusEffect::RequestReply { .. } => {
                    if let Some(request) = ReplyRequest::from_effect(&effect) {
                        spawn_reply(Arc::clone(&self.source), request, self.tx.clone());
                    }
                }
                ChorusEffect::Speak {
                    message,
                    role,
                    voice,
                    text,
                } => {
                    tracing::info!(
                        reply = %message,
                        role = role.as_deref().unwrap_or("narrator"),
                        voice = voice.as_str(),
                        chars = text.chars().count(),
                        "speak"
                    );
                }
                ChorusEffect::Persist(event) => {
                    if let Err(err) = self.store.append(event.clone()) {
                        tracing::warn!(%err, kind = event.label(), "failed to persist record");
                        state.log(
                            LogLevel::Error,
                            LogSource::App,
                            format!("could not save {}: {err}", event.label()),
                        );
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, state: &mut ChatState, action: ChatAction) {
        let effects = reduce(state, action);
        self.apply(state, effects);
    }

    fn feed_action(&mut self, state: &ChatState, id: MessageId, event: FeedEvent) -> ChatAction {
        match event {
            FeedEvent::Chunk(chunk) => {
                ChatAction::Runtime(RuntimeAction::AppendReplyChunk { id, chunk })
            }
            FeedEvent::Meta(note) => {
                self.feed_notes.insert(id, note.clone());
                ChatAction::Runtime(RuntimeAction::AppendStructuredLog(LogEntry::new(
                    LogLevel::Warn,
                    LogSource::Feed,
                    note,
                )))
            }
            FeedEvent::Done => {
                let note = self.feed_notes.remove(&id);
                let empty = state
                    .message(&id)
                    .map_or(true, |message| message.text.trim().is_empty());
                if empty {
                    let reason = note.unwrap_or_else(|| "no output".to_string());
                    ChatAction::Runtime(RuntimeAction::AbortReply { id, reason })
                } else {
                    ChatAction::Runtime(RuntimeAction::FinishReply { id })
                }
            }
        }
    }
}

enum KeyHandlerResult {
    Continue(Option<ChatAction>),
    Exit,
}

/// Maps a submitted input line to an action. Lines starting with `/` are
/// commands; anything else is sent to the ensemble.
fn input_action(line: &str) -> Option<UserAction> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let action = match command {
        "/clear" => UserAction::ClearConversation,
        "/theme" => UserAction::CycleTheme,
        "/all" => UserAction::ToggleForceShowAll,
        "/silent" => UserAction::ToggleSilentPlaceholders,
        "/speakers" => UserAction::SetSpeakers(
            rest.split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        "/toggle" if !rest.is_empty() => UserAction::ToggleSpeaker(rest.to_string()),
        _ => UserAction::SendMessage(line.to_string()),
    };
    Some(action)
}

/// Speaker bound to function key `slot` (zero-based): the roster's personas
/// in themed mode, their archetype codes in generic mode.
fn speaker_for_slot(state: &ChatState, slot: usize) -> Option<String> {
    if slot >= SPEAKER_SLOTS {
        return None;
    }
    state.roster().default_speakers(state.mode).get(slot).cloned()
}

fn handle_key_event(
    key: event::KeyEvent,
    state: &ChatState,
    input: &mut String,
) -> KeyHandlerResult {
    if key.kind != KeyEventKind::Press {
        return KeyHandlerResult::Continue(None);
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let action = match key.code {
        KeyCode::Esc => return KeyHandlerResult::Exit,
        KeyCode::Char('c') if ctrl => return KeyHandlerResult::Exit,
        KeyCode::Char('a') if ctrl => Some(UserAction::ToggleForceShowAll),
        KeyCode::Char('t') if ctrl => Some(UserAction::CycleTheme),
        KeyCode::Char('l') if ctrl => Some(UserAction::ClearConversation),
        KeyCode::Char('s') if ctrl => Some(UserAction::ToggleSilentPlaceholders),
        KeyCode::F(n) if n >= 1 => {
            speaker_for_slot(state, usize::from(n - 1)).map(UserAction::ToggleSpeaker)
        }
        KeyCode::Char(c @ '1'..='9') if alt => {
            let slot = c as usize - '1' as usize;
            speaker_for_slot(state, slot).map(UserAction::ToggleSpeaker)
        }
        KeyCode::Enter => input_action(&std::mem::take(input)),
        KeyCode::Backspace => {
            input.pop();
            None
        }
        KeyCode::Char(c) if !ctrl => {
            input.push(c);
            None
        }
        _ => None,
    };
    KeyHandlerResult::Continue(action.map(ChatAction::User))
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    state: &mut ChatState,
    store: &mut ConversationStore,
    source: Arc<dyn ReplySource>,
) -> io::Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut session = Session {
        store,
        source,
        tx,
        feed_notes: HashMap::new(),
        input: String::new(),
    };
    session.dispatch(
        state,
        ChatAction::Runtime(RuntimeAction::AppendLog(format!(
            "replies from {}",
            session.source.label()
        ))),
    );

    loop {
        while let Ok((id, event)) = rx.try_recv() {
            let action = session.feed_action(state, id, event);
            session.dispatch(state, action);
        }
        session.dispatch(
            state,
            ChatAction::Runtime(RuntimeAction::RevealTick {
                now: Instant::now(),
            }),
        );

        terminal.draw(|f| ui(f, state, &session.input, session.source.label()))?;

        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                match handle_key_event(key, state, &mut session.input) {
                    KeyHandlerResult::Continue(Some(action)) => session.dispatch(state, action),
                    KeyHandlerResult::Continue(None) => {}
                    KeyHandlerResult::Exit => break,
                }
            }
        }
    }

    if let Some(id) = state.streaming.clone() {
        session.dispatch(
            state,
            ChatAction::Runtime(RuntimeAction::AbortReply {
                id,
                reason: "session closed".to_string(),
            }),
        );
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct UiPalette {
    accent: Color,
    accent_alt: Color,
    warning: Color,
    danger: Color,
    muted: Color,
    border: Color,
    panel_bg: Color,
}

fn palette_for(theme: UiTheme) -> UiPalette {
    match theme {
        UiTheme::Classic => UiPalette {
            accent: Color::Cyan,
            accent_alt: Color::Blue,
            warning: Color::Yellow,
            danger: Color::Red,
            muted: Color::DarkGray,
            border: Color::Gray,
            panel_bg: Color::Black,
        },
        UiTheme::Cyberpunk => UiPalette {
            accent: Color::Magenta,
            accent_alt: Color::Cyan,
            warning: Color::LightYellow,
            danger: Color::LightRed,
            muted: Color::Gray,
            border: Color::Magenta,
            panel_bg: Color::Black,
        },
        UiTheme::NeonNoir => UiPalette {
            accent: Color::LightBlue,
            accent_alt: Color::LightCyan,
            warning: Color::Yellow,
            danger: Color::LightRed,
            muted: Color::Gray,
            border: Color::LightBlue,
            panel_bg: Color::Black,
        },
        UiTheme::SolarFlare => UiPalette {
            accent: Color::LightYellow,
            accent_alt: Color::LightRed,
            warning: Color::Yellow,
            danger: Color::Red,
            muted: Color::Gray,
            border: Color::Yellow,
            panel_bg: Color::Black,
        },
        UiTheme::ForestZen => UiPalette {
            accent: Color::LightGreen,
            accent_alt: Color::Green,
            warning: Color::Yellow,
            danger: Color::Red,
            muted: Color::Gray,
            border: Color::LightGreen,
            panel_bg: Color::Black,
        },
    }
}

fn role_color(color: RoleColor) -> Color {
    Color::Rgb(color.r, color.g, color.b)
}

fn push_text_lines(lines: &mut Vec<Line<'static>>, text: &str, style: Style) {
    for line in text.lines() {
        lines.push(Line::from(Span::styled(line.to_string(), style)));
    }
}

fn render_message(lines: &mut Vec<Line<'static>>, view: &MessageView, palette: UiPalette) {
    let muted = Style::default().fg(palette.muted);
    if view.author == Author::User {
        lines.push(Line::from(Span::styled(
            Author::User.label(),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )));
        push_text_lines(lines, &view.intro, Style::default());
        return;
    }

    lines.push(Line::from(Span::styled(
        Author::Assistant.label(),
        Style::default()
            .fg(palette.accent_alt)
            .add_modifier(Modifier::BOLD),
    )));
    push_text_lines(lines, &view.intro, if view.plain { Style::default() } else { muted });

    for block in &view.blocks {
        let head = Style::default()
            .fg(role_color(block.color))
            .add_modifier(Modifier::BOLD);
        let mut text = block.text.lines();
        lines.push(Line::from(vec![
            Span::styled(format!("{} {}", block.emoji, block.label), head),
            Span::raw(": "),
            Span::raw(text.next().unwrap_or_default().to_string()),
        ]));
        for rest in text {
            lines.push(Line::from(format!("   {rest}")));
        }
    }

    if view.pending_blocks > 0 {
        lines.push(Line::from(Span::styled(
            format!("… {} more", view.pending_blocks),
            muted.add_modifier(Modifier::ITALIC),
        )));
    } else if view.status == ReplyStatus::Streaming && view.blocks.is_empty() && view.intro.is_empty()
    {
        lines.push(Line::from(Span::styled("…", muted)));
    }

    for silent in &view.silent {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{} {}", silent.emoji, silent.label),
                Style::default().fg(role_color(silent.color)),
            ),
            Span::styled(" · silent", muted.add_modifier(Modifier::ITALIC)),
        ]));
    }

    push_text_lines(lines, &view.outro, Style::default().fg(palette.accent));

    if view.status == ReplyStatus::Aborted {
        lines.push(Line::from(Span::styled(
            format!("[{}]", view.status.label()),
            Style::default().fg(palette.danger),
        )));
    }
}

fn build_transcript_lines(state: &ChatState, palette: UiPalette) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for view in project_conversation(state) {
        if !lines.is_empty() {
            lines.push(Line::default());
        }
        render_message(&mut lines, &view, palette);
    }
    lines
}

/// Rows `lines` occupy once wrapped to `width` columns.
fn wrapped_height(lines: &[Line<'_>], width: u16) -> usize {
    let width = usize::from(width.max(1));
    lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum()
}

fn ui(f: &mut ratatui::Frame, state: &ChatState, input: &str, source: &str) {
    let palette = palette_for(state.customization.theme);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),                                // Header
            Constraint::Min(0),                                   // Transcript
            Constraint::Length(LOG_PANEL_LINES as u16 + 2),      // Session log
            Constraint::Length(3),                                // Input
            Constraint::Length(1),                                // Footer
        ])
        .split(f.area());

    render_header(f, chunks[0], state, source, palette);
    render_transcript(f, chunks[1], state, palette);
    render_logs(f, chunks[2], state, palette);
    render_input(f, chunks[3], state, input, palette);
    render_footer(f, chunks[4], palette);
}

fn panel(title: &str, palette: UiPalette) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.border))
        .style(Style::default().bg(palette.panel_bg))
        .title(title.to_string())
}

fn render_header(
    f: &mut ratatui::Frame,
    area: Rect,
    state: &ChatState,
    source: &str,
    palette: UiPalette,
) {
    let mut spans = vec![
        Span::styled(
            state.title.to_string(),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("  {} mode", state.mode.label()), Style::default().fg(palette.muted)),
        Span::styled("  speakers ", Style::default().fg(palette.muted)),
    ];
    if state.speakers.is_empty() {
        spans.push(Span::styled("none", Style::default().fg(palette.warning)));
    }
    for (idx, speaker) in state.speakers.iter().enumerate() {
        if idx > 0 {
            spans.push(Span::raw(" "));
        }
        let presenter = state.presenter.as_ref();
        spans.push(Span::styled(
            format!("{}{}", presenter.emoji(speaker), presenter.label(speaker)),
            Style::default().fg(role_color(presenter.color(speaker))),
        ));
    }
    let reveal = if state.reveal.force_show_all() {
        "all at once"
    } else {
        "timed"
    };
    spans.push(Span::styled(
        format!(
            "  reveal {reveal}  theme {}  via {source}",
            state.customization.theme.label()
        ),
        Style::default().fg(palette.muted),
    ));

    let p = Paragraph::new(Line::from(spans)).block(panel("Chorus", palette));
    f.render_widget(p, area);
}

fn render_transcript(f: &mut ratatui::Frame, area: Rect, state: &ChatState, palette: UiPalette) {
    let lines = build_transcript_lines(state, palette);
    let inner_height = usize::from(area.height.saturating_sub(2));
    let total = wrapped_height(&lines, area.width.saturating_sub(2));
    let scroll = u16::try_from(total.saturating_sub(inner_height)).unwrap_or(u16::MAX);

    let title = if state.is_streaming() {
        "Conversation (replying…)"
    } else {
        "Conversation"
    };
    let p = Paragraph::new(lines)
        .block(panel(title, palette))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(p, area);
}

fn render_logs(f: &mut ratatui::Frame, area: Rect, state: &ChatState, palette: UiPalette) {
    let entries: Vec<&LogEntry> = state.logs.iter().rev().take(LOG_PANEL_LINES).collect();
    let lines: Vec<Line<'static>> = entries
        .into_iter()
        .rev()
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Debug => palette.muted,
                LogLevel::Info => palette.accent_alt,
                LogLevel::Warn => palette.warning,
                LogLevel::Error => palette.danger,
            };
            Line::from(vec![
                Span::styled(
                    format!("[{}] ", entry.level.label()),
                    Style::default().fg(color),
                ),
                Span::raw(entry.message.clone()),
            ])
        })
        .collect();
    let p = Paragraph::new(lines).block(panel("Session", palette));
    f.render_widget(p, area);
}

fn render_input(
    f: &mut ratatui::Frame,
    area: Rect,
    state: &ChatState,
    input: &str,
    palette: UiPalette,
) {
    let style = if state.is_streaming() {
        Style::default().fg(palette.muted)
    } else {
        Style::default()
    };
    let text = Line::from(vec![
        Span::styled("> ", Style::default().fg(palette.accent)),
        Span::styled(input.to_string(), style),
        Span::styled("█", Style::default().fg(palette.accent)),
    ]);
    let p = Paragraph::new(text).block(panel("Message", palette));
    f.render_widget(p, area);
}

fn render_footer(f: &mut ratatui::Frame, area: Rect, palette: UiPalette) {
    let key = |label: &'static str| Span::styled(label, Style::default().fg(palette.accent));
    let hint = |label: &'static str| Span::styled(label, Style::default().fg(palette.muted));
    let text = Line::from(vec![
        key("F1-F5"),
        hint(" speakers "),
        key("^A"),
        hint(" show all "),
        key("^S"),
        hint(" silent "),
        key("^T"),
        hint(" theme "),
        key("^L"),
        hint(" clear "),
        Span::styled("Esc", Style::default().fg(palette.warning)),
        hint(" quit"),
    ]);
    f.render_widget(Paragraph::new(text).alignment(Alignment::Center), area);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chorus_core::parser::{ParserOptions, ReplyParser};
    use chorus_core::persistence::ReplayedConversation;
    use chorus_core::reveal::RevealController;
    use chorus_core::roster::{ConversationMode, Roster};
    use chorus_core::state::ChatMessage;
    use crossterm::event::KeyEvent;
    use pretty_assertions::assert_eq;

    use super::*;

    fn state(mode: ConversationMode) -> ChatState {
        let parser =
            ReplyParser::new(Roster::builtin(), ParserOptions::default()).expect("parser");
        let mut state = ChatState::new("test", mode, parser);
        state.reveal = RevealController::new(Duration::from_millis(100));
        state
    }

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    #[test]
    fn slash_commands_map_to_actions() {
        assert_eq!(input_action("  "), None);
        assert_eq!(input_action("/clear"), Some(UserAction::ClearConversation));
        assert_eq!(
            input_action("/speakers 黎深, ISTJ"),
            Some(UserAction::SetSpeakers(vec![
                "黎深".to_string(),
                "ISTJ".to_string()
            ]))
        );
        assert_eq!(
            input_action("/toggle ENTP"),
            Some(UserAction::ToggleSpeaker("ENTP".to_string()))
        );
        assert_eq!(
            input_action(" hello there "),
            Some(UserAction::SendMessage("hello there".to_string()))
        );
    }

    #[test]
    fn function_keys_follow_roster_order() {
        let themed = state(ConversationMode::Themed);
        let generic = state(ConversationMode::Generic);
        let roster = Roster::builtin();

        assert_eq!(
            speaker_for_slot(&themed, 0).as_deref(),
            Some(roster.personas[0].name.as_str())
        );
        assert_eq!(
            speaker_for_slot(&generic, 0).as_deref(),
            Some(roster.personas[0].archetype.as_str())
        );
        assert_eq!(speaker_for_slot(&themed, SPEAKER_SLOTS), None);
    }

    #[test]
    fn typing_then_enter_submits_the_buffer() {
        let state = state(ConversationMode::Generic);
        let mut input = String::new();
        for c in "hi".chars() {
            let key = KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE);
            assert!(matches!(
                handle_key_event(key, &state, &mut input),
                KeyHandlerResult::Continue(None)
            ));
        }
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        match handle_key_event(enter, &state, &mut input) {
            KeyHandlerResult::Continue(Some(ChatAction::User(action))) => {
                assert_eq!(action, UserAction::SendMessage("hi".to_string()));
            }
            _ => panic!("expected a send"),
        }
        assert!(input.is_empty());
    }

    #[test]
    fn transcript_shows_labels_and_silent_roles() {
        let mut state = state(ConversationMode::Generic);
        reduce(
            &mut state,
            ChatAction::User(UserAction::SetSpeakers(vec![
                "INTJ".to_string(),
                "ENFP".to_string(),
            ])),
        );
        let replayed = ReplayedConversation {
            messages: vec![ChatMessage {
                id: MessageId::new("a-1"),
                author: Author::Assistant,
                text: "INTJ: plan it\nIn summary: go".to_string(),
                status: ReplyStatus::Complete,
            }],
            ..ReplayedConversation::default()
        };
        reduce(
            &mut state,
            ChatAction::Runtime(RuntimeAction::LoadHistory(replayed)),
        );

        let lines: Vec<String> = build_transcript_lines(&state, palette_for(UiTheme::Classic))
            .iter()
            .map(line_text)
            .collect();
        assert!(lines.iter().any(|line| line.ends_with("INTJ: plan it")));
        assert!(lines.iter().any(|line| line.contains("ENFP · silent")));
        assert_eq!(lines.last().map(String::as_str), Some("go"));
    }

    #[test]
    fn wrapped_height_counts_soft_wraps() {
        let lines = vec![Line::from("abcdef"), Line::default(), Line::from("abc")];
        assert_eq!(wrapped_height(&lines, 3), 4);
    }
}
