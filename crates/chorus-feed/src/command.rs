use std::io::Read;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::thread;

use chorus_core::Roster;

use crate::contracts::FeedEvent;
use crate::contracts::ReplyRequest;
use crate::prompt::build_ensemble_prompt;
use crate::source::ReplySource;

pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:7b";

/// Streams a reply from a local CLI model. The ensemble prompt is passed as
/// the last argument and stdout is forwarded as it arrives.
#[derive(Debug, Clone)]
pub struct CommandReplySource {
    label: String,
    program: String,
    args: Vec<String>,
    roster: Arc<Roster>,
}

impl CommandReplySource {
    pub fn new<I, S>(program: impl Into<String>, args: I, roster: Arc<Roster>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        Self {
            label: program.clone(),
            program,
            args: args.into_iter().map(Into::into).collect(),
            roster,
        }
    }

    pub fn ollama(model: Option<&str>, roster: Arc<Roster>) -> Self {
        let model = model.unwrap_or(DEFAULT_OLLAMA_MODEL);
        let mut source = Self::new("ollama", ["run", "--nowordwrap", model], roster);
        source.label = format!("ollama ({model})");
        source
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(prompt);
        cmd
    }
}

impl ReplySource for CommandReplySource {
    fn label(&self) -> &str {
        &self.label
    }

    fn stream(&self, request: &ReplyRequest, sink: &dyn Fn(FeedEvent)) {
        let prompt = build_ensemble_prompt(request, &self.roster);
        stream_command_output(self.command(&prompt), &self.label, sink);
    }
}

fn stream_command_output(mut cmd: Command, label: &str, sink: &dyn Fn(FeedEvent)) {
    let spawn = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match spawn {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!(%err, source = label, "failed to start reply source");
            sink(FeedEvent::Meta(format!("failed to start {label}: {err}")));
            sink(FeedEvent::Done);
            return;
        }
    };

    let stderr_handle = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut stderr_text = String::new();
            let _ = stderr.read_to_string(&mut stderr_text);
            stderr_text
        })
    });

    let mut emitted = false;
    if let Some(mut stdout) = child.stdout.take() {
        let mut buf = [0_u8; 2048];
        let mut pending: Vec<u8> = Vec::new();
        let mut carry = String::new();
        loop {
            match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    carry.push_str(&take_utf8_prefix(&mut pending));
                    let text = take_ready_text(&mut carry);
                    let chunk = strip_ansi_sequences(&text);
                    if !chunk.is_empty() {
                        emitted = true;
                        sink(FeedEvent::Chunk(chunk));
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, source = label, "reply stream read failed");
                    break;
                }
            }
        }
        if !pending.is_empty() || !carry.is_empty() {
            carry.push_str(&String::from_utf8_lossy(&pending));
            let chunk = strip_ansi_sequences(&carry);
            if !chunk.is_empty() {
                emitted = true;
                sink(FeedEvent::Chunk(chunk));
            }
        }
    }

    let status = child.wait().ok();
    let stderr_text = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
        .trim()
        .to_string();

    if !status.is_some_and(|s| s.success()) {
        let msg = if stderr_text.is_empty() {
            format!("{label} exited with a non-zero status")
        } else {
            format!("{label} error: {stderr_text}")
        };
        sink(FeedEvent::Meta(msg));
    } else if !emitted {
        sink(FeedEvent::Meta(format!("{label} returned an empty reply")));
    }

    sink(FeedEvent::Done);
}

/// Splits off the longest valid UTF-8 prefix of `pending`, leaving a trailing
/// partial character for the next read.
fn take_utf8_prefix(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            return text;
        }
    };
    let rest = pending.split_off(valid);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

/// Splits off everything before an escape sequence that is still missing its
/// final byte. The unfinished tail stays in `carry` for the next read.
fn take_ready_text(carry: &mut String) -> String {
    match unfinished_escape_start(carry) {
        Some(start) => {
            let tail = carry.split_off(start);
            std::mem::replace(carry, tail)
        }
        None => std::mem::take(carry),
    }
}

fn unfinished_escape_start(text: &str) -> Option<usize> {
    let start = text.rfind('\u{1b}')?;
    let after = &text[start + 1..];
    let Some(params) = after.strip_prefix('[') else {
        return after.is_empty().then_some(start);
    };
    if params.chars().any(|c| ('@'..='~').contains(&c)) {
        None
    } else {
        Some(start)
    }
}

fn strip_ansi_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                let _ = chars.next();
                for n in chars.by_ref() {
                    if ('@'..='~').contains(&n) {
                        break;
                    }
                }
            }
            continue;
        }
        if c == '\r' {
            continue;
        }
        out.push(c);
    }
    out
}
