use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use chorus_core::MessageId;

use crate::contracts::FeedEvent;
use crate::contracts::ReplyRequest;
use crate::prompt::SUMMARY_LEAD;

/// Produces the text of one reply as a stream of [`FeedEvent`]s. Every call
/// ends with exactly one [`FeedEvent::Done`].
pub trait ReplySource: Send + Sync {
    fn label(&self) -> &str;

    fn stream(&self, request: &ReplyRequest, sink: &dyn Fn(FeedEvent));
}

/// Runs `source` on a worker thread, tagging every event with the reply id.
pub fn spawn_reply(
    source: Arc<dyn ReplySource>,
    request: ReplyRequest,
    tx: mpsc::Sender<(MessageId, FeedEvent)>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let id = request.id.clone();
        tracing::debug!(reply = %id, source = source.label(), "reply stream started");
        source.stream(&request, &|event| {
            // The receiver is gone once the UI exits; nothing left to do.
            let _ = tx.send((id.clone(), event));
        });
    })
}

/// Emits `text` in pieces of `chunk` characters, pausing `delay` between
/// pieces.
pub fn emit_chunked_text(text: &str, chunk: usize, delay: Duration, sink: &dyn Fn(FeedEvent)) {
    let chunk = chunk.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let end = (i + chunk).min(chars.len());
        sink(FeedEvent::Chunk(chars[i..end].iter().collect()));
        i = end;
        if i < chars.len() && !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

const LINES: &[&str] = &[
    "Start with what you already know works, then adjust.",
    "Write down the goal first; the steps follow from it.",
    "Ask how it will feel a month from now.",
    "Try the smallest version today and see what happens.",
    "Check who else is affected before deciding.",
    "Pick one option and commit to it for a week.",
];

/// Offline source that replays a canned ensemble reply. Useful for demos and
/// for exercising the reveal without a model.
#[derive(Debug, Clone)]
pub struct ScriptedReplySource {
    script: Option<String>,
    chunk_size: usize,
    delay: Duration,
}

impl Default for ScriptedReplySource {
    fn default() -> Self {
        Self {
            script: None,
            chunk_size: 24,
            delay: Duration::from_millis(40),
        }
    }
}

impl ScriptedReplySource {
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            script: None,
            chunk_size,
            delay,
        }
    }

    /// Always replies with `script`, ignoring the request.
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// One line per allowed speaker plus a summary, derived from the request
    /// alone so the same request always yields the same reply.
    pub fn compose(request: &ReplyRequest) -> String {
        let seed = request.message.chars().map(|c| c as usize).sum::<usize>();
        let mut reply = format!("Thinking about \"{}\" together.\n", request.message.trim());
        for (idx, speaker) in request.speakers.iter().enumerate() {
            let line = LINES[(seed + idx) % LINES.len()];
            reply.push_str(&format!("{speaker}: {line}\n"));
        }
        reply.push_str(&format!(
            "{SUMMARY_LEAD} {} voices, one direction.",
            request.speakers.len()
        ));
        reply
    }
}

impl ReplySource for ScriptedReplySource {
    fn label(&self) -> &str {
        "scripted"
    }

    fn stream(&self, request: &ReplyRequest, sink: &dyn Fn(FeedEvent)) {
        let text = match &self.script {
            Some(script) => script.clone(),
            None => Self::compose(request),
        };
        emit_chunked_text(&text, self.chunk_size, self.delay, sink);
        sink(FeedEvent::Done);
    }
}
