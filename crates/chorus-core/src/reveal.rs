use std::time::Duration;
use std::time::Instant;

use crate::speakers::MessageId;

pub const DEFAULT_REVEAL_INTERVAL: Duration = Duration::from_millis(650);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealPhase {
    Idle,
    Revealing { count: usize },
    Complete { count: usize },
}

/// Progressive disclosure of parsed role blocks for the newest message.
///
/// The counter is keyed by message identity only. More blocks arriving for
/// the same message extend the target; a different message resets it. Time
/// is injected through [`RevealController::poll`], the controller owns no
/// timer of its own.
#[derive(Debug, Clone)]
pub struct RevealController {
    interval: Duration,
    message: Option<MessageId>,
    count: usize,
    last_tick: Option<Instant>,
    force_show_all: bool,
}

impl Default for RevealController {
    fn default() -> Self {
        Self::new(DEFAULT_REVEAL_INTERVAL)
    }
}

impl RevealController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            message: None,
            count: 0,
            last_tick: None,
            force_show_all: false,
        }
    }

    pub fn message(&self) -> Option<&MessageId> {
        self.message.as_ref()
    }

    pub fn force_show_all(&self) -> bool {
        self.force_show_all
    }

    pub fn set_force_show_all(&mut self, force: bool) {
        self.force_show_all = force;
    }

    /// Points the controller at `id`. Returns true when that reset the count.
    pub fn observe(&mut self, id: &MessageId) -> bool {
        if self.message.as_ref() == Some(id) {
            return false;
        }
        tracing::trace!(message = %id, "reveal restarted for new message");
        self.message = Some(id.clone());
        self.count = 0;
        self.last_tick = None;
        true
    }

    /// Advances by one block if fewer than `total` are visible.
    pub fn tick(&mut self, total: usize) -> bool {
        if self.count >= total {
            return false;
        }
        self.count += 1;
        true
    }

    /// Applies a tick when a full interval has passed since the previous one.
    /// The first poll after a reset only arms the deadline.
    pub fn poll(&mut self, now: Instant, total: usize) -> bool {
        if self.force_show_all || self.message.is_none() || !self.needs_timer(total) {
            return false;
        }
        match self.last_tick {
            None => {
                self.last_tick = Some(now);
                false
            }
            Some(last) if now.saturating_duration_since(last) >= self.interval => {
                self.last_tick = Some(now);
                self.tick(total)
            }
            Some(_) => false,
        }
    }

    pub fn needs_timer(&self, total: usize) -> bool {
        !self.force_show_all && self.count < total
    }

    /// Blocks to render. Never zero while blocks exist, so a reply is not
    /// shown empty before the first tick.
    pub fn visible_count(&self, total: usize) -> usize {
        if self.force_show_all {
            return total;
        }
        if total == 0 {
            return 0;
        }
        self.count.max(1).min(total)
    }

    pub fn phase(&self, total: usize) -> RevealPhase {
        if self.force_show_all || (total > 0 && self.count >= total) {
            return RevealPhase::Complete { count: total };
        }
        if self.count == 0 {
            return RevealPhase::Idle;
        }
        RevealPhase::Revealing { count: self.count }
    }

    pub fn reset(&mut self) {
        self.message = None;
        self.count = 0;
        self.last_tick = None;
    }
}
