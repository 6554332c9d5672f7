use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::roster::ConversationMode;
use crate::roster::Roster;
use crate::roster::MAX_THEMED_SPEAKERS;

/// Opaque, stable identity of one chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, duplicate-free set of roles allowed to speak.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(Vec<String>);

impl AllowList {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for role in roles {
            list.push(role);
        }
        list
    }

    /// Like [`AllowList::new`] but keeps only the first
    /// [`MAX_THEMED_SPEAKERS`] distinct entries.
    pub fn themed<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for role in roles {
            if list.len() == MAX_THEMED_SPEAKERS {
                break;
            }
            list.push(role);
        }
        list
    }

    /// Canonicalizes every entry for `mode`, dropping what collapses into a
    /// duplicate and, in themed mode, anything past the speaker cap.
    pub fn canonical<I, S>(roles: I, roster: &Roster, mode: ConversationMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let canonical = roles
            .into_iter()
            .map(|role| roster.canonical_or_raw(role.as_ref(), mode));
        match mode {
            ConversationMode::Themed => Self::themed(canonical),
            ConversationMode::Generic => Self::new(canonical),
        }
    }

    fn push(&mut self, role: impl Into<String>) {
        let role = role.into();
        let role = role.trim();
        if role.is_empty() || self.contains(role) {
            return;
        }
        self.0.push(role.to_string());
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|entry| entry == role)
    }

    /// Adds `role` if absent, removes it if present. Returns whether the role
    /// is in the list afterwards. A full themed list ignores additions.
    pub fn toggle(&mut self, role: &str, mode: ConversationMode) -> bool {
        if let Some(idx) = self.0.iter().position(|entry| entry == role) {
            self.0.remove(idx);
            return false;
        }
        if mode == ConversationMode::Themed && self.len() >= MAX_THEMED_SPEAKERS {
            return false;
        }
        self.push(role);
        self.contains(role)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Binds each assistant message to the allow-list that was live when the
/// user's preceding send happened.
///
/// Sends push onto a FIFO; every bind pass hands queued lists to assistant
/// messages that are not bound yet, in order. A bound entry is never
/// overwritten; only [`SpeakerSnapshots::clear`] drops it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerSnapshots {
    bound: HashMap<MessageId, AllowList>,
    pending: VecDeque<AllowList>,
}

impl SpeakerSnapshots {
    pub fn record_send(&mut self, live: &AllowList) {
        self.pending.push_back(live.clone());
    }

    /// Binds every id in `assistant_ids` that has no snapshot yet. Returns
    /// how many new bindings were written.
    pub fn bind<'a, I>(&mut self, assistant_ids: I, live: &AllowList) -> usize
    where
        I: IntoIterator<Item = &'a MessageId>,
    {
        let mut written = 0;
        for id in assistant_ids {
            if self.bound.contains_key(id) {
                continue;
            }
            let snapshot = match self.pending.pop_front() {
                Some(queued) => queued,
                None => {
                    tracing::debug!(message = %id, "no queued send; binding live speakers");
                    live.clone()
                }
            };
            tracing::trace!(message = %id, speakers = snapshot.len(), "bound speaker snapshot");
            self.bound.insert(id.clone(), snapshot);
            written += 1;
        }
        written
    }

    /// Reinstates a persisted snapshot. Existing bindings win.
    pub fn restore(&mut self, id: MessageId, speakers: AllowList) -> bool {
        if self.bound.contains_key(&id) {
            return false;
        }
        self.bound.insert(id, speakers);
        true
    }

    pub fn get(&self, id: &MessageId) -> Option<&AllowList> {
        self.bound.get(id)
    }

    /// The bound allow-list for `id`, or `live` when none is bound.
    pub fn resolve<'a>(&'a self, id: &MessageId, live: &'a AllowList) -> &'a AllowList {
        self.bound.get(id).unwrap_or(live)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn bound_len(&self) -> usize {
        self.bound.len()
    }

    pub fn clear(&mut self) {
        self.bound.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ids(values: &[&str]) -> Vec<MessageId> {
        values.iter().map(|value| MessageId::new(*value)).collect()
    }

    #[test]
    fn allow_list_dedups_and_preserves_order() {
        let list = AllowList::new(["黎深", "沈星回", "黎深", " ", "祁煜"]);
        assert_eq!(list.as_slice(), &["黎深", "沈星回", "祁煜"]);
    }

    #[test]
    fn themed_allow_list_is_capped() {
        let list = AllowList::themed(["a", "b", "c", "d", "e", "f"]);
        assert_eq!(list.len(), MAX_THEMED_SPEAKERS);
        assert!(!list.contains("f"));
    }

    #[test]
    fn canonical_list_maps_codes_onto_personas() {
        let roster = Roster::builtin();
        let list = AllowList::canonical(["entj", "祁煜", "ISTJ"], &roster, ConversationMode::Themed);
        assert_eq!(list.as_slice(), &["祁煜", "ISTJ"]);
    }

    #[test]
    fn toggle_respects_themed_cap() {
        let mut list = AllowList::themed(["a", "b", "c", "d", "e"]);
        assert!(!list.toggle("f", ConversationMode::Themed));
        assert!(!list.toggle("a", ConversationMode::Themed));
        assert!(list.toggle("f", ConversationMode::Themed));
        assert_eq!(list.as_slice(), &["b", "c", "d", "e", "f"]);
    }

    #[test]
    fn bind_pops_queued_sends_in_order() {
        let mut snapshots = SpeakerSnapshots::default();
        let first = AllowList::new(["沈星回"]);
        let second = AllowList::new(["黎深", "祁煜"]);
        let live = AllowList::new(["秦彻"]);
        snapshots.record_send(&first);
        snapshots.record_send(&second);

        let written = snapshots.bind(&ids(&["a-1", "a-2", "a-3"]), &live);

        assert_eq!(written, 3);
        assert_eq!(snapshots.get(&MessageId::new("a-1")), Some(&first));
        assert_eq!(snapshots.get(&MessageId::new("a-2")), Some(&second));
        assert_eq!(snapshots.get(&MessageId::new("a-3")), Some(&live));
        assert_eq!(snapshots.pending_len(), 0);
    }

    #[test]
    fn bound_snapshot_survives_live_changes() {
        let mut snapshots = SpeakerSnapshots::default();
        let original = AllowList::new(["沈星回", "黎深"]);
        snapshots.record_send(&original);
        let id = MessageId::new("a-1");
        snapshots.bind([&id], &original);

        let changed = AllowList::new(["秦彻"]);
        snapshots.record_send(&changed);
        assert_eq!(snapshots.bind([&id], &changed), 0);
        assert_eq!(snapshots.resolve(&id, &changed), &original);
        assert!(!snapshots.restore(id.clone(), changed.clone()));
        assert_eq!(snapshots.resolve(&id, &changed), &original);
    }

    #[test]
    fn clear_drops_bindings_and_queue() {
        let mut snapshots = SpeakerSnapshots::default();
        let live = AllowList::new(["INTJ"]);
        snapshots.record_send(&live);
        snapshots.record_send(&live);
        snapshots.bind(&ids(&["a-1"]), &live);
        snapshots.clear();
        assert_eq!(snapshots.bound_len(), 0);
        assert_eq!(snapshots.pending_len(), 0);
    }

    #[test]
    fn unbound_message_resolves_to_live() {
        let snapshots = SpeakerSnapshots::default();
        let live = AllowList::new(["ENFP"]);
        assert_eq!(snapshots.resolve(&MessageId::new("a-9"), &live), &live);
    }
}
