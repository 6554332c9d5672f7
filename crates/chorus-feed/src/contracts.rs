use chorus_core::AllowList;
use chorus_core::ChorusEffect;
use chorus_core::ConversationMode;
use chorus_core::MessageId;
use serde::Deserialize;
use serde::Serialize;

/// Everything a source needs to produce one ensemble reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub id: MessageId,
    pub message: String,
    pub context: Option<String>,
    pub speakers: AllowList,
    pub mode: ConversationMode,
}

impl ReplyRequest {
    pub fn from_effect(effect: &ChorusEffect) -> Option<Self> {
        match effect {
            ChorusEffect::RequestReply {
                id,
                message,
                context,
                speakers,
                mode,
            } => Some(Self {
                id: id.clone(),
                message: message.clone(),
                context: context.clone(),
                speakers: speakers.clone(),
                mode: *mode,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Raw reply text, in arrival order.
    Chunk(String),
    /// Diagnostic from the source; not part of the reply.
    Meta(String),
    Done,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn only_reply_effects_become_requests() {
        let effect = ChorusEffect::RequestReply {
            id: MessageId::new("a-2"),
            message: "hi".to_string(),
            context: None,
            speakers: AllowList::new(["INTJ"]),
            mode: ConversationMode::Generic,
        };
        let request = ReplyRequest::from_effect(&effect).expect("request");
        assert_eq!(request.id, MessageId::new("a-2"));
        assert_eq!(request.speakers, AllowList::new(["INTJ"]));
        assert_eq!(ReplyRequest::from_effect(&ChorusEffect::RequestFrame), None);
    }
}
