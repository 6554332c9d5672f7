use super::*;
use pretty_assertions::assert_eq;

#[test]
fn send_opens_a_streaming_reply() {
    let mut state = generic();
    let effects = run_user(&mut state, UserAction::SendMessage("  hello  ".to_string()));

    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].author, Author::User);
    assert_eq!(state.messages[0].text, "hello");
    assert_eq!(state.messages[1].status, ReplyStatus::Streaming);
    assert_eq!(state.streaming.as_ref(), Some(&state.messages[1].id));
    assert!(matches!(
        effects.as_slice(),
        [
            ChorusEffect::Persist(PersistedChatEvent::UserMessage { .. }),
            ChorusEffect::RequestReply { context: None, .. },
            ChorusEffect::RequestFrame,
        ]
    ));
}

#[test]
fn blank_messages_are_not_sent() {
    let mut state = generic();
    assert!(run_user(&mut state, UserAction::SendMessage(" \n ".to_string())).is_empty());
    assert!(state.messages.is_empty());
}

#[test]
fn sending_while_streaming_is_refused() {
    let mut state = generic();
    send(&mut state, "first");
    let effects = run_user(&mut state, UserAction::SendMessage("second".to_string()));

    assert_eq!(effects, vec![ChorusEffect::RequestFrame]);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.snapshots.pending_len(), 0);
}

#[test]
fn later_sends_carry_prior_turns_as_context() {
    let mut state = generic();
    exchange(&mut state, "first", "INTJ: noted");
    let effects = run_user(&mut state, UserAction::SendMessage("second".to_string()));

    let context = effects.iter().find_map(|effect| match effect {
        ChorusEffect::RequestReply { context, .. } => context.clone(),
        _ => None,
    });
    assert_eq!(
        context.as_deref(),
        Some("you: first\nensemble: INTJ: noted\n")
    );
}

#[test]
fn finish_speaks_each_visible_block_with_its_voice() {
    let mut state = themed();
    set_speakers(&mut state, &["沈星回", "秦彻"]);
    let id = send(&mut state, "hi");
    stream(&mut state, &id, "Hello.\n沈星回：Easy.\n黎深：Hidden.\nESTP：Move.");
    let effects = finish(&mut state, &id);

    let spoken: Vec<(Option<String>, String)> = effects
        .iter()
        .filter_map(|effect| match effect {
            ChorusEffect::Speak { role, voice, .. } => Some((role.clone(), voice.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        spoken,
        vec![
            (Some("沈星回".to_string()), "voice-shen-xinghui".to_string()),
            (Some("秦彻".to_string()), "voice-qin-che".to_string()),
        ]
    );
    assert_eq!(state.streaming, None);
    assert_eq!(
        state.message(&id).map(|message| message.status),
        Some(ReplyStatus::Complete)
    );
}

#[test]
fn plain_reply_is_spoken_by_the_narrator() {
    let mut state = generic();
    let id = send(&mut state, "hi");
    stream(&mut state, &id, "Just one voice here.");
    let effects = finish(&mut state, &id);

    assert!(effects.contains(&ChorusEffect::Speak {
        message: id.clone(),
        role: None,
        voice: "voice-narrator".to_string(),
        text: "Just one voice here.".to_string(),
    }));
}

#[test]
fn chunks_for_settled_replies_are_dropped() {
    let mut state = generic();
    let id = exchange(&mut state, "hi", "INTJ: done");
    assert!(stream(&mut state, &id, "\nENFP: late").is_empty());
    assert_eq!(
        state.message(&id).map(|message| message.text.as_str()),
        Some("INTJ: done")
    );
    assert!(finish(&mut state, &id).is_empty());
}

#[test]
fn abort_keeps_partial_text_and_persists_it() {
    let mut state = generic();
    let id = send(&mut state, "hi");
    stream(&mut state, &id, "INTJ: half a tho");
    let effects = run_runtime(
        &mut state,
        RuntimeAction::AbortReply {
            id: id.clone(),
            reason: "feed closed".to_string(),
        },
    );

    assert!(matches!(
        effects.first(),
        Some(ChorusEffect::Persist(PersistedChatEvent::AssistantMessage {
            status: ReplyStatus::Aborted,
            ..
        }))
    ));
    assert_eq!(state.streaming, None);
    assert_eq!(
        state.message(&id).map(|message| message.text.as_str()),
        Some("INTJ: half a tho")
    );
    assert_eq!(
        state.logs.iter().last().map(|entry| entry.level),
        Some(LogLevel::Warn)
    );
}

#[test]
fn clearing_mid_stream_orphans_the_reply() {
    let mut state = generic();
    let id = send(&mut state, "hi");
    run_user(&mut state, UserAction::ClearConversation);

    assert!(stream(&mut state, &id, "INTJ: late").is_empty());
    assert!(state.messages.is_empty());
    assert!(!state.is_streaming());
}
