use super::*;
use crate::roster::RoleColor;
use crate::view::project_conversation;
use pretty_assertions::assert_eq;

#[test]
fn themed_view_resolves_presentation() {
    let mut state = themed();
    set_speakers(&mut state, &["黎深", "祁煜"]);
    let id = exchange(&mut state, "hi", "Let us see.\nINTJ: Think.\nENTJ: Lead.");
    state.reveal.set_force_show_all(true);

    let message = state.message(&id).expect("reply");
    let view = project_message(&state, message);

    assert!(!view.plain);
    assert_eq!(view.intro, "Let us see.");
    let blocks: Vec<(&str, &str, Option<&str>)> = view
        .blocks
        .iter()
        .map(|block| {
            (
                block.label.as_str(),
                block.emoji.as_str(),
                block.avatar.as_deref(),
            )
        })
        .collect();
    assert_eq!(
        blocks,
        vec![
            ("黎深", "❄️", Some("/avatars/li-shen.png")),
            ("祁煜", "🐚", Some("/avatars/qi-yu.png")),
        ]
    );
    assert_eq!(view.blocks[1].color, RoleColor::rgb(0xF4, 0x72, 0xB6));
    assert!(view.silent.is_empty());
}

#[test]
fn silent_placeholders_follow_the_bound_allow_list() {
    let mut state = themed();
    set_speakers(&mut state, &["沈星回", "黎深", "秦彻"]);
    let id = exchange(&mut state, "hi", "沈星回：Only me.");

    let message = state.message(&id).expect("reply");
    let silent: Vec<String> = project_message(&state, message)
        .silent
        .into_iter()
        .map(|placeholder| placeholder.label)
        .collect();
    assert_eq!(silent, vec!["黎深", "秦彻"]);
}

#[test]
fn silent_placeholders_wait_for_the_stream_to_end() {
    let mut state = themed();
    set_speakers(&mut state, &["沈星回", "黎深"]);
    let id = send(&mut state, "hi");
    stream(&mut state, &id, "沈星回：First.");

    let message = state.message(&id).expect("reply");
    assert!(project_message(&state, message).silent.is_empty());
}

#[test]
fn silent_placeholders_can_be_hidden() {
    let mut state = themed();
    set_speakers(&mut state, &["沈星回", "黎深"]);
    let id = exchange(&mut state, "hi", "沈星回：Only me.");
    run_user(&mut state, UserAction::ToggleSilentPlaceholders);

    let message = state.message(&id).expect("reply");
    assert!(project_message(&state, message).silent.is_empty());
}

#[test]
fn generic_view_uses_codes_without_avatars() {
    let mut state = generic();
    let id = exchange(&mut state, "hi", "ENTJ: Decide.\nISFP: Feel.");
    state.reveal.set_force_show_all(true);

    let message = state.message(&id).expect("reply");
    let view = project_message(&state, message);
    assert_eq!(view.blocks.len(), 2);
    assert_eq!(view.blocks[0].label, "ENTJ");
    assert_eq!(view.blocks[0].emoji, "👑");
    assert!(view.blocks.iter().all(|block| block.avatar.is_none()));
    assert!(view
        .blocks
        .iter()
        .all(|block| block.voice == "voice-narrator"));
}

#[test]
fn unattributed_and_user_messages_render_plain() {
    let mut state = generic();
    exchange(&mut state, "  hello  ", "No roles at all.\nIn summary: still plain.");

    let views = project_conversation(&state);
    assert_eq!(views.len(), 2);
    assert!(views.iter().all(|view| view.plain));
    assert_eq!(views[0].intro, "hello");
    assert_eq!(views[1].intro, "No roles at all.\nIn summary: still plain.");
    assert!(views[1].blocks.is_empty());
}
