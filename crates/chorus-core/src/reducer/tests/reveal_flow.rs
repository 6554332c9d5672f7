use super::*;
use crate::reveal::RevealPhase;
use pretty_assertions::assert_eq;

const THREE: &str = "INTJ: plan it\nENFP: feel it\nISTJ: file it";

#[test]
fn reveal_advances_one_block_per_interval() {
    let mut state = generic();
    let id = send(&mut state, "go");
    stream(&mut state, &id, THREE);
    let start = Instant::now();

    assert_eq!(labels(&state, &id), vec!["INTJ"]);
    assert!(tick(&mut state, start).is_empty());
    assert!(tick(&mut state, start + TICK / 2).is_empty());
    assert_eq!(
        tick(&mut state, start + TICK),
        vec![ChorusEffect::RequestFrame]
    );
    tick(&mut state, start + TICK * 2);
    assert_eq!(labels(&state, &id), vec!["INTJ", "ENFP"]);
    tick(&mut state, start + TICK * 3);
    assert_eq!(labels(&state, &id), vec!["INTJ", "ENFP", "ISTJ"]);

    assert!(tick(&mut state, start + TICK * 4).is_empty());
    assert_eq!(state.reveal.phase(3), RevealPhase::Complete { count: 3 });
}

#[test]
fn streamed_blocks_extend_the_same_reveal() {
    let mut state = generic();
    let id = send(&mut state, "go");
    stream(&mut state, &id, "INTJ: one\n");
    let start = Instant::now();
    tick(&mut state, start);
    tick(&mut state, start + TICK);

    stream(&mut state, &id, "ENFP: two\n");
    assert_eq!(state.reveal.message(), Some(&id));
    assert_eq!(state.reveal.phase(2), RevealPhase::Revealing { count: 1 });

    tick(&mut state, start + TICK * 2);
    assert_eq!(labels(&state, &id), vec!["INTJ", "ENFP"]);
}

#[test]
fn next_reply_restarts_the_reveal() {
    let mut state = generic();
    let first = exchange(&mut state, "one", THREE);
    let start = Instant::now();
    for step in 0..4 {
        tick(&mut state, start + TICK * step);
    }
    assert_eq!(labels(&state, &first).len(), 3);

    let second = send(&mut state, "two");
    stream(&mut state, &second, THREE);

    assert_eq!(state.reveal.message(), Some(&second));
    assert_eq!(labels(&state, &second), vec!["INTJ"]);
    // Earlier replies are no longer sliced.
    assert_eq!(labels(&state, &first).len(), 3);
}

#[test]
fn force_show_all_skips_the_reveal() {
    let mut state = generic();
    let id = send(&mut state, "go");
    stream(&mut state, &id, THREE);

    run_user(&mut state, UserAction::ToggleForceShowAll);

    assert_eq!(labels(&state, &id).len(), 3);
    assert!(tick(&mut state, Instant::now()).is_empty());
}

#[test]
fn outro_waits_for_the_last_block() {
    let mut state = generic();
    let id = send(&mut state, "go");
    stream(&mut state, &id, "INTJ: a\nENFP: b\nIn summary: both agree.");
    finish(&mut state, &id);

    let message = state.message(&id).expect("reply");
    let view = project_message(&state, message);
    assert_eq!(view.pending_blocks, 1);
    assert_eq!(view.outro, "");

    let start = Instant::now();
    tick(&mut state, start);
    tick(&mut state, start + TICK);
    tick(&mut state, start + TICK * 2);

    let message = state.message(&id).expect("reply");
    let view = project_message(&state, message);
    assert_eq!(view.pending_blocks, 0);
    assert_eq!(view.outro, "both agree.");
}

#[test]
fn tick_without_a_tracked_reply_is_a_no_op() {
    let mut state = generic();
    assert!(tick(&mut state, Instant::now()).is_empty());
}
