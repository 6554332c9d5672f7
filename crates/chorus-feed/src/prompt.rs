use chorus_core::ConversationMode;
use chorus_core::Roster;

use crate::contracts::ReplyRequest;

/// Line that opens the closing summary in generated replies.
pub const SUMMARY_LEAD: &str = "In summary:";

fn describe_speaker(roster: &Roster, speaker: &str, mode: ConversationMode) -> String {
    match (mode, roster.persona(speaker)) {
        (ConversationMode::Themed, Some(persona)) => {
            format!("{} (personality {})", persona.name, persona.archetype)
        }
        _ => match roster.archetype(speaker) {
            Some(archetype) => format!("{} {}", archetype.code, archetype.emoji),
            None => speaker.to_string(),
        },
    }
}

/// Prompt asking a local model to answer as several speakers at once, one
/// `Name: text` line per speaker followed by a summary line.
pub fn build_ensemble_prompt(request: &ReplyRequest, roster: &Roster) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "System:\n\
You are a panel of distinct personalities answering the user together.\n\
Only these speakers may talk, in any order:\n",
    );
    for speaker in request.speakers.iter() {
        prompt.push_str("- ");
        prompt.push_str(&describe_speaker(roster, speaker, request.mode));
        prompt.push('\n');
    }
    prompt.push_str(
        "Start each speaker's turn on a new line as `Name: text`, using the name exactly as listed.\n\
A speaker with nothing to add may stay silent.\n",
    );
    prompt.push_str("Finish with one line starting `");
    prompt.push_str(SUMMARY_LEAD);
    prompt.push_str("` that sums up the panel.\n\n");

    if let Some(ctx) = request.context.as_deref() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(ctx);
        prompt.push_str("\n\n");
    }

    prompt.push_str("User: ");
    prompt.push_str(&request.message);
    prompt
}
