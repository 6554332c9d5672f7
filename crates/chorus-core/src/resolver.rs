use std::fmt;
use std::sync::Arc;

use crate::roster::ArchetypeGroup;
use crate::roster::ConversationMode;
use crate::roster::RoleColor;
use crate::roster::Roster;
use crate::roster::NEUTRAL_GRAY;
use crate::speakers::AllowList;

pub const FALLBACK_EMOJI: &str = "💬";

/// Presentation lookups for one conversation mode. Every lookup is total:
/// unknown roles get the documented fallback instead of an error.
pub trait RolePresenter: fmt::Debug + Send + Sync {
    fn emoji(&self, role: &str) -> String;

    fn label(&self, role: &str) -> String;

    fn color(&self, role: &str) -> RoleColor;

    /// Static image for the role; generic mode never has one.
    fn avatar(&self, role: &str) -> Option<String>;

    /// Speech-synthesis voice identifier.
    fn voice(&self, role: &str) -> String;
}

fn archetype_color(roster: &Roster, code: &str) -> Option<RoleColor> {
    let archetype = roster.archetype(code)?;
    archetype
        .color
        .or_else(|| ArchetypeGroup::for_code(&archetype.code).map(ArchetypeGroup::color))
}

#[derive(Debug, Clone)]
pub struct GenericPresenter {
    roster: Arc<Roster>,
}

impl GenericPresenter {
    pub fn new(roster: Arc<Roster>) -> Self {
        Self { roster }
    }

    fn code_for<'a>(&'a self, role: &'a str) -> &'a str {
        match self.roster.persona(role) {
            Some(persona) => persona.archetype.as_str(),
            None => role,
        }
    }
}

impl RolePresenter for GenericPresenter {
    fn emoji(&self, role: &str) -> String {
        self.roster
            .archetype(self.code_for(role))
            .map_or_else(|| FALLBACK_EMOJI.to_string(), |a| a.emoji.clone())
    }

    fn label(&self, role: &str) -> String {
        role.to_string()
    }

    fn color(&self, role: &str) -> RoleColor {
        archetype_color(&self.roster, self.code_for(role)).unwrap_or(NEUTRAL_GRAY)
    }

    fn avatar(&self, _role: &str) -> Option<String> {
        None
    }

    fn voice(&self, _role: &str) -> String {
        self.roster.generic_voice.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ThemedPresenter {
    roster: Arc<Roster>,
}

impl ThemedPresenter {
    pub fn new(roster: Arc<Roster>) -> Self {
        Self { roster }
    }
}

impl RolePresenter for ThemedPresenter {
    fn emoji(&self, role: &str) -> String {
        if let Some(persona) = self
            .roster
            .persona(role)
            .or_else(|| self.roster.persona_for_archetype(role))
        {
            return persona.emoji.clone();
        }
        self.roster
            .archetype(role)
            .map_or_else(|| FALLBACK_EMOJI.to_string(), |a| a.emoji.clone())
    }

    fn label(&self, role: &str) -> String {
        self.roster
            .persona(role)
            .or_else(|| self.roster.persona_for_archetype(role))
            .map_or_else(|| role.to_string(), |persona| persona.name.clone())
    }

    fn color(&self, role: &str) -> RoleColor {
        if let Some(persona) = self
            .roster
            .persona(role)
            .or_else(|| self.roster.persona_for_archetype(role))
        {
            return persona.color;
        }
        archetype_color(&self.roster, role).unwrap_or(NEUTRAL_GRAY)
    }

    fn avatar(&self, role: &str) -> Option<String> {
        self.roster
            .persona(role)
            .or_else(|| self.roster.persona_for_archetype(role))
            .and_then(|persona| persona.avatar.clone())
    }

    fn voice(&self, role: &str) -> String {
        self.roster
            .persona(role)
            .or_else(|| self.roster.persona_for_archetype(role))
            .map_or_else(|| self.roster.fallback_voice.clone(), |p| p.voice.clone())
    }
}

/// Picks the presenter once per conversation.
pub fn presenter_for(mode: ConversationMode, roster: Arc<Roster>) -> Arc<dyn RolePresenter> {
    match mode {
        ConversationMode::Generic => Arc::new(GenericPresenter::new(roster)),
        ConversationMode::Themed => Arc::new(ThemedPresenter::new(roster)),
    }
}

/// Roles in `allow_list` that did not speak, in allow-list order.
///
/// Both sides are compared after canonicalization for `mode`, so an
/// allow-list of persona names matches blocks tagged with archetype codes.
pub fn silent_roles<'a, I>(
    allow_list: &AllowList,
    spoken: I,
    mode: ConversationMode,
    roster: &Roster,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let spoken: Vec<String> = spoken
        .into_iter()
        .map(|role| roster.canonical_or_raw(role, mode))
        .collect();
    let mut silent: Vec<String> = Vec::new();
    for role in allow_list.iter() {
        let canonical = roster.canonical_or_raw(role, mode);
        if spoken.contains(&canonical) || silent.iter().any(|s| s == role) {
            continue;
        }
        silent.push(role.to_string());
    }
    silent
}
