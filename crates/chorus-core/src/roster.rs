use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::OnceLock;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ChorusError;
use crate::error::ChorusResult;

/// Which speaker alphabet a conversation is displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// Archetype codes (`ENTJ`, `ISFP`, ...) are the speaker identities.
    Generic,
    /// Persona names are the speaker identities; aliased codes map onto them.
    Themed,
}

impl ConversationMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Themed => "themed",
        }
    }
}

impl FromStr for ConversationMode {
    type Err = ChorusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generic" | "mbti" => Ok(Self::Generic),
            "themed" | "persona" => Ok(Self::Themed),
            other => Err(ChorusError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchetypeGroup {
    Analysts,
    Diplomats,
    Sentinels,
    Explorers,
}

impl ArchetypeGroup {
    pub fn color(self) -> RoleColor {
        match self {
            Self::Analysts => RoleColor::rgb(0x8B, 0x5C, 0xF6),
            Self::Diplomats => RoleColor::rgb(0x10, 0xB9, 0x81),
            Self::Sentinels => RoleColor::rgb(0x3B, 0x82, 0xF6),
            Self::Explorers => RoleColor::rgb(0xF5, 0x9E, 0x0B),
        }
    }

    /// Group of a four-letter code: NT analysts, NF diplomats, S_J sentinels,
    /// S_P explorers.
    pub fn for_code(code: &str) -> Option<Self> {
        let letters: Vec<char> = code.trim().to_ascii_uppercase().chars().collect();
        if letters.len() != 4 {
            return None;
        }
        match (letters[1], letters[2], letters[3]) {
            ('N', 'T', _) => Some(Self::Analysts),
            ('N', 'F', _) => Some(Self::Diplomats),
            ('S', _, 'J') => Some(Self::Sentinels),
            ('S', _, 'P') => Some(Self::Explorers),
            _ => None,
        }
    }
}

/// An sRGB color, serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const NEUTRAL_GRAY: RoleColor = RoleColor::rgb(0x9C, 0xA3, 0xAF);

impl RoleColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse_hex(value: &str) -> Option<Self> {
        let hex = value.trim().strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for RoleColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for RoleColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&value).ok_or_else(|| format!("expected #RRGGBB color, got '{value}'"))
    }
}

impl From<RoleColor> for String {
    fn from(color: RoleColor) -> Self {
        color.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeSpec {
    pub code: String,
    pub emoji: String,
    /// Individual color; when absent the group color applies.
    #[serde(default)]
    pub color: Option<RoleColor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaSpec {
    pub name: String,
    /// Archetype code this persona aliases.
    pub archetype: String,
    pub emoji: String,
    pub color: RoleColor,
    #[serde(default)]
    pub avatar: Option<String>,
    pub voice: String,
}

/// The two speaker alphabets plus the persona alias table.
///
/// Rosters are immutable once built and are shared behind an `Arc` by the
/// parser and the presenters, so an alternate persona set is a different
/// `Roster` value rather than a code change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub archetypes: Vec<ArchetypeSpec>,
    pub personas: Vec<PersonaSpec>,
    /// Single voice shared by every role in generic mode.
    pub generic_voice: String,
    /// Voice for themed-mode roles without a persona of their own.
    pub fallback_voice: String,
}

pub const MAX_THEMED_SPEAKERS: usize = 5;

const BUILTIN_ARCHETYPES: [(&str, &str, Option<RoleColor>); 16] = [
    ("INTJ", "🧠", Some(RoleColor::rgb(0x6D, 0x28, 0xD9))),
    ("INTP", "🔬", None),
    ("ENTJ", "👑", Some(RoleColor::rgb(0x7C, 0x3A, 0xED))),
    ("ENTP", "💡", None),
    ("INFJ", "🔮", Some(RoleColor::rgb(0x05, 0x96, 0x69))),
    ("INFP", "🌸", None),
    ("ENFJ", "🌟", Some(RoleColor::rgb(0x34, 0xD3, 0x99))),
    ("ENFP", "🎉", None),
    ("ISTJ", "📋", Some(RoleColor::rgb(0x1D, 0x4E, 0xD8))),
    ("ISFJ", "🛡️", None),
    ("ESTJ", "📊", Some(RoleColor::rgb(0x25, 0x63, 0xEB))),
    ("ESFJ", "🤝", None),
    ("ISTP", "🔧", None),
    ("ISFP", "🎨", None),
    ("ESTP", "⚡", Some(RoleColor::rgb(0xD9, 0x77, 0x06))),
    ("ESFP", "🎭", None),
];

const BUILTIN_PERSONAS: [(&str, &str, &str, RoleColor, &str, &str); 5] = [
    (
        "沈星回",
        "INFJ",
        "🌙",
        RoleColor::rgb(0x60, 0xA5, 0xFA),
        "/avatars/shen-xinghui.png",
        "voice-shen-xinghui",
    ),
    (
        "黎深",
        "INTJ",
        "❄️",
        RoleColor::rgb(0xA7, 0x8B, 0xFA),
        "/avatars/li-shen.png",
        "voice-li-shen",
    ),
    (
        "祁煜",
        "ENTJ",
        "🐚",
        RoleColor::rgb(0xF4, 0x72, 0xB6),
        "/avatars/qi-yu.png",
        "voice-qi-yu",
    ),
    (
        "秦彻",
        "ESTP",
        "🔥",
        RoleColor::rgb(0xEF, 0x44, 0x44),
        "/avatars/qin-che.png",
        "voice-qin-che",
    ),
    (
        "夏以昼",
        "ENFJ",
        "☀️",
        RoleColor::rgb(0xF5, 0x9E, 0x0B),
        "/avatars/xia-yizhou.png",
        "voice-xia-yizhou",
    ),
];

static BUILTIN: OnceLock<Arc<Roster>> = OnceLock::new();

impl Roster {
    pub fn builtin() -> Arc<Roster> {
        Arc::clone(BUILTIN.get_or_init(|| {
            Arc::new(Roster {
                archetypes: BUILTIN_ARCHETYPES
                    .iter()
                    .map(|(code, emoji, color)| ArchetypeSpec {
                        code: (*code).to_string(),
                        emoji: (*emoji).to_string(),
                        color: *color,
                    })
                    .collect(),
                personas: BUILTIN_PERSONAS
                    .iter()
                    .map(|(name, archetype, emoji, color, avatar, voice)| PersonaSpec {
                        name: (*name).to_string(),
                        archetype: (*archetype).to_string(),
                        emoji: (*emoji).to_string(),
                        color: *color,
                        avatar: Some((*avatar).to_string()),
                        voice: (*voice).to_string(),
                    })
                    .collect(),
                generic_voice: "voice-narrator".to_string(),
                fallback_voice: "voice-narrator".to_string(),
            })
        }))
    }

    pub fn from_yaml_str(source: &str) -> ChorusResult<Roster> {
        let mut roster: Roster = serde_yaml::from_str(source)?;
        for archetype in &mut roster.archetypes {
            archetype.code = archetype.code.trim().to_ascii_uppercase();
        }
        for persona in &mut roster.personas {
            persona.name = persona.name.trim().to_string();
            persona.archetype = persona.archetype.trim().to_ascii_uppercase();
        }
        roster.validate()?;
        Ok(roster)
    }

    pub fn load(path: impl AsRef<Path>) -> ChorusResult<Roster> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let roster = Self::from_yaml_str(&source)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            archetypes = roster.archetypes.len(),
            personas = roster.personas.len(),
            "loaded roster"
        );
        Ok(roster)
    }

    pub fn validate(&self) -> ChorusResult<()> {
        if self.archetypes.is_empty() {
            return Err(ChorusError::InvalidRoster(
                "at least one archetype is required".to_string(),
            ));
        }
        let mut seen: Vec<String> = Vec::new();
        for code in self.archetypes.iter().map(|a| a.code.as_str()) {
            if code.is_empty() {
                return Err(ChorusError::InvalidRoster("empty archetype code".to_string()));
            }
            if seen.iter().any(|s| s.eq_ignore_ascii_case(code)) {
                return Err(ChorusError::InvalidRoster(format!(
                    "duplicate archetype code {code}"
                )));
            }
            seen.push(code.to_string());
        }

        let mut aliased: Vec<&str> = Vec::new();
        for persona in &self.personas {
            if persona.name.is_empty() {
                return Err(ChorusError::InvalidRoster("empty persona name".to_string()));
            }
            if seen.iter().any(|s| s.eq_ignore_ascii_case(&persona.name)) {
                return Err(ChorusError::InvalidRoster(format!(
                    "persona name {} collides with another token",
                    persona.name
                )));
            }
            if self.archetype(&persona.archetype).is_none() {
                return Err(ChorusError::InvalidRoster(format!(
                    "persona {} aliases unknown archetype {}",
                    persona.name, persona.archetype
                )));
            }
            if aliased.contains(&persona.archetype.as_str()) {
                return Err(ChorusError::InvalidRoster(format!(
                    "archetype {} is aliased by more than one persona",
                    persona.archetype
                )));
            }
            aliased.push(persona.archetype.as_str());
            seen.push(persona.name.clone());
        }

        if self.personas.len() > MAX_THEMED_SPEAKERS {
            return Err(ChorusError::InvalidRoster(format!(
                "at most {MAX_THEMED_SPEAKERS} personas are supported, got {}",
                self.personas.len()
            )));
        }
        Ok(())
    }

    pub fn archetype(&self, code: &str) -> Option<&ArchetypeSpec> {
        let code = code.trim();
        self.archetypes
            .iter()
            .find(|archetype| archetype.code.eq_ignore_ascii_case(code))
    }

    pub fn persona(&self, name: &str) -> Option<&PersonaSpec> {
        let name = name.trim();
        self.personas
            .iter()
            .find(|persona| persona.name.eq_ignore_ascii_case(name))
    }

    pub fn persona_for_archetype(&self, code: &str) -> Option<&PersonaSpec> {
        let code = code.trim();
        self.personas
            .iter()
            .find(|persona| persona.archetype.eq_ignore_ascii_case(code))
    }

    /// Canonical token for `token` in `mode`, or `None` when the token is in
    /// neither alphabet.
    ///
    /// Themed mode prefers persona names (aliased codes map onto them, codes
    /// without a persona stay uppercase codes); generic mode maps persona
    /// names back to their archetype code.
    pub fn canonicalize(&self, token: &str, mode: ConversationMode) -> Option<String> {
        if let Some(persona) = self.persona(token) {
            return Some(match mode {
                ConversationMode::Themed => persona.name.clone(),
                ConversationMode::Generic => persona.archetype.clone(),
            });
        }
        let archetype = self.archetype(token)?;
        Some(match mode {
            ConversationMode::Themed => self
                .persona_for_archetype(&archetype.code)
                .map(|persona| persona.name.clone())
                .unwrap_or_else(|| archetype.code.clone()),
            ConversationMode::Generic => archetype.code.clone(),
        })
    }

    pub fn canonical_or_raw(&self, token: &str, mode: ConversationMode) -> String {
        self.canonicalize(token, mode)
            .unwrap_or_else(|| token.trim().to_string())
    }

    /// Every token of both alphabets, as written in the roster.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.archetypes
            .iter()
            .map(|archetype| archetype.code.as_str())
            .chain(self.personas.iter().map(|persona| persona.name.as_str()))
    }

    /// Speakers a fresh conversation starts with: every persona in themed
    /// mode, the aliased archetype codes in generic mode.
    pub fn default_speakers(&self, mode: ConversationMode) -> Vec<String> {
        self.personas
            .iter()
            .map(|persona| match mode {
                ConversationMode::Themed => persona.name.clone(),
                ConversationMode::Generic => persona.archetype.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn canonicalize_follows_mode() {
        let roster = Roster::builtin();
        assert_eq!(
            roster.canonicalize("entj", ConversationMode::Themed),
            Some("祁煜".to_string())
        );
        assert_eq!(
            roster.canonicalize("祁煜", ConversationMode::Generic),
            Some("ENTJ".to_string())
        );
        assert_eq!(
            roster.canonicalize("istj", ConversationMode::Themed),
            Some("ISTJ".to_string())
        );
        assert_eq!(roster.canonicalize("Alice", ConversationMode::Generic), None);
    }

    #[test]
    fn groups_follow_letter_pairs() {
        assert_eq!(ArchetypeGroup::for_code("intp"), Some(ArchetypeGroup::Analysts));
        assert_eq!(ArchetypeGroup::for_code("ENFP"), Some(ArchetypeGroup::Diplomats));
        assert_eq!(ArchetypeGroup::for_code("ESFJ"), Some(ArchetypeGroup::Sentinels));
        assert_eq!(ArchetypeGroup::for_code("ISTP"), Some(ArchetypeGroup::Explorers));
        assert_eq!(ArchetypeGroup::for_code("祁煜"), None);
    }

    #[test]
    fn color_hex_round_trips_through_display() {
        let color = RoleColor::parse_hex("#f472b6").expect("valid hex");
        assert_eq!(color, RoleColor::rgb(0xF4, 0x72, 0xB6));
        assert_eq!(color.to_string(), "#F472B6");
        assert_eq!(RoleColor::parse_hex("f472b6"), None);
        assert_eq!(RoleColor::parse_hex("#zzzzzz"), None);
    }

    #[test]
    fn builtin_roster_is_valid() {
        Roster::builtin().validate().expect("builtin roster validates");
    }

    #[test]
    fn yaml_roster_loads_and_normalizes_codes() {
        let mut file = NamedTempFile::new().expect("tmpfile");
        write!(
            file,
            r##"
generic_voice: narrator
fallback_voice: narrator
archetypes:
  - code: intj
    emoji: "🧠"
  - code: ENFP
    emoji: "🎉"
    color: "#112233"
personas:
  - name: Ada
    archetype: intj
    emoji: "🦉"
    color: "#445566"
    voice: ada-voice
"##
        )
        .expect("write roster");

        let roster = Roster::load(file.path()).expect("load roster");
        assert_eq!(roster.archetypes[0].code, "INTJ");
        assert_eq!(roster.personas[0].archetype, "INTJ");
        assert_eq!(
            roster.canonicalize("intj", ConversationMode::Themed),
            Some("Ada".to_string())
        );
    }

    #[test]
    fn roster_rejects_alias_to_unknown_archetype() {
        let source = r##"
generic_voice: narrator
fallback_voice: narrator
archetypes:
  - code: INTJ
    emoji: "🧠"
personas:
  - name: Ada
    archetype: ENFP
    emoji: "🦉"
    color: "#445566"
    voice: ada-voice
"##;
        let err = Roster::from_yaml_str(source).expect_err("unknown alias target");
        assert!(matches!(err, ChorusError::InvalidRoster(_)));
    }

    #[test]
    fn roster_rejects_duplicate_alias_targets() {
        let source = r##"
generic_voice: narrator
fallback_voice: narrator
archetypes:
  - code: INTJ
    emoji: "🧠"
personas:
  - name: Ada
    archetype: INTJ
    emoji: "🦉"
    color: "#445566"
    voice: a
  - name: Grace
    archetype: INTJ
    emoji: "🐝"
    color: "#445566"
    voice: g
"##;
        let err = Roster::from_yaml_str(source).expect_err("duplicate alias");
        assert!(matches!(err, ChorusError::InvalidRoster(_)));
    }

    #[test]
    fn mode_parses_from_cli_words() {
        assert_eq!("Themed".parse::<ConversationMode>().ok(), Some(ConversationMode::Themed));
        assert_eq!("mbti".parse::<ConversationMode>().ok(), Some(ConversationMode::Generic));
        assert!("opera".parse::<ConversationMode>().is_err());
    }
}
