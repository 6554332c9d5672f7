mod ui;

use std::env;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chorus_core::actions::ChatAction;
use chorus_core::actions::RuntimeAction;
use chorus_core::actions::UserAction;
use chorus_core::config::Config;
use chorus_core::parser::ReplyParser;
use chorus_core::parser::SummaryPolicy;
use chorus_core::persistence::ConversationStore;
use chorus_core::persistence::PersistedChatEvent;
use chorus_core::persistence::PersistedConversationSnapshot;
use chorus_core::persistence::ReplayedConversation;
use chorus_core::reducer::reduce;
use chorus_core::reveal::RevealController;
use chorus_core::roster::ConversationMode;
use chorus_core::speakers::MessageId;
use chorus_core::state::Author;
use chorus_core::state::ChatMessage;
use chorus_core::state::ChatState;
use chorus_core::state::ReplyStatus;
use chorus_core::view::project_conversation;
use chorus_core::view::MessageView;
use chorus_feed::command::CommandReplySource;
use chorus_feed::source::ReplySource;
use chorus_feed::source::ScriptedReplySource;
use tracing_subscriber::EnvFilter;

const STATE_DIR: &str = ".chorus";
const HISTORY_FILE: &str = "conversation.jsonl";
const LOG_FILE: &str = "chorus.log";
const SCRIPTED_DELAY: Duration = Duration::from_millis(40);

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" | "version" => {
            println!("chorus {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "parse" => {
            let options = parse_options(args.collect())?;
            init_tracing(None)?;
            run_parse(options)
        }
        "render" => {
            let options = parse_options(args.collect())?;
            init_tracing(None)?;
            run_render(options)
        }
        "history" => {
            let options = parse_options(args.collect())?;
            init_tracing(None)?;
            run_history(options)
        }
        "chat" => {
            let options = parse_options(args.collect())?;
            run_chat(options)
        }
        _ => {
            print_help();
            Err(format!("unknown command: {command}").into())
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CliOptions {
    mode: Option<ConversationMode>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    config: Option<PathBuf>,
    speakers: Option<Vec<String>>,
    source: Option<String>,
    model: Option<String>,
    reopen_summary: bool,
    json: bool,
    show_all: bool,
}

fn parse_options(args: Vec<String>) -> Result<CliOptions, Box<dyn std::error::Error>> {
    let mut options = CliOptions::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--reopen-summary" => options.reopen_summary = true,
            "--json" => options.json = true,
            "--show-all" => options.show_all = true,
            "--mode" | "--file" | "--dir" | "--config" | "--speakers" | "--source" | "--model" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(format!("{flag} requires a value").into());
                };
                match flag {
                    "--mode" => options.mode = Some(value.parse()?),
                    "--file" => options.file = Some(PathBuf::from(value)),
                    "--dir" => options.dir = Some(PathBuf::from(value)),
                    "--config" => options.config = Some(PathBuf::from(value)),
                    "--speakers" => {
                        options.speakers = Some(
                            value
                                .split(',')
                                .map(str::trim)
                                .filter(|token| !token.is_empty())
                                .map(str::to_string)
                                .collect(),
                        );
                    }
                    "--source" => options.source = Some(value.clone()),
                    _ => options.model = Some(value.clone()),
                }
                i += 1;
            }
            other => {
                return Err(format!("unsupported argument: {other}").into());
            }
        }
        i += 1;
    }
    Ok(options)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chorus").join("config.toml"))
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Config::default()),
        },
    };
    let raw = fs::read_to_string(&path)
        .map_err(|err| format!("failed to read config {}: {err}", path.display()))?;
    let config = toml::from_str(&raw)
        .map_err(|err| format!("invalid config {}: {err}", path.display()))?;
    Ok(config)
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_env("CHORUS_LOG").unwrap_or_else(|_| EnvFilter::new("chorus=info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|err| err.to_string())?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .try_init()
                .map_err(|err| err.to_string())?;
        }
    }
    Ok(())
}

fn read_input(file: Option<&Path>) -> Result<String, Box<dyn std::error::Error>> {
    match file {
        Some(path) => Ok(fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?),
        None => Ok(io::read_to_string(io::stdin())?),
    }
}

/// Builds a fresh conversation from config, with CLI flags taking precedence.
fn build_state(
    config: &Config,
    options: &CliOptions,
    mode: ConversationMode,
) -> Result<ChatState, Box<dyn std::error::Error>> {
    let mut parser_options = config.parser_options();
    if options.reopen_summary {
        parser_options.summary = SummaryPolicy::Reopen;
    }
    let parser = ReplyParser::new(config.roster()?, parser_options)?;

    let mut state = ChatState::new("chorus", mode, parser);
    state.reveal = RevealController::new(config.reveal.interval());
    state
        .reveal
        .set_force_show_all(options.show_all || config.reveal.force_show_all);
    state.customization.theme = config.ui.theme;
    state.customization.show_silent = !config.ui.hide_silent;

    let speakers = match &options.speakers {
        Some(speakers) => Some(speakers.clone()),
        None if !config.conversation.speakers.is_empty() => {
            Some(config.conversation.speakers.clone())
        }
        None => None,
    };
    if let Some(speakers) = speakers {
        reduce(
            &mut state,
            ChatAction::User(UserAction::SetSpeakers(speakers)),
        );
    }
    Ok(state)
}

fn run_parse(options: CliOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(options.config.as_deref())?;
    let mode = options.mode.unwrap_or(config.conversation.mode);
    let text = read_input(options.file.as_deref())?;
    let state = build_state(&config, &options, mode)?;

    let parsed = state.parser.parse(&text, mode);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

fn run_render(options: CliOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(options.config.as_deref())?;
    let mode = options.mode.unwrap_or(config.conversation.mode);
    let text = read_input(options.file.as_deref())?;
    let mut state = build_state(&config, &options, mode)?;

    let replayed = ReplayedConversation {
        mode: Some(mode),
        messages: vec![ChatMessage {
            id: MessageId::new("a-1"),
            author: Author::Assistant,
            text,
            status: ReplyStatus::Complete,
        }],
        ..ReplayedConversation::default()
    };
    reduce(
        &mut state,
        ChatAction::Runtime(RuntimeAction::LoadHistory(replayed)),
    );

    let views = project_conversation(&state);
    if options.json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    for view in &views {
        print_message_view(view);
    }
    Ok(())
}

fn history_dir(config: &Config, options: &CliOptions) -> PathBuf {
    options
        .dir
        .clone()
        .or_else(|| config.conversation.history_dir.clone())
        .unwrap_or_else(|| PathBuf::from(STATE_DIR))
}

fn run_history(options: CliOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(options.config.as_deref())?;
    let dir = history_dir(&config, &options);
    let path = dir.join(HISTORY_FILE);
    if !path.exists() {
        println!("no conversation recorded in {}", dir.display());
        return Ok(());
    }

    let store = ConversationStore::open(&path)?;
    let replayed = store.replay()?;
    let mode = options
        .mode
        .or(replayed.mode)
        .unwrap_or(config.conversation.mode);
    let mut state = build_state(&config, &options, mode)?;
    reduce(
        &mut state,
        ChatAction::Runtime(RuntimeAction::LoadHistory(replayed)),
    );

    if options.json {
        println!("{}", serde_json::to_string_pretty(&project_conversation(&state))?);
        return Ok(());
    }
    println!(
        "{} ({} mode, {} messages)",
        path.display(),
        mode.label(),
        state.messages.len()
    );
    for view in project_conversation(&state) {
        println!();
        print_message_view(&view);
    }
    Ok(())
}

fn print_message_view(view: &MessageView) {
    if view.author == Author::User {
        println!("> {}", view.intro);
        return;
    }
    if !view.intro.is_empty() {
        println!("{}", view.intro);
    }
    for block in &view.blocks {
        println!("{} {}: {}", block.emoji, block.label, block.text);
    }
    for silent in &view.silent {
        println!("{} {} (silent)", silent.emoji, silent.label);
    }
    if !view.outro.is_empty() {
        println!("{}", view.outro);
    }
    if view.status == ReplyStatus::Aborted {
        println!("[{}]", view.status.label());
    }
}

fn reply_source(
    config: &Config,
    options: &CliOptions,
    state: &ChatState,
) -> Result<Arc<dyn ReplySource>, Box<dyn std::error::Error>> {
    let name = options
        .source
        .as_deref()
        .unwrap_or(config.feed.default_source.as_str());
    match name {
        "scripted" => Ok(Arc::new(ScriptedReplySource::new(
            config.feed.chunk_size,
            SCRIPTED_DELAY,
        ))),
        "ollama" => {
            let model = options
                .model
                .as_deref()
                .or(config.feed.default_model.as_deref());
            Ok(Arc::new(CommandReplySource::ollama(
                model,
                Arc::clone(state.roster()),
            )))
        }
        other => Err(format!("unknown reply source: {other} (expected scripted or ollama)").into()),
    }
}

fn run_chat(options: CliOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(options.config.as_deref())?;
    let dir = history_dir(&config, &options);
    fs::create_dir_all(&dir)?;
    init_tracing(Some(&dir.join(LOG_FILE)))?;

    let mut store = ConversationStore::open(dir.join(HISTORY_FILE))?;
    let replayed = store.replay()?;
    let mode = options.mode.unwrap_or(config.conversation.mode);
    let mut state = build_state(&config, &options, mode)?;
    let source = reply_source(&config, &options, &state)?;
    tracing::info!(mode = mode.label(), source = source.label(), "chat session starting");

    if replayed.last_seq == 0 || replayed.mode != Some(mode) {
        store.append(PersistedChatEvent::ConversationStarted { mode })?;
    }
    if !replayed.messages.is_empty() {
        reduce(
            &mut state,
            ChatAction::Runtime(RuntimeAction::LoadHistory(replayed)),
        );
    }

    ui::run(state, &mut store, source)?;
    persist_snapshot(&store)
}

fn persist_snapshot(store: &ConversationStore) -> Result<(), Box<dyn std::error::Error>> {
    let conversation = store.replay()?;
    let snapshot = PersistedConversationSnapshot {
        version: 1,
        seq: conversation.last_seq,
        conversation,
    };
    store.save_snapshot(&snapshot)?;
    Ok(())
}

fn print_help() {
    println!("chorus {}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  chorus parse [--mode generic|themed] [--file PATH] [--reopen-summary]");
    println!("  chorus render [--mode generic|themed] [--file PATH] [--speakers A,B] [--json]");
    println!("  chorus history [--dir PATH] [--mode generic|themed] [--json]");
    println!("  chorus chat [--mode generic|themed] [--source scripted|ollama] [--model M] [--show-all] [--dir PATH]");
    println!("  chorus --help");
    println!("  chorus --version");
    println!();
    println!("Every command accepts --config PATH (default: ~/.config/chorus/config.toml).");
    println!("Set CHORUS_LOG to adjust log filtering (default: chorus=info).");
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_flags_and_values() {
        let options = parse_options(args(&[
            "--mode",
            "themed",
            "--file",
            "reply.txt",
            "--speakers",
            "黎深, ISTJ,,",
            "--reopen-summary",
            "--json",
        ]))
        .expect("options");

        assert_eq!(
            options,
            CliOptions {
                mode: Some(ConversationMode::Themed),
                file: Some(PathBuf::from("reply.txt")),
                speakers: Some(vec!["黎深".to_string(), "ISTJ".to_string()]),
                reopen_summary: true,
                json: true,
                ..CliOptions::default()
            }
        );
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = parse_options(args(&["--source"])).expect_err("missing value");
        assert_eq!(err.to_string(), "--source requires a value");
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let err = parse_options(args(&["--verbose"])).expect_err("unknown flag");
        assert_eq!(err.to_string(), "unsupported argument: --verbose");
    }

    #[test]
    fn unknown_mode_is_an_error() {
        assert!(parse_options(args(&["--mode", "opera"])).is_err());
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[conversation]\nmode = \"themed\"\n\n[reveal]\ninterval_ms = 200\n",
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("config");
        assert_eq!(config.conversation.mode, ConversationMode::Themed);
        assert_eq!(config.reveal.interval(), Duration::from_millis(200));
        assert_eq!(config.feed.default_source, "scripted");
    }

    #[test]
    fn cli_speakers_override_config_speakers() {
        let mut config = Config::default();
        config.conversation.speakers = vec!["ENTJ".to_string()];
        let options = CliOptions {
            speakers: Some(vec!["ISTJ".to_string(), "INTJ".to_string()]),
            ..CliOptions::default()
        };

        let state = build_state(&config, &options, ConversationMode::Generic).expect("state");
        assert_eq!(state.speakers.as_slice(), ["ISTJ", "INTJ"]);
    }

    #[test]
    fn history_dir_prefers_the_flag() {
        let mut config = Config::default();
        config.conversation.history_dir = Some(PathBuf::from("/tmp/from-config"));
        let options = CliOptions {
            dir: Some(PathBuf::from("here")),
            ..CliOptions::default()
        };
        assert_eq!(history_dir(&config, &options), PathBuf::from("here"));
        assert_eq!(
            history_dir(&config, &CliOptions::default()),
            PathBuf::from("/tmp/from-config")
        );
    }
}
