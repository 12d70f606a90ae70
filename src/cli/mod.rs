//! CLI for chatloop: an interactive, session-bound chat.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{default_config_path, ChatLoopConfig};
use crate::error::ChatLoopError;
use crate::provider::create_provider;
use crate::runtime::ConversationRuntime;
use crate::types::{EventStream, StreamEvent};

/// chatloop CLI
#[derive(Parser, Debug)]
#[command(name = "chatloop", version, about = "Multi-turn chat over a streaming provider")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chat interactively; every line is one turn on the same session
    Chat(ChatArgs),
    /// Print the resolved configuration
    Config(ConfigArgs),
}

/// Options shared by commands that resolve configuration.
#[derive(Parser, Debug, Default)]
pub struct ConfigArgs {
    /// Config file (defaults to the per-user config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Provider: openai, zhipu or openai-compatible
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model id
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Max tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Session token; reuse it to keep talking to the same thread
    #[arg(long, default_value = "default")]
    pub session: String,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Config file (explicit or default), then environment, then flags.
pub fn resolve_config(args: &ConfigArgs) -> Result<ChatLoopConfig, ChatLoopError> {
    let config = match &args.config {
        Some(path) => {
            let _ = dotenvy::dotenv();
            ChatLoopConfig::load(path)?.apply_env_with(|key| std::env::var(key).ok())?
        }
        None => ChatLoopConfig::load_default()?,
    };
    apply_flags(config, args)
}

fn apply_flags(mut config: ChatLoopConfig, args: &ConfigArgs) -> Result<ChatLoopConfig, ChatLoopError> {
    if let Some(provider) = &args.provider {
        config.provider.kind = provider
            .parse()
            .map_err(|_| ChatLoopError::Configuration(format!("Unknown provider '{provider}'")))?;
    }
    if let Some(model) = &args.model {
        config.provider.model = model.clone();
    }
    if let Some(system) = &args.system {
        config.system_prompt = Some(system.clone());
    }
    if let Some(t) = args.temperature {
        config.generation.temperature = Some(t);
    }
    if let Some(max) = args.max_tokens {
        config.generation.max_tokens = Some(max);
    }
    Ok(config)
}

/// `chatloop config`
pub fn show_config(args: &ConfigArgs) -> Result<(), ChatLoopError> {
    let config = resolve_config(args)?;
    if let Some(path) = default_config_path() {
        println!("# default config path: {}", path.display());
    }
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some("<redacted>".into());
    }
    let rendered = toml::to_string_pretty(&shown)
        .map_err(|e| ChatLoopError::Configuration(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

/// `chatloop chat`
pub async fn run_chat(args: &ChatArgs) -> Result<(), ChatLoopError> {
    let config = resolve_config(&args.config)?;
    let provider = create_provider(&config)?;
    let runtime = ConversationRuntime::new(provider).with_config(&config);
    let session = args.session.as_str();

    eprintln!(
        "chatloop: {} / {} (session '{session}'). /retry re-runs a failed turn, /quit exits.",
        config.provider.kind, config.provider.model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/retry" => print_turn(runtime.retry(session)).await,
            text => print_turn(runtime.submit(session, text)).await,
        }
    }

    runtime.end_session(session);
    Ok(())
}

async fn print_turn(mut events: EventStream) {
    let mut announced = HashSet::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event {
            Ok(StreamEvent::TextDelta { text }) => {
                print!("{text}");
                let _ = stdout.flush();
            }
            Ok(StreamEvent::ToolCallDelta { index, name, .. }) => {
                if !name.is_empty() && announced.insert(index) {
                    eprintln!("\n[tool] {name}");
                }
            }
            Ok(StreamEvent::Completion { .. }) => {
                println!();
            }
            Err(e) => {
                eprintln!("\nerror: {e}");
                if e.is_retryable() {
                    eprintln!("(type /retry to try again)");
                }
            }
        }
    }
}
