//! gutenchat CLI — talk to the assistant endpoint from a terminal.
//!
//! Usage:
//!   gutenchat chat      — Start an interactive chat session
//!   gutenchat onboard   — Create a starter settings file
//!   gutenchat status    — Show resolved settings and health

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Write};

use gutenchat_core::client::{ChatCompletionClient, ClientOptions, HttpTransport};
use gutenchat_core::config::{self, AmbientSource};
use gutenchat_core::message::{ConversationMessage, StreamChunk};
use gutenchat_core::StreamEvent;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "gutenchat",
    version,
    about = "Chat client for the gutenchat editor assistant",
    long_about = "gutenchat — command-line access to the editor assistant's chat endpoint.\n\nSettings come from GUTENCHAT_SETTINGS or ~/.gutenchat/settings.json."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Model to use (overrides the default)
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt for the session
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Create or reset the starter settings file
    Onboard,

    /// Show resolved settings and health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Chat { model, system }) => cmd_chat(model, system).await?,
        Some(Commands::Onboard) => cmd_onboard()?,
        Some(Commands::Status) => cmd_status()?,
        None => cmd_chat(None, None).await?,
    }

    Ok(())
}

// ── Chat Command ────────────────────────────────────────────────────

async fn cmd_chat(model_override: Option<String>, system: Option<String>) -> Result<()> {
    let mut options = ClientOptions::default();
    if let Some(model) = model_override {
        options.model = model;
    }

    let client = ChatCompletionClient::with_parts(
        Arc::new(HttpTransport::new()),
        Arc::new(AmbientSource),
        options.clone(),
    );

    let settings = client.settings().clone();
    if settings.is_inert() {
        anyhow::bail!(
            "No settings found. Run `gutenchat onboard`, then edit {}",
            config::settings_path().display()
        );
    }

    println!();
    println!("  gutenchat v{}", env!("CARGO_PKG_VERSION"));
    println!("  Endpoint: {} | Model: {}", settings.endpoint_url(), options.model);
    println!();
    println!("  Type your message, or /quit to exit.");
    println!("  ─────────────────────────────────────");
    println!();

    let mut history: Vec<ConversationMessage> = Vec::new();
    if let Some(prompt) = system {
        history.push(ConversationMessage::system(&prompt));
    }

    let stdin = io::stdin();
    loop {
        print!("  \x1b[36m>\x1b[0m ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        match input {
            "/quit" | "/exit" | "/q" => break,
            "/clear" => {
                history.retain(|m| m.role == gutenchat_core::Role::System);
                println!("  History cleared.");
                continue;
            }
            _ => {}
        }

        history.push(ConversationMessage::user(input));
        let request = client.request(history.clone(), &[]);
        let mut events = client.stream_completion(request);

        print!("  \x1b[32m");
        io::stdout().flush()?;

        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Chunk(StreamChunk::Content(token)) => {
                    print!("{token}");
                    io::stdout().flush()?;
                }
                StreamEvent::Chunk(StreamChunk::ToolCalls(_)) => {}
                StreamEvent::Completed { message, tool_calls } => {
                    println!("\x1b[0m");
                    if let Some(calls) = &tool_calls {
                        for call in calls {
                            println!(
                                "  \x1b[33m[tool call] {}({})\x1b[0m",
                                call.name,
                                serde_json::Value::Object(call.arguments.clone())
                            );
                        }
                    }
                    println!();
                    if !message.is_empty() || tool_calls.is_some() {
                        history.push(ConversationMessage::assistant_with_tool_calls(
                            if message.is_empty() { None } else { Some(message.as_str()) },
                            tool_calls.unwrap_or_default(),
                            Vec::new(),
                        ));
                    }
                }
                StreamEvent::Failed(e) => {
                    println!("\x1b[0m");
                    eprintln!("  \x1b[31mError: {e}\x1b[0m\n");
                    // Drop the failed turn so history stays valid.
                    history.pop();
                }
            }
        }
    }

    println!("  Goodbye!");
    Ok(())
}

// ── Onboard Command ─────────────────────────────────────────────────

fn cmd_onboard() -> Result<()> {
    let path = config::write_default_template()?;
    println!();
    println!("  Settings template created at:");
    println!("     {}", path.display());
    println!();
    println!("  Next steps:");
    println!("  1. Paste the REST nonce and URL from your editor session");
    println!("  2. Run `gutenchat chat` to start chatting");
    println!();
    Ok(())
}

// ── Status Command ──────────────────────────────────────────────────

fn cmd_status() -> Result<()> {
    let client = ChatCompletionClient::new();
    let settings = client.settings();

    println!();
    println!("  gutenchat status");
    println!("  ─────────────────────────────────────");

    if settings.is_inert() {
        println!("  Settings:  not found (run `gutenchat onboard`)");
        println!("  Expected:  {}", config::settings_path().display());
        println!();
        return Ok(());
    }

    println!("  Endpoint:  {}", settings.endpoint_url());
    println!("  Home URL:  {}", settings.home_url);
    println!(
        "  Nonce:     {}",
        if settings.nonce.is_empty() { "missing" } else { "set" }
    );
    match settings.current_user.get("name").and_then(|v| v.as_str()) {
        Some(name) => println!("  User:      {name}"),
        None => println!("  User:      unknown"),
    }

    println!();
    Ok(())
}
