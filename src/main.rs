//! chat-stream CLI - streamed chat against OpenAI-compatible and DashScope models

use anyhow::Result;
use chat_stream::{
    config::Config,
    conversation::Message,
    orchestrator::StreamOutcome,
    tui::{build_orchestrator, follow_reply, renderer::TerminalRenderer, InteractiveShell},
};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "chat-stream")]
#[command(about = "Stream chat replies from OpenAI-compatible and DashScope models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat shell
    Chat {
        /// Profile to start with (default: the configured default profile)
        #[arg(short, long)]
        profile: Option<String>,

        /// Answer from the template provider instead of the network
        #[arg(long)]
        mock: bool,
    },

    /// Ask a single question and stream the answer
    Ask {
        /// Prompt text
        prompt: String,

        #[arg(short, long)]
        profile: Option<String>,

        #[arg(long)]
        mock: bool,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show {
        /// Show a single profile, or the transport / chat section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    // Streamed replies own stdout
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Chat { profile, mock } => {
            run_chat(profile, mock).await?;
        }
        Commands::Ask {
            prompt,
            profile,
            mock,
        } => {
            run_ask(&prompt, profile, mock).await?;
        }
        Commands::Config(cmd) => {
            run_config_command(cmd)?;
        }
    }

    Ok(())
}

async fn run_chat(profile: Option<String>, mock: bool) -> Result<()> {
    let config = Config::load()?;
    if !mock {
        if let Err(e) = config.validate() {
            eprintln!("Warning: {}", e);
            eprintln!("Run 'chat-stream config validate' for details, or use --mock.");
        }
    }

    let mut shell = InteractiveShell::new(config, profile, mock).await?;
    shell.run().await
}

async fn run_ask(prompt: &str, profile: Option<String>, mock: bool) -> Result<()> {
    let config = Config::load()?;
    let model_config = config.model_config(profile.as_deref())?;
    info!(provider = %model_config.provider, model = %model_config.model_name, "Asking");

    let (orchestrator, mut events) = build_orchestrator(&config, mock)?;
    let renderer = TerminalRenderer::new();
    let handle = orchestrator
        .start(Uuid::new_v4(), Message::user(prompt), model_config)
        .await;

    let (outcome, content) = follow_reply(
        &orchestrator,
        &mut events,
        &handle,
        &renderer,
        config.chat.show_reasoning,
    )
    .await;

    match outcome {
        StreamOutcome::Completed => {
            renderer.render_markdown(&content);
            Ok(())
        }
        StreamOutcome::Failed(err) => anyhow::bail!(err.user_message()),
        StreamOutcome::Cancelled => anyhow::bail!("cancelled"),
    }
}

fn run_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => config_init(force)?,
        ConfigCommands::Show { section } => config_show(section)?,
        ConfigCommands::Path => config_path(),
        ConfigCommands::Validate => config_validate()?,
    }
    Ok(())
}

fn config_init(force: bool) -> Result<()> {
    let path = Config::default_path();

    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    Config::default().save()?;

    println!("Configuration file created at: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file to add API keys to the profiles, or");
    println!("  2. Set environment variables:");
    println!("     export DEEPSEEK_API_KEY=your_deepseek_key");
    println!("     export DASHSCOPE_API_KEY=your_dashscope_key");

    Ok(())
}

fn config_show(section: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    for profile in config.profiles.values_mut() {
        if profile.api_key.is_some() {
            profile.api_key = Some("***".to_string());
        }
    }

    let display = match section.as_deref().map(str::to_lowercase).as_deref() {
        None => toml::to_string_pretty(&config)?,
        Some("transport") => toml::to_string_pretty(&config.transport)?,
        Some("chat") => toml::to_string_pretty(&config.chat)?,
        Some(name) => match config.profiles.get(name) {
            Some(profile) => toml::to_string_pretty(profile)?,
            None => {
                println!("Unknown section: {}", name);
                let profiles: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
                println!("Available: transport, chat, {}", profiles.join(", "));
                return Ok(());
            }
        },
    };

    println!("{}", display);

    println!("\n--- Environment Variables ---");
    for name in [
        "DEEPSEEK_API_KEY",
        "OPENAI_API_KEY",
        "DASHSCOPE_API_KEY",
        "CHAT_STREAM_PROFILE",
    ] {
        let state = if std::env::var(name).is_ok() { "set" } else { "not set" };
        println!("{}: {}", name, state);
    }

    Ok(())
}

fn config_path() {
    let path = Config::default_path();
    println!("{}", path.display());

    if path.exists() {
        println!("(file exists)");
    } else {
        println!("(file does not exist - run 'config init' to create)");
    }
}

fn config_validate() -> Result<()> {
    let config = Config::load()?;

    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid!");
            println!();
            println!("Profiles:");
            for (name, profile) in &config.profiles {
                let key = if profile.api_key.as_deref().map_or(false, |k| !k.is_empty()) {
                    "key set"
                } else {
                    "NO API KEY"
                };
                let marker = if *name == config.default_profile { "*" } else { " " };
                println!(
                    "  {} {} ({} / {}): {}",
                    marker, name, profile.provider, profile.model, key
                );
            }
        }
        Err(e) => {
            println!("Configuration validation failed:");
            println!("  {}", e);
            println!();
            println!("To fix, either:");
            println!("  1. Add an api_key to the profile in {}", Config::default_path().display());
            println!("  2. Set environment variables: export DEEPSEEK_API_KEY=your_key");
        }
    }

    Ok(())
}
