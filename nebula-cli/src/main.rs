//! CLI entry point for nebula

mod repl;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input, Password};
use nebula_agent::ConversationChain;
use nebula_core::config::{Config, ConfigLoader};
use nebula_core::credential::{validate_api_key, Credential};
use nebula_core::logging::{init_logging, WorkerGuard};
use nebula_core::session::SessionStore;
use std::path::PathBuf;
use tracing::{error, info};

use repl::{build_client, ChatApp, ChatOptions};

#[derive(Parser)]
#[command(name = "nebula")]
#[command(about = "Chat with OpenAI-compatible models from your terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Also write logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat (default)
    Chat {
        /// Model to use
        #[arg(short, long)]
        model: Option<String>,
        /// System instruction for new conversations
        #[arg(short, long)]
        system_prompt: Option<String>,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Send a single message and print the reply
    Ask {
        /// Message to send
        #[arg(short, long)]
        message: String,
        /// Model to use
        #[arg(long)]
        model: Option<String>,
    },
    /// Show the effective configuration
    Status,
    /// Create a configuration file interactively
    Onboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    ConfigLoader::load_dotenv();
    let config_loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    };

    let command = cli.command.unwrap_or(Commands::Chat {
        model: None,
        system_prompt: None,
        no_stream: false,
    });

    match command {
        Commands::Chat {
            model,
            system_prompt,
            no_stream,
        } => {
            let (config, _log_guard) = prepare(&config_loader, cli.verbose)?;
            let options = ChatOptions {
                model,
                system_prompt,
                stream: config.chat.stream && !no_stream,
            };
            let mut app = ChatApp::start(config, options)?;
            app.run().await?;
        }
        Commands::Ask { message, model } => {
            let (config, _log_guard) = prepare(&config_loader, cli.verbose)?;
            run_ask(&config, &message, model).await?;
        }
        Commands::Status => {
            let (config, _log_guard) = prepare(&config_loader, cli.verbose)?;
            run_status(&config_loader, &config);
        }
        Commands::Onboard => {
            run_onboard(&config_loader)?;
        }
    }

    Ok(())
}

/// Load the configuration and start logging
fn prepare(loader: &ConfigLoader, verbose: bool) -> Result<(Config, WorkerGuard)> {
    let mut config = loader.load()?;
    if verbose {
        config.logging.console = true;
    }
    let guard = init_logging(&config.logging)?;
    info!("Configuration loaded from {}", loader.config_dir().display());
    Ok((config, guard))
}

/// Credential from the loaded configuration, without prompting
fn configured_credential(config: &Config) -> Result<Credential> {
    let raw = config.provider.api_key.trim();
    if raw.is_empty() {
        anyhow::bail!("No API key configured. Set OPENAI_API_KEY or run `nebula onboard`.");
    }
    Ok(Credential::parse(raw)?)
}

async fn run_ask(config: &Config, message: &str, model: Option<String>) -> Result<()> {
    let credential = configured_credential(config)?;
    let model = model.unwrap_or_else(|| config.chat.model.clone());

    let provider = build_client(config, credential, &model);
    let chain = ConversationChain::from_config(provider, &config.chat).with_model(&model);
    let mut store = SessionStore::new();
    let session_id = store.create_session(None);

    match chain.with_history(&store).invoke(&session_id, message).await {
        Ok(reply) => {
            println!("{}", reply);
            Ok(())
        }
        Err(e) => {
            error!("One-shot request failed: {}", e);
            anyhow::bail!("An error occurred: {}", e);
        }
    }
}

fn run_status(loader: &ConfigLoader, config: &Config) {
    println!("{}", style("Nebula Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config directory: {}", loader.config_dir().display());
    let config_path = loader.config_path();
    if config_path.exists() {
        println!("  Config file: {}", config_path.display());
    } else {
        println!("  Config file: {}", style("not found (using defaults)").dim());
    }
    println!("  Log directory: {}", config.logging.dir);
    println!();

    println!("{}", style("Chat:").bold());
    println!("  Model: {}", config.chat.model);
    println!("  Temperature: {}", config.chat.temperature);
    println!("  Streaming: {}", if config.chat.stream { "on" } else { "off" });
    println!();

    println!("{}", style("Provider:").bold());
    println!("  API base: {}", config.provider.api_base);
    println!("  Timeout: {}s", config.provider.timeout_secs);
    let key_status = match Credential::parse(config.provider.api_key.as_str()) {
        Ok(credential) => style(credential.masked()).green(),
        Err(_) if config.provider.api_key.trim().is_empty() => style("not set".to_string()).red(),
        Err(_) => style("invalid format".to_string()).yellow(),
    };
    println!("  API key: {}", key_status);
}

/// Run the onboard wizard
fn run_onboard(loader: &ConfigLoader) -> Result<()> {
    println!("{}", style("Welcome to Nebula!").bold().cyan());
    println!("Let's set up your configuration.\n");

    let config_path = loader.config_path();
    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt("Configuration already exists. Overwrite?")
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Onboard cancelled.");
            return Ok(());
        }
    }

    let mut config = Config::default();

    let api_key: String = Password::new()
        .with_prompt("Enter your OpenAI API key (leave empty to enter it at chat time)")
        .allow_empty_password(true)
        .validate_with(|key: &String| -> Result<(), &'static str> {
            if key.trim().is_empty() || validate_api_key(key.trim()) {
                Ok(())
            } else {
                Err("API keys start with 'sk-' and are longer than 40 characters")
            }
        })
        .interact()?;
    config.provider.api_key = api_key.trim().to_string();

    config.chat.model = Input::new()
        .with_prompt("Model")
        .default(config.chat.model.clone())
        .interact_text()?;

    config.provider.api_base = Input::new()
        .with_prompt("API base URL")
        .default(config.provider.api_base.clone())
        .interact_text()?;

    config.chat.stream = Confirm::new()
        .with_prompt("Stream replies as they are generated?")
        .default(true)
        .interact()?;

    loader.save(&config)?;

    println!(
        "\n{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nYou can now run:");
    println!("  {} - Start chatting", style("nebula").cyan());
    println!(
        "  {} - Ask a single question",
        style("nebula ask --message 'Hello!'").cyan()
    );

    Ok(())
}
