//! Interactive chat loop

use anyhow::Result;
use console::style;
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use nebula_agent::{ChainResult, ChatEvent, ConversationChain};
use nebula_core::config::Config;
use nebula_core::credential::{Credential, CredentialHolder};
use nebula_core::session::{Role, SessionStore};
use nebula_providers::{DynamicProvider, OpenAIClient};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Messages reprinted after switching sessions
const RECENT_MESSAGES: usize = 6;

const SPINNER_MESSAGE: &str = "Finding the best answer for you...";

/// Command-line overrides for the chat loop
pub struct ChatOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub stream: bool,
}

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Message(String),
    New(Option<String>),
    Sessions,
    Switch(String),
    History,
    Key,
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

/// Parse a line typed at the prompt
pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Message(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name.to_ascii_lowercase().as_str() {
        "new" => ReplCommand::New((!arg.is_empty()).then(|| arg.to_string())),
        "sessions" | "list" => ReplCommand::Sessions,
        "switch" if arg.is_empty() => ReplCommand::Usage("/switch <number|id>"),
        "switch" => ReplCommand::Switch(arg.to_string()),
        "history" => ReplCommand::History,
        "key" => ReplCommand::Key,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        _ => ReplCommand::Unknown(name.to_string()),
    }
}

/// Map a `/switch` argument (1-based listing number or session id) to an id
pub fn resolve_switch_target(store: &SessionStore, arg: &str) -> Option<String> {
    if let Ok(number) = arg.parse::<usize>() {
        return number
            .checked_sub(1)
            .and_then(|index| store.list().into_iter().nth(index))
            .map(|summary| summary.id);
    }
    store.get(arg).map(|session| session.id.clone())
}

/// Build an HTTP client for the configured endpoint
pub fn build_client(config: &Config, credential: Credential, model: &str) -> Arc<OpenAIClient> {
    Arc::new(OpenAIClient::from_config(&config.provider, credential, model))
}

/// Ask for a key until one passes the format check
fn prompt_for_key(holder: &mut CredentialHolder) -> Result<Credential> {
    loop {
        let raw: String = Password::new()
            .with_prompt("Enter your OpenAI API key")
            .interact()?;

        if let Err(e) = holder.set(raw) {
            println!("{} {}", style("✗").red(), e);
            continue;
        }
        if let Some(credential) = holder.get() {
            println!("{} API key accepted", style("✓").green().bold());
            return Ok(credential.clone());
        }
    }
}

/// One line from `reader`, or `None` at end of input
fn read_line_from<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    match reader.read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

/// Read the next prompt line without blocking the runtime
async fn read_stdin_line() -> Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| read_line_from(&mut io::stdin().lock())).await??;
    Ok(line)
}

fn print_help() {
    println!("{}", style("Commands:").bold());
    println!("  /new [name]      Start a new chat session");
    println!("  /sessions        List sessions");
    println!("  /switch <n|id>   Switch to another session");
    println!("  /history         Show the current conversation");
    println!("  /key             Enter a different API key");
    println!("  /help            Show this help");
    println!("  /quit            Leave nebula");
}

/// State of one interactive run
pub struct ChatApp {
    config: Config,
    model: String,
    stream: bool,
    store: SessionStore,
    credentials: CredentialHolder,
    provider: Arc<DynamicProvider>,
    chain: ConversationChain,
}

impl ChatApp {
    /// Obtain a usable key and open the first session
    pub fn start(mut config: Config, options: ChatOptions) -> Result<Self> {
        if let Some(system_prompt) = options.system_prompt {
            config.chat.system_prompt = system_prompt;
        }
        let model = options.model.unwrap_or_else(|| config.chat.model.clone());

        let mut credentials = CredentialHolder::new();
        let configured = config.provider.api_key.trim();
        if !configured.is_empty() {
            if let Err(e) = credentials.set(configured) {
                warn!("Configured API key failed the format check");
                println!("{} {}", style("The configured API key is not usable:").yellow(), e);
            }
        }
        let credential = match credentials.get().cloned() {
            Some(credential) => credential,
            None => prompt_for_key(&mut credentials)?,
        };

        let provider = Arc::new(DynamicProvider::new(build_client(&config, credential, &model)));
        let chain = ConversationChain::from_config(provider.clone(), &config.chat).with_model(&model);

        let mut store = SessionStore::new();
        let session_id = store.create_session(None);
        info!("Chat started with model {} in session {}", model, session_id);

        Ok(Self {
            config,
            model,
            stream: options.stream,
            store,
            credentials,
            provider,
            chain,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        loop {
            print!("{} ", style("You ›").bold().green());
            io::stdout().flush()?;

            let Some(line) = read_stdin_line().await? else {
                println!();
                break;
            };

            match parse_command(&line) {
                ReplCommand::Empty => continue,
                ReplCommand::Message(text) => self.send(&text).await?,
                ReplCommand::New(name) => {
                    let id = self.store.create_session(name.as_deref());
                    let name = self
                        .store
                        .get(&id)
                        .map(|session| session.name.clone())
                        .unwrap_or_default();
                    info!("Created session {} ({})", id, name);
                    println!("{} Started {}", style("✓").green().bold(), style(name).bold());
                }
                ReplCommand::Sessions => self.print_sessions(),
                ReplCommand::Switch(target) => self.switch(&target),
                ReplCommand::History => self.print_history(None),
                ReplCommand::Key => self.replace_key()?,
                ReplCommand::Help => print_help(),
                ReplCommand::Quit => break,
                ReplCommand::Usage(usage) => println!("Usage: {}", usage),
                ReplCommand::Unknown(name) => {
                    println!("Unknown command /{}. Type /help for a list.", name)
                }
            }
        }

        println!("{}", style("Goodbye!").cyan());
        Ok(())
    }

    fn print_banner(&self) {
        println!("{}", style("Nebula").bold().cyan());
        println!("Model: {}", self.model);
        println!("Type a message to chat, or /help for commands.\n");
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let session_id = match self.store.current_id().map(str::to_string) {
            Some(id) => id,
            None => self.store.create_session(None),
        };

        let result = if self.stream {
            self.ask_streamed(&session_id, text).await
        } else {
            self.ask_blocking(&session_id, text).await?
        };

        match result {
            Ok(_) => {}
            Err(e) if e.is_auth_error() => {
                warn!("API key rejected by the provider");
                println!("{} {}", style("Your API key was rejected:").red(), e);
                self.replace_key()?;
                println!("Please send your message again.");
            }
            Err(e) => {
                error!("Chat request failed: {}", e);
                println!("{}", style(format!("An error occurred: {}", e)).red());
            }
        }
        Ok(())
    }

    async fn ask_blocking(&self, session_id: &str, text: &str) -> Result<ChainResult<String>> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
        spinner.set_message(SPINNER_MESSAGE);
        spinner.enable_steady_tick(Duration::from_millis(100));

        let result = self
            .chain
            .with_history(&self.store)
            .invoke(session_id, text)
            .await;
        spinner.finish_and_clear();

        if let Ok(reply) = &result {
            println!("{} {}", style("Nebula ›").bold().cyan(), reply);
        }
        Ok(result)
    }

    async fn ask_streamed(&self, session_id: &str, text: &str) -> ChainResult<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        print!("{} ", style("Nebula ›").bold().cyan());
        let _ = io::stdout().flush();

        let printer = async {
            while let Some(event) = rx.recv().await {
                match event {
                    ChatEvent::TextDelta(delta) => {
                        print!("{}", delta);
                        let _ = io::stdout().flush();
                    }
                    ChatEvent::Completed { .. } | ChatEvent::Error { .. } => break,
                }
            }
            println!();
        };

        let bound = self.chain.with_history(&self.store);
        let (result, ()) = tokio::join!(bound.stream(session_id, text, &tx), printer);
        result
    }

    /// Drop the current key and swap in a client built with a new one
    fn replace_key(&mut self) -> Result<()> {
        self.credentials.clear();
        let credential = prompt_for_key(&mut self.credentials)?;
        self.provider
            .update(build_client(&self.config, credential, &self.model));
        info!("Provider rebuilt with a new API key");
        Ok(())
    }

    fn switch(&mut self, target: &str) {
        let Some(id) = resolve_switch_target(&self.store, target) else {
            println!(
                "{} No session matches '{}'. Use /sessions to list them.",
                style("✗").red(),
                target
            );
            return;
        };

        if self.store.switch_session(&id) {
            let name = self
                .store
                .current_session()
                .map(|session| session.name.clone())
                .unwrap_or_default();
            println!("{} Switched to {}", style("✓").green().bold(), style(name).bold());
            self.print_history(Some(RECENT_MESSAGES));
        }
    }

    fn print_sessions(&self) {
        println!("{}", style("Sessions").bold().cyan());
        for (index, session) in self.store.list().iter().enumerate() {
            let marker = if session.is_current {
                style("*").green().bold()
            } else {
                style(" ")
            };
            println!(
                "{} {}. {} ({} messages, started {}) {}",
                marker,
                index + 1,
                style(&session.name).bold(),
                session.message_count,
                session.created_at.format("%H:%M:%S"),
                style(&session.id).dim()
            );
        }
    }

    /// Print the current session's messages, optionally only the last `limit`
    fn print_history(&self, limit: Option<usize>) {
        let Some(session) = self.store.current_session() else {
            println!("No active session.");
            return;
        };

        let history = session.history.read();
        if history.is_empty() {
            println!("{}", style("(no messages yet)").dim());
            return;
        }

        let messages = match limit {
            Some(limit) => history.tail(limit),
            None => history.messages(),
        };
        for message in messages {
            let label = match message.role {
                Role::Human => style("You ›").bold().green(),
                Role::Assistant => style("Nebula ›").bold().cyan(),
                Role::System => style("System ›").bold().dim(),
            };
            println!("{} {}", label, message.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_message() {
        assert_eq!(
            parse_command("  hello there \n"),
            ReplCommand::Message("hello there".to_string())
        );
        assert_eq!(parse_command("   \n"), ReplCommand::Empty);
    }

    #[test]
    fn test_parse_slash_commands() {
        assert_eq!(parse_command("/new"), ReplCommand::New(None));
        assert_eq!(
            parse_command("/new  Work notes "),
            ReplCommand::New(Some("Work notes".to_string()))
        );
        assert_eq!(parse_command("/sessions"), ReplCommand::Sessions);
        assert_eq!(parse_command("/SWITCH 2"), ReplCommand::Switch("2".to_string()));
        assert_eq!(parse_command("/switch"), ReplCommand::Usage("/switch <number|id>"));
        assert_eq!(parse_command("/history"), ReplCommand::History);
        assert_eq!(parse_command("/key"), ReplCommand::Key);
        assert_eq!(parse_command("/help"), ReplCommand::Help);
        assert_eq!(parse_command("/exit"), ReplCommand::Quit);
        assert_eq!(parse_command("/bogus"), ReplCommand::Unknown("bogus".to_string()));
    }

    #[test]
    fn test_read_line_from_stops_at_end_of_input() {
        let mut input = io::Cursor::new("/sessions\nhello");
        assert_eq!(
            read_line_from(&mut input).unwrap().as_deref(),
            Some("/sessions\n")
        );
        assert_eq!(read_line_from(&mut input).unwrap().as_deref(), Some("hello"));
        assert_eq!(read_line_from(&mut input).unwrap(), None);
    }

    #[test]
    fn test_resolve_switch_target_by_number_and_id() {
        let mut store = SessionStore::new();
        let first = store.create_session(None);
        let second = store.create_session(Some("Second"));

        assert_eq!(resolve_switch_target(&store, "1"), Some(first.clone()));
        assert_eq!(resolve_switch_target(&store, "2"), Some(second));
        assert_eq!(resolve_switch_target(&store, &first), Some(first));
    }

    #[test]
    fn test_resolve_switch_target_rejects_unknown() {
        let mut store = SessionStore::new();
        store.create_session(None);

        assert_eq!(resolve_switch_target(&store, "0"), None);
        assert_eq!(resolve_switch_target(&store, "3"), None);
        assert_eq!(resolve_switch_target(&store, "not-a-session"), None);
    }
}
