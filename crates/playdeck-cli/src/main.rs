//! playdeck - terminal client for the tool playground

mod commands;
mod config;
mod render;
mod session;

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use playdeck_session::{
    HttpTransport, PlaygroundSession, SessionConfig, SessionHandle, TerminalOutcome,
};
use playdeck_wire::HttpClient;
use tokio::sync::mpsc;

use commands::CommandResult;

/// Exit code for a one-shot turn that paused for user input
const EXIT_PAUSED: i32 = 2;

/// playdeck - chat with the tool playground from a terminal
#[derive(Parser, Debug)]
#[command(name = "playdeck")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in non-interactive mode with a single message
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Use the buffered endpoint instead of streaming
    #[arg(long)]
    buffered: bool,

    /// Model id sent with requests and used for cost estimates
    #[arg(short, long)]
    model: Option<String>,

    /// Playground server, e.g. http://localhost:3000
    #[arg(long)]
    base_url: Option<String>,

    /// Verbose output (debug logs and reasoning on stderr)
    #[arg(short, long)]
    verbose: bool,

    /// Resume a previous session by ID
    #[arg(long)]
    resume: Option<String>,

    /// List saved sessions
    #[arg(long)]
    sessions: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Clear server-side history for a session ID and exit
    #[arg(long)]
    clear_session: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("playdeck=debug")
            .with_writer(io::stderr)
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    if args.sessions {
        return list_sessions();
    }

    // CLI takes precedence over the config file
    let mut cfg = config::Config::load();
    if let Some(base_url) = args.base_url.clone() {
        cfg.base_url = base_url;
    }
    if args.model.is_some() {
        cfg.model = args.model.clone();
    }
    cfg.buffered |= args.buffered;

    let client = HttpClient::new(cfg.endpoints()?);

    if let Some(ref session_id) = args.clear_session {
        client.clear_session(session_id).await?;
        println!("Cleared server-side history for {}", session_id);
        return Ok(());
    }

    let mut session_config = SessionConfig {
        model: cfg.model.clone(),
        context: cfg.context_json(),
        buffered: cfg.buffered,
        max_auto_steps: cfg.max_auto_steps,
        rates: cfg.rate_table(),
        ..SessionConfig::default()
    };

    let mut history = Vec::new();
    let mut store = None;
    if let Some(ref session_id) = args.resume {
        match session::SessionManager::load(session_id) {
            Ok((manager, turns)) => {
                println!("Resuming session {} ({} turns)", session_id, turns.len());
                session_config.session_id = session_id.clone();
                history = turns;
                store = Some(manager);
            }
            Err(e) => {
                eprintln!("Error loading session: {}", e);
                std::process::exit(1);
            }
        }
    }

    let transport = Arc::new(HttpTransport::new(client));
    let mut playground = PlaygroundSession::new(session_config, transport).with_history(history);

    if store.is_none() {
        let model = cfg.model.as_deref().unwrap_or("default");
        store = match session::SessionManager::new(playground.session_id(), model, &cfg.base_url) {
            Ok(manager) => Some(manager),
            Err(e) => {
                tracing::warn!("Transcript disabled: {}", e);
                None
            }
        };
    }

    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let renderer = render::spawn_renderer(playground.subscribe(), args.verbose, done_tx);
    spawn_interrupt_handler(playground.handle());

    let result = match args.command {
        Some(ref command) => run_command(&mut playground, store.as_mut(), command, done_rx).await,
        None => run_interactive(&mut playground, store.as_mut(), done_rx).await,
    };

    renderer.abort();
    result
}

/// Ctrl-C cancels the step in flight, or exits when nothing is running
fn spawn_interrupt_handler(handle: SessionHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_running() {
                eprintln!("\n[cancelling]");
                handle.abort();
            } else {
                std::process::exit(130);
            }
        }
    });
}

/// Wait until the renderer has printed the turn's terminal event
async fn wait_rendered(done_rx: &mut mpsc::UnboundedReceiver<()>) {
    let _ = tokio::time::timeout(Duration::from_secs(2), done_rx.recv()).await;
}

fn save_transcript(playground: &PlaygroundSession, store: Option<&mut session::SessionManager>) {
    if let Some(store) = store {
        if let Err(e) = store.sync(playground.history()) {
            tracing::warn!("Failed to save transcript: {}", e);
        }
    }
}

fn print_usage_line(playground: &PlaygroundSession) {
    if !io::stdout().is_terminal() {
        return;
    }
    if let Some(usage) = playground.usage() {
        match playground.cost() {
            Some(cost) => println!(
                "[{} in, {} out | ${:.4}]",
                usage.input_tokens, usage.output_tokens, cost.total
            ),
            None => println!("[{} in, {} out]", usage.input_tokens, usage.output_tokens),
        }
    }
}

async fn run_command(
    playground: &mut PlaygroundSession,
    store: Option<&mut session::SessionManager>,
    command: &str,
    mut done_rx: mpsc::UnboundedReceiver<()>,
) -> anyhow::Result<()> {
    let outcome = playground.send(command).await?;
    wait_rendered(&mut done_rx).await;
    save_transcript(playground, store);
    print_usage_line(playground);

    match outcome {
        TerminalOutcome::Failed(_) => std::process::exit(1),
        TerminalOutcome::AwaitingUserInput(_) => {
            eprintln!("Turn paused for input; run interactively to answer.");
            std::process::exit(EXIT_PAUSED);
        }
        _ => Ok(()),
    }
}

async fn run_interactive(
    playground: &mut PlaygroundSession,
    mut store: Option<&mut session::SessionManager>,
    mut done_rx: mpsc::UnboundedReceiver<()>,
) -> anyhow::Result<()> {
    if io::stderr().is_terminal() {
        let model = playground.config().model.as_deref().unwrap_or("default model");
        let short_id: String = playground.session_id().chars().take(8).collect();
        eprintln!("playdeck ({}) session: {}", model, short_id);
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        if playground.phase().is_paused() {
            print!("answer> ");
        } else {
            print!("> ");
        }
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let turn = if let Some(result) = commands::execute_command(input) {
            match result {
                CommandResult::Exit => break,
                CommandResult::Message(msg) => {
                    println!("{}", msg);
                    None
                }
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                    None
                }
                CommandResult::Clear => {
                    match playground.clear_history().await {
                        Ok(()) => {
                            if let Some(ref mut s) = store {
                                if let Err(e) = s.reset() {
                                    tracing::warn!("Failed to reset transcript: {}", e);
                                }
                            }
                            println!("Cleared conversation.");
                        }
                        Err(e) => println!("Clear failed: {}", e),
                    }
                    None
                }
                CommandResult::Usage => {
                    println!(
                        "{}",
                        commands::format_usage(playground.usage(), playground.cost())
                    );
                    None
                }
                CommandResult::Tools => {
                    let visible = playground.toggle_tools_visible();
                    println!(
                        "{}",
                        commands::format_tools(&playground.recent_tools(), visible)
                    );
                    None
                }
                CommandResult::DebugCopy => {
                    let clipboard = commands::SystemClipboard::new();
                    match playground.copy_debug(&clipboard) {
                        Ok(_) if clipboard.printed() => {
                            println!("No clipboard available; debug export printed above.")
                        }
                        Ok(_) => println!("Debug export copied to the clipboard."),
                        Err(e) => println!("Debug export failed: {}", e),
                    }
                    None
                }
                CommandResult::DebugSave(path) => {
                    let target = path.unwrap_or_else(|| PathBuf::from("."));
                    match playground.save_debug(&target) {
                        Ok(saved) => println!("Saved debug export to {}", saved.display()),
                        Err(e) => println!("Debug export failed: {}", e),
                    }
                    None
                }
                CommandResult::Cancel => {
                    if playground.abandon() {
                        save_transcript(playground, store.as_deref_mut());
                        println!("Abandoned the paused turn.");
                    } else {
                        println!("No paused turn to cancel.");
                    }
                    None
                }
                CommandResult::Pick(index) => Some(playground.pick(index).await),
            }
        } else if playground.phase().is_paused() {
            Some(playground.resume(input).await)
        } else {
            Some(playground.send(input).await)
        };

        match turn {
            Some(Ok(_)) => {
                wait_rendered(&mut done_rx).await;
                save_transcript(playground, store.as_deref_mut());
                print_usage_line(playground);
            }
            Some(Err(e)) => println!("{}", e),
            None => {}
        }
        println!();
    }

    if let Some(s) = store {
        eprintln!("Session saved. Resume with: playdeck --resume {}", s.id());
    }
    Ok(())
}

fn list_sessions() -> anyhow::Result<()> {
    match session::SessionManager::list_sessions() {
        Ok(sessions) => {
            if sessions.is_empty() {
                println!("No saved sessions found.");
                println!(
                    "Sessions are stored in: {}",
                    session::SessionManager::sessions_dir().display()
                );
            } else {
                println!("Saved sessions:\n");
                println!(
                    "{:<38} {:<18} {:<7} {:<16} Server",
                    "ID", "Created", "Turns", "Model"
                );
                println!("{}", "-".repeat(100));
                for s in sessions {
                    println!(
                        "{:<38} {:<18} {:<7} {:<16} {}",
                        s.id,
                        s.created_at_display(),
                        s.turn_count,
                        s.model,
                        s.base_url
                    );
                }
                println!("\nResume with: playdeck --resume <session-id>");
            }
        }
        Err(e) => {
            eprintln!("Error listing sessions: {}", e);
        }
    }
    Ok(())
}
