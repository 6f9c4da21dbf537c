use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use iopsdata_core::{ChatClient, ChatMessage, ChatSession, Config, Provider};
use log::{info, warn};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "iopsdata", version)]
#[command(about = "Ask questions about your data from the terminal")]
struct Cli {
    /// Chat service base URL (overrides config and IOPSDATA_API_URL)
    #[arg(long)]
    api_url: Option<String>,
    /// Connection the question is about
    #[arg(short, long)]
    connection: Option<String>,
    /// LLM provider (groq, openai, anthropic, gemini, openrouter, ollama)
    #[arg(short, long)]
    provider: Option<String>,
    /// SQL dialect hint, e.g. postgresql
    #[arg(long)]
    dialect: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and stream the answer to stdout
    Ask {
        /// Your question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Full-screen mode owns stderr, so logs go to a file there
    let log_file = match cli.command {
        None => dirs::data_local_dir().map(|dir| dir.join("iopsdata").join("iopsdata.log")),
        Some(_) => None,
    };
    init_logging(log_file);

    let config = load_config(&cli)?;
    let client = ChatClient::from_config(&config)?;
    info!("Using chat service at {}", client.chat_url());

    match cli.command {
        Some(Commands::Ask { question }) => run_ask(&config, &client, &question.join(" ")).await,
        None => run_tui(&config, client).await,
    }
}

fn init_logging(log_file: Option<PathBuf>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(_) => {
                builder.filter_level(log::LevelFilter::Off);
            }
        }
    }

    let _ = builder.try_init();
}

/// Config file, then environment, then command-line flags
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()
        .unwrap_or_else(|e| {
            warn!("Ignoring unreadable config: {}", e);
            Config::new()
        })
        .with_env();

    if let Some(url) = &cli.api_url {
        config.api_url = Some(url.clone());
    }
    if let Some(connection) = &cli.connection {
        config.connection_id = Some(connection.clone());
    }
    if let Some(name) = &cli.provider {
        let provider = Provider::from_str(name).ok_or_else(|| anyhow!("Unknown provider: {}", name))?;
        config.provider = Some(provider.as_str().to_string());
    }
    if let Some(dialect) = &cli.dialect {
        config.dialect = Some(dialect.clone());
    }

    Ok(config)
}

async fn run_ask(config: &Config, client: &ChatClient, question: &str) -> Result<()> {
    let mut session = ChatSession::new().with_sql_extraction(config.extract_sql());
    let id = session.begin(question)?;

    let stdout = io::stdout();
    let live = stdout.is_terminal();
    let mut printer = ReplyPrinter::new(stdout, live);
    let outcome = client
        .ask(question.trim(), id, |update| {
            printer.update(&update.content);
            session.apply(update);
            ControlFlow::Continue(())
        })
        .await;

    let mut failure = None;
    session.finish(id, outcome, |n| failure = Some(n));
    if let Some(notification) = failure {
        printer.abandon()?;
        bail!("{}: {}", notification.title, notification.description);
    }

    if let Some(reply) = session.conversation().get(id) {
        printer.finish(reply)?;
    }
    Ok(())
}

/// Writes an `ask` reply to stdout.
///
/// On a terminal, text is shown as it streams in. Otherwise nothing is
/// written until the reply completes, so a failed request leaves no partial
/// answer in a pipe or file.
struct ReplyPrinter<W: Write> {
    out: W,
    live: bool,
    printed: usize,
}

impl<W: Write> ReplyPrinter<W> {
    fn new(out: W, live: bool) -> Self {
        Self { out, live, printed: 0 }
    }

    /// Show the unseen suffix of the cumulative content
    fn update(&mut self, content: &str) {
        if !self.live {
            return;
        }
        if let Some(delta) = content.get(self.printed..) {
            let _ = write!(self.out, "{}", delta);
            let _ = self.out.flush();
            self.printed = content.len();
        }
    }

    /// End a live line cut short by a failure
    fn abandon(&mut self) -> io::Result<()> {
        if self.printed > 0 {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    fn finish(&mut self, reply: &ChatMessage) -> io::Result<()> {
        if !self.live {
            write!(self.out, "{}", reply.content)?;
        }
        writeln!(self.out)?;

        if let Some(sql) = &reply.sql {
            writeln!(self.out, "\n-- SQL\n{}", sql)?;
        }
        if let Some(results) = &reply.results {
            writeln!(self.out, "\n{}", results.columns.join("\t"))?;
            for cells in results.row_texts() {
                writeln!(self.out, "{}", cells.join("\t"))?;
            }
            writeln!(self.out, "({} rows)", results.total_rows())?;
        }
        self.out.flush()
    }
}

async fn run_tui(config: &Config, client: ChatClient) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(config, client, events.sender());

    let result = run_loop(&mut terminal, &mut app, &mut events).await;

    app.shutdown();
    tui::restore()?;
    result
}

async fn run_loop(terminal: &mut tui::Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}
