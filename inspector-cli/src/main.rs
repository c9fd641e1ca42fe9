//! Inspector CLI
//!
//! Talks to a running automation agent to pick UI nodes, inspect their
//! subtree, build selectors and run code against an application.
//!
//! Usage:
//!   inspector --port 8201 pick <target>
//!   inspector --port 8201 selector <target>
//!   inspector --port 8201 eval <target> 'return document.title;'
//!   inspector --port 8201 highlight <target> '{Main}*/Ok'

use std::env;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use inspector::config::{DEFAULT_HOST, DEFAULT_TIMEOUT_MS};
use inspector::{
    resolve, select_and_inspect, Console, Credentials, ElementPicker, Endpoint, HighlightSession,
    InspectOptions, PickerEvent, ScriptExecutor, ScriptRunner,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inspector")]
#[command(about = "Pick, inspect and script UI targets through a remote automation agent")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Print picking progress and debug logs
    #[clap(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Agent host name
    #[clap(long, env = "INSPECTOR_HOST", default_value = DEFAULT_HOST, global = true)]
    host: String,

    /// Plain websocket port; required unless --secure-port is set
    #[clap(long, env = "INSPECTOR_PORT", default_value_t = 0, global = true)]
    port: u16,

    /// TLS websocket port; used instead of --port when set
    #[clap(long, env = "INSPECTOR_SECURE_PORT", global = true)]
    secure_port: Option<u16>,

    /// Authentication token (base64 of user:password)
    #[clap(long, env = "INSPECTOR_CREDENTIALS", hide_env_values = true, global = true)]
    credentials: Option<String>,

    /// Build the token from a user name instead of --credentials
    #[clap(long, global = true)]
    user: Option<String>,

    #[clap(long, global = true)]
    password: Option<String>,

    /// Client-side timeout for code execution, 0 for none
    #[clap(long, env = "INSPECTOR_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS, global = true)]
    timeout_ms: u64,
}

impl ConnectionArgs {
    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.port)
            .with_host(self.host.clone())
            .with_secure_port(self.secure_port)
    }

    fn credentials(&self) -> Credentials {
        match &self.user {
            Some(user) => Credentials::from_user_password(user, self.password.as_deref().unwrap_or_default()),
            None => Credentials::new(self.credentials.clone().unwrap_or_default()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pick a node and print its descriptor
    Pick { target: String },
    /// Run code and print the raw result text
    Run { target: String, code: String },
    /// Evaluate a function body and print its decoded return value
    Eval { target: String, code: String },
    /// Pick a node and print its primary and alternative selectors
    Selector { target: String },
    /// Pick a node and print its inspected subtree
    Inspect {
        target: String,
        /// Let the agent answer from its cached UI model
        #[clap(long)]
        cached_ui: bool,
        /// Collect texts while walking the tree
        #[clap(long)]
        collect_texts: bool,
    },
    /// Highlight the field at a path
    Highlight { target: String, path: String },
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { Level::DEBUG } else { Level::WARN };
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => fallback,
        })
        .unwrap_or(fallback);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Echoes picker progress to stderr until aborted.
fn watch_picker(picker: &ElementPicker) -> tokio::task::JoinHandle<()> {
    let mut events = picker.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PickerEvent::Hover(target)) => eprintln!("hover: {}", target.path),
                Ok(PickerEvent::State(state)) => eprintln!("state: {state:?}"),
                Ok(PickerEvent::Initialized) => eprintln!("picker initialized"),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn pick(picker: &ElementPicker, target: &str, verbose: bool) -> Result<inspector::TargetDescriptor> {
    let watcher = verbose.then(|| watch_picker(picker));
    eprintln!("Select a node in '{target}'...");
    let selected = picker.open(target).await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    selected.with_context(|| format!("Picking on '{target}' failed"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let endpoint = cli.connection.endpoint();
    endpoint
        .validate()
        .context("Pass --port or --secure-port, or set INSPECTOR_PORT")?;
    let timeout_ms = cli.connection.timeout_ms;
    let picker = ElementPicker::new(endpoint.clone());
    let runner = ScriptRunner::new(endpoint, cli.connection.credentials());

    match cli.command {
        Commands::Pick { target } => {
            let selected = pick(&picker, &target, cli.verbose).await?;
            println!("{}", serde_json::to_string_pretty(&selected)?);
        }
        Commands::Run { target, code } => {
            let raw = runner
                .run(&target, &code, timeout_ms)
                .await
                .context("Code execution failed")?;
            println!("{raw}");
        }
        Commands::Eval { target, code } => {
            let mut console = Console::new().with_timeout(timeout_ms);
            let value = console
                .evaluate(&runner, &target, &code)
                .await
                .context("Evaluation failed")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Selector { target } => {
            let selected = pick(&picker, &target, cli.verbose).await?;
            let resolution = resolve(&selected.path_info);
            println!("{}", resolution.primary_text());
            for alternative in resolution.alternative_texts() {
                println!("  {alternative}");
            }
        }
        Commands::Inspect {
            target,
            cached_ui,
            collect_texts,
        } => {
            let options = InspectOptions {
                use_cached_ui: cached_ui,
                collect_texts,
            };
            let watcher = cli.verbose.then(|| watch_picker(&picker));
            eprintln!("Select a node in '{target}'...");
            let inspection = select_and_inspect(&picker, &runner, &target, &options, timeout_ms).await;
            if let Some(watcher) = watcher {
                watcher.abort();
            }
            let inspection = inspection.context("Inspection failed")?;
            println!("{}", serde_json::to_string_pretty(&inspection)?);
        }
        Commands::Highlight { target, path } => {
            let mut session = HighlightSession::new();
            session
                .highlight(&runner, &target, &path, timeout_ms)
                .await
                .with_context(|| format!("Highlighting '{path}' failed"))?;
        }
    }

    Ok(())
}
