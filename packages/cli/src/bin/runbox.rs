use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use runbox_cli::{run_server, Config};
use runbox_runner::{
    Lifecycle, LogEvent, LogSubscription, RunMode, RunOptions, RunOutcome, RunnerConfig,
    StreamKind,
};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runbox")]
#[command(about = "Runbox - run and preview workspace code")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address (overrides RUNBOX_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides RUNBOX_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one file from a workspace and print its events
    Run {
        /// Workspace id under RUNBOX_WORKSPACES_PATH
        workspace: String,
        /// Entry file relative to the workspace root
        #[arg(default_value = "")]
        file: String,
        /// Script timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Resource ceiling for container runs
        #[arg(long, value_enum, default_value = "shared")]
        mode: ModeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Shared,
    Dedicated,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Shared => RunMode::Shared,
            ModeArg::Dedicated => RunMode::Dedicated,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = Config::from_env().context("invalid server configuration")?;
            if let Some(host) = host {
                config.host = host
                    .parse()
                    .with_context(|| format!("invalid bind address '{}'", host))?;
            }
            if let Some(port) = port {
                config.port = port;
            }

            let registry = runbox_runner::init(RunnerConfig::from_env()).await?;
            run_server(config, registry)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Commands::Run {
            workspace,
            file,
            timeout_ms,
            mode,
        } => {
            let success = run_once(&workspace, &file, timeout_ms, mode.into()).await?;
            if !success {
                process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_once(
    workspace: &str,
    file: &str,
    timeout_ms: Option<u64>,
    mode: RunMode,
) -> anyhow::Result<bool> {
    let registry = runbox_runner::init(RunnerConfig::from_env()).await?;
    let mut events = registry.subscribe(workspace);

    let options = RunOptions {
        timeout_ms,
        mode,
        ..RunOptions::default()
    };
    let outcome = match registry.run(workspace, file, options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            drain(&mut events);
            registry.shutdown().await;
            return Err(e.into());
        }
    };

    let success = match &outcome {
        RunOutcome::Unsupported { message, .. } => {
            eprintln!("{} {}", "unsupported:".yellow().bold(), message);
            false
        }
        RunOutcome::Container { preview_url, .. } => {
            println!("{} {}", "preview:".cyan().bold(), preview_url);
            println!("{}", "Press Ctrl-C to stop".dimmed());
            follow(&mut events).await
        }
        RunOutcome::Static { preview_url, .. } => {
            drain(&mut events);
            println!("{} {}", "preview:".cyan().bold(), preview_url);
            true
        }
        RunOutcome::SandboxedScript { success, state, .. } => {
            drain(&mut events);
            println!("{} {}", "finished:".dimmed(), state);
            *success
        }
    };

    registry.shutdown().await;
    Ok(success)
}

/// Print events until the container ends or Ctrl-C.
async fn follow(events: &mut LogSubscription) -> bool {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    let terminal = terminal_success(&event);
                    print_event(&event);
                    if let Some(success) = terminal {
                        return success;
                    }
                }
                None => return false,
            },
            _ = tokio::signal::ctrl_c() => return true,
        }
    }
}

fn drain(events: &mut LogSubscription) {
    while let Some(event) = events.try_recv() {
        print_event(&event);
    }
}

fn terminal_success(event: &LogEvent) -> Option<bool> {
    match event.lifecycle.as_ref()? {
        Lifecycle::Preview { .. } => None,
        Lifecycle::Close { code } => Some(code.unwrap_or(0) == 0),
        Lifecycle::Stopped => Some(true),
        Lifecycle::Crashed { .. } | Lifecycle::TimedOut | Lifecycle::Error { .. } => Some(false),
    }
}

fn print_event(event: &LogEvent) {
    match event.stream {
        StreamKind::Stdout => println!("{}", event.text),
        StreamKind::Stderr => eprintln!("{}", event.text.red()),
        StreamKind::Lifecycle => {
            let name = event.event_name();
            match &event.lifecycle {
                Some(Lifecycle::Preview { url }) => println!("{} {}", name.cyan(), url),
                Some(Lifecycle::Error { message }) => eprintln!("{} {}", name.red().bold(), message),
                Some(Lifecycle::Crashed { code, message }) => eprintln!(
                    "{} code={:?} {}",
                    name.red().bold(),
                    code,
                    message.as_deref().unwrap_or("")
                ),
                Some(Lifecycle::Close { code }) => println!("{} code={:?}", name.dimmed(), code),
                _ => println!("{}", name.yellow()),
            }
        }
    }
}
