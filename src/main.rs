mod cli;

use anyhow::{anyhow, Context, Result};
use cli::{Cli, Commands, StreamArgs, ViewArgs};
use std::fs::File;
use std::io::{self, BufRead, IsTerminal};
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use camlink::capture::TestPatternSource;
use camlink::config::{read_config_file, ConfigFile, StreamSettings, ViewSettings};
use camlink::protocol::Command;
use camlink::session::{SessionEvent, Streamer};
use camlink::viewer::terminal::{create_picker, TerminalPresenter};
use camlink::viewer::{headless, PresentSink, Receiver};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Stream(args) => stream(args).await,
        Commands::View(args) => view(args).await,
    }
}

/// Logs go to stderr, or to `log_file` while a full-screen UI owns the terminal.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init(),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(path) => Ok(read_config_file(path)?),
        None => Ok(ConfigFile::default()),
    }
}

async fn stream(args: StreamArgs) -> Result<()> {
    init_logging(None)?;
    let file = load_config(args.config.as_deref())?;
    let settings = StreamSettings::resolve(file.stream, args.overrides())?;
    let json = settings.json_events;

    if !json {
        println!(
            "📷 Streaming to {} ({} lens, {}, {})",
            settings.endpoint, settings.session.lens, settings.session.orientation, settings.session.zoom
        );
        println!("   w/u lens · r rotate · +/- zoom · s stats · q quit (then Enter)");
    }

    let (mut streamer, mut events) = Streamer::new(
        Box::new(TestPatternSource::new()),
        settings.session,
        settings.target,
    );

    // Connect and worker joins block; keep them off the async workers.
    let started = tokio::task::block_in_place(|| streamer.start(settings.endpoint));
    let mut failure = started.err().map(|e| anyhow!(e));

    let mut keys = spawn_stdin_reader()?;

    if failure.is_none() {
        'session: loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    report(&event, json)?;
                    if let SessionEvent::Error { message } = event {
                        failure = Some(anyhow!(message));
                        break;
                    }
                }
                Some(line) = keys.recv() => {
                    for key in line.chars() {
                        match key {
                            'q' | 'Q' => break 'session,
                            's' | 'S' => print_stats(&streamer),
                            key => {
                                if let Some(cmd) = Command::from_key(key) {
                                    streamer.apply_command(cmd);
                                    if !json {
                                        let cfg = streamer.config();
                                        println!("   {} lens, {}, {}", cfg.lens, cfg.orientation, cfg.zoom);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    tokio::task::block_in_place(|| streamer.stop());
    while let Ok(event) = events.try_recv() {
        report(&event, json)?;
    }
    if !json {
        print_stats(&streamer);
    }

    match failure {
        Some(e) => Err(e.context("Streaming session failed")),
        None => Ok(()),
    }
}

/// Lines typed on stdin. EOF just ends the reader; the session keeps running.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("camlink-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

fn report(event: &SessionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        SessionEvent::Active => println!("✅ Connected, streaming"),
        SessionEvent::Stopped => println!("⏹️  Stopped"),
        SessionEvent::Error { message } => println!("❌ {}", message),
    }
    Ok(())
}

fn print_stats(streamer: &Streamer) {
    let stats = streamer.stats();
    println!(
        "📊 {} sent · {} dropped · {} skipped · {:.1} MiB",
        stats.frames_sent,
        stats.frames_dropped,
        stats.frames_skipped,
        stats.bytes_sent as f64 / 1_048_576.0
    );
}

async fn view(args: ViewArgs) -> Result<()> {
    let file = load_config(args.config.as_deref())?;
    let settings = ViewSettings::resolve(file.view, args.overrides());
    let use_tui = !settings.headless && io::stdout().is_terminal();
    init_logging(use_tui.then_some(settings.log_file.as_path()))?;

    let addr = settings.receiver.addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    println!("👀 Waiting for a producer on {}", listener.local_addr()?);

    let cancel = CancellationToken::new();
    let (sink, screen) = PresentSink::new();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let receiver = Receiver::new(settings.receiver.clone(), sink, commands_rx, cancel.clone());
    let server = tokio::spawn(receiver.serve(listener));

    if use_tui {
        let picker = create_picker(settings.graphics.as_deref());
        let presenter = TerminalPresenter::new(picker, screen, commands_tx);
        let ui_cancel = cancel.clone();
        let ui = tokio::task::spawn_blocking(move || presenter.run(ui_cancel));
        let outcome = ui.await.context("Display thread panicked")?;
        cancel.cancel();
        outcome.context("Terminal display failed")?;
    } else {
        drop(commands_tx);
        let display = tokio::spawn(headless::run(screen, cancel.clone()));
        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl+C")?;
        cancel.cancel();
        display.await.context("Headless display panicked")?;
    }

    server
        .await
        .context("Receiver task panicked")?
        .context("Receiver failed")?;
    Ok(())
}
