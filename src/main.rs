mod cli;

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cli::{Cli, Command};
use grader_link::config::ClientConfig;
use grader_link::grader::{self, GraderSocket};
use grader_link::host::HostAdapter;
use grader_link::log::ProtocolLog;
use grader_link::{AppEvent, Client, Connection, TerminalHost, TriggerHandle};

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults; no .grader/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<14} {value}\n"));
}

fn render_config_human(config: &ClientConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Endpoint\n");
    push_kv(&mut output, "workdir_env", &config.endpoint.workdir_env);
    push_kv(&mut output, "socket_name", &config.endpoint.socket_name);
    output.push('\n');

    output.push_str("Save\n");
    match &config.save.command {
        Some(argv) => push_kv(&mut output, "command", argv.join(" ")),
        None => push_kv(&mut output, "command", "(none)"),
    }
    output.push('\n');

    output.push_str("Log\n");
    match &config.log.path {
        Some(path) => push_kv(&mut output, "path", path.display()),
        None => push_kv(&mut output, "path", "(disabled)"),
    }
    output.push('\n');

    output.push_str(&format!("Source: {}\n", config_source_label(config_path)));
    output
}

fn render_config_json(config: &ClientConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "endpoint": config.endpoint,
        "save": config.save,
        "log": config.log,
        "source_path": config_source_label(config_path),
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn run_connect(config: &ClientConfig, workdir: Option<PathBuf>) -> Result<()> {
    // Nothing fallible may run after the client connects.
    let log = config.log.path.as_deref().map(ProtocolLog::new).transpose()?;
    let (tx, rx) = mpsc::channel::<AppEvent>();

    let interrupt = TriggerHandle::new(tx.clone());
    ctrlc::set_handler(move || {
        interrupt.shutdown();
    })
    .context("failed to install Ctrl-C handler")?;

    let mut host = TerminalHost::new(config, workdir);
    println!("[grader] press Enter to start grading / post a review, 'q' to quit");
    serve_client(&mut host, log, tx, &rx)?;
    if host.is_terminated() {
        info!("grader ended the session");
    }
    Ok(())
}

/// Activate, run the event loop, and tear down. Infallible once connected.
fn serve_client<H: HostAdapter>(
    host: &mut H,
    log: Option<ProtocolLog>,
    tx: mpsc::Sender<AppEvent>,
    events: &mpsc::Receiver<AppEvent>,
) -> Result<()> {
    let mut client = Client::activate(host, |endpoint| {
        Connection::open(endpoint, tx.clone())
    })
    .context("grader client not started")?;
    if let Some(log) = log {
        client = client.with_log(log);
    }

    host.on_trigger(TriggerHandle::new(tx));
    client.run(host, events);
    client.teardown().close();
    Ok(())
}

fn run_listen(workdir: &Path, ids: &[String]) -> Result<()> {
    std::fs::create_dir_all(workdir)
        .with_context(|| format!("failed to create {}", workdir.display()))?;
    let socket = GraderSocket::bind(workdir)?;
    println!("[grader] listening on {}", socket.path().display());
    println!(
        "[grader] connect with: grader-link connect --workdir {}",
        workdir.display()
    );

    let mut peer = socket.accept()?;
    let reviewed = grader::run_review_loop(&mut peer, ids, |id| {
        println!("[grader] review received for {id}");
    })?;
    println!("[grader] {reviewed} review(s) collected");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "grader_link=warn",
        0 => "grader_link=info",
        1 => "grader_link=debug",
        _ => "grader_link=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ClientConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .grader/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Connect { workdir } => run_connect(&config, workdir)?,
        Command::Listen { workdir, ids } => run_listen(&workdir, &ids)?,
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
        }
    }

    Ok(())
}
