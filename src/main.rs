//! Binary entrypoint for the wsjtx2eqsl CLI.
//!
//! Commands:
//! - `start [--port <udp>] [--no-auto-upload]` - listen for WSJT-X and upload to eQSL.cc
//! - `init` - write a starter `wsjtx2eqsl.toml`
//! - `credentials` - interactively set the eQSL.cc username and password
//! - `status` - print the effective configuration as JSON (password redacted)
//!
//! While running, type `r` (retry), `s` (skip), `a` (toggle auto-upload) or
//! `q` (quit) followed by Enter.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use wsjtx2eqsl::bridge::{BridgeServer, ConsoleDisplay, EqslClient, StopReason, UserCommand};
use wsjtx2eqsl::config::Config;

#[derive(Parser)]
#[command(name = "wsjtx2eqsl")]
#[command(about = "Upload WSJT-X contacts to eQSL.cc as they are logged")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "wsjtx2eqsl.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for WSJT-X broadcasts and upload contacts
    Start {
        /// UDP port WSJT-X sends logged ADIF to
        #[arg(short, long)]
        port: Option<u16>,

        /// Start with automatic uploads off (toggle with 'a')
        #[arg(long)]
        no_auto_upload: bool,
    },
    /// Write a default configuration file
    Init,
    /// Set the eQSL.cc username and password in the config file
    Credentials,
    /// Print the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start {
            port,
            no_auto_upload,
        } => {
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            if let Some(port) = port {
                config.listener.port = port;
            }
            if no_auto_upload {
                config.eqsl.auto_upload = false;
            }
            config
                .validate()
                .map_err(|e| anyhow!("Invalid configuration in {}: {}", cli.config, e))?;
            info!("Starting wsjtx2eqsl v{}", env!("CARGO_PKG_VERSION"));

            let client = Arc::new(EqslClient::from_config(&config.eqsl)?);
            let (auto_tx, auto_rx) = watch::channel(config.eqsl.auto_upload);
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

            let server =
                BridgeServer::new(config, client, auto_rx, Box::new(ConsoleDisplay::new())).await?;
            if let Some(addr) = server.local_addr() {
                println!("Listening for WSJT-X on UDP {}", addr);
            }
            println!("Commands: r = retry, s = skip, a = toggle auto-upload, q = quit");
            tokio::spawn(read_operator_input(cmd_tx, auto_tx));

            let summary = server.run(cmd_rx).await;
            println!();
            println!("Total QSOs logged: {}", summary.counters.qsos_received);
            println!("Successful uploads: {}", summary.counters.uploads_succeeded);
            println!("Failed uploads: {}", summary.counters.uploads_failed);
            if summary.counters.decode_failures > 0 {
                println!("Undecodable datagrams: {}", summary.counters.decode_failures);
            }
            if summary.unsent_uploads > 0 {
                println!("Not uploaded (still queued): {}", summary.unsent_uploads);
            }
            match summary.reason {
                StopReason::Quit => println!("73!"),
                StopReason::ListenerFailed(reason) => {
                    return Err(anyhow!("UDP listener failed: {}", reason));
                }
            }
        }
        Commands::Init => {
            if std::path::Path::new(&cli.config).exists() {
                warn!("{} already exists; not overwriting", cli.config);
                return Ok(());
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!("Now run `wsjtx2eqsl credentials` to store your eQSL.cc login.");
        }
        Commands::Credentials => {
            let mut config = pre_config.unwrap_or_default();
            let username = prompt_line("eQSL.cc username (callsign): ").await?;
            if username.is_empty() {
                println!("Error: username is required.");
                return Ok(());
            }
            let pass1 = rpassword::prompt_password("eQSL.cc password: ")?;
            if pass1.is_empty() {
                println!("Error: password is required.");
                return Ok(());
            }
            let pass2 = rpassword::prompt_password("Confirm password: ")?;
            if pass1 != pass2 {
                println!("Error: passwords do not match.");
                return Ok(());
            }
            config.eqsl.username = username.to_ascii_uppercase();
            config.eqsl.password = pass1;
            config.save(&cli.config).await?;
            println!("Credentials for {} saved to {}.", config.eqsl.username, cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let mut shown = serde_json::to_value(&config)?;
            if let Some(password) = shown.pointer_mut("/eqsl/password") {
                if password.as_str().map(|p| !p.is_empty()).unwrap_or(false) {
                    *password = serde_json::Value::String("<redacted>".to_string());
                }
            }
            let payload = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config,
                "ready": config.validate().is_ok(),
                "problem": config.validate().err().map(|e| e.to_string()),
                "config": shown,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }

    Ok(())
}

/// Forward operator keystrokes to the bridge until stdin closes or `q`.
async fn read_operator_input(
    commands: mpsc::UnboundedSender<UserCommand>,
    auto_upload: watch::Sender<bool>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let command = match line.trim().to_ascii_lowercase().as_str() {
            "r" | "retry" => UserCommand::Retry,
            "s" | "skip" => UserCommand::Skip,
            "q" | "quit" | "exit" => UserCommand::Quit,
            "a" | "auto" => {
                let enabled = !*auto_upload.borrow();
                let _ = auto_upload.send(enabled);
                info!("Auto-upload {}", if enabled { "enabled" } else { "disabled" });
                continue;
            }
            "" => continue,
            other => {
                println!("Unknown command '{}'. Use r, s, a or q.", other);
                continue;
            }
        };
        let quit = command == UserCommand::Quit;
        if commands.send(command).is_err() || quit {
            break;
        }
    }
}

async fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::Write;
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    Ok(lines.next_line().await?.unwrap_or_default().trim().to_string())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins; otherwise the configured level, defaulting to info
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| open_append(path));
    let qso_path = config.as_ref().and_then(|c| c.logging.qso_file.clone());

    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Foreground: log file plus console. Redirected stdout: file only.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if record.target() == "qso" {
                    if let Some(mut qf) = qso_path.as_deref().and_then(open_append) {
                        let _ = writeln!(qf, "{}", line);
                    }
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if record.target() == "qso" {
                    if let Some(mut qf) = qso_path.as_deref().and_then(open_append) {
                        let _ = writeln!(qf, "{}", line);
                    }
                }
                writeln!(fmt, "{}", line)
            });
        }
    }
    let _ = builder.try_init();
}

fn open_append(path: &str) -> Option<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
}
