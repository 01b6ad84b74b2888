use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, ClientSettings, CommandHistoryEntry, CommandStatus, HttpLabApi, LabApi,
    LabCollection, TerminalSession,
};
use shared::domain::{Lab, LabId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "labctl", about = "Provision and drive lab environments")]
struct Args {
    /// Backend base url, e.g. http://localhost:8080/api/labs
    #[arg(long, global = true)]
    api_base_url: Option<String>,
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List creatable lab types.
    Types,
    /// List the user's labs.
    List,
    Create {
        #[arg(long = "type")]
        lab_type: Option<String>,
        /// Lifetime in seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
    Delete {
        lab_id: String,
    },
    Status {
        lab_id: String,
    },
    /// Run a single command in a lab.
    Exec {
        lab_id: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Interactive terminal against a lab.
    Shell {
        lab_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.api_base_url.clone() {
        settings.api_base_url = url;
    }
    let api: Arc<dyn LabApi> = Arc::new(
        HttpLabApi::from_settings(&settings)
            .with_context(|| format!("invalid api base url '{}'", settings.api_base_url))?,
    );
    let labs =
        LabCollection::with_default_duration(api.clone(), settings.default_lab_duration_secs);

    match args.command {
        Command::Types => {
            for lab_type in labs.load_types().await? {
                println!("{lab_type}");
            }
        }
        Command::List => {
            let user_id = require_user(&args.user, &settings)?;
            labs.set_user_id(&user_id).await?;
            let snapshot = labs.snapshot().await;
            if let Some(err) = snapshot.error {
                bail!(err);
            }
            if snapshot.labs.is_empty() {
                println!("No labs created yet");
            }
            for lab in &snapshot.labs {
                print_lab(lab);
            }
        }
        Command::Create { lab_type, duration } => {
            let user_id = require_user(&args.user, &settings)?;
            labs.load_types().await?;
            if let Some(lab_type) = lab_type {
                labs.select_type(&lab_type).await?;
            }
            labs.set_user_id(&user_id).await?;
            let lab = match duration {
                Some(duration) => {
                    let lab_type = labs
                        .snapshot()
                        .await
                        .selected_type
                        .ok_or_else(|| anyhow!("backend offers no lab types"))?;
                    labs.create_lab(&user_id, &lab_type, duration).await?
                }
                None => labs.create_selected_lab().await?,
            };
            print_lab(&lab);
        }
        Command::Delete { lab_id } => {
            labs.delete_lab(&LabId::from(lab_id.as_str()))
                .await
                .context("Failed to delete lab")?;
            println!("deleted {lab_id}");
        }
        Command::Status { lab_id } => {
            let status = api
                .lab_status(&LabId::from(lab_id.as_str()))
                .await
                .context("Failed to get lab status")?;
            println!("{status}");
        }
        Command::Exec { lab_id, command } => {
            let lab = find_lab(&labs, &args.user, &settings, &lab_id).await?;
            let terminal = TerminalSession::new(api.clone());
            terminal.open(lab).await;
            let entry = terminal.submit(&command.join(" ")).await?;
            print_entry(&entry);
            if entry.status == CommandStatus::Error {
                std::process::exit(entry.exit_code.filter(|code| *code > 0).unwrap_or(1));
            }
        }
        Command::Shell { lab_id } => {
            let lab = find_lab(&labs, &args.user, &settings, &lab_id).await?;
            run_shell(&labs, TerminalSession::new(api.clone()), lab).await?;
        }
    }

    Ok(())
}

fn require_user(flag: &Option<String>, settings: &ClientSettings) -> Result<String> {
    flag.clone()
        .or_else(|| settings.default_user_id.clone())
        .filter(|user| !user.trim().is_empty())
        .ok_or_else(|| anyhow!("--user is required (or set default_user_id)"))
}

async fn find_lab(
    labs: &LabCollection,
    user: &Option<String>,
    settings: &ClientSettings,
    lab_id: &str,
) -> Result<Lab> {
    let user_id = require_user(user, settings)?;
    labs.load_labs_for_user(&user_id)
        .await
        .context("Failed to load labs")?;
    let lab_id = LabId::from(lab_id);
    labs.refresh_status(&lab_id).await;
    labs.lab(&lab_id)
        .await
        .ok_or_else(|| anyhow!("lab {lab_id} not found for user {user_id}"))
}

fn print_lab(lab: &Lab) {
    println!(
        "{}\t{}\t{}\texpires in {}\t{}",
        lab.id,
        lab.title(),
        lab.status,
        lab.format_time_remaining(Utc::now()),
        lab.access_url
    );
}

fn print_entry(entry: &CommandHistoryEntry) {
    println!(
        "$ {}    [{}] {}",
        entry.command,
        entry.display_timestamp(),
        entry.status_badge()
    );
    if !entry.output.is_empty() {
        println!("{}", entry.output.trim_end());
    }
    if !entry.error_text.is_empty() {
        eprintln!("{}", entry.error_text.trim_end());
    }
}

async fn run_shell(labs: &LabCollection, terminal: TerminalSession, lab: Lab) -> Result<()> {
    terminal.open(lab.clone()).await;
    terminal.load_suggestions().await;
    println!("Welcome to {} lab terminal!", lab.lab_type);
    println!("Type commands, or :suggest, :pick <n>, :run, :clear, :status, :quit");
    if let Some(reason) = terminal.snapshot().await.disabled_reason() {
        println!("{reason}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            (":quit", _) | (":exit", _) => break,
            (":clear", _) => terminal.clear().await,
            (":suggest", _) => {
                let suggestions = terminal.snapshot().await.suggestions;
                for (index, suggestion) in suggestions.iter().enumerate() {
                    println!("{:>2}  {suggestion}", index + 1);
                }
            }
            (":pick", index) => {
                let suggestions = terminal.snapshot().await.suggestions;
                let picked = index
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| suggestions.get(n.wrapping_sub(1)));
                match picked {
                    Some(suggestion) => {
                        terminal.select_suggestion(suggestion).await;
                        println!("input: {suggestion}  (:run to execute)");
                    }
                    None => println!("no suggestion #{index}"),
                }
            }
            (":run", _) => match terminal.submit_pending().await {
                Ok(entry) => print_entry(&entry),
                Err(rejection) => println!("{rejection}"),
            },
            (":status", _) => {
                if let Some(status) = labs.refresh_status(&lab.id).await {
                    if let Some(current) = labs.lab(&lab.id).await {
                        terminal.refresh_lab(&current).await;
                    }
                    println!("{status}");
                } else {
                    println!("status unavailable");
                }
            }
            _ if line.is_empty() => {}
            _ => match terminal.submit(line).await {
                Ok(entry) => print_entry(&entry),
                Err(rejection) => println!("{rejection}"),
            },
        }
    }

    terminal.close().await;
    Ok(())
}
