use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use stock_metadata_batch::export;
use stock_metadata_batch::preprocess;
use stock_metadata_batch::telemetry;
use stock_metadata_batch::{
    Credential, GeminiClient, GenerationController, GenerationEvent, GenerationMode,
    GeneratorConfig, NoticeLevel, RunOutcome, Settings, StockSite, WorkItemStatus,
};

#[derive(Parser)]
#[command(name = "stockmeta", about = "Stock-marketplace metadata generator")]
struct Cli {
    /// Settings file (default: ./settings.json)
    #[arg(global = true, long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate metadata for files and export a CSV
    Generate(GenerateArgs),
    /// Manage API keys
    #[command(subcommand)]
    Keys(KeysCmd),
    /// Set the model id
    Model { id: String },
    /// Inspect settings
    #[command(subcommand)]
    Settings(SettingsCmd),
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Stock site layout for the CSV (default: from settings)
    #[arg(long)]
    site: Option<StockSite>,
    /// Output file or directory for the CSV
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Metadata,
    Prompt,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Metadata => GenerationMode::Metadata,
            ModeArg::Prompt => GenerationMode::Prompt,
        }
    }
}

#[derive(Subcommand)]
enum KeysCmd {
    Add { key: String },
    List,
    Remove { index: usize },
}

#[derive(Subcommand)]
enum SettingsCmd {
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_tracing();

    let path = cli.settings.unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    match cli.command {
        Commands::Generate(args) => {
            settings.apply_env();
            generate(settings, args).await?
        }
        Commands::Keys(KeysCmd::Add { key }) => {
            if settings.add_key(&key) {
                settings.save(&path)?;
                println!("Key added ({}).", Credential::new(key.trim()).masked());
            } else {
                println!("Key is empty or already stored.");
            }
        }
        Commands::Keys(KeysCmd::List) => {
            if settings.api_keys.is_empty() {
                println!("No API keys stored.");
            }
            for (i, key) in settings.api_keys.iter().enumerate() {
                println!("{:>3}  {}", i, key.masked());
            }
        }
        Commands::Keys(KeysCmd::Remove { index }) => match settings.remove_key(index) {
            Some(key) => {
                settings.save(&path)?;
                println!("Removed key {} ({}).", index, key.masked());
            }
            None => bail!("no key at index {}", index),
        },
        Commands::Model { id } => {
            settings.model = id;
            settings.save(&path)?;
            println!("Model set to {}.", settings.model);
        }
        Commands::Settings(SettingsCmd::Show) => {
            let mut shown = settings.clone();
            shown.api_keys = settings
                .api_keys
                .iter()
                .map(|k| Credential::new(k.masked()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

async fn generate(mut settings: Settings, args: GenerateArgs) -> Result<()> {
    if let Some(mode) = args.mode {
        settings.controls.active_tab = mode.into();
    }
    if let Some(size) = args.batch_size {
        settings.controls.batch_size = size;
    }
    let site = args.site.unwrap_or(settings.selected_stock_site);
    let extension = settings.file_extension.clone();

    let controller = Arc::new(GenerationController::new(
        GeminiClient::default(),
        GeneratorConfig::default(),
        settings,
    ));

    let staged = preprocess::stage_files(controller.staging(), &args.files).await?;
    for id in &staged {
        if let Some(item) = controller.staging().get(id) {
            if item.status == WorkItemStatus::Error {
                eprintln!(
                    "skipping {}: {}",
                    item.filename,
                    item.error.as_deref().unwrap_or("could not be prepared")
                );
            }
        }
    }

    let printer = tokio::spawn(print_events(controller.subscribe()));

    let ctrl_c = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.stop();
            }
        })
    };

    let keys = {
        let controller = controller.clone();
        let mut lines = stdin_lines();
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                match line.trim() {
                    "p" => {
                        controller.toggle_pause();
                    }
                    "s" => {
                        controller.stop();
                    }
                    _ => eprintln!("commands: p = pause/resume, s = stop"),
                }
            }
        })
    };

    eprintln!("Type p + Enter to pause/resume, s + Enter to stop.");
    let outcome = controller.start().await;

    ctrl_c.abort();
    keys.abort();
    // let the printer drain what was already sent
    tokio::task::yield_now().await;
    printer.abort();

    match outcome? {
        RunOutcome::Completed(summary) => {
            println!(
                "Complete. {} of {} successful ({} retried, {:.1}s).",
                summary.succeeded,
                summary.total,
                summary.retried,
                summary.duration_ms as f64 / 1000.0
            );
        }
        RunOutcome::Stopped { succeeded, total } => {
            println!("Stopped. {} of {} successful.", succeeded, total);
        }
    }

    let results = controller.results();
    if results.is_empty() {
        return Ok(());
    }
    let written = export::write_csv(&results, site, &extension, args.out.as_deref())?;
    println!("Exported {} results to {}", results.len(), written.display());
    Ok(())
}

/// Forward stdin lines from a plain OS thread.
///
/// A blocked read on tokio's stdin cannot be cancelled and would keep the
/// runtime from shutting down; a detached thread does not.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<GenerationEvent>) {
    loop {
        match rx.recv().await {
            Ok(GenerationEvent::Progress(progress)) => {
                eprintln!("[{:>5.1}%] {}", progress.percent, progress.status);
            }
            Ok(GenerationEvent::Notice { level, message }) => {
                let tag = match level {
                    NoticeLevel::Success => "ok",
                    NoticeLevel::Info => "info",
                    NoticeLevel::Warning => "warn",
                    NoticeLevel::Error => "error",
                };
                eprintln!("{}: {}", tag, message);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
