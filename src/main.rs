mod amount;
mod config;
mod db;
mod extract;
mod harvest;
mod paste;
mod pipeline;
mod sheet;
mod sink;
mod store;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use config::Settings;
use extract::client::{ChatClient, ExtractionClient};
use pipeline::{Progress, Reporter, RunOutcome, RunSource};
use sink::OutputFormat;

#[derive(Parser)]
#[command(name = "bidscan", about = "Bid award extractor for public-resource trading bulletins")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the trading portal, walk every results page and extract awards
    Web {
        /// Search keyword, usually a company name
        #[arg(short, long)]
        keyword: Option<String>,
        /// Stop paging once more than this many records are collected
        #[arg(long)]
        cap: Option<usize>,
        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
        /// Output directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Extract awards from search results pasted as plain text
    Text {
        /// Keyword passed to the model as context
        #[arg(short, long)]
        keyword: Option<String>,
        /// Read text from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print a previously written SQLite result file
    Show {
        file: PathBuf,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Web { keyword, cap, format, out } => {
            let mut settings = Settings::load().context("Failed to load configuration")?;
            apply_output_flags(&mut settings, format, out);
            if cap.is_some() {
                settings.record_cap = cap;
            }
            let Some(keyword) = keyword.or_else(|| settings.keyword.clone()) else {
                bail!("No search keyword. Pass --keyword or set BIDSCAN_KEYWORD.");
            };
            run_with_display(settings, RunSource::Web { keyword }).await
        }
        Commands::Text { keyword, input, format, out } => {
            let mut settings = Settings::load().context("Failed to load configuration")?;
            apply_output_flags(&mut settings, format, out);
            let content = match input {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            let keyword = keyword.or_else(|| settings.keyword.clone()).unwrap_or_default();
            run_with_display(settings, RunSource::Text { content, keyword }).await
        }
        Commands::Show { file, limit } => show(&file, limit),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn apply_output_flags(settings: &mut Settings, format: Option<OutputFormat>, out: Option<PathBuf>) {
    if let Some(format) = format {
        settings.output_format = format;
    }
    if let Some(out) = out {
        settings.output_dir = out;
    }
}

/// Run the pipeline on a worker task while this task renders its progress.
async fn run_with_display(settings: Settings, source: RunSource) -> anyhow::Result<()> {
    let Some(api_key) = settings.api_key.clone() else {
        bail!("No API key. Set BIDSCAN_API_KEY or DEEPSEEK_API_KEY.");
    };
    let client: Arc<dyn ExtractionClient> = Arc::new(ChatClient::new(
        &api_key,
        &settings.api_base_url,
        &settings.model,
        settings.request_timeout(),
    )?);

    let (reporter, rx) = Reporter::channel();
    let worker = tokio::spawn(pipeline::run(settings, source, client, reporter));
    display(rx).await;

    match worker.await.context("Worker task panicked")?? {
        RunOutcome::Written { path, rows, capped } => {
            println!("Saved {} award records to {}", rows, path.display());
            if capped {
                println!("Record cap reached: later result pages were not harvested.");
            }
        }
        RunOutcome::NoResults => println!("No award results found. Nothing written."),
    }
    Ok(())
}

// ── Progress display ──

async fn display(mut rx: mpsc::UnboundedReceiver<Progress>) {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    let mut bar: Option<ProgressBar> = None;

    while let Some(progress) = rx.recv().await {
        match progress {
            Progress::HarvestStarted { url } => spinner.set_message(format!("Opening {}", url)),
            Progress::PageCaptured { added, total } => {
                spinner.set_message(format!("Captured {} records ({} total)", added, total))
            }
            Progress::PageAdvanced { index, label } => {
                spinner.set_message(format!("Page {} [{}]", index + 1, label.trim()))
            }
            Progress::HarvestFinished { pages, records, capped } => {
                spinner.finish_and_clear();
                println!(
                    "Harvested {} records from {} pages{}",
                    records,
                    pages,
                    if capped { " (record cap reached)" } else { "" }
                );
            }
            Progress::TextSplit { records } => {
                spinner.finish_and_clear();
                println!("Split pasted text into {} bulletins", records);
            }
            Progress::BatchStarted { total, .. } => {
                let pb = bar.get_or_insert_with(|| batch_bar(total as u64));
                pb.set_message("extracting");
            }
            Progress::BatchFinished { kept, .. } => {
                if let Some(pb) = &bar {
                    pb.set_message(format!("+{} awards", kept));
                    pb.inc(1);
                }
            }
            Progress::BatchFailed { index, error } => {
                if let Some(pb) = &bar {
                    pb.println(format!("Batch {} failed: {}", index + 1, truncate(&error, 80)));
                    pb.inc(1);
                }
            }
            Progress::SinkWritten { .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
            }
        }
    }

    spinner.finish_and_clear();
    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
}

fn batch_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

// ── Show ──

fn show(file: &std::path::Path, limit: usize) -> anyhow::Result<()> {
    if !file.exists() {
        bail!("{} does not exist", file.display());
    }
    let conn = db::open(file)?;
    let rows = db::fetch_records(&conn, limit)
        .with_context(|| format!("{} is not a bidscan result file", file.display()))?;
    if rows.is_empty() {
        println!("No award records.");
        return Ok(());
    }

    println!(
        "{:>3} | {:<30} | {:<24} | {:>12} | {:<19}",
        "#", "Title", "Winner", "Amount", "Date"
    );
    println!("{}", "-".repeat(100));
    for (i, r) in rows.iter().enumerate() {
        println!(
            "{:>3} | {:<30} | {:<24} | {:>12.2} | {:<19}",
            i + 1,
            truncate(&r.title, 30),
            truncate(r.winner.as_deref().unwrap_or("-"), 24),
            r.amount,
            truncate(&r.date, 19)
        );
    }

    let t = db::totals(&conn)?;
    println!(
        "\n{} of {} rows | {} distinct winners | total amount {:.2}",
        rows.len(),
        t.rows,
        t.winners,
        t.amount
    );
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
