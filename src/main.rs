// src/main.rs

use clap::ArgMatches;
use colored::*;
use env_logger::Builder;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, LevelFilter};
use playcache::cli::build_cli;
use playcache::download::DownloadId;
use playcache::notify::{Message, Notification, MESSAGE_LOG_TARGET};
use playcache::playlist::{read_playlist_file, SAMPLE_VIDEOS};
use playcache::{AppError, CacheManager, Config, DownloadOutcome, VERSION};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logger();
    info!("playcache starting up - version {}", VERSION);

    let matches = build_cli().get_matches();

    let mut config = Config::load(matches.get_one::<String>("config").map(Path::new))?;
    config.apply_env();
    config.apply_overrides(
        matches.get_one::<String>("root").map(String::as_str),
        matches.get_one::<String>("cache-dir").map(String::as_str),
    );
    config.validate()?;
    debug!("Effective config: {:?}", config);

    let manager = CacheManager::with_defaults(config);
    let renderer = spawn_renderer(manager.subscribe());

    let outcome = tokio::select! {
        result = run(&manager, &matches) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    manager.shutdown().await;

    // The renderer stops once the last sender (owned by the manager) is gone
    drop(manager);
    let _ = tokio::time::timeout(Duration::from_secs(2), renderer).await;

    outcome
}

async fn run(manager: &Arc<CacheManager>, matches: &ArgMatches) -> Result<(), AppError> {
    manager.initialize().await?;

    if matches.get_flag("samples") {
        for url in SAMPLE_VIDEOS {
            let _ = manager.append(url).await;
        }
    }

    if let Some(path) = matches.get_one::<String>("playlist") {
        let urls = read_playlist_file(Path::new(path))?;
        info!("Loaded {} URLs from {}", urls.len(), path);
        for url in urls {
            let _ = manager.append(&url).await;
        }
    }

    match matches.subcommand() {
        Some(("list", sub)) => {
            append_urls(manager, sub).await;
            print_playlist(manager).await;
            Ok(())
        }
        Some(("status", _)) => {
            let report = manager.refresh_cache_status().await?;
            println!(
                "{} {} of {} videos cached ({} files in cache)",
                "Cache status:".blue(),
                report.cached.to_string().green(),
                report.total,
                report.files_found
            );
            Ok(())
        }
        Some(("cache", sub)) => {
            append_urls(manager, sub).await;
            cache_entries(manager, sub).await
        }
        Some(("play", sub)) => {
            let start = sub.get_one::<usize>("start").copied().unwrap_or(0);
            manager.run_playback(start).await
        }
        Some(("clear", _)) => {
            let report = manager.clear_cache().await?;
            println!(
                "{} {} deleted, {} failed",
                "Cache cleared:".blue(),
                report.deleted.len().to_string().green(),
                report.failures.len()
            );
            if report.failures.is_empty() {
                Ok(())
            } else {
                Err(AppError::General(format!(
                    "{} cache files could not be deleted",
                    report.failures.len()
                )))
            }
        }
        _ => Ok(()),
    }
}

async fn append_urls(manager: &CacheManager, matches: &ArgMatches) {
    if let Some(urls) = matches.get_many::<String>("urls") {
        for url in urls {
            // Rejections are already on the console
            let _ = manager.append(url).await;
        }
    }
}

async fn cache_entries(manager: &Arc<CacheManager>, matches: &ArgMatches) -> Result<(), AppError> {
    let indices: Vec<usize> = match matches.get_many::<usize>("index") {
        Some(values) => values.copied().collect(),
        None => manager
            .list()
            .await
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.cached)
            .map(|(index, _)| index)
            .collect(),
    };

    if indices.is_empty() {
        println!("{}", "Nothing to cache.".green());
        return Ok(());
    }

    let mut handles = Vec::new();
    for index in indices {
        if let Ok(handle) = manager.cache(index).await {
            handles.push(handle);
        }
    }

    let started = handles.len();
    let mut cached = 0;
    for handle in handles {
        if let Ok(DownloadOutcome::Cached { .. }) = handle.wait().await {
            cached += 1;
        }
    }

    println!(
        "{} {} of {} downloads cached",
        "Done:".blue(),
        cached.to_string().green(),
        started
    );

    if cached == started {
        Ok(())
    } else {
        Err(AppError::General(format!(
            "{} downloads did not complete",
            started - cached
        )))
    }
}

async fn print_playlist(manager: &CacheManager) {
    let entries = manager.list().await;
    if entries.is_empty() {
        println!("{}", "No videos in playlist".blue());
        return;
    }

    println!("{}", "Playlist:".bright_cyan().bold());
    println!("{}", "-".repeat(80));
    println!("{:<6} {:<24} {:<12} {}", "Index", "Title", "Status", "URL");
    println!("{}", "-".repeat(80));

    for (index, entry) in entries.iter().enumerate() {
        let title = if entry.title.chars().count() > 22 {
            format!("{}...", entry.title.chars().take(19).collect::<String>())
        } else {
            entry.title.clone()
        };
        let status = if entry.cached {
            format!("{:<12}", "CACHED").green()
        } else {
            format!("{:<12}", "NOT CACHED").yellow()
        };
        println!("{:<6} {:<24} {} {}", index, title, status, entry.url);
    }

    println!("{}", "-".repeat(80));
    println!("Total Videos: {}", entries.len());
}

/// Print messages and drive one progress bar per download
fn spawn_renderer(mut rx: broadcast::Receiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let multi = MultiProgress::new();
        let mut bars: HashMap<DownloadId, ProgressBar> = HashMap::new();

        loop {
            let notification = match rx.recv().await {
                Ok(n) => n,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Console renderer skipped {} notifications", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match notification {
                Notification::Message(message) => {
                    let _ = multi.println(format_message(&message));
                }
                Notification::Progress(update) => {
                    let bar = bars.entry(update.download_id.clone()).or_insert_with(|| {
                        let bar = multi.add(new_bar(update.total));
                        bar.set_message(update.download_id.to_string());
                        bar
                    });
                    if let Some(total) = update.total {
                        bar.set_length(total);
                    }
                    bar.set_position(update.received);
                }
                Notification::DownloadFinished {
                    download_id,
                    success,
                    ..
                } => {
                    if let Some(bar) = bars.remove(&download_id) {
                        if success {
                            bar.finish_with_message(format!("{} cached", download_id));
                        } else {
                            bar.abandon_with_message(format!("{} failed", download_id));
                        }
                    }
                }
            }
        }
    })
}

fn new_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template(
                    "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg} {bytes} (size unknown)")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    }
}

fn format_message(message: &Message) -> String {
    let timestamp = message.timestamp.format("%H:%M:%S");
    if message.is_error {
        format!("[{}] {}", timestamp, format!("ERROR: {}", message.text).red())
    } else {
        format!("[{}] {}", timestamp, message.text)
    }
}

/// Initialize the logger with a custom format and configuration
fn init_logger() {
    let mut builder = Builder::from_default_env();

    // Set the default level based on debug/release mode
    if cfg!(debug_assertions) {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.filter_level(LevelFilter::Info);
    }

    builder.format(|buf, record| {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(
            buf,
            "[{} {} {}] {}",
            timestamp,
            record.level().to_string().to_uppercase(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    // Reporter messages are printed by the console renderer
    builder.filter(Some(MESSAGE_LOG_TARGET), LevelFilter::Off);

    // Allow override through RUST_LOG environment variable
    builder.parse_env("RUST_LOG");
    builder.init();
}
