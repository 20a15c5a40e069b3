//! imgrake - harvest images from paginated web sources
//!
//! Runs a feeder -> parser -> downloader pipeline over seed pages and either
//! saves the images it finds or collects their validated URLs.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "imgrake")]
#[command(about = "Harvest images from paginated web sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./imgrake.toml or ~/.config/imgrake/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl seed pages and save or collect the images they link
    Crawl(cmd::crawl::CrawlArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(imgrake_core::ProgressContext::new());

    // TTY: warn unless --debug, the progress line shows activity.
    // Otherwise info, logs are the only progress output.
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    imgrake_core::init_logging(quiet, cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Crawl(args) => cmd::crawl::run(args, &config, &progress),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Output directory",
                &config.output.default_dir.display().to_string(),
            ]);
            table.add_row(vec![
                "Threads",
                &format!(
                    "feeder {}, parser {}, downloader {}",
                    config.threads.feeder, config.threads.parser, config.threads.downloader
                ),
            ]);
            table.add_row(vec!["Max num", &config.crawl.max_num.to_string()]);
            table.add_row(vec!["Timeout", &format!("{}s", config.crawl.timeout)]);
            table.add_row(vec!["Max retry", &config.crawl.max_retry.to_string()]);
            table.add_row(vec![
                "File index offset",
                &config.crawl.file_idx_offset.to_string(),
            ]);
            table.add_row(vec![
                "Max idle",
                &config
                    .crawl
                    .max_idle
                    .map_or("never".to_string(), |s| format!("{s}s")),
            ]);
            table.add_row(vec![
                "Pacing",
                &format!(
                    "{}-{}ms",
                    config.session.pace_min_ms, config.session.pace_max_ms
                ),
            ]);
            table.add_row(vec![
                "UA rotation",
                &format!("{:.0}%", config.session.ua_rotation * 100.0),
            ]);
            table.add_row(vec![
                "Extra headers",
                &config.session.headers.len().to_string(),
            ]);
            table.add_row(vec![
                "Proxies",
                &if config.proxies.is_empty() {
                    "none".to_string()
                } else {
                    config.proxies.len().to_string()
                },
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
