//! Crawl subcommand - run the feeder/parser/downloader pipeline

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use imgrake_core::{Flag, Proxy, ReqwestTransport, SharedProgress, Signal, fmt_num};
use imgrake_crawler::image::Size;
use imgrake_crawler::{
    Collect, CrawlConfig, Crawler, ImageLinkExtractor, ImageSaver, PagedFeeder, RunSummary,
    SeedSource, UrlCollector, UrlListFeeder,
};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// File with one seed page URL per line
    #[arg(long, conflicts_with = "template")]
    pub urls: Option<PathBuf>,

    /// Seed URL template; `{offset}` is replaced per page
    #[arg(long, requires = "pages")]
    pub template: Option<String>,

    /// Number of pages generated from --template
    #[arg(long)]
    pub pages: Option<usize>,

    /// First offset substituted into --template
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Offset increment between pages
    #[arg(long, default_value_t = 1)]
    pub step: usize,

    /// Directory for saved images
    #[arg(short, long, conflicts_with = "collect_urls")]
    pub output: Option<PathBuf>,

    /// Only validate images and write their URLs to this JSON file
    #[arg(long)]
    pub collect_urls: Option<PathBuf>,

    /// Replace files that already exist in the output directory
    #[arg(long)]
    pub overwrite: bool,

    #[arg(long)]
    pub feeder_threads: Option<usize>,

    #[arg(long)]
    pub parser_threads: Option<usize>,

    #[arg(short = 'j', long)]
    pub downloader_threads: Option<usize>,

    /// Maximum number of accepted images (0 = unbounded)
    #[arg(short = 'n', long)]
    pub max_num: Option<usize>,

    /// Index offset for output file names
    #[arg(long)]
    pub offset: Option<usize>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Attempts per page or image
    #[arg(long)]
    pub max_retry: Option<u32>,

    /// Stop downloaders after this many seconds without an accepted image
    #[arg(long)]
    pub max_idle: Option<u64>,

    /// Minimum image size, WxH
    #[arg(long, value_parser = parse_size)]
    pub min_size: Option<Size>,

    /// Maximum image size, WxH
    #[arg(long, value_parser = parse_size)]
    pub max_size: Option<Size>,

    /// Proxy as `protocol=addr` or a bare address (repeatable)
    #[arg(long = "proxy")]
    pub proxies: Vec<String>,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Disable the randomized delay between requests
    #[arg(long)]
    pub no_pacing: bool,
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {s:?}"))?;
    let w = w.trim().parse().map_err(|e| format!("invalid width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("invalid height: {e}"))?;
    Ok((w, h))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got {s:?}"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Merge config-file settings with command-line overrides.
fn build_config(args: &CrawlArgs, config: &Config) -> Result<CrawlConfig> {
    let mut crawl = config.crawl_config()?;

    if let Some(n) = args.feeder_threads {
        crawl.feeder_threads = n;
    }
    if let Some(n) = args.parser_threads {
        crawl.parser_threads = n;
    }
    if let Some(n) = args.downloader_threads {
        crawl.downloader_threads = n;
    }
    if let Some(n) = args.max_num {
        crawl.max_num = n;
    }
    if let Some(secs) = args.timeout {
        crawl.timeout = Duration::from_secs(secs);
    }
    if let Some(n) = args.max_retry {
        crawl.max_retry = n;
    }
    if let Some(secs) = args.max_idle {
        crawl.max_idle_time = Some(Duration::from_secs(secs));
    }
    if let Some(offset) = args.offset {
        crawl.file_idx_offset = offset;
    }
    crawl.min_size = args.min_size.or(crawl.min_size);
    crawl.max_size = args.max_size.or(crawl.max_size);

    for p in &args.proxies {
        crawl
            .proxies
            .push(Proxy::parse(p).with_context(|| format!("Invalid --proxy {p}"))?);
    }
    // Command-line headers override config-file headers of the same name
    for (name, value) in &args.headers {
        crawl
            .session
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        crawl.session.headers.push((name.clone(), value.clone()));
    }
    if args.no_pacing {
        crawl.session.pace_min = Duration::ZERO;
        crawl.session.pace_max = Duration::ZERO;
    }
    Ok(crawl)
}

fn seed_source(args: &CrawlArgs) -> Result<Arc<dyn SeedSource>> {
    match (&args.urls, &args.template) {
        (Some(path), _) => {
            let feeder = UrlListFeeder::from_file(path)
                .with_context(|| format!("Failed to read seed list: {}", path.display()))?;
            Ok(Arc::new(feeder))
        }
        (None, Some(template)) => {
            if !template.contains(PagedFeeder::PLACEHOLDER) {
                log::warn!(
                    "template has no {} placeholder; every page is the same URL",
                    PagedFeeder::PLACEHOLDER
                );
            }
            let pages = args.pages.unwrap_or(1);
            Ok(Arc::new(PagedFeeder::new(
                template.clone(),
                args.start,
                args.step,
                pages,
            )))
        }
        (None, None) => bail!("either --urls or --template is required"),
    }
}

fn collector(args: &CrawlArgs, config: &Config, crawl: &CrawlConfig) -> Arc<dyn Collect> {
    match &args.collect_urls {
        Some(path) => Arc::new(UrlCollector::new(path.clone())),
        None => {
            let dir = args
                .output
                .clone()
                .unwrap_or_else(|| config.output.default_dir.clone());
            Arc::new(
                ImageSaver::new(dir)
                    .with_bounds(crawl.min_size, crawl.max_size)
                    .with_overwrite(args.overwrite),
            )
        }
    }
}

/// First SIGINT/SIGTERM asks the crawl to wind down; a second one exits.
fn forward_signals(signal: Arc<Signal>) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    let requested = AtomicBool::new(false);
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                if requested.swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
                log::warn!("received signal {sig}, finishing in-flight work (repeat to force exit)");
                signal.set(&[Flag::Shutdown]);
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

pub fn run(args: CrawlArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let crawl = build_config(&args, config)?;
    let source = seed_source(&args)?;
    let collect = collector(&args, config, &crawl);

    let line = progress.accepted_line(collect.name(), crawl.max_num);
    let mut crawler = Crawler::new(
        crawl,
        source,
        Arc::new(ImageLinkExtractor),
        collect,
        Arc::new(ReqwestTransport::new()),
    )
    .context("Invalid crawl configuration")?
    .with_progress(line.clone());

    forward_signals(crawler.signal())?;
    let summary = crawler.crawl()?;
    line.finish_and_clear();

    print_summary(&summary, &args);
    if summary.interrupted {
        std::process::exit(130);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, args: &CrawlArgs) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Crawl").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table.add_row(vec!["Accepted".to_string(), fmt_num(summary.fetched)]);
    let stop = if summary.interrupted {
        "interrupted"
    } else if summary.reached_max_num {
        "max num reached"
    } else {
        "sources exhausted"
    };
    table.add_row(vec!["Stopped".to_string(), stop.to_string()]);
    if let Some(path) = &args.collect_urls {
        table.add_row(vec!["URL list".to_string(), path.display().to_string()]);
    }
    table.add_row(vec![
        "Elapsed".to_string(),
        format!("{:.1}s", summary.elapsed.as_secs_f64()),
    ]);
    eprintln!("\n{table}");
}
