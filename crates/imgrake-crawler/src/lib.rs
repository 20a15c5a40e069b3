//! imgrake crawler - the three-stage harvesting pipeline
//!
//! A [`Feeder`] turns a [`SeedSource`] into seed tasks, a [`Parser`] fetches
//! each seed page and extracts resource tasks, and a [`Downloader`] fetches,
//! validates and stores each resource through a [`Collect`] strategy. The
//! [`Crawler`] wires the three together and runs them as one unit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use imgrake_core::ReqwestTransport;
//! use imgrake_crawler::{CrawlConfig, Crawler, ImageLinkExtractor, ImageSaver, PagedFeeder};
//!
//! let source = PagedFeeder::new("https://example.com/search?q=cat&first={offset}", 0, 35, 5);
//! let mut crawler = Crawler::new(
//!     CrawlConfig { max_num: 100, ..Default::default() },
//!     Arc::new(source),
//!     Arc::new(ImageLinkExtractor),
//!     Arc::new(ImageSaver::new("images")),
//!     Arc::new(ReqwestTransport::new()),
//! )
//! .expect("invalid config");
//!
//! let summary = crawler.crawl().expect("crawl failed");
//! println!("accepted {} images", summary.fetched);
//! ```

pub mod collect;
pub mod config;
pub mod downloader;
pub mod extract;
pub mod feeder;
pub mod image;
pub mod parser;
pub mod probe;
pub mod runner;
pub mod task;
pub mod urls;

// Re-exports for convenience
pub use collect::Collect;
pub use config::CrawlConfig;
pub use downloader::{Downloader, DownloaderOptions};
pub use extract::{Extract, ImageLinkExtractor};
pub use feeder::{Feeder, PagedFeeder, SeedSource, UrlListFeeder};
pub use image::ImageSaver;
pub use parser::{Parser, ParserOptions};
pub use probe::{Decode, HeaderProbe, ImageFormat, ImageInfo, ProbeError};
pub use runner::{Crawler, RunSummary};
pub use task::{ResourceTask, SeedTask};
pub use urls::UrlCollector;
