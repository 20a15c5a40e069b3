//! Pipeline orchestration: feeder -> parser -> downloader

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use imgrake_core::{
    ConfigError, Flag, ProxyPool, Session, Signal, Stage, TaskQueue, Transport, fmt_num,
};
use indicatif::ProgressBar;

use crate::collect::Collect;
use crate::config::CrawlConfig;
use crate::downloader::Downloader;
use crate::extract::Extract;
use crate::feeder::{Feeder, SeedSource};
use crate::parser::Parser;
use crate::task::ResourceTask;

/// Three connected stages sharing one signal and one session.
pub struct Crawler {
    config: CrawlConfig,
    signal: Arc<Signal>,
    session: Arc<Session>,
    feeder: Feeder,
    parser: Parser,
    downloader: Downloader,
}

impl Crawler {
    /// Validate `config` and wire the stages. Nothing is spawned yet.
    pub fn new(
        config: CrawlConfig,
        source: Arc<dyn SeedSource>,
        extract: Arc<dyn Extract>,
        collect: Arc<dyn Collect>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let proxy_pool = if config.proxies.is_empty() {
            None
        } else {
            log::info!("using {} proxies", config.proxies.len());
            Some(Arc::new(ProxyPool::new(config.proxies.iter().cloned())))
        };
        let session = Arc::new(Session::new(
            transport,
            proxy_pool,
            config.session.clone(),
        )?);
        let signal = Arc::new(Signal::new());

        let mut feeder = Feeder::new(config.feeder_threads, signal.clone(), source);
        let mut parser = Parser::new(
            config.parser_threads,
            signal.clone(),
            session.clone(),
            extract,
        );
        let mut downloader = Downloader::new(
            config.downloader_threads,
            signal.clone(),
            session.clone(),
            collect,
        );
        feeder.connect(&mut parser).connect(&mut downloader);

        Ok(Self {
            config,
            signal,
            session,
            feeder,
            parser,
            downloader,
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.downloader = self.downloader.with_progress(progress);
        self
    }

    /// Shared flags; raise [`Flag::Shutdown`] to stop a running crawl.
    pub fn signal(&self) -> Arc<Signal> {
        self.signal.clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Output index offset for the next `crawl()`.
    pub fn set_file_idx_offset(&mut self, offset: usize) {
        self.config.file_idx_offset = offset;
    }

    /// Publish every finished resource task on the returned queue.
    pub fn record_results(&mut self) -> Arc<TaskQueue<ResourceTask>> {
        self.downloader.record_results()
    }

    /// Run all stages to completion.
    ///
    /// Returns once every downloader thread has exited; the upstream stages
    /// are then told to stop, joined, and whatever is still queued is
    /// discarded.
    pub fn crawl(&mut self) -> anyhow::Result<RunSummary> {
        let start = Instant::now();
        self.signal.reset();
        log::info!("start crawling...");

        if let Err(e) = self.start_stages() {
            self.signal.set(&[Flag::Shutdown]);
            self.join_all();
            return Err(e);
        }

        loop {
            if !self.feeder.is_alive() {
                self.signal.set(&[Flag::FeederExited]);
            }
            if !self.parser.is_alive() {
                self.signal.set(&[Flag::ParserExited]);
            }
            if !self.downloader.is_alive() {
                break;
            }
            thread::sleep(self.config.poll_interval);
        }

        let reached_max_num = self.signal.get(Flag::ReachMaxNum);
        let interrupted = self.signal.get(Flag::Shutdown);
        self.signal.set(&[Flag::Shutdown]);
        self.join_all();

        let discarded_seeds = self.parser.pool().clear_buffer(false);
        let discarded_tasks = self.downloader.pool().clear_buffer(true);

        if let Err(e) = self.downloader.collect().finish() {
            log::error!("failed to finalize {} output: {e}", self.downloader.collect().name());
        }

        let summary = RunSummary {
            fetched: self.downloader.fetched(),
            reached_max_num,
            interrupted,
            discarded_seeds,
            discarded_tasks,
            elapsed: start.elapsed(),
        };
        log::info!("crawling task done!");
        summary.log();
        Ok(summary)
    }

    fn start_stages(&mut self) -> anyhow::Result<()> {
        log::info!("starting {} feeder threads...", self.feeder.pool().thread_num());
        self.feeder
            .start()
            .context("failed to spawn feeder threads")?;

        log::info!("starting {} parser threads...", self.parser.pool().thread_num());
        self.parser
            .start(&self.config.parser_options())
            .context("failed to spawn parser threads")?;

        log::info!(
            "starting {} downloader threads...",
            self.downloader.pool().thread_num()
        );
        self.downloader
            .start(&self.config.downloader_options())
            .context("failed to spawn downloader threads")?;
        Ok(())
    }

    fn join_all(&mut self) {
        self.feeder.pool_mut().join();
        self.parser.pool_mut().join();
        self.downloader.pool_mut().join();
    }
}

/// Summary of one crawl
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fetched: usize,
    pub reached_max_num: bool,
    /// Stopped by an external shutdown request.
    pub interrupted: bool,
    pub discarded_seeds: usize,
    pub discarded_tasks: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!("=== Crawl Summary ===");
        let reason = if self.interrupted {
            "interrupted"
        } else if self.reached_max_num {
            "reached max num"
        } else {
            "sources exhausted"
        };
        log::info!("Accepted: {} ({reason})", fmt_num(self.fetched));
        if self.discarded_seeds + self.discarded_tasks > 0 {
            log::info!(
                "Discarded: {} seeds, {} resource tasks",
                fmt_num(self.discarded_seeds),
                fmt_num(self.discarded_tasks)
            );
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        if self.fetched > 0 {
            let per_sec = self.fetched as f64 / self.elapsed.as_secs_f64();
            log::info!("Throughput: {per_sec:.1} resources/sec");
        }
    }
}
