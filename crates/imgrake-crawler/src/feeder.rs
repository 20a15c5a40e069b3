//! First stage: turn a seed source into seed tasks

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use imgrake_core::{Signal, Stage, WorkerPool};

use crate::task::SeedTask;

/// Exhaustible sequence of seeds, shared by every feeder thread.
///
/// Implementations hand each seed out exactly once between two `rewind()`
/// calls, however many threads pull from them.
pub trait SeedSource: Send + Sync {
    fn next_seed(&self) -> Option<SeedTask>;

    /// Number of seeds, when known up front.
    fn total(&self) -> Option<usize> {
        None
    }

    /// Start over from the first seed.
    fn rewind(&self) {}
}

/// A fixed list of page URLs.
pub struct UrlListFeeder {
    urls: Vec<String>,
    cursor: AtomicUsize,
}

impl UrlListFeeder {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            cursor: AtomicUsize::new(0),
        }
    }

    /// One URL per line; blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let urls: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect();
        log::debug!("{} seed URLs in {}", urls.len(), path.display());
        Ok(Self::new(urls))
    }
}

impl SeedSource for UrlListFeeder {
    fn next_seed(&self) -> Option<SeedTask> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.urls.get(i).map(|u| SeedTask::new(u.clone(), i))
    }

    fn total(&self) -> Option<usize> {
        Some(self.urls.len())
    }

    fn rewind(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }
}

/// Result pages of a paginated search: `{offset}` in the template is
/// replaced by `start`, `start + step`, ... for `pages` pages.
pub struct PagedFeeder {
    template: String,
    start: usize,
    step: usize,
    pages: usize,
    cursor: AtomicUsize,
}

impl PagedFeeder {
    pub const PLACEHOLDER: &'static str = "{offset}";

    pub fn new(template: impl Into<String>, start: usize, step: usize, pages: usize) -> Self {
        Self {
            template: template.into(),
            start,
            step,
            pages,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn page_url(&self, page: usize) -> String {
        let offset = self.start + page * self.step;
        self.template
            .replace(Self::PLACEHOLDER, &offset.to_string())
    }
}

impl SeedSource for PagedFeeder {
    fn next_seed(&self) -> Option<SeedTask> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        (i < self.pages).then(|| SeedTask::new(self.page_url(i), i))
    }

    fn total(&self) -> Option<usize> {
        Some(self.pages)
    }

    fn rewind(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }
}

pub struct Feeder {
    pool: WorkerPool<(), SeedTask>,
    signal: Arc<Signal>,
    source: Arc<dyn SeedSource>,
}

impl Feeder {
    pub fn new(thread_num: usize, signal: Arc<Signal>, source: Arc<dyn SeedSource>) -> Self {
        Self {
            pool: WorkerPool::new("feeder", thread_num),
            signal,
            source,
        }
    }

    /// Rewind the source and spawn the workers. Each worker exits once the
    /// source is exhausted or the run is told to stop.
    pub fn start(&mut self) -> io::Result<()> {
        self.source.rewind();
        let signal = self.signal.clone();
        let source = self.source.clone();
        self.pool.start(move |ctx| {
            while !signal.should_stop() {
                let Some(seed) = source.next_seed() else {
                    log::debug!("{}: seed source exhausted", ctx.name);
                    break;
                };
                log::debug!("{}: seed #{} {}", ctx.name, seed.index, seed.url);
                if !ctx.emit(seed) {
                    log::warn!("{}: no parser connected, stopping", ctx.name);
                    break;
                }
            }
        })
    }
}

impl Stage for Feeder {
    type In = ();
    type Out = SeedTask;

    fn pool(&self) -> &WorkerPool<(), SeedTask> {
        &self.pool
    }

    fn pool_mut(&mut self) -> &mut WorkerPool<(), SeedTask> {
        &mut self.pool
    }
}
