//! Terminal stage: fetch, validate, name and persist resources
//!
//! Retry, counting and stop logic live here once; what "fetch", "keep" and
//! "persist" mean is decided by the installed [`Collect`] strategy.
//!
//! Stop conditions, checked at the top of every loop iteration:
//! 1. `reach_max_num` (or `shutdown`) is set
//! 2. nothing was accepted for longer than `max_idle_time`, counted from the
//!    last acceptance; a pool that has accepted nothing never idles out
//! 3. the input queue timed out, `parser_exited` is set and the queue is empty

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use imgrake_core::progress::fetched_message;
use imgrake_core::{
    Flag, Session, Signal, Stage, TaskQueue, WorkerContext, WorkerPool, isolate,
};
use indicatif::ProgressBar;

use crate::collect::Collect;
use crate::task::ResourceTask;

#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    /// Stop after this many accepted resources; 0 means unbounded.
    pub max_num: usize,
    /// Added to the accepted count to form output indices.
    pub file_idx_offset: usize,
    /// Extension used when the locator has no recognised one.
    pub default_ext: String,
    pub queue_timeout: Duration,
    pub timeout: Duration,
    pub max_retry: u32,
    pub max_idle_time: Option<Duration>,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            max_num: 0,
            file_idx_offset: 0,
            default_ext: "jpg".to_string(),
            queue_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            max_retry: 3,
            max_idle_time: None,
        }
    }
}

pub struct Downloader {
    pool: WorkerPool<ResourceTask, ResourceTask>,
    signal: Arc<Signal>,
    session: Arc<Session>,
    collect: Arc<dyn Collect>,
    progress: ProgressBar,
}

struct DownloadWorker {
    signal: Arc<Signal>,
    session: Arc<Session>,
    collect: Arc<dyn Collect>,
    options: DownloaderOptions,
    progress: ProgressBar,
}

impl Downloader {
    pub fn new(
        thread_num: usize,
        signal: Arc<Signal>,
        session: Arc<Session>,
        collect: Arc<dyn Collect>,
    ) -> Self {
        Self {
            pool: WorkerPool::new("downloader", thread_num),
            signal,
            session,
            collect,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Publish every finished task, accepted or not, on the returned queue.
    pub fn record_results(&mut self) -> Arc<TaskQueue<ResourceTask>> {
        self.pool.attach_output()
    }

    pub fn collect(&self) -> &Arc<dyn Collect> {
        &self.collect
    }

    /// Resources accepted since the last `start()`.
    pub fn fetched(&self) -> usize {
        self.pool.counter().processed
    }

    /// Reset the fetched counter and spawn the workers.
    pub fn start(&mut self, options: &DownloaderOptions) -> io::Result<()> {
        let worker = Arc::new(DownloadWorker {
            signal: self.signal.clone(),
            session: self.session.clone(),
            collect: self.collect.clone(),
            options: options.clone(),
            progress: self.progress.clone(),
        });
        self.pool.start(move |ctx| worker.run(ctx))
    }
}

impl DownloadWorker {
    fn run(&self, ctx: &WorkerContext<ResourceTask, ResourceTask>) {
        loop {
            if self.signal.get(Flag::ReachMaxNum) {
                log::info!(
                    "accepted count reached max num, {} is ready to exit",
                    ctx.name
                );
                break;
            }
            if self.signal.get(Flag::Shutdown) {
                log::info!("{}: shutdown requested, exiting", ctx.name);
                break;
            }
            if let Some(idle) = self.options.max_idle_time {
                let last = ctx.counter().last_success;
                if last.is_some_and(|t| t.elapsed() > idle) {
                    log::info!(
                        "{}: nothing accepted for {:.1}s, exiting",
                        ctx.name,
                        idle.as_secs_f64()
                    );
                    break;
                }
            }
            let Some(mut task) = ctx.in_queue.get(self.options.queue_timeout) else {
                if self.signal.get(Flag::ParserExited) && ctx.in_queue.is_empty() {
                    log::info!("no more download tasks for {}, exiting", ctx.name);
                    break;
                }
                if ctx.counter().processed == 0 {
                    log::info!("{} is waiting for new download tasks", ctx.name);
                } else {
                    log::info!("no new download tasks for {}", ctx.name);
                }
                continue;
            };
            isolate(&ctx.name, || self.download(ctx, &mut task));
            ctx.emit(task);
            ctx.in_queue.task_done();
        }
    }

    fn download(&self, ctx: &WorkerContext<ResourceTask, ResourceTask>, task: &mut ResourceTask) {
        task.success = false;
        task.filename = None;
        if !self.collect.admit(task) {
            return;
        }

        let max_num = self.options.max_num;
        let mut retry = self.options.max_retry;
        while retry > 0 {
            if self.signal.should_stop() {
                return;
            }
            let resp = match self.collect.fetch(&self.session, task, self.options.timeout) {
                Ok(resp) => resp,
                Err(e) => {
                    retry -= 1;
                    log::error!(
                        "exception caught when fetching {}: {e}, remaining retry times: {retry}",
                        task.file_url
                    );
                    continue;
                }
            };
            if !resp.is_success() {
                log::error!("response status code {} for {}", resp.status, task.file_url);
                return;
            }
            if self.signal.get(Flag::ReachMaxNum) {
                return;
            }
            if !self.collect.keep(task, &resp) {
                return;
            }

            // Claim the next index; refuse once the bound is already met
            let claimed = ctx.with_counter(|c| {
                if max_num > 0 && c.processed >= max_num {
                    return None;
                }
                c.processed += 1;
                c.last_success = Some(Instant::now());
                Some(c.processed)
            });
            let Some(fetched) = claimed else {
                self.signal.set(&[Flag::ReachMaxNum]);
                return;
            };
            if max_num > 0 && fetched >= max_num {
                self.signal.set(&[Flag::ReachMaxNum]);
            }

            let index = fetched + self.options.file_idx_offset;
            task.filename = self
                .collect
                .file_name(task, index, &self.options.default_ext);
            task.success = true;
            log::info!(
                "{} #{fetched}\t{}\t{}",
                self.collect.name(),
                task.filename.as_deref().unwrap_or("-"),
                task.file_url
            );
            if let Err(e) = self.collect.persist(task, &resp) {
                log::error!("failed to persist {}: {e}", task.file_url);
            }
            self.progress.set_position(fetched as u64);
            self.progress.set_message(fetched_message(fetched, max_num));
            return;
        }
    }
}

impl Stage for Downloader {
    type In = ResourceTask;
    type Out = ResourceTask;

    fn pool(&self) -> &WorkerPool<ResourceTask, ResourceTask> {
        &self.pool
    }

    fn pool_mut(&mut self) -> &mut WorkerPool<ResourceTask, ResourceTask> {
        &mut self.pool
    }
}
