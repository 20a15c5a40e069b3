//! Second stage: fetch seed pages and extract resource tasks

use std::io;
use std::sync::Arc;
use std::time::Duration;

use imgrake_core::{Flag, Session, Signal, Stage, WorkerContext, WorkerPool, isolate};

use crate::extract::Extract;
use crate::task::{ResourceTask, SeedTask};

#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// How long a worker blocks on its input queue before re-checking flags.
    pub queue_timeout: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    pub max_retry: u32,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            queue_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            max_retry: 3,
        }
    }
}

pub struct Parser {
    pool: WorkerPool<SeedTask, ResourceTask>,
    signal: Arc<Signal>,
    session: Arc<Session>,
    extract: Arc<dyn Extract>,
}

struct ParseWorker {
    signal: Arc<Signal>,
    session: Arc<Session>,
    extract: Arc<dyn Extract>,
    options: ParserOptions,
}

impl Parser {
    pub fn new(
        thread_num: usize,
        signal: Arc<Signal>,
        session: Arc<Session>,
        extract: Arc<dyn Extract>,
    ) -> Self {
        Self {
            pool: WorkerPool::new("parser", thread_num),
            signal,
            session,
            extract,
        }
    }

    /// Spawn the workers. They exit once the feeder has exited and no seed
    /// is left, or when the run is told to stop.
    pub fn start(&mut self, options: &ParserOptions) -> io::Result<()> {
        let worker = Arc::new(ParseWorker {
            signal: self.signal.clone(),
            session: self.session.clone(),
            extract: self.extract.clone(),
            options: options.clone(),
        });
        self.pool.start(move |ctx| worker.run(ctx))
    }
}

impl ParseWorker {
    fn run(&self, ctx: &WorkerContext<SeedTask, ResourceTask>) {
        loop {
            if self.signal.should_stop() {
                log::info!("{}: stop requested, exiting", ctx.name);
                break;
            }
            let Some(seed) = ctx.in_queue.get(self.options.queue_timeout) else {
                if self.signal.get(Flag::FeederExited) && ctx.in_queue.is_empty() {
                    log::info!("{}: no more seeds, exiting", ctx.name);
                    break;
                }
                log::debug!("{}: waiting for seeds", ctx.name);
                continue;
            };
            isolate(&ctx.name, || self.parse(ctx, &seed));
            ctx.in_queue.task_done();
        }
    }

    fn parse(&self, ctx: &WorkerContext<SeedTask, ResourceTask>, seed: &SeedTask) {
        let mut retry = self.options.max_retry;
        while retry > 0 {
            if self.signal.should_stop() {
                return;
            }
            let page = match self.session.get(&seed.url, self.options.timeout) {
                Ok(page) => page,
                Err(e) => {
                    retry -= 1;
                    log::error!(
                        "exception caught when fetching page {}: {e}, remaining retry times: {retry}",
                        seed.url
                    );
                    continue;
                }
            };
            if !page.is_success() {
                log::error!("response status code {} for page {}", page.status, seed.url);
                return;
            }
            let tasks = self.extract.extract(&page, seed);
            log::debug!("{}: {} links on {}", ctx.name, tasks.len(), seed.url);
            for task in tasks {
                if self.signal.should_stop() {
                    break;
                }
                ctx.emit(task);
            }
            return;
        }
    }
}

impl Stage for Parser {
    type In = SeedTask;
    type Out = ResourceTask;

    fn pool(&self) -> &WorkerPool<SeedTask, ResourceTask> {
        &self.pool
    }

    fn pool_mut(&mut self) -> &mut WorkerPool<SeedTask, ResourceTask> {
        &mut self.pool
    }
}
