//! Fixed-size pools of named OS threads running one worker loop
//!
//! A pool owns its input [`TaskQueue`] and optionally holds the input queue of
//! the next pool as its output. Each worker runs the same body until the body
//! returns; the body decides its own stop conditions.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::queue::TaskQueue;

/// Lock-protected bookkeeping shared by the workers of one pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolCounter {
    /// Units accepted since the last `start()`.
    pub processed: usize,
    /// When the most recent unit was accepted.
    pub last_success: Option<Instant>,
}

/// Handles passed to every worker body.
pub struct WorkerContext<I, O> {
    pub index: usize,
    pub name: String,
    pub in_queue: Arc<TaskQueue<I>>,
    pub out_queue: Option<Arc<TaskQueue<O>>>,
    counter: Arc<Mutex<PoolCounter>>,
}

impl<I, O> WorkerContext<I, O> {
    /// Run `f` with exclusive access to the pool counter.
    pub fn with_counter<R>(&self, f: impl FnOnce(&mut PoolCounter) -> R) -> R {
        f(&mut lock(&self.counter))
    }

    pub fn counter(&self) -> PoolCounter {
        *lock(&self.counter)
    }

    /// Push a task downstream. Returns `false` when no pool is connected.
    pub fn emit(&self, item: O) -> bool {
        match &self.out_queue {
            Some(q) => {
                q.put(item);
                true
            }
            None => false,
        }
    }
}

pub struct WorkerPool<I, O> {
    name: String,
    thread_num: usize,
    in_queue: Arc<TaskQueue<I>>,
    out_queue: Option<Arc<TaskQueue<O>>>,
    counter: Arc<Mutex<PoolCounter>>,
    workers: Vec<JoinHandle<()>>,
}

impl<I, O> fmt::Debug for WorkerPool<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("thread_num", &self.thread_num)
            .field("connected", &self.out_queue.is_some())
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl<I, O> WorkerPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(name: impl Into<String>, thread_num: usize) -> Self {
        Self {
            name: name.into(),
            thread_num,
            in_queue: Arc::new(TaskQueue::new()),
            out_queue: None,
            counter: Arc::new(Mutex::new(PoolCounter::default())),
            workers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    pub fn in_queue(&self) -> &Arc<TaskQueue<I>> {
        &self.in_queue
    }

    pub fn out_queue(&self) -> Option<&Arc<TaskQueue<O>>> {
        self.out_queue.as_ref()
    }

    /// Use `next`'s input queue as this pool's output. Returns `next` so
    /// connections can be chained.
    pub fn connect<'a, N>(&mut self, next: &'a mut WorkerPool<O, N>) -> &'a mut WorkerPool<O, N>
    where
        N: Send + 'static,
    {
        self.out_queue = Some(next.in_queue.clone());
        log::debug!("{} -> {}", self.name, next.name);
        next
    }

    /// Give an unconnected pool an output queue of its own and return it.
    pub fn attach_output(&mut self) -> Arc<TaskQueue<O>> {
        self.out_queue
            .get_or_insert_with(|| Arc::new(TaskQueue::new()))
            .clone()
    }

    pub fn counter(&self) -> PoolCounter {
        *lock(&self.counter)
    }

    /// Reset the counter, then spawn `thread_num` workers running `body`.
    pub fn start<F>(&mut self, body: F) -> std::io::Result<()>
    where
        F: Fn(&WorkerContext<I, O>) + Send + Sync + 'static,
    {
        if self.is_alive() {
            log::warn!("{}: start() called while workers are still running", self.name);
        }
        self.reap();
        *lock(&self.counter) = PoolCounter::default();

        let body = Arc::new(body);
        for index in 0..self.thread_num {
            let ctx = WorkerContext {
                index,
                name: format!("{}-{:03}", self.name, index + 1),
                in_queue: self.in_queue.clone(),
                out_queue: self.out_queue.clone(),
                counter: self.counter.clone(),
            };
            let body = body.clone();
            let handle = thread::Builder::new()
                .name(ctx.name.clone())
                .spawn(move || {
                    body(&ctx);
                    log::info!("thread {} exit", ctx.name);
                })?;
            log::debug!("thread {}-{:03} started", self.name, index + 1);
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Whether any worker thread is still running.
    pub fn is_alive(&self) -> bool {
        self.workers.iter().any(|h| !h.is_finished())
    }

    /// Wait for every worker thread to return.
    pub fn join(&mut self) {
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if let Err(payload) = handle.join() {
                log::error!("thread {name} panicked: {}", panic_message(&*payload));
            }
        }
    }

    /// Drop handles of workers that already returned.
    fn reap(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) =
            self.workers.drain(..).partition(|h| h.is_finished());
        self.workers = running;
        for handle in done {
            let _ = handle.join();
        }
    }

    /// Discard whatever is left in the input queue once the workers stopped.
    ///
    /// With `mark_done` every discarded task is also marked processed so the
    /// queue's unfinished count settles at zero.
    pub fn clear_buffer(&self, mark_done: bool) -> usize {
        let drained = self.in_queue.drain(mark_done).len();
        if drained > 0 {
            log::info!("{}: discarded {drained} queued tasks", self.name);
        }
        drained
    }
}

/// A pipeline stage built around one [`WorkerPool`].
pub trait Stage {
    type In: Send + 'static;
    type Out: Send + 'static;

    fn pool(&self) -> &WorkerPool<Self::In, Self::Out>;
    fn pool_mut(&mut self) -> &mut WorkerPool<Self::In, Self::Out>;

    /// Feed this stage's output into `next`; returns `next` for chaining.
    fn connect<'a, S>(&mut self, next: &'a mut S) -> &'a mut S
    where
        S: Stage<In = Self::Out>,
    {
        self.pool_mut().connect(next.pool_mut());
        next
    }

    fn is_alive(&self) -> bool {
        self.pool().is_alive()
    }
}

/// Run one task-processing step, logging instead of unwinding on panic.
///
/// Keeps a single bad task from taking its worker thread down.
pub fn isolate<T>(label: &str, step: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(v) => Some(v),
        Err(payload) => {
            log::error!("{label}: task step panicked: {}", panic_message(&*payload));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
