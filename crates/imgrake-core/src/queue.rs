//! Task buffer connecting two worker pools.
//!
//! Uses `Mutex + Condvar` from std. `get` blocks for at most the given timeout
//! so a worker wakes up periodically to re-check the pipeline [`Signal`].
//!
//! [`Signal`]: crate::signal::Signal

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct State<T> {
    items: VecDeque<T>,
    /// Items handed out by `get` or still queued, minus `task_done` calls.
    unfinished: usize,
}

/// Unbounded FIFO with blocking-with-timeout `get` semantics.
pub struct TaskQueue<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, item: T) {
        let mut state = self.lock();
        state.items.push_back(item);
        state.unfinished += 1;
        self.cond.notify_one();
    }

    /// Block until an item is available or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Non-blocking `get`.
    pub fn try_get(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Mark one previously fetched item as processed.
    pub fn task_done(&self) {
        let mut state = self.lock();
        if state.unfinished == 0 {
            log::warn!("task_done called more times than items were queued");
            return;
        }
        state.unfinished -= 1;
    }

    /// Items queued or in progress that have not been marked done.
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Remove every queued item, optionally marking each one done.
    pub fn drain(&self, mark_done: bool) -> Vec<T> {
        let mut state = self.lock();
        let items: Vec<T> = state.items.drain(..).collect();
        if mark_done {
            state.unfinished = state.unfinished.saturating_sub(items.len());
        }
        items
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order() {
        let q = TaskQueue::new();
        q.put(1);
        q.put(2);
        q.put(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.get(Duration::ZERO), Some(1));
        assert_eq!(q.try_get(), Some(2));
        assert_eq!(q.get(Duration::from_millis(10)), Some(3));
        assert!(q.is_empty());
    }

    #[test]
    fn get_times_out_when_empty() {
        let q: TaskQueue<i32> = TaskQueue::new();
        let start = Instant::now();
        assert_eq!(q.get(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn blocked_get_wakes_on_put() {
        let q = Arc::new(TaskQueue::new());
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.get(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(50));
        q.put(42);

        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn task_done_tracks_unfinished() {
        let q = TaskQueue::new();
        q.put("a");
        q.put("b");
        assert_eq!(q.unfinished(), 2);
        q.get(Duration::ZERO);
        assert_eq!(q.unfinished(), 2);
        q.task_done();
        assert_eq!(q.unfinished(), 1);
    }

    #[test]
    fn drain_with_mark_done() {
        let q = TaskQueue::new();
        for i in 0..5 {
            q.put(i);
        }
        let drained = q.drain(true);
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert_eq!(q.unfinished(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_without_mark_done_keeps_count() {
        let q = TaskQueue::new();
        q.put(1);
        q.put(2);
        assert_eq!(q.drain(false).len(), 2);
        assert_eq!(q.unfinished(), 2);
    }

    #[test]
    fn each_item_delivered_once_across_consumers() {
        let q = Arc::new(TaskQueue::new());
        for i in 0..1000 {
            q.put(i);
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(i) = q.get(Duration::from_millis(20)) {
                        got.push(i);
                    }
                    got
                })
            })
            .collect();
        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
