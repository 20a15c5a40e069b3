//! Cross-stage coordination via named atomic flags
//!
//! Flags only ever go from `false` to `true` during a run. The only way back is
//! [`Signal::reset`], which the orchestrator calls before starting the pools.
//! A stale read can therefore delay a shutdown but never trigger one early.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Named flags shared by every stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Every feeder worker has returned.
    FeederExited,
    /// Every parser worker has returned.
    ParserExited,
    /// The terminal stage accepted as many resources as it was asked for.
    ReachMaxNum,
    /// Stop requested from outside (SIGINT/SIGTERM or terminal stage down).
    Shutdown,
}

impl Flag {
    pub const ALL: [Flag; 4] = [
        Flag::FeederExited,
        Flag::ParserExited,
        Flag::ReachMaxNum,
        Flag::Shutdown,
    ];

    const fn slot(self) -> usize {
        match self {
            Flag::FeederExited => 0,
            Flag::ParserExited => 1,
            Flag::ReachMaxNum => 2,
            Flag::Shutdown => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Flag::FeederExited => "feeder_exited",
            Flag::ParserExited => "parser_exited",
            Flag::ReachMaxNum => "reach_max_num",
            Flag::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared flag set. Wrap in an `Arc` and hand a clone to every stage.
#[derive(Debug, Default)]
pub struct Signal {
    flags: [AtomicBool; 4],
    /// Serialises writers so a multi-flag `set` lands as one update.
    write: Mutex<()>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, flag: Flag) -> bool {
        self.flags[flag.slot()].load(Ordering::Acquire)
    }

    /// Raise every flag in `flags` as one update.
    pub fn set(&self, flags: &[Flag]) {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        for flag in flags {
            if !self.flags[flag.slot()].swap(true, Ordering::AcqRel) {
                log::debug!("signal {flag} raised");
            }
        }
    }

    /// Restore every flag to `false`. Only valid before a run starts.
    pub fn reset(&self) {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        for flag in &self.flags {
            flag.store(false, Ordering::Release);
        }
    }

    /// True once a stage should stop regardless of its input queue.
    pub fn should_stop(&self) -> bool {
        self.get(Flag::ReachMaxNum) || self.get(Flag::Shutdown)
    }

    /// Current value of every flag, in [`Flag::ALL`] order.
    pub fn snapshot(&self) -> [(Flag, bool); 4] {
        Flag::ALL.map(|flag| (flag, self.get(flag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_all_false() {
        let signal = Signal::new();
        for (flag, value) in signal.snapshot() {
            assert!(!value, "{flag} should start false");
        }
    }

    #[test]
    fn set_raises_several_flags() {
        let signal = Signal::new();
        signal.set(&[Flag::FeederExited, Flag::ParserExited]);
        assert!(signal.get(Flag::FeederExited));
        assert!(signal.get(Flag::ParserExited));
        assert!(!signal.get(Flag::ReachMaxNum));
    }

    #[test]
    fn set_is_idempotent() {
        let signal = Signal::new();
        signal.set(&[Flag::ReachMaxNum]);
        signal.set(&[Flag::ReachMaxNum]);
        assert!(signal.get(Flag::ReachMaxNum));
    }

    #[test]
    fn reset_clears_everything() {
        let signal = Signal::new();
        signal.set(&Flag::ALL);
        signal.reset();
        assert!(signal.snapshot().iter().all(|(_, v)| !v));
    }

    #[test]
    fn should_stop_on_max_or_shutdown() {
        let signal = Signal::new();
        signal.set(&[Flag::FeederExited]);
        assert!(!signal.should_stop());
        signal.set(&[Flag::Shutdown]);
        assert!(signal.should_stop());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let signal = Arc::new(Signal::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let signal = signal.clone();
                std::thread::spawn(move || {
                    let flag = Flag::ALL[i % Flag::ALL.len()];
                    for _ in 0..1000 {
                        signal.set(&[flag]);
                        // Once observed true it must stay true
                        assert!(signal.get(flag));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(signal.snapshot().iter().all(|(_, v)| *v));
    }

    #[test]
    fn display_uses_snake_case_names() {
        assert_eq!(Flag::ReachMaxNum.to_string(), "reach_max_num");
        assert_eq!(Flag::FeederExited.to_string(), "feeder_exited");
    }
}
