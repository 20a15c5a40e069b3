//! Terminal progress for the accepting stage.
//!
//! On a TTY the terminal stage gets one line: a bar when the run is bounded by
//! a maximum count, a spinner otherwise. Off a TTY every line is hidden and
//! the log is the only progress output.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Detects whether stderr is a terminal.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: std::io::stderr().is_terminal(),
        }
    }

    /// Context that never draws anything.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: false,
        }
    }

    /// Line counting accepted resources for stage `name`.
    ///
    /// With `max_num > 0` the line is a bar towards `max_num`; otherwise a
    /// spinner whose message the stage keeps current.
    pub fn accepted_line(&self, name: &str, max_num: usize) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let (pb, template) = if max_num > 0 {
            (
                ProgressBar::new(max_num as u64),
                "{prefix:<10.cyan.bold} {bar:30.green/dim} {pos:>7}/{len:7} {elapsed:>4} {wide_msg:.dim}",
            )
        } else {
            (
                ProgressBar::new_spinner(),
                "{spinner:.green} {prefix:<10.cyan.bold} {wide_msg} {elapsed:.dim}",
            )
        };
        let pb = self.multi.add(pb);
        pb.set_style(
            ProgressStyle::with_template(template)
                .expect("invalid template")
                .progress_chars("━━─"),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// The `MultiProgress` that log lines are printed through.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedProgress = Arc<ProgressContext>;

/// `1234567` -> `1,234,567`
pub fn fmt_num(n: usize) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.char_indices() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Status message for the accepting stage's line.
pub fn fetched_message(fetched: usize, max_num: usize) -> String {
    if max_num > 0 {
        format!("{} / {} accepted", fmt_num(fetched), fmt_num(max_num))
    } else {
        format!("{} accepted", fmt_num(fetched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_num_groups_digits() {
        assert_eq!(fmt_num(0), "0");
        assert_eq!(fmt_num(12), "12");
        assert_eq!(fmt_num(123), "123");
        assert_eq!(fmt_num(1_000), "1,000");
        assert_eq!(fmt_num(12_345), "12,345");
        assert_eq!(fmt_num(123_456), "123,456");
        assert_eq!(fmt_num(1_234_567), "1,234,567");
    }

    #[test]
    fn fetched_message_with_and_without_max() {
        assert_eq!(fetched_message(3, 10), "3 / 10 accepted");
        assert_eq!(fetched_message(1_500, 0), "1,500 accepted");
    }

    #[test]
    fn hidden_context_gives_hidden_lines() {
        let ctx = ProgressContext::hidden();
        assert!(!ctx.is_tty());
        assert!(ctx.accepted_line("images", 10).is_hidden());
        assert!(ctx.accepted_line("urls", 0).is_hidden());
    }
}
