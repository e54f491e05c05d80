//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one indicatif bar per in-flight resource download.
//! Non-TTY mode: log-based output (no progress bars).

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Per-resource download bar (binary bytes, unknown total until headers arrive)
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24.dim} {bar:30.green/dim} {binary_bytes:>7}/{binary_total_bytes:7} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        let is_tty = std::io::stderr().is_terminal();
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Create a byte-progress bar for one resource download.
    ///
    /// TTY: visible bar; the transfer sets the length once the server
    /// announces a content length. Non-TTY: hidden (no-op).
    pub fn resource_bar(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }

        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(bar_style());
        // Truncate long names to keep bars aligned
        pb.set_prefix(truncate_prefix(name, 24).to_string());
        pb
    }

    /// Create a materialization status line with a spinner.
    ///
    /// Update with `pb.set_message(...)`; call `pb.finish()` to stop.
    pub fn status_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<12.cyan.bold} {wide_msg}")
                .expect("invalid template"),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Print a line above managed progress bars (avoids interference).
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for the log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// At most `max` bytes of `name`, never splitting a character.
/// Resource names come from dataset declarations, so multibyte input
/// is expected.
fn truncate_prefix(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_bar_outside_tty() {
        let ctx = ProgressContext::new();
        if !ctx.is_tty() {
            let pb = ctx.resource_bar("train_images");
            assert!(pb.is_hidden());
        }
    }

    #[test]
    fn short_prefix_untouched() {
        assert_eq!(truncate_prefix("train_images", 24), "train_images");
    }

    #[test]
    fn long_ascii_prefix_cut_at_limit() {
        let name = "a".repeat(40);
        assert_eq!(truncate_prefix(&name, 24).len(), 24);
    }

    #[test]
    fn multibyte_prefix_cut_on_char_boundary() {
        // 1 + 12*2 = 25 bytes; byte 24 lands inside the last 'é'
        let name = format!("a{}", "é".repeat(12));
        let cut = truncate_prefix(&name, 24);
        assert_eq!(cut.len(), 23);
        assert!(name.starts_with(cut));
    }

    #[test]
    fn bar_accepts_long_multibyte_name() {
        let ctx = ProgressContext {
            multi: MultiProgress::new(),
            is_tty: true,
        };
        let name = format!("a{}", "é".repeat(12));
        let pb = ctx.resource_bar(&name);
        pb.finish_and_clear();
    }
}
