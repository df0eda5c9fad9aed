//! Progress bars for extraction, one per pipeline.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress display for one pipeline's extraction stage.
#[derive(Clone)]
pub struct PipelineProgress {
    bar: ProgressBar,
}

impl PipelineProgress {
    /// A bar that draws nothing; the default for library and test use.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// A visible bar attached to `multi`, labelled with the collection.
    pub fn attach(multi: &MultiProgress, label: &str) -> Self {
        let style = ProgressStyle::default_bar()
            .template("{prefix:>24} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bar.set_prefix(label.to_string());
        Self { bar }
    }

    pub fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    /// Advance by one item, showing its key.
    pub fn item_done(&self, key: &str) {
        let display = match key.rsplit_once('/') {
            Some((_, name)) => name,
            None => key,
        };
        self.bar.set_message(display.to_string());
        self.bar.inc(1);
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}

impl Default for PipelineProgress {
    fn default() -> Self {
        Self::hidden()
    }
}
