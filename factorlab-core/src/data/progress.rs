//! Byte-level progress reporting for large downloads.

use std::io::Write;
use std::sync::Mutex;

/// Callbacks for a single streamed download.
///
/// `total` is the advertised content length, when the server sent one.
pub trait DownloadProgress: Send + Sync {
    fn on_start(&self, label: &str, total: Option<u64>);

    fn on_bytes(&self, label: &str, downloaded: u64, total: Option<u64>);

    fn on_finish(&self, label: &str, downloaded: u64);
}

/// Reports nothing.
pub struct SilentProgress;

impl DownloadProgress for SilentProgress {
    fn on_start(&self, _label: &str, _total: Option<u64>) {}
    fn on_bytes(&self, _label: &str, _downloaded: u64, _total: Option<u64>) {}
    fn on_finish(&self, _label: &str, _downloaded: u64) {}
}

/// Simple progress bar written to stderr.
pub struct StderrProgress {
    width: usize,
    last_percent: Mutex<Option<u64>>,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            width: 30,
            last_percent: Mutex::new(None),
        }
    }

    fn render(&self, label: &str, downloaded: u64, total: Option<u64>) -> String {
        match total {
            Some(total) if total > 0 => {
                let percent = (downloaded.min(total) * 100) / total;
                let filled = (percent as usize * self.width) / 100;
                format!(
                    "{label} [{}{}] {percent:>3}%",
                    "#".repeat(filled),
                    ".".repeat(self.width - filled)
                )
            }
            _ => format!("{label} {} KiB", downloaded / 1024),
        }
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadProgress for StderrProgress {
    fn on_start(&self, label: &str, total: Option<u64>) {
        if let Ok(mut last) = self.last_percent.lock() {
            *last = None;
        }
        eprint!("\r{}", self.render(label, 0, total));
    }

    fn on_bytes(&self, label: &str, downloaded: u64, total: Option<u64>) {
        // Redraw only when the visible percentage moves.
        if let Some(t) = total.filter(|t| *t > 0) {
            let percent = (downloaded.min(t) * 100) / t;
            if let Ok(mut last) = self.last_percent.lock() {
                if *last == Some(percent) {
                    return;
                }
                *last = Some(percent);
            }
        }
        eprint!("\r{}", self.render(label, downloaded, total));
        let _ = std::io::stderr().flush();
    }

    fn on_finish(&self, label: &str, downloaded: u64) {
        eprintln!("\r{}", self.render(label, downloaded, Some(downloaded)));
    }
}
