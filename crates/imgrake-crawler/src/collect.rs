//! Terminal-stage strategies
//!
//! The Downloader owns the retry loop, the fetched counter and the stop
//! conditions. Everything that differs between "save the bytes" and "record
//! the locator" lives behind [`Collect`].

use std::io;
use std::time::Duration;

use imgrake_core::{FetchError, Response, Session};

use crate::task::ResourceTask;

pub trait Collect: Send + Sync {
    /// Short label used in log lines.
    fn name(&self) -> &str;

    /// Checked once before any fetch. A rejected task is not attempted.
    fn admit(&self, _task: &ResourceTask) -> bool {
        true
    }

    fn fetch(
        &self,
        session: &Session,
        task: &ResourceTask,
        timeout: Duration,
    ) -> Result<Response, FetchError> {
        session.get(&task.file_url, timeout)
    }

    /// Keep-predicate applied to a 2xx response. May record metadata on the
    /// task.
    fn keep(&self, task: &mut ResourceTask, resp: &Response) -> bool;

    /// Output name for the `index`-th accepted task, if this strategy names
    /// its outputs at all.
    fn file_name(&self, task: &ResourceTask, index: usize, default_ext: &str) -> Option<String> {
        let ext = url_extension(&task.file_url).unwrap_or_else(|| default_ext.to_string());
        Some(sequential_name(index, &ext))
    }

    /// Store an accepted task. Errors are logged by the caller and do not
    /// undo the acceptance.
    fn persist(&self, task: &ResourceTask, resp: &Response) -> io::Result<()>;

    /// Called once after every terminal worker has exited.
    fn finish(&self) -> io::Result<()> {
        Ok(())
    }
}

/// `000042.jpg`
pub fn sequential_name(index: usize, ext: &str) -> String {
    format!("{index:06}.{ext}")
}

/// Lowercased suffix of the last path segment, ignoring query and fragment.
pub fn url_extension(file_url: &str) -> Option<String> {
    let path = match url::Url::parse(file_url) {
        Ok(u) => u.path().to_string(),
        Err(_) => file_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_path() {
        assert_eq!(url_extension("https://a.com/x/pic.JPG").as_deref(), Some("jpg"));
        assert_eq!(
            url_extension("https://a.com/pic.png?w=200#top").as_deref(),
            Some("png")
        );
        assert_eq!(url_extension("https://a.com/dir.d/file"), None);
        assert_eq!(url_extension("https://a.com/"), None);
        assert_eq!(url_extension("https://a.com/odd."), None);
    }

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(sequential_name(1, "jpg"), "000001.jpg");
        assert_eq!(sequential_name(1_234_567, "png"), "1234567.png");
    }
}
