//! Collect validated image URLs into a JSON file instead of saving bytes

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use imgrake_core::{FetchError, Method, Response, Session};

use crate::collect::{Collect, url_extension};
use crate::probe::{Decode, HeaderProbe};
use crate::task::ResourceTask;

/// Extensions trusted enough for a HEAD check.
pub const URL_IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Accepted URLs are written out after every this many acceptances.
pub const FLUSH_EVERY: usize = 10;

const SKIPPED_PAGES: [&str; 3] = [
    "google.com/search/about-this-image",
    "wikimedia.org/wiki/",
    "wikipedia.org/wiki/",
];

pub struct UrlCollector {
    output: PathBuf,
    urls: Mutex<Vec<String>>,
    decoder: Arc<dyn Decode>,
}

impl UrlCollector {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            urls: Mutex::new(Vec::new()),
            decoder: Arc::new(HeaderProbe),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn Decode>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn output(&self) -> &PathBuf {
        &self.output
    }

    /// Accepted URLs so far, in acceptance order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn save(&self, urls: &[String]) -> io::Result<()> {
        let json = serde_json::to_string_pretty(urls)?;
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.output, json)?;
        log::info!("saved {} URLs to {}", urls.len(), self.output.display());
        Ok(())
    }
}

fn has_image_extension(file_url: &str) -> bool {
    url_extension(file_url).is_some_and(|e| URL_IMAGE_EXTENSIONS.contains(&e.as_str()))
}

impl Collect for UrlCollector {
    fn name(&self) -> &str {
        "urls"
    }

    fn admit(&self, task: &ResourceTask) -> bool {
        let url = task.file_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            log::info!("invalid URL format: {url}");
            return false;
        }
        if SKIPPED_PAGES.iter().any(|p| url.contains(p)) {
            log::info!("skipping non-image page: {url}");
            return false;
        }
        true
    }

    /// HEAD for locators that look like images, GET otherwise or when HEAD
    /// is refused.
    fn fetch(
        &self,
        session: &Session,
        task: &ResourceTask,
        timeout: Duration,
    ) -> Result<Response, FetchError> {
        if has_image_extension(&task.file_url) {
            let resp = session.head(&task.file_url, timeout)?;
            if resp.status == 200 {
                return Ok(resp);
            }
            log::debug!("HEAD returned {}, trying GET: {}", resp.status, task.file_url);
        }
        session.get(&task.file_url, timeout)
    }

    fn keep(&self, task: &mut ResourceTask, resp: &Response) -> bool {
        // A 200 HEAD on an image-looking locator is enough
        if resp.method == Method::Head {
            return true;
        }
        let content_type = resp.content_type();
        if !content_type.starts_with("image/") {
            log::info!(
                "not an image (content-type: {content_type}): {}",
                task.file_url
            );
            return false;
        }
        match self.decoder.decode(&resp.body) {
            Ok(info) => {
                task.meta = Some(info);
                true
            }
            Err(e) => {
                log::info!("content is not a valid image ({e}): {}", task.file_url);
                false
            }
        }
    }

    fn file_name(&self, _task: &ResourceTask, _index: usize, _default_ext: &str) -> Option<String> {
        None
    }

    fn persist(&self, task: &ResourceTask, _resp: &Response) -> io::Result<()> {
        let mut urls = self.urls.lock().unwrap_or_else(PoisonError::into_inner);
        urls.push(task.file_url.clone());
        if urls.len() % FLUSH_EVERY == 0 {
            self.save(&urls)?;
        }
        Ok(())
    }

    fn finish(&self) -> io::Result<()> {
        let urls = self.urls.lock().unwrap_or_else(PoisonError::into_inner);
        self.save(&urls)?;
        log::info!("total URLs collected: {}", urls.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tests::png;

    fn read(path: &std::path::Path) -> Vec<String> {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn admit_filters_schemes_and_pages() {
        let c = UrlCollector::new("unused.json");
        let admit = |url: &str| c.admit(&ResourceTask::new(url));
        assert!(admit("https://cdn.example.com/a.jpg"));
        assert!(admit("http://cdn.example.com/a"));
        assert!(!admit("ftp://cdn.example.com/a.jpg"));
        assert!(!admit("data:image/png;base64,AAAA"));
        assert!(!admit("https://www.google.com/search/about-this-image?img=1"));
        assert!(!admit("https://commons.wikimedia.org/wiki/File:Cat.jpg"));
        assert!(!admit("https://en.wikipedia.org/wiki/File:Cat.jpg"));
    }

    #[test]
    fn keep_accepts_head_answer_for_image_extension() {
        let c = UrlCollector::new("unused.json");
        let mut task = ResourceTask::new("https://a.com/p.webp");
        let head = Response::new("https://a.com/p.webp", 200).with_method(Method::Head);
        assert!(c.keep(&mut task, &head));
    }

    #[test]
    fn empty_get_answer_is_not_an_image() {
        let c = UrlCollector::new("unused.json");
        let mut task = ResourceTask::new("https://a.com/broken.jpg");
        let get = Response::new("https://a.com/broken.jpg", 200).with_header("Content-Type", "text/html");
        assert!(!c.keep(&mut task, &get));
        assert!(task.meta.is_none());
    }

    #[test]
    fn keep_requires_image_content() {
        let c = UrlCollector::new("unused.json");
        let mut task = ResourceTask::new("https://a.com/render?id=1");

        let html = Response::new("", 200)
            .with_header("Content-Type", "text/html")
            .with_body("<html>");
        assert!(!c.keep(&mut task, &html));

        let lying = Response::new("", 200)
            .with_header("Content-Type", "image/png")
            .with_body("<html>");
        assert!(!c.keep(&mut task, &lying));

        let real = Response::new("", 200)
            .with_header("Content-Type", "image/png")
            .with_body(png(4, 4));
        assert!(c.keep(&mut task, &real));
        assert!(task.meta.is_some());
    }

    #[test]
    fn flushes_every_ten_and_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("urls.json");
        let c = UrlCollector::new(&out);
        let resp = Response::default();

        for i in 0..9 {
            c.persist(&ResourceTask::new(format!("https://a.com/{i}.jpg")), &resp)
                .unwrap();
        }
        assert!(!out.exists());

        c.persist(&ResourceTask::new("https://a.com/9.jpg"), &resp)
            .unwrap();
        assert_eq!(read(&out).len(), 10);

        for i in 10..13 {
            c.persist(&ResourceTask::new(format!("https://a.com/{i}.jpg")), &resp)
                .unwrap();
        }
        assert_eq!(read(&out).len(), 10);

        c.finish().unwrap();
        let saved = read(&out);
        assert_eq!(saved.len(), 13);
        assert_eq!(saved, c.urls());
        assert_eq!(saved[12], "https://a.com/12.jpg");
    }

    #[test]
    fn unwritable_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should go
        let c = UrlCollector::new(dir.path());
        assert!(c.finish().is_err());
    }
}
