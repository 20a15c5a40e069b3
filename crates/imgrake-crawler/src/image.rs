//! Save accepted images to a directory

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use imgrake_core::Response;

use crate::collect::{Collect, sequential_name, url_extension};
use crate::probe::{Decode, HeaderProbe, ImageInfo};
use crate::task::ResourceTask;

/// Extensions kept from the locator; anything else gets the default.
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "tiff", "gif", "ppm", "pgm"];

/// `(width, height)` bound.
pub type Size = (u32, u32);

pub struct ImageSaver {
    dir: PathBuf,
    min_size: Option<Size>,
    max_size: Option<Size>,
    overwrite: bool,
    decoder: Arc<dyn Decode>,
}

impl ImageSaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            min_size: None,
            max_size: None,
            overwrite: false,
            decoder: Arc::new(HeaderProbe),
        }
    }

    pub fn with_bounds(mut self, min_size: Option<Size>, max_size: Option<Size>) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn Decode>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn within_bounds(&self, info: &ImageInfo) -> bool {
        let too_small = self.min_size.is_some_and(|min| size_lt(info, min));
        let too_large = self.max_size.is_some_and(|max| size_gt(info, max));
        !too_small && !too_large
    }
}

/// Larger side compared with larger side, smaller with smaller.
fn size_lt(info: &ImageInfo, bound: Size) -> bool {
    info.larger_side() < bound.0.max(bound.1) || info.smaller_side() < bound.0.min(bound.1)
}

fn size_gt(info: &ImageInfo, bound: Size) -> bool {
    info.larger_side() > bound.0.max(bound.1) || info.smaller_side() > bound.0.min(bound.1)
}

impl Collect for ImageSaver {
    fn name(&self) -> &str {
        "images"
    }

    fn keep(&self, task: &mut ResourceTask, resp: &Response) -> bool {
        let info = match self.decoder.decode(&resp.body) {
            Ok(info) => info,
            Err(e) => {
                log::info!("not an image ({e}): {}", task.file_url);
                return false;
            }
        };
        task.meta = Some(info);
        if !self.within_bounds(&info) {
            log::debug!(
                "size {}x{} out of bounds: {}",
                info.width,
                info.height,
                task.file_url
            );
            return false;
        }
        true
    }

    fn file_name(&self, task: &ResourceTask, index: usize, default_ext: &str) -> Option<String> {
        let ext = url_extension(&task.file_url)
            .filter(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
            .unwrap_or_else(|| default_ext.to_string());
        Some(sequential_name(index, &ext))
    }

    fn persist(&self, task: &ResourceTask, resp: &Response) -> io::Result<()> {
        let Some(name) = &task.filename else {
            return Ok(());
        };
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        if path.exists() && !self.overwrite {
            log::info!("skip {}: file exists", path.display());
            return Ok(());
        }
        fs::write(&path, &resp.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tests::png;

    fn accepted(saver: &ImageSaver, w: u32, h: u32) -> bool {
        let mut task = ResourceTask::new("https://a.com/p.png");
        let resp = Response::new("https://a.com/p.png", 200).with_body(png(w, h));
        saver.keep(&mut task, &resp)
    }

    #[test]
    fn keep_records_dimensions() {
        let saver = ImageSaver::new("unused");
        let mut task = ResourceTask::new("https://a.com/p.png");
        let resp = Response::new("https://a.com/p.png", 200).with_body(png(32, 16));
        assert!(saver.keep(&mut task, &resp));
        let meta = task.meta.unwrap();
        assert_eq!((meta.width, meta.height), (32, 16));
    }

    #[test]
    fn keep_rejects_non_images() {
        let saver = ImageSaver::new("unused");
        let mut task = ResourceTask::new("https://a.com/p.jpg");
        let resp = Response::new("https://a.com/p.jpg", 200).with_body("<html>");
        assert!(!saver.keep(&mut task, &resp));
        assert!(task.meta.is_none());
    }

    #[test]
    fn bounds_compare_sides_irrespective_of_orientation() {
        let saver = ImageSaver::new("unused").with_bounds(Some((100, 200)), Some((1000, 800)));
        // Portrait image fits a landscape bound
        assert!(accepted(&saver, 150, 300));
        assert!(!accepted(&saver, 90, 300));
        assert!(!accepted(&saver, 500, 1200));
        assert!(accepted(&saver, 800, 1000));
    }

    #[test]
    fn file_name_restricts_extensions() {
        let saver = ImageSaver::new("unused");
        let name = |url: &str| saver.file_name(&ResourceTask::new(url), 7, "jpg").unwrap();
        assert_eq!(name("https://a.com/x.PNG"), "000007.png");
        assert_eq!(name("https://a.com/x.webp"), "000007.jpg");
        assert_eq!(name("https://a.com/x"), "000007.jpg");
    }

    #[test]
    fn persist_respects_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = ResourceTask::new("https://a.com/x.png");
        task.filename = Some("000001.png".into());

        let saver = ImageSaver::new(dir.path().join("out"));
        saver
            .persist(&task, &Response::new("", 200).with_body("first"))
            .unwrap();
        saver
            .persist(&task, &Response::new("", 200).with_body("second"))
            .unwrap();
        let path = dir.path().join("out/000001.png");
        assert_eq!(fs::read(&path).unwrap(), b"first");

        let saver = saver.with_overwrite(true);
        saver
            .persist(&task, &Response::new("", 200).with_body("third"))
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"third");
    }
}
