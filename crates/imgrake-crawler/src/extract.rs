//! Pull candidate resource locators out of a fetched page

use std::collections::HashSet;
use std::sync::LazyLock;

use imgrake_core::Response;
use regex::Regex;
use url::Url;

use crate::task::{ResourceTask, SeedTask};

/// Page-parsing capability plugged into the Parser.
pub trait Extract: Send + Sync {
    fn extract(&self, page: &Response, seed: &SeedTask) -> Vec<ResourceTask>;
}

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\s(?:data-src|src)\s*=\s*["']([^"']+)["']"#)
        .expect("invalid img regex")
});

static IMAGE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\shref\s*=\s*["']([^"']+\.(?:jpe?g|png|gif|bmp|webp|tiff?)(?:\?[^"']*)?)["']"#)
        .expect("invalid href regex")
});

/// Generic extractor: `<img src|data-src>` and links to image files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageLinkExtractor;

impl ImageLinkExtractor {
    fn links<'a>(&self, html: &'a str) -> impl Iterator<Item = &'a str> {
        IMG_SRC
            .captures_iter(html)
            .chain(IMAGE_HREF.captures_iter(html))
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
    }
}

impl Extract for ImageLinkExtractor {
    fn extract(&self, page: &Response, seed: &SeedTask) -> Vec<ResourceTask> {
        let base = if page.url.is_empty() {
            &seed.url
        } else {
            &page.url
        };
        let base = Url::parse(base).ok();
        let html = page.text();

        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        for link in self.links(&html) {
            if link.starts_with("data:") {
                continue;
            }
            let link = link.replace("&amp;", "&");
            let resolved = match &base {
                Some(base) => base.join(&link).map(|u| u.to_string()).ok(),
                None => Url::parse(&link).map(|u| u.to_string()).ok(),
            };
            let Some(url) = resolved else { continue };
            if seen.insert(url.clone()) {
                tasks.push(ResourceTask::new(url).with_source(seed.url.clone()));
            }
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Response {
        Response::new("https://site.example/gallery/index.html", 200).with_body(body)
    }

    fn urls(tasks: &[ResourceTask]) -> Vec<&str> {
        tasks.iter().map(|t| t.file_url.as_str()).collect()
    }

    #[test]
    fn finds_img_and_href_links() {
        let html = r#"
            <img class="thumb" src="/img/a.jpg" alt="a">
            <IMG data-src='b.png'>
            <a href="https://cdn.example/c.webp?w=800">full</a>
            <a href="/about">about</a>
        "#;
        let seed = SeedTask::new("https://site.example/gallery/", 0);
        let tasks = ImageLinkExtractor.extract(&page(html), &seed);
        assert_eq!(
            urls(&tasks),
            [
                "https://site.example/img/a.jpg",
                "https://site.example/gallery/b.png",
                "https://cdn.example/c.webp?w=800",
            ]
        );
        assert!(tasks.iter().all(|t| t.source.as_deref() == Some(seed.url.as_str())));
    }

    #[test]
    fn dedupes_and_skips_inline_data() {
        let html = r#"
            <img src="x.gif"><img src="./x.gif">
            <img src="data:image/png;base64,AAAA">
            <a href="x.gif">same</a>
        "#;
        let tasks = ImageLinkExtractor.extract(&page(html), &SeedTask::new("", 0));
        assert_eq!(urls(&tasks), ["https://site.example/gallery/x.gif"]);
    }

    #[test]
    fn unescapes_ampersands() {
        let html = r#"<img src="/thumb?id=1&amp;w=300">"#;
        let tasks = ImageLinkExtractor.extract(&page(html), &SeedTask::new("", 0));
        assert_eq!(urls(&tasks), ["https://site.example/thumb?id=1&w=300"]);
    }
}
