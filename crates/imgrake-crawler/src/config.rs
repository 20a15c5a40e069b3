//! Run configuration for one crawl

use std::time::Duration;

use imgrake_core::{ConfigError, Proxy, SessionOptions};

use crate::downloader::DownloaderOptions;
use crate::image::Size;
use crate::parser::ParserOptions;

/// Everything a [`Crawler`](crate::Crawler) needs besides its strategies.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub feeder_threads: usize,
    pub parser_threads: usize,
    pub downloader_threads: usize,
    /// Accepted-resource bound; 0 means unbounded.
    pub max_num: usize,
    /// Output index of the first accepted resource minus one.
    pub file_idx_offset: usize,
    pub timeout: Duration,
    /// Attempts per page or resource.
    pub max_retry: u32,
    pub max_idle_time: Option<Duration>,
    pub queue_timeout: Duration,
    /// How often the orchestrator checks stage liveness.
    pub poll_interval: Duration,
    pub min_size: Option<Size>,
    pub max_size: Option<Size>,
    pub default_ext: String,
    pub session: SessionOptions,
    pub proxies: Vec<Proxy>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            feeder_threads: 1,
            parser_threads: 1,
            downloader_threads: 1,
            max_num: 1000,
            file_idx_offset: 0,
            timeout: Duration::from_secs(5),
            max_retry: 3,
            max_idle_time: None,
            queue_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            min_size: None,
            max_size: None,
            default_ext: "jpg".to_string(),
            session: SessionOptions::default(),
            proxies: Vec::new(),
        }
    }
}

impl CrawlConfig {
    /// Reject configurations that could never run, before any thread starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeder_threads == 0 {
            return Err(ConfigError::ZeroThreads("feeder"));
        }
        if self.parser_threads == 0 {
            return Err(ConfigError::ZeroThreads("parser"));
        }
        if self.downloader_threads == 0 {
            return Err(ConfigError::ZeroThreads("downloader"));
        }
        if self.max_retry == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_retry must be at least 1".into(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min.0.max(min.1) > max.0.max(max.1) || min.0.min(min.1) > max.0.min(max.1) {
                return Err(ConfigError::InvalidSizeBounds);
            }
        }
        for proxy in &self.proxies {
            Proxy::parse(&proxy.to_string())?;
        }
        self.session.validate()
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            queue_timeout: self.queue_timeout,
            timeout: self.timeout,
            max_retry: self.max_retry,
        }
    }

    pub fn downloader_options(&self) -> DownloaderOptions {
        DownloaderOptions {
            max_num: self.max_num,
            file_idx_offset: self.file_idx_offset,
            default_ext: self.default_ext.clone(),
            queue_timeout: self.queue_timeout,
            timeout: self.timeout,
            max_retry: self.max_retry,
            max_idle_time: self.max_idle_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(CrawlConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_threads_rejected() {
        let config = CrawlConfig {
            parser_threads: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroThreads("parser")));
    }

    #[test]
    fn inverted_size_bounds_rejected() {
        let config = CrawlConfig {
            min_size: Some((500, 500)),
            max_size: Some((400, 1000)),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSizeBounds));
    }

    #[test]
    fn bad_header_rejected() {
        let mut config = CrawlConfig::default();
        config
            .session
            .headers
            .push(("Bad Header".into(), "x".into()));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn bad_proxy_rejected() {
        let config = CrawlConfig {
            proxies: vec![Proxy::new("ftp", "127.0.0.1:8080")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProxy(_))
        ));
    }

    #[test]
    fn options_follow_config() {
        let config = CrawlConfig {
            max_num: 7,
            file_idx_offset: 100,
            max_idle_time: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let d = config.downloader_options();
        assert_eq!((d.max_num, d.file_idx_offset), (7, 100));
        assert_eq!(d.max_idle_time, Some(Duration::from_secs(2)));
        assert_eq!(config.parser_options().max_retry, 3);
    }
}
