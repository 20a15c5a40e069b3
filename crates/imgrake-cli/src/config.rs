//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use imgrake_core::{Proxy, SessionOptions};
use imgrake_crawler::CrawlConfig;

/// Global configuration for imgrake
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub threads: ThreadsConfig,
    pub crawl: CrawlSettings,
    pub session: SessionConfig,
    /// `protocol=addr` or bare proxy addresses; `${VAR}` is expanded.
    #[serde(deserialize_with = "deserialize_env_vars")]
    pub proxies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from("./images"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ThreadsConfig {
    pub feeder: usize,
    pub parser: usize,
    pub downloader: usize,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            feeder: 1,
            parser: 1,
            downloader: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub max_num: usize,
    /// Seconds
    pub timeout: u64,
    pub max_retry: u32,
    /// Seconds without an accepted resource before downloaders give up
    pub max_idle: Option<u64>,
    pub default_ext: String,
    /// Added to the accepted count to number saved files
    pub file_idx_offset: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_num: 1000,
            timeout: 5,
            max_retry: 3,
            max_idle: None,
            default_ext: "jpg".to_string(),
            file_idx_offset: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pace_min_ms: u64,
    pub pace_max_ms: u64,
    pub ua_rotation: f64,
    pub headers: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = SessionOptions::default();
        Self {
            pace_min_ms: defaults.pace_min.as_millis() as u64,
            pace_max_ms: defaults.pace_max.as_millis() as u64,
            ua_rotation: defaults.ua_rotation,
            headers: BTreeMap::new(),
        }
    }
}

/// Proxy entries with `${VAR}` references expanded; entries naming an unset
/// variable are dropped.
fn deserialize_env_vars<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(deserializer)?;
    Ok(raw.iter().filter_map(|s| expand_env_vars(s)).collect())
}

/// Replace every `${VAR}` in `s`. `None` if any variable is unset.
fn expand_env_vars(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(&std::env::var(&rest[start + 2..start + 2 + len]).ok()?);
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Some(out)
}

impl Config {
    /// Config files tried by [`Config::load`], first hit wins.
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("imgrake.toml")];
        if let Some(dirs) = directories::ProjectDirs::from("", "", "imgrake") {
            paths.push(dirs.config_dir().join("config.toml"));
        }
        paths
    }

    /// Load `./imgrake.toml`, else the user config file, else defaults.
    pub fn load() -> Result<Self> {
        match Self::search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::from_file(&path),
            None => {
                log::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Crawl configuration before command-line overrides.
    pub fn crawl_config(&self) -> Result<CrawlConfig> {
        let proxies = self
            .proxies
            .iter()
            .map(|p| Proxy::parse(p).with_context(|| format!("Invalid proxy in config: {p}")))
            .collect::<Result<Vec<_>>>()?;

        let session = SessionOptions {
            headers: self
                .session
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            pace_min: Duration::from_millis(self.session.pace_min_ms),
            pace_max: Duration::from_millis(self.session.pace_max_ms),
            ua_rotation: self.session.ua_rotation,
            ..SessionOptions::default()
        };

        Ok(CrawlConfig {
            feeder_threads: self.threads.feeder,
            parser_threads: self.threads.parser,
            downloader_threads: self.threads.downloader,
            max_num: self.crawl.max_num,
            timeout: Duration::from_secs(self.crawl.timeout),
            max_retry: self.crawl.max_retry,
            max_idle_time: self.crawl.max_idle.map(Duration::from_secs),
            default_ext: self.crawl.default_ext.clone(),
            file_idx_offset: self.crawl.file_idx_offset,
            session,
            proxies,
            ..CrawlConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.default_dir, PathBuf::from("./images"));
        assert_eq!(config.crawl.max_num, 1000);
        assert!(config.proxies.is_empty());
        config.crawl_config().unwrap().validate().unwrap();
    }

    #[test]
    fn env_vars_are_expanded_in_place() {
        std::env::set_var("IMGRAKE_TEST_PROXY_HOST", "10.0.0.1");
        assert_eq!(
            expand_env_vars("http=${IMGRAKE_TEST_PROXY_HOST}:3128"),
            Some("http=10.0.0.1:3128".to_string())
        );
        std::env::remove_var("IMGRAKE_TEST_PROXY_HOST");
    }

    #[test]
    fn literal_and_unterminated_pass_through() {
        assert_eq!(expand_env_vars("10.0.0.2:80"), Some("10.0.0.2:80".to_string()));
        assert_eq!(expand_env_vars("a${b"), Some("a${b".to_string()));
    }

    #[test]
    fn unset_var_drops_entry() {
        assert_eq!(expand_env_vars("${NONEXISTENT_VAR_12345}:80"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
proxies = ["https=127.0.0.1:8080", "socks5://127.0.0.1:1080"]

[threads]
downloader = 8

[crawl]
max_num = 50
max_idle = 30
file_idx_offset = 200

[session]
pace_min_ms = 0
pace_max_ms = 0

[session.headers]
Accept-Language = "de-DE"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.threads.downloader, 8);
        assert_eq!(config.threads.parser, 1);

        let crawl = config.crawl_config().unwrap();
        assert_eq!(crawl.max_num, 50);
        assert_eq!(crawl.max_idle_time, Some(Duration::from_secs(30)));
        assert_eq!(crawl.file_idx_offset, 200);
        assert_eq!(crawl.session.pace_max, Duration::ZERO);
        assert_eq!(
            crawl.session.headers,
            vec![("Accept-Language".to_string(), "de-DE".to_string())]
        );
        assert_eq!(crawl.proxies.len(), 2);
        assert_eq!(crawl.proxies[0].protocol, "https");
        assert_eq!(crawl.proxies[1].protocol, "all");
        crawl.validate().unwrap();
    }

    #[test]
    fn bad_proxy_is_reported() {
        let config = Config {
            proxies: vec!["gopher=1.2.3.4:70".into()],
            ..Default::default()
        };
        assert!(config.crawl_config().is_err());
    }
}
