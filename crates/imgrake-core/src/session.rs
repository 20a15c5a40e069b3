//! Request session shared by all stages of a run.
//!
//! Every call goes through, in order: a randomized pacing delay, Referer
//! injection from the previous request, occasional user-agent rotation, proxy
//! selection with weight feedback, bounded retry, and best-effort body
//! decompression for non-image payloads.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderName, HeaderValue};

use crate::error::{ConfigError, FetchError};
use crate::http::{self, Method, Request, Response, Transport};
use crate::proxy::ProxyPool;
use crate::retry::RetryPolicy;

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

/// Browser-like headers sent with every request unless overridden.
pub fn default_headers() -> Vec<(String, String)> {
    [
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Accept-Encoding", "gzip, deflate"),
        ("DNT", "1"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
        ("Sec-Fetch-User", "?1"),
        ("Cache-Control", "max-age=0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Extra headers; override defaults with the same name.
    pub headers: Vec<(String, String)>,
    pub pace_min: Duration,
    pub pace_max: Duration,
    /// Chance per request of switching to another user agent.
    pub ua_rotation: f64,
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            pace_min: Duration::from_secs(1),
            pace_max: Duration::from_secs(5),
            ua_rotation: 0.2,
            retry: RetryPolicy::once(),
        }
    }
}

impl SessionOptions {
    /// No pacing delay at all.
    pub fn unpaced() -> Self {
        Self {
            pace_min: Duration::ZERO,
            pace_max: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in &self.headers {
            validate_header(name, value)?;
        }
        if self.pace_min > self.pace_max {
            return Err(ConfigError::InvalidPacing);
        }
        self.retry.validate()
    }
}

pub fn validate_header(name: &str, value: &str) -> Result<(), ConfigError> {
    HeaderName::from_str(name).map_err(|e| ConfigError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

pub struct Session {
    transport: Arc<dyn Transport>,
    proxy_pool: Option<Arc<ProxyPool>>,
    options: SessionOptions,
    user_agent: Mutex<&'static str>,
    last_url: Mutex<Option<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("proxy_pool", &self.proxy_pool)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        proxy_pool: Option<Arc<ProxyPool>>,
        options: SessionOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let ua = *USER_AGENTS
            .choose(&mut rand::thread_rng())
            .unwrap_or(&USER_AGENTS[0]);
        Ok(Self {
            transport,
            proxy_pool,
            options,
            user_agent: Mutex::new(ua),
            last_url: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn get(&self, url: &str, timeout: Duration) -> Result<Response, FetchError> {
        self.request(Method::Get, url, timeout, &[])
    }

    pub fn head(&self, url: &str, timeout: Duration) -> Result<Response, FetchError> {
        self.request(Method::Head, url, timeout, &[])
    }

    /// Target of the most recent successful request.
    pub fn last_url(&self) -> Option<String> {
        lock(&self.last_url).clone()
    }

    pub fn request(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
        headers: &[(String, String)],
    ) -> Result<Response, FetchError> {
        self.options
            .retry
            .run(url, |_| self.attempt(method, url, timeout, headers))
    }

    fn attempt(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
        extra: &[(String, String)],
    ) -> Result<Response, FetchError> {
        self.pace();

        let scheme = url::Url::parse(url)
            .map_err(|e| FetchError::Invalid(format!("{url}: {e}")))?
            .scheme()
            .to_string();

        let headers = self.build_headers(extra);
        let proxy = self.proxy_pool.as_ref().and_then(|p| p.get_next(&scheme));
        let req = Request {
            method,
            url: url.to_string(),
            headers,
            timeout,
            proxy: proxy.clone(),
        };
        log::debug!("{} {url}", method.as_str());

        let mut resp = match (&proxy, &self.proxy_pool) {
            (Some(proxy), Some(pool)) => {
                log::debug!("using proxy {proxy}");
                match self.transport.send(&req) {
                    Ok(resp) if resp.is_success() => {
                        pool.increase_weight(proxy);
                        resp
                    }
                    Ok(resp) => {
                        pool.decrease_weight(proxy);
                        return Err(FetchError::Status {
                            status: resp.status,
                            url: url.to_string(),
                        });
                    }
                    Err(e) => {
                        pool.decrease_weight(proxy);
                        return Err(e);
                    }
                }
            }
            _ => self.transport.send(&req)?,
        };

        if !resp.content_type().contains("image") {
            let encoding = resp.header("content-encoding").unwrap_or("").to_string();
            if let Some(decoded) = http::decompress(&encoding, &resp.body) {
                log::debug!("decompressed body of {url} ({} -> {} bytes)", resp.body.len(), decoded.len());
                resp.body = decoded;
            }
        }

        resp.method = method;
        *lock(&self.last_url) = Some(url.to_string());
        Ok(resp)
    }

    fn pace(&self) {
        let (min, max) = (self.options.pace_min, self.options.pace_max);
        if max.is_zero() {
            return;
        }
        let wait = if min == max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        std::thread::sleep(wait);
    }

    fn build_headers(&self, extra: &[(String, String)]) -> Vec<(String, String)> {
        let mut headers = default_headers();
        for (name, value) in self.options.headers.iter().chain(extra) {
            set_header(&mut headers, name, value);
        }

        if !has_header(&headers, "referer") {
            if let Some(prev) = lock(&self.last_url).as_deref() {
                headers.push(("Referer".to_string(), prev.to_string()));
            }
        }

        if !has_header(&headers, "user-agent") {
            let mut ua = lock(&self.user_agent);
            let mut rng = rand::thread_rng();
            if rng.gen_bool(self.options.ua_rotation.clamp(0.0, 1.0)) {
                if let Some(next) = USER_AGENTS.choose(&mut rng) {
                    *ua = *next;
                }
            }
            headers.push(("User-Agent".to_string(), ua.to_string()));
        }
        headers
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
