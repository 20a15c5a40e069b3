//! Outbound HTTP: the `Transport` seam and its reqwest implementation.
//!
//! Uses async reqwest internally on a shared tokio runtime, but presents a
//! sync interface so it can be called from plain worker threads.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::error::FetchError;
use crate::proxy::Proxy;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("imgrake-http")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

/// One outbound request as handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub proxy: Option<Proxy>,
}

/// Normalized response: status, headers (lowercase names) and full body.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub url: String,
    /// Method of the request this answers.
    pub method: Method,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Network fetch capability. The rest of the crate depends only on this.
pub trait Transport: Send + Sync {
    /// Perform the request. Any status code is `Ok`; only failures to obtain
    /// a response are errors.
    fn send(&self, req: &Request) -> Result<Response, FetchError>;
}

/// reqwest-backed transport with one pooled client per proxy.
pub struct ReqwestTransport {
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, proxy: Option<&Proxy>) -> Result<reqwest::Client, FetchError> {
        let key = proxy.map(Proxy::url);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(8);
        if let Some(url) = &key {
            let proxy = reqwest::Proxy::all(url.as_str())
                .map_err(|e| FetchError::Invalid(format!("proxy {url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| FetchError::from_reqwest(&e))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, req: &Request) -> Result<Response, FetchError> {
        let client = self.client(req.proxy.as_ref())?;
        let method = match req.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
        };

        SHARED_RUNTIME.handle().block_on(async {
            let mut builder = client.request(method, &req.url).timeout(req.timeout);
            for (name, value) in &req.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let resp = builder
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))?;

            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect();
            let url = resp.url().to_string();
            let body = resp
                .bytes()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))?
                .to_vec();

            Ok(Response {
                url,
                method: req.method,
                status,
                headers,
                body,
            })
        })
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on a decompressed body.
pub const MAX_DECOMPRESSED: u64 = 32 * 1024 * 1024;

/// Decode gzip/deflate bodies the client handed back still compressed.
///
/// Returns `None` when the body is not compressed in a way we handle or
/// decoding fails; the caller keeps the original bytes then. Output beyond
/// [`MAX_DECOMPRESSED`] is also refused.
pub fn decompress(content_encoding: &str, body: &[u8]) -> Option<Vec<u8>> {
    decompress_capped(content_encoding, body, MAX_DECOMPRESSED)
}

fn decompress_capped(content_encoding: &str, body: &[u8], limit: u64) -> Option<Vec<u8>> {
    let encoding = content_encoding.trim().to_ascii_lowercase();
    let mut out = Vec::new();
    let result = if encoding == "gzip" || encoding == "x-gzip" || body.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(body).take(limit + 1).read_to_end(&mut out)
    } else if encoding == "deflate" {
        ZlibDecoder::new(body).take(limit + 1).read_to_end(&mut out)
    } else {
        if !encoding.is_empty() && encoding != "identity" {
            log::debug!("no decoder for content-encoding {encoding:?}, keeping raw body");
        }
        return None;
    };
    match result {
        Ok(n) if n as u64 > limit => {
            log::warn!("decompressed body exceeds {limit} bytes, keeping raw body");
            None
        }
        Ok(_) => Some(out),
        Err(e) => {
            log::debug!("decompression ({encoding}) failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = Response::new("http://a", 200).with_header("Content-Type", "image/png");
        assert_eq!(resp.header("content-type"), Some("image/png"));
        assert_eq!(resp.header("CONTENT-TYPE"), Some("image/png"));
        assert_eq!(resp.content_type(), "image/png");
        assert_eq!(resp.header("x-missing"), None);
    }

    #[test]
    fn success_range() {
        assert!(Response::new("u", 200).is_success());
        assert!(Response::new("u", 204).is_success());
        assert!(!Response::new("u", 301).is_success());
        assert!(!Response::new("u", 404).is_success());
    }

    #[test]
    fn decompress_gzip_by_header() {
        let body = gzip(b"<html>hello</html>");
        assert_eq!(decompress("gzip", &body).unwrap(), b"<html>hello</html>");
    }

    #[test]
    fn decompress_gzip_by_magic() {
        let body = gzip(b"sniffed");
        assert_eq!(decompress("", &body).unwrap(), b"sniffed");
    }

    #[test]
    fn decompress_deflate() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"deflated").unwrap();
        let body = enc.finish().unwrap();
        assert_eq!(decompress("deflate", &body).unwrap(), b"deflated");
    }

    #[test]
    fn decompress_plain_is_none() {
        assert!(decompress("", b"plain text").is_none());
        assert!(decompress("identity", b"plain text").is_none());
        assert!(decompress("br", b"\x1b\x92\r\n").is_none());
    }

    #[test]
    fn decompress_corrupt_is_none() {
        assert!(decompress("gzip", b"\x1f\x8bnot really gzip").is_none());
    }

    #[test]
    fn decompress_refuses_oversized_output() {
        let body = gzip(&vec![b'a'; 4096]);
        assert!(decompress_capped("gzip", &body, 1024).is_none());
        assert_eq!(decompress_capped("gzip", &body, 4096).unwrap().len(), 4096);
    }
}
