//! Weighted proxy registry with success/failure feedback
//!
//! Weight law (reputation in `[min_weight, 1.0]`):
//! - success: `w += alpha * (1 - w)`
//! - failure: `w = max(min_weight, w * (1 - beta))`
//!
//! Selection is weighted random among proxies serving the request scheme.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::error::ConfigError;

/// Outbound proxy: scheme it serves plus the proxy's own address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    /// Scheme of target URLs this proxy is used for (`http` or `https`).
    pub protocol: String,
    /// Proxy address, `host:port` or a full `scheme://host:port` URL.
    pub addr: String,
}

impl Proxy {
    pub fn new(protocol: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            addr: addr.into(),
        }
    }

    /// Parse `protocol=addr` or a bare address (serves both http and https
    /// when given as `scheme://host:port` with an `all` protocol).
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (protocol, addr) = match spec.split_once('=') {
            Some((p, a)) => (p.trim().to_ascii_lowercase(), a.trim()),
            None => ("all".to_string(), spec.trim()),
        };
        if addr.is_empty() || !matches!(protocol.as_str(), "http" | "https" | "all") {
            return Err(ConfigError::InvalidProxy(spec.to_string()));
        }
        let proxy = Self::new(protocol, addr);
        url::Url::parse(&proxy.url()).map_err(|_| ConfigError::InvalidProxy(spec.to_string()))?;
        Ok(proxy)
    }

    /// Proxy URL as understood by the HTTP client.
    pub fn url(&self) -> String {
        if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("http://{}", self.addr)
        }
    }

    fn serves(&self, protocol: &str) -> bool {
        self.protocol == "all" || self.protocol.eq_ignore_ascii_case(protocol)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.protocol, self.addr)
    }
}

/// Tuning for the weight law.
#[derive(Debug, Clone, Copy)]
pub struct WeightLaw {
    pub initial: f64,
    pub min_weight: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for WeightLaw {
    fn default() -> Self {
        Self {
            initial: 1.0,
            min_weight: 0.05,
            alpha: 0.1,
            beta: 0.5,
        }
    }
}

impl WeightLaw {
    fn raise(&self, w: f64) -> f64 {
        (w + self.alpha * (1.0 - w)).min(1.0)
    }

    fn lower(&self, w: f64) -> f64 {
        (w * (1.0 - self.beta)).max(self.min_weight)
    }
}

struct Entry {
    proxy: Proxy,
    weight: f64,
}

/// Proxy registry shared by every session of a run.
pub struct ProxyPool {
    entries: Mutex<Vec<Entry>>,
    law: WeightLaw,
}

impl fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPool")
            .field("len", &self.len())
            .field("law", &self.law)
            .finish()
    }
}

impl ProxyPool {
    pub fn new(proxies: impl IntoIterator<Item = Proxy>) -> Self {
        Self::with_law(proxies, WeightLaw::default())
    }

    pub fn with_law(proxies: impl IntoIterator<Item = Proxy>, law: WeightLaw) -> Self {
        let entries = proxies
            .into_iter()
            .map(|proxy| Entry {
                proxy,
                weight: law.initial,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            law,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn add(&self, proxy: Proxy) {
        let mut entries = self.lock();
        if entries.iter().any(|e| e.proxy == proxy) {
            return;
        }
        entries.push(Entry {
            proxy,
            weight: self.law.initial,
        });
    }

    /// Pick a proxy for `protocol`, biased towards higher weight.
    ///
    /// `None` when the pool is empty or nothing serves the protocol; the
    /// caller then goes direct.
    pub fn get_next(&self, protocol: &str) -> Option<Proxy> {
        self.get_next_with(protocol, &mut rand::thread_rng())
    }

    pub fn get_next_with(&self, protocol: &str, rng: &mut impl Rng) -> Option<Proxy> {
        let entries = self.lock();
        let candidates: Vec<&Entry> = entries.iter().filter(|e| e.proxy.serves(protocol)).collect();
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0].proxy.clone()),
            _ => {
                let dist = WeightedIndex::new(candidates.iter().map(|e| e.weight)).ok()?;
                Some(candidates[dist.sample(rng)].proxy.clone())
            }
        }
    }

    pub fn increase_weight(&self, proxy: &Proxy) {
        self.adjust(proxy, |law, w| law.raise(w));
    }

    pub fn decrease_weight(&self, proxy: &Proxy) {
        self.adjust(proxy, |law, w| law.lower(w));
    }

    fn adjust(&self, proxy: &Proxy, f: impl Fn(&WeightLaw, f64) -> f64) {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|e| &e.proxy == proxy) {
            let before = entry.weight;
            entry.weight = f(&self.law, before);
            log::debug!("proxy {proxy}: weight {before:.3} -> {:.3}", entry.weight);
        }
    }

    pub fn weight(&self, proxy: &Proxy) -> Option<f64> {
        self.lock()
            .iter()
            .find(|e| &e.proxy == proxy)
            .map(|e| e.weight)
    }

    /// Selection probability of `proxy` among proxies serving `protocol`.
    pub fn probability(&self, proxy: &Proxy, protocol: &str) -> f64 {
        let entries = self.lock();
        let total: f64 = entries
            .iter()
            .filter(|e| e.proxy.serves(protocol))
            .map(|e| e.weight)
            .sum();
        entries
            .iter()
            .find(|e| &e.proxy == proxy && e.proxy.serves(protocol))
            .map_or(0.0, |e| e.weight / total)
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (ProxyPool, Proxy, Proxy, Proxy) {
        let a = Proxy::new("http", "10.0.0.1:8080");
        let b = Proxy::new("http", "10.0.0.2:8080");
        let c = Proxy::new("https", "10.0.0.3:8443");
        (ProxyPool::new([a.clone(), b.clone(), c.clone()]), a, b, c)
    }

    #[test]
    fn empty_pool_returns_none() {
        assert!(ProxyPool::empty().get_next("http").is_none());
    }

    #[test]
    fn filters_by_protocol() {
        let (pool, _, _, c) = pool();
        for _ in 0..20 {
            assert_eq!(pool.get_next("https"), Some(c.clone()));
            assert_ne!(pool.get_next("http"), Some(c.clone()));
        }
        assert!(pool.get_next("ftp").is_none());
    }

    #[test]
    fn all_protocol_serves_both() {
        let any = Proxy::new("all", "socks5://127.0.0.1:1080");
        let pool = ProxyPool::new([any.clone()]);
        assert_eq!(pool.get_next("http"), Some(any.clone()));
        assert_eq!(pool.get_next("https"), Some(any));
    }

    #[test]
    fn success_never_lowers_probability() {
        let (pool, a, _, _) = pool();
        pool.decrease_weight(&a);
        let before = pool.probability(&a, "http");
        pool.increase_weight(&a);
        assert!(pool.probability(&a, "http") >= before);
    }

    #[test]
    fn failure_never_raises_probability() {
        let (pool, a, _, _) = pool();
        let before = pool.probability(&a, "http");
        pool.decrease_weight(&a);
        assert!(pool.probability(&a, "http") <= before);
    }

    #[test]
    fn weight_bounded() {
        let (pool, a, b, _) = pool();
        for _ in 0..100 {
            pool.increase_weight(&a);
            pool.decrease_weight(&b);
        }
        assert!(pool.weight(&a).unwrap() <= 1.0);
        assert!((pool.weight(&b).unwrap() - WeightLaw::default().min_weight).abs() < 1e-9);
    }

    #[test]
    fn selection_biased_towards_reputation() {
        let (pool, a, b, _) = pool();
        for _ in 0..10 {
            pool.decrease_weight(&b);
        }
        let mut rng = rand::thread_rng();
        let picks_a = (0..2000)
            .filter(|_| pool.get_next_with("http", &mut rng) == Some(a.clone()))
            .count();
        assert!(picks_a > 1500, "a picked {picks_a}/2000 times");
    }

    #[test]
    fn parse_specs() {
        let p = Proxy::parse("https=127.0.0.1:3128").unwrap();
        assert_eq!(p.protocol, "https");
        assert_eq!(p.url(), "http://127.0.0.1:3128");

        let p = Proxy::parse("socks5://user:pw@host:1080").unwrap();
        assert_eq!(p.protocol, "all");
        assert_eq!(p.url(), "socks5://user:pw@host:1080");

        assert!(Proxy::parse("ftp=1.2.3.4:21").is_err());
        assert!(Proxy::parse("http=").is_err());
    }

    #[test]
    fn add_skips_duplicates() {
        let (pool, a, _, _) = pool();
        pool.add(a);
        assert_eq!(pool.len(), 3);
    }
}
