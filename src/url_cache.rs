use base64::{engine::general_purpose::STANDARD, Engine};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::debug;

pub const URL_CACHE_CAPACITY: usize = 100;
pub const URL_CACHE_EVICT_BATCH: usize = 50;
/// 15 bytes encode to exactly 20 base64 characters with no padding.
const TOKEN_SOURCE_BYTES: usize = 15;

/// Short token that stands in for a URL inside callback data.
///
/// The token is the base64 encoding of the URL's trailing bytes, which is
/// where the video id lives. Two URLs sharing the same tail share a token;
/// the later `put` wins.
pub fn url_token(url: &str) -> String {
    let bytes = url.as_bytes();
    let tail = &bytes[bytes.len().saturating_sub(TOKEN_SOURCE_BYTES)..];
    STANDARD.encode(tail)
}

#[derive(Default)]
struct Inner {
    urls: HashMap<String, String>,
    order: VecDeque<String>,
}

/// Bounded token to URL map. When it grows past capacity the oldest batch of
/// entries is dropped in one go.
#[derive(Clone)]
pub struct UrlCache {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    evict_batch: usize,
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::with_limits(URL_CACHE_CAPACITY, URL_CACHE_EVICT_BATCH)
    }
}

impl UrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(capacity: usize, evict_batch: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity,
            evict_batch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, url: &str) -> String {
        let token = url_token(url);
        let mut inner = self.lock();
        if inner.urls.insert(token.clone(), url.to_string()).is_none() {
            inner.order.push_back(token.clone());
        }
        if inner.urls.len() > self.capacity {
            let evict = self.evict_batch.min(inner.order.len());
            let evicted: Vec<String> = inner.order.drain(..evict).collect();
            for old in &evicted {
                inner.urls.remove(old);
            }
            debug!(event = "url_cache_evicted", evicted = evict, remaining = inner.urls.len());
        }
        token
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.lock().urls.get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_url(i: usize) -> String {
        format!("https://www.youtube.com/watch?v=vid{i:08}")
    }

    #[test]
    fn get_returns_what_put_stored() {
        let cache = UrlCache::new();
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        let token = cache.put(url);
        assert_eq!(cache.get(&token).as_deref(), Some(url));
    }

    #[test]
    fn token_is_short_and_deterministic() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        let token = url_token(url);
        assert_eq!(token.len(), 20);
        assert_eq!(token, url_token(url));
        assert_ne!(token, url_token("https://www.youtube.com/watch?v=aaaaaaaaaaa"));
    }

    #[test]
    fn short_urls_still_get_a_token() {
        let cache = UrlCache::new();
        let token = cache.put("youtu.be/x");
        assert_eq!(cache.get(&token).as_deref(), Some("youtu.be/x"));
    }

    #[test]
    fn unknown_token_is_absent() {
        let cache = UrlCache::new();
        assert!(cache.get("nope").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_batch() {
        let cache = UrlCache::new();
        let tokens: Vec<String> = (0..101).map(|i| cache.put(&video_url(i))).collect();
        assert_eq!(cache.len(), 51);
        for token in &tokens[..50] {
            assert!(cache.get(token).is_none());
        }
        for (i, token) in tokens.iter().enumerate().skip(50) {
            assert_eq!(cache.get(token), Some(video_url(i)));
        }
    }

    #[test]
    fn reput_keeps_original_position() {
        let cache = UrlCache::with_limits(3, 2);
        let a = cache.put(&video_url(1));
        cache.put(&video_url(2));
        cache.put(&video_url(1));
        cache.put(&video_url(3));
        cache.put(&video_url(4));
        assert!(cache.get(&a).is_none());
        assert_eq!(cache.len(), 2);
    }
}
