use crate::key::url_to_key;
use bytes::Bytes;
use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// When a cached page stops being fresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiration {
    /// Absolute deadline, milliseconds since the Unix epoch.
    At(i64),
    /// No local deadline. The remote store holds the authoritative value.
    Remote,
}

impl Expiration {
    /// Deadline `offset_ms` from `now_ms`.
    pub fn after(now_ms: i64, offset_ms: u64) -> Self {
        let offset = i64::try_from(offset_ms).unwrap_or(i64::MAX);
        Expiration::At(now_ms.saturating_add(offset))
    }

    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Expiration::At(ms) => Some(*ms),
            Expiration::Remote => None,
        }
    }
}

/// One cached rendering of one URL.
///
/// `content` is the gzip-compressed markup. The key is always derived from
/// the URL, so the two can never disagree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    key: String,
    url: String,
    pub expiration: Expiration,
    pub content: Bytes,
}

impl Page {
    pub fn new(url: impl Into<String>, expiration: Expiration, content: Bytes) -> Self {
        let url = url.into();
        Self {
            key: url_to_key(&url),
            url,
            expiration,
            content,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the local deadline has passed. Pages deferring to the remote
    /// store never expire locally.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.expiration {
            Expiration::At(deadline) => now_ms >= deadline,
            Expiration::Remote => false,
        }
    }
}
