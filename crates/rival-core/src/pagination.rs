//! Tamper-evident cursor pagination over ordered result sets.
//!
//! A cursor is compact JSON, URL-safe base64 encoded, carrying the page to
//! serve next plus the query shape it belongs to. Its checksum is an
//! HMAC-SHA256 over every other field keyed with a process secret, so a client
//! can round-trip a cursor but not forge or edit one.
//!
//! Invalid cursors never produce an error for the caller: [`PaginationManager::paginate`]
//! logs the reason and serves the first page.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::clock::{SharedClock, system_clock};
use crate::error::CursorError;

/// Longest cursor string accepted before decoding.
const MAX_CURSOR_LEN: usize = 4096;

/// Clock skew tolerated for cursors stamped slightly in the future.
const FUTURE_SKEW_SECS: i64 = 60;

pub const DEFAULT_SORT_ORDER: &str = "default";

/// Decoded cursor contents. Only [`PaginationManager`] can produce a valid one.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cursor {
    /// 0-based index of the page this cursor resumes at.
    pub page: u64,
    pub limit: u32,
    pub filter_signature: String,
    pub sort_order: String,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    pub checksum: String,
}

/// One page of results, in the wire format collaborators expect.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(rename = "nextCursor")]
    pub next_cursor: Option<String>,
    pub total_count: usize,
    pub has_more: bool,
}

/// Shape of a pagination request.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    /// Identifies the filter set the items were produced with; see [`signature`].
    pub filter_signature: String,
    pub sort_order: String,
}

impl PageQuery {
    pub fn new(limit: Option<usize>, cursor: Option<String>) -> Self {
        Self {
            limit,
            cursor,
            filter_signature: String::new(),
            sort_order: DEFAULT_SORT_ORDER.to_string(),
        }
    }

    pub fn with_filter_signature(mut self, signature: impl Into<String>) -> Self {
        self.filter_signature = signature.into();
        self
    }

    pub fn with_sort_order(mut self, sort_order: impl Into<String>) -> Self {
        self.sort_order = sort_order.into();
        self
    }
}

/// What a cursor says about itself, for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CursorInfo {
    pub valid: bool,
    pub page: Option<u64>,
    pub limit: Option<u32>,
    pub filter_signature: Option<String>,
    pub sort_order: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaginationConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    /// How long a cursor stays valid after it is issued.
    pub validity: Duration,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
            validity: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct PaginationManager {
    secret: std::sync::Arc<[u8]>,
    config: PaginationConfig,
    clock: SharedClock,
}

impl std::fmt::Debug for PaginationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PaginationManager {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().into(),
            config: PaginationConfig::default(),
            clock: system_clock(),
        }
    }

    pub fn with_config(mut self, config: PaginationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Applies the default and the `[1, max_limit]` bounds.
    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1))
    }

    /// Issues a signed cursor stamped with the current time.
    pub fn issue(&self, page: u64, limit: u32, filter_signature: &str, sort_order: &str) -> Cursor {
        let now = self.clock.utc();
        let created_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let mut cursor = Cursor {
            page,
            limit,
            filter_signature: filter_signature.to_string(),
            sort_order: sort_order.to_string(),
            created_at,
            checksum: String::new(),
        };
        cursor.checksum = self.checksum(&cursor);
        cursor
    }

    pub fn encode(&self, cursor: &Cursor) -> String {
        // Serializing plain strings and integers cannot fail.
        let json = serde_json::to_vec(cursor).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes and fully validates a cursor string.
    pub fn decode(&self, raw: &str) -> Result<Cursor, CursorError> {
        let cursor = self.parse(raw)?;
        self.verify(&cursor)?;
        Ok(cursor)
    }

    fn parse(&self, raw: &str) -> Result<Cursor, CursorError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_CURSOR_LEN {
            return Err(CursorError::Malformed(format!(
                "length {} outside 1..={MAX_CURSOR_LEN}",
                raw.len()
            )));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| CursorError::Encoding)?;
        serde_json::from_slice(&bytes).map_err(|e| CursorError::Malformed(e.to_string()))
    }

    fn verify(&self, cursor: &Cursor) -> Result<(), CursorError> {
        let expected = self.checksum(cursor);
        if !bool::from(expected.as_bytes().ct_eq(cursor.checksum.as_bytes())) {
            return Err(CursorError::ChecksumMismatch);
        }

        let age_secs = (self.clock.utc() - cursor.created_at).num_seconds();
        if age_secs < -FUTURE_SKEW_SECS {
            return Err(CursorError::FromTheFuture);
        }
        if age_secs > self.config.validity.as_secs() as i64 {
            return Err(CursorError::Expired { age_secs });
        }
        if cursor.limit == 0 {
            return Err(CursorError::Malformed("limit is zero".to_string()));
        }
        Ok(())
    }

    fn checksum(&self, cursor: &Cursor) -> String {
        let page = cursor.page.to_string();
        let limit = cursor.limit.to_string();
        let timestamp = cursor.created_at.timestamp().to_string();
        let mut message = Vec::with_capacity(64 + cursor.filter_signature.len());
        for field in [
            page.as_bytes(),
            limit.as_bytes(),
            cursor.filter_signature.as_bytes(),
            cursor.sort_order.as_bytes(),
            timestamp.as_bytes(),
        ] {
            message.extend_from_slice(&(field.len() as u32).to_be_bytes());
            message.extend_from_slice(field);
        }
        let digest = hmac_sha256(&self.secret, &message);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Paginates with no filter signature and the default sort order.
    pub fn paginate<T: Clone>(&self, items: &[T], limit: Option<usize>, cursor: Option<&str>) -> Page<T> {
        self.paginate_with(items, &PageQuery::new(limit, cursor.map(str::to_string)))
    }

    /// Serves the page a valid cursor points at, or the first page otherwise.
    ///
    /// A valid cursor's own limit wins over `query.limit` so pages never overlap.
    pub fn paginate_with<T: Clone>(&self, items: &[T], query: &PageQuery) -> Page<T> {
        let resumed = query.cursor.as_deref().and_then(|raw| {
            match self.decode(raw).and_then(|c| {
                if c.filter_signature != query.filter_signature || c.sort_order != query.sort_order {
                    Err(CursorError::FilterMismatch)
                } else {
                    Ok(c)
                }
            }) {
                Ok(c) => Some(c),
                Err(err) => {
                    tracing::warn!(
                        field = err.field(),
                        error = %err,
                        "Invalid cursor, restarting at first page"
                    );
                    None
                }
            }
        });

        let (page, limit) = match &resumed {
            Some(c) => (c.page, self.clamp_limit(Some(c.limit as usize))),
            None => (0, self.clamp_limit(query.limit)),
        };

        let total_count = items.len();
        let start = usize::try_from(page)
            .ok()
            .and_then(|p| p.checked_mul(limit))
            .unwrap_or(usize::MAX)
            .min(total_count);
        let end = start.saturating_add(limit).min(total_count);
        let has_more = end < total_count;

        let next_cursor = has_more.then(|| {
            let next = self.issue(page + 1, limit as u32, &query.filter_signature, &query.sort_order);
            self.encode(&next)
        });

        tracing::debug!(page, limit, total_count, has_more, "Paginated");

        Page {
            items: items[start..end].to_vec(),
            next_cursor,
            total_count,
            has_more,
        }
    }

    /// Reports a cursor's fields and whether it would be honoured.
    pub fn describe(&self, raw: &str) -> CursorInfo {
        let validity = chrono::Duration::from_std(self.config.validity).unwrap_or(chrono::Duration::MAX);
        match self.parse(raw) {
            Ok(cursor) => {
                let error = self.verify(&cursor).err().map(|e| e.to_string());
                CursorInfo {
                    valid: error.is_none(),
                    page: Some(cursor.page),
                    limit: Some(cursor.limit),
                    expires_at: cursor.created_at.checked_add_signed(validity),
                    filter_signature: Some(cursor.filter_signature),
                    sort_order: Some(cursor.sort_order),
                    created_at: Some(cursor.created_at),
                    error,
                }
            }
            Err(e) => CursorInfo {
                valid: false,
                page: None,
                limit: None,
                filter_signature: None,
                sort_order: None,
                created_at: None,
                expires_at: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Short stable signature of a filter set, for [`PageQuery::filter_signature`].
///
/// `serde_json` maps are ordered by key, so equal filter sets sign equally.
pub fn signature(filters: &serde_json::Value) -> String {
    let mut hex = crate::models::compute_hash(&filters.to_string());
    hex.truncate(16);
    hex
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 (RFC 2104) over the sha2 primitive.
// ---------------------------------------------------------------------------

const BLOCK_SIZE: usize = 64;

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5cu8; BLOCK_SIZE];
    for ((i, o), k) in ipad.iter_mut().zip(opad.iter_mut()).zip(block) {
        *i ^= k;
        *o ^= k;
    }

    let inner = Sha256::new().chain_update(ipad).chain_update(message).finalize();
    Sha256::new()
        .chain_update(opad)
        .chain_update(inner)
        .finalize()
        .into()
}
