//! The stored shape of a cached response.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::StatusCode;

use super::error::StoreError;

pub(crate) const FIELD_CONTENT: &str = "content";
pub(crate) const FIELD_CONTENT_TYPE: &str = "contentType";
pub(crate) const FIELD_STATUS_CODE: &str = "statusCode";
pub(crate) const FIELD_SAVED_AT: &str = "savedAt";

/// A captured response as persisted under its [`CacheKey`](super::CacheKey).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// The full body, chunks concatenated in write order.
    pub content: Bytes,
    /// The `Content-Type` the handler set; empty when it set none.
    pub content_type: String,
    pub status: StatusCode,
    /// When the response was produced; replayed as `Last-Modified`.
    pub saved_at: DateTime<Utc>,
}

/// A record read back from the store together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub record: CacheRecord,
    /// Time until the store expires the record, `None` if it reports no expiry.
    pub remaining: Option<Duration>,
}

impl CacheRecord {
    /// Flattens the record into `(field, value)` pairs for a hash-shaped store.
    ///
    /// `savedAt` is unix milliseconds and `statusCode` the decimal code, both as
    /// text; `content` is the raw body.
    pub(crate) fn to_fields(&self) -> [(&'static str, Vec<u8>); 4] {
        [
            (FIELD_CONTENT, self.content.to_vec()),
            (FIELD_CONTENT_TYPE, self.content_type.clone().into_bytes()),
            (
                FIELD_STATUS_CODE,
                self.status.as_u16().to_string().into_bytes(),
            ),
            (
                FIELD_SAVED_AT,
                self.saved_at.timestamp_millis().to_string().into_bytes(),
            ),
        ]
    }

    /// Rebuilds a record from a field map. An empty map means no record.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupt`] naming the first field that is missing or does not
    /// decode.
    pub(crate) fn from_fields(
        key: &str,
        mut fields: HashMap<String, Vec<u8>>,
    ) -> Result<Option<Self>, StoreError> {
        if fields.is_empty() {
            return Ok(None);
        }

        let corrupt = |field| StoreError::Corrupt {
            key: key.to_owned(),
            field,
        };

        let content = fields
            .remove(FIELD_CONTENT)
            .map(Bytes::from)
            .ok_or_else(|| corrupt(FIELD_CONTENT))?;

        let content_type = fields
            .remove(FIELD_CONTENT_TYPE)
            .and_then(|raw| String::from_utf8(raw).ok())
            .ok_or_else(|| corrupt(FIELD_CONTENT_TYPE))?;

        let status = fields
            .get(FIELD_STATUS_CODE)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|text| text.parse::<u16>().ok())
            .and_then(|code| StatusCode::try_from(code).ok())
            .ok_or_else(|| corrupt(FIELD_STATUS_CODE))?;

        let saved_at = fields
            .get(FIELD_SAVED_AT)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|text| text.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| corrupt(FIELD_SAVED_AT))?;

        Ok(Some(Self {
            content,
            content_type,
            status,
            saved_at,
        }))
    }
}
