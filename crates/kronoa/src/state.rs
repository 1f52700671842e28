//! The persisted JSON documents composing the publishing state machine.
//!
//! These are deliberately plain serde structs written as whole files; the
//! engine never holds pointer state in memory across operations.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::Store;

use crate::edition::EditionId;
use crate::{layout, Error, Result};

/// Where a checkout branched from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Staging,
    Production,
}

impl Source {
    pub fn pointer_name(&self) -> &'static str {
        match self {
            Source::Staging => layout::STAGING,
            Source::Production => layout::PRODUCTION,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.pointer_name())
    }
}

impl std::error::Error for Source {}

/// `contents/.production.json` and `contents/.staging.json`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointer {
    pub edition: EditionId,
}

/// `contents/.{label}.json` — a working checkout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub edition: EditionId,
    pub base: EditionId,
    pub source: Source,
}

/// `contents/.pending/{id}.json` — a submission awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub edition: EditionId,
    pub base: EditionId,
    pub source: Source,
    pub label: String,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
}

/// `contents/.rejected/{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord {
    pub edition: EditionId,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// `contents/.lock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Read and parse a JSON document, `None` when the key is absent.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    store: &Store,
    key: &str,
) -> Result<Option<T>> {
    let data = match store.read(key).await {
        Ok(data) => data,
        Err(err) if err.is_not_found() => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let parsed = serde_json::from_slice(&data).map_err(|err| {
        Error::Storage(storage::Error::Corrupt {
            path: key.to_string(),
            detail: err.to_string(),
        })
    })?;
    Ok(Some(parsed))
}

pub(crate) async fn write_json<T: Serialize>(store: &Store, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value).expect("state documents serialize infallibly");
    store.write(key, Bytes::from(data)).await?;
    Ok(())
}

/// Read the pointer for `name`, failing when it does not exist. Pointers for
/// `production` and `staging` exist from bootstrap onward.
pub(crate) async fn read_pointer(store: &Store, name: &str) -> Result<Pointer> {
    let key = layout::pointer(name);
    read_json(store, &key)
        .await?
        .ok_or_else(|| Error::not_found(&key))
}
