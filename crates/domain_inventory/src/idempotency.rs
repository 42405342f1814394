//! Idempotency records
//!
//! A record maps (tenant, key) to the outcome of the first request that
//! used the key. The request payload is fingerprinted so a key reused for a
//! different request is caught instead of silently replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use core_kernel::TenantId;

use crate::error::InventoryError;

/// Longest accepted idempotency key
pub const MAX_KEY_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::InProgress => "IN_PROGRESS",
            IdempotencyStatus::Succeeded => "SUCCEEDED",
            IdempotencyStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IdempotencyStatus::InProgress)
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(IdempotencyStatus::InProgress),
            "SUCCEEDED" => Ok(IdempotencyStatus::Succeeded),
            "FAILED" => Ok(IdempotencyStatus::Failed),
            other => Err(InventoryError::validation(format!("unknown idempotency status '{}'", other))),
        }
    }
}

/// The entity a successful request produced, used to replay it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseRef {
    pub kind: String,
    pub id: Uuid,
}

impl ResponseRef {
    pub fn new(kind: impl Into<String>, id: impl Into<Uuid>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant_id: TenantId,
    pub key: String,
    pub status: IdempotencyStatus,
    pub request_hash: String,
    pub response_ref: Option<ResponseRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn start(tenant_id: TenantId, key: &str, request_hash: &str, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            key: key.to_string(),
            status: IdempotencyStatus::InProgress,
            request_hash: request_hash.to_string(),
            response_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What `begin` found for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyBegin {
    pub key: String,
    pub status: IdempotencyStatus,
    /// True when this call owns the key and must run the request
    pub is_new: bool,
    pub response_ref: Option<ResponseRef>,
}

impl IdempotencyBegin {
    pub fn fresh(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: IdempotencyStatus::InProgress,
            is_new: true,
            response_ref: None,
        }
    }

    /// The prior result to replay, if the key already succeeded
    pub fn replay(&self) -> Option<&ResponseRef> {
        match self.status {
            IdempotencyStatus::Succeeded if !self.is_new => self.response_ref.as_ref(),
            _ => None,
        }
    }

    /// Rejects a duplicate that arrived while the original is still running
    pub fn ensure_not_in_flight(&self) -> Result<(), InventoryError> {
        if !self.is_new && self.status == IdempotencyStatus::InProgress {
            return Err(InventoryError::IdempotencyInProgress {
                key: self.key.clone(),
            });
        }
        Ok(())
    }
}

/// Checks the key's shape
pub fn validate_key(key: &str) -> Result<(), InventoryError> {
    if key.trim().is_empty() {
        return Err(InventoryError::validation("idempotency key must not be blank"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(InventoryError::validation(format!(
            "idempotency key exceeds {} characters",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Hex SHA-256 of the payload's JSON encoding
pub fn request_hash<T: Serialize>(payload: &T) -> Result<String, InventoryError> {
    let bytes = serde_json::to_vec(payload)
        .map_err(|e| InventoryError::validation(format!("request cannot be fingerprinted: {}", e)))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|byte| format!("{:02x}", byte)).collect())
}
