//! Database and transaction configuration
//!
//! Every `Database` instance owns its own copy of these structs, so several
//! databases opened in one process never share settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocVaultError, Result};

/// Durability mode determines when WAL frames reach stable storage
///
/// # Modes
///
/// - **Safe**: every committed frame is fsynced before `commit` returns
/// - **Fast**: frames are written to the OS but only fsynced on checkpoint
///   and close; a power failure may lose the most recent commits
///
/// ```rust
/// use docvault_core::DurabilityMode;
///
/// let mode = DurabilityMode::default();
/// assert_eq!(mode, DurabilityMode::Safe);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    #[default]
    Safe,
    Fast,
}

impl DurabilityMode {
    pub fn syncs_every_commit(&self) -> bool {
        matches!(self, DurabilityMode::Safe)
    }
}

/// Options fixed at open time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Capacity of the compiled filter cache
    pub cache_size: usize,
    /// WAL frame count that triggers an automatic checkpoint (0 = never)
    pub auto_checkpoint_threshold: u64,
    /// Unix permission bits applied to files the database creates
    pub file_permissions: u32,
    pub read_only: bool,
    pub max_bulk_operations: usize,
    pub max_document_size: usize,
    pub max_request_body_size: usize,
    pub durability: DurabilityMode,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            cache_size: 25_000,
            auto_checkpoint_threshold: 1000,
            file_permissions: 0o644,
            read_only: false,
            max_bulk_operations: 100_000,
            max_document_size: 64 * 1024 * 1024,
            max_request_body_size: 50 * 1024 * 1024,
            durability: DurabilityMode::Safe,
        }
    }
}

impl DatabaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_auto_checkpoint_threshold(mut self, threshold: u64) -> Self {
        self.auto_checkpoint_threshold = threshold;
        self
    }

    pub fn with_file_permissions(mut self, mode: u32) -> Self {
        self.file_permissions = mode;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_max_bulk_operations(mut self, max: usize) -> Self {
        self.max_bulk_operations = max;
        self
    }

    pub fn with_max_document_size(mut self, max: usize) -> Self {
        self.max_document_size = max;
        self
    }

    pub fn with_max_request_body_size(mut self, max: usize) -> Self {
        self.max_request_body_size = max;
        self
    }

    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_document_size == 0 {
            return Err(DocVaultError::InvalidArgument(
                "max_document_size must be greater than zero".to_string(),
            ));
        }
        if self.max_bulk_operations == 0 {
            return Err(DocVaultError::InvalidArgument(
                "max_bulk_operations must be greater than zero".to_string(),
            ));
        }
        if self.max_request_body_size == 0 {
            return Err(DocVaultError::InvalidArgument(
                "max_request_body_size must be greater than zero".to_string(),
            ));
        }
        if self.file_permissions > 0o777 {
            return Err(DocVaultError::InvalidArgument(format!(
                "file_permissions {:o} is not a valid mode",
                self.file_permissions
            )));
        }
        Ok(())
    }
}

/// Retry policy for `Database::run_with_retry`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Retries after the first attempt; total attempts = max_retries + 1
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub max_retry_backoff_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            max_retries: 3,
            retry_backoff_base_ms: 1,
            max_retry_backoff_ms: 100,
        }
    }
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff_base_ms(mut self, base_ms: u64) -> Self {
        self.retry_backoff_base_ms = base_ms;
        self
    }

    pub fn with_max_retry_backoff_ms(mut self, max_ms: u64) -> Self {
        self.max_retry_backoff_ms = max_ms;
        self
    }

    /// Sleep before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .retry_backoff_base_ms
            .saturating_mul(factor)
            .min(self.max_retry_backoff_ms);
        Duration::from_millis(ms)
    }
}
