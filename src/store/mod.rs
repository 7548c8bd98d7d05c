//! Index store abstraction.
//!
//! The rotation core never talks to a backend directly. Everything it needs
//! (existence checks, creation, alias batches, size queries, maintenance
//! calls and the policy documents themselves) goes through [`IndexStore`]
//! and [`PolicyStore`].
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`]: in-process, used by tests and dry runs
//! - `HttpIndexStore` (feature `http`): Elasticsearch-compatible REST client

#[cfg(feature = "http")]
mod http;
mod memory;

use async_trait::async_trait;
use log::warn;

use crate::error::{Error, Result};
use crate::partition::PartitionInfo;
use crate::policy::{RotationPolicy, SettingsDocument};

#[cfg(feature = "http")]
pub use http::{HttpIndexStore, HttpStoreConfig, DEFAULT_POLICY_INDEX};
pub use memory::{MemoryStore, StoreCall, StoreOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOp {
    Add,
    Remove,
}

impl AliasOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasOp::Add => "add",
            AliasOp::Remove => "remove",
        }
    }
}

/// One entry of an alias batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasAction {
    pub op: AliasOp,
    pub partition: String,
    pub alias: String,
}

impl AliasAction {
    pub fn add(partition: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            op: AliasOp::Add,
            partition: partition.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(partition: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            op: AliasOp::Remove,
            partition: partition.into(),
            alias: alias.into(),
        }
    }
}

/// Operations the rotation engine issues against the backend.
///
/// Batch methods take several partition names and must act on all of them in
/// one request where the backend allows it.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// True when `name` is a partition or an alias.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Create a partition. `None` creates it with an empty settings document.
    async fn create(&self, name: &str, settings: Option<&SettingsDocument>) -> Result<()>;

    /// Primary store size of the single partition `pattern` resolves to.
    ///
    /// Errors with [`Error::AmbiguousTarget`] when the pattern resolves to
    /// zero or more than one partition.
    async fn primary_size(&self, pattern: &str) -> Result<u64>;

    async fn list_matching(&self, pattern: &str) -> Result<Vec<PartitionInfo>>;

    /// Apply every action in one atomic request.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;

    async fn flush(&self, names: &[String]) -> Result<()>;

    async fn close(&self, names: &[String]) -> Result<()>;

    async fn delete(&self, names: &[String]) -> Result<()>;

    async fn put_settings(&self, names: &[String], settings: &SettingsDocument) -> Result<()>;

    async fn optimize(&self, names: &[String], max_segments: Option<u32>) -> Result<()>;
}

/// Source of rotation policy documents.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_policies(&self) -> Result<PolicyLoad>;
}

/// Result of a policy load: the usable policies and the rejected documents.
#[derive(Debug, Default)]
pub struct PolicyLoad {
    pub policies: Vec<RotationPolicy>,
    pub rejected: Vec<Error>,
}

impl PolicyLoad {
    /// Parse raw `(id, document)` pairs, dropping the invalid ones.
    ///
    /// Fails with [`Error::NoPolicies`] when nothing usable remains.
    pub fn from_documents<I, D>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, D)>,
        D: AsRef<[u8]>,
    {
        let mut load = PolicyLoad::default();
        for (id, doc) in documents {
            match RotationPolicy::from_document(&id, doc.as_ref()) {
                Ok(policy) => load.policies.push(policy),
                Err(err) => {
                    warn!("Dropping rotation policy: {}", err);
                    load.rejected.push(err);
                }
            }
        }
        if load.policies.is_empty() {
            return Err(Error::NoPolicies);
        }
        Ok(load)
    }
}
