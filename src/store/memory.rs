//! In-process index store.
//!
//! Keeps partitions, aliases and policy documents in memory and records every
//! mutating call in a journal so callers can check exactly what a roll did.
//! Failures can be injected per call for partial-failure scenarios.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::partition::{matches_pattern, PartitionInfo, PartitionStatus};
use crate::policy::SettingsDocument;
use crate::store::{AliasAction, AliasOp, IndexStore, PolicyLoad, PolicyStore};

const EMPTY_SETTINGS: &str = "{}";

/// Store entry points, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCall {
    Exists,
    Create,
    PrimarySize,
    ListMatching,
    UpdateAliases,
    Flush,
    Close,
    Delete,
    PutSettings,
    Optimize,
    LoadPolicies,
}

/// A mutating call as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Create { name: String, settings: String },
    UpdateAliases(Vec<AliasAction>),
    Flush(Vec<String>),
    Close(Vec<String>),
    Delete(Vec<String>),
    PutSettings { names: Vec<String>, settings: String },
    Optimize { names: Vec<String>, max_segments: Option<u32> },
}

#[derive(Debug, Clone)]
struct Partition {
    status: PartitionStatus,
    primary_size: u64,
}

#[derive(Debug, Default)]
struct State {
    partitions: BTreeMap<String, Partition>,
    /// alias -> partitions holding it
    aliases: BTreeMap<String, BTreeSet<String>>,
    policies: BTreeMap<String, Vec<u8>>,
    journal: Vec<StoreOp>,
    failures: Vec<StoreCall>,
    policy_loads: usize,
}

impl State {
    fn take_failure(&mut self, call: StoreCall) -> Result<()> {
        match self.failures.iter().position(|c| *c == call) {
            Some(idx) => {
                self.failures.remove(idx);
                Err(Error::Store {
                    status: Some(503),
                    message: format!("injected failure for {call:?}"),
                })
            }
            None => Ok(()),
        }
    }

    /// Partitions a name pattern resolves to, following aliases.
    fn resolve(&self, pattern: &str) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .partitions
            .keys()
            .filter(|name| matches_pattern(pattern, name))
            .cloned()
            .collect();
        for (alias, members) in &self.aliases {
            if matches_pattern(pattern, alias) {
                names.extend(members.iter().cloned());
            }
        }
        names
    }

    fn require_partitions(&self, names: &[String]) -> Result<()> {
        for name in names {
            if !self.partitions.contains_key(name) {
                return Err(not_found(name));
            }
        }
        Ok(())
    }
}

fn not_found(name: &str) -> Error {
    Error::Store {
        status: Some(404),
        message: format!("no such index [{name}]"),
    }
}

/// In-memory [`IndexStore`] and [`PolicyStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an open, empty partition without journaling it.
    pub fn add_partition(&self, name: impl Into<String>) {
        self.lock().partitions.insert(
            name.into(),
            Partition {
                status: PartitionStatus::Open,
                primary_size: 0,
            },
        );
    }

    /// Attach an alias without journaling it.
    pub fn add_alias(&self, partition: &str, alias: &str) {
        self.lock()
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(partition.to_string());
    }

    pub fn set_primary_size(&self, name: &str, bytes: u64) {
        if let Some(partition) = self.lock().partitions.get_mut(name) {
            partition.primary_size = bytes;
        }
    }

    pub fn put_policy(&self, id: impl Into<String>, document: impl Into<Vec<u8>>) {
        self.lock().policies.insert(id.into(), document.into());
    }

    pub fn remove_policy(&self, id: &str) {
        self.lock().policies.remove(id);
    }

    /// Fail the next call of the given kind.
    pub fn fail_next(&self, call: StoreCall) {
        self.lock().failures.push(call);
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.lock().partitions.keys().cloned().collect()
    }

    pub fn has_partition(&self, name: &str) -> bool {
        self.lock().partitions.contains_key(name)
    }

    pub fn status(&self, name: &str) -> Option<PartitionStatus> {
        self.lock().partitions.get(name).map(|p| p.status.clone())
    }

    /// Partitions currently holding `alias`, in name order.
    pub fn alias_members(&self, alias: &str) -> Vec<String> {
        self.lock()
            .aliases
            .get(alias)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Aliases attached to `partition`, in name order.
    pub fn aliases_on(&self, partition: &str) -> Vec<String> {
        self.lock()
            .aliases
            .iter()
            .filter(|(_, members)| members.contains(partition))
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    pub fn journal(&self) -> Vec<StoreOp> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Number of policy fetches served, failed ones included.
    pub fn policy_loads(&self) -> usize {
        self.lock().policy_loads
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let mut state = self.lock();
        state.take_failure(StoreCall::Exists)?;
        let is_alias = state
            .aliases
            .get(name)
            .map(|members| !members.is_empty())
            .unwrap_or(false);
        Ok(state.partitions.contains_key(name) || is_alias)
    }

    async fn create(&self, name: &str, settings: Option<&SettingsDocument>) -> Result<()> {
        let mut state = self.lock();
        state.take_failure(StoreCall::Create)?;
        if state.partitions.contains_key(name) || state.aliases.contains_key(name) {
            return Err(Error::Store {
                status: Some(400),
                message: format!("index [{name}] already exists"),
            });
        }
        state.partitions.insert(
            name.to_string(),
            Partition {
                status: PartitionStatus::Open,
                primary_size: 0,
            },
        );
        state.journal.push(StoreOp::Create {
            name: name.to_string(),
            settings: settings
                .map(|doc| doc.as_str().to_string())
                .unwrap_or_else(|| EMPTY_SETTINGS.to_string()),
        });
        Ok(())
    }

    async fn primary_size(&self, pattern: &str) -> Result<u64> {
        let mut state = self.lock();
        state.take_failure(StoreCall::PrimarySize)?;
        let names = state.resolve(pattern);
        if names.len() != 1 {
            return Err(Error::AmbiguousTarget {
                pattern: pattern.to_string(),
                matches: names.len(),
            });
        }
        let size = names
            .iter()
            .next()
            .and_then(|name| state.partitions.get(name))
            .map(|p| p.primary_size)
            .unwrap_or(0);
        Ok(size)
    }

    async fn list_matching(&self, pattern: &str) -> Result<Vec<PartitionInfo>> {
        let mut state = self.lock();
        state.take_failure(StoreCall::ListMatching)?;
        let names = state.resolve(pattern);
        Ok(names
            .into_iter()
            .filter_map(|name| {
                state.partitions.get(&name).map(|p| PartitionInfo {
                    status: p.status.clone(),
                    primary_size_bytes: Some(p.primary_size),
                    name,
                })
            })
            .collect())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut state = self.lock();
        state.take_failure(StoreCall::UpdateAliases)?;
        // Validate the whole batch before touching anything.
        for action in actions {
            if action.op == AliasOp::Add && !state.partitions.contains_key(&action.partition) {
                return Err(not_found(&action.partition));
            }
        }
        for action in actions {
            match action.op {
                AliasOp::Add => {
                    state
                        .aliases
                        .entry(action.alias.clone())
                        .or_default()
                        .insert(action.partition.clone());
                }
                AliasOp::Remove => {
                    let emptied = match state.aliases.get_mut(&action.alias) {
                        Some(members) => {
                            members.remove(&action.partition);
                            members.is_empty()
                        }
                        None => false,
                    };
                    if emptied {
                        state.aliases.remove(&action.alias);
                    }
                }
            }
        }
        state.journal.push(StoreOp::UpdateAliases(actions.to_vec()));
        Ok(())
    }

    async fn flush(&self, names: &[String]) -> Result<()> {
        let mut state = self.lock();
        state.take_failure(StoreCall::Flush)?;
        state.require_partitions(names)?;
        state.journal.push(StoreOp::Flush(names.to_vec()));
        Ok(())
    }

    async fn close(&self, names: &[String]) -> Result<()> {
        let mut state = self.lock();
        state.take_failure(StoreCall::Close)?;
        state.require_partitions(names)?;
        for name in names {
            if let Some(partition) = state.partitions.get_mut(name) {
                partition.status = PartitionStatus::Closed;
            }
        }
        state.journal.push(StoreOp::Close(names.to_vec()));
        Ok(())
    }

    async fn delete(&self, names: &[String]) -> Result<()> {
        let mut state = self.lock();
        state.take_failure(StoreCall::Delete)?;
        state.require_partitions(names)?;
        for name in names {
            state.partitions.remove(name);
            for members in state.aliases.values_mut() {
                members.remove(name);
            }
        }
        state.aliases.retain(|_, members| !members.is_empty());
        state.journal.push(StoreOp::Delete(names.to_vec()));
        Ok(())
    }

    async fn put_settings(&self, names: &[String], settings: &SettingsDocument) -> Result<()> {
        let mut state = self.lock();
        state.take_failure(StoreCall::PutSettings)?;
        state.require_partitions(names)?;
        state.journal.push(StoreOp::PutSettings {
            names: names.to_vec(),
            settings: settings.as_str().to_string(),
        });
        Ok(())
    }

    async fn optimize(&self, names: &[String], max_segments: Option<u32>) -> Result<()> {
        let mut state = self.lock();
        state.take_failure(StoreCall::Optimize)?;
        state.require_partitions(names)?;
        state.journal.push(StoreOp::Optimize {
            names: names.to_vec(),
            max_segments,
        });
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn load_policies(&self) -> Result<PolicyLoad> {
        let documents = {
            let mut state = self.lock();
            state.policy_loads += 1;
            state.take_failure(StoreCall::LoadPolicies)?;
            state.policies.clone()
        };
        PolicyLoad::from_documents(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alias_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.add_partition("logs_1");
        store.add_alias("logs_1", "logs");

        let batch = vec![
            AliasAction::remove("logs_1", "logs"),
            AliasAction::add("logs_missing", "logs"),
        ];
        assert!(store.update_aliases(&batch).await.is_err());
        assert_eq!(store.alias_members("logs"), vec!["logs_1"]);
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_removing_absent_alias_is_noop() {
        let store = MemoryStore::new();
        store.add_partition("logs_1");
        store
            .update_aliases(&[AliasAction::remove("logs_1", "logs")])
            .await
            .unwrap();
        assert!(store.aliases_on("logs_1").is_empty());
    }

    #[tokio::test]
    async fn test_primary_size_resolves_alias() {
        let store = MemoryStore::new();
        store.add_partition("logs_1");
        store.add_partition("logs_2");
        store.set_primary_size("logs_2", 512);
        store.add_alias("logs_2", "logs");

        assert_eq!(store.primary_size("logs").await.unwrap(), 512);

        store.add_alias("logs_1", "logs");
        let err = store.primary_size("logs").await.unwrap_err();
        assert!(matches!(err, Error::AmbiguousTarget { matches: 2, .. }));

        let err = store.primary_size("metrics").await.unwrap_err();
        assert!(matches!(err, Error::AmbiguousTarget { matches: 0, .. }));
    }

    #[tokio::test]
    async fn test_exists_covers_aliases() {
        let store = MemoryStore::new();
        assert!(!store.exists("logs").await.unwrap());
        store.add_partition("logs_1");
        store.add_alias("logs_1", "logs");
        assert!(store.exists("logs").await.unwrap());
        assert!(store.exists("logs_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(StoreCall::Create);
        assert!(store.create("logs_1", None).await.is_err());
        store.create("logs_1", None).await.unwrap();
        assert_eq!(
            store.journal(),
            vec![StoreOp::Create {
                name: "logs_1".to_string(),
                settings: "{}".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_delete_drops_alias_membership() {
        let store = MemoryStore::new();
        store.add_partition("logs_1");
        store.add_alias("logs_1", "logs_search");
        store.delete(&["logs_1".to_string()]).await.unwrap();
        assert!(!store.has_partition("logs_1"));
        assert!(store.alias_members("logs_search").is_empty());
        assert!(!store.exists("logs_search").await.unwrap());
    }
}
