//! Alias transition planning.

use crate::partition::PartitionInfo;
use crate::policy::{Retirement, RotationPolicy};
use crate::store::AliasAction;

/// Everything a roll changes, computed before any alias is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollPlan {
    /// The partition being created.
    pub partition: String,
    /// One atomic alias batch.
    pub actions: Vec<AliasAction>,
    /// Old partitions dropped from the search alias, oldest first.
    pub retired: Vec<String>,
    /// Retired partitions to delete or close.
    pub cleanup: Vec<String>,
    /// The partition that just went from writable to search-only.
    pub demotion: Option<String>,
}

impl RollPlan {
    /// Plan the transition to `partition`.
    ///
    /// `old` must be sorted oldest first and must not contain `partition`.
    /// Retirement walks from the oldest partition so the search window always
    /// keeps the newest ones.
    pub fn build(policy: &RotationPolicy, partition: &str, old: &[PartitionInfo]) -> Self {
        let write_alias = policy.write_alias();
        let search_alias = policy.search_alias();
        let fanout = policy.search_fanout as usize;
        let retirement = policy.retirement();

        let mut actions = vec![
            AliasAction::add(partition, write_alias),
            AliasAction::add(partition, search_alias.as_str()),
        ];
        let mut retired = Vec::new();
        let mut cleanup = Vec::new();
        let mut demotion = None;

        let mut search_count = 1 + old.len();
        for (i, info) in old.iter().enumerate() {
            actions.push(AliasAction::remove(info.name.as_str(), write_alias));

            if search_count - 1 >= fanout {
                actions.push(AliasAction::remove(info.name.as_str(), search_alias.as_str()));
                search_count -= 1;
                retired.push(info.name.clone());
                match retirement {
                    Retirement::Delete => cleanup.push(info.name.clone()),
                    Retirement::Close if info.status.is_open() => cleanup.push(info.name.clone()),
                    _ => {}
                }
            } else if i == old.len() - 1 && policy.processes_demotion() {
                demotion = Some(info.name.clone());
            }
        }

        Self {
            partition: partition.to_string(),
            actions,
            retired,
            cleanup,
            demotion,
        }
    }
}
