//! The rotation engine.
//!
//! A roll creates the next partition of a family, moves the write alias to
//! it, adds it to the search alias and drops the oldest partitions from the
//! search alias once the window is full. All alias changes go out as one
//! atomic batch. Retired partitions are then deleted or flushed and closed,
//! and the partition that just stopped receiving writes can get demotion
//! settings and an optimize.
//!
//! Rolls are idempotent per partition name: a second roll that would create
//! an existing partition does nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = RotationEngine::new(store.clone());
//! match engine.roll(&policy, OffsetDateTime::now_utc()).await? {
//!     RollOutcome::Rolled(report) => println!("now writing to {}", report.partition),
//!     RollOutcome::Skipped(reason) => println!("nothing to do: {reason:?}"),
//! }
//! ```

mod plan;
mod stats;

use std::sync::Arc;

use log::{debug, info};
use time::OffsetDateTime;

use crate::error::{Result, RollStage};
use crate::partition::{next_partition_name, sort_oldest_first};
use crate::policy::{Retirement, RotationPolicy};
use crate::store::IndexStore;
use crate::trigger::has_room;

pub use plan::RollPlan;
pub use stats::RollStats;

/// Why a roll attempt made no changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The size policy's current partition is below its threshold.
    HasRoom,
    /// The partition for this instant already exists.
    AlreadyExists,
}

/// What a completed roll changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollReport {
    pub partition: String,
    pub retired: Vec<String>,
    /// Retired partitions that were deleted or closed.
    pub cleaned: Vec<String>,
    pub demoted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollOutcome {
    Skipped(SkipReason),
    Rolled(RollReport),
}

impl RollOutcome {
    pub fn rolled(&self) -> bool {
        matches!(self, RollOutcome::Rolled(_))
    }
}

/// Executes rolls against an index store.
pub struct RotationEngine<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for RotationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> RotationEngine<S>
where
    S: IndexStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Roll `policy` at `instant` if due.
    ///
    /// Errors before partition creation leave the store untouched. Later
    /// errors are wrapped with the [`RollStage`] that failed; the alias batch
    /// is never rolled back once committed.
    pub async fn roll(&self, policy: &RotationPolicy, instant: OffsetDateTime) -> Result<RollOutcome> {
        let store = self.store.as_ref();
        let next = next_partition_name(policy, instant);

        if policy.rolls_on_size() {
            if has_room(policy, store).await? {
                debug!("{}: write partition has room", policy.id);
                return Ok(RollOutcome::Skipped(SkipReason::HasRoom));
            }
        } else if store.exists(&next).await? {
            debug!("{}: {} already exists", policy.id, next);
            return Ok(RollOutcome::Skipped(SkipReason::AlreadyExists));
        }

        let mut old = store.list_matching(&policy.partition_pattern()).await?;
        old.retain(|info| info.name != next);
        sort_oldest_first(&mut old);

        store
            .create(&next, policy.creation_settings.as_ref())
            .await?;

        let plan = RollPlan::build(policy, &next, &old);
        store
            .update_aliases(&plan.actions)
            .await
            .map_err(|err| err.at_stage(&next, RollStage::Aliases))?;
        info!(
            "{}: rolled to {} ({} retired)",
            policy.id,
            next,
            plan.retired.len()
        );

        // Demotion still runs when cleanup fails; the first error is reported.
        let cleanup = self.clean_up(policy, &plan.cleanup).await;
        let demotion = match &plan.demotion {
            Some(name) => self.demote(policy, name).await,
            None => Ok(()),
        };
        cleanup.map_err(|err| err.at_stage(&next, RollStage::Cleanup))?;
        demotion.map_err(|err| err.at_stage(&next, RollStage::Demotion))?;

        Ok(RollOutcome::Rolled(RollReport {
            partition: plan.partition,
            retired: plan.retired,
            cleaned: plan.cleanup,
            demoted: plan.demotion,
        }))
    }

    async fn clean_up(&self, policy: &RotationPolicy, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        match policy.retirement() {
            Retirement::Delete => {
                info!("{}: deleting {}", policy.id, names.join(","));
                self.store.delete(names).await
            }
            Retirement::Close => {
                info!("{}: closing {}", policy.id, names.join(","));
                self.store.flush(names).await?;
                self.store.close(names).await
            }
            Retirement::Keep => Ok(()),
        }
    }

    async fn demote(&self, policy: &RotationPolicy, name: &str) -> Result<()> {
        let names = [name.to_string()];
        if let Some(settings) = &policy.demotion_settings {
            self.store.put_settings(&names, settings).await?;
        }
        if policy.optimize_on_demotion {
            let max_segments =
                (policy.optimize_max_segments != 0).then_some(policy.optimize_max_segments);
            info!("{}: optimizing {}", policy.id, name);
            self.store.optimize(&names, max_segments).await?;
        }
        Ok(())
    }
}
