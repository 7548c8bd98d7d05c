//! Rolling index rotation.
//!
//! Manages families of time- or size-bounded partitions behind two stable
//! aliases: a write alias pointing at the newest partition and a search alias
//! spanning the most recent few. Partitions that leave the search window are
//! deleted or closed.

pub mod clock;
pub mod error;
pub mod partition;
pub mod policy;
pub mod rotation;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result, RollStage};
pub use partition::{PartitionInfo, PartitionStatus};
pub use policy::{Retirement, RollUnit, RotationPolicy, SettingsDocument};
pub use rotation::{RollOutcome, RollPlan, RollReport, RollStats, RotationEngine, SkipReason};
pub use scheduler::{Event, Scheduler, SchedulerConfig};
pub use store::{AliasAction, AliasOp, IndexStore, MemoryStore, PolicyLoad, PolicyStore};
