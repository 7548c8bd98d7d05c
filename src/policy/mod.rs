//! Rotation policies.
//!
//! A policy describes one family of rolling partitions: how the partitions
//! are named, when a new one is due, how many stay behind the search alias
//! and what happens to the ones that fall out of it.
//!
//! Policies are loaded from JSON documents in the policy store. Loading
//! applies defaults and validates; a policy is never modified afterwards.
//!
//! ```rust,ignore
//! let policy = RotationPolicy::from_document("snowball", EXAMPLE_POLICY.as_bytes())?;
//! assert_eq!(policy.search_alias(), "snowball_search");
//! ```

mod settings;
mod size;

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

pub use settings::SettingsDocument;
pub use size::parse_bytes;

pub const DEFAULT_SEARCH_FANOUT: u32 = 2;
pub const DEFAULT_SEARCH_SUFFIX: &str = "search";

/// A policy document operators can start from.
pub const EXAMPLE_POLICY: &str = r#"{
    "targetIndex": "snowball",
    "rollUnit": "minutes",
    "rollIncrement": 3,
    "searchAliases": 4,
    "searchSuffix": "search",
    "deleteOld": false,
    "closeOld": true,
    "optimizeOnRoll": true,
    "optimizeMaxSegments": 2,
    "settings": {
        "index": {
            "number_of_replicas": 5
        }
    }
}"#;

/// Granularity at which a family rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollUnit {
    Minutes,
    Hours,
    Days,
    Months,
    Years,
    Bytes,
}

impl RollUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollUnit::Minutes => "minutes",
            RollUnit::Hours => "hours",
            RollUnit::Days => "days",
            RollUnit::Months => "months",
            RollUnit::Years => "years",
            RollUnit::Bytes => "bytes",
        }
    }
}

impl FromStr for RollUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "minutes" => Ok(RollUnit::Minutes),
            "hours" => Ok(RollUnit::Hours),
            "days" => Ok(RollUnit::Days),
            "months" => Ok(RollUnit::Months),
            "years" => Ok(RollUnit::Years),
            "bytes" => Ok(RollUnit::Bytes),
            other => Err(format!(
                "rollUnit must be one of minutes, hours, days, months, years or bytes, got {other:?}"
            )),
        }
    }
}

impl fmt::Display for RollUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a partition once it leaves the search window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    Delete,
    Close,
    Keep,
}

/// A validated rotation policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPolicy {
    pub id: String,
    /// Base name of the family. Also the name of the write alias.
    pub target_name: String,
    pub roll_unit: RollUnit,
    /// Boundary filter: a time policy only fires when its unit field is a
    /// multiple of this value.
    pub roll_increment: u32,
    /// Primary store size at which a `bytes` policy rolls.
    pub roll_size_threshold: Option<u64>,
    /// Number of most recent partitions kept behind the search alias.
    pub search_fanout: u32,
    pub search_suffix: String,
    pub delete_retired: bool,
    pub close_retired: bool,
    pub optimize_on_demotion: bool,
    /// Segment target for optimize. Zero leaves it to the store.
    pub optimize_max_segments: u32,
    pub creation_settings: Option<SettingsDocument>,
    pub demotion_settings: Option<SettingsDocument>,
}

/// Wire form of a policy as stored in the policy store.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PolicyDocument {
    target_index: Option<String>,
    roll_unit: Option<String>,
    roll_increment: Option<i64>,
    roll_size: Option<String>,
    search_aliases: Option<i64>,
    search_suffix: Option<String>,
    delete_old: bool,
    close_old: bool,
    optimize_on_roll: bool,
    optimize_max_segments: Option<i64>,
    settings: Option<SettingsDocument>,
    settings_on_roll: Option<SettingsDocument>,
}

impl RotationPolicy {
    /// Create a policy with default settings for the given unit.
    pub fn new(id: impl Into<String>, roll_unit: RollUnit) -> Self {
        let id = id.into();
        Self {
            target_name: id.clone(),
            id,
            roll_unit,
            roll_increment: 1,
            roll_size_threshold: None,
            search_fanout: DEFAULT_SEARCH_FANOUT,
            search_suffix: DEFAULT_SEARCH_SUFFIX.to_string(),
            delete_retired: false,
            close_retired: false,
            optimize_on_demotion: false,
            optimize_max_segments: 0,
            creation_settings: None,
            demotion_settings: None,
        }
    }

    /// Parse a policy document, apply defaults and validate it.
    pub fn from_document(id: &str, document: &[u8]) -> Result<Self> {
        if id.is_empty() {
            return Err(Error::invalid_policy(id, "policy id is missing"));
        }
        let doc: PolicyDocument = serde_json::from_slice(document)
            .map_err(|err| Error::invalid_policy(id, format!("malformed document: {err}")))?;

        let roll_unit = match doc.roll_unit.as_deref() {
            None | Some("") => return Err(Error::invalid_policy(id, "rollUnit is required")),
            Some(unit) => unit
                .parse::<RollUnit>()
                .map_err(|reason| Error::invalid_policy(id, reason))?,
        };

        // Zero means unset: every boundary of the unit fires.
        let roll_increment = match doc.roll_increment {
            None | Some(0) => 1,
            Some(n) if n > 0 => to_u32(id, "rollIncrement", n)?,
            Some(_) => {
                return Err(Error::invalid_policy(
                    id,
                    "rollIncrement must be greater than or equal to 0",
                ))
            }
        };

        let search_fanout = match doc.search_aliases {
            None => DEFAULT_SEARCH_FANOUT,
            Some(n) if n >= 0 => to_u32(id, "searchAliases", n)?,
            Some(_) => {
                return Err(Error::invalid_policy(
                    id,
                    "searchAliases must be greater than or equal to 0",
                ))
            }
        };

        let optimize_max_segments = match doc.optimize_max_segments {
            None => 0,
            Some(n) if n >= 0 => to_u32(id, "optimizeMaxSegments", n)?,
            Some(_) => {
                return Err(Error::invalid_policy(
                    id,
                    "optimizeMaxSegments must be greater than or equal to 0",
                ))
            }
        };

        let roll_size_threshold = match (roll_unit, doc.roll_size.as_deref()) {
            (RollUnit::Bytes, None | Some("")) => {
                return Err(Error::invalid_policy(
                    id,
                    "rollSize is required if the rollUnit is bytes",
                ))
            }
            (RollUnit::Bytes, Some(raw)) => Some(
                parse_bytes(raw).map_err(|err| Error::invalid_policy(id, err.to_string()))?,
            ),
            _ => None,
        };

        let policy = Self {
            id: id.to_string(),
            target_name: doc
                .target_index
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| id.to_string()),
            roll_unit,
            roll_increment,
            roll_size_threshold,
            search_fanout,
            search_suffix: doc
                .search_suffix
                .filter(|suffix| !suffix.is_empty())
                .unwrap_or_else(|| DEFAULT_SEARCH_SUFFIX.to_string()),
            delete_retired: doc.delete_old,
            close_retired: doc.close_old,
            optimize_on_demotion: doc.optimize_on_roll,
            optimize_max_segments,
            creation_settings: doc.settings,
            demotion_settings: doc.settings_on_roll,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check invariants that hold for every usable policy, however it was built.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid_policy(&self.id, "policy id is missing"));
        }
        if self.target_name.is_empty() {
            return Err(Error::invalid_policy(&self.id, "target name is empty"));
        }
        if self.roll_increment == 0 {
            return Err(Error::invalid_policy(
                &self.id,
                "rollIncrement must be greater than 0",
            ));
        }
        if self.roll_unit == RollUnit::Bytes {
            match self.roll_size_threshold {
                None => {
                    return Err(Error::invalid_policy(
                        &self.id,
                        "rollSize is required if the rollUnit is bytes",
                    ))
                }
                Some(0) => {
                    return Err(Error::invalid_policy(
                        &self.id,
                        "rollSize must be greater than 0 bytes",
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn rolls_on_size(&self) -> bool {
        self.roll_unit == RollUnit::Bytes
    }

    pub fn write_alias(&self) -> &str {
        &self.target_name
    }

    pub fn search_alias(&self) -> String {
        format!("{}_{}", self.target_name, self.search_suffix)
    }

    /// Pattern matching every partition of the family.
    pub fn partition_pattern(&self) -> String {
        format!("{}_*", self.target_name)
    }

    pub fn retirement(&self) -> Retirement {
        if self.delete_retired {
            Retirement::Delete
        } else if self.close_retired {
            Retirement::Close
        } else {
            Retirement::Keep
        }
    }

    /// Whether the partition leaving the write alias gets demotion processing.
    pub fn processes_demotion(&self) -> bool {
        self.optimize_on_demotion || self.demotion_settings.is_some()
    }
}

fn to_u32(id: &str, field: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::invalid_policy(id, format!("{field} is too large")))
}
