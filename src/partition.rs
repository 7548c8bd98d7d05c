//! Partition naming and listing types.
//!
//! Partitions are named `<target>_<suffix>` where the suffix is a zero-padded
//! UTC timestamp truncated to the policy's unit. Fixed-width fields make
//! lexicographic order match chronological order within a family.

use time::OffsetDateTime;

use crate::policy::{RollUnit, RotationPolicy};

/// Open/closed state reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionStatus {
    Open,
    Closed,
    Other(String),
}

impl PartitionStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "open" => PartitionStatus::Open,
            "close" | "closed" => PartitionStatus::Closed,
            other => PartitionStatus::Other(other.to_string()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PartitionStatus::Open)
    }
}

/// One partition as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub name: String,
    pub status: PartitionStatus,
    /// Primary store size in bytes, when the store reported it.
    pub primary_size_bytes: Option<u64>,
}

impl PartitionInfo {
    pub fn open(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PartitionStatus::Open,
            primary_size_bytes: None,
        }
    }

    pub fn closed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PartitionStatus::Closed,
            primary_size_bytes: None,
        }
    }
}

/// Timestamp suffix for a partition rolled at `instant`.
pub fn suffix_for(unit: RollUnit, instant: OffsetDateTime) -> String {
    let t = instant.to_offset(time::UtcOffset::UTC);
    let (year, month, day) = (t.year(), t.month() as u8, t.day());
    let (hour, minute, second) = (t.hour(), t.minute(), t.second());
    match unit {
        RollUnit::Bytes => format!(
            "{:04}-{:02}-{:02}-{:02}-{:02}-{:02}",
            year, month, day, hour, minute, second
        ),
        RollUnit::Minutes => format!(
            "{:04}-{:02}-{:02}-{:02}-{:02}",
            year, month, day, hour, minute
        ),
        RollUnit::Hours => format!("{:04}-{:02}-{:02}-{:02}", year, month, day, hour),
        RollUnit::Days => format!("{:04}-{:02}-{:02}", year, month, day),
        RollUnit::Months => format!("{:04}-{:02}", year, month),
        RollUnit::Years => format!("{:04}", year),
    }
}

/// Name of the partition a roll at `instant` would create.
pub fn next_partition_name(policy: &RotationPolicy, instant: OffsetDateTime) -> String {
    format!(
        "{}_{}",
        policy.target_name,
        suffix_for(policy.roll_unit, instant)
    )
}

/// Sort partitions oldest first.
pub fn sort_oldest_first(partitions: &mut [PartitionInfo]) {
    partitions.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Match a store name pattern where `*` stands for any run of characters.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !name.starts_with(first) || name.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &name[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn test_suffix_granularity() {
        let t = datetime!(2024-03-07 09:05:02 UTC);
        assert_eq!(suffix_for(RollUnit::Bytes, t), "2024-03-07-09-05-02");
        assert_eq!(suffix_for(RollUnit::Minutes, t), "2024-03-07-09-05");
        assert_eq!(suffix_for(RollUnit::Hours, t), "2024-03-07-09");
        assert_eq!(suffix_for(RollUnit::Days, t), "2024-03-07");
        assert_eq!(suffix_for(RollUnit::Months, t), "2024-03");
        assert_eq!(suffix_for(RollUnit::Years, t), "2024");
    }

    #[test]
    fn test_suffix_uses_utc() {
        let t = datetime!(2024-03-07 01:30:00 +02:00);
        assert_eq!(suffix_for(RollUnit::Hours, t), "2024-03-06-23");
        let same = t.to_offset(offset!(UTC));
        assert_eq!(suffix_for(RollUnit::Hours, same), "2024-03-06-23");
    }

    #[test]
    fn test_next_partition_name() {
        let mut policy = RotationPolicy::new("events", RollUnit::Days);
        policy.target_name = "app-events".to_string();
        let name = next_partition_name(&policy, datetime!(2023-12-31 00:00:00 UTC));
        assert_eq!(name, "app-events_2023-12-31");
    }

    #[test]
    fn test_lexicographic_order_is_chronological() {
        let mut partitions = vec![
            PartitionInfo::open("logs_2024-10-01"),
            PartitionInfo::open("logs_2024-09-30"),
            PartitionInfo::closed("logs_2023-12-31"),
            PartitionInfo::open("logs_2024-01-02"),
        ];
        sort_oldest_first(&mut partitions);
        let names: Vec<_> = partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "logs_2023-12-31",
                "logs_2024-01-02",
                "logs_2024-09-30",
                "logs_2024-10-01"
            ]
        );
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("logs_*", "logs_2024"));
        assert!(matches_pattern("logs_*", "logs_"));
        assert!(!matches_pattern("logs_*", "logs"));
        assert!(!matches_pattern("logs_*", "metrics_2024"));
        assert!(matches_pattern("logs", "logs"));
        assert!(matches_pattern("*_search", "logs_search"));
        assert!(matches_pattern("a*b*c", "axxbyyc"));
        assert!(!matches_pattern("a*b*c", "axxcyyb"));
    }

    #[test]
    fn test_status_parse() {
        assert!(PartitionStatus::parse("open").is_open());
        assert_eq!(PartitionStatus::parse("close"), PartitionStatus::Closed);
        assert!(!PartitionStatus::parse("red").is_open());
    }
}
