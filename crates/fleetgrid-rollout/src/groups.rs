//! Partitioning a rollout's matched targets into ordered groups.
//!
//! The partition is computed once, when the rollout is created or its
//! groups are redefined. Every matched target lands in exactly one group,
//! otherwise the whole layout is rejected with per-group counts so the
//! operator can correct it.

use serde::{Deserialize, Serialize};

use fleetgrid_core::TargetFilter;
use fleetgrid_core::config::RolloutConfig;
use fleetgrid_state::{ControllerId, Target};

use crate::strategy::{GroupDefinition, GroupStrategy};

/// Result of checking a group layout against the current target population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupsValidation {
    pub total_targets: u64,
    pub targets_per_group: Vec<u64>,
    /// Set when the layout cannot be used.
    pub error: Option<String>,
}

impl GroupsValidation {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// A group ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedGroup {
    pub name: String,
    pub description: Option<String>,
    pub target_filter: Option<String>,
    pub target_percentage: f64,
    pub success_threshold: u8,
    pub error_threshold: u8,
    pub targets: Vec<ControllerId>,
}

/// Split `matched` (already filtered by the rollout's filter, in stable
/// order) according to `strategy`.
pub fn partition(
    matched: &[Target],
    strategy: &GroupStrategy,
    defaults: &RolloutConfig,
) -> Result<Vec<PlannedGroup>, GroupsValidation> {
    let total = matched.len() as u64;
    let fail = |groups: &[PlannedGroup], msg: String| GroupsValidation {
        total_targets: total,
        targets_per_group: groups.iter().map(|g| g.targets.len() as u64).collect(),
        error: Some(msg),
    };

    if strategy.group_count() == 0 {
        return Err(fail(&[], "at least one group is required".into()));
    }
    if matched.is_empty() {
        return Err(fail(&[], "no targets match the rollout filter".into()));
    }

    match strategy {
        GroupStrategy::Simple {
            amount,
            success_threshold,
            error_threshold,
        } => {
            let success = success_threshold.unwrap_or(defaults.default_success_threshold);
            let error = error_threshold.unwrap_or(defaults.default_error_threshold);
            check_thresholds("simple", success, error).map_err(|msg| fail(&[], msg))?;
            simple(matched, *amount as usize, success, error).map_err(|msg| fail(&[], msg))
        }
        GroupStrategy::Advanced { groups } => {
            let mut planned = Vec::with_capacity(groups.len());
            let mut remaining: Vec<&Target> = matched.iter().collect();
            for def in groups {
                let group = advanced(def, &mut remaining, defaults)
                    .map_err(|msg| fail(&planned, msg))?;
                planned.push(group);
            }
            if !remaining.is_empty() {
                let msg = format!(
                    "{} matching targets are not covered by any group",
                    remaining.len()
                );
                return Err(fail(&planned, msg));
            }
            Ok(planned)
        }
    }
}

/// Counts for a successful partition.
pub fn summarize(groups: &[PlannedGroup]) -> GroupsValidation {
    let targets_per_group: Vec<u64> = groups.iter().map(|g| g.targets.len() as u64).collect();
    GroupsValidation {
        total_targets: targets_per_group.iter().sum(),
        targets_per_group,
        error: None,
    }
}

fn simple(
    matched: &[Target],
    amount: usize,
    success_threshold: u8,
    error_threshold: u8,
) -> Result<Vec<PlannedGroup>, String> {
    let total = matched.len();
    if total < amount {
        return Err(format!("{total} targets cannot fill {amount} groups"));
    }
    let base = total / amount;
    let mut groups = Vec::with_capacity(amount);
    let mut start = 0;
    for i in 0..amount {
        let end = if i + 1 == amount { total } else { start + base };
        groups.push(PlannedGroup {
            name: format!("group-{}", i + 1),
            description: None,
            target_filter: None,
            // Share of the targets still ungrouped at this position.
            target_percentage: 100.0 / (amount - i) as f64,
            success_threshold,
            error_threshold,
            targets: matched[start..end]
                .iter()
                .map(|t| t.controller_id.clone())
                .collect(),
        });
        start = end;
    }
    Ok(groups)
}

fn advanced(
    def: &GroupDefinition,
    remaining: &mut Vec<&Target>,
    defaults: &RolloutConfig,
) -> Result<PlannedGroup, String> {
    let success = def
        .success_threshold
        .unwrap_or(defaults.default_success_threshold);
    let error = def
        .error_threshold
        .unwrap_or(defaults.default_error_threshold);
    check_thresholds(&def.name, success, error)?;
    if !(def.target_percentage > 0.0 && def.target_percentage <= 100.0) {
        return Err(format!(
            "group '{}': target percentage must be in (0, 100]",
            def.name
        ));
    }
    let filter = match &def.target_filter {
        Some(expr) => Some(
            TargetFilter::parse(expr).map_err(|e| format!("group '{}': {e}", def.name))?,
        ),
        None => None,
    };

    let candidates = remaining
        .iter()
        .filter(|t| filter.as_ref().is_none_or(|f| f.matches(t)))
        .count();
    let take = ((def.target_percentage * candidates as f64) / 100.0).round() as usize;
    let take = take.min(candidates);

    let mut targets = Vec::with_capacity(take);
    remaining.retain(|t| {
        if targets.len() < take && filter.as_ref().is_none_or(|f| f.matches(t)) {
            targets.push(t.controller_id.clone());
            false
        } else {
            true
        }
    });

    Ok(PlannedGroup {
        name: def.name.clone(),
        description: def.description.clone(),
        target_filter: def.target_filter.clone(),
        target_percentage: def.target_percentage,
        success_threshold: success,
        error_threshold: error,
        targets,
    })
}

fn check_thresholds(group: &str, success: u8, error: u8) -> Result<(), String> {
    if success > 100 || error > 100 {
        return Err(format!("group '{group}': thresholds are percentages (0-100)"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_state::{Audit, Tenant, TargetUpdateStatus};

    fn target(cid: &str, ring: Option<&str>) -> Target {
        let mut attributes = std::collections::BTreeMap::new();
        if let Some(ring) = ring {
            attributes.insert("ring".to_string(), ring.to_string());
        }
        Target {
            tenant: Tenant::new("default").unwrap(),
            controller_id: cid.to_string(),
            name: cid.to_string(),
            description: None,
            update_status: TargetUpdateStatus::Unknown,
            assigned_ds: None,
            installed_ds: None,
            installed_at: None,
            last_query_at: None,
            last_outcome: None,
            attributes,
            metadata: Default::default(),
            auto_confirm: None,
            audit: Audit::new(0),
        }
    }

    fn fleet(n: usize) -> Vec<Target> {
        (0..n).map(|i| target(&format!("dev-{i:02}"), None)).collect()
    }

    fn def(name: &str, filter: Option<&str>, pct: f64) -> GroupDefinition {
        GroupDefinition {
            name: name.into(),
            description: None,
            target_filter: filter.map(String::from),
            target_percentage: pct,
            success_threshold: None,
            error_threshold: None,
        }
    }

    fn simple_strategy(amount: u32) -> GroupStrategy {
        GroupStrategy::Simple {
            amount,
            success_threshold: None,
            error_threshold: None,
        }
    }

    #[test]
    fn test_simple_last_group_takes_remainder() {
        let groups = partition(&fleet(10), &simple_strategy(3), &RolloutConfig::default()).unwrap();
        let counts: Vec<usize> = groups.iter().map(|g| g.targets.len()).collect();
        assert_eq!(counts, vec![3, 3, 4]);
        assert_eq!(summarize(&groups).total_targets, 10);
        assert_eq!(groups[0].targets[0], "dev-00");
        assert_eq!(groups[2].targets[3], "dev-09");
        assert_eq!(groups[0].success_threshold, 100);
        assert_eq!(groups[0].error_threshold, 50);
    }

    #[test]
    fn test_simple_rejects_more_groups_than_targets() {
        let err = partition(&fleet(2), &simple_strategy(3), &RolloutConfig::default()).unwrap_err();
        assert_eq!(err.total_targets, 2);
        assert!(err.error.unwrap().contains("cannot fill"));
    }

    #[test]
    fn test_empty_population_is_invalid() {
        let err = partition(&[], &simple_strategy(1), &RolloutConfig::default()).unwrap_err();
        assert!(!err.is_valid());
        assert_eq!(err.total_targets, 0);
    }

    #[test]
    fn test_advanced_filters_and_percentages() {
        let mut matched = fleet(6);
        matched.push(target("canary-1", Some("canary")));
        matched.push(target("canary-2", Some("canary")));
        let strategy = GroupStrategy::Advanced {
            groups: vec![
                def("canary", Some("attribute.ring==canary"), 100.0),
                def("half", None, 50.0),
                def("rest", None, 100.0),
            ],
        };
        let groups = partition(&matched, &strategy, &RolloutConfig::default()).unwrap();
        assert_eq!(groups[0].targets, vec!["canary-1", "canary-2"]);
        assert_eq!(groups[1].targets.len(), 3);
        assert_eq!(groups[2].targets.len(), 3);
        assert_eq!(summarize(&groups).total_targets, 8);
    }

    #[test]
    fn test_advanced_uncovered_targets_are_reported() {
        let strategy = GroupStrategy::Advanced {
            groups: vec![def("half", None, 50.0)],
        };
        let err = partition(&fleet(4), &strategy, &RolloutConfig::default()).unwrap_err();
        assert_eq!(err.targets_per_group, vec![2]);
        assert_eq!(err.total_targets, 4);
        assert!(err.error.unwrap().contains("2 matching targets"));
    }

    #[test]
    fn test_advanced_rejects_bad_threshold_and_filter() {
        let mut bad = def("g1", None, 100.0);
        bad.success_threshold = Some(101);
        let err = partition(
            &fleet(1),
            &GroupStrategy::Advanced { groups: vec![bad] },
            &RolloutConfig::default(),
        )
        .unwrap_err();
        assert!(err.error.unwrap().contains("percentages"));

        let err = partition(
            &fleet(1),
            &GroupStrategy::Advanced {
                groups: vec![def("g1", Some("color~red"), 100.0)],
            },
            &RolloutConfig::default(),
        )
        .unwrap_err();
        assert!(err.error.unwrap().starts_with("group 'g1'"));
    }
}
