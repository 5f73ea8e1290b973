//! Progress reports
//!
//! Tier suggestions and the chart aggregates shown on the reports view,
//! computed from recorded session goal data.

use crate::db::GoalDataPoint;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Whether to raise, adjust or hold a goal's difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Advance,
    Refine,
    Maintain,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Self::Advance, Self::Refine, Self::Maintain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "Advance",
            Self::Refine => "Refine",
            Self::Maintain => "Maintain",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a goal from its accuracy, total trials and number of sessions.
///
/// Advance needs accuracy >= 80 with at least 30 trials over 3 sessions;
/// accuracy in [60, 80) is Refine; everything else is Maintain.
pub fn suggest_tier(accuracy: f64, trials: u32, sessions: u32) -> Tier {
    if accuracy >= 80.0 && trials >= 30 && sessions >= 3 {
        Tier::Advance
    } else if (60.0..80.0).contains(&accuracy) {
        Tier::Refine
    } else {
        Tier::Maintain
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPoint {
    /// Monday of the week
    pub week: String,
    pub sessions: usize,
    pub accuracy: f64,
    pub trials: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaPerformance {
    pub area: String,
    pub sessions: usize,
    pub avg_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub student_id: i32,
    pub goal_id: i32,
    pub target_area: String,
    pub category: String,
    pub avg_accuracy: f64,
    pub total_trials: u64,
    pub sessions: usize,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCount {
    pub name: Tier,
    pub value: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub progress: Vec<ProgressPoint>,
    pub by_area: Vec<AreaPerformance>,
    pub goals: Vec<GoalProgress>,
    pub tiers: Vec<TierCount>,
}

/// Counts for the dashboard stat cards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub todays_sessions: i64,
    pub active_students: i64,
    pub sessions_this_week: i64,
    pub goals_tracked: i64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[i32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
}

#[derive(Default)]
struct Bucket {
    sessions: BTreeSet<i32>,
    accuracies: Vec<i32>,
    trials: u64,
}

impl Bucket {
    fn add(&mut self, point: &GoalDataPoint) {
        self.sessions.insert(point.session_id);
        self.accuracies.push(point.accuracy);
        self.trials = self.trials.saturating_add(u64::try_from(point.trials).unwrap_or(0));
    }
}

impl ProgressReport {
    pub fn build(points: &[GoalDataPoint]) -> Self {
        let mut weeks: BTreeMap<String, Bucket> = BTreeMap::new();
        let mut areas: BTreeMap<String, Bucket> = BTreeMap::new();
        let mut goals: BTreeMap<(i32, i32), (Bucket, &GoalDataPoint)> = BTreeMap::new();

        for point in points {
            let week = NaiveDate::parse_from_str(&point.date, "%Y-%m-%d")
                .map(|d| crate::schedule::week_start(d).format("%Y-%m-%d").to_string())
                .unwrap_or_else(|_| point.date.clone());
            weeks.entry(week).or_default().add(point);
            areas.entry(point.target_area.clone()).or_default().add(point);
            goals
                .entry((point.student_id, point.goal_id))
                .or_insert_with(|| (Bucket::default(), point))
                .0
                .add(point);
        }

        let progress = weeks
            .into_iter()
            .map(|(week, bucket)| ProgressPoint {
                week,
                sessions: bucket.sessions.len(),
                accuracy: round1(mean(&bucket.accuracies)),
                trials: bucket.trials,
            })
            .collect();

        let by_area = areas
            .into_iter()
            .map(|(area, bucket)| AreaPerformance {
                area,
                sessions: bucket.sessions.len(),
                avg_accuracy: round1(mean(&bucket.accuracies)),
            })
            .collect();

        let goals: Vec<GoalProgress> = goals
            .into_iter()
            .map(|((student_id, goal_id), (bucket, first))| {
                let avg = mean(&bucket.accuracies);
                let trials = u32::try_from(bucket.trials).unwrap_or(u32::MAX);
                let sessions = u32::try_from(bucket.sessions.len()).unwrap_or(u32::MAX);
                GoalProgress {
                    student_id,
                    goal_id,
                    target_area: first.target_area.clone(),
                    category: first.category.clone(),
                    avg_accuracy: round1(avg),
                    total_trials: bucket.trials,
                    sessions: bucket.sessions.len(),
                    tier: suggest_tier(avg, trials, sessions),
                }
            })
            .collect();

        let tiers = Tier::ALL
            .iter()
            .map(|tier| TierCount {
                name: *tier,
                value: goals.iter().filter(|g| g.tier == *tier).count(),
            })
            .collect();

        Self {
            progress,
            by_area,
            goals,
            tiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn point(
        session_id: i32,
        date: &str,
        goal_id: i32,
        area: &str,
        accuracy: i32,
        trials: i32,
    ) -> GoalDataPoint {
        GoalDataPoint {
            session_id,
            date: date.to_string(),
            student_id: 1,
            goal_id,
            target_area: area.to_string(),
            category: "Initial /s/".to_string(),
            accuracy,
            trials,
        }
    }

    #[test]
    fn test_tier_examples() {
        assert_eq!(suggest_tier(85.0, 32, 4), Tier::Advance);
        assert_eq!(suggest_tier(70.0, 10, 1), Tier::Refine);
        assert_eq!(suggest_tier(40.0, 5, 1), Tier::Maintain);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(suggest_tier(80.0, 30, 3), Tier::Advance);
        // High accuracy without enough evidence falls through to Maintain
        assert_eq!(suggest_tier(95.0, 29, 3), Tier::Maintain);
        assert_eq!(suggest_tier(95.0, 40, 2), Tier::Maintain);
        assert_eq!(suggest_tier(60.0, 1, 1), Tier::Refine);
        assert_eq!(suggest_tier(79.9, 100, 10), Tier::Refine);
        assert_eq!(suggest_tier(59.9, 100, 10), Tier::Maintain);
    }

    #[test]
    fn test_empty_report() {
        let report = ProgressReport::build(&[]);
        assert!(report.progress.is_empty());
        assert!(report.by_area.is_empty());
        assert!(report.goals.is_empty());
        assert_eq!(report.tiers.len(), 3);
        assert!(report.tiers.iter().all(|t| t.value == 0));
    }

    #[test]
    fn test_report_aggregates() {
        let points = vec![
            // Week of 2025-01-13
            point(1, "2025-01-13", 10, "Articulation", 80, 10),
            point(1, "2025-01-13", 11, "Phonology", 50, 10),
            point(2, "2025-01-15", 10, "Articulation", 90, 10),
            // Week of 2025-01-20
            point(3, "2025-01-21", 10, "Articulation", 85, 12),
        ];
        let report = ProgressReport::build(&points);

        assert_eq!(report.progress.len(), 2);
        assert_eq!(report.progress[0].week, "2025-01-13");
        assert_eq!(report.progress[0].sessions, 2);
        assert_eq!(report.progress[0].trials, 30);
        assert_eq!(report.progress[0].accuracy, 73.3);
        assert_eq!(report.progress[1].week, "2025-01-20");

        let artic = report.by_area.iter().find(|a| a.area == "Articulation").unwrap();
        assert_eq!(artic.sessions, 3);
        assert_eq!(artic.avg_accuracy, 85.0);

        let goal10 = report.goals.iter().find(|g| g.goal_id == 10).unwrap();
        assert_eq!(goal10.total_trials, 32);
        assert_eq!(goal10.sessions, 3);
        assert_eq!(goal10.tier, Tier::Advance);

        let goal11 = report.goals.iter().find(|g| g.goal_id == 11).unwrap();
        assert_eq!(goal11.tier, Tier::Maintain);

        let advance = report.tiers.iter().find(|t| t.name == Tier::Advance).unwrap();
        assert_eq!(advance.value, 1);
    }

    #[test]
    fn test_huge_trial_counts_do_not_overflow() {
        let points: Vec<GoalDataPoint> = (1..=3)
            .map(|id| point(id, "2025-01-13", 10, "Articulation", 90, i32::MAX))
            .collect();
        let report = ProgressReport::build(&points);

        assert_eq!(report.progress[0].trials, 3 * i32::MAX as u64);
        assert_eq!(report.goals[0].total_trials, 3 * i32::MAX as u64);
        assert_eq!(report.goals[0].tier, Tier::Advance);
    }

    #[test]
    fn test_tier_uses_unrounded_mean() {
        // 19 x 80 and 1 x 79 averages 79.95, displayed as 80.0
        let mut points: Vec<GoalDataPoint> = (1..=19)
            .map(|id| point(id % 4 + 1, "2025-01-13", 10, "Articulation", 80, 10))
            .collect();
        points.push(point(1, "2025-01-13", 10, "Articulation", 79, 10));
        let report = ProgressReport::build(&points);

        let goal = &report.goals[0];
        assert_eq!(goal.avg_accuracy, 80.0);
        assert_eq!(goal.sessions, 4);
        assert_eq!(goal.total_trials, 200);
        assert_eq!(goal.tier, Tier::Refine);

        // 59.95 stays Maintain
        let mut points: Vec<GoalDataPoint> = (1..=19)
            .map(|id| point(id, "2025-01-13", 11, "Phonology", 60, 10))
            .collect();
        points.push(point(20, "2025-01-13", 11, "Phonology", 59, 10));
        assert_eq!(ProgressReport::build(&points).goals[0].tier, Tier::Maintain);
    }

    proptest! {
        #[test]
        fn prop_mid_accuracy_is_refine(
            accuracy in 60.0f64..80.0,
            trials in 0u32..500,
            sessions in 0u32..50,
        ) {
            prop_assert_eq!(suggest_tier(accuracy, trials, sessions), Tier::Refine);
        }

        #[test]
        fn prop_low_accuracy_is_maintain(
            accuracy in 0.0f64..60.0,
            trials in 0u32..500,
            sessions in 0u32..50,
        ) {
            prop_assert_eq!(suggest_tier(accuracy, trials, sessions), Tier::Maintain);
        }
    }
}
