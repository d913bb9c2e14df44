//! Deterministic risk scoring for privileged actions.
//!
//! The score is advisory: it is stored on change requests and audit entries
//! and surfaced through the anomaly listing, but never blocks an action.

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::GovernanceError;
use super::store::GovernanceStore;

/// Scores strictly above this are flagged anomalous.
pub const ANOMALY_THRESHOLD: f64 = 0.7;

// Factor weights in hundredths, so sums compare exactly.
const OFF_HOURS_POINTS: u32 = 30;
const RECENT_ACTIVITY_POINTS: u32 = 20;
const NEW_GRANT_POINTS: u32 = 40;
const BULK_POINTS: u32 = 30;
const MAX_POINTS: u32 = 100;

/// Working hours in admin local time, `[start, end)`.
const BUSINESS_HOURS: std::ops::Range<u32> = 6..22;
const BULK_THRESHOLD: usize = 3;

/// Risk score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct HeuristicRiskScore(f64);

impl HeuristicRiskScore {
    pub const ZERO: HeuristicRiskScore = HeuristicRiskScore(0.0);

    fn from_points(points: u32) -> Self {
        Self(f64::from(points.min(MAX_POINTS)) / 100.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_anomalous(&self) -> bool {
        self.0 > ANOMALY_THRESHOLD
    }
}

/// Inputs the scorer looks at for one action.
#[derive(Debug, Clone)]
pub struct ActionFeatures {
    pub at: DateTime<Utc>,
    /// Other privileged audit entries by the same actor in the last 24h.
    pub recent_privileged_actions: i64,
    /// The proposed role set contains a role the target did not hold.
    pub grants_new_role: bool,
    pub bulk: bool,
    /// Roles or targets touched by the action.
    pub touched: usize,
}

impl ActionFeatures {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            recent_privileged_actions: 0,
            grants_new_role: false,
            bulk: false,
            touched: 1,
        }
    }

    pub fn granting(mut self, grants_new_role: bool) -> Self {
        self.grants_new_role = grants_new_role;
        self
    }

    pub fn touching(mut self, touched: usize) -> Self {
        self.touched = touched;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyScorer {
    offset: FixedOffset,
}

impl AnomalyScorer {
    /// Lookback window for the recent-activity factor.
    pub fn activity_window() -> Duration {
        Duration::hours(24)
    }

    /// `utc_offset_minutes` is the administrators' local offset from UTC.
    /// Out-of-range offsets fall back to UTC.
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn is_off_hours(&self, at: DateTime<Utc>) -> bool {
        let hour = at.with_timezone(&self.offset).hour();
        !BUSINESS_HOURS.contains(&hour)
    }

    pub fn score(&self, features: &ActionFeatures) -> HeuristicRiskScore {
        let mut points = 0;
        if self.is_off_hours(features.at) {
            points += OFF_HOURS_POINTS;
        }
        if features.recent_privileged_actions > 0 {
            points += RECENT_ACTIVITY_POINTS;
        }
        if features.grants_new_role {
            points += NEW_GRANT_POINTS;
        }
        if features.bulk || features.touched > BULK_THRESHOLD {
            points += BULK_POINTS;
        }
        HeuristicRiskScore::from_points(points)
    }

    /// Score an action by `actor_id`, filling in its privileged activity
    /// over the preceding [`AnomalyScorer::activity_window`].
    pub async fn assess(
        &self,
        store: &dyn GovernanceStore,
        actor_id: Uuid,
        features: ActionFeatures,
    ) -> Result<HeuristicRiskScore, GovernanceError> {
        let recent = store
            .count_privileged_actions(actor_id, features.at - Self::activity_window())
            .await?;
        Ok(self.score(&ActionFeatures {
            recent_privileged_actions: recent,
            ..features
        }))
    }
}

impl Default for AnomalyScorer {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 15, 0).unwrap()
    }

    #[test]
    fn test_business_hours_are_quiet() {
        let scorer = AnomalyScorer::default();
        let score = scorer.score(&ActionFeatures::at(at(10)));
        assert_eq!(score, HeuristicRiskScore::ZERO);
    }

    #[test]
    fn test_new_grant_off_hours_sits_on_threshold() {
        let scorer = AnomalyScorer::default();
        let features = ActionFeatures {
            grants_new_role: true,
            ..ActionFeatures::at(at(23))
        };
        let score = scorer.score(&features);
        assert_eq!(score.value(), 0.7);
        assert!(!score.is_anomalous());

        let busy = ActionFeatures {
            recent_privileged_actions: 4,
            ..features
        };
        assert!(scorer.score(&busy).is_anomalous());
    }

    #[test]
    fn test_score_saturates_at_one() {
        let scorer = AnomalyScorer::default();
        let features = ActionFeatures {
            at: at(3),
            recent_privileged_actions: 10,
            grants_new_role: true,
            bulk: true,
            touched: 12,
        };
        let score = scorer.score(&features);
        assert_eq!(score.value(), 1.0);
        assert!(score.is_anomalous());
    }

    #[test]
    fn test_score_bounds_over_all_factor_combinations() {
        let scorer = AnomalyScorer::new(-300);
        for hour in 0..24 {
            for recent in [0, 1] {
                for grants_new_role in [false, true] {
                    for touched in [0, 1, 4] {
                        let score = scorer.score(&ActionFeatures {
                            at: at(hour),
                            recent_privileged_actions: recent,
                            grants_new_role,
                            bulk: false,
                            touched,
                        });
                        assert!((0.0..=1.0).contains(&score.value()));
                    }
                }
            }
        }
    }

    #[test]
    fn test_offset_shifts_business_hours() {
        // 03:00 UTC is 08:00 at UTC+5.
        let scorer = AnomalyScorer::new(5 * 60);
        assert!(!scorer.is_off_hours(at(3)));
        assert!(AnomalyScorer::default().is_off_hours(at(3)));
    }
}
