//! [`StabilityEvaluator`] – pure snapshot-to-verdict classification.
//!
//! One call per control tick. The evaluation order is fixed and gives the
//! tie-break `Unstable` > `ObstacleNear` > `Stable`:
//!
//! 1. No inertial sample in the snapshot → `Unstable(no_inertial_data)`.
//!    Absence of the primary stability signal is itself an unstable
//!    condition, never silently ignored.
//! 2. Any acceleration axis above the threshold → `Unstable(acceleration_exceeded)`.
//! 3. Any range/proximity distance below the obstacle threshold →
//!    `ObstacleNear(distance)`.
//! 4. Otherwise `Stable(margin)`, where margin = threshold − max |accel|.
//!    The margin is diagnostic only and never used for gating.

use helmos_types::{Snapshot, UnstableReason, Verdict};

/// Default acceleration threshold, in g.
pub const DEFAULT_ACCEL_THRESHOLD_G: f64 = 0.5;

/// Default obstacle distance threshold, in millimetres (30 cm).
pub const DEFAULT_OBSTACLE_THRESHOLD_MM: f64 = 300.0;

/// Pure function mapping an inertial + obstacle snapshot to a go/no-go
/// verdict plus a numeric margin.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use std::time::Instant;
/// use helmos_kernel::StabilityEvaluator;
/// use helmos_types::{Axes3, ChannelId, InertialSample, Snapshot, TelemetryRecord, Verdict};
///
/// let evaluator = StabilityEvaluator::default();
///
/// let mut entries = HashMap::new();
/// entries.insert(
///     ChannelId::Serial,
///     Some(TelemetryRecord::Inertial(InertialSample {
///         accel_g: Axes3::new(0.1, 0.1, 0.1),
///         gyro_dps: Axes3::new(0.0, 0.0, 0.0),
///         captured_at: Instant::now(),
///     })),
/// );
/// let snapshot = Snapshot::new(entries, Instant::now());
///
/// assert!(matches!(evaluator.evaluate(&snapshot), Verdict::Stable { .. }));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StabilityEvaluator {
    accel_threshold_g: f64,
    obstacle_threshold_mm: f64,
}

impl StabilityEvaluator {
    pub fn new(accel_threshold_g: f64, obstacle_threshold_mm: f64) -> Self {
        Self {
            accel_threshold_g,
            obstacle_threshold_mm,
        }
    }

    /// Classify one snapshot. No side effects, nothing cached across calls.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Verdict {
        let Some(inertial) = snapshot.inertial() else {
            return Verdict::Unstable {
                reason: UnstableReason::NoInertialData,
            };
        };

        let max_accel = inertial.accel_g.max_abs();
        if max_accel > self.accel_threshold_g {
            return Verdict::Unstable {
                reason: UnstableReason::AccelerationExceeded,
            };
        }

        if let Some(distance_mm) = snapshot.nearest_obstacle_mm()
            && distance_mm < self.obstacle_threshold_mm
        {
            return Verdict::ObstacleNear { distance_mm };
        }

        Verdict::Stable {
            margin_g: self.accel_threshold_g - max_accel,
        }
    }
}

impl Default for StabilityEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEL_THRESHOLD_G, DEFAULT_OBSTACLE_THRESHOLD_MM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmos_types::{
        Axes3, ChannelId, InertialSample, ProximitySample, RangeSample, TelemetryRecord,
    };
    use std::collections::HashMap;
    use std::time::Instant;

    fn inertial(x: f64, y: f64, z: f64) -> TelemetryRecord {
        TelemetryRecord::Inertial(InertialSample {
            accel_g: Axes3::new(x, y, z),
            gyro_dps: Axes3::new(0.0, 0.0, 0.0),
            captured_at: Instant::now(),
        })
    }

    fn range(distance_mm: f64) -> TelemetryRecord {
        TelemetryRecord::Range(RangeSample {
            distance_mm,
            captured_at: Instant::now(),
        })
    }

    fn snapshot(entries: Vec<(ChannelId, Option<TelemetryRecord>)>) -> Snapshot {
        Snapshot::new(entries.into_iter().collect::<HashMap<_, _>>(), Instant::now())
    }

    #[test]
    fn missing_inertial_is_unstable() {
        let snap = snapshot(vec![
            (ChannelId::Serial, None),
            (ChannelId::Can, Some(range(500.0))),
        ]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        assert_eq!(
            verdict,
            Verdict::Unstable {
                reason: UnstableReason::NoInertialData
            }
        );
    }

    #[test]
    fn acceleration_over_threshold_is_unstable() {
        let snap = snapshot(vec![(ChannelId::Serial, Some(inertial(0.6, 0.0, 0.0)))]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        assert_eq!(
            verdict,
            Verdict::Unstable {
                reason: UnstableReason::AccelerationExceeded
            }
        );
    }

    #[test]
    fn unstable_outranks_obstacle() {
        // Both conditions hold; instability must win regardless of distance.
        let snap = snapshot(vec![
            (ChannelId::Serial, Some(inertial(0.0, -0.9, 0.0))),
            (ChannelId::Can, Some(range(50.0))),
        ]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        assert!(matches!(verdict, Verdict::Unstable { .. }));
    }

    #[test]
    fn close_obstacle_outranks_stable() {
        let snap = snapshot(vec![
            (ChannelId::Serial, Some(inertial(0.1, 0.0, 0.0))),
            (ChannelId::Can, Some(range(150.0))),
        ]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        assert_eq!(verdict, Verdict::ObstacleNear { distance_mm: 150.0 });
    }

    #[test]
    fn triggered_proximity_counts_as_obstacle() {
        let snap = snapshot(vec![
            (ChannelId::Serial, Some(inertial(0.1, 0.0, 0.0))),
            (
                ChannelId::Can,
                Some(TelemetryRecord::Proximity(ProximitySample {
                    distance_mm: 80.0,
                    triggered: true,
                    captured_at: Instant::now(),
                })),
            ),
        ]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        assert_eq!(verdict, Verdict::ObstacleNear { distance_mm: 80.0 });
    }

    #[test]
    fn far_obstacle_is_stable() {
        let snap = snapshot(vec![
            (ChannelId::Serial, Some(inertial(0.1, 0.1, 0.1))),
            (ChannelId::Can, Some(range(500.0))),
        ]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        match verdict {
            Verdict::Stable { margin_g } => assert!((margin_g - 0.4).abs() < 1e-9),
            other => panic!("expected Stable, got {other:?}"),
        }
    }

    #[test]
    fn acceleration_at_threshold_boundary_is_stable() {
        let snap = snapshot(vec![(ChannelId::Serial, Some(inertial(0.5, 0.0, 0.0)))]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        match verdict {
            Verdict::Stable { margin_g } => assert!(margin_g.abs() < 1e-9),
            other => panic!("expected Stable at boundary, got {other:?}"),
        }
    }

    #[test]
    fn obstacle_at_threshold_boundary_is_stable() {
        let snap = snapshot(vec![
            (ChannelId::Serial, Some(inertial(0.0, 0.0, 0.0))),
            (ChannelId::Can, Some(range(300.0))),
        ]);
        let verdict = StabilityEvaluator::default().evaluate(&snap);
        assert!(matches!(verdict, Verdict::Stable { .. }));
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let evaluator = StabilityEvaluator::new(1.0, 100.0);
        let snap = snapshot(vec![
            (ChannelId::Serial, Some(inertial(0.8, 0.0, 0.0))),
            (ChannelId::Can, Some(range(150.0))),
        ]);
        // 0.8 g is under the 1.0 g cap and 150 mm is outside the 100 mm envelope.
        assert!(matches!(evaluator.evaluate(&snap), Verdict::Stable { .. }));
    }
}
