//! Blue/green deployment group configuration.

use serde::{Deserialize, Serialize};

/// How traffic moves from the blue to the green target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrafficShiftPolicy {
    /// Everything moves in one step.
    AllAtOnce,
    /// `percent` more every `interval_minutes` until all traffic is on green.
    Linear { percent: u8, interval_minutes: u32 },
    /// `percent` first, the remainder after `interval_minutes`.
    Canary { percent: u8, interval_minutes: u32 },
}

impl TrafficShiftPolicy {
    pub const LINEAR_10_PERCENT_EVERY_1_MINUTES: Self = Self::Linear {
        percent: 10,
        interval_minutes: 1,
    };

    pub const LINEAR_10_PERCENT_EVERY_3_MINUTES: Self = Self::Linear {
        percent: 10,
        interval_minutes: 3,
    };

    pub const CANARY_10_PERCENT_5_MINUTES: Self = Self::Canary {
        percent: 10,
        interval_minutes: 5,
    };

    /// Provider name of the deployment configuration.
    pub fn config_name(&self) -> String {
        match self {
            TrafficShiftPolicy::AllAtOnce => "CodeDeployDefault.ECSAllAtOnce".to_string(),
            TrafficShiftPolicy::Linear {
                percent,
                interval_minutes,
            } => format!(
                "CodeDeployDefault.ECSLinear{}PercentEvery{}Minute{}",
                percent,
                interval_minutes,
                if *interval_minutes == 1 { "" } else { "s" }
            ),
            TrafficShiftPolicy::Canary {
                percent,
                interval_minutes,
            } => format!(
                "CodeDeployDefault.ECSCanary{}Percent{}Minute{}",
                percent,
                interval_minutes,
                if *interval_minutes == 1 { "" } else { "s" }
            ),
        }
    }

    /// Minutes to wait between two increments.
    pub fn interval_minutes(&self) -> u32 {
        match self {
            TrafficShiftPolicy::AllAtOnce => 0,
            TrafficShiftPolicy::Linear {
                interval_minutes, ..
            }
            | TrafficShiftPolicy::Canary {
                interval_minutes, ..
            } => *interval_minutes,
        }
    }

    /// Cumulative green-target percentages, one per increment.
    ///
    /// The schedule is strictly increasing and always ends at 100. A step of
    /// zero or above 100 collapses to a single all-at-once increment.
    pub fn increments(&self) -> Vec<u8> {
        match *self {
            TrafficShiftPolicy::AllAtOnce => vec![100],
            TrafficShiftPolicy::Linear { percent, .. } => {
                if percent == 0 || percent >= 100 {
                    return vec![100];
                }
                let mut steps = Vec::new();
                let mut green = 0u8;
                while green < 100 {
                    green = green.saturating_add(percent).min(100);
                    steps.push(green);
                }
                steps
            }
            TrafficShiftPolicy::Canary { percent, .. } => {
                if percent == 0 || percent >= 100 {
                    vec![100]
                } else {
                    vec![percent, 100]
                }
            }
        }
    }

    /// Percent moved by each increment; always sums to 100.
    pub fn step_sizes(&self) -> Vec<u8> {
        let mut previous = 0u8;
        self.increments()
            .into_iter()
            .map(|green| {
                let step = green - previous;
                previous = green;
                step
            })
            .collect()
    }
}

/// Blue/green release configuration referenced by the production deploy action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentGroup {
    /// Deployment application the group belongs to.
    pub application: String,
    pub name: String,
    /// Production container service being replaced.
    pub service: String,
    /// Target currently serving production traffic.
    pub blue_target_group: String,
    /// Target receiving the staged candidate.
    pub green_target_group: String,
    /// Production-facing listener.
    pub listener: String,
    /// Test-facing listener.
    pub test_listener: String,
    pub config: TrafficShiftPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_ten_percent_schedule() {
        let policy = TrafficShiftPolicy::LINEAR_10_PERCENT_EVERY_1_MINUTES;
        let increments = policy.increments();
        assert_eq!(increments.len(), 10);
        assert_eq!(increments.first(), Some(&10));
        assert_eq!(increments.last(), Some(&100));
        assert_eq!(policy.step_sizes().iter().map(|s| *s as u32).sum::<u32>(), 100);
        assert_eq!(policy.interval_minutes(), 1);
    }

    #[test]
    fn test_uneven_linear_schedule_caps_at_100() {
        let policy = TrafficShiftPolicy::Linear {
            percent: 30,
            interval_minutes: 2,
        };
        assert_eq!(policy.increments(), vec![30, 60, 90, 100]);
        assert_eq!(policy.step_sizes(), vec![30, 30, 30, 10]);
    }

    #[test]
    fn test_canary_and_all_at_once() {
        assert_eq!(
            TrafficShiftPolicy::CANARY_10_PERCENT_5_MINUTES.increments(),
            vec![10, 100]
        );
        assert_eq!(TrafficShiftPolicy::AllAtOnce.increments(), vec![100]);
        assert_eq!(TrafficShiftPolicy::AllAtOnce.interval_minutes(), 0);
    }

    #[test]
    fn test_degenerate_step_collapses() {
        let policy = TrafficShiftPolicy::Linear {
            percent: 0,
            interval_minutes: 1,
        };
        assert_eq!(policy.increments(), vec![100]);
    }

    #[test]
    fn test_config_names() {
        assert_eq!(
            TrafficShiftPolicy::LINEAR_10_PERCENT_EVERY_1_MINUTES.config_name(),
            "CodeDeployDefault.ECSLinear10PercentEvery1Minute"
        );
        assert_eq!(
            TrafficShiftPolicy::LINEAR_10_PERCENT_EVERY_3_MINUTES.config_name(),
            "CodeDeployDefault.ECSLinear10PercentEvery3Minutes"
        );
    }
}
