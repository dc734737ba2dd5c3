//! Power - 電力スナップショットと負荷レベル

use serde::{Deserialize, Serialize};

/// One sample of the device power state.
///
/// Immutable per sample; the scheduler re-samples once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSnapshot {
    /// Deep-sleep-like restriction (doze) is active.
    pub deep_restriction: bool,

    /// Power-save mode is active.
    pub power_save: bool,

    /// The process has been exempted from power management.
    pub optimization_exempt: bool,
}

impl PowerSnapshot {
    /// Unrestricted device, not exempt.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Collapse the three signals into one ordinal.
    ///
    /// | deep_restriction | power_save | exempt | level    |
    /// |------------------|------------|--------|----------|
    /// | yes              | any        | no     | Critical |
    /// | yes              | any        | yes    | High     |
    /// | no               | yes        | no     | High     |
    /// | no               | yes        | yes    | Moderate |
    /// | no               | no         | no     | Moderate |
    /// | no               | no         | yes    | None     |
    pub fn pressure(&self) -> PressureLevel {
        match (self.deep_restriction, self.power_save, self.optimization_exempt) {
            (true, _, false) => PressureLevel::Critical,
            (true, _, true) => PressureLevel::High,
            (false, true, false) => PressureLevel::High,
            (false, true, true) => PressureLevel::Moderate,
            (false, false, false) => PressureLevel::Moderate,
            (false, false, true) => PressureLevel::None,
        }
    }
}

/// Resource pressure derived from a [`PowerSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    None,
    Moderate,
    High,
    Critical,
}

impl PressureLevel {
    /// Upper bound on tasks collected in one cycle. Strictly decreasing with pressure.
    pub fn max_batch_size(self) -> usize {
        match self {
            PressureLevel::None => 10,
            PressureLevel::Moderate => 5,
            PressureLevel::High => 3,
            PressureLevel::Critical => 1,
        }
    }

    /// Under High/Critical pressure a batch runs one task at a time.
    pub fn is_constrained(self) -> bool {
        matches!(self, PressureLevel::High | PressureLevel::Critical)
    }
}

/// Gate a task puts on the power state before it may be picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerRequirement {
    #[default]
    Any,
    PreferOptimal,
    RequireFullPower,
}

impl PowerRequirement {
    pub fn is_met_by(self, snapshot: &PowerSnapshot) -> bool {
        match self {
            PowerRequirement::Any => true,
            PowerRequirement::PreferOptimal => snapshot.optimization_exempt,
            PowerRequirement::RequireFullPower => {
                !snapshot.power_save && !snapshot.deep_restriction
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn snap(deep: bool, save: bool, exempt: bool) -> PowerSnapshot {
        PowerSnapshot {
            deep_restriction: deep,
            power_save: save,
            optimization_exempt: exempt,
        }
    }

    #[rstest]
    #[case(PressureLevel::None, 10)]
    #[case(PressureLevel::Moderate, 5)]
    #[case(PressureLevel::High, 3)]
    #[case(PressureLevel::Critical, 1)]
    fn batch_size_per_pressure(#[case] level: PressureLevel, #[case] expected: usize) {
        assert_eq!(level.max_batch_size(), expected);
    }

    #[test]
    fn batch_size_strictly_decreases_with_pressure() {
        let levels = [
            PressureLevel::None,
            PressureLevel::Moderate,
            PressureLevel::High,
            PressureLevel::Critical,
        ];
        for pair in levels.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].max_batch_size() > pair[1].max_batch_size());
        }
    }

    #[rstest]
    #[case(snap(true, false, false), PressureLevel::Critical)]
    #[case(snap(true, true, true), PressureLevel::High)]
    #[case(snap(false, true, false), PressureLevel::High)]
    #[case(snap(false, true, true), PressureLevel::Moderate)]
    #[case(snap(false, false, false), PressureLevel::Moderate)]
    #[case(snap(false, false, true), PressureLevel::None)]
    fn pressure_derivation(#[case] s: PowerSnapshot, #[case] expected: PressureLevel) {
        assert_eq!(s.pressure(), expected);
    }

    #[rstest]
    #[case(PowerRequirement::Any, snap(true, true, false), true)]
    #[case(PowerRequirement::PreferOptimal, snap(false, false, false), false)]
    #[case(PowerRequirement::PreferOptimal, snap(true, true, true), true)]
    #[case(PowerRequirement::RequireFullPower, snap(false, false, false), true)]
    #[case(PowerRequirement::RequireFullPower, snap(false, true, true), false)]
    #[case(PowerRequirement::RequireFullPower, snap(true, false, true), false)]
    fn power_requirement_matrix(
        #[case] req: PowerRequirement,
        #[case] s: PowerSnapshot,
        #[case] met: bool,
    ) {
        assert_eq!(req.is_met_by(&s), met);
    }
}
