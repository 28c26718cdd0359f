//! Display-only progress stages derived from elapsed vs. estimated time.

use serde::Serialize;

/// Coarse analysis phase shown next to the timer. Ordered: later phases compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageLabel {
    /// OCR / report extraction.
    #[default]
    Stage1,
    /// Primary analysis.
    Stage2,
    /// Validation and formatting.
    Stage3,
}

impl StageLabel {
    pub fn label(self) -> &'static str {
        match self {
            StageLabel::Stage1 => "Extracting reports",
            StageLabel::Stage2 => "Analyzing",
            StageLabel::Stage3 => "Validating and formatting",
        }
    }
}

impl std::fmt::Display for StageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

const STAGE2_AT: f64 = 0.30;
const STAGE3_AT: f64 = 0.65;

/// Map elapsed and estimated seconds to a stage.
///
/// Without a (positive) estimate this is always `Stage1`. Overruns clamp to `Stage3`.
pub fn stage(elapsed_seconds: u64, estimated_seconds: Option<u64>) -> StageLabel {
    let estimated = match estimated_seconds {
        Some(t) if t > 0 => t,
        _ => return StageLabel::Stage1,
    };
    let r = elapsed_seconds as f64 / estimated as f64;
    if r < STAGE2_AT {
        StageLabel::Stage1
    } else if r < STAGE3_AT {
        StageLabel::Stage2
    } else {
        StageLabel::Stage3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_minute_estimate() {
        assert_eq!(stage(150, Some(600)), StageLabel::Stage1);
        assert_eq!(stage(400, Some(600)), StageLabel::Stage2);
        assert_eq!(stage(700, Some(600)), StageLabel::Stage3);
    }

    #[test]
    fn boundaries_are_inclusive_on_the_upper_stage() {
        assert_eq!(stage(29, Some(100)), StageLabel::Stage1);
        assert_eq!(stage(30, Some(100)), StageLabel::Stage2);
        assert_eq!(stage(64, Some(100)), StageLabel::Stage2);
        assert_eq!(stage(65, Some(100)), StageLabel::Stage3);
    }

    #[test]
    fn no_estimate_is_always_stage1() {
        for e in [0, 1, 60, 10_000, u64::MAX] {
            assert_eq!(stage(e, None), StageLabel::Stage1);
            assert_eq!(stage(e, Some(0)), StageLabel::Stage1);
        }
    }

    #[test]
    fn monotonic_in_elapsed() {
        for t in [1u64, 7, 60, 600, 3600] {
            let mut prev = StageLabel::Stage1;
            for e in 0..=(t * 3) {
                let s = stage(e, Some(t));
                assert!(s >= prev, "stage went backwards at e={e}, t={t}");
                prev = s;
            }
            assert_eq!(prev, StageLabel::Stage3);
        }
    }
}
