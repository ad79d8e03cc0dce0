//! Classification of a (current, previous) measurement pair.
//!
//! Everything here is pure: samples and history are passed in, nothing is
//! read from storage.

pub mod mwu;
pub mod stats;

use serde::{Deserialize, Serialize};

pub const MIN_VALUE_PRECISION: f64 = 0.0001;
pub const MIN_PERCENTAGE_CHANGE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Regressed,
    Improved,
    UnchangedPass,
    UnchangedFail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Regressed => "REGRESSED",
            Verdict::Improved => "IMPROVED",
            Verdict::UnchangedPass => "UNCHANGED_PASS",
            Verdict::UnchangedFail => "UNCHANGED_FAIL",
        }
    }

    /// Swaps REGRESSED and IMPROVED.
    pub fn inverted(self) -> Self {
        match self {
            Verdict::Regressed => Verdict::Improved,
            Verdict::Improved => Verdict::Regressed,
            other => other,
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(self, Verdict::Regressed | Verdict::Improved)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds used by [`ComparisonResult::get_value_status`].
///
/// The percentage thresholds are empirical and kept configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonSettings {
    pub confidence_interval: f64,
    pub value_precision: f64,
    pub ignore_small: bool,
    pub min_percentage_change: f64,
    pub min_absolute_change: f64,
    /// Used when no stddev is known.
    pub fallback_percentage_change: f64,
    /// Significance level of the Mann-Whitney U test.
    pub confidence_level: f64,
    /// Samples needed on each side before the U test runs.
    pub mwu_min_samples: usize,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            confidence_interval: 2.576,
            value_precision: MIN_VALUE_PRECISION,
            ignore_small: true,
            min_percentage_change: MIN_PERCENTAGE_CHANGE,
            min_absolute_change: MIN_PERCENTAGE_CHANGE,
            fallback_percentage_change: 0.002,
            confidence_level: 0.05,
            mwu_min_samples: 4,
        }
    }
}

/// How the current samples are reduced to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Min,
    Max,
    Mean,
    Median,
}

impl Aggregation {
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        match self {
            Aggregation::Min => stats::safe_min(values),
            Aggregation::Max => stats::safe_max(values),
            Aggregation::Mean => stats::mean(values),
            Aggregation::Median => stats::median(values),
        }
    }
}

/// Where a stddev came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Stddev {
    /// Measured on the current samples.
    Measured { value: f64 },
    /// Estimated from a historical window with the given mean.
    Estimated { value: f64, mean: f64 },
}

impl Stddev {
    pub fn value(&self) -> f64 {
        match self {
            Stddev::Measured { value } | Stddev::Estimated { value, .. } => *value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub current: Option<f64>,
    pub previous: Option<f64>,
    pub delta: Option<f64>,
    pub pct_delta: Option<f64>,
    pub stddev: Option<Stddev>,
    pub mad: Option<f64>,
    pub current_failed: bool,
    pub previous_failed: bool,
    pub sample_count: usize,
    pub bigger_is_better: bool,
    #[serde(skip)]
    current_samples: Vec<f64>,
    #[serde(skip)]
    previous_samples: Vec<f64>,
}

pub fn get_test_status(current_failed: bool, previous_failed: bool) -> Verdict {
    match (current_failed, previous_failed) {
        (true, true) => Verdict::UnchangedFail,
        (true, false) => Verdict::Regressed,
        (false, true) => Verdict::Improved,
        (false, false) => Verdict::UnchangedPass,
    }
}

/// Previous sample closest to `current`; the later one wins a tie.
pub fn absmin_diff(current: f64, previous: &[f64]) -> Option<(f64, f64)> {
    let mut best: Option<f64> = None;
    for p in previous {
        match best {
            Some(b) if (current - p).abs() > (current - b).abs() => {}
            _ => best = Some(*p),
        }
    }
    best.map(|b| (current - b, b))
}

impl ComparisonResult {
    /// A pair of already-aggregated values.
    pub fn new(current: Option<f64>, previous: Option<f64>) -> Self {
        let (delta, pct_delta) = match (current, previous) {
            (Some(c), Some(p)) => {
                let d = c - p;
                (Some(d), Some(if p != 0.0 { d / p } else { 0.0 }))
            }
            _ => (None, None),
        };
        Self {
            current,
            previous,
            delta,
            pct_delta,
            stddev: None,
            mad: None,
            current_failed: false,
            previous_failed: false,
            sample_count: usize::from(current.is_some()),
            bigger_is_better: false,
            current_samples: Vec::new(),
            previous_samples: Vec::new(),
        }
    }

    /// Aggregates raw samples. `Min` becomes `Max` for bigger-is-better
    /// metrics, and `previous` is the previous sample nearest the aggregate.
    pub fn from_samples(
        current_samples: &[f64],
        previous_samples: &[f64],
        aggregation: Aggregation,
        bigger_is_better: bool,
    ) -> Self {
        let aggregation = match aggregation {
            Aggregation::Min if bigger_is_better => Aggregation::Max,
            other => other,
        };
        let current = aggregation.apply(current_samples);
        let mut result = Self::new(current, None);

        if let Some(c) = current.filter(|c| *c != 0.0) {
            if let Some((delta, prev)) = absmin_diff(c, previous_samples) {
                result.previous = Some(prev);
                result.delta = Some(delta);
                result.pct_delta = Some(if prev != 0.0 { delta / prev } else { 0.0 });
            }
        }
        if current_samples.len() > 1 {
            result.stddev = stats::standard_deviation(current_samples)
                .map(|value| Stddev::Measured { value });
            result.mad = stats::median_absolute_deviation(current_samples);
        }
        result.sample_count = current_samples.len();
        result.bigger_is_better = bigger_is_better;
        result.current_samples = current_samples.to_vec();
        result.previous_samples = previous_samples.to_vec();
        result
    }

    pub fn with_failures(mut self, current_failed: bool, previous_failed: bool) -> Self {
        self.current_failed = current_failed;
        self.previous_failed = previous_failed;
        self
    }

    pub fn with_stddev(mut self, value: f64) -> Self {
        self.stddev = Some(Stddev::Measured { value });
        self
    }

    pub fn with_estimated_stddev(mut self, value: f64, mean: f64) -> Self {
        self.stddev = Some(Stddev::Estimated { value, mean });
        self
    }

    pub fn with_bigger_is_better(mut self, bigger_is_better: bool) -> Self {
        self.bigger_is_better = bigger_is_better;
        self
    }

    /// Estimates a stddev from historical values when none was measured.
    pub fn with_history_window(self, window: &[f64]) -> Self {
        if self.stddev.is_some() || window.len() < 2 {
            return self;
        }
        match (stats::standard_deviation(window), stats::mean(window)) {
            (Some(sd), Some(mean)) => self.with_estimated_stddev(sd, mean),
            _ => self,
        }
    }

    pub fn get_test_status(&self) -> Verdict {
        get_test_status(self.current_failed, self.previous_failed)
    }

    /// Value verdict, first matching rule wins. `None` when either side has no value.
    pub fn get_value_status(&self, settings: &ComparisonSettings) -> Option<Verdict> {
        let (Some(current), Some(_), Some(delta)) = (self.current, self.previous, self.delta) else {
            return None;
        };
        if self.current_failed {
            return Some(Verdict::UnchangedFail);
        }
        if self.previous_failed {
            return Some(Verdict::UnchangedPass);
        }
        if delta.abs() <= 2.0 * settings.value_precision * settings.confidence_interval {
            return Some(Verdict::UnchangedPass);
        }
        let pct_delta = self.pct_delta.unwrap_or(0.0);
        if settings.ignore_small && pct_delta.abs() < settings.min_percentage_change {
            return Some(Verdict::UnchangedPass);
        }
        if settings.ignore_small && delta.abs() < settings.min_absolute_change {
            return Some(Verdict::UnchangedPass);
        }
        if self.current_samples.len() >= settings.mwu_min_samples
            && self.previous_samples.len() >= settings.mwu_min_samples
            && mwu::same_distribution(
                &self.current_samples,
                &self.previous_samples,
                settings.confidence_level,
            )
        {
            return Some(Verdict::UnchangedPass);
        }

        let by_sign = |d: f64| {
            if d > 0.0 {
                Verdict::Regressed
            } else if d < 0.0 {
                Verdict::Improved
            } else {
                Verdict::UnchangedPass
            }
        };

        let verdict = match self.stddev {
            Some(sd) => {
                let bound = sd.value() * settings.confidence_interval;
                let mut significant = delta.abs() > bound;
                if let Stddev::Estimated { mean, .. } = sd {
                    significant = significant && (current - mean).abs() > bound;
                }
                if significant {
                    by_sign(delta)
                } else {
                    Verdict::UnchangedPass
                }
            }
            None => {
                if !settings.ignore_small || pct_delta.abs() >= settings.fallback_percentage_change {
                    by_sign(delta)
                } else {
                    Verdict::UnchangedPass
                }
            }
        };

        Some(if self.bigger_is_better {
            verdict.inverted()
        } else {
            verdict
        })
    }

    pub fn is_performance_change(&self, settings: &ComparisonSettings) -> bool {
        self.get_value_status(settings)
            .is_some_and(|v| v.is_change())
    }

    /// Worth showing: a status change, a failure, or a performance change.
    pub fn is_interesting(&self, settings: &ComparisonSettings) -> bool {
        self.get_test_status() != Verdict::UnchangedPass || self.is_performance_change(settings)
    }
}

/// Geometric mean shifted by the value precision so zeros are tolerated.
pub fn calc_geomean(values: &[f64]) -> Option<f64> {
    let shifted: Vec<f64> = values.iter().map(|v| v + MIN_VALUE_PRECISION).collect();
    stats::geometric_mean(&shifted).map(|g| g - MIN_VALUE_PRECISION)
}

/// Compares the geometric means of all passing pairs in `results`.
pub fn geomean_comparison(results: &[ComparisonResult]) -> Option<ComparisonResult> {
    let (current, previous): (Vec<f64>, Vec<f64>) = results
        .iter()
        .filter(|r| r.get_test_status() == Verdict::UnchangedPass)
        .filter_map(|r| Some((r.current?, r.previous?)))
        .unzip();
    let cur = calc_geomean(&current)?;
    let prev = calc_geomean(&previous)?;
    Some(ComparisonResult::new(Some(cur), Some(prev)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absmin_prefers_later_on_tie() {
        assert_eq!(absmin_diff(10.0, &[9.0, 11.0]), Some((-1.0, 11.0)));
        assert_eq!(absmin_diff(10.0, &[7.0, 9.5, 12.0]), Some((0.5, 9.5)));
        assert_eq!(absmin_diff(10.0, &[]), None);
    }

    #[test]
    fn from_samples_aggregates_with_min_or_max() {
        let r = ComparisonResult::from_samples(&[3.0, 2.0, 4.0], &[1.0, 2.5], Aggregation::Min, false);
        assert_eq!(r.current, Some(2.0));
        assert_eq!(r.previous, Some(2.5));
        assert!(matches!(r.stddev, Some(Stddev::Measured { .. })));
        assert_eq!(r.mad, Some(1.0));

        let r = ComparisonResult::from_samples(&[3.0, 2.0, 4.0], &[1.0], Aggregation::Min, true);
        assert_eq!(r.current, Some(4.0));
        assert_eq!(r.delta, Some(3.0));
    }

    #[test]
    fn zero_current_has_no_previous() {
        let r = ComparisonResult::from_samples(&[0.0], &[1.0], Aggregation::Min, false);
        assert_eq!(r.previous, None);
        assert_eq!(r.get_value_status(&ComparisonSettings::default()), None);
    }

    #[test]
    fn history_window_only_fills_missing_stddev() {
        let r = ComparisonResult::new(Some(110.0), Some(100.0)).with_history_window(&[100.0, 102.0, 98.0]);
        assert!(matches!(r.stddev, Some(Stddev::Estimated { .. })));
        let r = ComparisonResult::new(Some(110.0), Some(100.0))
            .with_stddev(1.0)
            .with_history_window(&[100.0, 102.0]);
        assert_eq!(r.stddev, Some(Stddev::Measured { value: 1.0 }));
    }

    #[test]
    fn geomean_of_passing_results() {
        let results = vec![
            ComparisonResult::new(Some(4.0), Some(1.0)),
            ComparisonResult::new(Some(1.0), Some(4.0)),
            ComparisonResult::new(Some(100.0), Some(1.0)).with_failures(true, false),
        ];
        let g = geomean_comparison(&results).unwrap();
        let cur = g.current.unwrap();
        assert!((cur - 2.0).abs() < 1e-3, "{cur}");
        assert!((g.previous.unwrap() - 2.0).abs() < 1e-3);
    }
}
