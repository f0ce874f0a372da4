use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{LabelParams, LogSettings};

// ---------------------------------------------------------------------------
// Bounds / RowFilter – the serializable predicate handed to generators
// ---------------------------------------------------------------------------

/// Inclusive numeric range; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bounds {
    /// Whether `value` lies inside the range. `NaN` never does unless unbounded.
    pub fn contains(&self, value: f64) -> bool {
        if self.lower.is_none() && self.upper.is_none() {
            return true;
        }
        self.lower.is_none_or(|lo| value >= lo) && self.upper.is_none_or(|hi| value <= hi)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => write!(f, "BETWEEN {lo} AND {hi}"),
            (Some(lo), None) => write!(f, ">= {lo}"),
            (None, Some(hi)) => write!(f, "<= {hi}"),
            (None, None) => write!(f, "IS ANY"),
        }
    }
}

/// Row-inclusion predicate: column name → inclusive range.
///
/// An empty map keeps every row.
pub type RowFilter = BTreeMap<String, Bounds>;

/// Whether a row passes every range in `filter`.
///
/// `value_of` returns the row's value for a column, or `None` if the column is absent.
pub fn row_matches(filter: &RowFilter, mut value_of: impl FnMut(&str) -> Option<f64>) -> bool {
    filter.iter().all(|(col, bounds)| match value_of(col) {
        Some(v) => bounds.contains(v),
        None => false,
    })
}

// ---------------------------------------------------------------------------
// LabelFilter – outlier exclusion derived from label parameters
// ---------------------------------------------------------------------------

/// Outlier exclusion on the label column.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelFilter {
    pub label: String,
    /// `None` when exclusion is inactive.
    pub bounds: Option<Bounds>,
}

impl LabelFilter {
    /// Decide whether outlier exclusion applies and resolve its bounds.
    ///
    /// Active only when exclusion and tails are both configured, the tail
    /// proportion is in `(0, 0.5)`, and at least one threshold is set.
    pub fn from_params(params: &LabelParams, log_settings: &LogSettings) -> Self {
        let lower = params.lower_outlier_threshold.filter(|v| !v.is_nan());
        let upper = params.upper_outlier_threshold.filter(|v| !v.is_nan());

        let active = params.excl_outliers
            && params.outlier_tails
            && params.outlier_tail_proportion > 0.0
            && params.outlier_tail_proportion < 0.5
            && (lower.is_some() || upper.is_some());

        let bounds = active.then_some(Bounds { lower, upper });

        if let Some(b) = &bounds {
            log::log!(
                log_settings.level(),
                "TRAIN: CONDITION ROBUST TO OUTLIER LABELS: {} {}",
                params.var,
                b
            );
        }

        LabelFilter {
            label: params.var.clone(),
            bounds,
        }
    }

    pub fn is_active(&self) -> bool {
        self.bounds.is_some()
    }

    /// Human-readable condition, e.g. `BETWEEN 10 AND 90`.
    pub fn condition(&self) -> Option<String> {
        self.bounds.map(|b| b.to_string())
    }

    /// The predicate handed to batch generators.
    pub fn to_row_filter(&self) -> RowFilter {
        self.bounds
            .map(|b| RowFilter::from([(self.label.clone(), b)]))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(lower: Option<f64>, upper: Option<f64>, tail: f64, excl: bool) -> LabelParams {
        LabelParams {
            var: "label".to_string(),
            excl_outliers: excl,
            outlier_tails: true,
            outlier_tail_proportion: tail,
            lower_outlier_threshold: lower,
            upper_outlier_threshold: upper,
        }
    }

    fn build(p: &LabelParams) -> LabelFilter {
        LabelFilter::from_params(p, &LogSettings::default())
    }

    #[test]
    fn lower_bound_only_renders_greater_equal() {
        let f = build(&params(Some(10.0), None, 0.2, true));
        assert_eq!(f.condition().as_deref(), Some(">= 10"));
        let rf = f.to_row_filter();
        assert_eq!(rf.len(), 1);
        assert_eq!(rf["label"], Bounds { lower: Some(10.0), upper: None });
        assert!(rf["label"].contains(10.0));
        assert!(!rf["label"].contains(9.99));
    }

    #[test]
    fn both_bounds_render_between() {
        let f = build(&params(Some(10.0), Some(90.0), 0.2, true));
        assert_eq!(f.condition().as_deref(), Some("BETWEEN 10 AND 90"));
        let b = f.to_row_filter()["label"];
        assert!(b.contains(10.0) && b.contains(90.0) && b.contains(50.0));
        assert!(!b.contains(90.5));
    }

    #[test]
    fn upper_bound_only_renders_less_equal() {
        let f = build(&params(None, Some(90.0), 0.2, true));
        assert_eq!(f.condition().as_deref(), Some("<= 90"));
    }

    #[test]
    fn disabled_exclusion_yields_empty_filter() {
        for (lo, hi) in [(Some(1.0), Some(2.0)), (Some(1.0), None), (None, None)] {
            let f = build(&params(lo, hi, 0.2, false));
            assert!(!f.is_active());
            assert!(f.to_row_filter().is_empty());
        }
    }

    #[test]
    fn tail_proportion_at_or_above_half_disables_filter() {
        for tail in [0.5, 0.6, 0.0] {
            let f = build(&params(Some(10.0), Some(90.0), tail, true));
            assert!(f.to_row_filter().is_empty(), "tail={tail}");
        }
    }

    #[test]
    fn no_thresholds_means_inactive() {
        let f = build(&params(None, None, 0.2, true));
        assert!(!f.is_active());
        assert!(f.condition().is_none());
    }

    #[test]
    fn nan_fails_active_bounds_and_missing_columns_fail() {
        let rf = build(&params(Some(0.0), None, 0.1, true)).to_row_filter();
        assert!(!row_matches(&rf, |_| Some(f64::NAN)));
        assert!(!row_matches(&rf, |_| None));
        assert!(row_matches(&rf, |_| Some(3.0)));
        assert!(row_matches(&RowFilter::new(), |_| None));
    }
}
