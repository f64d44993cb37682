use serde::Serialize;

use super::aggregate::compute_median;
use super::rounding::round_off_1_decimal;

/// One student's standing in one selected mark set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedCell {
    pub mark_set_id: String,
    pub code: String,
    pub weight: f64,
    pub valid: bool,
    pub final_mark: Option<f64>,
}

impl CombinedCell {
    fn participates(&self) -> bool {
        self.valid && self.final_mark.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedMark {
    pub value: Option<f64>,
    /// Mark sets skipped for this student, plus one if the equal-weight
    /// fallback had to be used.
    pub fallbacks: usize,
}

/// Weighted mean of the participating mark sets' final marks. Sets where
/// the student is invalid or has no final mark leave both numerator and
/// denominator.
pub fn combine_final_marks(cells: &[CombinedCell]) -> CombinedMark {
    let mut fallbacks = 0usize;
    let mut weighted_sum = 0.0_f64;
    let mut weighted_denom = 0.0_f64;
    let mut equal_vals = Vec::new();

    for cell in cells {
        if !cell.participates() {
            fallbacks += 1;
            continue;
        }
        let Some(v) = cell.final_mark else {
            continue;
        };
        equal_vals.push(v);
        if cell.weight > 0.0 {
            weighted_sum += v * cell.weight;
            weighted_denom += cell.weight;
        }
    }

    let value = if equal_vals.is_empty() {
        None
    } else if weighted_denom > 0.0 {
        Some(round_off_1_decimal(weighted_sum / weighted_denom))
    } else {
        fallbacks += 1;
        Some(round_off_1_decimal(
            equal_vals.iter().sum::<f64>() / (equal_vals.len() as f64),
        ))
    };

    CombinedMark { value, fallbacks }
}

/// Rounded mean and median of a list of marks; `None` when empty.
pub fn average_and_median(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let avg = values.iter().sum::<f64>() / (values.len() as f64);
    (
        Some(round_off_1_decimal(avg)),
        Some(round_off_1_decimal(compute_median(values))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: &str, weight: f64, valid: bool, final_mark: Option<f64>) -> CombinedCell {
        CombinedCell {
            mark_set_id: id.into(),
            code: id.to_uppercase(),
            weight,
            valid,
            final_mark,
        }
    }

    #[test]
    fn invalid_set_is_excluded_not_zeroed() {
        let got = combine_final_marks(&[
            cell("m1", 50.0, true, Some(80.0)),
            cell("m2", 50.0, false, None),
        ]);
        assert_eq!(got.value, Some(80.0));
        assert_eq!(got.fallbacks, 1);
    }

    #[test]
    fn weighted_mean_over_participating_sets() {
        let got = combine_final_marks(&[
            cell("m1", 25.0, true, Some(60.0)),
            cell("m2", 75.0, true, Some(80.0)),
        ]);
        assert_eq!(got.value, Some(75.0));
        assert_eq!(got.fallbacks, 0);
    }

    #[test]
    fn null_final_is_skipped() {
        let got = combine_final_marks(&[
            cell("m1", 1.0, true, None),
            cell("m2", 1.0, true, Some(70.0)),
        ]);
        assert_eq!(got.value, Some(70.0));
        assert_eq!(got.fallbacks, 1);
    }

    #[test]
    fn zero_weights_fall_back_to_equal_mean() {
        let got = combine_final_marks(&[
            cell("m1", 0.0, true, Some(60.0)),
            cell("m2", 0.0, true, Some(80.0)),
        ]);
        assert_eq!(got.value, Some(70.0));
        assert_eq!(got.fallbacks, 1);
    }

    #[test]
    fn nothing_participating_is_null() {
        let got = combine_final_marks(&[cell("m1", 1.0, false, Some(90.0))]);
        assert_eq!(got.value, None);
    }

    #[test]
    fn average_and_median_of_marks() {
        assert_eq!(average_and_median(&[]), (None, None));
        assert_eq!(
            average_and_median(&[70.0, 80.0, 95.0]),
            (Some(81.7), Some(80.0))
        );
    }
}
