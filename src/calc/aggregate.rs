use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use super::final_mark::{category_percents, GradedEntry};
use super::model::{category_key, Assessment, Category, UNCATEGORIZED};
use super::rounding::round_off_1_decimal;
use super::score::{ScoreStatus, StateCounts};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssessmentAverage {
    pub avg_raw: f64,
    pub avg_percent: f64,
    pub scored_count: usize,
    pub zero_count: usize,
    pub no_mark_count: usize,
}

pub fn assessment_average<I>(scores: I, out_of: f64) -> AssessmentAverage
where
    I: IntoIterator<Item = ScoreStatus>,
{
    let mut counts = StateCounts::default();
    let mut denom: usize = 0;
    let mut sum_raw: f64 = 0.0;

    for s in scores {
        counts.record(s);
        if let Some(raw) = s.raw() {
            denom += 1;
            sum_raw += raw;
        }
    }

    let avg_raw = if denom > 0 {
        sum_raw / (denom as f64)
    } else {
        0.0
    };
    let avg_percent = if out_of > 0.0 {
        100.0 * avg_raw / out_of
    } else {
        0.0
    };

    AssessmentAverage {
        avg_raw,
        avg_percent,
        scored_count: counts.scored,
        zero_count: counts.zero,
        no_mark_count: counts.no_mark,
    }
}

pub fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentStats {
    pub assessment_id: String,
    pub idx: i64,
    pub date: Option<String>,
    pub category_name: Option<String>,
    pub title: String,
    pub weight: f64,
    pub out_of: f64,
    pub avg_raw: f64,
    pub avg_percent: f64,
    pub median_percent: f64,
    pub scored_count: usize,
    pub zero_count: usize,
    pub no_mark_count: usize,
}

/// Stats for one assessment from the score rows of valid students. Students
/// without a row are not counted in any state.
pub fn assessment_stats<I>(a: &Assessment, rows: I) -> AssessmentStats
where
    I: IntoIterator<Item = ScoreStatus>,
{
    let rows: Vec<ScoreStatus> = rows.into_iter().collect();
    let percents: Vec<f64> = rows.iter().filter_map(|s| s.percent(a.out_of)).collect();
    let avg = assessment_average(rows, a.out_of);
    AssessmentStats {
        assessment_id: a.id.clone(),
        idx: a.idx,
        date: a.date.clone(),
        category_name: a.category_name.clone(),
        title: a.title.clone(),
        weight: a.weight,
        out_of: a.out_of,
        avg_raw: round_off_1_decimal(avg.avg_raw),
        avg_percent: round_off_1_decimal(avg.avg_percent),
        median_percent: round_off_1_decimal(compute_median(&percents)),
        scored_count: avg.scored_count,
        zero_count: avg.zero_count,
        no_mark_count: avg.no_mark_count,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAggregate {
    pub name: String,
    pub weight: f64,
    pub sort_order: Option<i64>,
    pub class_avg: f64,
    pub student_count: usize,
    pub assessment_count: usize,
}

/// Accumulates each valid student's category percents into class averages.
#[derive(Debug, Default)]
pub struct CategoryAccumulator {
    // key -> (sum of student category percents, students)
    totals: HashMap<String, (f64, usize)>,
    assessment_counts: HashMap<String, (String, usize)>,
}

impl CategoryAccumulator {
    pub fn new<'a, I>(selected: I) -> Self
    where
        I: IntoIterator<Item = &'a Assessment>,
    {
        let mut acc = CategoryAccumulator::default();
        for a in selected {
            let display = display_name(a.category_name.as_deref());
            acc.assessment_counts
                .entry(a.category_key())
                .or_insert((display, 0))
                .1 += 1;
        }
        acc
    }

    pub fn add_student(&mut self, entries: &[GradedEntry]) {
        for (key, percent) in category_percents(entries) {
            let t = self.totals.entry(key).or_insert((0.0, 0));
            t.0 += percent;
            t.1 += 1;
        }
    }

    /// Per-category rows, ordered by category sort order; categories the
    /// mark set does not define sort last by name.
    pub fn finish(self, categories: &[Category]) -> Vec<CategoryAggregate> {
        let mut out: Vec<CategoryAggregate> = self
            .assessment_counts
            .into_iter()
            .map(|(key, (display, assessment_count))| {
                let def = categories
                    .iter()
                    .find(|c| category_key(Some(c.name.as_str())) == key);
                let (sum, count) = self
                    .totals
                    .get(&key)
                    .copied()
                    .unwrap_or((0.0, 0));
                CategoryAggregate {
                    name: def.map(|c| c.name.clone()).unwrap_or(display),
                    weight: def.map(|c| c.weight).unwrap_or(0.0),
                    sort_order: def.map(|c| c.sort_order),
                    class_avg: if count > 0 {
                        round_off_1_decimal(sum / (count as f64))
                    } else {
                        0.0
                    },
                    student_count: count,
                    assessment_count,
                }
            })
            .collect();
        out.sort_by(|a, b| {
            let a_sort = a.sort_order.unwrap_or(i64::MAX);
            let b_sort = b.sort_order.unwrap_or(i64::MAX);
            a_sort.cmp(&b_sort).then_with(|| a.name.cmp(&b.name))
        });
        out
    }
}

fn display_name(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => UNCATEGORIZED.to_string(),
    }
}
