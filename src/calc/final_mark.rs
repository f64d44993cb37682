//! Per-student final marks: `calc_method` x `weight_method` dispatch.
//!
//! Every function here works on full precision values. Callers round the
//! result once at the output boundary.

use std::cmp::Ordering;

use super::model::{Assessment, CalcMethod, Category, WeightMethod};
use super::rounding::pre_round;
use super::score::{ScoreStatus, StateCounts};
use super::settings::EffectiveSettings;

const BONUS_CATEGORY: &str = "bonus";
const EPS: f64 = 1e-9;

/// One counted score of one student, ready for aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedEntry {
    /// Lower-cased category key.
    pub category: String,
    pub percent: f64,
    /// Declared assessment weight (always > 0).
    pub weight: f64,
}

/// One student's walk over the selected assessments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentEntries {
    /// Entries that take part in the final mark.
    pub graded: Vec<GradedEntry>,
    /// Every counted entry that is not deleted-like, for category
    /// statistics. Weight-0 entries appear here at weight 1.
    pub stats: Vec<GradedEntry>,
    /// State counts over every selected assessment (a missing score row
    /// counts as no mark).
    pub counts: StateCounts,
}

pub fn collect_entries<'a, I, F>(selected: I, mut score_of: F, roff: bool) -> StudentEntries
where
    I: IntoIterator<Item = &'a Assessment>,
    F: FnMut(&Assessment) -> Option<ScoreStatus>,
{
    let mut out = StudentEntries::default();
    for a in selected {
        let state = score_of(a).unwrap_or(ScoreStatus::NoMark);
        out.counts.record(state);
        if a.deleted_like {
            continue;
        }
        let Some(percent) = state.percent(a.out_of) else {
            continue;
        };
        let entry = GradedEntry {
            category: a.category_key(),
            percent: pre_round(percent, roff),
            weight: if a.weight > 0.0 { a.weight } else { 1.0 },
        };
        if a.counts_toward_final() {
            out.graded.push(entry.clone());
        }
        out.stats.push(entry);
    }
    out
}

fn category_weight(categories: &[Category], key: &str) -> f64 {
    categories
        .iter()
        .find(|c| c.name.trim().to_ascii_lowercase() == key)
        .map(|c| c.weight)
        .unwrap_or(0.0)
}

/// Groups entries by category, in order of first appearance.
pub fn group_by_category(entries: &[GradedEntry]) -> Vec<(String, Vec<&GradedEntry>)> {
    let mut groups: Vec<(String, Vec<&GradedEntry>)> = Vec::new();
    for e in entries {
        match groups.iter_mut().find(|(k, _)| *k == e.category) {
            Some((_, list)) => list.push(e),
            None => groups.push((e.category.clone(), vec![e])),
        }
    }
    groups
}

fn weighted_mean<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (value, weight) in pairs {
        sum += value * weight;
        denom += weight;
    }
    if denom > 0.0 {
        Some(sum / denom)
    } else {
        None
    }
}

/// Entry-weighted percent of each category the student has entries in.
pub fn category_percents(entries: &[GradedEntry]) -> Vec<(String, f64)> {
    group_by_category(entries)
        .into_iter()
        .filter_map(|(key, list)| {
            weighted_mean(list.iter().map(|e| (e.percent, e.weight))).map(|p| (key, p))
        })
        .collect()
}

/// Combines per-category values by category weight. Categories with no
/// weight drop out of the denominator; if none carry weight the plain mean
/// of the category values is used. With `bonus_add_on`, a `BONUS` category
/// adds `value * weight / 100` on top instead of joining the mean.
fn combine_categories(
    values: &[(String, f64)],
    categories: &[Category],
    bonus_add_on: bool,
) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    let mut bonus = 0.0_f64;
    for (key, value) in values {
        let w = category_weight(categories, key);
        if w <= 0.0 {
            continue;
        }
        if bonus_add_on && key == BONUS_CATEGORY {
            bonus += value * w / 100.0;
            continue;
        }
        sum += value * w;
        denom += w;
    }
    if denom > 0.0 {
        Some(sum / denom + bonus)
    } else {
        let n = values.len() as f64;
        Some(values.iter().map(|(_, v)| v).sum::<f64>() / n)
    }
}

/// Weighted median: the first sorted value whose cumulative weight passes
/// half the total; landing exactly on half averages it with the next.
pub fn weighted_median(mut pairs: Vec<(f64, f64)>) -> Option<f64> {
    pairs.retain(|(_, w)| *w > 0.0);
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    let half = pairs.iter().map(|(_, w)| w).sum::<f64>() / 2.0;
    let mut cum = 0.0_f64;
    for (i, (value, weight)) in pairs.iter().enumerate() {
        cum += weight;
        if (cum - half).abs() <= EPS {
            return Some(match pairs.get(i + 1) {
                Some((next, _)) => (value + next) / 2.0,
                None => *value,
            });
        }
        if cum > half {
            return Some(*value);
        }
    }
    pairs.last().map(|(v, _)| *v)
}

/// Representative value of the most frequent mode level. Frequency is the
/// summed weight per level; ties go to the higher level.
pub fn weighted_mode(pairs: &[(f64, f64)], settings: &EffectiveSettings) -> Option<f64> {
    let mut freq = vec![0.0_f64; settings.mode_active_levels];
    let mut any = false;
    for (percent, weight) in pairs {
        if *weight <= 0.0 {
            continue;
        }
        let level = settings.mode_level_of(*percent);
        freq[level] += weight;
        any = true;
    }
    if !any {
        return None;
    }
    let mut best = 0usize;
    let mut best_freq = 0.0_f64;
    for (level, f) in freq.iter().enumerate() {
        if *f > 0.0 && *f >= best_freq - EPS {
            best = level;
            best_freq = best_freq.max(*f);
        }
    }
    Some(settings.mode_level_value(best))
}

/// Weight used for an entry under the non-category methods.
fn entry_weight(method: WeightMethod, e: &GradedEntry) -> f64 {
    match method {
        WeightMethod::Equal => 1.0,
        WeightMethod::Entry | WeightMethod::Category => e.weight,
    }
}

/// Under category weighting, median and mode only look at entries from
/// weighted categories, unless the student has none there.
fn weighted_category_entries<'a>(
    entries: &'a [GradedEntry],
    categories: &[Category],
) -> Vec<&'a GradedEntry> {
    let weighted: Vec<&GradedEntry> = entries
        .iter()
        .filter(|e| category_weight(categories, &e.category) > 0.0)
        .collect();
    if weighted.is_empty() {
        entries.iter().collect()
    } else {
        weighted
    }
}

fn reduction_pairs(
    entries: &[GradedEntry],
    categories: &[Category],
    method: WeightMethod,
) -> Vec<(f64, f64)> {
    match method {
        WeightMethod::Category => weighted_category_entries(entries, categories)
            .into_iter()
            .map(|e| (e.percent, e.weight))
            .collect(),
        _ => entries
            .iter()
            .map(|e| (e.percent, entry_weight(method, e)))
            .collect(),
    }
}

/// Full-precision final mark, `None` when nothing participates.
pub fn final_mark(
    entries: &[GradedEntry],
    categories: &[Category],
    settings: &EffectiveSettings,
) -> Option<f64> {
    if entries.is_empty() {
        return None;
    }
    let weighting = settings.weight_method_applied;
    match settings.calc_method_applied {
        CalcMethod::Average => match weighting {
            WeightMethod::Category => {
                combine_categories(&category_percents(entries), categories, true)
            }
            _ => weighted_mean(entries.iter().map(|e| (e.percent, entry_weight(weighting, e)))),
        },
        CalcMethod::Median => weighted_median(reduction_pairs(entries, categories, weighting)),
        CalcMethod::Mode => weighted_mode(&reduction_pairs(entries, categories, weighting), settings),
        CalcMethod::BlendedMode => {
            let per_cat: Vec<(String, f64)> = group_by_category(entries)
                .into_iter()
                .filter_map(|(key, list)| {
                    let pairs: Vec<(f64, f64)> =
                        list.iter().map(|e| (e.percent, e.weight)).collect();
                    weighted_mode(&pairs, settings).map(|v| (key, v))
                })
                .collect();
            combine_categories(&per_cat, categories, false)
        }
        CalcMethod::BlendedMedian => {
            let per_cat: Vec<(String, f64)> = group_by_category(entries)
                .into_iter()
                .filter_map(|(key, list)| {
                    weighted_median(list.iter().map(|e| (e.percent, e.weight)).collect())
                        .map(|v| (key, v))
                })
                .collect();
            combine_categories(&per_cat, categories, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::model::{category_key, MarkSet};
    use crate::calc::settings::{CalcConfig, CalcConfigPatch, MODE_LEVEL_SLOTS};

    fn entry(cat: &str, percent: f64, weight: f64) -> GradedEntry {
        GradedEntry {
            category: category_key(Some(cat)),
            percent,
            weight,
        }
    }

    fn cat(name: &str, weight: f64, sort_order: i64) -> Category {
        Category {
            name: name.into(),
            weight,
            sort_order,
        }
    }

    fn settings(calc: CalcMethod, weight: WeightMethod) -> EffectiveSettings {
        settings_with(calc, weight, None)
    }

    fn settings_with(
        calc: CalcMethod,
        weight: WeightMethod,
        patch: Option<CalcConfigPatch>,
    ) -> EffectiveSettings {
        let ms = MarkSet {
            id: "m".into(),
            code: "M".into(),
            description: String::new(),
            sort_order: 0,
            weight: 1.0,
            deleted: false,
            is_default: false,
            weight_method: weight,
            calc_method: calc,
            categories: vec![],
            assessments: vec![],
        };
        EffectiveSettings::resolve(&CalcConfig::default(), patch.as_ref(), &ms)
    }

    #[test]
    fn entry_weighted_average() {
        let e = vec![entry("A", 80.0, 1.0), entry("A", 0.0, 1.0)];
        let s = settings(CalcMethod::Average, WeightMethod::Entry);
        assert_eq!(final_mark(&e, &[], &s), Some(40.0));

        let e = vec![entry("A", 100.0, 3.0), entry("A", 60.0, 1.0)];
        assert_eq!(final_mark(&e, &[], &s), Some(90.0));
    }

    #[test]
    fn equal_weighting_ignores_declared_weights() {
        let e = vec![entry("A", 100.0, 3.0), entry("A", 60.0, 1.0)];
        let s = settings(CalcMethod::Average, WeightMethod::Equal);
        assert_eq!(final_mark(&e, &[], &s), Some(80.0));
    }

    #[test]
    fn category_without_entries_drops_out_of_denominator() {
        let cats = vec![cat("A", 40.0, 0), cat("B", 60.0, 1)];
        let e = vec![entry("A", 70.0, 1.0), entry("A", 90.0, 1.0)];
        let s = settings(CalcMethod::Average, WeightMethod::Category);
        assert_eq!(final_mark(&e, &cats, &s), Some(80.0));
    }

    #[test]
    fn category_weighting_combines_category_percents() {
        let cats = vec![cat("A", 25.0, 0), cat("B", 75.0, 1)];
        let e = vec![entry("A", 40.0, 1.0), entry("B", 80.0, 1.0)];
        let s = settings(CalcMethod::Average, WeightMethod::Category);
        assert_eq!(final_mark(&e, &cats, &s), Some(70.0));
    }

    #[test]
    fn zero_weight_category_is_excluded_unless_nothing_else() {
        let cats = vec![cat("A", 100.0, 0), cat("B", 0.0, 1)];
        let s = settings(CalcMethod::Average, WeightMethod::Category);
        let e = vec![entry("A", 100.0, 1.0), entry("B", 50.0, 1.0)];
        assert_eq!(final_mark(&e, &cats, &s), Some(100.0));

        let only_b = vec![entry("B", 50.0, 1.0)];
        assert_eq!(final_mark(&only_b, &cats, &s), Some(50.0));
    }

    #[test]
    fn bonus_is_added_outside_the_denominator() {
        let cats = vec![cat("Main", 100.0, 0), cat("BONUS", 10.0, 1)];
        let s = settings(CalcMethod::Average, WeightMethod::Category);
        let e = vec![entry("Main", 50.0, 1.0), entry("BONUS", 100.0, 1.0)];
        assert_eq!(final_mark(&e, &cats, &s), Some(60.0));
        let e = vec![entry("Main", 50.0, 1.0), entry("BONUS", 80.0, 1.0)];
        assert_eq!(final_mark(&e, &cats, &s), Some(58.0));
    }

    #[test]
    fn bonus_is_a_plain_value_for_median() {
        let cats = vec![cat("A", 100.0, 0), cat("BONUS", 20.0, 1)];
        let s = settings(CalcMethod::Median, WeightMethod::Category);
        let e = vec![entry("A", 80.0, 1.0), entry("BONUS", 100.0, 1.0)];
        assert_eq!(final_mark(&e, &cats, &s), Some(90.0));
    }

    #[test]
    fn median_respects_weights() {
        assert_eq!(weighted_median(vec![(20.0, 9.0), (90.0, 1.0)]), Some(20.0));
        assert_eq!(weighted_median(vec![(20.0, 1.0), (90.0, 1.0)]), Some(55.0));
        assert_eq!(
            weighted_median(vec![(30.0, 1.0), (10.0, 1.0), (20.0, 1.0)]),
            Some(20.0)
        );
        assert_eq!(weighted_median(vec![]), None);
    }

    #[test]
    fn median_entry_vs_equal() {
        let e = vec![entry("A", 20.0, 9.0), entry("A", 90.0, 1.0)];
        assert_eq!(
            final_mark(&e, &[], &settings(CalcMethod::Median, WeightMethod::Entry)),
            Some(20.0)
        );
        assert_eq!(
            final_mark(&e, &[], &settings(CalcMethod::Median, WeightMethod::Equal)),
            Some(55.0)
        );
    }

    #[test]
    fn mode_uses_band_midrange_and_prefers_higher_on_tie() {
        let s = settings(CalcMethod::Mode, WeightMethod::Entry);
        assert_eq!(final_mark(&[entry("A", 62.0, 1.0)], &[], &s), Some(65.0));
        let tie = vec![entry("A", 55.0, 1.0), entry("A", 65.0, 1.0)];
        assert_eq!(final_mark(&tie, &[], &s), Some(65.0));
        let majority = vec![
            entry("A", 55.0, 1.0),
            entry("A", 52.0, 1.0),
            entry("A", 65.0, 1.0),
        ];
        assert_eq!(final_mark(&majority, &[], &s), Some(55.0));
    }

    #[test]
    fn mode_single_level_returns_its_value() {
        let patch = CalcConfigPatch {
            mode_active_levels: Some(1),
            mode_level_vals: Some(vec![0.0; MODE_LEVEL_SLOTS]),
            ..Default::default()
        };
        let s = settings_with(CalcMethod::Mode, WeightMethod::Category, Some(patch));
        let cats = vec![cat("A", 100.0, 0)];
        let e = vec![entry("A", 12.0, 1.0), entry("A", 97.0, 2.0)];
        assert_eq!(final_mark(&e, &cats, &s), Some(50.0));
    }

    #[test]
    fn blended_median_combines_category_medians() {
        let cats = vec![cat("A", 50.0, 0), cat("B", 50.0, 1)];
        let s = settings(CalcMethod::BlendedMedian, WeightMethod::Entry);
        assert_eq!(s.weight_method_applied, WeightMethod::Category);
        let e = vec![entry("A", 40.0, 1.0), entry("B", 80.0, 1.0)];
        assert_eq!(final_mark(&e, &cats, &s), Some(60.0));
    }

    #[test]
    fn blended_mode_combines_category_modes() {
        let cats = vec![cat("A", 25.0, 0), cat("B", 75.0, 1)];
        let s = settings(CalcMethod::BlendedMode, WeightMethod::Category);
        let e = vec![
            entry("A", 52.0, 1.0),
            entry("A", 58.0, 1.0),
            entry("B", 85.0, 1.0),
        ];
        // A -> level 1 (55), B -> level 4 (90): 0.25 * 55 + 0.75 * 90.
        let got = final_mark(&e, &cats, &s).unwrap();
        assert!((got - 81.25).abs() < 1e-9);
    }

    #[test]
    fn nothing_participating_is_none() {
        for calc in [
            CalcMethod::Average,
            CalcMethod::Median,
            CalcMethod::Mode,
            CalcMethod::BlendedMode,
            CalcMethod::BlendedMedian,
        ] {
            for weight in [WeightMethod::Entry, WeightMethod::Category, WeightMethod::Equal] {
                assert_eq!(final_mark(&[], &[], &settings(calc, weight)), None);
            }
        }
    }

    #[test]
    fn collect_entries_skips_weight_zero_and_no_marks() {
        let mk = |id: &str, weight: f64| Assessment {
            id: id.into(),
            idx: 0,
            date: None,
            category_name: Some("A".into()),
            title: id.into(),
            term: None,
            legacy_type: None,
            weight,
            out_of: 10.0,
            deleted_like: false,
        };
        let list = vec![mk("a1", 1.0), mk("a2", 1.0), mk("a3", 1.0), mk("w0", 0.0)];
        let walked = collect_entries(
            list.iter(),
            |a| match a.id.as_str() {
                "a1" => Some(ScoreStatus::Scored(8.0)),
                "a2" => Some(ScoreStatus::Zero),
                "w0" => Some(ScoreStatus::Scored(10.0)),
                _ => None,
            },
            true,
        );
        assert_eq!(walked.graded.len(), 2);
        let c = walked.counts;
        assert_eq!((c.scored, c.zero, c.no_mark), (2, 1, 1));
        let s = settings(CalcMethod::Average, WeightMethod::Entry);
        assert_eq!(final_mark(&walked.graded, &[], &s), Some(40.0));
    }

    #[test]
    fn weight_zero_entries_still_feed_category_stats() {
        let mk = |id: &str, cat: &str, weight: f64, deleted_like: bool| Assessment {
            id: id.into(),
            idx: 0,
            date: None,
            category_name: Some(cat.into()),
            title: id.into(),
            term: None,
            legacy_type: None,
            weight,
            out_of: 10.0,
            deleted_like,
        };
        let list = vec![
            mk("t", "Tests", 1.0, false),
            mk("p", "Practice", 0.0, false),
            mk("d", "Gone", 2.0, true),
        ];
        let walked = collect_entries(list.iter(), |_| Some(ScoreStatus::Scored(9.0)), true);
        let graded: Vec<&str> = walked.graded.iter().map(|e| e.category.as_str()).collect();
        assert_eq!(graded, vec!["tests"]);
        let stats: Vec<(&str, f64)> = walked
            .stats
            .iter()
            .map(|e| (e.category.as_str(), e.weight))
            .collect();
        assert_eq!(stats, vec![("tests", 1.0), ("practice", 1.0)]);
        assert_eq!(walked.counts.scored, 3);
    }

    #[test]
    fn roff_rounds_each_entry_first() {
        let a = Assessment {
            id: "a".into(),
            idx: 0,
            date: None,
            category_name: None,
            title: "a".into(),
            term: None,
            legacy_type: None,
            weight: 1.0,
            out_of: 100.0,
            deleted_like: false,
        };
        let rounded =
            collect_entries(std::iter::once(&a), |_| Some(ScoreStatus::Scored(59.96)), true);
        let raw =
            collect_entries(std::iter::once(&a), |_| Some(ScoreStatus::Scored(59.96)), false);
        let s = settings(CalcMethod::Mode, WeightMethod::Entry);
        assert_eq!(final_mark(&rounded.graded, &[], &s), Some(65.0));
        assert_eq!(final_mark(&raw.graded, &[], &s), Some(55.0));
    }
}
