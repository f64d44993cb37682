//! Request-level calculations over one `ClassSnapshot`.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::aggregate::{
    assessment_stats as stats_for, AssessmentStats, CategoryAccumulator, CategoryAggregate,
};
use super::combined::{average_and_median, combine_final_marks, CombinedCell};
use super::error::CalcError;
use super::filter::SummaryFilters;
use super::final_mark::{collect_entries, final_mark};
use super::model::{Assessment, Category, ClassSnapshot, MarkSet, Student};
use super::rounding::round_off_1_decimal;
use super::settings::{CalcConfigStore, EffectiveSettings};
use super::validity::{is_valid_kid, StudentScope};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSetInfo {
    pub id: String,
    pub code: String,
    pub description: String,
    pub sort_order: i64,
    pub weight: f64,
    pub deleted: bool,
}

impl From<&MarkSet> for MarkSetInfo {
    fn from(ms: &MarkSet) -> Self {
        Self {
            id: ms.id.clone(),
            code: ms.code.clone(),
            description: ms.description.clone(),
            sort_order: ms.sort_order,
            weight: ms.weight,
            deleted: ms.deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFinal {
    pub student_id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
    pub valid: bool,
    pub final_mark: Option<f64>,
    pub no_mark_count: usize,
    pub zero_count: usize,
    pub scored_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryModel {
    pub class: ClassInfo,
    pub mark_set: MarkSetInfo,
    pub settings_applied: EffectiveSettings,
    pub filters: SummaryFilters,
    pub student_scope: StudentScope,
    pub categories: Vec<Category>,
    pub assessments: Vec<Assessment>,
    pub per_assessment: Vec<AssessmentStats>,
    pub per_category: Vec<CategoryAggregate>,
    pub per_student: Vec<StudentFinal>,
}

/// Everything one mark set contributes, before scope narrowing.
struct MarkSetRun<'a> {
    mark_set: &'a MarkSet,
    settings: EffectiveSettings,
    filters: SummaryFilters,
    selected: Vec<&'a Assessment>,
    per_assessment: Vec<AssessmentStats>,
    per_category: Vec<CategoryAggregate>,
    students: Vec<StudentFinal>,
}

fn run_mark_set<'a>(
    snapshot: &'a ClassSnapshot,
    mark_set: &'a MarkSet,
    filters: &SummaryFilters,
    config: &CalcConfigStore,
) -> MarkSetRun<'a> {
    let settings = config.resolve(mark_set);
    let filters = filters.applied(settings.category_filter_ignored);
    let selected = filters.select(&mark_set.assessments);

    let valid_ids: HashSet<&str> = snapshot
        .students()
        .iter()
        .filter(|s| valid_for(s, mark_set))
        .map(|s| s.id.as_str())
        .collect();

    let per_assessment = selected
        .iter()
        .map(|a| {
            stats_for(
                a,
                snapshot
                    .students()
                    .iter()
                    .filter(|s| valid_ids.contains(s.id.as_str()))
                    .filter_map(|s| snapshot.score(&a.id, &s.id)),
            )
        })
        .collect();

    let mut categories = CategoryAccumulator::new(selected.iter().copied());
    let mut students = Vec::with_capacity(snapshot.students().len());
    for s in snapshot.students() {
        let valid = valid_ids.contains(s.id.as_str());
        let walked = collect_entries(
            selected.iter().copied(),
            |a| snapshot.score(&a.id, &s.id),
            settings.roff_applied,
        );
        let counts = walked.counts;
        let final_value = if valid {
            categories.add_student(&walked.stats);
            final_mark(&walked.graded, &mark_set.categories, &settings).map(round_off_1_decimal)
        } else {
            None
        };
        students.push(StudentFinal {
            student_id: s.id.clone(),
            display_name: s.display_name.clone(),
            sort_order: s.sort_order,
            active: s.active,
            valid,
            final_mark: final_value,
            no_mark_count: counts.no_mark,
            zero_count: counts.zero,
            scored_count: counts.scored,
        });
    }

    MarkSetRun {
        mark_set,
        per_category: categories.finish(&mark_set.categories),
        settings,
        filters,
        selected,
        per_assessment,
        students,
    }
}

fn valid_for(s: &Student, ms: &MarkSet) -> bool {
    is_valid_kid(s.active, &s.mark_set_mask, ms.sort_order)
}

/// Per-assessment statistics for the selected assessments of one mark set.
pub fn assessment_stats(
    snapshot: &ClassSnapshot,
    mark_set_id: &str,
    filters: &SummaryFilters,
    config: &CalcConfigStore,
) -> Result<Vec<AssessmentStats>, CalcError> {
    let ms = snapshot.mark_set(mark_set_id)?;
    Ok(run_mark_set(snapshot, ms, filters, config).per_assessment)
}

pub fn mark_set_summary(
    snapshot: &ClassSnapshot,
    mark_set_id: &str,
    filters: &SummaryFilters,
    scope: StudentScope,
    config: &CalcConfigStore,
) -> Result<SummaryModel, CalcError> {
    let ms = snapshot.mark_set(mark_set_id)?;
    let run = run_mark_set(snapshot, ms, filters, config);
    debug!(
        mark_set = %ms.id,
        assessments = run.selected.len(),
        students = run.students.len(),
        calc_method = ?run.settings.calc_method_applied,
        "mark set summary"
    );

    let per_student = run
        .students
        .into_iter()
        .filter(|s| scope.includes(s.active, s.valid))
        .collect();

    Ok(SummaryModel {
        class: ClassInfo {
            id: snapshot.class_id.clone(),
            name: snapshot.class_name.clone(),
        },
        mark_set: MarkSetInfo::from(run.mark_set),
        settings_applied: run.settings,
        filters: run.filters,
        student_scope: scope,
        categories: run.mark_set.categories.clone(),
        assessments: run.selected.into_iter().cloned().collect(),
        per_assessment: run.per_assessment,
        per_category: run.per_category,
        per_student,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedMarkSet {
    #[serde(flatten)]
    pub info: MarkSetInfo,
    pub settings_applied: EffectiveSettings,
    pub final_mark_count: usize,
    pub class_average: Option<f64>,
    pub class_median: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedRow {
    pub student_id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
    pub combined_final: Option<f64>,
    pub per_mark_set: Vec<CombinedCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedSettingsApplied {
    pub combine_method: &'static str,
    pub fallback_used_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedKpis {
    pub class_average: Option<f64>,
    pub class_median: Option<f64>,
    pub student_count: usize,
    pub final_mark_count: usize,
    pub no_combined_final_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedSummary {
    pub class: ClassInfo,
    pub filters: SummaryFilters,
    pub student_scope: StudentScope,
    pub settings_applied: CombinedSettingsApplied,
    pub mark_sets: Vec<CombinedMarkSet>,
    pub kpis: CombinedKpis,
    pub rows: Vec<CombinedRow>,
}

/// Resolves requested ids in mark-set sort order, dropping repeats.
fn select_mark_sets<'a>(
    snapshot: &'a ClassSnapshot,
    mark_set_ids: &[String],
) -> Result<Vec<&'a MarkSet>, CalcError> {
    if mark_set_ids.is_empty() {
        return Err(CalcError::bad_params("markSetIds must not be empty"));
    }
    let mut out: Vec<&MarkSet> = Vec::new();
    for id in mark_set_ids {
        let ms = snapshot.mark_set(id)?;
        if ms.deleted {
            return Err(CalcError::bad_params_with(
                "mark set is deleted",
                json!({ "markSetId": ms.id }),
            ));
        }
        if !out.iter().any(|m| m.id == ms.id) {
            out.push(ms);
        }
    }
    out.sort_by_key(|m| m.sort_order);
    Ok(out)
}

/// Weighted combination of several mark sets' final marks.
pub fn combined_summary(
    snapshot: &ClassSnapshot,
    mark_set_ids: &[String],
    filters: &SummaryFilters,
    scope: StudentScope,
    config: &CalcConfigStore,
) -> Result<CombinedSummary, CalcError> {
    let mark_sets = select_mark_sets(snapshot, mark_set_ids)?;
    let runs: Vec<MarkSetRun> = mark_sets
        .iter()
        .map(|&ms| run_mark_set(snapshot, ms, filters, config))
        .collect();

    let mut fallback_used_count = 0usize;
    let mut rows = Vec::new();
    for (i, s) in snapshot.students().iter().enumerate() {
        let cells: Vec<CombinedCell> = runs
            .iter()
            .map(|run| {
                let st = &run.students[i];
                CombinedCell {
                    mark_set_id: run.mark_set.id.clone(),
                    code: run.mark_set.code.clone(),
                    weight: run.mark_set.weight,
                    valid: st.valid,
                    final_mark: st.final_mark,
                }
            })
            .collect();
        let valid_anywhere = cells.iter().any(|c| c.valid);
        if !scope.includes(s.active, valid_anywhere) {
            continue;
        }
        let combined = combine_final_marks(&cells);
        fallback_used_count += combined.fallbacks;
        rows.push(CombinedRow {
            student_id: s.id.clone(),
            display_name: s.display_name.clone(),
            sort_order: s.sort_order,
            active: s.active,
            combined_final: combined.value,
            per_mark_set: cells,
        });
    }

    let per_mark_set = runs
        .into_iter()
        .enumerate()
        .map(|(j, run)| {
            let finals: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.per_mark_set[j].final_mark)
                .collect();
            let (class_average, class_median) = average_and_median(&finals);
            CombinedMarkSet {
                info: MarkSetInfo::from(run.mark_set),
                settings_applied: run.settings,
                final_mark_count: finals.len(),
                class_average,
                class_median,
            }
        })
        .collect();

    let combined_finals: Vec<f64> = rows.iter().filter_map(|r| r.combined_final).collect();
    let (class_average, class_median) = average_and_median(&combined_finals);
    let kpis = CombinedKpis {
        class_average,
        class_median,
        student_count: rows.len(),
        final_mark_count: combined_finals.len(),
        no_combined_final_count: rows.len() - combined_finals.len(),
    };
    debug!(
        mark_sets = mark_sets.len(),
        rows = kpis.student_count,
        fallback_used_count,
        "combined summary"
    );

    Ok(CombinedSummary {
        class: ClassInfo {
            id: snapshot.class_id.clone(),
            name: snapshot.class_name.clone(),
        },
        filters: filters.clone(),
        student_scope: scope,
        settings_applied: CombinedSettingsApplied {
            combine_method: "weighted_markset",
            fallback_used_count,
        },
        mark_sets: per_mark_set,
        kpis,
        rows,
    })
}
