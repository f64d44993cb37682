use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::CalcError;
use super::score::ScoreStatus;

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum WeightMethod {
    Entry,
    Category,
    Equal,
}

impl From<i64> for WeightMethod {
    fn from(v: i64) -> Self {
        match v.clamp(0, 2) {
            0 => WeightMethod::Entry,
            1 => WeightMethod::Category,
            _ => WeightMethod::Equal,
        }
    }
}

impl From<WeightMethod> for i64 {
    fn from(m: WeightMethod) -> i64 {
        match m {
            WeightMethod::Entry => 0,
            WeightMethod::Category => 1,
            WeightMethod::Equal => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum CalcMethod {
    Average,
    Median,
    Mode,
    BlendedMode,
    BlendedMedian,
}

impl CalcMethod {
    pub fn is_blended(self) -> bool {
        matches!(self, CalcMethod::BlendedMode | CalcMethod::BlendedMedian)
    }
}

impl From<i64> for CalcMethod {
    fn from(v: i64) -> Self {
        match v.clamp(0, 4) {
            0 => CalcMethod::Average,
            1 => CalcMethod::Median,
            2 => CalcMethod::Mode,
            3 => CalcMethod::BlendedMode,
            _ => CalcMethod::BlendedMedian,
        }
    }
}

impl From<CalcMethod> for i64 {
    fn from(m: CalcMethod) -> i64 {
        match m {
            CalcMethod::Average => 0,
            CalcMethod::Median => 1,
            CalcMethod::Mode => 2,
            CalcMethod::BlendedMode => 3,
            CalcMethod::BlendedMedian => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
    /// Membership bits by mark-set sort order, or `TBA`.
    pub mark_set_mask: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    pub weight: f64,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub idx: i64,
    pub date: Option<String>,
    pub category_name: Option<String>,
    pub title: String,
    pub term: Option<i64>,
    pub legacy_type: Option<i64>,
    pub weight: f64,
    pub out_of: f64,
    #[serde(default)]
    pub deleted_like: bool,
}

impl Assessment {
    /// Weight-zero and deleted-like entries are reported but never graded.
    pub fn counts_toward_final(&self) -> bool {
        self.weight > 0.0 && !self.deleted_like
    }

    pub fn category_key(&self) -> String {
        category_key(self.category_name.as_deref())
    }
}

/// Case-insensitive key used for matching categories; blank means
/// uncategorized.
pub fn category_key(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_ascii_lowercase(),
        None => UNCATEGORIZED.to_ascii_lowercase(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSet {
    pub id: String,
    pub code: String,
    pub description: String,
    pub sort_order: i64,
    /// Weight of this mark set inside a combined mark.
    pub weight: f64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_default: bool,
    pub weight_method: WeightMethod,
    pub calc_method: CalcMethod,
    pub categories: Vec<Category>,
    /// Ordered by `idx`.
    pub assessments: Vec<Assessment>,
}

impl MarkSet {
    pub fn category(&self, name: Option<&str>) -> Option<&Category> {
        let key = category_key(name);
        self.categories
            .iter()
            .find(|c| category_key(Some(c.name.as_str())) == key)
    }
}

/// Immutable point-in-time view of one class. Built once by the caller and
/// shared read-only across calculations.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSnapshot {
    pub class_id: String,
    pub class_name: String,
    students: Vec<Student>,
    mark_sets: Vec<MarkSet>,
    scores: HashMap<(String, String), ScoreStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRow {
    pub assessment_id: String,
    pub student_id: String,
    pub status: ScoreStatus,
}

impl ClassSnapshot {
    /// Validates references up front: a score pointing at an unknown
    /// assessment or student is a storage contract violation.
    pub fn new(
        class_id: impl Into<String>,
        class_name: impl Into<String>,
        mut students: Vec<Student>,
        mut mark_sets: Vec<MarkSet>,
        scores: Vec<ScoreRow>,
    ) -> Result<Self, CalcError> {
        students.sort_by_key(|s| s.sort_order);
        mark_sets.sort_by_key(|m| m.sort_order);
        for ms in &mut mark_sets {
            ms.assessments.sort_by_key(|a| a.idx);
            ms.categories.sort_by_key(|c| c.sort_order);
        }

        let mut student_ids = HashSet::new();
        for s in &students {
            if !student_ids.insert(s.id.as_str()) {
                return Err(CalcError::CorruptSnapshot(format!(
                    "duplicate student id {}",
                    s.id
                )));
            }
        }
        let mut assessment_ids = HashSet::new();
        for ms in &mark_sets {
            for a in &ms.assessments {
                if !assessment_ids.insert(a.id.as_str()) {
                    return Err(CalcError::CorruptSnapshot(format!(
                        "duplicate assessment id {}",
                        a.id
                    )));
                }
            }
        }

        let mut by_pair = HashMap::with_capacity(scores.len());
        for row in scores {
            if !assessment_ids.contains(row.assessment_id.as_str()) {
                return Err(CalcError::CorruptSnapshot(format!(
                    "score references unknown assessment {}",
                    row.assessment_id
                )));
            }
            if !student_ids.contains(row.student_id.as_str()) {
                return Err(CalcError::CorruptSnapshot(format!(
                    "score references unknown student {}",
                    row.student_id
                )));
            }
            by_pair.insert((row.assessment_id, row.student_id), row.status);
        }

        Ok(Self {
            class_id: class_id.into(),
            class_name: class_name.into(),
            students,
            mark_sets,
            scores: by_pair,
        })
    }

    /// Students in sort order.
    pub fn students(&self) -> &[Student] {
        &self.students
    }

    /// Mark sets in sort order, soft-deleted ones included.
    pub fn mark_sets(&self) -> &[MarkSet] {
        &self.mark_sets
    }

    pub fn mark_set(&self, id: &str) -> Result<&MarkSet, CalcError> {
        self.mark_sets
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| CalcError::not_found("mark set", id))
    }

    /// `None` when no score row exists for the pair.
    pub fn score(&self, assessment_id: &str, student_id: &str) -> Option<ScoreStatus> {
        self.scores
            .get(&(assessment_id.to_string(), student_id.to_string()))
            .copied()
    }
}
