//! Grade calculation engine. Everything here is a pure function of a
//! `ClassSnapshot` and the resolved settings; nothing touches storage.

mod aggregate;
mod combined;
mod engine;
mod error;
mod filter;
mod final_mark;
mod model;
mod rounding;
mod score;
mod settings;
mod validity;

pub use aggregate::{
    assessment_average, compute_median, AssessmentAverage, AssessmentStats, CategoryAggregate,
};
pub use combined::{combine_final_marks, CombinedCell, CombinedMark};
pub use engine::{
    assessment_stats, combined_summary, mark_set_summary, ClassInfo, CombinedKpis,
    CombinedMarkSet, CombinedRow, CombinedSettingsApplied, CombinedSummary, MarkSetInfo,
    StudentFinal, SummaryModel,
};
pub use error::CalcError;
pub use filter::SummaryFilters;
pub use final_mark::{final_mark, weighted_median, GradedEntry};
pub use model::{
    Assessment, CalcMethod, Category, ClassSnapshot, MarkSet, ScoreRow, Student, WeightMethod,
};
pub use rounding::round_off_1_decimal;
pub use score::{ScoreStatus, StateCounts};
pub use settings::{
    CalcConfig, CalcConfigPatch, CalcConfigStore, ConfigView, EffectiveSettings, MODE_LEVEL_SLOTS,
};
pub use validity::{is_valid_kid, StudentScope};
