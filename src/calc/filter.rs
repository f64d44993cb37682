use serde::{Deserialize, Serialize};

use super::error::CalcError;
use super::model::Assessment;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFilters {
    pub term: Option<i64>,
    /// Stored lower-cased; matched case-insensitively.
    pub category_name: Option<String>,
    pub types_mask: Option<i64>,
}

impl SummaryFilters {
    pub fn parse(raw: Option<&serde_json::Value>) -> Result<SummaryFilters, CalcError> {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return Ok(SummaryFilters::default());
        };
        let Some(obj) = raw.as_object() else {
            return Err(CalcError::bad_params("filters must be an object"));
        };

        let term = match obj.get("term") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v)
                if v.as_str()
                    .map(|s| s.eq_ignore_ascii_case("ALL"))
                    .unwrap_or(false) =>
            {
                None
            }
            Some(v) => {
                let Some(n) = v.as_i64() else {
                    return Err(CalcError::bad_params(
                        "filters.term must be integer or 'ALL'",
                    ));
                };
                Some(n)
            }
        };

        let category_name = match obj.get("categoryName") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(CalcError::bad_params(
                        "filters.categoryName must be string or null",
                    ));
                };
                let t = s.trim();
                if t.is_empty() || t.eq_ignore_ascii_case("ALL") {
                    None
                } else {
                    Some(t.to_ascii_lowercase())
                }
            }
        };

        let types_mask = match obj.get("typesMask") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => {
                let Some(n) = v.as_i64() else {
                    return Err(CalcError::bad_params(
                        "filters.typesMask must be an integer bitmask",
                    ));
                };
                Some(n)
            }
        };

        Ok(SummaryFilters {
            term,
            category_name,
            types_mask,
        })
    }

    /// Filters as actually applied: blended methods drop the category
    /// constraint.
    pub fn applied(&self, ignore_category: bool) -> SummaryFilters {
        let mut out = self.clone();
        if ignore_category {
            out.category_name = None;
        }
        out
    }

    pub fn matches(&self, a: &Assessment) -> bool {
        let term_ok = self.term.map(|t| a.term == Some(t)).unwrap_or(true);
        let cat_ok = self
            .category_name
            .as_ref()
            .map(|cat| {
                a.category_name
                    .as_deref()
                    .map(|v| v.trim().to_ascii_lowercase() == *cat)
                    .unwrap_or(false)
            })
            .unwrap_or(true);
        term_ok && cat_ok && matches_types_mask(self.types_mask, a.legacy_type)
    }

    pub fn select<'a>(&self, assessments: &'a [Assessment]) -> Vec<&'a Assessment> {
        assessments.iter().filter(|a| self.matches(a)).collect()
    }
}

/// The legacy type is an index into the type bitmask; absent means type 0.
fn matches_types_mask(mask: Option<i64>, legacy_type: Option<i64>) -> bool {
    let Some(mask) = mask else {
        return true;
    };
    let t = legacy_type.unwrap_or(0);
    if t < 0 {
        return false;
    }
    let shift = t as u32;
    if shift >= 63 {
        return false;
    }
    (mask & (1_i64 << shift)) != 0
}
