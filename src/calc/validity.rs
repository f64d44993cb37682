use serde::{Deserialize, Serialize};

use super::error::CalcError;

/// Legacy `valid_kid`: active students count toward a mark set when the
/// membership bit at the mark set's sort order is `1`. `TBA`, blank, short,
/// or malformed masks fail open.
pub fn is_valid_kid(active: bool, mark_set_mask: &str, mark_set_sort_order: i64) -> bool {
    if !active {
        return false;
    }
    let t = mark_set_mask.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("TBA") {
        return true;
    }
    let Ok(idx) = usize::try_from(mark_set_sort_order) else {
        return true;
    };
    if !t.bytes().all(|ch| ch == b'0' || ch == b'1') {
        return true;
    }
    match t.as_bytes().get(idx) {
        Some(bit) => *bit == b'1',
        None => true,
    }
}

/// Which student rows a caller wants back. Calculations always run over
/// valid students; the scope only widens or narrows the returned rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentScope {
    #[default]
    All,
    Active,
    Valid,
}

impl StudentScope {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentScope::All => "all",
            StudentScope::Active => "active",
            StudentScope::Valid => "valid",
        }
    }

    pub fn parse(raw: Option<&serde_json::Value>) -> Result<Self, CalcError> {
        let Some(v) = raw.filter(|v| !v.is_null()) else {
            return Ok(StudentScope::All);
        };
        let Some(s) = v.as_str() else {
            return Err(CalcError::bad_params(
                "studentScope must be one of: all, active, valid",
            ));
        };
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(StudentScope::All),
            "active" => Ok(StudentScope::Active),
            "valid" => Ok(StudentScope::Valid),
            other => Err(CalcError::bad_params_with(
                "studentScope must be one of: all, active, valid",
                serde_json::json!({ "studentScope": other }),
            )),
        }
    }

    pub fn includes(self, active: bool, valid: bool) -> bool {
        match self {
            StudentScope::All => true,
            StudentScope::Active => active,
            StudentScope::Valid => valid,
        }
    }
}
