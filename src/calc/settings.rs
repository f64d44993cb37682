use serde::{Deserialize, Serialize};

use super::error::CalcError;
use super::model::{CalcMethod, MarkSet, WeightMethod};

/// Number of mode level slots carried by the legacy user config.
pub const MODE_LEVEL_SLOTS: usize = 22;

fn default_mode_level_vals() -> Vec<f64> {
    let mut vals = vec![0.0; MODE_LEVEL_SLOTS];
    vals[1] = 50.0;
    vals[2] = 60.0;
    vals[3] = 70.0;
    vals[4] = 80.0;
    vals
}

fn default_mode_symbols() -> Vec<String> {
    let mut syms = vec![String::new(); MODE_LEVEL_SLOTS];
    for (i, s) in ["R", "1", "2", "3", "4"].iter().enumerate() {
        syms[i] = s.to_string();
    }
    syms
}

/// Workspace base calculation config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcConfig {
    pub round_off: bool,
    pub mode_active_levels: usize,
    /// Lower threshold (percent) of each mode level.
    pub mode_level_vals: Vec<f64>,
    pub mode_symbols: Vec<String>,
}

impl Default for CalcConfig {
    fn default() -> Self {
        Self {
            round_off: true,
            mode_active_levels: 5,
            mode_level_vals: default_mode_level_vals(),
            mode_symbols: default_mode_symbols(),
        }
    }
}

impl CalcConfig {
    pub fn validate(&self) -> Result<(), CalcError> {
        if !(1..=MODE_LEVEL_SLOTS).contains(&self.mode_active_levels) {
            return Err(CalcError::InvalidSettings(format!(
                "modeActiveLevels must be in 1..={}",
                MODE_LEVEL_SLOTS
            )));
        }
        check_slot_len("modeLevelVals", self.mode_level_vals.len())?;
        check_slot_len("modeSymbols", self.mode_symbols.len())?;
        for (i, v) in self.mode_level_vals.iter().enumerate() {
            if !v.is_finite() || !(0.0..=100.0).contains(v) {
                return Err(CalcError::InvalidSettings(format!(
                    "modeLevelVals[{}] must be a percent in 0..=100",
                    i
                )));
            }
        }
        let active = &self.mode_level_vals[..self.mode_active_levels];
        if active.windows(2).any(|w| w[1] < w[0]) {
            return Err(CalcError::InvalidSettings(
                "active modeLevelVals must be non-decreasing".to_string(),
            ));
        }
        Ok(())
    }

    /// Base with the override's set fields laid over it.
    pub fn overlay(&self, patch: &CalcConfigPatch) -> CalcConfig {
        CalcConfig {
            round_off: patch.round_off.unwrap_or(self.round_off),
            mode_active_levels: patch
                .mode_active_levels
                .map(|n| n as usize)
                .unwrap_or(self.mode_active_levels),
            mode_level_vals: patch
                .mode_level_vals
                .clone()
                .unwrap_or_else(|| self.mode_level_vals.clone()),
            mode_symbols: patch
                .mode_symbols
                .clone()
                .unwrap_or_else(|| self.mode_symbols.clone()),
        }
    }
}

fn check_slot_len(field: &str, len: usize) -> Result<(), CalcError> {
    if len != MODE_LEVEL_SLOTS {
        return Err(CalcError::InvalidSettings(format!(
            "{} must have exactly {} entries (got {})",
            field, MODE_LEVEL_SLOTS, len
        )));
    }
    Ok(())
}

/// Sparse workspace override. Unset fields fall through to the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CalcConfigPatch {
    #[serde(default, alias = "roff", skip_serializing_if = "Option::is_none")]
    pub round_off: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_active_levels: Option<i64>,
    #[serde(default, alias = "modeVals", skip_serializing_if = "Option::is_none")]
    pub mode_level_vals: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_symbols: Option<Vec<String>>,
}

impl CalcConfigPatch {
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, CalcError> {
        if !raw.is_object() {
            return Err(CalcError::InvalidSettings(
                "patch must be an object".to_string(),
            ));
        }
        serde_json::from_value(raw.clone()).map_err(|e| CalcError::InvalidSettings(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.round_off.is_none()
            && self.mode_active_levels.is_none()
            && self.mode_level_vals.is_none()
            && self.mode_symbols.is_none()
    }

    fn check_shape(&self) -> Result<(), CalcError> {
        if let Some(n) = self.mode_active_levels {
            if !(1..=MODE_LEVEL_SLOTS as i64).contains(&n) {
                return Err(CalcError::InvalidSettings(format!(
                    "modeActiveLevels must be in 1..={}",
                    MODE_LEVEL_SLOTS
                )));
            }
        }
        if let Some(v) = &self.mode_level_vals {
            check_slot_len("modeLevelVals", v.len())?;
        }
        if let Some(s) = &self.mode_symbols {
            check_slot_len("modeSymbols", s.len())?;
        }
        Ok(())
    }

    /// Field-by-field union; `newer` wins where set.
    fn merged_with(&self, newer: &CalcConfigPatch) -> CalcConfigPatch {
        CalcConfigPatch {
            round_off: newer.round_off.or(self.round_off),
            mode_active_levels: newer.mode_active_levels.or(self.mode_active_levels),
            mode_level_vals: newer
                .mode_level_vals
                .clone()
                .or_else(|| self.mode_level_vals.clone()),
            mode_symbols: newer
                .mode_symbols
                .clone()
                .or_else(|| self.mode_symbols.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub base: CalcConfig,
    #[serde(rename = "override")]
    pub override_patch: Option<CalcConfigPatch>,
    pub effective: CalcConfig,
}

/// Base config plus optional override. Owned by the caller; the engine
/// only ever reads a resolved copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalcConfigStore {
    base: CalcConfig,
    override_patch: Option<CalcConfigPatch>,
}

impl CalcConfigStore {
    pub fn new(
        base: CalcConfig,
        override_patch: Option<CalcConfigPatch>,
    ) -> Result<Self, CalcError> {
        base.validate()?;
        let override_patch = override_patch.filter(|p| !p.is_empty());
        if let Some(p) = &override_patch {
            p.check_shape()?;
            base.overlay(p).validate()?;
        }
        Ok(Self {
            base,
            override_patch,
        })
    }

    pub fn base(&self) -> &CalcConfig {
        &self.base
    }

    pub fn override_patch(&self) -> Option<&CalcConfigPatch> {
        self.override_patch.as_ref()
    }

    pub fn effective(&self) -> CalcConfig {
        match &self.override_patch {
            Some(p) => self.base.overlay(p),
            None => self.base.clone(),
        }
    }

    pub fn get(&self) -> ConfigView {
        ConfigView {
            base: self.base.clone(),
            override_patch: self.override_patch.clone(),
            effective: self.effective(),
        }
    }

    /// Merges `patch` into the override. Nothing changes on error.
    pub fn update(&mut self, patch: &CalcConfigPatch) -> Result<ConfigView, CalcError> {
        patch.check_shape()?;
        let merged = match &self.override_patch {
            Some(existing) => existing.merged_with(patch),
            None => patch.clone(),
        };
        self.base.overlay(&merged).validate()?;
        self.override_patch = if merged.is_empty() { None } else { Some(merged) };
        Ok(self.get())
    }

    /// Drops every overridden field at once.
    pub fn clear_override(&mut self) -> ConfigView {
        self.override_patch = None;
        self.get()
    }

    pub fn resolve(&self, mark_set: &MarkSet) -> EffectiveSettings {
        EffectiveSettings::resolve(&self.base, self.override_patch.as_ref(), mark_set)
    }
}

/// Fully merged settings for one request, returned with results as
/// `settingsApplied`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSettings {
    pub weight_method_applied: WeightMethod,
    pub calc_method_applied: CalcMethod,
    pub roff_applied: bool,
    pub mode_active_levels: usize,
    pub mode_level_vals: Vec<f64>,
    pub mode_symbols: Vec<String>,
    /// Value a student receives for each active level (band midpoints).
    pub mode_level_values: Vec<f64>,
    pub override_active: bool,
    pub category_filter_ignored: bool,
}

impl EffectiveSettings {
    pub fn resolve(
        base: &CalcConfig,
        override_patch: Option<&CalcConfigPatch>,
        mark_set: &MarkSet,
    ) -> Self {
        let cfg = match override_patch {
            Some(p) => base.overlay(p),
            None => base.clone(),
        };
        let calc_method = mark_set.calc_method;
        // Blended methods always work per category, whatever the mark set says.
        let weight_method = if calc_method.is_blended() {
            WeightMethod::Category
        } else {
            mark_set.weight_method
        };
        let mut out = Self {
            weight_method_applied: weight_method,
            calc_method_applied: calc_method,
            roff_applied: cfg.round_off,
            mode_active_levels: cfg.mode_active_levels.clamp(1, MODE_LEVEL_SLOTS),
            mode_level_vals: cfg.mode_level_vals,
            mode_symbols: cfg.mode_symbols,
            mode_level_values: Vec::new(),
            override_active: override_patch.map(|p| !p.is_empty()).unwrap_or(false),
            category_filter_ignored: calc_method.is_blended(),
        };
        out.mode_level_values = (0..out.mode_active_levels)
            .map(|level| out.mode_level_value(level))
            .collect();
        out
    }

    fn threshold(&self, level: usize) -> f64 {
        self.mode_level_vals.get(level).copied().unwrap_or(0.0)
    }

    /// Highest active level whose threshold does not exceed `percent`.
    pub fn mode_level_of(&self, percent: f64) -> usize {
        (0..self.mode_active_levels)
            .rev()
            .find(|&i| percent >= self.threshold(i))
            .unwrap_or(0)
    }

    /// Midpoint of the level's band; the top active level ends at 100.
    pub fn mode_level_value(&self, level: usize) -> f64 {
        let lower = self.threshold(level);
        let upper = if level + 1 < self.mode_active_levels {
            self.threshold(level + 1)
        } else {
            100.0
        };
        (lower + upper) / 2.0
    }

    pub fn mode_symbol(&self, level: usize) -> Option<&str> {
        self.mode_symbols
            .get(level)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}
