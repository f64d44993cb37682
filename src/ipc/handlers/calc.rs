use crate::calc::{self, CalcConfig, CalcConfigPatch, ClassSnapshot, StudentScope, SummaryFilters};
use crate::db;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn parse_filters(req: &Request) -> Result<SummaryFilters, serde_json::Value> {
    SummaryFilters::parse(req.params.get("filters")).map_err(|e| calc_err(&req.id, &e))
}

fn parse_scope(req: &Request) -> Result<StudentScope, serde_json::Value> {
    StudentScope::parse(req.params.get("studentScope")).map_err(|e| calc_err(&req.id, &e))
}

fn load_inputs(
    conn: &Connection,
    req: &Request,
) -> Result<(ClassSnapshot, calc::CalcConfigStore), serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let snapshot = db::load_snapshot(conn, &class_id).map_err(|e| calc_err(&req.id, &e))?;
    let config = db::load_config_store(conn).map_err(|e| calc_err(&req.id, &e))?;
    Ok((snapshot, config))
}

fn handle_calc_assessment_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mark_set_id = match required_str(req, "markSetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match parse_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (snapshot, config) = match load_inputs(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match calc::assessment_stats(&snapshot, &mark_set_id, &filters, &config) {
        Ok(assessments) => ok(&req.id, json!({ "assessments": assessments })),
        Err(e) => calc_err(&req.id, &e),
    }
}

fn handle_calc_markset_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mark_set_id = match required_str(req, "markSetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match parse_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (snapshot, config) = match load_inputs(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match calc::mark_set_summary(&snapshot, &mark_set_id, &filters, scope, &config) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => calc_err(&req.id, &e),
    }
}

fn parse_mark_set_ids(req: &Request) -> Result<Option<Vec<String>>, serde_json::Value> {
    let Some(raw) = req.params.get("markSetIds").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(arr) = raw.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            "markSetIds must be an array of strings",
            None,
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                "markSetIds must be an array of strings",
                Some(json!({ "value": v })),
            ));
        };
        out.push(s.to_string());
    }
    Ok(Some(out))
}

fn handle_calc_combined_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let requested = match parse_mark_set_ids(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match parse_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (snapshot, config) = match load_inputs(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Without an explicit selection every live mark set takes part.
    let ids = requested.unwrap_or_else(|| {
        snapshot
            .mark_sets()
            .iter()
            .filter(|m| !m.deleted)
            .map(|m| m.id.clone())
            .collect()
    });

    match calc::combined_summary(&snapshot, &ids, &filters, scope, &config) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => calc_err(&req.id, &e),
    }
}

fn handle_calc_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::load_config_store(conn) {
        Ok(store) => ok(&req.id, json!(store.get())),
        Err(e) => calc_err(&req.id, &e),
    }
}

/// Accepts the patch either under `params.patch` or as `params` itself.
fn patch_param(req: &Request) -> &serde_json::Value {
    match req.params.get("patch") {
        Some(p) if !p.is_null() => p,
        _ => &req.params,
    }
}

fn handle_calc_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match CalcConfigPatch::from_json(patch_param(req)) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, &e),
    };
    let mut store = match db::load_config_store(conn) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, &e),
    };
    let view = match store.update(&patch) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, &e),
    };
    match db::save_config_override(conn, &store) {
        Ok(()) => ok(&req.id, json!(view)),
        Err(e) => calc_err(&req.id, &e),
    }
}

fn handle_calc_config_clear_override(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut store = match db::load_config_store(conn) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, &e),
    };
    let view = store.clear_override();
    match db::save_config_override(conn, &store) {
        Ok(()) => ok(&req.id, json!(view)),
        Err(e) => calc_err(&req.id, &e),
    }
}

fn handle_calc_config_set_base(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let raw = req.params.get("base").cloned().unwrap_or(json!(null));
    let base: CalcConfig = match serde_json::from_value(raw) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "invalid_settings", e.to_string(), None),
    };
    let store = match db::load_config_store(conn)
        .and_then(|s| calc::CalcConfigStore::new(base.clone(), s.override_patch().cloned()))
    {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, &e),
    };
    match db::save_config_base(conn, &base) {
        Ok(()) => ok(&req.id, json!(store.get())),
        Err(e) => calc_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.assessmentStats" => Some(handle_calc_assessment_stats(state, req)),
        "calc.markSetSummary" => Some(handle_calc_markset_summary(state, req)),
        "calc.combinedSummary" => Some(handle_calc_combined_summary(state, req)),
        "calc.config.get" => Some(handle_calc_config_get(state, req)),
        "calc.config.update" => Some(handle_calc_config_update(state, req)),
        "calc.config.clearOverride" => Some(handle_calc_config_clear_override(state, req)),
        "calc.config.setBase" => Some(handle_calc_config_set_base(state, req)),
        _ => None,
    }
}
