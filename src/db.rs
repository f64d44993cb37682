use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::Path;

use crate::calc::{
    Assessment, CalcConfig, CalcConfigPatch, CalcConfigStore, CalcError, CalcMethod, Category,
    ClassSnapshot, MarkSet, ScoreRow, ScoreStatus, Student, WeightMethod, MODE_LEVEL_SLOTS,
};

pub const DB_FILE_NAME: &str = "markbook.sqlite3";

pub const CONFIG_BASE_KEY: &str = "calc.config.base";
pub const CONFIG_OVERRIDE_KEY: &str = "calc.config.override";
const LEGACY_MODE_LEVELS_KEY: &str = "user_cfg.mode_levels";
const LEGACY_ROFF_KEY: &str = "user_cfg.roff";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            birth_date TEXT,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            raw_line TEXT NOT NULL,
            mark_set_mask TEXT NOT NULL DEFAULT 'TBA',
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    ensure_students_mark_set_mask(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mark_sets(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            code TEXT NOT NULL,
            file_prefix TEXT NOT NULL,
            description TEXT NOT NULL,
            weight REAL,
            source_filename TEXT,
            sort_order INTEGER NOT NULL,
            full_code TEXT,
            room TEXT,
            day TEXT,
            period TEXT,
            weight_method INTEGER NOT NULL DEFAULT 1,
            calc_method INTEGER NOT NULL DEFAULT 0,
            is_default INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    ensure_mark_sets_lifecycle_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mark_sets_class ON mark_sets(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id TEXT PRIMARY KEY,
            mark_set_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(mark_set_id) REFERENCES mark_sets(id),
            UNIQUE(mark_set_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_mark_set ON categories(mark_set_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            mark_set_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            date TEXT,
            category_name TEXT,
            title TEXT NOT NULL,
            term INTEGER,
            legacy_kind INTEGER,
            legacy_type INTEGER,
            weight REAL,
            out_of REAL,
            avg_percent REAL,
            avg_raw REAL,
            FOREIGN KEY(mark_set_id) REFERENCES mark_sets(id),
            UNIQUE(mark_set_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_mark_set_idx ON assessments(mark_set_id, idx)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            raw_value REAL,
            status TEXT NOT NULL,
            remark TEXT,
            FOREIGN KEY(assessment_id) REFERENCES assessments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(assessment_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_assessment ON scores(assessment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    // Older workspaces stored "missing" for zero and "scored 0" for no mark.
    migrate_scores_statuses(&conn)?;

    Ok(conn)
}

fn ensure_students_mark_set_mask(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "mark_set_mask")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN mark_set_mask TEXT NOT NULL DEFAULT 'TBA'",
        [],
    )?;
    Ok(())
}

fn ensure_mark_sets_lifecycle_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "mark_sets", "is_default")? {
        conn.execute(
            "ALTER TABLE mark_sets ADD COLUMN is_default INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "mark_sets", "deleted_at")? {
        conn.execute("ALTER TABLE mark_sets ADD COLUMN deleted_at TEXT", [])?;
    }
    Ok(())
}

fn migrate_scores_statuses(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE scores SET status = 'zero' WHERE status = 'missing' AND raw_value IS NULL",
        [],
    )?;
    conn.execute(
        "UPDATE scores SET status = 'no_mark', raw_value = 0 WHERE status = 'scored' AND raw_value = 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        (key, value.to_string(), now),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM workspace_settings WHERE key = ?", [key])?;
    Ok(())
}

/// Reads the stored base and override. Without a stored base, the mode
/// levels and rounding imported from the legacy user config are used, then
/// the built-in defaults.
pub fn load_config_store(conn: &Connection) -> Result<CalcConfigStore, CalcError> {
    let base = match read_setting(conn, CONFIG_BASE_KEY)? {
        Some(v) => serde_json::from_value::<CalcConfig>(v)
            .map_err(|e| CalcError::InvalidSettings(format!("stored base config: {e}")))?,
        None => legacy_base_config(conn)?,
    };
    let override_patch = match read_setting(conn, CONFIG_OVERRIDE_KEY)? {
        Some(v) => Some(CalcConfigPatch::from_json(&v)?),
        None => None,
    };
    CalcConfigStore::new(base, override_patch)
}

/// Persists the override only; the base is written once, when first set.
pub fn save_config_override(conn: &Connection, store: &CalcConfigStore) -> Result<(), CalcError> {
    let result = match store.override_patch() {
        Some(p) => serde_json::to_value(p)
            .map_err(anyhow::Error::from)
            .and_then(|v| settings_set_json(conn, CONFIG_OVERRIDE_KEY, &v)),
        None => settings_delete(conn, CONFIG_OVERRIDE_KEY),
    };
    result.map_err(|e| CalcError::Db(e.to_string()))
}

pub fn save_config_base(conn: &Connection, base: &CalcConfig) -> Result<(), CalcError> {
    base.validate()?;
    serde_json::to_value(base)
        .map_err(anyhow::Error::from)
        .and_then(|v| settings_set_json(conn, CONFIG_BASE_KEY, &v))
        .map_err(|e| CalcError::Db(e.to_string()))
}

fn read_setting(conn: &Connection, key: &str) -> Result<Option<serde_json::Value>, CalcError> {
    settings_get_json(conn, key).map_err(|e| CalcError::Db(e.to_string()))
}

fn legacy_base_config(conn: &Connection) -> Result<CalcConfig, CalcError> {
    let mut cfg = CalcConfig::default();
    if let Some(levels) = read_setting(conn, LEGACY_MODE_LEVELS_KEY)? {
        if let Some(n) = levels.get("activeLevels").and_then(|v| v.as_u64()) {
            cfg.mode_active_levels = (n as usize).clamp(1, MODE_LEVEL_SLOTS);
        }
        if let Some(vals) = levels.get("vals").and_then(|v| v.as_array()) {
            let mut out: Vec<f64> = vals.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect();
            out.resize(MODE_LEVEL_SLOTS, 0.0);
            cfg.mode_level_vals = out;
        }
        if let Some(syms) = levels.get("symbols").and_then(|v| v.as_array()) {
            let mut out: Vec<String> = syms
                .iter()
                .map(|v| v.as_str().unwrap_or("").to_string())
                .collect();
            out.resize(MODE_LEVEL_SLOTS, String::new());
            // A legacy config without symbols keeps the default labels.
            if out.iter().any(|s| !s.is_empty()) {
                cfg.mode_symbols = out;
            }
        }
    }
    if let Some(roff) = read_setting(conn, LEGACY_ROFF_KEY)? {
        if let Some(b) = roff.get("roff").and_then(|v| v.as_bool()) {
            cfg.round_off = b;
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Builds the immutable snapshot of one class: every student, every mark
/// set (soft-deleted included), and every score row.
pub fn load_snapshot(conn: &Connection, class_id: &str) -> Result<ClassSnapshot, CalcError> {
    let class_name: Option<String> = conn
        .query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(class_name) = class_name else {
        return Err(CalcError::not_found("class", class_id));
    };

    let mut students_stmt = conn.prepare(
        "SELECT id, last_name, first_name, sort_order, active, mark_set_mask
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let students: Vec<Student> = students_stmt
        .query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(Student {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                sort_order: r.get(3)?,
                active: r.get::<_, i64>(4)? != 0,
                mark_set_mask: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mark_sets_stmt = conn.prepare(
        "SELECT id, code, description, sort_order, weight, deleted_at, is_default,
                weight_method, calc_method
         FROM mark_sets
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let mut mark_sets: Vec<MarkSet> = mark_sets_stmt
        .query_map([class_id], |r| {
            Ok(MarkSet {
                id: r.get(0)?,
                code: r.get(1)?,
                description: r.get(2)?,
                sort_order: r.get(3)?,
                weight: r.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                deleted: r.get::<_, Option<String>>(5)?.is_some(),
                is_default: r.get::<_, i64>(6)? != 0,
                weight_method: WeightMethod::from(r.get::<_, i64>(7)?),
                calc_method: CalcMethod::from(r.get::<_, i64>(8)?),
                categories: Vec::new(),
                assessments: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut categories_stmt = conn.prepare(
        "SELECT name, COALESCE(weight, 0), sort_order
         FROM categories
         WHERE mark_set_id = ?
         ORDER BY sort_order",
    )?;
    let mut assessments_stmt = conn.prepare(
        "SELECT id, idx, date, category_name, title, term, legacy_type, weight, out_of
         FROM assessments
         WHERE mark_set_id = ?
         ORDER BY idx",
    )?;
    for ms in &mut mark_sets {
        ms.categories = categories_stmt
            .query_map([&ms.id], |r| {
                Ok(Category {
                    name: r.get(0)?,
                    weight: r.get(1)?,
                    sort_order: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let assessments = assessments_stmt
            .query_map([&ms.id], |r| {
                Ok(Assessment {
                    id: r.get(0)?,
                    idx: r.get(1)?,
                    date: r.get(2)?,
                    category_name: r.get(3)?,
                    title: r.get(4)?,
                    term: r.get(5)?,
                    legacy_type: r.get(6)?,
                    weight: r.get::<_, Option<f64>>(7)?.unwrap_or(1.0),
                    out_of: r.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
                    deleted_like: false,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        // Under category weighting, filing an entry under a zero-weight
        // category is the legacy way of deleting it.
        let by_category =
            ms.weight_method == WeightMethod::Category || ms.calc_method.is_blended();
        ms.assessments = assessments
            .into_iter()
            .map(|mut a| {
                a.deleted_like = by_category
                    && ms
                        .category(a.category_name.as_deref())
                        .map(|c| c.weight <= 0.0)
                        .unwrap_or(false);
                a
            })
            .collect();
    }

    let mut scores_stmt = conn.prepare(
        "SELECT sc.assessment_id, sc.student_id, sc.raw_value, sc.status
         FROM scores sc
         JOIN assessments a ON a.id = sc.assessment_id
         JOIN mark_sets m ON m.id = a.mark_set_id
         WHERE m.class_id = ?",
    )?;
    let scores: Vec<ScoreRow> = scores_stmt
        .query_map([class_id], |r| {
            let status: String = r.get(3)?;
            Ok(ScoreRow {
                assessment_id: r.get(0)?,
                student_id: r.get(1)?,
                status: ScoreStatus::from_stored(&status, r.get(2)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    ClassSnapshot::new(class_id, class_name, students, mark_sets, scores)
}

/// Row counts for `health`, so callers can tell an empty workspace apart.
pub fn workspace_counts(conn: &Connection) -> anyhow::Result<serde_json::Value> {
    let count = |table: &str| -> anyhow::Result<i64> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
    };
    Ok(json!({
        "classes": count("classes")?,
        "students": count("students")?,
        "markSets": count("mark_sets")?,
        "assessments": count("assessments")?,
    }))
}
