use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::timetable::model::TimetableSettings;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Timetable,
    Conflicts,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [Self::Timetable, Self::Conflicts];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "timetable" => Some(Self::Timetable),
            "conflicts" => Some(Self::Conflicts),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Timetable => "timetable",
            Self::Conflicts => "conflicts",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Timetable => "setup.timetable",
            Self::Conflicts => "setup.conflicts",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Timetable => TimetableSettings::default().to_json(),
        SetupSection::Conflicts => json!({
            "reportBreakPeriodUse": true,
            "suggestionsPerSlot": 5
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_working_days(v: &Value, key: &str) -> Result<Vec<i64>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of day indexes", key))?;
    let mut days = Vec::with_capacity(arr.len());
    for d in arr {
        let n = parse_i64_range(d, key, 0, 6)?;
        if days.contains(&n) {
            return Err(format!("{} must not repeat a day", key));
        }
        days.push(n);
    }
    if days.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    days.sort_unstable();
    Ok(days)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Timetable => match k.as_str() {
                "workingDays" => {
                    obj.insert(k.clone(), json!(parse_working_days(v, k)?));
                }
                "lunchAfterPeriod" => {
                    let value = if v.is_null() {
                        Value::Null
                    } else {
                        Value::from(parse_i64_range(v, k, 1, 20)?)
                    };
                    obj.insert(k.clone(), value);
                }
                "rtl" | "showBreaks" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown timetable field: {}", k)),
            },
            SetupSection::Conflicts => match k.as_str() {
                "reportBreakPeriodUse" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "suggestionsPerSlot" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 50)?));
                }
                _ => return Err(format!("unknown conflicts field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    let saved = match db::settings_get_json(conn, section.key()) {
        Ok(v) => v,
        Err(e) if e.downcast_ref::<serde_json::Error>().is_some() => {
            tracing::warn!(section = section.name(), "ignoring unreadable setup: {}", e);
            return Ok(current);
        }
        Err(e) => return Err(e),
    };
    let Some(saved) = saved else {
        return Ok(current);
    };
    let Some(saved_obj) = saved.as_object() else {
        tracing::warn!(section = section.name(), "ignoring saved setup: not an object");
        return Ok(current);
    };
    // Malformed historical values fall back to defaults.
    if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
        tracing::warn!(section = section.name(), "ignoring saved setup: {}", e);
        current = default_section(section);
    }
    Ok(current)
}

pub fn timetable_settings(conn: &rusqlite::Connection) -> anyhow::Result<TimetableSettings> {
    Ok(TimetableSettings::from_json(&load_section(
        conn,
        SetupSection::Timetable,
    )?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictSettings {
    pub report_break_period_use: bool,
    pub suggestions_per_slot: usize,
}

pub fn conflict_settings(conn: &rusqlite::Connection) -> anyhow::Result<ConflictSettings> {
    let v = load_section(conn, SetupSection::Conflicts)?;
    Ok(ConflictSettings {
        report_break_period_use: v
            .get("reportBreakPeriodUse")
            .and_then(|b| b.as_bool())
            .unwrap_or(true),
        suggestions_per_slot: v
            .get("suggestionsPerSlot")
            .and_then(|n| n.as_u64())
            .unwrap_or(5) as usize,
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::debug!(section = section.name(), "setup updated");
    ok(&req.id, json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn working_days_are_sorted_and_validated() {
        let mut cur = default_section(SetupSection::Timetable);
        merge_section_patch(
            SetupSection::Timetable,
            &mut cur,
            &patch(json!({ "workingDays": [4, 0, 2] })),
        )
        .expect("valid patch");
        assert_eq!(cur["workingDays"], json!([0, 2, 4]));

        for bad in [json!([]), json!([1, 1]), json!([7]), json!("mon")] {
            let mut cur = default_section(SetupSection::Timetable);
            assert!(merge_section_patch(
                SetupSection::Timetable,
                &mut cur,
                &patch(json!({ "workingDays": bad })),
            )
            .is_err());
        }
    }

    #[test]
    fn lunch_marker_accepts_null() {
        let mut cur = default_section(SetupSection::Timetable);
        merge_section_patch(
            SetupSection::Timetable,
            &mut cur,
            &patch(json!({ "lunchAfterPeriod": null })),
        )
        .expect("null clears");
        assert_eq!(TimetableSettings::from_json(&cur).lunch_after_period, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut cur = default_section(SetupSection::Conflicts);
        let e = merge_section_patch(
            SetupSection::Conflicts,
            &mut cur,
            &patch(json!({ "solver": "greedy" })),
        )
        .unwrap_err();
        assert!(e.contains("unknown conflicts field"));
    }

    #[test]
    fn unreadable_stored_sections_fall_back_to_defaults() {
        let ws = std::env::temp_dir()
            .join(format!("timetabled-setup-bad-{}", uuid::Uuid::new_v4()));
        let conn = db::open_db(&ws).expect("open workspace");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES('setup.timetable', '{not json')",
            [],
        )
        .expect("seed timetable");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES('setup.conflicts', '\"oops\"')",
            [],
        )
        .expect("seed conflicts");

        assert_eq!(
            timetable_settings(&conn).expect("defaults"),
            TimetableSettings::default()
        );
        assert_eq!(
            conflict_settings(&conn).expect("defaults"),
            ConflictSettings {
                report_break_period_use: true,
                suggestions_per_slot: 5,
            }
        );
        let _ = std::fs::remove_dir_all(ws);
    }
}
