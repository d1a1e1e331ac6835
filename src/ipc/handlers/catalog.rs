use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_i64, get_required_str, now_rfc3339,
    with_workspace, Ctx, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::timetable::store;
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

pub(crate) fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

fn require_row(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{} not found", what)))
    }
}

fn list_json<F>(conn: &Connection, sql: &str, map: F) -> Result<Vec<Value>, HandlerErr>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Value>,
{
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], map)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(rows)
}

fn parse_clock(raw: &str, key: &str) -> Result<NaiveTime, HandlerErr> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be HH:MM", key)))
}

fn terms_list(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let terms = store::list_terms(ctx.conn)?;
    Ok(json!({ "terms": terms }))
}

fn terms_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let number = get_required_i64(ctx.params, "number")?;
    if !(1..=12).contains(&number) {
        return Err(HandlerErr::bad_params("number must be in 1..=12"));
    }
    let label = get_required_str(ctx.params, "label")?;
    let year = get_required_i64(ctx.params, "year")?;
    if !(1900..=3000).contains(&year) {
        return Err(HandlerErr::bad_params("year out of range"));
    }
    let active = get_optional_bool(ctx.params, "active")?.unwrap_or(false);

    let term_id = Uuid::new_v4().to_string();
    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if active {
        tx.execute("UPDATE terms SET is_active = 0", [])
            .map_err(|e| HandlerErr::db_update(e, "terms"))?;
    }
    tx.execute(
        "INSERT INTO terms(id, number, label, year, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&term_id, number, &label, year, active as i64, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::db_update(e, "terms"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "termId": term_id }))
}

fn terms_set_active(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term_id = get_required_str(ctx.params, "termId")?;
    require_row(ctx.conn, "terms", &term_id, "term")?;
    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE terms SET is_active = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [&term_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "terms"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn periods_list(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term_id = get_optional_str(ctx.params, "termId")?;
    let term = store::resolve_term(ctx.conn, term_id.as_deref())?;
    let periods = store::list_periods(ctx.conn, &term.id)?;
    Ok(json!({ "termId": term.id, "periods": periods }))
}

fn periods_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term_id = get_optional_str(ctx.params, "termId")?;
    let term = store::resolve_term(ctx.conn, term_id.as_deref())?;
    let name = get_required_str(ctx.params, "name")?;
    let start_raw = get_required_str(ctx.params, "startTime")?;
    let end_raw = get_required_str(ctx.params, "endTime")?;
    let start = parse_clock(&start_raw, "startTime")?;
    let end = parse_clock(&end_raw, "endTime")?;
    if end <= start {
        return Err(HandlerErr::bad_params("endTime must be after startTime"));
    }
    let is_break = get_optional_bool(ctx.params, "isBreak")?.unwrap_or(false);

    let existing = store::list_periods(ctx.conn, &term.id)?;
    for p in &existing {
        let (Ok(ps), Ok(pe)) = (
            NaiveTime::parse_from_str(&p.start_time, "%H:%M"),
            NaiveTime::parse_from_str(&p.end_time, "%H:%M"),
        ) else {
            continue;
        };
        if start < pe && ps < end {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("period overlaps {}", p.name),
                details: Some(json!({ "periodId": p.id })),
            });
        }
    }
    let sort_order = match ctx.params.get("sortOrder") {
        None | Some(Value::Null) => existing.iter().map(|p| p.sort_order).max().unwrap_or(0) + 1,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("sortOrder must be integer"))?,
    };

    let period_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO periods(id, term_id, name, start_time, end_time, sort_order, is_break)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &period_id,
                &term.id,
                &name,
                start.format("%H:%M").to_string(),
                end.format("%H:%M").to_string(),
                sort_order,
                is_break as i64,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "periods"))?;
    Ok(json!({ "periodId": period_id, "sortOrder": sort_order }))
}

fn classes_list(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let classes = list_json(
        ctx.conn,
        "SELECT c.id, c.name, (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id)
         FROM classes c
         ORDER BY c.name",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "studentCount": r.get::<_, i64>(2)?,
            }))
        },
    )?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let name = get_required_str(ctx.params, "name")?;
    let class_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO classes(id, name) VALUES(?, ?)",
            (&class_id, &name),
        )
        .map_err(|e| HandlerErr::db_update(e, "classes"))?;
    Ok(json!({ "classId": class_id }))
}

fn teachers_list(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let teachers = list_json(
        ctx.conn,
        "SELECT id, first_name, last_name FROM teachers ORDER BY last_name, first_name",
        |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": first,
                "lastName": last,
                "displayName": format!("{} {}", first, last),
            }))
        },
    )?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let first = get_required_str(ctx.params, "firstName")?;
    let last = get_required_str(ctx.params, "lastName")?;
    let teacher_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO teachers(id, first_name, last_name) VALUES(?, ?, ?)",
            (&teacher_id, &first, &last),
        )
        .map_err(|e| HandlerErr::db_update(e, "teachers"))?;
    Ok(json!({ "teacherId": teacher_id }))
}

fn rooms_list(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let rooms = list_json(
        ctx.conn,
        "SELECT id, name, capacity FROM rooms ORDER BY name",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "capacity": r.get::<_, Option<i64>>(2)?,
            }))
        },
    )?;
    Ok(json!({ "rooms": rooms }))
}

fn rooms_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let name = get_required_str(ctx.params, "name")?;
    let capacity = match ctx.params.get("capacity") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) if n > 0 => Some(n),
            _ => return Err(HandlerErr::bad_params("capacity must be a positive integer")),
        },
    };
    let room_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO rooms(id, name, capacity) VALUES(?, ?, ?)",
            (&room_id, &name, capacity),
        )
        .map_err(|e| HandlerErr::db_update(e, "rooms"))?;
    Ok(json!({ "roomId": room_id }))
}

fn students_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let class_id = get_optional_str(ctx.params, "classId")?;
    if let Some(cid) = class_id.as_deref() {
        require_row(ctx.conn, "classes", cid, "class")?;
    }
    let first = get_required_str(ctx.params, "firstName")?;
    let last = get_required_str(ctx.params, "lastName")?;
    let student_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO students(id, class_id, last_name, first_name) VALUES(?, ?, ?, ?)",
            (&student_id, &class_id, &last, &first),
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    Ok(json!({ "studentId": student_id }))
}

fn guardians_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let name = get_required_str(ctx.params, "name")?;
    let guardian_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO guardians(id, name) VALUES(?, ?)",
            (&guardian_id, &name),
        )
        .map_err(|e| HandlerErr::db_update(e, "guardians"))?;
    Ok(json!({ "guardianId": guardian_id }))
}

fn guardians_link_student(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let guardian_id = get_required_str(ctx.params, "guardianId")?;
    let student_id = get_required_str(ctx.params, "studentId")?;
    require_row(ctx.conn, "guardians", &guardian_id, "guardian")?;
    require_row(ctx.conn, "students", &student_id, "student")?;
    let inserted = ctx
        .conn
        .execute(
            "INSERT OR IGNORE INTO guardian_students(guardian_id, student_id) VALUES(?, ?)",
            (&guardian_id, &student_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "guardian_students"))?;
    Ok(json!({ "linked": inserted > 0 }))
}

fn users_create(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let display_name = get_required_str(ctx.params, "displayName")?;
    let role = get_required_str(ctx.params, "role")?.to_ascii_lowercase();
    let teacher_id = get_optional_str(ctx.params, "teacherId")?;
    let student_id = get_optional_str(ctx.params, "studentId")?;
    let guardian_id = get_optional_str(ctx.params, "guardianId")?;
    if let Some(id) = teacher_id.as_deref() {
        require_row(ctx.conn, "teachers", id, "teacher")?;
    }
    if let Some(id) = student_id.as_deref() {
        require_row(ctx.conn, "students", id, "student")?;
    }
    if let Some(id) = guardian_id.as_deref() {
        require_row(ctx.conn, "guardians", id, "guardian")?;
    }
    let user_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO users(id, display_name, role, teacher_id, student_id, guardian_id)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &user_id,
                &display_name,
                &role,
                &teacher_id,
                &student_id,
                &guardian_id,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "users"))?;
    Ok(json!({ "userId": user_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Ctx<'_>) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "terms.list" => terms_list,
        "terms.create" => terms_create,
        "terms.setActive" => terms_set_active,
        "periods.list" => periods_list,
        "periods.create" => periods_create,
        "classes.list" => classes_list,
        "classes.create" => classes_create,
        "teachers.list" => teachers_list,
        "teachers.create" => teachers_create,
        "rooms.list" => rooms_list,
        "rooms.create" => rooms_create,
        "students.create" => students_create,
        "guardians.create" => guardians_create,
        "guardians.linkStudent" => guardians_link_student,
        "users.create" => users_create,
        _ => return None,
    };
    Some(with_workspace(state, req, f))
}
