use super::model::{Period, Slot, Term, TimetableError};
use super::view::{StudentLink, UserLinks};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherInfo {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
    pub capacity: Option<i64>,
}

/// Optional narrowing applied in SQL when fetching a term's slots.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotFilter<'a> {
    pub class_id: Option<&'a str>,
    pub teacher_id: Option<&'a str>,
    pub room_id: Option<&'a str>,
}

const TERM_COLUMNS: &str = "id, number, label, year, is_active, created_at";

fn term_from_row(r: &Row<'_>) -> rusqlite::Result<Term> {
    Ok(Term {
        id: r.get(0)?,
        number: r.get(1)?,
        label: r.get(2)?,
        year: r.get(3)?,
        is_active: r.get::<_, i64>(4)? != 0,
        created_at: r.get(5)?,
    })
}

/// Explicit id first; otherwise the active term, falling back to the most
/// recent one.
pub fn resolve_term(conn: &Connection, term_id: Option<&str>) -> Result<Term, TimetableError> {
    if let Some(id) = term_id {
        let sql = format!("SELECT {} FROM terms WHERE id = ?", TERM_COLUMNS);
        return conn
            .query_row(&sql, [id], term_from_row)
            .optional()
            .map_err(TimetableError::db)?
            .ok_or_else(|| {
                TimetableError::new("not_found", "term not found")
                    .with_details(serde_json::json!({ "termId": id }))
            });
    }
    let sql = format!(
        "SELECT {} FROM terms
         ORDER BY is_active DESC, year DESC, number DESC, created_at DESC
         LIMIT 1",
        TERM_COLUMNS
    );
    conn.query_row(&sql, [], term_from_row)
        .optional()
        .map_err(TimetableError::db)?
        .ok_or_else(|| TimetableError::new("no_term", "no term is configured for this school"))
}

pub fn list_terms(conn: &Connection) -> Result<Vec<Term>, TimetableError> {
    let sql = format!(
        "SELECT {} FROM terms ORDER BY year DESC, number DESC, created_at DESC",
        TERM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(TimetableError::db)?;
    stmt.query_map([], term_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(TimetableError::db)
}

pub fn list_periods(conn: &Connection, term_id: &str) -> Result<Vec<Period>, TimetableError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, term_id, name, start_time, end_time, sort_order, is_break
             FROM periods
             WHERE term_id = ?
             ORDER BY sort_order, start_time",
        )
        .map_err(TimetableError::db)?;
    stmt.query_map([term_id], |r| {
        Ok(Period {
            id: r.get(0)?,
            term_id: r.get(1)?,
            name: r.get(2)?,
            start_time: r.get(3)?,
            end_time: r.get(4)?,
            sort_order: r.get(5)?,
            is_break: r.get::<_, i64>(6)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(TimetableError::db)
}

pub fn list_slots(
    conn: &Connection,
    term_id: &str,
    filter: &SlotFilter<'_>,
) -> Result<Vec<Slot>, TimetableError> {
    let mut sql = String::from(
        "SELECT
           s.id, s.term_id, s.day_of_week, s.period_id, s.class_id, s.teacher_id, s.room_id,
           s.subject,
           COALESCE(c.name, ''),
           COALESCE(t.first_name || ' ' || t.last_name, ''),
           COALESCE(r.name, '')
         FROM timetable_slots s
         LEFT JOIN classes c ON c.id = s.class_id
         LEFT JOIN teachers t ON t.id = s.teacher_id
         LEFT JOIN rooms r ON r.id = s.room_id
         LEFT JOIN periods p ON p.id = s.period_id
         WHERE s.term_id = ?",
    );
    let mut bind: Vec<Value> = vec![Value::Text(term_id.to_string())];
    if let Some(id) = filter.class_id {
        sql.push_str(" AND s.class_id = ?");
        bind.push(Value::Text(id.to_string()));
    }
    if let Some(id) = filter.teacher_id {
        sql.push_str(" AND s.teacher_id = ?");
        bind.push(Value::Text(id.to_string()));
    }
    if let Some(id) = filter.room_id {
        sql.push_str(" AND s.room_id = ?");
        bind.push(Value::Text(id.to_string()));
    }
    sql.push_str(" ORDER BY s.day_of_week, p.sort_order, s.id");

    let mut stmt = conn.prepare(&sql).map_err(TimetableError::db)?;
    stmt.query_map(params_from_iter(bind), |r| {
        Ok(Slot {
            id: r.get(0)?,
            term_id: r.get(1)?,
            day_of_week: r.get::<_, i64>(2)?.clamp(0, 6) as u8,
            period_id: r.get(3)?,
            class_id: r.get(4)?,
            teacher_id: r.get(5)?,
            room_id: r.get(6)?,
            subject: r.get(7)?,
            class_name: r.get(8)?,
            teacher_name: r.get(9)?,
            room_name: r.get(10)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(TimetableError::db)
}

pub fn class_info(conn: &Connection, class_id: &str) -> Result<Option<ClassInfo>, TimetableError> {
    conn.query_row(
        "SELECT c.id, c.name, (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id)
         FROM classes c WHERE c.id = ?",
        [class_id],
        |r| {
            Ok(ClassInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                student_count: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(TimetableError::db)
}

pub fn teacher_info(
    conn: &Connection,
    teacher_id: &str,
) -> Result<Option<TeacherInfo>, TimetableError> {
    conn.query_row(
        "SELECT id, first_name, last_name FROM teachers WHERE id = ?",
        [teacher_id],
        |r| {
            let first_name: String = r.get(1)?;
            let last_name: String = r.get(2)?;
            Ok(TeacherInfo {
                id: r.get(0)?,
                display_name: format!("{} {}", first_name, last_name),
                first_name,
                last_name,
            })
        },
    )
    .optional()
    .map_err(TimetableError::db)
}

pub fn room_info(conn: &Connection, room_id: &str) -> Result<Option<RoomInfo>, TimetableError> {
    conn.query_row(
        "SELECT id, name, capacity FROM rooms WHERE id = ?",
        [room_id],
        |r| {
            Ok(RoomInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                capacity: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(TimetableError::db)
}

/// Role and entity links for a user. Links pointing at rows that no longer
/// exist are dropped so the router reports them as missing.
pub fn user_links(conn: &Connection, user_id: &str) -> Result<Option<UserLinks>, TimetableError> {
    let row: Option<(String, Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT u.role,
                    (SELECT t.id FROM teachers t WHERE t.id = u.teacher_id),
                    u.student_id,
                    (SELECT g.id FROM guardians g WHERE g.id = u.guardian_id)
             FROM users u WHERE u.id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(TimetableError::db)?;
    let Some((role, teacher_id, student_id, guardian_id)) = row else {
        return Ok(None);
    };

    let student = match student_id {
        Some(sid) => conn
            .query_row(
                "SELECT id, class_id FROM students WHERE id = ?",
                [&sid],
                |r| {
                    Ok(StudentLink {
                        student_id: r.get(0)?,
                        class_id: r.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(TimetableError::db)?,
        None => None,
    };

    let children = match guardian_id {
        Some(gid) => guardian_children(conn, &gid)?,
        None => Vec::new(),
    };

    Ok(Some(UserLinks {
        role,
        teacher_id,
        student,
        children,
    }))
}

fn guardian_children(conn: &Connection, guardian_id: &str) -> Result<Vec<StudentLink>, TimetableError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.class_id
             FROM guardian_students gs
             JOIN students s ON s.id = gs.student_id
             WHERE gs.guardian_id = ?
             ORDER BY s.last_name, s.first_name, s.id",
        )
        .map_err(TimetableError::db)?;
    stmt.query_map([guardian_id], |r| {
        Ok(StudentLink {
            student_id: r.get(0)?,
            class_id: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(TimetableError::db)
}
