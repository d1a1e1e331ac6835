use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, with_workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::timetable::view::Role;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};

/// Binds the requesting user for later personalized calls. This is identity
/// context for view selection, not authentication.
fn handle_session_set(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if req.params.get("userId").is_some_and(Value::is_null) {
        state.session_user = None;
        tracing::info!("session cleared");
        return ok(&req.id, json!({ "userId": null }));
    }
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let found: Option<String> = match conn
        .query_row("SELECT role FROM users WHERE id = ?", [&user_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return HandlerErr::db_query(e).response(&req.id),
    };
    let Some(role) = found else {
        return err(&req.id, "not_found", "user not found", None);
    };
    state.session_user = Some(user_id.clone());
    tracing::info!(user = %user_id, role = %role, "session user set");
    ok(&req.id, json!({ "userId": user_id, "role": role }))
}

fn handle_session_get(state: &mut AppState, req: &Request) -> Value {
    with_workspace(state, req, |ctx| {
        let Some(user_id) = ctx.session_user else {
            return Ok(json!({ "user": null }));
        };
        let user = ctx
            .conn
            .query_row(
                "SELECT id, display_name, role, teacher_id, student_id, guardian_id
                 FROM users WHERE id = ?",
                [user_id],
                |r| {
                    let role: String = r.get(2)?;
                    let effective = Role::parse(&role).as_str();
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "displayName": r.get::<_, String>(1)?,
                        "role": role,
                        "effectiveRole": effective,
                        "teacherId": r.get::<_, Option<String>>(3)?,
                        "studentId": r.get::<_, Option<String>>(4)?,
                        "guardianId": r.get::<_, Option<String>>(5)?,
                    }))
                },
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        Ok(json!({ "user": user }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.set" => Some(handle_session_set(state, req)),
        "session.get" => Some(handle_session_get(state, req)),
        _ => None,
    }
}
