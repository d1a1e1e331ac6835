use crate::ipc::handlers::catalog::row_exists;
use crate::ipc::handlers::setup::{conflict_settings, timetable_settings, ConflictSettings};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_i64, get_required_str, now_rfc3339,
    with_workspace, Ctx, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::timetable::conflicts::{detect_conflicts, suggest_moves, Conflict, ConflictKind};
use crate::timetable::grid::{GridOptions, TimetableGrid};
use crate::timetable::model::{is_valid_day, Period, Slot, Term, TimetableSettings};
use crate::timetable::store::{self, SlotFilter};
use crate::timetable::view::{select_view, Role, ViewFilter, ViewSelection, ViewType};
use crate::timetable::workload::{teacher_workload, workloads_by_teacher};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn settings_err(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

fn load_settings(conn: &Connection) -> Result<TimetableSettings, HandlerErr> {
    timetable_settings(conn).map_err(settings_err)
}

fn load_conflict_settings(conn: &Connection) -> Result<ConflictSettings, HandlerErr> {
    conflict_settings(conn).map_err(settings_err)
}

fn resolve_term(ctx: &Ctx<'_>) -> Result<Term, HandlerErr> {
    let term_id = get_optional_str(ctx.params, "termId")?;
    Ok(store::resolve_term(ctx.conn, term_id.as_deref())?)
}

/// Periods as returned to clients: break periods only when `showBreaks` is on.
fn visible_periods(periods: &[Period], settings: &TimetableSettings) -> Vec<Period> {
    periods
        .iter()
        .filter(|p| settings.show_breaks || !p.is_break)
        .cloned()
        .collect()
}

fn term_conflicts(
    slots: &[Slot],
    periods: &[Period],
    settings: &ConflictSettings,
) -> Vec<Conflict> {
    let mut conflicts = detect_conflicts(slots, periods);
    if !settings.report_break_period_use {
        conflicts.retain(|c| c.kind != ConflictKind::BreakPeriod);
    }
    conflicts
}

fn slots_list(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let slots = store::list_slots(ctx.conn, &term.id, &SlotFilter::default())?;
    Ok(json!({ "termId": term.id, "slots": slots }))
}

fn slots_upsert(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let slot_id = get_optional_str(ctx.params, "slotId")?;
    let day = get_required_i64(ctx.params, "dayOfWeek")?;
    if !is_valid_day(day) {
        return Err(HandlerErr::bad_params("dayOfWeek must be in 0..=6"));
    }
    let period_id = get_required_str(ctx.params, "periodId")?;
    let class_id = get_required_str(ctx.params, "classId")?;
    let teacher_id = get_required_str(ctx.params, "teacherId")?;
    let room_id = get_required_str(ctx.params, "roomId")?;
    let subject = get_required_str(ctx.params, "subject")?;

    let periods = store::list_periods(ctx.conn, &term.id)?;
    if !periods.iter().any(|p| p.id == period_id) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "period does not belong to the term".to_string(),
            details: Some(json!({ "periodId": period_id, "termId": term.id })),
        });
    }
    for (table, id, what) in [
        ("classes", &class_id, "class"),
        ("teachers", &teacher_id, "teacher"),
        ("rooms", &room_id, "room"),
    ] {
        if !row_exists(ctx.conn, table, id)? {
            return Err(HandlerErr::not_found(format!("{} not found", what)));
        }
    }

    let now = now_rfc3339();
    let (slot_id, created) = match slot_id {
        Some(id) => {
            let changed = ctx
                .conn
                .execute(
                    "UPDATE timetable_slots
                     SET term_id = ?, day_of_week = ?, period_id = ?, class_id = ?,
                         teacher_id = ?, room_id = ?, subject = ?, updated_at = ?
                     WHERE id = ?",
                    (
                        &term.id,
                        day,
                        &period_id,
                        &class_id,
                        &teacher_id,
                        &room_id,
                        &subject,
                        &now,
                        &id,
                    ),
                )
                .map_err(|e| HandlerErr::db_update(e, "timetable_slots"))?;
            if changed == 0 {
                return Err(HandlerErr::not_found("slot not found"));
            }
            (id, false)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            ctx.conn
                .execute(
                    "INSERT INTO timetable_slots(
                       id, term_id, day_of_week, period_id, class_id, teacher_id, room_id,
                       subject, updated_at
                     ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        &id,
                        &term.id,
                        day,
                        &period_id,
                        &class_id,
                        &teacher_id,
                        &room_id,
                        &subject,
                        &now,
                    ),
                )
                .map_err(|e| HandlerErr::db_update(e, "timetable_slots"))?;
            (id, true)
        }
    };

    let slots = store::list_slots(ctx.conn, &term.id, &SlotFilter::default())?;
    let settings = load_conflict_settings(ctx.conn)?;
    let conflicts: Vec<Conflict> = term_conflicts(&slots, &periods, &settings)
        .into_iter()
        .filter(|c| c.involves(&slot_id))
        .collect();
    if !conflicts.is_empty() {
        tracing::info!(slot = %slot_id, count = conflicts.len(), "slot saved with conflicts");
    }
    Ok(json!({ "slotId": slot_id, "created": created, "conflicts": conflicts }))
}

fn slots_delete(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let slot_id = get_required_str(ctx.params, "slotId")?;
    let deleted = ctx
        .conn
        .execute("DELETE FROM timetable_slots WHERE id = ?", [&slot_id])
        .map_err(|e| HandlerErr::db_update(e, "timetable_slots"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("slot not found"));
    }
    Ok(json!({ "ok": true }))
}

fn by_class(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let class_id = get_required_str(ctx.params, "classId")?;
    let Some(info) = store::class_info(ctx.conn, &class_id)? else {
        return Err(HandlerErr::not_found("class not found"));
    };
    let filter = SlotFilter {
        class_id: Some(&class_id),
        ..SlotFilter::default()
    };
    let slots = store::list_slots(ctx.conn, &term.id, &filter)?;
    let periods = store::list_periods(ctx.conn, &term.id)?;
    let settings = load_settings(ctx.conn)?;
    Ok(json!({
        "termId": term.id,
        "slots": slots,
        "classInfo": info,
        "periods": visible_periods(&periods, &settings),
    }))
}

fn by_teacher(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let teacher_id = get_required_str(ctx.params, "teacherId")?;
    let Some(info) = store::teacher_info(ctx.conn, &teacher_id)? else {
        return Err(HandlerErr::not_found("teacher not found"));
    };
    let filter = SlotFilter {
        teacher_id: Some(&teacher_id),
        ..SlotFilter::default()
    };
    let slots = store::list_slots(ctx.conn, &term.id, &filter)?;
    let workload = teacher_workload(&teacher_id, &slots);
    let periods = store::list_periods(ctx.conn, &term.id)?;
    let settings = load_settings(ctx.conn)?;
    Ok(json!({
        "termId": term.id,
        "slots": slots,
        "teacherInfo": info,
        "workload": workload,
        "periods": visible_periods(&periods, &settings),
    }))
}

fn by_room(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let room_id = get_required_str(ctx.params, "roomId")?;
    let Some(info) = store::room_info(ctx.conn, &room_id)? else {
        return Err(HandlerErr::not_found("room not found"));
    };
    let filter = SlotFilter {
        room_id: Some(&room_id),
        ..SlotFilter::default()
    };
    let slots = store::list_slots(ctx.conn, &term.id, &filter)?;
    let periods = store::list_periods(ctx.conn, &term.id)?;
    let settings = load_settings(ctx.conn)?;
    Ok(json!({
        "termId": term.id,
        "slots": slots,
        "roomInfo": info,
        "periods": visible_periods(&periods, &settings),
    }))
}

fn detect(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let with_suggestions = get_optional_bool(ctx.params, "withSuggestions")?.unwrap_or(false);
    let slots = store::list_slots(ctx.conn, &term.id, &SlotFilter::default())?;
    let periods = store::list_periods(ctx.conn, &term.id)?;
    let conflict_cfg = load_conflict_settings(ctx.conn)?;
    let conflicts = term_conflicts(&slots, &periods, &conflict_cfg);
    tracing::debug!(term = %term.id, slots = slots.len(), conflicts = conflicts.len(), "conflict scan");

    let mut out = json!({ "termId": term.id, "conflicts": conflicts });
    if with_suggestions {
        let settings = load_settings(ctx.conn)?;
        let suggestions = suggest_moves(
            &conflicts,
            &slots,
            &periods,
            &settings.working_days,
            conflict_cfg.suggestions_per_slot,
        );
        out["suggestions"] = json!(suggestions);
    }
    Ok(out)
}

/// View selection for the session user. Requires `session.set` first.
fn session_view(ctx: &Ctx<'_>) -> Result<ViewSelection, HandlerErr> {
    let Some(user_id) = ctx.session_user else {
        return Err(HandlerErr::new("no_session", "call session.set first"));
    };
    let Some(links) = store::user_links(ctx.conn, user_id)? else {
        return Err(HandlerErr::new(
            "no_session",
            "session user no longer exists in this workspace",
        ));
    };
    Ok(select_view(&links)?)
}

fn personalized(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let selection = session_view(ctx)?;
    tracing::debug!(view = selection.view_type.as_str(), "personalized view");
    let settings = load_settings(ctx.conn)?;
    let periods = store::list_periods(ctx.conn, &term.id)?;
    let slots = store::list_slots(ctx.conn, &term.id, &SlotFilter::default())?;
    let visible: Vec<&Slot> = selection.filter.apply(&slots);
    Ok(json!({
        "viewType": selection.view_type,
        "filterData": selection.filter.to_json(),
        "termInfo": term,
        "workingDays": settings.working_days,
        "periods": visible_periods(&periods, &settings),
        "lunchAfterPeriod": settings.lunch_after_period,
        "slots": visible,
    }))
}

fn parse_view_type(raw: &str) -> Result<ViewType, HandlerErr> {
    [
        ViewType::Admin,
        ViewType::Teacher,
        ViewType::Student,
        ViewType::Guardian,
    ]
    .into_iter()
    .find(|v| v.as_str() == raw)
    .ok_or_else(|| HandlerErr::bad_params(format!("unknown viewType: {}", raw)))
}

/// An explicit teacher/class/room filter, if the request carries one.
fn explicit_selection(ctx: &Ctx<'_>) -> Result<Option<ViewSelection>, HandlerErr> {
    let teacher_id = get_optional_str(ctx.params, "teacherId")?;
    let class_id = get_optional_str(ctx.params, "classId")?;
    let room_id = get_optional_str(ctx.params, "roomId")?;
    let given = [&teacher_id, &class_id, &room_id]
        .iter()
        .filter(|v| v.is_some())
        .count();
    if given > 1 {
        return Err(HandlerErr::bad_params(
            "pass at most one of teacherId, classId, roomId",
        ));
    }
    let selection = if let Some(teacher_id) = teacher_id {
        ViewSelection {
            view_type: ViewType::Teacher,
            filter: ViewFilter::Teacher { teacher_id },
        }
    } else if let Some(class_id) = class_id {
        ViewSelection {
            view_type: ViewType::Student,
            filter: ViewFilter::Class {
                class_id,
                student_id: None,
            },
        }
    } else if let Some(room_id) = room_id {
        ViewSelection {
            view_type: ViewType::Admin,
            filter: ViewFilter::Room { room_id },
        }
    } else {
        return Ok(None);
    };
    Ok(Some(selection))
}

fn require_filtered_entity(conn: &Connection, filter: &ViewFilter) -> Result<(), HandlerErr> {
    let (table, id, what) = match filter {
        ViewFilter::Teacher { teacher_id } => ("teachers", teacher_id, "teacher"),
        ViewFilter::Class { class_id, .. } => ("classes", class_id, "class"),
        ViewFilter::Room { room_id } => ("rooms", room_id, "room"),
        ViewFilter::Unrestricted | ViewFilter::Children { .. } => return Ok(()),
    };
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{} not found", what)))
    }
}

fn grid(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let mut selection = match explicit_selection(ctx)? {
        Some(explicit) => {
            let Some(user_id) = ctx.session_user else {
                return Err(HandlerErr::new("no_session", "call session.set first"));
            };
            let links = store::user_links(ctx.conn, user_id)?;
            let is_admin = links
                .as_ref()
                .is_some_and(|l| Role::parse(&l.role) == Role::Admin);
            if !is_admin {
                return Err(HandlerErr::new(
                    "forbidden",
                    "explicit grid filters require an admin session",
                ));
            }
            require_filtered_entity(ctx.conn, &explicit.filter)?;
            explicit
        }
        None => session_view(ctx)?,
    };
    if let Some(raw) = get_optional_str(ctx.params, "viewType")? {
        selection.view_type = parse_view_type(&raw)?;
    }

    let settings = load_settings(ctx.conn)?;
    let periods = store::list_periods(ctx.conn, &term.id)?;
    let slots = store::list_slots(ctx.conn, &term.id, &SlotFilter::default())?;
    let options = GridOptions {
        working_days: settings.working_days.clone(),
        lunch_after_period: settings.lunch_after_period,
        rtl: settings.rtl,
        view_type: selection.view_type,
    };
    let visible = selection.filter.apply(&slots);
    let model = TimetableGrid::new(visible, &periods, &options).to_model();
    Ok(json!({
        "termId": term.id,
        "filterData": selection.filter.to_json(),
        "grid": model,
    }))
}

fn workloads(ctx: &Ctx<'_>) -> Result<Value, HandlerErr> {
    let term = resolve_term(ctx)?;
    let slots = store::list_slots(ctx.conn, &term.id, &SlotFilter::default())?;
    Ok(json!({ "termId": term.id, "workloads": workloads_by_teacher(&slots) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Ctx<'_>) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "timetable.slots.list" => slots_list,
        "timetable.slots.upsert" => slots_upsert,
        "timetable.slots.delete" => slots_delete,
        "timetable.byClass" => by_class,
        "timetable.byTeacher" => by_teacher,
        "timetable.byRoom" => by_room,
        "timetable.detectConflicts" => detect,
        "timetable.personalized" => personalized,
        "timetable.grid" => grid,
        "timetable.workloads" => workloads,
        _ => return None,
    };
    Some(with_workspace(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::model::period;

    #[test]
    fn break_periods_hidden_unless_enabled() {
        let periods = vec![period("P1", 1, false), period("B", 2, true)];
        let mut settings = TimetableSettings::default();
        assert_eq!(visible_periods(&periods, &settings).len(), 1);
        settings.show_breaks = true;
        assert_eq!(visible_periods(&periods, &settings).len(), 2);
    }

    #[test]
    fn view_type_names_parse() {
        assert_eq!(parse_view_type("guardian").ok(), Some(ViewType::Guardian));
        assert!(parse_view_type("principal").is_err());
    }
}
