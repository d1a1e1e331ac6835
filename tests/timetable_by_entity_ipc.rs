use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .env_remove("TIMETABLED_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

fn create(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    key: &str,
) -> String {
    let res = request_ok(stdin, reader, id, method, params);
    str_field(&res, key)
}

fn count(v: &serde_json::Value) -> usize {
    v.as_array().map(|a| a.len()).unwrap_or(0)
}

struct Seeded {
    term_id: String,
    periods: Vec<String>,
    classes: Vec<String>,
    teacher: String,
    rooms: Vec<String>,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let term_id = create(
        stdin,
        reader,
        "term",
        "terms.create",
        json!({ "number": 1, "label": "Autumn", "year": 2026, "active": true }),
        "termId",
    );
    let mut periods = Vec::new();
    for (i, (name, start, end, is_break)) in [
        ("Period 1", "08:00", "08:45", false),
        ("Period 2", "08:45", "09:30", false),
        ("Break", "09:30", "09:45", true),
        ("Period 3", "09:45", "10:30", false),
    ]
    .into_iter()
    .enumerate()
    {
        let id = create(
            stdin,
            reader,
            &format!("period-{}", i),
            "periods.create",
            json!({ "name": name, "startTime": start, "endTime": end, "isBreak": is_break }),
            "periodId",
        );
        if !is_break {
            periods.push(id);
        }
    }
    let classes: Vec<String> = ["8A", "8B"]
        .iter()
        .map(|name| {
            create(
                stdin,
                reader,
                &format!("class-{}", name),
                "classes.create",
                json!({ "name": name }),
                "classId",
            )
        })
        .collect();
    let teacher = create(
        stdin,
        reader,
        "teacher",
        "teachers.create",
        json!({ "firstName": "Grace", "lastName": "Hopper" }),
        "teacherId",
    );
    let rooms: Vec<String> = [("Lab", 24), ("Hall", 120)]
        .iter()
        .map(|(name, capacity)| {
            create(
                stdin,
                reader,
                &format!("room-{}", name),
                "rooms.create",
                json!({ "name": name, "capacity": capacity }),
                "roomId",
            )
        })
        .collect();
    let _ = create(
        stdin,
        reader,
        "student",
        "students.create",
        json!({ "classId": classes[0], "firstName": "Ann", "lastName": "Lee" }),
        "studentId",
    );

    for (i, (day, period, class, room, subject)) in [
        (0, 0usize, 0usize, 0usize, "Chemistry"),
        (1, 1, 1, 1, "Physics"),
        (3, 2, 0, 0, "Chemistry"),
    ]
    .into_iter()
    .enumerate()
    {
        let _ = request_ok(
            stdin,
            reader,
            &format!("slot-{}", i),
            "timetable.slots.upsert",
            json!({
                "dayOfWeek": day, "periodId": periods[period], "classId": classes[class],
                "teacherId": teacher, "roomId": rooms[room], "subject": subject
            }),
        );
    }

    Seeded {
        term_id,
        periods,
        classes,
        teacher,
        rooms,
    }
}

fn open_workspace(prefix: &str) -> (PathBuf, Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    (workspace, child, stdin, reader)
}

#[test]
fn entity_views_return_slots_info_and_periods() {
    let (workspace, mut child, mut stdin, mut reader) = open_workspace("timetabled-by-entity");
    let s = seed(&mut stdin, &mut reader);

    let by_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "t",
        "timetable.byTeacher",
        json!({ "teacherId": s.teacher }),
    );
    assert_eq!(count(&by_teacher["slots"]), 3);
    assert_eq!(by_teacher["teacherInfo"]["displayName"], json!("Grace Hopper"));
    assert_eq!(
        by_teacher["workload"],
        json!({
            "teacherId": s.teacher,
            "daysCount": 3,
            "periodsCount": 3,
            "classesCount": 2,
            "days": [0, 1, 3]
        })
    );
    assert_eq!(count(&by_teacher["periods"]), 3);
    let days: Vec<i64> = by_teacher["slots"]
        .as_array()
        .expect("slots")
        .iter()
        .map(|x| x["dayOfWeek"].as_i64().expect("day"))
        .collect();
    assert_eq!(days, vec![0, 1, 3]);

    let by_class = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "timetable.byClass",
        json!({ "classId": s.classes[0] }),
    );
    assert_eq!(count(&by_class["slots"]), 2);
    assert_eq!(by_class["classInfo"]["name"], json!("8A"));
    assert_eq!(by_class["classInfo"]["studentCount"], json!(1));
    assert_eq!(by_class["slots"][0]["teacherName"], json!("Grace Hopper"));
    assert_eq!(by_class["slots"][0]["roomName"], json!("Lab"));

    let by_room = request_ok(
        &mut stdin,
        &mut reader,
        "r",
        "timetable.byRoom",
        json!({ "roomId": s.rooms[1] }),
    );
    assert_eq!(count(&by_room["slots"]), 1);
    assert_eq!(by_room["roomInfo"]["capacity"], json!(120));
    assert_eq!(by_room["slots"][0]["subject"], json!("Physics"));

    let workloads = request_ok(&mut stdin, &mut reader, "w", "timetable.workloads", json!({}));
    assert_eq!(count(&workloads["workloads"]), 1);
    assert_eq!(workloads["workloads"][0]["periodsCount"], json!(3));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "breaks",
        "setup.update",
        json!({ "section": "timetable", "patch": { "showBreaks": true } }),
    );
    let with_breaks = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "timetable.byClass",
        json!({ "classId": s.classes[0] }),
    );
    assert_eq!(count(&with_breaks["periods"]), 4);

    for (id, method, params, code) in [
        ("e1", "timetable.byTeacher", json!({ "teacherId": "nobody" }), "not_found"),
        ("e2", "timetable.byClass", json!({}), "bad_params"),
        ("e3", "timetable.byRoom", json!({ "roomId": s.rooms[0], "termId": "old" }), "not_found"),
    ] {
        assert_eq!(request_err(&mut stdin, &mut reader, id, method, params), code);
    }

    let unknown_term = request(
        &mut stdin,
        &mut reader,
        "e4",
        "timetable.byClass",
        json!({ "classId": s.classes[0], "termId": "old" }),
    );
    assert_eq!(unknown_term["error"]["code"], json!("not_found"));
    assert_eq!(unknown_term["error"]["details"]["termId"], json!("old"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn switching_the_active_term_changes_the_default_view() {
    let (workspace, mut child, mut stdin, mut reader) = open_workspace("timetabled-terms");
    let s = seed(&mut stdin, &mut reader);

    let next = create(
        &mut stdin,
        &mut reader,
        "term-2",
        "terms.create",
        json!({ "number": 2, "label": "Spring", "year": 2027 }),
        "termId",
    );
    let listed = request_ok(&mut stdin, &mut reader, "list", "terms.list", json!({}));
    let active: Vec<&str> = listed["terms"]
        .as_array()
        .expect("terms")
        .iter()
        .filter(|t| t["isActive"] == json!(true))
        .filter_map(|t| t["id"].as_str())
        .collect();
    assert_eq!(active, vec![s.term_id.as_str()]);

    let explicit = request_ok(
        &mut stdin,
        &mut reader,
        "explicit",
        "timetable.byTeacher",
        json!({ "teacherId": s.teacher, "termId": next }),
    );
    assert_eq!(count(&explicit["slots"]), 0);
    assert_eq!(explicit["workload"]["daysCount"], json!(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "activate",
        "terms.setActive",
        json!({ "termId": next }),
    );
    let slots = request_ok(&mut stdin, &mut reader, "slots", "timetable.slots.list", json!({}));
    assert_eq!(slots["termId"], json!(next));
    assert_eq!(count(&slots["slots"]), 0);

    // Periods are per term; the old term's period is not valid here.
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "cross-term",
            "timetable.slots.upsert",
            json!({
                "dayOfWeek": 0, "periodId": s.periods[0], "classId": s.classes[0],
                "teacherId": s.teacher, "roomId": s.rooms[0], "subject": "Chemistry"
            }),
        ),
        "bad_params"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grid_lays_out_columns_rows_and_lunch() {
    let (workspace, mut child, mut stdin, mut reader) = open_workspace("timetabled-grid");
    let s = seed(&mut stdin, &mut reader);
    let admin = create(
        &mut stdin,
        &mut reader,
        "admin",
        "users.create",
        json!({ "displayName": "Office", "role": "admin" }),
        "userId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "session",
        "session.set",
        json!({ "userId": admin }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "layout",
        "setup.update",
        json!({
            "section": "timetable",
            "patch": { "lunchAfterPeriod": 2, "rtl": true, "workingDays": [4, 3, 2, 1, 0] }
        }),
    );

    let res = request_ok(&mut stdin, &mut reader, "grid", "timetable.grid", json!({}));
    let grid = &res["grid"];
    assert_eq!(grid["viewType"], json!("admin"));
    assert_eq!(grid["rtl"], json!(true));
    let columns: Vec<i64> = grid["columns"]
        .as_array()
        .expect("columns")
        .iter()
        .map(|c| c["dayOfWeek"].as_i64().expect("day"))
        .collect();
    assert_eq!(columns, vec![4, 3, 2, 1, 0]);
    assert_eq!(grid["columns"][4]["label"], json!("Sunday"));

    let rows = grid["rows"].as_array().expect("rows");
    let kinds: Vec<&str> = rows.iter().filter_map(|r| r["kind"].as_str()).collect();
    assert_eq!(kinds, vec!["period", "period", "lunch", "period"]);
    assert_eq!(rows[2]["afterPeriodId"], json!(s.periods[1]));
    assert_eq!(rows[0]["periodId"], json!(s.periods[0]));

    // Sunday is the last column under RTL.
    let sunday_p1 = &rows[0]["cells"][4];
    assert_eq!(sunday_p1["dayOfWeek"], json!(0));
    let entry = &sunday_p1["entries"][0];
    assert_eq!(entry["subject"], json!("Chemistry"));
    assert_eq!(entry["class"], json!("8A"));
    assert_eq!(entry["teacher"], json!("Grace Hopper"));
    assert_eq!(entry["room"], json!("Lab"));
    let thursday_p3 = &rows[3]["cells"][1];
    assert_eq!(thursday_p3["dayOfWeek"], json!(3));
    assert_eq!(thursday_p3["entries"][0]["color"], entry["color"]);
    assert_eq!(rows[0]["cells"][0]["entries"], json!([]));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "no-lunch",
        "setup.update",
        json!({ "section": "timetable", "patch": { "lunchAfterPeriod": 3 } }),
    );
    let res = request_ok(&mut stdin, &mut reader, "grid2", "timetable.grid", json!({}));
    let kinds: Vec<&str> = res["grid"]["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["period", "period", "period"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
