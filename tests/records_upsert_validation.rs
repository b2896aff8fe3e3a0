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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_trackitd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn trackitd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn base_record(student_id: &str, course_id: &str) -> serde_json::Value {
    json!({
        "studentId": student_id,
        "studentName": format!("Student {student_id}"),
        "studentEmail": format!("{student_id}@example.edu"),
        "courseId": course_id,
        "courseName": format!("Course {course_id}"),
        "credits": 4,
        "semester": 1,
        "midTermMarks": 15.0,
        "attendance": 90.0,
        "assignments": 8.0
    })
}

#[test]
fn upsert_inserts_then_replaces_on_same_pair() {
    let workspace = temp_dir("trackit-upsert");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.upsert",
        json!({
            "facultyId": "f1",
            "records": [base_record("s1", "c1"), base_record("s1", "c2")]
        }),
    );
    assert_eq!(first["inserted"], 2);
    assert_eq!(first["updated"], 0);

    let mut replacement = base_record("s1", "c1");
    replacement["midTermMarks"] = json!(7.0);
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.upsert",
        json!({ "facultyId": "f1", "records": [replacement] }),
    );
    assert_eq!(second["inserted"], 0);
    assert_eq!(second["updated"], 1);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.list",
        json!({ "studentId": "s1" }),
    );
    let records = listed["records"].as_array().expect("records array");
    assert_eq!(records.len(), 2);
    let c1 = records
        .iter()
        .find(|r| r["courseId"] == "c1")
        .expect("c1 row");
    assert_eq!(c1["midTermMarks"], 7.0);
}

#[test]
fn upsert_clears_predicted_fields_for_replaced_rows() {
    let workspace = temp_dir("trackit-upsert-clear");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.upsert",
        json!({ "facultyId": "f1", "records": [base_record("s1", "c1")] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "prediction.apply",
        json!({ "studentId": "s1", "courseId": "c1", "rawPrediction": "40" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.list",
        json!({ "studentId": "s1" }),
    );
    assert!(listed["records"][0]["predictedGrade"].is_string());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "records.upsert",
        json!({ "facultyId": "f1", "records": [base_record("s1", "c1")] }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "records.list",
        json!({ "studentId": "s1" }),
    );
    assert!(listed["records"][0]["predictedGrade"].is_null());
    assert!(listed["records"][0]["predictedEndTermMarks"].is_null());
}

#[test]
fn out_of_range_rows_reject_the_whole_batch() {
    let workspace = temp_dir("trackit-upsert-range");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut bad = base_record("s2", "c9");
    bad["midTermMarks"] = json!(25.0);
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "records.upsert",
        json!({ "facultyId": "f1", "records": [base_record("s1", "c1"), bad] }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_params");

    // The valid first row must not have been applied either.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.list",
        json!({ "studentId": "s1" }),
    );
    assert!(listed["records"].as_array().expect("array").is_empty());

    let mut bad_credits = base_record("s3", "c3");
    bad_credits["credits"] = json!(7);
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "records.upsert",
        json!({ "facultyId": "f1", "records": [bad_credits] }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_params");
}

#[test]
fn delete_removes_one_enrollment() {
    let workspace = temp_dir("trackit-delete");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.upsert",
        json!({
            "facultyId": "f1",
            "records": [base_record("s1", "c1"), base_record("s1", "c2")]
        }),
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.delete",
        json!({ "studentId": "s1", "courseId": "c1" }),
    );
    assert_eq!(deleted["deleted"], 1);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.list",
        json!({ "studentId": "s1" }),
    );
    let records = listed["records"].as_array().expect("records array");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["courseId"], "c2");
}
