use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::grading;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_f64, get_required_i64, get_required_str,
    now_rfc3339, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

struct IncomingRecord {
    student_id: String,
    student_name: String,
    student_email: String,
    course_id: String,
    course_name: String,
    credits: i64,
    semester: i64,
    mid_term_marks: f64,
    attendance: f64,
    assignments: f64,
    quiz_score: Option<f64>,
}

fn parse_record(item: &serde_json::Value) -> Result<IncomingRecord, HandlerErr> {
    Ok(IncomingRecord {
        student_id: get_required_str(item, "studentId")?,
        student_name: get_required_str(item, "studentName")?,
        student_email: get_required_str(item, "studentEmail")?,
        course_id: get_required_str(item, "courseId")?,
        course_name: get_required_str(item, "courseName")?,
        credits: get_required_i64(item, "credits")?,
        semester: get_required_i64(item, "semester")?,
        mid_term_marks: get_required_f64(item, "midTermMarks")?,
        attendance: get_required_f64(item, "attendance")?,
        assignments: get_required_f64(item, "assignments")?,
        quiz_score: get_optional_f64(item, "quizScore")?,
    })
}

// Range validation lives here, at ingestion; the grading pipeline itself
// computes with whatever numbers it is handed.
fn validate_record(rec: &IncomingRecord) -> Result<(), HandlerErr> {
    if !(1..=6).contains(&rec.credits) {
        return Err(HandlerErr::bad_params(format!(
            "invalid credits for {}: must be between 1 and 6",
            rec.course_name
        )));
    }
    if !(1..=8).contains(&rec.semester) {
        return Err(HandlerErr::bad_params(format!(
            "invalid semester for {}: must be between 1 and 8",
            rec.student_name
        )));
    }
    if !(0.0..=20.0).contains(&rec.mid_term_marks) {
        return Err(HandlerErr::bad_params(format!(
            "invalid midTermMarks for {}: must be between 0 and 20",
            rec.student_name
        )));
    }
    if !(0.0..=10.0).contains(&rec.assignments) {
        return Err(HandlerErr::bad_params(format!(
            "invalid assignments for {}: must be between 0 and 10",
            rec.student_name
        )));
    }
    if !(0.0..=100.0).contains(&rec.attendance) {
        return Err(HandlerErr::bad_params(format!(
            "invalid attendance for {}: must be between 0 and 100",
            rec.student_name
        )));
    }
    if let Some(quiz) = rec.quiz_score {
        if !(0.0..=100.0).contains(&quiz) {
            return Err(HandlerErr::bad_params(format!(
                "invalid quizScore for {}: must be between 0 and 100",
                rec.student_name
            )));
        }
    }
    Ok(())
}

fn handle_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let Some(items) = req.params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records array"));
    };

    // Validate the whole batch before touching the table, so a bad row in
    // the middle of an upload cannot leave a half-applied batch behind.
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let rec = parse_record(item)?;
        validate_record(&rec)?;
        records.push(rec);
    }

    let now = now_rfc3339();
    let mut inserted = 0_usize;
    let mut updated = 0_usize;
    for rec in &records {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM student_courses WHERE student_id = ? AND course_id = ?",
                (&rec.student_id, &rec.course_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;

        // Replacing the raw inputs invalidates anything derived from them,
        // so the predicted fields are cleared on conflict.
        conn.execute(
            "INSERT INTO student_courses
             (id, faculty_id, student_id, student_name, student_email, course_id, course_name,
              credits, semester, mid_term_marks, attendance, assignments, quiz_score,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id) DO UPDATE SET
               faculty_id = excluded.faculty_id,
               student_name = excluded.student_name,
               student_email = excluded.student_email,
               course_name = excluded.course_name,
               credits = excluded.credits,
               semester = excluded.semester,
               mid_term_marks = excluded.mid_term_marks,
               attendance = excluded.attendance,
               assignments = excluded.assignments,
               quiz_score = excluded.quiz_score,
               predicted_end_term_marks = NULL,
               predicted_letter = NULL,
               predicted_grade_point = NULL,
               predicted_total = NULL,
               updated_at = excluded.updated_at",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                faculty_id,
                rec.student_id,
                rec.student_name,
                rec.student_email,
                rec.course_id,
                rec.course_name,
                rec.credits,
                rec.semester,
                rec.mid_term_marks,
                rec.attendance,
                rec.assignments,
                rec.quiz_score,
                now,
                now,
            ],
        )
        .map_err(HandlerErr::db)?;

        if exists.is_some() {
            updated += 1;
        } else {
            inserted += 1;
        }
    }

    Ok(ok(
        &req.id,
        json!({ "inserted": inserted, "updated": updated }),
    ))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_optional_str(&req.params, "facultyId");
    let student_id = get_optional_str(&req.params, "studentId");

    let (filter_column, filter_value) = match (&faculty_id, &student_id) {
        (Some(f), None) => ("faculty_id", f.as_str()),
        (None, Some(s)) => ("student_id", s.as_str()),
        _ => {
            return Err(HandlerErr::bad_params(
                "exactly one of facultyId or studentId is required",
            ))
        }
    };

    let sql = format!(
        "SELECT id, faculty_id, student_id, student_name, student_email, course_id, course_name,
                credits, semester, mid_term_marks, attendance, assignments, quiz_score,
                predicted_end_term_marks, predicted_letter, predicted_grade_point, predicted_total
         FROM student_courses
         WHERE {} = ?
         ORDER BY student_id, semester, course_name",
        filter_column
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([filter_value], |r| {
            let letter: Option<String> = r.get(14)?;
            let grade_point: Option<i64> = r.get(15)?;
            let total: Option<f64> = r.get(16)?;
            // The combined string is presentation-only; it is rebuilt from
            // the typed columns here at the boundary.
            let predicted_grade = match (letter, grade_point, total) {
                (Some(l), Some(gp), Some(t)) => Some(grading::display_grade(&l, gp, t)),
                _ => None,
            };
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "facultyId": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "studentName": r.get::<_, String>(3)?,
                "studentEmail": r.get::<_, String>(4)?,
                "courseId": r.get::<_, String>(5)?,
                "courseName": r.get::<_, String>(6)?,
                "credits": r.get::<_, i64>(7)?,
                "semester": r.get::<_, i64>(8)?,
                "midTermMarks": r.get::<_, f64>(9)?,
                "attendance": r.get::<_, f64>(10)?,
                "assignments": r.get::<_, f64>(11)?,
                "quizScore": r.get::<_, Option<f64>>(12)?,
                "predictedEndTermMarks": r.get::<_, Option<f64>>(13)?,
                "predictedGrade": predicted_grade,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(ok(&req.id, json!({ "records": rows })))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let course_id = get_required_str(&req.params, "courseId")?;

    let deleted = conn
        .execute(
            "DELETE FROM student_courses WHERE student_id = ? AND course_id = ?",
            (&student_id, &course_id),
        )
        .map_err(HandlerErr::db)?;

    Ok(ok(&req.id, json!({ "deleted": deleted })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.upsert" => Some(handle_upsert(state, req).unwrap_or_else(|e| e.response(&req.id))),
        "records.list" => Some(handle_list(state, req).unwrap_or_else(|e| e.response(&req.id))),
        "records.delete" => Some(handle_delete(state, req).unwrap_or_else(|e| e.response(&req.id))),
        _ => None,
    }
}
