use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::grading;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, now_rfc3339, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};

struct CourseRecordRow {
    semester: i64,
    mid_term_marks: f64,
    attendance: f64,
    assignments: f64,
    quiz_score: Option<f64>,
}

fn fetch_record(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<CourseRecordRow, HandlerErr> {
    conn.query_row(
        "SELECT semester, mid_term_marks, attendance, assignments, quiz_score
         FROM student_courses
         WHERE student_id = ? AND course_id = ?",
        (student_id, course_id),
        |r| {
            Ok(CourseRecordRow {
                semester: r.get(0)?,
                mid_term_marks: r.get(1)?,
                attendance: r.get(2)?,
                assignments: r.get(3)?,
                quiz_score: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "student course not found"))
}

fn semester_sgpa(
    conn: &Connection,
    student_id: &str,
    semester: i64,
) -> Result<Option<f64>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT credits, predicted_grade_point FROM student_courses
             WHERE student_id = ? AND semester = ?",
        )
        .map_err(HandlerErr::db)?;
    let courses = stmt
        .query_map((student_id, semester), |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, Option<i64>>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(grading::sgpa(courses))
}

/// Deterministic payload the shell embeds in its gateway prompt. The course
/// difficulty bucket comes from the course-wide mid-term average.
fn handle_context(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let record = fetch_record(conn, &student_id, &course_id)?;

    let avg_mid_term: f64 = conn
        .query_row(
            "SELECT AVG(mid_term_marks) FROM student_courses WHERE course_id = ?",
            [&course_id],
            |r| r.get::<_, Option<f64>>(0),
        )
        .map_err(HandlerErr::db)?
        .unwrap_or(0.0);

    let difficulty = if avg_mid_term >= 15.0 {
        "easy"
    } else if avg_mid_term < 10.0 {
        "hard"
    } else {
        "medium"
    };

    Ok(ok(
        &req.id,
        json!({
            "midTermMarks": record.mid_term_marks,
            "assignments": record.assignments,
            "attendance": record.attendance,
            "quizScore": record.quiz_score.unwrap_or(0.0),
            "courseDifficulty": difficulty,
            "avgMidTermOfCourse": grading::round_dp(avg_mid_term, 2),
        }),
    ))
}

fn handle_apply(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let raw_prediction = get_required_str(&req.params, "rawPrediction")?;

    let record = fetch_record(conn, &student_id, &course_id)?;
    let (end_term, predicted) = grading::predict_course(
        record.mid_term_marks,
        record.assignments,
        record.attendance,
        record.quiz_score,
        &raw_prediction,
    );

    conn.execute(
        "UPDATE student_courses
         SET predicted_end_term_marks = ?, predicted_letter = ?, predicted_grade_point = ?,
             predicted_total = ?, updated_at = ?
         WHERE student_id = ? AND course_id = ?",
        rusqlite::params![
            end_term,
            predicted.letter,
            predicted.grade_point,
            predicted.total,
            now_rfc3339(),
            student_id,
            course_id,
        ],
    )
    .map_err(HandlerErr::db)?;

    let sgpa = semester_sgpa(conn, &student_id, record.semester)?;

    Ok(ok(
        &req.id,
        json!({
            "predictedEndTerm": end_term,
            "totalMarks": grading::round_dp(predicted.total, 2),
            "grade": predicted.letter,
            "gradePoint": predicted.grade_point,
            "predictedGrade": predicted.display(),
            "sgpa": sgpa.map(|v| grading::round_dp(v, 2)),
        }),
    ))
}

/// Per-course summary array the shell feeds to the external advisor call.
fn handle_insights_context(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;

    let mut stmt = conn
        .prepare(
            "SELECT course_name, credits, mid_term_marks, attendance, assignments, quiz_score,
                    predicted_letter, predicted_grade_point, predicted_total,
                    predicted_end_term_marks
             FROM student_courses
             WHERE student_id = ?
             ORDER BY semester, course_name",
        )
        .map_err(HandlerErr::db)?;
    let courses = stmt
        .query_map([&student_id], |r| {
            let letter: Option<String> = r.get(6)?;
            let grade_point: Option<i64> = r.get(7)?;
            let total: Option<f64> = r.get(8)?;
            let predicted_grade = match (letter, grade_point, total) {
                (Some(l), Some(gp), Some(t)) => Some(grading::display_grade(&l, gp, t)),
                _ => None,
            };
            Ok(json!({
                "name": r.get::<_, String>(0)?,
                "credits": r.get::<_, i64>(1)?,
                "midTerm": r.get::<_, f64>(2)?,
                "attendance": r.get::<_, f64>(3)?,
                "assignments": r.get::<_, f64>(4)?,
                "quizScore": r.get::<_, Option<f64>>(5)?,
                "predictedGrade": predicted_grade,
                "predictedEndTerm": r.get::<_, Option<f64>>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(ok(&req.id, json!({ "courses": courses })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "prediction.context" => {
            Some(handle_context(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "prediction.apply" => Some(handle_apply(state, req).unwrap_or_else(|e| e.response(&req.id))),
        "insights.context" => {
            Some(handle_insights_context(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
