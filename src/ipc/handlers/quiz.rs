use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{get_i64_array, get_required_str, now_rfc3339, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};

// Quiz questions come from the UI shell; the daemon only grades the answer
// sheet and records the percentage. The shell is expected to re-run the
// prediction afterwards, since the stored grade now reflects stale inputs.
fn handle_submit(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let answers = get_i64_array(&req.params, "answers")?;
    let correct_answers = get_i64_array(&req.params, "correctAnswers")?;

    if correct_answers.is_empty() {
        return Err(HandlerErr::bad_params("empty question set"));
    }
    if answers.len() != correct_answers.len() {
        return Err(HandlerErr::bad_params(
            "answers and correctAnswers must have the same length",
        ));
    }

    let correct = answers
        .iter()
        .zip(correct_answers.iter())
        .filter(|(a, c)| a == c)
        .count();
    let score = (100.0 * correct as f64 / correct_answers.len() as f64).round() as i64;

    let changed = conn
        .execute(
            "UPDATE student_courses SET quiz_score = ?, updated_at = ?
             WHERE student_id = ? AND course_id = ?",
            rusqlite::params![score, now_rfc3339(), student_id, course_id],
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student course not found"));
    }

    Ok(ok(
        &req.id,
        json!({
            "score": score,
            "correctAnswers": correct,
            "totalQuestions": correct_answers.len(),
            "percentage": score,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quiz.submit" => Some(handle_submit(state, req).unwrap_or_else(|e| e.response(&req.id))),
        _ => None,
    }
}
