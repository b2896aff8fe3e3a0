use std::collections::{BTreeMap, HashSet};

use rusqlite::Connection;
use serde_json::json;

use crate::grading;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::risk;

struct AnalyticsRow {
    student_id: String,
    student_name: String,
    student_email: String,
    course_name: String,
    credits: i64,
    semester: i64,
    mid_term_marks: f64,
    attendance: f64,
    assignments: f64,
    quiz_score: Option<f64>,
    predicted_letter: Option<String>,
    predicted_grade_point: Option<i64>,
}

enum Scope {
    Faculty,
    Student,
}

fn fetch_rows(conn: &Connection, scope: Scope, id: &str) -> Result<Vec<AnalyticsRow>, HandlerErr> {
    let filter_column = match scope {
        Scope::Faculty => "faculty_id",
        Scope::Student => "student_id",
    };
    let sql = format!(
        "SELECT student_id, student_name, student_email, course_name, credits, semester,
                mid_term_marks, attendance, assignments, quiz_score,
                predicted_letter, predicted_grade_point
         FROM student_courses
         WHERE {} = ?
         ORDER BY student_id, semester, course_name",
        filter_column
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    stmt.query_map([id], |r| {
        Ok(AnalyticsRow {
            student_id: r.get(0)?,
            student_name: r.get(1)?,
            student_email: r.get(2)?,
            course_name: r.get(3)?,
            credits: r.get(4)?,
            semester: r.get(5)?,
            mid_term_marks: r.get(6)?,
            attendance: r.get(7)?,
            assignments: r.get(8)?,
            quiz_score: r.get(9)?,
            predicted_letter: r.get(10)?,
            predicted_grade_point: r.get(11)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn is_at_risk_letter(letter: Option<&str>) -> bool {
    matches!(letter, Some("P") | Some("F"))
}

fn grade_distribution(rows: &[AnalyticsRow]) -> Vec<serde_json::Value> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for row in rows {
        let key = row
            .predicted_letter
            .clone()
            .unwrap_or_else(|| "N/A".to_string());
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(grade, count)| json!({ "grade": grade, "count": count }))
        .collect()
}

fn handle_student_overview(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let rows = fetch_rows(conn, Scope::Student, &student_id)?;

    // Overview SGPA spans every course on record, not one semester.
    let sgpa = grading::sgpa(rows.iter().map(|r| (r.credits, r.predicted_grade_point)));
    let avg_attendance = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|r| r.attendance).sum::<f64>() / rows.len() as f64
    };
    let at_risk = rows
        .iter()
        .filter(|r| is_at_risk_letter(r.predicted_letter.as_deref()))
        .count();

    Ok(ok(
        &req.id,
        json!({
            "sgpa": sgpa.map(|v| grading::round_dp(v, 2)),
            "avgAttendance": grading::round_dp(avg_attendance, 1),
            "atRiskCourses": at_risk,
            "courseCount": rows.len(),
            "gradeDistribution": grade_distribution(&rows),
        }),
    ))
}

fn handle_faculty_overview(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let rows = fetch_rows(conn, Scope::Faculty, &faculty_id)?;

    let students: HashSet<&str> = rows.iter().map(|r| r.student_id.as_str()).collect();
    let courses: HashSet<&str> = rows.iter().map(|r| r.course_name.as_str()).collect();
    let at_risk = rows
        .iter()
        .filter(|r| is_at_risk_letter(r.predicted_letter.as_deref()))
        .count();

    Ok(ok(
        &req.id,
        json!({
            "totalStudents": students.len(),
            "totalCourses": courses.len(),
            "atRiskCourses": at_risk,
            "gradeDistribution": grade_distribution(&rows),
        }),
    ))
}

fn handle_faculty_courses(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let rows = fetch_rows(conn, Scope::Faculty, &faculty_id)?;

    // Difficulty buckets by course-wide mid-term average, hardest first.
    struct DifficultyAcc {
        mid_term_sum: f64,
        count: usize,
    }
    let mut by_course: BTreeMap<&str, DifficultyAcc> = BTreeMap::new();
    for row in &rows {
        let acc = by_course.entry(row.course_name.as_str()).or_insert(DifficultyAcc {
            mid_term_sum: 0.0,
            count: 0,
        });
        acc.mid_term_sum += row.mid_term_marks;
        acc.count += 1;
    }
    let mut course_difficulty: Vec<serde_json::Value> = by_course
        .iter()
        .map(|(name, acc)| {
            let avg = acc.mid_term_sum / acc.count as f64;
            let difficulty = if avg >= 15.0 {
                "Easy"
            } else if avg < 10.0 {
                "Hard"
            } else {
                "Medium"
            };
            json!({
                "courseName": name,
                "avgMidTerm": grading::round_dp(avg, 1),
                "difficulty": difficulty,
                "studentCount": acc.count,
            })
        })
        .collect();
    course_difficulty.sort_by(|a, b| {
        let av = a["avgMidTerm"].as_f64().unwrap_or(0.0);
        let bv = b["avgMidTerm"].as_f64().unwrap_or(0.0);
        av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal)
    });

    // Per-semester credit-weighted grade point averages.
    struct SemesterAcc {
        grade_points: i64,
        credits: i64,
        students: HashSet<String>,
        courses: HashSet<String>,
    }
    let mut by_semester: BTreeMap<i64, SemesterAcc> = BTreeMap::new();
    for row in &rows {
        let acc = by_semester.entry(row.semester).or_insert(SemesterAcc {
            grade_points: 0,
            credits: 0,
            students: HashSet::new(),
            courses: HashSet::new(),
        });
        if let Some(gp) = row.predicted_grade_point {
            acc.grade_points += gp * row.credits;
            acc.credits += row.credits;
        }
        acc.students.insert(row.student_id.clone());
        acc.courses.insert(row.course_name.clone());
    }
    let semester_performance: Vec<serde_json::Value> = by_semester
        .iter()
        .map(|(semester, acc)| {
            let avg_sgpa = if acc.credits > 0 {
                grading::round_dp(acc.grade_points as f64 / acc.credits as f64, 2)
            } else {
                0.0
            };
            json!({
                "semester": semester,
                "avgSgpa": avg_sgpa,
                "courseCount": acc.courses.len(),
                "studentCount": acc.students.len(),
            })
        })
        .collect();

    // Per-course performance, strongest SGPA first.
    struct CourseAcc {
        grade_points: i64,
        weighted_credits: i64,
        credits: i64,
        mid_term_sum: f64,
        attendance_sum: f64,
        assignments_sum: f64,
        count: usize,
    }
    let mut perf_by_course: BTreeMap<&str, CourseAcc> = BTreeMap::new();
    for row in &rows {
        let acc = perf_by_course.entry(row.course_name.as_str()).or_insert(CourseAcc {
            grade_points: 0,
            weighted_credits: 0,
            credits: row.credits,
            mid_term_sum: 0.0,
            attendance_sum: 0.0,
            assignments_sum: 0.0,
            count: 0,
        });
        if let Some(gp) = row.predicted_grade_point {
            acc.grade_points += gp * row.credits;
            acc.weighted_credits += row.credits;
        }
        acc.mid_term_sum += row.mid_term_marks;
        acc.attendance_sum += row.attendance;
        acc.assignments_sum += row.assignments;
        acc.count += 1;
    }
    let mut course_performance: Vec<serde_json::Value> = perf_by_course
        .iter()
        .map(|(name, acc)| {
            let avg_sgpa = if acc.weighted_credits > 0 {
                grading::round_dp(acc.grade_points as f64 / acc.weighted_credits as f64, 2)
            } else {
                0.0
            };
            json!({
                "courseName": name,
                "avgSgpa": avg_sgpa,
                "credits": acc.credits,
                "studentCount": acc.count,
                "avgMidTerm": grading::round_dp(acc.mid_term_sum / acc.count as f64, 1),
                "avgAttendance": grading::round_dp(acc.attendance_sum / acc.count as f64, 0),
                "avgAssignments": grading::round_dp(acc.assignments_sum / acc.count as f64, 1),
            })
        })
        .collect();
    course_performance.sort_by(|a, b| {
        let av = a["avgSgpa"].as_f64().unwrap_or(0.0);
        let bv = b["avgSgpa"].as_f64().unwrap_or(0.0);
        bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(ok(
        &req.id,
        json!({
            "courseDifficulty": course_difficulty,
            "semesterPerformance": semester_performance,
            "coursePerformance": course_performance,
        }),
    ))
}

fn handle_risk_report(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let rows = fetch_rows(conn, Scope::Faculty, &faculty_id)?;

    let roster: Vec<risk::RosterRecord> = rows
        .into_iter()
        .map(|r| risk::RosterRecord {
            student_id: r.student_id,
            student_name: r.student_name,
            student_email: r.student_email,
            course_name: r.course_name,
            mid_term_marks: r.mid_term_marks,
            attendance: r.attendance,
            assignments: r.assignments,
            quiz_score: r.quiz_score,
            predicted_letter: r.predicted_letter,
        })
        .collect();

    let students = risk::classify_roster(&roster);
    Ok(ok(&req.id, json!({ "students": students })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.student.overview" => {
            Some(handle_student_overview(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "analytics.faculty.overview" => {
            Some(handle_faculty_overview(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "analytics.faculty.courses" => {
            Some(handle_faculty_courses(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "risk.report" => {
            Some(handle_risk_report(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
