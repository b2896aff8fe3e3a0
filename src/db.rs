use rusqlite::Connection;
use std::path::Path;

use crate::grading;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("trackit.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_courses(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            student_email TEXT NOT NULL,
            course_id TEXT NOT NULL,
            course_name TEXT NOT NULL,
            credits INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            mid_term_marks REAL NOT NULL,
            attendance REAL NOT NULL,
            assignments REAL NOT NULL,
            quiz_score REAL,
            predicted_end_term_marks REAL,
            predicted_letter TEXT,
            predicted_grade_point INTEGER,
            predicted_total REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_faculty ON student_courses(faculty_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_student ON student_courses(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_course ON student_courses(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_student_semester
         ON student_courses(student_id, semester)",
        [],
    )?;

    // Quizzes shipped after the first release; older workspaces may lack
    // the column entirely.
    ensure_quiz_score(&conn)?;
    ensure_predicted_columns(&conn)?;
    migrate_predicted_grade_strings(&conn)?;

    Ok(conn)
}

fn ensure_quiz_score(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "student_courses", "quiz_score")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE student_courses ADD COLUMN quiz_score REAL", [])?;
    Ok(())
}

fn ensure_predicted_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "student_courses", "predicted_end_term_marks")? {
        conn.execute(
            "ALTER TABLE student_courses ADD COLUMN predicted_end_term_marks REAL",
            [],
        )?;
    }
    if !table_has_column(conn, "student_courses", "predicted_letter")? {
        conn.execute(
            "ALTER TABLE student_courses ADD COLUMN predicted_letter TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "student_courses", "predicted_grade_point")? {
        conn.execute(
            "ALTER TABLE student_courses ADD COLUMN predicted_grade_point INTEGER",
            [],
        )?;
    }
    if !table_has_column(conn, "student_courses", "predicted_total")? {
        conn.execute(
            "ALTER TABLE student_courses ADD COLUMN predicted_total REAL",
            [],
        )?;
    }
    Ok(())
}

/// Early workspaces persisted the prediction as the combined display string
/// ("A+ (GP: 9, Total: 87.50/100)") in a predicted_grade column. Split it
/// into the typed columns; strings the extractors cannot read leave the
/// typed columns NULL.
fn migrate_predicted_grade_strings(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "student_courses", "predicted_grade")? {
        return Ok(());
    }

    let mut stmt = conn.prepare(
        "SELECT id, predicted_grade FROM student_courses
         WHERE predicted_grade IS NOT NULL AND predicted_letter IS NULL",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    for (id, raw) in rows {
        let letter = grading::parse_grade_letter(&raw).map(|s| s.to_string());
        let grade_point = grading::parse_grade_point(&raw);
        let total = grading::parse_total(&raw);
        conn.execute(
            "UPDATE student_courses
             SET predicted_letter = ?, predicted_grade_point = ?, predicted_total = ?
             WHERE id = ?",
            rusqlite::params![letter, grade_point, total, id],
        )?;
    }

    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
