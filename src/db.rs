use crate::calc;
use crate::model::{Activity, GradeSheet, GradingPeriod, StudentGrade};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("multicourses.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            active INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(course_id)",
        [],
    )?;

    // A grade sheet is one document: the activity list and every student row
    // travel together so a save replaces the whole aggregate atomically.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_sheets(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            grading_period TEXT NOT NULL,
            is_published INTEGER NOT NULL,
            activities TEXT NOT NULL,
            students TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            published_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_sheets_course ON grade_sheets(course_id)",
        [],
    )?;

    Ok(conn)
}

fn parse_rfc3339(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

const SHEET_COLUMNS: &str = "id, course_id, title, grading_period, is_published,
     activities, students, created_at, updated_at, published_at";

pub fn load_sheet(conn: &Connection, sheet_id: &str) -> anyhow::Result<Option<GradeSheet>> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM grade_sheets WHERE id = ?", SHEET_COLUMNS),
            [sheet_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            },
        )
        .optional()?;

    let Some(raw) = raw else {
        return Ok(None);
    };
    Ok(Some(sheet_from_parts(raw)?))
}

type SheetParts = (
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
);

fn sheet_from_parts(parts: SheetParts) -> anyhow::Result<GradeSheet> {
    let (
        id,
        course_id,
        title,
        period_raw,
        is_published,
        activities_json,
        students_json,
        created_at,
        updated_at,
        published_at,
    ) = parts;

    let grading_period = GradingPeriod::parse(&period_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown grading period: {}", period_raw))?;
    let activities: Vec<Activity> = serde_json::from_str(&activities_json)?;
    let students: Vec<StudentGrade> = serde_json::from_str(&students_json)?;

    let mut sheet = GradeSheet {
        id,
        course_id,
        title,
        grading_period,
        is_published: is_published != 0,
        activities,
        students,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
        published_at: published_at.as_deref().map(parse_rfc3339).transpose()?,
    };

    // Persisted documents are never trusted for derived state: re-clamp
    // maxScore, backfill cells, rebuild total/status, restore name order.
    calc::normalize_sheet(&mut sheet);
    Ok(sheet)
}

pub fn sheets_for_course(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<GradeSheet>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM grade_sheets WHERE course_id = ? ORDER BY created_at, id",
        SHEET_COLUMNS
    ))?;
    let parts = stmt
        .query_map([course_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?
        .collect::<Result<Vec<SheetParts>, _>>()?;

    parts.into_iter().map(sheet_from_parts).collect()
}

/// Full-document upsert: one row replaces the activity list and every student
/// mapping in a single statement.
pub fn save_sheet(conn: &Connection, sheet: &GradeSheet) -> anyhow::Result<()> {
    let activities = serde_json::to_string(&sheet.activities)?;
    let students = serde_json::to_string(&sheet.students)?;
    conn.execute(
        "INSERT INTO grade_sheets(
            id, course_id, title, grading_period, is_published,
            activities, students, created_at, updated_at, published_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            grading_period = excluded.grading_period,
            is_published = excluded.is_published,
            activities = excluded.activities,
            students = excluded.students,
            updated_at = excluded.updated_at,
            published_at = excluded.published_at",
        (
            &sheet.id,
            &sheet.course_id,
            &sheet.title,
            sheet.grading_period.as_str(),
            sheet.is_published as i64,
            &activities,
            &students,
            sheet.created_at.to_rfc3339(),
            sheet.updated_at.to_rfc3339(),
            sheet.published_at.map(|t| t.to_rfc3339()),
        ),
    )?;
    Ok(())
}

/// Returns false when the sheet does not exist. Deleting a sheet implicitly
/// removes its contribution from every student's progress.
pub fn delete_sheet(conn: &Connection, sheet_id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM grade_sheets WHERE id = ?", [sheet_id])?;
    Ok(n > 0)
}
