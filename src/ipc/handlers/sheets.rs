use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_sheet_or_err, require_confirm, require_teacher, required_str, session,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::model::{self, Activity, GradeSheet, GradingPeriod, StudentGrade};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_activity(req: &Request, raw: &serde_json::Value) -> Result<Activity, serde_json::Value> {
    let Some(obj) = raw.as_object() else {
        return Err(err(&req.id, "bad_params", "activity must be an object", None));
    };
    let mut obj = obj.clone();
    if !obj.contains_key("id") {
        obj.insert("id".into(), json!(Uuid::new_v4().to_string()));
    }
    let mut activity: Activity = serde_json::from_value(serde_json::Value::Object(obj))
        .map_err(|e| err(&req.id, "bad_params", format!("invalid activity: {}", e), None))?;
    activity.normalize();
    Ok(activity)
}

fn sheet_json(req: &Request, sheet: &GradeSheet) -> Result<serde_json::Value, serde_json::Value> {
    serde_json::to_value(sheet)
        .map_err(|e| err(&req.id, "internal", format!("serialize sheet: {}", e), None))
}

fn summary_json(sheet: &GradeSheet) -> serde_json::Value {
    let stats = calc::sheet_stats(sheet);
    json!({
        "id": sheet.id,
        "courseId": sheet.course_id,
        "title": sheet.title,
        "gradingPeriod": sheet.grading_period.as_str(),
        "isPublished": sheet.is_published,
        "createdAt": sheet.created_at.to_rfc3339(),
        "publishedAt": sheet.published_at.map(|t| t.to_rfc3339()),
        "stats": stats,
    })
}

fn save_or_err(
    conn: &rusqlite::Connection,
    req: &Request,
    sheet: &GradeSheet,
) -> Result<(), serde_json::Value> {
    db::save_sheet(conn, sheet).map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))
}

fn handle_list_for_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let viewer = match session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sheets = match db::sheets_for_course(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let summaries: Vec<serde_json::Value> = sheets
        .iter()
        .filter(|s| viewer.role == Role::Teacher || s.is_published)
        .map(summary_json)
        .collect();

    ok(&req.id, json!({ "sheets": summaries }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let viewer = match session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sheet = match load_sheet_or_err(conn, req, &sheet_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    if viewer.role == Role::Student {
        // Unpublished sheets do not exist as far as students can tell, and a
        // published one exposes only the student's own row.
        if !sheet.is_published {
            return err(
                &req.id,
                "not_found",
                "grade sheet not found",
                Some(json!({ "sheetId": sheet_id })),
            );
        }
        sheet.students.retain(|s| s.student_id == viewer.user_id);
    }

    match sheet_json(req, &sheet) {
        Ok(v) => ok(&req.id, json!({ "sheet": v })),
        Err(e) => e,
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_teacher(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let period_raw = match required_str(req, "gradingPeriod") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(grading_period) = GradingPeriod::parse(&period_raw) else {
        return err(
            &req.id,
            "bad_params",
            "gradingPeriod must be one of: first_term, second_term, final",
            Some(json!({ "gradingPeriod": period_raw })),
        );
    };

    let course_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let mut activities = Vec::new();
    if let Some(raw_list) = req.params.get("activities").and_then(|v| v.as_array()) {
        for raw in raw_list {
            match parse_activity(req, raw) {
                Ok(a) => activities.push(a),
                Err(e) => return e,
            }
        }
    }

    // Every currently-enrolled (active) student starts with an empty mapping.
    let mut roster_stmt = match conn.prepare(
        "SELECT id, name FROM students WHERE course_id = ? AND active = 1 ORDER BY name COLLATE NOCASE",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match roster_stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(StudentGrade::new(id, name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = Utc::now();
    let mut sheet = GradeSheet {
        id: Uuid::new_v4().to_string(),
        course_id,
        title,
        grading_period,
        is_published: false,
        activities,
        students,
        created_at: now,
        updated_at: now,
        published_at: None,
    };
    calc::normalize_sheet(&mut sheet);

    if let Err(e) = db::save_sheet(conn, &sheet) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grade_sheets" })),
        );
    }

    match sheet_json(req, &sheet) {
        Ok(v) => ok(&req.id, json!({ "sheet": v })),
        Err(e) => e,
    }
}

fn handle_add_activity(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_teacher(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("activity") else {
        return err(&req.id, "bad_params", "missing activity", None);
    };
    let activity = match parse_activity(req, raw) {
        Ok(a) => a,
        Err(e) => return e,
    };

    let mut sheet = match load_sheet_or_err(conn, req, &sheet_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if sheet.activities.iter().any(|a| a.id == activity.id) {
        return err(
            &req.id,
            "bad_params",
            "activity id already present",
            Some(json!({ "activityId": activity.id })),
        );
    }

    calc::add_activity(&mut sheet, activity);
    sheet.updated_at = Utc::now();
    if let Err(e) = save_or_err(conn, req, &sheet) {
        return e;
    }

    match sheet_json(req, &sheet) {
        Ok(v) => ok(&req.id, json!({ "sheet": v })),
        Err(e) => e,
    }
}

fn handle_remove_activity(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_teacher(state, req) {
        return e;
    }
    // Grades for this activity vanish for every student at once.
    if let Err(e) = require_confirm(req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sheet = match load_sheet_or_err(conn, req, &sheet_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if !calc::remove_activity(&mut sheet, &activity_id) {
        return err(
            &req.id,
            "not_found",
            "activity not found",
            Some(json!({ "activityId": activity_id })),
        );
    }
    sheet.updated_at = Utc::now();
    if let Err(e) = save_or_err(conn, req, &sheet) {
        return e;
    }

    match sheet_json(req, &sheet) {
        Ok(v) => ok(&req.id, json!({ "sheet": v })),
        Err(e) => e,
    }
}

fn handle_set_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let grader = match require_teacher(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Absent and explicit-null both clear the cell back to ungraded.
    let value = req.params.get("value").and_then(|v| v.as_f64());
    let comment = req
        .params
        .get("comment")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    let submitted_at = model::coerce_timestamp(req.params.get("submittedAt"));

    let mut sheet = match load_sheet_or_err(conn, req, &sheet_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(e) = calc::set_grade(
        &mut sheet,
        &student_id,
        &activity_id,
        value,
        comment,
        submitted_at,
        Some(grader.name.clone()),
    ) {
        return err(&req.id, &e.code, e.message, e.details);
    }
    sheet.updated_at = Utc::now();
    if let Err(e) = save_or_err(conn, req, &sheet) {
        return e;
    }

    let row = sheet.student(&student_id).map(|s| {
        json!({
            "studentId": s.student_id,
            "total": calc::round_off_1_decimal(s.total),
            "status": s.status.as_str(),
        })
    });
    ok(&req.id, json!({ "ok": true, "student": row }))
}

fn handle_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_teacher(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sheet = match load_sheet_or_err(conn, req, &sheet_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    // One-way gate; repeated publishes keep the original timestamp.
    if !sheet.is_published {
        sheet.is_published = true;
        sheet.published_at = Some(Utc::now());
        sheet.updated_at = Utc::now();
        if let Err(e) = save_or_err(conn, req, &sheet) {
            return e;
        }
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "isPublished": true,
            "publishedAt": sheet.published_at.map(|t| t.to_rfc3339()),
        }),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_teacher(state, req) {
        return e;
    }
    if let Err(e) = require_confirm(req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match db::delete_sheet(conn, &sheet_id) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => err(
            &req.id,
            "not_found",
            "grade sheet not found",
            Some(json!({ "sheetId": sheet_id })),
        ),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_teacher(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sheet = match load_sheet_or_err(conn, req, &sheet_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let lines: Vec<String> = calc::export_rows(&sheet)
        .into_iter()
        .map(|row| row.join(","))
        .collect();

    // Filename sanitization and the actual download are the shell's job.
    ok(
        &req.id,
        json!({
            "filename": format!("{}-{}.csv", sheet.title, sheet.grading_period.as_str()),
            "lines": lines,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheets.listForCourse" => Some(handle_list_for_course(state, req)),
        "sheets.get" => Some(handle_get(state, req)),
        "sheets.create" => Some(handle_create(state, req)),
        "sheets.addActivity" => Some(handle_add_activity(state, req)),
        "sheets.removeActivity" => Some(handle_remove_activity(state, req)),
        "sheets.setGrade" => Some(handle_set_grade(state, req)),
        "sheets.publish" => Some(handle_publish(state, req)),
        "sheets.delete" => Some(handle_delete(state, req)),
        "sheets.exportCsv" => Some(handle_export_csv(state, req)),
        _ => None,
    }
}
