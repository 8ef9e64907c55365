use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str, session};
use crate::ipc::types::{AppState, Request, Role};
use crate::progress::calculate_progress;
use serde_json::json;

fn handle_progress_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Students may only look at their own standing.
    if viewer.role == Role::Student && viewer.user_id != student_id {
        return err(
            &req.id,
            "forbidden",
            "students may only query their own progress",
            None,
        );
    }

    let sheets = match db::sheets_for_course(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // "No published sheet contains this student" comes back as a null
    // progress payload, which is not the same thing as an all-zero record.
    let progress = calculate_progress(&student_id, &course_id, &sheets);
    match progress.map(|p| serde_json::to_value(&p)).transpose() {
        Ok(p) => ok(&req.id, json!({ "progress": p })),
        Err(e) => err(&req.id, "internal", format!("serialize progress: {}", e), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.get" => Some(handle_progress_get(state, req)),
        _ => None,
    }
}
