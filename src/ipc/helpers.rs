use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, Role, Session};
use crate::model::GradeSheet;
use rusqlite::Connection;
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn session(state: &AppState, req: &Request) -> Result<Session, serde_json::Value> {
    state
        .session
        .clone()
        .ok_or_else(|| err(&req.id, "forbidden", "sign in first", None))
}

/// Mutations are teacher-only; everything else a signed-in student may read
/// is filtered at the handler.
pub fn require_teacher(state: &AppState, req: &Request) -> Result<Session, serde_json::Value> {
    let s = session(state, req)?;
    if s.role != Role::Teacher {
        return Err(err(
            &req.id,
            "forbidden",
            "teacher role required",
            Some(json!({ "role": s.role.as_str() })),
        ));
    }
    Ok(s)
}

/// Destructive operations must carry `confirm: true`; the daemon refuses to
/// guess on behalf of the shell.
pub fn require_confirm(req: &Request) -> Result<(), serde_json::Value> {
    let confirmed = req
        .params
        .get("confirm")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if confirmed {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "confirm_required",
            "destructive operation requires confirm: true",
            None,
        ))
    }
}

pub fn load_sheet_or_err(
    conn: &Connection,
    req: &Request,
    sheet_id: &str,
) -> Result<GradeSheet, serde_json::Value> {
    match db::load_sheet(conn, sheet_id) {
        Ok(Some(sheet)) => Ok(sheet),
        Ok(None) => Err(err(
            &req.id,
            "not_found",
            "grade sheet not found",
            Some(json!({ "sheetId": sheet_id })),
        )),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}
