use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request, Role, Session};
use serde_json::json;
use std::path::PathBuf;

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "id": session.user_id,
        "name": session.name,
        "role": session.role.as_str(),
    })
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "signedIn": state.session.as_ref().map(session_json),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

/// The shell authenticates; the sidecar just records who is acting. Only
/// id, name and role ever influence behavior.
fn handle_session_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let user_id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: teacher, student",
            Some(json!({ "role": role_raw })),
        );
    };

    let session = Session {
        user_id,
        name,
        role,
    };
    let result = json!({ "user": session_json(&session) });
    state.session = Some(session);
    ok(&req.id, result)
}

fn handle_session_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({ "user": state.session.as_ref().map(session_json) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.signIn" => Some(handle_session_sign_in(state, req)),
        "session.current" => Some(handle_session_current(state, req)),
        _ => None,
    }
}
