use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use super::session_mut;
use crate::db;
use crate::ipc::error::{app_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::Session;
use crate::store::SqliteStore;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "signedIn": state
                .session
                .as_ref()
                .is_some_and(|s| s.user().is_some()),
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
            state.session = Some(Session::new(Arc::new(SqliteStore::new(conn))));
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_sync_poll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match session.poll_events() {
        Ok(events) => {
            let events: Vec<serde_json::Value> = events
                .into_iter()
                .map(|e| json!({ "collection": e.collection, "records": e.records }))
                .collect();
            ok(&req.id, json!({ "events": events }))
        }
        Err(e) => app_err(&req.id, &e),
    }
}

fn handle_sync_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let snapshots = match session.current_state() {
        Ok(s) => s,
        Err(e) => return app_err(&req.id, &e),
    };
    let mut result = serde_json::Map::new();
    for (collection, records) in snapshots {
        result.insert(collection.to_string(), json!(records));
    }
    result.insert("user".to_string(), json!(session.user()));
    ok(&req.id, serde_json::Value::Object(result))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "sync.poll" => Some(handle_sync_poll(state, req)),
        "sync.state" => Some(handle_sync_state(state, req)),
        _ => None,
    }
}
