pub mod announcements;
pub mod attendance;
pub mod auth;
pub mod core;
pub mod grades;
pub mod schedule;
pub mod tasks;

use serde_json::{json, Value};

use crate::ipc::error::{app_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::Session;
use crate::store::{Fields, SqliteStore};
use crate::sync::EntityStore;

/// Guard: `workspace.select` must have run.
pub(crate) fn session_mut<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Session<SqliteStore>, Value> {
    state
        .session
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Guard: a user must be signed in. Returns the session and the owner id.
pub(crate) fn signed_in<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<(&'a mut Session<SqliteStore>, String), Value> {
    let session = session_mut(state, req)?;
    let Some(user) = session.user() else {
        return Err(err(&req.id, "not_signed_in", "sign in first", None));
    };
    let owner = user.id.clone();
    Ok((session, owner))
}

pub(crate) fn entity<'a>(
    session: &'a Session<SqliteStore>,
    collection: &str,
    req: &Request,
) -> Result<&'a EntityStore<SqliteStore>, Value> {
    session.entity(collection).ok_or_else(|| {
        err(
            &req.id,
            "remote_unavailable",
            format!("unknown collection {collection}"),
            None,
        )
    })
}

/// Identifier-style params are required up front; their absence is a
/// protocol error, not a validation failure.
pub(crate) fn require_str(params: &Value, key: &str, req: &Request) -> Result<String, Value> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {key}"), None))
}

/// Content-style params pass through as raw fields; blank or missing
/// values are the sync layer's validation problem.
pub(crate) fn content_fields(params: &Value, keys: &[&str]) -> Fields {
    let mut out = Fields::new();
    for key in keys {
        if let Some(v) = params.get(*key) {
            out.insert((*key).to_string(), v.clone());
        }
    }
    out
}

// The four plain CRUD views (tasks, schedule, grades, announcements) all
// route through these; only the collection, id param, and content keys
// differ per view.

pub(crate) fn crud_add(
    state: &mut AppState,
    req: &Request,
    collection: &str,
    keys: &[&str],
) -> Value {
    let (session, owner) = match signed_in(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let view = match entity(session, collection, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    match view.create(&owner, &content_fields(&req.params, keys)) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => app_err(&req.id, &e),
    }
}

pub(crate) fn crud_edit(
    state: &mut AppState,
    req: &Request,
    collection: &str,
    id_key: &str,
    keys: &[&str],
) -> Value {
    let (session, owner) = match signed_in(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match require_str(&req.params, id_key, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let view = match entity(session, collection, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    match view.update(&owner, &id, &content_fields(&req.params, keys)) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => app_err(&req.id, &e),
    }
}

pub(crate) fn crud_delete(
    state: &mut AppState,
    req: &Request,
    collection: &str,
    id_key: &str,
) -> Value {
    let (session, owner) = match signed_in(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match require_str(&req.params, id_key, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let view = match entity(session, collection, req) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    match view.remove(&owner, &id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => app_err(&req.id, &e),
    }
}
