use serde_json::json;

use super::{require_str, signed_in};
use crate::ipc::error::{app_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sync::toggle_attendance;

/// Cycles the date's attendance and reports the resulting status:
/// "Present", "Absent", or null once the record is gone.
fn handle_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (session, owner) = match signed_in(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match require_str(&req.params, "date", req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match toggle_attendance(session.store().as_ref(), &owner, &date) {
        Ok(status) => ok(&req.id, json!({ "date": date, "status": status })),
        Err(e) => app_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.toggle" => Some(handle_toggle(state, req)),
        _ => None,
    }
}
