use super::{crud_add, crud_delete, crud_edit};
use crate::ipc::types::{AppState, Request};

const KEYS: &[&str] = &["subject", "time"];

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.add" => Some(crud_add(state, req, "schedules", KEYS)),
        "schedule.edit" => Some(crud_edit(state, req, "schedules", "scheduleId", KEYS)),
        "schedule.delete" => Some(crud_delete(state, req, "schedules", "scheduleId")),
        _ => None,
    }
}
