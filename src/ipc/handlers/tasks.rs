use super::{crud_add, crud_delete, crud_edit};
use crate::ipc::types::{AppState, Request};

const KEYS: &[&str] = &["text"];

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tasks.add" => Some(crud_add(state, req, "tasks", KEYS)),
        "tasks.edit" => Some(crud_edit(state, req, "tasks", "taskId", KEYS)),
        "tasks.delete" => Some(crud_delete(state, req, "tasks", "taskId")),
        _ => None,
    }
}
