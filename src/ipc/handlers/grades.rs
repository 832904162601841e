use super::{crud_add, crud_delete, crud_edit};
use crate::ipc::types::{AppState, Request};

const KEYS: &[&str] = &["subject", "grade"];

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.add" => Some(crud_add(state, req, "grades", KEYS)),
        "grades.edit" => Some(crud_edit(state, req, "grades", "gradeId", KEYS)),
        "grades.delete" => Some(crud_delete(state, req, "grades", "gradeId")),
        _ => None,
    }
}
