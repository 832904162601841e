use super::{crud_add, crud_delete, crud_edit};
use crate::ipc::types::{AppState, Request};

const KEYS: &[&str] = &["text"];

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.add" => Some(crud_add(state, req, "announcements", KEYS)),
        "announcements.edit" => {
            Some(crud_edit(state, req, "announcements", "announcementId", KEYS))
        }
        "announcements.delete" => Some(crud_delete(state, req, "announcements", "announcementId")),
        _ => None,
    }
}
