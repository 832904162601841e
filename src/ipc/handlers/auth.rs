use serde_json::{json, Value};

use super::{session_mut, signed_in};
use crate::auth::{self, SignupProfile};
use crate::ipc::error::{app_err, ok};
use crate::ipc::types::{AppState, Request};

fn param_str<'a>(params: &'a Value, key: &str) -> &'a str {
    // Missing and blank both fall to the auth layer's validation.
    params.get(key).and_then(Value::as_str).unwrap_or("")
}

fn handle_signup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let store = session.store().clone();
    let profile = SignupProfile {
        name: param_str(&req.params, "name"),
        strand: param_str(&req.params, "strand"),
        grade: param_str(&req.params, "grade"),
        email: param_str(&req.params, "email"),
        password: param_str(&req.params, "password"),
    };
    let user = match auth::signup(store.as_ref(), &profile) {
        Ok(user) => user,
        Err(e) => return app_err(&req.id, &e),
    };
    if let Err(e) = session.set_user(Some(user.clone())) {
        return app_err(&req.id, &e);
    }
    ok(&req.id, json!({ "user": user }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let store = session.store().clone();
    let email = param_str(&req.params, "email");
    let password = param_str(&req.params, "password");
    let user = match auth::login(store.as_ref(), email, password) {
        Ok(user) => user,
        Err(e) => return app_err(&req.id, &e),
    };
    if let Err(e) = session.set_user(Some(user.clone())) {
        return app_err(&req.id, &e);
    }
    ok(&req.id, json!({ "user": user }))
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if let Err(e) = session.set_user(None) {
        return app_err(&req.id, &e);
    }
    ok(&req.id, json!({ "signedIn": false }))
}

fn handle_update_avatar(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (session, owner) = match signed_in(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let store = session.store().clone();
    let avatar_uri = param_str(&req.params, "avatarUri");
    match auth::update_avatar(store.as_ref(), &owner, avatar_uri) {
        Ok(user) => {
            session.set_avatar(user.clone());
            ok(&req.id, json!({ "user": user }))
        }
        Err(e) => app_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signup" => Some(handle_signup(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "profile.updateAvatar" => Some(handle_update_avatar(state, req)),
        _ => None,
    }
}
