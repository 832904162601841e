//! Thin authentication gate over the `users` collection.
//!
//! Credentials are stored as a per-user random salt plus a SHA-256 digest
//! and verified with a constant-time comparison. Plaintext passwords never
//! touch the store.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::store::{DocumentStore, Fields, Predicate, Record};

pub const USERS: &str = "users";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub strand: String,
    pub grade: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

pub struct SignupProfile<'a> {
    pub name: &'a str,
    pub strand: &'a str,
    pub grade: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

pub fn signup<S: DocumentStore>(store: &S, profile: &SignupProfile<'_>) -> AppResult<User> {
    let name = required(profile.name, "name")?;
    let strand = required(profile.strand, "strand")?;
    let grade = required(profile.grade, "grade")?;
    let email = required(profile.email, "email")?;
    let password = required(profile.password, "password")?;

    let existing = store.query(USERS, &Predicate::field("email", email.as_str()))?;
    if !existing.is_empty() {
        return Err(AppError::DuplicateIdentity);
    }

    let salt = Uuid::new_v4().simple().to_string();
    let digest = hash_password(&salt, &password);

    let mut fields = Fields::new();
    fields.insert("name".to_string(), Value::String(name.clone()));
    fields.insert("strand".to_string(), Value::String(strand.clone()));
    fields.insert("grade".to_string(), Value::String(grade.clone()));
    fields.insert("email".to_string(), Value::String(email.clone()));
    fields.insert("passwordSalt".to_string(), Value::String(salt));
    fields.insert("passwordHash".to_string(), Value::String(digest));
    let id = store.insert(USERS, fields)?;

    Ok(User {
        id,
        name,
        strand,
        grade,
        email,
        avatar: None,
    })
}

pub fn login<S: DocumentStore>(store: &S, email: &str, password: &str) -> AppResult<User> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AppError::InvalidCredentials);
    }

    let matches = store.query(USERS, &Predicate::field("email", email))?;
    let Some(record) = matches.first() else {
        return Err(AppError::InvalidCredentials);
    };

    let salt = str_field(record, "passwordSalt");
    let stored = str_field(record, "passwordHash");
    let presented = hash_password(salt, password);
    if !constant_time_eq(presented.as_bytes(), stored.as_bytes()) {
        return Err(AppError::InvalidCredentials);
    }

    Ok(user_from_record(record))
}

/// Patches the avatar reference on the user document and returns the
/// refreshed profile.
pub fn update_avatar<S: DocumentStore>(
    store: &S,
    user_id: &str,
    avatar_uri: &str,
) -> AppResult<User> {
    let avatar = required(avatar_uri, "avatarUri")?;
    let mut fields = Fields::new();
    fields.insert("avatar".to_string(), Value::String(avatar));
    store.patch(USERS, user_id, fields)?;

    let record = store
        .get(USERS, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("{USERS}/{user_id}")))?;
    Ok(user_from_record(&record))
}

fn required(value: &str, key: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{key} must not be blank")));
    }
    Ok(trimmed.to_string())
}

fn str_field<'a>(record: &'a Record, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn user_from_record(record: &Record) -> User {
    User {
        id: str_field(record, "id").to_string(),
        name: str_field(record, "name").to_string(),
        strand: str_field(record, "strand").to_string(),
        grade: str_field(record, "grade").to_string(),
        email: str_field(record, "email").to_string(),
        avatar: record
            .get("avatar")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= (x ^ y) as usize;
    }
    diff == 0
}
