//! Generic per-entity realtime sync: one parametrized component instead of
//! a copy of the CRUD-plus-subscription block per collection.
//!
//! Effects of create/update/remove are never returned to the caller; they
//! are observed through the live feed. Each delivered snapshot wholly
//! replaces the local cache (full-replace contract — downstream rendering
//! depends on it).

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::errors::{AppError, AppResult};
use crate::store::{DocumentStore, Fields, Mutation, Predicate, Record, Subscription};

/// Field every entity record is scoped by.
pub const OWNER_FIELD: &str = "userId";

pub const PRESENT: &str = "Present";
pub const ABSENT: &str = "Absent";

const ANNOUNCEMENT_PREFIX: &str = "\u{1F4E2} ";

/// Per-kind wiring for the sync component: where records live, how raw
/// input becomes stored fields, and whether creates get a `createdAt`.
#[derive(Clone, Copy)]
pub struct EntityConfig {
    pub collection: &'static str,
    pub map_fields: fn(&Fields) -> AppResult<Fields>,
    pub timestamped: bool,
}

pub const TASKS: EntityConfig = EntityConfig {
    collection: "tasks",
    map_fields: map_task_fields,
    timestamped: false,
};

pub const SCHEDULES: EntityConfig = EntityConfig {
    collection: "schedules",
    map_fields: map_schedule_fields,
    timestamped: true,
};

pub const GRADES: EntityConfig = EntityConfig {
    collection: "grades",
    map_fields: map_grade_fields,
    timestamped: true,
};

pub const ATTENDANCE: EntityConfig = EntityConfig {
    collection: "attendance",
    map_fields: map_attendance_fields,
    timestamped: true,
};

pub const ANNOUNCEMENTS: EntityConfig = EntityConfig {
    collection: "announcements",
    map_fields: map_announcement_fields,
    timestamped: true,
};

/// All five kinds, in the order their snapshots are reported.
pub const ENTITY_KINDS: [EntityConfig; 5] = [TASKS, SCHEDULES, GRADES, ATTENDANCE, ANNOUNCEMENTS];

fn required_trimmed(raw: &Fields, key: &str) -> AppResult<String> {
    let value = raw
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if value.is_empty() {
        return Err(AppError::Validation(format!("{key} must not be blank")));
    }
    Ok(value.to_string())
}

fn map_task_fields(raw: &Fields) -> AppResult<Fields> {
    let text = required_trimmed(raw, "text")?;
    let mut out = Fields::new();
    out.insert("text".to_string(), Value::String(text));
    Ok(out)
}

fn map_schedule_fields(raw: &Fields) -> AppResult<Fields> {
    let subject = required_trimmed(raw, "subject")?;
    let time = required_trimmed(raw, "time")?;
    let mut out = Fields::new();
    out.insert("subject".to_string(), Value::String(subject));
    out.insert("time".to_string(), Value::String(time));
    Ok(out)
}

fn map_grade_fields(raw: &Fields) -> AppResult<Fields> {
    let subject = required_trimmed(raw, "subject")?;
    let mut grade = required_trimmed(raw, "grade")?;
    // Stored shape is "92%"; editing a value read back must not double it.
    if !grade.ends_with('%') {
        grade.push('%');
    }
    let mut out = Fields::new();
    out.insert("subject".to_string(), Value::String(subject));
    out.insert("grade".to_string(), Value::String(grade));
    Ok(out)
}

fn map_attendance_fields(raw: &Fields) -> AppResult<Fields> {
    let date = required_trimmed(raw, "date")?;
    parse_date_key(&date)?;
    let status = required_trimmed(raw, "status")?;
    if status != PRESENT && status != ABSENT {
        return Err(AppError::Validation(format!(
            "status must be {PRESENT} or {ABSENT}"
        )));
    }
    let mut out = Fields::new();
    out.insert("date".to_string(), Value::String(date));
    out.insert("status".to_string(), Value::String(status));
    Ok(out)
}

fn map_announcement_fields(raw: &Fields) -> AppResult<Fields> {
    let text = required_trimmed(raw, "text")?;
    let text = if text.starts_with(ANNOUNCEMENT_PREFIX) {
        text
    } else {
        format!("{ANNOUNCEMENT_PREFIX}{text}")
    };
    let mut out = Fields::new();
    out.insert("text".to_string(), Value::String(text));
    Ok(out)
}

fn parse_date_key(date_key: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(date_key, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("date must be YYYY-MM-DD, got {date_key:?}")))
}

/// One live, owner-filtered collection. At most one active subscription
/// per instance; re-subscribing (including to no owner) replaces the old
/// watcher entirely.
pub struct EntityStore<S: DocumentStore> {
    config: EntityConfig,
    store: Arc<S>,
    active: Option<Subscription>,
    cache: Vec<Record>,
    pending: Vec<Vec<Record>>,
}

impl<S: DocumentStore> EntityStore<S> {
    pub fn new(config: EntityConfig, store: Arc<S>) -> Self {
        EntityStore {
            config,
            store,
            active: None,
            cache: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn collection(&self) -> &'static str {
        self.config.collection
    }

    /// Points the live view at `owner`, tearing down any previous watcher
    /// first. `None` releases the watcher and yields one empty snapshot so
    /// consumers observe the logged-out state.
    pub fn subscribe(&mut self, owner: Option<&str>) -> AppResult<()> {
        let had_watch = self.active.is_some();
        if let Some(sub) = self.active.take() {
            self.store.unwatch(sub.id());
        }
        self.cache.clear();
        self.pending.clear();
        match owner {
            Some(owner) => {
                let pred = Predicate::field(OWNER_FIELD, owner);
                self.active = Some(self.store.watch(self.config.collection, &pred)?);
            }
            None => {
                if had_watch {
                    self.pending.push(Vec::new());
                }
            }
        }
        Ok(())
    }

    /// Drains delivered snapshots in order, replacing the cache with each.
    /// A terminal watch failure ends the subscription and surfaces here.
    pub fn poll(&mut self) -> AppResult<Vec<Vec<Record>>> {
        let mut delivered = std::mem::take(&mut self.pending);
        let mut terminal = None;
        if let Some(sub) = &self.active {
            while let Some(item) = sub.try_next() {
                match item {
                    Ok(snapshot) => delivered.push(snapshot),
                    Err(e) => {
                        terminal = Some(e);
                        break;
                    }
                }
            }
        }
        if let Some(last) = delivered.last() {
            self.cache = last.clone();
        }
        if let Some(e) = terminal {
            // The store already dropped the watcher.
            self.active = None;
            return Err(e);
        }
        Ok(delivered)
    }

    /// The latest snapshot this instance has consumed.
    pub fn records(&self) -> &[Record] {
        &self.cache
    }

    pub fn create(&self, owner: &str, raw: &Fields) -> AppResult<()> {
        let mut fields = (self.config.map_fields)(raw)?;
        fields.insert(OWNER_FIELD.to_string(), Value::String(owner.to_string()));
        if self.config.timestamped {
            fields.insert(
                "createdAt".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        self.store.insert(self.config.collection, fields)?;
        Ok(())
    }

    pub fn update(&self, caller: &str, id: &str, raw: &Fields) -> AppResult<()> {
        let fields = (self.config.map_fields)(raw)?;
        self.check_owner(caller, id)?;
        self.store.patch(self.config.collection, id, fields)
    }

    /// Idempotent from the caller's perspective: a missing (or foreign)
    /// id succeeds without touching the store.
    pub fn remove(&self, caller: &str, id: &str) -> AppResult<()> {
        match self.check_owner(caller, id) {
            Ok(()) => self.store.delete(self.config.collection, id),
            Err(AppError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The record must exist and belong to the caller before any mutation
    /// by id. Foreign records read as missing.
    fn check_owner(&self, caller: &str, id: &str) -> AppResult<()> {
        let missing = || AppError::NotFound(format!("{}/{}", self.config.collection, id));
        let record = self
            .store
            .get(self.config.collection, id)?
            .ok_or_else(missing)?;
        if record.get(OWNER_FIELD).and_then(Value::as_str) != Some(caller) {
            return Err(missing());
        }
        Ok(())
    }
}

/// Cycles a date's attendance: none -> Present -> Absent -> none.
///
/// The current status is read inside the store transaction, not from a
/// cached snapshot, so rapid repeated toggles always advance the cycle.
/// Returns the status the date ends up with.
pub fn toggle_attendance<S: DocumentStore>(
    store: &S,
    owner: &str,
    date_key: &str,
) -> AppResult<Option<&'static str>> {
    parse_date_key(date_key)?;
    let pred = Predicate::field(OWNER_FIELD, owner).and("date", date_key);
    let mut outcome = None;
    store.transact(ATTENDANCE.collection, &pred, &mut |current| match current {
        None => {
            outcome = Some(PRESENT);
            let mut fields = Fields::new();
            fields.insert(OWNER_FIELD.to_string(), Value::String(owner.to_string()));
            fields.insert("date".to_string(), Value::String(date_key.to_string()));
            fields.insert("status".to_string(), Value::String(PRESENT.to_string()));
            fields.insert(
                "createdAt".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            Some(Mutation::Insert(fields))
        }
        Some(record) => {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if record.get("status").and_then(Value::as_str) == Some(PRESENT) {
                outcome = Some(ABSENT);
                let mut fields = Fields::new();
                fields.insert("status".to_string(), Value::String(ABSENT.to_string()));
                Some(Mutation::Patch(id, fields))
            } else {
                // Absent (or anything a foreign writer left) closes the cycle.
                outcome = None;
                Some(Mutation::Delete(id))
            }
        }
    })?;
    Ok(outcome)
}
