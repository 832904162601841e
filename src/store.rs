use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// A document's payload: a flat JSON object.
pub type Fields = Map<String, Value>;

/// A queried document: its fields plus an injected `id` key.
pub type Record = Map<String, Value>;

/// One delivery on a live subscription: a full result set, or a terminal
/// failure after which nothing more arrives.
pub type SnapshotResult = Result<Vec<Record>, AppError>;

/// Conjunction of field-equality checks. The only query shape the store
/// supports.
#[derive(Debug, Clone)]
pub struct Predicate {
    clauses: Vec<(String, Value)>,
}

impl Predicate {
    pub fn field(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate {
            clauses: vec![(name.into(), value.into())],
        }
    }

    pub fn and(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((name.into(), value.into()));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|(name, value)| record.get(name) == Some(value))
    }
}

/// Outcome of a `transact` decision.
pub enum Mutation {
    Insert(Fields),
    Patch(String, Fields),
    Delete(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchId(u64);

/// Receiving end of a live query. Snapshots accumulate until drained;
/// `unwatch` stops delivery for good.
pub struct Subscription {
    id: WatchId,
    rx: Receiver<SnapshotResult>,
}

impl Subscription {
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Next pending delivery, if any. Never blocks.
    pub fn try_next(&self) -> Option<SnapshotResult> {
        self.rx.try_recv().ok()
    }
}

/// The hosted-document-database capability: equality-filtered queries,
/// document create/patch/delete, live snapshot subscriptions, and an
/// atomic conditional transition for compound operations.
pub trait DocumentStore {
    fn get(&self, collection: &str, id: &str) -> AppResult<Option<Record>>;

    /// All matching documents in insertion order.
    fn query(&self, collection: &str, pred: &Predicate) -> AppResult<Vec<Record>>;

    /// Writes a new document and returns its store-assigned id.
    fn insert(&self, collection: &str, fields: Fields) -> AppResult<String>;

    /// Merges `fields` into an existing document. `NotFound` on a missing id.
    fn patch(&self, collection: &str, id: &str, fields: Fields) -> AppResult<()>;

    /// Removes a document. Missing ids are a no-op.
    fn delete(&self, collection: &str, id: &str) -> AppResult<()>;

    /// Opens a standing query. The current result set is delivered
    /// immediately; every committed mutation of the collection delivers a
    /// fresh full snapshot (never a delta). If a re-query fails the watcher
    /// receives one terminal error and is dropped.
    fn watch(&self, collection: &str, pred: &Predicate) -> AppResult<Subscription>;

    /// Releases a watcher. Nothing is delivered afterward. Safe to call
    /// with an already-released id.
    fn unwatch(&self, watch: WatchId);

    /// Runs `op` against the current (at most one) match of `pred` inside a
    /// store transaction and applies the mutation it returns. Watchers only
    /// ever observe the committed result.
    fn transact(
        &self,
        collection: &str,
        pred: &Predicate,
        op: &mut dyn FnMut(Option<&Record>) -> Option<Mutation>,
    ) -> AppResult<()>;
}

struct Watcher {
    id: u64,
    collection: String,
    pred: Predicate,
    tx: Sender<SnapshotResult>,
}

/// `DocumentStore` over the workspace SQLite file. All watcher
/// notification happens after commit, outside the connection lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    watchers: Mutex<Vec<Watcher>>,
    next_watch: AtomicU64,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        SqliteStore {
            conn: Mutex::new(conn),
            watchers: Mutex::new(Vec::new()),
            next_watch: AtomicU64::new(1),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn watchers(&self) -> MutexGuard<'_, Vec<Watcher>> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-runs every standing query on `collection` and pushes the fresh
    /// snapshot. A watcher whose re-query fails gets a terminal error and
    /// is removed; so is one whose receiver is gone.
    fn notify(&self, collection: &str) {
        let mut watchers = self.watchers();
        watchers.retain(|w| {
            if w.collection != collection {
                return true;
            }
            let snapshot = {
                let conn = self.conn();
                query_conn(&conn, collection, &w.pred)
            };
            match snapshot {
                Ok(records) => w.tx.send(Ok(records)).is_ok(),
                Err(e) => {
                    let _ = w.tx.send(Err(e));
                    false
                }
            }
        });
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, collection: &str, id: &str) -> AppResult<Option<Record>> {
        let conn = self.conn();
        get_conn(&conn, collection, id)
    }

    fn query(&self, collection: &str, pred: &Predicate) -> AppResult<Vec<Record>> {
        let conn = self.conn();
        query_conn(&conn, collection, pred)
    }

    fn insert(&self, collection: &str, fields: Fields) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn();
            insert_conn(&conn, collection, &id, &fields)?;
        }
        self.notify(collection);
        Ok(id)
    }

    fn patch(&self, collection: &str, id: &str, fields: Fields) -> AppResult<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            patch_conn(&tx, collection, id, &fields)?;
            tx.commit()?;
        }
        self.notify(collection);
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        let removed = {
            let conn = self.conn();
            delete_conn(&conn, collection, id)?
        };
        if removed {
            self.notify(collection);
        }
        Ok(())
    }

    fn watch(&self, collection: &str, pred: &Predicate) -> AppResult<Subscription> {
        // Establishment failures surface here, not on the channel.
        let initial = self.query(collection, pred)?;
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(Ok(initial));
        let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
        self.watchers().push(Watcher {
            id,
            collection: collection.to_string(),
            pred: pred.clone(),
            tx,
        });
        Ok(Subscription {
            id: WatchId(id),
            rx,
        })
    }

    fn unwatch(&self, watch: WatchId) {
        self.watchers().retain(|w| w.id != watch.0);
    }

    fn transact(
        &self,
        collection: &str,
        pred: &Predicate,
        op: &mut dyn FnMut(Option<&Record>) -> Option<Mutation>,
    ) -> AppResult<()> {
        let mutated = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let matches = query_conn(&tx, collection, pred)?;
            match op(matches.first()) {
                None => false,
                Some(Mutation::Insert(fields)) => {
                    let id = Uuid::new_v4().to_string();
                    insert_conn(&tx, collection, &id, &fields)?;
                    tx.commit()?;
                    true
                }
                Some(Mutation::Patch(id, fields)) => {
                    patch_conn(&tx, collection, &id, &fields)?;
                    tx.commit()?;
                    true
                }
                Some(Mutation::Delete(id)) => {
                    delete_conn(&tx, collection, &id)?;
                    tx.commit()?;
                    true
                }
            }
        };
        if mutated {
            self.notify(collection);
        }
        Ok(())
    }
}

fn record_from_row(doc_id: String, fields_json: &str) -> AppResult<Record> {
    let mut record: Fields = serde_json::from_str(fields_json)
        .map_err(|e| AppError::RemoteUnavailable(format!("corrupt document {doc_id}: {e}")))?;
    record.insert("id".to_string(), Value::String(doc_id));
    Ok(record)
}

fn get_conn(conn: &Connection, collection: &str, id: &str) -> AppResult<Option<Record>> {
    let row: Option<String> = conn
        .query_row(
            "SELECT fields FROM documents WHERE collection = ? AND doc_id = ?",
            (collection, id),
            |r| r.get(0),
        )
        .optional()?;
    match row {
        Some(fields_json) => Ok(Some(record_from_row(id.to_string(), &fields_json)?)),
        None => Ok(None),
    }
}

fn query_conn(conn: &Connection, collection: &str, pred: &Predicate) -> AppResult<Vec<Record>> {
    let mut stmt =
        conn.prepare("SELECT doc_id, fields FROM documents WHERE collection = ? ORDER BY seq")?;
    let rows = stmt
        .query_map([collection], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    for (doc_id, fields_json) in rows {
        let record = record_from_row(doc_id, &fields_json)?;
        if pred.matches(&record) {
            out.push(record);
        }
    }
    Ok(out)
}

fn insert_conn(conn: &Connection, collection: &str, id: &str, fields: &Fields) -> AppResult<()> {
    conn.execute(
        "INSERT INTO documents(collection, doc_id, fields, created_at) VALUES(?, ?, ?, ?)",
        (
            collection,
            id,
            &serde_json::to_string(fields)?,
            &Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn patch_conn(conn: &Connection, collection: &str, id: &str, fields: &Fields) -> AppResult<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT fields FROM documents WHERE collection = ? AND doc_id = ?",
            (collection, id),
            |r| r.get(0),
        )
        .optional()?;
    let Some(current) = existing else {
        return Err(AppError::NotFound(format!("{collection}/{id}")));
    };
    let mut merged: Fields = serde_json::from_str(&current)
        .map_err(|e| AppError::RemoteUnavailable(format!("corrupt document {id}: {e}")))?;
    for (key, value) in fields {
        merged.insert(key.clone(), value.clone());
    }
    conn.execute(
        "UPDATE documents SET fields = ? WHERE collection = ? AND doc_id = ?",
        (&serde_json::to_string(&merged)?, collection, id),
    )?;
    Ok(())
}

fn delete_conn(conn: &Connection, collection: &str, id: &str) -> AppResult<bool> {
    let changed = conn.execute(
        "DELETE FROM documents WHERE collection = ? AND doc_id = ?",
        (collection, id),
    )?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_store() -> SqliteStore {
        let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
        crate::db::init_schema(&conn).expect("init schema");
        SqliteStore::new(conn)
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn insert_then_query_filters_by_predicate() {
        let store = open_store();
        store
            .insert("tasks", fields(&[("text", "a"), ("userId", "u1")]))
            .expect("insert u1");
        store
            .insert("tasks", fields(&[("text", "b"), ("userId", "u2")]))
            .expect("insert u2");

        let pred = Predicate::field("userId", "u1");
        let records = store.query("tasks", &pred).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("text"), Some(&json!("a")));
        assert!(records[0].get("id").and_then(Value::as_str).is_some());
    }

    #[test]
    fn query_preserves_insertion_order() {
        let store = open_store();
        for text in ["first", "second", "third"] {
            store
                .insert("tasks", fields(&[("text", text), ("userId", "u1")]))
                .expect("insert");
        }
        let records = store
            .query("tasks", &Predicate::field("userId", "u1"))
            .expect("query");
        let texts: Vec<_> = records
            .iter()
            .map(|r| r.get("text").and_then(Value::as_str).unwrap_or(""))
            .collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn watch_delivers_initial_and_per_mutation_snapshots() {
        let store = open_store();
        let sub = store
            .watch("tasks", &Predicate::field("userId", "u1"))
            .expect("watch");

        let initial = sub.try_next().expect("initial delivery").expect("snapshot");
        assert!(initial.is_empty());

        let id = store
            .insert("tasks", fields(&[("text", "a"), ("userId", "u1")]))
            .expect("insert");
        let after_insert = sub.try_next().expect("delivery").expect("snapshot");
        assert_eq!(after_insert.len(), 1);

        store
            .patch("tasks", &id, fields(&[("text", "edited")]))
            .expect("patch");
        let after_patch = sub.try_next().expect("delivery").expect("snapshot");
        assert_eq!(after_patch[0].get("text"), Some(&json!("edited")));

        store.delete("tasks", &id).expect("delete");
        let after_delete = sub.try_next().expect("delivery").expect("snapshot");
        assert!(after_delete.is_empty());
    }

    #[test]
    fn watch_never_yields_other_owners_records() {
        let store = open_store();
        let sub = store
            .watch("tasks", &Predicate::field("userId", "u1"))
            .expect("watch");
        let _ = sub.try_next();

        store
            .insert("tasks", fields(&[("text", "theirs"), ("userId", "u2")]))
            .expect("insert");
        let snapshot = sub.try_next().expect("delivery").expect("snapshot");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn unwatch_stops_delivery() {
        let store = open_store();
        let sub = store
            .watch("tasks", &Predicate::field("userId", "u1"))
            .expect("watch");
        let _ = sub.try_next();
        store.unwatch(sub.id());

        store
            .insert("tasks", fields(&[("text", "a"), ("userId", "u1")]))
            .expect("insert");
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn delete_missing_id_is_a_noop() {
        let store = open_store();
        store.delete("tasks", "no-such-id").expect("delete");
    }

    #[test]
    fn patch_missing_id_is_not_found() {
        let store = open_store();
        let err = store
            .patch("tasks", "no-such-id", fields(&[("text", "x")]))
            .expect_err("patch should fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn transact_applies_conditional_transition() {
        let store = open_store();
        let pred = Predicate::field("userId", "u1").and("date", "2025-01-05");

        // No match: insert.
        store
            .transact("attendance", &pred, &mut |current| {
                assert!(current.is_none());
                Some(Mutation::Insert(fields(&[
                    ("userId", "u1"),
                    ("date", "2025-01-05"),
                    ("status", "Present"),
                ])))
            })
            .expect("transact insert");

        // Match: observe the committed record and delete it.
        store
            .transact("attendance", &pred, &mut |current| {
                let record = current.expect("record present");
                assert_eq!(record.get("status"), Some(&json!("Present")));
                let id = record.get("id").and_then(Value::as_str).unwrap_or("");
                Some(Mutation::Delete(id.to_string()))
            })
            .expect("transact delete");

        let records = store.query("attendance", &pred).expect("query");
        assert!(records.is_empty());
    }
}
