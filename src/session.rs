//! The single logical owner context: at most one signed-in user, five
//! live entity views. Switching owners tears every subscription down and
//! re-establishes it against the new owner.

use std::sync::Arc;

use crate::auth::User;
use crate::errors::AppResult;
use crate::store::{DocumentStore, Record};
use crate::sync::{EntityStore, ENTITY_KINDS};

/// One drained snapshot delivery for a collection.
pub struct SyncEvent {
    pub collection: &'static str,
    pub records: Vec<Record>,
}

pub struct Session<S: DocumentStore> {
    store: Arc<S>,
    user: Option<User>,
    entities: Vec<EntityStore<S>>,
}

impl<S: DocumentStore> Session<S> {
    pub fn new(store: Arc<S>) -> Self {
        let entities = ENTITY_KINDS
            .iter()
            .map(|config| EntityStore::new(*config, store.clone()))
            .collect();
        Session {
            store,
            user: None,
            entities,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn set_avatar(&mut self, user: User) {
        self.user = Some(user);
    }

    /// Signs a user in (or out with `None`). All five subscriptions are
    /// replaced in one pass; the previous owner's caches are gone by the
    /// time this returns.
    pub fn set_user(&mut self, user: Option<User>) -> AppResult<()> {
        let owner = user.as_ref().map(|u| u.id.clone());
        self.user = user;
        for entity in &mut self.entities {
            entity.subscribe(owner.as_deref())?;
        }
        Ok(())
    }

    pub fn entity(&self, collection: &str) -> Option<&EntityStore<S>> {
        self.entities.iter().find(|e| e.collection() == collection)
    }

    /// Drains pending snapshot deliveries across all kinds, in kind order
    /// and delivery order within a kind.
    pub fn poll_events(&mut self) -> AppResult<Vec<SyncEvent>> {
        let mut events = Vec::new();
        for entity in &mut self.entities {
            let collection = entity.collection();
            for records in entity.poll()? {
                events.push(SyncEvent {
                    collection,
                    records,
                });
            }
        }
        Ok(events)
    }

    /// Consumes pending deliveries and reports the current cache per kind.
    pub fn current_state(&mut self) -> AppResult<Vec<(&'static str, Vec<Record>)>> {
        let mut state = Vec::new();
        for entity in &mut self.entities {
            entity.poll()?;
            state.push((entity.collection(), entity.records().to_vec()));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{signup, SignupProfile};
    use crate::store::SqliteStore;
    use serde_json::{json, Map};

    fn open_store() -> Arc<SqliteStore> {
        let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
        crate::db::init_schema(&conn).expect("init schema");
        Arc::new(SqliteStore::new(conn))
    }

    fn make_user(store: &SqliteStore, email: &str) -> User {
        signup(
            store,
            &SignupProfile {
                name: "Test User",
                strand: "STEM",
                grade: "11",
                email,
                password: "pw",
            },
        )
        .expect("signup")
    }

    #[test]
    fn owner_switch_leaves_no_stale_records() {
        let store = open_store();
        let ana = make_user(&store, "ana@example.com");
        let ben = make_user(&store, "ben@example.com");

        let mut session = Session::new(store.clone());
        session.set_user(Some(ana.clone())).expect("sign in ana");

        let mut text = Map::new();
        text.insert("text".to_string(), json!("ana's task"));
        session
            .entity("tasks")
            .expect("tasks")
            .create(&ana.id, &text)
            .expect("create");

        let state = session.current_state().expect("state");
        let tasks = &state.iter().find(|(c, _)| *c == "tasks").expect("tasks").1;
        assert_eq!(tasks.len(), 1);

        session.set_user(Some(ben.clone())).expect("switch to ben");
        let state = session.current_state().expect("state");
        for (collection, records) in &state {
            assert!(
                records.iter().all(|r| r.get("userId") == Some(&json!(ben.id))),
                "{collection} must only hold the new owner's records"
            );
        }
        let tasks = &state.iter().find(|(c, _)| *c == "tasks").expect("tasks").1;
        assert!(tasks.is_empty(), "ben has no tasks");
    }

    #[test]
    fn logout_empties_every_kind() {
        let store = open_store();
        let ana = make_user(&store, "ana@example.com");
        let mut session = Session::new(store.clone());
        session.set_user(Some(ana.clone())).expect("sign in");

        let mut text = Map::new();
        text.insert("text".to_string(), json!("task"));
        session
            .entity("tasks")
            .expect("tasks")
            .create(&ana.id, &text)
            .expect("create");

        session.set_user(None).expect("sign out");
        assert!(session.user().is_none());
        let events = session.poll_events().expect("events");
        assert!(
            events.iter().all(|e| e.records.is_empty()),
            "teardown yields only empty snapshots"
        );
        for (_, records) in session.current_state().expect("state") {
            assert!(records.is_empty());
        }
    }
}
