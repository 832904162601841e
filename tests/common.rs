//! Shared sidecar harness for the integration tests: spawns the binary,
//! speaks the line protocol, and cleans the workspace up on drop.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    pub workspace: PathBuf,
    next_id: u64,
}

impl Sidecar {
    /// Spawns the daemon without selecting a workspace.
    pub fn spawn(prefix: &str) -> Self {
        let workspace = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&workspace).expect("create temp dir");

        let exe = env!("CARGO_BIN_EXE_campusd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn campusd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            workspace,
            next_id: 1,
        }
    }

    /// Spawns the daemon and selects a fresh workspace.
    pub fn start(prefix: &str) -> Self {
        let mut sc = Self::spawn(prefix);
        let path = sc.workspace.to_string_lossy().to_string();
        sc.request_ok("workspace.select", json!({ "path": path }));
        sc
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(Value::as_str), Some(id.as_str()));
        value
    }

    /// Sends a request and returns its `result`, failing the test on error.
    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(Value::as_bool),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Sends a request expected to fail and returns the error code.
    pub fn request_err(&mut self, method: &str, params: Value) -> String {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(Value::as_bool),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .expect("error code")
            .to_string()
    }

    /// Current cached records of a collection via `sync.state`.
    pub fn records(&mut self, collection: &str) -> Vec<Value> {
        let state = self.request_ok("sync.state", json!({}));
        state
            .get(collection)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Drained snapshot deliveries for one collection via `sync.poll`.
    pub fn poll_collection(&mut self, collection: &str) -> Vec<Vec<Value>> {
        let result = self.request_ok("sync.poll", json!({}));
        result
            .get("events")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter(|e| e.get("collection").and_then(Value::as_str) == Some(collection))
            .map(|e| {
                e.get("records")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn signup(&mut self, name: &str, email: &str, password: &str) -> Value {
        self.request_ok(
            "auth.signup",
            json!({
                "name": name,
                "strand": "STEM",
                "grade": "11",
                "email": email,
                "password": password,
            }),
        )
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

/// Convenience accessor for a record's string field.
pub fn str_of<'a>(record: &'a Value, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or("")
}
