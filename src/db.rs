use rusqlite::Connection;
use std::path::Path;

/// Opens (creating if needed) the workspace document store.
pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("campus.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Every persisted item lives in one generic `documents` table keyed by
/// (collection, doc_id), with the payload as a JSON object. `seq` preserves
/// insertion order, which is the order snapshots are delivered in.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(collection, doc_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, seq)",
        [],
    )?;
    Ok(())
}
