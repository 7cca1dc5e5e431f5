use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::data::{
    apply_updates, generate_document_id, ordered_snapshot, Direction, DocumentSnapshot,
    DocumentStore, FieldUpdate, Fields, SnapshotListener, StoreError, Subscriber, Subscription,
};

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

#[derive(Default)]
struct Listeners {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Document store persisted in SQLite. Each document is a JSON object row;
/// subscribers get a full snapshot after every committed write.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    listeners: Arc<Mutex<Listeners>>,
    publishing: Arc<Mutex<()>>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            publishing: Arc::new(Mutex::new(())),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            publishing: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()
            .context("storage: query document")?;
        raw.map(|raw| decode_fields(&raw)).transpose()
    }

    pub fn list_documents(&self, collection: &str) -> Result<Vec<DocumentSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT id, data
FROM documents
WHERE collection = ?1
"#,
        )?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, raw)| {
                Ok(DocumentSnapshot {
                    data: decode_fields(&raw)?,
                    id,
                })
            })
            .collect()
    }

    fn publish(&self, collection: &str) {
        let _order = self.publishing.lock();
        let targets: Vec<(SnapshotListener, String, Direction)> = self
            .listeners
            .lock()
            .subscribers
            .iter()
            .filter(|sub| sub.collection == collection)
            .map(|sub| (sub.listener.clone(), sub.order_by.clone(), sub.direction))
            .collect();
        if targets.is_empty() {
            return;
        }
        match self.list_documents(collection) {
            Ok(docs) => {
                for (listener, order_by, direction) in targets {
                    listener(Ok(ordered_snapshot(docs.clone(), &order_by, direction)));
                }
            }
            Err(err) => {
                tracing::warn!(collection, "storage: snapshot query failed: {err:#}");
                let message = format!("{err:#}");
                for (listener, _, _) in targets {
                    listener(Err(anyhow!("{}", message)));
                }
            }
        }
    }
}

impl DocumentStore for Store {
    fn create_document(&self, collection: &str, fields: Vec<FieldUpdate>) -> Result<String> {
        let mut doc = Fields::new();
        apply_updates(&mut doc, &fields)?;
        let id = generate_document_id();
        {
            let conn = self.conn.lock();
            conn.execute(
                r#"
INSERT INTO documents (collection, id, data, updated_at)
VALUES (?1, ?2, ?3, ?4)
"#,
                params![collection, id, encode_fields(&doc)?, unix_now()],
            )
            .context("storage: insert document")?;
        }
        self.publish(collection);
        Ok(id)
    }

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<FieldUpdate>,
    ) -> Result<()> {
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction().context("storage: begin transaction")?;
            let raw: Option<String> = tx
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .context("storage: query document")?;
            let raw = raw.ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            let mut doc = decode_fields(&raw)?;
            apply_updates(&mut doc, &updates)?;
            tx.execute(
                r#"
UPDATE documents SET data = ?3, updated_at = ?4
WHERE collection = ?1 AND id = ?2
"#,
                params![collection, id, encode_fields(&doc)?, unix_now()],
            )
            .context("storage: update document")?;
            tx.commit().context("storage: commit")?;
        }
        self.publish(collection);
        Ok(())
    }

    fn subscribe(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
        listener: SnapshotListener,
    ) -> Result<Subscription> {
        let _order = self.publishing.lock();
        let initial = self
            .list_documents(collection)
            .context("storage: initial snapshot")?;
        let id = {
            let mut listeners = self.listeners.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.subscribers.push(Subscriber {
                id,
                collection: collection.to_string(),
                order_by: order_by.to_string(),
                direction,
                listener: listener.clone(),
            });
            id
        };
        listener(Ok(ordered_snapshot(initial, order_by, direction)));

        let listeners = Arc::downgrade(&self.listeners);
        Ok(Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().subscribers.retain(|sub| sub.id != id);
            }
        }))
    }
}

fn encode_fields(doc: &Fields) -> Result<String> {
    serde_json::to_string(doc).context("storage: encode document")
}

fn decode_fields(raw: &str) -> Result<Fields> {
    match serde_json::from_str::<Value>(raw).context("storage: decode document")? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("storage: document is not an object")),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, unix_now()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  id TEXT NOT NULL,
  data TEXT NOT NULL,
  updated_at INTEGER NOT NULL,
  PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("med-gallery").join("gallery.db"))
}
