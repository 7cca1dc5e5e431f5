use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

pub type SnapshotListener = Arc<dyn Fn(Result<Vec<DocumentSnapshot>>) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("field {field} is not {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },
    #[error("invalid blob path {0:?}")]
    InvalidPath(String),
    #[error("blob {0} not found")]
    BlobNotFound(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    ServerTimestamp,
    Increment(i64),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    /// Makes `member` present or absent in the array field. `counter` moves
    /// by one in the same direction only when membership actually changed.
    SetMembership {
        member: Value,
        present: bool,
        counter: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: String,
    pub op: FieldOp,
}

impl FieldUpdate {
    pub fn new(field: impl Into<String>, op: FieldOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    pub fn set(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FieldOp::Set(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

pub trait DocumentStore: Send + Sync {
    fn create_document(&self, collection: &str, fields: Vec<FieldUpdate>) -> Result<String>;
    fn update_document(&self, collection: &str, id: &str, updates: Vec<FieldUpdate>)
        -> Result<()>;
    fn subscribe(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
        listener: SnapshotListener,
    ) -> Result<Subscription>;
}

pub trait BlobStore: Send + Sync {
    fn upload_bytes(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<BlobHandle>;
    fn resolve_download_url(&self, handle: &BlobHandle) -> Result<String>;
}

pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<()>;
}

/// Releases its listener when dropped.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub fn generate_document_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

/// Applies one call's updates to `doc`. Works on a copy so a failing
/// operation leaves `doc` untouched.
pub fn apply_updates(doc: &mut Fields, updates: &[FieldUpdate]) -> Result<()> {
    let mut next = doc.clone();
    let now = Utc::now().timestamp_millis();
    for update in updates {
        let field = update.field.as_str();
        match &update.op {
            FieldOp::Set(value) => {
                next.insert(field.to_string(), value.clone());
            }
            FieldOp::ServerTimestamp => {
                next.insert(field.to_string(), Value::from(now));
            }
            FieldOp::Increment(by) => increment(&mut next, field, *by)?,
            FieldOp::ArrayUnion(values) => {
                let array = array_mut(&mut next, field)?;
                for value in values {
                    if !array.contains(value) {
                        array.push(value.clone());
                    }
                }
            }
            FieldOp::ArrayRemove(values) => {
                let array = array_mut(&mut next, field)?;
                array.retain(|item| !values.contains(item));
            }
            FieldOp::SetMembership {
                member,
                present,
                counter,
            } => {
                let array = array_mut(&mut next, field)?;
                let is_member = array.contains(member);
                if is_member == *present {
                    continue;
                }
                if *present {
                    array.push(member.clone());
                } else {
                    array.retain(|item| item != member);
                }
                if let Some(counter) = counter {
                    increment(&mut next, counter, if *present { 1 } else { -1 })?;
                }
            }
        }
    }
    *doc = next;
    Ok(())
}

fn increment(doc: &mut Fields, field: &str, by: i64) -> Result<()> {
    let current = match doc.get(field) {
        None | Some(Value::Null) => 0,
        Some(value) => value.as_i64().ok_or_else(|| StoreError::FieldType {
            field: field.to_string(),
            expected: "an integer",
        })?,
    };
    doc.insert(field.to_string(), Value::from(current + by));
    Ok(())
}

fn array_mut<'a>(doc: &'a mut Fields, field: &str) -> Result<&'a mut Vec<Value>> {
    let entry = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    entry.as_array_mut().ok_or_else(|| {
        anyhow!(StoreError::FieldType {
            field: field.to_string(),
            expected: "an array",
        })
    })
}

/// Orders documents by `order_by`, dropping those without the field. Ties
/// fall back to the document id.
pub fn ordered_snapshot(
    mut docs: Vec<DocumentSnapshot>,
    order_by: &str,
    direction: Direction,
) -> Vec<DocumentSnapshot> {
    docs.retain(|doc| doc.data.get(order_by).map_or(false, |v| !v.is_null()));
    docs.sort_by(|a, b| {
        let ord = compare_values(&a.data[order_by], &b.data[order_by]);
        let ord = match direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        };
        ord.then_with(|| a.id.cmp(&b.id))
    });
    docs
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub(crate) struct Subscriber {
    pub id: u64,
    pub collection: String,
    pub order_by: String,
    pub direction: Direction,
    pub listener: SnapshotListener,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
}

/// In-process document store with push subscriptions. Failures can be
/// injected to exercise error paths.
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<MemoryState>>,
    publishing: Mutex<()>,
    fail_writes: Mutex<Option<String>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    update_log: Mutex<Vec<(String, Vec<FieldUpdate>)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail with `message` until cleared.
    pub fn fail_writes(&self, message: Option<&str>) {
        *self.fail_writes.lock() = message.map(str::to_string);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(AtomicOrdering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(AtomicOrdering::SeqCst)
    }

    pub fn update_log(&self) -> Vec<(String, Vec<FieldUpdate>)> {
        self.update_log.lock().clone()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Fields> {
        self.state
            .lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Delivers `message` as a subscription error to every listener on
    /// `collection`.
    pub fn emit_error(&self, collection: &str, message: &str) {
        let listeners: Vec<SnapshotListener> = self
            .state
            .lock()
            .subscribers
            .iter()
            .filter(|sub| sub.collection == collection)
            .map(|sub| sub.listener.clone())
            .collect();
        for listener in listeners {
            listener(Err(anyhow!(StoreError::Unavailable(message.to_string()))));
        }
    }

    fn check_writable(&self) -> Result<()> {
        if let Some(message) = self.fail_writes.lock().clone() {
            bail!(StoreError::Unavailable(message));
        }
        Ok(())
    }

    fn publish(&self, collection: &str) {
        let _order = self.publishing.lock();
        let deliveries: Vec<(SnapshotListener, Vec<DocumentSnapshot>)> = {
            let state = self.state.lock();
            let docs = collection_docs(&state, collection);
            state
                .subscribers
                .iter()
                .filter(|sub| sub.collection == collection)
                .map(|sub| {
                    (
                        sub.listener.clone(),
                        ordered_snapshot(docs.clone(), &sub.order_by, sub.direction),
                    )
                })
                .collect()
        };
        for (listener, snapshot) in deliveries {
            listener(Ok(snapshot));
        }
    }
}

fn collection_docs(state: &MemoryState, collection: &str) -> Vec<DocumentSnapshot> {
    state
        .collections
        .get(collection)
        .map(|docs| {
            docs.iter()
                .map(|(id, data)| DocumentSnapshot {
                    id: id.clone(),
                    data: data.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl DocumentStore for MemoryDocumentStore {
    fn create_document(&self, collection: &str, fields: Vec<FieldUpdate>) -> Result<String> {
        self.creates.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_writable()?;
        let mut doc = Fields::new();
        apply_updates(&mut doc, &fields)?;
        let id = generate_document_id();
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), doc);
        self.publish(collection);
        Ok(id)
    }

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<FieldUpdate>,
    ) -> Result<()> {
        self.updates.fetch_add(1, AtomicOrdering::SeqCst);
        self.update_log.lock().push((id.to_string(), updates.clone()));
        self.check_writable()?;
        {
            let mut state = self.state.lock();
            let doc = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            apply_updates(doc, &updates)?;
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
        let (id, initial) = {
            let mut state = self.state.lock();
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.push(Subscriber {
                id,
                collection: collection.to_string(),
                order_by: order_by.to_string(),
                direction,
                listener: listener.clone(),
            });
            let docs = collection_docs(&state, collection);
            (id, ordered_snapshot(docs, order_by, direction))
        };
        listener(Ok(initial));

        let state = Arc::downgrade(&self.state);
        Ok(Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state.lock().subscribers.retain(|sub| sub.id != id);
            }
        }))
    }
}

/// In-process blob store; download URLs use the `memory://` scheme.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (String, Vec<u8>)>>,
    fail_uploads: Mutex<Option<String>>,
    uploads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, message: Option<&str>) {
        *self.fail_uploads.lock() = message.map(str::to_string);
    }

    pub fn upload_calls(&self) -> usize {
        self.uploads.load(AtomicOrdering::SeqCst)
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.blobs.lock().get(path).map(|(ct, _)| ct.clone())
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload_bytes(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<BlobHandle> {
        self.uploads.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(message) = self.fail_uploads.lock().clone() {
            bail!(StoreError::Unavailable(message));
        }
        let path = crate::media::normalize_blob_path(path)?;
        let checksum = crate::media::sha1_hex(bytes);
        self.blobs
            .lock()
            .insert(path.clone(), (content_type.to_string(), bytes.to_vec()));
        Ok(BlobHandle {
            path,
            size: bytes.len() as u64,
            checksum,
        })
    }

    fn resolve_download_url(&self, handle: &BlobHandle) -> Result<String> {
        if !self.blobs.lock().contains_key(&handle.path) {
            bail!(StoreError::BlobNotFound(handle.path.clone()));
        }
        Ok(format!("memory://{}", handle.path))
    }
}

#[derive(Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn write_text(&self, text: &str) -> Result<()> {
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }
}

/// System clipboard, opened per write.
#[derive(Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Clipboard for SystemClipboard {
    fn write_text(&self, text: &str) -> Result<()> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|err| anyhow!("create clipboard context: {}", err))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|err| anyhow!("copy to clipboard: {}", err))
    }
}
