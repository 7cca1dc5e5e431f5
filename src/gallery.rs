//! Interaction model for the post gallery.
//!
//! The remote document store is the only source of truth. The gallery keeps
//! the last snapshot it was pushed, derives the filtered view from it, and
//! turns user actions into store calls that run on worker threads. Their
//! outcomes come back over a channel and are applied by [`Gallery::poll`] on
//! the owning thread, so all view state is mutated from one place.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::{json, Value};

use crate::config::GalleryConfig;
use crate::data::{
    BlobStore, Clipboard, Direction, DocumentSnapshot, DocumentStore, FieldOp, FieldUpdate,
    SnapshotListener, Subscription,
};
use crate::model::{Author, Comment, GridSize, ImageFile, Post, PostDraft, ValidationError};
use crate::notify::{Notifier, Toast};
use crate::search;
use crate::session::IdentityProvider;

pub const ORDER_FIELD: &str = "createdAt";
pub const COMMENTS_FIELD: &str = "comments";

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clipboard: Arc<dyn Clipboard>,
    pub identity: Arc<dyn IdentityProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Like,
    Bookmark,
}

impl Toggle {
    fn field(self) -> &'static str {
        match self {
            Toggle::Like => "likedBy",
            Toggle::Bookmark => "bookmarkedBy",
        }
    }

    fn counter(self) -> Option<&'static str> {
        match self {
            Toggle::Like => Some("likes"),
            Toggle::Bookmark => None,
        }
    }

    fn is_member(self, post: &Post, user_id: &str) -> bool {
        match self {
            Toggle::Like => post.is_liked_by(user_id),
            Toggle::Bookmark => post.is_bookmarked_by(user_id),
        }
    }

    fn intent_toast(self, becomes_member: bool) -> Toast {
        match (self, becomes_member) {
            (Toggle::Like, true) => Toast::info("Post liked", "Added to your likes"),
            (Toggle::Like, false) => Toast::info("Post unliked", "Removed from your likes"),
            (Toggle::Bookmark, true) => Toast::info("Post bookmarked", "Added to your bookmarks"),
            (Toggle::Bookmark, false) => {
                Toast::info("Bookmark removed", "Removed from your bookmarks")
            }
        }
    }

    fn failure(self) -> &'static str {
        match self {
            Toggle::Like => "Failed to update like status",
            Toggle::Bookmark => "Failed to update bookmark status",
        }
    }
}

/// What changed between two consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Posts keyed by document id, in snapshot order. Posts that did not change
/// between snapshots keep their allocation.
#[derive(Debug, Default)]
pub struct PostIndex {
    order: Vec<String>,
    by_id: HashMap<String, Arc<Post>>,
}

impl PostIndex {
    pub fn apply(&mut self, posts: Vec<Post>) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();
        let mut order = Vec::with_capacity(posts.len());
        let mut by_id = HashMap::with_capacity(posts.len());
        for post in posts {
            let id = post.id.clone();
            let entry = match self.by_id.remove(&id) {
                Some(existing) if *existing == post => existing,
                Some(_) => {
                    diff.changed.push(id.clone());
                    Arc::new(post)
                }
                None => {
                    diff.added.push(id.clone());
                    Arc::new(post)
                }
            };
            order.push(id.clone());
            by_id.insert(id, entry);
        }
        diff.removed = self.by_id.drain().map(|(id, _)| id).collect();
        diff.removed.sort();
        self.order = order;
        self.by_id = by_id;
        diff
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Post>> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Post>> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

enum Event {
    Snapshot {
        generation: u64,
        result: Result<Vec<DocumentSnapshot>>,
    },
    Toggled {
        toggle: Toggle,
        post_id: String,
        result: Result<()>,
    },
    CommentAdded {
        post_id: String,
        result: Result<()>,
    },
    PostCreated {
        result: Result<String>,
    },
}

pub struct Gallery {
    services: Services,
    settings: GalleryConfig,
    posts: PostIndex,
    loading: bool,
    search: String,
    selected: Option<String>,
    comment_input: String,
    draft: PostDraft,
    create_open: bool,
    submitting: bool,
    mounted: bool,
    subscription: Option<Subscription>,
    generation: u64,
    in_flight: usize,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl Gallery {
    pub fn new(services: Services, settings: GalleryConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        let draft = PostDraft::new(&settings.default_affiliation);
        Self {
            services,
            settings,
            posts: PostIndex::default(),
            loading: true,
            search: String::new(),
            selected: None,
            comment_input: String::new(),
            draft,
            create_open: false,
            submitting: false,
            mounted: false,
            subscription: None,
            generation: 0,
            in_flight: 0,
            events_tx,
            events_rx,
        }
    }

    /// Opens the posts subscription. Calling it while mounted does nothing.
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        self.loading = true;
        self.generation += 1;

        let generation = self.generation;
        let tx = self.events_tx.clone();
        let listener: SnapshotListener = Arc::new(move |result| {
            let _ = tx.send(Event::Snapshot { generation, result });
        });
        match self.services.store.subscribe(
            &self.settings.collection,
            ORDER_FIELD,
            Direction::Descending,
            listener,
        ) {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(err) => self.subscription_failed(err),
        }
    }

    /// Releases the subscription. Snapshots and call results that arrive
    /// afterwards are dropped.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.generation += 1;
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Applies every pending event without blocking. Returns whether
    /// anything was applied.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            changed = true;
        }
        changed
    }

    /// Blocks until every in-flight call has been applied or `timeout`
    /// passes. Returns false on timeout.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.poll();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => self.handle_event(event),
                Err(_) => return false,
            }
        }
        self.poll();
        true
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn posts(&self) -> Vec<Arc<Post>> {
        self.posts.iter().cloned().collect()
    }

    pub fn post(&self, id: &str) -> Option<Arc<Post>> {
        self.posts.get(id).cloned()
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    pub fn search_mut(&mut self) -> &mut String {
        &mut self.search
    }

    /// Posts matching the current search term, newest first.
    pub fn visible_posts(&self) -> Vec<Arc<Post>> {
        search::filter(self.posts.iter(), &self.search)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn current_user_id(&self) -> String {
        self.services.identity.current_user_id()
    }

    pub fn is_liked(&self, post: &Post) -> bool {
        post.is_liked_by(&self.current_user_id())
    }

    pub fn is_bookmarked(&self, post: &Post) -> bool {
        post.is_bookmarked_by(&self.current_user_id())
    }

    pub fn open_post(&mut self, post_id: &str) {
        self.selected = Some(post_id.to_string());
    }

    pub fn close_post(&mut self) {
        self.selected = None;
    }

    pub fn selected_post_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// The selected post as of the latest snapshot.
    pub fn selected_post(&self) -> Option<Arc<Post>> {
        self.selected
            .as_deref()
            .and_then(|id| self.posts.get(id))
            .cloned()
    }

    pub fn comment_input(&self) -> &str {
        &self.comment_input
    }

    pub fn comment_input_mut(&mut self) -> &mut String {
        &mut self.comment_input
    }

    pub fn set_comment_input(&mut self, text: impl Into<String>) {
        self.comment_input = text.into();
    }

    pub fn draft(&self) -> &PostDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut PostDraft {
        &mut self.draft
    }

    pub fn open_create(&mut self) {
        self.create_open = true;
    }

    pub fn close_create(&mut self) {
        self.create_open = false;
    }

    pub fn is_create_open(&self) -> bool {
        self.create_open
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn toggle_like(&mut self, post_id: &str) {
        self.toggle(Toggle::Like, post_id);
    }

    pub fn toggle_bookmark(&mut self, post_id: &str) {
        self.toggle(Toggle::Bookmark, post_id);
    }

    fn toggle(&mut self, toggle: Toggle, post_id: &str) {
        let Some(post) = self.posts.get(post_id).cloned() else {
            tracing::debug!(%post_id, ?toggle, "toggle on unknown post ignored");
            return;
        };
        let user_id = self.current_user_id();
        let becomes_member = !toggle.is_member(&post, &user_id);
        let update = FieldUpdate::new(
            toggle.field(),
            FieldOp::SetMembership {
                member: Value::String(user_id),
                present: becomes_member,
                counter: toggle.counter().map(str::to_string),
            },
        );

        let store = self.services.store.clone();
        let collection = self.settings.collection.clone();
        let id = post_id.to_string();
        self.spawn(move || {
            let result = store.update_document(&collection, &id, vec![update]);
            Event::Toggled {
                toggle,
                post_id: id,
                result,
            }
        });
        self.services
            .notifier
            .notify(toggle.intent_toast(becomes_member));
    }

    pub fn share_url(&self, post_id: &str) -> String {
        format!(
            "{}/gallery/post/{}",
            self.settings.origin.trim_end_matches('/'),
            post_id
        )
    }

    /// Copies the post's share link to the clipboard.
    pub fn share(&self, post_id: &str) -> Option<String> {
        let url = self.share_url(post_id);
        match self.services.clipboard.write_text(&url) {
            Ok(()) => {
                self.services.notifier.notify(Toast::info(
                    "Link copied to clipboard!",
                    "Share this medical moment with others",
                ));
                Some(url)
            }
            Err(err) => {
                tracing::warn!(%post_id, "copy share link failed: {err:#}");
                self.services
                    .notifier
                    .notify(Toast::error("Error", "Failed to copy link"));
                None
            }
        }
    }

    /// Appends the typed comment to the selected post. Returns whether a
    /// call was issued.
    pub fn add_comment(&mut self) -> bool {
        let text = self.comment_input.trim();
        if text.is_empty() {
            return false;
        }
        let Some(post_id) = self.selected.clone() else {
            return false;
        };

        let identity = self.services.identity.current_identity();
        let avatar_url = if identity.avatar_url.is_empty() {
            self.settings.comment_avatar_url.clone()
        } else {
            identity.avatar_url
        };
        let comment = Comment::new(identity.display_name, avatar_url, text.to_string(), Utc::now());
        let value = match serde_json::to_value(&comment) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(%post_id, "encode comment: {err}");
                self.services
                    .notifier
                    .notify(Toast::error("Error", "Failed to add comment"));
                return false;
            }
        };

        let store = self.services.store.clone();
        let collection = self.settings.collection.clone();
        self.spawn(move || {
            let result = store.update_document(
                &collection,
                &post_id,
                vec![FieldUpdate::new(COMMENTS_FIELD, FieldOp::ArrayUnion(vec![value]))],
            );
            Event::CommentAdded { post_id, result }
        });
        true
    }

    /// Reads an image from disk and attaches it to the draft.
    pub fn select_image(&mut self, path: &Path) -> bool {
        match ImageFile::from_path(path) {
            Ok(image) => self.attach_image(image),
            Err(err) => {
                tracing::warn!(path = %path.display(), "select image failed: {err:#}");
                self.services
                    .notifier
                    .notify(Toast::error("Error", "Failed to select image"));
                false
            }
        }
    }

    pub fn attach_image(&mut self, image: ImageFile) -> bool {
        if let Err(err) = image.validate(self.settings.max_image_bytes) {
            self.reject(err);
            return false;
        }
        self.draft.image = Some(image);
        self.services.notifier.notify(Toast::info(
            "Image selected successfully!",
            "Your medical image is ready to be uploaded",
        ));
        true
    }

    pub fn clear_image(&mut self) {
        self.draft.image = None;
    }

    /// Validates the draft and starts creating the post. Returns whether a
    /// submission was started.
    pub fn submit_post(&mut self) -> bool {
        if self.submitting {
            return false;
        }
        if let Err(err) = self.draft.check_required() {
            self.reject(err);
            return false;
        }
        if let Some(image) = &self.draft.image {
            if let Err(err) = image.validate(self.settings.max_image_bytes) {
                self.reject(err);
                return false;
            }
        }

        self.submitting = true;
        let grid_size = GridSize::random();
        let draft = self.draft.clone();
        let store = self.services.store.clone();
        let blobs = self.services.blobs.clone();
        let settings = self.settings.clone();
        self.spawn(move || Event::PostCreated {
            result: create_post(store.as_ref(), blobs.as_ref(), &settings, draft, grid_size),
        });
        true
    }

    fn reject(&self, err: ValidationError) {
        tracing::debug!("validation failed: {err}");
        self.services
            .notifier
            .notify(Toast::warning("Error", err.to_string()));
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> Event + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.events_tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Snapshot { generation, result } => {
                if generation != self.generation || !self.mounted {
                    return;
                }
                match result {
                    Ok(docs) => self.apply_snapshot(docs),
                    Err(err) => self.subscription_failed(err),
                }
            }
            Event::Toggled {
                toggle,
                post_id,
                result,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if !self.mounted {
                    return;
                }
                if let Err(err) = result {
                    tracing::warn!(%post_id, ?toggle, "toggle failed: {err:#}");
                    self.services
                        .notifier
                        .notify(Toast::error("Error", toggle.failure()));
                }
            }
            Event::CommentAdded { post_id, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if !self.mounted {
                    return;
                }
                match result {
                    Ok(()) => {
                        self.comment_input.clear();
                        self.services.notifier.notify(Toast::info(
                            "Comment added!",
                            "Your comment has been posted",
                        ));
                    }
                    Err(err) => {
                        tracing::warn!(%post_id, "add comment failed: {err:#}");
                        self.services
                            .notifier
                            .notify(Toast::error("Error", "Failed to add comment"));
                    }
                }
            }
            Event::PostCreated { result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.submitting = false;
                if !self.mounted {
                    return;
                }
                match result {
                    Ok(id) => {
                        tracing::info!(post_id = %id, "post created");
                        self.draft = PostDraft::new(&self.settings.default_affiliation);
                        self.create_open = false;
                        self.services.notifier.notify(Toast::info(
                            "Post created successfully!",
                            "Your medical post has been shared with the community",
                        ));
                    }
                    Err(err) => {
                        tracing::error!("create post failed: {err:#}");
                        self.services
                            .notifier
                            .notify(Toast::error("Error creating post", format!("{err:#}")));
                    }
                }
            }
        }
    }

    fn apply_snapshot(&mut self, docs: Vec<DocumentSnapshot>) {
        let posts = docs
            .iter()
            .filter_map(|doc| match Post::from_document(doc) {
                Ok(post) => Some(post),
                Err(err) => {
                    tracing::warn!(doc_id = %doc.id, "skipping malformed post: {err:#}");
                    None
                }
            })
            .collect();
        let diff = self.posts.apply(posts);
        self.loading = false;
        tracing::debug!(
            total = self.posts.len(),
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            "snapshot applied"
        );
    }

    fn subscription_failed(&mut self, err: anyhow::Error) {
        tracing::error!("posts subscription failed: {err:#}");
        self.loading = false;
        self.services.notifier.notify(Toast::error(
            "Error loading posts",
            "Failed to load posts from database",
        ));
    }
}

impl Drop for Gallery {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn create_post(
    store: &dyn DocumentStore,
    blobs: &dyn BlobStore,
    settings: &GalleryConfig,
    draft: PostDraft,
    grid_size: GridSize,
) -> Result<String> {
    let image_url = match draft.image {
        Some(image) => {
            let path = format!(
                "{}/{}_{}",
                settings.upload_prefix.trim_end_matches('/'),
                Utc::now().timestamp_millis(),
                image.name
            );
            let handle = blobs
                .upload_bytes(&path, &image.bytes, &image.content_type)
                .context("upload image")?;
            blobs
                .resolve_download_url(&handle)
                .context("resolve image url")?
        }
        None => settings.fallback_image_url.clone(),
    };

    let author = Author {
        name: draft.author_name,
        avatar_url: settings.author_avatar_url.clone(),
        verified: false,
        affiliation: draft.affiliation,
        department: draft.department,
    };
    let fields = vec![
        FieldUpdate::set("user", serde_json::to_value(&author).context("encode author")?),
        FieldUpdate::set("image", json!(image_url)),
        FieldUpdate::set("caption", json!(draft.caption)),
        FieldUpdate::set("description", json!(draft.description)),
        FieldUpdate::set("likes", json!(0)),
        FieldUpdate::set(COMMENTS_FIELD, json!([])),
        FieldUpdate::set("likedBy", json!([])),
        FieldUpdate::set("bookmarkedBy", json!([])),
        FieldUpdate::set("gridSize", json!(grid_size.as_str())),
        FieldUpdate::new(ORDER_FIELD, FieldOp::ServerTimestamp),
    ];
    store
        .create_document(&settings.collection, fields)
        .context("create post document")
}
