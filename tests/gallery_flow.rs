use std::sync::Arc;
use std::time::Duration;

use med_gallery::config::GalleryConfig;
use med_gallery::data::{
    DocumentStore, FieldOp, FieldUpdate, MemoryBlobStore, MemoryClipboard, MemoryDocumentStore,
};
use med_gallery::gallery::{Gallery, Services};
use med_gallery::model::{GridSize, ImageFile, MAX_IMAGE_BYTES};
use med_gallery::notify::{Severity, ToastLog};
use med_gallery::session::{Identity, Session};
use med_gallery::storage;
use serde_json::json;

const SETTLE: Duration = Duration::from_secs(5);
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

struct Harness {
    store: Arc<MemoryDocumentStore>,
    blobs: Arc<MemoryBlobStore>,
    toasts: Arc<ToastLog>,
    clipboard: Arc<MemoryClipboard>,
    session: Arc<Session>,
    gallery: Gallery,
}

fn harness() -> Harness {
    harness_with(GalleryConfig::default())
}

fn harness_with(settings: GalleryConfig) -> Harness {
    let store = Arc::new(MemoryDocumentStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let toasts = Arc::new(ToastLog::new());
    let clipboard = Arc::new(MemoryClipboard::new());
    let session = Arc::new(Session::new(Identity::new("current-user", "You", "")));
    let services = Services {
        store: store.clone(),
        blobs: blobs.clone(),
        notifier: toasts.clone(),
        clipboard: clipboard.clone(),
        identity: session.clone(),
    };
    let gallery = Gallery::new(services, settings);
    Harness {
        store,
        blobs,
        toasts,
        clipboard,
        session,
        gallery,
    }
}

fn seed(store: &dyn DocumentStore, caption: &str, name: &str, department: &str, at: i64) -> String {
    store
        .create_document(
            "posts",
            vec![
                FieldUpdate::set(
                    "user",
                    json!({
                        "name": name,
                        "avatar": "",
                        "verified": true,
                        "college": "SMAK Medical College",
                        "department": department,
                    }),
                ),
                FieldUpdate::set("image", json!("https://img.example/1.jpg")),
                FieldUpdate::set("caption", json!(caption)),
                FieldUpdate::set("description", json!("")),
                FieldUpdate::set("likes", json!(0)),
                FieldUpdate::set("likedBy", json!([])),
                FieldUpdate::set("bookmarkedBy", json!([])),
                FieldUpdate::set("comments", json!([])),
                FieldUpdate::set("gridSize", json!("medium")),
                FieldUpdate::set("createdAt", json!(at)),
            ],
        )
        .unwrap()
}

fn mounted() -> (Harness, String) {
    let mut h = harness();
    let id = seed(&*h.store, "Echo case", "Dr. A", "Cardiology", 1_000);
    h.gallery.mount();
    h.gallery.poll();
    (h, id)
}

fn fill_draft(gallery: &mut Gallery) {
    let draft = gallery.draft_mut();
    draft.caption = "Chest X-ray".into();
    draft.description = "Teaching case".into();
    draft.author_name = "Dr. Rao".into();
    draft.department = "Radiology".into();
}

#[test]
fn initial_snapshot_is_newest_first() {
    let mut h = harness();
    let old = seed(&*h.store, "old", "A", "Cardiology", 1_000);
    let new = seed(&*h.store, "new", "B", "Neurology", 3_000);
    let mid = seed(&*h.store, "mid", "C", "Surgery", 2_000);
    h.store
        .create_document("posts", vec![FieldUpdate::set("caption", json!("no timestamp"))])
        .unwrap();

    assert!(h.gallery.is_loading());
    h.gallery.mount();
    h.gallery.poll();

    assert!(!h.gallery.is_loading());
    let ids: Vec<String> = h.gallery.posts().iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec![new, mid, old]);
    assert_eq!(h.store.subscriber_count(), 1);
}

#[test]
fn empty_collection_finishes_loading() {
    let mut h = harness();
    h.gallery.mount();
    h.gallery.poll();
    assert!(!h.gallery.is_loading());
    assert_eq!(h.gallery.post_count(), 0);
}

#[test]
fn mount_twice_keeps_one_subscription() {
    let (mut h, _) = mounted();
    assert!(h.gallery.is_mounted());
    h.gallery.mount();
    assert_eq!(h.store.subscriber_count(), 1);

    h.gallery.unmount();
    assert!(!h.gallery.is_mounted());
    assert_eq!(h.store.subscriber_count(), 0);
}

#[test]
fn post_without_author_or_image_stays_in_feed() {
    let (mut h, first) = mounted();
    let bare = h
        .store
        .create_document(
            "posts",
            vec![
                FieldUpdate::set("caption", json!("Unlabelled slide")),
                FieldUpdate::set("createdAt", json!(9_000)),
            ],
        )
        .unwrap();
    h.gallery.poll();

    let ids: Vec<String> = h.gallery.posts().iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec![bare.clone(), first]);
    let post = h.gallery.post(&bare).unwrap();
    assert!(post.author.name.is_empty());
    assert!(post.image_url.is_empty());
}

#[test]
fn new_posts_appear_without_refresh() {
    let (mut h, first) = mounted();
    let second = seed(&*h.store, "later", "B", "Pediatrics", 5_000);
    h.gallery.poll();
    let ids: Vec<String> = h.gallery.posts().iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec![second, first]);
}

#[test]
fn like_then_unlike() {
    let (mut h, id) = mounted();

    h.gallery.toggle_like(&id);
    assert_eq!(h.toasts.latest().unwrap().title, "Post liked");
    assert!(h.gallery.settle(SETTLE));
    let post = h.gallery.post(&id).unwrap();
    assert_eq!(post.like_count, 1);
    assert_eq!(post.liked_by, vec!["current-user".to_string()]);
    assert!(h.gallery.is_liked(&post));

    h.gallery.toggle_like(&id);
    assert_eq!(h.toasts.latest().unwrap().title, "Post unliked");
    assert!(h.gallery.settle(SETTLE));
    let post = h.gallery.post(&id).unwrap();
    assert_eq!(post.like_count, 0);
    assert!(post.liked_by.is_empty());
    assert!(!h.gallery.is_liked(&post));
}

#[test]
fn rapid_double_like_does_not_drift_counter() {
    let (mut h, id) = mounted();

    h.gallery.toggle_like(&id);
    h.gallery.toggle_like(&id);
    assert!(h.gallery.settle(SETTLE));

    assert_eq!(h.store.update_calls(), 2);
    let post = h.gallery.post(&id).unwrap();
    assert_eq!(post.like_count, 1);
    assert_eq!(post.liked_by.len(), 1);
    assert_eq!(h.toasts.titles(), vec!["Post liked", "Post liked"]);
}

#[test]
fn likes_from_several_users_accumulate() {
    let (mut h, id) = mounted();
    h.gallery.toggle_like(&id);
    assert!(h.gallery.settle(SETTLE));

    h.session.switch(Identity::new("resident-2", "Dr. B", ""));
    let post = h.gallery.post(&id).unwrap();
    assert!(!h.gallery.is_liked(&post));
    h.gallery.toggle_like(&id);
    assert!(h.gallery.settle(SETTLE));

    let post = h.gallery.post(&id).unwrap();
    assert_eq!(post.like_count, 2);
    assert!(post.is_liked_by("current-user"));
    assert!(post.is_liked_by("resident-2"));
}

#[test]
fn toggle_issues_membership_update() {
    let (mut h, id) = mounted();
    h.gallery.toggle_like(&id);
    assert!(h.gallery.settle(SETTLE));

    let log = h.store.update_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, id);
    assert_eq!(
        log[0].1,
        vec![FieldUpdate::new(
            "likedBy",
            FieldOp::SetMembership {
                member: json!("current-user"),
                present: true,
                counter: Some("likes".into()),
            },
        )]
    );
}

#[test]
fn bookmark_toggle_leaves_likes_alone() {
    let (mut h, id) = mounted();

    h.gallery.toggle_bookmark(&id);
    assert_eq!(h.toasts.latest().unwrap().title, "Post bookmarked");
    assert!(h.gallery.settle(SETTLE));
    let post = h.gallery.post(&id).unwrap();
    assert!(h.gallery.is_bookmarked(&post));
    assert_eq!(post.like_count, 0);

    h.gallery.toggle_bookmark(&id);
    assert_eq!(h.toasts.latest().unwrap().title, "Bookmark removed");
    assert!(h.gallery.settle(SETTLE));
    assert!(h.gallery.post(&id).unwrap().bookmarked_by.is_empty());
}

#[test]
fn failed_toggle_reports_error_after_intent() {
    let (mut h, id) = mounted();
    h.store.fail_writes(Some("offline"));

    h.gallery.toggle_like(&id);
    assert!(h.gallery.settle(SETTLE));

    assert_eq!(h.toasts.titles(), vec!["Post liked", "Error"]);
    let last = h.toasts.latest().unwrap();
    assert_eq!(last.severity, Severity::Error);
    assert_eq!(last.description, "Failed to update like status");
    assert_eq!(h.gallery.post(&id).unwrap().like_count, 0);

    h.gallery.toggle_bookmark(&id);
    assert!(h.gallery.settle(SETTLE));
    assert_eq!(
        h.toasts.latest().unwrap().description,
        "Failed to update bookmark status"
    );
}

#[test]
fn toggle_on_unknown_post_is_ignored() {
    let (mut h, _) = mounted();
    h.gallery.toggle_like("missing");
    h.gallery.toggle_bookmark("missing");
    assert!(h.gallery.settle(SETTLE));
    assert_eq!(h.store.update_calls(), 0);
    assert!(h.toasts.all().is_empty());
}

#[test]
fn comment_is_appended_to_selected_post() {
    let (mut h, id) = mounted();
    h.gallery.open_post(&id);
    h.gallery.set_comment_input("  Great teaching case  ");

    assert!(h.gallery.add_comment());
    assert!(h.gallery.settle(SETTLE));

    let post = h.gallery.selected_post().unwrap();
    assert_eq!(post.comments.len(), 1);
    let comment = &post.comments[0];
    assert_eq!(comment.text, "Great teaching case");
    assert_eq!(comment.author, "You");
    assert!(comment.id.starts_with("comment_"));
    assert_eq!(comment.avatar_url, GalleryConfig::default().comment_avatar_url);
    assert_eq!(h.gallery.comment_input(), "");
    assert_eq!(h.toasts.latest().unwrap().title, "Comment added!");
}

#[test]
fn blank_comment_or_no_selection_is_ignored() {
    let (mut h, id) = mounted();
    h.gallery.set_comment_input("hello");
    assert!(!h.gallery.add_comment());

    h.gallery.open_post(&id);
    h.gallery.set_comment_input("   ");
    assert!(!h.gallery.add_comment());
    assert_eq!(h.store.update_calls(), 0);
}

#[test]
fn failed_comment_keeps_input() {
    let (mut h, id) = mounted();
    h.store.fail_writes(Some("offline"));
    h.gallery.open_post(&id);
    h.gallery.set_comment_input("Interesting");

    assert!(h.gallery.add_comment());
    assert!(h.gallery.settle(SETTLE));

    assert_eq!(h.gallery.comment_input(), "Interesting");
    let last = h.toasts.latest().unwrap();
    assert_eq!(last.title, "Error");
    assert_eq!(last.description, "Failed to add comment");
    assert!(h.gallery.selected_post().unwrap().comments.is_empty());
}

#[test]
fn selected_post_follows_snapshots() {
    let (mut h, id) = mounted();
    h.gallery.open_post(&id);
    h.store
        .update_document(
            "posts",
            &id,
            vec![FieldUpdate::new(
                "likedBy",
                FieldOp::SetMembership {
                    member: json!("someone-else"),
                    present: true,
                    counter: Some("likes".into()),
                },
            )],
        )
        .unwrap();
    h.gallery.poll();
    assert_eq!(h.gallery.selected_post().unwrap().like_count, 1);

    h.gallery.close_post();
    assert!(h.gallery.selected_post().is_none());
}

#[test]
fn share_copies_post_link() {
    let mut settings = GalleryConfig::default();
    settings.origin = "https://gallery.example/".into();
    let mut h = harness_with(settings);

    let url = h.gallery.share("abc123").unwrap();
    assert_eq!(url, "https://gallery.example/gallery/post/abc123");
    assert_eq!(h.clipboard.contents().as_deref(), Some(url.as_str()));
    assert_eq!(h.toasts.latest().unwrap().title, "Link copied to clipboard!");
}

#[test]
fn create_post_without_image_uses_fallback() {
    let (mut h, existing) = mounted();
    h.gallery.open_create();
    fill_draft(&mut h.gallery);

    assert!(h.gallery.submit_post());
    assert!(h.gallery.is_submitting());
    assert!(h.gallery.settle(SETTLE));

    assert!(!h.gallery.is_submitting());
    assert!(!h.gallery.is_create_open());
    assert_eq!(h.blobs.upload_calls(), 0);
    assert_eq!(h.toasts.latest().unwrap().title, "Post created successfully!");

    let posts = h.gallery.posts();
    assert_eq!(posts.len(), 2);
    let created = &posts[0];
    assert_ne!(created.id, existing);
    assert_eq!(created.caption, "Chest X-ray");
    assert_eq!(created.image_url, GalleryConfig::default().fallback_image_url);
    assert_eq!(created.author.name, "Dr. Rao");
    assert_eq!(created.author.affiliation, "SMAK Medical College");
    assert!(!created.author.verified);
    assert_eq!(created.like_count, 0);
    assert!(created.liked_by.is_empty() && created.comments.is_empty());
    assert!(GridSize::ALL.contains(&created.grid_size));
    assert!(created.created_at.is_some());

    let draft = h.gallery.draft();
    assert!(draft.caption.is_empty() && draft.author_name.is_empty());
    assert_eq!(draft.affiliation, "SMAK Medical College");
}

#[test]
fn create_post_uploads_image_first() {
    let (mut h, _) = mounted();
    fill_draft(&mut h.gallery);
    assert!(h
        .gallery
        .attach_image(ImageFile::new("scan.png", "image/png", PNG.to_vec())));
    assert_eq!(
        h.toasts.latest().unwrap().title,
        "Image selected successfully!"
    );

    assert!(h.gallery.submit_post());
    assert!(h.gallery.settle(SETTLE));

    assert_eq!(h.blobs.upload_calls(), 1);
    let created = h.gallery.posts()[0].clone();
    assert!(created.image_url.starts_with("memory://medical-posts/"));
    assert!(created.image_url.ends_with("_scan.png"));
    let path = created.image_url.trim_start_matches("memory://");
    assert_eq!(h.blobs.content_type(path).as_deref(), Some("image/png"));
}

#[test]
fn non_image_file_is_rejected() {
    let (mut h, _) = mounted();
    assert!(!h
        .gallery
        .attach_image(ImageFile::new("notes.txt", "text/plain", b"hi".to_vec())));
    assert!(h.gallery.draft().image.is_none());
    let last = h.toasts.latest().unwrap();
    assert_eq!(last.severity, Severity::Warning);
    assert_eq!(last.description, "Please select an image file");
}

#[test]
fn image_size_limit_is_inclusive() {
    let (mut h, _) = mounted();
    let at_limit = vec![0u8; MAX_IMAGE_BYTES as usize];
    assert!(h
        .gallery
        .attach_image(ImageFile::new("a.png", "image/png", at_limit)));

    let over = vec![0u8; MAX_IMAGE_BYTES as usize + 1];
    assert!(!h
        .gallery
        .attach_image(ImageFile::new("b.png", "image/png", over)));
    assert_eq!(
        h.toasts.latest().unwrap().description,
        "Image size should be less than 5MB"
    );
    assert_eq!(h.gallery.draft().image.as_ref().unwrap().name, "a.png");
}

#[test]
fn oversized_image_never_reaches_services() {
    let (mut h, _) = mounted();
    fill_draft(&mut h.gallery);
    h.gallery.draft_mut().image = Some(ImageFile::new(
        "huge.png",
        "image/png",
        vec![0u8; MAX_IMAGE_BYTES as usize + 1],
    ));
    let creates = h.store.create_calls();

    assert!(!h.gallery.submit_post());
    assert!(h.gallery.settle(SETTLE));
    assert!(!h.gallery.is_submitting());
    assert_eq!(h.blobs.upload_calls(), 0);
    assert_eq!(h.store.create_calls(), creates);
    let last = h.toasts.latest().unwrap();
    assert_eq!(last.severity, Severity::Warning);
    assert_eq!(last.description, "Image size should be less than 5MB");
}

#[test]
fn missing_fields_block_submission() {
    let (mut h, _) = mounted();
    h.gallery.draft_mut().caption = "Only a caption".into();

    assert!(!h.gallery.submit_post());
    assert!(h.gallery.settle(SETTLE));
    assert_eq!(h.store.create_calls(), 1);
    assert_eq!(
        h.toasts.latest().unwrap().description,
        "Caption, name and department are required"
    );
}

#[test]
fn second_submit_while_pending_is_ignored() {
    let (mut h, _) = mounted();
    fill_draft(&mut h.gallery);

    assert!(h.gallery.submit_post());
    assert!(!h.gallery.submit_post());
    assert!(h.gallery.settle(SETTLE));
    // One seeded post plus one submission.
    assert_eq!(h.store.create_calls(), 2);
    assert_eq!(h.gallery.post_count(), 2);
}

#[test]
fn upload_failure_keeps_draft() {
    let (mut h, _) = mounted();
    h.blobs.fail_uploads(Some("quota exceeded"));
    h.gallery.open_create();
    fill_draft(&mut h.gallery);
    h.gallery
        .attach_image(ImageFile::new("scan.png", "image/png", PNG.to_vec()));

    assert!(h.gallery.submit_post());
    assert!(h.gallery.settle(SETTLE));

    assert_eq!(h.store.create_calls(), 1);
    assert!(!h.gallery.is_submitting());
    assert!(h.gallery.is_create_open());
    assert_eq!(h.gallery.draft().caption, "Chest X-ray");
    let last = h.toasts.latest().unwrap();
    assert_eq!(last.title, "Error creating post");
    assert!(last.description.contains("quota exceeded"));
}

#[test]
fn create_failure_allows_retry() {
    let (mut h, _) = mounted();
    h.store.fail_writes(Some("offline"));
    fill_draft(&mut h.gallery);

    assert!(h.gallery.submit_post());
    assert!(h.gallery.settle(SETTLE));
    assert_eq!(h.toasts.latest().unwrap().title, "Error creating post");
    assert_eq!(h.gallery.post_count(), 1);

    h.store.fail_writes(None);
    assert!(h.gallery.submit_post());
    assert!(h.gallery.settle(SETTLE));
    assert_eq!(h.gallery.post_count(), 2);
}

#[test]
fn subscription_error_keeps_last_posts() {
    let (mut h, id) = mounted();
    h.store.emit_error("posts", "permission denied");
    h.gallery.poll();

    let last = h.toasts.latest().unwrap();
    assert_eq!(last.title, "Error loading posts");
    assert_eq!(last.description, "Failed to load posts from database");
    assert!(h.gallery.post(&id).is_some());
}

#[test]
fn unmount_releases_subscription_and_drops_late_results() {
    let (mut h, id) = mounted();
    h.store.fail_writes(Some("offline"));
    h.gallery.toggle_like(&id);
    h.gallery.unmount();

    assert_eq!(h.store.subscriber_count(), 0);
    assert!(h.gallery.settle(SETTLE));
    assert_eq!(h.toasts.titles(), vec!["Post liked"]);

    h.store.fail_writes(None);
    seed(&*h.store, "after unmount", "Z", "Surgery", 9_000);
    h.gallery.poll();
    assert_eq!(h.gallery.post_count(), 1);
}

#[test]
fn dropping_gallery_unsubscribes() {
    let (h, _) = mounted();
    let store = h.store.clone();
    drop(h);
    assert_eq!(store.subscriber_count(), 0);
}

#[test]
fn search_filters_visible_posts() {
    let mut h = harness();
    seed(&*h.store, "Echo findings", "Dr. A", "Cardiology", 1_000);
    seed(&*h.store, "Night shift", "Dr. Echo", "Emergency Medicine", 2_000);
    seed(&*h.store, "MRI review", "Dr. C", "Radiology", 3_000);
    h.gallery.mount();
    h.gallery.poll();

    assert_eq!(h.gallery.visible_posts().len(), 3);
    h.gallery.set_search("echo");
    let captions: Vec<String> = h
        .gallery
        .visible_posts()
        .iter()
        .map(|p| p.caption.clone())
        .collect();
    assert_eq!(captions, vec!["Night shift", "Echo findings"]);

    h.gallery.set_search("RADIOLOGY");
    assert_eq!(h.gallery.visible_posts().len(), 1);
    h.gallery.set_search("");
    assert_eq!(h.gallery.visible_posts().len(), 3);
}

#[test]
fn sqlite_backed_gallery_round_trip() {
    let store = Arc::new(storage::Store::open_in_memory().unwrap());
    let toasts = Arc::new(ToastLog::new());
    let services = Services {
        store: store.clone(),
        blobs: Arc::new(MemoryBlobStore::new()),
        notifier: toasts.clone(),
        clipboard: Arc::new(MemoryClipboard::new()),
        identity: Arc::new(Session::new(Identity::new("current-user", "You", ""))),
    };
    let id = seed(&*store, "Persisted", "Dr. S", "Surgery", 1_000);
    let mut gallery = Gallery::new(services, GalleryConfig::default());
    gallery.mount();
    gallery.poll();
    assert_eq!(gallery.post_count(), 1);

    gallery.toggle_like(&id);
    gallery.open_post(&id);
    gallery.set_comment_input("Saved");
    assert!(gallery.add_comment());
    assert!(gallery.settle(SETTLE));

    let post = gallery.selected_post().unwrap();
    assert_eq!(post.like_count, 1);
    assert_eq!(post.comments.len(), 1);
    let stored = store.get_document("posts", &id).unwrap().unwrap();
    assert_eq!(stored["likes"], json!(1));
    assert_eq!(toasts.count(Severity::Error), 0);
}
