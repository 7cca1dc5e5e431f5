use chrono::{DateTime, Utc};

use crate::model::Post;

/// True when `term` occurs, ignoring case, in the caption, author name or
/// department. An empty term matches everything.
pub fn matches(post: &Post, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    [
        post.caption.as_str(),
        post.author.name.as_str(),
        post.author.department.as_str(),
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(&needle))
}

pub fn filter<'a, P>(posts: impl IntoIterator<Item = &'a P>, term: &str) -> Vec<&'a P>
where
    P: AsRef<Post> + 'a,
{
    posts
        .into_iter()
        .filter(|post| matches(AsRef::<Post>::as_ref(*post), term))
        .collect()
}

impl AsRef<Post> for Post {
    fn as_ref(&self) -> &Post {
        self
    }
}

pub fn format_time_ago(date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(date) = date else {
        return "Unknown".to_string();
    };
    let seconds = (now - date).num_seconds();
    if seconds < 60 {
        return "Just now".to_string();
    }
    if seconds < 3_600 {
        return format!("{} minutes ago", seconds / 60);
    }
    if seconds < 86_400 {
        return format!("{} hours ago", seconds / 3_600);
    }
    if seconds < 604_800 {
        return format!("{} days ago", seconds / 86_400);
    }
    date.format("%Y-%m-%d").to_string()
}
