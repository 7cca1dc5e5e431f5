use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::DocumentSnapshot;
use crate::media;

pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

pub const DEPARTMENTS: &[&str] = &[
    "Cardiology",
    "Neurology",
    "Pediatrics",
    "Emergency Medicine",
    "Radiology",
    "Surgery",
    "Internal Medicine",
    "Research Division",
];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select an image file")]
    NotAnImage { content_type: String },
    #[error("Image size should be less than {}", size_limit_label(.max))]
    TooLarge { size: u64, max: u64 },
    #[error("Caption, name and department are required")]
    MissingRequiredFields,
}

/// Whole mebibytes print as "5MB"; smaller or fractional limits keep a unit
/// that does not round down to zero.
fn size_limit_label(max: &u64) -> String {
    const MIB: u64 = 1024 * 1024;
    match *max {
        max if max >= MIB && max % MIB == 0 => format!("{}MB", max / MIB),
        max if max >= MIB => format!("{:.1}MB", max as f64 / MIB as f64),
        max if max >= 1024 && max % 1024 == 0 => format!("{}KB", max / 1024),
        max if max >= 1024 => format!("{:.1}KB", max as f64 / 1024.0),
        max => format!("{max} bytes"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GridSize {
    #[default]
    Small,
    Medium,
    Large,
}

impl GridSize {
    pub const ALL: [GridSize; 3] = [GridSize::Small, GridSize::Medium, GridSize::Large];

    pub fn random() -> Self {
        *Self::ALL
            .choose(&mut rand::thread_rng())
            .unwrap_or(&GridSize::Small)
    }

    /// Tile span as (columns, rows).
    pub fn span(self) -> (u16, u16) {
        match self {
            GridSize::Large => (2, 2),
            GridSize::Medium => (1, 2),
            GridSize::Small => (1, 1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GridSize::Small => "small",
            GridSize::Medium => "medium",
            GridSize::Large => "large",
        }
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "avatar")]
    pub avatar_url: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, rename = "college")]
    pub affiliation: String,
    #[serde(default)]
    pub department: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    /// Display name only, not an identity reference.
    #[serde(rename = "user")]
    pub author: String,
    #[serde(default, rename = "avatar")]
    pub avatar_url: String,
    pub text: String,
    /// Assigned from the posting client's wall clock, unlike `Post::created_at`.
    #[serde(rename = "createdAt", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(author: String, avatar_url: String, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("comment_{}", now.timestamp_millis()),
            author,
            avatar_url,
            text,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(skip)]
    pub id: String,
    #[serde(default, rename = "user")]
    pub author: Author,
    #[serde(default, rename = "image")]
    pub image_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "likes")]
    pub like_count: i64,
    #[serde(default, rename = "likedBy")]
    pub liked_by: Vec<String>,
    #[serde(default, rename = "bookmarkedBy")]
    pub bookmarked_by: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default, rename = "gridSize")]
    pub grid_size: GridSize,
    /// Assigned by the document store when the post is created.
    #[serde(
        default,
        rename = "createdAt",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn from_document(doc: &DocumentSnapshot) -> Result<Self> {
        let mut post: Post = serde_json::from_value(Value::Object(doc.data.clone()))
            .with_context(|| format!("decode post {}", doc.id))?;
        post.id = doc.id.clone();
        Ok(post)
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.liked_by.iter().any(|id| id == user_id)
    }

    pub fn is_bookmarked_by(&self, user_id: &str) -> bool {
        self.bookmarked_by.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read image file {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        let content_type = media::detect_mime(&bytes);
        Ok(Self {
            name,
            content_type,
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn validate(&self, max_bytes: u64) -> Result<(), ValidationError> {
        if !self.content_type.starts_with("image/") {
            return Err(ValidationError::NotAnImage {
                content_type: self.content_type.clone(),
            });
        }
        if self.size() > max_bytes {
            return Err(ValidationError::TooLarge {
                size: self.size(),
                max: max_bytes,
            });
        }
        Ok(())
    }
}

/// Input form state for the create-post overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub caption: String,
    pub description: String,
    pub author_name: String,
    pub affiliation: String,
    pub department: String,
    pub image: Option<ImageFile>,
}

impl PostDraft {
    pub fn new(affiliation: &str) -> Self {
        Self {
            caption: String::new(),
            description: String::new(),
            author_name: String::new(),
            affiliation: affiliation.to_string(),
            department: String::new(),
            image: None,
        }
    }

    pub fn check_required(&self) -> Result<(), ValidationError> {
        if self.caption.trim().is_empty()
            || self.author_name.trim().is_empty()
            || self.department.trim().is_empty()
        {
            return Err(ValidationError::MissingRequiredFields);
        }
        Ok(())
    }

    pub fn cycle_department(&mut self, forward: bool) {
        let current = DEPARTMENTS.iter().position(|d| *d == self.department);
        let len = DEPARTMENTS.len();
        let next = match (current, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(idx), true) => (idx + 1) % len,
            (Some(idx), false) => (idx + len - 1) % len,
        };
        self.department = DEPARTMENTS[next].to_string();
    }
}
