use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use sha1::{Digest, Sha1};
use url::Url;

use crate::data::{BlobHandle, BlobStore, StoreError};

#[derive(Debug, Clone)]
pub struct Config {
    pub root: Option<PathBuf>,
}

/// Blob store backed by a local directory. Download URLs are `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn open(cfg: Config) -> Result<Self> {
        let root = cfg
            .root
            .or_else(default_blob_dir)
            .context("media: blob dir not configured")?;
        fs::create_dir_all(&root)
            .with_context(|| format!("media: create directory {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("media: resolve {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = normalize_blob_path(path)?;
        Ok(self.root.join(relative))
    }
}

impl BlobStore for LocalBlobStore {
    fn upload_bytes(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<BlobHandle> {
        let normalized = normalize_blob_path(path)?;
        let target = self.full_path(&normalized)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("media: create directory {}", parent.display()))?;
        }
        fs::write(&target, bytes).context("media: write")?;
        tracing::debug!(path = %normalized, size = bytes.len(), content_type, "blob stored");
        Ok(BlobHandle {
            path: normalized,
            size: bytes.len() as u64,
            checksum: sha1_hex(bytes),
        })
    }

    fn resolve_download_url(&self, handle: &BlobHandle) -> Result<String> {
        let target = self.full_path(&handle.path)?;
        if !target.exists() {
            return Err(anyhow!(StoreError::BlobNotFound(handle.path.clone())));
        }
        let url = Url::from_file_path(&target)
            .map_err(|_| anyhow!("media: cannot build url for {}", target.display()))?;
        Ok(url.to_string())
    }
}

/// Rejects empty, absolute and parent-escaping paths; returns the path with
/// `/` separators.
pub fn normalize_blob_path(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(path.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return Err(anyhow!(StoreError::InvalidPath(path.to_string()))),
        }
    }
    if parts.is_empty() {
        return Err(anyhow!(StoreError::InvalidPath(path.to_string())));
    }
    Ok(parts.join("/"))
}

fn default_blob_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("med-gallery").join("blobs"))
}

pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let mut buffer = [0u8; 512];
            let mut cursor = std::io::Cursor::new(bytes);
            let read = cursor.read(&mut buffer).unwrap_or(0);
            tree_magic_mini::from_u8(&buffer[..read]).to_string()
        }
    }
}
