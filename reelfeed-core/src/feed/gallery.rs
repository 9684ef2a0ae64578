//! Locally available videos used as an offline substitute feed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use url::Url;

use super::descriptor::{
    Availability, EngagementCounters, UploaderRef, VideoDescriptor, VideoId,
};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "m4v", "webm"];

/// Source of descriptor-compatible entries available without network.
#[async_trait]
pub trait LocalGallery: Send + Sync {
    /// Returns at most `limit` locally playable descriptors, newest first.
    ///
    /// # Errors
    /// - `std::io::Error` - Gallery storage could not be read
    async fn list_videos(&self, limit: usize) -> Result<Vec<VideoDescriptor>, std::io::Error>;
}

/// Gallery backed by a directory tree of video files.
#[derive(Debug, Clone)]
pub struct DirectoryGallery {
    root: PathBuf,
}

impl DirectoryGallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the directory tree collecting video files with their modification time.
    async fn scan(&self) -> Result<Vec<(PathBuf, DateTime<Utc>)>, std::io::Error> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Unreadable root is an error, unreadable subdirectories are skipped
                Err(e) if dir == self.root => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping gallery directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(_) => continue,
                };

                if metadata.is_dir() {
                    let hidden = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'));
                    if !hidden {
                        pending.push(path);
                    }
                } else if metadata.is_file() && is_video_file(&path) {
                    let modified = metadata
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                    found.push((path, modified));
                }
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl LocalGallery for DirectoryGallery {
    async fn list_videos(&self, limit: usize) -> Result<Vec<VideoDescriptor>, std::io::Error> {
        let mut files = self.scan().await?;
        files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let descriptors: Vec<VideoDescriptor> = files
            .into_iter()
            .filter_map(|(path, modified)| descriptor_for_file(&path, modified))
            .take(limit)
            .collect();

        tracing::debug!(
            "Gallery {} offers {} local videos",
            self.root.display(),
            descriptors.len()
        );
        Ok(descriptors)
    }
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Stable id derived from the file path so repeated scans agree.
pub(crate) fn local_video_id(path: &Path) -> VideoId {
    let mut hasher = Sha1::new();
    hasher.update(path.to_string_lossy().as_bytes());
    VideoId::new(format!("local-{}", hex::encode(hasher.finalize())))
}

fn descriptor_for_file(path: &Path, modified: DateTime<Utc>) -> Option<VideoDescriptor> {
    let absolute = std::path::absolute(path).ok()?;
    let media_url = Url::from_file_path(&absolute).ok()?;
    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .replace(['.', '_'], " ");

    Some(VideoDescriptor {
        id: local_video_id(&absolute),
        title,
        media_url: Some(media_url),
        variants: Vec::new(),
        duration: std::time::Duration::ZERO,
        counters: EngagementCounters::default(),
        uploader: UploaderRef {
            id: "local".to_string(),
            name: "On this device".to_string(),
        },
        uploaded_at: modified,
        liked_by_viewer: false,
        series: None,
        availability: Availability::Available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_finds_nested_videos_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("clips/more")).unwrap();
        std::fs::write(dir.path().join("beach_day.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("clips/more/night.webm"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let gallery = DirectoryGallery::new(dir.path());
        let videos = gallery.list_videos(10).await.unwrap();

        assert_eq!(videos.len(), 2);
        assert!(videos.iter().all(|v| v.id.as_str().starts_with("local-")));
        assert!(videos.iter().any(|v| v.title == "beach day"));
        assert!(videos.iter().all(VideoDescriptor::is_playable));
    }

    #[tokio::test]
    async fn test_listing_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("clip{i}.mp4")), b"x").unwrap();
        }

        let gallery = DirectoryGallery::new(dir.path());

        assert_eq!(gallery.list_videos(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let gallery = DirectoryGallery::new("/nonexistent/reelfeed/gallery");

        assert!(gallery.list_videos(3).await.is_err());
    }

    #[test]
    fn test_local_ids_are_stable() {
        let path = Path::new("/videos/a.mp4");

        assert_eq!(local_video_id(path), local_video_id(path));
        assert_ne!(local_video_id(path), local_video_id(Path::new("/videos/b.mp4")));
    }
}
