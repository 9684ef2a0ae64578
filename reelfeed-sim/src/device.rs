//! Simulated device collaborators: local gallery and connectivity.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use reelfeed_core::feed::{Connectivity, LocalGallery, VideoDescriptor};

/// Gallery backed by a fixed list of descriptors, newest first.
#[derive(Debug, Default)]
pub struct StaticGallery {
    videos: RwLock<Vec<VideoDescriptor>>,
}

impl StaticGallery {
    pub fn new(mut videos: Vec<VideoDescriptor>) -> Self {
        videos.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        Self {
            videos: RwLock::new(videos),
        }
    }

    pub fn replace(&self, videos: Vec<VideoDescriptor>) {
        *self.videos.write() = Self::new(videos).videos.into_inner();
    }

    pub fn len(&self) -> usize {
        self.videos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.read().is_empty()
    }
}

#[async_trait]
impl LocalGallery for StaticGallery {
    async fn list_videos(&self, limit: usize) -> Result<Vec<VideoDescriptor>, std::io::Error> {
        Ok(self.videos.read().iter().take(limit).cloned().collect())
    }
}

/// Connectivity probe flipped by the simulation.
#[derive(Debug)]
pub struct ToggleConnectivity {
    online: AtomicBool,
}

impl ToggleConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            tracing::debug!("Simulated connectivity changed: online={}", online);
        }
    }
}

impl Default for ToggleConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Connectivity for ToggleConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SimCatalog;

    #[tokio::test]
    async fn test_gallery_lists_newest_first_up_to_limit() {
        let gallery = StaticGallery::new(SimCatalog::generate(5, 8).descriptors());

        let listed = gallery.list_videos(3).await.unwrap();

        assert_eq!(listed.len(), 3);
        assert!(listed[0].uploaded_at >= listed[1].uploaded_at);
        assert!(listed[1].uploaded_at >= listed[2].uploaded_at);
        assert_eq!(gallery.len(), 8);
    }

    #[tokio::test]
    async fn test_connectivity_toggle() {
        let connectivity = ToggleConnectivity::default();
        assert!(connectivity.is_online().await);

        connectivity.set_online(false);
        assert!(!connectivity.is_online().await);
    }
}
