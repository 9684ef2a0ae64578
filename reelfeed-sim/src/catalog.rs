//! Seeded generation of wire-format video records.

use chrono::{DateTime, TimeDelta, Utc};
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reelfeed_core::feed::descriptor::{SeriesJson, UploaderJson, VariantJson};
use reelfeed_core::feed::{FeedResponse, VideoDescriptor, VideoDescriptorJson};

/// Host every simulated media URL points at.
pub const SIM_MEDIA_HOST: &str = "https://media.reelfeed.sim";

// Catalog timestamps count back from a fixed instant so runs are reproducible
const CATALOG_EPOCH: i64 = 1_735_689_600;

const ADJECTIVES: &[&str] = &[
    "Sunny", "Quiet", "Electric", "Tiny", "Golden", "Midnight", "Rapid", "Hidden",
];
const SUBJECTS: &[&str] = &[
    "Harbor", "Kitchen", "Skatepark", "Forest", "Rooftop", "Market", "Studio", "Trail",
];
const UPLOADERS: &[&str] = &["mira", "jonas", "aiko", "tomas", "leila", "sven"];

/// A fixed, seeded list of videos in server order.
#[derive(Debug, Clone)]
pub struct SimCatalog {
    videos: Vec<VideoDescriptorJson>,
    seed: u64,
}

impl SimCatalog {
    /// Generates `size` records; the same seed always yields the same catalog.
    pub fn generate(seed: u64, size: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let epoch = DateTime::from_timestamp(CATALOG_EPOCH, 0).unwrap_or(DateTime::UNIX_EPOCH);
        let videos = (0..size)
            .map(|index| generate_record(&mut rng, index, epoch))
            .collect();

        tracing::debug!("Generated simulated catalog of {} videos (seed {})", size, seed);
        Self { videos, seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn records(&self) -> &[VideoDescriptorJson] {
        &self.videos
    }

    /// Corrupts the media URL of every `nth` record, starting with the first.
    pub fn with_invalid_every(mut self, nth: usize) -> Self {
        if nth == 0 {
            return self;
        }
        for record in self.videos.iter_mut().step_by(nth) {
            record.video_url = format!("not a url {}", record.id);
        }
        self
    }

    /// Slice of the catalog for a 1-based page.
    pub fn page(&self, page: u32, limit: u32) -> FeedResponse {
        let limit = limit as usize;
        let start = (page.saturating_sub(1) as usize).saturating_mul(limit);
        let videos: Vec<VideoDescriptorJson> = self
            .videos
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect();
        let has_more = start.saturating_add(limit) < self.videos.len();

        FeedResponse::new(videos, has_more)
    }

    /// Converts every valid record into a descriptor.
    pub fn descriptors(&self) -> Vec<VideoDescriptor> {
        self.videos
            .iter()
            .cloned()
            .filter_map(|record| VideoDescriptor::try_from(record).ok())
            .collect()
    }
}

fn generate_record(rng: &mut ChaCha8Rng, index: usize, epoch: DateTime<Utc>) -> VideoDescriptorJson {
    let id = format!("sim-{index:04}");
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Plain");
    let subject = SUBJECTS.choose(rng).copied().unwrap_or("Clip");
    let uploader = UPLOADERS.choose(rng).copied().unwrap_or("anon");

    let views: u64 = rng.random_range(0..2_000_000);
    let likes = (views as f64 * rng.random_range(0.0..0.12)) as u64;
    let shares = (likes as f64 * rng.random_range(0.0..0.3)) as u64;
    let comments = (likes as f64 * rng.random_range(0.0..0.2)) as u64;
    let ad_earnings = (views as f64 * rng.random_range(0.0..0.002) * 100.0).round() / 100.0;
    let age_minutes: i64 = rng.random_range(0..60 * 24 * 14);

    let variants = if rng.random_bool(0.3) {
        vec![
            VariantJson {
                label: "480p".to_string(),
                url: format!("{SIM_MEDIA_HOST}/{id}/480.mp4"),
                bandwidth: Some(1_200_000),
            },
            VariantJson {
                label: "hls".to_string(),
                url: format!("{SIM_MEDIA_HOST}/{id}/index.m3u8"),
                bandwidth: None,
            },
        ]
    } else {
        Vec::new()
    };

    let series = rng.random_bool(0.1).then(|| SeriesJson {
        id: format!("series-{}", index % 4),
        title: format!("{subject} Diaries"),
        episode: (index / 4) as u32 + 1,
    });

    VideoDescriptorJson {
        id: id.clone(),
        name: format!("{adjective} {subject}"),
        video_url: format!("{SIM_MEDIA_HOST}/{id}.mp4"),
        variants,
        duration: rng.random_range(5.0..240.0),
        views,
        likes,
        shares,
        comments,
        ad_earnings,
        uploader: UploaderJson {
            id: format!("user-{uploader}"),
            name: uploader.to_string(),
        },
        uploaded_at: epoch - TimeDelta::minutes(age_minutes),
        is_liked: rng.random_bool(0.05),
        series,
    }
}
