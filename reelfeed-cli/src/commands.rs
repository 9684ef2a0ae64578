//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use reelfeed_core::cache::CacheKey;
use reelfeed_core::feed::{DirectoryGallery, FeedPage, HttpFeedApi};
use reelfeed_core::{
    Clock, FeedSource, FeedType, OfflineCache, RankingEngine, RankingPolicy, ReelfeedConfig,
    RuntimeMode, SystemClock,
};
use reelfeed_sim::SimEnvironment;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Fetch and rank feed pages
    Fetch {
        /// Feed type (main, trending, following, series)
        #[arg(short, long, default_value = "main")]
        feed: FeedType,
        /// Number of pages to fetch
        #[arg(short, long, default_value = "1")]
        pages: u32,
        /// Descriptors requested per page
        #[arg(long)]
        page_size: Option<u32>,
        /// Ordering applied to each page
        #[arg(long, value_enum, default_value = "recency")]
        ranking: RankingArg,
        /// Seed for the engagement-weighted ordering
        #[arg(long)]
        seed: Option<u64>,
        /// Persist fetched pages in this directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Local video directory used when the network is unavailable (production only)
        #[arg(long)]
        gallery_dir: Option<PathBuf>,
    },
    /// Scroll through a simulated feed session
    Simulate {
        /// Seed for catalog content and decoder failures
        #[arg(short, long)]
        seed: Option<u64>,
        /// Index to scroll to, one item at a time
        #[arg(long, default_value = "12")]
        scroll_to: usize,
        /// Feed type to simulate
        #[arg(short, long, default_value = "main")]
        feed: FeedType,
        /// Milliseconds spent on each item before scrolling on
        #[arg(long, default_value = "0")]
        dwell_ms: u64,
        /// Fraction of decoder initializations that fail
        #[arg(long, default_value = "0.0")]
        failure_rate: f64,
    },
    /// Inspect or maintain the offline cache
    Cache {
        /// Cache directory
        #[arg(long)]
        dir: PathBuf,
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Offline cache maintenance actions
#[derive(Subcommand)]
pub enum CacheAction {
    /// Show entry counts and hit statistics
    Stats,
    /// Show one cached page, e.g. `main-1`
    Show {
        /// Cache key in `<feed>-<page>` form
        key: String,
    },
    /// Remove expired entries
    Purge,
    /// Remove every entry
    Clear,
}

/// Ranking policy selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RankingArg {
    /// Newest uploads first
    Recency,
    /// Weighted random sampling over engagement
    Engagement,
}

impl RankingArg {
    fn into_policy(self, seed: Option<u64>) -> RankingPolicy {
        match self {
            RankingArg::Recency => RankingPolicy::RecencyFirst,
            RankingArg::Engagement => RankingPolicy::EngagementWeighted { seed },
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands, mode: RuntimeMode) -> anyhow::Result<()> {
    match command {
        Commands::Fetch {
            feed,
            pages,
            page_size,
            ranking,
            seed,
            cache_dir,
            gallery_dir,
        } => {
            let mut config = base_config(mode);
            if let Some(size) = page_size {
                config.feed.page_size = size;
            }
            config.feed.ranking = ranking.into_policy(seed);
            config.cache.directory = cache_dir.or(config.cache.directory.take());
            fetch_pages(config, mode, feed, pages, gallery_dir).await
        }
        Commands::Simulate {
            seed,
            scroll_to,
            feed,
            dwell_ms,
            failure_rate,
        } => {
            let mut config = base_config(RuntimeMode::Development);
            if seed.is_some() {
                config.simulation.deterministic_seed = seed;
            }
            run_simulation(config, feed, scroll_to, Duration::from_millis(dwell_ms), failure_rate)
                .await
        }
        Commands::Cache { dir, action } => {
            let mut config = base_config(mode);
            config.cache.directory = Some(dir);
            manage_cache(config, action).await
        }
    }
}

fn base_config(mode: RuntimeMode) -> ReelfeedConfig {
    let mut config = ReelfeedConfig::from_env();
    config.simulation.enabled = mode.is_development();
    // One-shot commands purge explicitly instead of running the background sweep
    config.cache.cleanup_interval = None;
    config
}

/// Fetch, rank and print feed pages
///
/// # Errors
/// - `ConfigError` - Configuration failed validation
/// - `CacheError::Io` - Cache directory could not be opened
/// - `FeedError` - A page failed and no fallback could cover it
pub async fn fetch_pages(
    config: ReelfeedConfig,
    mode: RuntimeMode,
    feed_type: FeedType,
    pages: u32,
    gallery_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    config.validate()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = OfflineCache::from_config(config.cache.clone(), Arc::clone(&clock)).await?;
    let source = build_source(&config, mode, cache, clock, gallery_dir)?;
    let ranking = RankingEngine::new(config.feed.ranking);

    println!("Fetching {feed_type} feed ({mode} mode)");
    println!("{:-<72}", "");

    for page in 1..=pages.max(1) {
        let mut fetched = source
            .fetch_page(page, config.feed.page_size, feed_type, None, false)
            .await
            .with_context(|| format!("failed to fetch {feed_type} page {page}"))?;

        let has_more = fetched.has_more;
        fetched.videos = ranking.rank(std::mem::take(&mut fetched.videos));
        print_page(fetched);

        if !has_more {
            println!("\nNo more pages.");
            break;
        }
    }

    Ok(())
}

fn build_source(
    config: &ReelfeedConfig,
    mode: RuntimeMode,
    cache: Arc<OfflineCache>,
    clock: Arc<dyn Clock>,
    gallery_dir: Option<PathBuf>,
) -> anyhow::Result<FeedSource> {
    match mode {
        RuntimeMode::Production => {
            let api = HttpFeedApi::new(&config.network)?;
            let source = FeedSource::new(
                Arc::new(api),
                cache,
                config.feed.clone(),
                &config.network,
                clock,
            );
            Ok(match gallery_dir {
                Some(dir) => source.with_gallery(Arc::new(DirectoryGallery::new(dir))),
                None => source,
            })
        }
        RuntimeMode::Development => {
            if gallery_dir.is_some() {
                tracing::warn!("Ignoring --gallery-dir in development mode");
            }
            let env = SimEnvironment::new(&config.simulation);
            Ok(FeedSource::new(
                env.api.clone(),
                cache,
                config.feed.clone(),
                &config.network,
                clock,
            )
            .with_gallery(env.gallery.clone())
            .with_connectivity(env.connectivity.clone()))
        }
    }
}

fn print_page(page: FeedPage) {
    println!(
        "Page {} [{:?}] {} videos, has_more={}",
        page.page,
        page.origin,
        page.videos.len(),
        page.has_more
    );
    for (position, video) in page.videos.iter().enumerate() {
        println!(
            "  {:>3}. {:<14} {:<28} {:>6.1}s {:>9} views  {}",
            position + 1,
            video.id.as_str(),
            truncate(&video.title, 28),
            video.duration.as_secs_f64(),
            video.counters.views,
            video.uploaded_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('~');
        cut
    }
}

/// Scroll through a simulated session and report decoder usage
///
/// # Errors
/// - `ConfigError` - Configuration failed validation
/// - `ReelfeedError` - The first page could not be loaded or a scroll failed
pub async fn run_simulation(
    config: ReelfeedConfig,
    feed_type: FeedType,
    scroll_to: usize,
    dwell: Duration,
    failure_rate: f64,
) -> anyhow::Result<()> {
    config.validate()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = OfflineCache::from_config(config.cache.clone(), Arc::clone(&clock)).await?;
    let mut env = SimEnvironment::new(&config.simulation);
    if failure_rate > 0.0 {
        env = env.with_decoder_failure_rate(failure_rate);
    }
    let session = env.session(&config, feed_type, cache, clock);

    println!(
        "Simulating {} feed: seed {}, cap {} decoders, radius {}, keep {}",
        feed_type,
        env.seed,
        config.playback.max_active_decoders,
        config.playback.preload_radius,
        config.playback.keep_range
    );
    println!("{:-<72}", "");

    let first = session.start().await.context("failed to load the first page")?;
    println!(
        "Loaded page {} ({} videos, origin {:?})",
        first.page, first.appended, first.origin
    );

    for index in 0..=scroll_to {
        let feed_len = session.pool().feed_len().await;
        if index >= feed_len {
            println!("Feed ended at {feed_len} videos");
            break;
        }

        let outcome = session.scroll_to(index).await?;
        session.pool().settle().await;
        if let Err(e) = session.play_current().await {
            println!("  {index:>3}: playback failed: {}", e.user_message());
            tracing::warn!("Playback at index {} failed: {}", index, e);
        }

        let stats = session.pool().statistics().await;
        println!(
            "  {:>3}: playing {:<10} live {} active {} +{} ~{} -{} deferred {}",
            index,
            stats
                .playing
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
            stats.live_handles,
            stats.active_handles,
            outcome.created.len(),
            outcome.reactivated.len(),
            outcome.released.len(),
            outcome.deferred.len()
        );

        if !dwell.is_zero() {
            tokio::time::sleep(dwell).await;
        }
        session.pool().sweep().await;
    }

    let stats = session.statistics().await;
    let released = session.shutdown().await;
    let audit = env.decoder.audit();

    println!("{:-<72}", "");
    println!("Pages loaded: {}", stats.pages_loaded);
    println!("Feed length: {}", stats.pool.feed_len);
    println!("Disposals: {}", stats.pool.disposal.disposed);
    println!("Released at shutdown: {released}");
    println!(
        "Decoders: peak {} of {}, initialized {}, released {}",
        audit.peak_live, config.playback.max_active_decoders, audit.initialized, audit.released
    );
    println!(
        "Violations: {} double releases, {} commands after release, {} still live",
        audit.double_releases, audit.commands_after_release, audit.live
    );

    Ok(())
}

/// Inspect or maintain the cache directory
///
/// # Errors
/// - `CacheError::Io` - Cache directory could not be read or modified
/// - `CacheError::InvalidKey` - `show` was given a malformed key
pub async fn manage_cache(config: ReelfeedConfig, action: CacheAction) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = OfflineCache::from_config(config.cache.clone(), clock).await?;
    let dir = config
        .cache
        .directory
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default();

    match action {
        CacheAction::Stats => {
            let stats = cache.statistics().await;
            println!("Cache {dir}");
            println!("{:-<40}", "");
            println!("Entries: {}", stats.entries);
            println!("Default TTL: {}s", config.cache.default_ttl.as_secs());
            for (feed_type, ttl) in &config.cache.ttl_overrides {
                println!("  {feed_type} TTL: {}s", ttl.as_secs());
            }
        }
        CacheAction::Show { key } => {
            let key: CacheKey = key.parse()?;
            match cache.get(&key).await {
                Some(page) => print_page(page),
                None => println!("No live entry for {key}"),
            }
        }
        CacheAction::Purge => {
            let purged = cache.purge_expired().await?;
            println!("Purged {purged} expired entries from {dir}");
        }
        CacheAction::Clear => {
            cache.clear().await?;
            println!("Cleared cache {dir}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_arg_maps_to_policy() {
        assert_eq!(RankingArg::Recency.into_policy(Some(3)), RankingPolicy::RecencyFirst);
        assert_eq!(
            RankingArg::Engagement.into_policy(Some(3)),
            RankingPolicy::EngagementWeighted { seed: Some(3) }
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Harbor", 10), "Harbor");
        assert_eq!(truncate("Midnight Skatepark", 8), "Midnigh~");
    }

    #[tokio::test]
    async fn test_cache_commands_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReelfeedConfig::for_testing();
        config.cache.directory = Some(dir.path().to_path_buf());

        manage_cache(config.clone(), CacheAction::Stats).await.unwrap();
        manage_cache(config.clone(), CacheAction::Purge).await.unwrap();
        manage_cache(config.clone(), CacheAction::Clear).await.unwrap();
        assert!(
            manage_cache(config, CacheAction::Show { key: "bogus".to_string() })
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_simulated_fetch_and_session() {
        let config = ReelfeedConfig::for_testing();
        fetch_pages(config.clone(), RuntimeMode::Development, FeedType::Main, 2, None)
            .await
            .unwrap();
        run_simulation(config, FeedType::Main, 6, Duration::ZERO, 0.0)
            .await
            .unwrap();
    }
}
