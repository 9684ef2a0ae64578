//! Integration tests for Reelfeed
//!
//! These tests drive the feed pipeline across crate boundaries: the core
//! components against the core mocks, and whole sessions against the
//! deterministic simulation.

#[path = "integration/cache_ttl.rs"]
mod cache_ttl;
#[path = "integration/capacity.rs"]
mod capacity;
#[path = "integration/disposal_lifecycle.rs"]
mod disposal_lifecycle;
#[path = "integration/offline_feed.rs"]
mod offline_feed;
#[path = "integration/pagination_guard.rs"]
mod pagination_guard;
#[path = "integration/ranking_properties.rs"]
mod ranking_properties;
#[path = "integration/sim_session.rs"]
mod sim_session;
