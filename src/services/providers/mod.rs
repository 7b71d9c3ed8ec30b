//! Music catalog provider abstraction
//!
//! The convergence pipeline talks to the upstream recommendation service only
//! through this trait, so tests can substitute a scripted catalog and another
//! vendor could be slotted in without touching the pipeline.

use std::collections::HashMap;

use crate::{
    error::AppResult,
    models::{ApiArtist, ApiTrack, AudioFeatures, PlaylistLink, RecommendationParams},
};

pub mod spotify;

pub use spotify::SpotifyProvider;

/// Trait for music catalog providers
///
/// Implementations are expected to route reads through the cache-aside layer
/// and every network call through the dependency guard; callers treat each
/// method as a single idempotent lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MusicCatalog: Send + Sync {
    /// Full-text catalog search for tracks
    async fn search_tracks(&self, query: &str, limit: u32) -> AppResult<Vec<ApiTrack>>;

    /// Track lookup by ID, including popularity and artist references
    async fn get_track(&self, track_id: &str) -> AppResult<ApiTrack>;

    /// Artist lookup by ID, including genre tags
    async fn get_artist(&self, artist_id: &str) -> AppResult<ApiArtist>;

    /// Audio-feature vector for a single track
    async fn get_audio_features(&self, track_id: &str) -> AppResult<AudioFeatures>;

    /// Audio-feature vectors for many tracks via the bulk cache-aside path.
    ///
    /// Tracks whose features cannot be resolved are absent from the map
    /// rather than failing the batch.
    async fn get_audio_features_batch(
        &self,
        track_ids: &[String],
    ) -> AppResult<HashMap<String, AudioFeatures>>;

    /// One recommendation call with the given (pre-clamped) parameters
    async fn get_recommendations(
        &self,
        params: &RecommendationParams,
    ) -> AppResult<Vec<ApiTrack>>;

    /// Publishes a playlist upstream and returns its link
    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        track_ids: &[String],
    ) -> AppResult<PlaylistLink>;
}
