use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    db::{create_pool, create_redis_client, Cache, CacheWriterHandle, PlaylistStore},
    error::{AppError, AppResult},
    models::{
        ApiTrack, AudioFeatures, PlaylistLink, PlaylistRecord, PlaylistTrackRecord,
        RecommendationParams, Seed, SeedRequest, TrackCandidate,
    },
    resilience::{
        breaker::{BreakerConfig, CircuitBreakers},
        rate_limit::{RateLimitConfig, RateWindow, RedisRateStore},
        retry::{RetryExecutor, RetryPolicy},
        RandomSource, ThreadRngSource,
    },
    services::{
        guard::DependencyGuard,
        providers::{MusicCatalog, SpotifyProvider},
    },
};

/// Initial popularity band around a song seed's own popularity
const POPULARITY_BAND: u8 = 20;
/// Band widening applied per relaxation step
const POPULARITY_RELAX_STEP: u8 = 5;
/// Each target feature is nudged by a uniform draw in this range per step
const FEATURE_RELAX_RANGE: f64 = 0.1;
/// Mood seeds resolve to this many searched tracks
const MOOD_SEED_TRACKS: u32 = 5;
/// Genres carried as recommendation seeds per anchor
const SEED_GENRE_CAP: usize = 2;

/// Everything the converger derives from a seed before the first
/// recommendations call.
struct SeedProfile {
    seed_tracks: Vec<String>,
    seed_artists: Vec<String>,
    seed_genres: Vec<String>,
    targets: Option<AudioFeatures>,
    popularity: Option<(u8, u8)>,
    /// Reference vector for final similarity ranking. Absent for anchorless
    /// seeds (artist, genre), which rank against the candidate centroid.
    anchor: Option<AudioFeatures>,
}

/// A converged, ranked set of tracks ready to publish
pub struct BuiltPlaylist {
    /// Ranked by similarity, truncated to the requested length
    pub candidates: Vec<TrackCandidate>,
    /// Full track metadata, aligned with `candidates`
    pub tracks: Vec<ApiTrack>,
}

/// Iterative seed-convergence engine
///
/// Starts from a tight parameter set derived from the seed and progressively
/// relaxes constraints across iterations until enough unique tracks have
/// accumulated or the iteration budget runs out.
pub struct PlaylistBuilder {
    catalog: Arc<dyn MusicCatalog>,
    random: Arc<dyn RandomSource>,
}

impl PlaylistBuilder {
    pub fn new(catalog: Arc<dyn MusicCatalog>) -> Self {
        Self {
            catalog,
            random: Arc::new(ThreadRngSource),
        }
    }

    /// Overrides the relaxation noise source. Used to pin tests.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub async fn build(&self, request: &SeedRequest) -> AppResult<BuiltPlaylist> {
        let profile = self.derive_profile(&request.seed).await?;

        let mut params = RecommendationParams {
            seed_tracks: profile.seed_tracks.clone(),
            seed_artists: profile.seed_artists.clone(),
            seed_genres: profile.seed_genres.clone(),
            limit: 0,
            targets: profile.targets,
            popularity: profile.popularity,
        };

        let mut collected: HashMap<String, ApiTrack> = HashMap::new();

        for iteration in 1..=request.max_iterations {
            let remaining = request.target_count.saturating_sub(collected.len());
            if remaining == 0 {
                break;
            }
            // Over-request to absorb duplicates, within the upstream cap.
            params.limit = ((remaining * 2).min(100).max(1)) as u32;

            let tracks = match self.catalog.get_recommendations(&params).await {
                Ok(tracks) => tracks,
                Err(AppError::UpstreamValidation(reason)) => {
                    tracing::warn!(
                        iteration,
                        reason = %reason,
                        "Rich parameters rejected upstream, retrying with seeds only"
                    );
                    self.catalog.get_recommendations(&params.simplified()).await?
                }
                Err(e) => return Err(e),
            };

            let before = collected.len();
            for track in tracks {
                collected.entry(track.id.clone()).or_insert(track);
            }

            tracing::debug!(
                iteration,
                added = collected.len() - before,
                total = collected.len(),
                target = request.target_count,
                "Convergence iteration finished"
            );

            if collected.len() >= request.target_count {
                break;
            }
            self.relax(&mut params);
        }

        if collected.is_empty() {
            tracing::warn!(seed = %request.seed, "Convergence produced no tracks");
            return Err(AppError::ConvergenceFailed);
        }

        self.rank(profile.anchor, collected, request.target_count).await
    }

    async fn derive_profile(&self, seed: &Seed) -> AppResult<SeedProfile> {
        match seed {
            Seed::Song(track_id) => {
                let track = self.catalog.get_track(track_id).await?;
                let features = self.catalog.get_audio_features(track_id).await?;

                // Genre context comes from the lead artist; losing it only
                // loosens the seed, so fetch failures are tolerated.
                let mut genres = Vec::new();
                if let Some(artist) = track.artists.first() {
                    match self.catalog.get_artist(&artist.id).await {
                        Ok(artist) => {
                            genres = artist.genres.into_iter().take(SEED_GENRE_CAP).collect()
                        }
                        Err(e) => {
                            tracing::warn!(
                                artist_id = %artist.id,
                                error = %e,
                                "Artist lookup failed, seeding without genres"
                            );
                        }
                    }
                }

                let popularity = (
                    track.popularity.saturating_sub(POPULARITY_BAND),
                    (track.popularity.saturating_add(POPULARITY_BAND)).min(100),
                );

                Ok(SeedProfile {
                    seed_tracks: vec![track_id.clone()],
                    seed_artists: Vec::new(),
                    seed_genres: genres,
                    targets: Some(features),
                    popularity: Some(popularity),
                    anchor: Some(features),
                })
            }
            Seed::Artist(artist_id) => {
                let artist = self.catalog.get_artist(artist_id).await?;
                Ok(SeedProfile {
                    seed_tracks: Vec::new(),
                    seed_artists: vec![artist_id.clone()],
                    seed_genres: artist.genres.into_iter().take(SEED_GENRE_CAP).collect(),
                    targets: None,
                    popularity: None,
                    anchor: None,
                })
            }
            Seed::Genre(name) => Ok(SeedProfile {
                seed_tracks: Vec::new(),
                seed_artists: Vec::new(),
                seed_genres: vec![name.to_lowercase()],
                targets: None,
                popularity: None,
                anchor: None,
            }),
            Seed::Mood(text) => {
                let hits = self.catalog.search_tracks(text, MOOD_SEED_TRACKS).await?;
                if hits.is_empty() {
                    tracing::warn!(mood = %text, "Mood search matched no tracks");
                    return Err(AppError::ConvergenceFailed);
                }

                let ids: Vec<String> = hits.iter().map(|t| t.id.clone()).collect();
                let features = self.catalog.get_audio_features_batch(&ids).await?;
                let anchor = centroid(&features.values().copied().collect::<Vec<_>>());

                Ok(SeedProfile {
                    seed_tracks: ids.into_iter().take(2).collect(),
                    seed_artists: Vec::new(),
                    seed_genres: Vec::new(),
                    targets: anchor,
                    popularity: None,
                    anchor,
                })
            }
        }
    }

    /// One relaxation step: widen the popularity band and nudge every target
    /// feature by a uniform draw in [-0.1, 0.1], clamped to [0, 1].
    fn relax(&self, params: &mut RecommendationParams) {
        if let Some((min, max)) = params.popularity {
            params.popularity = Some((
                min.saturating_sub(POPULARITY_RELAX_STEP),
                max.saturating_add(POPULARITY_RELAX_STEP).min(100),
            ));
        }
        if let Some(targets) = params.targets.as_mut() {
            targets.danceability = self.perturb(targets.danceability);
            targets.energy = self.perturb(targets.energy);
            targets.valence = self.perturb(targets.valence);
            targets.acousticness = self.perturb(targets.acousticness);
            targets.instrumentalness = self.perturb(targets.instrumentalness);
        }
    }

    fn perturb(&self, value: f64) -> f64 {
        let nudge = self.random.sample() * 2.0 * FEATURE_RELAX_RANGE - FEATURE_RELAX_RANGE;
        (value + nudge).clamp(0.0, 1.0)
    }

    /// Scores every collected track against the reference vector and keeps the
    /// `target_count` most similar. Ties break on track ID so identical inputs
    /// always produce identical playlists.
    async fn rank(
        &self,
        anchor: Option<AudioFeatures>,
        collected: HashMap<String, ApiTrack>,
        target_count: usize,
    ) -> AppResult<BuiltPlaylist> {
        let ids: Vec<String> = collected.keys().cloned().collect();
        let features = self.catalog.get_audio_features_batch(&ids).await?;

        let reference = match anchor {
            Some(anchor) => anchor,
            None => {
                let known: Vec<AudioFeatures> = features.values().copied().collect();
                centroid(&known).unwrap_or_default()
            }
        };

        let mut candidates: Vec<TrackCandidate> = collected
            .values()
            .map(|track| match features.get(&track.id) {
                Some(f) => TrackCandidate {
                    track_id: track.id.clone(),
                    features: *f,
                    popularity: track.popularity,
                    similarity: f.similarity_to(&reference),
                },
                // Unscoreable tracks sort last rather than being dropped.
                None => TrackCandidate {
                    track_id: track.id.clone(),
                    features: AudioFeatures::default(),
                    popularity: track.popularity,
                    similarity: 0.0,
                },
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.track_id.cmp(&b.track_id))
        });
        candidates.truncate(target_count);

        let tracks = candidates
            .iter()
            .filter_map(|c| collected.get(&c.track_id).cloned())
            .collect();

        Ok(BuiltPlaylist { candidates, tracks })
    }
}

fn centroid(features: &[AudioFeatures]) -> Option<AudioFeatures> {
    if features.is_empty() {
        return None;
    }
    let n = features.len() as f64;
    let mut sum = AudioFeatures::default();
    for f in features {
        sum.danceability += f.danceability;
        sum.energy += f.energy;
        sum.valence += f.valence;
        sum.acousticness += f.acousticness;
        sum.instrumentalness += f.instrumentalness;
    }
    Some(AudioFeatures {
        danceability: sum.danceability / n,
        energy: sum.energy / n,
        valence: sum.valence / n,
        acousticness: sum.acousticness / n,
        instrumentalness: sum.instrumentalness / n,
    })
}

/// End-to-end playlist pipeline: rate limiting at the entry point, seed
/// convergence, publication upstream and best-effort local persistence.
pub struct PlaylistService {
    builder: PlaylistBuilder,
    catalog: Arc<dyn MusicCatalog>,
    rate: RateWindow,
    store: PlaylistStore,
}

impl PlaylistService {
    pub fn new(catalog: Arc<dyn MusicCatalog>, rate: RateWindow, store: PlaylistStore) -> Self {
        Self {
            builder: PlaylistBuilder::new(catalog.clone()),
            catalog,
            rate,
            store,
        }
    }

    /// Wires the full pipeline from configuration: Postgres pool, Redis cache
    /// and rate-limit store, circuit breakers, retry and the Spotify provider.
    pub async fn connect(config: &Config) -> anyhow::Result<(Self, CacheWriterHandle)> {
        let pool = create_pool(&config.database_url).await?;
        let redis_client = create_redis_client(&config.redis_url)?;
        let (cache, writer) = Cache::new(redis_client.clone());

        let breakers = Arc::new(CircuitBreakers::new(BreakerConfig {
            threshold: config.breaker_threshold,
            timeout: Duration::from_secs(config.breaker_timeout_secs),
        }));
        let retry = RetryExecutor::new(RetryPolicy::default())
            .with_jitter(Arc::new(ThreadRngSource));
        let guard = Arc::new(DependencyGuard::new(breakers, retry));

        let catalog: Arc<dyn MusicCatalog> = Arc::new(SpotifyProvider::new(
            cache,
            guard,
            config.spotify_api_url.clone(),
            config.spotify_accounts_url.clone(),
            config.spotify_client_id.clone(),
            config.spotify_client_secret.clone(),
            config.spotify_username.clone(),
        ));

        let rate = RateWindow::new(
            Box::new(RedisRateStore::new(redis_client)),
            RateLimitConfig {
                max_calls: config.rate_limit_max_calls,
                window: Duration::from_secs(config.rate_limit_window_secs),
                cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
            },
        );

        let store = PlaylistStore::new(pool);
        Ok((Self::new(catalog, rate, store), writer))
    }

    /// Builds, publishes and records a playlist for one user request.
    ///
    /// The rate limiter fails open: if its store is unreachable the request
    /// proceeds rather than blocking every user on a degraded Redis.
    pub async fn create_playlist(
        &self,
        user_id: &str,
        request: &SeedRequest,
        name: &str,
        description: &str,
    ) -> AppResult<PlaylistLink> {
        let allowed = match self.rate.is_allowed(user_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(error = %e, "Rate limit store unavailable, allowing request");
                true
            }
        };
        if !allowed {
            let cooldown = self
                .rate
                .cooldown_remaining(user_id)
                .await
                .unwrap_or_default();
            tracing::warn!(
                user_id = %user_id,
                cooldown_secs = cooldown.as_secs(),
                "Playlist request rate limited"
            );
            return Err(AppError::RateLimited { cooldown });
        }

        let built = self.builder.build(request).await?;
        let track_ids: Vec<String> = built
            .candidates
            .iter()
            .map(|c| c.track_id.clone())
            .collect();

        let link = self
            .catalog
            .create_playlist(name, description, &track_ids)
            .await?;

        let record = Self::to_record(&link, user_id, name, description, request, &built);
        if let Err(e) = self.store.save_playlist(&record).await {
            // The playlist exists upstream; losing the local record is not
            // worth failing the whole request over.
            tracing::warn!(
                error = %e,
                playlist_id = %link.playlist_id,
                "Playlist published but the local record could not be saved"
            );
        }

        tracing::info!(
            user_id = %user_id,
            playlist_id = %link.playlist_id,
            tracks = track_ids.len(),
            seed = %request.seed,
            "Playlist created"
        );

        Ok(link)
    }

    fn to_record(
        link: &PlaylistLink,
        user_id: &str,
        name: &str,
        description: &str,
        request: &SeedRequest,
        built: &BuiltPlaylist,
    ) -> PlaylistRecord {
        let (mood, genre) = match &request.seed {
            Seed::Mood(m) => (Some(m.to_lowercase()), None),
            Seed::Genre(g) => (None, Some(g.to_lowercase())),
            _ => (None, None),
        };

        PlaylistRecord {
            spotify_playlist_id: link.playlist_id.clone(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mood,
            genre,
            created_by: None,
            tracks: built
                .tracks
                .iter()
                .map(|t| PlaylistTrackRecord {
                    spotify_track_id: t.id.clone(),
                    name: t.name.clone(),
                    artist: t.artists.first().map(|a| a.name.clone()).unwrap_or_default(),
                    album: t.album.as_ref().map(|a| a.name.clone()),
                    duration_ms: t.duration_ms,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiArtist, ApiArtistRef};
    use crate::resilience::test_support::FixedRandom;
    use crate::services::providers::MockMusicCatalog;
    use mockall::predicate::*;

    fn track(id: &str, popularity: u8) -> ApiTrack {
        ApiTrack {
            id: id.to_string(),
            name: format!("Track {}", id),
            popularity,
            artists: vec![ApiArtistRef {
                id: "artist-1".to_string(),
                name: "Artist".to_string(),
            }],
            album: None,
            duration_ms: Some(180_000),
        }
    }

    fn features(danceability: f64) -> AudioFeatures {
        AudioFeatures {
            danceability,
            energy: 0.5,
            valence: 0.5,
            acousticness: 0.1,
            instrumentalness: 0.0,
        }
    }

    fn song_seed_catalog(mock: &mut MockMusicCatalog) {
        mock.expect_get_track()
            .with(eq("seed-track"))
            .returning(|_| Ok(track("seed-track", 60)));
        mock.expect_get_audio_features()
            .with(eq("seed-track"))
            .returning(|_| Ok(features(0.8)));
        mock.expect_get_artist()
            .with(eq("artist-1"))
            .returning(|_| {
                Ok(ApiArtist {
                    id: "artist-1".to_string(),
                    name: "Artist".to_string(),
                    genres: vec!["house".to_string(), "techno".to_string(), "disco".to_string()],
                })
            });
    }

    #[tokio::test]
    async fn test_song_seed_converges_in_one_iteration() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        mock.expect_get_recommendations().times(1).returning(|params| {
            // First iteration carries the full derived profile
            assert_eq!(params.seed_tracks, vec!["seed-track"]);
            assert_eq!(params.seed_genres, vec!["house", "techno"]);
            assert_eq!(params.popularity, Some((40, 80)));
            assert_eq!(params.limit, 6);
            Ok(vec![track("r1", 50), track("r2", 55), track("r3", 60)])
        });
        mock.expect_get_audio_features_batch().returning(|ids| {
            Ok(ids.iter().map(|id| (id.clone(), features(0.8))).collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(3)
            .with_max_iterations(5);

        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.candidates.len(), 3);
        assert_eq!(built.tracks.len(), 3);
    }

    #[tokio::test]
    async fn test_convergence_accumulates_across_iterations_and_dedups() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        let mut iteration = 0;
        mock.expect_get_recommendations().times(2).returning(move |_| {
            iteration += 1;
            if iteration == 1 {
                Ok(vec![track("r1", 50), track("r2", 55)])
            } else {
                // r2 repeats and must not count twice
                Ok(vec![track("r2", 55), track("r3", 60), track("r4", 45)])
            }
        });
        mock.expect_get_audio_features_batch().returning(|ids| {
            Ok(ids.iter().map(|id| (id.clone(), features(0.8))).collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock))
            .with_random(Arc::new(FixedRandom::new(vec![0.5])));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(4)
            .with_max_iterations(5);

        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.candidates.len(), 4);
        let ids: Vec<&str> = built.candidates.iter().map(|c| c.track_id.as_str()).collect();
        assert!(ids.contains(&"r1") && ids.contains(&"r4"));
    }

    #[tokio::test]
    async fn test_exhausted_iterations_return_partial_set() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        // Upstream only ever has four distinct tracks to offer
        let mut call = 0;
        mock.expect_get_recommendations().times(3).returning(move |_| {
            call += 1;
            if call == 1 {
                Ok(vec![track("r1", 50), track("r2", 55)])
            } else {
                Ok(vec![track("r3", 60), track("r4", 45)])
            }
        });
        mock.expect_get_audio_features_batch().returning(|ids| {
            Ok(ids.iter().map(|id| (id.clone(), features(0.8))).collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock))
            .with_random(Arc::new(FixedRandom::new(vec![0.5])));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(10)
            .with_max_iterations(3);

        // The iteration budget runs out short of the target; whatever
        // accumulated still comes back as a playlist.
        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.candidates.len(), 4);
        assert_eq!(built.tracks.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_convergence_fails() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        mock.expect_get_recommendations()
            .times(3)
            .returning(|_| Ok(vec![]));

        let builder = PlaylistBuilder::new(Arc::new(mock))
            .with_random(Arc::new(FixedRandom::new(vec![0.5])));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(10)
            .with_max_iterations(3);

        let result = builder.build(&request).await;
        assert!(matches!(result, Err(AppError::ConvergenceFailed)));
    }

    #[tokio::test]
    async fn test_validation_rejection_falls_back_to_simplified_params() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        let mut call = 0;
        mock.expect_get_recommendations().times(2).returning(move |params| {
            call += 1;
            if call == 1 {
                assert!(params.targets.is_some());
                Err(AppError::UpstreamValidation("bad target".to_string()))
            } else {
                // Fallback drops the rich constraints but keeps the seeds
                assert!(params.targets.is_none());
                assert!(params.popularity.is_none());
                assert_eq!(params.seed_tracks, vec!["seed-track"]);
                Ok(vec![track("r1", 50), track("r2", 55)])
            }
        });
        mock.expect_get_audio_features_batch().returning(|ids| {
            Ok(ids.iter().map(|id| (id.clone(), features(0.8))).collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(2)
            .with_max_iterations(1);

        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_non_validation_errors_propagate() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        mock.expect_get_recommendations().times(1).returning(|_| {
            Err(AppError::DependencyUnavailable {
                dependency: "spotify".to_string(),
            })
        });

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(2)
            .with_max_iterations(3);

        let result = builder.build(&request).await;
        assert!(matches!(result, Err(AppError::DependencyUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_relaxation_widens_popularity_and_perturbs_targets() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        let mut call = 0;
        mock.expect_get_recommendations().times(2).returning(move |params| {
            call += 1;
            if call == 1 {
                assert_eq!(params.popularity, Some((40, 80)));
                assert_eq!(params.targets.unwrap().danceability, 0.8);
                Ok(vec![track("r1", 50)])
            } else {
                // One ±5 widening, and danceability nudged by the pinned
                // sample: 0.8 + (1.0 * 0.2 - 0.1) = 0.9
                assert_eq!(params.popularity, Some((35, 85)));
                let targets = params.targets.unwrap();
                assert!((targets.danceability - 0.9).abs() < 1e-9);
                Ok(vec![track("r2", 50)])
            }
        });
        mock.expect_get_audio_features_batch().returning(|ids| {
            Ok(ids.iter().map(|id| (id.clone(), features(0.8))).collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock))
            .with_random(Arc::new(FixedRandom::new(vec![1.0 - f64::EPSILON])));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(2)
            .with_max_iterations(2);

        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_ranking_orders_by_similarity_with_id_tie_break() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        mock.expect_get_recommendations().times(1).returning(|_| {
            Ok(vec![track("far", 50), track("near", 50), track("b-tied", 50), track("a-tied", 50)])
        });
        mock.expect_get_audio_features_batch().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| {
                    let f = match id.as_str() {
                        "near" => features(0.8),
                        "far" => features(0.1),
                        _ => features(0.6),
                    };
                    (id.clone(), f)
                })
                .collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(3)
            .with_max_iterations(1);

        let built = builder.build(&request).await.unwrap();
        let ids: Vec<&str> = built.candidates.iter().map(|c| c.track_id.as_str()).collect();
        // Exact match first, then the two equal scores in ID order; "far" is cut.
        assert_eq!(ids, vec!["near", "a-tied", "b-tied"]);
        assert!(built.candidates[0].similarity > built.candidates[1].similarity);
        assert_eq!(built.candidates[1].similarity, built.candidates[2].similarity);
    }

    #[tokio::test]
    async fn test_artist_seed_ranks_against_candidate_centroid() {
        let mut mock = MockMusicCatalog::new();
        mock.expect_get_artist().with(eq("artist-9")).returning(|_| {
            Ok(ApiArtist {
                id: "artist-9".to_string(),
                name: "Artist".to_string(),
                genres: vec!["jazz".to_string()],
            })
        });
        mock.expect_get_recommendations().times(1).returning(|params| {
            assert_eq!(params.seed_artists, vec!["artist-9"]);
            assert_eq!(params.seed_genres, vec!["jazz"]);
            assert!(params.targets.is_none());
            Ok(vec![track("r1", 50), track("r2", 50), track("r3", 50)])
        });
        mock.expect_get_audio_features_batch().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| {
                    // Centroid danceability = 0.5, so r2 (0.5) scores highest
                    let f = match id.as_str() {
                        "r1" => features(0.2),
                        "r2" => features(0.5),
                        _ => features(0.8),
                    };
                    (id.clone(), f)
                })
                .collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Artist("artist-9".to_string()))
            .with_target_count(3)
            .with_max_iterations(1);

        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.candidates[0].track_id, "r2");
    }

    #[tokio::test]
    async fn test_mood_seed_searches_and_anchors_on_centroid() {
        let mut mock = MockMusicCatalog::new();
        mock.expect_search_tracks()
            .with(eq("rainy sunday"), eq(5))
            .times(1)
            .returning(|_, _| Ok(vec![track("m1", 40), track("m2", 45), track("m3", 50)]));

        let mut batch_call = 0;
        mock.expect_get_audio_features_batch().returning(move |ids| {
            batch_call += 1;
            if batch_call == 1 {
                // Seed centroid: danceability 0.4
                assert_eq!(ids.len(), 3);
                Ok(vec![
                    ("m1".to_string(), features(0.2)),
                    ("m2".to_string(), features(0.4)),
                    ("m3".to_string(), features(0.6)),
                ]
                .into_iter()
                .collect())
            } else {
                Ok(ids.iter().map(|id| (id.clone(), features(0.4))).collect())
            }
        });
        mock.expect_get_recommendations().times(1).returning(|params| {
            // Only the first two searched tracks survive as seeds
            assert_eq!(params.seed_tracks, vec!["m1", "m2"]);
            let targets = params.targets.unwrap();
            assert!((targets.danceability - 0.4).abs() < 1e-9);
            Ok(vec![track("r1", 50), track("r2", 50)])
        });

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Mood("rainy sunday".to_string()))
            .with_target_count(2)
            .with_max_iterations(1);

        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_mood_seed_with_no_matches_fails() {
        let mut mock = MockMusicCatalog::new();
        mock.expect_search_tracks().returning(|_, _| Ok(vec![]));

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Mood("unsearchable".to_string()));

        let result = builder.build(&request).await;
        assert!(matches!(result, Err(AppError::ConvergenceFailed)));
    }

    #[tokio::test]
    async fn test_missing_features_sort_last_not_dropped() {
        let mut mock = MockMusicCatalog::new();
        song_seed_catalog(&mut mock);

        mock.expect_get_recommendations()
            .times(1)
            .returning(|_| Ok(vec![track("scored", 50), track("unscored", 50)]));
        mock.expect_get_audio_features_batch().returning(|_| {
            Ok(vec![("scored".to_string(), features(0.8))].into_iter().collect())
        });

        let builder = PlaylistBuilder::new(Arc::new(mock));
        let request = SeedRequest::new(Seed::Song("seed-track".to_string()))
            .with_target_count(2)
            .with_max_iterations(1);

        let built = builder.build(&request).await.unwrap();
        let ids: Vec<&str> = built.candidates.iter().map(|c| c.track_id.as_str()).collect();
        assert_eq!(ids, vec!["scored", "unscored"]);
        assert_eq!(built.candidates[1].similarity, 0.0);
    }

    #[test]
    fn test_centroid_averages_each_dimension() {
        let c = centroid(&[features(0.2), features(0.8)]).unwrap();
        assert!((c.danceability - 0.5).abs() < 1e-9);
        assert!((c.energy - 0.5).abs() < 1e-9);
        assert!(centroid(&[]).is_none());
    }
}
