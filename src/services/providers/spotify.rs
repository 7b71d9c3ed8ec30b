use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::{
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{
        ApiArtist, ApiAudioFeatures, ApiPlaylist, ApiSearchResponse, ApiTrack, AudioFeatures,
        PlaylistLink, RecommendationParams, TokenResponse,
    },
    services::{guard::DependencyGuard, providers::MusicCatalog},
};

/// Dependency name recorded against the circuit breaker
const DEPENDENCY: &str = "spotify";

const SEARCH_CACHE_TTL: u64 = 86_400; // 24 hours
const TRACK_CACHE_TTL: u64 = 86_400;
const ARTIST_CACHE_TTL: u64 = 86_400;
const FEATURES_CACHE_TTL: u64 = 86_400;
const RECOMMENDATIONS_CACHE_TTL: u64 = 3_600; // 1 hour

// Hard caps of the upstream recommendations endpoint
const MAX_SEED_TRACKS: usize = 2;
const MAX_SEED_ARTISTS: usize = 1;
const MAX_SEED_GENRES: usize = 2;
const MAX_LIMIT: u32 = 100;

/// Tokens are refreshed this long before their advertised expiry
const TOKEN_EXPIRY_SLACK: u64 = 60;

/// Tracks are appended to a playlist in chunks of this size
const PLAYLIST_ADD_CHUNK: usize = 100;

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Spotify Web API provider
///
/// All catalog reads flow cache → guard (breaker + retry) → HTTP call. Auth
/// uses the client-credentials grant; a 401 triggers exactly one
/// refresh-then-retry cycle per call, never open-ended recursion.
#[derive(Clone)]
pub struct SpotifyProvider {
    http_client: HttpClient,
    api_url: String,
    accounts_url: String,
    client_id: String,
    client_secret: String,
    username: String,
    cache: Cache,
    guard: Arc<DependencyGuard>,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl SpotifyProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Cache,
        guard: Arc<DependencyGuard>,
        api_url: String,
        accounts_url: String,
        client_id: String,
        client_secret: String,
        username: String,
    ) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_url,
            accounts_url,
            client_id,
            client_secret,
            username,
            cache,
            guard,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns a valid bearer token, fetching one if missing or expired.
    async fn bearer(&self) -> AppResult<String> {
        {
            let slot = self.token.read().await;
            if let Some(token) = slot.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }
        self.refresh_credentials().await
    }

    /// Drops the current auth state and fetches a fresh client-credentials
    /// token. Any failure here is fatal for the calling request.
    async fn refresh_credentials(&self) -> AppResult<String> {
        let mut slot = self.token.write().await;
        *slot = None;

        let url = format!("{}/api/token", self.accounts_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| AppError::AuthRefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AuthRefreshFailed(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::AuthRefreshFailed(e.to_string()))?;

        let access = token.access_token.clone();
        *slot = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now()
                + Duration::from_secs(token.expires_in.saturating_sub(TOKEN_EXPIRY_SLACK)),
        });

        tracing::info!("Spotify credentials refreshed");
        Ok(access)
    }

    /// GET with the single-shot auth-refresh sequence: attempt with current
    /// credentials, on 401 refresh once and attempt once more.
    async fn api_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let token = self.bearer().await?;
        match self.try_get(path, query, &token).await {
            Err(AppError::AuthExpired) => {
                tracing::warn!(path = %path, "Spotify auth expired, refreshing credentials");
                let token = self.refresh_credentials().await?;
                match self.try_get(path, query, &token).await {
                    Err(AppError::AuthExpired) => Err(AppError::AuthRefreshFailed(
                        "credentials rejected after refresh".to_string(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// POST variant of [`Self::api_get`], same refresh discipline.
    async fn api_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> AppResult<T> {
        let token = self.bearer().await?;
        match self.try_post(path, body, &token).await {
            Err(AppError::AuthExpired) => {
                tracing::warn!(path = %path, "Spotify auth expired, refreshing credentials");
                let token = self.refresh_credentials().await?;
                match self.try_post(path, body, &token).await {
                    Err(AppError::AuthExpired) => Err(AppError::AuthRefreshFailed(
                        "credentials rejected after refresh".to_string(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn try_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> AppResult<T> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn try_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        token: &str,
    ) -> AppResult<T> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::classify_status(status, body))
    }

    /// Maps upstream HTTP statuses onto the pipeline's error taxonomy.
    fn classify_status(status: StatusCode, body: String) -> AppError {
        if status == StatusCode::UNAUTHORIZED {
            AppError::AuthExpired
        } else if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            AppError::UpstreamValidation(body)
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            AppError::Transient(format!("Spotify returned status {}: {}", status, body))
        } else {
            AppError::ExternalApi(format!("Spotify returned status {}: {}", status, body))
        }
    }

    /// Enforces the upstream endpoint's hard constraints: seed list caps,
    /// target values in [0, 1], popularity in [0, 100], limit in [1, 100].
    fn clamp_params(params: &RecommendationParams) -> RecommendationParams {
        let targets = params.targets.map(|t| AudioFeatures {
            danceability: t.danceability.clamp(0.0, 1.0),
            energy: t.energy.clamp(0.0, 1.0),
            valence: t.valence.clamp(0.0, 1.0),
            acousticness: t.acousticness.clamp(0.0, 1.0),
            instrumentalness: t.instrumentalness.clamp(0.0, 1.0),
        });

        RecommendationParams {
            seed_tracks: params.seed_tracks.iter().take(MAX_SEED_TRACKS).cloned().collect(),
            seed_artists: params.seed_artists.iter().take(MAX_SEED_ARTISTS).cloned().collect(),
            seed_genres: params.seed_genres.iter().take(MAX_SEED_GENRES).cloned().collect(),
            limit: params.limit.clamp(1, MAX_LIMIT),
            targets,
            popularity: params.popularity.map(|(min, max)| (min.min(100), max.min(100))),
        }
    }

    fn recommendation_query(params: &RecommendationParams) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", params.limit.to_string())];

        if !params.seed_tracks.is_empty() {
            query.push(("seed_tracks", params.seed_tracks.join(",")));
        }
        if !params.seed_artists.is_empty() {
            query.push(("seed_artists", params.seed_artists.join(",")));
        }
        if !params.seed_genres.is_empty() {
            query.push(("seed_genres", params.seed_genres.join(",")));
        }
        if let Some(targets) = &params.targets {
            query.push(("target_danceability", targets.danceability.to_string()));
            query.push(("target_energy", targets.energy.to_string()));
            query.push(("target_valence", targets.valence.to_string()));
            query.push(("target_acousticness", targets.acousticness.to_string()));
            query.push(("target_instrumentalness", targets.instrumentalness.to_string()));
        }
        if let Some((min, max)) = params.popularity {
            query.push(("min_popularity", min.to_string()));
            query.push(("max_popularity", max.to_string()));
        }

        query
    }

    async fn fetch_recommendations(
        &self,
        params: &RecommendationParams,
    ) -> AppResult<Vec<ApiTrack>> {
        let query = Self::recommendation_query(params);
        let response: crate::models::ApiRecommendationsResponse = self
            .guard
            .call(DEPENDENCY, || async {
                self.api_get("/recommendations", &query).await
            })
            .await?;

        tracing::debug!(
            returned = response.tracks.len(),
            requested = params.limit,
            "Recommendations fetched"
        );

        Ok(response.tracks)
    }

    async fn fetch_single_audio_features(&self, track_id: &str) -> AppResult<AudioFeatures> {
        let raw: ApiAudioFeatures = self
            .guard
            .call(DEPENDENCY, || async {
                self.api_get(&format!("/audio-features/{}", track_id), &[]).await
            })
            .await?;
        Ok(AudioFeatures::from(&raw))
    }
}

#[async_trait::async_trait]
impl MusicCatalog for SpotifyProvider {
    async fn search_tracks(&self, query: &str, limit: u32) -> AppResult<Vec<ApiTrack>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        let key = CacheKey::search(query, "track", limit);
        self.cache
            .get_or_compute(key, SEARCH_CACHE_TTL, || async {
                let response: ApiSearchResponse = self
                    .guard
                    .call(DEPENDENCY, || async {
                        self.api_get(
                            "/search",
                            &[
                                ("q", query.to_string()),
                                ("type", "track".to_string()),
                                ("limit", limit.to_string()),
                            ],
                        )
                        .await
                    })
                    .await?;

                let tracks = response.tracks.map(|page| page.items).unwrap_or_default();
                tracing::info!(query = %query, results = tracks.len(), "Track search completed");
                Ok(tracks)
            })
            .await
    }

    async fn get_track(&self, track_id: &str) -> AppResult<ApiTrack> {
        let key = CacheKey::Track(track_id.to_string());
        self.cache
            .get_or_compute(key, TRACK_CACHE_TTL, || async {
                self.guard
                    .call(DEPENDENCY, || async {
                        self.api_get(&format!("/tracks/{}", track_id), &[]).await
                    })
                    .await
            })
            .await
    }

    async fn get_artist(&self, artist_id: &str) -> AppResult<ApiArtist> {
        let key = CacheKey::Artist(artist_id.to_string());
        self.cache
            .get_or_compute(key, ARTIST_CACHE_TTL, || async {
                self.guard
                    .call(DEPENDENCY, || async {
                        self.api_get(&format!("/artists/{}", artist_id), &[]).await
                    })
                    .await
            })
            .await
    }

    async fn get_audio_features(&self, track_id: &str) -> AppResult<AudioFeatures> {
        let key = CacheKey::AudioFeatures(track_id.to_string());
        self.cache
            .get_or_compute(key, FEATURES_CACHE_TTL, || async {
                self.fetch_single_audio_features(track_id).await
            })
            .await
    }

    async fn get_audio_features_batch(
        &self,
        track_ids: &[String],
    ) -> AppResult<HashMap<String, AudioFeatures>> {
        let items: Vec<(CacheKey, String)> = track_ids
            .iter()
            .map(|id| (CacheKey::AudioFeatures(id.clone()), id.clone()))
            .collect();

        let results = self
            .cache
            .get_or_compute_many(items, FEATURES_CACHE_TTL, |id| async move {
                self.fetch_single_audio_features(&id).await
            })
            .await;

        let mut features = HashMap::new();
        let mut missing = 0usize;
        for (id, result) in track_ids.iter().zip(results) {
            match result {
                Some(f) => {
                    features.insert(id.clone(), f);
                }
                None => missing += 1,
            }
        }

        if missing > 0 {
            tracing::warn!(
                resolved = features.len(),
                missing,
                "Some audio features could not be resolved"
            );
        }

        Ok(features)
    }

    async fn get_recommendations(
        &self,
        params: &RecommendationParams,
    ) -> AppResult<Vec<ApiTrack>> {
        let params = Self::clamp_params(params);
        if !params.has_seeds() {
            return Err(AppError::InvalidInput(
                "At least one seed track, artist or genre is required".to_string(),
            ));
        }

        // Seeds-only calls are idempotent by key and worth caching; calls
        // carrying target or popularity constraints change every iteration
        // under relaxation, so caching them would only stall convergence.
        if params.targets.is_none() && params.popularity.is_none() {
            let seeds: Vec<&str> = params
                .seed_tracks
                .iter()
                .chain(params.seed_artists.iter())
                .chain(params.seed_genres.iter())
                .map(String::as_str)
                .collect();
            let key = CacheKey::recommendations(&seeds, params.limit);

            return self
                .cache
                .get_or_compute(key, RECOMMENDATIONS_CACHE_TTL, || async {
                    self.fetch_recommendations(&params).await
                })
                .await;
        }

        self.fetch_recommendations(&params).await
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        track_ids: &[String],
    ) -> AppResult<PlaylistLink> {
        let body = serde_json::json!({
            "name": name,
            "public": true,
            "description": description,
        });

        let playlist: ApiPlaylist = self
            .guard
            .call(DEPENDENCY, || async {
                self.api_post(&format!("/users/{}/playlists", self.username), &body)
                    .await
            })
            .await?;

        for chunk in track_ids.chunks(PLAYLIST_ADD_CHUNK) {
            let uris: Vec<String> = chunk
                .iter()
                .map(|id| format!("spotify:track:{}", id))
                .collect();
            let body = serde_json::json!({ "uris": uris });

            let _: serde_json::Value = self
                .guard
                .call(DEPENDENCY, || async {
                    self.api_post(&format!("/playlists/{}/tracks", playlist.id), &body)
                        .await
                })
                .await?;
        }

        tracing::info!(
            playlist_id = %playlist.id,
            url = %playlist.external_urls.spotify,
            tracks = track_ids.len(),
            "Playlist published"
        );

        Ok(PlaylistLink {
            playlist_id: playlist.id,
            url: playlist.external_urls.spotify,
        })
    }
}
