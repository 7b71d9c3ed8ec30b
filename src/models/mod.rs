use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The user-supplied anchor a playlist is derived from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Seed {
    /// Spotify track ID
    Song(String),
    /// Spotify artist ID
    Artist(String),
    /// Genre name (e.g. "synthwave")
    Genre(String),
    /// Free-text mood (e.g. "rainy sunday")
    Mood(String),
}

impl Display for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Seed::Song(id) => write!(f, "song:{}", id),
            Seed::Artist(id) => write!(f, "artist:{}", id),
            Seed::Genre(name) => write!(f, "genre:{}", name.to_lowercase()),
            Seed::Mood(name) => write!(f, "mood:{}", name.to_lowercase()),
        }
    }
}

/// A playlist request: seed plus sizing knobs
#[derive(Debug, Clone)]
pub struct SeedRequest {
    pub seed: Seed,
    /// Desired playlist length (the bot offers 50 or 100)
    pub target_count: usize,
    /// Convergence iteration budget
    pub max_iterations: u32,
}

impl SeedRequest {
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            target_count: 100,
            max_iterations: 10,
        }
    }

    pub fn with_target_count(mut self, target_count: usize) -> Self {
        self.target_count = target_count;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// The five normalized audio dimensions used for seeding and ranking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioFeatures {
    pub danceability: f64,
    pub energy: f64,
    pub valence: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
}

impl AudioFeatures {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.danceability,
            self.energy,
            self.valence,
            self.acousticness,
            self.instrumentalness,
        ]
    }

    /// Normalized inverse Manhattan distance in [0, 1]; 1.0 = identical vectors.
    pub fn similarity_to(&self, other: &AudioFeatures) -> f64 {
        let distance: f64 = self
            .as_array()
            .iter()
            .zip(other.as_array().iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        1.0 - distance / 5.0
    }
}

/// One ranked playlist entry
#[derive(Debug, Clone, Serialize)]
pub struct TrackCandidate {
    pub track_id: String,
    pub features: AudioFeatures,
    /// Spotify popularity, 0-100
    pub popularity: u8,
    pub similarity: f64,
}

/// Recommendation call parameters, pre-clamped to upstream constraints
#[derive(Debug, Clone, Default)]
pub struct RecommendationParams {
    /// At most 2 accepted upstream
    pub seed_tracks: Vec<String>,
    /// At most 1 accepted upstream
    pub seed_artists: Vec<String>,
    /// At most 2 accepted upstream
    pub seed_genres: Vec<String>,
    pub limit: u32,
    /// Target feature values, each in [0, 1]
    pub targets: Option<AudioFeatures>,
    /// (min, max) popularity window, each in [0, 100]
    pub popularity: Option<(u8, u8)>,
}

impl RecommendationParams {
    /// The seeds-only fallback used when the rich parameter set is rejected.
    pub fn simplified(&self) -> Self {
        Self {
            seed_tracks: self.seed_tracks.clone(),
            seed_artists: self.seed_artists.clone(),
            seed_genres: self.seed_genres.clone(),
            limit: self.limit,
            targets: None,
            popularity: None,
        }
    }

    pub fn has_seeds(&self) -> bool {
        !self.seed_tracks.is_empty()
            || !self.seed_artists.is_empty()
            || !self.seed_genres.is_empty()
    }
}

/// Link to a playlist published upstream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistLink {
    pub playlist_id: String,
    pub url: String,
}

/// Playlist metadata persisted by the relational store
#[derive(Debug, Clone)]
pub struct PlaylistRecord {
    pub spotify_playlist_id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub mood: Option<String>,
    pub genre: Option<String>,
    pub created_by: Option<String>,
    pub tracks: Vec<PlaylistTrackRecord>,
}

/// One persisted playlist entry
#[derive(Debug, Clone)]
pub struct PlaylistTrackRecord {
    pub spotify_track_id: String,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<i32>,
}

// ============================================================================
// Spotify Web API Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[allow(dead_code)]
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTrack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub popularity: u8,
    #[serde(default)]
    pub artists: Vec<ApiArtistRef>,
    #[serde(default)]
    pub album: Option<ApiAlbumRef>,
    #[serde(default)]
    pub duration_ms: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiAlbumRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Raw audio-features payload from GET /audio-features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiAudioFeatures {
    pub id: String,
    pub danceability: f64,
    pub energy: f64,
    pub valence: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
}

impl From<&ApiAudioFeatures> for AudioFeatures {
    fn from(raw: &ApiAudioFeatures) -> Self {
        AudioFeatures {
            danceability: raw.danceability,
            energy: raw.energy,
            valence: raw.valence,
            acousticness: raw.acousticness,
            instrumentalness: raw.instrumentalness,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPaging<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSearchResponse {
    #[serde(default)]
    pub tracks: Option<ApiPaging<ApiTrack>>,
    #[serde(default)]
    pub artists: Option<ApiPaging<ApiArtist>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRecommendationsResponse {
    pub tracks: Vec<ApiTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPlaylist {
    pub id: String,
    pub external_urls: ApiExternalUrls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiExternalUrls {
    pub spotify: String,
}
