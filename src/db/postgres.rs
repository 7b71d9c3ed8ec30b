use sqlx::{postgres::PgPoolOptions, PgPool, QueryBuilder};

use crate::error::AppResult;
use crate::models::PlaylistRecord;

/// Track rows are inserted in batches of this size
const TRACK_INSERT_BATCH_SIZE: usize = 1000;

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Narrow persistence seam for finished playlists.
///
/// The pipeline hands this a completed track list plus metadata; nothing in
/// the pipeline depends on the store's schema beyond this operation.
#[derive(Clone)]
pub struct PlaylistStore {
    pool: PgPool,
}

impl PlaylistStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persists playlist metadata and its track list.
    ///
    /// The playlist row and track batches run in one transaction so a partial
    /// insert never leaves an inconsistent record behind.
    pub async fn save_playlist(&self, record: &PlaylistRecord) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO playlists
                (spotify_playlist_id, user_id, name, description, mood, genre, track_count, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.spotify_playlist_id)
        .bind(&record.user_id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.mood)
        .bind(&record.genre)
        .bind(record.tracks.len() as i32)
        .bind(&record.created_by)
        .execute(&mut *tx)
        .await?;

        for batch in record.tracks.chunks(TRACK_INSERT_BATCH_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO playlist_tracks (playlist_id, spotify_track_id, name, artist, album, duration_ms) ",
            );
            builder.push_values(batch, |mut row, track| {
                row.push_bind(&record.spotify_playlist_id)
                    .push_bind(&track.spotify_track_id)
                    .push_bind(&track.name)
                    .push_bind(&track.artist)
                    .push_bind(&track.album)
                    .push_bind(track.duration_ms);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::info!(
            playlist_id = %record.spotify_playlist_id,
            tracks = record.tracks.len(),
            "Playlist persisted"
        );

        Ok(())
    }
}
