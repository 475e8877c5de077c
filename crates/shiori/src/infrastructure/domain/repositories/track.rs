use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    domain::{
        entities::track::{DelayedTrackingUpdate, Track},
        repositories::{RepositoryError, track::TrackRepository},
    },
    infrastructure::database::Pool,
};

#[derive(Clone)]
pub struct TrackRepositoryImpl {
    pool: Pool,
}

impl TrackRepositoryImpl {
    pub fn new<P: Into<Pool>>(pool: P) -> Self {
        Self { pool: pool.into() }
    }
}

fn track_from_row(row: &SqliteRow) -> Track {
    Track {
        id: row.get(0),
        manga_id: row.get(1),
        sync_id: row.get(2),
        remote_id: row.get(3),
        library_id: row.get(4),
        title: row.get(5),
        last_chapter_read: row.get(6),
        total_chapters: row.get(7),
        status: row.get(8),
        score: row.get(9),
        remote_url: row.get(10),
        start_date: row.get(11),
        finish_date: row.get(12),
    }
}

#[async_trait]
impl TrackRepository for TrackRepositoryImpl {
    async fn get_tracks_by_manga_id(&self, manga_id: i64) -> Result<Vec<Track>, RepositoryError> {
        let tracks = sqlx::query(r#"SELECT * FROM manga_sync WHERE manga_id = ? ORDER BY sync_id"#)
            .bind(manga_id)
            .fetch_all(&self.pool as &SqlitePool)
            .await?
            .iter()
            .map(track_from_row)
            .collect();

        Ok(tracks)
    }

    async fn get_track_by_id(&self, id: i64) -> Result<Track, RepositoryError> {
        let row = sqlx::query(r#"SELECT * FROM manga_sync WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool as &SqlitePool)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Ok(track_from_row(&row))
    }

    async fn upsert_track(&self, track: &Track) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            r#"INSERT INTO manga_sync(
                manga_id,
                sync_id,
                remote_id,
                library_id,
                title,
                last_chapter_read,
                total_chapters,
                status,
                score,
                remote_url,
                start_date,
                finish_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(manga_id, sync_id) DO UPDATE SET
                remote_id = excluded.remote_id,
                library_id = excluded.library_id,
                title = excluded.title,
                last_chapter_read = excluded.last_chapter_read,
                total_chapters = excluded.total_chapters,
                status = excluded.status,
                score = excluded.score,
                remote_url = excluded.remote_url,
                start_date = excluded.start_date,
                finish_date = excluded.finish_date
            RETURNING id"#,
        )
        .bind(track.manga_id)
        .bind(track.sync_id)
        .bind(track.remote_id)
        .bind(track.library_id)
        .bind(&track.title)
        .bind(track.last_chapter_read)
        .bind(track.total_chapters)
        .bind(track.status)
        .bind(track.score)
        .bind(&track.remote_url)
        .bind(track.start_date)
        .bind(track.finish_date)
        .fetch_one(&self.pool as &SqlitePool)
        .await?;

        Ok(row.get(0))
    }

    async fn insert_delayed_update(
        &self,
        update: &DelayedTrackingUpdate,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO delayed_tracking_update(track_id, last_chapter_read) VALUES (?, ?)
            ON CONFLICT(track_id) DO UPDATE SET
                last_chapter_read = MAX(last_chapter_read, excluded.last_chapter_read)"#,
        )
        .bind(update.track_id)
        .bind(update.last_chapter_read)
        .execute(&self.pool as &SqlitePool)
        .await?;

        Ok(())
    }

    async fn get_delayed_updates(&self) -> Result<Vec<DelayedTrackingUpdate>, RepositoryError> {
        let updates = sqlx::query(r#"SELECT track_id, last_chapter_read FROM delayed_tracking_update"#)
            .fetch_all(&self.pool as &SqlitePool)
            .await?
            .iter()
            .map(|row| DelayedTrackingUpdate {
                track_id: row.get(0),
                last_chapter_read: row.get(1),
            })
            .collect();

        Ok(updates)
    }

    async fn delete_delayed_update(&self, track_id: i64) -> Result<(), RepositoryError> {
        sqlx::query(r#"DELETE FROM delayed_tracking_update WHERE track_id = ?"#)
            .bind(track_id)
            .execute(&self.pool as &SqlitePool)
            .await?;

        Ok(())
    }
}
