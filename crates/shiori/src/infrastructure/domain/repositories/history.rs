use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    domain::{
        entities::history::History,
        repositories::{RepositoryError, history::HistoryRepository},
    },
    infrastructure::database::Pool,
};

#[derive(Clone)]
pub struct HistoryRepositoryImpl {
    pool: Pool,
}

impl HistoryRepositoryImpl {
    pub fn new<P: Into<Pool>>(pool: P) -> Self {
        Self { pool: pool.into() }
    }
}

fn history_from_row(row: &SqliteRow) -> History {
    History {
        id: row.get(0),
        chapter_id: row.get(1),
        last_read: row.get(2),
        time_read: row.get(3),
    }
}

#[async_trait]
impl HistoryRepository for HistoryRepositoryImpl {
    async fn get_history_by_chapter_id(
        &self,
        chapter_id: i64,
    ) -> Result<Option<History>, RepositoryError> {
        let row = sqlx::query(r#"SELECT * FROM history WHERE chapter_id = ?"#)
            .bind(chapter_id)
            .fetch_optional(&self.pool as &SqlitePool)
            .await?;

        Ok(row.as_ref().map(history_from_row))
    }

    async fn get_history_by_manga_id(
        &self,
        manga_id: i64,
    ) -> Result<Vec<History>, RepositoryError> {
        let history = sqlx::query(
            r#"SELECT history.* FROM history
            JOIN chapter ON chapter.id = history.chapter_id
            WHERE chapter.manga_id = ?"#,
        )
        .bind(manga_id)
        .fetch_all(&self.pool as &SqlitePool)
        .await?
        .iter()
        .map(history_from_row)
        .collect();

        Ok(history)
    }

    async fn upsert_history(&self, history: &History) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO history(chapter_id, last_read, time_read) VALUES (?, ?, ?)
            ON CONFLICT(chapter_id) DO UPDATE SET
                last_read = MAX(last_read, excluded.last_read),
                time_read = MAX(time_read, excluded.time_read)"#,
        )
        .bind(history.chapter_id)
        .bind(history.last_read)
        .bind(history.time_read)
        .execute(&self.pool as &SqlitePool)
        .await?;

        Ok(())
    }
}
