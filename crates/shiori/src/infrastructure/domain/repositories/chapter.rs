use async_trait::async_trait;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    domain::{
        entities::chapter::Chapter,
        repositories::{RepositoryError, chapter::ChapterRepository},
    },
    infrastructure::database::Pool,
};

#[derive(Clone)]
pub struct ChapterRepositoryImpl {
    pool: Pool,
}

impl ChapterRepositoryImpl {
    pub fn new<P: Into<Pool>>(pool: P) -> Self {
        Self { pool: pool.into() }
    }
}

fn chapter_from_row(row: SqliteRow) -> Chapter {
    Chapter {
        id: row.get(0),
        manga_id: row.get(1),
        url: row.get(2),
        name: row.get(3),
        scanlator: row.get(4),
        read: row.get(5),
        bookmark: row.get(6),
        last_page_read: row.get(7),
        chapter_number: row.get(8),
        source_order: row.get(9),
        date_fetch: row.get(10),
        date_upload: row.get(11),
    }
}

#[async_trait]
impl ChapterRepository for ChapterRepositoryImpl {
    async fn get_chapter_by_id(&self, id: i64) -> Result<Chapter, RepositoryError> {
        let row = sqlx::query(r#"SELECT * FROM chapter WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool as &SqlitePool)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Ok(chapter_from_row(row))
    }

    async fn get_chapters_by_manga_id(
        &self,
        manga_id: i64,
    ) -> Result<Vec<Chapter>, RepositoryError> {
        let chapters = sqlx::query(
            r#"SELECT * FROM chapter WHERE manga_id = ? ORDER BY source_order ASC"#,
        )
        .bind(manga_id)
        .fetch_all(&self.pool as &SqlitePool)
        .await?
        .into_par_iter()
        .map(chapter_from_row)
        .collect();

        Ok(chapters)
    }

    async fn insert_chapter(&self, chapter: &Chapter) -> Result<i64, RepositoryError> {
        let row_id = sqlx::query(
            r#"INSERT INTO chapter(
                manga_id,
                url,
                name,
                scanlator,
                read,
                bookmark,
                last_page_read,
                chapter_number,
                source_order,
                date_fetch,
                date_upload
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(chapter.manga_id)
        .bind(&chapter.url)
        .bind(&chapter.name)
        .bind(&chapter.scanlator)
        .bind(chapter.read)
        .bind(chapter.bookmark)
        .bind(chapter.last_page_read)
        .bind(chapter.chapter_number)
        .bind(chapter.source_order)
        .bind(chapter.date_fetch)
        .bind(chapter.date_upload)
        .execute(&self.pool as &SqlitePool)
        .await?
        .last_insert_rowid();

        Ok(row_id)
    }

    async fn update_chapter(&self, chapter: &Chapter) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"UPDATE chapter SET
                name = ?,
                scanlator = ?,
                read = ?,
                bookmark = ?,
                last_page_read = ?,
                chapter_number = ?,
                source_order = ?,
                date_fetch = ?,
                date_upload = ?
            WHERE id = ?"#,
        )
        .bind(&chapter.name)
        .bind(&chapter.scanlator)
        .bind(chapter.read)
        .bind(chapter.bookmark)
        .bind(chapter.last_page_read)
        .bind(chapter.chapter_number)
        .bind(chapter.source_order)
        .bind(chapter.date_fetch)
        .bind(chapter.date_upload)
        .bind(chapter.id)
        .execute(&self.pool as &SqlitePool)
        .await?;

        Ok(())
    }

    async fn update_chapter_progress(
        &self,
        id: i64,
        read: bool,
        last_page_read: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(r#"UPDATE chapter SET read = ?, last_page_read = ? WHERE id = ?"#)
            .bind(read)
            .bind(last_page_read)
            .bind(id)
            .execute(&self.pool as &SqlitePool)
            .await?;

        Ok(())
    }
}
