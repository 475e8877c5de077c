use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    domain::{
        entities::merged::MergedMangaReference,
        repositories::{RepositoryError, merged::MergedRepository},
    },
    infrastructure::database::Pool,
};

#[derive(Clone)]
pub struct MergedRepositoryImpl {
    pool: Pool,
}

impl MergedRepositoryImpl {
    pub fn new<P: Into<Pool>>(pool: P) -> Self {
        Self { pool: pool.into() }
    }
}

#[async_trait]
impl MergedRepository for MergedRepositoryImpl {
    async fn get_references_by_merge_id(
        &self,
        merge_id: i64,
    ) -> Result<Vec<MergedMangaReference>, RepositoryError> {
        let references = sqlx::query(
            r#"SELECT * FROM merged WHERE merge_id = ? ORDER BY chapter_priority, id"#,
        )
        .bind(merge_id)
        .fetch_all(&self.pool as &SqlitePool)
        .await?
        .iter()
        .map(|row| MergedMangaReference {
            id: row.get(0),
            is_info_manga: row.get(1),
            get_chapter_updates: row.get(2),
            chapter_sort_mode: row.get(3),
            chapter_priority: row.get(4),
            download_chapters: row.get(5),
            merge_id: row.get(6),
            merge_url: row.get(7),
            manga_id: row.get(8),
            manga_url: row.get(9),
            manga_source: row.get(10),
        })
        .collect();

        Ok(references)
    }

    async fn insert_reference(
        &self,
        reference: &MergedMangaReference,
    ) -> Result<bool, RepositoryError> {
        let affected = sqlx::query(
            r#"INSERT INTO merged(
                info_manga,
                get_chapter_updates,
                chapter_sort_mode,
                chapter_priority,
                download_chapters,
                merge_id,
                merge_url,
                manga_id,
                manga_url,
                manga_source
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(merge_url, manga_url, manga_source) DO NOTHING"#,
        )
        .bind(reference.is_info_manga)
        .bind(reference.get_chapter_updates)
        .bind(reference.chapter_sort_mode)
        .bind(reference.chapter_priority)
        .bind(reference.download_chapters)
        .bind(reference.merge_id)
        .bind(&reference.merge_url)
        .bind(reference.manga_id)
        .bind(&reference.manga_url)
        .bind(reference.manga_source)
        .execute(&self.pool as &SqlitePool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }
}
