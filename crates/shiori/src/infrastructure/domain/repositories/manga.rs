use async_trait::async_trait;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    domain::{
        entities::manga::{ChapterFlags, CustomMangaInfo, Manga},
        repositories::{RepositoryError, manga::MangaRepository},
    },
    infrastructure::database::Pool,
};

#[derive(Clone)]
pub struct MangaRepositoryImpl {
    pool: Pool,
}

impl MangaRepositoryImpl {
    pub fn new<P: Into<Pool>>(pool: P) -> Self {
        Self { pool: pool.into() }
    }
}

fn manga_from_row(row: SqliteRow) -> Manga {
    Manga {
        id: row.get(0),
        source: row.get(1),
        url: row.get(2),
        title: row.get(3),
        artist: row.get(4),
        author: row.get(5),
        description: row.get(6),
        genre: serde_json::from_str(row.get::<String, _>(7).as_str()).unwrap_or_default(),
        status: row.get(8),
        thumbnail_url: row.get(9),
        favorite: row.get(10),
        last_update: row.get(11),
        date_added: row.get(12),
        chapter_flags: ChapterFlags(row.get(13)),
        cover_last_modified: row.get(14),
        filtered_scanlators: serde_json::from_str(row.get::<String, _>(15).as_str())
            .unwrap_or_default(),
        initialized: row.get(16),
    }
}

#[async_trait]
impl MangaRepository for MangaRepositoryImpl {
    async fn get_manga_by_id(&self, id: i64) -> Result<Manga, RepositoryError> {
        let row = sqlx::query(r#"SELECT * FROM manga WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool as &SqlitePool)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Ok(manga_from_row(row))
    }

    async fn get_manga_by_source_url(
        &self,
        source: i64,
        url: &str,
    ) -> Result<Option<Manga>, RepositoryError> {
        let row = sqlx::query(r#"SELECT * FROM manga WHERE source = ? AND url = ?"#)
            .bind(source)
            .bind(url)
            .fetch_optional(&self.pool as &SqlitePool)
            .await?;

        Ok(row.map(manga_from_row))
    }

    async fn get_favorites(&self) -> Result<Vec<Manga>, RepositoryError> {
        let manga = sqlx::query(r#"SELECT * FROM manga WHERE favorite = 1 ORDER BY title"#)
            .fetch_all(&self.pool as &SqlitePool)
            .await?
            .into_par_iter()
            .map(manga_from_row)
            .collect();

        Ok(manga)
    }

    async fn get_read_non_favorites(&self) -> Result<Vec<Manga>, RepositoryError> {
        let manga = sqlx::query(
            r#"SELECT * FROM manga WHERE favorite = 0 AND EXISTS (
                SELECT 1 FROM chapter WHERE chapter.manga_id = manga.id AND chapter.read = 1
            ) ORDER BY title"#,
        )
        .fetch_all(&self.pool as &SqlitePool)
        .await?
        .into_par_iter()
        .map(manga_from_row)
        .collect();

        Ok(manga)
    }

    async fn insert_manga(&self, manga: &Manga) -> Result<i64, RepositoryError> {
        let row_id = sqlx::query(
            r#"INSERT INTO manga(
                source,
                url,
                title,
                artist,
                author,
                description,
                genre,
                status,
                thumbnail_url,
                favorite,
                last_update,
                date_added,
                chapter_flags,
                cover_last_modified,
                filtered_scanlators,
                initialized
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(manga.source)
        .bind(&manga.url)
        .bind(&manga.title)
        .bind(&manga.artist)
        .bind(&manga.author)
        .bind(&manga.description)
        .bind(serde_json::to_string(&manga.genre).unwrap_or_else(|_| "[]".to_string()))
        .bind(manga.status)
        .bind(&manga.thumbnail_url)
        .bind(manga.favorite)
        .bind(manga.last_update)
        .bind(manga.date_added)
        .bind(manga.chapter_flags.0)
        .bind(manga.cover_last_modified)
        .bind(
            serde_json::to_string(&manga.filtered_scanlators)
                .unwrap_or_else(|_| "[]".to_string()),
        )
        .bind(manga.initialized)
        .execute(&self.pool as &SqlitePool)
        .await?
        .last_insert_rowid();

        Ok(row_id)
    }

    async fn update_manga(&self, manga: &Manga) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"UPDATE manga SET
                title = ?,
                artist = ?,
                author = ?,
                description = ?,
                genre = ?,
                status = ?,
                thumbnail_url = ?,
                favorite = ?,
                last_update = ?,
                date_added = ?,
                chapter_flags = ?,
                cover_last_modified = ?,
                filtered_scanlators = ?,
                initialized = ?
            WHERE id = ?"#,
        )
        .bind(&manga.title)
        .bind(&manga.artist)
        .bind(&manga.author)
        .bind(&manga.description)
        .bind(serde_json::to_string(&manga.genre).unwrap_or_else(|_| "[]".to_string()))
        .bind(manga.status)
        .bind(&manga.thumbnail_url)
        .bind(manga.favorite)
        .bind(manga.last_update)
        .bind(manga.date_added)
        .bind(manga.chapter_flags.0)
        .bind(manga.cover_last_modified)
        .bind(
            serde_json::to_string(&manga.filtered_scanlators)
                .unwrap_or_else(|_| "[]".to_string()),
        )
        .bind(manga.initialized)
        .bind(manga.id)
        .execute(&self.pool as &SqlitePool)
        .await?;

        Ok(())
    }

    async fn set_favorite(&self, id: i64, favorite: bool) -> Result<(), RepositoryError> {
        sqlx::query(r#"UPDATE manga SET favorite = ? WHERE id = ?"#)
            .bind(favorite)
            .bind(id)
            .execute(&self.pool as &SqlitePool)
            .await?;

        Ok(())
    }

    async fn get_custom_info(
        &self,
        manga_id: i64,
    ) -> Result<Option<CustomMangaInfo>, RepositoryError> {
        let row = sqlx::query(r#"SELECT * FROM custom_manga_info WHERE manga_id = ?"#)
            .bind(manga_id)
            .fetch_optional(&self.pool as &SqlitePool)
            .await?;

        Ok(row.map(|row| CustomMangaInfo {
            manga_id: row.get(0),
            title: row.get(1),
            author: row.get(2),
            artist: row.get(3),
            description: row.get(4),
            genre: row
                .get::<Option<String>, _>(5)
                .and_then(|genre| serde_json::from_str(&genre).ok()),
            status: row.get(6),
        }))
    }

    async fn set_custom_info(&self, info: &CustomMangaInfo) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO custom_manga_info(
                manga_id,
                title,
                author,
                artist,
                description,
                genre,
                status
            ) VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT(manga_id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                artist = excluded.artist,
                description = excluded.description,
                genre = excluded.genre,
                status = excluded.status"#,
        )
        .bind(info.manga_id)
        .bind(&info.title)
        .bind(&info.author)
        .bind(&info.artist)
        .bind(&info.description)
        .bind(
            info.genre
                .as_ref()
                .and_then(|genre| serde_json::to_string(genre).ok()),
        )
        .bind(info.status)
        .execute(&self.pool as &SqlitePool)
        .await?;

        Ok(())
    }
}
