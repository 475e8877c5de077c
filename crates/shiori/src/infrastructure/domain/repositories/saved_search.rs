use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    domain::{
        entities::saved_search::SavedSearch,
        repositories::{RepositoryError, saved_search::SavedSearchRepository},
    },
    infrastructure::database::Pool,
};

#[derive(Clone)]
pub struct SavedSearchRepositoryImpl {
    pool: Pool,
}

impl SavedSearchRepositoryImpl {
    pub fn new<P: Into<Pool>>(pool: P) -> Self {
        Self { pool: pool.into() }
    }
}

#[async_trait]
impl SavedSearchRepository for SavedSearchRepositoryImpl {
    async fn get_saved_searches(&self) -> Result<Vec<SavedSearch>, RepositoryError> {
        let searches = sqlx::query(r#"SELECT * FROM saved_search ORDER BY source, name"#)
            .fetch_all(&self.pool as &SqlitePool)
            .await?
            .iter()
            .map(|row| SavedSearch {
                id: row.get(0),
                source: row.get(1),
                name: row.get(2),
                query: row.get(3),
                filters_json: row.get(4),
            })
            .collect();

        Ok(searches)
    }

    async fn insert_saved_search(&self, search: &SavedSearch) -> Result<bool, RepositoryError> {
        let affected = sqlx::query(
            r#"INSERT INTO saved_search(source, name, query, filters_json) VALUES (?, ?, ?, ?)
            ON CONFLICT(source, name) DO NOTHING"#,
        )
        .bind(search.source)
        .bind(&search.name)
        .bind(&search.query)
        .bind(&search.filters_json)
        .execute(&self.pool as &SqlitePool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }
}
