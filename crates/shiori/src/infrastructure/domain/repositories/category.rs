use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    domain::{
        entities::category::Category,
        repositories::{RepositoryError, category::CategoryRepository},
    },
    infrastructure::database::Pool,
};

#[derive(Clone)]
pub struct CategoryRepositoryImpl {
    pool: Pool,
}

impl CategoryRepositoryImpl {
    pub fn new<P: Into<Pool>>(pool: P) -> Self {
        Self { pool: pool.into() }
    }
}

fn category_from_row(row: &SqliteRow) -> Category {
    Category {
        id: row.get(0),
        name: row.get(1),
        sort: row.get(2),
        flags: row.get(3),
    }
}

#[async_trait]
impl CategoryRepository for CategoryRepositoryImpl {
    async fn get_categories(&self) -> Result<Vec<Category>, RepositoryError> {
        let categories = sqlx::query(r#"SELECT * FROM category ORDER BY sort"#)
            .fetch_all(&self.pool as &SqlitePool)
            .await?
            .iter()
            .map(category_from_row)
            .collect();

        Ok(categories)
    }

    async fn insert_category(&self, category: &Category) -> Result<i64, RepositoryError> {
        let row_id = sqlx::query(r#"INSERT INTO category(name, sort, flags) VALUES (?, ?, ?)"#)
            .bind(&category.name)
            .bind(category.sort)
            .bind(category.flags)
            .execute(&self.pool as &SqlitePool)
            .await?
            .last_insert_rowid();

        Ok(row_id)
    }

    async fn get_categories_by_manga_id(
        &self,
        manga_id: i64,
    ) -> Result<Vec<Category>, RepositoryError> {
        let categories = sqlx::query(
            r#"SELECT category.* FROM category
            JOIN manga_category ON manga_category.category_id = category.id
            WHERE manga_category.manga_id = ?
            ORDER BY category.sort"#,
        )
        .bind(manga_id)
        .fetch_all(&self.pool as &SqlitePool)
        .await?
        .iter()
        .map(category_from_row)
        .collect();

        Ok(categories)
    }

    async fn add_manga_to_categories(
        &self,
        manga_id: i64,
        category_ids: &[i64],
    ) -> Result<(), RepositoryError> {
        if category_ids.is_empty() {
            return Ok(());
        }

        let query_str = format!(
            r#"INSERT OR IGNORE INTO manga_category(manga_id, category_id) VALUES {}"#,
            vec!["(?, ?)"; category_ids.len()].join(",")
        );
        let mut query = sqlx::query(&query_str);
        for category_id in category_ids {
            query = query.bind(manga_id).bind(category_id);
        }
        query.execute(&self.pool as &SqlitePool).await?;

        Ok(())
    }
}
