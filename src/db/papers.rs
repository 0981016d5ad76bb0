//! Read-only access to paper metadata

use std::collections::HashMap;

use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite};
use tracing::warn;

use super::Database;

/// The paper fields analytics needs for display
#[derive(Debug, Clone, PartialEq)]
pub struct PaperSummary {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
}

impl Database {
    /// Batch lookup by id. Ids with no paper row are simply absent from the map.
    pub async fn get_paper_summaries(&self, ids: &[String]) -> Result<HashMap<String, PaperSummary>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id, title, authors FROM papers WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let rows: Vec<(String, String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(id, title, authors)| {
                let authors = serde_json::from_str::<Vec<String>>(&authors).unwrap_or_else(|e| {
                    warn!("Paper {} has malformed authors list: {}", id, e);
                    Vec::new()
                });
                (id.clone(), PaperSummary { id, title, authors })
            })
            .collect())
    }
}

#[cfg(test)]
impl Database {
    pub async fn insert_paper(&self, id: uuid::Uuid, title: &str, authors: &[&str]) {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO papers (id, title, authors, status, created_at, updated_at)
            VALUES (?, ?, ?, 'published', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(title)
        .bind(serde_json::to_string(authors).expect("authors json"))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .expect("insert paper");
    }
}
