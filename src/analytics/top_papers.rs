use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Analytics;
use crate::db::{EventFilter, EventType};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Metric the ranking is ordered by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Views,
    Downloads,
    Citations,
}

impl SortBy {
    fn event_type(self) -> EventType {
        match self {
            SortBy::Views => EventType::View,
            SortBy::Downloads => EventType::Download,
            SortBy::Citations => EventType::Citation,
        }
    }
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "views" => Ok(SortBy::Views),
            "downloads" => Ok(SortBy::Downloads),
            "citations" => Ok(SortBy::Citations),
            other => Err(format!("unknown sort '{}', expected views, downloads or citations", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopPapers {
    pub papers: Vec<TopPaper>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopPaper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub views: i64,
    pub downloads: i64,
    pub citations: i64,
    /// Distinct countries the events came from
    pub countries: i64,
}

impl Analytics {
    pub async fn top_papers(
        &self,
        limit: u32,
        sort_by: SortBy,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<TopPapers> {
        let limit = limit.clamp(1, MAX_LIMIT);
        let rows = self
            .db
            .get_paper_stats(&EventFilter::between(start, end), sort_by.event_type(), i64::from(limit))
            .await?;

        let ids: Vec<String> = rows.iter().map(|r| r.paper_id.clone()).collect();
        let mut details = self.db.get_paper_summaries(&ids).await?;

        let papers = rows
            .into_iter()
            .map(|row| {
                let (title, authors) = match details.remove(&row.paper_id) {
                    Some(paper) => (paper.title, paper.authors),
                    None => ("Unknown".to_string(), Vec::new()),
                };
                TopPaper {
                    id: row.paper_id,
                    title,
                    authors,
                    views: row.counts.views,
                    downloads: row.counts.downloads,
                    citations: row.counts.citations,
                    countries: row.counts.countries,
                }
            })
            .collect();

        Ok(TopPapers { papers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testing::seed;
    use crate::db::Database;
    use chrono::Duration;
    use uuid::Uuid;

    async fn seed_many(db: &Database, paper: Uuid, event_type: EventType, n: usize) {
        for _ in 0..n {
            seed(db, paper, event_type, Utc::now(), Some(("TZ", -6.0, 35.0))).await;
        }
    }

    #[tokio::test]
    async fn test_sorted_descending_by_requested_metric() {
        let db = Database::in_memory().await;
        let analytics = Analytics::new(db.clone());
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        db.insert_paper(a, "Maize Yields under Drought", &["Kimaro, E."]).await;
        db.insert_paper(b, "Coastal Erosion in Zanzibar", &["Said, H.", "Mushi, R."]).await;
        db.insert_paper(c, "Swahili Morphology", &["Nyerere, A."]).await;

        seed_many(&db, a, EventType::View, 5).await;
        seed_many(&db, a, EventType::Download, 1).await;
        seed_many(&db, b, EventType::View, 2).await;
        seed_many(&db, b, EventType::Download, 4).await;
        seed_many(&db, c, EventType::View, 3).await;
        seed_many(&db, c, EventType::Citation, 2).await;

        let by_views = analytics.top_papers(10, SortBy::Views, None, None).await.unwrap();
        let views: Vec<i64> = by_views.papers.iter().map(|p| p.views).collect();
        assert_eq!(views, vec![5, 3, 2]);
        assert_eq!(by_views.papers[0].title, "Maize Yields under Drought");

        let by_downloads = analytics.top_papers(10, SortBy::Downloads, None, None).await.unwrap();
        assert_eq!(by_downloads.papers[0].id, b.to_string());
        assert_eq!(by_downloads.papers[0].authors, vec!["Said, H.", "Mushi, R."]);

        let by_citations = analytics.top_papers(10, SortBy::Citations, None, None).await.unwrap();
        assert_eq!(by_citations.papers[0].id, c.to_string());
        assert_eq!(by_citations.papers[0].citations, 2);
        assert_eq!(by_citations.papers[0].countries, 1);
    }

    #[tokio::test]
    async fn test_limit_is_respected() {
        let db = Database::in_memory().await;
        let analytics = Analytics::new(db.clone());
        for n in 1..=8 {
            seed_many(&db, Uuid::new_v4(), EventType::View, n).await;
        }

        let top = analytics.top_papers(5, SortBy::Views, None, None).await.unwrap();
        assert_eq!(top.papers.len(), 5);
        assert!(top.papers.windows(2).all(|w| w[0].views >= w[1].views));
        assert_eq!(top.papers[0].views, 8);
    }

    #[tokio::test]
    async fn test_missing_paper_gets_placeholder_title() {
        let db = Database::in_memory().await;
        let analytics = Analytics::new(db.clone());
        let orphan = Uuid::new_v4();
        seed_many(&db, orphan, EventType::View, 1).await;

        let top = analytics.top_papers(10, SortBy::Views, None, None).await.unwrap();
        assert_eq!(top.papers.len(), 1);
        assert_eq!(top.papers[0].title, "Unknown");
        assert!(top.papers[0].authors.is_empty());
    }

    #[tokio::test]
    async fn test_date_filter_excludes_old_events() {
        let db = Database::in_memory().await;
        let analytics = Analytics::new(db.clone());
        let paper = Uuid::new_v4();
        seed(&db, paper, EventType::View, Utc::now() - Duration::days(40), None).await;
        seed(&db, paper, EventType::View, Utc::now(), None).await;

        let top = analytics
            .top_papers(10, SortBy::Views, Some(Utc::now() - Duration::days(30)), None)
            .await
            .unwrap();
        assert_eq!(top.papers[0].views, 1);
    }
}
