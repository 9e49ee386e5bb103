use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

pub const MAX_TITLE_LENGTH: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BugReport {
    pub id: i64,
    pub user_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl BugReport {
    pub async fn list_open(pool: &DbPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BugReport>(
            "SELECT * FROM bug_reports WHERE status = 'open' ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(pool)
        .await
    }
}

/// Titles longer than 255 chars keep their first 252 chars plus "...".
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LENGTH {
        return title.to_string();
    }
    let mut truncated: String = title.chars().take(MAX_TITLE_LENGTH - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Turns server-side failures into stored bug reports.
#[derive(Clone)]
pub struct ErrorReporter {
    db_pool: DbPool,
}

impl ErrorReporter {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }

    /// Stores a report. Never fails: a report that cannot be stored is only logged.
    /// Unknown user ids are recorded as anonymous.
    pub async fn report(&self, title: &str, description: &str, user_id: Option<i64>) -> Option<i64> {
        let title = truncate_title(title);

        let result = sqlx::query_scalar::<_, i64>(
            "INSERT INTO bug_reports (user_id, title, description, status, created_at)
             VALUES ((SELECT id FROM users WHERE id = ?), ?, ?, 'open', ?)
             RETURNING id",
        )
        .bind(user_id)
        .bind(&title)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(&self.db_pool)
        .await;

        match result {
            Ok(id) => {
                info!("Recorded bug report {}: {}", id, title);
                Some(id)
            }
            Err(e) => {
                error!("Failed to create automatic bug report: {}", e);
                None
            }
        }
    }
}
