use log::debug;
use serde::{Deserialize, Serialize};

use crate::db::{Album, DbPool};

/// One page of an album layout and the photos on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub page_number: i64,
    pub photo_ids: Vec<i64>,
}

/// Splits photos (already in display order) into pages of `page_size`.
/// Page numbers start at 1; the last page may be partial.
pub fn paginate(photo_ids: &[i64], page_size: usize) -> Vec<PagePlan> {
    let page_size = page_size.max(1);
    photo_ids
        .chunks(page_size)
        .enumerate()
        .map(|(index, chunk)| PagePlan {
            page_number: index as i64 + 1,
            photo_ids: chunk.to_vec(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlbumPage {
    pub id: i64,
    pub album_id: i64,
    pub page_number: i64,
    pub template_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageWithPhotos {
    #[serde(flatten)]
    pub page: AlbumPage,
    pub photo_ids: Vec<i64>,
}

impl AlbumPage {
    pub async fn list_for_album(pool: &DbPool, album_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AlbumPage>(
            "SELECT * FROM album_pages WHERE album_id = ? ORDER BY page_number",
        )
        .bind(album_id)
        .fetch_all(pool)
        .await
    }

    /// Pages of an album with the ids of the photos placed on each.
    pub async fn list_with_photos(
        pool: &DbPool,
        album_id: i64,
    ) -> Result<Vec<PageWithPhotos>, sqlx::Error> {
        let pages = Self::list_for_album(pool, album_id).await?;
        let assignments: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, page_id FROM photos
             WHERE album_id = ? AND page_id IS NOT NULL
             ORDER BY order_index, id",
        )
        .bind(album_id)
        .fetch_all(pool)
        .await?;

        Ok(pages
            .into_iter()
            .map(|page| {
                let photo_ids = assignments
                    .iter()
                    .filter(|(_, page_id)| *page_id == page.id)
                    .map(|(photo_id, _)| *photo_id)
                    .collect();
                PageWithPhotos { page, photo_ids }
            })
            .collect())
    }

    /// Recreates an album's pages from its current photo order.
    ///
    /// Old pages are dropped, each new page inherits the album template.
    pub async fn rebuild(pool: &DbPool, album: &Album, page_size: usize) -> Result<usize, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let photo_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM photos WHERE album_id = ? ORDER BY order_index, id",
        )
        .bind(album.id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM album_pages WHERE album_id = ?")
            .bind(album.id)
            .execute(&mut *tx)
            .await?;

        let plans = paginate(&photo_ids, page_size);
        for plan in &plans {
            let page_id: i64 = sqlx::query_scalar(
                "INSERT INTO album_pages (album_id, page_number, template_id) VALUES (?, ?, ?) RETURNING id",
            )
            .bind(album.id)
            .bind(plan.page_number)
            .bind(album.layout_template_id)
            .fetch_one(&mut *tx)
            .await?;

            for photo_id in &plan.photo_ids {
                sqlx::query("UPDATE photos SET page_id = ? WHERE id = ?")
                    .bind(page_id)
                    .bind(photo_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        debug!(
            "Rebuilt {} pages for album {} ({} photos)",
            plans.len(),
            album.id,
            photo_ids.len()
        );
        Ok(plans.len())
    }
}
