use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use crate::db_pool::{create_db_pool, create_in_memory_pool, DbPool};
pub use crate::db_types::{
    AlbumUpdate, NewAlbum, NewPhoto, NewTemplate, NewUser, TemplateUsage, UserStats,
};
use crate::image_editor::Adjustments;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_premium: bool,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub async fn create(pool: &DbPool, user: &NewUser) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, is_premium, is_staff, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.is_premium)
        .bind(user.is_staff)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Name of the unique field already taken by another user, if any.
    pub async fn find_conflict(
        pool: &DbPool,
        username: &str,
        email: &str,
    ) -> Result<Option<&'static str>, sqlx::Error> {
        let username_taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
                .bind(username)
                .fetch_one(pool)
                .await?;
        if username_taken {
            return Ok(Some("username"));
        }

        let email_taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
                .bind(email)
                .fetch_one(pool)
                .await?;
        Ok(email_taken.then_some("email"))
    }

    pub fn can_use_premium(&self) -> bool {
        self.is_premium || self.is_staff
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlbumTemplate {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub template_type: String,
    pub css_styles: String,
    pub is_premium: bool,
    pub created_at: DateTime<Utc>,
}

impl AlbumTemplate {
    pub async fn create(pool: &DbPool, template: &NewTemplate) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AlbumTemplate>(
            "INSERT INTO album_templates (name, description, template_type, css_styles, is_premium, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.template_type)
        .bind(&template.css_styles)
        .bind(template.is_premium)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AlbumTemplate>("SELECT * FROM album_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Templates a user may pick: everything for premium users, free ones otherwise.
    pub async fn list_available(
        pool: &DbPool,
        include_premium: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AlbumTemplate>(
            "SELECT * FROM album_templates WHERE is_premium = FALSE OR ? ORDER BY id",
        )
        .bind(include_premium)
        .fetch_all(pool)
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Album {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub is_public: bool,
    pub layout_template_id: Option<i64>,
    pub cover_photo_id: Option<i64>,
    pub views_count: i64,
    pub share_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Album {
    pub async fn create(pool: &DbPool, user_id: i64, album: &NewAlbum) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Album>(
            "INSERT INTO albums (user_id, title, description, is_public, layout_template_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(user_id)
        .bind(album.title.trim())
        .bind(&album.description)
        .bind(album.is_public)
        .bind(album.layout_template_id)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_share_token(
        pool: &DbPool,
        token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE share_token = ?")
            .bind(token)
            .fetch_optional(pool)
            .await
    }

    pub async fn count_for_user(pool: &DbPool, user_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM albums WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    /// The caller's own albums plus every public album, most recently updated first.
    pub async fn list_visible(pool: &DbPool, user_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Album>(
            "SELECT * FROM albums
             WHERE user_id = ? OR is_public = TRUE
             ORDER BY updated_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn search(pool: &DbPool, user_id: i64, query: &str) -> Result<Vec<Self>, sqlx::Error> {
        let pattern = format!("%{}%", query.trim());
        sqlx::query_as::<_, Album>(
            "SELECT * FROM albums
             WHERE (user_id = ? OR is_public = TRUE)
               AND (title LIKE ? OR description LIKE ?)
             ORDER BY updated_at DESC, id DESC",
        )
        .bind(user_id)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await
    }

    /// Public albums with at least `min_photos` photos, most recently updated first.
    pub async fn popular(
        pool: &DbPool,
        min_photos: i64,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Album>(
            "SELECT a.* FROM albums a
             WHERE a.is_public = TRUE
               AND (SELECT COUNT(*) FROM photos p WHERE p.album_id = a.id) >= ?
             ORDER BY a.updated_at DESC, a.id DESC
             LIMIT ?",
        )
        .bind(min_photos)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &DbPool,
        id: i64,
        update: &AlbumUpdate,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Album>(
            "UPDATE albums SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                is_public = COALESCE(?, is_public),
                layout_template_id = COALESCE(?, layout_template_id),
                cover_photo_id = COALESCE(?, cover_photo_id),
                updated_at = ?
             WHERE id = ?
             RETURNING *",
        )
        .bind(update.title.as_deref().map(str::trim))
        .bind(update.description.as_deref())
        .bind(update.is_public)
        .bind(update.layout_template_id)
        .bind(update.cover_photo_id)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_public(
        pool: &DbPool,
        id: i64,
        is_public: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        Self::update(
            pool,
            id,
            &AlbumUpdate {
                is_public: Some(is_public),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_template(
        pool: &DbPool,
        id: i64,
        template_id: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        Self::update(
            pool,
            id,
            &AlbumUpdate {
                layout_template_id: Some(template_id),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_share_token(
        pool: &DbPool,
        id: i64,
        token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Album>("UPDATE albums SET share_token = ? WHERE id = ? RETURNING *")
            .bind(token)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn increment_views(pool: &DbPool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE albums SET views_count = views_count + 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Deletes the album; photos, pages, edits and collages cascade.
    pub async fn delete(pool: &DbPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM albums WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Copies an album and its photo records for `user_id`.
    ///
    /// The copy is private, has no share token and points at the same stored
    /// files as the source photos.
    pub async fn duplicate(pool: &DbPool, id: i64, user_id: i64) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let Some(source) = sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut title = format!("{} (copy)", source.title);
        if title.chars().count() > 255 {
            title = title.chars().take(255).collect();
        }

        let now = Utc::now();
        let copy = sqlx::query_as::<_, Album>(
            "INSERT INTO albums (user_id, title, description, is_public, layout_template_id, created_at, updated_at)
             VALUES (?, ?, ?, FALSE, ?, ?, ?)
             RETURNING *",
        )
        .bind(user_id)
        .bind(&title)
        .bind(&source.description)
        .bind(source.layout_template_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO photos
                (album_id, title, description, storage_key, file_size, width, height, mime_type, order_index, uploaded_at)
             SELECT ?, title, description, storage_key, file_size, width, height, mime_type, order_index, ?
             FROM photos WHERE album_id = ?
             ORDER BY order_index, id",
        )
        .bind(copy.id)
        .bind(now)
        .bind(source.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(copy))
    }

    pub async fn stats_for_user(pool: &DbPool, user: &User) -> Result<UserStats, sqlx::Error> {
        let total_albums = Self::count_for_user(pool, user.id).await?;

        let (total_photos, total_bytes): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(p.id), COALESCE(SUM(p.file_size), 0)
             FROM photos p JOIN albums a ON a.id = p.album_id
             WHERE a.user_id = ?",
        )
        .bind(user.id)
        .fetch_one(pool)
        .await?;

        let recent_albums: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM albums WHERE user_id = ? AND updated_at >= ?")
                .bind(user.id)
                .bind(Utc::now() - Duration::days(7))
                .fetch_one(pool)
                .await?;

        let popular_templates = sqlx::query_as::<_, TemplateUsage>(
            "SELECT t.name AS name, COUNT(a.id) AS count
             FROM albums a JOIN album_templates t ON t.id = a.layout_template_id
             WHERE a.user_id = ?
             GROUP BY t.id
             ORDER BY count DESC, t.name
             LIMIT 5",
        )
        .bind(user.id)
        .fetch_all(pool)
        .await?;

        let total_size_mb = (total_bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0;

        Ok(UserStats {
            total_albums,
            total_photos,
            total_size_mb,
            recent_albums,
            popular_templates,
            is_premium: user.is_premium,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Photo {
    pub id: i64,
    pub album_id: i64,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub file_size: i64,
    pub width: i64,
    pub height: i64,
    pub mime_type: String,
    pub order_index: i64,
    pub page_id: Option<i64>,
    pub share_token: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl Photo {
    /// Inserts a photo at the end of its album's display order.
    pub async fn create(pool: &DbPool, photo: &NewPhoto) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Photo>(
            "INSERT INTO photos
                (album_id, title, description, storage_key, file_size, width, height, mime_type, order_index, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                COALESCE((SELECT MAX(order_index) FROM photos WHERE album_id = ?), -1) + 1, ?)
             RETURNING *",
        )
        .bind(photo.album_id)
        .bind(&photo.title)
        .bind(&photo.description)
        .bind(&photo.storage_key)
        .bind(photo.file_size)
        .bind(photo.width)
        .bind(photo.height)
        .bind(&photo.mime_type)
        .bind(photo.album_id)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Photo>("SELECT * FROM photos WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_share_token(
        pool: &DbPool,
        token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Photo>("SELECT * FROM photos WHERE share_token = ?")
            .bind(token)
            .fetch_optional(pool)
            .await
    }

    /// Photos of an album in display order.
    pub async fn list_for_album(pool: &DbPool, album_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Photo>(
            "SELECT * FROM photos WHERE album_id = ? ORDER BY order_index, id",
        )
        .bind(album_id)
        .fetch_all(pool)
        .await
    }

    pub async fn count_for_album(pool: &DbPool, album_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM photos WHERE album_id = ?")
            .bind(album_id)
            .fetch_one(pool)
            .await
    }

    pub async fn set_order_index(
        pool: &DbPool,
        id: i64,
        order_index: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Photo>("UPDATE photos SET order_index = ? WHERE id = ? RETURNING *")
            .bind(order_index)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn set_share_token(
        pool: &DbPool,
        id: i64,
        token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Photo>("UPDATE photos SET share_token = ? WHERE id = ? RETURNING *")
            .bind(token)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Deletes the photo record and clears it as cover of its album.
    pub async fn delete(pool: &DbPool, id: i64) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("UPDATE albums SET cover_photo_id = NULL WHERE cover_photo_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM photos WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether any photo record still points at `storage_key` (duplicated albums share files).
    pub async fn storage_key_in_use(pool: &DbPool, storage_key: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM photos WHERE storage_key = ?)")
            .bind(storage_key)
            .fetch_one(pool)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PhotoEdit {
    pub id: i64,
    pub photo_id: i64,
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhotoEdit {
    pub fn adjustments(&self) -> Adjustments {
        Adjustments {
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
        }
    }

    /// Creates or replaces the single edit of a photo.
    pub async fn upsert(
        pool: &DbPool,
        photo_id: i64,
        adjustments: &Adjustments,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, PhotoEdit>(
            "INSERT INTO photo_edits (photo_id, brightness, contrast, saturation, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(photo_id) DO UPDATE SET
                brightness = excluded.brightness,
                contrast = excluded.contrast,
                saturation = excluded.saturation,
                updated_at = excluded.updated_at
             RETURNING *",
        )
        .bind(photo_id)
        .bind(adjustments.brightness)
        .bind(adjustments.contrast)
        .bind(adjustments.saturation)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn get_for_photo(pool: &DbPool, photo_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PhotoEdit>("SELECT * FROM photo_edits WHERE photo_id = ?")
            .bind(photo_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete_for_photo(pool: &DbPool, photo_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM photo_edits WHERE photo_id = ?")
            .bind(photo_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub async fn user(pool: &DbPool, name: &str, is_premium: bool) -> User {
        User::create(
            pool,
            &NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                is_premium,
                is_staff: false,
            },
        )
        .await
        .unwrap()
    }

    pub async fn album(pool: &DbPool, user_id: i64, title: &str) -> Album {
        Album::create(
            pool,
            user_id,
            &NewAlbum {
                title: title.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    pub async fn photo(pool: &DbPool, album_id: i64, key: &str) -> Photo {
        Photo::create(
            pool,
            &NewPhoto {
                album_id,
                title: key.to_string(),
                description: String::new(),
                storage_key: key.to_string(),
                file_size: 1024,
                width: 10,
                height: 10,
                mime_type: "image/png".to_string(),
            },
        )
        .await
        .unwrap()
    }
}
