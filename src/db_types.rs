use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub is_staff: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAlbum {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_public: bool,
    pub layout_template_id: Option<i64>,
}

/// Partial album update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub layout_template_id: Option<i64>,
    pub cover_photo_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub album_id: i64,
    pub title: String,
    pub description: String,
    pub storage_key: String,
    pub file_size: i64,
    pub width: i64,
    pub height: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template_type: String,
    #[serde(default)]
    pub css_styles: String,
    #[serde(default)]
    pub is_premium: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TemplateUsage {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub total_albums: i64,
    pub total_photos: i64,
    pub total_size_mb: f64,
    pub recent_albums: i64,
    pub popular_templates: Vec<TemplateUsage>,
    pub is_premium: bool,
}
