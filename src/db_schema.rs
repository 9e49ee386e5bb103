use crate::db_pool::DbPool;

// Schema definitions
pub const USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE CHECK(length(username) BETWEEN 1 AND 25),
    email TEXT NOT NULL UNIQUE CHECK(length(email) BETWEEN 3 AND 66),
    is_premium BOOLEAN NOT NULL DEFAULT FALSE,
    is_staff BOOLEAN NOT NULL DEFAULT FALSE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

pub const ALBUM_TEMPLATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS album_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    template_type TEXT NOT NULL DEFAULT 'other'
        CHECK(template_type IN ('wedding', 'travel', 'portrait', 'family', 'event', 'other')),
    css_styles TEXT NOT NULL DEFAULT '',
    is_premium BOOLEAN NOT NULL DEFAULT FALSE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

// cover_photo_id is cleared by Photo::delete
pub const ALBUMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS albums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL CHECK(length(title) BETWEEN 1 AND 255),
    description TEXT NOT NULL DEFAULT '',
    is_public BOOLEAN NOT NULL DEFAULT FALSE,
    layout_template_id INTEGER REFERENCES album_templates(id) ON DELETE SET NULL,
    cover_photo_id INTEGER,
    views_count INTEGER NOT NULL DEFAULT 0,
    share_token TEXT UNIQUE,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL
)
"#;

pub const PHOTOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id INTEGER NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    storage_key TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,
    page_id INTEGER REFERENCES album_pages(id) ON DELETE SET NULL,
    share_token TEXT UNIQUE,
    uploaded_at DATETIME NOT NULL
)
"#;

pub const PHOTO_EDITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS photo_edits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL UNIQUE REFERENCES photos(id) ON DELETE CASCADE,
    brightness INTEGER NOT NULL DEFAULT 0 CHECK(brightness BETWEEN -100 AND 100),
    contrast INTEGER NOT NULL DEFAULT 0 CHECK(contrast BETWEEN -100 AND 100),
    saturation INTEGER NOT NULL DEFAULT 0 CHECK(saturation BETWEEN -100 AND 100),
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL
)
"#;

pub const ALBUM_PAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS album_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id INTEGER NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    page_number INTEGER NOT NULL CHECK(page_number >= 1),
    template_id INTEGER REFERENCES album_templates(id) ON DELETE SET NULL,
    UNIQUE(album_id, page_number)
)
"#;

pub const COLLAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS collages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id INTEGER NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    storage_key TEXT NOT NULL,
    format TEXT NOT NULL CHECK(format IN ('jpeg', 'png')),
    photo_count INTEGER NOT NULL,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    created_at DATETIME NOT NULL
)
"#;

pub const BUG_REPORTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bug_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    created_at DATETIME NOT NULL
)
"#;

pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_albums_user ON albums(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_albums_public_views ON albums(is_public, views_count DESC)",
    "CREATE INDEX IF NOT EXISTS idx_photos_album_order ON photos(album_id, order_index, id)",
    "CREATE INDEX IF NOT EXISTS idx_album_pages_album ON album_pages(album_id, page_number)",
    "CREATE INDEX IF NOT EXISTS idx_collages_album ON collages(album_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_bug_reports_status ON bug_reports(status)",
];

// Built-in layout templates, inserted once
pub const DEFAULT_TEMPLATES: &str = r#"
INSERT OR IGNORE INTO album_templates (name, description, template_type, css_styles, is_premium) VALUES
    ('Classic', 'Simple white pages', 'other',
     '.album-page { background: #fff; gap: 8px; }', FALSE),
    ('Wanderlust', 'Travel journal with map tones', 'travel',
     '.album-page { background: #f4ecd8; border: 2px dashed #8b6f47; }', FALSE),
    ('Family Moments', 'Warm frames for family photos', 'family',
     '.album-page { background: #fff8f0; } .photo { border-radius: 6px; }', FALSE),
    ('Golden Vows', 'Gold-trimmed wedding layout', 'wedding',
     '.album-page { background: #fffdf5; border: 4px double #c9a227; }', TRUE),
    ('Studio Portrait', 'Dark gallery for portraits', 'portrait',
     '.album-page { background: #111; color: #eee; } .photo { box-shadow: 0 0 12px #000; }', TRUE)
"#;

/// Tables in creation order. `photos` references `album_pages`, so pages come first.
const TABLES: &[&str] = &[
    USERS_TABLE,
    ALBUM_TEMPLATES_TABLE,
    ALBUMS_TABLE,
    ALBUM_PAGES_TABLE,
    PHOTOS_TABLE,
    PHOTO_EDITS_TABLE,
    COLLAGES_TABLE,
    BUG_REPORTS_TABLE,
];

pub async fn initialize_schema(pool: &DbPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for table in TABLES {
        sqlx::query(table).execute(&mut *tx).await?;
    }

    for index in INDEXES {
        sqlx::query(index).execute(&mut *tx).await?;
    }

    sqlx::query(DEFAULT_TEMPLATES).execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}
