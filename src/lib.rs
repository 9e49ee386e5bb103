pub mod album_pages;
pub mod collage_generator;
pub mod config;
pub mod db;
pub mod db_pool;
pub mod db_schema;
pub mod db_types;
pub mod error_reporter;
pub mod handlers_album;
pub mod handlers_collage;
pub mod handlers_health;
pub mod handlers_photo;
pub mod handlers_share;
pub mod handlers_template;
pub mod handlers_user;
pub mod image_editor;
pub mod media_store;
pub mod share_tokens;
pub mod upload_validator;
pub mod validators;
pub mod warp_helpers;
