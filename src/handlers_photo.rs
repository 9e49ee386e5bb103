use bytes::Bytes;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::album_pages::AlbumPage;
use crate::config::Config;
use crate::db::{Album, DbPool, NewPhoto, Photo, PhotoEdit};
use crate::handlers_album::{find_owned_album, find_visible_album};
use crate::image_editor::{render_edit, Adjustments};
use crate::media_store::{photo_key, MediaStore, SharedStore};
use crate::share_tokens::{new_share_token, unique_id};
use crate::upload_validator::validate_upload;
use crate::validators::{check_edit, check_photo_quota};
use crate::warp_helpers::{
    bad_request, db_error, json_body, not_found, rename_not_found, server_error,
    validation_rejection, with_config, with_db, with_optional_user_id, with_store, with_user_id,
};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub order_index: Option<i64>,
}

/// Deletes stored files no photo record points at anymore.
pub async fn remove_unused_files(db_pool: &DbPool, store: &dyn MediaStore, keys: &[String]) {
    for key in keys {
        match Photo::storage_key_in_use(db_pool, key).await {
            Ok(false) => {
                if let Err(e) = store.delete(key).await {
                    warn!("Failed to delete photo file {}: {}", key, e);
                }
            }
            Ok(true) => {}
            Err(e) => warn!("Failed to check usage of {}: {}", key, e),
        }
    }
}

async fn find_photo(db_pool: &DbPool, id: i64) -> Result<Photo, Rejection> {
    Photo::get_by_id(db_pool, id)
        .await
        .map_err(db_error("Failed to load photo"))?
        .ok_or_else(|| not_found("Photo not found"))
}

/// Photo plus its album, if the caller owns the album.
async fn find_owned_photo(
    db_pool: &DbPool,
    id: i64,
    user_id: i64,
) -> Result<(Photo, Album), Rejection> {
    let photo = find_photo(db_pool, id).await?;
    let album = find_owned_album(db_pool, photo.album_id, user_id).await?;
    Ok((photo, album))
}

async fn find_visible_photo(
    db_pool: &DbPool,
    id: i64,
    user_id: Option<i64>,
) -> Result<Photo, Rejection> {
    let photo = find_photo(db_pool, id).await?;
    find_visible_album(db_pool, photo.album_id, user_id)
        .await
        .map_err(rename_not_found("Photo not found"))?;
    Ok(photo)
}

async fn load_photo_bytes(store: &dyn MediaStore, photo: &Photo) -> Result<Vec<u8>, Rejection> {
    store
        .load(&photo.storage_key)
        .await
        .map_err(|e| server_error("Failed to read photo file", e))
}

async fn rebuild_pages(db_pool: &DbPool, album: &Album, config: &Config) -> Result<(), Rejection> {
    AlbumPage::rebuild(db_pool, album, config.limits.page_size)
        .await
        .map_err(db_error("Failed to rebuild album pages"))?;
    Ok(())
}

pub async fn list_album_photos(
    album_id: i64,
    user_id: Option<i64>,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let album = find_visible_album(&db_pool, album_id, user_id).await?;
    let photos = Photo::list_for_album(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to list photos"))?;
    Ok(warp::reply::json(&photos))
}

pub async fn upload_photo(
    album_id: i64,
    user_id: i64,
    query: UploadQuery,
    body: Bytes,
    db_pool: DbPool,
    store: SharedStore,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, album_id, user_id).await?;

    let existing = Photo::count_for_album(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to count photos"))?;
    check_photo_quota(existing, &config.limits).map_err(validation_rejection)?;

    let upload = validate_upload(&query.filename, &body, &config.limits)
        .map_err(|e| bad_request(e.to_string()))?;

    let key = photo_key(album.id, &format!("{}.{}", unique_id(), upload.extension));
    store
        .save(&key, &body)
        .await
        .map_err(|e| server_error("Failed to store photo", e))?;

    let title = query
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| query.filename.clone());

    let new_photo = NewPhoto {
        album_id: album.id,
        title,
        description: query.description,
        storage_key: key.clone(),
        file_size: upload.size as i64,
        width: upload.width as i64,
        height: upload.height as i64,
        mime_type: upload.mime_type.to_string(),
    };

    let photo = match Photo::create(&db_pool, &new_photo).await {
        Ok(photo) => photo,
        Err(e) => {
            if let Err(cleanup) = store.delete(&key).await {
                warn!("Failed to clean up photo file {}: {}", key, cleanup);
            }
            return Err(db_error("Failed to create photo")(e));
        }
    };

    rebuild_pages(&db_pool, &album, &config).await?;
    info!(
        "Uploaded photo {} to album {} ({}x{}, {} bytes)",
        photo.id, album.id, photo.width, photo.height, photo.file_size
    );

    Ok(warp::reply::with_status(
        warp::reply::json(&photo),
        StatusCode::CREATED,
    ))
}

pub async fn get_photo_file(
    id: i64,
    user_id: Option<i64>,
    db_pool: DbPool,
    store: SharedStore,
) -> Result<impl Reply, Rejection> {
    let photo = find_visible_photo(&db_pool, id, user_id).await?;
    let contents = load_photo_bytes(store.as_ref(), &photo).await?;

    let reply = warp::reply::with_header(contents, "content-type", photo.mime_type);
    let reply = warp::reply::with_header(reply, "cache-control", "private, max-age=3600");
    Ok(reply)
}

pub async fn delete_photo(
    id: i64,
    user_id: i64,
    db_pool: DbPool,
    store: SharedStore,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let (photo, album) = find_owned_photo(&db_pool, id, user_id).await?;

    Photo::delete(&db_pool, photo.id)
        .await
        .map_err(db_error("Failed to delete photo"))?;
    remove_unused_files(&db_pool, store.as_ref(), std::slice::from_ref(&photo.storage_key)).await;
    rebuild_pages(&db_pool, &album, &config).await?;

    info!("Deleted photo {} from album {}", photo.id, album.id);
    Ok(warp::reply::json(&json!({ "success": true })))
}

pub async fn reorder_photo(
    id: i64,
    user_id: i64,
    request: ReorderRequest,
    db_pool: DbPool,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let order_index = request
        .order_index
        .ok_or_else(|| bad_request("order_index required"))?;
    let (photo, album) = find_owned_photo(&db_pool, id, user_id).await?;

    let photo = Photo::set_order_index(&db_pool, photo.id, order_index)
        .await
        .map_err(db_error("Failed to reorder photo"))?
        .ok_or_else(|| not_found("Photo not found"))?;
    rebuild_pages(&db_pool, &album, &config).await?;

    // Page assignment changed, read it back
    let photo = find_photo(&db_pool, photo.id).await?;
    Ok(warp::reply::json(&photo))
}

pub async fn save_edit(
    id: i64,
    user_id: i64,
    adjustments: Adjustments,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    check_edit(&adjustments).map_err(validation_rejection)?;
    let (photo, _) = find_owned_photo(&db_pool, id, user_id).await?;

    let edit = PhotoEdit::upsert(&db_pool, photo.id, &adjustments)
        .await
        .map_err(db_error("Failed to save photo edit"))?;

    Ok(warp::reply::with_status(
        warp::reply::json(&edit),
        StatusCode::CREATED,
    ))
}

pub async fn delete_edit(id: i64, user_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    let (photo, _) = find_owned_photo(&db_pool, id, user_id).await?;

    let removed = PhotoEdit::delete_for_photo(&db_pool, photo.id)
        .await
        .map_err(db_error("Failed to delete photo edit"))?;
    if !removed {
        return Err(not_found("Photo has no edit"));
    }

    Ok(warp::reply::json(&json!({ "success": true })))
}

/// The photo with its stored edit applied; the original when there is none.
pub async fn get_edited_photo(
    id: i64,
    user_id: Option<i64>,
    db_pool: DbPool,
    store: SharedStore,
) -> Result<impl Reply, Rejection> {
    let (contents, content_type) = render_visible_photo(&db_pool, store.as_ref(), id, user_id).await?;
    Ok(warp::reply::with_header(contents, "content-type", content_type))
}

/// Bytes and content type of the photo as viewers see it.
async fn render_visible_photo(
    db_pool: &DbPool,
    store: &dyn MediaStore,
    id: i64,
    user_id: Option<i64>,
) -> Result<(Vec<u8>, String), Rejection> {
    let photo = find_visible_photo(db_pool, id, user_id).await?;
    let contents = load_photo_bytes(store, &photo).await?;

    let adjustments = PhotoEdit::get_for_photo(db_pool, photo.id)
        .await
        .map_err(db_error("Failed to load photo edit"))?
        .map(|edit| edit.adjustments())
        .filter(|adjustments| !adjustments.is_identity());

    let Some(adjustments) = adjustments else {
        return Ok((contents, photo.mime_type));
    };

    let rendered = tokio::task::spawn_blocking(move || render_edit(&contents, &adjustments))
        .await
        .map_err(|e| server_error("Photo edit worker failed", e))?
        .map_err(|e| server_error("Failed to render photo edit", e))?;

    let content_type = rendered.content_type().to_string();
    Ok((rendered.bytes, content_type))
}

pub async fn share_photo(id: i64, user_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    let (photo, _) = find_owned_photo(&db_pool, id, user_id).await?;

    let token = new_share_token();
    Photo::set_share_token(&db_pool, photo.id, &token)
        .await
        .map_err(db_error("Failed to store share token"))?;

    Ok(warp::reply::json(&json!({
        "share_token": token,
        "url": format!("/s/photo/{}", token)
    })))
}

pub fn build_photo_routes(
    db_pool: DbPool,
    store: SharedStore,
    config: Arc<Config>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "albums" / i64 / "photos")
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(list_album_photos);

    let upload = warp::path!("api" / "albums" / i64 / "photos")
        .and(warp::post())
        .and(with_user_id())
        .and(warp::query::<UploadQuery>())
        .and(warp::body::content_length_limit(
            config.limits.max_upload_bytes as u64,
        ))
        .and(warp::body::bytes())
        .and(with_db(db_pool.clone()))
        .and(with_store(store.clone()))
        .and(with_config(config.clone()))
        .and_then(upload_photo);

    let file = warp::path!("api" / "photos" / i64 / "file")
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool.clone()))
        .and(with_store(store.clone()))
        .and_then(get_photo_file);

    let delete = warp::path!("api" / "photos" / i64)
        .and(warp::delete())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and(with_store(store.clone()))
        .and(with_config(config.clone()))
        .and_then(delete_photo);

    let reorder = warp::path!("api" / "photos" / i64 / "reorder")
        .and(warp::post())
        .and(with_user_id())
        .and(json_body())
        .and(with_db(db_pool.clone()))
        .and(with_config(config))
        .and_then(reorder_photo);

    let edit = warp::path!("api" / "photos" / i64 / "edit")
        .and(warp::post())
        .and(with_user_id())
        .and(json_body())
        .and(with_db(db_pool.clone()))
        .and_then(save_edit);

    let remove_edit = warp::path!("api" / "photos" / i64 / "edit")
        .and(warp::delete())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(delete_edit);

    let edited = warp::path!("api" / "photos" / i64 / "edited")
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool.clone()))
        .and(with_store(store))
        .and_then(get_edited_photo);

    let share = warp::path!("api" / "photos" / i64 / "share")
        .and(warp::post())
        .and(with_user_id())
        .and(with_db(db_pool))
        .and_then(share_photo);

    list.or(upload)
        .or(file)
        .or(delete)
        .or(reorder)
        .or(edit)
        .or(remove_edit)
        .or(edited)
        .or(share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_in_memory_pool;
    use crate::db::test_support::{album, user};
    use crate::media_store::MemoryMediaStore;
    use crate::warp_helpers::{ForbiddenError, NotFoundError, ValidationError};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn config() -> Arc<Config> {
        Arc::new(Config::for_data_dir(std::path::Path::new("/tmp/pix-album-test")))
    }

    fn encoded(format: ImageFormat) -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, image::Rgb([90, 90, 90])));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, format).unwrap();
        Bytes::from(buffer.into_inner())
    }

    fn png_bytes() -> Bytes {
        encoded(ImageFormat::Png)
    }

    fn upload_query(filename: &str) -> UploadQuery {
        UploadQuery {
            filename: filename.to_string(),
            title: None,
            description: String::new(),
        }
    }

    async fn upload(
        album_id: i64,
        user_id: i64,
        pool: &DbPool,
        store: &MemoryMediaStore,
    ) -> Result<Photo, Rejection> {
        upload_file(album_id, user_id, "beach.png", png_bytes(), pool, store).await
    }

    async fn upload_file(
        album_id: i64,
        user_id: i64,
        filename: &str,
        body: Bytes,
        pool: &DbPool,
        store: &MemoryMediaStore,
    ) -> Result<Photo, Rejection> {
        upload_photo(
            album_id,
            user_id,
            upload_query(filename),
            body,
            pool.clone(),
            Arc::new(store.clone()),
            config(),
        )
        .await?;
        let photos = Photo::list_for_album(pool, album_id).await.unwrap();
        Ok(photos.last().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_upload_stores_file_and_builds_pages() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;

        for _ in 0..5 {
            upload(album.id, owner.id, &pool, &store).await.unwrap();
        }

        let photos = Photo::list_for_album(&pool, album.id).await.unwrap();
        assert_eq!(photos.len(), 5);
        assert_eq!(store.len(), 5);
        assert_eq!(photos[0].title, "beach.png");
        assert_eq!((photos[0].width, photos[0].height), (20, 10));
        assert_eq!(photos[0].mime_type, "image/png");
        assert!(store.contains(&photos[0].storage_key));
        assert!(photos[0].storage_key.starts_with(&format!("photos/{}/", album.id)));

        let pages = AlbumPage::list_for_album(&pool, album.id).await.unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let other = user(&pool, "bob", false).await;
        let album = album(&pool, owner.id, "Trip").await;

        let err = upload(album.id, other.id, &pool, &store).await.err().unwrap();
        assert!(err.find::<ForbiddenError>().is_some());

        let err = upload_photo(
            album.id,
            owner.id,
            upload_query("notes.txt"),
            Bytes::from_static(b"hello"),
            pool.clone(),
            Arc::new(store.clone()),
            config(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.find::<ValidationError>().is_some());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_photo_quota_is_enforced() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;

        let mut limited = Config::for_data_dir(std::path::Path::new("/tmp/pix-album-test"));
        limited.limits.max_photos_per_album = 1;
        let limited = Arc::new(limited);

        let first = upload_photo(
            album.id,
            owner.id,
            upload_query("a.png"),
            png_bytes(),
            pool.clone(),
            Arc::new(store.clone()),
            limited.clone(),
        )
        .await;
        assert!(first.is_ok());

        let second = upload_photo(
            album.id,
            owner.id,
            upload_query("b.png"),
            png_bytes(),
            pool.clone(),
            Arc::new(store.clone()),
            limited,
        )
        .await
        .err()
        .unwrap();
        assert!(second.find::<ValidationError>().is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_photo_removes_file_and_repages() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;

        let mut photos = Vec::new();
        for _ in 0..5 {
            photos.push(upload(album.id, owner.id, &pool, &store).await.unwrap());
        }

        let victim = &photos[4];
        assert!(delete_photo(victim.id, owner.id, pool.clone(), Arc::new(store.clone()), config())
            .await
            .is_ok());
        assert!(!store.contains(&victim.storage_key));
        assert_eq!(AlbumPage::list_for_album(&pool, album.id).await.unwrap().len(), 1);

        let err = delete_photo(victim.id, owner.id, pool.clone(), Arc::new(store.clone()), config())
            .await
            .err()
            .unwrap();
        assert!(err.find::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_reorder_requires_index() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;
        let first = upload(album.id, owner.id, &pool, &store).await.unwrap();
        let second = upload(album.id, owner.id, &pool, &store).await.unwrap();

        let err = reorder_photo(
            second.id,
            owner.id,
            ReorderRequest { order_index: None },
            pool.clone(),
            config(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.find::<ValidationError>().is_some());

        assert!(reorder_photo(
            second.id,
            owner.id,
            ReorderRequest {
                order_index: Some(-1)
            },
            pool.clone(),
            config(),
        )
        .await
        .is_ok());

        let ids: Vec<i64> = Photo::list_for_album(&pool, album.id)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_edit_lifecycle() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;
        let photo = upload(album.id, owner.id, &pool, &store).await.unwrap();

        let err = save_edit(
            photo.id,
            owner.id,
            Adjustments {
                brightness: 150,
                contrast: 0,
                saturation: 0,
            },
            pool.clone(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.find::<ValidationError>().is_some());

        let response = save_edit(
            photo.id,
            owner.id,
            Adjustments {
                brightness: 20,
                contrast: 10,
                saturation: -30,
            },
            pool.clone(),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = get_edited_photo(photo.id, Some(owner.id), pool.clone(), Arc::new(store.clone()))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.headers().get("content-type").unwrap(), "image/png");

        let (bytes, content_type) = render_visible_photo(&pool, &store, photo.id, Some(owner.id))
            .await
            .unwrap();
        assert_eq!(content_type, "image/png");
        assert_ne!(bytes, store.load(&photo.storage_key).await.unwrap());
        let edited = image::load_from_memory(&bytes).unwrap();
        assert_eq!((edited.width(), edited.height()), (20, 10));

        assert!(delete_edit(photo.id, owner.id, pool.clone()).await.is_ok());
        let (bytes, content_type) = render_visible_photo(&pool, &store, photo.id, Some(owner.id))
            .await
            .unwrap();
        assert_eq!(content_type, "image/png");
        assert_eq!(bytes, store.load(&photo.storage_key).await.unwrap());

        let err = delete_edit(photo.id, owner.id, pool.clone())
            .await
            .err()
            .unwrap();
        assert!(err.find::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_edited_jpeg_is_served_as_jpeg() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;
        let photo = upload_file(
            album.id,
            owner.id,
            "beach.jpg",
            encoded(ImageFormat::Jpeg),
            &pool,
            &store,
        )
        .await
        .unwrap();
        assert_eq!(photo.mime_type, "image/jpeg");

        assert!(save_edit(
            photo.id,
            owner.id,
            Adjustments {
                brightness: -15,
                contrast: 25,
                saturation: 40,
            },
            pool.clone(),
        )
        .await
        .is_ok());

        let response = get_edited_photo(photo.id, Some(owner.id), pool.clone(), Arc::new(store.clone()))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");

        let (bytes, content_type) = render_visible_photo(&pool, &store, photo.id, Some(owner.id))
            .await
            .unwrap();
        assert_eq!(content_type, "image/jpeg");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let edited = image::load_from_memory(&bytes).unwrap();
        assert_eq!((edited.width(), edited.height()), (20, 10));
    }

    #[tokio::test]
    async fn test_private_photo_file_is_hidden() {
        let pool = create_in_memory_pool().await.unwrap();
        let store = MemoryMediaStore::new();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;
        let photo = upload(album.id, owner.id, &pool, &store).await.unwrap();

        assert!(get_photo_file(photo.id, Some(owner.id), pool.clone(), Arc::new(store.clone()))
            .await
            .is_ok());
        let err = get_photo_file(photo.id, None, pool.clone(), Arc::new(store.clone()))
            .await
            .err()
            .unwrap();
        assert!(err.find::<NotFoundError>().is_some());
    }
}
