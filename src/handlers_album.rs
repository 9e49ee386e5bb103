use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::album_pages::{AlbumPage, PageWithPhotos};
use crate::collage_generator::Collage;
use crate::config::Config;
use crate::db::{Album, AlbumTemplate, AlbumUpdate, DbPool, NewAlbum, Photo};
use crate::handlers_photo::remove_unused_files;
use crate::media_store::SharedStore;
use crate::share_tokens::new_share_token;
use crate::validators::{
    check_album_quota, check_album_title, check_owner, check_publishable, check_template_access,
};
use crate::warp_helpers::{
    bad_request, db_error, json_body, load_user, not_found, validation_rejection, with_config,
    with_db, with_optional_user_id, with_store, with_user_id,
};

const POPULAR_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct AlbumDetail {
    #[serde(flatten)]
    pub album: Album,
    pub photo_count: usize,
    pub photos: Vec<Photo>,
    pub pages: Vec<PageWithPhotos>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyTemplateRequest {
    pub template_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub(crate) async fn find_album(db_pool: &DbPool, id: i64) -> Result<Album, Rejection> {
    Album::get_by_id(db_pool, id)
        .await
        .map_err(db_error("Failed to load album"))?
        .ok_or_else(|| not_found("Album not found"))
}

/// Loads an album the caller owns. Albums of other users are a 403.
pub(crate) async fn find_owned_album(
    db_pool: &DbPool,
    id: i64,
    user_id: i64,
) -> Result<Album, Rejection> {
    let album = find_album(db_pool, id).await?;
    check_owner(&album, user_id).map_err(validation_rejection)?;
    Ok(album)
}

/// Loads an album the caller may look at. Private albums of others are hidden.
pub(crate) async fn find_visible_album(
    db_pool: &DbPool,
    id: i64,
    user_id: Option<i64>,
) -> Result<Album, Rejection> {
    let album = find_album(db_pool, id).await?;
    if album.is_public || Some(album.user_id) == user_id {
        Ok(album)
    } else {
        Err(not_found("Album not found"))
    }
}

/// Album with its photos and paged layout.
pub(crate) async fn album_detail(db_pool: &DbPool, album: Album) -> Result<AlbumDetail, Rejection> {
    let photos = Photo::list_for_album(db_pool, album.id)
        .await
        .map_err(db_error("Failed to list photos"))?;
    let pages = AlbumPage::list_with_photos(db_pool, album.id)
        .await
        .map_err(db_error("Failed to list pages"))?;

    Ok(AlbumDetail {
        album,
        photo_count: photos.len(),
        photos,
        pages,
    })
}

async fn find_template(db_pool: &DbPool, id: i64) -> Result<AlbumTemplate, Rejection> {
    AlbumTemplate::get_by_id(db_pool, id)
        .await
        .map_err(db_error("Failed to load template"))?
        .ok_or_else(|| not_found("Template not found"))
}

pub async fn list_albums(user_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    let albums = Album::list_visible(&db_pool, user_id)
        .await
        .map_err(db_error("Failed to list albums"))?;
    Ok(warp::reply::json(&albums))
}

pub async fn create_album(
    user_id: i64,
    new_album: NewAlbum,
    db_pool: DbPool,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let user = load_user(&db_pool, user_id).await?;
    check_album_title(&new_album.title).map_err(validation_rejection)?;

    let existing = Album::count_for_user(&db_pool, user.id)
        .await
        .map_err(db_error("Failed to count albums"))?;
    check_album_quota(existing, &config.limits).map_err(validation_rejection)?;

    if let Some(template_id) = new_album.layout_template_id {
        let template = find_template(&db_pool, template_id).await?;
        check_template_access(&template, &user).map_err(validation_rejection)?;
    }

    // A brand new album has no photos to show yet
    if new_album.is_public {
        check_publishable(0, &config.limits).map_err(validation_rejection)?;
    }

    let album = Album::create(&db_pool, user.id, &new_album)
        .await
        .map_err(db_error("Failed to create album"))?;
    info!("User {} created album {}", user.id, album.id);

    Ok(warp::reply::with_status(
        warp::reply::json(&album),
        StatusCode::CREATED,
    ))
}

pub async fn get_album(
    id: i64,
    user_id: Option<i64>,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let mut album = find_visible_album(&db_pool, id, user_id).await?;

    if Some(album.user_id) != user_id {
        Album::increment_views(&db_pool, album.id)
            .await
            .map_err(db_error("Failed to count album view"))?;
        album.views_count += 1;
    }

    Ok(warp::reply::json(&album_detail(&db_pool, album).await?))
}

pub async fn update_album(
    id: i64,
    user_id: i64,
    update: AlbumUpdate,
    db_pool: DbPool,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, id, user_id).await?;

    if let Some(title) = &update.title {
        check_album_title(title).map_err(validation_rejection)?;
    }

    if let Some(template_id) = update.layout_template_id {
        let user = load_user(&db_pool, user_id).await?;
        let template = find_template(&db_pool, template_id).await?;
        check_template_access(&template, &user).map_err(validation_rejection)?;
    }

    if update.is_public == Some(true) && !album.is_public {
        let photo_count = Photo::count_for_album(&db_pool, album.id)
            .await
            .map_err(db_error("Failed to count photos"))?;
        check_publishable(photo_count, &config.limits).map_err(validation_rejection)?;
    }

    if let Some(cover_id) = update.cover_photo_id {
        let cover = Photo::get_by_id(&db_pool, cover_id)
            .await
            .map_err(db_error("Failed to load cover photo"))?;
        if !matches!(cover, Some(ref photo) if photo.album_id == album.id) {
            return Err(bad_request("Cover photo must belong to the album"));
        }
    }

    let updated = Album::update(&db_pool, album.id, &update)
        .await
        .map_err(db_error("Failed to update album"))?
        .ok_or_else(|| not_found("Album not found"))?;

    if update.layout_template_id.is_some() {
        AlbumPage::rebuild(&db_pool, &updated, config.limits.page_size)
            .await
            .map_err(db_error("Failed to rebuild album pages"))?;
    }

    Ok(warp::reply::json(&updated))
}

pub async fn delete_album(
    id: i64,
    user_id: i64,
    db_pool: DbPool,
    store: SharedStore,
) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, id, user_id).await?;

    let photo_keys: Vec<String> = Photo::list_for_album(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to list photos"))?
        .into_iter()
        .map(|photo| photo.storage_key)
        .collect();
    let collage_keys = Collage::storage_keys_for_album(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to list collages"))?;

    Album::delete(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to delete album"))?;

    remove_unused_files(&db_pool, store.as_ref(), &photo_keys).await;
    for key in &collage_keys {
        if let Err(e) = store.delete(key).await {
            log::warn!("Failed to delete collage file {}: {}", key, e);
        }
    }

    info!("Deleted album {} of user {}", album.id, user_id);
    Ok(warp::reply::json(&json!({ "success": true })))
}

pub async fn publish_album(
    id: i64,
    user_id: i64,
    db_pool: DbPool,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, id, user_id).await?;

    let photo_count = Photo::count_for_album(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to count photos"))?;
    check_publishable(photo_count, &config.limits).map_err(validation_rejection)?;

    let album = Album::set_public(&db_pool, album.id, true)
        .await
        .map_err(db_error("Failed to publish album"))?
        .ok_or_else(|| not_found("Album not found"))?;
    Ok(warp::reply::json(&album))
}

pub async fn unpublish_album(
    id: i64,
    user_id: i64,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, id, user_id).await?;

    let album = Album::set_public(&db_pool, album.id, false)
        .await
        .map_err(db_error("Failed to unpublish album"))?
        .ok_or_else(|| not_found("Album not found"))?;
    Ok(warp::reply::json(&album))
}

pub async fn apply_template(
    id: i64,
    user_id: i64,
    request: ApplyTemplateRequest,
    db_pool: DbPool,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, id, user_id).await?;

    let template_id = request
        .template_id
        .ok_or_else(|| bad_request("template_id required"))?;
    let template = find_template(&db_pool, template_id).await?;
    let user = load_user(&db_pool, user_id).await?;
    check_template_access(&template, &user).map_err(validation_rejection)?;

    let album = Album::set_template(&db_pool, album.id, template.id)
        .await
        .map_err(db_error("Failed to apply template"))?
        .ok_or_else(|| not_found("Album not found"))?;

    AlbumPage::rebuild(&db_pool, &album, config.limits.page_size)
        .await
        .map_err(db_error("Failed to rebuild album pages"))?;

    info!("Applied template {} to album {}", template.name, album.id);
    Ok(warp::reply::json(&album))
}

/// Copies an album (own or public) into the caller's account.
pub async fn duplicate_album(
    id: i64,
    user_id: i64,
    db_pool: DbPool,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let user = load_user(&db_pool, user_id).await?;
    let source = find_visible_album(&db_pool, id, Some(user.id)).await?;

    let existing = Album::count_for_user(&db_pool, user.id)
        .await
        .map_err(db_error("Failed to count albums"))?;
    check_album_quota(existing, &config.limits).map_err(validation_rejection)?;

    let photo_count = Photo::count_for_album(&db_pool, source.id)
        .await
        .map_err(db_error("Failed to count photos"))?;
    if photo_count > config.limits.max_photos_per_album {
        return Err(bad_request("Album has too many photos to duplicate"));
    }

    // Premium layouts do not travel to accounts that cannot use them
    if let Some(template_id) = source.layout_template_id {
        if let Some(template) = AlbumTemplate::get_by_id(&db_pool, template_id)
            .await
            .map_err(db_error("Failed to load template"))?
        {
            check_template_access(&template, &user).map_err(validation_rejection)?;
        }
    }

    let copy = Album::duplicate(&db_pool, source.id, user.id)
        .await
        .map_err(db_error("Failed to duplicate album"))?
        .ok_or_else(|| not_found("Album not found"))?;

    AlbumPage::rebuild(&db_pool, &copy, config.limits.page_size)
        .await
        .map_err(db_error("Failed to rebuild album pages"))?;

    info!("Duplicated album {} into {}", source.id, copy.id);
    Ok(warp::reply::with_status(
        warp::reply::json(&copy),
        StatusCode::CREATED,
    ))
}

pub async fn share_album(id: i64, user_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, id, user_id).await?;

    let token = new_share_token();
    Album::set_share_token(&db_pool, album.id, &token)
        .await
        .map_err(db_error("Failed to store share token"))?;

    Ok(warp::reply::json(&json!({
        "share_token": token,
        "url": format!("/s/album/{}", token)
    })))
}

pub async fn popular_albums(
    db_pool: DbPool,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let albums = Album::popular(&db_pool, config.limits.min_photos_to_publish, POPULAR_LIMIT)
        .await
        .map_err(db_error("Failed to list popular albums"))?;
    Ok(warp::reply::json(&albums))
}

pub async fn user_stats(user_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    let user = load_user(&db_pool, user_id).await?;
    let stats = Album::stats_for_user(&db_pool, &user)
        .await
        .map_err(db_error("Failed to compute stats"))?;
    Ok(warp::reply::json(&stats))
}

pub async fn search_albums(
    user_id: i64,
    query: SearchQuery,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    if query.q.trim().is_empty() {
        return Err(bad_request("Search query must not be empty"));
    }
    let albums = Album::search(&db_pool, user_id, &query.q)
        .await
        .map_err(db_error("Failed to search albums"))?;
    Ok(warp::reply::json(&albums))
}

pub async fn list_pages(
    id: i64,
    user_id: Option<i64>,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let album = find_visible_album(&db_pool, id, user_id).await?;
    let pages = AlbumPage::list_with_photos(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to list pages"))?;
    Ok(warp::reply::json(&pages))
}

pub fn build_album_routes(
    db_pool: DbPool,
    store: SharedStore,
    config: Arc<Config>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "albums")
        .and(warp::get())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(list_albums);

    let create = warp::path!("api" / "albums")
        .and(warp::post())
        .and(with_user_id())
        .and(json_body())
        .and(with_db(db_pool.clone()))
        .and(with_config(config.clone()))
        .and_then(create_album);

    let popular = warp::path!("api" / "albums" / "popular")
        .and(warp::get())
        .and(with_db(db_pool.clone()))
        .and(with_config(config.clone()))
        .and_then(popular_albums);

    let stats = warp::path!("api" / "albums" / "stats")
        .and(warp::get())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(user_stats);

    let search = warp::path!("api" / "albums" / "search")
        .and(warp::get())
        .and(with_user_id())
        .and(warp::query::<SearchQuery>())
        .and(with_db(db_pool.clone()))
        .and_then(search_albums);

    let get = warp::path!("api" / "albums" / i64)
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(get_album);

    let update = warp::path!("api" / "albums" / i64)
        .and(warp::put())
        .and(with_user_id())
        .and(json_body())
        .and(with_db(db_pool.clone()))
        .and(with_config(config.clone()))
        .and_then(update_album);

    let delete = warp::path!("api" / "albums" / i64)
        .and(warp::delete())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and(with_store(store))
        .and_then(delete_album);

    let publish = warp::path!("api" / "albums" / i64 / "publish")
        .and(warp::post())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and(with_config(config.clone()))
        .and_then(publish_album);

    let unpublish = warp::path!("api" / "albums" / i64 / "unpublish")
        .and(warp::post())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(unpublish_album);

    let template = warp::path!("api" / "albums" / i64 / "apply_template")
        .and(warp::post())
        .and(with_user_id())
        .and(json_body())
        .and(with_db(db_pool.clone()))
        .and(with_config(config.clone()))
        .and_then(apply_template);

    let duplicate = warp::path!("api" / "albums" / i64 / "duplicate")
        .and(warp::post())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and(with_config(config))
        .and_then(duplicate_album);

    let share = warp::path!("api" / "albums" / i64 / "share")
        .and(warp::post())
        .and(with_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(share_album);

    let pages = warp::path!("api" / "albums" / i64 / "pages")
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool))
        .and_then(list_pages);

    list.or(create)
        .or(popular)
        .or(stats)
        .or(search)
        .or(get)
        .or(update)
        .or(delete)
        .or(publish)
        .or(unpublish)
        .or(template)
        .or(duplicate)
        .or(share)
        .or(pages)
}
