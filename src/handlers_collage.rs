use log::info;
use serde::Deserialize;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::collage_generator::{
    generate_album_collage, Collage, CollageError, CollageFormat, CollageJobError,
};
use crate::config::Config;
use crate::db::DbPool;
use crate::handlers_album::{find_owned_album, find_visible_album};
use crate::media_store::SharedStore;
use crate::warp_helpers::{
    bad_request, db_error, not_found, rename_not_found, server_error, with_config, with_db,
    with_optional_user_id, with_store, with_user_id,
};

#[derive(Debug, Default, Deserialize)]
pub struct CollageQuery {
    pub cell_size: Option<u32>,
    pub format: Option<String>,
}

/// Composites the album's photos into a new collage.
pub async fn create_collage(
    album_id: i64,
    user_id: i64,
    query: CollageQuery,
    db_pool: DbPool,
    store: SharedStore,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let album = find_owned_album(&db_pool, album_id, user_id).await?;

    let cell_size = query.cell_size.unwrap_or(config.collage.cell_size);
    if cell_size > config.limits.max_collage_cell_size {
        return Err(bad_request(format!(
            "Cell size must be at most {}px",
            config.limits.max_collage_cell_size
        )));
    }
    let format = match query.format.as_deref() {
        Some(raw) => raw
            .parse::<CollageFormat>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => config.collage.format,
    };

    info!(
        "Collage requested for album {} (cell {}px, {})",
        album.id, cell_size, format
    );

    let collage =
        match generate_album_collage(&db_pool, store.as_ref(), album.id, cell_size, format).await {
            Ok(Some(collage)) => collage,
            Ok(None) => return Err(bad_request("No photos to composite")),
            Err(CollageJobError::Database(e)) => {
                return Err(db_error("Failed to generate collage")(e))
            }
            Err(CollageJobError::Collage(
                e @ (CollageError::InvalidCellSize | CollageError::CanvasTooLarge { .. }),
            )) => return Err(bad_request(e.to_string())),
            Err(e) => return Err(server_error("Failed to generate collage", e)),
        };

    Ok(warp::reply::with_status(
        warp::reply::json(&collage),
        StatusCode::CREATED,
    ))
}

pub async fn list_collages(
    album_id: i64,
    user_id: Option<i64>,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let album = find_visible_album(&db_pool, album_id, user_id).await?;
    let collages = Collage::list_for_album(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to list collages"))?;
    Ok(warp::reply::json(&collages))
}

/// Get collage image file
pub async fn get_collage_image(
    id: i64,
    user_id: Option<i64>,
    db_pool: DbPool,
    store: SharedStore,
) -> Result<impl Reply, Rejection> {
    let collage = Collage::get_by_id(&db_pool, id)
        .await
        .map_err(db_error("Failed to load collage"))?
        .ok_or_else(|| not_found("Collage not found"))?;

    find_visible_album(&db_pool, collage.album_id, user_id)
        .await
        .map_err(rename_not_found("Collage not found"))?;

    let contents = store
        .load(&collage.storage_key)
        .await
        .map_err(|e| server_error("Failed to read collage file", e))?;

    let reply = warp::reply::with_header(contents, "content-type", collage.content_type());
    let reply = warp::reply::with_header(reply, "cache-control", "public, max-age=31536000");
    Ok(reply)
}

pub fn build_collage_routes(
    db_pool: DbPool,
    store: SharedStore,
    config: Arc<Config>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let create = warp::path!("api" / "albums" / i64 / "collage")
        .and(warp::post())
        .and(with_user_id())
        .and(warp::query::<CollageQuery>())
        .and(with_db(db_pool.clone()))
        .and(with_store(store.clone()))
        .and(with_config(config))
        .and_then(create_collage);

    let list = warp::path!("api" / "albums" / i64 / "collages")
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(list_collages);

    let image = warp::path!("api" / "collages" / i64 / "image")
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool))
        .and(with_store(store))
        .and_then(get_collage_image);

    create.or(list).or(image)
}
