use warp::{Filter, Rejection, Reply};

use crate::db::{Album, DbPool, Photo};
use crate::handlers_album::album_detail;
use crate::share_tokens::is_valid_share_token;
use crate::warp_helpers::{db_error, not_found, with_db};

/// Album behind a share link. Works for private albums too; the token is the grant.
pub async fn shared_album(token: String, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    if !is_valid_share_token(&token) {
        return Err(not_found("Shared album not found"));
    }

    let mut album = Album::get_by_share_token(&db_pool, &token)
        .await
        .map_err(db_error("Failed to load shared album"))?
        .ok_or_else(|| not_found("Shared album not found"))?;

    Album::increment_views(&db_pool, album.id)
        .await
        .map_err(db_error("Failed to count album view"))?;
    album.views_count += 1;

    Ok(warp::reply::json(&album_detail(&db_pool, album).await?))
}

pub async fn shared_photo(token: String, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    if !is_valid_share_token(&token) {
        return Err(not_found("Shared photo not found"));
    }

    let photo = Photo::get_by_share_token(&db_pool, &token)
        .await
        .map_err(db_error("Failed to load shared photo"))?
        .ok_or_else(|| not_found("Shared photo not found"))?;

    Ok(warp::reply::json(&photo))
}

pub fn build_share_routes(
    db_pool: DbPool,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let album = warp::path!("s" / "album" / String)
        .and(warp::get())
        .and(with_db(db_pool.clone()))
        .and_then(shared_album);

    let photo = warp::path!("s" / "photo" / String)
        .and(warp::get())
        .and(with_db(db_pool))
        .and_then(shared_photo);

    album.or(photo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_in_memory_pool;
    use crate::db::test_support::{album, photo, user};
    use crate::share_tokens::new_share_token;
    use crate::warp_helpers::NotFoundError;

    #[tokio::test]
    async fn test_shared_album_is_reachable_while_private() {
        let pool = create_in_memory_pool().await.unwrap();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Secret").await;
        assert!(!album.is_public);

        let token = new_share_token();
        Album::set_share_token(&pool, album.id, &token).await.unwrap();

        assert!(shared_album(token, pool.clone()).await.is_ok());
        let reloaded = Album::get_by_id(&pool, album.id).await.unwrap().unwrap();
        assert_eq!(reloaded.views_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_tokens_are_not_found() {
        let pool = create_in_memory_pool().await.unwrap();

        let err = shared_album(new_share_token(), pool.clone())
            .await
            .err()
            .unwrap();
        assert!(err.find::<NotFoundError>().is_some());

        let err = shared_photo("../../etc".to_string(), pool.clone())
            .await
            .err()
            .unwrap();
        assert!(err.find::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_shared_photo_lookup() {
        let pool = create_in_memory_pool().await.unwrap();
        let owner = user(&pool, "alice", false).await;
        let album = album(&pool, owner.id, "Trip").await;
        let photo = photo(&pool, album.id, "photos/1/a.png").await;

        let token = new_share_token();
        Photo::set_share_token(&pool, photo.id, &token).await.unwrap();
        assert!(shared_photo(token, pool).await.is_ok());
    }
}
