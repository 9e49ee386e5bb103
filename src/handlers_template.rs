use warp::{Filter, Rejection, Reply};

use crate::db::{AlbumTemplate, DbPool, User};
use crate::warp_helpers::{db_error, with_db, with_optional_user_id};

/// Templates the caller can apply: all of them for premium users and staff.
pub async fn list_templates(
    user_id: Option<i64>,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let include_premium = match user_id {
        Some(id) => User::get_by_id(&db_pool, id)
            .await
            .map_err(db_error("Failed to load user"))?
            .is_some_and(|user| user.can_use_premium()),
        None => false,
    };

    let templates = AlbumTemplate::list_available(&db_pool, include_premium)
        .await
        .map_err(db_error("Failed to list templates"))?;

    Ok(warp::reply::json(&templates))
}

/// Stylesheet of a template. Unknown ids yield an empty stylesheet.
pub async fn get_template_css(id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    let css = AlbumTemplate::get_by_id(&db_pool, id)
        .await
        .map_err(db_error("Failed to load template"))?
        .map(|template| template.css_styles)
        .unwrap_or_default();

    Ok(warp::reply::with_header(
        css,
        "content-type",
        "text/css; charset=utf-8",
    ))
}

pub fn build_template_routes(
    db_pool: DbPool,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "templates")
        .and(warp::get())
        .and(with_optional_user_id())
        .and(with_db(db_pool.clone()))
        .and_then(list_templates);

    let css = warp::path!("api" / "templates" / i64 / "css")
        .and(warp::get())
        .and(with_db(db_pool))
        .and_then(get_template_css);

    list.or(css)
}
