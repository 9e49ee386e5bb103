use serde_json::json;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use crate::db::DbPool;
use crate::warp_helpers::with_db;

pub async fn health_check(db_pool: DbPool) -> Result<impl Reply, Infallible> {
    // A round trip proves the pool can hand out a working connection
    match sqlx::query("SELECT 1").execute(&db_pool).await {
        Ok(_) => Ok(warp::reply::with_status(
            warp::reply::json(&json!({
                "status": "healthy",
                "database": "connected",
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
            StatusCode::OK,
        )),
        Err(e) => {
            log::error!("Database connection failed: {}", e);
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({
                    "status": "unhealthy",
                    "database": "unreachable",
                    "timestamp": chrono::Utc::now().to_rfc3339()
                })),
                StatusCode::SERVICE_UNAVAILABLE,
            ))
        }
    }
}

pub fn build_health_routes(
    db_pool: DbPool,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_db(db_pool))
        .and_then(health_check)
}
