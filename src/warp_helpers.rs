use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

use warp::http::StatusCode;
use warp::{reject, Filter, Rejection, Reply};

use crate::config::Config;
use crate::db::{DbPool, User};
use crate::error_reporter::ErrorReporter;
use crate::media_store::SharedStore;
use crate::validators;

pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct DatabaseError {
    pub message: String,
}

impl reject::Reject for DatabaseError {}

#[derive(Debug)]
pub struct NotFoundError {
    pub message: String,
}

impl reject::Reject for NotFoundError {}

#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
}

impl reject::Reject for ValidationError {}

#[derive(Debug)]
pub struct ForbiddenError {
    pub message: String,
}

impl reject::Reject for ForbiddenError {}

#[derive(Debug)]
pub struct UnauthorizedError;
impl reject::Reject for UnauthorizedError {}

/// Unexpected failure; reported as a bug before the 500 goes out.
#[derive(Debug)]
pub struct ServerError {
    pub context: String,
    pub message: String,
}

impl reject::Reject for ServerError {}

pub fn not_found(message: impl Into<String>) -> Rejection {
    reject::custom(NotFoundError {
        message: message.into(),
    })
}

pub fn bad_request(message: impl Into<String>) -> Rejection {
    reject::custom(ValidationError {
        message: message.into(),
    })
}

pub fn server_error(context: &str, err: impl std::fmt::Display) -> Rejection {
    log::error!("{}: {}", context, err);
    reject::custom(ServerError {
        context: context.to_string(),
        message: err.to_string(),
    })
}

/// Rewords a 404 for the entity actually requested. Other rejections pass through.
pub fn rename_not_found(message: &'static str) -> impl FnOnce(Rejection) -> Rejection {
    move |err| {
        if err.find::<NotFoundError>().is_some() {
            not_found(message)
        } else {
            err
        }
    }
}

/// `.map_err(db_error("Failed to load album"))`
pub fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> Rejection {
    move |e| {
        log::error!("{}: {}", context, e);
        reject::custom(DatabaseError {
            message: format!("{}: {}", context, e),
        })
    }
}

pub fn validation_rejection(err: validators::ValidationError) -> Rejection {
    if err.is_forbidden() {
        reject::custom(ForbiddenError {
            message: err.to_string(),
        })
    } else {
        bad_request(err.to_string())
    }
}

pub fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(64 * 1024).and(warp::body::json())
}

pub fn with_db(db_pool: DbPool) -> impl Filter<Extract = (DbPool,), Error = Infallible> + Clone {
    warp::any().map(move || db_pool.clone())
}

pub fn with_store(
    store: SharedStore,
) -> impl Filter<Extract = (SharedStore,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

pub fn with_config(
    config: Arc<Config>,
) -> impl Filter<Extract = (Arc<Config>,), Error = Infallible> + Clone {
    warp::any().map(move || config.clone())
}

/// Caller id from the trusted `x-user-id` header; missing or malformed is a 401.
pub fn with_user_id() -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    warp::header::<i64>(USER_HEADER)
}

pub fn with_optional_user_id(
) -> impl Filter<Extract = (Option<i64>,), Error = Rejection> + Clone {
    warp::header::optional::<i64>(USER_HEADER)
}

pub async fn load_user(db_pool: &DbPool, user_id: i64) -> Result<User, Rejection> {
    User::get_by_id(db_pool, user_id)
        .await
        .map_err(db_error("Failed to load user"))?
        .ok_or_else(|| reject::custom(UnauthorizedError))
}

pub async fn handle_rejection(
    err: Rejection,
    reporter: ErrorReporter,
) -> Result<impl Reply, Infallible> {
    let code;
    let message;
    let timestamp = chrono::Utc::now().to_rfc3339();

    if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if let Some(database_error) = err.find::<DatabaseError>() {
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Database error".to_string();
        reporter
            .report(
                &format!("Auto-Report: DatabaseError: {}", database_error.message),
                &database_error.message,
                None,
            )
            .await;
    } else if let Some(server_error) = err.find::<ServerError>() {
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = server_error.context.clone();
        reporter
            .report(
                &format!(
                    "Auto-Report: {}: {}",
                    server_error.context, server_error.message
                ),
                &format!(
                    "Context: {}\nError: {}",
                    server_error.context, server_error.message
                ),
                None,
            )
            .await;
    } else if let Some(not_found) = err.find::<NotFoundError>() {
        code = StatusCode::NOT_FOUND;
        message = not_found.message.clone();
    } else if let Some(validation_error) = err.find::<ValidationError>() {
        code = StatusCode::BAD_REQUEST;
        message = validation_error.message.clone();
    } else if let Some(forbidden) = err.find::<ForbiddenError>() {
        code = StatusCode::FORBIDDEN;
        message = forbidden.message.clone();
    } else if err.find::<UnauthorizedError>().is_some()
        || err.find::<warp::reject::MissingHeader>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
    {
        code = StatusCode::UNAUTHORIZED;
        message = format!("A valid {} header is required", USER_HEADER);
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        code = StatusCode::BAD_REQUEST;
        message = format!("Invalid request body: {}", e);
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        code = StatusCode::BAD_REQUEST;
        message = "Invalid query string".to_string();
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        code = StatusCode::PAYLOAD_TOO_LARGE;
        message = "Payload too large".to_string();
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        code = StatusCode::LENGTH_REQUIRED;
        message = "Content-Length required".to_string();
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        code = StatusCode::UNSUPPORTED_MEDIA_TYPE;
        message = "Unsupported media type".to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed".to_string();
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
        reporter
            .report(
                "Auto-Report: Unhandled rejection",
                &format!("{:?}", err),
                None,
            )
            .await;
    }

    let error_response = ErrorResponse {
        error: message,
        code: code.as_u16(),
        timestamp,
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&error_response),
        code,
    ))
}

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization", USER_HEADER])
        .allow_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
}
