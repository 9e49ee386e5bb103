use log::info;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::db::{DbPool, NewUser, User};
use crate::validators::{check_email, check_username};
use crate::warp_helpers::{bad_request, db_error, json_body, validation_rejection, with_db};

pub async fn register_user(new_user: NewUser, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    check_username(&new_user.username).map_err(validation_rejection)?;
    check_email(&new_user.email).map_err(validation_rejection)?;

    let new_user = NewUser {
        username: new_user.username.trim().to_string(),
        email: new_user.email.trim().to_lowercase(),
        ..new_user
    };

    if let Some(field) = User::find_conflict(&db_pool, &new_user.username, &new_user.email)
        .await
        .map_err(db_error("Failed to check user uniqueness"))?
    {
        return Err(bad_request(format!("A user with this {} already exists", field)));
    }

    let user = User::create(&db_pool, &new_user)
        .await
        .map_err(db_error("Failed to create user"))?;
    info!("Registered user {} ({})", user.id, user.username);

    Ok(warp::reply::with_status(
        warp::reply::json(&user),
        StatusCode::CREATED,
    ))
}

pub fn build_user_routes(
    db_pool: DbPool,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "users")
        .and(warp::post())
        .and(json_body())
        .and(with_db(db_pool))
        .and_then(register_user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_in_memory_pool;
    use crate::warp_helpers::ValidationError;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            is_premium: false,
            is_staff: false,
        }
    }

    #[tokio::test]
    async fn test_register_and_reject_duplicates() {
        let pool = create_in_memory_pool().await.unwrap();

        let response = register_user(new_user("alice", "Alice@Example.com"), pool.clone())
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let err = register_user(new_user("alice", "other@example.com"), pool.clone())
            .await
            .err()
            .unwrap();
        assert!(err.find::<ValidationError>().is_some());

        // Emails are compared case-insensitively
        let err = register_user(new_user("bob", "alice@example.com"), pool.clone())
            .await
            .err()
            .unwrap();
        assert!(err.find::<ValidationError>().is_some());
    }

    #[tokio::test]
    async fn test_register_validates_fields() {
        let pool = create_in_memory_pool().await.unwrap();

        let err = register_user(new_user("", "a@b.c"), pool.clone())
            .await
            .err()
            .unwrap();
        assert!(err.find::<ValidationError>().is_some());

        let err = register_user(new_user("carol", "no-at-sign"), pool)
            .await
            .err()
            .unwrap();
        assert!(err.find::<ValidationError>().is_some());
    }
}
