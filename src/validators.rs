//! Business rules checked before anything is persisted.
//!
//! Every rule is a pure function over already-loaded values so the HTTP layer
//! can combine them freely and tests need no database.

use crate::config::Limits;
use crate::db::{Album, AlbumTemplate, User};
use crate::image_editor::{Adjustments, ADJUSTMENT_RANGE};

pub const MAX_TITLE_LENGTH: usize = 255;
pub const MAX_USERNAME_LENGTH: usize = 25;
pub const MAX_EMAIL_LENGTH: usize = 66;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Album limit reached: at most {max} albums per user")]
    AlbumQuotaExceeded { max: i64 },
    #[error("Photo limit reached: at most {max} photos per album")]
    PhotoQuotaExceeded { max: i64 },
    #[error("Template '{0}' is only available to premium users")]
    PremiumTemplate(String),
    #[error("An album needs at least {min} photos to be published ({actual} present)")]
    NotEnoughPhotos { min: i64, actual: i64 },
    #[error("You can only modify your own albums")]
    NotOwner,
    #[error("{field} must not be empty")]
    Blank { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{name} must be between -100 and 100 (got {value})")]
    AdjustmentOutOfRange { name: &'static str, value: i32 },
    #[error("Invalid email address")]
    InvalidEmail,
}

impl ValidationError {
    /// Ownership and premium gating are permission problems, the rest are bad input.
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            ValidationError::NotOwner | ValidationError::PremiumTemplate(_)
        )
    }
}

pub fn check_album_quota(existing: i64, limits: &Limits) -> Result<(), ValidationError> {
    if existing >= limits.max_albums_per_user {
        return Err(ValidationError::AlbumQuotaExceeded {
            max: limits.max_albums_per_user,
        });
    }
    Ok(())
}

pub fn check_template_access(template: &AlbumTemplate, user: &User) -> Result<(), ValidationError> {
    if template.is_premium && !user.can_use_premium() {
        return Err(ValidationError::PremiumTemplate(template.name.clone()));
    }
    Ok(())
}

pub fn check_photo_quota(existing: i64, limits: &Limits) -> Result<(), ValidationError> {
    if existing >= limits.max_photos_per_album {
        return Err(ValidationError::PhotoQuotaExceeded {
            max: limits.max_photos_per_album,
        });
    }
    Ok(())
}

pub fn check_publishable(photo_count: i64, limits: &Limits) -> Result<(), ValidationError> {
    if photo_count < limits.min_photos_to_publish {
        return Err(ValidationError::NotEnoughPhotos {
            min: limits.min_photos_to_publish,
            actual: photo_count,
        });
    }
    Ok(())
}

pub fn check_owner(album: &Album, user_id: i64) -> Result<(), ValidationError> {
    if album.user_id != user_id {
        return Err(ValidationError::NotOwner);
    }
    Ok(())
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Blank { field });
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

pub fn check_album_title(title: &str) -> Result<(), ValidationError> {
    check_text("title", title, MAX_TITLE_LENGTH)
}

pub fn check_adjustment(name: &'static str, value: i32) -> Result<(), ValidationError> {
    if !ADJUSTMENT_RANGE.contains(&value) {
        return Err(ValidationError::AdjustmentOutOfRange { name, value });
    }
    Ok(())
}

pub fn check_edit(adjustments: &Adjustments) -> Result<(), ValidationError> {
    check_adjustment("brightness", adjustments.brightness)?;
    check_adjustment("contrast", adjustments.contrast)?;
    check_adjustment("saturation", adjustments.saturation)
}

pub fn check_username(username: &str) -> Result<(), ValidationError> {
    check_text("username", username, MAX_USERNAME_LENGTH)
}

pub fn check_email(email: &str) -> Result<(), ValidationError> {
    check_text("email", email, MAX_EMAIL_LENGTH)?;

    let Some((local, domain)) = email.trim().split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}
