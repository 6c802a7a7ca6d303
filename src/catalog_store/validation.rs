//! Field validation for catalog entities, applied before any write.

use chrono::NaiveDate;

use super::models::SongFields;
use crate::error::ApiError;

pub const MAX_NAME_LENGTH: usize = 50;
pub const MAX_THUMBNAIL_LENGTH: usize = 400;

/// Non-blank and at most [`MAX_NAME_LENGTH`] characters.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{} is required", field)));
    }
    if value.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::validation(format!(
            "{} must be at most {} characters",
            field, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_thumbnail(thumbnail: Option<&str>) -> Result<(), ApiError> {
    if let Some(thumbnail) = thumbnail {
        if thumbnail.chars().count() > MAX_THUMBNAIL_LENGTH {
            return Err(ApiError::validation(format!(
                "thumbnail must be at most {} characters",
                MAX_THUMBNAIL_LENGTH
            )));
        }
    }
    Ok(())
}

/// Accepts an ISO date (YYYY-MM-DD); empty strings count as absent.
pub fn validate_release_date(release_date: Option<&str>) -> Result<Option<String>, ApiError> {
    match release_date {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(date) => Ok(Some(date.to_string())),
            Err(_) => Err(ApiError::validation(
                "release_date must be a date in YYYY-MM-DD format",
            )),
        },
    }
}

pub fn validate_song_fields(fields: &SongFields) -> Result<(), ApiError> {
    validate_name("title", &fields.title)?;
    if fields.duration < 0 {
        return Err(ApiError::validation("duration must be non-negative"));
    }
    for (field, value) in [
        ("url", &fields.url),
        ("source", &fields.source),
        ("source_id", &fields.source_id),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::validation(format!("{} is required", field)));
        }
    }
    validate_thumbnail(fields.thumbnail.as_deref())
}
