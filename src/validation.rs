use serde_json::Value;
use thiserror::Error;

use crate::models::{FileUpload, ImageKind};

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 5 * 1024 * 1024;
pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_LENGTH: usize = 50;
pub const MAX_PERSON_LENGTH: usize = 100;
pub const MAX_COMMENT_LENGTH: usize = 500;

/// A rejected piece of client input.
///
/// These are never retried and never logged as system failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file provided")]
    MissingFile,

    #[error("Too many files. Only one file is allowed.")]
    TooManyFiles,

    #[error("Only image files are allowed.")]
    NotAnImage,

    #[error("Invalid file type. Only JPEG, PNG, GIF, and WebP images are allowed.")]
    UnsupportedType,

    #[error("File size too large. Maximum size is {}MB.", .0 / (1024 * 1024))]
    FileTooLarge(usize),

    #[error("The uploaded file could not be decoded as an image.")]
    CorruptImage,

    #[error("Tags must be an array")]
    TagsNotArray,

    #[error("Invalid tags format")]
    InvalidTagsFormat,

    #[error("Maximum 20 tags allowed")]
    TooManyTags,

    #[error("All tags must be non-empty strings")]
    EmptyTag,

    #[error("Each tag must be less than 50 characters")]
    TagTooLong,

    #[error("Person name must be a string")]
    PersonNotString,

    #[error("Person name must be less than 100 characters")]
    PersonTooLong,

    #[error("Comment text is required")]
    EmptyComment,

    #[error("Comment must be less than 500 characters")]
    CommentTooLong,
}

/// Takes the single file of an upload, more than one is rejected.
pub fn single_file<T>(mut files: Vec<T>) -> Result<Option<T>, ValidationError> {
    if files.len() > 1 {
        return Err(ValidationError::TooManyFiles);
    }

    Ok(files.pop())
}

/// Checks the claimed type and the size of an uploaded file, returning
/// the resolved image kind.
pub fn validate_file(file: Option<&FileUpload>, max_size: usize) -> Result<ImageKind, ValidationError> {
    let file = file.ok_or(ValidationError::MissingFile)?;

    let mime: mime::Mime = file
        .content_type
        .parse()
        .map_err(|_| ValidationError::NotAnImage)?;

    if mime.type_() != mime::IMAGE {
        return Err(ValidationError::NotAnImage);
    }

    let kind = ImageKind::from_subtype(mime.subtype().as_str())
        .ok_or(ValidationError::UnsupportedType)?;

    if file.data.len() > max_size {
        return Err(ValidationError::FileTooLarge(max_size));
    }

    Ok(kind)
}

/// Parses and validates a tag list.
///
/// Tags may arrive either already structured as a JSON array or as
/// the serialized text of one (as multipart form fields do).
/// Null and empty text are treated as no tags given.
pub fn parse_tags(raw: &Value) -> Result<Option<Vec<String>>, ValidationError> {
    let parsed = match raw {
        Value::Null => return Ok(None),
        Value::String(text) if text.is_empty() => return Ok(None),
        Value::String(text) => serde_json::from_str::<Value>(text)
            .map_err(|_| ValidationError::InvalidTagsFormat)?,
        other => other.clone(),
    };

    let items = match parsed {
        Value::Array(items) => items,
        _ => return Err(ValidationError::TagsNotArray),
    };

    if items.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags);
    }

    let mut tags = Vec::with_capacity(items.len());
    for item in items {
        let tag = match item {
            Value::String(tag) if !tag.trim().is_empty() => tag,
            _ => return Err(ValidationError::EmptyTag),
        };

        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(ValidationError::TagTooLong);
        }

        tags.push(tag);
    }

    Ok(Some(tags))
}

/// Validates the free-text person field.
///
/// Returns `Some(None)` when the field was explicitly emptied.
pub fn parse_person(raw: &Value) -> Result<Option<Option<String>>, ValidationError> {
    match raw {
        Value::Null => Ok(None),
        Value::String(person) if person.is_empty() => Ok(Some(None)),
        Value::String(person) => {
            if person.chars().count() > MAX_PERSON_LENGTH {
                return Err(ValidationError::PersonTooLong);
            }
            Ok(Some(Some(person.clone())))
        },
        _ => Err(ValidationError::PersonNotString),
    }
}

pub fn validate_comment(text: &str) -> Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyComment);
    }

    if text.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ValidationError::CommentTooLong);
    }

    Ok(text.to_string())
}
