//! Bucket naming and bucket-qualified object keys.
//!
//! Every user owns exactly one bucket, `user-<id>-bucket`. Registry documents
//! and link metadata refer to objects by their qualified key
//! `<bucket>/<path>`, which can always be parsed back into the owning user and
//! the path inside that user's bucket.

use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

const BUCKET_PREFIX: &str = "user-";
const BUCKET_SUFFIX: &str = "-bucket";

/// Longest bucket name the local store can hold as a partition.
pub const MAX_BUCKET_NAME_LEN: usize = 255;

/// Returns the bucket owned by `user_id`.
pub fn bucket_name(user_id: &str) -> String {
    format!("{BUCKET_PREFIX}{user_id}{BUCKET_SUFFIX}")
}

/// Inverse of [`bucket_name`].
pub fn user_from_bucket(bucket: &str) -> Option<&str> {
    bucket
        .strip_prefix(BUCKET_PREFIX)?
        .strip_suffix(BUCKET_SUFFIX)
        .filter(|user| !user.is_empty())
}

pub fn validate_user_id(user_id: &str) -> Result<(), StoreError> {
    if user_id.is_empty() {
        return Err(StoreError::Validation("user id is empty".into()));
    }
    if let Some(c) = user_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(StoreError::Validation(format!(
            "user id '{user_id}' contains invalid character '{c}'"
        )));
    }
    if bucket_name(user_id).len() > MAX_BUCKET_NAME_LEN {
        return Err(StoreError::Validation(format!(
            "user id is {} bytes, at most {} are allowed",
            user_id.len(),
            MAX_BUCKET_NAME_LEN - BUCKET_PREFIX.len() - BUCKET_SUFFIX.len()
        )));
    }
    Ok(())
}

/// Validates a file path inside a bucket.
pub fn validate_file_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() {
        return Err(StoreError::Validation("path is empty".into()));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(StoreError::Validation(format!(
            "path '{path}' must not start or end with '/'"
        )));
    }
    for segment in path.split('/') {
        match segment {
            "" => {
                return Err(StoreError::Validation(format!(
                    "path '{path}' contains an empty segment"
                )))
            }
            "." | ".." => {
                return Err(StoreError::Validation(format!(
                    "path '{path}' contains a relative segment"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Normalizes a folder path: strips a trailing `/`, keeps `""` as the root.
pub fn normalize_folder_path(path: &str) -> Result<String, StoreError> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    validate_file_path(trimmed)?;
    Ok(trimmed.to_string())
}

/// Listing prefix for the children of `folder`.
pub fn folder_prefix(folder: &str) -> String {
    if folder.is_empty() {
        String::new()
    } else {
        format!("{folder}/")
    }
}

/// Splits a file path into `(folder_path, filename)`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((folder, name)) => (folder, name),
        None => ("", path),
    }
}

/// Extension after the last `.` of the filename, or `"unknown"`.
pub fn file_type(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_string(),
        _ => "unknown".to_string(),
    }
}

/// A bucket-qualified object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub bucket: String,
    pub path: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Key of `path` inside `user_id`'s bucket.
    pub fn for_user(user_id: &str, path: &str) -> Self {
        Self::new(bucket_name(user_id), path)
    }

    /// Owner of the bucket this key lives in.
    pub fn user_id(&self) -> Result<&str, StoreError> {
        user_from_bucket(&self.bucket).ok_or_else(|| {
            StoreError::Validation(format!("'{}' is not a user bucket", self.bucket))
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

impl FromStr for ObjectKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((bucket, path)) if !bucket.is_empty() && !path.is_empty() => {
                Ok(Self::new(bucket, path))
            }
            _ => Err(StoreError::Validation(format!(
                "'{s}' is not a bucket-qualified key"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_round_trips() {
        assert_eq!(bucket_name("alice"), "user-alice-bucket");
        assert_eq!(user_from_bucket("user-alice-bucket"), Some("alice"));
        assert_eq!(user_from_bucket(&bucket_name("mary-jane")), Some("mary-jane"));
        assert_eq!(user_from_bucket("user--bucket"), None);
        assert_eq!(user_from_bucket("other"), None);
    }

    #[test]
    fn object_key_parses_at_first_slash() {
        let key: ObjectKey = "user-bob-bucket/a/b/c.txt".parse().unwrap();
        assert_eq!(key.bucket, "user-bob-bucket");
        assert_eq!(key.path, "a/b/c.txt");
        assert_eq!(key.user_id().unwrap(), "bob");
        assert_eq!(key.to_string(), "user-bob-bucket/a/b/c.txt");
        assert!("no-slash".parse::<ObjectKey>().is_err());
        assert!("bucket/".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn path_validation() {
        assert!(validate_file_path("a/b.txt").is_ok());
        assert!(validate_file_path("").is_err());
        assert!(validate_file_path("/a").is_err());
        assert!(validate_file_path("a/").is_err());
        assert!(validate_file_path("a//b").is_err());
        assert!(validate_file_path("a/../b").is_err());
    }

    #[test]
    fn user_id_validation() {
        assert!(validate_user_id("alice_01.x-y").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("a/b").is_err());
    }

    #[test]
    fn user_id_length_is_bounded_by_bucket_name() {
        let longest = "u".repeat(MAX_BUCKET_NAME_LEN - "user--bucket".len());
        assert!(validate_user_id(&longest).is_ok());
        assert_eq!(bucket_name(&longest).len(), MAX_BUCKET_NAME_LEN);

        let too_long = format!("{longest}u");
        assert!(matches!(
            validate_user_id(&too_long),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            validate_user_id(&"u".repeat(300)),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn folder_normalization() {
        assert_eq!(normalize_folder_path("").unwrap(), "");
        assert_eq!(normalize_folder_path("/").unwrap(), "");
        assert_eq!(normalize_folder_path("a/b/").unwrap(), "a/b");
        assert_eq!(folder_prefix("a/b"), "a/b/");
        assert_eq!(folder_prefix(""), "");
    }

    #[test]
    fn split_and_type() {
        assert_eq!(split_path("a/b/c.tar.gz"), ("a/b", "c.tar.gz"));
        assert_eq!(split_path("c"), ("", "c"));
        assert_eq!(file_type("c.tar.gz"), "gz");
        assert_eq!(file_type("README"), "unknown");
        assert_eq!(file_type("trailing."), "unknown");
    }
}
