use crate::model::Id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Validation failures keyed by dotted field path (e.g. `comments.0.comment`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.entry(path.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failing fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, path: &str) -> Option<&[String]> {
        self.0.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (path, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{}: {}", path, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// User input failed validation; nothing was written
    #[error("The given data was invalid: {0}")]
    Validation(ValidationErrors),

    /// A key in the payload does not resolve to a stored row
    #[error("{entity_type} #{id} referenced by '{path}' does not exist")]
    NotFound {
        path: String,
        entity_type: String,
        id: Id,
    },

    /// Schema or programmer error; never user-correctable
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            SyncError::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    /// Fold a `NotFound` into the user-facing validation channel.
    pub fn into_user_facing(self) -> Self {
        match self {
            SyncError::NotFound { path, .. } => {
                let mut errors = ValidationErrors::new();
                errors.add(path.clone(), format!("The selected {} is invalid.", path));
                SyncError::Validation(errors)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_collects_per_path() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "The title field is required.");
        errors.add("comments.0.comment", "The comments.0.comment field is required.");
        errors.add("title", "The title must be a string.");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("title").map(|m| m.len()), Some(2));
        assert!(errors.contains("comments.0.comment"));

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json["comments.0.comment"][0],
            "The comments.0.comment field is required."
        );
    }

    #[test]
    fn test_not_found_becomes_validation_error() {
        let error = SyncError::NotFound {
            path: "image.imageable.id".to_string(),
            entity_type: "post".to_string(),
            id: 42,
        }
        .into_user_facing();

        let errors = error.validation_errors().expect("validation error");
        assert_eq!(
            errors.get("image.imageable.id").unwrap()[0],
            "The selected image.imageable.id is invalid."
        );
    }

    #[test]
    fn test_configuration_error_stays_fatal() {
        let error = SyncError::configuration("bad relation").into_user_facing();
        assert!(matches!(error, SyncError::Configuration(_)));
        assert!(error.validation_errors().is_none());
    }
}
