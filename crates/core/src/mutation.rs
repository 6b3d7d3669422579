use serde::{Deserialize, Serialize};

use crate::entry::{Field, FieldValue, TagSet};
use crate::error::ValidationError;
use crate::ids::ImageKey;

/// A user edit to one field of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    AddTags { image: ImageKey, tags: Vec<String> },
    RemoveTags { image: ImageKey, tags: Vec<String> },
    SetTags { image: ImageKey, tags: Vec<String> },
    /// `None` clears the custom filename.
    SetFilename { image: ImageKey, name: Option<String> },
}

impl Mutation {
    pub fn add_tags<I, S>(image: ImageKey, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AddTags {
            image,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn remove_tags<I, S>(image: ImageKey, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::RemoveTags {
            image,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn set_tags<I, S>(image: ImageKey, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SetTags {
            image,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn set_filename(image: ImageKey, name: Option<impl Into<String>>) -> Self {
        Self::SetFilename {
            image,
            name: name.map(Into::into),
        }
    }

    pub fn image(&self) -> &ImageKey {
        match self {
            Self::AddTags { image, .. }
            | Self::RemoveTags { image, .. }
            | Self::SetTags { image, .. }
            | Self::SetFilename { image, .. } => image,
        }
    }

    pub fn field(&self) -> Field {
        match self {
            Self::AddTags { .. } | Self::RemoveTags { .. } | Self::SetTags { .. } => Field::Tags,
            Self::SetFilename { .. } => Field::CustomFilename,
        }
    }

    /// Compute the field's new value from its current one.
    ///
    /// Adding a present tag or removing an absent one yields `current` unchanged.
    pub fn resolve(&self, current: &FieldValue) -> Result<FieldValue, ValidationError> {
        match (self, current) {
            (Self::AddTags { tags, .. }, FieldValue::Tags(existing)) => {
                let mut next = existing.clone();
                next.extend(normalize_tags(tags)?);
                Ok(FieldValue::Tags(next))
            }
            (Self::RemoveTags { tags, .. }, FieldValue::Tags(existing)) => {
                let remove = normalize_tags(tags)?;
                Ok(FieldValue::Tags(
                    existing.difference(&remove).cloned().collect(),
                ))
            }
            (Self::SetTags { tags, .. }, FieldValue::Tags(_)) => {
                Ok(FieldValue::Tags(normalize_tags(tags)?))
            }
            (Self::SetFilename { name, .. }, FieldValue::Filename(_)) => {
                let name = name.as_deref().map(validate_filename).transpose()?;
                Ok(FieldValue::Filename(name))
            }
            _ => Err(ValidationError::InvalidField(current.field().to_string())),
        }
    }
}

pub fn normalize_tag(tag: &str) -> Result<String, ValidationError> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidTag(tag.to_string()));
    }
    Ok(trimmed.to_string())
}

fn normalize_tags(tags: &[String]) -> Result<TagSet, ValidationError> {
    tags.iter().map(|t| normalize_tag(t)).collect()
}

fn validate_filename(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
        return Err(ValidationError::InvalidFilename(name.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ImageKey {
        ImageKey::new("img1.jpg").unwrap()
    }

    fn tags(items: &[&str]) -> FieldValue {
        FieldValue::Tags(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn add_existing_tag_is_noop() {
        let m = Mutation::add_tags(key(), ["beach"]);
        assert_eq!(m.resolve(&tags(&["beach"])).unwrap(), tags(&["beach"]));
    }

    #[test]
    fn remove_absent_tag_is_noop() {
        let m = Mutation::remove_tags(key(), ["sunset"]);
        assert_eq!(m.resolve(&tags(&["beach"])).unwrap(), tags(&["beach"]));
    }

    #[test]
    fn tags_are_trimmed() {
        let m = Mutation::add_tags(key(), ["  sunset "]);
        assert_eq!(m.resolve(&tags(&[])).unwrap(), tags(&["sunset"]));
    }

    #[test]
    fn blank_tag_rejected() {
        let m = Mutation::set_tags(key(), ["ok", "   "]);
        assert_eq!(
            m.resolve(&tags(&[])),
            Err(ValidationError::InvalidTag("   ".into()))
        );
    }

    #[test]
    fn filename_rules() {
        let current = FieldValue::Filename(None);
        assert_eq!(
            Mutation::set_filename(key(), Some("holiday")).resolve(&current),
            Ok(FieldValue::Filename(Some("holiday".into())))
        );
        assert!(matches!(
            Mutation::set_filename(key(), Some("a/b")).resolve(&current),
            Err(ValidationError::InvalidFilename(_))
        ));
        assert!(matches!(
            Mutation::set_filename(key(), Some(" ")).resolve(&current),
            Err(ValidationError::InvalidFilename(_))
        ));
        assert_eq!(
            Mutation::set_filename(key(), None::<String>).resolve(&FieldValue::Filename(Some("x".into()))),
            Ok(FieldValue::Filename(None))
        );
    }

    #[test]
    fn field_mismatch_rejected() {
        let m = Mutation::add_tags(key(), ["beach"]);
        assert!(m.resolve(&FieldValue::Filename(None)).is_err());
    }
}
