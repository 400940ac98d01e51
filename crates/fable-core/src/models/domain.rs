//! Typed domain models
//!
//! The application works with these structs; the sync engine works with the
//! generic [`EntityRecord`]. Each model converts both ways. Conversions keep
//! the sync bookkeeping (timestamps, flags) intact so a round trip never
//! perturbs conflict resolution.

use crate::error::{Error, Result};
use crate::models::{EntityId, EntityKind, EntityRecord};
use crate::remote::Value;

fn required_str(record: &EntityRecord, field: &str) -> Result<String> {
    record
        .fields
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} {} missing field {field}",
                record.kind, record.id
            ))
        })
}

fn optional_str(record: &EntityRecord, field: &str) -> Option<String> {
    record
        .fields
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn required_parent(record: &EntityRecord) -> Result<EntityId> {
    record.story_id.ok_or_else(|| {
        Error::InvalidInput(format!("{} {} has no parent story", record.kind, record.id))
    })
}

/// A story: the root entity every other kind hangs off
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub record: EntityRecord,
    pub title: String,
    pub premise: Option<String>,
}

impl Story {
    /// Create a new story for `user_id`
    #[must_use]
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        let record = EntityRecord::new(EntityKind::Story, user_id).with_field("title", &*title);
        Self {
            record,
            title,
            premise: None,
        }
    }

    /// Rebuild from a generic record
    pub fn from_record(record: EntityRecord) -> Result<Self> {
        let title = required_str(&record, "title")?;
        let premise = optional_str(&record, "premise");
        Ok(Self {
            record,
            title,
            premise,
        })
    }

    /// Flush the typed fields back into the generic record
    #[must_use]
    pub fn into_record(mut self) -> EntityRecord {
        self.record.fields.insert("title".into(), Value::from(self.title));
        self.record
            .fields
            .insert("premise".into(), Value::from(self.premise));
        self.record
    }
}

/// A character within a story
#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    pub record: EntityRecord,
    pub name: String,
    pub description: Option<String>,
}

impl Character {
    /// Create a new character under `story_id`
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        story_id: EntityId,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let record = EntityRecord::new(EntityKind::Character, user_id)
            .with_story(story_id)
            .with_field("name", &*name);
        Self {
            record,
            name,
            description: None,
        }
    }

    pub fn from_record(record: EntityRecord) -> Result<Self> {
        required_parent(&record)?;
        let name = required_str(&record, "name")?;
        let description = optional_str(&record, "description");
        Ok(Self {
            record,
            name,
            description,
        })
    }

    #[must_use]
    pub fn into_record(mut self) -> EntityRecord {
        self.record.fields.insert("name".into(), Value::from(self.name));
        self.record
            .fields
            .insert("description".into(), Value::from(self.description));
        self.record
    }
}

/// A scene within a story
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub record: EntityRecord,
    pub title: String,
    pub content: String,
}

impl Scene {
    /// Create a new scene under `story_id`
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        story_id: EntityId,
        title: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let record = EntityRecord::new(EntityKind::Scene, user_id)
            .with_story(story_id)
            .with_field("title", &*title)
            .with_field("content", "");
        Self {
            record,
            title,
            content: String::new(),
        }
    }

    pub fn from_record(record: EntityRecord) -> Result<Self> {
        required_parent(&record)?;
        let title = required_str(&record, "title")?;
        let content = optional_str(&record, "content").unwrap_or_default();
        Ok(Self {
            record,
            title,
            content,
        })
    }

    #[must_use]
    pub fn into_record(mut self) -> EntityRecord {
        self.record.fields.insert("title".into(), Value::from(self.title));
        self.record
            .fields
            .insert("content".into(), Value::from(self.content));
        self.record
    }
}

/// A short pitch/summary blurb attached to a story
#[derive(Debug, Clone, PartialEq)]
pub struct Blurb {
    pub record: EntityRecord,
    pub text: String,
}

impl Blurb {
    #[must_use]
    pub fn new(user_id: impl Into<String>, story_id: EntityId, text: impl Into<String>) -> Self {
        let text = text.into();
        let record = EntityRecord::new(EntityKind::Blurb, user_id)
            .with_story(story_id)
            .with_field("text", &*text);
        Self { record, text }
    }

    pub fn from_record(record: EntityRecord) -> Result<Self> {
        required_parent(&record)?;
        let text = required_str(&record, "text")?;
        Ok(Self { record, text })
    }

    #[must_use]
    pub fn into_record(mut self) -> EntityRecord {
        self.record.fields.insert("text".into(), Value::from(self.text));
        self.record
    }
}

/// A chapter within a story
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub record: EntityRecord,
    pub title: String,
    pub body: String,
    pub number: i64,
}

impl Chapter {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        story_id: EntityId,
        number: i64,
        title: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let record = EntityRecord::new(EntityKind::Chapter, user_id)
            .with_story(story_id)
            .with_field("title", &*title)
            .with_field("body", "")
            .with_field("number", number);
        Self {
            record,
            title,
            body: String::new(),
            number,
        }
    }

    pub fn from_record(record: EntityRecord) -> Result<Self> {
        required_parent(&record)?;
        let title = required_str(&record, "title")?;
        let body = optional_str(&record, "body").unwrap_or_default();
        let number = record
            .fields
            .get("number")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(Self {
            record,
            title,
            body,
            number,
        })
    }

    #[must_use]
    pub fn into_record(mut self) -> EntityRecord {
        self.record.fields.insert("title".into(), Value::from(self.title));
        self.record.fields.insert("body".into(), Value::from(self.body));
        self.record
            .fields
            .insert("number".into(), Value::from(self.number));
        self.record
    }
}

/// A generated story draft produced from a story's material
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedStory {
    pub record: EntityRecord,
    pub content: String,
}

impl GeneratedStory {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        story_id: EntityId,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let record = EntityRecord::new(EntityKind::GeneratedStory, user_id)
            .with_story(story_id)
            .with_field("content", &*content);
        Self { record, content }
    }

    pub fn from_record(record: EntityRecord) -> Result<Self> {
        required_parent(&record)?;
        let content = required_str(&record, "content")?;
        Ok(Self { record, content })
    }

    #[must_use]
    pub fn into_record(mut self) -> EntityRecord {
        self.record
            .fields
            .insert("content".into(), Value::from(self.content));
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_story_roundtrip() {
        let mut story = Story::new("user-1", "The Long Rain");
        story.premise = Some("A city that never dries".to_string());

        let record = story.clone().into_record();
        let back = Story::from_record(record).unwrap();
        assert_eq!(back.title, "The Long Rain");
        assert_eq!(back.premise.as_deref(), Some("A city that never dries"));
    }

    #[test]
    fn test_character_requires_parent() {
        let orphan = EntityRecord::new(EntityKind::Character, "user-1").with_field("name", "Jo");
        assert!(Character::from_record(orphan).is_err());
    }

    #[test]
    fn test_chapter_roundtrip_keeps_number() {
        let story = EntityId::new();
        let mut chapter = Chapter::new("user-1", story, 3, "Arrival");
        chapter.body = "It began at the station.".to_string();

        let back = Chapter::from_record(chapter.into_record()).unwrap();
        assert_eq!(back.number, 3);
        assert_eq!(back.body, "It began at the station.");
    }

    #[test]
    fn test_scene_defaults_empty_content() {
        let story = EntityId::new();
        let scene = Scene::new("user-1", story, "Opening");
        let back = Scene::from_record(scene.into_record()).unwrap();
        assert_eq!(back.content, "");
    }
}
