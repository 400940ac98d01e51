//! Generic entity record moved by the sync engine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::remote::{Document, Value};

/// A unique identifier for an entity, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The six entity types the sync engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Story,
    Character,
    Blurb,
    Scene,
    Chapter,
    GeneratedStory,
}

impl EntityKind {
    /// All kinds, in the order reconciliation pulls them (parents first so
    /// foreign keys resolve)
    pub const ALL: [Self; 6] = [
        Self::Story,
        Self::Character,
        Self::Blurb,
        Self::Scene,
        Self::Chapter,
        Self::GeneratedStory,
    ];

    /// Local table holding this kind
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Story => "stories",
            Self::Character => "characters",
            Self::Blurb => "blurbs",
            Self::Scene => "scenes",
            Self::Chapter => "chapters",
            Self::GeneratedStory => "generated_stories",
        }
    }

    /// Remote collection holding this kind
    #[must_use]
    pub const fn collection(self) -> &'static str {
        self.table_name()
    }

    /// Wire code stored in the sync queue's `type` column
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Story => "story",
            Self::Character => "character",
            Self::Blurb => "blurb",
            Self::Scene => "scene",
            Self::Chapter => "chapter",
            Self::GeneratedStory => "generatedStory",
        }
    }

    /// Whether records of this kind carry a parent story ID
    #[must_use]
    pub const fn has_parent(self) -> bool {
        !matches!(self, Self::Story)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "story" => Ok(Self::Story),
            "character" => Ok(Self::Character),
            "blurb" => Ok(Self::Blurb),
            "scene" => Ok(Self::Scene),
            "chapter" => Ok(Self::Chapter),
            "generatedStory" => Ok(Self::GeneratedStory),
            other => Err(Error::InvalidInput(format!("unknown entity kind: {other}"))),
        }
    }
}

/// The generic row shape every entity shares.
///
/// Domain fields travel in `fields` as a typed wire document; the columns the
/// sync engine itself needs (timestamps, flags, parent) are first-class.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Unique identifier
    pub id: EntityId,
    /// Which entity table/collection this row belongs to
    pub kind: EntityKind,
    /// Owning user
    pub user_id: String,
    /// Parent story (None only for `Story` itself)
    pub story_id: Option<EntityId>,
    /// Domain fields (title, description, content, ...)
    pub fields: Document,
    /// Read-path ordering hint (characters/scenes)
    pub importance: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms); sole basis for conflict resolution
    pub updated_at: i64,
    /// Whether the remote store has acknowledged this version
    pub synced: bool,
    /// Soft-delete tombstone flag
    pub deleted: bool,
}

impl EntityRecord {
    /// Create a fresh, unsynced record owned by `user_id`
    #[must_use]
    pub fn new(kind: EntityKind, user_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: EntityId::new(),
            kind,
            user_id: user_id.into(),
            story_id: None,
            fields: Document::new(),
            importance: None,
            created_at: now,
            updated_at: now,
            synced: false,
            deleted: false,
        }
    }

    /// Set the parent story
    #[must_use]
    pub const fn with_story(mut self, story_id: EntityId) -> Self {
        self.story_id = Some(story_id);
        self
    }

    /// Set a domain field
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Bump `updated_at` to now and mark the record unsynced
    pub fn touch(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        // updated_at is monotonic per record even if the clock stalls
        self.updated_at = now.max(self.updated_at + 1);
        self.synced = false;
    }

    /// Encode into the remote document shape.
    ///
    /// The record's own id is not a field; the remote document's identifier
    /// carries it.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert("userId".to_string(), Value::from(self.user_id.clone()));
        doc.insert(
            "storyId".to_string(),
            Value::from(self.story_id.map(|id| id.as_str())),
        );
        doc.insert("importance".to_string(), Value::from(self.importance));
        doc.insert("createdAt".to_string(), Value::Integer(self.created_at));
        doc.insert("updatedAt".to_string(), Value::Integer(self.updated_at));
        doc.insert("deleted".to_string(), Value::Bool(self.deleted));
        doc
    }

    /// Decode a remote document back into a record.
    ///
    /// The remote document's own identifier becomes the local `id`. Records
    /// decoded from the remote are already acknowledged, so `synced` is true.
    pub fn from_document(kind: EntityKind, id: &str, doc: &Document) -> Result<Self> {
        let id = id
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid entity id: {id}")))?;

        let user_id = doc
            .get("userId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("document missing userId".to_string()))?
            .to_string();

        let story_id = match doc.get("storyId") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let raw = value.as_str().ok_or_else(|| {
                    Error::InvalidInput("storyId must be a string".to_string())
                })?;
                Some(raw.parse().map_err(|_| {
                    Error::InvalidInput(format!("invalid storyId: {raw}"))
                })?)
            }
        };

        let created_at = doc
            .get("createdAt")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::InvalidInput("document missing createdAt".to_string()))?;
        let updated_at = doc
            .get("updatedAt")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::InvalidInput("document missing updatedAt".to_string()))?;
        let deleted = doc
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let importance = doc.get("importance").and_then(Value::as_i64);

        let mut fields = doc.clone();
        for reserved in [
            "userId",
            "storyId",
            "importance",
            "createdAt",
            "updatedAt",
            "deleted",
        ] {
            fields.remove(reserved);
        }

        Ok(Self {
            id,
            kind,
            user_id,
            story_id,
            fields,
            importance,
            created_at,
            updated_at,
            synced: true,
            deleted,
        })
    }
}
