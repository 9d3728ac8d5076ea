//! Identity types for UAOS entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ENTITY ID TYPE SYSTEM
// ============================================================================

/// Trait for type-safe entity IDs.
///
/// Gives compile-time separation between id spaces so a `SessionId` can never
/// be accidentally passed where a `BufferId` is expected.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The name of the entity type (e.g. "session", "task").
    const ENTITY_NAME: &'static str;

    /// Create a new ID from a UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Create a nil (all zeros) ID.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    /// Create a new timestamp-sortable UUIDv7 ID.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Error type for parsing entity IDs from strings.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse {} id from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Defines a type-safe entity id newtype wrapping a UUID.
macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| EntityIdParseError {
                        entity_name: Self::ENTITY_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

define_entity_id!(SessionId, "session", "Type-safe ID for a session.");
define_entity_id!(BufferId, "buffer", "Type-safe ID for a versioned buffer.");
define_entity_id!(TaskId, "task", "Type-safe ID for an agent task.");
define_entity_id!(StepId, "step", "Type-safe ID for an agent step.");
define_entity_id!(UserId, "user", "Type-safe ID for a tenant user.");
define_entity_id!(NodeId, "node", "Type-safe ID for an archive content node.");
define_entity_id!(ClusterId, "cluster", "Type-safe ID for a discovered cluster.");
define_entity_id!(BookId, "book", "Type-safe ID for an assembled book.");
define_entity_id!(ChapterId, "chapter", "Type-safe ID for a book chapter.");
define_entity_id!(HarvestId, "harvest", "Type-safe ID for a persona harvest session.");
define_entity_id!(PersonaId, "persona", "Type-safe ID for a persona profile.");
define_entity_id!(StyleId, "style", "Type-safe ID for a style profile.");
define_entity_id!(ArtifactId, "artifact", "Type-safe ID for a stored artifact.");
define_entity_id!(SearchSessionId, "search_session", "Type-safe ID for a search session.");

// ============================================================================
// VERSION ID — short stable content hash, not a UUID
// ============================================================================

/// Identifier for a `BufferVersion`.
///
/// Per the buffer model, version ids are short stable hashes of
/// `content + parent + message + timestamp`, not random UUIDs, so commits
/// that happen to combine identical inputs collide deterministically rather
/// than by chance. Represented as the first 16 hex characters of a SHA-256
/// digest (64 bits of a collision space is ample for a single buffer's
/// history).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct VersionId(pub String);

impl VersionId {
    /// Derive a version id from its defining inputs.
    pub fn derive(content_repr: &str, parent: Option<&VersionId>, message: &str, timestamp: Timestamp) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content_repr.as_bytes());
        hasher.update(parent.map(|p| p.0.as_str()).unwrap_or("").as_bytes());
        hasher.update(message.as_bytes());
        hasher.update(timestamp.to_rfc3339().as_bytes());
        let digest = hasher.finalize();
        let hex = hex_encode(&digest[..8]);
        VersionId(hex)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

// ============================================================================
// OTHER IDENTITY TYPES
// ============================================================================

/// Timestamp type, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds, used for TTL and timeout configuration values.
pub type DurationMs = i64;

/// SHA-256 content hash, hex-encoded, used by the hasher and for dedup keys.
pub type ContentHash = String;

/// Compute a hex-encoded SHA-256 hash of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}
