//! Directory synchronization payloads.
//!
//! The server assigns every directory state a monotonically increasing
//! version and pushes one [`ContactChangeNotification`] per increment. Pushes
//! may be lost, duplicated or reordered, so clients recover from gaps by
//! fetching a [`DirectorySnapshot`].

use serde::{Deserialize, Serialize};

/// Versioned batch of member changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactChangeNotification {
    /// Directory version this notification produces when applied
    pub directory_version: u64,

    /// Changes to apply, in order
    #[serde(default)]
    pub changes: Vec<MemberChange>,
}

/// A change to a single directory member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChange {
    /// Member (contact) identifier
    pub member_id: String,

    /// What happened to the member
    pub action: MemberAction,

    /// Fields carried by the change. Absent fields mean "unchanged".
    #[serde(default)]
    pub fields: ContactFields,
}

/// Kind of member change.
///
/// Encoded on the wire as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MemberAction {
    /// Member added to the directory
    Add,
    /// Member metadata changed
    Update,
    /// Member removed by the local user
    DeleteBySelf,
    /// Member removed by the other party
    DeleteByOther,
}

impl MemberAction {
    /// Both delete flavours have the same local effect.
    #[must_use]
    pub const fn is_delete(self) -> bool {
        matches!(self, Self::DeleteBySelf | Self::DeleteByOther)
    }
}

impl From<MemberAction> for u8 {
    fn from(action: MemberAction) -> Self {
        match action {
            MemberAction::Add => 0,
            MemberAction::Update => 1,
            MemberAction::DeleteBySelf => 2,
            MemberAction::DeleteByOther => 3,
        }
    }
}

impl TryFrom<u8> for MemberAction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Add),
            1 => Ok(Self::Update),
            2 => Ok(Self::DeleteBySelf),
            3 => Ok(Self::DeleteByOther),
            other => Err(format!("unknown member action: {other}")),
        }
    }
}

/// Partial contact metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFields {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Reference to the avatar blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,

    /// User-chosen handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_uid: Option<String>,

    /// Version of the member's meeting configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_version: Option<u32>,

    /// Publicly visible name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_name: Option<String>,
}

/// One entry of a full directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    /// Member identifier
    pub id: String,

    /// Full metadata for the member
    pub fields: ContactFields,
}

/// Complete directory as known by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Server directory version the snapshot reflects
    pub version: u64,

    /// Every member in the directory
    pub contacts: Vec<ContactEntry>,
}
