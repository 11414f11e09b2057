//! Wire records exchanged with the remote entity store.

use crate::{Error, OutgoingProperties, RemoteId, RemoteProperties};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a remote CRM entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Company,
    Contact,
    Deal,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Company, EntityKind::Contact, EntityKind::Deal];

    /// Singular lowercase name, as used in association descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Contact => "contact",
            EntityKind::Deal => "deal",
        }
    }

    /// Plural name, as used in remote object paths.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Company => "companies",
            EntityKind::Contact => "contacts",
            EntityKind::Deal => "deals",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "company" | "companies" => Ok(EntityKind::Company),
            "contact" | "contacts" => Ok(EntityKind::Contact),
            "deal" | "deals" => Ok(EntityKind::Deal),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// An association descriptor pointing at a remote entity, encoded on the wire
/// as `"kind:remoteId"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativeAssociation {
    pub kind: EntityKind,
    pub id: RemoteId,
}

impl RelativeAssociation {
    pub fn new(kind: EntityKind, id: impl Into<RemoteId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for RelativeAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for RelativeAssociation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidAssociation(s.to_string()))?;
        if id.is_empty() {
            return Err(Error::InvalidAssociation(s.to_string()));
        }
        let kind = kind
            .parse()
            .map_err(|_| Error::InvalidAssociation(s.to_string()))?;
        Ok(Self::new(kind, id))
    }
}

impl TryFrom<String> for RelativeAssociation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelativeAssociation> for String {
    fn from(value: RelativeAssociation) -> Self {
        value.to_string()
    }
}

/// A downloaded remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullEntity {
    pub id: RemoteId,
    pub properties: RemoteProperties,
    #[serde(default)]
    pub associations: Vec<RelativeAssociation>,
}

/// A record to be created remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    pub properties: OutgoingProperties,
}

/// A property update for an existing remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    pub id: RemoteId,
    pub properties: OutgoingProperties,
}

/// A record returned by a create or update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingEntity {
    pub id: RemoteId,
    #[serde(default)]
    pub properties: RemoteProperties,
}

impl ExistingEntity {
    /// Remote property value, with absent and null both reading as `""`.
    pub fn property(&self, name: &str) -> &str {
        self.properties
            .get(name)
            .and_then(|v| v.as_deref())
            .unwrap_or("")
    }
}

/// One association to create or delete, from an entity of the calling
/// manager's kind to an entity of `to_kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    pub from_id: RemoteId,
    pub to_id: RemoteId,
    pub to_kind: EntityKind,
}
