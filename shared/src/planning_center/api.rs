//! JSON:API documents returned by the Check-Ins v2 endpoints. Only the fields the sync
//! engine reads are modelled; everything else in the payload is ignored.

use crate::planning_center::{Checkout, SourceLocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const JSON_API_MEDIA_TYPE: &str = "application/vnd.api+json";

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInsPage {
    #[serde(default)]
    pub links: PageLinks,
    pub data: Vec<CheckInResource>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLinks {
    #[serde(rename = "self")]
    pub self_link: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInResource {
    #[serde(rename = "type", default)]
    pub type_field: String,
    pub id: String,
    pub attributes: CheckInAttributes,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInAttributes {
    pub first_name: String,
    pub last_name: String,
    pub security_code: Option<String>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub kind: Option<String>,
    pub number: Option<i64>,
}

impl From<CheckInResource> for Checkout {
    fn from(resource: CheckInResource) -> Self {
        Self {
            id: resource.id,
            first_name: resource.attributes.first_name,
            last_name: resource.attributes.last_name,
            security_code: resource.attributes.security_code.unwrap_or_default(),
            checked_out_at: resource.attributes.checked_out_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationDocument {
    pub data: LocationResource,
    #[serde(default)]
    pub included: Vec<LocationResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResource {
    #[serde(rename = "type", default)]
    pub type_field: String,
    pub id: String,
    pub attributes: LocationAttributes,
    #[serde(default)]
    pub relationships: LocationRelationships,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationAttributes {
    pub name: String,
    pub kind: Option<String>,
    pub opened: Option<bool>,
    pub position: Option<i64>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRelationships {
    pub parent: Option<ToOneRelationship>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToOneRelationship {
    pub data: Option<ResourceIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub type_field: String,
    pub id: String,
}

impl LocationResource {
    pub fn parent_id(&self) -> Option<&str> {
        self.relationships
            .parent
            .as_ref()
            .and_then(|parent| parent.data.as_ref())
            .map(|data| data.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

impl From<LocationResource> for SourceLocation {
    fn from(resource: LocationResource) -> Self {
        let parent_id = resource.parent_id().map(str::to_string);
        Self {
            id: resource.id,
            parent_id,
            name: resource.attributes.name,
        }
    }
}
