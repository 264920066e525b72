use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::{BlobId, ResourceId};

/// Kind of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Can hold children and appears as an inner path segment.
    Container,
    /// Leaf; terminal in path syntax.
    Item,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Item => "item",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" => Ok(Self::Container),
            "item" => Ok(Self::Item),
            _ => Err(TypeError::UnknownKind(s.to_string())),
        }
    }
}

/// A node in the resource tree, as stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// `None` for root-level resources.
    pub parent_id: Option<ResourceId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub color: String,
    pub comments: String,
    /// Non-owning reference into the blob store.
    pub image: Option<BlobId>,
}

impl Resource {
    pub fn is_root_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_container(&self) -> bool {
        self.kind == ResourceKind::Container
    }
}

/// Parameters for creating a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub parent_id: Option<ResourceId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub image: Option<BlobId>,
}

impl NewResource {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            parent_id: None,
            name: name.into(),
            kind,
            color: String::new(),
            comments: String::new(),
            image: None,
        }
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Container)
    }

    pub fn item(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Item)
    }

    pub fn under(mut self, parent: Option<ResourceId>) -> Self {
        self.parent_id = parent;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }

    pub fn with_image(mut self, image: Option<BlobId>) -> Self {
        self.image = image;
        self
    }

    /// Materialize the row this request would produce under `id`.
    pub fn into_resource(self, id: ResourceId) -> Resource {
        Resource {
            id,
            parent_id: self.parent_id,
            name: self.name,
            kind: self.kind,
            color: self.color,
            comments: self.comments,
            image: self.image,
        }
    }
}

/// Replacement metadata for an existing resource.
///
/// Parentage and image are changed through their own operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub color: String,
    pub comments: String,
}

impl ResourceUpdate {
    /// An update that keeps every field of `resource` as is.
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            id: resource.id,
            name: resource.name.clone(),
            kind: resource.kind,
            color: resource.color.clone(),
            comments: resource.comments.clone(),
        }
    }

    /// Apply the new metadata to `resource`, leaving id, parent and image.
    pub fn apply(&self, resource: &mut Resource) {
        resource.name = self.name.clone();
        resource.kind = self.kind;
        resource.color = self.color.clone();
        resource.comments = self.comments.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_and_display() {
        assert_eq!("container".parse::<ResourceKind>().unwrap(), ResourceKind::Container);
        assert_eq!(" Item ".parse::<ResourceKind>().unwrap(), ResourceKind::Item);
        assert!("drawer".parse::<ResourceKind>().is_err());
        assert_eq!(ResourceKind::Item.to_string(), "item");
    }

    #[test]
    fn new_resource_builder() {
        let r = NewResource::item("Wrench")
            .under(Some(ResourceId::new(3)))
            .with_color("red")
            .with_comments("metric")
            .into_resource(ResourceId::new(9));
        assert_eq!(r.id, ResourceId::new(9));
        assert_eq!(r.parent_id, Some(ResourceId::new(3)));
        assert_eq!(r.kind, ResourceKind::Item);
        assert_eq!(r.color, "red");
        assert!(!r.is_root_level());
    }

    #[test]
    fn update_keeps_parent_and_image() {
        let image = Some(BlobId::from_content(b"png"));
        let mut r = NewResource::container("Shelf")
            .under(Some(ResourceId::new(1)))
            .with_image(image)
            .into_resource(ResourceId::new(2));
        let mut update = ResourceUpdate::from_resource(&r);
        update.name = "Top Shelf".into();
        update.kind = ResourceKind::Item;
        update.apply(&mut r);
        assert_eq!(r.name, "Top Shelf");
        assert_eq!(r.kind, ResourceKind::Item);
        assert_eq!(r.parent_id, Some(ResourceId::new(1)));
        assert_eq!(r.image, image);
    }

    #[test]
    fn resource_json_uses_type_field() {
        let r = NewResource::container("Garage").into_resource(ResourceId::new(1));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "container");
        assert_eq!(json["id"], 1);
        assert!(json["parent_id"].is_null());
    }
}
