//! Types for the watch api
use crate::{error::ErrorResponse, object::ResourceObject, ResourceVersion};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A raw event returned from a watch query
///
/// On the wire a watch returns many of these as newline separated JSON.
#[derive(Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    /// Resource was added
    Added(ResourceObject),
    /// Resource was modified
    Modified(ResourceObject),
    /// Resource was deleted
    Deleted(ResourceObject),
    /// Resource bookmark, only carries a resource version
    Bookmark(Bookmark),
    /// There was some kind of error
    Error(ErrorResponse),
}

impl WatchEvent {
    /// The resource version this event moves the stream to, if any
    pub fn resource_version(&self) -> Option<&ResourceVersion> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                obj.resource_version()
            }
            WatchEvent::Bookmark(bm) => Some(&bm.metadata.resource_version),
            WatchEvent::Error(_) => None,
        }
    }
}

impl Debug for WatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self {
            WatchEvent::Added(_) => write!(f, "Added event"),
            WatchEvent::Modified(_) => write!(f, "Modified event"),
            WatchEvent::Deleted(_) => write!(f, "Deleted event"),
            WatchEvent::Bookmark(_) => write!(f, "Bookmark event"),
            WatchEvent::Error(e) => write!(f, "Error event: {e:?}"),
        }
    }
}

/// Slimmed down object for [`WatchEvent::Bookmark`]
///
/// Can only be relied upon to have metadata with resource version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bookmark {
    /// Basically empty metadata
    pub metadata: BookmarkMeta,
}

/// Slimmed down metadata for [`WatchEvent::Bookmark`]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkMeta {
    /// The only field we need from a Bookmark event.
    pub resource_version: ResourceVersion,
}

impl Bookmark {
    /// A bookmark at the given version
    pub fn at(resource_version: ResourceVersion) -> Self {
        Self {
            metadata: BookmarkMeta { resource_version },
        }
    }
}
