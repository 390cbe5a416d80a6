use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use http::status::StatusCode;

use davit_xml::name::QName;
use davit_xml::types::{PropertyUpdateItem, Value};

use crate::error::DavError;

pub type Content = BoxStream<'static, std::io::Result<Bytes>>;
pub type Etag = String;

/// A resource in the tree.
///
/// Capabilities are queried, never asserted: a handler that needs a file on
/// a non-file gets `None` and answers with the matching error status. The
/// `as_*` accessors are the safe downcasts to the per-capability operation
/// sets.
pub trait DavNode: Send + Sync {
    /// Leaf name of this node inside its parent.
    fn name(&self) -> String;

    /// Remove this node from the tree.
    fn delete(&self) -> BoxFuture<'_, Result<(), DavError>>;

    fn as_file(&self) -> Option<&dyn FileNode> {
        None
    }
    fn as_collection(&self) -> Option<&dyn CollectionNode> {
        None
    }
    fn as_properties(&self) -> Option<&dyn PropertiesNode> {
        None
    }
    fn as_quota(&self) -> Option<&dyn QuotaNode> {
        None
    }
    fn as_extended_collection(&self) -> Option<&dyn ExtendedCollectionNode> {
        None
    }
}

/// A node holding a byte body.
pub trait FileNode: Send + Sync {
    /// Stream the content.
    fn content(&self) -> Content;

    /// Replace the content, optionally returning the new entity tag.
    fn put<'a>(&'a self, content: Content) -> BoxFuture<'a, std::io::Result<Option<Etag>>>;

    /// Size in bytes, when the backend knows it. Byte-range requests are
    /// only honored when it does.
    fn size(&self) -> BoxFuture<'_, Option<u64>>;

    /// Entity tag, without the surrounding quotes.
    fn etag(&self) -> BoxFuture<'_, Option<Etag>>;

    fn content_type(&self) -> BoxFuture<'_, Option<String>>;

    fn last_modified(&self) -> BoxFuture<'_, Option<DateTime<Utc>>>;
}

/// A node holding children.
pub trait CollectionNode: Send + Sync {
    fn child<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Box<dyn DavNode>, DavError>>;

    fn children(&self) -> BoxFuture<'_, Result<Vec<Box<dyn DavNode>>, DavError>>;

    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: Content,
    ) -> BoxFuture<'a, Result<Option<Etag>, DavError>>;

    fn create_directory<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DavError>>;
}

/// The shape of a dead-property update result.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Every requested mutation was applied.
    Applied,
    /// Nothing was applied; every property reports 403.
    Rejected,
    /// Per-property verdicts, used verbatim. Properties the backend does
    /// not mention report 424.
    PerProperty(Vec<(StatusCode, Vec<QName>)>),
}

/// A node carrying dead properties.
pub trait PropertiesNode: Send + Sync {
    /// Values for the requested names; an empty request means every known
    /// property. Names the node does not know are simply absent from the
    /// result.
    fn get_properties<'a>(
        &'a self,
        names: &'a [QName],
    ) -> BoxFuture<'a, Result<Vec<(QName, Value)>, DavError>>;

    /// Apply the given mutations atomically: either all commit or none.
    fn update_properties<'a>(
        &'a self,
        ops: &'a [PropertyUpdateItem],
    ) -> BoxFuture<'a, Result<UpdateOutcome, DavError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    pub used: u64,
    pub available: u64,
}

/// A node reporting RFC 4331 quota numbers.
pub trait QuotaNode: Send + Sync {
    fn quota_info(&self) -> BoxFuture<'_, Result<QuotaInfo, DavError>>;
}

/// A collection able to create a child collection with resource types and
/// initial properties in one atomic step (extended MKCOL, RFC 5689).
pub trait ExtendedCollectionNode: Send + Sync {
    fn create_extended<'a>(
        &'a self,
        name: &'a str,
        resource_types: &'a [QName],
        props: &'a [(QName, Value)],
    ) -> BoxFuture<'a, Result<(), DavError>>;
}
