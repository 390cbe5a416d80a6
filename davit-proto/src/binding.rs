use davit_xml::name::QName;
use davit_xml::types::{PropEntry, PropertyUpdateItem, Value};

use crate::codec::HttpResponse;
use crate::error::DavError;
use crate::hook::Flow;
use crate::node::Etag;
use crate::server::DavServer;
use crate::staging::StagedBody;
use crate::uri;

/// Result of a guarded bind operation: either it ran, or a hook wrote the
/// response instead.
pub(crate) enum Bound<T> {
    Done(T),
    Intercepted(HttpResponse),
}

/// Destination bookkeeping shared by COPY and MOVE.
pub(crate) struct CopyMoveInfo {
    pub destination: String,
    pub destination_exists: bool,
}

impl DavServer {
    /// Create a file through its parent collection, guarded by the bind
    /// events.
    pub(crate) async fn create_file(
        &self,
        path: &str,
        body: &StagedBody,
    ) -> Result<Bound<Option<Etag>>, DavError> {
        match self.hooks.before_bind(path).await? {
            Flow::Handled(resp) => return Ok(Bound::Intercepted(resp)),
            Flow::Pass => {}
        }
        match self.hooks.before_create_file(path, body).await? {
            Flow::Handled(resp) => return Ok(Bound::Intercepted(resp)),
            Flow::Pass => {}
        }

        let (parent_path, name) = uri::split_path(path);
        let parent = self
            .tree
            .node_for_path(parent_path)
            .await
            .map_err(|e| match e {
                DavError::NotFound(_) => {
                    DavError::Conflict("Files can only be created as children of a collection".into())
                }
                e => e,
            })?;
        let collection = parent.as_collection().ok_or_else(|| {
            DavError::Conflict("Files can only be created as children of a collection".into())
        })?;

        let etag = collection.create_file(name, body.stream().await?).await?;
        self.hooks.after_bind(path).await?;
        Ok(Bound::Done(etag))
    }

    /// Create a collection, honoring extended MKCOL backends and rolling
    /// back when the initial properties cannot be applied.
    ///
    /// A clean run yields `Done(None)`; per-property failures yield
    /// `Done(Some(entry))` after the new node has been deleted again.
    pub(crate) async fn create_collection(
        &self,
        path: &str,
        resource_types: &[QName],
        props: &[(QName, Value)],
    ) -> Result<Bound<Option<PropEntry>>, DavError> {
        if !resource_types.iter().any(|n| n.is_dav("collection")) {
            return Err(DavError::InvalidResourceType(
                "The resourceType for this collection must at least include {DAV:}collection".into(),
            ));
        }

        let (parent_path, name) = uri::split_path(path);
        let parent = self
            .tree
            .node_for_path(parent_path)
            .await
            .map_err(|e| match e {
                DavError::NotFound(_) => DavError::Conflict("Parent node does not exist".into()),
                e => e,
            })?;
        let collection = parent
            .as_collection()
            .ok_or_else(|| DavError::Conflict("Parent node is not a collection".into()))?;

        match collection.child(name).await {
            Ok(_) => {
                return Err(DavError::MethodNotAllowed(
                    "The resource you tried to create already exists".into(),
                ))
            }
            Err(DavError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match self.hooks.before_bind(path).await? {
            Flow::Handled(resp) => return Ok(Bound::Intercepted(resp)),
            Flow::Pass => {}
        }

        if let Some(extended) = parent.as_extended_collection() {
            extended.create_extended(name, resource_types, props).await?;
        } else {
            if resource_types.iter().any(|n| !n.is_dav("collection")) {
                return Err(DavError::InvalidResourceType(
                    "The {DAV:}resourcetype you specified is not supported here".into(),
                ));
            }
            collection.create_directory(name).await?;

            if !props.is_empty() {
                let ops: Vec<PropertyUpdateItem> = props
                    .iter()
                    .cloned()
                    .map(|(name, value)| PropertyUpdateItem::Set(name, value))
                    .collect();
                let entry = self.update_properties(path, &ops).await?;
                let clean = entry.by_status.iter().all(|(status, _)| status.is_success());
                if !clean {
                    // roll the fresh node back, surfacing the property verdicts
                    if let Flow::Pass = self.hooks.before_unbind(path).await? {
                        let node = self.tree.node_for_path(path).await?;
                        node.delete().await?;
                    }
                    return Ok(Bound::Done(Some(entry)));
                }
            }
        }

        self.hooks.after_bind(path).await?;
        Ok(Bound::Done(None))
    }

    /// Read and validate the Destination/Overwrite headers of COPY and
    /// MOVE, resolving the destination against the tree.
    pub(crate) async fn copy_move_info(
        &self,
        headers: &http::header::HeaderMap,
    ) -> Result<CopyMoveInfo, DavError> {
        let raw_destination = crate::codec::destination(headers)?;
        let overwrite = crate::codec::overwrite(headers)?;
        let destination = self.base_uri.calculate_uri(&raw_destination)?;

        let (parent_path, _) = uri::split_path(&destination);
        let parent = self
            .tree
            .node_for_path(parent_path)
            .await
            .map_err(|e| match e {
                DavError::NotFound(_) => {
                    DavError::Conflict("The destination node is not found".into())
                }
                e => e,
            })?;
        if parent.as_collection().is_none() {
            return Err(DavError::UnsupportedMediaType(
                "The destination node is not a collection".into(),
            ));
        }

        let destination_exists = match self.tree.node_for_path(&destination).await {
            Ok(_) => {
                if !overwrite {
                    return Err(DavError::PreconditionFailed(
                        "The destination node already exists, and the overwrite header is set to false"
                            .into(),
                    ));
                }
                true
            }
            Err(DavError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        Ok(CopyMoveInfo {
            destination,
            destination_exists,
        })
    }
}
