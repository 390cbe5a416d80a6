use futures::future::BoxFuture;

use crate::error::DavError;
use crate::node::DavNode;

/// The storage contract the dispatcher consumes.
///
/// Paths are relative to the base URI, with no leading or trailing slash;
/// the empty path designates the root. `copy` and `move_node` exist as
/// dedicated operations so backends can implement them more efficiently
/// than a recursive walk through the node contract.
pub trait DavTree: Send + Sync {
    /// Look a node up; a missing path reports [`DavError::NotFound`].
    fn node_for_path<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn DavNode>, DavError>>;

    fn copy<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> BoxFuture<'a, Result<(), DavError>>;

    fn move_node<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> BoxFuture<'a, Result<(), DavError>>;
}
