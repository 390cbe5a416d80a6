use chrono::{DateTime, Utc};
use http::header::HeaderMap;

use crate::error::DavError;
use crate::node::DavNode;

/// Verdict of the conditional-request evaluation.
///
/// `NotModified` tells the caller to answer 304 and stop: the request was
/// redirected, not failed.
#[derive(Debug, PartialEq, Eq)]
pub enum CondOutcome {
    Pass,
    NotModified,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn header_date(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    header_str(headers, name)
        .and_then(|v| httpdate::parse_http_date(v).ok())
        .map(DateTime::<Utc>::from)
}

async fn node_etag(node: Option<&dyn DavNode>) -> Option<String> {
    match node.and_then(|n| n.as_file()) {
        Some(file) => file.etag().await,
        None => None,
    }
}

async fn node_last_modified(node: Option<&dyn DavNode>) -> Option<DateTime<Utc>> {
    match node.and_then(|n| n.as_file()) {
        Some(file) => file.last_modified().await,
        None => None,
    }
}

/// Evaluate If-Match, If-None-Match, If-Modified-Since and
/// If-Unmodified-Since against the target node, in that order; the first
/// failing header wins.
///
/// `handle_as_get` selects the status of a failing If-None-Match: 304 on
/// GET/HEAD, 412 anywhere else.
pub async fn evaluate(
    headers: &HeaderMap,
    node: Option<&dyn DavNode>,
    handle_as_get: bool,
) -> Result<CondOutcome, DavError> {
    if let Some(if_match) = header_str(headers, "If-Match") {
        if node.is_none() {
            return Err(DavError::PreconditionFailed(
                "An If-Match header was specified, but the specified url was not found".into(),
            ));
        }
        if if_match != "*" {
            let matches = node_etag(node)
                .await
                .is_some_and(|etag| etag == if_match.trim_matches('"'));
            if !matches {
                return Err(DavError::PreconditionFailed(
                    "An If-Match header was specified, but the ETag did not match".into(),
                ));
            }
        }
    }

    let mut saw_if_none_match = false;
    if let Some(if_none_match) = header_str(headers, "If-None-Match") {
        saw_if_none_match = true;
        if node.is_some() {
            let matches = if if_none_match == "*" {
                true
            } else {
                node_etag(node)
                    .await
                    .is_some_and(|etag| etag == if_none_match.trim_matches('"'))
            };
            if matches {
                if handle_as_get {
                    return Ok(CondOutcome::NotModified);
                }
                return Err(DavError::PreconditionFailed(
                    "An If-None-Match header was specified, but the ETag matched (or * was specified)"
                        .into(),
                ));
            }
        }
    }

    if !saw_if_none_match {
        if let Some(since) = header_date(headers, "If-Modified-Since") {
            if node.is_some() {
                if let Some(modified) = node_last_modified(node).await {
                    // header dates have second precision
                    if modified.timestamp() <= since.timestamp() {
                        return Ok(CondOutcome::NotModified);
                    }
                }
            }
        }
    }

    if let Some(since) = header_date(headers, "If-Unmodified-Since") {
        if node.is_none() {
            return Err(DavError::NotFound(
                "An If-Unmodified-Since header was specified, but the specified url was not found"
                    .into(),
            ));
        }
        if let Some(modified) = node_last_modified(node).await {
            if modified.timestamp() > since.timestamp() {
                return Err(DavError::PreconditionFailed(
                    "An If-Unmodified-Since header was specified, but the entity was modified since"
                        .into(),
                ));
            }
        }
    }

    Ok(CondOutcome::Pass)
}
