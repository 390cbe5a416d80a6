use percent_encoding::percent_decode_str;

use crate::error::DavError;

/// The URI prefix under which the server is mounted, normalized to start
/// and end with `/`.
#[derive(Debug, Clone)]
pub struct BaseUri(String);

impl BaseUri {
    pub fn new(raw: &str) -> Self {
        let mut base = raw.trim().to_string();
        if !base.starts_with('/') {
            base.insert(0, '/');
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        Self(base)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Turn a request URI into a path relative to the base URI.
    ///
    /// Strips an absolute-form scheme/authority, drops the query, collapses
    /// `//`, percent-decodes, removes the base prefix and trims the
    /// surrounding slashes. A request outside the base URI is Forbidden; the
    /// bare base without its trailing slash maps to the empty path.
    pub fn calculate_uri(&self, raw: &str) -> Result<String, DavError> {
        let mut uri = raw;
        if let Some(pos) = uri.find("://") {
            let after_authority = &uri[pos + 3..];
            uri = match after_authority.find('/') {
                Some(p) => &after_authority[p..],
                None => "/",
            };
        }
        let uri = uri.split('?').next().unwrap_or("");

        let mut collapsed = String::with_capacity(uri.len() + 1);
        if !uri.starts_with('/') {
            collapsed.push('/');
        }
        let mut prev_slash = false;
        for c in uri.chars() {
            if c == '/' && prev_slash {
                continue;
            }
            prev_slash = c == '/';
            collapsed.push(c);
        }

        let decoded = percent_decode_str(&collapsed)
            .decode_utf8()
            .map_err(|_| DavError::BadRequest(format!("The uri ({}) is not valid utf-8", raw)))?
            .into_owned();

        if let Some(rest) = decoded.strip_prefix(self.0.as_str()) {
            return Ok(rest.trim_matches('/').to_string());
        }
        if decoded == self.0[..self.0.len() - 1] {
            // bare base uri without its trailing slash
            return Ok(String::new());
        }
        Err(DavError::Forbidden(format!(
            "Requested uri ({}) is out of base uri ({})",
            raw, self.0
        )))
    }

    /// The href written into multi-status responses for a resolved path.
    /// Collection hrefs always end with `/`.
    pub fn href(&self, path: &str, is_collection: bool) -> String {
        let mut href = if path.is_empty() {
            self.0.clone()
        } else {
            format!("{}{}", self.0, path)
        };
        if is_collection && !href.ends_with('/') {
            href.push('/');
        }
        href
    }
}

/// Split a relative path into (parent, leaf). The root splits into two
/// empty halves.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// Join a relative parent path with a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
