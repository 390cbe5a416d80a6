use http::status::StatusCode;

use davit_xml::name::{QName, DAV_URN};
use davit_xml::types::{format_http_date, Depth, Href, PropEntry, PropertyUpdateItem, Value};

use crate::error::DavError;
use crate::node::{DavNode, UpdateOutcome};
use crate::server::DavServer;
use crate::uri;

/// What a PROPFIND asked for.
#[derive(Debug, Clone)]
pub(crate) enum PropQuery {
    /// Allprop with the extra names of an `include` section.
    AllProp(Vec<QName>),
    Named(Vec<QName>),
}

/// Properties the server computes itself. PROPPATCH on any of them yields
/// 403 without touching the rest.
const PROTECTED: &[&str] = &[
    "getcontentlength",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
    "quota-available-bytes",
    "quota-used-bytes",
    "supported-privilege-set",
    "current-user-privilege-set",
    "acl",
    "acl-restrictions",
    "inherited-acl-set",
    "principal-collection-set",
    "current-user-principal",
];

pub(crate) fn is_protected(name: &QName) -> bool {
    name.ns == DAV_URN && PROTECTED.contains(&name.local.as_str())
}

/// The conventional allprop set.
fn default_allprop() -> Vec<QName> {
    [
        "getlastmodified",
        "getcontentlength",
        "resourcetype",
        "quota-used-bytes",
        "quota-available-bytes",
        "getetag",
        "getcontenttype",
    ]
    .into_iter()
    .map(QName::dav)
    .collect()
}

impl DavServer {
    /// Gather properties for a path and, at depth 1, its direct children.
    pub(crate) async fn properties_for_path(
        &self,
        path: &str,
        query: &PropQuery,
        depth: Depth,
    ) -> Result<Vec<PropEntry>, DavError> {
        let node = self.tree.node_for_path(path).await?;

        let mut targets: Vec<(String, Box<dyn DavNode>)> = Vec::new();
        if depth == Depth::One {
            if let Some(collection) = node.as_collection() {
                for child in collection.children().await? {
                    let child_path = uri::join(path, &child.name());
                    targets.push((child_path, child));
                }
            }
        }
        targets.insert(0, (path.to_string(), node));

        let mut entries = Vec::with_capacity(targets.len());
        for (target_path, target) in &targets {
            entries.push(self.gather_one(target_path, target.as_ref(), query).await?);
        }
        Ok(entries)
    }

    async fn gather_one(
        &self,
        path: &str,
        node: &dyn DavNode,
        query: &PropQuery,
    ) -> Result<PropEntry, DavError> {
        let mut entry = PropEntry::new(String::new());
        entry.bucket_mut(StatusCode::OK);
        entry.bucket_mut(StatusCode::NOT_FOUND);

        // a node carrying dead properties answers first
        if let Some(props) = node.as_properties() {
            let ask: Vec<QName> = match query {
                PropQuery::Named(names) => names.clone(),
                // empty request: everything the node knows
                PropQuery::AllProp(_) => vec![],
            };
            for (name, value) in props.get_properties(&ask).await? {
                entry.push(StatusCode::OK, name, Some(value));
            }
        }

        let mut requested: Vec<QName> = match query {
            PropQuery::Named(names) => names.clone(),
            PropQuery::AllProp(include) => {
                let mut names = default_allprop();
                for extra in include {
                    if !names.contains(extra) {
                        names.push(extra.clone());
                    }
                }
                names
            }
        };

        // resourcetype decides the trailing slash of the href, so it is
        // resolved even when the client did not ask for it
        let resourcetype = QName::dav("resourcetype");
        let auto_added = if requested.contains(&resourcetype) {
            false
        } else {
            requested.push(resourcetype.clone());
            true
        };

        for name in requested {
            let satisfied = entry
                .bucket(StatusCode::OK)
                .is_some_and(|bucket| bucket.iter().any(|(n, _)| *n == name));
            if satisfied {
                continue;
            }
            match self.builtin_value(node, &name).await? {
                Some(value) => entry.push(StatusCode::OK, name, Some(value)),
                None => entry.push(StatusCode::NOT_FOUND, name, None),
            }
        }

        self.hooks.after_get_properties(path, &mut entry).await?;

        let is_collection = !matches!(
            entry.value_of(StatusCode::OK, &resourcetype),
            None | Some(Value::Empty)
        );
        if auto_added {
            entry.remove(StatusCode::OK, &resourcetype);
            entry.remove(StatusCode::NOT_FOUND, &resourcetype);
        }
        entry.href = Href(self.base_uri.href(path, is_collection));
        entry.strip_empty();
        Ok(entry)
    }

    /// The live properties the core computes from the node contract.
    async fn builtin_value(
        &self,
        node: &dyn DavNode,
        name: &QName,
    ) -> Result<Option<Value>, DavError> {
        if name.ns != DAV_URN {
            return Ok(None);
        }
        let file = node.as_file();
        let value = match name.local.as_str() {
            "getlastmodified" => match file {
                Some(f) => f.last_modified().await.map(Value::Date),
                None => None,
            },
            "getcontentlength" => match file {
                Some(f) => f.size().await.map(Value::Int),
                None => None,
            },
            "resourcetype" => Some(if node.as_collection().is_some() {
                Value::QNames(vec![QName::dav("collection")])
            } else {
                Value::Empty
            }),
            "quota-used-bytes" => match node.as_quota() {
                Some(q) => Some(Value::Int(q.quota_info().await?.used)),
                None => None,
            },
            "quota-available-bytes" => match node.as_quota() {
                Some(q) => Some(Value::Int(q.quota_info().await?.available)),
                None => None,
            },
            "getetag" => match file {
                Some(f) => f
                    .etag()
                    .await
                    .map(|etag| Value::Text(format!("\"{}\"", etag))),
                None => None,
            },
            "getcontenttype" => match file {
                Some(f) => f.content_type().await.map(Value::Text),
                None => None,
            },
            "supported-report-set" => Some(Value::QNames(vec![])),
            _ => None,
        };
        Ok(value)
    }

    /// Apply a PROPPATCH, folding the verdicts into one multi-status entry.
    ///
    /// The mutation is atomic: protected names take their 403 up front and
    /// block everything else with 424; only an unobstructed list reaches
    /// the backend.
    pub(crate) async fn update_properties(
        &self,
        path: &str,
        ops: &[PropertyUpdateItem],
    ) -> Result<PropEntry, DavError> {
        let node = self.tree.node_for_path(path).await?;
        let is_collection = node.as_collection().is_some();
        let mut entry = PropEntry::new(self.base_uri.href(path, is_collection));

        match node.as_properties() {
            None => {
                for op in ops {
                    entry.push(StatusCode::FORBIDDEN, op.name().clone(), None);
                }
            }
            Some(props) => {
                let has_protected = ops.iter().any(|op| is_protected(op.name()));
                if has_protected {
                    for op in ops {
                        let status = if is_protected(op.name()) {
                            StatusCode::FORBIDDEN
                        } else {
                            StatusCode::FAILED_DEPENDENCY
                        };
                        entry.push(status, op.name().clone(), None);
                    }
                } else {
                    match props.update_properties(ops).await? {
                        UpdateOutcome::Applied => {
                            for op in ops {
                                entry.push(StatusCode::OK, op.name().clone(), None);
                            }
                        }
                        UpdateOutcome::Rejected => {
                            for op in ops {
                                entry.push(StatusCode::FORBIDDEN, op.name().clone(), None);
                            }
                        }
                        UpdateOutcome::PerProperty(buckets) => {
                            let mut reported: Vec<QName> = Vec::new();
                            for (status, names) in buckets {
                                for name in names {
                                    reported.push(name.clone());
                                    entry.push(status, name, None);
                                }
                            }
                            for op in ops {
                                if !reported.contains(op.name()) {
                                    entry.push(
                                        StatusCode::FAILED_DEPENDENCY,
                                        op.name().clone(),
                                        None,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        entry.strip_empty();
        Ok(entry)
    }

    /// Map the file properties of a node onto GET/HEAD response headers.
    /// Missing properties are simply omitted.
    pub(crate) async fn http_headers(
        &self,
        node: &dyn DavNode,
    ) -> Result<Vec<(&'static str, String)>, DavError> {
        let want = [
            QName::dav("getcontenttype"),
            QName::dav("getcontentlength"),
            QName::dav("getlastmodified"),
            QName::dav("getetag"),
        ];
        let dead: Vec<(QName, Value)> = match node.as_properties() {
            Some(props) => props.get_properties(&want).await?,
            None => vec![],
        };

        let mut headers = Vec::new();
        for (local, header) in [
            ("getcontenttype", "Content-Type"),
            ("getcontentlength", "Content-Length"),
            ("getlastmodified", "Last-Modified"),
            ("getetag", "ETag"),
        ] {
            let name = QName::dav(local);
            let value = match dead.iter().find(|(n, _)| *n == name) {
                Some((_, v)) => Some(v.clone()),
                None => self.builtin_value(node, &name).await?,
            };
            let Some(value) = value else { continue };
            let rendered = match value {
                Value::Text(s) => s,
                Value::Int(n) => n.to_string(),
                Value::Date(d) => format_http_date(&d),
                Value::Href(h) => h.0,
                Value::QNames(_) | Value::Empty => continue,
            };
            headers.push((header, rendered));
        }
        Ok(headers)
    }
}
