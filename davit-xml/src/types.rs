use std::collections::HashMap;

use chrono::{DateTime, Utc};
use http::status::StatusCode;

use super::name::QName;

/// 14.4 depth XML Element / Depth request header
///
/// Value: "0" | "1" | "infinity"
///
/// Infinity is a distinguished sentinel, not a large number.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

/// 14.7 href XML Element
///
/// MUST contain a URI or a relative reference.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Href(pub String);

/// A property value.
///
/// WebDAV properties are either scalars (text, numbers, dates) or small
/// structured documents with their own serialization; the variants cover
/// everything the core produces and accepts.
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    /// Plain character data, e.g. `displayname`.
    Text(String),
    /// A single `<d:href>` child, e.g. `current-user-principal`.
    Href(Href),
    /// A set of empty child elements named by Clark names, e.g.
    /// `resourcetype` and `supported-report-set`.
    QNames(Vec<QName>),
    /// An RFC 1123 date, e.g. `getlastmodified`.
    Date(DateTime<Utc>),
    /// A non-negative integer, e.g. `getcontentlength`.
    Int(u64),
    /// An empty element.
    Empty,
}

impl Value {
    /// Whether a `resourcetype` carrying this value denotes a collection.
    pub fn is_collection_type(&self) -> bool {
        match self {
            Value::QNames(names) => names.iter().any(|n| n.is_dav("collection")),
            _ => false,
        }
    }
}

/// How the body of a property element must be parsed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ValueKind {
    Text,
    Href,
    QNames,
    Date,
}

/// Maps property names to the shape of their value.
///
/// Consulted when parsing PROPPATCH and extended MKCOL bodies; names that
/// are not registered parse as plain text. The registry is filled during
/// server construction and frozen afterwards.
#[derive(Debug, Clone)]
pub struct PropertyRegistry {
    kinds: HashMap<QName, ValueKind>,
}

impl Default for PropertyRegistry {
    fn default() -> Self {
        let mut reg = Self {
            kinds: HashMap::new(),
        };
        reg.register(QName::dav("resourcetype"), ValueKind::QNames);
        reg.register(QName::dav("supported-report-set"), ValueKind::QNames);
        reg.register(QName::dav("getlastmodified"), ValueKind::Date);
        reg.register(QName::dav("current-user-principal"), ValueKind::Href);
        reg.register(QName::dav("principal-URL"), ValueKind::Href);
        reg
    }
}

impl PropertyRegistry {
    pub fn register(&mut self, name: QName, kind: ValueKind) {
        self.kinds.insert(name, kind);
    }

    pub fn kind_of(&self, name: &QName) -> ValueKind {
        self.kinds.get(name).copied().unwrap_or(ValueKind::Text)
    }
}

/// One resource inside a 207 Multi-Status body: the href plus properties
/// grouped by the status that applies to them.
///
/// The bucket order is the insertion order, which keeps serialization
/// deterministic. Buckets left empty are dropped before serialization.
#[derive(Debug, PartialEq, Clone)]
pub struct PropEntry {
    pub href: Href,
    pub by_status: Vec<(StatusCode, Vec<(QName, Option<Value>)>)>,
}

impl PropEntry {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: Href(href.into()),
            by_status: vec![],
        }
    }

    pub fn bucket_mut(&mut self, status: StatusCode) -> &mut Vec<(QName, Option<Value>)> {
        if let Some(pos) = self.by_status.iter().position(|(s, _)| *s == status) {
            return &mut self.by_status[pos].1;
        }
        self.by_status.push((status, vec![]));
        &mut self.by_status.last_mut().unwrap().1
    }

    pub fn push(&mut self, status: StatusCode, name: QName, value: Option<Value>) {
        self.bucket_mut(status).push((name, value));
    }

    pub fn bucket(&self, status: StatusCode) -> Option<&Vec<(QName, Option<Value>)>> {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, props)| props)
    }

    pub fn value_of(&self, status: StatusCode, name: &QName) -> Option<&Value> {
        self.bucket(status)?
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn remove(&mut self, status: StatusCode, name: &QName) {
        if let Some(bucket) = self
            .by_status
            .iter_mut()
            .find(|(s, _)| *s == status)
            .map(|(_, props)| props)
        {
            bucket.retain(|(n, _)| n != name);
        }
    }

    pub fn strip_empty(&mut self) {
        self.by_status.retain(|(_, props)| !props.is_empty());
    }
}

/// 13. multistatus XML Element
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Multistatus {
    pub responses: Vec<PropEntry>,
}

/// The fixed `HTTP/1.1 CODE TEXT` line carried in `<d:status>`.
pub fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

/// RFC 1123 rendering used by `getlastmodified` and `Last-Modified`.
pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// A parsed PROPFIND request body.
#[derive(Debug, PartialEq, Clone)]
pub enum PropFind {
    PropName,
    AllProp(Option<Vec<QName>>),
    Prop(Vec<QName>),
}

/// One mutation of a PROPPATCH request, in document order.
#[derive(Debug, PartialEq, Clone)]
pub enum PropertyUpdateItem {
    Set(QName, Value),
    Remove(QName),
}

impl PropertyUpdateItem {
    pub fn name(&self) -> &QName {
        match self {
            PropertyUpdateItem::Set(n, _) => n,
            PropertyUpdateItem::Remove(n) => n,
        }
    }
}

/// A parsed `{DAV:}propertyupdate` body.
#[derive(Debug, PartialEq, Clone)]
pub struct PropertyUpdate(pub Vec<PropertyUpdateItem>);

/// A parsed extended `{DAV:}mkcol` body: the properties of its
/// `{DAV:}set` sections, `resourcetype` included.
#[derive(Debug, PartialEq, Clone)]
pub struct Mkcol {
    pub props: Vec<(QName, Value)>,
}

/// A shallow capture of a child of a REPORT root element.
#[derive(Debug, PartialEq, Clone)]
pub struct ReportChild {
    pub name: QName,
    pub text: Option<String>,
    /// Clark names of the grandchild elements, e.g. the prop list of a
    /// multiget-style report.
    pub names: Vec<QName>,
}

/// A REPORT request body. The root element's Clark name identifies the
/// report; the core hands the capture to plugins without interpreting it.
#[derive(Debug, PartialEq, Clone)]
pub struct ReportStart {
    pub name: QName,
    pub children: Vec<ReportChild>,
}

/// The WebDAV error envelope written by the dispatcher's error handler.
#[derive(Debug, PartialEq, Clone)]
pub struct ErrorBody {
    /// Error kind, e.g. `Forbidden`.
    pub kind: String,
    pub message: String,
    /// Pre/postcondition element announced by the error, e.g.
    /// `{DAV:}valid-resourcetype`.
    pub condition: Option<QName>,
    pub version: String,
}
