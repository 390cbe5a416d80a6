use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{StreamExt, TryStreamExt};

use davit_proto::error::DavError;
use davit_proto::node::{
    CollectionNode, Content, DavNode, Etag, ExtendedCollectionNode, FileNode, PropertiesNode,
    QuotaInfo, QuotaNode, UpdateOutcome,
};
use davit_proto::tree::DavTree;
use davit_proto::uri;
use davit_xml::name::QName;
use davit_xml::types::{PropertyUpdateItem, Value};

/// An in-memory tree backend: files are byte buffers, collections are
/// ordered name maps, dead properties live next to both. Handy for demos
/// and as the reference backend of the end-to-end tests.
pub struct MemTree {
    ctx: Arc<Ctx>,
}

struct Ctx {
    root: Arc<DirInner>,
    extended_mkcol: bool,
    quota_bytes: u64,
}

struct FileState {
    content: Bytes,
    content_type: Option<String>,
    modified: DateTime<Utc>,
    version: u64,
}

struct FileInner {
    state: RwLock<FileState>,
    props: RwLock<BTreeMap<QName, Value>>,
}

#[derive(Default)]
struct DirInner {
    entries: RwLock<BTreeMap<String, Entry>>,
    props: RwLock<BTreeMap<QName, Value>>,
}

#[derive(Clone)]
enum Entry {
    File(Arc<FileInner>),
    Dir(Arc<DirInner>),
}

impl MemTree {
    pub fn new() -> Self {
        Self::with_options(false, 1 << 30)
    }

    /// `extended_mkcol` lets collections take the atomic extended-MKCOL
    /// path instead of create-then-proppatch.
    pub fn with_options(extended_mkcol: bool, quota_bytes: u64) -> Self {
        Self {
            ctx: Arc::new(Ctx {
                root: Arc::new(DirInner::default()),
                extended_mkcol,
                quota_bytes,
            }),
        }
    }
}

impl Default for MemTree {
    fn default() -> Self {
        Self::new()
    }
}

fn etag_of(state: &FileState) -> Etag {
    format!("{:x}-{:x}", state.version, state.content.len())
}

async fn collect_bytes(content: Content) -> std::io::Result<Bytes> {
    let chunks: Vec<Bytes> = content.try_collect().await?;
    let mut buf = BytesMut::new();
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn get_props(map: &RwLock<BTreeMap<QName, Value>>, names: &[QName]) -> Vec<(QName, Value)> {
    let props = map.read().unwrap();
    if names.is_empty() {
        props.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    } else {
        names
            .iter()
            .filter_map(|n| props.get(n).map(|v| (n.clone(), v.clone())))
            .collect()
    }
}

fn apply_props(map: &RwLock<BTreeMap<QName, Value>>, ops: &[PropertyUpdateItem]) -> UpdateOutcome {
    // a single write lock makes the batch atomic
    let mut props = map.write().unwrap();
    for op in ops {
        match op {
            PropertyUpdateItem::Set(name, value) => {
                props.insert(name.clone(), value.clone());
            }
            PropertyUpdateItem::Remove(name) => {
                props.remove(name);
            }
        }
    }
    UpdateOutcome::Applied
}

fn subtree_size(dir: &Arc<DirInner>) -> u64 {
    let entries = dir.entries.read().unwrap();
    entries
        .values()
        .map(|entry| match entry {
            Entry::File(f) => f.state.read().unwrap().content.len() as u64,
            Entry::Dir(d) => subtree_size(d),
        })
        .sum()
}

fn deep_clone(entry: &Entry) -> Entry {
    match entry {
        Entry::File(f) => {
            let state = f.state.read().unwrap();
            Entry::File(Arc::new(FileInner {
                state: RwLock::new(FileState {
                    content: state.content.clone(),
                    content_type: state.content_type.clone(),
                    modified: state.modified,
                    version: state.version,
                }),
                props: RwLock::new(f.props.read().unwrap().clone()),
            }))
        }
        Entry::Dir(d) => Entry::Dir(Arc::new(DirInner {
            entries: RwLock::new(
                d.entries
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(k, v)| (k.clone(), deep_clone(v)))
                    .collect(),
            ),
            props: RwLock::new(d.props.read().unwrap().clone()),
        })),
    }
}

impl Ctx {
    fn dir_at(&self, path: &str) -> Result<Arc<DirInner>, DavError> {
        let mut dir = self.root.clone();
        if path.is_empty() {
            return Ok(dir);
        }
        for segment in path.split('/') {
            let next = {
                let entries = dir.entries.read().unwrap();
                match entries.get(segment) {
                    Some(Entry::Dir(d)) => d.clone(),
                    Some(Entry::File(_)) => {
                        return Err(DavError::Conflict(format!(
                            "{} is a file, not a collection",
                            segment
                        )))
                    }
                    None => {
                        return Err(DavError::NotFound(format!("Could not find {}", path)))
                    }
                }
            };
            dir = next;
        }
        Ok(dir)
    }

    fn entry_at(&self, path: &str) -> Result<(Arc<DirInner>, String, Entry), DavError> {
        if path.is_empty() {
            return Err(DavError::Forbidden(
                "The root collection cannot be moved or copied".into(),
            ));
        }
        let (parent_path, name) = uri::split_path(path);
        let parent = self.dir_at(parent_path)?;
        let entry = parent
            .entries
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DavError::NotFound(format!("Could not find {}", path)))?;
        Ok((parent, name.to_string(), entry))
    }
}

fn wrap_entry(ctx: &Arc<Ctx>, entry: Entry, parent: Arc<DirInner>, name: &str) -> Box<dyn DavNode> {
    match entry {
        Entry::File(file) => Box::new(MemFileNode {
            parent,
            name: name.to_string(),
            file,
        }),
        Entry::Dir(dir) => Box::new(MemDirNode {
            ctx: ctx.clone(),
            parent: Some(parent),
            name: name.to_string(),
            dir,
        }),
    }
}

fn node_at(ctx: &Arc<Ctx>, path: &str) -> Result<Box<dyn DavNode>, DavError> {
    if path.is_empty() {
        return Ok(Box::new(MemDirNode {
            ctx: ctx.clone(),
            parent: None,
            name: String::new(),
            dir: ctx.root.clone(),
        }));
    }
    let (parent, name, entry) = ctx.entry_at(path)?;
    Ok(wrap_entry(ctx, entry, parent, &name))
}

impl DavTree for MemTree {
    fn node_for_path<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn DavNode>, DavError>> {
        async move { node_at(&self.ctx, path) }.boxed()
    }

    fn copy<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> BoxFuture<'a, Result<(), DavError>> {
        async move {
            let (_, _, entry) = self.ctx.entry_at(source)?;
            let cloned = deep_clone(&entry);
            let (dst_parent_path, dst_name) = uri::split_path(destination);
            let dst_parent = self.ctx.dir_at(dst_parent_path)?;
            dst_parent
                .entries
                .write()
                .unwrap()
                .insert(dst_name.to_string(), cloned);
            Ok(())
        }
        .boxed()
    }

    fn move_node<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> BoxFuture<'a, Result<(), DavError>> {
        async move {
            let (src_parent, src_name, entry) = self.ctx.entry_at(source)?;
            let (dst_parent_path, dst_name) = uri::split_path(destination);
            let dst_parent = self.ctx.dir_at(dst_parent_path)?;
            src_parent.entries.write().unwrap().remove(&src_name);
            dst_parent
                .entries
                .write()
                .unwrap()
                .insert(dst_name.to_string(), entry);
            Ok(())
        }
        .boxed()
    }
}

struct MemFileNode {
    parent: Arc<DirInner>,
    name: String,
    file: Arc<FileInner>,
}

impl DavNode for MemFileNode {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn delete(&self) -> BoxFuture<'_, Result<(), DavError>> {
        async move {
            self.parent.entries.write().unwrap().remove(&self.name);
            Ok(())
        }
        .boxed()
    }

    fn as_file(&self) -> Option<&dyn FileNode> {
        Some(self)
    }

    fn as_properties(&self) -> Option<&dyn PropertiesNode> {
        Some(self)
    }
}

impl FileNode for MemFileNode {
    fn content(&self) -> Content {
        let bytes = self.file.state.read().unwrap().content.clone();
        futures::stream::once(futures::future::ready(Ok(bytes))).boxed()
    }

    fn put<'a>(&'a self, content: Content) -> BoxFuture<'a, std::io::Result<Option<Etag>>> {
        async move {
            let bytes = collect_bytes(content).await?;
            let mut state = self.file.state.write().unwrap();
            state.content = bytes;
            state.modified = Utc::now();
            state.version += 1;
            Ok(Some(etag_of(&state)))
        }
        .boxed()
    }

    fn size(&self) -> BoxFuture<'_, Option<u64>> {
        async move { Some(self.file.state.read().unwrap().content.len() as u64) }.boxed()
    }

    fn etag(&self) -> BoxFuture<'_, Option<Etag>> {
        async move { Some(etag_of(&self.file.state.read().unwrap())) }.boxed()
    }

    fn content_type(&self) -> BoxFuture<'_, Option<String>> {
        async move { self.file.state.read().unwrap().content_type.clone() }.boxed()
    }

    fn last_modified(&self) -> BoxFuture<'_, Option<DateTime<Utc>>> {
        async move { Some(self.file.state.read().unwrap().modified) }.boxed()
    }
}

impl PropertiesNode for MemFileNode {
    fn get_properties<'a>(
        &'a self,
        names: &'a [QName],
    ) -> BoxFuture<'a, Result<Vec<(QName, Value)>, DavError>> {
        async move { Ok(get_props(&self.file.props, names)) }.boxed()
    }

    fn update_properties<'a>(
        &'a self,
        ops: &'a [PropertyUpdateItem],
    ) -> BoxFuture<'a, Result<UpdateOutcome, DavError>> {
        async move { Ok(apply_props(&self.file.props, ops)) }.boxed()
    }
}

struct MemDirNode {
    ctx: Arc<Ctx>,
    parent: Option<Arc<DirInner>>,
    name: String,
    dir: Arc<DirInner>,
}

impl DavNode for MemDirNode {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn delete(&self) -> BoxFuture<'_, Result<(), DavError>> {
        async move {
            match &self.parent {
                Some(parent) => {
                    parent.entries.write().unwrap().remove(&self.name);
                    Ok(())
                }
                None => Err(DavError::Forbidden(
                    "The root collection cannot be deleted".into(),
                )),
            }
        }
        .boxed()
    }

    fn as_collection(&self) -> Option<&dyn CollectionNode> {
        Some(self)
    }

    fn as_properties(&self) -> Option<&dyn PropertiesNode> {
        Some(self)
    }

    fn as_quota(&self) -> Option<&dyn QuotaNode> {
        Some(self)
    }

    fn as_extended_collection(&self) -> Option<&dyn ExtendedCollectionNode> {
        if self.ctx.extended_mkcol {
            Some(self)
        } else {
            None
        }
    }
}

impl CollectionNode for MemDirNode {
    fn child<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Box<dyn DavNode>, DavError>> {
        async move {
            let entry = self
                .dir
                .entries
                .read()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| DavError::NotFound(format!("{} does not exist", name)))?;
            Ok(wrap_entry(&self.ctx, entry, self.dir.clone(), name))
        }
        .boxed()
    }

    fn children(&self) -> BoxFuture<'_, Result<Vec<Box<dyn DavNode>>, DavError>> {
        async move {
            let entries: Vec<(String, Entry)> = self
                .dir
                .entries
                .read()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Ok(entries
                .into_iter()
                .map(|(name, entry)| wrap_entry(&self.ctx, entry, self.dir.clone(), &name))
                .collect())
        }
        .boxed()
    }

    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: Content,
    ) -> BoxFuture<'a, Result<Option<Etag>, DavError>> {
        async move {
            let bytes = collect_bytes(content).await.map_err(DavError::from)?;
            let state = FileState {
                content: bytes,
                content_type: None,
                modified: Utc::now(),
                version: 0,
            };
            let etag = etag_of(&state);
            let file = Arc::new(FileInner {
                state: RwLock::new(state),
                props: RwLock::new(BTreeMap::new()),
            });
            self.dir
                .entries
                .write()
                .unwrap()
                .insert(name.to_string(), Entry::File(file));
            Ok(Some(etag))
        }
        .boxed()
    }

    fn create_directory<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DavError>> {
        async move {
            let mut entries = self.dir.entries.write().unwrap();
            if entries.contains_key(name) {
                return Err(DavError::Conflict(format!("{} already exists", name)));
            }
            entries.insert(name.to_string(), Entry::Dir(Arc::new(DirInner::default())));
            Ok(())
        }
        .boxed()
    }
}

impl PropertiesNode for MemDirNode {
    fn get_properties<'a>(
        &'a self,
        names: &'a [QName],
    ) -> BoxFuture<'a, Result<Vec<(QName, Value)>, DavError>> {
        async move { Ok(get_props(&self.dir.props, names)) }.boxed()
    }

    fn update_properties<'a>(
        &'a self,
        ops: &'a [PropertyUpdateItem],
    ) -> BoxFuture<'a, Result<UpdateOutcome, DavError>> {
        async move { Ok(apply_props(&self.dir.props, ops)) }.boxed()
    }
}

impl QuotaNode for MemDirNode {
    fn quota_info(&self) -> BoxFuture<'_, Result<QuotaInfo, DavError>> {
        async move {
            let used = subtree_size(&self.dir);
            let total = subtree_size(&self.ctx.root);
            Ok(QuotaInfo {
                used,
                available: self.ctx.quota_bytes.saturating_sub(total),
            })
        }
        .boxed()
    }
}

impl ExtendedCollectionNode for MemDirNode {
    fn create_extended<'a>(
        &'a self,
        name: &'a str,
        resource_types: &'a [QName],
        props: &'a [(QName, Value)],
    ) -> BoxFuture<'a, Result<(), DavError>> {
        async move {
            if resource_types.iter().any(|n| !n.is_dav("collection")) {
                return Err(DavError::InvalidResourceType(
                    "Only plain {DAV:}collection resources are supported here".into(),
                ));
            }
            let dir = Arc::new(DirInner::default());
            {
                let mut dead = dir.props.write().unwrap();
                for (qname, value) in props {
                    dead.insert(qname.clone(), value.clone());
                }
            }
            let mut entries = self.dir.entries.write().unwrap();
            if entries.contains_key(name) {
                return Err(DavError::MethodNotAllowed(format!(
                    "{} already exists",
                    name
                )));
            }
            entries.insert(name.to_string(), Entry::Dir(dir));
            Ok(())
        }
        .boxed()
    }
}
