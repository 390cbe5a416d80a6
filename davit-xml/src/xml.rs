use futures::Future;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::error::ParsingError;
use super::name::{QName, DAV_URN, VENDOR_URN};

// Async IO bounds
pub trait IWrite: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> IWrite for T {}
pub trait IRead: AsyncBufRead + Unpin {}
impl<T: AsyncBufRead + Unpin> IRead for T {}

// Serialization/Deserialization traits
pub trait QWrite {
    fn qwrite(
        &self,
        xml: &mut Writer<impl IWrite>,
    ) -> impl Future<Output = Result<(), quick_xml::Error>> + Send;
}
pub trait QRead<T> {
    fn qread(xml: &mut Reader<impl IRead>) -> impl Future<Output = Result<T, ParsingError>>;
}

// ---------------

/// Transform a Rust object into an XML stream of characters.
///
/// Two namespaces are declared on the root element: `DAV:` as `d` and the
/// server vendor namespace as `a`. Elements in any other namespace carry
/// their own `xmlns:custom` declaration.
pub struct Writer<T: IWrite> {
    pub q: quick_xml::writer::Writer<T>,
    pub ns_to_apply: Vec<(String, String)>,
}
impl<T: IWrite> Writer<T> {
    pub fn new(q: quick_xml::writer::Writer<T>) -> Self {
        Self {
            q,
            ns_to_apply: vec![
                ("xmlns:d".into(), DAV_URN.into()),
                ("xmlns:a".into(), VENDOR_URN.into()),
            ],
        }
    }

    pub fn create_dav_element(&mut self, name: &str) -> BytesStart<'static> {
        self.create_prefixed_element("d", name)
    }

    pub fn create_vendor_element(&mut self, name: &str) -> BytesStart<'static> {
        self.create_prefixed_element("a", name)
    }

    /// Element for an arbitrary Clark name. Unknown namespaces are declared
    /// inline on the element itself.
    pub fn create_qname_element(&mut self, name: &QName) -> BytesStart<'static> {
        match name.ns.as_str() {
            DAV_URN => self.create_prefixed_element("d", &name.local),
            VENDOR_URN => self.create_prefixed_element("a", &name.local),
            "" => self.create_raw_element(name.local.clone()),
            ns => {
                let mut start = self.create_raw_element(format!("custom:{}", name.local));
                start.push_attribute(("xmlns:custom", ns));
                start
            }
        }
    }

    fn create_prefixed_element(&mut self, prefix: &str, name: &str) -> BytesStart<'static> {
        self.create_raw_element(format!("{}:{}", prefix, name))
    }

    fn create_raw_element(&mut self, name: String) -> BytesStart<'static> {
        let mut start = BytesStart::new(name);
        if !self.ns_to_apply.is_empty() {
            start.extend_attributes(
                self.ns_to_apply
                    .iter()
                    .map(|(k, n)| (k.as_str(), n.as_str())),
            );
            self.ns_to_apply.clear()
        }
        start
    }
}

/// Transform an XML stream of characters into Rust objects.
///
/// Parsing is recoverable: decoders try to open the tags they know, return
/// [`ParsingError::Recoverable`] when the current node is something else,
/// and the caller decides whether to skip it or give up.
pub struct Reader<T: IRead> {
    pub rdr: NsReader<T>,
    cur: Event<'static>,
    prev: Event<'static>,
    parents: Vec<Event<'static>>,
    buf: Vec<u8>,
}
impl<T: IRead> Reader<T> {
    pub async fn new(mut rdr: NsReader<T>) -> Result<Self, ParsingError> {
        let mut buf: Vec<u8> = vec![];
        let cur = rdr.read_event_into_async(&mut buf).await?.into_owned();
        let parents = vec![];
        let prev = Event::Eof;
        buf.clear();
        Ok(Self {
            cur,
            prev,
            parents,
            rdr,
            buf,
        })
    }

    /// read one more tag
    async fn next(&mut self) -> Result<Event<'static>, ParsingError> {
        let evt = self
            .rdr
            .read_event_into_async(&mut self.buf)
            .await?
            .into_owned();
        self.buf.clear();
        self.prev = std::mem::replace(&mut self.cur, evt);
        Ok(self.prev.clone())
    }

    /// skip a node at the current level
    pub async fn skip(&mut self) -> Result<Event<'static>, ParsingError> {
        match &self.cur {
            Event::Start(b) => {
                let _span = self
                    .rdr
                    .read_to_end_into_async(b.to_end().name(), &mut self.buf)
                    .await?;
                self.next().await
            }
            Event::End(_) => Err(ParsingError::WrongToken),
            Event::Eof => Err(ParsingError::Eof),
            _ => self.next().await,
        }
    }

    /// check if this is the desired tag
    fn is_tag(&self, ns: &str, key: &str) -> bool {
        match self.peek_qname() {
            Some(qn) => qn.ns == ns && qn.local == key,
            None => false,
        }
    }

    /// resolve the name of the element the cursor sits on
    fn peek_qname(&self) -> Option<QName> {
        let qname = match self.peek() {
            Event::Start(bs) | Event::Empty(bs) => bs.name(),
            Event::End(be) => be.name(),
            _ => return None,
        };

        let (extr_ns, local) = self.rdr.resolve_element(qname);
        let local = std::str::from_utf8(local.into_inner()).ok()?.to_string();
        let ns = match extr_ns {
            ResolveResult::Bound(v) => std::str::from_utf8(v.into_inner()).ok()?.to_string(),
            _ => String::new(),
        };
        Some(QName::new(ns, local))
    }

    pub fn parent_has_child(&self) -> bool {
        matches!(self.parents.last(), Some(Event::Start(_)) | None)
    }

    fn ensure_parent_has_child(&self) -> Result<(), ParsingError> {
        match self.parent_has_child() {
            true => Ok(()),
            false => Err(ParsingError::Recoverable),
        }
    }

    pub fn peek(&self) -> &Event<'static> {
        &self.cur
    }

    /// accumulate text up to the next element boundary
    pub async fn tag_string(&mut self) -> Result<String, ParsingError> {
        if !self.parent_has_child() {
            // self-closed tags hold no text
            return Ok(String::new());
        }

        let mut acc = String::new();
        loop {
            match self.peek() {
                Event::CData(unescaped) => {
                    acc.push_str(std::str::from_utf8(unescaped.as_ref())?);
                    self.next().await?
                }
                Event::Text(escaped) => {
                    acc.push_str(escaped.unescape()?.as_ref());
                    self.next().await?
                }
                Event::End(_) | Event::Start(_) | Event::Empty(_) => return Ok(acc),
                Event::Eof => return Err(ParsingError::Eof),
                _ => self.next().await?,
            };
        }
    }

    /// Seek the first node the target type knows how to parse, skipping
    /// anything else on the way (including leading garbage documents).
    pub async fn find<N: QRead<N>>(&mut self) -> Result<N, ParsingError> {
        self.ensure_parent_has_child()?;

        loop {
            // Try parse
            match N::qread(self).await {
                Err(ParsingError::Recoverable) => (),
                otherwise => return otherwise,
            }

            // If recovered, skip the element
            self.skip().await?;
        }
    }

    pub async fn open(&mut self, ns: &str, key: &str) -> Result<Event<'static>, ParsingError> {
        let evt = match self.peek() {
            Event::Empty(_) if self.is_tag(ns, key) => {
                // hack to make the close()/parent_has_child() logic work on
                // an empty node: the tag is virtually duplicated so that the
                // cursor appears to have moved one token
                self.prev = self.cur.clone();
                self.cur.clone()
            }
            Event::Start(_) if self.is_tag(ns, key) => self.next().await?,
            _ => return Err(ParsingError::Recoverable),
        };

        self.parents.push(evt.clone());
        Ok(evt)
    }

    pub async fn maybe_open(
        &mut self,
        ns: &str,
        key: &str,
    ) -> Result<Option<Event<'static>>, ParsingError> {
        match self.open(ns, key).await {
            Ok(v) => Ok(Some(v)),
            Err(ParsingError::Recoverable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open the next child element whatever its name, returning its Clark
    /// name. Text and comments before it are skipped; the end of the parent
    /// is reported as Recoverable.
    pub async fn open_any(&mut self) -> Result<QName, ParsingError> {
        self.ensure_parent_has_child()?;

        loop {
            match self.peek() {
                Event::Start(_) | Event::Empty(_) => break,
                Event::End(_) => return Err(ParsingError::Recoverable),
                Event::Eof => return Err(ParsingError::Eof),
                _ => self.next().await?,
            };
        }

        let name = self.peek_qname().ok_or(ParsingError::WrongToken)?;
        let evt = match self.peek() {
            Event::Empty(_) => {
                self.prev = self.cur.clone();
                self.cur.clone()
            }
            _ => self.next().await?,
        };
        self.parents.push(evt);
        Ok(name)
    }

    /// find the closing tag of the currently open element
    pub async fn close(&mut self) -> Result<Event<'static>, ParsingError> {
        // Handle the empty case
        if !self.parent_has_child() {
            self.parents.pop();
            return self.next().await;
        }

        // Handle the start/end case
        loop {
            match self.peek() {
                Event::End(_) => {
                    self.parents.pop();
                    return self.next().await;
                }
                _ => self.skip().await?,
            };
        }
    }
}
