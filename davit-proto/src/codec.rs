use std::io::{Error, ErrorKind};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::sink::SinkExt;
use futures::stream::{StreamExt, TryStreamExt};
use http::header::HeaderMap;
use http::status::StatusCode;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::{Request, Response};
use tokio_util::io::{CopyToBytes, SinkWriter};
use tokio_util::sync::PollSender;

use davit_xml::error::ParsingError;
use davit_xml::types::Depth;
use davit_xml::xml;

use crate::error::DavError;
use crate::node::Content;

pub type HttpBody = UnsyncBoxBody<Bytes, std::io::Error>;
pub type HttpRequest = Request<HttpBody>;
pub type HttpResponse = Response<HttpBody>;

pub fn text_body(txt: &'static str) -> HttpBody {
    UnsyncBoxBody::new(Full::new(Bytes::from(txt)).map_err(|e| match e {}))
}

pub fn bytes_body(bytes: Bytes) -> HttpBody {
    UnsyncBoxBody::new(Full::new(bytes).map_err(|e| match e {}))
}

pub fn empty_body() -> HttpBody {
    text_body("")
}

pub fn stream_body(stream: Content) -> HttpBody {
    UnsyncBoxBody::new(StreamBody::new(stream.map_ok(Frame::data)))
}

/// Buffer a (small) request body. PUT bodies never go through here, they
/// are spooled to the staging area instead.
pub async fn collect_body(body: HttpBody) -> Result<Bytes, DavError> {
    Ok(body
        .collect()
        .await
        .map_err(|e| DavError::BadRequest(format!("Unable to read the request body: {}", e)))?
        .to_bytes())
}

/// Open a recoverable XML reader over a buffered body.
pub async fn xml_reader(bytes: &[u8]) -> Result<xml::Reader<&[u8]>, ParsingError> {
    xml::Reader::new(quick_xml::reader::NsReader::from_reader(bytes)).await
}

/// Serialize an XML element as a streamed response body.
pub fn serialize<T: xml::QWrite + Send + 'static>(
    status: StatusCode,
    elem: T,
) -> Result<HttpResponse, DavError> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(1);

    // Build the writer
    tokio::task::spawn(async move {
        let sink = PollSender::new(tx).sink_map_err(|_| Error::from(ErrorKind::BrokenPipe));
        let mut writer = SinkWriter::new(CopyToBytes::new(sink));
        let q = quick_xml::writer::Writer::new_with_indent(&mut writer, b' ', 4);
        let mut qwriter = xml::Writer::new(q);
        let decl =
            quick_xml::events::BytesDecl::from_start(quick_xml::events::BytesStart::from_content(
                "xml version=\"1.0\" encoding=\"utf-8\"",
                0,
            ));
        match qwriter
            .q
            .write_event_async(quick_xml::events::Event::Decl(decl))
            .await
        {
            Ok(_) => (),
            Err(e) => tracing::error!(err=?e, "unable to write XML declaration <?xml ... >"),
        }
        match elem.qwrite(&mut qwriter).await {
            Ok(_) => tracing::trace!("fully serialized object"),
            Err(e) => tracing::error!(err=?e, "failed to serialize object"),
        }
    });

    // Build the reader
    let recv = tokio_stream::wrappers::ReceiverStream::new(rx);
    let stream = StreamBody::new(recv.map(|v| Ok(Frame::data(v))));
    let boxed_body = UnsyncBoxBody::new(stream);

    let response = Response::builder()
        .status(status)
        .header("Content-Type", "application/xml; charset=utf-8")
        .body(boxed_body)?;

    Ok(response)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Parse the `Depth` header. Numeric depths collapse onto {0, 1}; an empty
/// or missing header yields the caller's fallback; anything else is a 400.
pub fn depth(headers: &HeaderMap, fallback: Depth) -> Result<Depth, DavError> {
    let raw = match header_str(headers, "Depth").map(str::trim) {
        None | Some("") => return Ok(fallback),
        Some(v) => v,
    };
    if raw.eq_ignore_ascii_case("infinity") {
        return Ok(Depth::Infinity);
    }
    match raw.parse::<u32>() {
        Ok(0) => Ok(Depth::Zero),
        Ok(_) => Ok(Depth::One),
        Err(_) => Err(DavError::BadRequest(format!(
            "The HTTP Depth header must be 0, 1 or infinity, got: {}",
            raw
        ))),
    }
}

/// Parse the `Overwrite` header; absent means `T`.
pub fn overwrite(headers: &HeaderMap) -> Result<bool, DavError> {
    match header_str(headers, "Overwrite").map(str::trim) {
        None | Some("") => Ok(true),
        Some("T") => Ok(true),
        Some("F") => Ok(false),
        Some(other) => Err(DavError::BadRequest(format!(
            "The HTTP Overwrite header should be either T or F, got: {}",
            other
        ))),
    }
}

/// The `Destination` header, mandatory for COPY and MOVE.
pub fn destination(headers: &HeaderMap) -> Result<String, DavError> {
    header_str(headers, "Destination")
        .map(str::to_string)
        .ok_or_else(|| {
            DavError::BadRequest("The destination header was not supplied".to_string())
        })
}

/// A `Range: bytes=s-e` header with both sides optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Parse the `Range` header. Anything that does not match the single-range
/// byte grammar is ignored, as is an empty `bytes=-`.
pub fn range(headers: &HeaderMap) -> Option<HttpRange> {
    let raw = header_str(headers, "Range")?.trim();
    let window = raw.strip_prefix("bytes=")?.trim();
    let (start_txt, end_txt) = window.split_once('-')?;
    let parse = |txt: &str| -> Result<Option<u64>, ()> {
        let txt = txt.trim();
        if txt.is_empty() {
            return Ok(None);
        }
        txt.parse::<u64>().map(Some).map_err(|_| ())
    };
    let (start, end) = match (parse(start_txt), parse(end_txt)) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return None,
    };
    if start.is_none() && end.is_none() {
        return None;
    }
    Some(HttpRange { start, end })
}

/// Resolve a parsed range against the entity size, yielding the inclusive
/// `(first, last)` byte offsets or a 416.
pub fn resolve_range(range: &HttpRange, size: u64) -> Result<(u64, u64), DavError> {
    let (start, end) = match (range.start, range.end) {
        // last-n form
        (None, Some(n)) => (size.saturating_sub(n), size.saturating_sub(1)),
        (Some(s), e) => {
            if let Some(e) = e {
                if e < s {
                    return Err(DavError::RangeNotSatisfiable(format!(
                        "The end offset ({}) is lower than the start offset ({})",
                        e, s
                    )));
                }
            }
            (s, e.map_or(size.saturating_sub(1), |e| e.min(size.saturating_sub(1))))
        }
        (None, None) => {
            return Err(DavError::BadRequest(
                "A range needs at least one of its offsets".into(),
            ))
        }
    };
    if size == 0 || start >= size {
        return Err(DavError::RangeNotSatisfiable(format!(
            "The start offset ({}) exceeds the size of the entity ({})",
            start, size
        )));
    }
    Ok((start, end))
}

/// Whether an `If-Range` header permits serving the range. A missing header
/// always does; an etag form must match the current etag; a date form must
/// be no older than the current modification time.
pub fn if_range_matches(
    headers: &HeaderMap,
    etag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
) -> bool {
    let raw = match header_str(headers, "If-Range").map(str::trim) {
        None | Some("") => return true,
        Some(v) => v,
    };
    if raw.contains('"') {
        return etag.is_some_and(|e| e == raw.trim_matches('"'));
    }
    match (httpdate::parse_http_date(raw), last_modified) {
        (Ok(header_date), Some(modified)) => {
            modified.timestamp() <= DateTime::<Utc>::from(header_date).timestamp()
        }
        _ => false,
    }
}

/// Byte-range slicing of a content stream: forward `len` bytes starting at
/// `start`, ending the stream as soon as the window is exhausted.
pub fn slice_stream(stream: Content, start: u64, len: u64) -> Content {
    let end = start + len;
    stream
        .scan(0u64, move |pos, item| {
            let out = match item {
                Ok(chunk) => {
                    let chunk_start = *pos;
                    if chunk_start >= end {
                        return futures::future::ready(None);
                    }
                    *pos += chunk.len() as u64;
                    let lo = start.max(chunk_start);
                    let hi = end.min(chunk_start + chunk.len() as u64);
                    if lo < hi {
                        Some(Ok(chunk.slice((lo - chunk_start) as usize..(hi - chunk_start) as usize)))
                    } else {
                        Some(Ok(Bytes::new()))
                    }
                }
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(out)
        })
        .try_filter(|chunk| futures::future::ready(!chunk.is_empty()))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn depth_header_parsing() {
        assert_eq!(depth(&headers(&[]), Depth::One).unwrap(), Depth::One);
        assert_eq!(depth(&headers(&[("Depth", "0")]), Depth::One).unwrap(), Depth::Zero);
        assert_eq!(depth(&headers(&[("Depth", "1")]), Depth::Zero).unwrap(), Depth::One);
        assert_eq!(
            depth(&headers(&[("Depth", "infinity")]), Depth::Zero).unwrap(),
            Depth::Infinity
        );
        assert_eq!(depth(&headers(&[("Depth", "")]), Depth::Zero).unwrap(), Depth::Zero);
        assert!(depth(&headers(&[("Depth", "deep")]), Depth::Zero).is_err());
    }

    #[test]
    fn overwrite_header_parsing() {
        assert!(overwrite(&headers(&[])).unwrap());
        assert!(overwrite(&headers(&[("Overwrite", "T")])).unwrap());
        assert!(!overwrite(&headers(&[("Overwrite", "F")])).unwrap());
        assert!(overwrite(&headers(&[("Overwrite", "yes")])).is_err());
    }

    #[test]
    fn range_header_grammar() {
        assert_eq!(
            range(&headers(&[("Range", "bytes=0-4")])),
            Some(HttpRange { start: Some(0), end: Some(4) })
        );
        assert_eq!(
            range(&headers(&[("Range", "bytes=5-")])),
            Some(HttpRange { start: Some(5), end: None })
        );
        assert_eq!(
            range(&headers(&[("Range", "bytes=-3")])),
            Some(HttpRange { start: None, end: Some(3) })
        );
        // ignored forms
        assert_eq!(range(&headers(&[("Range", "bytes=-")])), None);
        assert_eq!(range(&headers(&[("Range", "items=0-4")])), None);
        assert_eq!(range(&headers(&[("Range", "bytes=a-b")])), None);
        assert_eq!(range(&headers(&[])), None);
    }

    #[test]
    fn range_resolution() {
        let r = |s, e| HttpRange { start: s, end: e };
        assert_eq!(resolve_range(&r(Some(0), Some(4)), 10).unwrap(), (0, 4));
        assert_eq!(resolve_range(&r(Some(5), None), 10).unwrap(), (5, 9));
        assert_eq!(resolve_range(&r(None, Some(3)), 10).unwrap(), (7, 9));
        assert_eq!(resolve_range(&r(Some(0), Some(99)), 10).unwrap(), (0, 9));
        assert!(resolve_range(&r(Some(10), None), 10).is_err());
        assert!(resolve_range(&r(Some(4), Some(2)), 10).is_err());
        assert!(resolve_range(&r(Some(0), None), 0).is_err());
    }

    #[test]
    fn if_range_gate() {
        assert!(if_range_matches(&headers(&[]), None, None));
        assert!(if_range_matches(
            &headers(&[("If-Range", "\"abc\"")]),
            Some("abc"),
            None
        ));
        assert!(!if_range_matches(
            &headers(&[("If-Range", "\"abc\"")]),
            Some("xyz"),
            None
        ));
        let modified = DateTime::parse_from_rfc2822("Fri, 13 Oct 2023 10:00:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert!(if_range_matches(
            &headers(&[("If-Range", "Sat, 14 Oct 2023 10:00:00 GMT")]),
            None,
            Some(modified)
        ));
        assert!(!if_range_matches(
            &headers(&[("If-Range", "Thu, 12 Oct 2023 10:00:00 GMT")]),
            None,
            Some(modified)
        ));
    }

    #[tokio::test]
    async fn stream_slicing() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abcd")),
            Ok(Bytes::from_static(b"efgh")),
            Ok(Bytes::from_static(b"ij")),
        ];
        let stream = futures::stream::iter(chunks).boxed();
        let sliced: Vec<Bytes> = slice_stream(stream, 2, 5)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        let merged: Vec<u8> = sliced.into_iter().flatten().collect();
        assert_eq!(merged, b"cdefg");
    }

    #[tokio::test]
    async fn stream_slicing_from_start() {
        let stream = futures::stream::iter(vec![Ok(Bytes::from_static(b"abcdefghij"))]).boxed();
        let sliced: Vec<Bytes> = slice_stream(stream, 0, 5).try_collect().await.unwrap();
        let merged: Vec<u8> = sliced.into_iter().flatten().collect();
        assert_eq!(merged, b"abcde");
    }
}
