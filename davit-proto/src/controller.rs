use std::sync::Arc;

use anyhow::Result;
use http::header::{HeaderName, HeaderValue};
use http::status::StatusCode;
use hyper::Response;

use davit_xml::name::QName;
use davit_xml::types::{Depth, ErrorBody, Mkcol, Multistatus, PropFind, PropertyUpdate, ReportStart, Value};

use crate::binding::Bound;
use crate::codec::{self, HttpRequest, HttpResponse};
use crate::cond::{self, CondOutcome};
use crate::error::DavError;
use crate::hook::Flow;
use crate::props::PropQuery;
use crate::server::DavServer;
use crate::staging::StagedBody;
use crate::VERSION;

/// Per-request state: the server handle, the request, and the path already
/// resolved against the base URI. Everything else lives on the (frozen)
/// server.
pub(crate) struct Controller {
    srv: Arc<DavServer>,
    req: HttpRequest,
    path: String,
}

impl Controller {
    /// HTTP entry point: route to the method handler and convert any error
    /// into the WebDAV XML error envelope.
    pub(crate) async fn route(srv: Arc<DavServer>, req: HttpRequest) -> Result<HttpResponse> {
        let method = req.method().as_str().to_uppercase();
        let raw_uri = req.uri().to_string();
        tracing::debug!(method = %method, uri = %raw_uri, "dispatching request");

        let mut response = match Self::dispatch(srv, req, &method).await {
            Ok(response) => response,
            Err(err) => Self::error_response(&method, &raw_uri, err)?,
        };
        response.headers_mut().insert(
            HeaderName::from_static("x-davit-version"),
            HeaderValue::from_static(VERSION),
        );
        Ok(response)
    }

    async fn dispatch(
        srv: Arc<DavServer>,
        req: HttpRequest,
        method: &str,
    ) -> Result<HttpResponse, DavError> {
        let path = srv.base_uri.calculate_uri(&req.uri().to_string())?;

        match srv.hooks.before_method(method, &path, req.headers()).await? {
            Flow::Handled(response) => return Ok(response),
            Flow::Pass => {}
        }

        let ctrl = Controller { srv, req, path };
        match method {
            "OPTIONS" => ctrl.options().await,
            "GET" => ctrl.get().await,
            "HEAD" => ctrl.head().await,
            "PUT" => ctrl.put().await,
            "DELETE" => ctrl.delete().await,
            "MKCOL" => ctrl.mkcol().await,
            "COPY" => ctrl.copy_move(false).await,
            "MOVE" => ctrl.copy_move(true).await,
            "PROPFIND" => ctrl.propfind().await,
            "PROPPATCH" => ctrl.proppatch().await,
            "REPORT" => ctrl.report().await,
            other => ctrl.unknown(other).await,
        }
    }

    /// Centralized error conversion; every handler surfaces errors here
    /// instead of writing partial responses.
    fn error_response(method: &str, uri: &str, err: DavError) -> Result<HttpResponse> {
        tracing::warn!(method = %method, uri = %uri, err = %err, "request failed");
        let body = ErrorBody {
            kind: err.kind().to_string(),
            message: err.message().to_string(),
            condition: err.condition(),
            version: VERSION.to_string(),
        };
        let mut response = codec::serialize(err.status(), body)?;
        for (name, value) in err.extra_headers() {
            response.headers_mut().insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }
        Ok(response)
    }

    // --- Per-method handlers ---

    async fn options(self) -> Result<HttpResponse, DavError> {
        let mut allow: Vec<String> = [
            "OPTIONS", "GET", "HEAD", "DELETE", "PROPFIND", "PUT", "PROPPATCH", "COPY", "MOVE",
            "REPORT",
        ]
        .iter()
        .map(|v| v.to_string())
        .collect();
        // MKCOL can only create what is not mapped yet
        if self.srv.tree.node_for_path(&self.path).await.is_err() {
            allow.push("MKCOL".to_string());
        }
        allow.extend(self.srv.hooks.http_methods(&self.path));

        let mut dav: Vec<String> = ["1", "3", "extended-mkcol"]
            .iter()
            .map(|v| v.to_string())
            .collect();
        dav.extend(self.srv.hooks.features());

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Allow", allow.join(","))
            .header("DAV", dav.join(","))
            .header("MS-Author-Via", "DAV")
            .header("Accept-Ranges", "bytes")
            .header("Content-Length", "0")
            .body(codec::empty_body())?)
    }

    async fn get(self) -> Result<HttpResponse, DavError> {
        let node = match self.srv.tree.node_for_path(&self.path).await {
            Ok(node) => Some(node),
            Err(DavError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if cond::evaluate(self.req.headers(), node.as_deref(), true).await?
            == CondOutcome::NotModified
        {
            return Ok(Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(codec::empty_body())?);
        }

        let node = node.ok_or_else(|| {
            DavError::NotFound(format!("File with name {} could not be located", self.path))
        })?;
        let file = node
            .as_file()
            .ok_or_else(|| DavError::NotImplemented("GET is only implemented on files".into()))?;

        let mut headers = self.srv.http_headers(node.as_ref()).await?;
        if !headers.iter().any(|(name, _)| *name == "Content-Type") {
            headers.push(("Content-Type", "application/octet-stream".to_string()));
        }

        if let (Some(range), Some(size)) = (codec::range(self.req.headers()), file.size().await) {
            let etag = file.etag().await;
            let modified = file.last_modified().await;
            if codec::if_range_matches(self.req.headers(), etag.as_deref(), modified) {
                let (start, end) = codec::resolve_range(&range, size)?;
                let len = end - start + 1;
                let mut builder = Response::builder().status(StatusCode::PARTIAL_CONTENT);
                for (name, value) in headers {
                    if name == "Content-Length" {
                        continue;
                    }
                    builder = builder.header(name, value);
                }
                return Ok(builder
                    .header("Content-Length", len.to_string())
                    .header("Content-Range", format!("bytes {}-{}/{}", start, end, size))
                    .body(codec::stream_body(codec::slice_stream(
                        file.content(),
                        start,
                        len,
                    )))?);
            }
        }

        let mut builder = Response::builder().status(StatusCode::OK);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        Ok(builder.body(codec::stream_body(file.content()))?)
    }

    /// Same headers as GET without the body. Non-files answer a bare 200
    /// instead of an error, which keeps a family of legacy office clients
    /// working.
    async fn head(self) -> Result<HttpResponse, DavError> {
        let node = self.srv.tree.node_for_path(&self.path).await?;
        let mut builder = Response::builder().status(StatusCode::OK);
        if node.as_file().is_some() {
            let mut headers = self.srv.http_headers(node.as_ref()).await?;
            if !headers.iter().any(|(name, _)| *name == "Content-Type") {
                headers.push(("Content-Type", "application/octet-stream".to_string()));
            }
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
        }
        Ok(builder.body(codec::empty_body())?)
    }

    async fn put(self) -> Result<HttpResponse, DavError> {
        let (parts, body) = self.req.into_parts();
        // the body is staged first and removed again when this handler
        // exits, on every path
        let staged = StagedBody::spool(&self.srv.staging_dir, body).await?;

        let existing = match self.srv.tree.node_for_path(&self.path).await {
            Ok(node) => Some(node),
            Err(DavError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        match existing {
            Some(node) => {
                if cond::evaluate(&parts.headers, Some(node.as_ref()), false).await?
                    == CondOutcome::NotModified
                {
                    return Ok(Response::builder()
                        .status(StatusCode::NOT_MODIFIED)
                        .body(codec::empty_body())?);
                }
                let file = node
                    .as_file()
                    .ok_or_else(|| DavError::Conflict("PUT is not allowed on non-files".into()))?;
                match self
                    .srv
                    .hooks
                    .before_write_content(&self.path, &staged)
                    .await?
                {
                    Flow::Handled(response) => return Ok(response),
                    Flow::Pass => {}
                }
                let etag = file.put(staged.stream().await?).await?;
                let mut builder = Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Length", "0");
                if let Some(etag) = etag {
                    builder = builder.header("ETag", format!("\"{}\"", etag));
                }
                Ok(builder.body(codec::empty_body())?)
            }
            None => match self.srv.create_file(&self.path, &staged).await? {
                Bound::Intercepted(response) => Ok(response),
                Bound::Done(etag) => {
                    let mut builder = Response::builder()
                        .status(StatusCode::CREATED)
                        .header("Content-Length", "0");
                    if let Some(etag) = etag {
                        builder = builder.header("ETag", format!("\"{}\"", etag));
                    }
                    Ok(builder.body(codec::empty_body())?)
                }
            },
        }
    }

    async fn delete(self) -> Result<HttpResponse, DavError> {
        let node = self.srv.tree.node_for_path(&self.path).await?;
        match self.srv.hooks.before_unbind(&self.path).await? {
            Flow::Handled(response) => return Ok(response),
            Flow::Pass => {}
        }
        node.delete().await?;
        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Content-Length", "0")
            .body(codec::empty_body())?)
    }

    async fn mkcol(self) -> Result<HttpResponse, DavError> {
        let (parts, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;

        let (resource_types, props) = if bytes.is_empty() {
            (vec![QName::dav("collection")], vec![])
        } else {
            let content_type = parts
                .headers
                .get("Content-Type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let essence = content_type.split(';').next().unwrap_or("").trim();
            if essence != "application/xml" && essence != "text/xml" {
                return Err(DavError::UnsupportedMediaType(
                    "The request body for the MKCOL request must have an xml Content-Type".into(),
                ));
            }

            let mut rdr = codec::xml_reader(&bytes).await?;
            let mkcol = Mkcol::find_with(&mut rdr, &self.srv.registry).await?;

            let mut props = mkcol.props;
            let position = props
                .iter()
                .position(|(name, _)| name.is_dav("resourcetype"))
                .ok_or_else(|| {
                    DavError::BadRequest(
                        "The mkcol request must include a {DAV:}resourcetype property".into(),
                    )
                })?;
            let (_, resourcetype) = props.remove(position);
            let resource_types = match resourcetype {
                Value::QNames(names) => names,
                _ => {
                    return Err(DavError::BadRequest(
                        "The {DAV:}resourcetype property must hold resource type elements".into(),
                    ))
                }
            };
            (resource_types, props)
        };

        match self
            .srv
            .create_collection(&self.path, &resource_types, &props)
            .await?
        {
            Bound::Intercepted(response) => Ok(response),
            Bound::Done(None) => Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("Content-Length", "0")
                .body(codec::empty_body())?),
            Bound::Done(Some(entry)) => codec::serialize(
                StatusCode::MULTI_STATUS,
                Multistatus {
                    responses: vec![entry],
                },
            ),
        }
    }

    async fn copy_move(self, is_move: bool) -> Result<HttpResponse, DavError> {
        let info = self.srv.copy_move_info(self.req.headers()).await?;

        // the source must resolve before any mutation happens
        self.srv.tree.node_for_path(&self.path).await?;

        if info.destination_exists {
            match self.srv.hooks.before_unbind(&info.destination).await? {
                Flow::Handled(response) => return Ok(response),
                Flow::Pass => {}
            }
            let destination = self.srv.tree.node_for_path(&info.destination).await?;
            destination.delete().await?;
        }

        match self.srv.hooks.before_bind(&info.destination).await? {
            Flow::Handled(response) => return Ok(response),
            Flow::Pass => {}
        }
        if is_move {
            self.srv
                .tree
                .move_node(&self.path, &info.destination)
                .await?;
        } else {
            self.srv.tree.copy(&self.path, &info.destination).await?;
        }
        self.srv.hooks.after_bind(&info.destination).await?;

        let status = if info.destination_exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(Response::builder()
            .status(status)
            .header("Content-Length", "0")
            .body(codec::empty_body())?)
    }

    async fn propfind(self) -> Result<HttpResponse, DavError> {
        let depth = match codec::depth(self.req.headers(), Depth::One)? {
            // infinite traversal is not supported at the core
            Depth::Infinity => Depth::One,
            depth => depth,
        };

        let (_, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;

        // An empty PROPFIND request body MUST be treated as an allprop
        // request.
        let query = if bytes.is_empty() {
            PropQuery::AllProp(vec![])
        } else {
            let mut rdr = codec::xml_reader(&bytes).await?;
            match rdr.find::<PropFind>().await? {
                PropFind::Prop(names) => PropQuery::Named(names),
                PropFind::AllProp(include) => PropQuery::AllProp(include.unwrap_or_default()),
                PropFind::PropName => PropQuery::AllProp(vec![]),
            }
        };

        let entries = self
            .srv
            .properties_for_path(&self.path, &query, depth)
            .await?;
        codec::serialize(StatusCode::MULTI_STATUS, Multistatus { responses: entries })
    }

    async fn proppatch(self) -> Result<HttpResponse, DavError> {
        let (_, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;
        if bytes.is_empty() {
            return Err(DavError::BadRequest(
                "The PROPPATCH request body must be a propertyupdate document".into(),
            ));
        }
        let mut rdr = codec::xml_reader(&bytes).await?;
        let update = PropertyUpdate::find_with(&mut rdr, &self.srv.registry).await?;

        let entry = self.srv.update_properties(&self.path, &update.0).await?;
        codec::serialize(
            StatusCode::MULTI_STATUS,
            Multistatus {
                responses: vec![entry],
            },
        )
    }

    async fn report(self) -> Result<HttpResponse, DavError> {
        let (_, body) = self.req.into_parts();
        let bytes = codec::collect_body(body).await?;
        if bytes.is_empty() {
            return Err(DavError::BadRequest(
                "The REPORT request body must name the requested report".into(),
            ));
        }
        let mut rdr = codec::xml_reader(&bytes).await?;
        let report = rdr.find::<ReportStart>().await?;

        match self.srv.hooks.report(&self.path, &report).await? {
            Some(response) => Ok(response),
            None => Err(DavError::ReportNotImplemented(format!(
                "The report {} is not supported by this server",
                report.name
            ))),
        }
    }

    async fn unknown(self, method: &str) -> Result<HttpResponse, DavError> {
        match self.srv.hooks.unknown_method(method, &self.path).await? {
            Flow::Handled(response) => Ok(response),
            Flow::Pass => Err(DavError::NotImplemented(format!(
                "There was no handler found for this {} method",
                method
            ))),
        }
    }
}
