use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use hyper::server::conn::http1 as http;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;

use davit_xml::types::PropertyRegistry;

use crate::codec::{self, HttpRequest, HttpResponse};
use crate::controller::Controller;
use crate::hook::{DavPlugin, HookStack};
use crate::tree::DavTree;
use crate::uri::BaseUri;

/// The frozen half of the server: tree, hooks, registry, base URI and
/// staging directory are set up before `listen` and read-only afterwards.
/// Per-request state lives on the request controller, never here.
pub struct DavServer {
    pub(crate) tree: Arc<dyn DavTree>,
    pub(crate) base_uri: BaseUri,
    pub(crate) hooks: HookStack,
    pub(crate) registry: PropertyRegistry,
    pub(crate) staging_dir: PathBuf,
}

impl DavServer {
    pub fn new(tree: Arc<dyn DavTree>, base_uri: &str, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            tree,
            base_uri: BaseUri::new(base_uri),
            hooks: HookStack::default(),
            registry: PropertyRegistry::default(),
            staging_dir: staging_dir.into(),
        }
    }

    /// Register a plugin. Only possible before the server starts serving;
    /// the plugin set is frozen afterwards.
    pub fn register_plugin(&mut self, plugin: Arc<dyn DavPlugin>) {
        self.hooks.register(plugin);
    }

    /// The property registry, for plugins that bring typed properties.
    pub fn registry_mut(&mut self) -> &mut PropertyRegistry {
        &mut self.registry
    }

    pub fn base_uri(&self) -> &str {
        self.base_uri.as_str()
    }

    /// Handle one request. This is the whole dispatcher; the network loop
    /// in [`Server::run`] and the tests call the same entry point.
    pub async fn handle(self: &Arc<Self>, req: HttpRequest) -> Result<HttpResponse> {
        Controller::route(self.clone(), req).await
    }
}

/// The network front of a [`DavServer`].
pub struct Server {
    bind_addr: SocketAddr,
    dav: Arc<DavServer>,
}

impl Server {
    pub fn new(bind_addr: SocketAddr, dav: DavServer) -> Self {
        Self {
            bind_addr,
            dav: Arc::new(dav),
        }
    }

    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!("DAV server listening on {:#}", self.bind_addr);

        let mut connections = FuturesUnordered::new();
        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::trace!("accepted connection from {}", remote_addr);

            let dav = self.dav.clone();
            let conn = tokio::spawn(async move {
                match http::Builder::new()
                    .serve_connection(
                        TokioIo::new(socket),
                        service_fn(move |req: Request<hyper::body::Incoming>| {
                            let dav = dav.clone();
                            async move {
                                let req = req.map(|body| {
                                    UnsyncBoxBody::new(body.map_err(|e| {
                                        std::io::Error::new(std::io::ErrorKind::Other, e)
                                    }))
                                });
                                match dav.handle(req).await {
                                    Ok(response) => Ok(response),
                                    Err(e) => {
                                        tracing::error!(err=?e, "internal error");
                                        Response::builder()
                                            .status(500)
                                            .body(codec::text_body("Internal error"))
                                    }
                                }
                            }
                        }),
                    )
                    .await
                {
                    Err(e) => tracing::warn!(err=?e, "connection failed"),
                    Ok(()) => tracing::trace!("connection terminated with success"),
                }
            });
            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("Server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }
}
