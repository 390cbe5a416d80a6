use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use http::header::HeaderMap;

use davit_xml::types::{PropEntry, ReportStart};

use crate::codec::HttpResponse;
use crate::error::DavError;
use crate::staging::StagedBody;

/// What a guarding hook decided.
///
/// `Handled` is the veto: the plugin wrote the response and the guarded
/// operation must not run. Aborting with a status instead goes through
/// `Err(DavError)`.
pub enum Flow {
    Pass,
    Handled(HttpResponse),
}

/// The extension surface of the server.
///
/// One method per core event, invoked in plugin registration order; the
/// default implementations pass. Plugins additionally contribute verbs to
/// `Allow` and feature tokens to the `DAV` header.
pub trait DavPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tokens appended to the `DAV` response header.
    fn features(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extra verbs this plugin serves for the given path.
    fn http_methods(&self, _uri: &str) -> Vec<String> {
        Vec::new()
    }

    fn before_method<'a>(
        &'a self,
        _method: &'a str,
        _uri: &'a str,
        _headers: &'a HeaderMap,
    ) -> BoxFuture<'a, Result<Flow, DavError>> {
        future::ok(Flow::Pass).boxed()
    }

    fn unknown_method<'a>(
        &'a self,
        _method: &'a str,
        _uri: &'a str,
    ) -> BoxFuture<'a, Result<Flow, DavError>> {
        future::ok(Flow::Pass).boxed()
    }

    fn before_bind<'a>(&'a self, _uri: &'a str) -> BoxFuture<'a, Result<Flow, DavError>> {
        future::ok(Flow::Pass).boxed()
    }

    fn before_unbind<'a>(&'a self, _uri: &'a str) -> BoxFuture<'a, Result<Flow, DavError>> {
        future::ok(Flow::Pass).boxed()
    }

    fn after_bind<'a>(&'a self, _uri: &'a str) -> BoxFuture<'a, Result<(), DavError>> {
        future::ok(()).boxed()
    }

    fn before_create_file<'a>(
        &'a self,
        _uri: &'a str,
        _body: &'a StagedBody,
    ) -> BoxFuture<'a, Result<Flow, DavError>> {
        future::ok(Flow::Pass).boxed()
    }

    fn before_write_content<'a>(
        &'a self,
        _uri: &'a str,
        _body: &'a StagedBody,
    ) -> BoxFuture<'a, Result<Flow, DavError>> {
        future::ok(Flow::Pass).boxed()
    }

    /// Runs after property gathering for one resource; the entry may be
    /// rewritten in place.
    fn after_get_properties<'a>(
        &'a self,
        _path: &'a str,
        _entry: &'a mut PropEntry,
    ) -> BoxFuture<'a, Result<(), DavError>> {
        future::ok(()).boxed()
    }

    /// Serve a REPORT. The first plugin returning a response wins; when
    /// none does the dispatcher answers ReportNotImplemented.
    fn report<'a>(
        &'a self,
        _uri: &'a str,
        _report: &'a ReportStart,
    ) -> BoxFuture<'a, Result<Option<HttpResponse>, DavError>> {
        future::ok(None).boxed()
    }
}

/// The registered plugins, in order. Filled before the server starts
/// listening and read-only afterwards.
#[derive(Default)]
pub struct HookStack {
    plugins: Vec<Arc<dyn DavPlugin>>,
}

impl HookStack {
    pub fn register(&mut self, plugin: Arc<dyn DavPlugin>) {
        tracing::debug!(plugin = plugin.name(), "registering plugin");
        self.plugins.push(plugin);
    }

    pub fn features(&self) -> Vec<String> {
        self.plugins.iter().flat_map(|p| p.features()).collect()
    }

    pub fn http_methods(&self, uri: &str) -> Vec<String> {
        self.plugins
            .iter()
            .flat_map(|p| p.http_methods(uri))
            .collect()
    }

    pub async fn before_method(
        &self,
        method: &str,
        uri: &str,
        headers: &HeaderMap,
    ) -> Result<Flow, DavError> {
        for plugin in &self.plugins {
            match plugin.before_method(method, uri, headers).await? {
                Flow::Pass => continue,
                handled => return Ok(handled),
            }
        }
        Ok(Flow::Pass)
    }

    pub async fn unknown_method(&self, method: &str, uri: &str) -> Result<Flow, DavError> {
        for plugin in &self.plugins {
            match plugin.unknown_method(method, uri).await? {
                Flow::Pass => continue,
                handled => return Ok(handled),
            }
        }
        Ok(Flow::Pass)
    }

    pub async fn before_bind(&self, uri: &str) -> Result<Flow, DavError> {
        for plugin in &self.plugins {
            match plugin.before_bind(uri).await? {
                Flow::Pass => continue,
                handled => return Ok(handled),
            }
        }
        Ok(Flow::Pass)
    }

    pub async fn before_unbind(&self, uri: &str) -> Result<Flow, DavError> {
        for plugin in &self.plugins {
            match plugin.before_unbind(uri).await? {
                Flow::Pass => continue,
                handled => return Ok(handled),
            }
        }
        Ok(Flow::Pass)
    }

    pub async fn after_bind(&self, uri: &str) -> Result<(), DavError> {
        for plugin in &self.plugins {
            plugin.after_bind(uri).await?;
        }
        Ok(())
    }

    pub async fn before_create_file(
        &self,
        uri: &str,
        body: &StagedBody,
    ) -> Result<Flow, DavError> {
        for plugin in &self.plugins {
            match plugin.before_create_file(uri, body).await? {
                Flow::Pass => continue,
                handled => return Ok(handled),
            }
        }
        Ok(Flow::Pass)
    }

    pub async fn before_write_content(
        &self,
        uri: &str,
        body: &StagedBody,
    ) -> Result<Flow, DavError> {
        for plugin in &self.plugins {
            match plugin.before_write_content(uri, body).await? {
                Flow::Pass => continue,
                handled => return Ok(handled),
            }
        }
        Ok(Flow::Pass)
    }

    pub async fn after_get_properties(
        &self,
        path: &str,
        entry: &mut PropEntry,
    ) -> Result<(), DavError> {
        for plugin in &self.plugins {
            plugin.after_get_properties(path, entry).await?;
        }
        Ok(())
    }

    pub async fn report(
        &self,
        uri: &str,
        report: &ReportStart,
    ) -> Result<Option<HttpResponse>, DavError> {
        for plugin in &self.plugins {
            if let Some(response) = plugin.report(uri, report).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
