use std::collections::HashMap;

use base64::Engine;
use futures::future::{BoxFuture, FutureExt};
use http::header::HeaderMap;
use http::Response;

use davit_proto::codec::text_body;
use davit_proto::error::DavError;
use davit_proto::hook::{DavPlugin, Flow};

use crate::config::AuthConfig;

/// HTTP Basic authentication as a `before_method` guard: requests without
/// valid credentials are answered with a 401 challenge and vetoed.
pub struct BasicAuthPlugin {
    realm: String,
    users: HashMap<String, String>,
}

impl BasicAuthPlugin {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            realm: config.realm,
            users: config.users,
        }
    }

    fn challenge(&self, message: &'static str) -> Result<Flow, DavError> {
        Ok(Flow::Handled(
            Response::builder()
                .status(401)
                .header(
                    "WWW-Authenticate",
                    format!("Basic realm=\"{}\"", self.realm),
                )
                .body(text_body(message))?,
        ))
    }

    fn check(&self, headers: &HeaderMap) -> Result<Flow, DavError> {
        let auth_val = match headers.get(http::header::AUTHORIZATION) {
            Some(hv) => hv
                .to_str()
                .map_err(|_| DavError::BadRequest("Invalid Authorization header".into()))?,
            None => {
                tracing::info!("missing authorization field");
                return self.challenge("Missing Authorization field");
            }
        };

        let b64_creds_maybe_padded = match auth_val.split_once(' ') {
            Some(("Basic", b64)) => b64,
            _ => {
                tracing::info!("unsupported authorization field");
                return Ok(Flow::Handled(
                    Response::builder()
                        .status(400)
                        .body(text_body("Unsupported Authorization field"))?,
                ));
            }
        };

        // base64urlencoded may have trailing equals, base64urlsafe has not
        // theoretically authorization is padded but "be liberal in what you accept"
        let b64_creds_clean = b64_creds_maybe_padded.trim_end_matches('=');
        let creds = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(b64_creds_clean)
            .map_err(|_| DavError::BadRequest("Invalid base64 in Authorization".into()))?;
        let str_creds = std::str::from_utf8(&creds)
            .map_err(|_| DavError::BadRequest("Credentials are not valid utf-8".into()))?;

        let Some((username, password)) = str_creds.split_once(':') else {
            return Err(DavError::BadRequest(
                "Missing colon in Authorization, can't split decoded value into a username/password pair"
                    .into(),
            ));
        };

        match self.users.get(username) {
            Some(expected) if expected == password => Ok(Flow::Pass),
            _ => {
                tracing::info!(user = username, "wrong credentials");
                self.challenge("Wrong credentials")
            }
        }
    }
}

impl DavPlugin for BasicAuthPlugin {
    fn name(&self) -> &'static str {
        "basic-auth"
    }

    fn before_method<'a>(
        &'a self,
        _method: &'a str,
        _uri: &'a str,
        headers: &'a HeaderMap,
    ) -> BoxFuture<'a, Result<Flow, DavError>> {
        let verdict = self.check(headers);
        async move { verdict }.boxed()
    }
}
