//! Per-request proxy flow: loop check, masked-path decode, blocklist,
//! upstream call, cookie capture and response transformation.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, Method, Response};
use axum::response::IntoResponse;
use chrono::Utc;
use ctrl_core::{normalize_authority, url_authority, ConfigError};
use ctrl_store::{ConfigStore, CookieJar};
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::blocklist;
use crate::director::upstream_headers;
use crate::error::ProxyError;
use crate::masking;
use crate::transformer::{set_cookie_directives, transform, TransformContext};

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub connect_timeout: Duration,
    pub upstream_timeout: Duration,
    pub max_request_body_bytes: usize,
    pub max_rewrite_body_bytes: usize,
    /// Known external authority of the proxy, checked in addition to the
    /// `Host` each request arrives with.
    pub public_authority: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            upstream_timeout: Duration::from_secs(60),
            max_request_body_bytes: 10 * 1024 * 1024,
            max_rewrite_body_bytes: 32 * 1024 * 1024,
            public_authority: None,
        }
    }
}

pub struct Pipeline {
    client: reqwest::Client,
    config: Arc<ConfigStore>,
    jar: Arc<CookieJar>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        config: Arc<ConfigStore>,
        jar: Arc<CookieJar>,
        options: PipelineOptions,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(options.connect_timeout)
            .timeout(options.upstream_timeout)
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config,
            jar,
            options,
        })
    }

    /// Serve one viewer request. Never fails: errors become responses.
    pub async fn handle(&self, request: Request) -> Response<Body> {
        match self.run(request).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    ProxyError::Upstream(err) => warn!(error = %err, "upstream fetch failed"),
                    ProxyError::Config(err) => error!(error = %err, "proxy misconfigured"),
                    other => debug!(error = %other, "proxy request rejected"),
                }
                e.into_response()
            }
        }
    }

    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    async fn run(&self, request: Request) -> Result<Response<Body>, ProxyError> {
        let config = self.config.snapshot();
        let inbound_host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let proxy_authorities: Vec<&str> = inbound_host
            .as_deref()
            .into_iter()
            .chain(self.options.public_authority.as_deref())
            .collect();

        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let masked = masking::decode_masked(path_and_query)
            .transpose()
            .map_err(|e| ProxyError::BadPath(e.to_string()))?;
        // trackers get their stub even while the target is unusable
        if let Some(stub) = masked.as_ref().and_then(blocked_stub) {
            return Ok(stub);
        }

        let target = config.target()?;
        reject_loop(&target, &proxy_authorities)?;

        let upstream_url = match masked {
            Some(url) => url,
            None => {
                let url = masking::decode(path_and_query, &target)
                    .map_err(|e| ProxyError::BadPath(e.to_string()))?;
                if let Some(stub) = blocked_stub(&url) {
                    return Ok(stub);
                }
                url
            }
        };
        reject_loop(&upstream_url, &proxy_authorities)?;
        let upstream_host = upstream_url.host_str().unwrap_or_default().to_string();

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.options.max_request_body_bytes)
            .await
            .map_err(|e| ProxyError::RequestBody(e.to_string()))?;

        let jar_cookies = self.jar.snapshot_for(&upstream_host);
        let headers = upstream_headers(&parts.headers, &upstream_url, &jar_cookies);
        let mut builder = self
            .client
            .request(parts.method.clone(), upstream_url.clone())
            .headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let upstream = builder.send().await?;
        debug!(url = %upstream_url, status = upstream.status().as_u16(), "upstream responded");

        self.capture_cookies(upstream.headers(), &url_authority(&upstream_url));

        let ctx = TransformContext {
            document_url: &upstream_url,
            config: &config,
            proxy_authority: inbound_host
                .as_deref()
                .or(self.options.public_authority.as_deref()),
            max_rewrite_body_bytes: self.options.max_rewrite_body_bytes,
            head_request: parts.method == Method::HEAD,
        };
        transform(upstream, &ctx).await
    }

    /// Merge `Set-Cookie` headers into the jar without holding up the
    /// response. The jar serializes concurrent merges itself.
    fn capture_cookies(&self, headers: &header::HeaderMap, host: &str) {
        let directives = set_cookie_directives(headers, host, Utc::now());
        if directives.is_empty() {
            return;
        }
        let jar = Arc::clone(&self.jar);
        drop(tokio::task::spawn_blocking(move || {
            if let Err(e) = jar.merge(directives) {
                warn!(error = %e, "cookie merge failed");
            }
        }));
    }
}

fn blocked_stub(url: &Url) -> Option<Response<Body>> {
    if !blocklist::is_blocked(url.host_str().unwrap_or_default(), url.path()) {
        return None;
    }
    debug!(url = %url, "blocked");
    Some(blocklist::stub_response(url.path()))
}

fn reject_loop(url: &Url, proxy_authorities: &[&str]) -> Result<(), ConfigError> {
    let authority = url_authority(url);
    let normalized = normalize_authority(&authority);
    if proxy_authorities
        .iter()
        .any(|proxy| normalize_authority(proxy) == normalized)
    {
        return Err(ConfigError::Loop(authority));
    }
    Ok(())
}
