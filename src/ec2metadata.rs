//! Discover region and instance identifier from the EC2 instance metadata
//! service.
//!
//! A session token is requested first (IMDSv2). Instances still serving the
//! token-less protocol answer that request with an error status, in which
//! case lookups proceed without a token.

use crate::error::Error;
use crate::metric::IdentitySource;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use std::time::Duration;
use tokio::runtime;

/// Base URL of the instance metadata service.
pub const METADATA_ENDPOINT: &str = "http://169.254.169.254";

const TOKEN_PATH: &str = "/latest/api/token";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "21600";
const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
const REGION_PATH: &str = "/latest/meta-data/placement/region";

/// `IdentitySource` reading the instance metadata service over plain HTTP.
pub struct InstanceMetadata {
    endpoint: String,
    timeout: Duration,
    // None until requested; Some(None) when the service issues no tokens.
    token: Option<Option<String>>,
    client: Client<HttpConnector, Body>,
    runtime: runtime::Runtime,
}

impl InstanceMetadata {
    /// Reach the metadata service at `endpoint`, giving up on any single
    /// request after `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<InstanceMetadata, Error> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(format!("could not start runtime: {}", e)))?;
        Ok(InstanceMetadata {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
            token: None,
            client: Client::new(),
            runtime,
        })
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        header: Option<(&str, &str)>,
    ) -> Result<(StatusCode, String), Error> {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.endpoint, path));
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Body::empty())
            .map_err(|e| Error::Transport(format!("bad metadata request: {}", e)))?;
        trace!("{} {}{}", request.method(), self.endpoint, path);

        let client = &self.client;
        let fut = async move {
            let resp = client.request(request).await?;
            let status = resp.status();
            let body = hyper::body::to_bytes(resp.into_body()).await?;
            Ok::<_, hyper::Error>((status, body))
        };
        let (status, body) = self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, fut).await })
            .map_err(|_| Error::Transport(format!("timed out fetching {}", path)))?
            .map_err(|e| Error::Transport(format!("{}", e)))?;
        let body = String::from_utf8(body.to_vec())
            .map_err(|e| Error::Transport(format!("metadata {} not utf-8: {}", path, e)))?;
        Ok((status, body.trim().to_string()))
    }

    fn token(&mut self) -> Result<Option<String>, Error> {
        if let Some(ref token) = self.token {
            return Ok(token.clone());
        }
        let (status, body) =
            self.send(Method::PUT, TOKEN_PATH, Some((TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)))?;
        let token = if status == StatusCode::OK && !body.is_empty() {
            Some(body)
        } else {
            debug!("metadata token request returned {}, continuing without token", status);
            None
        };
        self.token = Some(token.clone());
        Ok(token)
    }

    fn get(&mut self, path: &str) -> Result<String, Error> {
        let token = self.token()?;
        let header = token.as_ref().map(|t| (TOKEN_HEADER, t.as_str()));
        let (status, body) = self.send(Method::GET, path, header)?;
        if status != StatusCode::OK {
            return Err(Error::Transport(format!("metadata {} returned {}", path, status)));
        }
        Ok(body)
    }
}

impl IdentitySource for InstanceMetadata {
    fn region(&mut self) -> Result<String, Error> {
        self.get(REGION_PATH)
    }

    fn instance_id(&mut self) -> Result<String, Error> {
        self.get(INSTANCE_ID_PATH)
    }
}
