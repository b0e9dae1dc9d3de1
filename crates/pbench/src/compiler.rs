//! Request compilation into the generator's native request payloads.
//!
//! The generator binds one destination per run, so every request of a
//! scenario must resolve to the same host and port.

use std::fmt;

use tracing::debug;
use url::{form_urlencoded, Url};

use crate::config::{OrderedPairs, RequestBody, RequestSpec, ScenarioConfig};
use crate::error::{PbenchError, Result};
use crate::testcase::TestCase;

/// Methods whose body parameters travel in the query string.
const QUERY_METHODS: &[&str] = &["GET", "HEAD", "DELETE", "OPTIONS"];

/// The single network destination of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or_else(|| PbenchError::InvalidRequest {
            url: url.to_string(),
            message: "URL has no host".to_string(),
        })?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| PbenchError::InvalidRequest {
                url: url.to_string(),
                message: "cannot determine port".to_string(),
            })?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Parse a scenario's `default-address`.
    pub fn from_address(address: &str) -> Result<Self> {
        Self::from_url(&Url::parse(address)?)
    }

    pub fn same_destination(&self, other: &Target) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// Value of the `Host` header, omitting the scheme's default port.
    fn host_header(&self) -> String {
        let default_port = match self.scheme.as_str() {
            "https" => 443,
            _ => 80,
        };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// One request in resolved, generator-ready form.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRequest {
    pub target: Target,
    pub label: String,
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CompiledRequest {
    /// Path plus encoded query string.
    pub fn request_uri(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }

    /// Render the raw HTTP/1.1 request the generator sends.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.request_uri());
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut payload = head.into_bytes();
        payload.extend_from_slice(&self.body);
        payload
    }

    pub fn to_test_case(&self, index: usize) -> TestCase {
        TestCase::new(index, self.label.clone(), self.to_payload())
    }
}

/// All requests of a scenario and the destination they share.
#[derive(Debug, Clone)]
pub struct CompiledScenario {
    pub target: Target,
    pub requests: Vec<CompiledRequest>,
}

impl CompiledScenario {
    pub fn test_cases(&self) -> Vec<TestCase> {
        self.requests
            .iter()
            .enumerate()
            .map(|(i, r)| r.to_test_case(i))
            .collect()
    }
}

/// Compile every request of `scenario`, failing on the first request that
/// targets a second destination.
pub fn compile(scenario: &ScenarioConfig) -> Result<CompiledScenario> {
    let base = scenario
        .default_address
        .as_deref()
        .map(Url::parse)
        .transpose()?;

    let mut target: Option<Target> = None;
    let mut requests = Vec::with_capacity(scenario.requests.len());

    for entry in &scenario.requests {
        let spec = entry.clone().into_spec();
        let request = compile_request(&spec, base.as_ref(), &scenario.headers)?;

        match &target {
            None => target = Some(request.target.clone()),
            Some(first) if !first.same_destination(&request.target) => {
                return Err(PbenchError::ConflictingTargets {
                    first: first.to_string(),
                    second: request.target.to_string(),
                });
            }
            Some(_) => {}
        }

        debug!(method = %request.method, uri = %request.request_uri(), "Compiled request");
        requests.push(request);
    }

    let target = target.ok_or_else(|| {
        PbenchError::InvalidConfig("scenario has no requests to compile".to_string())
    })?;
    Ok(CompiledScenario { target, requests })
}

fn resolve_url(raw: &str, base: Option<&Url>) -> Result<Url> {
    let invalid = |message: &str| PbenchError::InvalidRequest {
        url: raw.to_string(),
        message: message.to_string(),
    };

    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| invalid("relative URL and no default-address"))?;
            base.join(raw)?
        }
        Err(e) => return Err(e.into()),
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are supported"));
    }
    if !url.has_host() {
        return Err(invalid("URL has no host"));
    }
    Ok(url)
}

fn compile_request(
    spec: &RequestSpec,
    base: Option<&Url>,
    scenario_headers: &OrderedPairs,
) -> Result<CompiledRequest> {
    let url = resolve_url(&spec.url, base)?;
    let target = Target::from_url(&url)?;
    let method = spec.method.trim().to_ascii_uppercase();

    let mut query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut body = Vec::new();
    let mut content_type = None;

    match &spec.body {
        Some(RequestBody::Params(params)) if QUERY_METHODS.contains(&method.as_str()) => {
            query.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        }
        Some(RequestBody::Params(params)) => {
            body = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish()
                .into_bytes();
            content_type = Some("application/x-www-form-urlencoded");
        }
        Some(RequestBody::Text(text)) => body = text.clone().into_bytes(),
        None => {}
    }

    let mut headers: Vec<(String, String)> = Vec::new();
    for (name, value) in scenario_headers.iter().chain(spec.headers.iter()) {
        set_header(&mut headers, name, value);
    }
    if !has_header(&headers, "Host") {
        headers.insert(0, ("Host".to_string(), target.host_header()));
    }
    if let Some(content_type) = content_type {
        if !has_header(&headers, "Content-Type") {
            headers.push(("Content-Type".to_string(), content_type.to_string()));
        }
    }
    if !body.is_empty() && !has_header(&headers, "Content-Length") {
        headers.push(("Content-Length".to_string(), body.len().to_string()));
    }

    let path = url.path().to_string();
    let label = spec.label.clone().unwrap_or_else(|| path.clone());

    Ok(CompiledRequest {
        target,
        label,
        method,
        path,
        query,
        headers,
        body,
    })
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

/// Insert or overwrite in place, keeping first-seen order.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        Some(existing) => existing.1 = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}
