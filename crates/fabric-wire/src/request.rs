//! The immutable `Request` a caller builds before handing it to the
//! publication engine, and the builder that assembles one.

use std::collections::BTreeMap;
use std::time::Duration;

use http::Method;
use url::Url;

use fabric_errors::{error_args, Error};

use crate::frame::Frame;

/// A fully-resolved, publishable request: method, canonicalized URL, header
/// frame, body, and delivery options. Built once via [`RequestBuilder`] and
/// then consumed by the publication engine; there is no mutation API here.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Frame,
    body: Vec<u8>,
    multicast: bool,
    timeout: Option<Duration>,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Frame {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Frame {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    pub fn multicast(&self) -> bool {
        self.multicast
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Consumes the request, handing the caller-supplied body to whoever
    /// serializes it onto the wire. The request is read-once by convention:
    /// once a publication engine calls this, the `Request` itself is gone.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn builder(method: Method, url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }
}

/// Accumulates method, URL, headers, query arguments, body, and an optional
/// multicast flag into a [`Request`]. Resolves `{placeholder}` segments in
/// the URL path against values supplied via [`RequestBuilder::path_param`].
pub struct RequestBuilder {
    method: Method,
    raw_url: String,
    query: Vec<(String, String)>,
    path_params: BTreeMap<String, String>,
    headers: Frame,
    body: Vec<u8>,
    multicast: bool,
    timeout: Option<Duration>,
}

impl RequestBuilder {
    pub fn new(method: Method, url: impl AsRef<str>) -> Self {
        RequestBuilder {
            method,
            raw_url: url.as_ref().to_string(),
            query: Vec::new(),
            path_params: BTreeMap::new(),
            headers: Frame::new(),
            body: Vec::new(),
            multicast: false,
            timeout: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Binds a `{key}` placeholder found in the URL path to `value`.
    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn multicast(mut self, yes: bool) -> Self {
        self.multicast = yes;
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    /// Resolves path placeholders, canonicalizes the URL, and produces an
    /// immutable [`Request`]. Fails if a `{placeholder}` is left unresolved
    /// or the URL cannot be parsed.
    pub fn build(self) -> Result<Request, Error> {
        let resolved = resolve_path_params(&self.raw_url, &self.path_params)?;
        let mut url = canonicalize_url(&resolved)?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        } else {
            url.set_query(None);
        }
        Ok(Request {
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
            multicast: self.multicast,
            timeout: self.timeout,
        })
    }
}

fn resolve_path_params(raw: &str, params: &BTreeMap<String, String>) -> Result<String, Error> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            return Err(Error::new(
                format!("bad request: unterminated path parameter placeholder in {raw}"),
                error_args![400i32],
            ));
        };
        let close = open + close;
        let key = &rest[open + 1..close];
        let value = params.get(key).ok_or_else(|| {
            Error::new(
                format!("bad request: unresolved path parameter {key}"),
                error_args![400i32],
            )
        })?;
        out.push_str(&rest[..open]);
        out.push_str(value);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Strips the query string (query arguments are re-applied by the builder)
/// and normalizes the port: `http` defaults to 80, `https` to 443, and a URL
/// given without a scheme is treated as `https`.
fn canonicalize_url(raw: &str) -> Result<Url, Error> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let mut url = Url::parse(&with_scheme).map_err(|e| {
        Error::new(
            format!("bad request: invalid url {raw}: {e}"),
            error_args![400i32],
        )
    })?;
    url.set_query(None);
    url.set_fragment(None);
    if url.port().is_none() {
        let port = match url.scheme() {
            "https" => 443,
            "http" => 80,
            _ => 443,
        };
        let _ = url.set_port(Some(port));
    }
    Ok(url)
}
