//! The `Response` a handler produces and the `HttpResponse` shape it wraps.

use fabric_errors::Error;

use crate::frame::Frame;

/// A handler's successful HTTP-shaped result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Frame,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            headers: Frame::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }
}

/// What a single reply to a call carries: either an HTTP-shaped success or
/// an error value. Exactly one of the two, never both — the tagged variant
/// is the wire-level equivalent of a `Result`.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum Response {
    Http(HttpResponse),
    Error(Error),
}

impl Response {
    pub fn ok(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Response::Http(HttpResponse::new(status, body))
    }

    pub fn err(err: Error) -> Self {
        Response::Error(err)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Http(h) if h.status < 400)
    }

    /// The status code this response carries on the wire: the HTTP status
    /// for a success, or the error's own status for a failure.
    pub fn status(&self) -> u16 {
        match self {
            Response::Http(h) => h.status,
            Response::Error(e) => e.status(),
        }
    }

    pub fn as_http(&self) -> Option<&HttpResponse> {
        match self {
            Response::Http(h) => Some(h),
            Response::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Response::Error(e) => Some(e),
            Response::Http(_) => None,
        }
    }
}

impl From<HttpResponse> for Response {
    fn from(h: HttpResponse) -> Self {
        Response::Http(h)
    }
}

impl From<Error> for Response {
    fn from(e: Error) -> Self {
        Response::Error(e)
    }
}
