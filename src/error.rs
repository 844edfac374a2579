//! Errors raised while talking to a CalDAV server

use std::fmt::{Display, Formatter};

use url::Url;

/// The kind of request that produced a protocol error.
///
/// Servers behave differently depending on the method, and callers usually want to log
/// "unable to list" differently from "unable to delete".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// PROPFIND or GET
    Listing,
    /// REPORT
    Report,
    /// PROPPATCH
    PropertySet,
    /// PUT or POST
    Creation,
    /// DELETE
    Deletion,
    /// MKCALENDAR
    CollectionCreation,
}

impl Display for RequestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Listing => write!(f, "listing"),
            RequestKind::Report => write!(f, "report"),
            RequestKind::PropertySet => write!(f, "property update"),
            RequestKind::Creation => write!(f, "creation"),
            RequestKind::Deletion => write!(f, "deletion"),
            RequestKind::CollectionCreation => write!(f, "collection creation"),
        }
    }
}

/// Errors of the transport, calendar and mock layers
#[derive(Clone, Debug, PartialEq)]
pub enum DavError {
    /// The server refused our credentials (401 or 403). Retrying will not help.
    Authorization { url: Url, reason: String },
    /// The resource does not exist (404)
    NotFound(Url),
    /// The server answered with an unexpected status
    Protocol { kind: RequestKind, url: Url, status: u16, reason: String },
    /// A local invariant has been violated
    Consistency(String),
    /// The request did not reach the server, or its response could not be read
    Transport(String),
    /// The server sent XML we cannot make sense of
    Xml(String),
    /// The server sent calendar data we cannot make sense of
    Ical(String),
    /// A multistatus response did not mention the resource we asked about
    Mapping { url: Url },
}

impl DavError {
    /// Whether this error requires the user to re-authenticate
    pub fn is_authorization(&self) -> bool {
        matches!(self, DavError::Authorization{ .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DavError::NotFound(_))
    }
}

impl Display for DavError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DavError::Authorization{ url, reason } => write!(f, "Not authorized to access {} ({})", url, reason),
            DavError::NotFound(url) => write!(f, "Resource not found: {}", url),
            DavError::Protocol{ kind, url, status, reason } => write!(f, "Unexpected HTTP status {} during {} of {} ({})", status, kind, url, reason),
            DavError::Consistency(msg) => write!(f, "Inconsistent state: {}", msg),
            DavError::Transport(msg) => write!(f, "Transport error: {}", msg),
            DavError::Xml(msg) => write!(f, "Invalid XML: {}", msg),
            DavError::Ical(msg) => write!(f, "Invalid calendar data: {}", msg),
            DavError::Mapping{ url } => write!(f, "Unable to find {} in the server response", url),
        }
    }
}

impl std::error::Error for DavError {}

impl From<reqwest::Error> for DavError {
    fn from(err: reqwest::Error) -> Self {
        DavError::Transport(err.to_string())
    }
}

impl From<minidom::Error> for DavError {
    fn from(err: minidom::Error) -> Self {
        DavError::Xml(err.to_string())
    }
}

/// Returns the authorization failure carried by a boxed error, if any
pub fn as_authorization_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a DavError> {
    err.downcast_ref::<DavError>().filter(|e| e.is_authorization())
}
