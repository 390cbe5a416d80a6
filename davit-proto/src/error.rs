use http::status::StatusCode;

use davit_xml::error::ParsingError;
use davit_xml::name::QName;

/// The error kinds the core raises.
///
/// Every variant maps to a fixed HTTP status; some also announce a
/// pre/postcondition element or contribute extra response headers, all of
/// which the dispatcher folds into the XML error envelope.
#[derive(Debug)]
pub enum DavError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    MethodNotAllowed(String),
    Conflict(String),
    PreconditionFailed(String),
    UnsupportedMediaType(String),
    RangeNotSatisfiable(String),
    Locked {
        message: String,
        lock_token: Option<String>,
    },
    InvalidResourceType(String),
    ReportNotImplemented(String),
    NotImplemented(String),
    InsufficientStorage(String),
    Internal(String),
}

impl DavError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Locked { .. } => StatusCode::LOCKED,
            Self::InvalidResourceType(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ReportNotImplemented(_) | Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Kind tag written into `<a:exception>`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::MethodNotAllowed(_) => "MethodNotAllowed",
            Self::Conflict(_) => "Conflict",
            Self::PreconditionFailed(_) => "PreconditionFailed",
            Self::UnsupportedMediaType(_) => "UnsupportedMediaType",
            Self::RangeNotSatisfiable(_) => "RequestedRangeNotSatisfiable",
            Self::Locked { .. } => "Locked",
            Self::InvalidResourceType(_) => "InvalidResourceType",
            Self::ReportNotImplemented(_) => "ReportNotImplemented",
            Self::NotImplemented(_) => "NotImplemented",
            Self::InsufficientStorage(_) => "InsufficientStorage",
            Self::Internal(_) => "ServerError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::MethodNotAllowed(m)
            | Self::Conflict(m)
            | Self::PreconditionFailed(m)
            | Self::UnsupportedMediaType(m)
            | Self::RangeNotSatisfiable(m)
            | Self::Locked { message: m, .. }
            | Self::InvalidResourceType(m)
            | Self::ReportNotImplemented(m)
            | Self::NotImplemented(m)
            | Self::InsufficientStorage(m)
            | Self::Internal(m) => m,
        }
    }

    /// Pre/postcondition element announced inside the error envelope.
    pub fn condition(&self) -> Option<QName> {
        match self {
            Self::Locked { .. } => Some(QName::dav("lock-token-submitted")),
            Self::InvalidResourceType(_) => Some(QName::dav("valid-resourcetype")),
            _ => None,
        }
    }

    /// Extra headers the error contributes to the response.
    pub fn extra_headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Locked {
                lock_token: Some(token),
                ..
            } => vec![("Lock-Token", format!("<{}>", token))],
            _ => vec![],
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind(), self.status(), self.message())
    }
}
impl std::error::Error for DavError {}

impl From<ParsingError> for DavError {
    fn from(value: ParsingError) -> Self {
        Self::BadRequest(format!("Unable to parse the request body: {}", value))
    }
}
impl From<std::io::Error> for DavError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(value.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::Forbidden(value.to_string()),
            _ => Self::Internal(value.to_string()),
        }
    }
}
impl From<http::Error> for DavError {
    fn from(value: http::Error) -> Self {
        Self::Internal(format!("Unable to build the response: {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_rfc4918() {
        assert_eq!(DavError::BadRequest("x".into()).status().as_u16(), 400);
        assert_eq!(DavError::PreconditionFailed("x".into()).status().as_u16(), 412);
        assert_eq!(DavError::RangeNotSatisfiable("x".into()).status().as_u16(), 416);
        assert_eq!(DavError::InvalidResourceType("x".into()).status().as_u16(), 422);
        assert_eq!(DavError::ReportNotImplemented("x".into()).status().as_u16(), 501);
        assert_eq!(DavError::InsufficientStorage("x".into()).status().as_u16(), 507);
    }

    #[test]
    fn locked_contributes_a_lock_token_header() {
        let err = DavError::Locked {
            message: "resource is locked".into(),
            lock_token: Some("opaquelocktoken:abc".into()),
        };
        assert_eq!(
            err.extra_headers(),
            vec![("Lock-Token", "<opaquelocktoken:abc>".to_string())]
        );
        assert_eq!(err.condition(), Some(QName::dav("lock-token-submitted")));
    }
}
