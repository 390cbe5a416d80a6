use std::fmt;

use super::error::ParsingError;

pub const DAV_URN: &str = "DAV:";

/// Namespace used for server-specific elements (error envelope, version tag).
pub const VENDOR_URN: &str = "urn:x-davit";

/// An expanded XML name in Clark notation: `{namespace-URI}local-name`.
///
/// Property names, resource types and report names are all carried in this
/// form internally so that no XML prefix ambiguity can leak into the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub ns: String,
    pub local: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }

    /// Shorthand for names in the `DAV:` namespace.
    pub fn dav(local: impl Into<String>) -> Self {
        Self::new(DAV_URN, local)
    }

    pub fn is_dav(&self, local: &str) -> bool {
        self.ns == DAV_URN && self.local == local
    }

    /// Parse `{namespace}local`. A name without braces is taken as having an
    /// empty namespace.
    pub fn parse_clark(raw: &str) -> Result<Self, ParsingError> {
        match raw.strip_prefix('{') {
            Some(rest) => {
                let (ns, local) = rest.split_once('}').ok_or(ParsingError::InvalidName)?;
                if local.is_empty() {
                    return Err(ParsingError::InvalidName);
                }
                Ok(Self::new(ns, local))
            }
            None if raw.is_empty() => Err(ParsingError::InvalidName),
            None => Ok(Self::new("", raw)),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clark_roundtrip() {
        let qn = QName::parse_clark("{DAV:}resourcetype").unwrap();
        assert_eq!(qn, QName::dav("resourcetype"));
        assert_eq!(qn.to_string(), "{DAV:}resourcetype");

        let vendor = QName::parse_clark("{http://example.org/ns}color").unwrap();
        assert_eq!(vendor.ns, "http://example.org/ns");
        assert_eq!(vendor.local, "color");
        assert_eq!(
            QName::parse_clark(&vendor.to_string()).unwrap(),
            vendor
        );
    }

    #[test]
    fn clark_without_namespace() {
        let qn = QName::parse_clark("displayname").unwrap();
        assert_eq!(qn.ns, "");
        assert_eq!(qn.to_string(), "displayname");
    }

    #[test]
    fn clark_rejects_broken_names() {
        assert!(QName::parse_clark("{DAV:resourcetype").is_err());
        assert!(QName::parse_clark("{DAV:}").is_err());
        assert!(QName::parse_clark("").is_err());
    }
}
