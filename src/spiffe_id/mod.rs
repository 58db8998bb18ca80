//! SPIFFE ID and trust domain types used to name workloads, the agent and the trust server.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::constants::SERVER_ID_PATH;

const SCHEME_PREFIX: &str = "spiffe://";

/// A [SPIFFE ID](https://github.com/spiffe/spiffe/blob/main/standards/SPIFFE-ID.md),
/// e.g. `spiffe://example.org/workload`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

/// The trust domain part of a [`SpiffeId`].
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TrustDomain {
    name: String,
}

/// An error that can arise parsing a SPIFFE ID or trust domain name.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum SpiffeIdError {
    /// An empty string cannot be parsed as a SPIFFE ID.
    #[error("cannot be empty")]
    Empty,

    /// The trust domain name is missing.
    #[error("trust domain is missing")]
    MissingTrustDomain,

    /// The input does not start with `spiffe://`.
    #[error("scheme is missing or invalid")]
    WrongScheme,

    /// The trust domain name contains a character outside `[a-z0-9._-]`.
    #[error(
        "trust domain characters are limited to lowercase letters, numbers, dots, dashes, and \
         underscores"
    )]
    BadTrustDomainChar,

    /// A path segment contains a character outside `[a-zA-Z0-9._-]`.
    #[error(
        "path segment characters are limited to letters, numbers, dots, dashes, and underscores"
    )]
    BadPathSegmentChar,

    /// Path contains an empty segment, e.g. `//`.
    #[error("path cannot contain empty segments")]
    EmptySegment,

    /// Path contains a `.` or `..` segment.
    #[error("path cannot contain dot segments")]
    DotSegment,

    /// Path ends with `/`.
    #[error("path cannot have a trailing slash")]
    TrailingSlash,
}

impl SpiffeId {
    /// Parses a SPIFFE ID.
    ///
    /// # Errors
    ///
    /// Returns a [`SpiffeIdError`] if `id` is not a conformant SPIFFE ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use spire_agent_core::SpiffeId;
    ///
    /// let id = SpiffeId::new("spiffe://example.org/web").unwrap();
    /// assert_eq!(id.trust_domain().to_string(), "example.org");
    /// assert_eq!(id.path(), "/web");
    /// ```
    pub fn new(id: &str) -> Result<Self, SpiffeIdError> {
        if id.is_empty() {
            return Err(SpiffeIdError::Empty);
        }
        let rest = id
            .strip_prefix(SCHEME_PREFIX)
            .ok_or(SpiffeIdError::WrongScheme)?;

        let split = rest.find('/').unwrap_or(rest.len());
        let (td, path) = rest.split_at(split);
        let trust_domain = TrustDomain::from_name(td)?;

        if !path.is_empty() {
            validate_path(path)?;
        }

        Ok(Self {
            trust_domain,
            path: path.to_owned(),
        })
    }

    /// Returns the trust domain of the SPIFFE ID.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Returns the path of the SPIFFE ID (empty for a trust domain ID).
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME_PREFIX}{}{}", self.trust_domain, self.path)
    }
}

impl FromStr for SpiffeId {
    type Err = SpiffeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for SpiffeId {
    type Error = SpiffeIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<String> for SpiffeId {
    type Error = SpiffeIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl TrustDomain {
    /// Parses a trust domain from its bare name (`example.org`) or from a SPIFFE ID.
    ///
    /// # Errors
    ///
    /// Returns a [`SpiffeIdError`] if the input is neither a valid name nor a valid SPIFFE ID.
    pub fn new(id_or_name: &str) -> Result<Self, SpiffeIdError> {
        if id_or_name.contains(":/") {
            return Ok(SpiffeId::new(id_or_name)?.trust_domain);
        }
        Self::from_name(id_or_name)
    }

    fn from_name(name: &str) -> Result<Self, SpiffeIdError> {
        if name.is_empty() {
            return Err(SpiffeIdError::MissingTrustDomain);
        }
        if !name.chars().all(is_valid_trust_domain_char) {
            return Err(SpiffeIdError::BadTrustDomainChar);
        }
        Ok(Self {
            name: name.to_owned(),
        })
    }

    /// Returns the SPIFFE ID the trust server presents, `spiffe://<td>/spire/server`.
    pub fn server_id(&self) -> SpiffeId {
        SpiffeId {
            trust_domain: self.clone(),
            path: SERVER_ID_PATH.to_owned(),
        }
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<str> for TrustDomain {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl FromStr for TrustDomain {
    type Err = SpiffeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for TrustDomain {
    type Error = SpiffeIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

fn validate_path(path: &str) -> Result<(), SpiffeIdError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(SpiffeIdError::BadPathSegmentChar);
    };
    if rest.is_empty() {
        return Err(SpiffeIdError::TrailingSlash);
    }

    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.into_iter().enumerate() {
        match segment {
            "" if i == last => return Err(SpiffeIdError::TrailingSlash),
            "" => return Err(SpiffeIdError::EmptySegment),
            "." | ".." => return Err(SpiffeIdError::DotSegment),
            s if !s.chars().all(is_valid_path_segment_char) => {
                return Err(SpiffeIdError::BadPathSegmentChar)
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_valid_trust_domain_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '-' | '.' | '_')
}

fn is_valid_path_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')
}
