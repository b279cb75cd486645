use std::fmt;

use url::Url;

use crate::{FailureKind, FetchError};

pub type TargetId = u64;

/// One unit of work: an identifier for content to fetch.
///
/// The identifier is kept verbatim; it is only interpreted when the engine
/// resolves it into a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    id: TargetId,
    identifier: String,
}

impl Target {
    pub fn new(id: TargetId, identifier: impl Into<String>) -> Self {
        Self {
            id,
            identifier: identifier.into(),
        }
    }

    /// Builds targets from raw identifiers, numbering them from 1 in order.
    pub fn batch<I, S>(identifiers: I) -> Vec<Target>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        identifiers
            .into_iter()
            .enumerate()
            .map(|(idx, identifier)| Target::new(idx as TargetId + 1, identifier))
            .collect()
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Resolves the identifier into a fetchable location.
    ///
    /// Only absolute `http`/`https` URLs with a host are fetchable.
    pub fn locate(&self) -> Result<Location, FetchError> {
        let url = Url::parse(self.identifier.trim())
            .map_err(|err| FetchError::new(FailureKind::MalformedTarget, err.to_string()))?;
        Location::from_url(url)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.identifier)
    }
}

/// A validated target URL plus the host key politeness state is tracked under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    url: Url,
    host: String,
}

impl Location {
    pub fn from_url(url: Url) -> Result<Self, FetchError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::new(
                FailureKind::MalformedTarget,
                format!("unsupported scheme {}", url.scheme()),
            ));
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => {
                return Err(FetchError::new(
                    FailureKind::MalformedTarget,
                    "url has no host",
                ))
            }
        };
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        Ok(Self { url, host })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host[:port]`, lowercased. Explicit non-default ports are separate hosts.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path plus query, the part robots directives are matched against.
    pub fn request_path(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// `scheme://host[:port]/`
    pub fn origin(&self) -> String {
        format!("{}://{}/", self.url.scheme(), self.host)
    }

    pub fn robots_url(&self) -> String {
        format!("{}robots.txt", self.origin())
    }
}
