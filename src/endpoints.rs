use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{DataAccessError, Result};

const SECURE_SCHEME: &str = "https://";
const PLAINTEXT_SCHEME: &str = "http://";

/// Origin of the page hosting the dashboard, if any.
///
/// When the page itself is served over TLS, plaintext API bases would be
/// blocked as mixed content, so they are filtered out during resolution.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    origin: Option<String>,
}

impl PageContext {
    pub fn new(origin: Option<&str>) -> Self {
        let origin = origin
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| o.trim_end_matches('/').to_string());
        Self { origin }
    }

    /// A context with no page, e.g. a CLI invocation.
    pub fn detached() -> Self {
        Self { origin: None }
    }

    pub fn is_secure(&self) -> bool {
        self.origin
            .as_deref()
            .is_some_and(|o| has_scheme(o, SECURE_SCHEME))
    }

    /// `<origin>/api`, only when the page origin is encrypted.
    pub fn secure_fallback(&self) -> Option<String> {
        if !self.is_secure() {
            return None;
        }
        self.origin.as_deref().map(|o| format!("{o}/api"))
    }
}

/// A normalized base address: trimmed, no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_plaintext(&self) -> bool {
        has_scheme(&self.0, PLAINTEXT_SCHEME)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, deduplicated and non-empty list of endpoints.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    endpoints: Arc<[Endpoint]>,
}

impl EndpointSet {
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    pub fn primary(&self) -> &Endpoint {
        &self.endpoints[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }
}

/// Normalize a single candidate. `None` for absent or blank input.
pub fn normalize_base(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Build the endpoint set from raw candidates.
///
/// Order of first appearance wins when a base is listed twice.
pub fn resolve<I, S>(candidates: I, page: &PageContext) -> Result<EndpointSet>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let secure_page = page.is_secure();
    let mut endpoints: Vec<Endpoint> = Vec::new();

    for candidate in candidates.into_iter().flatten() {
        let Some(base) = normalize_base(candidate.as_ref()) else {
            continue;
        };
        let endpoint = Endpoint(base);
        if secure_page && endpoint.is_plaintext() {
            warn!(endpoint = %endpoint, "dropping plaintext API base on a secure page");
            continue;
        }
        if endpoints.contains(&endpoint) {
            continue;
        }
        endpoints.push(endpoint);
    }

    if endpoints.is_empty() {
        return Err(DataAccessError::Configuration(
            "every candidate was blank, duplicated or blocked as mixed content".into(),
        ));
    }

    debug!(count = endpoints.len(), "resolved API endpoints");
    Ok(EndpointSet {
        endpoints: endpoints.into(),
    })
}

/// Configured bases in priority order, followed by the page-derived secure
/// fallback when there is one.
pub fn candidate_bases(
    primary: Option<&str>,
    secondary: Option<&str>,
    fallbacks: &[String],
    page: &PageContext,
) -> Vec<Option<String>> {
    let mut candidates = vec![primary.map(str::to_string), secondary.map(str::to_string)];
    candidates.extend(fallbacks.iter().cloned().map(Some));
    candidates.push(page.secure_fallback());
    candidates
}

fn has_scheme(value: &str, scheme: &str) -> bool {
    value
        .get(..scheme.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
}
