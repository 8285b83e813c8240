use axum::http::HeaderValue;
use axum::http::request::Parts;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

/// An allowed origin as configured, e.g. `https://*.vercel.app`.
#[derive(Debug, Clone, PartialEq)]
pub enum OriginPattern {
    Any,
    Exact(String),
    /// `<prefix>*<suffix>` where `*` stands for one or more host labels.
    Subdomain { prefix: String, suffix: String },
}

impl OriginPattern {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_end_matches('/');
        if raw == "*" {
            return Self::Any;
        }
        match raw.split_once('*') {
            Some((prefix, suffix)) => Self::Subdomain {
                prefix: prefix.to_ascii_lowercase(),
                suffix: suffix.to_ascii_lowercase(),
            },
            None => Self::Exact(raw.to_ascii_lowercase()),
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        let origin = origin.to_ascii_lowercase();
        match self {
            Self::Any => true,
            Self::Exact(allowed) => origin == *allowed,
            Self::Subdomain { prefix, suffix } => origin
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .is_some_and(|host| !host.is_empty() && !host.contains(['/', ':', '@'])),
        }
    }
}

/// Credentialed CORS for the configured origins; methods and headers are mirrored.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let patterns: Vec<OriginPattern> = origins.iter().map(|origin| OriginPattern::parse(origin)).collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
            origin
                .to_str()
                .is_ok_and(|origin| patterns.iter().any(|pattern| pattern.matches(origin)))
        }))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
