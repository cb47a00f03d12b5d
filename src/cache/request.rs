//! Identity of the request a repository call is made for

use serde::Serialize;
use std::collections::BTreeMap;

/// The full URL of the current request plus its query parameters.
///
/// The URL is part of every cache key, so identical calls made for two
/// different URLs are cached separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    url: String,
    params: BTreeMap<String, String>,
}

impl RequestContext {
    /// Build a context from a full URL, reading parameters from its query string
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let params = url
            .split_once('?')
            .map(|(_, query)| query.split('#').next().unwrap_or(query))
            .map(|query| {
                query
                    .split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| match pair.split_once('=') {
                        Some((key, value)) => (key.to_string(), value.to_string()),
                        None => (pair.to_string(), String::new()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { url, params }
    }

    /// Add or override a parameter without touching the URL
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Present and not one of `""`, `0`, `false`, `off`, `no`
    pub fn is_truthy(&self, key: &str) -> bool {
        self.param(key).is_some_and(|value| {
            !matches!(
                value.to_ascii_lowercase().as_str(),
                "" | "0" | "false" | "off" | "no"
            )
        })
    }
}
