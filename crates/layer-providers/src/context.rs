//! Shared state handed to every provider call.

use std::time::Duration;

use map_common::{MapError, MapResult, ProjectionRegistry};

/// Everything a provider needs beyond the layer config itself: the backend
/// base URL (for the CORS proxy), a shared HTTP client, and the projection
/// registry. Passed by reference; nothing here is global.
pub struct ProviderContext {
    api_url: Option<String>,
    http: reqwest::Client,
    projections: ProjectionRegistry,
}

impl ProviderContext {
    pub fn new(api_url: Option<String>) -> MapResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MapError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url: api_url.map(|u| u.trim_end_matches('/').to_string()),
            http,
            projections: ProjectionRegistry::with_defaults(),
        })
    }

    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn projections(&self) -> &ProjectionRegistry {
        &self.projections
    }

    /// Base of the backend CORS proxy endpoint, if a backend is configured.
    pub fn proxy_base(&self) -> Option<String> {
        self.api_url.as_ref().map(|u| format!("{u}/api/proxy"))
    }

    /// Rewrite `target` to go through the backend proxy. The target URL is
    /// carried whole in the `url` query parameter, percent-encoded.
    pub fn proxied_url(&self, target: &str) -> String {
        match self.proxy_base() {
            Some(base) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("url", target)
                    .finish();
                format!("{base}?{encoded}")
            }
            None => target.to_string(),
        }
    }

    /// Apply the proxy only when the layer asked for it.
    pub fn maybe_proxied(&self, target: &str, use_proxy: bool) -> String {
        if use_proxy {
            self.proxied_url(target)
        } else {
            target.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxied_url_encodes_target() {
        let ctx = ProviderContext::new(Some("http://backend:3000/".to_string())).unwrap();
        let out = ctx.proxied_url("https://gis.example.com/wms?SERVICE=WMS&REQUEST=GetMap");
        assert!(out.starts_with("http://backend:3000/api/proxy?url="));
        assert!(out.contains("https%3A%2F%2Fgis.example.com"));
        // The original query separators must not survive unencoded.
        assert!(!out["http://backend:3000/api/proxy?".len()..].contains("?SERVICE"));
    }

    #[test]
    fn no_backend_leaves_url_untouched() {
        let ctx = ProviderContext::new(None).unwrap();
        assert_eq!(ctx.proxied_url("https://a.example/x"), "https://a.example/x");
        assert_eq!(ctx.maybe_proxied("https://a.example/x", true), "https://a.example/x");
    }

    #[test]
    fn maybe_proxied_respects_flag() {
        let ctx = ProviderContext::new(Some("http://b".to_string())).unwrap();
        assert_eq!(ctx.maybe_proxied("https://a.example/x", false), "https://a.example/x");
        assert!(ctx.maybe_proxied("https://a.example/x", true).starts_with("http://b/api/proxy?"));
    }
}
