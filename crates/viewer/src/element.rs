//! Embeddable element wrapper.
//!
//! Hosts drive the viewer through four attributes (`map-id`, `api-key`,
//! `api-url`, `basemap`). Attribute writes bump a generation counter and
//! the actual reload is debounced: it proceeds only if no newer write has
//! arrived, so a burst of writes during host setup coalesces into a single
//! fetch. Basemap changes switch the background directly, without a reload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::warn;

use map_common::MapResult;

use crate::identify::escape_html;
use crate::session::{MapSession, SessionState};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Environment-supplied defaults for embedding hosts.
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    pub api_url: Option<String>,
    pub debounce: Duration,
}

impl ViewerOptions {
    pub fn from_env() -> Self {
        let api_url = std::env::var("VIEWER_API_URL")
            .ok()
            .filter(|s| !s.is_empty());
        let debounce = std::env::var("VIEWER_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE);
        Self { api_url, debounce }
    }
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            api_url: None,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// What an attribute write requires from the host's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeEffect {
    /// Schedule `reload_when_settled` with this token.
    Reload(u64),
    /// The basemap was switched in place; nothing to schedule.
    BasemapSwitched,
    /// Unknown attribute; ignored.
    None,
}

pub struct ViewerElement {
    options: ViewerOptions,
    session: MapSession,
    map_id: Option<String>,
    api_key: Option<String>,
    api_url: Option<String>,
    generation: AtomicU64,
}

impl ViewerElement {
    pub fn new(options: ViewerOptions) -> MapResult<Self> {
        let session = MapSession::new(options.api_url.clone(), None)?;
        Ok(Self {
            options,
            session,
            map_id: None,
            api_key: None,
            api_url: None,
            generation: AtomicU64::new(0),
        })
    }

    pub fn session(&self) -> &MapSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut MapSession {
        &mut self.session
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn effective_api_url(&self) -> Option<String> {
        self.api_url.clone().or_else(|| self.options.api_url.clone())
    }

    fn rebuild_session(&mut self) -> MapResult<()> {
        self.session = MapSession::new(self.effective_api_url(), self.api_key.clone())?;
        Ok(())
    }

    /// Apply an attribute write. Connection attributes request a debounced
    /// reload; the basemap attribute takes effect immediately.
    pub fn set_attribute(&mut self, name: &str, value: &str) -> AttributeEffect {
        match name {
            "map-id" => {
                self.map_id = Some(value.to_string());
                AttributeEffect::Reload(self.bump())
            }
            "api-key" => {
                self.api_key = Some(value.to_string());
                if let Err(err) = self.rebuild_session() {
                    warn!(%err, "failed to rebuild session for new api key");
                }
                AttributeEffect::Reload(self.bump())
            }
            "api-url" => {
                self.api_url = Some(value.to_string());
                if let Err(err) = self.rebuild_session() {
                    warn!(%err, "failed to rebuild session for new api url");
                }
                AttributeEffect::Reload(self.bump())
            }
            "basemap" => {
                self.session.set_basemap(value);
                AttributeEffect::BasemapSwitched
            }
            other => {
                warn!(attribute = %other, "ignoring unknown attribute");
                AttributeEffect::None
            }
        }
    }

    /// Debounced load: wait out the debounce window, then load only if no
    /// newer attribute write superseded this token. Returns `None` when the
    /// reload was superseded or no map id is set.
    pub async fn reload_when_settled(&mut self, token: u64) -> Option<MapResult<()>> {
        tokio::time::sleep(self.options.debounce).await;
        if self.generation() != token {
            return None;
        }
        let map_id = self.map_id.clone()?;
        Some(self.session.load_map(&map_id).await)
    }

    /// The persistent error panel, rendered while the session is in the
    /// error state. Shows the failure, the map id and the backend URL so a
    /// misconfigured embed is diagnosable from the page itself.
    pub fn error_panel_html(&self) -> Option<String> {
        match self.session.state() {
            SessionState::Error(failure) => Some(format!(
                concat!(
                    r#"<div class="viewer-error">"#,
                    "<strong>Map failed to load</strong>",
                    "<p>{}</p>",
                    r#"<p class="viewer-error-detail">Map: {}</p>"#,
                    r#"<p class="viewer-error-detail">Backend: {}</p>"#,
                    "</div>"
                ),
                escape_html(&failure.message),
                escape_html(&failure.map_id),
                escape_html(&failure.api_url),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use map_common::LayerType;

    fn element() -> ViewerElement {
        ViewerElement::new(ViewerOptions {
            api_url: Some("http://backend:3000".to_string()),
            debounce: Duration::from_millis(5),
        })
        .unwrap()
    }

    #[test]
    fn attribute_writes_bump_the_generation() {
        let mut el = element();
        let first = match el.set_attribute("map-id", "map-1") {
            AttributeEffect::Reload(t) => t,
            other => panic!("expected reload, got {other:?}"),
        };
        let second = match el.set_attribute("map-id", "map-2") {
            AttributeEffect::Reload(t) => t,
            other => panic!("expected reload, got {other:?}"),
        };
        assert!(second > first);
        assert_eq!(el.generation(), second);
    }

    #[tokio::test]
    async fn superseded_reload_tokens_do_nothing() {
        let mut el = element();
        let stale = match el.set_attribute("map-id", "map-1") {
            AttributeEffect::Reload(t) => t,
            other => panic!("expected reload, got {other:?}"),
        };
        el.set_attribute("map-id", "map-2");
        assert!(el.reload_when_settled(stale).await.is_none());
    }

    #[test]
    fn basemap_attribute_switches_without_reload() {
        let mut el = element();
        let effect = el.set_attribute("basemap", "osm");
        assert_eq!(effect, AttributeEffect::BasemapSwitched);
        assert_eq!(el.session().basemap().unwrap().kind, LayerType::Osm);
        assert_eq!(el.generation(), 0);
    }

    #[test]
    fn unknown_attributes_are_ignored() {
        let mut el = element();
        assert_eq!(el.set_attribute("data-theme", "dark"), AttributeEffect::None);
    }

    #[tokio::test]
    async fn failed_load_renders_the_error_panel() {
        let mut el = ViewerElement::new(ViewerOptions {
            api_url: None,
            debounce: Duration::from_millis(1),
        })
        .unwrap();
        let token = match el.set_attribute("map-id", "map-9") {
            AttributeEffect::Reload(t) => t,
            other => panic!("expected reload, got {other:?}"),
        };
        // No backend configured: the load fails without touching the network.
        let result = el.reload_when_settled(token).await.unwrap();
        assert!(result.is_err());
        let panel = el.error_panel_html().unwrap();
        assert!(panel.contains("map-9"));
        assert!(panel.contains("viewer-error"));
    }
}
