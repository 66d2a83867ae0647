//! Embeddable map viewer.
//!
//! A [`MapSession`] loads a composed map from the backend viewer API and
//! holds the live render stack; [`ViewerElement`] wraps it behind an
//! attribute surface with debounced reloads for embedding hosts. Identify
//! clicks fan out concurrently over all interrogable layers, and editable
//! layers get a full select/modify/snap/draw editing session with WFS-T
//! persistence.

pub mod editing;
pub mod element;
pub mod events;
pub mod identify;
pub mod session;

pub use editing::{DrawMode, EditSession, Interaction, TransactionPlan};
pub use element::{AttributeEffect, ViewerElement, ViewerOptions};
pub use events::{EventBus, ViewerEvent};
pub use identify::{popup_html, IdentifyResult};
pub use session::{
    IdentifyOutcome, InteractionMode, LayerState, LayerSummary, LoadFailure, MapSession,
    SessionState, ViewState,
};

/// Install a global tracing subscriber for embedding hosts that have none.
/// The filter honors `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
