//! Common types shared across the map-composition crates.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod feature;
pub mod layer;
pub mod style;
pub mod tile;

pub use bbox::BoundingBox;
pub use crs::{CrsCode, ProjectionDef, ProjectionRegistry};
pub use error::{MapError, MapResult};
pub use feature::{Feature, FeatureCollection, Geometry};
pub use layer::{BasemapConfig, LayerConfig, LayerId, LayerType, MapConfig, MapView};
pub use style::{Paint, ResolvedStyle, StyleDescriptor};
pub use tile::{TileCoord, TileMatrix, TileMatrixSet};
