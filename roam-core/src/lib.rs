//! Core domain types for the roam toolkit.
//!
//! Responsibilities:
//! - Tag handling and the routability/speed/direction profile shared by the
//!   extractor and the routing graph builder.
//! - Geodesic and Web Mercator arithmetic.
//! - The disk-backed primitives used by the offline pipelines: the sparse
//!   node-location store, the grid spatial index and union-find.
//!
//! Boundaries:
//! - No file-format knowledge (PBF, CSV, YAML, GeoJSON live in the pipeline
//!   crates).
//! - No global mutable state; every store is owned by a single builder.

pub mod geodesy;
pub mod grid;
pub mod node_store;
pub mod profile;
pub mod routability;
pub mod scratch;
pub mod tags;
pub mod union_find;

pub use geodesy::{haversine_m, web_mercator_to_wgs84, wgs84_to_web_mercator};
pub use grid::{DiskGridIndex, GridIndexError, GridMatch};
pub use node_store::{NodeLocationStore, NodeStoreError};
pub use profile::{
    direction_category, effective_speed_kmh, parse_maxspeed_kmh, DirectionCategory, HighwayClass,
    WALKING_SPEED_KMH,
};
pub use routability::{
    is_routable, is_used_by_bicycles, is_used_by_cars, is_used_by_pedestrians,
};
pub use scratch::unique_scratch_path;
pub use tags::TagList;
pub use union_find::UnionFind;
