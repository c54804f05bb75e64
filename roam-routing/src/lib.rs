//! Routing engine for trimmed graph snapshots.
//!
//! Responsibilities:
//! - Flatten a graph snapshot into CSR arrays under the shared routing
//!   profile.
//! - Build, persist and reload the distance-weighted contraction hierarchy.
//! - Answer shortest-path queries with walking legs from exact coordinates.
//! - Serve the address table with its spatial index and samplers.
//!
//! Boundaries:
//! - Everything here is immutable after construction and shared read-only
//!   by the HTTP layer; no request ever mutates engine state.

pub mod addresses;
pub mod ch;
pub mod engine;
pub mod geo_index;
pub mod graph;

pub use addresses::{Address, AddressStore, AddressStoreError, Bbox, Pagination};
pub use ch::{ContractionIndex, ContractionIndexError};
pub use engine::{
    EngineError, RouteError, RouteOptions, RoutePoint, RouteResult, RoutingEngine,
};
pub use geo_index::GeoPointIndex;
pub use graph::{GraphBuildError, RoutingGraph};
