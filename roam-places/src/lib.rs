//! Categorised place extraction.
//!
//! Responsibilities:
//! - Load category tag-rule sets from YAML and NUTS region polygons from
//!   GeoJSON.
//! - Stream an OSM extract once, matching objects to categories, resolving
//!   their containing region, and reservoir-sampling per
//!   `(category, region)` pair.
//! - Write the bounded sample as a gzipped CSV.
//!
//! Boundaries:
//! - Routing concerns live in `roam-routing`; this crate never touches the
//!   routable graph.

pub mod categories;
pub mod pipeline;
pub mod regions;
pub mod reservoir;

pub use categories::{Category, CategoryConfigError, CategorySet, TagRule};
pub use pipeline::{
    extract_places, extract_places_from_source, PlaceError, PlaceOptions, PlaceSummary,
};
pub use regions::{RegionIndex, RegionIndexError};
pub use reservoir::{Reservoir, ReservoirEntry};
