//! OSM ingestion and the offline graph pipelines.
//!
//! Responsibilities:
//! - Stream typed OSM entities out of PBF extracts in canonical order.
//! - Run the two-pass extractor that trims a country extract down to its
//!   routable graph and harvests address records.
//! - Repair connectivity by bridging disconnected components with synthetic
//!   ways.
//! - Persist the trimmed graph as a versioned snapshot artefact.
//!
//! Boundaries:
//! - Routing itself lives in `roam-routing`; place extraction in
//!   `roam-places`.
//! - All pipelines are single-threaded with blocking I/O; nothing here is
//!   shared with the HTTP layer.

pub mod addresses;
pub mod connect;
pub mod extract;
pub mod gzip;
pub mod snapshot;
pub mod stream;

pub use addresses::{AddressCsvError, AddressCsvWriter, AddressRecord, ObjectKind};
pub use connect::{connect_components, ConnectError, ConnectSummary};
pub use extract::{trim_and_extract, trim_source, TrimError, TrimOptions, TrimSummary};
pub use snapshot::{
    GraphSnapshot, SnapshotError, SnapshotNode, SnapshotWay, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use stream::{
    read_pbf, Entity, EntitySource, MemberKind, MemorySource, PbfSource, RawMember, RawNode,
    RawRelation, RawWay, StreamError,
};
