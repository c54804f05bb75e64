//! Typed single-pass OSM entity stream.
//!
//! Wraps `osmpbf` into a sequential callback delivering entities in OSM
//! canonical order (all nodes, then all ways, then all relations). The
//! extractor relies on that order: when a way arrives, every node it
//! references has already been seen. A malformed record fails the whole
//! pass; nothing is skipped silently.

use std::path::{Path, PathBuf};

use osmpbf::{Element, ElementReader, RelMemberType};
use thiserror::Error;

use roam_core::TagList;

/// A node with its raw OSM id and WGS84 location.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: TagList,
}

/// A way with its ordered node references.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWay {
    pub id: i64,
    pub tags: TagList,
    pub refs: Vec<i64>,
}

/// Relation member target kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Way,
    Relation,
}

/// One member of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMember {
    pub kind: MemberKind,
    pub member_ref: i64,
    pub role: String,
}

/// A relation with its typed member list.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRelation {
    pub id: i64,
    pub tags: TagList,
    pub members: Vec<RawMember>,
}

/// A typed OSM entity as delivered by [`read_pbf`].
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(RawNode),
    Way(RawWay),
    Relation(RawRelation),
}

/// Errors raised while streaming a PBF extract.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The file could not be opened.
    #[error("failed to open OSM PBF file at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: osmpbf::Error,
    },
    /// A record failed to decode; the pass is abandoned.
    #[error("failed to decode OSM PBF data at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: osmpbf::Error,
    },
}

/// A replayable source of OSM entities in canonical order.
///
/// The two-pass pipelines call [`EntitySource::stream`] once per pass; a
/// PBF file is re-read each time, an in-memory source replays its list.
pub trait EntitySource {
    /// Stream every entity through `handler`, in canonical order.
    ///
    /// # Errors
    ///
    /// Implementations fail on unreadable or malformed input; nothing is
    /// skipped silently.
    fn stream(&self, handler: &mut dyn FnMut(Entity)) -> Result<(), StreamError>;
}

/// An [`EntitySource`] backed by a PBF file on disk.
pub struct PbfSource {
    path: PathBuf,
}

impl PbfSource {
    /// Wrap a PBF path.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl EntitySource for PbfSource {
    fn stream(&self, handler: &mut dyn FnMut(Entity)) -> Result<(), StreamError> {
        read_pbf(&self.path, handler)
    }
}

/// An [`EntitySource`] replaying an in-memory entity list; the entities
/// must already be in canonical order.
pub struct MemorySource {
    entities: Vec<Entity>,
}

impl MemorySource {
    /// Wrap an entity list.
    #[must_use]
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }
}

impl EntitySource for MemorySource {
    fn stream(&self, handler: &mut dyn FnMut(Entity)) -> Result<(), StreamError> {
        for entity in &self.entities {
            handler(entity.clone());
        }
        Ok(())
    }
}

/// Stream every entity of `path` through `handler`, in canonical order.
///
/// # Errors
///
/// Returns [`StreamError::Open`] when the file cannot be opened and
/// [`StreamError::Decode`] when any record is malformed.
pub fn read_pbf<F>(path: &Path, mut handler: F) -> Result<(), StreamError>
where
    F: FnMut(Entity),
{
    let reader = ElementReader::from_path(path).map_err(|source| StreamError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    reader
        .for_each(|element| match element {
            Element::Node(node) => handler(Entity::Node(RawNode {
                id: node.id(),
                lat: node.lat(),
                lon: node.lon(),
                tags: TagList::from_pairs(node.tags()),
            })),
            Element::DenseNode(node) => handler(Entity::Node(RawNode {
                id: node.id(),
                lat: node.lat(),
                lon: node.lon(),
                tags: TagList::from_pairs(node.tags()),
            })),
            Element::Way(way) => handler(Entity::Way(RawWay {
                id: way.id(),
                tags: TagList::from_pairs(way.tags()),
                refs: way.refs().collect(),
            })),
            Element::Relation(relation) => {
                let members = relation
                    .members()
                    .map(|member| RawMember {
                        kind: match member.member_type {
                            RelMemberType::Node => MemberKind::Node,
                            RelMemberType::Way => MemberKind::Way,
                            RelMemberType::Relation => MemberKind::Relation,
                        },
                        member_ref: member.member_id,
                        role: member.role().unwrap_or_default().to_owned(),
                    })
                    .collect();
                handler(Entity::Relation(RawRelation {
                    id: relation.id(),
                    tags: TagList::from_pairs(relation.tags()),
                    members,
                }));
            }
        })
        .map_err(|source| StreamError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[rstest]
    fn missing_file_yields_open_error() {
        let missing = Path::new("/nonexistent/area.osm.pbf");
        let err = read_pbf(missing, |_| {}).expect_err("missing file");
        match err {
            StreamError::Open { path, .. } => assert_eq!(path, missing),
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[rstest]
    fn garbage_payload_yields_decode_error() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(b"this is not a pbf file at all")
            .expect("write garbage");
        let err = read_pbf(file.path(), |_| {}).expect_err("garbage payload");
        assert!(matches!(err, StreamError::Decode { .. }));
    }
}
