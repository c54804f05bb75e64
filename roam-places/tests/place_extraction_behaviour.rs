//! Behavioural tests for the place-extraction pipeline.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use roam_core::TagList;
use roam_osm::{Entity, MemberKind, MemorySource, RawMember, RawNode, RawRelation, RawWay};
use roam_places::{
    extract_places_from_source, CategorySet, PlaceOptions, PlaceSummary, RegionIndex,
};

const REGIONS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": { "id": "NL31", "na": "Utrecht" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[5.0, 52.0], [6.0, 52.0], [6.0, 53.0], [5.0, 53.0], [5.0, 52.0]]]
      }
    },
    {
      "type": "Feature",
      "properties": { "id": "NL32", "na": "Noord-Holland" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[4.0, 52.0], [5.0, 52.0], [5.0, 53.0], [4.0, 53.0], [4.0, 52.0]]]
      }
    }
  ]
}"#;

const CATEGORIES: &str = r#"
categories:
  - name: bar
    max_per_region: 2
    tags: ["amenity=bar"]
  - name: shop
    tags: ["shop=*"]
"#;

fn bar_node(id: i64, lat: f64, lon: f64) -> Entity {
    Entity::Node(RawNode {
        id,
        lat,
        lon,
        tags: TagList::from_pairs([("amenity", "bar"), ("name", "bar")]),
    })
}

fn plain_node(id: i64, lat: f64, lon: f64) -> Entity {
    Entity::Node(RawNode {
        id,
        lat,
        lon,
        tags: TagList::new(),
    })
}

#[fixture]
fn regions() -> RegionIndex {
    RegionIndex::from_geojson_str(REGIONS).expect("valid regions")
}

#[fixture]
fn categories() -> CategorySet {
    CategorySet::from_yaml_str(CATEGORIES).expect("valid categories")
}

struct PlacesOutput {
    summary: PlaceSummary,
    rows: Vec<Vec<String>>,
    _dir: TempDir,
}

fn run(
    entities: Vec<Entity>,
    categories: &CategorySet,
    regions: &RegionIndex,
    seed: u64,
) -> PlacesOutput {
    let dir = TempDir::new().expect("create temp dir");
    let output = dir.path().join("area.places.csv.gz");
    let summary = extract_places_from_source(
        &MemorySource::new(entities),
        categories,
        regions,
        &output,
        PlaceOptions { seed: Some(seed) },
    )
    .expect("pipeline succeeds");
    let rows = read_rows(&output);
    PlacesOutput {
        summary,
        rows,
        _dir: dir,
    }
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut decoder = GzDecoder::new(std::fs::File::open(path).expect("open gz"));
    let mut text = String::new();
    decoder.read_to_string(&mut text).expect("decompress");
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    reader
        .records()
        .map(|record| {
            record
                .expect("valid record")
                .iter()
                .map(str::to_owned)
                .collect()
        })
        .collect()
}

#[rstest]
fn reservoir_bounds_rows_per_category_and_region(
    categories: CategorySet,
    regions: RegionIndex,
) {
    // Three matching bars in NL31, one in NL32.
    let entities = vec![
        bar_node(1, 52.1, 5.1),
        bar_node(2, 52.2, 5.2),
        bar_node(3, 52.3, 5.3),
        bar_node(4, 52.1, 4.5),
    ];
    let output = run(entities, &categories, &regions, 42);

    assert_eq!(output.summary.matched_nodes, 4);
    let nl31: Vec<_> = output.rows.iter().filter(|r| r[6] == "NL31").collect();
    let nl32: Vec<_> = output.rows.iter().filter(|r| r[6] == "NL32").collect();
    assert_eq!(nl31.len(), 2, "NL31 rows bounded at max_per_region");
    assert_eq!(nl32.len(), 1);
}

#[rstest]
fn same_seed_reproduces_the_same_sample(categories: CategorySet, regions: RegionIndex) {
    let entities: Vec<Entity> = (0..20).map(|i| bar_node(i, 52.05 + 0.01 * f64::from(i as i32), 5.5)).collect();

    let first = run(entities.clone(), &categories, &regions, 42);
    let second = run(entities.clone(), &categories, &regions, 42);
    let ids = |output: &PlacesOutput| {
        let mut ids: Vec<String> = output.rows.iter().map(|r| r[0].clone()).collect();
        ids.sort();
        ids
    };
    assert_eq!(ids(&first), ids(&second));

    let third = run(entities, &categories, &regions, 7);
    // A different seed is allowed to pick a different pair; both stay bounded.
    assert_eq!(third.rows.len(), 2);
}

#[rstest]
fn row_shape_carries_mercator_and_flags(categories: CategorySet, regions: RegionIndex) {
    let output = run(vec![bar_node(5, 52.1, 5.1)], &categories, &regions, 1);
    assert_eq!(output.rows.len(), 1);
    let row = &output.rows[0];
    assert_eq!(row[0], "5");
    assert_eq!(row[1], "bar");
    let (x, y) = roam_core::wgs84_to_web_mercator(52.1, 5.1);
    let row_x: f64 = row[4].parse().expect("x_mercator");
    let row_y: f64 = row[5].parse().expect("y_mercator");
    assert!((row_x - x).abs() < 0.01);
    assert!((row_y - y).abs() < 0.01);
    assert_eq!(&row[7..10], &["1".to_owned(), "0".to_owned(), "0".to_owned()]);
    let tags: serde_json::Value = serde_json::from_str(&row[10]).expect("tags JSON");
    assert_eq!(tags["amenity"], "bar");
}

#[rstest]
fn way_centroid_resolves_region_from_member_nodes(
    categories: CategorySet,
    regions: RegionIndex,
) {
    let entities = vec![
        plain_node(1, 52.10, 5.10),
        plain_node(2, 52.20, 5.20),
        Entity::Way(RawWay {
            id: 30,
            tags: TagList::from_pairs([("shop", "bakery")]),
            refs: vec![1, 2],
        }),
    ];
    let output = run(entities, &categories, &regions, 1);

    assert_eq!(output.summary.matched_ways, 1);
    let row = &output.rows[0];
    assert_eq!(row[1], "shop");
    assert_eq!(row[6], "NL31");
    let lat: f64 = row[2].parse().expect("lat");
    assert!((lat - 52.15).abs() < 1e-6);
    assert_eq!(&row[7..10], &["0".to_owned(), "1".to_owned(), "0".to_owned()]);
}

#[rstest]
fn relation_centroid_weights_outer_ways(categories: CategorySet, regions: RegionIndex) {
    let entities = vec![
        plain_node(1, 52.10, 5.10),
        plain_node(2, 52.10, 5.20),
        plain_node(3, 52.40, 5.40),
        Entity::Way(RawWay {
            id: 30,
            tags: TagList::new(),
            refs: vec![1, 2],
        }),
        Entity::Way(RawWay {
            id: 31,
            tags: TagList::new(),
            refs: vec![3],
        }),
        Entity::Relation(RawRelation {
            id: 40,
            tags: TagList::from_pairs([("shop", "mall")]),
            members: vec![
                RawMember {
                    kind: MemberKind::Way,
                    member_ref: 30,
                    role: "outer".to_owned(),
                },
                RawMember {
                    kind: MemberKind::Way,
                    member_ref: 31,
                    role: "outer".to_owned(),
                },
                RawMember {
                    kind: MemberKind::Node,
                    member_ref: 1,
                    role: "admin_centre".to_owned(),
                },
            ],
        }),
    ];
    let output = run(entities, &categories, &regions, 1);

    assert_eq!(output.summary.matched_relations, 1);
    let row = &output.rows[0];
    assert_eq!(row[1], "shop");
    assert_eq!(&row[7..10], &["0".to_owned(), "0".to_owned(), "1".to_owned()]);
    // Way 30 (2 nodes at lat 52.10) outweighs way 31 (1 node at 52.40).
    let lat: f64 = row[2].parse().expect("lat");
    assert!((lat - 52.20).abs() < 1e-6, "lat {lat}");
}

#[rstest]
fn objects_outside_every_region_are_counted(categories: CategorySet, regions: RegionIndex) {
    let output = run(vec![bar_node(9, 48.0, 11.0)], &categories, &regions, 1);
    assert_eq!(output.summary.matched_nodes, 1);
    assert_eq!(output.summary.outside_regions, 1);
    assert!(output.rows.is_empty());
}
