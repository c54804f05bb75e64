//! Way routability predicates.
//!
//! The extractor and the graph builder share a single notion of routability:
//! a way is kept when it is usable by cars, bicycles or pedestrians under the
//! standard OSM access rules, or when its `highway` value appears on the
//! broad fallback list below.

use crate::tags::TagList;

const CAR_ACCESS_WHITELIST: &[&str] = &["yes", "permissive", "delivery", "designated", "destination"];

const SOFT_ACCESS_WHITELIST: &[&str] = &[
    "yes",
    "permissive",
    "delivery",
    "designated",
    "destination",
    "agricultural",
    "forestry",
    "public",
];

fn in_list(value: &str, list: &[&str]) -> bool {
    list.contains(&value)
}

/// Car usability, following the standard OSM car profile.
#[must_use]
pub fn is_used_by_cars(tags: &TagList) -> bool {
    if tags.has("junction") {
        return true;
    }
    if tags.get("route") == Some("ferry") {
        return true;
    }
    if tags.get("ferry") == Some("yes") {
        return true;
    }

    let Some(highway) = tags.get("highway") else {
        return false;
    };

    if tags.get("motorcar") == Some("no") {
        return false;
    }
    if tags.get("motor_vehicle") == Some("no") {
        return false;
    }
    if let Some(access) = tags.get("access") {
        if !in_list(access, CAR_ACCESS_WHITELIST) {
            return false;
        }
    }

    if matches!(
        highway,
        "motorway"
            | "trunk"
            | "primary"
            | "secondary"
            | "tertiary"
            | "unclassified"
            | "residential"
            | "service"
            | "motorway_link"
            | "trunk_link"
            | "primary_link"
            | "secondary_link"
            | "tertiary_link"
            | "motorway_junction"
            | "living_street"
            | "track"
            | "ferry"
    ) {
        return true;
    }

    if highway == "bicycle_road" {
        return tags.get("motorcar") == Some("yes");
    }

    if matches!(
        highway,
        "construction"
            | "path"
            | "footway"
            | "cycleway"
            | "bridleway"
            | "pedestrian"
            | "bus_guideway"
            | "raceway"
            | "escape"
            | "steps"
            | "proposed"
            | "conveying"
    ) {
        return false;
    }

    if let Some(oneway) = tags.get("oneway") {
        if oneway == "reversible" || oneway == "alternating" {
            return false;
        }
    }

    // An explicit speed limit on an unknown highway value is treated as a
    // signal that the way carries traffic.
    tags.has("maxspeed")
}

/// Bicycle usability, following the standard OSM bicycle profile.
#[must_use]
pub fn is_used_by_bicycles(tags: &TagList) -> bool {
    if tags.has("junction") {
        return true;
    }
    if tags.get("route") == Some("ferry") {
        return true;
    }
    if tags.get("ferry") == Some("ferry") {
        return true;
    }

    let Some(highway) = tags.get("highway") else {
        return false;
    };
    if highway == "proposed" {
        return false;
    }

    if let Some(access) = tags.get("access") {
        if !in_list(access, SOFT_ACCESS_WHITELIST) {
            return false;
        }
    }
    if let Some(bicycle) = tags.get("bicycle") {
        if bicycle == "no" || bicycle == "use_sidepath" {
            return false;
        }
    }

    // An explicit cycleway tag settles the question.
    if tags.has("cycleway")
        || tags.has("cycleway:left")
        || tags.has("cycleway:right")
        || tags.has("cycleway:both")
    {
        return true;
    }

    matches!(
        highway,
        "secondary"
            | "tertiary"
            | "unclassified"
            | "residential"
            | "service"
            | "secondary_link"
            | "tertiary_link"
            | "living_street"
            | "track"
            | "bicycle_road"
            | "primary"
            | "primary_link"
            | "path"
            | "footway"
            | "cycleway"
            | "bridleway"
            | "pedestrian"
            | "crossing"
            | "escape"
            | "steps"
            | "ferry"
    )
}

/// Pedestrian usability, following the standard OSM pedestrian profile.
#[must_use]
pub fn is_used_by_pedestrians(tags: &TagList) -> bool {
    if tags.has("junction") {
        return true;
    }
    if tags.get("route") == Some("ferry") {
        return true;
    }
    if tags.get("ferry") == Some("ferry") {
        return true;
    }

    if let Some(public_transport) = tags.get("public_transport") {
        if matches!(
            public_transport,
            "stop_position" | "platform" | "stop_area" | "station"
        ) {
            return true;
        }
    }
    if let Some(railway) = tags.get("railway") {
        if matches!(
            railway,
            "halt" | "platform" | "subway_entrance" | "station" | "tram_stop"
        ) {
            return true;
        }
    }

    let Some(highway) = tags.get("highway") else {
        return false;
    };

    if let Some(access) = tags.get("access") {
        if !in_list(access, SOFT_ACCESS_WHITELIST) {
            return false;
        }
    }
    if tags.get("crossing") == Some("no") {
        return false;
    }

    if matches!(
        highway,
        "secondary"
            | "tertiary"
            | "unclassified"
            | "residential"
            | "service"
            | "secondary_link"
            | "tertiary_link"
            | "living_street"
            | "track"
            | "bicycle_road"
            | "path"
            | "footway"
            | "cycleway"
            | "bridleway"
            | "pedestrian"
            | "escape"
            | "steps"
            | "crossing"
            | "escalator"
            | "elevator"
            | "platform"
            | "ferry"
    ) {
        return true;
    }

    false
}

/// Fallback `highway` values admitted beyond the three mode profiles.
const FALLBACK_HIGHWAY_VALUES: &[&str] = &[
    // Main road types
    "motorway",
    "trunk",
    "primary",
    "secondary",
    "tertiary",
    "unclassified",
    "residential",
    // Link roads
    "motorway_link",
    "trunk_link",
    "primary_link",
    "secondary_link",
    "tertiary_link",
    // Special road types
    "living_street",
    "service",
    "pedestrian",
    "track",
    "bus_guideway",
    "busway",
    "raceway",
    "road",
    "construction",
    "escape",
    // Paths
    "path",
    "footway",
    "cycleway",
    "bridleway",
    "steps",
    "corridor",
    // Point features that appear as way tags in practice
    "bus_stop",
    "crossing",
    "emergency_access_point",
    "give_way",
    "mini_roundabout",
    "motorway_junction",
    "passing_place",
    "platform",
    "rest_area",
    "services",
    "speed_camera",
    "stop",
    "street_lamp",
    "traffic_signals",
    "turning_circle",
    "turning_loop",
    // Lifecycle states
    "proposed",
    "planned",
    "abandoned",
    "disused",
    "razed",
    // Vertical and assisted infrastructure
    "via_ferrata",
    "elevator",
    "escalator",
];

/// The single routability notion shared by the extractor and graph builder.
///
/// A way is routable when any mode profile admits it, when its `highway`
/// value appears on the fallback list, or when it is a railway or public
/// transport platform.
///
/// # Examples
/// ```rust
/// use roam_core::{is_routable, TagList};
///
/// assert!(is_routable(&TagList::from_pairs([("highway", "residential")])));
/// assert!(!is_routable(&TagList::from_pairs([("waterway", "river")])));
/// ```
#[must_use]
pub fn is_routable(tags: &TagList) -> bool {
    if is_used_by_cars(tags) || is_used_by_bicycles(tags) || is_used_by_pedestrians(tags) {
        return true;
    }

    if let Some(highway) = tags.get("highway") {
        if FALLBACK_HIGHWAY_VALUES.contains(&highway) {
            return true;
        }
    }

    tags.get("railway") == Some("platform") || tags.get("public_transport") == Some("platform")
}
