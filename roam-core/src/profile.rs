//! Speed and direction profile for routable ways.
//!
//! Tags are folded into a [`HighwayClass`] carrying the per-family speed cap
//! and direction policy; the effective speed is
//! `min(parsed maxspeed or family default, family cap)`.

use crate::tags::TagList;

/// Fixed walking speed for snap-to-graph legs, in km/h.
pub const WALKING_SPEED_KMH: f64 = 6.0;

/// Conversion factor from miles per hour to km/h.
const MPH_TO_KMH: f64 = 1.609_344;

/// Travel directions permitted along a way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionCategory {
    /// Only in node-list order.
    ForwardOnly,
    /// Only against node-list order.
    BackwardOnly,
    /// Both directions.
    Both,
}

/// Way families with distinct speed and direction behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighwayClass {
    Motorway,
    MotorwayLink,
    Trunk,
    TrunkLink,
    Primary,
    PrimaryLink,
    Secondary,
    SecondaryLink,
    Tertiary,
    TertiaryLink,
    Residential,
    Unclassified,
    Road,
    LivingStreet,
    Service,
    Track,
    Bridleway,
    Path,
    Footway,
    Cycleway,
    Pedestrian,
    Corridor,
    Platform,
    /// `railway=platform` or `public_transport=platform`.
    RailPlatform,
    Steps,
    ViaFerrata,
    Elevator,
    Escalator,
    Construction,
    Proposed,
    Planned,
    Abandoned,
    Disused,
    Razed,
    BusGuideway,
    Busway,
    Raceway,
    Escape,
    EmergencyAccessPoint,
    /// Point-like highway features that occasionally appear on ways.
    PointFeature,
    Ferry,
    /// Highway value outside every known family.
    Other,
}

impl HighwayClass {
    /// Classify a tag list. `None` when no highway-like tag is present.
    #[must_use]
    pub fn from_tags(tags: &TagList) -> Option<Self> {
        if tags.get("route") == Some("ferry") || tags.get("ferry") == Some("yes") {
            return Some(Self::Ferry);
        }

        let transit_platform = tags.get("railway") == Some("platform")
            || tags.get("public_transport") == Some("platform");

        if let Some(highway) = tags.get("highway") {
            let class = Self::from_highway_value(highway);
            // A transit platform tag narrows the generic platform family
            // but never overrides a real road classification.
            if class == Self::Platform && transit_platform {
                return Some(Self::RailPlatform);
            }
            return Some(class);
        }

        if transit_platform {
            return Some(Self::RailPlatform);
        }

        None
    }

    fn from_highway_value(value: &str) -> Self {
        match value {
            "motorway" => Self::Motorway,
            "motorway_link" => Self::MotorwayLink,
            "trunk" => Self::Trunk,
            "trunk_link" => Self::TrunkLink,
            "primary" => Self::Primary,
            "primary_link" => Self::PrimaryLink,
            "secondary" => Self::Secondary,
            "secondary_link" => Self::SecondaryLink,
            "tertiary" => Self::Tertiary,
            "tertiary_link" => Self::TertiaryLink,
            "residential" => Self::Residential,
            "unclassified" => Self::Unclassified,
            "road" => Self::Road,
            "living_street" => Self::LivingStreet,
            "service" => Self::Service,
            "track" => Self::Track,
            "bridleway" => Self::Bridleway,
            "path" => Self::Path,
            "footway" => Self::Footway,
            "cycleway" | "bicycle_road" => Self::Cycleway,
            "pedestrian" => Self::Pedestrian,
            "corridor" => Self::Corridor,
            "platform" => Self::Platform,
            "steps" => Self::Steps,
            "via_ferrata" => Self::ViaFerrata,
            "elevator" => Self::Elevator,
            "escalator" => Self::Escalator,
            "construction" => Self::Construction,
            "proposed" => Self::Proposed,
            "planned" => Self::Planned,
            "abandoned" => Self::Abandoned,
            "disused" => Self::Disused,
            "razed" => Self::Razed,
            "bus_guideway" => Self::BusGuideway,
            "busway" => Self::Busway,
            "raceway" => Self::Raceway,
            "escape" => Self::Escape,
            "emergency_access_point" => Self::EmergencyAccessPoint,
            "bus_stop" | "crossing" | "give_way" | "mini_roundabout" | "motorway_junction"
            | "passing_place" | "rest_area" | "services" | "speed_camera" | "stop"
            | "street_lamp" | "traffic_signals" | "turning_circle" | "turning_loop" => {
                Self::PointFeature
            }
            _ => Self::Other,
        }
    }

    /// Per-family speed cap in km/h. `None` for uncapped families.
    #[must_use]
    pub fn speed_cap_kmh(self) -> Option<u32> {
        match self {
            Self::Steps | Self::ViaFerrata | Self::Elevator | Self::Escalator => Some(5),
            Self::Path
            | Self::Footway
            | Self::Cycleway
            | Self::Pedestrian
            | Self::Platform
            | Self::Corridor => Some(20),
            Self::Service | Self::LivingStreet | Self::Track | Self::Bridleway => Some(30),
            Self::Construction | Self::Proposed | Self::Planned => Some(30),
            Self::Abandoned | Self::Disused | Self::Razed => Some(10),
            Self::RailPlatform => Some(10),
            Self::Residential | Self::Unclassified | Self::Road => Some(50),
            Self::BusGuideway | Self::Busway => Some(60),
            Self::Raceway => Some(80),
            Self::Escape | Self::EmergencyAccessPoint => Some(40),
            Self::PointFeature => Some(10),
            _ => None,
        }
    }

    /// Assumed speed in km/h when no parseable `maxspeed` is present.
    ///
    /// Capped families default to their cap; open-road families use the
    /// standard car-profile assumptions.
    #[must_use]
    pub fn default_speed_kmh(self) -> u32 {
        if let Some(cap) = self.speed_cap_kmh() {
            return cap;
        }
        match self {
            Self::Motorway => 90,
            Self::MotorwayLink => 45,
            Self::Trunk => 85,
            Self::TrunkLink => 40,
            Self::Primary => 65,
            Self::PrimaryLink => 30,
            Self::Secondary => 55,
            Self::SecondaryLink => 25,
            Self::Tertiary => 40,
            Self::TertiaryLink => 20,
            Self::Ferry => 5,
            _ => 50,
        }
    }

    /// Families where pedestrian and bicycle one-way defaults apply.
    #[must_use]
    pub fn is_soft_mode(self) -> bool {
        matches!(
            self,
            Self::Path
                | Self::Footway
                | Self::Cycleway
                | Self::Pedestrian
                | Self::Corridor
                | Self::Platform
                | Self::RailPlatform
                | Self::Steps
                | Self::Bridleway
                | Self::ViaFerrata
                | Self::Elevator
                | Self::Escalator
        )
    }
}

/// Parse a `maxspeed` tag into km/h.
///
/// Accepts `"50"`, `"50 km/h"`, `"30mph"`, `"30 mph"`. Non-positive or
/// unparsable values yield `None`.
#[must_use]
pub fn parse_maxspeed_kmh(tags: &TagList) -> Option<f64> {
    let raw = tags.get("maxspeed")?;
    let lowered = raw.to_ascii_lowercase();
    let is_mph = lowered.contains("mph");

    let trimmed = lowered.trim_start();
    let digits: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = digits.parse().ok()?;
    if value <= 0.0 {
        return None;
    }
    Some(if is_mph { value * MPH_TO_KMH } else { value })
}

/// Effective speed of a way in km/h: `min(maxspeed or default, cap)`.
#[must_use]
pub fn effective_speed_kmh(tags: &TagList) -> u32 {
    let Some(class) = HighwayClass::from_tags(tags) else {
        return 0;
    };

    let base = match parse_maxspeed_kmh(tags) {
        Some(parsed) => parsed.round() as u32,
        None => class.default_speed_kmh(),
    };
    match class.speed_cap_kmh() {
        Some(cap) => base.min(cap),
        None => base,
    }
}

/// Permitted travel directions for a way.
///
/// Pedestrian and bicycle families are bidirectional unless an explicit
/// `oneway` tag says otherwise; other families follow the standard car
/// one-way rules, including the motorway and roundabout defaults.
#[must_use]
pub fn direction_category(tags: &TagList) -> DirectionCategory {
    let class = HighwayClass::from_tags(tags);
    let soft = class.is_some_and(HighwayClass::is_soft_mode);
    let oneway = tags.get("oneway");

    if soft {
        return match oneway {
            Some("yes" | "true" | "1") => DirectionCategory::ForwardOnly,
            Some("-1" | "reverse") => DirectionCategory::BackwardOnly,
            _ => DirectionCategory::Both,
        };
    }

    match oneway {
        Some("no" | "false" | "0") => DirectionCategory::Both,
        Some("yes" | "true" | "1") => DirectionCategory::ForwardOnly,
        Some("-1" | "reverse") => DirectionCategory::BackwardOnly,
        _ => {
            let implied_oneway = matches!(
                class,
                Some(HighwayClass::Motorway | HighwayClass::MotorwayLink)
            ) || tags.get("junction") == Some("roundabout");
            if implied_oneway {
                DirectionCategory::ForwardOnly
            } else {
                DirectionCategory::Both
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tags(pairs: &[(&str, &str)]) -> TagList {
        TagList::from_pairs(pairs.iter().copied())
    }

    #[rstest]
    #[case(&[("maxspeed", "50")], Some(50.0))]
    #[case(&[("maxspeed", "50 km/h")], Some(50.0))]
    #[case(&[("maxspeed", "30mph")], Some(30.0 * 1.609_344))]
    #[case(&[("maxspeed", "30 mph")], Some(30.0 * 1.609_344))]
    #[case(&[("maxspeed", "0")], None)]
    #[case(&[("maxspeed", "walk")], None)]
    #[case(&[], None)]
    fn maxspeed_parsing(#[case] pairs: &[(&str, &str)], #[case] expected: Option<f64>) {
        let parsed = parse_maxspeed_kmh(&tags(pairs));
        match (parsed, expected) {
            (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9, "{a} vs {b}"),
            (None, None) => {}
            other => panic!("mismatch: {other:?}"),
        }
    }

    #[rstest]
    #[case(&[("highway", "steps")], 5)]
    #[case(&[("highway", "footway")], 20)]
    #[case(&[("highway", "service")], 30)]
    #[case(&[("highway", "residential")], 50)]
    #[case(&[("highway", "busway")], 60)]
    #[case(&[("highway", "raceway")], 80)]
    #[case(&[("highway", "abandoned")], 10)]
    #[case(&[("highway", "bus_stop")], 10)]
    #[case(&[("railway", "platform")], 10)]
    #[case(&[("public_transport", "platform")], 10)]
    fn family_caps(#[case] pairs: &[(&str, &str)], #[case] expected: u32) {
        assert_eq!(effective_speed_kmh(&tags(pairs)), expected);
    }

    #[rstest]
    fn railway_platform_cap_overrides_footway_cap() {
        let t = tags(&[("highway", "platform"), ("railway", "platform")]);
        assert_eq!(effective_speed_kmh(&t), 10);
    }

    #[rstest]
    fn maxspeed_below_cap_wins() {
        let t = tags(&[("highway", "residential"), ("maxspeed", "30")]);
        assert_eq!(effective_speed_kmh(&t), 30);
    }

    #[rstest]
    fn cap_bounds_maxspeed() {
        let t = tags(&[("highway", "footway"), ("maxspeed", "70")]);
        assert_eq!(effective_speed_kmh(&t), 20);
    }

    #[rstest]
    fn uncapped_motorway_uses_maxspeed() {
        let t = tags(&[("highway", "motorway"), ("maxspeed", "120")]);
        assert_eq!(effective_speed_kmh(&t), 120);
        assert_eq!(
            effective_speed_kmh(&tags(&[("highway", "motorway")])),
            90
        );
    }

    #[rstest]
    #[case(&[("highway", "residential")], DirectionCategory::Both)]
    #[case(&[("highway", "residential"), ("oneway", "yes")], DirectionCategory::ForwardOnly)]
    #[case(&[("highway", "residential"), ("oneway", "-1")], DirectionCategory::BackwardOnly)]
    #[case(&[("highway", "motorway")], DirectionCategory::ForwardOnly)]
    #[case(&[("highway", "motorway"), ("oneway", "no")], DirectionCategory::Both)]
    #[case(&[("highway", "tertiary"), ("junction", "roundabout")], DirectionCategory::ForwardOnly)]
    #[case(&[("highway", "cycleway")], DirectionCategory::Both)]
    #[case(&[("highway", "cycleway"), ("oneway", "yes")], DirectionCategory::ForwardOnly)]
    #[case(&[("highway", "footway"), ("oneway", "reverse")], DirectionCategory::BackwardOnly)]
    fn direction_rules(#[case] pairs: &[(&str, &str)], #[case] expected: DirectionCategory) {
        assert_eq!(direction_category(&tags(pairs)), expected);
    }

    #[rstest]
    fn ferry_class_from_route_tag() {
        assert_eq!(
            HighwayClass::from_tags(&tags(&[("route", "ferry")])),
            Some(HighwayClass::Ferry)
        );
        assert_eq!(effective_speed_kmh(&tags(&[("route", "ferry")])), 5);
    }

    #[rstest]
    fn untagged_way_has_zero_speed() {
        assert_eq!(effective_speed_kmh(&TagList::new()), 0);
    }
}
