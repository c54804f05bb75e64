//! Request handlers and their JSON shapes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::debug;
use serde::Serialize;

use roam_routing::{Address, RouteError, RouteOptions, RoutePoint, RouteResult, RoutingEngine};

use crate::ServerContext;

type Params = HashMap<String, String>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        success: false,
        error: message.into(),
    };
    (status, Json(body)).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, message)
}

fn not_found(message: impl Into<String>) -> Response {
    error_response(StatusCode::NOT_FOUND, message)
}

/// Parse a `lat,lon` pair.
fn parse_coordinate(value: &str) -> Option<(f64, f64)> {
    let (lat, lon) = value.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    (lat.is_finite() && lon.is_finite()).then_some((lat, lon))
}

fn require_coordinate(params: &Params, key: &str) -> Result<(f64, f64), Response> {
    let raw = params
        .get(key)
        .ok_or_else(|| bad_request(format!("missing required parameter {key}")))?;
    parse_coordinate(raw)
        .ok_or_else(|| bad_request(format!("parameter {key} must be of the form lat,lon")))
}

/// Parse an optional numeric parameter, rejecting malformed values.
fn optional_number<T: std::str::FromStr>(
    params: &Params,
    key: &str,
    default: T,
) -> Result<T, Response> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| bad_request(format!("parameter {key} is malformed"))),
    }
}

fn required_number<T: std::str::FromStr>(params: &Params, key: &str) -> Result<T, Response> {
    params
        .get(key)
        .ok_or_else(|| bad_request(format!("missing required parameter {key}")))?
        .parse()
        .map_err(|_| bad_request(format!("parameter {key} is malformed")))
}

fn route_options(params: &Params) -> Result<(RouteOptions, bool), Response> {
    let include_path: u8 = optional_number(params, "include_path", 1)?;
    let max_speed: Option<f64> = match params.get("max_speed") {
        None => None,
        Some(raw) => {
            let value: f64 = raw
                .parse()
                .map_err(|_| bad_request("parameter max_speed is malformed"))?;
            (value > 0.0).then_some(value)
        }
    };
    Ok((
        RouteOptions {
            max_speed_kmh: max_speed,
        },
        include_path != 0,
    ))
}

#[derive(Debug, Serialize)]
struct PathPointBody {
    lat: f64,
    lon: f64,
    node_id: Option<i64>,
    time_ms: u64,
    distance_m: u64,
    max_speed_kmh: u32,
    is_walking_segment: bool,
}

impl From<&RoutePoint> for PathPointBody {
    fn from(point: &RoutePoint) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            node_id: point.node_id,
            time_ms: point.time_ms,
            distance_m: point.distance_m,
            max_speed_kmh: point.max_speed_kmh,
            is_walking_segment: point.is_walking_segment,
        }
    }
}

#[derive(Debug, Serialize)]
struct RouteBody {
    success: bool,
    travel_time_seconds: f64,
    total_distance_meters: u64,
    path: Vec<PathPointBody>,
}

impl RouteBody {
    fn new(result: &RouteResult, include_path: bool) -> Self {
        Self {
            success: true,
            travel_time_seconds: result.travel_time_ms as f64 / 1000.0,
            total_distance_meters: result.distance_m,
            path: if include_path {
                result.points.iter().map(PathPointBody::from).collect()
            } else {
                Vec::new()
            },
        }
    }
}

fn route_failure(err: &RouteError) -> Response {
    match err {
        RouteError::NoRoute => not_found("no route found between coordinates"),
    }
}

pub(crate) async fn health(State(context): State<Arc<ServerContext>>) -> Response {
    #[derive(Serialize)]
    struct HealthBody {
        status: &'static str,
        engine_initialized: bool,
        node_count: usize,
        arc_count: usize,
        address_count: usize,
    }

    let body = HealthBody {
        status: "ok",
        engine_initialized: true,
        node_count: context.engine.node_count(),
        arc_count: context.engine.arc_count(),
        address_count: context.addresses.as_ref().map_or(0, |a| a.len()),
    };
    (StatusCode::OK, Json(body)).into_response()
}

pub(crate) async fn shortest_path(
    State(context): State<Arc<ServerContext>>,
    Query(params): Query<Params>,
) -> Response {
    match try_shortest_path(&context.engine, &params) {
        Ok(response) => response,
        Err(response) => response,
    }
}

fn try_shortest_path(engine: &RoutingEngine, params: &Params) -> Result<Response, Response> {
    let from = require_coordinate(params, "from")?;
    let to = require_coordinate(params, "to")?;
    let (options, include_path) = route_options(params)?;

    debug!("shortest_path from {from:?} to {to:?}");
    let result = engine
        .route(from, to, options)
        .map_err(|err| route_failure(&err))?;
    Ok((StatusCode::OK, Json(RouteBody::new(&result, include_path))).into_response())
}

pub(crate) async fn complete_job_route(
    State(context): State<Arc<ServerContext>>,
    Query(params): Query<Params>,
) -> Response {
    match try_complete_job_route(&context.engine, &params) {
        Ok(response) => response,
        Err(response) => response,
    }
}

fn try_complete_job_route(engine: &RoutingEngine, params: &Params) -> Result<Response, Response> {
    let from = require_coordinate(params, "from")?;
    let via = require_coordinate(params, "via")?;
    let to = require_coordinate(params, "to")?;
    let (options, include_path) = route_options(params)?;

    let speed_multiplier = match params.get("speed_multiplier") {
        None => None,
        Some(raw) => {
            let value: f64 = raw
                .parse()
                .map_err(|_| bad_request("parameter speed_multiplier is malformed"))?;
            if value <= 0.0 {
                return Err(bad_request("speed_multiplier must be greater than 0"));
            }
            Some(value)
        }
    };

    let result = engine
        .route_via(from, via, to, options, speed_multiplier)
        .map_err(|err| route_failure(&err))?;
    let body = RouteBody::new(&result, include_path);
    let headers = [
        (
            "X-Travel-Time-Seconds",
            format!("{}", body.travel_time_seconds),
        ),
        (
            "X-Total-Distance-Meters",
            body.total_distance_meters.to_string(),
        ),
        ("X-Success", "true".to_owned()),
    ];
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

fn require_addresses(context: &ServerContext) -> Result<&roam_routing::AddressStore, Response> {
    match context.addresses.as_ref() {
        Some(store) if !store.is_empty() => Ok(store),
        _ => Err(not_found(
            "no addresses loaded; start the server with an address CSV",
        )),
    }
}

fn address_json(address: &Address) -> Response {
    (StatusCode::OK, Json(address.clone())).into_response()
}

pub(crate) async fn closest_address(
    State(context): State<Arc<ServerContext>>,
    Query(params): Query<Params>,
) -> Response {
    match try_closest_address(&context, &params) {
        Ok(response) => response,
        Err(response) => response,
    }
}

fn try_closest_address(context: &ServerContext, params: &Params) -> Result<Response, Response> {
    let store = require_addresses(context)?;
    let (lat, lon) = require_coordinate(params, "location")?;
    match store.closest_to(lat, lon) {
        Some(address) => Ok(address_json(address)),
        None => Err(not_found("no address found")),
    }
}

pub(crate) async fn bbox(State(context): State<Arc<ServerContext>>) -> Response {
    match require_addresses(&context) {
        Ok(store) => match store.bbox() {
            Some(bbox) => (StatusCode::OK, Json(bbox)).into_response(),
            None => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to compute address bounding box",
            ),
        },
        Err(response) => response,
    }
}

pub(crate) async fn num_addresses(State(context): State<Arc<ServerContext>>) -> Response {
    #[derive(Serialize)]
    struct CountBody {
        count: usize,
    }

    let count = context.addresses.as_ref().map_or(0, |a| a.len());
    (StatusCode::OK, Json(CountBody { count })).into_response()
}

pub(crate) async fn address_sample(
    State(context): State<Arc<ServerContext>>,
    Query(params): Query<Params>,
) -> Response {
    match try_address_sample(&context, &params) {
        Ok(response) => response,
        Err(response) => response,
    }
}

fn try_address_sample(context: &ServerContext, params: &Params) -> Result<Response, Response> {
    #[derive(Serialize)]
    struct SampleBody {
        addresses: Vec<Address>,
        pagination: roam_routing::Pagination,
    }

    let store = require_addresses(context)?;
    let number: u32 = optional_number(params, "number", 100)?;
    let seed: u64 = optional_number(params, "seed", 42)?;
    let page_size: u32 = optional_number(params, "page_size", 20)?;
    let page_num: u32 = optional_number(params, "page_num", 0)?;

    let (page, pagination) = store
        .sample(number, seed, page_size, page_num)
        .map_err(|err| bad_request(err.to_string()))?;
    let body = SampleBody {
        addresses: page.into_iter().cloned().collect(),
        pagination,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub(crate) async fn uniform_random_address_in_annulus(
    State(context): State<Arc<ServerContext>>,
    Query(params): Query<Params>,
) -> Response {
    match try_annulus(&context, &params) {
        Ok(response) => response,
        Err(response) => response,
    }
}

fn try_annulus(context: &ServerContext, params: &Params) -> Result<Response, Response> {
    let store = require_addresses(context)?;
    let lat: f64 = required_number(params, "lat")?;
    let lon: f64 = required_number(params, "lon")?;
    let min_distance: f64 = required_number(params, "min_distance")?;
    let max_distance: f64 = required_number(params, "max_distance")?;
    let seed: u64 = optional_number(params, "seed", 42)?;

    let picked = store
        .uniform_in_annulus(lat, lon, min_distance, max_distance, seed)
        .map_err(|err| bad_request(err.to_string()))?;
    match picked {
        Some(address) => Ok(address_json(address)),
        None => Err(not_found("no address found in the specified annulus")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("52.0907,5.1214", Some((52.0907, 5.1214)))]
    #[case("52.0907, 5.1214", Some((52.0907, 5.1214)))]
    #[case("-33.9,151.2", Some((-33.9, 151.2)))]
    #[case("52.0907", None)]
    #[case("abc,5.0", None)]
    #[case("52.0,NaN", None)]
    #[case("", None)]
    fn coordinate_parsing(#[case] raw: &str, #[case] expected: Option<(f64, f64)>) {
        assert_eq!(parse_coordinate(raw), expected);
    }

    #[rstest]
    fn missing_required_coordinate_is_bad_request() {
        let params = Params::new();
        let err = require_coordinate(&params, "from").expect_err("missing param");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[rstest]
    fn optional_number_defaults_and_rejects() {
        let mut params = Params::new();
        assert_eq!(optional_number(&params, "seed", 42_u64).expect("default"), 42);

        params.insert("seed".to_owned(), "7".to_owned());
        assert_eq!(optional_number(&params, "seed", 42_u64).expect("parsed"), 7);

        params.insert("seed".to_owned(), "not_a_number".to_owned());
        let err = optional_number(&params, "seed", 42_u64).expect_err("malformed");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[rstest]
    fn route_options_defaults_include_path() {
        let params = Params::new();
        let (options, include_path) = route_options(&params).expect("defaults");
        assert!(include_path);
        assert!(options.max_speed_kmh.is_none());
    }

    #[rstest]
    fn route_options_honours_flags() {
        let mut params = Params::new();
        params.insert("include_path".to_owned(), "0".to_owned());
        params.insert("max_speed".to_owned(), "30".to_owned());
        let (options, include_path) = route_options(&params).expect("parsed");
        assert!(!include_path);
        assert_eq!(options.max_speed_kmh, Some(30.0));
    }

    #[rstest]
    fn non_positive_max_speed_is_ignored() {
        let mut params = Params::new();
        params.insert("max_speed".to_owned(), "0".to_owned());
        let (options, _) = route_options(&params).expect("parsed");
        assert!(options.max_speed_kmh.is_none());
    }
}
