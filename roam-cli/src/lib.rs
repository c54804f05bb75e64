//! Command-line interface for the roam toolkit.
#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use thiserror::Error;

use roam_osm::{connect_components, trim_and_extract, ConnectError, TrimError, TrimOptions};
use roam_places::{
    extract_places, CategoryConfigError, CategorySet, PlaceError, PlaceOptions, RegionIndex,
    RegionIndexError,
};
use roam_routing::{AddressStore, AddressStoreError, EngineError, RoutingEngine};
use roam_server::{ServerContext, ServerError};

/// Run the CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    env_logger::init();
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Trim(args) => run_trim(args),
        Command::Connect(args) => run_connect(args),
        Command::Places(args) => run_places(args),
        Command::Serve(args) => run_serve(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "roam",
    about = "OSM routing graph and place-extraction toolkit",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Trim an OSM extract to its routable graph and harvest addresses.
    Trim(TrimArgs),
    /// Bridge disconnected components of a trimmed graph.
    Connect(ConnectArgs),
    /// Extract categorised places into a sampled CSV.
    Places(PlacesArgs),
    /// Serve the routing and address API over HTTP.
    Serve(ServeArgs),
}

#[derive(Debug, Parser)]
struct TrimArgs {
    /// Input OSM PBF file.
    input: PathBuf,
    /// Output graph artefact; defaults to `<input>.ways.graph.bin`.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Directory for the addresses CSV; defaults next to the input.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Keep only endpoints and intersection nodes of each way.
    #[arg(long)]
    simplify: bool,
    /// Also keep any highway or ferry way the profile rejects.
    #[arg(long)]
    ignore_routability: bool,
}

#[derive(Debug, Parser)]
struct ConnectArgs {
    /// Input graph artefact produced by `trim`.
    input: PathBuf,
    /// Output artefact; defaults to `<input>.connected.graph.bin`.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Report per-component bridge statistics.
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[derive(Debug, Parser)]
struct PlacesArgs {
    /// Input OSM PBF file.
    input: PathBuf,
    /// YAML category configuration.
    #[arg(long)]
    config: PathBuf,
    /// GeoJSON FeatureCollection of NUTS regions.
    #[arg(long)]
    regions_geojson: PathBuf,
    /// Output CSV.gz; defaults to `<input>.places.csv.gz`.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Seed for reproducible sampling.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    /// Graph artefact to route over.
    input: PathBuf,
    /// Address CSV or CSV.gz to serve.
    #[arg(long)]
    addresses: Option<PathBuf>,
    /// Listen port.
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

/// Errors surfaced to the terminal; every variant exits with status 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// A referenced input path does not exist on disk.
    #[error("input path {path} does not exist")]
    MissingInput { path: PathBuf },
    #[error(transparent)]
    Trim(#[from] TrimError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Categories(#[from] CategoryConfigError),
    #[error(transparent)]
    Regions(#[from] RegionIndexError),
    #[error(transparent)]
    Places(#[from] PlaceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Addresses(#[from] AddressStoreError),
    #[error(transparent)]
    Server(#[from] ServerError),
    /// The async runtime could not start.
    #[error("failed to start async runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
}

fn require_existing(path: &Path) -> Result<(), CliError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::MissingInput {
            path: path.to_path_buf(),
        })
    }
}

/// Base name of an input with its `.osm`/`.pbf`/`.graph.bin` suffixes
/// stripped, used to derive sibling artefact names.
fn artefact_stem(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".osm.pbf", ".graph.bin", ".pbf", ".osm"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return stripped.to_owned();
        }
    }
    name
}

fn sibling(input: &Path, file_name: String) -> PathBuf {
    input.with_file_name(file_name)
}

fn run_trim(args: TrimArgs) -> Result<(), CliError> {
    require_existing(&args.input)?;
    let stem = artefact_stem(&args.input);
    let output = args
        .output
        .unwrap_or_else(|| sibling(&args.input, format!("{stem}.ways.graph.bin")));
    let csv_name = format!("{stem}.addresses.csv.gz");
    let csv_output = match args.output_dir {
        Some(dir) => dir.join(csv_name),
        None => sibling(&args.input, csv_name),
    };

    info!(
        "trimming {} -> {} (addresses {})",
        args.input.display(),
        output.display(),
        csv_output.display()
    );
    let summary = trim_and_extract(
        &args.input,
        &output,
        &csv_output,
        TrimOptions {
            simplify: args.simplify,
            ignore_routability: args.ignore_routability,
        },
    )?;
    println!(
        "Processed {} nodes, {} ways; wrote {} nodes, {} ways; {} addresses ({} nodes, {} ways, {} relations); dropped {} ways",
        summary.processed_nodes,
        summary.processed_ways,
        summary.written_nodes,
        summary.written_ways,
        summary.address_nodes + summary.address_ways + summary.address_relations,
        summary.address_nodes,
        summary.address_ways,
        summary.address_relations,
        summary.dropped_ways,
    );
    Ok(())
}

fn run_connect(args: ConnectArgs) -> Result<(), CliError> {
    require_existing(&args.input)?;
    let stem = artefact_stem(&args.input);
    let output = args
        .output
        .unwrap_or_else(|| sibling(&args.input, format!("{stem}.connected.graph.bin")));

    info!("connecting {} -> {}", args.input.display(), output.display());
    let summary = connect_components(&args.input, &output)?;
    println!(
        "Found {} components (primary {} nodes); wrote {} nodes, {} ways, {} synthetic bridges",
        summary.components,
        summary.primary_component_nodes,
        summary.written_nodes,
        summary.written_ways,
        summary.synthetic_ways,
    );
    if args.verbose && summary.synthetic_ways > 0 {
        println!(
            "Bridge distances: total={:.1} km, max={:.1} km, avg={:.1} km",
            summary.total_bridge_m / 1000.0,
            summary.max_bridge_m / 1000.0,
            summary.avg_bridge_m() / 1000.0,
        );
    }
    Ok(())
}

fn run_places(args: PlacesArgs) -> Result<(), CliError> {
    require_existing(&args.input)?;
    require_existing(&args.config)?;
    require_existing(&args.regions_geojson)?;

    let stem = artefact_stem(&args.input);
    let output = args
        .output
        .unwrap_or_else(|| sibling(&args.input, format!("{stem}.places.csv.gz")));

    let categories = CategorySet::from_yaml_file(&args.config)?;
    info!("loaded {} categories from {}", categories.len(), args.config.display());
    let regions = RegionIndex::from_geojson_file(&args.regions_geojson)?;
    info!(
        "loaded {} regions from {} ({} features skipped)",
        regions.len(),
        args.regions_geojson.display(),
        regions.skipped_features()
    );

    let summary = extract_places(
        &args.input,
        &categories,
        &regions,
        &output,
        PlaceOptions { seed: args.seed },
    )?;
    println!(
        "Matched {} nodes, {} ways, {} relations; wrote {} rows to {}",
        summary.matched_nodes,
        summary.matched_ways,
        summary.matched_relations,
        summary.written_rows,
        output.display(),
    );
    Ok(())
}

fn run_serve(args: ServeArgs) -> Result<(), CliError> {
    require_existing(&args.input)?;
    if let Some(path) = &args.addresses {
        require_existing(path)?;
    }

    let engine = RoutingEngine::from_snapshot_path(&args.input)?;
    info!(
        "routing engine initialised with {} nodes and {} arcs",
        engine.node_count(),
        engine.arc_count()
    );
    let addresses = match &args.addresses {
        Some(path) => Some(AddressStore::load_csv(path)?),
        None => None,
    };

    let context = Arc::new(ServerContext::new(engine, addresses));
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| CliError::Runtime { source })?;
    runtime.block_on(roam_server::run(addr, context))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("netherlands.osm.pbf", "netherlands")]
    #[case("netherlands.ways.graph.bin", "netherlands.ways")]
    #[case("area.pbf", "area")]
    #[case("area.osm", "area")]
    #[case("plain", "plain")]
    fn artefact_stems(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(artefact_stem(Path::new(name)), expected);
    }

    #[rstest]
    fn missing_input_is_reported() {
        let err = require_existing(Path::new("/nonexistent/file.osm.pbf")).expect_err("missing");
        assert!(matches!(err, CliError::MissingInput { .. }));
    }

    #[rstest]
    fn cli_parses_trim_flags() {
        let cli = Cli::try_parse_from([
            "roam",
            "trim",
            "area.osm.pbf",
            "--simplify",
            "--ignore-routability",
        ])
        .expect("valid args");
        match cli.command {
            Command::Trim(args) => {
                assert!(args.simplify);
                assert!(args.ignore_routability);
                assert_eq!(args.input, PathBuf::from("area.osm.pbf"));
            }
            other => panic!("expected trim, got {other:?}"),
        }
    }

    #[rstest]
    fn cli_parses_serve_defaults() {
        let cli = Cli::try_parse_from(["roam", "serve", "area.graph.bin"]).expect("valid args");
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.port, 8080);
                assert!(args.addresses.is_none());
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[rstest]
    fn cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["roam", "frobnicate"]).is_err());
    }
}
