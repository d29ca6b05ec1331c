//! `eventcog` -- crop satellite bands to disaster events.
//!
//! # Environment variables
//!
//! | Variable                     | Required | Default                                          |
//! |------------------------------|----------|--------------------------------------------------|
//! | `AWS_ACCESS_KEY_ID`          | for S3   | --                                               |
//! | `AWS_SECRET_ACCESS_KEY`      | for S3   | --                                               |
//! | `AWS_S3_ENDPOINT`            | no       | `eodata.dataspace.copernicus.eu`                 |
//! | `AWS_REGION`                 | no       | `default`                                        |
//! | `STAC_API_URL`               | no       | `https://catalogue.dataspace.copernicus.eu/stac` |
//! | `EVENTCOG_HTTP_TIMEOUT_SECS` | no       | `60`                                             |
//! | `EVENTCOG_WARP_CRS`          | no       | `32651`                                          |

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventcog::{
    load_events, write_summary, BatchOptions, BatchRunner, BoundingBox, Catalog, ProtocolChoice,
    RemoteRasterOpener, SearchRequest, Settings, StacClient, DEFAULT_BBOX,
};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Protocol {
    /// Reprojecting for Sentinel-1 collections, direct otherwise
    Auto,
    Direct,
    Reprojecting,
}

impl From<Protocol> for ProtocolChoice {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Auto => Self::Auto,
            Protocol::Direct => Self::Direct,
            Protocol::Reprojecting => Self::Reprojecting,
        }
    }
}

/// `west,south,east,north` in WGS84 degrees
fn parse_bbox(text: &str) -> Result<BoundingBox, String> {
    let values: Vec<f64> = text
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("bbox parse error: {e}")))
        .collect::<Result<_, _>>()?;
    let [west, south, east, north] = values.as_slice() else {
        return Err("Expected 'west,south,east,north'".into());
    };
    let bbox = BoundingBox::new(*west, *south, *east, *north);
    if bbox.is_valid() {
        Ok(bbox)
    } else {
        Err(format!("bbox {bbox} has no area"))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process an events file and write the summary table
    Run {
        /// Events as a JSON array or CSV (`id,start_date,end_date,pre_event_days,post_event_days,bbox`)
        #[arg(long)]
        events: PathBuf,

        #[arg(long, default_value = "sentinel-2-l2a")]
        collection: String,

        /// Band (asset) keys to extract
        #[arg(long, value_delimiter = ',', default_value = "B04_10m,TCI_10m")]
        bands: Vec<String>,

        /// Root of the per-event output directories
        #[arg(long, default_value = "data")]
        base_dir: PathBuf,

        #[arg(long, default_value = "results.csv")]
        summary: PathBuf,

        #[arg(long, value_enum, default_value_t = Protocol::Auto)]
        protocol: Protocol,

        /// Destination EPSG code for the reprojecting protocol [default: EVENTCOG_WARP_CRS]
        #[arg(long)]
        warp_crs: Option<i32>,
    },

    /// Search the catalog and list matching items
    Search {
        #[arg(long, value_parser = parse_bbox)]
        bbox: Option<BoundingBox>,

        /// `YYYY-MM-DD/YYYY-MM-DD`
        #[arg(long)]
        datetime: String,

        #[arg(long, default_value = "sentinel-2-l2a")]
        collection: String,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Crop satellite imagery bands to disaster-event bounding boxes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventcog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("Invalid configuration")?;
    settings.log_redacted();

    let catalog = StacClient::new(&settings.stac_api_url, settings.http_timeout)
        .context("Failed to create catalog client")?;

    match cli.command {
        Command::Run {
            events,
            collection,
            bands,
            base_dir,
            summary,
            protocol,
            warp_crs,
        } => {
            let events = load_events(&events)
                .with_context(|| format!("Failed to load events from {}", events.display()))?;
            tracing::info!(count = events.len(), "Loaded events");

            let options = BatchOptions {
                collection,
                bands,
                base_dir,
                protocol: protocol.into(),
                warp_crs: warp_crs.unwrap_or(settings.warp_crs),
                default_bbox: DEFAULT_BBOX,
            };
            let runner = BatchRunner::new(catalog, RemoteRasterOpener::from_settings(&settings), options);
            let rows = runner.run(&events);

            write_summary(&summary, &rows)
                .with_context(|| format!("Failed to write summary to {}", summary.display()))?;
        }
        Command::Search {
            bbox,
            datetime,
            collection,
        } => {
            let request = SearchRequest {
                collections: vec![collection],
                bbox: bbox.unwrap_or(DEFAULT_BBOX),
                datetime,
            };
            let items = catalog.search(&request).context("Catalog search failed")?;
            for item in &items {
                let when = item
                    .datetime()
                    .map_or_else(|| "-".to_string(), |dt| dt.to_rfc3339());
                let cloud = item
                    .cloud_cover()
                    .map_or_else(|| "-".to_string(), |c| format!("{c:.1}"));
                println!("{}\t{when}\t{cloud}", item.id);
            }
            println!("{} items", items.len());
        }
    }

    Ok(())
}
