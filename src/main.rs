use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use spectral_inspector::catalog::{ExposureReader, TableCatalog, TableRedshiftCatalog, TableTileIndex};
use spectral_inspector::data::filter::FilterArgs;
use spectral_inspector::data::loader::{load_exposures, load_table};
use spectral_inspector::data::writer::{check_table_size, describe_targets, write_spectra, write_table, OutputFormat};
use spectral_inspector::spectra::coadd::coadd_targets;
use spectral_inspector::{InspectorConfig, QueryOrchestrator, Selection, SpecGroup, Spectra};

#[derive(Parser)]
#[command(name = "inspector")]
#[command(about = "Find spectroscopic targets and read their spectra")]
struct Cli {
    /// JSON file overriding the default limits and product aliases
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the targets matching a query
    Targets {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Read the spectra of the targets matching a query
    Spectra {
        #[command(flatten)]
        query: QueryArgs,
        /// Combine the exposures of each target
        #[arg(long)]
        coadd: bool,
        /// Refuse queries matching more spectra than this
        #[arg(long)]
        max_spectra: Option<usize>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Production name or alias (edr, dr1, dr2)
    product: String,

    /// Spectra grouping: healpix or tiles
    #[arg(long, default_value = "healpix")]
    group: String,
    /// Cone search "RA,DEC[,RADIUS]" in degrees, degrees, arcsec
    #[arg(long, allow_hyphen_values = true)]
    radec: Option<String>,
    /// Target ids, e.g. "39627908959964170,100-105"
    #[arg(long)]
    targetids: Option<String>,
    /// Tile id; use with --fibers
    #[arg(long, requires = "fibers", conflicts_with_all = ["radec", "targetids"])]
    tile: Option<i64>,
    /// Fibers on --tile, e.g. "0-9,20:30"
    #[arg(long, requires = "tile")]
    fibers: Option<String>,
    /// Column filter COLUMN=[op:]VALUE; repeat for several
    #[arg(long = "filter", value_name = "COLUMN=TOKEN")]
    filters: Vec<String>,

    /// Target inventory for the healpix group
    #[arg(long)]
    healpix_inventory: Option<PathBuf>,
    /// Target inventory for the tiles group
    #[arg(long)]
    tiles_inventory: Option<PathBuf>,
    /// Redshift catalog
    #[arg(long)]
    zcat: PathBuf,
    /// Per-exposure spectra (Parquet)
    #[arg(long)]
    exposures: Option<PathBuf>,
    /// Tile fibermap with TILEID, LASTNIGHT, FIBER and TARGETID
    #[arg(long)]
    fibermap: Option<PathBuf>,

    /// Output format: json, csv or ascii (spectra: json)
    #[arg(long, default_value = "json")]
    format: String,
    /// Write here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => InspectorConfig::from_file(path)?,
        None => InspectorConfig::default(),
    };

    match cli.command {
        Commands::Targets { query } => run_targets(&query, config),
        Commands::Spectra {
            query,
            coadd,
            max_spectra,
        } => run_spectra(&query, config, coadd, max_spectra),
    }
}

fn run_targets(query: &QueryArgs, config: InspectorConfig) -> Result<()> {
    let format = OutputFormat::for_table(&query.format)?;
    let filters = parse_filters(&query.filters)?;
    let orchestrator = build_orchestrator(query, config, Spectra::default())?;

    let table = match (query.tile, query.fibers.as_deref()) {
        (Some(tile), Some(fibers)) => orchestrator.load_tile_targets(&query.product, tile, fibers, &filters)?,
        _ => {
            let selection = selection(query, orchestrator.config())?;
            let group: SpecGroup = query.group.parse()?;
            orchestrator.load_targets(&query.product, group, &selection, &filters)?
        }
    };

    info!("{}", describe_targets(&table));
    check_table_size(&table, orchestrator.config().max_table_rows)?;
    write_table(&table, format, open_output(query.output.as_deref())?)
}

fn run_spectra(query: &QueryArgs, config: InspectorConfig, coadd: bool, max_spectra: Option<usize>) -> Result<()> {
    OutputFormat::for_spectra(&query.format)?;
    let filters = parse_filters(&query.filters)?;
    let exposures = match &query.exposures {
        Some(path) => load_exposures(path)?,
        None => bail!("reading spectra needs --exposures"),
    };
    let orchestrator = build_orchestrator(query, config, exposures)?;

    let (spectra, description) = match (query.tile, query.fibers.as_deref()) {
        (Some(tile), Some(fibers)) => {
            let spectra = orchestrator.load_tile_spectra(&query.product, tile, fibers, &filters, max_spectra)?;
            let spectra = match spectra {
                Some(s) if coadd => Some(coadd_targets(&s, None)?),
                other => other,
            };
            (spectra, format!("on tile {tile} fibers {fibers}"))
        }
        _ => {
            let selection = selection(query, orchestrator.config())?;
            let group: SpecGroup = query.group.parse()?;
            let spectra = if coadd {
                orchestrator.load_coadded_spectra(&query.product, group, &selection, &filters, max_spectra)?
            } else {
                orchestrator.load_spectra(&query.product, group, &selection, &filters, max_spectra)?
            };
            (spectra, selection.to_string())
        }
    };

    let Some(spectra) = spectra else {
        let message = no_targets_message(&description);
        warn!("{message}");
        bail!(message);
    };
    info!(
        "{} spectra of {} targets in bands {:?}",
        spectra.len(),
        spectra.num_targets(),
        spectra.bands()
    );
    write_spectra(&spectra, open_output(query.output.as_deref())?)
}

fn selection(query: &QueryArgs, config: &InspectorConfig) -> Result<Selection> {
    Ok(Selection::from_args(
        query.radec.as_deref(),
        query.targetids.as_deref(),
        config,
    )?)
}

fn build_orchestrator(query: &QueryArgs, config: InspectorConfig, exposures: Spectra) -> Result<QueryOrchestrator> {
    let mut catalog = TableCatalog::new();
    if let Some(path) = &query.healpix_inventory {
        catalog = catalog.with_group(SpecGroup::Healpix, load_table(path)?)?;
    }
    if let Some(path) = &query.tiles_inventory {
        catalog = catalog.with_group(SpecGroup::Tiles, load_table(path)?)?;
    }
    let redshifts = TableRedshiftCatalog::new(load_table(&query.zcat)?)
        .with_context(|| format!("loading {}", query.zcat.display()))?;

    let mut orchestrator = QueryOrchestrator::new(
        config,
        Box::new(catalog),
        Box::new(redshifts),
        Box::new(ExposureReader::new(exposures)),
    );
    if let Some(path) = &query.fibermap {
        orchestrator = orchestrator.with_tile_index(Box::new(TableTileIndex::new(load_table(path)?)?));
    }
    Ok(orchestrator)
}

fn no_targets_message(description: &str) -> String {
    format!("No targets found {description}")
}

/// Group `COLUMN=TOKEN` arguments by column, keeping repeats in order.
fn parse_filters(raw: &[String]) -> Result<FilterArgs> {
    let mut filters = FilterArgs::new();
    for arg in raw {
        let Some((column, token)) = arg.split_once('=') else {
            bail!("filter '{arg}' is not of the form COLUMN=TOKEN");
        };
        filters.entry(column.to_string()).or_default().push(token.to_string());
    }
    Ok(filters)
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}
