use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::{debug, info};

use super::location::Location;
use super::range::{parse_fibers, parse_target_ids};
use crate::config::InspectorConfig;
use crate::data::filter::{filter_table, FilterArgs};
use crate::data::model::{ColumnData, MetadataValue, Table};
use crate::error::{InspectorError, Result};
use crate::spectra::coadd::coadd_targets;
use crate::spectra::model::{Spectra, TARGETID};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// How spectra are grouped in a production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpecGroup {
    /// Grouped by sky position.
    Healpix,
    /// Grouped by telescope pointing.
    Tiles,
}

impl FromStr for SpecGroup {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "healpix" => Ok(SpecGroup::Healpix),
            "tiles" => Ok(SpecGroup::Tiles),
            other => Err(InspectorError::validation(format!(
                "Unknown spectra group '{other}'; expected healpix or tiles"
            ))),
        }
    }
}

impl fmt::Display for SpecGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecGroup::Healpix => f.write_str("healpix"),
            SpecGroup::Tiles => f.write_str("tiles"),
        }
    }
}

/// What to look up: a cone on the sky or an explicit list of targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Location(Location),
    TargetIds(Vec<i64>),
}

impl Selection {
    /// Build a selection from raw request text. Exactly one of `radec` and
    /// `targetids` must be given.
    pub fn from_args(
        radec: Option<&str>,
        targetids: Option<&str>,
        config: &InspectorConfig,
    ) -> Result<Self> {
        match (radec, targetids) {
            (Some(radec), None) => Ok(Selection::Location(Location::parse(radec, config)?)),
            (None, Some(ids)) => Ok(Selection::TargetIds(parse_target_ids(ids)?)),
            (Some(_), Some(_)) => Err(InspectorError::validation(
                "specify radec or targetids, not both",
            )),
            (None, None) => Err(InspectorError::validation("must specify radec or targetids")),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Location(loc) => write!(f, "within {loc}"),
            Selection::TargetIds(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "with TARGETIDs={}", ids.join(","))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// Maps a selection to catalog rows (at least `TARGETID` and position).
pub trait Catalog: Send + Sync {
    fn lookup(&self, selection: &Selection, group: SpecGroup, product: &str) -> anyhow::Result<Table>;
}

/// Adds redshift-fit columns to a target table, keyed by `TARGETID`.
pub trait RedshiftCatalog: Send + Sync {
    fn augment(&self, table: &Table, product: &str) -> anyhow::Result<Table>;
}

/// Reads the exposures of every row in a target table.
pub trait SpectrumReader: Send + Sync {
    fn read(&self, table: &Table, product: &str) -> anyhow::Result<Spectra>;
}

/// Fiber assignments of tiles.
pub trait TileIndex: Send + Sync {
    /// Most recent night with data for `tileid`, or `None` for an unknown tile.
    fn last_night(&self, tileid: i64, product: &str) -> anyhow::Result<Option<i64>>;

    /// `FIBER → TARGETID` for the requested fibers on that night.
    fn fiber_targets(
        &self,
        tileid: i64,
        night: i64,
        fibers: &[i64],
        product: &str,
    ) -> anyhow::Result<BTreeMap<i64, i64>>;
}

// ---------------------------------------------------------------------------
// QueryOrchestrator
// ---------------------------------------------------------------------------

/// Runs target and spectra queries against the external collaborators.
pub struct QueryOrchestrator {
    config: InspectorConfig,
    catalog: Box<dyn Catalog>,
    redshifts: Box<dyn RedshiftCatalog>,
    reader: Box<dyn SpectrumReader>,
    tiles: Option<Box<dyn TileIndex>>,
}

impl QueryOrchestrator {
    pub fn new(
        config: InspectorConfig,
        catalog: Box<dyn Catalog>,
        redshifts: Box<dyn RedshiftCatalog>,
        reader: Box<dyn SpectrumReader>,
    ) -> Self {
        QueryOrchestrator {
            config,
            catalog,
            redshifts,
            reader,
            tiles: None,
        }
    }

    /// Enable tile + fiber queries.
    pub fn with_tile_index(mut self, tiles: Box<dyn TileIndex>) -> Self {
        self.tiles = Some(tiles);
        self
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Look up, augment and filter the targets of `selection`.
    pub fn load_targets(
        &self,
        product: &str,
        group: SpecGroup,
        selection: &Selection,
        filters: &FilterArgs,
    ) -> Result<Table> {
        let product = self.config.standardize_product(product);

        let mut table = self.catalog.lookup(selection, group, &product)?;
        debug!("{group} lookup of targets {selection} returned {} rows", table.len());

        table.meta.insert("SPECPROD".into(), MetadataValue::String(product.clone()));
        if let Selection::Location(loc) = selection {
            table.meta.insert("RA".into(), MetadataValue::Float(loc.ra()));
            table.meta.insert("DEC".into(), MetadataValue::Float(loc.dec()));
            table.meta.insert("RADIUS".into(), MetadataValue::Float(loc.radius()));
        }

        self.augment_and_filter(table, &product, filters)
    }

    /// Read the exposures of the targets matching the query.
    ///
    /// Returns `Ok(None)` when nothing matches. More than `max_spectra`
    /// (default: the configured cap) matches is [`InspectorError::LimitExceeded`].
    pub fn load_spectra(
        &self,
        product: &str,
        group: SpecGroup,
        selection: &Selection,
        filters: &FilterArgs,
        max_spectra: Option<usize>,
    ) -> Result<Option<Spectra>> {
        let product = self.config.standardize_product(product);
        let targets = self.load_targets(&product, group, selection, filters)?;
        self.read_spectra(&targets, &product, max_spectra)
    }

    /// [`QueryOrchestrator::load_spectra`] followed by per-target coaddition,
    /// one output row per target in table order.
    pub fn load_coadded_spectra(
        &self,
        product: &str,
        group: SpecGroup,
        selection: &Selection,
        filters: &FilterArgs,
        max_spectra: Option<usize>,
    ) -> Result<Option<Spectra>> {
        let Some(spectra) = self.load_spectra(product, group, selection, filters, max_spectra)? else {
            return Ok(None);
        };
        coadd_targets(&spectra, None).map(Some)
    }

    /// Targets on the given fibers of a tile, in fiber order.
    pub fn load_tile_targets(
        &self,
        product: &str,
        tileid: i64,
        fibers: &str,
        filters: &FilterArgs,
    ) -> Result<Table> {
        let product = self.config.standardize_product(product);
        let fibers = parse_fibers(fibers, self.config.max_fiber)?;
        let table = self.tile_table(&product, tileid, &fibers)?;
        self.augment_and_filter(table, &product, filters)
    }

    /// Exposures on the given fibers of a tile. The spectra cap is checked
    /// against the number of requested fibers before anything is read.
    pub fn load_tile_spectra(
        &self,
        product: &str,
        tileid: i64,
        fibers: &str,
        filters: &FilterArgs,
        max_spectra: Option<usize>,
    ) -> Result<Option<Spectra>> {
        let product = self.config.standardize_product(product);
        let max = max_spectra.unwrap_or(self.config.max_spectra);
        let fibers = parse_fibers(fibers, self.config.max_fiber)?;
        if fibers.len() > max {
            return Err(InspectorError::LimitExceeded {
                actual: fibers.len(),
                max,
            });
        }
        let table = self.tile_table(&product, tileid, &fibers)?;
        let targets = self.augment_and_filter(table, &product, filters)?;
        self.read_spectra(&targets, &product, Some(max))
    }

    fn augment_and_filter(&self, table: Table, product: &str, filters: &FilterArgs) -> Result<Table> {
        let augmented = self.redshifts.augment(&table, product)?;
        let filtered = filter_table(&augmented, filters)?;
        debug!("filters kept {} of {} rows", filtered.len(), augmented.len());
        Ok(filtered)
    }

    fn read_spectra(&self, targets: &Table, product: &str, max_spectra: Option<usize>) -> Result<Option<Spectra>> {
        let max = max_spectra.unwrap_or(self.config.max_spectra);
        let num_spectra = targets.len();
        if num_spectra == 0 {
            return Ok(None);
        }
        if num_spectra > max {
            return Err(InspectorError::LimitExceeded {
                actual: num_spectra,
                max,
            });
        }

        info!("Reading {num_spectra} spectra");
        let mut spectra = self.reader.read(targets, product)?;
        spectra.meta.insert("SPECPROD".into(), product.to_string());
        Ok(Some(spectra))
    }

    fn tile_table(&self, product: &str, tileid: i64, fibers: &[i64]) -> Result<Table> {
        let tiles = self
            .tiles
            .as_ref()
            .ok_or_else(|| InspectorError::not_found("tile queries are not configured"))?;

        let night = tiles
            .last_night(tileid, product)?
            .ok_or_else(|| InspectorError::not_found(format!("Tile {tileid} not found in {product} production")))?;

        let fiber_to_target = tiles.fiber_targets(tileid, night, fibers, product)?;
        let targetids = fibers
            .iter()
            .map(|fiber| {
                fiber_to_target.get(fiber).copied().ok_or_else(|| {
                    InspectorError::not_found(format!("Fiber {fiber} not found on tile {tileid}"))
                })
            })
            .collect::<Result<Vec<i64>>>()?;

        let n = fibers.len();
        let mut table = Table::new()
            .with_column(TARGETID, ColumnData::Integer(targetids))?
            .with_column("TILEID", ColumnData::Integer(vec![tileid; n]))?
            .with_column("LASTNIGHT", ColumnData::Integer(vec![night; n]))?
            .with_column("FIBER", ColumnData::Integer(fibers.to_vec()))?;
        table.meta.insert("SPECPROD".into(), MetadataValue::String(product.to_string()));
        Ok(table)
    }
}
