//! Table-backed implementations of the query collaborators.
//!
//! Each adapter wraps tables that were loaded up front (see
//! [`crate::data::loader`]) and answers lookups from memory.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{bail, Context, Result};

use crate::data::model::Table;
use crate::query::location::Location;
use crate::query::orchestrator::{Catalog, RedshiftCatalog, Selection, SpecGroup, SpectrumReader, TileIndex};
use crate::spectra::model::{Spectra, TARGETID};

pub const TARGET_RA: &str = "TARGET_RA";
pub const TARGET_DEC: &str = "TARGET_DEC";

/// Columns copied from the redshift catalog onto every target table.
pub const REDSHIFT_COLUMNS: [&str; 5] = [TARGET_RA, TARGET_DEC, "SPECTYPE", "Z", "ZWARN"];

// ---------------------------------------------------------------------------
// Angular separation
// ---------------------------------------------------------------------------

/// Great-circle distance between two sky positions, all in degrees
/// (Vincenty formula, stable at small and antipodal separations).
pub fn angular_separation_deg(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (sin_d1, cos_d1) = dec1.to_radians().sin_cos();
    let (sin_d2, cos_d2) = dec2.to_radians().sin_cos();
    let (sin_dra, cos_dra) = (ra2 - ra1).to_radians().sin_cos();

    let num = ((cos_d2 * sin_dra).powi(2) + (cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra).powi(2)).sqrt();
    let den = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;
    num.atan2(den).to_degrees()
}

// ---------------------------------------------------------------------------
// TableCatalog
// ---------------------------------------------------------------------------

/// Target inventory with one table per spectra group.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    groups: BTreeMap<SpecGroup, Table>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the inventory for `group`. It needs `TARGETID`, `TARGET_RA`
    /// and `TARGET_DEC` columns.
    pub fn with_group(mut self, group: SpecGroup, table: Table) -> Result<Self> {
        if table.int_column(TARGETID).is_none() {
            bail!("{group} inventory has no integer {TARGETID} column");
        }
        if table.float_column(TARGET_RA).is_none() || table.float_column(TARGET_DEC).is_none() {
            bail!("{group} inventory needs float {TARGET_RA} and {TARGET_DEC} columns");
        }
        self.groups.insert(group, table);
        Ok(self)
    }

    fn cone(table: &Table, location: &Location) -> Vec<usize> {
        let (Some(ra), Some(dec)) = (table.float_column(TARGET_RA), table.float_column(TARGET_DEC)) else {
            return Vec::new();
        };
        let radius_deg = location.radius_deg();
        ra.iter()
            .zip(dec)
            .enumerate()
            .filter(|(_, (r, d))| angular_separation_deg(location.ra(), location.dec(), **r, **d) <= radius_deg)
            .map(|(i, _)| i)
            .collect()
    }

    fn by_ids(table: &Table, targetids: &[i64]) -> Vec<usize> {
        let rows = table.int_column(TARGETID).unwrap_or(&[]);
        let mut index: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, id) in rows.iter().enumerate() {
            index.entry(*id).or_default().push(i);
        }
        targetids
            .iter()
            .filter_map(|id| index.get(id))
            .flatten()
            .copied()
            .collect()
    }
}

impl Catalog for TableCatalog {
    fn lookup(&self, selection: &Selection, group: SpecGroup, product: &str) -> Result<Table> {
        let table = self
            .groups
            .get(&group)
            .with_context(|| format!("no {group} inventory loaded for {product}"))?;

        let rows = match selection {
            Selection::Location(location) => Self::cone(table, location),
            Selection::TargetIds(ids) => Self::by_ids(table, ids),
        };
        Ok(table.take(&rows))
    }
}

// ---------------------------------------------------------------------------
// TableRedshiftCatalog
// ---------------------------------------------------------------------------

/// Redshift fits keyed by `TARGETID`.
#[derive(Debug, Clone)]
pub struct TableRedshiftCatalog {
    zcat: Table,
    index: HashMap<i64, usize>,
}

impl TableRedshiftCatalog {
    pub fn new(zcat: Table) -> Result<Self> {
        let ids = zcat
            .int_column(TARGETID)
            .with_context(|| format!("redshift catalog has no integer {TARGETID} column"))?;
        for name in REDSHIFT_COLUMNS {
            if !zcat.contains_column(name) {
                bail!("redshift catalog is missing column {name}");
            }
        }
        let index = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Ok(TableRedshiftCatalog { zcat, index })
    }
}

impl RedshiftCatalog for TableRedshiftCatalog {
    fn augment(&self, table: &Table, product: &str) -> Result<Table> {
        let ids = table
            .int_column(TARGETID)
            .with_context(|| format!("cannot add {product} redshifts without {TARGETID}"))?;

        let rows = ids
            .iter()
            .map(|id| {
                self.index
                    .get(id)
                    .copied()
                    .with_context(|| format!("TARGETID {id} not found in {product} redshift catalog"))
            })
            .collect::<Result<Vec<usize>>>()?;

        let mut out = table.clone();
        for name in REDSHIFT_COLUMNS {
            if let Some(column) = self.zcat.column(name) {
                out.add_column(name, column.data.take(&rows))?;
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// TableTileIndex
// ---------------------------------------------------------------------------

/// Fiber assignments from a table with `TILEID`, `LASTNIGHT`, `FIBER` and
/// `TARGETID` columns.
#[derive(Debug, Clone)]
pub struct TableTileIndex {
    fibermap: Table,
}

impl TableTileIndex {
    pub fn new(fibermap: Table) -> Result<Self> {
        for name in ["TILEID", "LASTNIGHT", "FIBER", TARGETID] {
            if fibermap.int_column(name).is_none() {
                bail!("tile fibermap needs an integer {name} column");
            }
        }
        Ok(TableTileIndex { fibermap })
    }

    fn ints(&self, name: &str) -> &[i64] {
        self.fibermap.int_column(name).unwrap_or(&[])
    }
}

impl TileIndex for TableTileIndex {
    fn last_night(&self, tileid: i64, _product: &str) -> Result<Option<i64>> {
        Ok(self
            .ints("TILEID")
            .iter()
            .zip(self.ints("LASTNIGHT"))
            .filter(|(t, _)| **t == tileid)
            .map(|(_, night)| *night)
            .max())
    }

    fn fiber_targets(&self, tileid: i64, night: i64, fibers: &[i64], _product: &str) -> Result<BTreeMap<i64, i64>> {
        let wanted: HashSet<i64> = fibers.iter().copied().collect();
        let tiles = self.ints("TILEID");
        let nights = self.ints("LASTNIGHT");
        let fiber_col = self.ints("FIBER");
        let targets = self.ints(TARGETID);

        Ok((0..self.fibermap.len())
            .filter(|&i| tiles[i] == tileid && nights[i] == night && wanted.contains(&fiber_col[i]))
            .map(|i| (fiber_col[i], targets[i]))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// ExposureReader
// ---------------------------------------------------------------------------

/// Serves exposures out of a preloaded [`Spectra`] set.
#[derive(Debug, Clone)]
pub struct ExposureReader {
    exposures: Spectra,
}

impl ExposureReader {
    pub fn new(exposures: Spectra) -> Self {
        ExposureReader { exposures }
    }
}

impl SpectrumReader for ExposureReader {
    fn read(&self, table: &Table, product: &str) -> Result<Spectra> {
        let ids = table
            .int_column(TARGETID)
            .with_context(|| format!("cannot read {product} spectra without {TARGETID}"))?;

        let mut seen = HashSet::new();
        let unique: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        Ok(self.exposures.select_targets(&unique))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InspectorConfig;
    use crate::data::model::ColumnData;

    fn inventory() -> Table {
        Table::new()
            .with_column(TARGETID, ColumnData::Integer(vec![1, 2, 3, 2]))
            .unwrap()
            .with_column(TARGET_RA, ColumnData::Float(vec![10.0, 10.001, 200.0, 10.001]))
            .unwrap()
            .with_column(TARGET_DEC, ColumnData::Float(vec![20.0, 20.0, -5.0, 20.0]))
            .unwrap()
    }

    #[test]
    fn separation() {
        assert!(angular_separation_deg(0.0, 0.0, 0.0, 0.0).abs() < 1e-12);
        assert!((angular_separation_deg(0.0, 0.0, 90.0, 0.0) - 90.0).abs() < 1e-10);
        assert!((angular_separation_deg(0.0, 90.0, 123.0, 0.0) - 90.0).abs() < 1e-10);
        assert!((angular_separation_deg(0.0, 0.0, 180.0, 0.0) - 180.0).abs() < 1e-10);
        // wraps across RA = 0
        assert!((angular_separation_deg(359.5, 0.0, 0.5, 0.0) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn cone_lookup() {
        let catalog = TableCatalog::new().with_group(SpecGroup::Healpix, inventory()).unwrap();
        let config = InspectorConfig::default();

        let small = Location::parse("10,20,1", &config).unwrap();
        let t = catalog.lookup(&Selection::Location(small), SpecGroup::Healpix, "iron").unwrap();
        assert_eq!(t.int_column(TARGETID).unwrap(), &[1]);

        let wide = Location::parse("10,20,10", &config).unwrap();
        let t = catalog.lookup(&Selection::Location(wide), SpecGroup::Healpix, "iron").unwrap();
        assert_eq!(t.int_column(TARGETID).unwrap(), &[1, 2, 2]);

        assert!(catalog.lookup(&Selection::Location(wide), SpecGroup::Tiles, "iron").is_err());
    }

    #[test]
    fn id_lookup_follows_request_order() {
        let catalog = TableCatalog::new().with_group(SpecGroup::Tiles, inventory()).unwrap();
        let t = catalog
            .lookup(&Selection::TargetIds(vec![3, 99, 2]), SpecGroup::Tiles, "iron")
            .unwrap();
        assert_eq!(t.int_column(TARGETID).unwrap(), &[3, 2, 2]);
    }

    #[test]
    fn augment_adds_redshift_columns() {
        let zcat = Table::new()
            .with_column(TARGETID, ColumnData::Integer(vec![2, 1]))
            .unwrap()
            .with_column(TARGET_RA, ColumnData::Float(vec![10.001, 10.0]))
            .unwrap()
            .with_column(TARGET_DEC, ColumnData::Float(vec![20.0, 20.0]))
            .unwrap()
            .with_column("SPECTYPE", ColumnData::String(vec!["QSO".into(), "GALAXY".into()]))
            .unwrap()
            .with_column("Z", ColumnData::Float(vec![2.1, 0.4]))
            .unwrap()
            .with_column("ZWARN", ColumnData::Integer(vec![0, 4]))
            .unwrap();
        let redshifts = TableRedshiftCatalog::new(zcat).unwrap();

        let targets = Table::new()
            .with_column(TARGETID, ColumnData::Integer(vec![1, 2, 1]))
            .unwrap();
        let t = redshifts.augment(&targets, "iron").unwrap();
        assert_eq!(t.float_column("Z").unwrap(), &[0.4, 2.1, 0.4]);
        assert_eq!(t.int_column("ZWARN").unwrap(), &[4, 0, 4]);
        assert_eq!(t.column_names(), vec![TARGETID, TARGET_RA, TARGET_DEC, "SPECTYPE", "Z", "ZWARN"]);

        let unknown = Table::new().with_column(TARGETID, ColumnData::Integer(vec![5])).unwrap();
        assert!(redshifts.augment(&unknown, "iron").is_err());
    }

    #[test]
    fn tile_index() {
        let fibermap = Table::new()
            .with_column("TILEID", ColumnData::Integer(vec![80605, 80605, 80605, 80605, 1000]))
            .unwrap()
            .with_column("LASTNIGHT", ColumnData::Integer(vec![20210101, 20210101, 20210205, 20210205, 20200101]))
            .unwrap()
            .with_column("FIBER", ColumnData::Integer(vec![0, 1, 0, 1, 0]))
            .unwrap()
            .with_column(TARGETID, ColumnData::Integer(vec![10, 11, 20, 21, 30]))
            .unwrap();
        let index = TableTileIndex::new(fibermap).unwrap();

        assert_eq!(index.last_night(80605, "iron").unwrap(), Some(20210205));
        assert_eq!(index.last_night(1, "iron").unwrap(), None);

        let map = index.fiber_targets(80605, 20210205, &[1], "iron").unwrap();
        assert_eq!(map, BTreeMap::from([(1, 21)]));
    }
}
