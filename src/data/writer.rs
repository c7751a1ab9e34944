use std::fmt;
use std::io::Write;

use anyhow::{Context, Result};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::model::{ColumnData, MetadataValue, Table};
use crate::error::InspectorError;
use crate::spectra::model::Spectra;

const TABLE_FORMATS: &[OutputFormat] = &[OutputFormat::Json, OutputFormat::Csv, OutputFormat::Ascii];
const SPECTRA_FORMATS: &[OutputFormat] = &[OutputFormat::Json];

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `{"header": {...}, "data": {"COL": [...]}}`
    Json,
    Csv,
    /// Whitespace-separated columns with a header line.
    Ascii,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Ascii => "ascii",
        })
    }
}

impl OutputFormat {
    /// Parse a table output format (case-insensitive).
    pub fn for_table(name: &str) -> crate::error::Result<Self> {
        Self::parse(name, TABLE_FORMATS)
    }

    /// Parse a spectra output format (case-insensitive).
    pub fn for_spectra(name: &str) -> crate::error::Result<Self> {
        Self::parse(name, SPECTRA_FORMATS)
    }

    fn parse(name: &str, valid: &[OutputFormat]) -> crate::error::Result<Self> {
        let lower = name.to_lowercase();
        valid
            .iter()
            .copied()
            .find(|f| f.to_string() == lower)
            .ok_or_else(|| {
                let names: Vec<String> = valid.iter().map(|f| f.to_string()).collect();
                InspectorError::validation(format!(
                    "Unsupported table format='{lower}'; supported formats are {}",
                    names.join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Reject tables too long to render.
pub fn check_table_size(table: &Table, max_rows: usize) -> crate::error::Result<()> {
    let n = table.len();
    if n > max_rows {
        return Err(InspectorError::validation(format!(
            "Your query resulted in {n} targets, which is too many for us to realistically display. \
             Please limit your query to return less than {max_rows} targets."
        )));
    }
    Ok(())
}

/// One-line summary such as `3 targets within 30 arcsec of RA,dec=(210,5)`.
pub fn describe_targets(table: &Table) -> String {
    let n = table.len();
    let meta = |key: &str| table.meta.get(key).and_then(MetadataValue::as_f64);
    match (meta("RA"), meta("DEC"), meta("RADIUS")) {
        (Some(ra), Some(dec), Some(radius)) => format!(
            "{n} targets within {} arcsec of RA,dec=({},{})",
            trim_decimals(radius, 1),
            trim_decimals(ra, 4),
            trim_decimals(dec, 4)
        ),
        _ => format!("{n} targets"),
    }
}

/// Fixed-point text with trailing zeros (and a bare point) removed.
fn trim_decimals(value: f64, decimals: usize) -> String {
    let text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

pub fn write_table<W: Write>(table: &Table, format: OutputFormat, out: W) -> Result<()> {
    match format {
        OutputFormat::Json => write_table_json(table, out),
        OutputFormat::Csv => write_delimited(table, b',', out),
        OutputFormat::Ascii => write_delimited(table, b' ', out),
    }
}

fn write_table_json<W: Write>(table: &Table, mut out: W) -> Result<()> {
    serde_json::to_writer(&mut out, &TableJson(table)).context("writing table JSON")?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn write_delimited<W: Write>(table: &Table, delimiter: u8, out: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(delimiter).from_writer(out);
    writer.write_record(table.column_names())?;
    for row in 0..table.len() {
        writer.write_record(table.columns().iter().map(|c| cell_text(&c.data, row)))?;
    }
    writer.flush().context("flushing table output")?;
    Ok(())
}

fn cell_text(data: &ColumnData, row: usize) -> String {
    match data {
        ColumnData::Integer(v) => v[row].to_string(),
        ColumnData::Float(v) => v[row].to_string(),
        ColumnData::String(v) => v[row].clone(),
    }
}

/// Serializes as `{"header": meta, "data": {col: values}}`, columns in table order.
struct TableJson<'a>(&'a Table);

struct ColumnsJson<'a>(&'a Table);

impl Serialize for TableJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("header", &self.0.meta)?;
        map.serialize_entry("data", &ColumnsJson(self.0))?;
        map.end()
    }
}

impl Serialize for ColumnsJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let columns = self.0.columns();
        let mut map = serializer.serialize_map(Some(columns.len()))?;
        for column in columns {
            match &column.data {
                ColumnData::Integer(v) => map.serialize_entry(&column.name, v)?,
                ColumnData::Float(v) => map.serialize_entry(&column.name, v)?,
                ColumnData::String(v) => map.serialize_entry(&column.name, v)?,
            }
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Spectra
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SpectraJson<'a> {
    meta: &'a std::collections::BTreeMap<String, String>,
    fibermap: TableJson<'a>,
    bands: Vec<BandJson<'a>>,
}

#[derive(Serialize)]
struct BandJson<'a> {
    name: &'a str,
    wave: &'a [f64],
    n_diag: usize,
    flux: Vec<&'a [f64]>,
    ivar: Vec<&'a [f64]>,
    resolution: Vec<&'a [f64]>,
}

/// Write spectra as one JSON document: metadata, fibermap table, then one
/// entry per band with per-row `flux`, `ivar` and flattened `resolution`.
pub fn write_spectra<W: Write>(spectra: &Spectra, mut out: W) -> Result<()> {
    let bands = spectra
        .bands()
        .iter()
        .filter_map(|name| spectra.band(name).map(|band| (name, band)))
        .map(|(name, band)| {
            let rows = 0..band.num_exposures();
            BandJson {
                name,
                wave: band.wave(),
                n_diag: band.num_diag(),
                flux: rows.clone().map(|i| band.flux(i)).collect(),
                ivar: rows.clone().map(|i| band.ivar(i)).collect(),
                resolution: rows.map(|i| band.resolution(i)).collect(),
            }
        })
        .collect();

    let doc = SpectraJson {
        meta: &spectra.meta,
        fibermap: TableJson(spectra.fibermap()),
        bands,
    };
    serde_json::to_writer(&mut out, &doc).context("writing spectra JSON")?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
