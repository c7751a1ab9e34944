use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray, Float32Array, Float64Array, LargeListArray, ListArray};
use arrow::compute::{cast, cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use log::{info, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{ColumnData, MetadataValue, Table};
use crate::spectra::model::{SpectralBand, Spectra, TARGETID};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a catalog table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – scalar columns (integers, floats, strings, bools); list
///   columns are skipped
/// * `.json`    – `[{ "TARGETID": 1, "Z": 0.5, ... }, ...]` or the
///   `{ "header": {...}, "data": { "COL": [...] } }` layout written by
///   [`super::writer`]
/// * `.csv`     – header row; column types are inferred
pub fn load_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let table = match ext.as_str() {
        "parquet" | "pq" => read_parquet(path)?.0,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    info!("Loaded {} rows x {} columns from {}", table.len(), table.columns().len(), path.display());
    Ok(table)
}

/// Load per-exposure spectra from a Parquet file.
///
/// Expected schema, one row per (exposure, band):
/// - `TARGETID`: integer
/// - `BAND`: string
/// - `WAVE`, `FLUX`, `IVAR`: List<Float64> of equal length
/// - `RESOLUTION`: List<Float64>, the flattened `n_diag × n_wave` kernel
/// - any other scalar columns become fibermap columns
///
/// Every band must list the same targets in the same order.
pub fn load_exposures(path: &Path) -> Result<Spectra> {
    let (table, lists) = read_parquet(path)?;

    let bands = match table.column("BAND").map(|c| &c.data) {
        Some(ColumnData::String(v)) => v.clone(),
        _ => bail!("exposure file has no string BAND column"),
    };
    let targetids = table
        .int_column(TARGETID)
        .context("exposure file has no integer TARGETID column")?
        .to_vec();
    let list = |name: &str| {
        lists
            .get(name)
            .with_context(|| format!("exposure file has no {name} list column"))
    };
    let (wave, flux, ivar, resolution) = (list("WAVE")?, list("FLUX")?, list("IVAR")?, list("RESOLUTION")?);

    // band name -> row indices, bands in order of first appearance
    let mut band_order: Vec<String> = Vec::new();
    let mut band_rows: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row, band) in bands.iter().enumerate() {
        if !band_rows.contains_key(band) {
            band_order.push(band.clone());
        }
        band_rows.entry(band.clone()).or_default().push(row);
    }
    let Some(first_band) = band_order.first() else {
        bail!("exposure file {} has no rows", path.display());
    };

    let first_rows = &band_rows[first_band];
    let fibermap_ids: Vec<i64> = first_rows.iter().map(|&r| targetids[r]).collect();
    let mut fibermap = table.take(first_rows);
    fibermap.remove_column("BAND");
    let mut spectra = Spectra::new(fibermap)?;

    for name in &band_order {
        let rows = &band_rows[name];
        let ids: Vec<i64> = rows.iter().map(|&r| targetids[r]).collect();
        if ids != fibermap_ids {
            bail!("band {name} does not list the same exposures as band {first_band}");
        }

        let grid = &wave[rows[0]];
        if grid.is_empty() {
            bail!("band {name} has an empty wavelength grid");
        }
        let n_diag = resolution[rows[0]].len() / grid.len();
        let mut band = SpectralBand::new(grid.clone(), n_diag);
        for &row in rows {
            if wave[row] != *grid {
                bail!("row {row}: band {name} exposures do not share a wavelength grid");
            }
            band.push_exposure(&flux[row], &ivar[row], &resolution[row])
                .with_context(|| format!("row {row}, band {name}"))?;
        }
        spectra.add_band(name.clone(), band)?;
    }

    info!(
        "Loaded {} exposures of {} targets in bands {:?} from {}",
        spectra.len(),
        spectra.num_targets(),
        spectra.bands(),
        path.display()
    );
    Ok(spectra)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    match &root {
        JsonValue::Array(records) => json_records_to_table(records),
        JsonValue::Object(obj) => {
            let data = obj
                .get("data")
                .and_then(|d| d.as_object())
                .context("Expected a JSON array of records or an object with a \"data\" member")?;

            let mut table = Table::new();
            for (name, values) in data {
                let values = values
                    .as_array()
                    .with_context(|| format!("column {name} is not a JSON array"))?;
                table.add_column(name.clone(), infer_json_column(name, values)?)?;
            }
            if let Some(header) = obj.get("header").and_then(|h| h.as_object()) {
                for (key, val) in header {
                    table.meta.insert(key.clone(), json_to_metadata(val));
                }
            }
            Ok(table)
        }
        _ => bail!("Expected top-level JSON array or object"),
    }
}

fn json_records_to_table(records: &[JsonValue]) -> Result<Table> {
    let mut names: Vec<String> = Vec::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    let mut table = Table::new();
    for name in &names {
        let values: Vec<JsonValue> = records
            .iter()
            .map(|rec| rec.get(name).cloned().unwrap_or(JsonValue::Null))
            .collect();
        table.add_column(name.clone(), infer_json_column(name, &values)?)?;
    }
    Ok(table)
}

/// Integer if every value is an integer, float if every value is numeric
/// (nulls become NaN), otherwise strings.
fn infer_json_column(name: &str, values: &[JsonValue]) -> Result<ColumnData> {
    if values.iter().all(|v| v.as_i64().is_some()) {
        return Ok(ColumnData::Integer(values.iter().filter_map(|v| v.as_i64()).collect()));
    }
    if values.iter().all(|v| v.is_number() || v.is_null()) {
        return Ok(ColumnData::Float(
            values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect(),
        ));
    }
    if values.iter().any(|v| v.is_array() || v.is_object()) {
        bail!("column {name} holds nested JSON values");
    }
    Ok(ColumnData::String(
        values
            .iter()
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                JsonValue::Null => String::new(),
                other => other.to_string(),
            })
            .collect(),
    ))
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one target per row.
/// A column is integer if every cell parses as one, float if every cell is
/// numeric or empty, otherwise text.
fn load_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (col_idx, column) in cells.iter_mut().enumerate() {
            column.push(record.get(col_idx).unwrap_or("").trim().to_string());
        }
    }

    let mut table = Table::new();
    for (name, column) in headers.iter().zip(cells) {
        table.add_column(name.clone(), guess_column_type(column))?;
    }
    Ok(table)
}

fn guess_column_type(cells: Vec<String>) -> ColumnData {
    if let Ok(ints) = cells.iter().map(|s| s.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
        return ColumnData::Integer(ints);
    }
    let floats: Option<Vec<f64>> = cells
        .iter()
        .map(|s| if s.is_empty() { Some(f64::NAN) } else { s.parse().ok() })
        .collect();
    match floats {
        Some(values) => ColumnData::Float(values),
        None => ColumnData::String(cells),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Read every scalar column into a [`Table`] and every List<Float> column
/// into per-row vectors.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn read_parquet(path: &Path) -> Result<(Table, BTreeMap<String, Vec<Vec<f64>>>)> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut scalars: Vec<(String, ColumnData)> = Vec::new();
    let mut lists: BTreeMap<String, Vec<Vec<f64>>> = BTreeMap::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        for (col_idx, field) in schema.fields().iter().enumerate() {
            let name = field.name();
            let col = batch.column(col_idx);

            if matches!(col.data_type(), DataType::List(_) | DataType::LargeList(_)) {
                let rows = lists.entry(name.clone()).or_default();
                for row in 0..batch.num_rows() {
                    rows.push(
                        extract_f64_list(col, row)
                            .with_context(|| format!("Row {row}: failed to read '{name}'"))?,
                    );
                }
                continue;
            }

            let Some(chunk) = scalar_column(col).with_context(|| format!("column '{name}'"))? else {
                warn!("skipping column '{name}' of unsupported type {:?}", col.data_type());
                continue;
            };
            match scalars.iter().position(|(n, _)| n == name) {
                Some(i) => append_column(&mut scalars[i].1, chunk)
                    .with_context(|| format!("column '{name}' changes type between batches"))?,
                None => scalars.push((name.clone(), chunk)),
            }
        }
    }

    let mut table = Table::new();
    for (name, data) in scalars {
        table.add_column(name, data)?;
    }
    Ok((table, lists))
}

fn append_column(existing: &mut ColumnData, chunk: ColumnData) -> Result<()> {
    match (existing, chunk) {
        (ColumnData::Integer(a), ColumnData::Integer(b)) => a.extend(b),
        (ColumnData::Float(a), ColumnData::Float(b)) => a.extend(b),
        (ColumnData::String(a), ColumnData::String(b)) => a.extend(b),
        _ => bail!("mismatched column types"),
    }
    Ok(())
}

// -- Parquet / Arrow helpers --

/// Convert a scalar Arrow column to typed storage. Integers and booleans
/// become `i64`, floats `f64`, strings `String`; `None` for other types.
fn scalar_column(col: &Arc<dyn Array>) -> Result<Option<ColumnData>> {
    let data = match col.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Boolean => {
            if col.null_count() > 0 {
                bail!("null values in integer column");
            }
            // overflowing unsigned values error out instead of turning into nulls
            let options = CastOptions {
                safe: false,
                ..Default::default()
            };
            let ints = cast_with_options(col, &DataType::Int64, &options).context("casting to Int64")?;
            if ints.null_count() > 0 {
                bail!("integer values out of Int64 range");
            }
            ColumnData::Integer(ints.as_primitive::<Int64Type>().values().to_vec())
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let floats = cast(col, &DataType::Float64).context("casting to Float64")?;
            ColumnData::Float(
                floats
                    .as_primitive::<Float64Type>()
                    .iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect(),
            )
        }
        DataType::Utf8 | DataType::LargeUtf8 => {
            let strings = cast(col, &DataType::Utf8).context("casting to Utf8")?;
            ColumnData::String(
                strings
                    .as_string::<i32>()
                    .iter()
                    .map(|v| v.unwrap_or("").to_string())
                    .collect(),
            )
        }
        _ => return Ok(None),
    };
    Ok(Some(data))
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_types_are_inferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        std::fs::write(
            &path,
            "TARGETID,Z,SPECTYPE,note\n1,0.5,GALAXY,a\n2,,QSO,b\n3,1.25,STAR,\n",
        )
        .unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table.column_names(), vec!["TARGETID", "Z", "SPECTYPE", "note"]);
        assert_eq!(table.int_column("TARGETID").unwrap(), &[1, 2, 3]);
        let z = table.float_column("Z").unwrap();
        assert_eq!(z[0], 0.5);
        assert!(z[1].is_nan());
        assert!(!table.column("note").unwrap().filterable);
    }

    #[test]
    fn json_records_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.json");
        std::fs::write(
            &records,
            r#"[{"TARGETID": 5, "Z": 1, "SPECTYPE": "QSO"}, {"TARGETID": 6, "Z": 0.25, "SPECTYPE": "GALAXY"}]"#,
        )
        .unwrap();
        let table = load_table(&records).unwrap();
        assert_eq!(table.int_column("TARGETID").unwrap(), &[5, 6]);
        assert_eq!(table.float_column("Z").unwrap(), &[1.0, 0.25]);

        let columnar = dir.path().join("columns.json");
        std::fs::write(
            &columnar,
            r#"{"header": {"SPECPROD": "iron"}, "data": {"A": [1, 2, 3]}}"#,
        )
        .unwrap();
        let table = load_table(&columnar).unwrap();
        assert_eq!(table.int_column("A").unwrap(), &[1, 2, 3]);
        assert_eq!(table.meta["SPECPROD"], MetadataValue::String("iron".into()));
    }

    #[test]
    fn unsigned_overflow_is_an_error() {
        use arrow::array::{ArrayRef, UInt32Array, UInt64Array};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::ArrowWriter;

        let write = |path: &Path, column: ArrayRef| {
            let batch = RecordBatch::try_from_iter(vec![("TARGETID", column)]).unwrap();
            let file = std::fs::File::create(path).unwrap();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
            writer.write(&batch).unwrap();
            writer.close().unwrap();
        };
        let dir = tempfile::tempdir().unwrap();

        let too_big = dir.path().join("too_big.parquet");
        write(&too_big, Arc::new(UInt64Array::from(vec![1, u64::MAX])));
        let err = load_table(&too_big).unwrap_err();
        assert!(format!("{err:#}").contains("TARGETID"));

        let fits = dir.path().join("fits.parquet");
        write(&fits, Arc::new(UInt32Array::from(vec![7, u32::MAX])));
        let table = load_table(&fits).unwrap();
        assert_eq!(table.int_column("TARGETID").unwrap(), &[7, u32::MAX as i64]);
    }

    #[test]
    fn unknown_extension_fails() {
        assert!(load_table(Path::new("targets.fits")).is_err());
    }
}
