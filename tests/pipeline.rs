use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use spectral_inspector::catalog::{ExposureReader, TableCatalog, TableRedshiftCatalog, TableTileIndex};
use spectral_inspector::data::filter::FilterArgs;
use spectral_inspector::data::loader::{load_exposures, load_table};
use spectral_inspector::data::writer::{write_table, OutputFormat};
use spectral_inspector::{
    ColumnData, InspectorConfig, InspectorError, MetadataValue, QueryOrchestrator, Selection, SpecGroup, Table,
};

const IDS: [i64; 4] = [101, 102, 103, 104];
const WAVE: [f64; 3] = [4000.0, 4001.0, 4002.0];

fn list_array(rows: &[Vec<f64>]) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Target 101 has two exposures, the others one. Two bands, `b` and `r`.
fn write_exposures(path: &Path) {
    let exposures: [(i64, f64, f64); 5] = [
        (101, 1.0, 1.0),
        (102, 5.0, 1.0),
        (101, 3.0, 3.0),
        (103, 7.0, 1.0),
        (104, 9.0, 1.0),
    ];
    let mut ids = Vec::new();
    let mut bands = Vec::new();
    let mut expids = Vec::new();
    let mut waves = Vec::new();
    let mut fluxes = Vec::new();
    let mut ivars = Vec::new();
    let mut resolutions = Vec::new();
    for (band, offset) in [("b", 0.0), ("r", 1000.0)] {
        for (i, &(id, flux, ivar)) in exposures.iter().enumerate() {
            ids.push(id);
            bands.push(band);
            expids.push(i as i64);
            waves.push(WAVE.iter().map(|w| w + offset).collect::<Vec<_>>());
            fluxes.push(vec![flux; 3]);
            ivars.push(vec![ivar; 3]);
            resolutions.push(vec![0.25, 0.25, 0.25, 0.5, 0.5, 0.5]);
        }
    }

    let batch = RecordBatch::try_from_iter(vec![
        ("TARGETID", Arc::new(Int64Array::from(ids)) as ArrayRef),
        ("BAND", Arc::new(StringArray::from(bands)) as ArrayRef),
        ("EXPID", Arc::new(Int64Array::from(expids)) as ArrayRef),
        ("WAVE", list_array(&waves)),
        ("FLUX", list_array(&fluxes)),
        ("IVAR", list_array(&ivars)),
        ("RESOLUTION", list_array(&resolutions)),
    ])
    .unwrap();
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn write_inventory(path: &Path) {
    let batch = RecordBatch::try_from_iter(vec![
        ("TARGETID", Arc::new(Int64Array::from(IDS.to_vec())) as ArrayRef),
        (
            "TARGET_RA",
            Arc::new(Float64Array::from(vec![210.0, 210.001, 210.002, 150.0])) as ArrayRef,
        ),
        ("TARGET_DEC", Arc::new(Float64Array::from(vec![5.0, 5.0, 5.001, -20.0])) as ArrayRef),
        ("SURVEY", Arc::new(StringArray::from(vec!["main", "sv3", "main", "main"])) as ArrayRef),
    ])
    .unwrap();
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn zcat() -> Table {
    Table::new()
        .with_column("TARGETID", ColumnData::Integer(IDS.to_vec()))
        .unwrap()
        .with_column("TARGET_RA", ColumnData::Float(vec![210.0, 210.001, 210.002, 150.0]))
        .unwrap()
        .with_column("TARGET_DEC", ColumnData::Float(vec![5.0, 5.0, 5.001, -20.0]))
        .unwrap()
        .with_column(
            "SPECTYPE",
            ColumnData::String(vec!["GALAXY".into(), "QSO".into(), "STAR".into(), "GALAXY".into()]),
        )
        .unwrap()
        .with_column("Z", ColumnData::Float(vec![0.3, 1.8, 0.0001, 0.5]))
        .unwrap()
        .with_column("ZWARN", ColumnData::Integer(vec![0, 0, 4, 0]))
        .unwrap()
}

fn tile_fibermap() -> Table {
    Table::new()
        .with_column("TILEID", ColumnData::Integer(vec![80605, 80605, 80605, 80605, 80605]))
        .unwrap()
        .with_column("LASTNIGHT", ColumnData::Integer(vec![20210501, 20210510, 20210510, 20210510, 20210510]))
        .unwrap()
        .with_column("FIBER", ColumnData::Integer(vec![0, 0, 1, 2, 3]))
        .unwrap()
        .with_column("TARGETID", ColumnData::Integer(vec![999, 101, 102, 103, 104]))
        .unwrap()
}

fn orchestrator(dir: &Path) -> QueryOrchestrator {
    let inventory_path = dir.join("targets.parquet");
    let exposures_path = dir.join("exposures.parquet");
    write_inventory(&inventory_path);
    write_exposures(&exposures_path);

    let catalog = TableCatalog::new()
        .with_group(SpecGroup::Healpix, load_table(&inventory_path).unwrap())
        .unwrap();
    let exposures = load_exposures(&exposures_path).unwrap();
    assert_eq!(exposures.bands(), &["b".to_string(), "r".to_string()]);
    assert_eq!(exposures.len(), 5);

    QueryOrchestrator::new(
        InspectorConfig::default(),
        Box::new(catalog),
        Box::new(TableRedshiftCatalog::new(zcat()).unwrap()),
        Box::new(ExposureReader::new(exposures)),
    )
    .with_tile_index(Box::new(TableTileIndex::new(tile_fibermap()).unwrap()))
}

fn filters(pairs: &[(&str, &str)]) -> FilterArgs {
    let mut args: FilterArgs = BTreeMap::new();
    for (key, token) in pairs {
        args.entry(key.to_string()).or_default().push(token.to_string());
    }
    args
}

fn location(text: &str) -> Selection {
    Selection::from_args(Some(text), None, &InspectorConfig::default()).unwrap()
}

#[test]
fn cone_search_augments_and_stamps_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());

    let table = orch
        .load_targets("DR1", SpecGroup::Healpix, &location("210,5,30"), &FilterArgs::new())
        .unwrap();
    assert_eq!(table.int_column("TARGETID").unwrap(), &[101, 102, 103]);
    assert!(table.contains_column("SPECTYPE"));
    assert_eq!(table.meta["SPECPROD"], MetadataValue::String("iron".into()));
    assert_eq!(table.meta["RADIUS"], MetadataValue::Float(30.0));
}

#[test]
fn filters_narrow_targets() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    let selection = location("210,5,30");

    let table = orch
        .load_targets(
            "iron",
            SpecGroup::Healpix,
            &selection,
            &filters(&[("ZWARN", "0"), ("Z", "gt:0.1"), ("format", "csv")]),
        )
        .unwrap();
    assert_eq!(table.int_column("TARGETID").unwrap(), &[101, 102]);

    let table = orch
        .load_targets("iron", SpecGroup::Healpix, &selection, &filters(&[("SURVEY", "sv3")]))
        .unwrap();
    assert_eq!(table.int_column("TARGETID").unwrap(), &[102]);

    let err = orch
        .load_targets("iron", SpecGroup::Healpix, &selection, &filters(&[("NOPE", "1")]))
        .unwrap_err();
    assert!(matches!(err, InspectorError::Filter(_)));
}

#[test]
fn spectra_follow_target_order() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    let ids = Selection::from_args(None, Some("103,101"), orch.config()).unwrap();

    let spectra = orch
        .load_spectra("iron", SpecGroup::Healpix, &ids, &FilterArgs::new(), None)
        .unwrap()
        .unwrap();
    assert_eq!(spectra.exposure_target_ids(), &[103, 101, 101]);
    assert_eq!(spectra.meta["SPECPROD"], "iron");
    assert_eq!(spectra.fibermap().int_column("EXPID").unwrap(), &[3, 0, 2]);
}

#[test]
fn coadded_spectra_one_row_per_target() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());

    let coadded = orch
        .load_coadded_spectra("iron", SpecGroup::Healpix, &location("210,5,30"), &FilterArgs::new(), None)
        .unwrap()
        .unwrap();
    assert_eq!(coadded.exposure_target_ids(), &[101, 102, 103]);

    // target 101: flux 1 (ivar 1) and 3 (ivar 3) -> (1 + 9) / 4
    let b = coadded.band("b").unwrap();
    assert!((b.flux(0)[0] - 2.5).abs() < 1e-12);
    assert!((b.ivar(0)[0] - 4.0).abs() < 1e-12);
    assert!((b.resolution(0)[0] - 0.25).abs() < 1e-12);
    assert_eq!(b.flux(1), &[5.0; 3]);
    assert_eq!(coadded.band("r").unwrap().wave()[0], 5000.0);
}

#[test]
fn empty_and_oversized_queries() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());

    let nothing = orch
        .load_spectra("iron", SpecGroup::Healpix, &location("10,-60,5"), &FilterArgs::new(), None)
        .unwrap();
    assert!(nothing.is_none());

    let err = orch
        .load_spectra("iron", SpecGroup::Healpix, &location("210,5,30"), &FilterArgs::new(), Some(2))
        .unwrap_err();
    assert!(matches!(err, InspectorError::LimitExceeded { actual: 3, max: 2 }));

    let err = orch
        .load_targets("iron", SpecGroup::Tiles, &location("210,5,30"), &FilterArgs::new())
        .unwrap_err();
    assert!(matches!(err, InspectorError::Collaborator(_)));
}

#[test]
fn tile_queries_use_latest_night() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());

    let table = orch
        .load_tile_targets("iron", 80605, "2,0", &FilterArgs::new())
        .unwrap();
    assert_eq!(table.int_column("TARGETID").unwrap(), &[103, 101]);
    assert_eq!(table.int_column("FIBER").unwrap(), &[2, 0]);
    assert_eq!(table.int_column("LASTNIGHT").unwrap(), &[20210510, 20210510]);

    let spectra = orch
        .load_tile_spectra("iron", 80605, "0:2", &FilterArgs::new(), None)
        .unwrap()
        .unwrap();
    assert_eq!(spectra.exposure_target_ids(), &[101, 101, 102]);

    let err = orch
        .load_tile_spectra("iron", 80605, "0-3", &FilterArgs::new(), Some(3))
        .unwrap_err();
    assert!(matches!(err, InspectorError::LimitExceeded { actual: 4, max: 3 }));

    assert!(matches!(
        orch.load_tile_targets("iron", 1, "0", &FilterArgs::new()),
        Err(InspectorError::NotFound(_))
    ));
    assert!(matches!(
        orch.load_tile_targets("iron", 80605, "7", &FilterArgs::new()),
        Err(InspectorError::NotFound(_))
    ));
    assert!(matches!(
        orch.load_tile_targets("iron", 80605, "5000", &FilterArgs::new()),
        Err(InspectorError::Validation(_))
    ));
}

#[test]
fn written_tables_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    let table = orch
        .load_targets("iron", SpecGroup::Healpix, &location("210,5,30"), &FilterArgs::new())
        .unwrap();

    for (format, name) in [(OutputFormat::Csv, "out.csv"), (OutputFormat::Json, "out.json")] {
        let path = dir.path().join(name);
        write_table(&table, format, std::fs::File::create(&path).unwrap()).unwrap();
        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.int_column("TARGETID").unwrap(), &[101, 102, 103]);
        assert_eq!(loaded.int_column("ZWARN").unwrap(), &[0, 0, 4]);
    }
}
