use std::collections::BTreeMap;

use crate::data::model::Table;
use crate::error::{InspectorError, Result};

/// Column holding the target identifier in fibermaps and catalog tables.
pub const TARGETID: &str = "TARGETID";

// ---------------------------------------------------------------------------
// SpectralBand – all exposures of one spectrograph band
// ---------------------------------------------------------------------------

/// Per-exposure measurements on a shared wavelength grid.
///
/// Storage is row-major: `flux` and `ivar` are `[n_exposures × n_wave]`,
/// `resolution` is `[n_exposures × n_diag × n_wave]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralBand {
    wave: Vec<f64>,
    n_diag: usize,
    n_exposures: usize,
    flux: Vec<f64>,
    ivar: Vec<f64>,
    resolution: Vec<f64>,
}

impl SpectralBand {
    /// An empty band on `wave` with `n_diag` resolution diagonals.
    pub fn new(wave: Vec<f64>, n_diag: usize) -> Self {
        SpectralBand {
            wave,
            n_diag,
            n_exposures: 0,
            flux: Vec::new(),
            ivar: Vec::new(),
            resolution: Vec::new(),
        }
    }

    /// Append one exposure. `resolution` is the flattened `n_diag × n_wave`
    /// kernel.
    pub fn push_exposure(&mut self, flux: &[f64], ivar: &[f64], resolution: &[f64]) -> Result<()> {
        let n_wave = self.wave.len();
        if flux.len() != n_wave || ivar.len() != n_wave {
            return Err(InspectorError::validation(format!(
                "exposure has {} flux and {} ivar values for {} wavelengths",
                flux.len(),
                ivar.len(),
                n_wave
            )));
        }
        if resolution.len() != self.n_diag * n_wave {
            return Err(InspectorError::validation(format!(
                "exposure resolution has {} values, expected {} x {}",
                resolution.len(),
                self.n_diag,
                n_wave
            )));
        }
        self.flux.extend_from_slice(flux);
        self.ivar.extend_from_slice(ivar);
        self.resolution.extend_from_slice(resolution);
        self.n_exposures += 1;
        Ok(())
    }

    pub fn wave(&self) -> &[f64] {
        &self.wave
    }

    pub fn num_wave(&self) -> usize {
        self.wave.len()
    }

    pub fn num_diag(&self) -> usize {
        self.n_diag
    }

    pub fn num_exposures(&self) -> usize {
        self.n_exposures
    }

    pub fn flux(&self, exposure: usize) -> &[f64] {
        let n = self.num_wave();
        &self.flux[exposure * n..(exposure + 1) * n]
    }

    pub fn ivar(&self, exposure: usize) -> &[f64] {
        let n = self.num_wave();
        &self.ivar[exposure * n..(exposure + 1) * n]
    }

    /// Flattened `n_diag × n_wave` resolution kernel of one exposure.
    pub fn resolution(&self, exposure: usize) -> &[f64] {
        let n = self.n_diag * self.num_wave();
        &self.resolution[exposure * n..(exposure + 1) * n]
    }

    /// New band with the exposures at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> SpectralBand {
        let mut out = SpectralBand::new(self.wave.clone(), self.n_diag);
        for &i in indices {
            out.flux.extend_from_slice(self.flux(i));
            out.ivar.extend_from_slice(self.ivar(i));
            out.resolution.extend_from_slice(self.resolution(i));
        }
        out.n_exposures = indices.len();
        out
    }
}

// ---------------------------------------------------------------------------
// CoaddedSpectrum – the combination of one target's exposures in one band
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CoaddedSpectrum {
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    pub ivar: Vec<f64>,
    /// Flattened `n_diag × n_wave`.
    pub resolution: Vec<f64>,
    pub n_diag: usize,
}

// ---------------------------------------------------------------------------
// Spectra – fibermap plus per-band exposures, row-aligned
// ---------------------------------------------------------------------------

/// A set of spectra: one fibermap row per exposure, and for every band one
/// exposure row aligned with the fibermap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectra {
    fibermap: Table,
    bands: Vec<String>,
    data: BTreeMap<String, SpectralBand>,
    /// Free-form metadata (description, product, ...).
    pub meta: BTreeMap<String, String>,
}

impl Spectra {
    /// Start from a fibermap; it must carry an integer `TARGETID` column.
    pub fn new(fibermap: Table) -> Result<Self> {
        if fibermap.int_column(TARGETID).is_none() {
            return Err(InspectorError::validation(
                "fibermap needs an integer TARGETID column",
            ));
        }
        Ok(Spectra {
            fibermap,
            ..Spectra::default()
        })
    }

    /// Add a band whose exposures align with the fibermap rows.
    pub fn add_band(&mut self, name: impl Into<String>, band: SpectralBand) -> Result<()> {
        let name = name.into();
        if band.num_exposures() != self.fibermap.len() {
            return Err(InspectorError::validation(format!(
                "band {name} has {} exposures but the fibermap has {} rows",
                band.num_exposures(),
                self.fibermap.len()
            )));
        }
        if !self.data.contains_key(&name) {
            self.bands.push(name.clone());
        }
        self.data.insert(name, band);
        Ok(())
    }

    pub fn fibermap(&self) -> &Table {
        &self.fibermap
    }

    /// Band names in insertion order.
    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn band(&self, name: &str) -> Option<&SpectralBand> {
        self.data.get(name)
    }

    /// Number of exposures (fibermap rows).
    pub fn len(&self) -> usize {
        self.fibermap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `TARGETID` of every exposure, in row order.
    pub fn exposure_target_ids(&self) -> &[i64] {
        self.fibermap.int_column(TARGETID).unwrap_or(&[])
    }

    /// Distinct target ids in order of first appearance.
    pub fn target_ids(&self) -> Vec<i64> {
        let mut seen = std::collections::BTreeSet::new();
        self.exposure_target_ids()
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn num_targets(&self) -> usize {
        self.target_ids().len()
    }

    /// New set holding the exposures at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Spectra {
        Spectra {
            fibermap: self.fibermap.take(indices),
            bands: self.bands.clone(),
            data: self
                .data
                .iter()
                .map(|(name, band)| (name.clone(), band.take(indices)))
                .collect(),
            meta: self.meta.clone(),
        }
    }

    /// Exposures of the given targets, grouped in the order of `targetids`.
    /// Unknown ids are skipped.
    pub fn select_targets(&self, targetids: &[i64]) -> Spectra {
        let rows = self.exposure_target_ids();
        let mut indices = Vec::new();
        for id in targetids {
            indices.extend(rows.iter().enumerate().filter(|(_, t)| *t == id).map(|(i, _)| i));
        }
        self.take(&indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::ColumnData;

    fn band_with(rows: &[[f64; 3]]) -> SpectralBand {
        let mut band = SpectralBand::new(vec![1.0, 2.0, 3.0], 1);
        for row in rows {
            band.push_exposure(row, &[1.0; 3], row).unwrap();
        }
        band
    }

    #[test]
    fn push_checks_shapes() {
        let mut band = SpectralBand::new(vec![1.0, 2.0], 3);
        assert!(band.push_exposure(&[1.0], &[1.0, 1.0], &[0.0; 6]).is_err());
        assert!(band.push_exposure(&[1.0, 1.0], &[1.0, 1.0], &[0.0; 4]).is_err());
        band.push_exposure(&[1.0, 2.0], &[1.0, 1.0], &[0.0; 6]).unwrap();
        assert_eq!(band.num_exposures(), 1);
        assert_eq!(band.resolution(0).len(), 6);
    }

    #[test]
    fn exposures_are_counted_on_an_empty_grid() {
        let mut band = SpectralBand::new(Vec::new(), 2);
        band.push_exposure(&[], &[], &[]).unwrap();
        band.push_exposure(&[], &[], &[]).unwrap();
        assert_eq!(band.num_exposures(), 2);
        assert!(band.flux(1).is_empty());
        assert_eq!(band.take(&[1, 0, 1]).num_exposures(), 3);
    }

    #[test]
    fn spectra_rows_stay_aligned() {
        let fibermap = Table::new()
            .with_column(TARGETID, ColumnData::Integer(vec![7, 8, 7]))
            .unwrap();
        let mut spectra = Spectra::new(fibermap).unwrap();
        assert!(spectra.add_band("b", band_with(&[[1.0; 3]])).is_err());

        spectra
            .add_band("b", band_with(&[[1.0; 3], [2.0; 3], [3.0; 3]]))
            .unwrap();
        assert_eq!(spectra.target_ids(), vec![7, 8]);

        let selected = spectra.select_targets(&[8, 7, 99]);
        assert_eq!(selected.exposure_target_ids(), &[8, 7, 7]);
        let b = selected.band("b").unwrap();
        assert_eq!(b.flux(0), &[2.0; 3]);
        assert_eq!(b.flux(2), &[3.0; 3]);
    }

    #[test]
    fn fibermap_needs_targetid() {
        let fibermap = Table::new()
            .with_column("FIBER", ColumnData::Integer(vec![1]))
            .unwrap();
        assert!(Spectra::new(fibermap).is_err());
    }
}
