//! Inverse-variance weighted coaddition of repeated exposures.

use super::model::{CoaddedSpectrum, SpectralBand, Spectra};
use crate::error::{InspectorError, Result};

/// Combine every exposure of `band` into one spectrum.
///
/// Per wavelength bin, flux and resolution are averaged with the inverse
/// variances as weights and the output inverse variance is their sum. Where
/// every exposure has zero weight the flux is the plain mean of the inputs
/// and the output inverse variance is zero. A single exposure is returned
/// unchanged.
pub fn coadd(band: &SpectralBand) -> Result<CoaddedSpectrum> {
    let n_exp = band.num_exposures();
    let n_wave = band.num_wave();
    let n_diag = band.num_diag();

    if n_exp == 0 {
        return Err(InspectorError::validation(
            "cannot coadd a band without exposures",
        ));
    }
    if n_exp == 1 {
        return Ok(CoaddedSpectrum {
            wave: band.wave().to_vec(),
            flux: band.flux(0).to_vec(),
            ivar: band.ivar(0).to_vec(),
            resolution: band.resolution(0).to_vec(),
            n_diag,
        });
    }

    let mut weights = vec![0.0; n_wave];
    let mut weighted_flux = vec![0.0; n_wave];
    let mut unweighted_flux = vec![0.0; n_wave];
    let mut weighted_resolution = vec![0.0; n_diag * n_wave];

    for i in 0..n_exp {
        let flux = band.flux(i);
        let ivar = band.ivar(i);
        for w in 0..n_wave {
            weights[w] += ivar[w];
            weighted_flux[w] += flux[w] * ivar[w];
            unweighted_flux[w] += flux[w];
        }
        // an empty grid has no resolution rows to walk
        for (d, row) in band.resolution(i).chunks_exact(n_wave.max(1)).enumerate() {
            let out = &mut weighted_resolution[d * n_wave..(d + 1) * n_wave];
            for w in 0..n_wave {
                out[w] += row[w] * ivar[w];
            }
        }
    }

    let n = n_exp as f64;
    let flux: Vec<f64> = (0..n_wave)
        .map(|w| {
            if weights[w] > 0.0 {
                weighted_flux[w] / weights[w]
            } else {
                unweighted_flux[w] / n
            }
        })
        .collect();

    let resolution: Vec<f64> = weighted_resolution
        .iter()
        .enumerate()
        .map(|(k, r)| {
            let w = k % n_wave;
            if weights[w] > 0.0 {
                r / weights[w]
            } else {
                r / n
            }
        })
        .collect();

    Ok(CoaddedSpectrum {
        wave: band.wave().to_vec(),
        flux,
        ivar: weights,
        resolution,
        n_diag,
    })
}

/// Coadd the exposures of each target.
///
/// Targets are emitted in the order of `targetids` (default: order of first
/// appearance). The output fibermap keeps the first exposure row of each
/// target and every band holds one coadded row per target.
pub fn coadd_targets(spectra: &Spectra, targetids: Option<&[i64]>) -> Result<Spectra> {
    let targetids = match targetids {
        Some(ids) => ids.to_vec(),
        None => spectra.target_ids(),
    };
    let rows = spectra.exposure_target_ids();

    let mut groups = Vec::with_capacity(targetids.len());
    for id in &targetids {
        let members: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, t)| *t == id)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            return Err(InspectorError::validation(format!(
                "TARGETID {id} has no exposures to coadd"
            )));
        }
        groups.push(members);
    }

    let first_rows: Vec<usize> = groups.iter().map(|g| g[0]).collect();
    let mut out = Spectra::new(spectra.fibermap().take(&first_rows))?;
    out.meta = spectra.meta.clone();

    for name in spectra.bands() {
        let Some(band) = spectra.band(name) else {
            continue;
        };
        let mut combined = SpectralBand::new(band.wave().to_vec(), band.num_diag());
        for members in &groups {
            let coadded = coadd(&band.take(members))?;
            combined.push_exposure(&coadded.flux, &coadded.ivar, &coadded.resolution)?;
        }
        out.add_band(name.clone(), combined)?;
    }

    Ok(out)
}
