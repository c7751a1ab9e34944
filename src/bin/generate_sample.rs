//! Writes a small synthetic production into a directory:
//!
//! * `targets.parquet`   – healpix inventory (TARGETID, TARGET_RA, TARGET_DEC, SURVEY, ...)
//! * `zcat.parquet`      – redshift catalog
//! * `exposures.parquet` – one row per (exposure, band) with WAVE/FLUX/IVAR/RESOLUTION lists
//! * `fibermap.parquet`  – tile fiber assignments (TILEID, LASTNIGHT, FIBER, TARGETID)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;

const TILEID: i64 = 80605;
const LASTNIGHT: i64 = 20210510;

/// (band, first wavelength, last wavelength) in Angstrom.
const BANDS: [(&str, f64, f64); 3] = [("b", 3600.0, 5800.0), ("r", 5760.0, 7620.0), ("z", 7520.0, 9824.0)];
const WAVE_STEP: f64 = 8.0;
/// Diagonals of a symmetric three-pixel resolution kernel.
const KERNEL: [f64; 3] = [0.2, 0.6, 0.2];

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Flat continuum plus redshifted emission lines, with gaussian noise.
fn generate_flux(wave: &[f64], z: f64, continuum: f64, noise_level: f64, rng: &mut SimpleRng) -> Vec<f64> {
    // H-beta, [OIII], H-alpha rest wavelengths
    let lines = [(4862.7, 3.0), (5008.2, 5.0), (6564.6, 8.0)];
    wave.iter()
        .map(|&w| {
            let signal: f64 = lines
                .iter()
                .map(|&(rest, amp)| gaussian(w, rest * (1.0 + z), 4.0, amp))
                .sum();
            continuum + signal + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

struct Target {
    id: i64,
    ra: f64,
    dec: f64,
    survey: &'static str,
    spectype: &'static str,
    z: f64,
    zwarn: i64,
    fiber: i64,
    n_exposures: usize,
}

fn make_targets(n: usize, rng: &mut SimpleRng) -> Vec<Target> {
    (0..n)
        .map(|i| {
            let (spectype, z) = match i % 4 {
                0 => ("STAR", rng.gauss(0.0, 1e-4)),
                3 => ("QSO", rng.uniform(0.8, 2.5)),
                _ => ("GALAXY", rng.uniform(0.05, 0.4)),
            };
            Target {
                id: 39627908959964000 + i as i64 * 17,
                ra: 210.0 + rng.gauss(0.0, 0.02),
                dec: 5.0 + rng.gauss(0.0, 0.02),
                survey: if i % 3 == 0 { "sv3" } else { "main" },
                spectype,
                z,
                zwarn: if i % 10 == 9 { 4 } else { 0 },
                fiber: i as i64 * 3,
                n_exposures: 1 + (rng.next_u64() % 3) as usize,
            }
        })
        .collect()
}

fn list_array(rows: &[Vec<f64>]) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        let values = builder.values();
        for &v in row {
            values.append_value(v);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

fn strings(values: impl IntoIterator<Item = impl Into<String>>) -> ArrayRef {
    let values: Vec<String> = values.into_iter().map(Into::into).collect();
    Arc::new(StringArray::from(values))
}

fn ints(values: impl IntoIterator<Item = i64>) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(values))
}

fn floats(values: impl IntoIterator<Item = f64>) -> ArrayRef {
    Arc::new(Float64Array::from_iter_values(values))
}

fn write_parquet(path: &Path, columns: Vec<(&str, ArrayRef)>) -> Result<()> {
    let batch = RecordBatch::try_from_iter(columns).context("building record batch")?;
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    info!("Wrote {} rows to {}", batch.num_rows(), path.display());
    Ok(())
}

fn write_exposures(path: &Path, targets: &[Target], rng: &mut SimpleRng) -> Result<usize> {
    let mut target_col = Vec::new();
    let mut band_col = Vec::new();
    let mut expid_col = Vec::new();
    let mut fiber_col = Vec::new();
    let mut waves = Vec::new();
    let mut fluxes = Vec::new();
    let mut ivars = Vec::new();
    let mut resolutions = Vec::new();

    // one exposure list shared by every band so rows align band by band
    let exposures: Vec<(usize, i64)> = targets
        .iter()
        .enumerate()
        .flat_map(|(t, target)| (0..target.n_exposures).map(move |e| (t, 100_000 + e as i64)))
        .collect();

    for (band, start, stop) in BANDS {
        let n_wave = ((stop - start) / WAVE_STEP) as usize + 1;
        let wave: Vec<f64> = (0..n_wave).map(|i| start + i as f64 * WAVE_STEP).collect();
        let resolution: Vec<f64> = KERNEL.iter().flat_map(|&k| std::iter::repeat(k).take(n_wave)).collect();

        for &(t, expid) in &exposures {
            let target = &targets[t];
            let noise = rng.uniform(0.2, 0.6);
            let continuum = if target.spectype == "STAR" { 5.0 } else { 1.0 };
            target_col.push(target.id);
            band_col.push(band);
            expid_col.push(expid);
            fiber_col.push(target.fiber);
            fluxes.push(generate_flux(&wave, target.z, continuum, noise, rng));
            ivars.push(vec![1.0 / (noise * noise); n_wave]);
            waves.push(wave.clone());
            resolutions.push(resolution.clone());
        }
    }

    let n_rows = target_col.len();
    write_parquet(
        path,
        vec![
            ("TARGETID", ints(target_col)),
            ("BAND", strings(band_col)),
            ("EXPID", ints(expid_col)),
            ("TILEID", ints(std::iter::repeat(TILEID).take(n_rows))),
            ("FIBER", ints(fiber_col)),
            ("WAVE", list_array(&waves)),
            ("FLUX", list_array(&fluxes)),
            ("IVAR", list_array(&ivars)),
            ("RESOLUTION", list_array(&resolutions)),
        ],
    )?;
    Ok(exposures.len())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let out_dir = std::env::args().nth(1).map_or_else(|| PathBuf::from("sample_data"), PathBuf::from);
    std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let targets = make_targets(40, &mut rng);

    write_parquet(
        &out_dir.join("targets.parquet"),
        vec![
            ("TARGETID", ints(targets.iter().map(|t| t.id))),
            ("TARGET_RA", floats(targets.iter().map(|t| t.ra))),
            ("TARGET_DEC", floats(targets.iter().map(|t| t.dec))),
            ("SURVEY", strings(targets.iter().map(|t| t.survey))),
            ("PROGRAM", strings(targets.iter().map(|_| "dark"))),
        ],
    )?;

    write_parquet(
        &out_dir.join("zcat.parquet"),
        vec![
            ("TARGETID", ints(targets.iter().map(|t| t.id))),
            ("TARGET_RA", floats(targets.iter().map(|t| t.ra))),
            ("TARGET_DEC", floats(targets.iter().map(|t| t.dec))),
            ("SPECTYPE", strings(targets.iter().map(|t| t.spectype))),
            ("Z", floats(targets.iter().map(|t| t.z))),
            ("ZWARN", ints(targets.iter().map(|t| t.zwarn))),
        ],
    )?;

    write_parquet(
        &out_dir.join("fibermap.parquet"),
        vec![
            ("TILEID", ints(targets.iter().map(|_| TILEID))),
            ("LASTNIGHT", ints(targets.iter().map(|_| LASTNIGHT))),
            ("FIBER", ints(targets.iter().map(|t| t.fiber))),
            ("TARGETID", ints(targets.iter().map(|t| t.id))),
        ],
    )?;

    let n_exposures = write_exposures(&out_dir.join("exposures.parquet"), &targets, &mut rng)?;

    println!(
        "Wrote {} targets ({} exposures in {} bands) to {}",
        targets.len(),
        n_exposures,
        BANDS.len(),
        out_dir.display()
    );
    Ok(())
}
