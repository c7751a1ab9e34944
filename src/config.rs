use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// InspectorConfig – limits and aliases shared by every query
// ---------------------------------------------------------------------------

/// Query limits and product aliases.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides:
///
/// ```json
/// { "max_spectra": 500, "product_aliases": { "dr1": "iron" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Largest accepted search radius, in arcsec.
    pub max_radius_arcsec: f64,
    /// Radius used when a location omits it, in arcsec.
    pub default_radius_arcsec: f64,
    /// Most spectra a single request may read.
    pub max_spectra: usize,
    /// Fibers must satisfy `0 <= FIBER < max_fiber`.
    pub max_fiber: i64,
    /// Most rows a rendered table may contain.
    pub max_table_rows: usize,
    /// Lower-case alias → canonical production name.
    pub product_aliases: BTreeMap<String, String>,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        let product_aliases = [("edr", "fuji"), ("dr1", "iron"), ("dr2", "loa")]
            .into_iter()
            .map(|(alias, name)| (alias.to_string(), name.to_string()))
            .collect();

        Self {
            max_radius_arcsec: 1800.0,
            default_radius_arcsec: 10.0,
            max_spectra: 1000,
            max_fiber: 5000,
            max_table_rows: 10_000,
            product_aliases,
        }
    }
}

impl InspectorConfig {
    /// Read a JSON config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Map a production alias (case-insensitive) to its canonical name.
    /// Unknown names are returned unchanged.
    pub fn standardize_product(&self, product: &str) -> String {
        self.product_aliases
            .get(&product.to_lowercase())
            .cloned()
            .unwrap_or_else(|| product.to_string())
    }
}
