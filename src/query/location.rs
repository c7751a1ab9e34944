use std::fmt;

use crate::config::InspectorConfig;
use crate::error::{InspectorError, Result};

/// A validated cone on the sky. Only constructed through [`Location::parse`]
/// or [`Location::new`], so every value satisfies the configured limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    ra: f64,
    dec: f64,
    radius: f64,
}

impl Location {
    /// Parse `"RA,Dec[,Radius]"` (degrees, degrees, arcsec).
    ///
    /// Structural problems (wrong arity, non-numeric fields) are
    /// [`InspectorError::Parse`]; values outside the allowed ranges are
    /// [`InspectorError::Validation`].
    pub fn parse(text: &str, config: &InspectorConfig) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').collect();
        if !(2..=3).contains(&fields.len()) {
            return Err(InspectorError::parse(format!(
                "Unable to parse '{text}' as RA,dec or RA,dec,radius"
            )));
        }

        let mut numbers = Vec::with_capacity(3);
        for field in &fields {
            let value = field
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| InspectorError::parse(format!("Unable to parse '{field}' in '{text}' as a number")))?;
            numbers.push(value);
        }
        let radius = numbers.get(2).copied().unwrap_or(config.default_radius_arcsec);

        Self::new(numbers[0], numbers[1], radius, config)
    }

    /// Validate explicit coordinates against the configured limits.
    pub fn new(ra: f64, dec: f64, radius: f64, config: &InspectorConfig) -> Result<Self> {
        if radius > config.max_radius_arcsec {
            return Err(InspectorError::validation(format!(
                "Please limit your search to radius < {} arcsec",
                config.max_radius_arcsec
            )));
        }
        if radius.is_nan() || radius <= 0.0 {
            return Err(InspectorError::validation(format!(
                "radius={radius} should be greater than 0 arcsec"
            )));
        }
        if !(0.0..=360.0).contains(&ra) {
            return Err(InspectorError::validation(format!(
                "RA={ra} should be between 0 and 360 degrees"
            )));
        }
        if !(-90.0..=90.0).contains(&dec) {
            return Err(InspectorError::validation(format!(
                "dec={dec} should be between -90 and 90 degrees"
            )));
        }
        Ok(Location { ra, dec, radius })
    }

    /// Right ascension in degrees.
    pub fn ra(&self) -> f64 {
        self.ra
    }

    /// Declination in degrees.
    pub fn dec(&self) -> f64 {
        self.dec
    }

    /// Search radius in arcsec.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn radius_deg(&self) -> f64 {
        self.radius / 3600.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} arcsec of RA,dec=({:.4},{:.4})",
            self.radius, self.ra, self.dec
        )
    }
}
