//! Pipeline configuration.
//!
//! A `PipelineConfig` is created once per run (defaults, optional JSON file,
//! then CLI overrides) and validated before any stage executes. Stages never
//! mutate it in place: the handful of per-stage values are replaced through
//! the `with_*` methods, which return a new snapshot.
use crate::error::PipelineError;
use crate::opacity::Composition;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Maximum grain size used for the grown-dust second species.
pub const GROWN_DUST_AMAX_UM: f64 = 1000.0;

/// Carbon mass fraction removed inside the sublimation line.
pub const CARBON_FRACTION: f64 = 0.375;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Star {
    /// Position in cm.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Radius in cm.
    pub radius: f64,
    /// Mass in g.
    pub mass: f64,
    /// Blackbody temperature in K.
    pub temperature: f64,
}

impl Default for Star {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            radius: 2e11,
            mass: 3e22,
            temperature: 4000.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub schema_version: u32,
    /// Observing wavelength in micron.
    pub lam: f64,
    /// Wavelength grid bounds (micron) and sample count.
    pub lmin: f64,
    pub lmax: f64,
    pub nlam: usize,
    /// Grain size bounds in micron and size-distribution slope.
    pub amin: f64,
    pub amax: f64,
    pub q: f64,
    /// Material code, recipe name or path to a refractive-index file.
    pub material: String,
    pub nphot: u64,
    pub nthreads: usize,
    /// Sublimation temperature (K) separating the two dust species.
    pub sootline: f64,
    /// Carbon sublimation percentage; 0 disables the second species.
    pub csubl: f64,
    pub dgrowth: bool,
    pub polarization: bool,
    pub alignment: bool,
    pub overwrite: bool,
    pub seed: i64,
    pub star: Star,
    pub npix: Option<u32>,
    pub incl: Option<f64>,
    pub sizeau: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            lam: 1300.0,
            lmin: 0.1,
            lmax: 1e5,
            nlam: 200,
            amin: 0.1,
            amax: 10.0,
            q: -3.5,
            material: "sg".to_string(),
            nphot: 100_000,
            nthreads: 1,
            sootline: 300.0,
            csubl: 0.0,
            dgrowth: false,
            polarization: false,
            alignment: false,
            overwrite: false,
            seed: -5415,
            star: Star::default(),
            npix: None,
            incl: None,
            sizeau: None,
        }
    }
}

impl PipelineConfig {
    /// Polarized transfer is implied by grain alignment.
    pub fn polarized(&self) -> bool {
        self.polarization || self.alignment
    }

    pub fn scattering_mode(&self) -> u8 {
        if self.alignment {
            4
        } else if self.polarization {
            5
        } else {
            2
        }
    }

    /// Input style code written per species in the opacity index.
    pub fn input_style(&self) -> u8 {
        if self.alignment {
            20
        } else if self.polarization {
            10
        } else {
            1
        }
    }

    pub fn opacity_prefix(&self) -> &'static str {
        if self.polarized() {
            "dustkapscatmat_"
        } else {
            "dustkappa_"
        }
    }

    pub fn nspec(&self) -> usize {
        if self.csubl > 0.0 {
            2
        } else {
            1
        }
    }

    /// Log-spaced wavelength grid in micron, endpoints included.
    pub fn wavelength_grid(&self) -> Vec<f64> {
        logspace(self.lmin, self.lmax, self.nlam)
    }

    /// Composition codes for each dust species.
    pub fn species_compositions(&self) -> Vec<String> {
        let mut species = vec![self.material.clone()];
        if self.nspec() > 1 {
            species.push(format!("{}o", self.material));
        }
        species
    }

    /// Opacity table stems (without prefix and extension), one per species.
    pub fn opacity_table_names(&self) -> Vec<String> {
        let amax = self.amax.round() as i64;
        let label = Composition::label_for(&self.material);
        let mut names = vec![format!("{label}-a{amax}um")];
        if self.nspec() > 1 {
            let overcoat = format!("{label}o");
            let amax = if self.dgrowth {
                GROWN_DUST_AMAX_UM as i64
            } else {
                amax
            };
            let mut name = format!("{overcoat}-a{amax}um");
            if overcoat == "sgo" {
                name.push_str(&format!("-{}org", self.csubl.round() as i64));
            }
            names.push(name);
        }
        names
    }

    /// Opacity table file names as written on disk.
    pub fn opacity_file_names(&self) -> Vec<String> {
        self.opacity_table_names()
            .into_iter()
            .map(|name| format!("{}{name}.inp", self.opacity_prefix()))
            .collect()
    }

    /// Mass fraction retained by the inner species inside the sublimation line.
    pub fn sublimated_mass_fraction(&self) -> f64 {
        1.0 - CARBON_FRACTION * self.csubl / 100.0
    }

    /// Mixer thread count; polarized scattering matrices are computed serially.
    pub fn mixer_threads(&self) -> usize {
        if self.polarized() {
            1
        } else {
            self.nthreads.max(1)
        }
    }

    pub fn with_wavelength(mut self, lam: Option<f64>) -> Self {
        if let Some(lam) = lam {
            self.lam = lam;
        }
        self
    }

    pub fn with_npix(mut self, npix: Option<u32>) -> Self {
        if npix.is_some() {
            self.npix = npix;
        }
        self
    }

    pub fn with_inclination(mut self, incl: Option<f64>) -> Self {
        if incl.is_some() {
            self.incl = incl;
        }
        self
    }

    pub fn with_sizeau(mut self, sizeau: Option<f64>) -> Self {
        if sizeau.is_some() {
            self.sizeau = sizeau;
        }
        self
    }

    pub fn with_photons(mut self, nphot: Option<u64>) -> Self {
        if let Some(nphot) = nphot {
            self.nphot = nphot;
        }
        self
    }

    pub fn with_grains(mut self, amin: f64, amax: f64, q: f64) -> Self {
        self.amin = amin;
        self.amax = amax;
        self.q = q;
        self
    }

    pub fn with_material(mut self, material: Option<String>) -> Self {
        if let Some(material) = material {
            self.material = material;
        }
        self
    }
}

/// Logarithmically spaced samples between `start` and `stop`, inclusive.
pub fn logspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let (lo, hi) = (start.log10(), stop.log10());
            let step = (hi - lo) / (n - 1) as f64;
            (0..n)
                .map(|i| 10f64.powf(lo + step * i as f64))
                .collect()
        }
    }
}

/// Load a configuration file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: PipelineConfig =
        serde_json::from_slice(&bytes).context("parse pipeline config JSON")?;
    Ok(config)
}

/// Persist a configuration in a stable JSON format.
pub fn write_config(path: &Path, config: &PipelineConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(config).context("serialize pipeline config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn invalid(message: String) -> anyhow::Error {
    PipelineError::Configuration(message).into()
}

/// Validate a configuration before a run starts.
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(invalid(format!(
            "unsupported config schema_version {}",
            config.schema_version
        )));
    }
    if config.nthreads == 0 {
        return Err(invalid("nthreads must be at least 1".to_string()));
    }
    if config.nlam < 2 {
        return Err(invalid(format!("nlam must be at least 2 (got {})", config.nlam)));
    }
    if !(config.lmin > 0.0 && config.lmax > config.lmin) {
        return Err(invalid(format!(
            "wavelength bounds must satisfy 0 < lmin < lmax (got {} .. {})",
            config.lmin, config.lmax
        )));
    }
    if config.lam <= 0.0 {
        return Err(invalid(format!("lam must be positive (got {})", config.lam)));
    }
    if !(config.amin > 0.0 && config.amax > config.amin) {
        return Err(invalid(format!(
            "grain sizes must satisfy 0 < amin < amax (got {} .. {})",
            config.amin, config.amax
        )));
    }
    if config.csubl < 0.0 || config.csubl > 100.0 {
        return Err(invalid(format!("csubl must be a percentage (got {})", config.csubl)));
    }
    if config.nphot == 0 {
        return Err(invalid("nphot must be positive".to_string()));
    }
    if config.material.trim().is_empty() {
        return Err(invalid("material must be non-empty".to_string()));
    }
    // Surfaces unknown codes that are neither recipes nor readable files.
    for code in config.species_compositions() {
        Composition::parse(&code)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
