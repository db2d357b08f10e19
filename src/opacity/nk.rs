//! Complex refractive-index spectra.
//!
//! Tables are plain text, one `lambda n k` row per line. Leading header rows
//! and `#`/`!` comments are skipped; a header line of the form
//! `density = <g/cm^3>` (optionally commented) declares the bulk density.
use super::materials::Material;
use crate::archive::OpacityArchive;
use crate::error::PipelineError;
use anyhow::{anyhow, Context, Result};
use num_complex::Complex64;
use std::fs;

#[derive(Debug, Clone, PartialEq)]
pub struct RefractiveIndex {
    /// Wavelengths in micron, ascending.
    pub wavelengths: Vec<f64>,
    pub n: Vec<f64>,
    pub k: Vec<f64>,
    pub density: Option<f64>,
}

impl RefractiveIndex {
    /// Parse a table; `wavelength_scale` converts the first column to micron.
    pub fn parse(text: &str, wavelength_scale: f64) -> Result<Self> {
        let mut rows: Vec<(f64, f64, f64)> = Vec::new();
        let mut density = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let body = line.trim_start_matches(['#', '!']).trim();
            if body.to_ascii_lowercase().starts_with("density") {
                density = body
                    .split(['=', ' ', '\t', ':'])
                    .filter(|token| !token.is_empty())
                    .nth(1)
                    .and_then(|token| token.parse::<f64>().ok());
                continue;
            }
            if line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let values: Vec<f64> = line
                .split_whitespace()
                .take(3)
                .map(str::parse::<f64>)
                .collect::<Result<_, _>>()
                .unwrap_or_default();
            if values.len() < 3 {
                if rows.is_empty() {
                    // Header row.
                    continue;
                }
                return Err(anyhow!("malformed refractive index row {}: {raw:?}", lineno + 1));
            }
            rows.push((values[0] * wavelength_scale, values[1], values[2]));
        }
        if rows.len() < 2 {
            return Err(anyhow!("refractive index table needs at least two rows"));
        }
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self {
            wavelengths: rows.iter().map(|r| r.0).collect(),
            n: rows.iter().map(|r| r.1).collect(),
            k: rows.iter().map(|r| r.2).collect(),
            density,
        })
    }

    /// Sample `m = n + ik` on `grid`, linear in log-wavelength and clamped
    /// to the table edges.
    pub fn sample(&self, grid: &[f64]) -> Vec<Complex64> {
        grid.iter()
            .map(|&lam| {
                let n = super::interpolate_log(&self.wavelengths, &self.n, lam).unwrap_or(1.0);
                let k = super::interpolate_log(&self.wavelengths, &self.k, lam).unwrap_or(0.0);
                Complex64::new(n, k.max(0.0))
            })
            .collect()
    }
}

/// Source of refractive-index tables for catalog materials.
pub trait NkSource {
    fn fetch(&self, file_name: &str) -> Result<String>;
}

/// Tables served by the remote opacity archive.
pub struct ArchiveNkSource<'a> {
    archive: &'a dyn OpacityArchive,
}

impl<'a> ArchiveNkSource<'a> {
    pub fn new(archive: &'a dyn OpacityArchive) -> Self {
        Self { archive }
    }
}

impl NkSource for ArchiveNkSource<'_> {
    fn fetch(&self, file_name: &str) -> Result<String> {
        self.archive.fetch_text(file_name)
    }
}

/// Load and parse the refractive index for `material`. User-supplied files
/// are read from disk; catalog tables come from `source`.
pub fn load(material: &Material, source: &dyn NkSource) -> Result<RefractiveIndex> {
    let text = match material {
        Material::Custom(path) => fs::read_to_string(path)
            .with_context(|| format!("read refractive index {}", path.display()))?,
        catalog => {
            let file = catalog
                .archive_file()
                .ok_or_else(|| anyhow!("{} has no archive table", catalog.name()))?;
            source
                .fetch(file)
                .with_context(|| format!("load refractive index for {}", catalog.name()))?
        }
    };
    let mut table = RefractiveIndex::parse(&text, material.wavelength_scale())
        .with_context(|| format!("parse refractive index for {}", material.name()))?;
    if let Some(density) = material.density() {
        table.density = Some(density);
    }
    if table.density.is_none() {
        return Err(PipelineError::configuration(format!(
            "refractive index for {} does not declare a density",
            material.name()
        ))
        .into());
    }
    Ok(table)
}
