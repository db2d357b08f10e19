//! Regular Cartesian model grids in solver format.
//!
//! A `GridModel` supplies dust density and (optionally) temperature at cell
//! centers. With two dust species the cells are split at the sootline
//! temperature: the outer species keeps the full density below it, the inner
//! species carries the carbon-depleted density above it.
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::paths::WorkdirPaths;
use crate::util::write_atomic;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Instant;

pub const AU_CM: f64 = 1.495_978_707e13;
const MSUN_G: f64 = 1.988_47e33;

/// Source of the physical fields sampled onto the grid.
pub trait GridModel {
    fn name(&self) -> &str;
    /// Dust density in g/cm^3 at a position in cm.
    fn dust_density(&self, position: [f64; 3]) -> f64;
    /// Dust temperature in K, when the model provides one.
    fn temperature(&self, position: [f64; 3]) -> Option<f64>;
}

/// Spherical Plummer envelope with a power-law temperature profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PlummerEnvelope {
    /// Gas mass in solar masses.
    pub mass_msun: f64,
    /// Core radius in au.
    pub core_au: f64,
    pub gas_to_dust: f64,
    /// Temperature at 1 au and its radial power-law index.
    pub t_1au: f64,
    pub t_index: f64,
    pub t_floor: f64,
}

impl Default for PlummerEnvelope {
    fn default() -> Self {
        Self {
            mass_msun: 0.1,
            core_au: 50.0,
            gas_to_dust: 100.0,
            t_1au: 400.0,
            t_index: -0.4,
            t_floor: 10.0,
        }
    }
}

impl GridModel for PlummerEnvelope {
    fn name(&self) -> &str {
        "plummer"
    }

    fn dust_density(&self, position: [f64; 3]) -> f64 {
        let a = self.core_au * AU_CM;
        let r2 = position.iter().map(|c| c * c).sum::<f64>();
        let central = 3.0 * self.mass_msun * MSUN_G / (4.0 * std::f64::consts::PI * a.powi(3));
        central * (1.0 + r2 / (a * a)).powf(-2.5) / self.gas_to_dust
    }

    fn temperature(&self, position: [f64; 3]) -> Option<f64> {
        let r_au = position.iter().map(|c| c * c).sum::<f64>().sqrt() / AU_CM;
        // The central cell sits at r = 0; evaluate it at a tenth of an au.
        let r_au = r_au.max(0.1);
        Some((self.t_1au * r_au.powf(self.t_index)).max(self.t_floor))
    }
}

/// Alignment direction field written to `grainalign_dir.inp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum VectorMorphology {
    Radial,
    Toroidal,
    Vertical,
}

impl VectorMorphology {
    fn direction(self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let v = match self {
            VectorMorphology::Radial => [x, y, z],
            VectorMorphology::Toroidal => [-y, x, 0.0],
            VectorMorphology::Vertical => [0.0, 0.0, 1.0],
        };
        let norm = v.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm > 0.0 {
            v.map(|c| c / norm)
        } else {
            [0.0, 0.0, 0.0]
        }
    }
}

/// Grid stage parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRequest {
    pub ncells: usize,
    /// Half-width of the cubic box in au.
    pub bbox_au: f64,
    pub temperature: bool,
    pub vector_field: Option<VectorMorphology>,
}

impl Default for GridRequest {
    fn default() -> Self {
        Self {
            ncells: 64,
            bbox_au: 200.0,
            temperature: true,
            vector_field: None,
        }
    }
}

/// Fields sampled at cell centers, x varying fastest.
#[derive(Debug, Clone)]
pub struct CartesianGrid {
    pub ncells: usize,
    pub walls: Vec<f64>,
    pub density: Vec<f64>,
    pub temperature: Option<Vec<f64>>,
}

impl CartesianGrid {
    pub fn sample(model: &dyn GridModel, request: &GridRequest) -> Result<Self> {
        let n = request.ncells;
        if n == 0 || request.bbox_au <= 0.0 {
            return Err(PipelineError::configuration(format!(
                "grid needs ncells > 0 and a positive box (got {n} cells, {} au)",
                request.bbox_au
            ))
            .into());
        }
        let half = request.bbox_au * AU_CM;
        let walls: Vec<f64> = (0..=n)
            .map(|i| -half + 2.0 * half * i as f64 / n as f64)
            .collect();
        let centers: Vec<f64> = walls.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();

        let mut density = Vec::with_capacity(n * n * n);
        let mut temperature = request.temperature.then(|| Vec::with_capacity(n * n * n));
        for &z in &centers {
            for &y in &centers {
                for &x in &centers {
                    density.push(model.dust_density([x, y, z]));
                    if let Some(temps) = temperature.as_mut() {
                        let t = model.temperature([x, y, z]).ok_or_else(|| {
                            PipelineError::configuration(format!(
                                "grid model {} has no temperature field",
                                model.name()
                            ))
                        })?;
                        temps.push(t);
                    }
                }
            }
        }
        Ok(Self {
            ncells: n,
            walls,
            density,
            temperature,
        })
    }

    fn centers(&self) -> Vec<f64> {
        self.walls.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    pub fn grid_file(&self) -> Result<String> {
        let n = self.ncells;
        let mut out = String::from("1\n0\n1\n0\n1 1 1\n");
        writeln!(out, "{n} {n} {n}")?;
        for _axis in 0..3 {
            for wall in &self.walls {
                writeln!(out, "{wall:13.6e}")?;
            }
        }
        Ok(out)
    }

    /// Density per species; `split` carries the sootline and the retained
    /// mass fraction inside it.
    pub fn density_file(&self, split: Option<(f64, f64)>) -> Result<String> {
        let nspec = if split.is_some() { 2 } else { 1 };
        let mut out = format!("1\n{}\n{nspec}\n", self.density.len());
        match split {
            None => {
                for d in &self.density {
                    writeln!(out, "{d:13.6e}")?;
                }
            }
            Some((sootline, retained)) => {
                let temps = self.temperature.as_ref().ok_or_else(|| {
                    PipelineError::configuration(
                        "two dust species need a temperature field to place the sootline",
                    )
                })?;
                for (d, t) in self.density.iter().zip(temps) {
                    if *t < sootline {
                        writeln!(out, "{d:13.6e}")?;
                    } else {
                        out.push_str("0\n");
                    }
                }
                for (d, t) in self.density.iter().zip(temps) {
                    if *t < sootline {
                        out.push_str("0\n");
                    } else {
                        writeln!(out, "{:13.6e}", d * retained)?;
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn temperature_file(&self, nspec: usize) -> Result<Option<String>> {
        let Some(temps) = self.temperature.as_ref() else {
            return Ok(None);
        };
        let mut out = format!("1\n{}\n{nspec}\n", temps.len());
        for _ in 0..nspec {
            for t in temps {
                writeln!(out, "{t:13.6e}")?;
            }
        }
        Ok(Some(out))
    }

    pub fn vector_file(&self, morphology: VectorMorphology) -> Result<String> {
        let centers = self.centers();
        let mut out = format!("1\n{}\n", self.density.len());
        for &z in &centers {
            for &y in &centers {
                for &x in &centers {
                    let [vx, vy, vz] = morphology.direction([x, y, z]);
                    writeln!(out, "{vx:13.6e} {vy:13.6e} {vz:13.6e}")?;
                }
            }
        }
        Ok(out)
    }
}

/// Sample `model` and write the grid, density, temperature and optional
/// alignment files.
pub fn write_grid(
    paths: &WorkdirPaths,
    config: &PipelineConfig,
    model: &dyn GridModel,
    request: &GridRequest,
) -> Result<CartesianGrid> {
    let start = Instant::now();
    let grid = CartesianGrid::sample(model, request)?;
    let split = (config.nspec() > 1).then(|| (config.sootline, config.sublimated_mass_fraction()));

    write_atomic(&paths.amr_grid(), grid.grid_file()?.as_bytes())?;
    write_atomic(&paths.dust_density(), grid.density_file(split)?.as_bytes())?;
    if let Some(text) = grid.temperature_file(config.nspec())? {
        write_atomic(&paths.dust_temperature(), text.as_bytes())?;
    }
    if let Some(morphology) = request.vector_field {
        write_atomic(&paths.grain_alignment(), grid.vector_file(morphology)?.as_bytes())?;
    }
    tracing::info!(
        model = model.name(),
        ncells = grid.ncells,
        nspec = config.nspec(),
        elapsed_ms = start.elapsed().as_millis(),
        "grid written"
    );
    Ok(grid)
}

#[cfg(test)]
#[path = "grid_tests.rs"]
mod tests;
