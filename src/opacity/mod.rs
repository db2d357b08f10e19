//! Dust opacity tables and their weighted combination.
//!
//! A table holds per-wavelength mass cross sections (cm^2/g) for one dust
//! composition. Tables for a multi-material composition are combined with
//! recipe-fixed mass fractions; combining is only defined on a shared
//! wavelength grid.
mod format;
mod materials;
pub mod mie;
mod mixer;
pub mod nk;

#[cfg(test)]
pub use format::read_opacity_file;
pub use format::{parse_opacity_text, write_opacity_file};
pub use materials::Composition;
pub use mixer::{GrainSettings, Mixer};

use crate::error::PipelineError;
use anyhow::Result;

/// Scattering matrix sampled on an angle grid, one row of
/// `[Z11, Z12, Z22, Z33, Z34, Z44]` per (wavelength, angle) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatteringMatrix {
    /// Scattering angles in degrees, 0 through 180.
    pub angles: Vec<f64>,
    /// Row-major by wavelength, then angle.
    pub elements: Vec<[f64; 6]>,
}

impl ScatteringMatrix {
    #[cfg(test)]
    pub fn at(&self, ilam: usize, iang: usize) -> &[f64; 6] {
        &self.elements[ilam * self.angles.len() + iang]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpacityTable {
    /// Stem used in the table file name, e.g. `sg-a10um`.
    pub name: String,
    /// Wavelengths in micron.
    pub wavelengths: Vec<f64>,
    pub absorption: Vec<f64>,
    pub scattering: Option<Vec<f64>>,
    /// Asymmetry parameter, present together with `scattering`.
    pub asymmetry: Option<Vec<f64>>,
    /// Present only for polarized transfer.
    pub matrix: Option<ScatteringMatrix>,
}

impl OpacityTable {
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// Extinction (absorption plus scattering) per wavelength.
    pub fn extinction(&self) -> Vec<f64> {
        match &self.scattering {
            Some(sca) => self
                .absorption
                .iter()
                .zip(sca)
                .map(|(abs, sca)| abs + sca)
                .collect(),
            None => self.absorption.clone(),
        }
    }

    /// Extinction at `lam` (micron), interpolated linearly in log-wavelength.
    pub fn extinction_at(&self, lam: f64) -> Option<f64> {
        let ext = self.extinction();
        interpolate_log(&self.wavelengths, &ext, lam)
    }
}

/// Weighted elementwise sum `Σ w_i · table_i` over tables sharing one grid.
///
/// Absorption, scattering and matrix elements are summed directly; the
/// asymmetry parameter is averaged with the weighted scattering opacity so a
/// single component with weight 1 reproduces its own table exactly.
pub fn mix(name: &str, parts: &[(f64, &OpacityTable)]) -> Result<OpacityTable> {
    let Some((_, first)) = parts.first() else {
        return Err(PipelineError::configuration("cannot mix an empty composition").into());
    };
    for (_, table) in &parts[1..] {
        if table.wavelengths != first.wavelengths {
            return Err(PipelineError::MismatchedGrid {
                left: first.len(),
                right: table.len(),
            }
            .into());
        }
    }

    let n = first.len();
    let mut absorption = vec![0.0; n];
    for (weight, table) in parts {
        for (acc, value) in absorption.iter_mut().zip(&table.absorption) {
            *acc += weight * value;
        }
    }

    let with_scattering = parts.iter().all(|(_, t)| t.scattering.is_some());
    let (scattering, asymmetry) = if with_scattering {
        let mut sca = vec![0.0; n];
        let mut g_sca = vec![0.0; n];
        for (weight, table) in parts {
            let (Some(t_sca), t_g) = (&table.scattering, &table.asymmetry) else {
                continue;
            };
            for (i, (s, gs)) in sca.iter_mut().zip(g_sca.iter_mut()).enumerate() {
                let weighted = weight * t_sca[i];
                *s += weighted;
                *gs += weighted * t_g.as_ref().map_or(0.0, |g| g[i]);
            }
        }
        let g = sca
            .iter()
            .zip(&g_sca)
            .map(|(s, gs)| if *s > 0.0 { gs / s } else { 0.0 })
            .collect();
        (Some(sca), Some(g))
    } else {
        (None, None)
    };

    let matrix = mix_matrices(parts)?;

    Ok(OpacityTable {
        name: name.to_string(),
        wavelengths: first.wavelengths.clone(),
        absorption,
        scattering,
        asymmetry,
        matrix,
    })
}

fn mix_matrices(parts: &[(f64, &OpacityTable)]) -> Result<Option<ScatteringMatrix>> {
    let present = parts.iter().filter(|(_, t)| t.matrix.is_some()).count();
    if present == 0 {
        return Ok(None);
    }
    if present != parts.len() {
        return Err(PipelineError::configuration(
            "cannot mix tables with and without scattering matrices",
        )
        .into());
    }
    let mut mixed: Option<ScatteringMatrix> = None;
    for (weight, table) in parts {
        let Some(matrix) = &table.matrix else {
            continue;
        };
        match mixed.as_mut() {
            None => {
                let elements = matrix
                    .elements
                    .iter()
                    .map(|row| row.map(|z| weight * z))
                    .collect();
                mixed = Some(ScatteringMatrix {
                    angles: matrix.angles.clone(),
                    elements,
                });
            }
            Some(acc) => {
                if acc.angles != matrix.angles {
                    return Err(PipelineError::configuration(
                        "cannot mix scattering matrices on different angle grids",
                    )
                    .into());
                }
                for (row, other) in acc.elements.iter_mut().zip(&matrix.elements) {
                    for (z, o) in row.iter_mut().zip(other) {
                        *z += weight * o;
                    }
                }
            }
        }
    }
    Ok(mixed)
}

fn interpolate_log(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    if xs.is_empty() || xs.len() != ys.len() || x <= 0.0 {
        return None;
    }
    if x <= xs[0] {
        return Some(ys[0]);
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return Some(ys[last]);
    }
    let hi = xs.partition_point(|v| *v < x);
    let lo = hi - 1;
    let t = (x.ln() - xs[lo].ln()) / (xs[hi].ln() - xs[lo].ln());
    Some(ys[lo] + t * (ys[hi] - ys[lo]))
}

#[cfg(test)]
#[path = "mix_tests.rs"]
mod tests;
