//! Opacity computation over a power-law grain-size distribution.
use super::materials::{Composition, Material};
use super::mie;
use super::nk::{self, NkSource};
use super::{mix, OpacityTable, ScatteringMatrix};
use crate::config::logspace;
use crate::error::PipelineError;
use anyhow::{anyhow, Context, Result};
use num_complex::Complex64;
use rayon::prelude::*;
use std::f64::consts::PI;
use std::time::Instant;

/// Minimum angle samples when a scattering matrix is written.
pub const POLARIZATION_MIN_ANGLES: usize = 181;

/// Grain-size distribution and angular sampling for one computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainSettings {
    /// Grain radii in micron.
    pub amin: f64,
    pub amax: f64,
    /// Power-law slope of dn/da (negative).
    pub q: f64,
    pub na: usize,
    pub nang: usize,
}

impl GrainSettings {
    /// Parameters used when an archive table is unavailable.
    pub fn fallback(amax: f64) -> Self {
        Self {
            amin: 0.1,
            amax,
            q: -3.5,
            na: 100,
            nang: POLARIZATION_MIN_ANGLES,
        }
    }

    pub fn sizes(&self) -> Vec<f64> {
        logspace(self.amin, self.amax, self.na)
    }
}

pub struct Mixer<'a> {
    source: &'a dyn NkSource,
    wavelengths: Vec<f64>,
    threads: usize,
    polarization: bool,
}

/// Size-weighted cross sections accumulated over grain sizes.
struct Accumulator {
    mass: f64,
    cabs: Vec<f64>,
    csca: Vec<f64>,
    gcsca: Vec<f64>,
    z: Vec<[f64; 6]>,
}

impl Accumulator {
    fn zero(nlam: usize, nz: usize) -> Self {
        Self {
            mass: 0.0,
            cabs: vec![0.0; nlam],
            csca: vec![0.0; nlam],
            gcsca: vec![0.0; nlam],
            z: vec![[0.0; 6]; nz],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.mass += other.mass;
        add_into(&mut self.cabs, &other.cabs);
        add_into(&mut self.csca, &other.csca);
        add_into(&mut self.gcsca, &other.gcsca);
        for (row, o) in self.z.iter_mut().zip(&other.z) {
            for (z, v) in row.iter_mut().zip(o) {
                *z += v;
            }
        }
        self
    }
}

fn add_into(acc: &mut [f64], other: &[f64]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
}

impl<'a> Mixer<'a> {
    /// The effective thread count is 1 whenever polarization is requested.
    pub fn new(
        source: &'a dyn NkSource,
        wavelengths: Vec<f64>,
        threads: usize,
        polarization: bool,
    ) -> Self {
        let threads = if polarization { 1 } else { threads.max(1) };
        Self {
            source,
            wavelengths,
            threads,
            polarization,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Scattering angles in degrees spanning 0 through 180.
    pub fn angles(&self, grains: &GrainSettings) -> Vec<f64> {
        let nang = if self.polarization {
            grains.nang.max(POLARIZATION_MIN_ANGLES)
        } else {
            grains.nang.max(2)
        };
        (0..nang)
            .map(|i| 180.0 * i as f64 / (nang - 1) as f64)
            .collect()
    }

    /// Opacity table for a recipe: every listed material is computed, then
    /// the leading ones are combined with the recipe weights.
    pub fn composition_table(
        &self,
        composition: &Composition,
        grains: &GrainSettings,
        name: &str,
    ) -> Result<OpacityTable> {
        let tables = composition
            .materials
            .iter()
            .map(|material| self.material_table(material, grains))
            .collect::<Result<Vec<_>>>()?;
        let parts: Vec<(f64, &OpacityTable)> = composition
            .weights
            .iter()
            .copied()
            .zip(tables.iter())
            .collect();
        tracing::debug!(
            composition = %composition.label(),
            loaded = tables.len(),
            weighted = parts.len(),
            "mixing composition"
        );
        mix(name, &parts)
    }

    pub fn material_table(
        &self,
        material: &Material,
        grains: &GrainSettings,
    ) -> Result<OpacityTable> {
        let start = Instant::now();
        if grains.na == 0 || grains.amin <= 0.0 || grains.amax < grains.amin {
            return Err(PipelineError::configuration(format!(
                "grain sizes need na > 0 and 0 < amin <= amax (got na = {}, amin = {}, amax = {})",
                grains.na, grains.amin, grains.amax
            ))
            .into());
        }
        let index = nk::load(material, self.source)?;
        let density = index
            .density
            .ok_or_else(|| anyhow!("missing density for {}", material.name()))?;
        let refractive = index.sample(&self.wavelengths);
        let sizes = grains.sizes();
        let angles = if self.polarization {
            self.angles(grains)
        } else {
            Vec::new()
        };
        let cos_angles: Vec<f64> = angles.iter().map(|deg| deg.to_radians().cos()).collect();

        let nlam = self.wavelengths.len();
        let nz = nlam * cos_angles.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .context("build mixer thread pool")?;
        let wavelengths = self.wavelengths.as_slice();
        let total = pool.install(|| {
            sizes
                .par_iter()
                .map(|&a| {
                    size_contribution(wavelengths, a, grains.q, density, &refractive, &cos_angles)
                })
                .reduce(|| Accumulator::zero(nlam, nz), Accumulator::merge)
        });

        let table = self.normalize(material.name(), total, angles);
        tracing::info!(
            material = %material.name(),
            na = sizes.len(),
            nlam,
            threads = self.threads,
            elapsed_ms = start.elapsed().as_millis(),
            "opacity computed"
        );
        Ok(table)
    }

    fn normalize(&self, name: String, total: Accumulator, angles: Vec<f64>) -> OpacityTable {
        let mass = total.mass;
        let absorption = total.cabs.iter().map(|c| c / mass).collect();
        let scattering: Vec<f64> = total.csca.iter().map(|c| c / mass).collect();
        let asymmetry = total
            .csca
            .iter()
            .zip(&total.gcsca)
            .map(|(c, gc)| if *c > 0.0 { gc / c } else { 0.0 })
            .collect();
        let matrix = (!angles.is_empty()).then(|| ScatteringMatrix {
            angles,
            elements: total
                .z
                .iter()
                .map(|row| row.map(|v| v / mass))
                .collect(),
        });
        OpacityTable {
            name,
            wavelengths: self.wavelengths.clone(),
            absorption,
            scattering: Some(scattering),
            asymmetry: Some(asymmetry),
            matrix,
        }
    }
}

fn size_contribution(
    wavelengths: &[f64],
    a_um: f64,
    q: f64,
    density: f64,
    refractive: &[Complex64],
    cos_angles: &[f64],
) -> Accumulator {
    let nang = cos_angles.len();
    let mut acc = Accumulator::zero(wavelengths.len(), wavelengths.len() * nang);
    // Log-spaced bins: dn ∝ a^q da = a^(q+1) dln(a).
    let weight = a_um.powf(q + 1.0);
    let a_cm = a_um * 1e-4;
    let area = PI * a_cm * a_cm;
    acc.mass = weight * 4.0 / 3.0 * PI * a_cm.powi(3) * density;

    for (ilam, (&lam, &m)) in wavelengths.iter().zip(refractive).enumerate() {
        let x = 2.0 * PI * a_um / lam;
        let result = mie::solve(x, m, cos_angles);
        let csca = weight * result.qsca * area;
        acc.cabs[ilam] = weight * result.qabs() * area;
        acc.csca[ilam] = csca;
        acc.gcsca[ilam] = csca * result.g;
        if nang > 0 {
            let lam_cm = lam * 1e-4;
            let scale = weight * lam_cm * lam_cm / (4.0 * PI * PI);
            let row = &mut acc.z[ilam * nang..(ilam + 1) * nang];
            for (z, (s1, s2)) in row.iter_mut().zip(result.s1.iter().zip(&result.s2)) {
                *z = mie::mueller(*s1, *s2).map(|v| v * scale);
            }
        }
    }
    acc
}

#[cfg(test)]
#[path = "mixer_tests.rs"]
mod tests;
