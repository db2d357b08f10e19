//! Solver input files generated from the run configuration.
use crate::config::PipelineConfig;
use crate::paths::WorkdirPaths;
use crate::resolver::ArtifactKind;
use crate::util::write_atomic;
use anyhow::{anyhow, Result};
use std::fmt::Write as _;
use std::path::PathBuf;

const SEPARATOR: &str = "---------";

/// Which solver run a configuration file is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverMode {
    Thermal,
    Image,
}

pub fn solver_config(config: &PipelineConfig, mode: SolverMode) -> Result<String> {
    let mut out = String::new();
    let nphot = config.nphot;
    out.push_str("incl_dust = 1\n");
    out.push_str("istar_sphere = 0\n");
    out.push_str("modified_random_walk = 1\n");
    writeln!(out, "setthreads = {}", config.nthreads)?;
    writeln!(out, "nphot = {nphot}")?;
    writeln!(out, "nphot_scat = {nphot}")?;
    writeln!(out, "iseed = {}", config.seed)?;
    writeln!(out, "scattering_mode = {}", config.scattering_mode())?;
    if config.alignment && mode == SolverMode::Image {
        out.push_str("alignment_mode = 1\n");
    }
    Ok(out)
}

pub fn wavelength_grid(config: &PipelineConfig) -> Result<String> {
    let grid = config.wavelength_grid();
    let mut out = format!("{}\n", grid.len());
    for lam in &grid {
        writeln!(out, "{:>13}", format_general(*lam, 6))?;
    }
    Ok(out)
}

/// Single blackbody star; the negative temperature selects blackbody mode.
pub fn stellar_spectrum(config: &PipelineConfig) -> Result<String> {
    let grid = config.wavelength_grid();
    let star = &config.star;
    let mut out = String::from("2\n");
    writeln!(out, "1 {}", grid.len())?;
    writeln!(
        out,
        "{} {} {} {} {}",
        star.radius, star.mass, star.x, star.y, star.z
    )?;
    for lam in &grid {
        writeln!(out, "{:>13}", format_general(*lam, 6))?;
    }
    writeln!(out, "{}", -star.temperature)?;
    Ok(out)
}

pub fn dust_opacity_index(config: &PipelineConfig) -> Result<String> {
    let names = config.opacity_table_names();
    let mut out = String::from("2\n");
    writeln!(out, "{}", names.len())?;
    out.push_str(SEPARATOR);
    out.push('\n');
    for name in &names {
        writeln!(out, "{}", config.input_style())?;
        out.push_str("0\n");
        writeln!(out, "{name}")?;
        out.push_str(SEPARATOR);
        out.push('\n');
    }
    Ok(out)
}

/// Write the generated file for `kind`. Opacity tables come from the mixer
/// or the archive, never from here.
pub fn write_artifact(
    paths: &WorkdirPaths,
    kind: ArtifactKind,
    config: &PipelineConfig,
    mode: SolverMode,
) -> Result<PathBuf> {
    let (path, text) = match kind {
        ArtifactKind::SolverConfig => (paths.solver_config(), solver_config(config, mode)?),
        ArtifactKind::WavelengthGrid => (paths.wavelength_grid(), wavelength_grid(config)?),
        ArtifactKind::StellarSpectrum => (paths.stars(), stellar_spectrum(config)?),
        ArtifactKind::DustOpacityIndex => (paths.dust_opacity_index(), dust_opacity_index(config)?),
        other => return Err(anyhow!("{other} is not generated from the configuration")),
    };
    write_atomic(&path, text.as_bytes())?;
    tracing::info!(artifact = %kind, path = %path.display(), bytes = text.len(), "artifact written");
    Ok(path)
}

/// `%g`-style formatting: `sig` significant digits, fixed notation when the
/// exponent is in `[-4, sig)`, keeping one fractional digit in fixed form.
pub fn format_general(value: f64, sig: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value:.1}");
    }
    let sig = sig.max(1);
    let exponent = format!("{:.*e}", sig - 1, value)
        .split_once('e')
        .and_then(|(_, exp)| exp.parse::<i32>().ok())
        .unwrap_or(0);
    if exponent < -4 || exponent >= sig as i32 {
        let text = format!("{:.*e}", sig - 1, value);
        let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
        let mantissa = trim_fraction(mantissa, false);
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exp.abs());
    }
    let decimals = (sig as i32 - 1 - exponent).max(0) as usize;
    trim_fraction(&format!("{value:.decimals$}"), true)
}

fn trim_fraction(text: &str, keep_one: bool) -> String {
    if !text.contains('.') {
        return if keep_one {
            format!("{text}.0")
        } else {
            text.to_string()
        };
    }
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        if keep_one {
            format!("{trimmed}0")
        } else {
            trimmed.trim_end_matches('.').to_string()
        }
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
#[path = "inputs_tests.rs"]
mod tests;
