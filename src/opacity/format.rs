//! Solver opacity table files.
//!
//! `dustkappa_<name>.inp` holds per-wavelength mass opacities (iformat 1-3).
//! `dustkapscatmat_<name>.inp` additionally carries the scattering matrix on
//! an angle grid (iformat 1).
use super::{OpacityTable, ScatteringMatrix};
use crate::util::write_atomic;
use anyhow::{anyhow, Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const KAPPA_PREFIX: &str = "dustkappa_";
pub const SCATMAT_PREFIX: &str = "dustkapscatmat_";

impl OpacityTable {
    /// File name the solver expects for this table.
    pub fn file_name(&self) -> String {
        let prefix = if self.matrix.is_some() {
            SCATMAT_PREFIX
        } else {
            KAPPA_PREFIX
        };
        format!("{prefix}{}.inp", self.name)
    }
}

/// Write `table` into `dir`, replacing any previous file of the same name.
pub fn write_opacity_file(dir: &Path, table: &OpacityTable) -> Result<PathBuf> {
    if table.is_empty() {
        return Err(anyhow!("opacity table {} has no wavelengths", table.name));
    }
    let path = dir.join(table.file_name());
    let text = render(table)?;
    write_atomic(&path, text.as_bytes())?;
    tracing::debug!(
        path = %path.display(),
        nlam = table.len(),
        bytes = text.len(),
        "opacity table written"
    );
    Ok(path)
}

fn render(table: &OpacityTable) -> Result<String> {
    let mut out = String::new();
    let scattering = table.scattering.as_ref().zip(table.asymmetry.as_ref());
    match &table.matrix {
        Some(matrix) => {
            let (sca, g) =
                scattering.ok_or_else(|| anyhow!("scattering matrix without scattering opacity"))?;
            writeln!(out, "# Opacity and scattering matrix for {}", table.name)?;
            writeln!(out, "1")?;
            writeln!(out, "{}", table.len())?;
            writeln!(out, "{}", matrix.angles.len())?;
            writeln!(out)?;
            write_rows(&mut out, table, sca, g)?;
            writeln!(out)?;
            for angle in &matrix.angles {
                writeln!(out, "{angle:13.6e}")?;
            }
            writeln!(out)?;
            for row in &matrix.elements {
                let cells: Vec<String> = row.iter().map(|z| format!("{z:13.6e}")).collect();
                writeln!(out, "{}", cells.join(" "))?;
            }
        }
        None => match scattering {
            Some((sca, g)) => {
                writeln!(out, "3")?;
                writeln!(out, "{}", table.len())?;
                write_rows(&mut out, table, sca, g)?;
            }
            None => {
                writeln!(out, "1")?;
                writeln!(out, "{}", table.len())?;
                for (lam, kabs) in table.wavelengths.iter().zip(&table.absorption) {
                    writeln!(out, "{lam:13.6e} {kabs:13.6e}")?;
                }
            }
        },
    }
    Ok(out)
}

fn write_rows(out: &mut String, table: &OpacityTable, sca: &[f64], g: &[f64]) -> Result<()> {
    let rows = table
        .wavelengths
        .iter()
        .zip(&table.absorption)
        .zip(sca.iter().zip(g));
    for ((lam, kabs), (ksca, g)) in rows {
        writeln!(out, "{lam:13.6e} {kabs:13.6e} {ksca:13.6e} {g:13.6e}")?;
    }
    Ok(())
}

/// Read a table written by the solver tooling or by `write_opacity_file`.
#[cfg(test)]
pub fn read_opacity_file(path: &Path) -> Result<OpacityTable> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid opacity file name {}", path.display()))?;
    parse_opacity_text(file_name, &text).with_context(|| format!("parse {}", path.display()))
}

/// Parse opacity table text; the table name is derived from `file_name`.
pub fn parse_opacity_text(file_name: &str, text: &str) -> Result<OpacityTable> {
    let stem = file_name.strip_suffix(".inp").unwrap_or(file_name);
    let (name, with_matrix) = if let Some(name) = stem.strip_prefix(SCATMAT_PREFIX) {
        (name, true)
    } else if let Some(name) = stem.strip_prefix(KAPPA_PREFIX) {
        (name, false)
    } else {
        return Err(anyhow!("unrecognized opacity file name {file_name:?}"));
    };

    let mut numbers = Numbers::new(text);
    let iformat = numbers.count("iformat")?;
    let nlam = numbers.count("nlam")?;
    if nlam == 0 {
        return Err(anyhow!("opacity table has no wavelengths"));
    }

    if with_matrix {
        if iformat != 1 {
            return Err(anyhow!("unsupported scattering matrix iformat {iformat}"));
        }
        let nang = numbers.count("nang")?;
        let nrows = nlam
            .checked_mul(nang)
            .ok_or_else(|| anyhow!("scattering matrix of {nlam} x {nang} rows is too large"))?;
        let mut table = read_rows(&mut numbers, name, nlam, 3)?;
        let angles = numbers.take(nang, "angles")?;
        let mut elements = Vec::new();
        for _ in 0..nrows {
            let row = numbers.take(6, "scattering matrix")?;
            elements.push([row[0], row[1], row[2], row[3], row[4], row[5]]);
        }
        table.matrix = Some(ScatteringMatrix { angles, elements });
        Ok(table)
    } else {
        match iformat {
            1..=3 => read_rows(&mut numbers, name, nlam, iformat),
            other => Err(anyhow!("unsupported opacity iformat {other}")),
        }
    }
}

/// Read `nlam` rows holding λ, κ_abs and, with `iformat` ≥ 2, κ_sca, then g.
fn read_rows(numbers: &mut Numbers, name: &str, nlam: usize, iformat: usize) -> Result<OpacityTable> {
    let width = iformat + 1;
    let mut wavelengths = Vec::new();
    let mut absorption = Vec::new();
    let mut scattering = Vec::new();
    let mut asymmetry = Vec::new();
    for _ in 0..nlam {
        let row = numbers.take(width, "opacity row")?;
        wavelengths.push(row[0]);
        absorption.push(row[1]);
        if iformat >= 2 {
            scattering.push(row[2]);
        }
        if iformat >= 3 {
            asymmetry.push(row[3]);
        }
    }
    Ok(OpacityTable {
        name: name.to_string(),
        wavelengths,
        absorption,
        scattering: (iformat >= 2).then_some(scattering),
        asymmetry: match iformat {
            2 => Some(vec![0.0; nlam]),
            3 => Some(asymmetry),
            _ => None,
        },
        matrix: None,
    })
}

/// Whitespace-separated numbers with `#` comment lines removed.
struct Numbers<'a> {
    tokens: Box<dyn Iterator<Item = &'a str> + 'a>,
}

impl<'a> Numbers<'a> {
    fn new(text: &'a str) -> Self {
        let tokens = text
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .flat_map(str::split_whitespace);
        Self {
            tokens: Box::new(tokens),
        }
    }

    fn next(&mut self, what: &str) -> Result<f64> {
        let token = self
            .tokens
            .next()
            .ok_or_else(|| anyhow!("unexpected end of table reading {what}"))?;
        token
            .parse::<f64>()
            .with_context(|| format!("invalid number {token:?} in {what}"))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let value = self.next(what)?;
        if value < 0.0 || value.fract() != 0.0 || value >= usize::MAX as f64 {
            return Err(anyhow!("{what} must be a non-negative integer (got {value})"));
        }
        Ok(value as usize)
    }

    fn take(&mut self, n: usize, what: &str) -> Result<Vec<f64>> {
        (0..n).map(|_| self.next(what)).collect()
    }
}
