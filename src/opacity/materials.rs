use crate::error::PipelineError;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// A base material with a refractive-index spectrum.
#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    Silicate,
    Graphite,
    Pyroxene,
    Organics,
    /// User-supplied refractive-index file.
    Custom(PathBuf),
}

impl Material {
    pub fn name(&self) -> String {
        match self {
            Material::Silicate => "Silicate".to_string(),
            Material::Graphite => "Graphite".to_string(),
            Material::Pyroxene => "Pyroxene".to_string(),
            Material::Organics => "Organics".to_string(),
            Material::Custom(path) => file_stem(path),
        }
    }

    /// Archive file holding the refractive index, for catalog materials.
    pub fn archive_file(&self) -> Option<&'static str> {
        match self {
            Material::Silicate => Some("astrosil-Draine2003.lnk"),
            Material::Graphite => Some("c-gra-Draine2003.lnk"),
            Material::Pyroxene => Some("pyr-mg70-Dorschner1995.lnk"),
            Material::Organics => Some("organics-Pollack1995.nk"),
            Material::Custom(_) => None,
        }
    }

    /// Bulk density in g/cm^3 for catalog materials.
    pub fn density(&self) -> Option<f64> {
        match self {
            Material::Silicate => Some(3.5),
            Material::Graphite => Some(2.24),
            Material::Pyroxene => Some(3.01),
            Material::Organics => Some(1.5),
            Material::Custom(_) => None,
        }
    }

    /// Factor converting the table's wavelength column to micron.
    pub fn wavelength_scale(&self) -> f64 {
        match self {
            Material::Organics => 1e6,
            _ => 1.0,
        }
    }
}

/// A named dust recipe: the materials to compute and the fixed mass
/// fractions applied to the leading ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub code: String,
    pub materials: Vec<Material>,
    pub weights: Vec<f64>,
}

impl Composition {
    /// Resolve a material code, recipe name or refractive-index file path.
    pub fn parse(code: &str) -> Result<Self> {
        let (materials, weights) = match code {
            "s" => (vec![Material::Silicate], vec![1.0]),
            "g" => (vec![Material::Graphite], vec![1.0]),
            "p" => (vec![Material::Pyroxene], vec![1.0]),
            "o" => (vec![Material::Organics], vec![1.0]),
            "sg" => (vec![Material::Silicate, Material::Graphite], vec![0.625, 0.375]),
            // Organics are computed but carry no weight in the mixture.
            "sgo" => (
                vec![Material::Silicate, Material::Graphite, Material::Organics],
                vec![0.625, 0.375],
            ),
            other => {
                let path = Path::new(other);
                if !path.is_file() {
                    return Err(PipelineError::configuration(format!(
                        "material {other:?} not found"
                    ))
                    .into());
                }
                (vec![Material::Custom(path.to_path_buf())], vec![1.0])
            }
        };
        Ok(Self {
            code: code.to_string(),
            materials,
            weights,
        })
    }

    /// Name used for table files: the code itself, or the file stem for
    /// user-supplied refractive-index files.
    pub fn label_for(code: &str) -> String {
        match code {
            "s" | "g" | "p" | "o" | "sg" | "sgo" => code.to_string(),
            other => file_stem(Path::new(other)),
        }
    }

    pub fn label(&self) -> String {
        Self::label_for(&self.code)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
