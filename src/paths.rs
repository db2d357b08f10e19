//! Typed paths into a pipeline working directory.
//!
//! The solver reads and writes fixed file names relative to its working
//! directory; every stage locates artifacts through `WorkdirPaths`.
use crate::config::PipelineConfig;
use crate::resolver::ArtifactKind;
use std::path::{Path, PathBuf};

/// Solver and observer log, appended across stages.
pub const SOLVER_LOG: &str = "radmc3d.out";
pub const RUN_REPORT: &str = "synthesizer_run.json";
pub const DEFAULT_SCRIPT: &str = "casa_script.py";

#[derive(Debug, Clone)]
pub struct WorkdirPaths {
    root: PathBuf,
}

impl WorkdirPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn solver_config(&self) -> PathBuf {
        self.join("radmc3d.inp")
    }

    pub fn wavelength_grid(&self) -> PathBuf {
        self.join("wavelength_micron.inp")
    }

    pub fn stars(&self) -> PathBuf {
        self.join("stars.inp")
    }

    pub fn dust_opacity_index(&self) -> PathBuf {
        self.join("dustopac.inp")
    }

    pub fn amr_grid(&self) -> PathBuf {
        self.join("amr_grid.inp")
    }

    pub fn dust_density(&self) -> PathBuf {
        self.join("dust_density.inp")
    }

    pub fn dust_temperature(&self) -> PathBuf {
        self.join("dust_temperature.dat")
    }

    pub fn grain_alignment(&self) -> PathBuf {
        self.join("grainalign_dir.inp")
    }

    pub fn solver_log(&self) -> PathBuf {
        self.join(SOLVER_LOG)
    }

    pub fn image(&self) -> PathBuf {
        self.join("image.out")
    }

    pub fn tau_image(&self) -> PathBuf {
        self.join("tauimage.out")
    }

    pub fn run_report(&self) -> PathBuf {
        self.join(RUN_REPORT)
    }

    /// Opacity tables named by the configuration, one per species.
    pub fn opacity_tables(&self, config: &PipelineConfig) -> Vec<PathBuf> {
        config
            .opacity_file_names()
            .iter()
            .map(|name| self.join(name))
            .collect()
    }

    pub fn alignment_tables(&self, config: &PipelineConfig) -> Vec<PathBuf> {
        config
            .opacity_table_names()
            .iter()
            .map(|name| self.join(&format!("dustkapalignfact_{name}.inp")))
            .collect()
    }

    /// Every file backing `kind`; an artifact exists only when all of them do.
    pub fn artifact_files(&self, kind: ArtifactKind, config: &PipelineConfig) -> Vec<PathBuf> {
        match kind {
            ArtifactKind::SolverConfig => vec![self.solver_config()],
            ArtifactKind::WavelengthGrid => vec![self.wavelength_grid()],
            ArtifactKind::StellarSpectrum => vec![self.stars()],
            ArtifactKind::DustOpacityIndex => vec![self.dust_opacity_index()],
            ArtifactKind::DustOpacityTable => self.opacity_tables(config),
            ArtifactKind::AlignmentTable => self.alignment_tables(config),
        }
    }

    pub fn artifact_exists(&self, kind: ArtifactKind, config: &PipelineConfig) -> bool {
        self.artifact_files(kind, config).iter().all(|p| p.is_file())
    }
}
