//! Artifact freshness decisions.
//!
//! Pure and I/O free: callers probe the filesystem and pass the result in.
use crate::steps::{Step, StepLog};
use serde::Serialize;
use std::fmt;

/// Solver input artifacts the orchestrator may regenerate before a solver call.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    SolverConfig,
    WavelengthGrid,
    StellarSpectrum,
    DustOpacityIndex,
    DustOpacityTable,
    AlignmentTable,
}

impl ArtifactKind {
    /// Regeneration order used before `monte_carlo` and `raytrace`.
    pub const SOLVER_INPUTS: [ArtifactKind; 6] = [
        ArtifactKind::SolverConfig,
        ArtifactKind::WavelengthGrid,
        ArtifactKind::StellarSpectrum,
        ArtifactKind::DustOpacityIndex,
        ArtifactKind::DustOpacityTable,
        ArtifactKind::AlignmentTable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::SolverConfig => "solver_config",
            ArtifactKind::WavelengthGrid => "wavelength_grid",
            ArtifactKind::StellarSpectrum => "stellar_spectrum",
            ArtifactKind::DustOpacityIndex => "dust_opacity_index",
            ArtifactKind::DustOpacityTable => "dust_opacity_table",
            ArtifactKind::AlignmentTable => "alignment_table",
        }
    }

    /// Artifacts whose content the dust mixer produces.
    pub fn is_opacity(&self) -> bool {
        matches!(
            self,
            ArtifactKind::DustOpacityIndex | ArtifactKind::DustOpacityTable
        )
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether an artifact has to be (re)generated.
///
/// Once `dustmixer` has completed in this run, opacity artifacts are always
/// regenerated so freshly computed tables are never shadowed by files
/// already on disk.
pub fn must_generate(
    kind: ArtifactKind,
    path_exists: bool,
    overwrite: bool,
    completed: &StepLog,
) -> bool {
    !path_exists || overwrite || (kind.is_opacity() && completed.contains(Step::Dustmixer))
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
