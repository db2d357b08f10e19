//! Stage orchestration.
//!
//! Each stage takes a `RunState` snapshot and returns a new one with the
//! stage appended to the step log. Before the solver runs, the solver inputs
//! are regenerated exactly when `must_generate` asks for it; after every
//! external call the transcript is appended to the shared log and classified.
use crate::archive::{download_to, OpacityArchive};
use crate::config::{PipelineConfig, GROWN_DUST_AMAX_UM};
use crate::error::{is_fetch_failure, pipeline_error, PipelineError};
use crate::grid::{write_grid, GridModel, GridRequest};
use crate::inputs::{write_artifact, SolverMode};
use crate::opacity::nk::ArchiveNkSource;
use crate::opacity::{write_opacity_file, Composition, GrainSettings, Mixer, OpacityTable};
use crate::paths::{WorkdirPaths, DEFAULT_SCRIPT};
use crate::process::{
    append_log, classify, default_predicates, FailurePredicate, ProcessRequest, ProcessRunner,
};
use crate::resolver::{must_generate, ArtifactKind};
use crate::script::{ObservationScript, ParsedScript};
use crate::steps::{RunStatus, Step, StepLog};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const SOLVER_PROGRAM: &str = "radmc3d";
pub const OBSERVER_PROGRAM: &str = "casa";

/// Configuration snapshot, completed steps and the tables mixed in this run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub config: PipelineConfig,
    pub steps: StepLog,
    pub mixtures: Vec<OpacityTable>,
}

impl RunState {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            steps: StepLog::new(),
            mixtures: Vec::new(),
        }
    }

    fn with_config(self, config: PipelineConfig) -> Self {
        Self { config, ..self }
    }

    fn completed(self, step: Step) -> Self {
        let steps = self.steps.with(step);
        Self { steps, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpacityRequest {
    pub material: Option<String>,
    pub grains: GrainSettings,
}

impl OpacityRequest {
    /// Grain settings from the configuration with the default binning.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            material: None,
            grains: GrainSettings {
                amin: config.amin,
                q: config.q,
                ..GrainSettings::fallback(config.amax)
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonteCarloRequest {
    pub nphot: Option<u64>,
    /// Extra solver arguments, shell-quoted.
    pub extra_args: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaytraceRequest {
    pub lam: Option<f64>,
    pub incl: Option<f64>,
    pub npix: Option<u32>,
    pub sizeau: Option<f64>,
    pub noscat: bool,
    /// Optical depth of a 2-D tau surface to render alongside the image.
    pub tau_surface: Option<f64>,
    pub tau_surface_3d: bool,
    pub extra_args: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynobsRequest {
    /// Existing script path or URL; a template is written when absent.
    pub script: Option<String>,
    pub obstime_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageRequest {
    Grid(GridRequest),
    Opacity(OpacityRequest),
    MonteCarlo(MonteCarloRequest),
    Raytrace(RaytraceRequest),
    Synobs(SynobsRequest),
}

impl StageRequest {
    pub fn step(&self) -> Step {
        match self {
            StageRequest::Grid(_) => Step::Grid,
            StageRequest::Opacity(_) => Step::Dustmixer,
            StageRequest::MonteCarlo(_) => Step::MonteCarlo,
            StageRequest::Raytrace(_) => Step::Raytrace,
            StageRequest::Synobs(_) => Step::Synobs,
        }
    }
}

/// Outcome of `run_stages`, persisted as `synthesizer_run.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub completed: StepLog,
    pub failed_stage: Option<Step>,
    pub error: Option<String>,
    pub elapsed_ms: u128,
}

pub struct Pipeline<'a> {
    paths: WorkdirPaths,
    runner: &'a dyn ProcessRunner,
    archive: &'a dyn OpacityArchive,
    model: &'a dyn GridModel,
    predicates: Vec<FailurePredicate>,
    solver: String,
    observer: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        workdir: PathBuf,
        runner: &'a dyn ProcessRunner,
        archive: &'a dyn OpacityArchive,
        model: &'a dyn GridModel,
    ) -> Result<Self> {
        Ok(Self {
            paths: WorkdirPaths::new(workdir),
            runner,
            archive,
            model,
            predicates: default_predicates()?,
            solver: SOLVER_PROGRAM.to_string(),
            observer: OBSERVER_PROGRAM.to_string(),
        })
    }

    pub fn with_predicates(mut self, predicates: Vec<FailurePredicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_programs(mut self, solver: &str, observer: &str) -> Self {
        self.solver = solver.to_string();
        self.observer = observer.to_string();
        self
    }

    pub fn paths(&self) -> &WorkdirPaths {
        &self.paths
    }

    /// Run `stages` in order, stopping at the first failure. The report is
    /// written either way.
    pub fn run_stages(&self, config: PipelineConfig, stages: &[StageRequest]) -> Result<RunState> {
        let start = Instant::now();
        let status = RunStatus::NotRun
            .start()
            .ok_or_else(|| anyhow!("run already started"))?;
        tracing::info!(stages = stages.len(), workdir = %self.paths.root().display(), "run started");

        let mut state = RunState::new(config);
        let mut failure = None;
        for request in stages {
            match self.run_stage(state.clone(), request) {
                Ok(next) => state = next,
                Err(err) => {
                    failure = Some((request.step(), err));
                    break;
                }
            }
        }

        let status = status
            .finish(failure.is_none())
            .ok_or_else(|| anyhow!("run status {status} cannot finish"))?;
        let report = RunReport {
            status,
            completed: state.steps.clone(),
            failed_stage: failure.as_ref().map(|(step, _)| *step),
            error: failure.as_ref().map(|(_, err)| format!("{err:#}")),
            elapsed_ms: start.elapsed().as_millis(),
        };
        self.write_report(&report)?;
        tracing::info!(
            status = %report.status,
            completed = report.completed.as_slice().len(),
            elapsed_ms = report.elapsed_ms,
            "run finished"
        );
        match failure {
            Some((step, err)) => Err(err.context(format!("stage {step} failed"))),
            None => Ok(state),
        }
    }

    fn run_stage(&self, state: RunState, request: &StageRequest) -> Result<RunState> {
        match request {
            StageRequest::Grid(request) => self.grid(state, request),
            StageRequest::Opacity(request) => self.dust_opacity(state, request),
            StageRequest::MonteCarlo(request) => self.monte_carlo(state, request),
            StageRequest::Raytrace(request) => self.raytrace(state, request),
            StageRequest::Synobs(request) => self.synthetic_observation(state, request),
        }
    }

    fn write_report(&self, report: &RunReport) -> Result<()> {
        let path = self.paths.run_report();
        let text = serde_json::to_string_pretty(report).context("serialize run report")?;
        fs::write(&path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn grid(&self, state: RunState, request: &GridRequest) -> Result<RunState> {
        let start = Instant::now();
        write_grid(&self.paths, &state.config, self.model, request)?;
        tracing::info!(stage = %Step::Grid, elapsed_ms = start.elapsed().as_millis(), "stage done");
        Ok(state.completed(Step::Grid))
    }

    /// Compute the opacity table of every dust species and write them.
    pub fn dust_opacity(&self, state: RunState, request: &OpacityRequest) -> Result<RunState> {
        let start = Instant::now();
        let grains = request.grains;
        let config = state
            .config
            .clone()
            .with_material(request.material.clone())
            .with_grains(grains.amin, grains.amax, grains.q);
        if config.alignment {
            return Err(PipelineError::unsupported(
                "grain alignment efficiency tables (dustkapalignfact_*.inp)",
            )
            .into());
        }

        let source = ArchiveNkSource::new(self.archive);
        let mixer = Mixer::new(
            &source,
            config.wavelength_grid(),
            config.mixer_threads(),
            config.polarized(),
        );
        let mut mixtures = Vec::new();
        let species = config
            .species_compositions()
            .into_iter()
            .zip(config.opacity_table_names());
        for (index, (code, name)) in species.enumerate() {
            let composition = Composition::parse(&code)?;
            let grains = if index > 0 && config.dgrowth {
                GrainSettings {
                    amax: GROWN_DUST_AMAX_UM,
                    ..grains
                }
            } else {
                grains
            };
            let table = mixer.composition_table(&composition, &grains, &name)?;
            let path = write_opacity_file(self.paths.root(), &table)?;
            tracing::info!(composition = %code, path = %path.display(), "opacity table written");
            mixtures.push(table);
        }

        tracing::info!(
            stage = %Step::Dustmixer,
            species = mixtures.len(),
            threads = mixer.threads(),
            elapsed_ms = start.elapsed().as_millis(),
            "stage done"
        );
        Ok(RunState {
            config,
            steps: state.steps.with(Step::Dustmixer),
            mixtures,
        })
    }

    pub fn monte_carlo(&self, state: RunState, request: &MonteCarloRequest) -> Result<RunState> {
        let start = Instant::now();
        let config = state.config.clone().with_photons(request.nphot);
        let state = self.prepare_solver_inputs(state.with_config(config), SolverMode::Thermal)?;
        self.require(&[
            ("grid", self.paths.amr_grid()),
            ("dust density", self.paths.dust_density()),
        ])?;

        let mut args = vec!["mctherm".to_string()];
        args.extend(split_args(&request.extra_args)?);
        self.run_external(&self.solver, args)?;
        tracing::info!(
            stage = %Step::MonteCarlo,
            nphot = state.config.nphot,
            elapsed_ms = start.elapsed().as_millis(),
            "stage done"
        );
        Ok(state.completed(Step::MonteCarlo))
    }

    pub fn raytrace(&self, state: RunState, request: &RaytraceRequest) -> Result<RunState> {
        let start = Instant::now();
        if request.tau_surface_3d {
            return Err(PipelineError::unsupported("3-D tau-surface rendering").into());
        }
        let config = state
            .config
            .clone()
            .with_wavelength(request.lam)
            .with_inclination(request.incl)
            .with_npix(request.npix)
            .with_sizeau(request.sizeau);
        let state = self.prepare_solver_inputs(state.with_config(config), SolverMode::Image)?;
        let config = &state.config;

        if config.alignment && !self.paths.grain_alignment().is_file() {
            return Err(PipelineError::unsupported(format!(
                "grain alignment without a direction field ({} is missing)",
                self.paths.grain_alignment().display()
            ))
            .into());
        }
        let mut required = vec![
            ("grid", self.paths.amr_grid()),
            ("dust density", self.paths.dust_density()),
            ("dust temperature", self.paths.dust_temperature()),
        ];
        for kind in ArtifactKind::SOLVER_INPUTS {
            if kind == ArtifactKind::AlignmentTable && !config.alignment {
                continue;
            }
            for path in self.paths.artifact_files(kind, config) {
                required.push((kind.as_str(), path));
            }
        }
        self.require(&required)?;

        if let Some(tau) = request.tau_surface {
            self.tau_surface(config, tau)?;
        }

        let mut args = vec!["image".to_string(), "lambda".to_string(), config.lam.to_string()];
        args.extend(view_args(config));
        if config.polarized() {
            args.push("stokes".to_string());
        }
        if request.noscat {
            args.push("noscat".to_string());
        }
        args.extend(split_args(&request.extra_args)?);
        self.run_external(&self.solver, args)?;

        tracing::info!(
            stage = %Step::Raytrace,
            lam = config.lam,
            elapsed_ms = start.elapsed().as_millis(),
            "stage done"
        );
        Ok(state.completed(Step::Raytrace))
    }

    /// Render the tau surface and move it aside before the image overwrites
    /// `image.out`. Failures other than interruption only warn.
    fn tau_surface(&self, config: &PipelineConfig, tau: f64) -> Result<()> {
        let mut args = vec![
            "tausurf".to_string(),
            tau.to_string(),
            "lambda".to_string(),
            config.lam.to_string(),
        ];
        args.extend(view_args(config));
        args.push("noscat".to_string());
        let rendered = self.run_external(&self.solver, args).and_then(|()| {
            fs::rename(self.paths.image(), self.paths.tau_image())
                .with_context(|| format!("rename {}", self.paths.image().display()))
        });
        match rendered {
            Ok(()) => Ok(()),
            Err(err) if matches!(pipeline_error(&err), Some(PipelineError::Interrupted { .. })) => {
                Err(err)
            }
            Err(err) => {
                tracing::warn!(tau, error = %format!("{err:#}"), "unable to render tau surface");
                Ok(())
            }
        }
    }

    pub fn synthetic_observation(
        &self,
        state: RunState,
        request: &SynobsRequest,
    ) -> Result<RunState> {
        let start = Instant::now();
        let config = &state.config;
        let (script_path, sky_models) = match request.script.as_deref() {
            None => {
                let mut script = ObservationScript::template(config.lam, config.polarized())
                    .with_npix(config.npix);
                if let Some(hours) = request.obstime_hours {
                    script = script.with_totaltime_hours(hours);
                }
                let path = self.paths.join(DEFAULT_SCRIPT);
                script.write(&path)?;
                tracing::info!(path = %path.display(), "observation script written");
                (path, script.sky_models())
            }
            Some(source) => {
                let path = self.resolve_script(source)?;
                let parsed = ParsedScript::read(&path)?;
                (path, parsed.sky_models())
            }
        };

        let required: Vec<(&str, PathBuf)> = sky_models
            .iter()
            .map(|model| ("sky model", self.paths.join(model)))
            .collect();
        self.require(&required)?;

        let args = vec![
            "-c".to_string(),
            script_path.display().to_string(),
            "--nologger".to_string(),
        ];
        self.run_external(&self.observer, args)?;
        tracing::info!(
            stage = %Step::Synobs,
            script = %script_path.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "stage done"
        );
        Ok(state.completed(Step::Synobs))
    }

    /// Local script path, or a URL downloaded into the working directory.
    fn resolve_script(&self, source: &str) -> Result<PathBuf> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let name = source
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_SCRIPT);
            return download_to(self.archive, source, &self.paths.join(name));
        }
        let path = Path::new(source);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.join(source)
        })
    }

    /// Regenerate the solver inputs `must_generate` selects, in order.
    pub fn prepare_solver_inputs(&self, state: RunState, mode: SolverMode) -> Result<RunState> {
        let mut state = state;
        for kind in ArtifactKind::SOLVER_INPUTS {
            if kind == ArtifactKind::AlignmentTable && !state.config.alignment {
                continue;
            }
            let exists = self.paths.artifact_exists(kind, &state.config);
            if !must_generate(kind, exists, state.config.overwrite, &state.steps) {
                tracing::debug!(artifact = %kind, "artifact is current");
                continue;
            }
            state = match kind {
                ArtifactKind::DustOpacityTable => self.provide_opacity_tables(state)?,
                ArtifactKind::AlignmentTable => {
                    return Err(PipelineError::unsupported(
                        "grain alignment efficiency tables (dustkapalignfact_*.inp)",
                    )
                    .into());
                }
                _ => {
                    write_artifact(&self.paths, kind, &state.config, mode)?;
                    state
                }
            };
        }
        Ok(state)
    }

    /// Tables mixed earlier in this run win; otherwise download them, and
    /// fall back to the mixer when the archive cannot serve them.
    fn provide_opacity_tables(&self, state: RunState) -> Result<RunState> {
        if state.steps.contains(Step::Dustmixer) {
            let expected = state.config.opacity_file_names();
            let written = state
                .mixtures
                .iter()
                .map(|table| write_opacity_file(self.paths.root(), table))
                .collect::<Result<Vec<_>>>()?;
            tracing::info!(tables = written.len(), "opacity tables rewritten from this run");
            for (name, path) in expected.iter().zip(self.paths.opacity_tables(&state.config)) {
                if !path.is_file() {
                    return Err(PipelineError::missing(format!("opacity table {name}"), path).into());
                }
            }
            return Ok(state);
        }

        let names = state.config.opacity_file_names();
        if state.config.polarized() {
            // The archive serves no scattering matrices.
            let path = self
                .paths
                .opacity_tables(&state.config)
                .into_iter()
                .find(|path| !path.is_file())
                .unwrap_or_else(|| self.paths.root().to_path_buf());
            return Err(PipelineError::missing("polarized opacity table", path).into());
        }
        for name in &names {
            match self.archive.fetch_table(name) {
                Ok(table) => {
                    write_opacity_file(self.paths.root(), &table)?;
                    tracing::info!(table = %name, "opacity table downloaded");
                }
                Err(err) if is_fetch_failure(&err) => {
                    tracing::warn!(
                        table = %name,
                        error = %format!("{err:#}"),
                        "opacity download failed, computing with default grain settings"
                    );
                    let request = OpacityRequest {
                        material: None,
                        grains: GrainSettings::fallback(state.config.amax),
                    };
                    return self.dust_opacity(state, &request);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(state)
    }

    fn require(&self, files: &[(&str, PathBuf)]) -> Result<()> {
        for (artifact, path) in files {
            if !path.is_file() {
                tracing::error!(artifact, path = %path.display(), "required input missing");
                return Err(PipelineError::missing(*artifact, path.clone()).into());
            }
        }
        Ok(())
    }

    fn run_external(&self, program: &str, args: Vec<String>) -> Result<()> {
        let request = ProcessRequest::new(program, args, self.paths.root());
        let result = self.runner.run(&request)?;
        append_log(&self.paths.solver_log(), &result)?;
        classify(&result, &self.predicates)
    }
}

fn view_args(config: &PipelineConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(incl) = config.incl {
        args.extend(["incl".to_string(), incl.to_string()]);
    }
    if let Some(npix) = config.npix {
        args.extend(["npix".to_string(), npix.to_string()]);
    }
    if let Some(sizeau) = config.sizeau {
        args.extend(["sizeau".to_string(), sizeau.to_string()]);
    }
    args
}

fn split_args(extra: &str) -> Result<Vec<String>> {
    shell_words::split(extra).with_context(|| format!("parse extra solver arguments {extra:?}"))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
