//! CLI argument parsing for the pipeline driver.
//!
//! Flags only build the initial `PipelineConfig` and the ordered stage
//! requests; everything else lives in the pipeline.
use crate::config::{load_config, PipelineConfig};
use crate::grid::{GridRequest, VectorMorphology};
use crate::opacity::GrainSettings;
use crate::pipeline::{
    MonteCarloRequest, OpacityRequest, RaytraceRequest, StageRequest, SynobsRequest,
};
use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "synthesizer",
    version,
    about = "Dust opacities, radiative transfer and synthetic observations",
    after_help = "Commands:\n  run --grid --opacity --monte-carlo --raytrace --synobs  Run the selected stages in order\n  opacity --material <code>                               Compute opacity tables only\n  script --out <file> | --read <file>                     Write or inspect an observation script\n\nExamples:\n  synthesizer run --grid --monte-carlo --raytrace --lam 1300 --npix 200\n  synthesizer run --opacity --monte-carlo --material sgo --csubl 50\n  synthesizer opacity --material s --amax 100 --nthreads 4\n  synthesizer script --read casa_script.py",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log at debug level (SYNTHESIZER_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Opacity(OpacityArgs),
    Script(ScriptArgs),
}

/// Settings shared by every command that builds a configuration.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON configuration loaded before the flags below are applied
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Material code (s, g, p, o), recipe (sg, sgo) or refractive-index file
    #[arg(long, value_name = "CODE")]
    pub material: Option<String>,

    /// Minimum grain size in micron
    #[arg(long)]
    pub amin: Option<f64>,

    /// Maximum grain size in micron
    #[arg(long)]
    pub amax: Option<f64>,

    /// Slope of the grain size distribution
    #[arg(long, allow_negative_numbers = true)]
    pub q: Option<f64>,

    /// Wavelength grid bounds in micron and number of samples
    #[arg(long)]
    pub lmin: Option<f64>,
    #[arg(long)]
    pub lmax: Option<f64>,
    #[arg(long)]
    pub nlam: Option<usize>,

    /// Observing wavelength in micron
    #[arg(long)]
    pub lam: Option<f64>,

    /// Carbon sublimation percentage; enables a second dust species
    #[arg(long)]
    pub csubl: Option<f64>,

    /// Sublimation temperature in K
    #[arg(long)]
    pub sootline: Option<f64>,

    /// Grow the second species to 1 mm grains
    #[arg(long)]
    pub dgrowth: bool,

    /// Photon packages for the thermal Monte Carlo
    #[arg(long)]
    pub nphot: Option<u64>,

    /// Threads for the mixer and the solver
    #[arg(long)]
    pub nthreads: Option<usize>,

    /// Include polarization (scattering matrices)
    #[arg(long)]
    pub polarization: bool,

    /// Include grain alignment (implies polarization)
    #[arg(long)]
    pub alignment: bool,

    /// Regenerate solver inputs even if they exist
    #[arg(long)]
    pub overwrite: bool,
}

impl ConfigArgs {
    /// Defaults, then the optional config file, then the flags.
    pub fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(material) = &self.material {
            config.material = material.clone();
        }
        set(&mut config.amin, self.amin);
        set(&mut config.amax, self.amax);
        set(&mut config.q, self.q);
        set(&mut config.lmin, self.lmin);
        set(&mut config.lmax, self.lmax);
        set(&mut config.nlam, self.nlam);
        set(&mut config.lam, self.lam);
        set(&mut config.csubl, self.csubl);
        set(&mut config.sootline, self.sootline);
        set(&mut config.nphot, self.nphot);
        set(&mut config.nthreads, self.nthreads);
        config.dgrowth |= self.dgrowth;
        config.polarization |= self.polarization;
        config.alignment |= self.alignment;
        config.overwrite |= self.overwrite;
        Ok(config)
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

/// Grain binning for the mixer stage.
#[derive(Args, Debug, Clone, Copy)]
pub struct MixerArgs {
    /// Number of grain size bins
    #[arg(long, default_value_t = 100)]
    pub na: usize,

    /// Number of scattering angles (at least 181 with polarization)
    #[arg(long, default_value_t = 181)]
    pub nang: usize,
}

impl MixerArgs {
    pub fn request(&self, config: &PipelineConfig) -> OpacityRequest {
        OpacityRequest {
            material: None,
            grains: GrainSettings {
                na: self.na,
                nang: self.nang,
                ..OpacityRequest::from_config(config).grains
            },
        }
    }
}

/// Run command inputs: stage selection plus per-stage options.
#[derive(Parser, Debug)]
#[command(about = "Run pipeline stages in order")]
#[command(group(
    ArgGroup::new("stages")
        .required(true)
        .multiple(true)
        .args(["grid", "opacity", "monte_carlo", "raytrace", "synobs"])
))]
pub struct RunArgs {
    /// Working directory holding the solver files
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub workdir: PathBuf,

    #[command(flatten)]
    pub settings: ConfigArgs,

    /// Write the model grid
    #[arg(long)]
    pub grid: bool,

    /// Compute dust opacity tables
    #[arg(long)]
    pub opacity: bool,

    /// Run the thermal Monte Carlo
    #[arg(long)]
    pub monte_carlo: bool,

    /// Ray-trace an image
    #[arg(long)]
    pub raytrace: bool,

    /// Simulate an interferometric observation
    #[arg(long)]
    pub synobs: bool,

    /// Grid cells per axis
    #[arg(long, default_value_t = 64)]
    pub ncells: usize,

    /// Half-width of the grid box in au
    #[arg(long, default_value_t = 200.0)]
    pub bbox: f64,

    /// Write a grain alignment direction field
    #[arg(long, value_enum)]
    pub vector_field: Option<VectorMorphology>,

    #[command(flatten)]
    pub mixer: MixerArgs,

    /// Extra arguments appended to the Monte Carlo solver call
    #[arg(long, value_name = "ARGS", default_value = "")]
    pub mc_args: String,

    /// Inclination in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub incl: Option<f64>,

    /// Image pixels per side
    #[arg(long)]
    pub npix: Option<u32>,

    /// Image size in au
    #[arg(long)]
    pub sizeau: Option<f64>,

    /// Ignore scattering while ray-tracing
    #[arg(long)]
    pub noscat: bool,

    /// Also render the tau = <TAU> surface
    #[arg(long, value_name = "TAU")]
    pub tau_surface: Option<f64>,

    /// Render the tau surface in 3-D
    #[arg(long)]
    pub tau_surface_3d: bool,

    /// Extra arguments appended to the ray-tracing solver call
    #[arg(long, value_name = "ARGS", default_value = "")]
    pub image_args: String,

    /// Observation script path or URL; a template is written when omitted
    #[arg(long, value_name = "PATH|URL")]
    pub script: Option<String>,

    /// Observing time in hours for the template script
    #[arg(long)]
    pub obstime: Option<f64>,

    /// Solver executable
    #[arg(long, default_value = crate::pipeline::SOLVER_PROGRAM)]
    pub solver: String,

    /// Observation simulator executable
    #[arg(long, default_value = crate::pipeline::OBSERVER_PROGRAM)]
    pub observer: String,

    /// Extra keyword that fails a stage when it appears in a process log
    #[arg(long, value_name = "WORD")]
    pub fail_on: Vec<String>,

    /// Write the resolved configuration to this path before running
    #[arg(long, value_name = "PATH")]
    pub save_config: Option<PathBuf>,
}

impl RunArgs {
    /// Requested stages in pipeline order.
    pub fn stages(&self, config: &PipelineConfig) -> Vec<StageRequest> {
        let mut stages = Vec::new();
        if self.grid {
            stages.push(StageRequest::Grid(GridRequest {
                ncells: self.ncells,
                bbox_au: self.bbox,
                temperature: true,
                vector_field: self.vector_field,
            }));
        }
        if self.opacity {
            stages.push(StageRequest::Opacity(self.mixer.request(config)));
        }
        if self.monte_carlo {
            stages.push(StageRequest::MonteCarlo(MonteCarloRequest {
                nphot: None,
                extra_args: self.mc_args.clone(),
            }));
        }
        if self.raytrace {
            stages.push(StageRequest::Raytrace(RaytraceRequest {
                lam: None,
                incl: self.incl,
                npix: self.npix,
                sizeau: self.sizeau,
                noscat: self.noscat,
                tau_surface: self.tau_surface,
                tau_surface_3d: self.tau_surface_3d,
                extra_args: self.image_args.clone(),
            }));
        }
        if self.synobs {
            stages.push(StageRequest::Synobs(SynobsRequest {
                script: self.script.clone(),
                obstime_hours: self.obstime,
            }));
        }
        stages
    }
}

/// Opacity command inputs: the mixer on its own.
#[derive(Parser, Debug)]
#[command(about = "Compute dust opacity tables")]
pub struct OpacityArgs {
    /// Directory receiving the opacity tables
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub workdir: PathBuf,

    #[command(flatten)]
    pub settings: ConfigArgs,

    #[command(flatten)]
    pub mixer: MixerArgs,
}

/// Script command inputs.
#[derive(Parser, Debug)]
#[command(about = "Write a template observation script or list the fields of one")]
#[command(group(ArgGroup::new("mode").required(true).args(["out", "read"])))]
pub struct ScriptArgs {
    /// Write a template script to this path
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Print the fields of an existing script
    #[arg(long, value_name = "PATH")]
    pub read: Option<PathBuf>,

    /// Observing wavelength in micron
    #[arg(long, default_value_t = 1300.0)]
    pub lam: f64,

    /// Observe Stokes I, Q and U
    #[arg(long)]
    pub polarization: bool,

    /// Model image pixels per side
    #[arg(long)]
    pub npix: Option<u32>,

    /// Observing time in hours
    #[arg(long)]
    pub obstime: Option<f64>,

    /// Override a template field (repeatable)
    #[arg(long = "set", value_name = "TASK.FIELD=VALUE")]
    pub overrides: Vec<String>,

    /// Emit machine-readable JSON output (with --read)
    #[arg(long)]
    pub json: bool,
}
