use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

mod archive;
mod cli;
mod config;
mod error;
mod grid;
mod inputs;
mod opacity;
mod paths;
mod pipeline;
mod process;
mod resolver;
mod script;
mod steps;
mod util;

use crate::archive::HttpArchive;
use crate::cli::{Command, OpacityArgs, RootArgs, RunArgs, ScriptArgs};
use crate::config::{validate_config, write_config};
use crate::grid::PlummerEnvelope;
use crate::pipeline::{Pipeline, StageRequest};
use crate::process::{default_predicates, FailurePredicate, SystemRunner};
use crate::script::{ObservationScript, ParsedScript};

const LOG_ENV: &str = "SYNTHESIZER_LOG";

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_logging(args.verbose);

    let result = match args.command {
        Command::Run(args) => cmd_run(args),
        Command::Opacity(args) => cmd_opacity(args),
        Command::Script(args) => cmd_script(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let config = args.settings.resolve()?;
    validate_config(&config)?;
    if let Some(path) = &args.save_config {
        write_config(path, &config)?;
    }
    let stages = args.stages(&config);
    let mut predicates = default_predicates()?;
    for word in &args.fail_on {
        predicates.push(FailurePredicate::keyword(word)?);
    }

    let runner = SystemRunner { echo: true };
    let archive = HttpArchive::public();
    let model = PlummerEnvelope::default();
    let pipeline = Pipeline::new(args.workdir.clone(), &runner, &archive, &model)?
        .with_programs(&args.solver, &args.observer)
        .with_predicates(predicates);
    let state = pipeline.run_stages(config, &stages)?;

    let completed: Vec<&str> = state.steps.as_slice().iter().map(|s| s.as_str()).collect();
    println!("Completed: {}", completed.join(", "));
    println!(
        "Report: {}",
        util::display_path(&pipeline.paths().run_report(), None)
    );
    Ok(())
}

fn cmd_opacity(args: OpacityArgs) -> Result<()> {
    let config = args.settings.resolve()?;
    validate_config(&config)?;
    let request = args.mixer.request(&config);

    let runner = SystemRunner::default();
    let archive = HttpArchive::public();
    let model = PlummerEnvelope::default();
    let pipeline = Pipeline::new(args.workdir.clone(), &runner, &archive, &model)?;
    let lam = config.lam;
    let state = pipeline.run_stages(config, &[StageRequest::Opacity(request)])?;

    for table in &state.mixtures {
        let path = pipeline.paths().join(&table.file_name());
        let extinction = table
            .extinction_at(lam)
            .map(|kappa| format!("{kappa:.4e} cm^2/g"))
            .unwrap_or_else(|| "outside the wavelength grid".to_string());
        println!(
            "{} ({} wavelengths, extinction at {lam} um: {extinction})",
            util::display_path(&path, Some(pipeline.paths().root())),
            table.len()
        );
    }
    Ok(())
}

fn cmd_script(args: ScriptArgs) -> Result<()> {
    if let Some(path) = &args.read {
        let parsed = ParsedScript::read(path)?;
        if args.json {
            let fields: Vec<serde_json::Value> = parsed
                .fields()
                .into_iter()
                .map(|(task, name, value)| {
                    serde_json::json!({ "task": task.as_str(), "field": name, "value": value })
                })
                .collect();
            let text = serde_json::to_string_pretty(&fields).context("serialize script fields")?;
            println!("{text}");
        } else {
            for (task, name, value) in parsed.fields() {
                println!("{task}.{name} = {}", util::truncate_string(value, 120));
            }
        }
        return Ok(());
    }

    let mut script =
        ObservationScript::template(args.lam, args.polarization).with_npix(args.npix);
    if let Some(hours) = args.obstime {
        script = script.with_totaltime_hours(hours);
    }
    for assignment in &args.overrides {
        script.apply_override(assignment)?;
    }
    if let Some(path) = &args.out {
        script.write(path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
