//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const GRAIN_NK: &str = "# Synthetic refractive index\n# density = 3.0\nlambda n k\n\
0.1 1.70 0.10\n1.0 1.70 0.03\n10.0 2.40 0.20\n1000.0 3.40 0.05\n";

/// Scratch working directory plus a custom refractive-index file, so no
/// test touches the network.
pub struct Workdir {
    pub dir: TempDir,
}

impl Workdir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(dir.path().join("grain.nk"), GRAIN_NK).expect("write nk table");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn nk_file(&self) -> PathBuf {
        self.path().join("grain.nk")
    }

    /// Stand-in solver that prints `transcript` and exits with `status`.
    pub fn fake_program(&self, name: &str, transcript: &str, status: i32) -> PathBuf {
        let path = self.path().join(name);
        let script = format!("#!/bin/sh\ncat <<'LOG'\n{transcript}LOG\nexit {status}\n");
        fs::write(&path, script).expect("write fake program");
        let mut permissions = fs::metadata(&path).expect("stat fake program").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).expect("chmod fake program");
        path
    }

    /// Run the binary inside the working directory.
    pub fn synthesizer(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_synthesizer"))
            .args(args)
            .current_dir(self.path())
            .env("SYNTHESIZER_LOG", "info")
            .output()
            .expect("run synthesizer")
    }

    /// Small wavelength and size grids over the custom material.
    pub fn pipeline_args(&self) -> Vec<String> {
        let mut args = vec![
            "--workdir".to_string(),
            self.path().display().to_string(),
            "--material".to_string(),
            self.nk_file().display().to_string(),
        ];
        for arg in ["--nlam", "6", "--lmin", "0.5", "--lmax", "500", "--na", "6"] {
            args.push(arg.to_string());
        }
        args
    }

    /// `command` with `pipeline_args` followed by `extra`.
    pub fn pipeline(&self, command: &str, extra: &[&str]) -> Output {
        let defaults = self.pipeline_args();
        let mut args = vec![command];
        args.extend(defaults.iter().map(String::as_str));
        args.extend_from_slice(extra);
        self.synthesizer(&args)
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).unwrap_or_else(|err| panic!("read {name}: {err}"))
    }

    pub fn report(&self) -> serde_json::Value {
        serde_json::from_str(&self.read("synthesizer_run.json")).expect("parse run report")
    }
}
