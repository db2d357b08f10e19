//! End-to-end runs of the `synthesizer` binary with a stand-in solver.

mod common;

use common::Workdir;

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn opacity_command_writes_tables_for_custom_materials() {
    let work = Workdir::new();
    let output = work.pipeline("opacity", &["--amax", "10"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let table = work.read("dustkappa_grain-a10um.inp");
    let mut lines = table.lines();
    assert_eq!(lines.next(), Some("3"));
    assert_eq!(lines.next(), Some("6"));
    assert_eq!(lines.count(), 6);
    assert_eq!(work.report()["status"], "done");
    assert!(String::from_utf8_lossy(&output.stdout).contains("dustkappa_grain-a10um.inp"));
}

#[test]
fn unknown_materials_are_rejected_before_any_stage() {
    let work = Workdir::new();
    let output = work.synthesizer(&[
        "opacity",
        "--workdir",
        work.path().to_str().expect("utf-8 path"),
        "--material",
        "unobtainium",
    ]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("material \"unobtainium\" not found"));
    assert!(!work.path().join("synthesizer_run.json").exists());
}

#[test]
fn full_thermal_run_with_a_clean_solver_log() {
    let work = Workdir::new();
    let solver = work.fake_program("fake-solver", "Photon nr 1000\nDone\n", 0);
    let output = work.pipeline(
        "run",
        &[
            "--grid",
            "--opacity",
            "--monte-carlo",
            "--ncells",
            "4",
            "--solver",
            solver.to_str().expect("utf-8 path"),
        ],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let report = work.report();
    assert_eq!(report["status"], "done");
    assert_eq!(
        report["completed"],
        serde_json::json!(["grid", "dustmixer", "monte_carlo"])
    );
    for name in [
        "amr_grid.inp",
        "dust_density.inp",
        "radmc3d.inp",
        "wavelength_micron.inp",
        "stars.inp",
        "dustopac.inp",
    ] {
        assert!(work.path().join(name).is_file(), "{name}");
    }
    assert_eq!(work.read("radmc3d.out"), "Photon nr 1000\nDone\n");
}

#[test]
fn solver_error_lines_fail_the_run() {
    let work = Workdir::new();
    let solver = work.fake_program("fake-solver", "ERROR: convergence failed\n", 0);
    let output = work.pipeline(
        "run",
        &[
            "--grid",
            "--opacity",
            "--monte-carlo",
            "--raytrace",
            "--ncells",
            "4",
            "--solver",
            solver.to_str().expect("utf-8 path"),
        ],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("ERROR: convergence failed"));

    let report = work.report();
    assert_eq!(report["status"], "failed");
    assert_eq!(report["failed_stage"], "monte_carlo");
    assert_eq!(report["completed"], serde_json::json!(["grid", "dustmixer"]));
}

#[test]
fn run_requires_at_least_one_stage() {
    let work = Workdir::new();
    let output = work.synthesizer(&["run", "--workdir", "."]);
    assert!(!output.status.success());
    assert!(!work.path().join("synthesizer_run.json").exists());
}
