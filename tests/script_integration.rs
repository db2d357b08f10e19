//! Writing and reading observation scripts through the CLI.

mod common;

use common::Workdir;

#[test]
fn template_fields_are_read_back() {
    let work = Workdir::new();
    let written = work.synthesizer(&[
        "script",
        "--out",
        "casa_script.py",
        "--obstime",
        "3",
        "--npix",
        "200",
        "--set",
        "tclean.robust=2.0",
    ]);
    assert!(written.status.success());

    let read = work.synthesizer(&["script", "--read", "casa_script.py", "--json"]);
    assert!(read.status.success());
    let fields: serde_json::Value =
        serde_json::from_slice(&read.stdout).expect("parse field listing");
    let value = |task: &str, field: &str| {
        fields
            .as_array()
            .expect("field array")
            .iter()
            .find(|entry| entry["task"] == task && entry["field"] == field)
            .map(|entry| entry["value"].clone())
    };
    assert_eq!(value("simobserve", "totaltime"), Some("3h".into()));
    assert_eq!(value("tclean", "imsize"), Some("220".into()));
    assert_eq!(value("tclean", "cell"), Some("0.008arcsec".into()));
    assert_eq!(value("tclean", "robust"), Some("2.0".into()));
}

#[test]
fn reading_a_missing_script_fails() {
    let work = Workdir::new();
    let output = work.synthesizer(&["script", "--read", "absent.py"]);
    assert!(!output.status.success());
}
