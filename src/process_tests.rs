use super::{
    append_log, classify, default_predicates, FailurePredicate, ProcessRequest, ProcessResult,
    ProcessRunner, SystemRunner,
};
use crate::error::{pipeline_error, PipelineError};

const CLEAN_LOG: &str = "Reading global frequencies/wavelengths...\n\
Photon nr 1000\n\
Done with thermal Monte Carlo\n";

#[test]
fn error_line_anywhere_in_transcript_fails() {
    let transcript = format!("{CLEAN_LOG}ERROR: convergence failed\nDone.\n");
    let result = ProcessResult::success("radmc3d", &transcript);
    let err = classify(&result, &default_predicates().unwrap()).unwrap_err();
    match pipeline_error(&err) {
        Some(PipelineError::ExternalProcess { program, line }) => {
            assert_eq!(program, "radmc3d");
            assert_eq!(line, "ERROR: convergence failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "[radmc3d] ERROR: convergence failed");
}

#[test]
fn clean_transcript_passes() {
    let result = ProcessResult::success("radmc3d", CLEAN_LOG);
    classify(&result, &default_predicates().unwrap()).unwrap();
}

#[test]
fn keywords_match_case_insensitively() {
    let predicates = default_predicates().unwrap();
    for line in ["Fatal Error in subroutine", "STOP 1", "program will stop here"] {
        let result = ProcessResult::success("radmc3d", line);
        assert!(classify(&result, &predicates).is_err(), "{line}");
    }
}

#[test]
fn non_zero_exit_fails_even_with_a_clean_transcript() {
    let result = ProcessResult {
        status: Some(2),
        ..ProcessResult::success("casa", CLEAN_LOG)
    };
    let err = classify(&result, &default_predicates().unwrap()).unwrap_err();
    assert!(err.to_string().contains("exited with status 2"));
}

#[test]
fn predicates_are_extensible() {
    let mut predicates = default_predicates().unwrap();
    predicates.push(FailurePredicate::keyword("SEVERE").unwrap());
    let result = ProcessResult::success("casa", "2024-01-01 SEVERE simobserve::::\n");
    assert!(classify(&result, &predicates).is_err());
}

#[test]
fn interruption_takes_precedence() {
    let result = ProcessResult {
        interrupted: true,
        status: None,
        ..ProcessResult::success("radmc3d", CLEAN_LOG)
    };
    let err = classify(&result, &default_predicates().unwrap()).unwrap_err();
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::Interrupted { program }) if program == "radmc3d"
    ));
}

#[test]
fn log_is_appended_across_calls() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("radmc3d.out");
    append_log(&log, &ProcessResult::success("radmc3d", "first\n")).unwrap();
    append_log(&log, &ProcessResult::success("radmc3d", "second\n")).unwrap();
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "first\nsecond\n");
}

#[test]
fn system_runner_captures_both_streams() {
    let dir = tempfile::tempdir().unwrap();
    let request = ProcessRequest::new(
        "sh",
        vec!["-c".to_string(), "echo hello; echo oops >&2".to_string()],
        dir.path(),
    );
    assert_eq!(request.command_line(), "sh -c 'echo hello; echo oops >&2'");
    let result = SystemRunner::default().run(&request).unwrap();
    assert_eq!(result.status, Some(0));
    assert!(!result.interrupted);
    assert!(result.transcript.contains("hello\n"));
    assert!(result.transcript.contains("oops\n"));
}

#[test]
fn missing_executables_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let request = ProcessRequest::new("definitely-not-a-solver-binary", Vec::new(), dir.path());
    let err = SystemRunner::default().run(&request).unwrap_err();
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::ExternalProcess { .. })
    ));
}

#[test]
fn invalid_utf8_does_not_hide_later_error_lines() {
    let dir = tempfile::tempdir().unwrap();
    let request = ProcessRequest::new(
        "sh",
        vec![
            "-c".to_string(),
            "printf 'Temp \\377 K\\nERROR: convergence failed\\n'".to_string(),
        ],
        dir.path(),
    );
    let result = SystemRunner::default().run(&request).unwrap();
    assert!(result.transcript.starts_with("Temp \u{FFFD} K\n"));
    let err = classify(&result, &default_predicates().unwrap()).unwrap_err();
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::ExternalProcess { line, .. }) if line == "ERROR: convergence failed"
    ));
}

#[test]
fn streams_are_merged_in_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let request = ProcessRequest::new(
        "sh",
        vec![
            "-c".to_string(),
            "echo first >&2; sleep 0.3; echo second; sleep 0.3; echo third >&2".to_string(),
        ],
        dir.path(),
    );
    let result = SystemRunner::default().run(&request).unwrap();
    assert_eq!(result.transcript, "first\nsecond\nthird\n");
}
