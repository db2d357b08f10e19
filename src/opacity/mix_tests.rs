use super::{mix, parse_opacity_text, read_opacity_file, write_opacity_file, OpacityTable, ScatteringMatrix};
use crate::error::{pipeline_error, PipelineError};

fn table(name: &str, absorption: &[f64], scattering: &[f64], g: &[f64]) -> OpacityTable {
    OpacityTable {
        name: name.to_string(),
        wavelengths: vec![1.0, 10.0, 100.0],
        absorption: absorption.to_vec(),
        scattering: Some(scattering.to_vec()),
        asymmetry: Some(g.to_vec()),
        matrix: None,
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
}

#[test]
fn weighted_sum_combines_absorption_per_wavelength() {
    let a = table("s", &[10.0, 5.0, 1.0], &[4.0, 2.0, 0.5], &[0.1, 0.2, 0.3]);
    let b = table("g", &[20.0, 8.0, 3.0], &[1.0, 1.0, 1.0], &[0.5, 0.5, 0.5]);
    let mixed = mix("sg", &[(0.625, &a), (0.375, &b)]).expect("mix");

    assert_eq!(mixed.name, "sg");
    assert_eq!(mixed.wavelengths, a.wavelengths);
    for i in 0..3 {
        let expected = 0.625 * a.absorption[i] + 0.375 * b.absorption[i];
        assert!(close(mixed.absorption[i], expected), "lambda index {i}");
    }
    let sca = mixed.scattering.expect("scattering");
    assert!(close(sca[0], 0.625 * 4.0 + 0.375 * 1.0));
}

#[test]
fn asymmetry_is_weighted_by_scattering_opacity() {
    let a = table("s", &[1.0; 3], &[3.0, 3.0, 3.0], &[0.2, 0.2, 0.2]);
    let b = table("g", &[1.0; 3], &[1.0, 1.0, 1.0], &[0.6, 0.6, 0.6]);
    let mixed = mix("sg", &[(0.5, &a), (0.5, &b)]).expect("mix");
    let g = mixed.asymmetry.expect("asymmetry");
    // (1.5 * 0.2 + 0.5 * 0.6) / 2.0
    assert!(close(g[0], 0.3));
}

#[test]
fn single_component_with_unit_weight_is_identity() {
    let a = table("s", &[10.0, 5.0, 1.0], &[4.0, 2.0, 0.5], &[0.1, 0.2, 0.3]);
    let mixed = mix("s", &[(1.0, &a)]).expect("mix");
    assert_eq!(mixed, a);
}

#[test]
fn mixing_is_commutative() {
    let a = table("s", &[10.0, 5.0, 1.0], &[4.0, 2.0, 0.5], &[0.1, 0.2, 0.3]);
    let b = table("g", &[20.0, 8.0, 3.0], &[1.0, 1.0, 1.0], &[0.5, 0.5, 0.5]);
    let ab = mix("sg", &[(0.625, &a), (0.375, &b)]).expect("mix");
    let ba = mix("sg", &[(0.375, &b), (0.625, &a)]).expect("mix");
    for i in 0..3 {
        assert!(close(ab.absorption[i], ba.absorption[i]));
    }
}

#[test]
fn weights_are_not_renormalized() {
    let a = table("s", &[10.0; 3], &[1.0; 3], &[0.0; 3]);
    let b = table("g", &[10.0; 3], &[1.0; 3], &[0.0; 3]);
    let mixed = mix("x", &[(0.625, &a), (0.125, &b)]).expect("mix");
    assert!(close(mixed.absorption[0], 7.5));
}

#[test]
fn mismatched_wavelength_grids_are_rejected() {
    let a = table("s", &[1.0; 3], &[1.0; 3], &[0.0; 3]);
    let mut b = table("g", &[1.0; 3], &[1.0; 3], &[0.0; 3]);
    b.wavelengths = vec![1.0, 10.0, 200.0];
    let err = mix("sg", &[(0.5, &a), (0.5, &b)]).expect_err("grids differ");
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::MismatchedGrid { left: 3, right: 3 })
    ));
}

#[test]
fn empty_composition_is_a_configuration_error() {
    let err = mix("none", &[]).expect_err("empty");
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::Configuration(_))
    ));
}

#[test]
fn extinction_interpolates_in_log_wavelength() {
    let a = table("s", &[10.0, 1.0, 0.1], &[0.0; 3], &[0.0; 3]);
    assert_eq!(a.extinction_at(0.5), Some(10.0));
    assert_eq!(a.extinction_at(1000.0), Some(0.1));
    let mid = a.extinction_at(10f64.powf(0.5)).expect("inside grid");
    assert!(close(mid, 5.5));
}

#[test]
fn kappa_file_round_trips_through_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = table("sg-a10um", &[10.0, 5.0, 1.0], &[4.0, 2.0, 0.5], &[0.1, 0.2, 0.3]);
    let path = write_opacity_file(dir.path(), &a).expect("write");
    assert_eq!(path.file_name().unwrap(), "dustkappa_sg-a10um.inp");

    let text = std::fs::read_to_string(&path).expect("read");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("3"));
    assert_eq!(lines.next(), Some("3"));

    let back = read_opacity_file(&path).expect("parse");
    assert_eq!(back.name, "sg-a10um");
    assert!(back.matrix.is_none());
    for i in 0..3 {
        assert!((back.absorption[i] / a.absorption[i] - 1.0).abs() < 1e-5);
    }
}

#[test]
fn scattering_matrix_file_keeps_angle_grid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut a = table("s-a10um", &[10.0, 5.0, 1.0], &[4.0, 2.0, 0.5], &[0.1, 0.2, 0.3]);
    let angles: Vec<f64> = (0..181).map(f64::from).collect();
    let elements = (0..3 * 181)
        .map(|i| {
            let v = i as f64 + 1.0;
            [v, -v / 2.0, v, v / 3.0, 0.0, v / 3.0]
        })
        .collect();
    a.matrix = Some(ScatteringMatrix { angles, elements });

    let path = write_opacity_file(dir.path(), &a).expect("write");
    assert_eq!(path.file_name().unwrap(), "dustkapscatmat_s-a10um.inp");
    let back = read_opacity_file(&path).expect("parse");
    let matrix = back.matrix.expect("matrix");
    assert_eq!(matrix.angles.len(), 181);
    assert_eq!(matrix.elements.len(), 3 * 181);
    assert!((matrix.at(2, 180)[0] - 543.0).abs() < 1e-3);
}

#[test]
fn absorption_only_tables_parse_from_archive_text() {
    let text = "# archive table\n1\n2\n1.0 5.0\n10.0 2.0\n";
    let parsed = parse_opacity_text("dustkappa_s-a10um.inp", text).expect("parse");
    assert_eq!(parsed.absorption, vec![5.0, 2.0]);
    assert!(parsed.scattering.is_none());
}

#[test]
fn truncated_tables_are_rejected() {
    let text = "3\n4\n1.0 5.0 1.0 0.1\n";
    assert!(parse_opacity_text("dustkappa_s-a10um.inp", text).is_err());
    assert!(parse_opacity_text("opacity.txt", "1\n1\n1 1\n").is_err());
}

#[test]
fn oversized_headers_are_parse_errors() {
    for text in ["3\n1e19\n1 2 3 4\n", "3\n1e300\n1 2 3 4\n"] {
        assert!(parse_opacity_text("dustkappa_sg-a10um.inp", text).is_err());
    }
    let scatmat = "1\n2\n1e19\n1 2 3 0.1\n10 1 2 0.1\n";
    assert!(parse_opacity_text("dustkapscatmat_sg-a10um.inp", scatmat).is_err());
}
