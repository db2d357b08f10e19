use super::{GrainSettings, Mixer, POLARIZATION_MIN_ANGLES};
use crate::error::{is_fetch_failure, pipeline_error, PipelineError};
use crate::opacity::nk::NkSource;
use crate::opacity::materials::Material;
use crate::opacity::{Composition, OpacityTable};
use anyhow::Result;
use std::cell::RefCell;

const SILICATE: &str = "# lambda n k\n0.1 1.70 0.10\n1.0 1.70 0.03\n10.0 2.40 0.20\n1000.0 3.40 0.05\n";
const GRAPHITE: &str = "0.1 1.20 0.90\n1.0 2.50 1.40\n10.0 6.00 5.00\n1000.0 40.0 40.0\n";
const ORGANICS: &str = "1e-7 1.50 0.20\n1e-3 1.80 0.10\n";

/// Serves synthetic tables and records which archive files were requested.
#[derive(Default)]
struct FakeSource {
    requested: RefCell<Vec<String>>,
}

impl NkSource for FakeSource {
    fn fetch(&self, file_name: &str) -> Result<String> {
        self.requested.borrow_mut().push(file_name.to_string());
        Ok(match file_name {
            "astrosil-Draine2003.lnk" => SILICATE,
            "c-gra-Draine2003.lnk" => GRAPHITE,
            _ => ORGANICS,
        }
        .to_string())
    }
}

struct OfflineSource;

impl NkSource for OfflineSource {
    fn fetch(&self, file_name: &str) -> Result<String> {
        Err(PipelineError::Fetch {
            url: file_name.to_string(),
            reason: "offline".to_string(),
        }
        .into())
    }
}

fn grid() -> Vec<f64> {
    vec![0.5, 5.0, 50.0, 500.0]
}

fn grains() -> GrainSettings {
    GrainSettings {
        amin: 0.1,
        amax: 10.0,
        q: -3.5,
        na: 12,
        nang: 3,
    }
}

fn assert_tables_close(a: &OpacityTable, b: &OpacityTable) {
    assert_eq!(a.wavelengths, b.wavelengths);
    for (x, y) in a.absorption.iter().zip(&b.absorption) {
        assert!((x - y).abs() <= 1e-10 * x.abs().max(y.abs()), "{x} vs {y}");
    }
    let (sa, sb) = (a.scattering.as_ref().unwrap(), b.scattering.as_ref().unwrap());
    for (x, y) in sa.iter().zip(sb) {
        assert!((x - y).abs() <= 1e-10 * x.abs().max(y.abs()), "{x} vs {y}");
    }
}

#[test]
fn silicate_graphite_recipe_uses_fixed_weights() {
    let source = FakeSource::default();
    let mixer = Mixer::new(&source, grid(), 1, false);
    let silicate = mixer.material_table(&Material::Silicate, &grains()).unwrap();
    let graphite = mixer.material_table(&Material::Graphite, &grains()).unwrap();

    let composition = Composition::parse("sg").unwrap();
    assert_eq!(composition.weights, vec![0.625, 0.375]);
    let mixed = mixer
        .composition_table(&composition, &grains(), "sg-a10um")
        .unwrap();

    assert_eq!(mixed.name, "sg-a10um");
    for i in 0..grid().len() {
        let expected = 0.625 * silicate.absorption[i] + 0.375 * graphite.absorption[i];
        assert!((mixed.absorption[i] / expected - 1.0).abs() < 1e-10);
    }
}

#[test]
fn single_material_recipe_matches_pure_computation() {
    let source = FakeSource::default();
    let mixer = Mixer::new(&source, grid(), 1, false);
    let pure = mixer.material_table(&Material::Silicate, &grains()).unwrap();
    let recipe = mixer
        .composition_table(&Composition::parse("s").unwrap(), &grains(), "s-a10um")
        .unwrap();
    assert_tables_close(&recipe, &pure);
}

#[test]
fn organics_are_loaded_but_not_weighted() {
    let source = FakeSource::default();
    let mixer = Mixer::new(&source, grid(), 1, false);
    let sg = mixer
        .composition_table(&Composition::parse("sg").unwrap(), &grains(), "sg")
        .unwrap();
    source.requested.borrow_mut().clear();
    let sgo = mixer
        .composition_table(&Composition::parse("sgo").unwrap(), &grains(), "sgo")
        .unwrap();

    assert!(source
        .requested
        .borrow()
        .iter()
        .any(|file| file == "organics-Pollack1995.nk"));
    assert_tables_close(&sgo, &sg);
}

#[test]
fn opacities_are_positive_and_cover_the_grid() {
    let source = FakeSource::default();
    let mixer = Mixer::new(&source, grid(), 2, false);
    let table = mixer.material_table(&Material::Graphite, &grains()).unwrap();
    assert_eq!(table.len(), 4);
    assert!(table.absorption.iter().all(|k| *k > 0.0));
    assert!(table.matrix.is_none());
    let g = table.asymmetry.as_ref().unwrap();
    assert!(g.iter().all(|g| (-1.0..=1.0).contains(g)));
}

#[test]
fn polarization_forces_serial_matrix_computation() {
    let source = FakeSource::default();
    assert_eq!(Mixer::new(&source, grid(), 8, false).threads(), 8);

    let mixer = Mixer::new(&source, grid(), 8, true);
    assert_eq!(mixer.threads(), 1);
    let angles = mixer.angles(&grains());
    assert_eq!(angles.len(), POLARIZATION_MIN_ANGLES);
    assert_eq!(angles[0], 0.0);
    assert_eq!(angles[angles.len() - 1], 180.0);

    let small = GrainSettings { na: 3, ..grains() };
    let table = mixer.material_table(&Material::Silicate, &small).unwrap();
    let matrix = table.matrix.as_ref().expect("matrix");
    assert_eq!(matrix.angles.len(), POLARIZATION_MIN_ANGLES);
    assert_eq!(matrix.elements.len(), 4 * POLARIZATION_MIN_ANGLES);
    // Forward scattering is unpolarized.
    let z = matrix.at(0, 0);
    assert!(z[0] > 0.0);
    assert!(z[1].abs() <= 1e-8 * z[0]);
}

#[test]
fn fallback_grains_use_documented_defaults() {
    let fallback = GrainSettings::fallback(10.0);
    assert_eq!(fallback.amin, 0.1);
    assert_eq!(fallback.q, -3.5);
    assert_eq!(fallback.na, 100);
    assert_eq!(fallback.nang, 181);
    let sizes = fallback.sizes();
    assert_eq!(sizes.len(), 100);
    assert!((sizes[99] - 10.0).abs() < 1e-9);
}

#[test]
fn unknown_material_code_is_a_configuration_error() {
    let err = Composition::parse("unobtainium").unwrap_err();
    match pipeline_error(&err) {
        Some(PipelineError::Configuration(message)) => assert!(message.contains("unobtainium")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn fetch_failures_propagate_without_retry() {
    let mixer = Mixer::new(&OfflineSource, grid(), 1, false);
    let err = mixer
        .material_table(&Material::Silicate, &grains())
        .unwrap_err();
    assert!(is_fetch_failure(&err));
}

#[test]
fn custom_refractive_index_files_are_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ice.nk");
    std::fs::write(&path, format!("# density = 0.92\n{SILICATE}")).unwrap();

    let composition = Composition::parse(path.to_str().unwrap()).unwrap();
    assert_eq!(composition.label(), "ice");
    let mixer = Mixer::new(&OfflineSource, grid(), 1, false);
    let table = mixer
        .composition_table(&composition, &grains(), "ice-a10um")
        .unwrap();
    assert_eq!(table.len(), 4);

    // Same optical constants, lower density: more opacity per gram.
    let source = FakeSource::default();
    let silicate = Mixer::new(&source, grid(), 1, false)
        .material_table(&Material::Silicate, &grains())
        .unwrap();
    assert!(table.absorption[0] > silicate.absorption[0]);
}

#[test]
fn custom_files_without_density_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mystery.nk");
    std::fs::write(&path, SILICATE).unwrap();

    let composition = Composition::parse(path.to_str().unwrap()).unwrap();
    let mixer = Mixer::new(&OfflineSource, grid(), 1, false);
    let err = mixer
        .composition_table(&composition, &grains(), "mystery")
        .unwrap_err();
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::Configuration(_))
    ));
}

#[test]
fn empty_size_distributions_are_rejected() {
    let source = FakeSource::default();
    let mixer = Mixer::new(&source, grid(), 1, false);
    let composition = Composition::parse("s").unwrap();
    for grains in [
        GrainSettings { na: 0, ..grains() },
        GrainSettings { amin: 0.0, ..grains() },
        GrainSettings { amin: 20.0, ..grains() },
    ] {
        let err = mixer
            .composition_table(&composition, &grains, "s-a10um")
            .unwrap_err();
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::Configuration(_))
        ));
    }
    assert!(source.requested.borrow().is_empty());
}
