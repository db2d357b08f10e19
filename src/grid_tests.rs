use super::{write_grid, CartesianGrid, GridModel, GridRequest, PlummerEnvelope, VectorMorphology, AU_CM};
use crate::config::PipelineConfig;
use crate::paths::WorkdirPaths;

/// Uniform density, hot for x > 0 and cold elsewhere.
struct HalfHot {
    with_temperature: bool,
}

impl GridModel for HalfHot {
    fn name(&self) -> &str {
        "half-hot"
    }

    fn dust_density(&self, _position: [f64; 3]) -> f64 {
        1e-18
    }

    fn temperature(&self, [x, _, _]: [f64; 3]) -> Option<f64> {
        self.with_temperature
            .then_some(if x > 0.0 { 500.0 } else { 100.0 })
    }
}

fn request(ncells: usize) -> GridRequest {
    GridRequest {
        ncells,
        bbox_au: 10.0,
        ..GridRequest::default()
    }
}

fn values(text: &str) -> Vec<f64> {
    text.lines().skip(3).map(|l| l.trim().parse().unwrap()).collect()
}

#[test]
fn grid_file_lists_symmetric_walls() {
    let grid = CartesianGrid::sample(&HalfHot { with_temperature: true }, &request(4)).unwrap();
    assert_eq!(grid.walls.len(), 5);
    assert!((grid.walls[0] + 10.0 * AU_CM).abs() < 1.0);
    assert!(grid.walls[2].abs() < 1.0);

    let text = grid.grid_file().unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(&lines[..6], &["1", "0", "1", "0", "1 1 1", "4 4 4"]);
    assert_eq!(lines.len(), 6 + 3 * 5);
}

#[test]
fn sootline_splits_density_between_species() {
    let grid = CartesianGrid::sample(&HalfHot { with_temperature: true }, &request(2)).unwrap();
    let text = grid.density_file(Some((300.0, 0.8125))).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(&lines[..3], &["1", "8", "2"]);

    let values = values(&text);
    assert_eq!(values.len(), 16);
    let (outer, inner) = values.split_at(8);
    // x varies fastest: even cells are cold, odd cells are hot.
    for i in 0..8 {
        if i % 2 == 0 {
            assert!((outer[i] - 1e-18).abs() < 1e-24);
            assert_eq!(inner[i], 0.0);
        } else {
            assert_eq!(outer[i], 0.0);
            assert!((inner[i] - 0.8125e-18).abs() < 1e-24);
        }
    }
}

#[test]
fn single_species_density_needs_no_temperature() {
    let model = HalfHot { with_temperature: false };
    let req = GridRequest {
        temperature: false,
        ..request(2)
    };
    let grid = CartesianGrid::sample(&model, &req).unwrap();
    assert!(grid.temperature_file(1).unwrap().is_none());
    assert_eq!(values(&grid.density_file(None).unwrap()).len(), 8);
    assert!(grid.density_file(Some((300.0, 1.0))).is_err());
}

#[test]
fn models_without_temperature_reject_temperature_requests() {
    let model = HalfHot { with_temperature: false };
    assert!(CartesianGrid::sample(&model, &request(2)).is_err());
}

#[test]
fn temperature_is_repeated_per_species() {
    let grid = CartesianGrid::sample(&HalfHot { with_temperature: true }, &request(2)).unwrap();
    let text = grid.temperature_file(2).unwrap().unwrap();
    assert_eq!(values(&text).len(), 16);
}

#[test]
fn plummer_profile_falls_off_and_respects_floor() {
    let model = PlummerEnvelope::default();
    let center = model.dust_density([0.0, 0.0, 0.0]);
    let far = model.dust_density([1000.0 * AU_CM, 0.0, 0.0]);
    assert!(center > far && far > 0.0);
    let hot = model.temperature([0.0, 0.0, 0.0]).unwrap();
    assert!(hot > 300.0);
    let cold = model.temperature([1e6 * AU_CM, 0.0, 0.0]).unwrap();
    assert_eq!(cold, model.t_floor);
}

#[test]
fn toroidal_field_is_unit_and_azimuthal() {
    let grid = CartesianGrid::sample(&HalfHot { with_temperature: true }, &request(2)).unwrap();
    let text = grid.vector_file(VectorMorphology::Toroidal).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(&lines[..2], &["1", "8"]);
    for line in &lines[2..] {
        let v: Vec<f64> = line.split_whitespace().map(|t| t.parse().unwrap()).collect();
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert_eq!(v[2], 0.0);
    }
}

#[test]
fn write_grid_emits_solver_files() {
    let dir = tempfile::tempdir().unwrap();
    let paths = WorkdirPaths::new(dir.path().to_path_buf());
    let config = PipelineConfig {
        csubl: 50.0,
        ..PipelineConfig::default()
    };
    let req = GridRequest {
        vector_field: Some(VectorMorphology::Radial),
        ..request(3)
    };
    write_grid(&paths, &config, &PlummerEnvelope::default(), &req).unwrap();
    assert!(paths.amr_grid().is_file());
    assert!(paths.dust_temperature().is_file());
    assert!(paths.grain_alignment().is_file());
    let density = std::fs::read_to_string(paths.dust_density()).unwrap();
    assert_eq!(density.lines().nth(2), Some("2"));
}
