//! Full pipeline runs on small synthetic domains.
use dbd_core::geometry::Polygon;
use dbd_core::{GridSpec, MappingPipeline, ModelBundle, Observation, PipelineConfig, PredictorStack};

const N: usize = 10;

/// Three step-valued bands on a 10×10 grid:
/// `band1` = col / 2 (0..=4), `band2` = row / 5 (0..=1),
/// `band3` = (row + col) % 2. The 20 observations hit every combination of
/// the three levels exactly once, with response = 2 × band1 + small noise.
fn scenario() -> (PredictorStack, Vec<Observation>, Polygon) {
    let grid = GridSpec::new(0.0, N as f64, 1.0, N, N);
    let mut b1 = Vec::with_capacity(N * N);
    let mut b2 = Vec::with_capacity(N * N);
    let mut b3 = Vec::with_capacity(N * N);
    for row in 0..N {
        for col in 0..N {
            b1.push((col / 2) as f64);
            b2.push((row / 5) as f64);
            b3.push(((row + col) % 2) as f64);
        }
    }
    let stack = PredictorStack::new(
        grid,
        vec![("band1".into(), b1), ("band2".into(), b2), ("band3".into(), b3)],
    )
    .unwrap();

    let mut obs = Vec::new();
    for level in 0..5 {
        for half in 0..2 {
            for parity in 0..2 {
                let row = 5 * half + (parity + half) % 2 + 2 * (level % 2);
                let col = 2 * level;
                let (x, y) = grid.cell_center(row, col);
                let i = obs.len();
                let noise = 0.02 * (((i * 7) % 5) as f64 - 2.0);
                obs.push(Observation::new(x, y, 2.0 * level as f64 + noise));
            }
        }
    }
    let domain = Polygon::rectangle(0.0, 0.0, N as f64, N as f64);
    (stack, obs, domain)
}

fn config() -> PipelineConfig {
    PipelineConfig {
        n_trees: 100,
        min_node_size: 2,
        domain_sample_size: 300,
        ..Default::default()
    }
}

#[test]
fn band1_is_selected_and_domain_is_applicable() {
    let (stack, obs, domain) = scenario();
    let result = MappingPipeline::new(config()).run(&stack, &obs, &domain).unwrap();
    let report = &result.report;

    assert_eq!(report.n_used, 20);
    assert_eq!(report.features[0], "band1");
    assert!(report.history[0].accepted);
    assert!(report.validated && !report.low_confidence);
    assert!(report.cv.r2 > 0.5, "CV R² {}", report.cv.r2);
    assert!(report.aoa_percent > 90.0, "AOA {} %", report.aoa_percent);

    let accepted: Vec<f64> = report.history.iter().filter(|r| r.accepted).map(|r| r.r2).collect();
    assert!(accepted.windows(2).all(|w| w[1] > w[0]));

    let (lo, mid, hi) = (&result.quantiles.layers[0], &result.quantiles.layers[1], &result.quantiles.layers[2]);
    for cell in 0..N * N {
        assert!(lo.data[cell] <= mid.data[cell] && mid.data[cell] <= hi.data[cell]);
    }
    assert!(result.aoa_polygons.len() >= 1);
}

#[test]
fn saved_model_reproduces_predictions() {
    let (stack, obs, domain) = scenario();
    let result = MappingPipeline::new(config()).run(&stack, &obs, &domain).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    result.bundle.save(&path).unwrap();
    let reloaded = ModelBundle::load(&path).unwrap();

    let again = dbd_core::predict_domain(&reloaded.model, &stack, &[0.05, 0.5, 0.95], Some(&domain)).unwrap();
    for (a, b) in result.quantiles.layers.iter().zip(&again.layers) {
        assert_eq!(a.data, b.data);
    }
    let maps = reloaded.train_di.score(&stack).unwrap();
    assert_eq!(maps.di.data, result.applicability.di.data);
}

#[test]
fn single_constant_band_does_not_break_selection() {
    let grid = GridSpec::new(0.0, 6.0, 1.0, 6, 6);
    let stack = PredictorStack::new(grid, vec![("flat".into(), vec![1.0; 36])]).unwrap();
    let obs: Vec<Observation> = (0..12)
        .map(|i| {
            let (x, y) = grid.cell_center(i / 2, (i * 5) % 6);
            Observation::new(x, y, 1.0 + 0.1 * ((i * 3) % 7) as f64)
        })
        .collect();
    let domain = Polygon::rectangle(0.0, 0.0, 6.0, 6.0);
    let cfg = PipelineConfig { k_folds: 3, n_trees: 30, domain_sample_size: 100, ..Default::default() };

    let result = MappingPipeline::new(cfg).run(&stack, &obs, &domain).unwrap();
    assert_eq!(result.report.features, vec!["flat".to_string()]);
    assert_eq!(result.report.mtry, 1);
    assert!((result.report.aoa_percent - 100.0).abs() < 1e-9);
}
