//! Behavioral tests for local Moran's I on synthetic grids.

use std::collections::BTreeMap;

use geo::{MultiPolygon, Rect, coord};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use risk_map_autocorrelation::{
    SpatialWeights, build_adjacency, flag_hotspots, local_moran, row_standardize,
};
use risk_map_models::{Cell, CellId, Contiguity};
use risk_map_spatial::build_grid;

fn grid(side: u32) -> Vec<Cell> {
    let side = f64::from(side);
    let boundary = MultiPolygon(vec![
        Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: side, y: side }).to_polygon(),
    ]);
    build_grid(&boundary, 1.0).unwrap()
}

fn queen_weights(cells: &[Cell]) -> SpatialWeights {
    row_standardize(&build_adjacency(cells, Contiguity::Queen))
}

#[test]
fn high_cells_among_high_neighbors_are_positive_and_significant() {
    let side = 10;
    let cells = grid(side);
    let weights = queen_weights(&cells);

    // West half high, east half low.
    let values: BTreeMap<CellId, f64> = cells
        .iter()
        .map(|c| (c.id(), if c.id().0 % side < 5 { 10.0 } else { 1.0 }))
        .collect();

    let results = local_moran(&values, &weights).unwrap();

    // Columns 1..=3 are high cells whose neighbors are all high.
    for row in 0..side {
        for col in 1..=3 {
            let outcome = &results[&CellId(row * side + col)];
            let r = outcome.computed().unwrap();
            assert!(r.statistic > 0.0, "cell ({col}, {row}) statistic {}", r.statistic);
            assert!(r.p_value <= 0.05, "cell ({col}, {row}) p {}", r.p_value);
        }
    }
}

#[test]
fn shuffled_values_are_rarely_significant() {
    let side = 12;
    let cells = grid(side);
    let weights = queen_weights(&cells);
    let mut rng = StdRng::seed_from_u64(7);

    let trials = 40;
    let mut significant = 0usize;
    let mut total = 0usize;

    for _ in 0..trials {
        let mut raw: Vec<f64> = (0..cells.len()).map(|_| rng.random::<f64>()).collect();
        raw.shuffle(&mut rng);
        let values: BTreeMap<CellId, f64> = cells.iter().map(Cell::id).zip(raw).collect();

        let results = local_moran(&values, &weights).unwrap();
        significant += flag_hotspots(&results, 0.05).unwrap().len();
        total += results.len();
    }

    #[allow(clippy::cast_precision_loss)]
    let rate = significant as f64 / total as f64;
    assert!((0.005..=0.12).contains(&rate), "significance rate {rate}");
}

#[test]
fn expectations_sum_to_minus_n_over_n_minus_one() {
    let cells = grid(6);
    let weights = queen_weights(&cells);
    let values: BTreeMap<CellId, f64> = cells
        .iter()
        .map(|c| (c.id(), f64::from(c.id().0 % 7)))
        .collect();

    let results = local_moran(&values, &weights).unwrap();
    let sum: f64 = results.values().map(|o| o.computed().unwrap().expected).sum();
    assert!((sum - -36.0 / 35.0).abs() < 1e-9);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Local Moran's I ignores positive rescaling and shifting.
    #[test]
    fn invariant_under_affine_rescaling(
        raw in prop::collection::vec(0.0..100.0f64, 25),
        scale in 0.1..10.0f64,
        shift in -50.0..50.0f64,
    ) {
        let cells = grid(5);
        let weights = queen_weights(&cells);

        let base: BTreeMap<CellId, f64> =
            cells.iter().map(Cell::id).zip(raw.iter().copied()).collect();
        let moved: BTreeMap<CellId, f64> =
            base.iter().map(|(id, v)| (*id, v * scale + shift)).collect();

        let a = local_moran(&base, &weights).unwrap();
        let b = local_moran(&moved, &weights).unwrap();

        for (id, outcome) in &a {
            let (x, y) = (outcome.computed().unwrap(), b[id].computed().unwrap());
            prop_assert!((x.statistic - y.statistic).abs() < 1e-6 * (1.0 + x.statistic.abs()));
            prop_assert!((x.p_value - y.p_value).abs() < 1e-6);
        }
    }

    /// p-values are probabilities and the graph result covers every cell.
    #[test]
    fn p_values_are_probabilities(raw in prop::collection::vec(0u32..50, 36)) {
        let cells = grid(6);
        let weights = queen_weights(&cells);
        let values: BTreeMap<CellId, f64> = cells
            .iter()
            .map(Cell::id)
            .zip(raw.into_iter().map(f64::from))
            .collect();

        let results = local_moran(&values, &weights).unwrap();
        prop_assert_eq!(results.len(), cells.len());
        for outcome in results.values() {
            let p = outcome.p_value();
            prop_assert!((0.0..=1.0).contains(&p), "p = {}", p);
        }
    }
}
