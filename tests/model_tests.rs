use approx::assert_relative_eq;
use cyton_core::prelude::*;

fn example_parameters() -> Parameters {
    Parameters {
        mUns: 100_000.0,
        sUns: 1.0,
        mDiv0: 30.0,
        sDiv0: 0.2,
        mDD: 60.0,
        sDD: 0.3,
        mDie: 80.0,
        sDie: 0.2,
        b: 10.0,
        p: 0.5,
    }
}

fn example_model() -> Cyton2Model {
    Cyton2Model::new(
        &[0.0, 12.0, 24.0],
        1000.0,
        4,
        0.5,
        vec![1, 2, 1],
        DistributionFamily::LogNormal,
    )
    .unwrap()
}

#[test]
fn test_evaluate_shape_and_nonnegativity() {
    let model = example_model();
    let params = example_parameters();
    let pred = model.evaluate(&params).unwrap();

    // (1 + 2 + 1) replicates x 5 generations
    assert_eq!(pred.len(), 20);
    assert_eq!(pred.len(), model.prediction_len());
    for &value in pred.iter() {
        assert!(value.is_finite());
        assert!(value >= -1e-9, "negative cell count {}", value);
    }
}

#[test]
fn test_all_cells_present_at_time_zero() {
    let model = example_model();
    let params = example_parameters();
    let times = get_times(&[0.0, 12.0, 24.0], 0.5);
    let result = model.extrapolate(&times, &params).unwrap();

    // At t = 0 no clock has fired: the population is exactly N0,
    // all of it in generation 0.
    assert_relative_eq!(result.ext.total_live_cells[0], 1000.0, epsilon = 1e-9);
    assert_relative_eq!(result.ext.cells_gen[[0, 0]], 1000.0, epsilon = 1e-9);
    assert_relative_eq!(result.hts.total_live_cells[0], 1000.0, epsilon = 1e-9);
}

#[test]
fn test_harvest_subsample_matches_dense_grid() {
    let model = example_model();
    let params = example_parameters();
    let ht = [0.0, 12.0, 24.0];
    let times = get_times(&ht, 0.5);
    let result = model.extrapolate(&times, &params).unwrap();

    for (itpt, &t) in ht.iter().enumerate() {
        let idx = times.iter().position(|&x| x == t).unwrap();
        assert_eq!(
            result.hts.total_live_cells[itpt],
            result.ext.total_live_cells[idx]
        );
        for (igen, &cells) in result.hts.cells_gen[itpt].iter().enumerate() {
            assert_eq!(cells, result.ext.cells_gen[[igen, idx]]);
        }
    }
}

#[test]
fn test_evaluate_matches_extrapolation_at_harvest_times() {
    let model = example_model();
    let params = example_parameters();
    let ht = [0.0, 12.0, 24.0];
    let nreps = [1usize, 2, 1];
    let times = get_times(&ht, 0.5);

    let pred = model.evaluate(&params).unwrap();
    let result = model.extrapolate(&times, &params).unwrap();

    // The flat prediction vector repeats each harvest-time column once per
    // replicate, interleaved with the generation axis
    let mut offset = 0;
    for (itpt, &n) in nreps.iter().enumerate() {
        for _ in 0..n {
            for igen in 0..=4 {
                assert_eq!(pred[offset], result.hts.cells_gen[itpt][igen]);
                offset += 1;
            }
        }
    }
    assert_eq!(offset, pred.len());
}

#[test]
fn test_total_is_sum_of_components() {
    let model = example_model();
    let params = example_parameters();
    let times = get_times(&[0.0, 12.0, 24.0], 0.5);
    let result = model.extrapolate(&times, &params).unwrap();

    // The terminal-generation fold redistributes but never loses cells
    for (i, &total) in result.ext.total_live_cells.iter().enumerate() {
        let mut expected = result.ext.n_uns[i];
        for igen in 0..result.ext.n_div.nrows() {
            expected += result.ext.n_div[[igen, i]] + result.ext.n_des[[igen, i]];
        }
        assert_relative_eq!(total, expected, epsilon = 1e-8, max_relative = 1e-9);
    }
}

#[test]
fn test_terminal_generations_fold_into_last_bucket() {
    let params = example_parameters();
    let times = get_times(&[0.0, 48.0], 0.5);

    let narrow = Cyton2Model::new(
        &[0.0, 48.0],
        1000.0,
        2,
        0.5,
        vec![],
        DistributionFamily::LogNormal,
    )
    .unwrap();
    let wide = Cyton2Model::new(
        &[0.0, 48.0],
        1000.0,
        8,
        0.5,
        vec![],
        DistributionFamily::LogNormal,
    )
    .unwrap();

    let narrow_result = narrow.extrapolate(&times, &params).unwrap();
    let wide_result = wide.extrapolate(&times, &params).unwrap();

    assert_eq!(narrow_result.ext.cells_gen.nrows(), 3);
    assert_eq!(wide_result.ext.cells_gen.nrows(), 9);
    // Folding is a regrouping: totals are identical either way
    for (a, b) in narrow_result
        .ext
        .total_live_cells
        .iter()
        .zip(wide_result.ext.total_live_cells.iter())
    {
        assert_relative_eq!(a, b, epsilon = 1e-8, max_relative = 1e-9);
    }
    // The narrow model's terminal bucket absorbs generations 2..=10
    let idx = times.iter().position(|&t| t == 48.0).unwrap();
    let folded: f64 = (2..=8).map(|g| wide_result.ext.cells_gen[[g, idx]]).sum();
    assert_relative_eq!(
        narrow_result.ext.cells_gen[[2, idx]],
        folded,
        epsilon = 1e-8,
        max_relative = 1e-9
    );
}

#[test]
fn test_off_grid_harvest_time_is_fatal_for_evaluate() {
    let model = Cyton2Model::new(
        &[0.0, 13.7],
        1000.0,
        4,
        0.5,
        vec![1, 1],
        DistributionFamily::LogNormal,
    )
    .unwrap();
    let params = example_parameters();

    // The construction grid only holds multiples of dt
    let err = model.evaluate(&params).unwrap_err();
    assert!(err.to_string().contains("not present"));

    // The extrapolation vector includes the harvest time verbatim
    let times = get_times(&[0.0, 13.7], 0.5);
    assert!(model.extrapolate(&times, &params).is_ok());
}

#[test]
fn test_invalid_parameters_are_reported_not_clamped() {
    let model = example_model();
    let mut params = example_parameters();
    params.mDiv0 = -5.0;
    assert!(model.evaluate(&params).is_err());

    let mut params = example_parameters();
    params.sDie = 0.0;
    assert!(model.evaluate(&params).is_err());
}

#[test]
fn test_normal_family_supported() {
    let model = Cyton2Model::new(
        &[0.0, 12.0, 24.0],
        1000.0,
        4,
        0.5,
        vec![1, 2, 1],
        DistributionFamily::Normal,
    )
    .unwrap();
    let pred = model.evaluate(&example_parameters()).unwrap();
    assert_eq!(pred.len(), 20);
    assert!(pred.iter().all(|v| v.is_finite()));
}

#[test]
fn test_model_construction_validation() {
    let family = DistributionFamily::LogNormal;
    assert!(Cyton2Model::new(&[], 1000.0, 4, 0.5, vec![], family).is_err());
    assert!(Cyton2Model::new(&[0.0, 12.0], 1000.0, 4, 0.0, vec![], family).is_err());
    assert!(Cyton2Model::new(&[0.0, 12.0], 1000.0, 4, 0.5, vec![1], family).is_err());
}
