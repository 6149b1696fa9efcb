use colony_common::{Agent, IndexKind, SimulationConfig, SyntheticConfig, Trajectory};
use colony_engine::diffusion::{DiffusionField, FieldGeometry};
use colony_engine::{synthetic, Simulation};

fn config(body: &str) -> SimulationConfig {
    let toml = format!(
        r#"
        {body}

        [output]
        base_filename = "scenario"
        "#
    );
    SimulationConfig::from_toml_str(&toml).unwrap()
}

fn phenotype_config(extra: &str) -> SimulationConfig {
    config(&format!(
        r#"
        [grid]
        width = 60
        height = 40
        diffusion_rate = 20.0
        dt = 0.1

        [timing]
        macro_dt = 0.5

        [engine]
        seed = 9

        [phenotype]
        signal = 0.3
        basal_switch_rate = 0.01

        {extra}
        "#
    ))
}

fn colony(seed: u64, steps: u32, params: &colony_common::SimParams) -> Trajectory {
    let synthetic = SyntheticConfig { founders: 6, steps, division_interval_steps: 10, jitter: 0.4, seed };
    synthetic::generate(&synthetic, params).unwrap()
}

fn run(sim: &mut Simulation) -> Vec<colony_common::StepStatistics> {
    let mut stats = Vec::new();
    while let Some(out) = sim.step().unwrap() {
        stats.push(out.statistics);
    }
    stats
}

#[test]
fn source_sink_field_stays_finite_and_non_negative() {
    let geometry = FieldGeometry { width: 100, height: 60, dx: 1.0, diffusion_rate: 100.0, dt: 0.1, max_concentration: 1e6 };
    let mut field = DiffusionField::new("signal", geometry).unwrap();
    field.add_source(30 * 100 + 30, 4.0);
    field.add_sink(30 * 100 + 69, 4.0);
    let mass = |f: &DiffusionField| f.values().iter().sum::<f64>();

    let mut repaired = 0;
    let mut previous = mass(&field);
    for _ in 0..5 {
        let report = field.advance(1.0).unwrap();
        assert_eq!(report.substeps, 10);
        repaired += report.repaired_cells;
        assert!(field.values().iter().all(|v| v.is_finite() && *v >= 0.0 && *v <= 1e6));

        // Source and sink cancel, so only zeroing undershoots changes the total, and only upward
        let current = mass(&field);
        assert!(current >= previous - 1e-9, "mass fell from {previous} to {current}");
        previous = current;
    }
    assert!(repaired > 0);
    assert!(previous > 0.0);

    let peak = field.values().iter().cloned().fold(0.0, f64::max);
    assert!(peak > 0.0);
    let half_mass = |cols: std::ops::Range<usize>| -> f64 {
        field.values().chunks(100).map(|row| row[cols.clone()].iter().sum::<f64>()).sum()
    };
    assert!(half_mass(0..50) > half_mass(50..100));
}

#[test]
fn adi_agrees_with_fine_explicit_scheme() {
    let geometry = FieldGeometry { width: 30, height: 20, dx: 1.0, diffusion_rate: 10.0, dt: 0.01, max_concentration: 1e6 };
    let mut adi = DiffusionField::new("adi", geometry).unwrap();
    for j in 0..20 {
        for i in 0..30 {
            let (x, y) = (i as f64 - 15.0, j as f64 - 10.0);
            adi.set_value(j * 30 + i, (-(x * x + y * y) / 18.0).exp());
        }
    }
    let mut ftcs = adi.clone();

    let report = adi.advance(0.02).unwrap();
    assert_eq!(report.substeps, 2);
    ftcs.advance_explicit(0.02, 0.001).unwrap();

    let range = adi.values().iter().cloned().fold(f64::MIN, f64::max);
    let worst = adi.values().iter().zip(ftcs.values()).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
    assert!(worst < 1e-2 * range, "max difference {worst}");
}

fn gaussian_field(name: &str, dt: f64) -> DiffusionField {
    let geometry = FieldGeometry { width: 30, height: 20, dx: 1.0, diffusion_rate: 10.0, dt, max_concentration: 1e6 };
    let mut field = DiffusionField::new(name, geometry).unwrap();
    for j in 0..20 {
        for i in 0..30 {
            let (x, y) = (i as f64 - 15.0, j as f64 - 10.0);
            field.set_value(j * 30 + i, (-(x * x + y * y) / 18.0).exp());
        }
    }
    field
}

fn max_difference(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(p, q)| (p - q).abs()).fold(0.0, f64::max)
}

#[test]
fn adi_tracks_explicit_scheme_over_a_full_second() {
    let mut coarse = gaussian_field("coarse", 0.05);
    let mut fine = gaussian_field("fine", 0.025);
    let mut reference = gaussian_field("reference", 0.025);

    assert_eq!(coarse.advance(1.0).unwrap().substeps, 20);
    assert_eq!(fine.advance(1.0).unwrap().substeps, 40);
    reference.advance_explicit(1.0, 0.001).unwrap();

    let peak = reference.values().iter().cloned().fold(0.0, f64::max);
    assert!(peak > 0.2 && peak < 0.5, "peak {peak}");
    let tolerance = 2e-3 * peak;
    let coarse_err = max_difference(coarse.values(), reference.values());
    let fine_err = max_difference(fine.values(), reference.values());
    assert!(coarse_err < tolerance, "dt 0.05 differs by {coarse_err}");
    assert!(fine_err < tolerance, "dt 0.025 differs by {fine_err}");
    assert!(max_difference(coarse.values(), fine.values()) < tolerance);

    // No-flux walls conserve mass under both schemes
    let mass = |f: &DiffusionField| f.values().iter().sum::<f64>();
    let initial = mass(&gaussian_field("initial", 0.05));
    assert!((mass(&coarse) - initial).abs() < 1e-9 * initial);
    assert!((mass(&reference) - initial).abs() < 1e-9 * initial);
}

#[test]
fn zero_signal_keeps_phenotypes_fixed() {
    let mut cfg = phenotype_config("");
    cfg.phenotype.signal = 0.0;
    cfg.phenotype.basal_switch_rate = 0.0;
    let mut sim = Simulation::new(cfg).unwrap();

    let agents: Vec<Agent> = (1..=40).map(|id| Agent::new(id, (id % 8) as f64 * 2.0 - 8.0, (id / 8) as f64 * 2.0 - 5.0)).collect();
    let mut trajectory = Trajectory::new();
    for step in 0..100 {
        trajectory.insert(step, agents.clone());
    }
    sim.load_trajectory(trajectory).unwrap();

    let stats = run(&mut sim);
    assert_eq!(stats.len(), 100);
    let first = &stats[0];
    assert_eq!(first.count_a + first.count_b, 40);
    for s in &stats {
        assert_eq!(s.count_a, first.count_a);
        assert!(s.field_means["signal"].is_finite());
    }
    assert!(sim.field("signal").unwrap().iter().all(|v| *v >= 0.0));
}

#[test]
fn constant_secretion_integrates_linearly() {
    let cfg = config(
        r#"
        [grid]
        width = 20
        height = 20
        diffusion_rate = 5.0
        dt = 0.05

        [timing]
        macro_dt = 0.1

        [engine]
        mode = "cytoplasm"

        [cytoplasm]
        circuit = "constant_secretion"
        euler_dt = 0.01

        [cytoplasm.parameters]
        production = 0.5
        secretion = 2.0
        "#,
    );
    let mut sim = Simulation::new(cfg).unwrap();
    let mut trajectory = Trajectory::new();
    for step in 0..20 {
        trajectory.insert(step, vec![Agent::new(1, 0.0, 0.0)]);
    }
    sim.load_trajectory(trajectory).unwrap();
    let stats = run(&mut sim);

    // Closed-form Euler sum: 20 * 0.5 * 0.01
    let value = sim.interior_value(1, "signal").unwrap();
    assert!((value - 0.1).abs() < 1e-12, "{value}");
    assert!((stats[19].species_means["signal"] - 0.1).abs() < 1e-12);
    // 20 steps of 2.0/s over 0.1 s land in a 400-cell field with no-flux walls
    let total: f64 = sim.field("signal").unwrap().iter().sum();
    assert!((total - 4.0).abs() < 1e-6, "{total}");
}

#[test]
fn species_history_keeps_a_row_for_empty_steps() {
    let cfg = config(
        r#"
        [grid]
        width = 20
        height = 20
        diffusion_rate = 5.0
        dt = 0.05

        [timing]
        macro_dt = 0.1

        [engine]
        mode = "cytoplasm"

        [cytoplasm]
        circuit = "constant_secretion"
        "#,
    );
    let mut sim = Simulation::new(cfg).unwrap();
    let mut trajectory = Trajectory::new();
    trajectory.insert(0, vec![Agent::new(1, 0.0, 0.0)]);
    trajectory.insert(1, Vec::new());
    trajectory.insert(2, vec![Agent::new(1, 0.0, 0.0)]);
    sim.load_trajectory(trajectory).unwrap();
    let stats = run(&mut sim);
    assert_eq!(stats.len(), 3);

    let history = sim.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history.species_means["signal"].len(), history.len());
    assert_eq!(history.species_means["signal"][1], 0.0);
    for series in history.field_means.values() {
        assert_eq!(series.len(), history.len());
    }
}

#[test]
fn producer_receiver_roles_replay_with_the_seed() {
    let circuit = || {
        config(
            r#"
            [grid]
            width = 30
            height = 20
            diffusion_rate = 5.0
            dt = 0.1

            [timing]
            macro_dt = 1.0

            [engine]
            mode = "cytoplasm"
            seed = 17

            [cytoplasm]
            circuit = "producer_receiver"
            "#,
        )
    };
    let agents: Vec<Agent> = (1..=40).map(|id| Agent::new(id, (id % 10) as f64 - 5.0, (id / 10) as f64 - 2.0)).collect();
    let mut trajectory = Trajectory::new();
    for step in 0..10 {
        trajectory.insert(step, agents.clone());
    }

    let mut first = Simulation::new(circuit()).unwrap();
    let mut second = Simulation::new(circuit()).unwrap();
    first.load_trajectory(trajectory.clone()).unwrap();
    second.load_trajectory(trajectory).unwrap();
    let a = run(&mut first);
    assert_eq!(a, run(&mut second));

    let share = a[0].species_means["producer"];
    assert!(share > 0.0 && share < 1.0, "{share}");
    assert!(a.iter().all(|s| (s.species_means["producer"] - share).abs() < 1e-12));
    assert!(first.field("P").unwrap().iter().sum::<f64>() > 0.0);
}

#[test]
fn grid_and_quadtree_give_identical_statistics() {
    let grid_cfg = phenotype_config("");
    let mut tree_cfg = grid_cfg.clone();
    tree_cfg.neighbors.index = IndexKind::Quadtree;

    let mut by_grid = Simulation::new(grid_cfg).unwrap();
    let mut by_tree = Simulation::new(tree_cfg).unwrap();
    let trajectory = colony(3, 35, by_grid.params());
    by_grid.load_trajectory(trajectory.clone()).unwrap();
    by_tree.load_trajectory(trajectory).unwrap();

    let a = run(&mut by_grid);
    let b = run(&mut by_tree);
    assert_eq!(a.len(), 35);
    assert_eq!(a, b);
}

#[test]
fn equal_seeds_replay_identically() {
    let mut first = Simulation::new(phenotype_config("")).unwrap();
    let mut second = Simulation::new(phenotype_config("")).unwrap();
    let trajectory = colony(11, 30, first.params());
    first.load_trajectory(trajectory.clone()).unwrap();
    second.load_trajectory(trajectory.clone()).unwrap();
    assert_eq!(run(&mut first), run(&mut second));
    assert_eq!(first.field("signal"), second.field("signal"));

    // Reset replays the same run again
    let before = first.history().clone();
    first.load_trajectory(trajectory).unwrap();
    run(&mut first);
    assert_eq!(first.history().count_a, before.count_a);
}

#[test]
fn offloaded_diffusion_matches_in_process() {
    let local_cfg = phenotype_config("");
    let offload_cfg = phenotype_config(
        r#"
        [offload]
        enabled = true
        timeout_ms = 60000
        "#,
    );
    let mut local = Simulation::new(local_cfg).unwrap();
    let mut offloaded = Simulation::new(offload_cfg).unwrap();
    let trajectory = colony(5, 15, local.params());
    local.load_trajectory(trajectory.clone()).unwrap();
    offloaded.load_trajectory(trajectory).unwrap();

    let a = run(&mut local);
    let b = run(&mut offloaded);
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.count_a, y.count_a);
    }
    let diff = local
        .field("signal")
        .unwrap()
        .iter()
        .zip(offloaded.field("signal").unwrap())
        .map(|(p, q)| (p - q).abs())
        .fold(0.0, f64::max);
    assert!(diff < 1e-12, "{diff}");
}

#[test]
fn runtime_parameters_change_the_dynamics() {
    let mut sim = Simulation::new(phenotype_config("")).unwrap();
    let trajectory = colony(2, 10, sim.params());
    sim.load_trajectory(trajectory).unwrap();
    sim.step().unwrap();

    sim.set_parameter("source_rate", 0.0).unwrap();
    sim.set_parameter("sink_rate", 0.0).unwrap();
    sim.set_parameter("diffusion_rate", 0.0).unwrap();
    let before = sim.field_snapshot("signal").unwrap();
    sim.step().unwrap();
    assert_eq!(sim.field("signal").unwrap(), before.as_slice());

    assert!(sim.set_parameter("production", 1.0).is_err());
    assert_eq!(sim.params().source_rate, 0.0);
}
