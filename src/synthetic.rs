use anyhow::Result;
use colony_common::{angle_to_vec, Agent, SimParams, SyntheticConfig, Trajectory};
use log::{debug, info, warn};
use rand::distr::Uniform;
use rand::prelude::*;
use rand::seq::SliceRandom;
use rand_distr::Normal;

/// Founders are spread over this fraction of the grid extent around the centre.
const FOUNDER_SPREAD: f64 = 0.5;
const BIRTH_LENGTH: f64 = 1.0;

/// Places `count` founders by jittered sampling of shuffled bins in the central region.
fn place_founders(count: u32, params: &SimParams, rng: &mut StdRng) -> Result<Vec<(f64, f64)>> {
    let x_max = params.half_extent_x * FOUNDER_SPREAD;
    let y_max = params.half_extent_y * FOUNDER_SPREAD;
    let width = 2.0 * x_max;
    let height = 2.0 * y_max;

    let cols = ((count as f64 * width / height).sqrt().floor() as usize).max(1);
    let rows = (count as usize).div_ceil(cols).max(1);
    let mut bins: Vec<(usize, usize)> = (0..cols).flat_map(|ix| (0..rows).map(move |iy| (ix, iy))).collect();
    bins.shuffle(rng);
    bins.truncate(count as usize);

    let cell_w = width / cols as f64;
    let cell_h = height / rows as f64;
    let mut positions = Vec::with_capacity(count as usize);
    for (ix, iy) in bins {
        let x0 = -x_max + ix as f64 * cell_w;
        let y0 = -y_max + iy as f64 * cell_h;
        let px = rng.sample(Uniform::new(x0, x0 + cell_w)?);
        let py = rng.sample(Uniform::new(y0, y0 + cell_h)?);
        positions.push((px, py));
    }
    Ok(positions)
}

/// Keeps a position on the grid; returns whether it had to move.
fn clamp_to_grid(agent: &mut Agent, params: &SimParams) -> bool {
    let x = agent.x.clamp(-params.half_extent_x, params.half_extent_x);
    let y = agent.y.clamp(-params.half_extent_y, params.half_extent_y);
    let moved = x != agent.x || y != agent.y;
    agent.x = x;
    agent.y = y;
    moved
}

/// Generates a dividing colony for demo runs without a recorded trajectory.
///
/// Founder `k` gets id `founders + k`, so daughter ids `2p` and `2p + 1` never collide with a
/// founder. Every `division_interval_steps` each agent is replaced by its two daughters placed
/// at either pole; in between, cells grow and drift by Gaussian jitter.
pub fn generate(config: &SyntheticConfig, params: &SimParams) -> Result<Trajectory> {
    if config.founders == 0 {
        anyhow::bail!("input.synthetic.founders must be greater than 0.");
    }
    if config.division_interval_steps == 0 {
        anyhow::bail!("input.synthetic.division_interval_steps must be greater than 0.");
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let jitter = Normal::new(0.0, config.jitter.max(0.0))?;
    let angle_dist = Uniform::new(0.0, std::f64::consts::TAU)?;
    let growth = BIRTH_LENGTH / config.division_interval_steps as f64;

    let founders = config.founders as u64;
    let mut agents: Vec<Agent> = place_founders(config.founders, params, &mut rng)?
        .into_iter()
        .enumerate()
        .map(|(k, (x, y))| {
            let mut agent = Agent::new(founders + k as u64, x, y);
            agent.angle = rng.sample(&angle_dist);
            agent.length = BIRTH_LENGTH;
            agent
        })
        .collect();

    let mut trajectory = Trajectory::new();
    let mut clamped = 0usize;
    for step in 0..config.steps {
        if step > 0 && step % config.division_interval_steps == 0 {
            let mut next = Vec::with_capacity(agents.len() * 2);
            for mother in &agents {
                let first = mother
                    .id
                    .checked_mul(2)
                    .filter(|id| id.checked_add(1).is_some())
                    .ok_or_else(|| anyhow::anyhow!("Lineage id of agent {} overflows at step {}.", mother.id, step))?;
                let axis = angle_to_vec(mother.angle);
                let offset = mother.length / 4.0;
                for (id, sign) in [(first, -1.0), (first + 1, 1.0)] {
                    let (x, y) = (mother.x + sign * offset * axis.x, mother.y + sign * offset * axis.y);
                    let mut daughter = Agent::new(id, x, y);
                    daughter.angle = mother.angle + rng.sample(&jitter) * 0.1;
                    daughter.length = BIRTH_LENGTH;
                    next.push(daughter);
                }
            }
            debug!("Synthetic step {}: {} agents divided into {}.", step, agents.len(), next.len());
            agents = next;
        } else if step > 0 {
            for agent in agents.iter_mut() {
                agent.x += rng.sample(&jitter);
                agent.y += rng.sample(&jitter);
                agent.length += growth;
            }
        }
        for agent in agents.iter_mut() {
            if clamp_to_grid(agent, params) {
                clamped += 1;
            }
        }
        trajectory.insert(step, agents.clone());
    }

    if clamped > 0 {
        warn!("Synthetic colony: {} agent positions clamped to the grid boundary.", clamped);
    }
    info!(
        "Generated synthetic trajectory: {} founders, {} steps, {} agents at the last step.",
        config.founders,
        config.steps,
        agents.len()
    );
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_common::SimulationConfig;
    use std::collections::HashSet;

    fn params() -> SimParams {
        let config = SimulationConfig::from_toml_str(
            r#"
            [grid]
            width = 40
            height = 30
            diffusion_rate = 1.0
            dt = 0.1

            [timing]
            macro_dt = 1.0

            [output]
            base_filename = "synthetic"
            "#,
        )
        .unwrap();
        config.get_sim_params()
    }

    fn synthetic(founders: u32, steps: u32, interval: u32) -> SyntheticConfig {
        SyntheticConfig { founders, steps, division_interval_steps: interval, jitter: 0.3, seed: 5 }
    }

    #[test]
    fn daughters_follow_lineage_numbering() {
        let params = params();
        let trajectory = generate(&synthetic(3, 11, 5), &params).unwrap();
        assert_eq!(trajectory.len(), 11);

        let founders: Vec<u64> = trajectory.get(0).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(founders.iter().copied().collect::<HashSet<_>>(), HashSet::from([3, 4, 5]));

        let before: HashSet<u64> = trajectory.get(4).unwrap().iter().map(|a| a.id).collect();
        let after = trajectory.get(5).unwrap();
        assert_eq!(after.len(), 6);
        for daughter in after {
            assert!(before.contains(&(daughter.id >> 1)));
        }
        assert_eq!(trajectory.get(10).unwrap().len(), 12);
    }

    #[test]
    fn positions_stay_on_the_grid_and_ids_are_unique() {
        let params = params();
        let mut config = synthetic(6, 40, 8);
        config.jitter = 5.0;
        let trajectory = generate(&config, &params).unwrap();
        for agents in trajectory.steps.values() {
            let ids: HashSet<u64> = agents.iter().map(|a| a.id).collect();
            assert_eq!(ids.len(), agents.len());
            assert!(agents.iter().all(|a| params.contains(a.x, a.y)));
        }
    }

    #[test]
    fn same_seed_same_colony() {
        let params = params();
        let a = generate(&synthetic(4, 20, 6), &params).unwrap();
        let b = generate(&synthetic(4, 20, 6), &params).unwrap();
        assert_eq!(a.steps, b.steps);
    }

    #[test]
    fn rejects_degenerate_settings() {
        let params = params();
        assert!(generate(&synthetic(0, 10, 5), &params).is_err());
        assert!(generate(&synthetic(2, 10, 0), &params).is_err());
    }
}
