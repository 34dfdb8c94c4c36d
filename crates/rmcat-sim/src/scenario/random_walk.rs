use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;

use crate::path::{PathConfig, StageDescriptor};

/// Bounds and step size of a seeded bandwidth random walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomWalkConfig {
    pub seed: u64,
    pub duration_secs: u64,
    pub step_secs: u64,
    pub min_rate_kbit: u64,
    pub max_rate_kbit: u64,
    pub rate_step_kbit: u64,
    pub latency_ms: u32,
    pub jitter_ms: u32,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            duration_secs: 120,
            step_secs: 10,
            min_rate_kbit: 500,
            max_rate_kbit: 3000,
            rate_step_kbit: 500,
            latency_ms: 50,
            jitter_ms: 0,
        }
    }
}

impl RandomWalkConfig {
    /// Produces the stage list for one link.
    ///
    /// The same seed always yields the same stages. Stages are `step_secs`
    /// long except the last, which is cut to fit `duration_secs`.
    pub fn stages(&self) -> Vec<StageDescriptor> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let (lo, hi) = if self.min_rate_kbit <= self.max_rate_kbit {
            (self.min_rate_kbit.max(1), self.max_rate_kbit.max(1))
        } else {
            (self.max_rate_kbit.max(1), self.min_rate_kbit.max(1))
        };
        let step = self.step_secs.max(1);

        let mut rate = lo as f64 + rng.random::<f64>() * (hi - lo) as f64;
        let mut stages = Vec::new();
        let mut elapsed = 0;
        while elapsed < self.duration_secs {
            let duration = step.min(self.duration_secs - elapsed);
            stages.push(StageDescriptor::new(
                duration,
                PathConfig::new(rate as u64, self.latency_ms, self.jitter_ms),
            ));
            elapsed += duration;
            rate = (rate + rand_signed(&mut rng, self.rate_step_kbit as f64))
                .clamp(lo as f64, hi as f64);
        }
        stages
    }
}

fn rand_signed(rng: &mut StdRng, max_step: f64) -> f64 {
    if max_step <= 0.0 {
        return 0.0;
    }
    let mag = rng.random::<f64>() * max_step;
    if rng.random::<bool>() { mag } else { -mag }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_is_deterministic_for_seed() {
        let cfg = RandomWalkConfig::default();
        assert_eq!(cfg.stages(), cfg.stages());

        let other = RandomWalkConfig {
            seed: 7,
            ..RandomWalkConfig::default()
        };
        let a: Vec<u64> = cfg.stages().iter().map(|s| s.config.bandwidth_kbit()).collect();
        let b: Vec<u64> = other.stages().iter().map(|s| s.config.bandwidth_kbit()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn walk_stays_in_bounds_and_fills_duration() {
        let cfg = RandomWalkConfig {
            duration_secs: 95,
            step_secs: 10,
            ..RandomWalkConfig::default()
        };
        let stages = cfg.stages();
        assert_eq!(stages.len(), 10);
        assert_eq!(stages.last().unwrap().duration_secs, 5);
        assert_eq!(stages.iter().map(|s| s.duration_secs).sum::<u64>(), 95);
        for stage in &stages {
            let bw = stage.config.bandwidth_kbit();
            assert!((500..=3000).contains(&bw), "{bw}");
            assert_eq!(stage.config.latency_ms(), 50);
        }
    }

    #[test]
    fn zero_duration_gives_no_stages() {
        let cfg = RandomWalkConfig {
            duration_secs: 0,
            ..RandomWalkConfig::default()
        };
        assert!(cfg.stages().is_empty());
    }
}
