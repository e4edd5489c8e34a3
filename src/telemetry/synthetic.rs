use super::Sample;
use crate::config::SyntheticConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::VecDeque;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::info;

#[derive(Debug, Clone)]
struct SyntheticCell {
    cell_id: String,
    global_cell_id: String,
    sector_id: String,
    pci: u16,
    base_utilization: f64,
}

/// Generates one sample per cell on every tick, forever.
///
/// Utilization is the cell's base level plus bounded jitter, occasionally replaced
/// by a full-range random value so that cells cross the hysteresis band.
pub struct SyntheticSource {
    cells: Vec<SyntheticCell>,
    jitter: f64,
    spike_probability: f64,
    ticker: Interval,
    pending: VecDeque<Sample>,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(config: &SyntheticConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible generator for tests
    pub fn with_seed(config: &SyntheticConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SyntheticConfig, mut rng: StdRng) -> Self {
        let mut cells = Vec::with_capacity(config.groups * config.cells_per_group);
        for group in 1..=config.groups {
            for cell in 1..=config.cells_per_group {
                let base_utilization = config
                    .base_levels
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or(50.0);
                cells.push(SyntheticCell {
                    cell_id: format!(
                        "ManagedElement=o-du-{},GNBDUFunction=1,NRCellDU={}",
                        group, cell
                    ),
                    global_cell_id: format!("460-01-{:05}-{:02}", group, cell),
                    sector_id: format!("Sector {}", cell),
                    pci: rng.gen_range(1..=500),
                    base_utilization,
                });
            }
        }

        info!(
            cells = cells.len(),
            groups = config.groups,
            "generating synthetic PM data"
        );

        let mut ticker = interval(config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            cells,
            jitter: config.jitter,
            spike_probability: config.spike_probability,
            ticker,
            pending: VecDeque::new(),
            rng,
        }
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|c| c.cell_id.as_str())
    }

    pub async fn next_sample(&mut self) -> Sample {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return sample;
            }
            self.ticker.tick().await;
            self.generate_tick();
        }
    }

    fn generate_tick(&mut self) {
        let timestamp = chrono::Utc::now().to_rfc3339();

        for cell in &self.cells {
            let utilization = next_utilization(
                &mut self.rng,
                cell.base_utilization,
                self.jitter,
                self.spike_probability,
            );

            self.pending.push_back(Sample::new(json!({
                "cell_id": cell.cell_id,
                "global_cell_id": cell.global_cell_id,
                "sector_id": cell.sector_id,
                "pci": cell.pci,
                "utilization": utilization,
                "timestamp": timestamp,
            })));
        }
    }
}

fn next_utilization<R: Rng>(rng: &mut R, base: f64, jitter: f64, spike_probability: f64) -> f64 {
    let utilization = if rng.gen_bool(spike_probability) {
        rng.gen_range(0.0..=100.0)
    } else {
        base + rng.gen_range(-jitter..=jitter)
    };
    utilization.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config() -> SyntheticConfig {
        SyntheticConfig {
            groups: 2,
            cells_per_group: 3,
            tick_millis: 5,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn test_utilization_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let u = next_utilization(&mut rng, 95.0, 15.0, 0.05);
            assert!((0.0..=100.0).contains(&u));
            let u = next_utilization(&mut rng, 5.0, 15.0, 0.05);
            assert!((0.0..=100.0).contains(&u));
        }
    }

    #[test]
    fn test_jitter_is_bounded_without_spikes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let u = next_utilization(&mut rng, 45.0, 15.0, 0.0);
            assert!((30.0..=60.0).contains(&u));
        }
    }

    #[tokio::test]
    async fn test_cell_naming() {
        let source = SyntheticSource::with_seed(&config(), 1);
        let ids: Vec<&str> = source.cell_ids().collect();

        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], "ManagedElement=o-du-1,GNBDUFunction=1,NRCellDU=1");
        assert_eq!(ids[5], "ManagedElement=o-du-2,GNBDUFunction=1,NRCellDU=3");
    }

    #[tokio::test]
    async fn test_each_tick_covers_every_cell() {
        let mut source = SyntheticSource::with_seed(&config(), 42);

        let mut seen = HashSet::new();
        for _ in 0..6 {
            let sample = source.next_sample().await;
            let id = sample.payload["cell_id"].as_str().unwrap().to_string();
            let pci = sample.payload["pci"].as_u64().unwrap();
            assert!((1..=500).contains(&pci));
            seen.insert(id);
        }
        assert_eq!(seen.len(), 6);

        // A second tick repeats the same cells
        let next = source.next_sample().await;
        assert_eq!(
            next.payload["cell_id"],
            "ManagedElement=o-du-1,GNBDUFunction=1,NRCellDU=1"
        );
    }
}
