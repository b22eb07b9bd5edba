use netsim_abstract::{
    CongestionAlgorithm, EventLogEntry, MetricsSample, NetworkNode, NetworkUser, SimConfig,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub algorithm: CongestionAlgorithm,
    pub running: bool,
    pub ticks: u64,
    pub nodes: Vec<NetworkNode>,
    pub users: Vec<NetworkUser>,
    /// Oldest first.
    pub metrics: Vec<MetricsSample>,
    /// Newest first.
    pub events: Vec<EventLogEntry>,
}

impl SimulationReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary::new(self.ticks, self.algorithm, &self.users, &self.metrics)
    }
}

/// Headline numbers over the retained metrics window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub ticks: u64,
    pub algorithm: CongestionAlgorithm,
    pub users: usize,
    pub offered_mbps: f64,
    pub mean_throughput: f64,
    pub mean_latency: f64,
    pub peak_packet_loss: f64,
}

impl RunSummary {
    pub fn new<'a>(
        ticks: u64,
        algorithm: CongestionAlgorithm,
        users: &[NetworkUser],
        metrics: impl IntoIterator<Item = &'a MetricsSample>,
    ) -> Self {
        let mut samples = 0usize;
        let mut throughput = 0.0;
        let mut latency = 0.0;
        let mut peak_packet_loss: f64 = 0.0;
        for sample in metrics {
            samples += 1;
            throughput += sample.throughput;
            latency += sample.latency;
            peak_packet_loss = peak_packet_loss.max(sample.packet_loss);
        }
        let mean = |total: f64| if samples == 0 { 0.0 } else { total / samples as f64 };

        Self {
            ticks,
            algorithm,
            users: users.len(),
            offered_mbps: users.iter().map(|u| u.sending_rate).sum(),
            mean_throughput: mean(throughput),
            mean_latency: mean(latency),
            peak_packet_loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_abstract::seed_users;

    fn sample(throughput: f64, latency: f64, packet_loss: f64) -> MetricsSample {
        MetricsSample {
            timestamp: 0,
            throughput,
            latency,
            packet_loss,
        }
    }

    #[test]
    fn averages_retained_window() {
        let metrics = [sample(50.0, 60.0, 0.0), sample(70.0, 90.0, 4.0)];
        let summary = RunSummary::new(9, CongestionAlgorithm::Red, &seed_users(), &metrics);
        assert_eq!(summary.users, 2);
        assert_eq!(summary.offered_mbps, 55.0);
        assert_eq!(summary.mean_throughput, 60.0);
        assert_eq!(summary.mean_latency, 75.0);
        assert_eq!(summary.peak_packet_loss, 4.0);
    }

    #[test]
    fn empty_history_is_zero() {
        let summary = RunSummary::new(0, CongestionAlgorithm::TcpReno, &[], &[]);
        assert_eq!(summary.mean_throughput, 0.0);
        assert_eq!(summary.offered_mbps, 0.0);
    }
}
