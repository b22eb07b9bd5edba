//! One tick of the congestion model.
//!
//! Aggregate user demand is turned into a single congestion scalar for the
//! bottleneck, biased by the selected algorithm, and fanned out to every node
//! of the topology. Throughput, packet loss and latency are all derived from
//! that scalar. Randomness comes from the caller so seeded runs replay exactly.

use netsim_abstract::{
    CongestionAlgorithm, CongestionBand, EventKind, EventLogEntry, MetricsSample, NetworkNode,
    NetworkUser, NodeKind, SimConfig,
};
use rand::Rng;
use rand::seq::IndexedRandom;
use std::f64::consts::TAU;
use tracing::debug;

pub const BASE_LATENCY_MS: f64 = 20.0;
pub const LATENCY_PER_CONGESTION_MS: f64 = 100.0;

/// Congestion above which packets start being dropped.
pub const LOSS_ONSET: f64 = 0.7;
/// Percentage points of loss per unit of congestion above the onset.
pub const LOSS_SLOPE: f64 = 50.0;
pub const MAX_PACKET_LOSS: f64 = 15.0;
pub const LOSS_WARNING: f64 = 5.0;
pub const LOSS_CRITICAL: f64 = 10.0;

const RED_THRESHOLD: f64 = 0.6;
const RED_GAIN: f64 = 1.25;
const AI_THRESHOLD: f64 = 0.5;
const AI_GAIN: f64 = 0.8;

const TREND_MIN_TICKS: u32 = 5;
const TREND_MAX_TICKS: u32 = 15;

const LOW_MESSAGES: [&str; 3] = [
    "Network operating normally.",
    "Traffic flowing smoothly across all links.",
    "Plenty of headroom on the core routers.",
];
const ELEVATED_MESSAGES: [&str; 3] = [
    "Router queues are filling up.",
    "Moderate congestion detected on the backbone.",
    "Latency is creeping up under load.",
];
const CRITICAL_MESSAGES: [&str; 3] = [
    "Routers are saturated, queues overflowing.",
    "Severe congestion across the topology.",
    "Link utilisation is at capacity.",
];

pub struct StepInput<'a> {
    pub nodes: &'a [NetworkNode],
    pub users: &'a [NetworkUser],
    pub algorithm: CongestionAlgorithm,
    /// Epoch milliseconds of this tick.
    pub now_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Network-wide congestion scalar after algorithm adjustment.
    pub congestion: f64,
    /// Aggregate offered load in Mbps.
    pub demand: f64,
    pub nodes: Vec<NetworkNode>,
    pub metrics: MetricsSample,
    pub event: Option<EventLogEntry>,
}

/// Slow multi-tick drift that keeps the output from looking static.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrendState {
    direction: i8,
    remaining: u32,
}

impl TrendState {
    pub fn direction(&self) -> i8 {
        self.direction
    }

    fn advance<R: Rng>(&mut self, rng: &mut R) {
        if self.remaining == 0 {
            self.direction = rng.random_range(-1..=1);
            self.remaining = rng.random_range(TREND_MIN_TICKS..=TREND_MAX_TICKS);
        }
        self.remaining -= 1;
    }
}

pub fn step<R: Rng>(
    input: StepInput<'_>,
    trend: &mut TrendState,
    config: &SimConfig,
    rng: &mut R,
) -> StepOutcome {
    let demand = aggregate_demand(input.users, config, input.now_ms, rng);

    let mut congestion = congestion_scalar(demand, config.capacity_mbps);
    if config.trend_strength > 0.0 {
        trend.advance(rng);
        if demand > 0.0 {
            congestion += f64::from(trend.direction) * config.trend_strength;
        }
    }
    let congestion = apply_algorithm(congestion.clamp(0.0, 1.0), input.algorithm);

    let nodes = input
        .nodes
        .iter()
        .map(|node| NetworkNode {
            congestion_level: node_congestion(node.kind, congestion),
            ..node.clone()
        })
        .collect();

    let loss = packet_loss(congestion);
    let noise = if config.latency_jitter_ms > 0.0 {
        rng.random_range(0.0..=config.latency_jitter_ms)
    } else {
        0.0
    };
    let metrics = MetricsSample {
        timestamp: input.now_ms,
        throughput: throughput(demand, config.capacity_mbps, loss),
        packet_loss: loss,
        latency: latency(congestion, noise),
    };

    let event = pick_event(loss, congestion, input.users, config, input.now_ms, rng);

    debug!(
        demand,
        congestion,
        loss,
        algorithm = %input.algorithm,
        "Simulation step"
    );

    StepOutcome {
        congestion,
        demand,
        nodes,
        metrics,
        event,
    }
}

/// Offered load in Mbps: every user's rate with per-user jitter, scaled by the
/// time-of-day wave.
pub fn aggregate_demand<R: Rng>(
    users: &[NetworkUser],
    config: &SimConfig,
    now_ms: u64,
    rng: &mut R,
) -> f64 {
    let jitter = config.demand_jitter.clamp(0.0, 1.0);
    let raw: f64 = users
        .iter()
        .map(|user| {
            let rate = user.sending_rate.max(0.0);
            if jitter > 0.0 {
                rate * (1.0 + rng.random_range(-jitter..=jitter))
            } else {
                rate
            }
        })
        .sum();
    (raw * wave_factor(config, now_ms)).max(0.0)
}

/// Multiplier in `1 ± wave_amplitude` following a sine of the wall clock.
pub fn wave_factor(config: &SimConfig, now_ms: u64) -> f64 {
    let amplitude = config.wave_amplitude.clamp(0.0, 1.0);
    if amplitude == 0.0 || config.wave_period_ms == 0 {
        return 1.0;
    }
    let phase = (now_ms % config.wave_period_ms) as f64 / config.wave_period_ms as f64;
    1.0 + amplitude * (TAU * phase).sin()
}

pub fn congestion_scalar(demand: f64, capacity: f64) -> f64 {
    if capacity.is_nan() || capacity <= 0.0 || demand.is_nan() {
        return 0.0;
    }
    (demand / capacity).clamp(0.0, 1.0)
}

/// RED steepens the curve above its threshold (drops start earlier); the
/// AI-optimized policy flattens it above its own. Both stay continuous and
/// monotone.
pub fn apply_algorithm(congestion: f64, algorithm: CongestionAlgorithm) -> f64 {
    let adjusted = match algorithm {
        CongestionAlgorithm::TcpReno => congestion,
        CongestionAlgorithm::Red if congestion > RED_THRESHOLD => {
            RED_THRESHOLD + (congestion - RED_THRESHOLD) * RED_GAIN
        }
        CongestionAlgorithm::AiOptimized if congestion > AI_THRESHOLD => {
            AI_THRESHOLD + (congestion - AI_THRESHOLD) * AI_GAIN
        }
        _ => congestion,
    };
    adjusted.clamp(0.0, 1.0)
}

pub fn node_congestion(kind: NodeKind, congestion: f64) -> f64 {
    (congestion * kind.congestion_scale()).clamp(0.0, 1.0)
}

/// Loss percentage: zero up to the onset, then linear, capped.
pub fn packet_loss(congestion: f64) -> f64 {
    ((congestion - LOSS_ONSET) * LOSS_SLOPE).clamp(0.0, MAX_PACKET_LOSS)
}

pub fn throughput(demand: f64, capacity: f64, loss: f64) -> f64 {
    (demand.min(capacity) * (1.0 - loss / 100.0)).max(0.0)
}

pub fn latency(congestion: f64, noise: f64) -> f64 {
    BASE_LATENCY_MS + congestion * LATENCY_PER_CONGESTION_MS + noise.max(0.0)
}

fn pick_event<R: Rng>(
    loss: f64,
    congestion: f64,
    users: &[NetworkUser],
    config: &SimConfig,
    now_ms: u64,
    rng: &mut R,
) -> Option<EventLogEntry> {
    if loss >= LOSS_CRITICAL {
        return Some(EventLogEntry::at(
            now_ms,
            EventKind::Warning,
            format!("CRITICAL: Congestion collapse imminent. Packet loss at {loss:.1}%."),
        ));
    }
    if loss > LOSS_WARNING {
        return Some(EventLogEntry::at(
            now_ms,
            EventKind::Warning,
            format!("High network latency detected. Packet loss at {loss:.1}%."),
        ));
    }

    if !rng.random_bool(config.event_probability.clamp(0.0, 1.0)) {
        return None;
    }

    if rng.random_bool(0.5)
        && let Some(user) = users.choose(rng)
    {
        return Some(EventLogEntry::at(
            now_ms,
            EventKind::Info,
            format!("{} is {}.", user.name, user.traffic_type.activity()),
        ));
    }

    let (kind, messages) = match CongestionBand::from_level(congestion) {
        CongestionBand::Low => (EventKind::Success, &LOW_MESSAGES),
        CongestionBand::Elevated => (EventKind::Info, &ELEVATED_MESSAGES),
        CongestionBand::Critical => (EventKind::Warning, &CRITICAL_MESSAGES),
    };
    messages
        .choose(rng)
        .map(|message| EventLogEntry::at(now_ms, kind, *message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_abstract::{TrafficType, seed_nodes, seed_users};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn run(users: &[NetworkUser], algorithm: CongestionAlgorithm, config: &SimConfig) -> StepOutcome {
        let nodes = seed_nodes();
        let mut rng = StdRng::seed_from_u64(1);
        let mut trend = TrendState::default();
        step(
            StepInput {
                nodes: &nodes,
                users,
                algorithm,
                now_ms: 1_700_000_000_000,
            },
            &mut trend,
            config,
            &mut rng,
        )
    }

    fn level(outcome: &StepOutcome, id: &str) -> f64 {
        outcome
            .nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.congestion_level)
            .unwrap()
    }

    #[test]
    fn seed_users_under_reno() {
        let outcome = run(
            &seed_users(),
            CongestionAlgorithm::TcpReno,
            &SimConfig::deterministic(),
        );

        assert!((outcome.demand - 55.0).abs() < 1e-9);
        assert!((outcome.congestion - 0.55).abs() < 1e-9);
        assert!((level(&outcome, "user-a") - 0.55).abs() < 1e-9);
        assert!((level(&outcome, "router-1") - 0.66).abs() < 1e-9);
        assert!((level(&outcome, "router-2") - 0.66).abs() < 1e-9);
        assert!((level(&outcome, "server-x") - 0.44).abs() < 1e-9);
        assert_eq!(outcome.metrics.packet_loss, 0.0);
        assert!((outcome.metrics.throughput - 55.0).abs() < 1e-9);
        assert!((outcome.metrics.latency - 75.0).abs() < 1e-9);
        assert!(outcome.event.is_none());
    }

    #[test]
    fn empty_user_list_is_idle() {
        let outcome = run(&[], CongestionAlgorithm::Red, &SimConfig::default());
        assert_eq!(outcome.demand, 0.0);
        assert_eq!(outcome.congestion, 0.0);
        assert_eq!(outcome.metrics.throughput, 0.0);
        assert_eq!(outcome.metrics.packet_loss, 0.0);
        assert!(outcome.nodes.iter().all(|n| n.congestion_level == 0.0));
    }

    #[test]
    fn overload_raises_critical_warning() {
        let users = vec![NetworkUser::new("u", "Hog", TrafficType::FileDownload, 500.0)];
        let outcome = run(&users, CongestionAlgorithm::TcpReno, &SimConfig::deterministic());

        assert_eq!(outcome.congestion, 1.0);
        assert_eq!(level(&outcome, "router-1"), 1.0);
        assert_eq!(outcome.metrics.packet_loss, MAX_PACKET_LOSS);
        assert!((outcome.metrics.throughput - 85.0).abs() < 1e-9);
        let event = outcome.event.unwrap();
        assert_eq!(event.kind, EventKind::Warning);
        assert!(event.message.starts_with("CRITICAL"), "{}", event.message);
    }

    #[test]
    fn overflowing_demand_saturates() {
        let users = vec![
            NetworkUser::new("a", "Max A", TrafficType::FileDownload, f64::MAX),
            NetworkUser::new("b", "Max B", TrafficType::FileDownload, f64::MAX),
        ];
        let outcome = run(&users, CongestionAlgorithm::TcpReno, &SimConfig::default());

        assert_eq!(outcome.demand, f64::INFINITY);
        assert_eq!(outcome.congestion, 1.0);
        assert_eq!(level(&outcome, "router-1"), 1.0);
        assert_eq!(level(&outcome, "router-2"), 1.0);
        assert_eq!(outcome.metrics.packet_loss, MAX_PACKET_LOSS);
        assert!((outcome.metrics.throughput - 85.0).abs() < 1e-9);
        assert_eq!(congestion_scalar(f64::NAN, 100.0), 0.0);
    }

    #[test]
    fn moderate_loss_raises_latency_warning() {
        // congestion 0.82 -> loss 6%
        let users = vec![NetworkUser::new("u", "Heavy", TrafficType::VideoStream, 82.0)];
        let outcome = run(&users, CongestionAlgorithm::TcpReno, &SimConfig::deterministic());
        let event = outcome.event.unwrap();
        assert_eq!(event.kind, EventKind::Warning);
        assert!(event.message.starts_with("High network latency"), "{}", event.message);
        assert!(event.message.contains("6.0%"), "{}", event.message);
    }

    #[test]
    fn algorithms_bias_congestion() {
        assert_eq!(apply_algorithm(0.8, CongestionAlgorithm::TcpReno), 0.8);
        assert!((apply_algorithm(0.8, CongestionAlgorithm::Red) - 0.85).abs() < 1e-9);
        assert!((apply_algorithm(0.8, CongestionAlgorithm::AiOptimized) - 0.74).abs() < 1e-9);
        // below both thresholds nothing changes
        for algorithm in CongestionAlgorithm::ALL {
            assert_eq!(apply_algorithm(0.4, algorithm), 0.4);
        }
        assert_eq!(apply_algorithm(1.0, CongestionAlgorithm::Red), 1.0);
    }

    #[test]
    fn certain_status_event_is_emitted_when_calm() {
        let config = SimConfig {
            event_probability: 1.0,
            ..SimConfig::deterministic()
        };
        let users = seed_users();
        let outcome = run(&users, CongestionAlgorithm::TcpReno, &config);
        let event = outcome.event.unwrap();
        let names_user = users.iter().any(|u| event.message.starts_with(&u.name));
        let is_band_message = ELEVATED_MESSAGES.contains(&event.message.as_str());
        assert!(names_user || is_band_message, "{}", event.message);
    }

    #[test]
    fn trend_holds_direction_for_several_ticks() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut trend = TrendState::default();
        trend.advance(&mut rng);
        let first = trend.direction();
        // a freshly drawn trend lasts at least TREND_MIN_TICKS ticks
        for _ in 1..TREND_MIN_TICKS {
            trend.advance(&mut rng);
            assert_eq!(trend.direction(), first);
        }
    }

    #[test]
    fn wave_factor_oscillates_within_amplitude() {
        let config = SimConfig {
            wave_amplitude: 0.2,
            wave_period_ms: 10_000,
            ..Default::default()
        };
        assert!((wave_factor(&config, 0) - 1.0).abs() < 1e-9);
        assert!((wave_factor(&config, 2_500) - 1.2).abs() < 1e-9);
        assert!((wave_factor(&config, 7_500) - 0.8).abs() < 1e-9);
        assert_eq!(wave_factor(&SimConfig::deterministic(), 2_500), 1.0);
    }

    proptest! {
        #[test]
        fn derived_values_stay_in_bounds(c in 0.0f64..=1.0, demand in 0.0f64..1_000.0, noise in 0.0f64..=5.0) {
            for kind in [NodeKind::User, NodeKind::Router, NodeKind::Server] {
                let level = node_congestion(kind, c);
                prop_assert!((0.0..=1.0).contains(&level));
            }
            let loss = packet_loss(c);
            prop_assert!((0.0..=MAX_PACKET_LOSS).contains(&loss));
            let tput = throughput(demand, 100.0, loss);
            prop_assert!((0.0..=100.0).contains(&tput));
            let lat = latency(c, noise);
            prop_assert!((BASE_LATENCY_MS..=BASE_LATENCY_MS + LATENCY_PER_CONGESTION_MS + 5.0).contains(&lat));
            for algorithm in CongestionAlgorithm::ALL {
                prop_assert!((0.0..=1.0).contains(&apply_algorithm(c, algorithm)));
            }
        }

        #[test]
        fn more_demand_never_means_less_congestion(a in 0.0f64..300.0, b in 0.0f64..300.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            for algorithm in CongestionAlgorithm::ALL {
                let c_lo = apply_algorithm(congestion_scalar(lo, 100.0), algorithm);
                let c_hi = apply_algorithm(congestion_scalar(hi, 100.0), algorithm);
                prop_assert!(c_hi >= c_lo);
            }
        }

        #[test]
        fn random_steps_stay_in_bounds(seed in any::<u64>(), rates in proptest::collection::vec(0.0f64..80.0, 0..6)) {
            let users: Vec<NetworkUser> = rates
                .iter()
                .enumerate()
                .map(|(i, rate)| NetworkUser::new(format!("u{i}"), format!("U{i}"), TrafficType::VideoStream, *rate))
                .collect();
            let nodes = seed_nodes();
            let config = SimConfig::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut trend = TrendState::default();
            for tick in 0..20u64 {
                let outcome = step(
                    StepInput { nodes: &nodes, users: &users, algorithm: CongestionAlgorithm::ALL[(tick % 3) as usize], now_ms: tick * 1000 },
                    &mut trend,
                    &config,
                    &mut rng,
                );
                prop_assert!((0.0..=1.0).contains(&outcome.congestion));
                prop_assert!(outcome.nodes.iter().all(|n| (0.0..=1.0).contains(&n.congestion_level)));
                prop_assert!(outcome.metrics.throughput >= 0.0 && outcome.metrics.throughput <= config.capacity_mbps);
                prop_assert!((0.0..=MAX_PACKET_LOSS).contains(&outcome.metrics.packet_loss));
                prop_assert!(outcome.metrics.latency >= BASE_LATENCY_MS);
                if users.iter().all(|u| u.sending_rate == 0.0) {
                    prop_assert_eq!(outcome.congestion, 0.0);
                }
            }
        }
    }
}
