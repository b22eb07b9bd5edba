use crate::engine::{self, StepInput, TrendState};
use crate::storage::{MemoryStorage, UserStorage};
use crate::ticker::Ticker;
use crate::trace::{RunSummary, SimulationReport};
use netsim_abstract::{
    CongestionAlgorithm, EventKind, EventLogEntry, MetricsSample, NetworkNode, NetworkUser,
    NewUser, SimConfig, TrafficType, UserPatch, seed_nodes, seed_users,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("a user named '{0}' already exists")]
    DuplicateName(String),
    #[error("no user with id '{0}'")]
    UnknownUser(String),
    #[error("sending rate must be a non-negative number, got {0}")]
    InvalidRate(f64),
    #[error("user name cannot be empty")]
    EmptyName,
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// `User A`, `User B`, ... then `User 27`, `User 28`, ...
fn default_user_name(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => format!("User {}", char::from(b'A' + i)),
        _ => format!("User {}", index + 1),
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Session-lifetime owner of all simulation state.
///
/// Every mutation goes through `&mut self`, so ticks and user actions are
/// serialized by whoever holds the store. The ticker only fires while running.
pub struct SimulationStore<S: UserStorage = MemoryStorage> {
    config: SimConfig,
    storage: S,
    running: bool,
    nodes: Vec<NetworkNode>,
    users: Vec<NetworkUser>,
    metrics: VecDeque<MetricsSample>,
    events: VecDeque<EventLogEntry>,
    algorithm: CongestionAlgorithm,
    trend: TrendState,
    ticker: Ticker,
    rng: StdRng,
    ticks: u64,
}

impl SimulationStore<MemoryStorage> {
    pub fn in_memory(config: SimConfig) -> Self {
        Self::new(config, MemoryStorage::new())
    }
}

impl<S: UserStorage> SimulationStore<S> {
    pub fn new(config: SimConfig, mut storage: S) -> Self {
        let users = load_users(&mut storage);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let ticker = Ticker::new(config.tick_interval());

        Self {
            metrics: VecDeque::with_capacity(config.metrics_retention),
            events: VecDeque::with_capacity(config.event_log_capacity),
            config,
            storage,
            running: false,
            nodes: seed_nodes(),
            users,
            algorithm: CongestionAlgorithm::default(),
            trend: TrendState::default(),
            ticker,
            rng,
            ticks: 0,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    pub fn users(&self) -> &[NetworkUser] {
        &self.users
    }

    pub fn user_by_name(&self, name: &str) -> Option<&NetworkUser> {
        self.users.iter().find(|u| same_name(&u.name, name))
    }

    /// Oldest sample first.
    pub fn metrics_history(&self) -> &VecDeque<MetricsSample> {
        &self.metrics
    }

    /// Newest entry first.
    pub fn event_log(&self) -> &VecDeque<EventLogEntry> {
        &self.events
    }

    pub fn algorithm(&self) -> CongestionAlgorithm {
        self.algorithm
    }

    /// Ticks run since the last reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.ticker.next_due()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn start(&mut self, now: Instant) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.ticker.arm(now);
        info!(algorithm = %self.algorithm, "Simulation started");
        self.log_event(EventKind::Success, "Simulation started.");
        true
    }

    pub fn pause(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.ticker.disarm();
        info!(ticks = self.ticks, "Simulation paused");
        self.log_event(EventKind::Info, "Simulation paused.");
        true
    }

    /// Back to the seed topology and seed users, idle, with empty history.
    /// The selected algorithm is kept.
    pub fn reset(&mut self) {
        self.running = false;
        self.ticker.disarm();
        self.nodes = seed_nodes();
        self.users = seed_users();
        self.metrics.clear();
        self.events.clear();
        self.trend = TrendState::default();
        self.ticks = 0;
        self.persist_users();
        info!("Simulation reset");
        self.log_event(EventKind::Info, "Simulation reset to initial state.");
    }

    pub fn set_algorithm(&mut self, algorithm: CongestionAlgorithm) {
        if self.algorithm != algorithm {
            debug!(from = %self.algorithm, to = %algorithm, "Algorithm changed");
        }
        self.algorithm = algorithm;
    }

    /// Adds a user, filling in a name, traffic type and rate where the request
    /// leaves them out. A name already in use is rejected with a warning entry
    /// in the event log.
    pub fn add_user(&mut self, request: NewUser) -> Result<String, StoreError> {
        let name = match request.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.next_default_name(),
        };
        if self.name_taken(&name, None) {
            return Err(self.reject_duplicate(name));
        }

        let traffic_type = request.traffic_type.unwrap_or_else(|| {
            TrafficType::ALL[self.rng.random_range(0..TrafficType::ALL.len())]
        });
        let sending_rate = match request.sending_rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => rate,
            _ => f64::from(self.rng.random_range(traffic_type.default_rate_range())),
        };

        let id = self.allocate_id();
        info!(%id, %name, %traffic_type, sending_rate, "User added");
        self.users.push(NetworkUser {
            id: id.clone(),
            name: name.clone(),
            traffic_type,
            sending_rate,
        });
        self.persist_users();
        self.log_event(EventKind::Info, format!("User '{name}' added."));
        Ok(id)
    }

    /// Removes a user by id. Unknown ids are ignored without an event.
    pub fn remove_user(&mut self, id: &str) -> Option<NetworkUser> {
        let index = self.users.iter().position(|u| u.id == id)?;
        let removed = self.users.remove(index);
        info!(id, name = %removed.name, "User removed");
        self.persist_users();
        self.log_event(EventKind::Info, format!("User '{}' removed.", removed.name));
        Some(removed)
    }

    pub fn update_user(&mut self, id: &str, patch: UserPatch) -> Result<(), StoreError> {
        let index = self
            .users
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| StoreError::UnknownUser(id.to_string()))?;

        if let Some(rate) = patch.sending_rate
            && !(rate.is_finite() && rate >= 0.0)
        {
            return Err(StoreError::InvalidRate(rate));
        }
        let name = match patch.name.as_deref().map(str::trim) {
            Some("") => return Err(StoreError::EmptyName),
            Some(name) => Some(name.to_string()),
            None => None,
        };
        if let Some(name) = &name
            && self.name_taken(name, Some(id))
        {
            return Err(self.reject_duplicate(name.clone()));
        }

        let user = &mut self.users[index];
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(traffic_type) = patch.traffic_type {
            user.traffic_type = traffic_type;
        }
        if let Some(rate) = patch.sending_rate {
            user.sending_rate = rate;
        }
        let message = format!("User '{}' updated.", user.name);
        info!(id, name = %user.name, sending_rate = user.sending_rate, "User updated");

        self.persist_users();
        self.log_event(EventKind::Info, message);
        Ok(())
    }

    /// Advances the simulation by one step. Does nothing while idle.
    pub fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        let outcome = engine::step(
            StepInput {
                nodes: &self.nodes,
                users: &self.users,
                algorithm: self.algorithm,
                now_ms: epoch_millis(),
            },
            &mut self.trend,
            &self.config,
            &mut self.rng,
        );

        self.nodes = outcome.nodes;
        self.metrics.push_back(outcome.metrics);
        while self.metrics.len() > self.config.metrics_retention {
            self.metrics.pop_front();
        }
        if let Some(event) = outcome.event {
            info!(kind = ?event.kind, "{}", event.message);
            self.push_event(event);
        }
        self.ticks += 1;
        debug!(
            tick = self.ticks,
            congestion = outcome.congestion,
            throughput = outcome.metrics.throughput,
            "Tick complete"
        );
        true
    }

    /// Runs a tick if the timer is due at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.running && self.ticker.poll(now) && self.tick()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::new(self.ticks, self.algorithm, &self.users, &self.metrics)
    }

    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            algorithm: self.algorithm,
            running: self.running,
            ticks: self.ticks,
            nodes: self.nodes.clone(),
            users: self.users.clone(),
            metrics: self.metrics.iter().copied().collect(),
            events: self.events.iter().cloned().collect(),
        }
    }

    fn name_taken(&self, name: &str, except_id: Option<&str>) -> bool {
        self.users
            .iter()
            .any(|u| Some(u.id.as_str()) != except_id && same_name(&u.name, name))
    }

    fn reject_duplicate(&mut self, name: String) -> StoreError {
        warn!(%name, "Rejected duplicate user name");
        self.log_event(EventKind::Warning, format!("User '{name}' already exists."));
        StoreError::DuplicateName(name)
    }

    fn next_default_name(&self) -> String {
        (self.users.len()..)
            .map(default_user_name)
            .find(|name| !self.name_taken(name, None))
            .unwrap_or_default()
    }

    fn allocate_id(&self) -> String {
        let base = format!("user-{}", epoch_millis());
        let taken = |id: &str| self.users.iter().any(|u| u.id == id);
        if !taken(&base) {
            return base;
        }
        (1..)
            .map(|n| format!("{base}-{n}"))
            .find(|id| !taken(id))
            .unwrap_or(base)
    }

    fn persist_users(&mut self) {
        if let Err(err) = self.storage.save(&self.users) {
            warn!("Failed to persist user list: {err}");
        }
    }

    fn log_event(&mut self, kind: EventKind, message: impl Into<String>) {
        self.push_event(EventLogEntry::at(epoch_millis(), kind, message));
    }

    fn push_event(&mut self, event: EventLogEntry) {
        self.events.push_front(event);
        self.events.truncate(self.config.event_log_capacity);
    }
}

/// Reads the persisted user list. Unreadable storage falls back to the seed
/// users and is overwritten with them; a missing list just uses the seed.
fn load_users<S: UserStorage>(storage: &mut S) -> Vec<NetworkUser> {
    match storage.load() {
        Ok(Some(users)) => {
            let users = sanitize(users);
            info!(count = users.len(), "Loaded users from storage");
            users
        }
        Ok(None) => {
            debug!("No stored users, starting from the seed list");
            seed_users()
        }
        Err(err) => {
            warn!("Falling back to seed users: {err}");
            let users = seed_users();
            if let Err(err) = storage.save(&users) {
                warn!("Failed to overwrite unreadable user store: {err}");
            }
            users
        }
    }
}

/// Drops records with a repeated id and clamps rates to be non-negative.
fn sanitize(users: Vec<NetworkUser>) -> Vec<NetworkUser> {
    let mut seen = HashSet::new();
    users
        .into_iter()
        .filter(|user| {
            let fresh = seen.insert(user.id.clone());
            if !fresh {
                debug!(id = %user.id, "Skipping stored user with duplicate id");
            }
            fresh
        })
        .map(|mut user| {
            if user.sending_rate.is_nan() || user.sending_rate < 0.0 {
                user.sending_rate = 0.0;
            }
            user
        })
        .collect()
}
