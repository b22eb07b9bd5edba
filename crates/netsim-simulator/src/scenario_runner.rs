use crate::storage::UserStorage;
use crate::store::SimulationStore;
use netsim_abstract::{Scenario, ScenarioAction};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub ticks: u64,
    /// Actions the store refused, e.g. duplicate names or unknown users.
    pub rejected_actions: usize,
}

/// Replays a scenario's actions against the store, back to back without
/// waiting for the timer. The store is left idle.
pub fn run_scenario<S: UserStorage>(
    store: &mut SimulationStore<S>,
    scenario: &Scenario,
) -> ScenarioOutcome {
    info!("Running scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }
    if let Some(algorithm) = scenario.algorithm {
        store.set_algorithm(algorithm);
    }

    let mut outcome = ScenarioOutcome::default();
    for action in &scenario.actions {
        match action {
            ScenarioAction::AddUser { .. } => {
                let request = action.new_user().unwrap_or_default();
                if let Err(err) = store.add_user(request) {
                    warn!("Scenario action rejected: {err}");
                    outcome.rejected_actions += 1;
                }
            }
            ScenarioAction::RemoveUser { name } => {
                let id = store.user_by_name(name).map(|u| u.id.clone());
                match id {
                    Some(id) => {
                        store.remove_user(&id);
                    }
                    None => {
                        warn!("Scenario removes unknown user '{name}'");
                        outcome.rejected_actions += 1;
                    }
                }
            }
            ScenarioAction::SetAlgorithm { algorithm } => store.set_algorithm(*algorithm),
            ScenarioAction::RunTicks { count } => {
                store.start(Instant::now());
                for _ in 0..*count {
                    if store.tick() {
                        outcome.ticks += 1;
                    }
                }
                store.pause();
            }
            ScenarioAction::Reset => store.reset(),
        }
    }

    info!(
        ticks = outcome.ticks,
        rejected = outcome.rejected_actions,
        "Scenario finished"
    );
    outcome
}
