//! Command / cascade harness.
//!
//! The reference model for admission-gated state changes. Entities are
//! registered with an initial state and then evolve only through accepted
//! commands, each recorded in the entity's append-only history. A command:
//!
//! 1. passes the optional [`AdmissionCheck`] (a rejection leaves no trace)
//! 2. gets the entity's next version and overwrites its payload keys
//! 3. notifies subscribers of every key whose value actually changed
//! 4. appends its type to the cascade trace of its correlation id
//! 5. lets every [`CascadeRule`] react with follow-up commands
//!
//! Follow-ups inherit the correlation id and run breadth-first through the
//! same admission check, so the cascade trace of one correlation id lists
//! everything that happened because of the original trigger. Cascades are
//! bounded by a maximum depth.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use multiverse_types::{
    CorrelationId, EntityId, ErrorKind, Payload, SYSTEM_ACTOR, StateChange, SubscriptionId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::governance::AdmissionCheck;

/// Default bound on cascade depth.
pub const DEFAULT_MAX_CASCADE_DEPTH: u32 = 16;

/// Errors returned by harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The entity is not registered.
    #[error("entity {entity_id} not found")]
    EntityNotFound {
        /// The unknown entity.
        entity_id: EntityId,
    },

    /// The entity is already registered.
    #[error("entity {entity_id} already exists")]
    EntityExists {
        /// The duplicate entity.
        entity_id: EntityId,
    },

    /// A command or parameter was malformed.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong.
        reason: String,
    },

    /// The entity's version counter is exhausted.
    #[error("entity {entity_id} version overflow")]
    VersionOverflow {
        /// The affected entity.
        entity_id: EntityId,
    },
}

impl HarnessError {
    /// Coarse classification of the error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EntityNotFound { .. } => ErrorKind::NotFound,
            Self::EntityExists { .. } | Self::Validation { .. } => ErrorKind::Validation,
            Self::VersionOverflow { .. } => ErrorKind::Internal,
        }
    }
}

/// A request to change an entity's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Target entity.
    pub entity_id: EntityId,
    /// Domain-specific command name, recorded in the cascade trace.
    pub command_type: String,
    /// Keys to overwrite.
    pub payload: Payload,
    /// Correlation id; a fresh one is assigned when absent.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    /// Identity of the caller.
    #[serde(default = "default_actor")]
    pub actor: String,
}

impl Command {
    /// A command from the system actor with no correlation id.
    pub fn new(entity_id: EntityId, command_type: &str, payload: Payload) -> Self {
        Self {
            entity_id,
            command_type: command_type.to_owned(),
            payload,
            correlation_id: None,
            actor: default_actor(),
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub const fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the calling actor.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        actor.clone_into(&mut self.actor);
        self
    }
}

fn default_actor() -> String {
    SYSTEM_ACTOR.to_owned()
}

/// A command as recorded in an entity's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCommand {
    /// Entity the command applied to.
    pub entity_id: EntityId,
    /// Command name.
    pub command_type: String,
    /// Keys written.
    pub payload: Payload,
    /// Correlation id shared with the rest of the cascade.
    pub correlation_id: CorrelationId,
    /// Calling actor.
    pub actor: String,
    /// Entity version produced.
    pub version: u64,
    /// When the command was applied. Never earlier than the entity's
    /// previous entry.
    pub timestamp: DateTime<Utc>,
    /// 0 for a submitted command, parent depth + 1 for follow-ups.
    pub depth: u32,
}

/// Reacts to an applied command with follow-up commands.
pub trait CascadeRule: Send + Sync {
    /// Follow-ups to run after `applied` produced `changes`.
    fn follow_ups(&self, applied: &AppliedCommand, changes: &[StateChange]) -> Vec<Command>;
}

impl<F> CascadeRule for F
where
    F: Fn(&AppliedCommand, &[StateChange]) -> Vec<Command> + Send + Sync,
{
    fn follow_ups(&self, applied: &AppliedCommand, changes: &[StateChange]) -> Vec<Command> {
        self(applied, changes)
    }
}

/// Expected post-execution state, entity by entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name, echoed in the report.
    pub name: String,
    /// Keys each entity must hold. Keys not listed are not checked.
    #[serde(default)]
    pub expected: BTreeMap<EntityId, Payload>,
}

/// One discrepancy found by [`CommandHarness::verify_state_consistency`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    /// The entity is not registered.
    MissingEntity {
        /// Expected entity.
        entity_id: EntityId,
    },
    /// The entity lacks an expected key.
    MissingKey {
        /// Entity checked.
        entity_id: EntityId,
        /// Missing key.
        key: String,
        /// Value the scenario expected.
        expected: serde_json::Value,
    },
    /// The key holds a different value.
    ValueDiffers {
        /// Entity checked.
        entity_id: EntityId,
        /// Key checked.
        key: String,
        /// Value the scenario expected.
        expected: serde_json::Value,
        /// Value actually held.
        actual: serde_json::Value,
    },
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Scenario checked.
    pub scenario: String,
    /// Entities compared.
    pub entities_checked: usize,
    /// Keys compared.
    pub keys_checked: usize,
    /// Every discrepancy, in entity then key order.
    pub mismatches: Vec<Mismatch>,
}

impl ConsistencyReport {
    /// Whether live state matched the scenario exactly.
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone)]
struct EntityRecord {
    initial_state: Payload,
    created_at: DateTime<Utc>,
    state: Payload,
    version: u64,
    history: Vec<AppliedCommand>,
}

impl EntityRecord {
    fn last_timestamp(&self) -> DateTime<Utc> {
        self.history
            .last()
            .map_or(self.created_at, |entry| entry.timestamp)
    }
}

type Subscribers = BTreeMap<SubscriptionId, UnboundedSender<StateChange>>;

/// In-memory command harness.
pub struct CommandHarness {
    entities: BTreeMap<EntityId, EntityRecord>,
    subscribers: BTreeMap<EntityId, Subscribers>,
    traces: HashMap<CorrelationId, Vec<String>>,
    rules: Vec<Box<dyn CascadeRule>>,
    max_cascade_depth: u32,
}

impl core::fmt::Debug for CommandHarness {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandHarness")
            .field("entities", &self.entities.len())
            .field("traces", &self.traces.len())
            .field("rules", &self.rules.len())
            .field("max_cascade_depth", &self.max_cascade_depth)
            .finish_non_exhaustive()
    }
}

impl Default for CommandHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHarness {
    /// An empty harness with the default cascade depth.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            traces: HashMap::new(),
            rules: Vec::new(),
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }

    /// An empty harness configured from `config`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new().with_max_cascade_depth(config.max_cascade_depth)
    }

    /// Bound cascades to `depth` levels of follow-ups.
    #[must_use]
    pub const fn with_max_cascade_depth(mut self, depth: u32) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Add a cascade rule. Rules run in insertion order.
    pub fn add_rule(&mut self, rule: impl CascadeRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    /// Register an entity with its initial state at version 0.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Validation`] for a blank id or
    /// [`HarnessError::EntityExists`] if it is already registered.
    pub fn register_entity(
        &mut self,
        entity_id: EntityId,
        initial_state: Payload,
    ) -> Result<(), HarnessError> {
        if entity_id.is_blank() {
            return Err(HarnessError::Validation {
                reason: "entity id must not be blank".to_owned(),
            });
        }
        if self.entities.contains_key(&entity_id) {
            return Err(HarnessError::EntityExists { entity_id });
        }
        debug!(entity_id = %entity_id, keys = initial_state.len(), "Entity registered");
        self.entities.insert(
            entity_id,
            EntityRecord {
                state: initial_state.clone(),
                initial_state,
                created_at: Utc::now(),
                version: 0,
                history: Vec::new(),
            },
        );
        Ok(())
    }

    /// Submit a command, then run its cascade.
    ///
    /// Returns `Ok(false)` if `governance` rejected the command; nothing
    /// was changed, recorded, traced or notified in that case.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Validation`] for a blank command type.
    /// - [`HarnessError::EntityNotFound`] for an unknown entity.
    /// - [`HarnessError::VersionOverflow`] if the entity cannot advance.
    pub fn submit_command(
        &mut self,
        command: Command,
        governance: Option<&dyn AdmissionCheck>,
    ) -> Result<bool, HarnessError> {
        self.validate(&command)?;
        if governance.is_some_and(|check| !check.admit(&command)) {
            info!(
                entity_id = %command.entity_id,
                command_type = %command.command_type,
                actor = %command.actor,
                "Command rejected by governance"
            );
            return Ok(false);
        }

        let correlation_id = command.correlation_id.unwrap_or_default();
        let (applied, changes) = self.apply(command, correlation_id, 0)?;
        let mut queue = self.follow_ups(&applied, &changes);

        while let Some((mut follow_up, depth)) = queue.pop_front() {
            follow_up.correlation_id = Some(correlation_id);
            if depth > self.max_cascade_depth {
                warn!(
                    correlation_id = %correlation_id,
                    command_type = %follow_up.command_type,
                    depth,
                    max_depth = self.max_cascade_depth,
                    "Cascade depth exceeded, follow-up not applied"
                );
                continue;
            }
            if let Err(err) = self.validate(&follow_up) {
                warn!(correlation_id = %correlation_id, error = %err, "Invalid follow-up dropped");
                continue;
            }
            if governance.is_some_and(|check| !check.admit(&follow_up)) {
                debug!(
                    correlation_id = %correlation_id,
                    command_type = %follow_up.command_type,
                    "Follow-up rejected by governance"
                );
                continue;
            }
            match self.apply(follow_up, correlation_id, depth) {
                Ok((applied, changes)) => queue.extend(self.follow_ups(&applied, &changes)),
                Err(err) => {
                    warn!(correlation_id = %correlation_id, error = %err, "Follow-up failed");
                }
            }
        }
        Ok(true)
    }

    /// Rebuild an entity's state as of `timestamp` from its initial state
    /// and the history entries applied at or before that time.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::EntityNotFound`] for unknown entities.
    pub fn get_entity_state_as_of(
        &self,
        entity_id: &EntityId,
        timestamp: DateTime<Utc>,
    ) -> Result<Payload, HarnessError> {
        let record = self.record(entity_id)?;
        let mut state = record.initial_state.clone();
        for entry in record
            .history
            .iter()
            .take_while(|entry| entry.timestamp <= timestamp)
        {
            for (key, value) in &entry.payload {
                state.insert(key.clone(), value.clone());
            }
        }
        Ok(state)
    }

    /// Receive future state changes of `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::EntityNotFound`] for unknown entities.
    pub fn subscribe_to_entity(
        &mut self,
        entity_id: &EntityId,
    ) -> Result<(SubscriptionId, UnboundedReceiver<StateChange>), HarnessError> {
        self.record(entity_id)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription_id = SubscriptionId::new();
        self.subscribers
            .entry(entity_id.clone())
            .or_default()
            .insert(subscription_id, sender);
        debug!(entity_id = %entity_id, subscription_id = %subscription_id, "Subscribed");
        Ok((subscription_id, receiver))
    }

    /// Stop future notifications for a subscription. Changes already sent
    /// stay in the receiver. Returns whether the subscription existed.
    pub fn unsubscribe_from_entity(
        &mut self,
        entity_id: &EntityId,
        subscription_id: SubscriptionId,
    ) -> bool {
        let removed = self
            .subscribers
            .get_mut(entity_id)
            .and_then(|subscribers| subscribers.remove(&subscription_id))
            .is_some();
        if removed {
            debug!(entity_id = %entity_id, subscription_id = %subscription_id, "Unsubscribed");
        }
        removed
    }

    /// Number of live subscriptions on an entity.
    pub fn subscriber_count(&self, entity_id: &EntityId) -> usize {
        self.subscribers.get(entity_id).map_or(0, BTreeMap::len)
    }

    /// Compare live state with the scenario's expectations.
    pub fn verify_state_consistency(&self, scenario: &Scenario) -> ConsistencyReport {
        let mut mismatches = Vec::new();
        let mut keys_checked: usize = 0;

        for (entity_id, expected) in &scenario.expected {
            let Some(record) = self.entities.get(entity_id) else {
                mismatches.push(Mismatch::MissingEntity {
                    entity_id: entity_id.clone(),
                });
                continue;
            };
            for (key, expected_value) in expected {
                keys_checked = keys_checked.saturating_add(1);
                match record.state.get(key) {
                    None => mismatches.push(Mismatch::MissingKey {
                        entity_id: entity_id.clone(),
                        key: key.clone(),
                        expected: expected_value.clone(),
                    }),
                    Some(actual) if actual != expected_value => {
                        mismatches.push(Mismatch::ValueDiffers {
                            entity_id: entity_id.clone(),
                            key: key.clone(),
                            expected: expected_value.clone(),
                            actual: actual.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        let report = ConsistencyReport {
            scenario: scenario.name.clone(),
            entities_checked: scenario.expected.len(),
            keys_checked,
            mismatches,
        };
        if !report.is_consistent() {
            warn!(
                scenario = %report.scenario,
                mismatches = report.mismatches.len(),
                "State does not match scenario"
            );
        }
        report
    }

    /// Command types traced under `correlation_id`, in application order.
    pub fn cascade_trace(&self, correlation_id: &CorrelationId) -> Vec<String> {
        self.traces.get(correlation_id).cloned().unwrap_or_default()
    }

    /// A copy of an entity's live state.
    pub fn entity_state(&self, entity_id: &EntityId) -> Option<Payload> {
        self.entities.get(entity_id).map(|record| record.state.clone())
    }

    /// An entity's current version (0 before any command).
    pub fn entity_version(&self, entity_id: &EntityId) -> Option<u64> {
        self.entities.get(entity_id).map(|record| record.version)
    }

    /// A copy of an entity's command history.
    pub fn entity_history(&self, entity_id: &EntityId) -> Option<Vec<AppliedCommand>> {
        self.entities
            .get(entity_id)
            .map(|record| record.history.clone())
    }

    fn record(&self, entity_id: &EntityId) -> Result<&EntityRecord, HarnessError> {
        self.entities
            .get(entity_id)
            .ok_or_else(|| HarnessError::EntityNotFound {
                entity_id: entity_id.clone(),
            })
    }

    fn validate(&self, command: &Command) -> Result<(), HarnessError> {
        if command.command_type.trim().is_empty() {
            return Err(HarnessError::Validation {
                reason: "command type must not be blank".to_owned(),
            });
        }
        self.record(&command.entity_id).map(|_| ())
    }

    /// Apply an admitted command: version, state, history, trace, notify.
    fn apply(
        &mut self,
        command: Command,
        correlation_id: CorrelationId,
        depth: u32,
    ) -> Result<(AppliedCommand, Vec<StateChange>), HarnessError> {
        let record = self.entities.get_mut(&command.entity_id).ok_or_else(|| {
            HarnessError::EntityNotFound {
                entity_id: command.entity_id.clone(),
            }
        })?;
        let version = record
            .version
            .checked_add(1)
            .ok_or_else(|| HarnessError::VersionOverflow {
                entity_id: command.entity_id.clone(),
            })?;
        let timestamp = record.last_timestamp().max(Utc::now());

        let mut changes = Vec::new();
        for (key, new) in &command.payload {
            let old = record.state.insert(key.clone(), new.clone());
            if old.as_ref() != Some(new) {
                changes.push(StateChange {
                    entity_id: command.entity_id.clone(),
                    key: key.clone(),
                    old,
                    new: new.clone(),
                    version,
                    timestamp,
                    correlation_id,
                });
            }
        }

        let applied = AppliedCommand {
            entity_id: command.entity_id,
            command_type: command.command_type,
            payload: command.payload,
            correlation_id,
            actor: command.actor,
            version,
            timestamp,
            depth,
        };
        record.version = version;
        record.history.push(applied.clone());

        self.traces
            .entry(correlation_id)
            .or_default()
            .push(applied.command_type.clone());
        self.notify(&applied.entity_id, &changes);

        debug!(
            entity_id = %applied.entity_id,
            command_type = %applied.command_type,
            version,
            depth,
            changed = changes.len(),
            "Command applied"
        );
        Ok((applied, changes))
    }

    /// Send `changes` to every subscriber of `entity_id`, pruning those
    /// whose receiver is gone.
    fn notify(&mut self, entity_id: &EntityId, changes: &[StateChange]) {
        let Some(subscribers) = self.subscribers.get_mut(entity_id) else {
            return;
        };
        subscribers.retain(|subscription_id, sender| {
            let open = !sender.is_closed()
                && changes
                    .iter()
                    .all(|change| sender.send(change.clone()).is_ok());
            if !open {
                debug!(
                    entity_id = %entity_id,
                    subscription_id = %subscription_id,
                    "Pruning closed subscription"
                );
            }
            open
        });
    }

    fn follow_ups(
        &self,
        applied: &AppliedCommand,
        changes: &[StateChange],
    ) -> VecDeque<(Command, u32)> {
        let depth = applied.depth.saturating_add(1);
        self.rules
            .iter()
            .flat_map(|rule| rule.follow_ups(applied, changes))
            .map(|command| (command, depth))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use serde_json::json;

    use super::*;

    fn hero() -> EntityId {
        EntityId::new("hero")
    }

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), value.clone()))
            .collect()
    }

    fn harness_with_hero() -> CommandHarness {
        let mut harness = CommandHarness::new();
        harness
            .register_entity(hero(), payload(&[("hp", json!(100)), ("name", json!("Ayla"))]))
            .unwrap();
        harness
    }

    #[test]
    fn accepted_command_overwrites_and_versions() {
        let mut harness = harness_with_hero();
        let accepted = harness
            .submit_command(Command::new(hero(), "damage", payload(&[("hp", json!(80))])), None)
            .unwrap();
        assert!(accepted);
        assert_eq!(harness.entity_version(&hero()), Some(1));
        let state = harness.entity_state(&hero()).unwrap();
        assert_eq!(state["hp"], json!(80));
        assert_eq!(state["name"], json!("Ayla"));
    }

    #[test]
    fn rejected_command_leaves_no_trace() {
        let mut harness = harness_with_hero();
        let (_id, mut receiver) = harness.subscribe_to_entity(&hero()).unwrap();
        let correlation_id = CorrelationId::new();
        let deny = |_: &Command| false;

        let accepted = harness
            .submit_command(
                Command::new(hero(), "damage", payload(&[("hp", json!(1))]))
                    .with_correlation_id(correlation_id),
                Some(&deny),
            )
            .unwrap();

        assert!(!accepted);
        assert_eq!(harness.entity_version(&hero()), Some(0));
        assert_eq!(harness.entity_state(&hero()).unwrap()["hp"], json!(100));
        assert!(harness.entity_history(&hero()).unwrap().is_empty());
        assert!(harness.cascade_trace(&correlation_id).is_empty());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn only_changed_keys_are_notified() {
        let mut harness = harness_with_hero();
        let (_id, mut receiver) = harness.subscribe_to_entity(&hero()).unwrap();

        harness
            .submit_command(
                Command::new(
                    hero(),
                    "update",
                    payload(&[("hp", json!(100)), ("mana", json!(5)), ("name", json!("Bryn"))]),
                ),
                None,
            )
            .unwrap();

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.key, "mana");
        assert_eq!(first.old, None);
        assert_eq!(first.new, json!(5));
        assert_eq!(first.version, 1);
        let second = receiver.try_recv().unwrap();
        assert_eq!(second.key, "name");
        assert_eq!(second.old, Some(json!("Ayla")));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_stops_future_notifications_only() {
        let mut harness = harness_with_hero();
        let (id, mut receiver) = harness.subscribe_to_entity(&hero()).unwrap();

        harness
            .submit_command(Command::new(hero(), "hit", payload(&[("hp", json!(90))])), None)
            .unwrap();
        assert!(harness.unsubscribe_from_entity(&hero(), id));
        assert!(!harness.unsubscribe_from_entity(&hero(), id));
        harness
            .submit_command(Command::new(hero(), "hit", payload(&[("hp", json!(80))])), None)
            .unwrap();

        assert_eq!(receiver.try_recv().unwrap().new, json!(90));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut harness = harness_with_hero();
        let (_id, receiver) = harness.subscribe_to_entity(&hero()).unwrap();
        let (_kept, _live) = harness.subscribe_to_entity(&hero()).unwrap();
        drop(receiver);
        assert_eq!(harness.subscriber_count(&hero()), 2);

        harness
            .submit_command(Command::new(hero(), "hit", payload(&[("hp", json!(1))])), None)
            .unwrap();
        assert_eq!(harness.subscriber_count(&hero()), 1);
    }

    #[test]
    fn state_as_of_replays_history() {
        let mut harness = harness_with_hero();
        for hp in [90, 70, 40] {
            harness
                .submit_command(Command::new(hero(), "hit", payload(&[("hp", json!(hp))])), None)
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let history = harness.entity_history(&hero()).unwrap();

        let at_second = harness
            .get_entity_state_as_of(&hero(), history[1].timestamp)
            .unwrap();
        assert_eq!(at_second["hp"], json!(70));

        let before = harness
            .get_entity_state_as_of(&hero(), history[0].timestamp - chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(before["hp"], json!(100));

        let now = harness.get_entity_state_as_of(&hero(), Utc::now()).unwrap();
        assert_eq!(now, harness.entity_state(&hero()).unwrap());
    }

    #[test]
    fn cascade_follow_ups_share_correlation_and_trace() {
        let mut harness = harness_with_hero();
        harness.register_entity(EntityId::new("party"), Payload::new()).unwrap();
        harness.add_rule(|applied: &AppliedCommand, changes: &[StateChange]| {
            if applied.command_type == "damage" && changes.iter().any(|c| c.key == "hp") {
                let morale = payload(&[("morale", json!("low"))]);
                let bleeding = payload(&[("bleeding", json!(true))]);
                vec![
                    Command::new(EntityId::new("party"), "morale_drop", morale),
                    Command::new(applied.entity_id.clone(), "bleed", bleeding),
                ]
            } else {
                Vec::new()
            }
        });
        let correlation_id = CorrelationId::new();

        harness
            .submit_command(
                Command::new(hero(), "damage", payload(&[("hp", json!(50))]))
                    .with_correlation_id(correlation_id),
                None,
            )
            .unwrap();

        assert_eq!(
            harness.cascade_trace(&correlation_id),
            vec!["damage", "morale_drop", "bleed"]
        );
        let party = harness.entity_history(&EntityId::new("party")).unwrap();
        assert_eq!(party[0].correlation_id, correlation_id);
        assert_eq!(party[0].depth, 1);
        assert_eq!(harness.entity_version(&hero()), Some(2));
    }

    #[test]
    fn cascade_depth_is_bounded() {
        let mut harness = harness_with_hero().with_max_cascade_depth(3);
        harness.add_rule(|applied: &AppliedCommand, _: &[StateChange]| {
            vec![Command::new(
                applied.entity_id.clone(),
                "echo",
                payload(&[("depth", json!(applied.depth))]),
            )]
        });
        let correlation_id = CorrelationId::new();

        harness
            .submit_command(
                Command::new(hero(), "shout", Payload::new()).with_correlation_id(correlation_id),
                None,
            )
            .unwrap();

        assert_eq!(
            harness.cascade_trace(&correlation_id),
            vec!["shout", "echo", "echo", "echo"]
        );
        assert_eq!(harness.entity_state(&hero()).unwrap()["depth"], json!(2));
    }

    #[test]
    fn config_sets_cascade_depth() {
        let mut harness = CommandHarness::from_config(&HarnessConfig {
            max_cascade_depth: 1,
        });
        harness.register_entity(hero(), Payload::new()).unwrap();
        harness.add_rule(|applied: &AppliedCommand, _: &[StateChange]| {
            vec![Command::new(applied.entity_id.clone(), "echo", Payload::new())]
        });
        let correlation_id = CorrelationId::new();
        harness
            .submit_command(
                Command::new(hero(), "shout", Payload::new()).with_correlation_id(correlation_id),
                None,
            )
            .unwrap();
        assert_eq!(harness.cascade_trace(&correlation_id), vec!["shout", "echo"]);
    }

    #[test]
    fn rejected_follow_up_is_dropped() {
        let mut harness = harness_with_hero();
        harness.add_rule(|applied: &AppliedCommand, _: &[StateChange]| {
            vec![Command::new(applied.entity_id.clone(), "forbidden", Payload::new())]
        });
        let correlation_id = CorrelationId::new();
        let policy = |command: &Command| command.command_type != "forbidden";

        let accepted = harness
            .submit_command(
                Command::new(hero(), "allowed", Payload::new()).with_correlation_id(correlation_id),
                Some(&policy),
            )
            .unwrap();

        assert!(accepted);
        assert_eq!(harness.cascade_trace(&correlation_id), vec!["allowed"]);
        assert_eq!(harness.entity_version(&hero()), Some(1));
    }

    #[test]
    fn validation_errors() {
        let mut harness = harness_with_hero();
        let err = harness
            .submit_command(Command::new(hero(), "  ", Payload::new()), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = harness
            .submit_command(Command::new(EntityId::new("ghost"), "hit", Payload::new()), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = harness.register_entity(hero(), Payload::new()).unwrap_err();
        assert!(matches!(err, HarnessError::EntityExists { .. }));
        assert!(harness.subscribe_to_entity(&EntityId::new("ghost")).is_err());
    }

    #[test]
    fn consistency_report_lists_mismatches() {
        let mut harness = harness_with_hero();
        harness
            .submit_command(Command::new(hero(), "hit", payload(&[("hp", json!(60))])), None)
            .unwrap();

        let scenario: Scenario = serde_json::from_value(json!({
            "name": "after hit",
            "expected": {
                "hero": { "hp": 60, "name": "Bryn", "level": 2 },
                "villain": { "hp": 10 }
            }
        }))
        .unwrap();
        let report = harness.verify_state_consistency(&scenario);

        assert!(!report.is_consistent());
        assert_eq!(report.entities_checked, 2);
        assert_eq!(report.keys_checked, 3);
        assert_eq!(
            report.mismatches,
            vec![
                Mismatch::MissingKey {
                    entity_id: hero(),
                    key: "level".to_owned(),
                    expected: json!(2),
                },
                Mismatch::ValueDiffers {
                    entity_id: hero(),
                    key: "name".to_owned(),
                    expected: json!("Bryn"),
                    actual: json!("Ayla"),
                },
                Mismatch::MissingEntity {
                    entity_id: EntityId::new("villain"),
                },
            ]
        );
    }

    #[test]
    fn matching_scenario_is_consistent() {
        let harness = harness_with_hero();
        let mut expected = BTreeMap::new();
        expected.insert(hero(), payload(&[("hp", json!(100))]));
        let report = harness.verify_state_consistency(&Scenario {
            name: "initial".to_owned(),
            expected,
        });
        assert!(report.is_consistent());
    }
}
