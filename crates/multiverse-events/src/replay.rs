//! Replay primitives: folding envelopes into materialized state.
//!
//! Only three event types carry built-in semantics:
//!
//! | Type | Effect |
//! |------|--------|
//! | `StateSet` | shallow-merge payload keys, last write wins |
//! | `StateIncrement` | add each payload number to the key (missing = 0) |
//! | `StateRemove` | delete the keys listed under `keys` |
//!
//! Custom event types advance the version and timestamp but leave the
//! values alone, so the store stays free of business logic.

use multiverse_types::{EventEnvelope, EventType, MaterializedState, Payload};
use serde_json::{Number, Value};

use crate::error::StoreError;

/// Payload key listing the keys a `StateRemove` event deletes.
pub const REMOVE_KEYS_FIELD: &str = "keys";

/// Check that `payload` has the shape its event type requires.
///
/// Runs before anything is written so a malformed event never reaches
/// the log.
pub fn validate_payload(
    stream_id: &str,
    event_type: &EventType,
    payload: &Payload,
) -> Result<(), StoreError> {
    let invalid = |reason: String| StoreError::InvalidPayload {
        stream_id: stream_id.to_owned(),
        event_type: event_type.to_string(),
        reason,
    };

    match event_type {
        EventType::StateIncrement => {
            if let Some((key, _)) = payload.iter().find(|(_, value)| !value.is_number()) {
                return Err(invalid(format!("value for {key:?} is not a number")));
            }
        }
        EventType::StateRemove => {
            remove_keys(payload).map_err(invalid)?;
        }
        EventType::StateSet | EventType::Custom(_) => {}
    }
    Ok(())
}

/// Apply one envelope to `state`, then stamp its version and timestamp.
pub fn apply_event(state: &mut MaterializedState, event: &EventEnvelope) -> Result<(), StoreError> {
    let replay_error = |reason: String| StoreError::Replay {
        stream_id: event.stream_id.clone(),
        version: event.version,
        reason,
    };

    match &event.event_type {
        EventType::StateSet => {
            for (key, value) in &event.payload {
                state.values.insert(key.clone(), value.clone());
            }
        }
        EventType::StateIncrement => {
            for (key, delta) in &event.payload {
                let next = increment(state.values.get(key), delta).map_err(|reason| {
                    replay_error(format!("cannot increment {key:?}: {reason}"))
                })?;
                state.values.insert(key.clone(), next);
            }
        }
        EventType::StateRemove => {
            for key in remove_keys(&event.payload).map_err(replay_error)? {
                state.values.remove(key);
            }
        }
        EventType::Custom(_) => {}
    }

    state.version = event.version;
    state.timestamp_utc = Some(event.timestamp_utc);
    Ok(())
}

/// Apply envelopes in order, skipping any at or below the state's version.
pub fn apply_all<'a>(
    state: &mut MaterializedState,
    events: impl IntoIterator<Item = &'a EventEnvelope>,
) -> Result<(), StoreError> {
    for event in events {
        if event.version <= state.version {
            continue;
        }
        apply_event(state, event)?;
    }
    Ok(())
}

/// Add `delta` to `current`, staying in integer arithmetic when possible.
fn increment(current: Option<&Value>, delta: &Value) -> Result<Value, String> {
    let current = match current {
        None | Some(Value::Null) => Number::from(0_i64),
        Some(Value::Number(number)) => number.clone(),
        Some(other) => return Err(format!("existing value {other} is not a number")),
    };
    let Value::Number(delta) = delta else {
        return Err(format!("delta {delta} is not a number"));
    };

    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return a
            .checked_add(b)
            .map(Value::from)
            .ok_or_else(|| "integer overflow".to_owned());
    }

    let (Some(a), Some(b)) = (current.as_f64(), delta.as_f64()) else {
        return Err("operands are not representable as numbers".to_owned());
    };
    Number::from_f64(a + b)
        .map(Value::Number)
        .ok_or_else(|| "result is not a finite number".to_owned())
}

/// Extract the `keys` list of a `StateRemove` payload.
fn remove_keys(payload: &Payload) -> Result<Vec<&str>, String> {
    let Some(Value::Array(keys)) = payload.get(REMOVE_KEYS_FIELD) else {
        return Err(format!("expected a {REMOVE_KEYS_FIELD:?} array of strings"));
    };
    keys.iter()
        .map(|key| {
            key.as_str()
                .ok_or_else(|| format!("{REMOVE_KEYS_FIELD:?} entry {key} is not a string"))
        })
        .collect()
}
