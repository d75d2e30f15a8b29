//! Demo realm simulation driven by the engine.
//!
//! Every tick a [`WanderingRealm`] lets its population drift, rolls the
//! weather, and now and then opens a portal. It exists so a freshly
//! configured engine produces a realistic stream of events without any
//! game attached.

use multiverse_core::tick::{HandlerError, PendingEvent, RealmTickHandler, TickContext};
use multiverse_types::{EventType, Payload};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom as _;
use rand::{Rng as _, SeedableRng as _};
use serde_json::json;

/// Weather a realm can roll.
const WEATHER: [&str; 5] = ["clear", "rain", "storm", "fog", "aurora"];

/// Chance per tick that a portal flux event is emitted.
const PORTAL_CHANCE: f64 = 0.1;

/// Random-walk realm simulation.
#[derive(Debug)]
pub struct WanderingRealm {
    rng: StdRng,
}

impl WanderingRealm {
    /// A realm seeded from the operating system.
    pub fn from_os_rng() -> Self {
        Self::new(StdRng::from_os_rng())
    }

    /// A realm driven by the given generator.
    pub const fn new(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl RealmTickHandler for WanderingRealm {
    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Result<Vec<PendingEvent>, HandlerError> {
        let drift: i64 = self.rng.random_range(-3..=5);
        let mut increment = Payload::new();
        increment.insert("population".to_owned(), json!(drift));

        let weather = WEATHER
            .choose(&mut self.rng)
            .ok_or_else(|| HandlerError::new("no weather to choose from"))?;
        let mut ambient = Payload::new();
        ambient.insert("weather".to_owned(), json!(weather));
        ambient.insert("last_tick".to_owned(), json!(ctx.tick));

        let mut events = vec![PendingEvent::increment(increment), PendingEvent::set(ambient)];

        if self.rng.random_bool(PORTAL_CHANCE) {
            let mut flux = Payload::new();
            flux.insert("intensity".to_owned(), json!(self.rng.random::<f64>()));
            events.push(PendingEvent::new(EventType::custom("portal_flux"), flux));
        }
        Ok(events)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use multiverse_types::{CorrelationId, RealmId};
    use rand::SeedableRng;

    use super::*;

    fn ctx<'a>(realm_id: &'a RealmId, tick: u64) -> TickContext<'a> {
        TickContext {
            realm_id,
            stream_id: "realm/test",
            tick,
            ticks_behind: 0,
            correlation_id: CorrelationId::new(),
        }
    }

    #[test]
    fn every_tick_drifts_population_and_weather() {
        let realm_id = RealmId::new("test");
        let mut realm = WanderingRealm::new(StdRng::seed_from_u64(7));
        for tick in 1..=20 {
            let events = realm.on_tick(&ctx(&realm_id, tick)).unwrap();
            assert!(events.len() >= 2);
            assert_eq!(events[0].event_type, EventType::StateIncrement);
            let drift = events[0].payload["population"].as_i64().unwrap();
            assert!((-3..=5).contains(&drift));
            assert_eq!(events[1].payload["last_tick"], json!(tick));
            let weather = events[1].payload["weather"].as_str().unwrap();
            assert!(WEATHER.contains(&weather));
        }
    }

    #[test]
    fn seeded_realms_are_reproducible() {
        let realm_id = RealmId::new("test");
        let mut first = WanderingRealm::new(StdRng::seed_from_u64(42));
        let mut second = WanderingRealm::new(StdRng::seed_from_u64(42));
        for tick in 1..=10 {
            assert_eq!(
                first.on_tick(&ctx(&realm_id, tick)).unwrap(),
                second.on_tick(&ctx(&realm_id, tick)).unwrap()
            );
        }
    }
}
