//! Realm clocks, tick drivers, orchestration and the command harness for
//! the Multiverse coordination engine.
//!
//! Realms tick independently, each on its own [`TickDriver`], appending
//! events to their streams in the event store. The [`Orchestrator`] owns the
//! registry of games and periodically runs control-ticks that flush queued
//! cross-game events into per-game inboxes. The [`CommandHarness`] is the
//! reference model for admission-gated commands, subscriber notification
//! and causal cascade tracing.
//!
//! # Modules
//!
//! - [`clock`] -- Per-realm tick counter and lag estimate.
//! - [`config`] -- Configuration loading from `multiverse-config.yaml` into
//!   strongly-typed structs.
//! - [`control`] -- [`LoopControl`] stop flag and adjustable interval.
//! - [`coordinate`] -- Realm coordinate derivation.
//! - [`governance`] -- Injected permission and admission predicates.
//! - [`orchestrator`] -- Game registry, cross-game routing, control-ticks.
//! - [`runner`] -- The orchestration loop.
//! - [`tick`] -- Per-realm tick driver.
//! - [`cascade`] -- Command / cascade harness.
//!
//! [`TickDriver`]: tick::TickDriver
//! [`Orchestrator`]: orchestrator::Orchestrator
//! [`CommandHarness`]: cascade::CommandHarness
//! [`LoopControl`]: control::LoopControl

pub mod cascade;
pub mod clock;
pub mod config;
pub mod control;
pub mod coordinate;
pub mod governance;
pub mod orchestrator;
pub mod runner;
pub mod tick;
