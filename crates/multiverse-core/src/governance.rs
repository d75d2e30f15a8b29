//! Injected admission predicates.
//!
//! The engine never decides on its own who may do what. Two seams accept a
//! caller-supplied strategy:
//!
//! - [`PermissionCheck`] is consulted by the orchestrator before every
//!   mutating operation with the calling actor and the [`Operation`].
//! - [`AdmissionCheck`] is consulted by the command harness for each
//!   command, including cascaded follow-ups.
//!
//! Both traits have blanket implementations for plain closures.

use std::collections::BTreeSet;

use multiverse_types::Operation;

use crate::cascade::Command;

/// Decides whether `actor` may perform `operation`.
pub trait PermissionCheck: Send + Sync {
    /// Return `true` to allow the operation.
    fn permits(&self, actor: &str, operation: Operation) -> bool;
}

impl<F> PermissionCheck for F
where
    F: Fn(&str, Operation) -> bool + Send + Sync,
{
    fn permits(&self, actor: &str, operation: Operation) -> bool {
        self(actor, operation)
    }
}

/// Permits everything. The orchestrator's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn permits(&self, _actor: &str, _operation: Operation) -> bool {
        true
    }
}

/// Permits every operation for a fixed set of actors and nothing for
/// anyone else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorAllowList {
    actors: BTreeSet<String>,
}

impl ActorAllowList {
    /// Build an allow-list from actor names.
    pub fn new<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actors: actors.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the list names no actor at all.
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl PermissionCheck for ActorAllowList {
    fn permits(&self, actor: &str, _operation: Operation) -> bool {
        self.actors.contains(actor)
    }
}

/// Decides whether a command may be applied.
pub trait AdmissionCheck {
    /// Return `true` to admit the command.
    fn admit(&self, command: &Command) -> bool;
}

impl<F> AdmissionCheck for F
where
    F: Fn(&Command) -> bool,
{
    fn admit(&self, command: &Command) -> bool {
        self(command)
    }
}

/// Adapts a [`PermissionCheck`] into an [`AdmissionCheck`] that asks
/// whether the command's actor may perform [`Operation::SubmitCommand`].
#[derive(Debug, Clone, Copy)]
pub struct PermissionAdmission<'a, P: ?Sized>(pub &'a P);

impl<P> AdmissionCheck for PermissionAdmission<'_, P>
where
    P: PermissionCheck + ?Sized,
{
    fn admit(&self, command: &Command) -> bool {
        self.0.permits(&command.actor, Operation::SubmitCommand)
    }
}

#[cfg(test)]
mod tests {
    use multiverse_types::{EntityId, Payload};

    use super::*;

    #[test]
    fn allow_all_permits_everything() {
        assert!(AllowAll.permits("anyone", Operation::RegisterGame));
        assert!(AllowAll.permits("", Operation::SubmitCommand));
    }

    #[test]
    fn closures_are_permission_checks() {
        let check = |actor: &str, operation: Operation| {
            actor == "admin" || operation == Operation::PublishCrossGameEvent
        };
        assert!(check.permits("admin", Operation::UnregisterGame));
        assert!(check.permits("guest", Operation::PublishCrossGameEvent));
        assert!(!check.permits("guest", Operation::RegisterGame));
    }

    #[test]
    fn allow_list_matches_exact_actor() {
        let list = ActorAllowList::new(["ops", "studio-a"]);
        assert!(!list.is_empty());
        assert!(list.permits("ops", Operation::RegisterGame));
        assert!(!list.permits("Ops", Operation::RegisterGame));
        assert!(!ActorAllowList::default().permits("ops", Operation::RegisterGame));
    }

    #[test]
    fn permission_admission_uses_command_actor() {
        let list = ActorAllowList::new(["gm"]);
        let admission = PermissionAdmission(&list);
        let command = Command::new(EntityId::new("hero"), "heal", Payload::new());
        assert!(!admission.admit(&command));
        assert!(admission.admit(&command.clone().with_actor("gm")));
    }
}
