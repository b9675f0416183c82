//! # Relation rules between tasks.
//!
//! Importance, cancellation, soft-cancellation, and interruption are decided
//! here, keyed by the two tasks' kinds and targets — one table to read instead
//! of rules scattered across a type hierarchy.

use super::kind::TaskKind;
use super::task::Task;

/// Importance ordering used for insertion and preemption. Compares priority
/// ordinals; equal priorities are *not* more important than each other, which
/// preserves FIFO order at insertion.
pub(crate) fn is_more_important_than(task: &Task, other: &Task) -> bool {
    task.priority() > other.priority()
}

/// Hard removal: may `other`'s arrival cancel `task` outright?
///
/// - Turning the radio off cancels everything that needs the radio.
/// - An explicit disconnect cancels a pending connect for the same endpoint
///   (no point opening a link we were just told to close).
pub(crate) fn is_cancellable_by(task: &Task, other: &Task) -> bool {
    if other.kind() == TaskKind::RadioOff && task.kind().requires_radio() {
        return true;
    }
    if task.kind() == TaskKind::Connect
        && other.kind() == TaskKind::Disconnect
        && other.is_explicit()
        && same_endpoint(task, other)
    {
        return true;
    }
    false
}

/// Cooperative cancellation: may `other`'s arrival soft-cancel `task`?
///
/// The task keeps running its current radio call, but the eventual outcome is
/// reinterpreted, so a stale success is never reported after a superseding
/// operation.
///
/// - A disconnect soft-cancels connection-dependent work and an in-flight
///   connect for the same endpoint — but only work enqueued *before* it
///   (ordinal check), so operations queued after the disconnect survive.
/// - An unbond soft-cancels a bond for the same endpoint.
pub(crate) fn is_softly_cancellable_by(task: &Task, other: &Task) -> bool {
    if other.kind() == TaskKind::Disconnect && same_endpoint(task, other) {
        let superseded = other.ordinal() > task.ordinal();
        if superseded && (task.kind().requires_connection() || task.kind() == TaskKind::Connect) {
            return true;
        }
    }
    if other.kind() == TaskKind::Unbond
        && task.kind() == TaskKind::Bond
        && same_endpoint(task, other)
    {
        return true;
    }
    false
}

/// Interruption: may `other` pause `task` and send it back to the queue?
///
/// Only background polling yields; everything else runs to an ending state.
pub(crate) fn is_interruptable_by(task: &Task, other: &Task) -> bool {
    task.kind() == TaskKind::ReadSignalStrength && is_more_important_than(other, task)
}

fn same_endpoint(a: &Task, b: &Task) -> bool {
    match (a.endpoint(), b.endpoint()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::radio::EndpointId;
    use crate::tasks::{Exec, Target, Task};
    use std::sync::Arc;

    fn task(kind: TaskKind, ep: &str, ordinal: u64) -> Arc<Task> {
        let t = Task::builder(kind, Target::Endpoint(EndpointId::new(ep)))
            .explicit(true)
            .operation(|| Exec::Launched)
            .build(Bus::new(16), 0);
        t.assign_ordinal(ordinal);
        t
    }

    fn manager_task(kind: TaskKind, ordinal: u64) -> Arc<Task> {
        let t = Task::builder(kind, Target::Manager)
            .operation(|| Exec::Launched)
            .build(Bus::new(16), 0);
        t.assign_ordinal(ordinal);
        t
    }

    #[test]
    fn test_equal_priority_is_not_more_important() {
        let a = task(TaskKind::Read, "ep", 0);
        let b = task(TaskKind::Write, "ep", 1);
        assert!(!is_more_important_than(&a, &b));
        assert!(!is_more_important_than(&b, &a));
    }

    #[test]
    fn test_radio_off_cancels_radio_dependent_work() {
        let read = task(TaskKind::Read, "ep", 0);
        let off = manager_task(TaskKind::RadioOff, 1);
        assert!(is_cancellable_by(&read, &off));

        let on = manager_task(TaskKind::RadioOn, 2);
        assert!(!is_cancellable_by(&on, &off));
    }

    #[test]
    fn test_explicit_disconnect_cancels_connect_same_endpoint() {
        let connect = task(TaskKind::Connect, "ep", 0);
        let disconnect = task(TaskKind::Disconnect, "ep", 1);
        assert!(is_cancellable_by(&connect, &disconnect));

        let other_disconnect = task(TaskKind::Disconnect, "other", 2);
        assert!(!is_cancellable_by(&connect, &other_disconnect));
    }

    #[test]
    fn test_disconnect_soft_cancels_earlier_connection_work_only() {
        let read = task(TaskKind::Read, "ep", 0);
        let disconnect = task(TaskKind::Disconnect, "ep", 1);
        assert!(is_softly_cancellable_by(&read, &disconnect));

        // Work queued after the disconnect survives.
        let later_read = task(TaskKind::Read, "ep", 2);
        assert!(!is_softly_cancellable_by(&later_read, &disconnect));
    }

    #[test]
    fn test_unbond_soft_cancels_bond() {
        let bond = task(TaskKind::Bond, "ep", 0);
        let unbond = task(TaskKind::Unbond, "ep", 1);
        assert!(is_softly_cancellable_by(&bond, &unbond));
        assert!(!is_softly_cancellable_by(&unbond, &bond));
    }

    #[test]
    fn test_only_polling_is_interruptible() {
        let poll = task(TaskKind::ReadSignalStrength, "ep", 0);
        let connect = task(TaskKind::Connect, "ep", 1);
        assert!(is_interruptable_by(&poll, &connect));
        assert!(!is_interruptable_by(&connect, &poll));

        // Equal importance does not interrupt.
        let other_poll = task(TaskKind::ReadSignalStrength, "ep", 2);
        assert!(!is_interruptable_by(&poll, &other_poll));
    }
}
