//! # The pending-task list.
//!
//! Ordered sequence of tasks guarded by one mutex. Iteration hands a visitor
//! a point-in-time snapshot: the live list is cloned under the lock, then the
//! visitor runs with **no lock held**, so a visitor that itself enqueues or
//! removes cannot deadlock or corrupt the live list. Entries dequeued while
//! the iteration is in flight are noticed by a membership re-check and
//! skipped.

use std::sync::{Arc, Mutex};

use crate::tasks::{is_more_important_than, Task};

/// Visitor verdict for one task during iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep walking.
    Continue,
    /// Remove this task from the live list, keep walking.
    ContinueAndDequeue,
    /// Stop; return this task.
    Return,
    /// Remove this task from the live list and return it.
    ReturnAndDequeue,
}

/// Ordered pending-task list. Higher-importance tasks sit closer to the
/// front; equal importance preserves insertion order.
pub(crate) struct TaskQueue {
    list: Mutex<Vec<Arc<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.list.lock().expect("queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the current list, for diagnostics and sweeps.
    pub fn snapshot(&self) -> Vec<Arc<Task>> {
        self.list.lock().expect("queue poisoned").clone()
    }

    pub fn push_front(&self, task: Arc<Task>) {
        self.list.lock().expect("queue poisoned").insert(0, task);
    }

    /// Removes and returns the head of the list.
    pub fn pop_front(&self) -> Option<Arc<Task>> {
        let mut list = self.list.lock().expect("queue poisoned");
        if list.is_empty() {
            None
        } else {
            Some(list.remove(0))
        }
    }

    /// Inserts at the earliest position the task's importance allows.
    ///
    /// The common case is cheap: if the newcomer does not outrank the tail it
    /// is appended. Otherwise the list is scanned from the front and the task
    /// is inserted before the first entry it outranks. Strict importance
    /// comparison keeps equal-priority tasks FIFO.
    pub fn insert_at_soonest_position(&self, task: Arc<Task>) {
        let mut list = self.list.lock().expect("queue poisoned");

        if let Some(last) = list.last() {
            if !is_more_important_than(&task, last) {
                list.push(task);
                return;
            }
        } else {
            list.push(task);
            return;
        }

        let position = list
            .iter()
            .position(|existing| is_more_important_than(&task, existing))
            .unwrap_or(list.len());
        list.insert(position, task);
    }

    /// Removes a specific task. Returns `true` if it was present.
    pub fn remove(&self, task: &Arc<Task>) -> bool {
        let mut list = self.list.lock().expect("queue poisoned");
        let before = list.len();
        list.retain(|t| !Arc::ptr_eq(t, task));
        list.len() != before
    }

    fn contains(&self, task: &Arc<Task>) -> bool {
        self.list
            .lock()
            .expect("queue poisoned")
            .iter()
            .any(|t| Arc::ptr_eq(t, task))
    }

    /// Visits tasks over a point-in-time snapshot.
    ///
    /// The visitor runs with no lock held. Tasks dequeued since the snapshot
    /// was taken are skipped. Returns the task the visitor stopped on, if any.
    pub fn for_each(&self, mut visit: impl FnMut(&Arc<Task>) -> Visit) -> Option<Arc<Task>> {
        let snapshot = self.snapshot();

        for task in snapshot {
            if !self.contains(&task) {
                continue;
            }

            match visit(&task) {
                Visit::Continue => {}
                Visit::ContinueAndDequeue => {
                    self.remove(&task);
                }
                Visit::Return => return Some(task),
                Visit::ReturnAndDequeue => {
                    self.remove(&task);
                    return Some(task);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::radio::EndpointId;
    use crate::tasks::{Exec, Priority, Target, TaskKind};

    fn task(priority: Priority, ordinal: u64) -> Arc<Task> {
        let t = Task::builder(TaskKind::Read, Target::Endpoint(EndpointId::new("ep")))
            .priority(priority)
            .operation(|| Exec::Launched)
            .build(Bus::new(16), 0);
        t.assign_ordinal(ordinal);
        t
    }

    fn priorities(queue: &TaskQueue) -> Vec<Priority> {
        queue.snapshot().iter().map(|t| t.priority()).collect()
    }

    #[test]
    fn test_decreasing_priority_extracts_in_insertion_order() {
        let queue = TaskQueue::new();
        queue.insert_at_soonest_position(task(Priority::Critical, 0));
        queue.insert_at_soonest_position(task(Priority::High, 1));
        queue.insert_at_soonest_position(task(Priority::Medium, 2));
        queue.insert_at_soonest_position(task(Priority::Low, 3));

        let ordinals: Vec<u64> = queue.snapshot().iter().map(|t| t.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_higher_priority_jumps_ahead() {
        let queue = TaskQueue::new();
        queue.insert_at_soonest_position(task(Priority::Low, 0));
        queue.insert_at_soonest_position(task(Priority::Low, 1));
        queue.insert_at_soonest_position(task(Priority::Critical, 2));

        assert_eq!(
            priorities(&queue),
            vec![Priority::Critical, Priority::Low, Priority::Low]
        );
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let queue = TaskQueue::new();
        for i in 0..5 {
            queue.insert_at_soonest_position(task(Priority::Medium, i));
        }
        let ordinals: Vec<u64> = queue.snapshot().iter().map(|t| t.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_visitor_return_and_dequeue() {
        let queue = TaskQueue::new();
        queue.insert_at_soonest_position(task(Priority::Low, 0));
        queue.insert_at_soonest_position(task(Priority::Low, 1));

        let found = queue
            .for_each(|t| {
                if t.ordinal() == 1 {
                    Visit::ReturnAndDequeue
                } else {
                    Visit::Continue
                }
            })
            .unwrap();

        assert_eq!(found.ordinal(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.snapshot()[0].ordinal(), 0);
    }

    #[test]
    fn test_visitor_may_mutate_queue_mid_iteration() {
        let queue = TaskQueue::new();
        let a = task(Priority::Low, 0);
        let b = task(Priority::Low, 1);
        let c = task(Priority::Low, 2);
        queue.insert_at_soonest_position(a);
        queue.insert_at_soonest_position(b.clone());
        queue.insert_at_soonest_position(c);

        // The visitor removes b while iterating; b must then be skipped, and
        // the live list must stay consistent.
        let mut seen = Vec::new();
        queue.for_each(|t| {
            seen.push(t.ordinal());
            if t.ordinal() == 0 {
                queue.remove(&b);
            }
            Visit::Continue
        });

        assert_eq!(seen, vec![0, 2], "dequeued entry skipped mid-iteration");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_continue_and_dequeue_removes_all_matching() {
        let queue = TaskQueue::new();
        for i in 0..4 {
            queue.insert_at_soonest_position(task(Priority::Low, i));
        }
        queue.for_each(|t| {
            if t.ordinal() % 2 == 0 {
                Visit::ContinueAndDequeue
            } else {
                Visit::Continue
            }
        });
        let ordinals: Vec<u64> = queue.snapshot().iter().map(|t| t.ordinal()).collect();
        assert_eq!(ordinals, vec![1, 3]);
    }
}
