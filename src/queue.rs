//! Priority queue of pending attacks.
//!
//! A min-heap keyed on (priority, insertion sequence): lower priority values
//! pop first, and attacks pushed earlier win ties. The sequence counter is
//! drawn at push time, so re-pushing an attack re-orders it after its peers.
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::attack::Attack;

struct Entry {
    priority: u32,
    seq: u64,
    attack: Attack,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

/// Thread-safe attack queue. All operations lock a single mutex; heap
/// operations are O(log n).
#[derive(Default)]
pub struct AttackQueue {
    inner: Mutex<Inner>,
}

impl AttackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, attack: Attack) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let priority = attack.priority;
        inner.heap.push(Reverse(Entry {
            priority,
            seq,
            attack,
        }));
    }

    /// Pop the earliest attack, or `None` when the queue is drained.
    pub fn pop(&self) -> Option<Attack> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.pop().map(|Reverse(entry)| entry.attack)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending attacks in pop order, without draining the queue.
    pub fn snapshot(&self) -> Vec<Attack> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<&Reverse<Entry>> = inner.heap.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|r| r.0.attack.clone()).collect()
    }
}

impl std::fmt::Debug for AttackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttackQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::priority;

    #[test]
    fn pops_in_priority_order() {
        let queue = AttackQueue::new();
        queue.push(Attack::mask("masks", priority::MASK, "?d?d?d?d"));
        queue.push(Attack::dictionary("quick", priority::QUICK_WIN, "w/top100k.txt"));
        queue.push(Attack::dictionary("rules", priority::RULE_BASED, "w/rockyou.txt"));

        assert_eq!(queue.pop().unwrap().name, "quick");
        assert_eq!(queue.pop().unwrap().name, "rules");
        assert_eq!(queue.pop().unwrap().name, "masks");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn insertion_order_breaks_priority_ties() {
        let queue = AttackQueue::new();
        for name in ["first", "second", "third"] {
            queue.push(Attack::dictionary(name, priority::QUICK_WIN, "w/x.txt"));
        }
        assert_eq!(queue.pop().unwrap().name, "first");
        assert_eq!(queue.pop().unwrap().name, "second");
        assert_eq!(queue.pop().unwrap().name, "third");
    }

    #[test]
    fn snapshot_preserves_pop_order_without_draining() {
        let queue = AttackQueue::new();
        queue.push(Attack::mask("late", priority::MASK, "?a?a"));
        queue.push(Attack::dictionary("early", priority::QUICK_WIN, "w/x.txt"));

        let snap = queue.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].name, "early");
        assert_eq!(snap[1].name, "late");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn popped_attack_never_reappears() {
        let queue = AttackQueue::new();
        queue.push(Attack::dictionary("only", priority::QUICK_WIN, "w/x.txt"));
        let popped = queue.pop().unwrap();
        assert_eq!(popped.name, "only");
        assert!(queue.snapshot().is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn concurrent_pushes_are_all_observed() {
        use std::sync::Arc;
        let queue = Arc::new(AttackQueue::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let q = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    q.push(Attack::dictionary(
                        &format!("t{}-{}", t, i),
                        priority::QUICK_WIN,
                        "w/x.txt",
                    ));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 100);
    }
}
