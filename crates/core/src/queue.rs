//! Priority-ordered job queue.
//!
//! A binary heap keyed by `(priority desc, sequence asc)`. The sequence
//! counter makes the ordering stable: jobs enqueued with equal priority are
//! dequeued in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::job::Job;

#[derive(Debug)]
struct Entry {
    job: Job,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: higher priority wins, lower sequence breaks ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Queue of jobs awaiting processing, highest priority first and FIFO
/// within a priority tier.
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job at its priority position.
    ///
    /// Enqueueing a malformed job (empty input or output reference) is a
    /// programming error, not a runtime condition.
    pub fn enqueue(&mut self, job: Job) {
        debug_assert!(
            job.is_well_formed(),
            "enqueued a malformed job (empty input or output reference)"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { job, seq });
    }

    /// Remove and return the next job, or `None` when the queue is empty.
    pub fn dequeue(&mut self) -> Option<Job> {
        self.heap.pop().map(|entry| entry.job)
    }

    /// The job `dequeue` would return, without removing it.
    pub fn peek(&self) -> Option<&Job> {
        self.heap.peek().map(|entry| &entry.job)
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when no jobs are queued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove all queued jobs.
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Snapshot of the queued jobs in dequeue order.
    pub fn snapshot(&self) -> Vec<&Job> {
        let mut entries: Vec<&Entry> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|entry| &entry.job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn job(name: &str, priority: i32) -> Job {
        Job::new(name, format!("{name}.out")).with_priority(priority)
    }

    // -- ordering -------------------------------------------------------------

    #[test]
    fn higher_priority_dequeues_first() {
        let mut queue = JobQueue::new();
        queue.enqueue(job("a", 0));
        queue.enqueue(job("b", 5));
        queue.enqueue(job("c", 0));

        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|j| j.input)
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut queue = JobQueue::new();
        for name in ["first", "second", "third", "fourth"] {
            queue.enqueue(job(name, 3));
        }

        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|j| j.input)
            .collect();
        assert_eq!(order, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn negative_priorities_dequeue_last() {
        let mut queue = JobQueue::new();
        queue.enqueue(job("background", -10));
        queue.enqueue(job("normal", 0));
        queue.enqueue(job("urgent", 10));

        assert_eq!(queue.dequeue().unwrap().input, "urgent");
        assert_eq!(queue.dequeue().unwrap().input, "normal");
        assert_eq!(queue.dequeue().unwrap().input, "background");
    }

    // -- peek / size / clear --------------------------------------------------

    #[test]
    fn peek_does_not_mutate() {
        let mut queue = JobQueue::new();
        queue.enqueue(job("a", 1));
        queue.enqueue(job("b", 2));

        assert_eq!(queue.peek().unwrap().input, "b");
        assert_eq!(queue.peek().unwrap().input, "b");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let mut queue = JobQueue::new();
        assert!(queue.dequeue().is_none());
        assert!(queue.peek().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut queue = JobQueue::new();
        queue.enqueue(job("a", 0));
        queue.enqueue(job("b", 0));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    // -- snapshot -------------------------------------------------------------

    #[test]
    fn snapshot_matches_dequeue_order() {
        let mut queue = JobQueue::new();
        queue.enqueue(job("a", 0));
        queue.enqueue(job("b", 5));
        queue.enqueue(job("c", 0));
        queue.enqueue(job("d", 5));

        let snapshot: Vec<String> = queue.snapshot().iter().map(|j| j.input.clone()).collect();
        let drained: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|j| j.input)
            .collect();
        assert_eq!(snapshot, drained);
    }

    #[test]
    fn stability_survives_interleaved_dequeues() {
        let mut queue = JobQueue::new();
        queue.enqueue(job("a", 1));
        queue.enqueue(job("b", 1));
        assert_eq!(queue.dequeue().unwrap().input, "a");
        queue.enqueue(job("c", 1));
        assert_eq!(queue.dequeue().unwrap().input, "b");
        assert_eq!(queue.dequeue().unwrap().input, "c");
    }
}
