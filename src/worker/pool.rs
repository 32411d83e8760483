//! Worker pool: routing, warm-document steering, and load shedding

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, warn};

use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::worker::request::{Priority, RequestId, WorkerRequest, WorkerResponse};
use crate::worker::slots::{RasterSlots, DEFAULT_SLOTS_PER_TIER};
use crate::worker::worker::run_worker;

/// Default per-worker pending request cap.
pub const DEFAULT_PENDING_CAP: usize = 4;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub workers: usize,
    pub pending_cap: usize,
    pub slots_per_tier: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            pending_cap: DEFAULT_PENDING_CAP,
            slots_per_tier: DEFAULT_SLOTS_PER_TIER,
        }
    }
}

/// Default worker count: one per core, capped at four.
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2)
        .min(4)
}

struct WorkerHandle {
    tx: Sender<WorkerRequest>,
    pending: usize,
}

struct QueuedRequest {
    priority: Priority,
    seq: u64,
    doc: DocumentId,
    request: WorkerRequest,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedRequest {}
impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: highest priority first, FIFO within a priority class
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Owns N render workers and routes requests to them.
///
/// A request for a document goes to a worker that already holds it when
/// one exists, otherwise to the least-loaded worker, which is sent the
/// document first. Per-worker pending requests are capped; overflow waits
/// in a priority queue. A dead worker is restarted and its pending
/// requests fail with `worker-died`.
pub struct WorkerPool {
    config: PoolConfig,
    workers: Vec<WorkerHandle>,
    response_tx: Sender<WorkerResponse>,
    response_rx: Receiver<WorkerResponse>,
    slots: Arc<RasterSlots>,
    registry: HashMap<DocumentId, (Arc<Vec<u8>>, Option<String>)>,
    loaded: HashMap<DocumentId, HashSet<usize>>,
    pending: HashMap<RequestId, usize>,
    load_requests: HashMap<RequestId, (usize, DocumentId)>,
    overflow: BinaryHeap<QueuedRequest>,
    inbox: VecDeque<WorkerResponse>,
    next_request_id: u64,
    queue_seq: u64,
}

impl WorkerPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let (response_tx, response_rx) = flume::unbounded();
        let slots = RasterSlots::new(config.slots_per_tier);
        let mut pool = Self {
            config,
            workers: Vec::new(),
            response_tx,
            response_rx,
            slots,
            registry: HashMap::new(),
            loaded: HashMap::new(),
            pending: HashMap::new(),
            load_requests: HashMap::new(),
            overflow: BinaryHeap::new(),
            inbox: VecDeque::new(),
            next_request_id: 1,
            queue_seq: 0,
        };
        for _ in 0..pool.config.workers.max(1) {
            pool.workers.push(pool.spawn_worker(pool.workers.len()));
        }
        pool
    }

    fn spawn_worker(&self, worker_id: usize) -> WorkerHandle {
        let (tx, rx) = flume::unbounded();
        let responses = self.response_tx.clone();
        let slots = Arc::clone(&self.slots);
        std::thread::spawn(move || run_worker(worker_id, rx, responses, slots));
        WorkerHandle { tx, pending: 0 }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn slots(&self) -> &Arc<RasterSlots> {
        &self.slots
    }

    /// Requests waiting in the overflow queue.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.overflow.len()
    }

    /// Requests dispatched but not yet answered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    /// Remember a document's bytes so workers can be loaded on demand.
    pub fn register_document(
        &mut self,
        doc: DocumentId,
        bytes: Arc<Vec<u8>>,
        filename: Option<String>,
    ) {
        self.registry.insert(doc, (bytes, filename));
    }

    #[must_use]
    pub fn is_registered(&self, doc: &DocumentId) -> bool {
        self.registry.contains_key(doc)
    }

    /// True when at least one worker holds (or is loading) the document.
    #[must_use]
    pub fn is_loaded(&self, doc: &DocumentId) -> bool {
        self.loaded.get(doc).is_some_and(|set| !set.is_empty())
    }

    /// Eagerly distribute a document to every worker for full fan-out.
    pub fn load_on_all(&mut self, doc: &DocumentId) -> Result<Vec<RequestId>> {
        let mut ids = Vec::new();
        for worker in 0..self.workers.len() {
            if self
                .loaded
                .get(doc)
                .is_some_and(|set| set.contains(&worker))
            {
                continue;
            }
            let id = self.send_load(worker, doc)?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn send_load(&mut self, worker: usize, doc: &DocumentId) -> Result<RequestId> {
        let (bytes, filename) = self
            .registry
            .get(doc)
            .cloned()
            .ok_or_else(|| Error::NotLoaded { id: doc.0.clone() })?;
        let id = self.next_id();
        let request = WorkerRequest::Load {
            id,
            doc: doc.clone(),
            bytes,
            filename,
        };
        self.send_to(worker, id, request)?;
        self.loaded.entry(doc.clone()).or_default().insert(worker);
        self.load_requests.insert(id, (worker, doc.clone()));
        Ok(id)
    }

    /// Dispatch a request built by `make`, steering and queueing as needed.
    pub fn submit(
        &mut self,
        doc: &DocumentId,
        priority: Priority,
        make: impl FnOnce(RequestId, DocumentId) -> WorkerRequest,
    ) -> Result<RequestId> {
        if !self.registry.contains_key(doc) {
            return Err(Error::NotLoaded { id: doc.0.clone() });
        }
        let id = self.next_id();
        let request = make(id, doc.clone());

        match self.pick_worker(doc) {
            Some(worker) if self.workers[worker].pending < self.config.pending_cap => {
                self.dispatch(worker, doc, id, request)?;
            }
            _ => {
                self.queue_seq += 1;
                self.overflow.push(QueuedRequest {
                    priority,
                    seq: self.queue_seq,
                    doc: doc.clone(),
                    request,
                });
            }
        }
        Ok(id)
    }

    /// Warm worker with the fewest pending requests, else least-loaded.
    fn pick_worker(&self, doc: &DocumentId) -> Option<usize> {
        let warm: Vec<usize> = self
            .loaded
            .get(doc)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let candidates: Vec<usize> = if warm.is_empty() {
            (0..self.workers.len()).collect()
        } else {
            warm
        };
        candidates
            .into_iter()
            .min_by_key(|&w| self.workers[w].pending)
    }

    fn dispatch(
        &mut self,
        worker: usize,
        doc: &DocumentId,
        id: RequestId,
        request: WorkerRequest,
    ) -> Result<()> {
        let is_warm = self
            .loaded
            .get(doc)
            .is_some_and(|set| set.contains(&worker));
        if !is_warm {
            self.send_load(worker, doc)?;
        }
        self.send_to(worker, id, request)
    }

    fn send_to(&mut self, worker: usize, id: RequestId, request: WorkerRequest) -> Result<()> {
        if self.workers[worker].tx.send(request).is_err() {
            // Receiver gone: the thread died. Restart it and fail the send;
            // pending requests surface as worker-died through the inbox.
            self.restart_worker(worker);
            return Err(Error::WorkerDied);
        }
        self.workers[worker].pending += 1;
        self.pending.insert(id, worker);
        Ok(())
    }

    fn restart_worker(&mut self, worker: usize) {
        warn!("worker {worker} died, restarting");
        let dead: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, w)| **w == worker)
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.pending.remove(&id);
            if let Some((_, doc)) = self.load_requests.remove(&id) {
                if let Some(set) = self.loaded.get_mut(&doc) {
                    set.remove(&worker);
                }
            }
            self.inbox.push_back(WorkerResponse::Error {
                id,
                error: Error::WorkerDied,
            });
        }
        for set in self.loaded.values_mut() {
            set.remove(&worker);
        }
        self.workers[worker] = self.spawn_worker(worker);
    }

    fn note_response(&mut self, response: &WorkerResponse) {
        let id = response.id();
        if let Some(worker) = self.pending.remove(&id) {
            if let Some(handle) = self.workers.get_mut(worker) {
                handle.pending = handle.pending.saturating_sub(1);
            }
        }
        if let Some((worker, doc)) = self.load_requests.remove(&id) {
            if matches!(response, WorkerResponse::Error { .. }) {
                debug!("load of {doc} failed on worker {worker}");
                if let Some(set) = self.loaded.get_mut(&doc) {
                    set.remove(&worker);
                }
            }
        }
    }

    fn drain_overflow(&mut self) {
        while let Some(head) = self.overflow.peek() {
            let Some(worker) = self.pick_worker(&head.doc) else {
                break;
            };
            if self.workers[worker].pending >= self.config.pending_cap {
                break;
            }
            let queued = self.overflow.pop().expect("peeked entry");
            let id = queued.request.id().expect("queued requests carry ids");
            if let Err(err) = self.dispatch(worker, &queued.doc, id, queued.request) {
                self.inbox
                    .push_back(WorkerResponse::Error { id, error: err });
            }
        }
    }

    /// Remove still-queued requests (superseded low/medium work). Requests
    /// already dispatched are untouched and run to completion. Returns the
    /// ids actually removed.
    pub fn cancel_queued(&mut self, ids: &[RequestId]) -> Vec<RequestId> {
        if ids.is_empty() || self.overflow.is_empty() {
            return Vec::new();
        }
        let mut cancelled = Vec::new();
        let entries: Vec<QueuedRequest> = std::mem::take(&mut self.overflow).into_vec();
        for entry in entries {
            let id = entry.request.id();
            if id.is_some_and(|id| ids.contains(&id)) {
                cancelled.push(id.expect("checked"));
            } else {
                self.overflow.push(entry);
            }
        }
        cancelled
    }

    /// Drain completed responses without blocking.
    pub fn poll_responses(&mut self) -> Vec<WorkerResponse> {
        let mut responses: Vec<WorkerResponse> = self.inbox.drain(..).collect();
        while let Ok(response) = self.response_rx.try_recv() {
            self.note_response(&response);
            responses.push(response);
        }
        self.drain_overflow();
        responses
    }

    /// Block until the response for `id` arrives or the deadline passes.
    ///
    /// Responses for other requests are parked in the inbox for the next
    /// `poll_responses` pump.
    pub fn recv_until(&mut self, id: RequestId, timeout: Duration) -> Result<WorkerResponse> {
        if let Some(pos) = self.inbox.iter().position(|r| r.id() == id) {
            let response = self.inbox.remove(pos).expect("indexed inbox entry");
            return Ok(response);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    millis: timeout.as_millis() as u64,
                });
            }
            match self.response_rx.recv_timeout(deadline - now) {
                Ok(response) => {
                    self.note_response(&response);
                    // Freed capacity may be what the awaited request needs
                    self.drain_overflow();
                    if response.id() == id {
                        return Ok(response);
                    }
                    self.inbox.push_back(response);
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    return Err(Error::Timeout {
                        millis: timeout.as_millis() as u64,
                    });
                }
                Err(flume::RecvTimeoutError::Disconnected) => return Err(Error::WorkerDied),
            }
        }
    }

    /// Instruct every holding worker to discard `doc` and forget it.
    pub fn unload_document(&mut self, doc: &DocumentId) {
        if let Some(holders) = self.loaded.remove(doc) {
            for worker in holders {
                let id = self.next_id();
                let request = WorkerRequest::Unload {
                    id,
                    doc: doc.clone(),
                };
                let _ = self.send_to(worker, id, request);
            }
        }
        self.registry.remove(doc);
    }

    pub fn shutdown(&self) {
        for worker in &self.workers {
            let _ = worker.tx.send(WorkerRequest::Shutdown);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;

    #[test]
    fn queued_requests_order_by_priority_then_fifo() {
        let doc = DocumentId::new("d");
        let mk = |priority, seq| QueuedRequest {
            priority,
            seq,
            doc: doc.clone(),
            request: WorkerRequest::ItemCount {
                id: RequestId::new(seq),
                doc: doc.clone(),
            },
        };
        let mut heap = BinaryHeap::new();
        heap.push(mk(Priority::Low, 1));
        heap.push(mk(Priority::Critical, 2));
        heap.push(mk(Priority::Medium, 3));
        heap.push(mk(Priority::Critical, 4));

        let order: Vec<(Priority, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|q| (q.priority, q.seq))
            .collect();
        assert_eq!(
            order,
            vec![
                (Priority::Critical, 2),
                (Priority::Critical, 4),
                (Priority::Medium, 3),
                (Priority::Low, 1),
            ]
        );
        // Sanity: Reverse(seq) really is FIFO within a class
        assert!(Reverse(2u64) > Reverse(4u64));
    }

    #[test]
    fn submit_requires_registration() {
        let mut pool = WorkerPool::new(PoolConfig {
            workers: 1,
            ..PoolConfig::default()
        });
        let doc = DocumentId::new("missing");
        let err = pool
            .submit(&doc, Priority::High, |id, doc| WorkerRequest::ItemCount {
                id,
                doc,
            })
            .unwrap_err();
        assert!(matches!(err, Error::NotLoaded { .. }));
    }

    #[test]
    fn malformed_document_load_fails_with_typed_error() {
        let mut pool = WorkerPool::new(PoolConfig {
            workers: 2,
            ..PoolConfig::default()
        });
        let doc = DocumentId::new("bad");
        pool.register_document(
            doc.clone(),
            Arc::new(b"%PDF-1.7 not really a pdf".to_vec()),
            None,
        );

        let ids = pool.load_on_all(&doc).unwrap();
        assert_eq!(ids.len(), 2);
        for id in ids {
            let response = pool.recv_until(id, Duration::from_secs(10)).unwrap();
            assert!(matches!(response, WorkerResponse::Error { .. }));
        }
        // Failed loads must not leave the document marked warm
        assert!(!pool.is_loaded(&doc));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn overflow_queues_past_pending_cap() {
        let mut pool = WorkerPool::new(PoolConfig {
            workers: 1,
            pending_cap: 1,
            ..PoolConfig::default()
        });
        let doc = DocumentId::new("bad");
        pool.register_document(doc.clone(), Arc::new(b"%PDF-1.7 junk".to_vec()), None);

        // First submit occupies the only worker (plus its implicit load);
        // the second must queue.
        let first = pool
            .submit(&doc, Priority::High, |id, doc| WorkerRequest::ItemCount {
                id,
                doc,
            })
            .unwrap();
        let _second = pool
            .submit(&doc, Priority::Low, |id, doc| WorkerRequest::ItemCount {
                id,
                doc,
            })
            .unwrap();
        assert_eq!(pool.queued_len(), 1);

        let response = pool.recv_until(first, Duration::from_secs(10)).unwrap();
        assert!(matches!(response, WorkerResponse::Error { .. }));
    }
}
