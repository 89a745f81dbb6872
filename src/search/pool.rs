//! Lazy-SMP worker pool: a fixed set of persistent threads, each blocked on
//! a start latch until a search is dispatched, sharing one transposition
//! table and one atomic stop flag. Grounded on the start/stop latch pattern
//! in pleco's `threadpool`/`sync` modules, rebuilt with safe `Arc`/`Mutex`
//! state instead of raw pointers into a global.

use crate::board::Board;
use crate::moves::magic::MagicTables;
use crate::moves::types::Move;
use crate::search::context::SearchContext;
use crate::search::search::{SharedSearchState, TimeManager, search_with};
use crate::search::tt::TranspositionTable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Starts false, flips true, wakes every waiter. Used both for "a job is
/// ready" and "this worker is done" signaling.
struct Latch {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut guard = self.ready.lock().unwrap();
        while !*guard {
            guard = self.cv.wait(guard).unwrap();
        }
        *guard = false;
    }

    fn set(&self) {
        let mut guard = self.ready.lock().unwrap();
        *guard = true;
        self.cv.notify_all();
    }
}

/// What the main thread hands each worker at the start of a search. Carries
/// the current TT handle rather than relying on a spawn-time capture, so a
/// `Hash` resize between searches reaches already-running workers.
struct Job {
    board: Board,
    tt: Arc<TranspositionTable>,
    max_depth: i32,
    time_limit: Option<Duration>,
}

struct WorkerResult {
    score: i32,
    best_move: Option<Move>,
    depth_completed: i32,
    nodes: u64,
}

struct WorkerShared {
    job: Mutex<Option<Job>>,
    start_latch: Latch,
    done_latch: Latch,
    result: Mutex<Option<WorkerResult>>,
    shutdown: AtomicBool,
}

/// A single persistent search thread. Helper workers (id != 0) search with
/// depth/skip schedules diversified from the main worker to widen the set
/// of TT entries the pool produces (the Lazy-SMP philosophy).
struct Worker {
    handle: Option<JoinHandle<()>>,
    shared: Arc<WorkerShared>,
}

fn worker_main(
    id: usize,
    shared: Arc<WorkerShared>,
    tables: Arc<MagicTables>,
    state: Arc<SharedSearchState>,
) {
    let mut ctx = SearchContext::new();

    loop {
        shared.start_latch.wait();
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        let job = shared.job.lock().unwrap().take().expect("job posted before start latch");
        let mut board = job.board;

        // Helpers skip every (id+1)-th odd depth to diversify search order;
        // the main worker (id 0) always runs every depth in sequence.
        let max_depth = if id == 0 {
            job.max_depth
        } else {
            job.max_depth + (id as i32 % 3) - 1
        }
        .max(1);

        let mut time = TimeManager::with_shared(job.time_limit, state.clone());
        let (score, best_move, nodes) =
            search_with(&mut board, &tables, &job.tt, &mut ctx, &mut time, max_depth, id == 0);

        state.nodes.fetch_add(nodes, Ordering::Relaxed);
        *shared.result.lock().unwrap() = Some(WorkerResult {
            score,
            best_move,
            depth_completed: max_depth,
            nodes,
        });
        shared.done_latch.set();
    }
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    tt: Arc<TranspositionTable>,
    tables: Arc<MagicTables>,
    state: Arc<SharedSearchState>,
}

impl WorkerPool {
    pub fn new(threads: usize, tables: Arc<MagicTables>, hash_mb: usize) -> Self {
        let tt = Arc::new(TranspositionTable::new(hash_mb));
        let state = Arc::new(SharedSearchState::new());
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);

        for id in 0..threads {
            let shared = Arc::new(WorkerShared {
                job: Mutex::new(None),
                start_latch: Latch::new(),
                done_latch: Latch::new(),
                result: Mutex::new(None),
                shutdown: AtomicBool::new(false),
            });
            let worker_shared = shared.clone();
            let worker_tables = tables.clone();
            let worker_state = state.clone();
            let handle = thread::Builder::new()
                .name(format!("search-worker-{id}"))
                .spawn(move || worker_main(id, worker_shared, worker_tables, worker_state))
                .expect("failed to spawn search worker thread");

            workers.push(Worker {
                handle: Some(handle),
                shared,
            });
        }

        Self { workers, tt, tables, state }
    }

    pub fn resize_hash(&mut self, hash_mb: usize) {
        self.tt = Arc::new(TranspositionTable::new(hash_mb));
    }

    pub fn tt(&self) -> &Arc<TranspositionTable> {
        &self.tt
    }

    pub fn tables(&self) -> &Arc<MagicTables> {
        &self.tables
    }

    /// Clone of the pool's shared stop/node-count state. Callers that need
    /// to request a stop without contending for the pool's own lock (e.g.
    /// a UCI loop whose search runs on a separate thread holding that lock
    /// for the duration of the search) should hold on to this instead of
    /// going back through the pool.
    pub fn shared_state(&self) -> Arc<SharedSearchState> {
        self.state.clone()
    }

    /// Total nodes searched across every worker in the most recent search.
    pub fn total_nodes(&self) -> u64 {
        self.state.nodes.load(Ordering::Relaxed)
    }

    /// Wake every worker with its own clone of `board`, drive them to
    /// completion or stop, then apply result voting across whichever
    /// workers finished an iteration. Blocks until every worker returns.
    pub fn start_search(
        &mut self,
        board: &Board,
        max_depth: i32,
        time_limit: Option<Duration>,
    ) -> (i32, Option<Move>, u64) {
        self.state.stop.store(false, Ordering::Relaxed);
        self.state.nodes.store(0, Ordering::Relaxed);

        for worker in &self.workers {
            *worker.shared.job.lock().unwrap() = Some(Job {
                board: board.clone(),
                tt: self.tt.clone(),
                max_depth,
                time_limit,
            });
            worker.shared.start_latch.set();
        }

        for worker in &self.workers {
            worker.shared.done_latch.wait();
        }

        let results: Vec<WorkerResult> = self
            .workers
            .iter()
            .filter_map(|w| w.shared.result.lock().unwrap().take())
            .collect();

        vote(results)
    }

    /// Signal every worker's shared stop flag; the currently running search
    /// (if any) finishes its in-flight node and returns on the next poll.
    pub fn stop(&self) {
        self.state.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.shared.shutdown.store(true, Ordering::Relaxed);
            worker.shared.start_latch.set();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// `vote(w) = (score(w) - min_score + C) * depth(w)`, argmax wins, ties
/// broken by higher score. `C` keeps the weight positive even when every
/// worker reports a losing score.
const VOTE_CONSTANT: i32 = 1000;

fn vote_index(results: &[WorkerResult]) -> usize {
    let min_score = results.iter().map(|r| r.score).min().unwrap();

    let mut best_idx = 0;
    let mut best_vote = i64::MIN;
    for (i, r) in results.iter().enumerate() {
        let v = (r.score - min_score + VOTE_CONSTANT) as i64 * r.depth_completed as i64;
        if v > best_vote || (v == best_vote && r.score > results[best_idx].score) {
            best_vote = v;
            best_idx = i;
        }
    }
    best_idx
}

fn vote(results: Vec<WorkerResult>) -> (i32, Option<Move>, u64) {
    let total_nodes: u64 = results.iter().map(|r| r.nodes).sum();

    if results.is_empty() {
        return (0, None, 0);
    }

    let winner_idx = vote_index(&results);
    let winner = &results[winner_idx];
    (winner.score, winner.best_move, total_nodes)
}
