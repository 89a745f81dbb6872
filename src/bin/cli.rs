use kestrel::board::{Board, Color};
use kestrel::moves::execute::make_move_basic;
use kestrel::moves::magic::MagicTables;
use kestrel::moves::magic::loader::load_magic_tables;
use kestrel::moves::types::Move;
use kestrel::search::pool::WorkerPool;
use kestrel::search::search::SharedSearchState;
use kestrel::search::tt::TranspositionTable;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

const DEFAULT_HASH_MB: usize = 64;
const DEFAULT_THREADS: usize = 1;
const DEFAULT_MOVE_OVERHEAD_MS: u64 = 50;
const MAX_DEPTH: i32 = 64;

struct Options {
    hash_mb: usize,
    threads: usize,
    move_overhead_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            hash_mb: DEFAULT_HASH_MB,
            threads: DEFAULT_THREADS,
            move_overhead_ms: DEFAULT_MOVE_OVERHEAD_MS,
        }
    }
}

struct Engine {
    tables: Arc<MagicTables>,
    board: Board,
    pool: Arc<Mutex<WorkerPool>>,
    // Cloned out of the pool so `stop_search` can flip the flag without
    // waiting on the pool mutex a search thread holds for the whole search.
    stop_state: Arc<SharedSearchState>,
    options: Options,
    in_flight: Option<JoinHandle<()>>,
}

impl Engine {
    fn new() -> Self {
        let tables = Arc::new(load_magic_tables());
        let options = Options::default();
        let pool = WorkerPool::new(options.threads, tables.clone(), options.hash_mb);
        let stop_state = pool.shared_state();
        Self {
            tables,
            board: Board::new(),
            pool: Arc::new(Mutex::new(pool)),
            stop_state,
            options,
            in_flight: None,
        }
    }

    fn rebuild_pool(&mut self) {
        self.join_in_flight();
        let pool = WorkerPool::new(self.options.threads, self.tables.clone(), self.options.hash_mb);
        self.stop_state = pool.shared_state();
        self.pool = Arc::new(Mutex::new(pool));
    }

    fn clear_hash(&mut self) {
        self.join_in_flight();
        self.pool.lock().unwrap().resize_hash(self.options.hash_mb);
    }

    fn join_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            let _ = handle.join();
        }
    }

    fn stop_search(&mut self) {
        self.stop_state.stop.store(true, Ordering::Relaxed);
        self.join_in_flight();
    }
}

fn main() {
    kestrel::logger::init_logging("logs/kestrel.log", "kestrel=info");

    let mut engine = Engine::new();
    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l.trim().to_string(),
            Err(_) => break,
        };

        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts[0] {
            "uci" => handle_uci(&engine.options),
            "isready" => println!("readyok"),
            "ucinewgame" => {
                engine.join_in_flight();
                engine.board = Board::new();
                engine.clear_hash();
            }
            "setoption" => handle_setoption(&mut engine, &parts),
            "position" => {
                engine.join_in_flight();
                if let Some(new_board) = handle_position(&parts, &engine.tables) {
                    engine.board = new_board;
                }
            }
            "go" => handle_go(&mut engine, &parts),
            "stop" => engine.stop_search(),
            "ponderhit" => {}
            "quit" => {
                engine.stop_search();
                break;
            }
            "bench" => {
                engine.join_in_flight();
                let depth = parts.get(1).and_then(|d| d.parse().ok()).unwrap_or(10);
                run_bench(&engine.tables, depth);
            }
            "fen" => println!("{}", engine.board.to_fen()),
            "d" | "display" => println!("{}", engine.board),
            _ => {}
        }
    }

    engine.join_in_flight();
}

fn handle_uci(options: &Options) {
    println!("id name Kestrel");
    println!("id author the Kestrel authors");
    println!(
        "option name Hash type spin default {} min 1 max 1024",
        options.hash_mb
    );
    println!(
        "option name Threads type spin default {} min 1 max 128",
        options.threads
    );
    println!("option name Clear Hash type button");
    println!(
        "option name Move Overhead type spin default {} min 0 max 5000",
        options.move_overhead_ms
    );
    println!("uciok");
}

fn handle_setoption(engine: &mut Engine, parts: &[&str]) {
    // setoption name <Name...> [value <V...>]
    let Some(name_idx) = parts.iter().position(|&p| p == "name") else {
        return;
    };
    let value_idx = parts.iter().position(|&p| p == "value");
    let name_end = value_idx.unwrap_or(parts.len());
    let name = parts[name_idx + 1..name_end].join(" ");
    let value = value_idx.map(|i| parts[i + 1..].join(" "));

    match name.as_str() {
        "Hash" => {
            if let Some(v) = value.and_then(|v| v.parse::<usize>().ok()) {
                engine.options.hash_mb = v.clamp(1, 1024);
                engine.clear_hash();
            }
        }
        "Threads" => {
            if let Some(v) = value.and_then(|v| v.parse::<usize>().ok()) {
                engine.options.threads = v.clamp(1, 128);
                engine.rebuild_pool();
            }
        }
        "Clear Hash" => engine.clear_hash(),
        "Move Overhead" => {
            if let Some(v) = value.and_then(|v| v.parse::<u64>().ok()) {
                engine.options.move_overhead_ms = v.min(5000);
            }
        }
        _ => {}
    }
}

fn handle_position(parts: &[&str], tables: &MagicTables) -> Option<Board> {
    let mut board = if parts.len() > 1 && parts[1] == "startpos" {
        Board::new()
    } else if parts.len() > 1 && parts[1] == "fen" {
        let fen_start = 2;
        let mut fen_end = parts.len();
        for (i, &part) in parts.iter().enumerate().skip(fen_start) {
            if part == "moves" {
                fen_end = i;
                break;
            }
        }

        let fen_string = parts[fen_start..fen_end].join(" ");
        Board::from_str(&fen_string).ok()?
    } else {
        Board::new()
    };

    if let Some(moves_idx) = parts.iter().position(|&p| p == "moves") {
        for move_str in &parts[moves_idx + 1..] {
            if let Some(mv) = parse_uci_move(&board, move_str, tables) {
                make_move_basic(&mut board, mv);
            } else {
                eprintln!("Invalid move: {}", move_str);
                return None;
            }
        }
    }

    Some(board)
}

fn parse_uci_move(board: &Board, move_str: &str, tables: &MagicTables) -> Option<Move> {
    if move_str.len() < 4 {
        return None;
    }

    let chars: Vec<char> = move_str.chars().collect();

    let from_file = (chars[0] as u8).wrapping_sub(b'a');
    let from_rank = (chars[1] as u8).wrapping_sub(b'1');
    let to_file = (chars[2] as u8).wrapping_sub(b'a');
    let to_rank = (chars[3] as u8).wrapping_sub(b'1');

    if from_file > 7 || from_rank > 7 || to_file > 7 || to_rank > 7 {
        return None;
    }

    let from_square = (from_rank * 8 + from_file) as usize;
    let to_square = (to_rank * 8 + to_file) as usize;

    let promo_piece = if move_str.len() >= 5 {
        match chars[4] {
            'q' => Some(kestrel::board::Piece::Queen),
            'r' => Some(kestrel::board::Piece::Rook),
            'b' => Some(kestrel::board::Piece::Bishop),
            'n' => Some(kestrel::board::Piece::Knight),
            _ => None,
        }
    } else {
        None
    };

    let mut moves = Vec::with_capacity(256);
    let mut scratch = Vec::with_capacity(256);
    let mut board_copy = board.clone();
    kestrel::moves::execute::generate_legal(&mut board_copy, tables, &mut moves, &mut scratch);

    for mv in moves {
        if (mv.from.index() as usize) == from_square && (mv.to.index() as usize) == to_square {
            if promo_piece.is_some() {
                if mv.promotion == promo_piece {
                    return Some(mv);
                }
            } else if mv.promotion.is_none() {
                return Some(mv);
            }
        }
    }
    None
}

/// Derive a soft time budget from the UCI clock fields, reserving
/// `move_overhead_ms` for engine-to-GUI latency the search itself never sees.
fn allocate_time(
    board: &Board,
    wtime: Option<u64>,
    btime: Option<u64>,
    winc: u64,
    binc: u64,
    movestogo: Option<u64>,
    move_overhead_ms: u64,
) -> Option<Duration> {
    let (my_time, my_inc) = if board.side_to_move == Color::White {
        (wtime, winc)
    } else {
        (btime, binc)
    };

    let t = my_time?;
    let safety_buffer = (t * 15 / 100).min(500) + move_overhead_ms;
    let usable_time = t.saturating_sub(safety_buffer);

    let mut alloc: u64 = if let Some(mtg) = movestogo {
        let moves_to_plan = mtg.max(2);
        usable_time / moves_to_plan + (my_inc * 3) / 4
    } else if usable_time > 5000 {
        usable_time / 40 + (my_inc * 9) / 10
    } else if usable_time > 2000 {
        usable_time / 30 + (my_inc * 3) / 4
    } else if usable_time > 500 {
        usable_time / 20 + my_inc / 2
    } else {
        my_inc / 2 + 20
    };

    let hard_cap = usable_time / 5;
    alloc = alloc.min(hard_cap).min(usable_time);
    if alloc < 10 && usable_time >= 10 {
        alloc = 10;
    }

    Some(Duration::from_millis(alloc))
}

fn handle_go(engine: &mut Engine, parts: &[&str]) {
    engine.join_in_flight();

    let mut depth = MAX_DEPTH;
    let mut time_limit = None;

    let mut wtime: Option<u64> = None;
    let mut btime: Option<u64> = None;
    let mut winc: u64 = 0;
    let mut binc: u64 = 0;
    let mut movestogo: Option<u64> = None;
    let mut movetime: Option<u64> = None;

    let mut i = 1;
    while i < parts.len() {
        match parts[i] {
            "depth" => {
                depth = parts.get(i + 1).and_then(|p| p.parse().ok()).unwrap_or(MAX_DEPTH);
                i += 2;
            }
            "movetime" => {
                movetime = parts.get(i + 1).and_then(|p| p.parse().ok());
                i += 2;
            }
            "wtime" => {
                wtime = parts.get(i + 1).and_then(|p| p.parse().ok());
                i += 2;
            }
            "btime" => {
                btime = parts.get(i + 1).and_then(|p| p.parse().ok());
                i += 2;
            }
            "winc" => {
                winc = parts.get(i + 1).and_then(|p| p.parse().ok()).unwrap_or(0);
                i += 2;
            }
            "binc" => {
                binc = parts.get(i + 1).and_then(|p| p.parse().ok()).unwrap_or(0);
                i += 2;
            }
            "movestogo" => {
                movestogo = parts.get(i + 1).and_then(|p| p.parse().ok());
                i += 2;
            }
            "nodes" => {
                i += 2; // accepted, not separately enforced: depth/time already bound node count
            }
            "infinite" => {
                depth = MAX_DEPTH;
                time_limit = None;
                i += 1;
            }
            "ponder" => {
                i += 1; // treated identically to a normal go; ponderhit is a no-op
            }
            _ => i += 1,
        }
    }

    if let Some(ms) = movetime {
        time_limit = Some(Duration::from_millis(ms));
    } else {
        time_limit = allocate_time(
            &engine.board,
            wtime,
            btime,
            winc,
            binc,
            movestogo,
            engine.options.move_overhead_ms,
        );
    }

    if let Some(limit) = time_limit {
        info!(target_ms = limit.as_millis() as u64, "time allocated");
    }

    let board = engine.board.clone();
    let pool = engine.pool.clone();

    engine.in_flight = Some(std::thread::spawn(move || {
        let (_score, best_move, _nodes) = pool.lock().unwrap().start_search(&board, depth, time_limit);
        match best_move {
            Some(m) => println!("bestmove {}", m.to_uci()),
            None => println!("bestmove 0000"),
        }
    }));
}

/// Fixed-suite node-count benchmark: searches each position to `depth` and
/// reports aggregate nodes/time, mirroring `bench` on other UCI engines.
fn run_bench(tables: &MagicTables, depth: i32) {
    const POSITIONS: &[&str] = &[
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "r1bq1rk1/ppp2ppp/2np1n2/2b1p3/2B1P3/2NP1N2/PPP2PPP/R1BQ1RK1 w - - 0 1",
    ];

    let start = std::time::Instant::now();
    let mut total_nodes: u64 = 0;

    for fen in POSITIONS {
        let mut board = Board::from_str(fen).expect("bench FEN is well-formed");
        let tt = TranspositionTable::new(64);
        let mut ctx = kestrel::search::context::SearchContext::new();
        let mut time = kestrel::search::search::TimeManager::new(None);
        let (_, _, nodes) = kestrel::search::search::search_with(
            &mut board, tables, &tt, &mut ctx, &mut time, depth, false,
        );
        total_nodes += nodes;
    }

    let elapsed = start.elapsed();
    let nps = if elapsed.as_secs_f64() > 0.0 {
        (total_nodes as f64 / elapsed.as_secs_f64()) as u64
    } else {
        0
    };

    println!(
        "{} nodes {} nps {} ms",
        total_nodes,
        nps,
        elapsed.as_millis()
    );
    println!("benchok");
}
