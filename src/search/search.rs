use crate::board::Board;
use crate::hash::zobrist_with_50mr;
use crate::moves::execute::{make_move_basic, make_null_move, undo_move_basic, undo_null_move};
use crate::moves::magic::MagicTables;
use crate::moves::square_control::in_check;
use crate::moves::types::Move;
use crate::search::context::SearchContext;
use crate::search::eval::static_eval;
use crate::search::picker::MovePicker;
use crate::search::see::SeeExt;
use crate::search::tt::{NodeType, TranspositionTable, score_from_tt, score_to_tt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const INF: i32 = 32000;
pub const MATE_SCORE: i32 = 31000;
pub const MATE_THRESHOLD: i32 = MATE_SCORE - 1000; // 30000 - buffer for mate distance
const MAX_Q_SEARCH_DEPTH: usize = 100;
const DRAW_SCORE: i32 = -50;
pub const MAX_PLY: usize = 128;

// --- Tuning Constants ---

// Reverse Futility Pruning (RFP)
const RFP_DEPTH_LIMIT: i32 = 9;
const RFP_MARGIN_BASE: i32 = 80;
const RFP_MARGIN_MULT: i32 = 90;

// Futility Pruning (FP)
const FP_DEPTH_LIMIT: i32 = 7;
const FP_MARGIN_BASE: i32 = 100;
const FP_MARGIN_MULT: i32 = 100;
const FP_HISTORY_THRESHOLD: i32 = 512;

// Late Move Pruning (LMP)
const LMP_DEPTH_LIMIT: i32 = 14;
const LMP_BASE_MOVES: i32 = 3;
const LMP_MOVE_MULTIPLIER: i32 = 6;

// Late Move Reduction (LMR)
const LMR_MIN_DEPTH: i32 = 2;
const LMR_MIN_MOVES: i32 = 4;

// Razoring
const RAZOR_DEPTH_LIMIT: i32 = 3;
const RAZOR_MARGIN: i32 = 300;

// Internal Iterative Reduction (IIR)
const IIR_DEPTH_LIMIT: i32 = 4;

// Singular Extensions (SE)
const SE_MIN_DEPTH: i32 = 8;
const SE_TT_DEPTH_MARGIN: i32 = 3;
const SE_MARGIN_PER_DEPTH: i32 = 2;

/// Shared stop signal and node counter for Lazy-SMP: every worker thread
/// polls `stop` and bumps `nodes`, so a single struct can be handed to
/// [`crate::search::pool`] without a TimeManager per worker.
pub struct SharedSearchState {
    pub stop: AtomicBool,
    pub nodes: AtomicU64,
}

impl SharedSearchState {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            nodes: AtomicU64::new(0),
        }
    }
}

impl Default for SharedSearchState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TimeManager {
    pub start_time: Instant,
    pub allotted: Option<Duration>,
    pub stop_signal: bool,
    pub shared: Option<Arc<SharedSearchState>>,
}

impl TimeManager {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            start_time: Instant::now(),
            allotted: limit,
            stop_signal: false,
            shared: None,
        }
    }

    /// A time manager that also observes a shared stop flag, used by Lazy-SMP
    /// helper workers so the main thread can halt the whole pool.
    pub fn with_shared(limit: Option<Duration>, shared: Arc<SharedSearchState>) -> Self {
        Self {
            start_time: Instant::now(),
            allotted: limit,
            stop_signal: false,
            shared: Some(shared),
        }
    }

    #[inline(always)]
    pub fn check_time(&mut self) {
        if self.stop_signal {
            return;
        }

        if let Some(shared) = &self.shared
            && shared.stop.load(Ordering::Relaxed)
        {
            self.stop_signal = true;
            return;
        }

        if let Some(limit) = self.allotted {
            let elapsed = self.start_time.elapsed();

            // Hard Stop: Abort immediately if we hit the limit
            if elapsed >= limit {
                self.stop_signal = true;
                if let Some(shared) = &self.shared {
                    shared.stop.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    /// Returns the allocated time limit
    #[inline(always)]
    pub fn allocated_time(&self) -> Option<Duration> {
        self.allotted
    }

    /// Returns elapsed time since search started
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[allow(clippy::too_many_arguments, clippy::only_used_in_recursion)]
pub fn quiescence(
    board: &mut Board,
    tables: &MagicTables,
    ctx: &mut SearchContext,
    tt: &TranspositionTable,
    ply: usize,
    mut alpha: i32,
    beta: i32,
    nodes: &mut u64,
    time: &mut TimeManager,
) -> i32 {
    // SAFETY BRAKE: Prevent Q-search explosions
    if ply > MAX_Q_SEARCH_DEPTH {
        return ctx
            .nnue
            .evaluate(board)
            .unwrap_or_else(|| static_eval(board, tables, alpha, beta));
    }

    let stand_pat = ctx
        .nnue
        .evaluate(board)
        .unwrap_or_else(|| static_eval(board, tables, alpha, beta));

    if stand_pat >= beta {
        return beta;
    }
    if stand_pat >= alpha {
        alpha = stand_pat;
    }

    // Use MovePicker in captures-only mode for quiescence
    let empty_killers = [None, None];
    let mut picker = MovePicker::new(None, empty_killers, true);

    while let Some(mv) = picker.next(board, tables, &ctx.history) {
        *nodes += 1;
        if *nodes & 63 == 0 {
            time.check_time();
        }
        if time.stop_signal {
            return stand_pat;
        }

        let mut captured_value = 0;
        if let Some(piece) = board.piece_type_at(mv.to) {
            captured_value = piece.value();
        }

        // DELTA PRUNING SAFETY
        // Don't prune if it's a promotion (potentially huge value)
        // Don't prune if it's En Passant (captured_value is 0, but it captures a pawn)
        let is_prom = mv.is_promotion();
        let is_ep = mv.is_en_passant();

        // "Blindness" Fix: Only prune standard captures.
        if !is_prom && !is_ep && stand_pat + captured_value + 200 < alpha {
            continue;
        }

        // SEE Pruning: Skip captures that lose material
        // Note: MovePicker already filters bad captures for us, but we keep this
        // for promotions and en passant which bypass SEE classification
        if !is_prom && !is_ep && !board.static_exchange_eval(mv, 0, tables) {
            continue;
        }

        let mover = board.side_to_move;
        let undo = make_move_basic(board, mv);
        let captured = undo.capture.map(|(_, p, _)| p);
        ctx.nnue.update(board, mover, mv, captured);
        let score = -quiescence(board, tables, ctx, tt, ply + 1, -beta, -alpha, nodes, time);
        undo_move_basic(board, undo);
        ctx.nnue.undo_update(board, mover, mv, captured);

        if score >= beta {
            return beta;
        }
        if score > alpha {
            alpha = score;
        }
    }
    alpha
}

#[allow(clippy::too_many_arguments)]
pub fn alpha_beta(
    board: &mut Board,
    tables: &MagicTables,
    ctx: &mut SearchContext,
    tt: &TranspositionTable,
    depth: i32,
    ply: usize,
    alpha: i32,
    beta: i32,
    nodes: &mut u64,
    time: &mut TimeManager,
) -> (i32, Option<Move>) {
    alpha_beta_inner(board, tables, ctx, tt, depth, ply, alpha, beta, nodes, time, None)
}

#[allow(clippy::too_many_arguments, clippy::only_used_in_recursion)]
fn alpha_beta_inner(
    board: &mut Board,
    tables: &MagicTables,
    ctx: &mut SearchContext,
    tt: &TranspositionTable,
    depth: i32,
    ply: usize,
    mut alpha: i32,
    mut beta: i32,
    nodes: &mut u64,
    time: &mut TimeManager,
    excluded: Option<Move>,
) -> (i32, Option<Move>) {
    // Check every 64 nodes instead of checking every node for tighter control
    if *nodes & 63 == 0 {
        time.check_time();
    }

    if time.stop_signal {
        return (0, None);
    }
    *nodes += 1;

    // Repetition & TT Probing (Standard)
    if ply > 0 && board.is_repetition() {
        return (DRAW_SCORE, None);
    }

    // [STEP 2] Mate-distance pruning: no line through this node can beat a
    // mate already found closer to the root, so clamp the window to what's
    // actually reachable and bail immediately if that collapses it.
    if ply > 0 {
        alpha = alpha.max(-MATE_SCORE + ply as i32);
        beta = beta.min(MATE_SCORE - ply as i32 - 1);
        if alpha >= beta {
            return (alpha, None);
        }
    }

    let hash = zobrist_with_50mr(board);
    let mut hash_move = None;
    let mut tt_depth_seen = 0u8;
    let mut tt_bound_seen: Option<u8> = None;
    let mut tt_raw_score = 0i32;

    // TT PROBE WITH MATE SCORE ADJUSTMENT
    if excluded.is_none()
        && let Some((tt_move, raw_score, tt_depth, tt_bound)) =
            tt.probe(hash, depth as u8, alpha, beta, ply as i32)
    {
        if let Some(tm) = tt_move {
            hash_move = Some(tm);
        }
        tt_depth_seen = tt_depth;
        tt_bound_seen = Some(tt_bound);
        tt_raw_score = raw_score;

        if tt_depth >= depth as u8 {
            // Convert the stored independent score back to relative score
            let tt_score = score_from_tt(raw_score, ply as i32);

            if ply > 0 {
                match tt_bound {
                    0 => return (tt_score, tt_move),
                    1 if tt_score >= beta => return (tt_score, tt_move),
                    2 if tt_score <= alpha => return (tt_score, tt_move),
                    _ => {}
                }
            }
        }
    }

    let in_check_now = in_check(board, board.side_to_move, tables);

    // FIX 6: CHECK EXTENSION
    // If we are in check, extend the search by 1 ply.
    // This resolves forced mates and prevents the horizon effect.
    let extension = if in_check_now { 1 } else { 0 };

    if depth <= 0 && !in_check_now {
        let score = quiescence(board, tables, ctx, tt, ply, alpha, beta, nodes, time);
        return (score, None);
    }

    // [STEP 1] Calculate Eval Early
    // We lift this out so both RFP and SFP can share it.
    let static_eval_val = if !in_check_now {
        ctx.nnue
            .evaluate(board)
            .unwrap_or_else(|| static_eval(board, tables, alpha, beta))
    } else {
        0 // Dummy value, we won't use it if in check
    };

    // Reverse Futility Pruning (RFP)
    if depth < RFP_DEPTH_LIMIT && !in_check_now && ply > 0 {
        let margin = RFP_MARGIN_BASE + RFP_MARGIN_MULT * depth;
        if static_eval_val - margin >= beta {
            return (beta, None);
        }
    }

    // Razoring: if we're hopelessly below alpha at shallow depth, drop
    // straight into quiescence and trust it rather than spend a full ply.
    if depth <= RAZOR_DEPTH_LIMIT
        && !in_check_now
        && ply > 0
        && static_eval_val + RAZOR_MARGIN * depth < alpha
    {
        let score = quiescence(board, tables, ctx, tt, ply, alpha, alpha + 1, nodes, time);
        if score < alpha {
            return (score, None);
        }
    }

    // NULL MOVE PRUNING (Tuned)
    if depth >= 4
        && !in_check_now
        && excluded.is_none()
        && board.has_non_pawn_material(board.side_to_move)
        && static_eval_val >= beta
    {
        // Dynamic Reduction: If deep, reduce more.
        let r = if depth > 6 { 3 } else { 2 };

        let undo = make_null_move(board);

        // Scout search with Null Window
        let (val, _) = alpha_beta_inner(
            board,
            tables,
            ctx,
            tt,
            depth - r - 1,
            ply + 1,
            -beta,
            -beta + 1,
            nodes,
            time,
            None,
        );
        let score = -val;
        undo_null_move(board, undo);

        if score >= beta && !time.stop_signal {
            // Verification search for high depths (Optional safety)
            if score >= MATE_THRESHOLD {
                // Don't trust null move mates, search normally
            } else {
                return (beta, None);
            }
        }
    }

    // Internal Iterative Reduction (IIR): no hash move to trust from a prior
    // probe means this node's ordering is weaker than usual, so shave a ply
    // off the depth rather than spend a full search exploring it blind.
    let mut effective_depth = depth;
    if hash_move.is_none() && depth >= IIR_DEPTH_LIMIT && !in_check_now {
        effective_depth -= 1;
    }

    // Singular Extensions: verify the hash move is the *only* move that
    // holds this position above a reduced window; if every alternative
    // fails low against it, it is singular and worth one extra ply.
    let mut singular_move = None;
    if ply > 0
        && excluded.is_none()
        && depth >= SE_MIN_DEPTH
        && let Some(tm) = hash_move
        && tt_depth_seen as i32 >= depth - SE_TT_DEPTH_MARGIN
        && tt_bound_seen != Some(NodeType::UpperBound as u8)
        && tt_raw_score.abs() < MATE_THRESHOLD
    {
        let tt_score = score_from_tt(tt_raw_score, ply as i32);
        let se_beta = tt_score - SE_MARGIN_PER_DEPTH * depth;
        let (se_score, _) = alpha_beta_inner(
            board,
            tables,
            ctx,
            tt,
            (depth - 1) / 2,
            ply,
            se_beta - 1,
            se_beta,
            nodes,
            time,
            Some(tm),
        );
        if se_score < se_beta {
            singular_move = Some(tm);
        } else if se_beta >= beta {
            // Multi-cut: excluding the hash move already fails high, so the
            // position is winning regardless of which move is played.
            return (se_beta, None);
        }
    }

    // Use MovePicker for staged move generation
    let mut picker = MovePicker::new(hash_move, ctx.killer_moves[ply], false);

    let mut best_move = None;
    let mut best_score = -INF;
    let original_alpha = alpha;
    let mut move_count = 0;
    let mut tried_quiets: Vec<Move> = Vec::new();
    let mover = board.side_to_move;

    while let Some(mv) = picker.next(board, tables, &ctx.history) {
        if Some(mv) == excluded {
            continue;
        }

        // OPTIMIZED FUTILITY PRUNING
        // Logic: If the move is quiet and our position is hopelessly below Alpha, skip it.
        if effective_depth < FP_DEPTH_LIMIT
            && !in_check_now
            && !mv.is_capture()
            && !mv.is_promotion()
            && move_count > 0
        {
            let margin = FP_MARGIN_BASE + FP_MARGIN_MULT * effective_depth;

            // HISTORY PROTECTION (The Optimization):
            // We retrieve the history score for this move.
            let history = ctx.history[mv.from.index() as usize][mv.to.index() as usize];

            // If the move has a high history score (> 2000), it has been good in other nodes.
            // We should NOT prune it, even if static eval says it's bad.
            if history < FP_HISTORY_THRESHOLD && static_eval_val + margin <= alpha {
                continue; // PRUNE: Skip to next move
            }
        }

        // LATE MOVE PRUNING (LMP)
        // Logic: If we have searched many quiet moves and haven't found a
        // good one yet, it's highly unlikely the remaining (unsorted) moves
        // will be any better. Just cut them off.
        if effective_depth < LMP_DEPTH_LIMIT
            && !in_check_now
            && !mv.is_capture()
            && !mv.is_promotion()
            && alpha == original_alpha
        {
            let lmp_threshold = LMP_BASE_MOVES + LMP_MOVE_MULTIPLIER * effective_depth;
            if move_count > lmp_threshold as usize {
                break;
            }
        }

        if !mv.is_capture() && !mv.is_promotion() {
            tried_quiets.push(mv);
        }

        let mv_extension = extension + if Some(mv) == singular_move { 1 } else { 0 };

        let undo = make_move_basic(board, mv);
        let captured = undo.capture.map(|(_, p, _)| p);
        ctx.nnue.update(board, mover, mv, captured);
        ctx.record_played(ply, mover, mv.piece, mv.to.index() as usize);
        let mut score;

        if move_count == 0 {
            let (val, _) = alpha_beta_inner(
                board,
                tables,
                ctx,
                tt,
                effective_depth - 1 + mv_extension,
                ply + 1,
                -beta,
                -alpha,
                nodes,
                time,
                None,
            );
            score = -val;
        } else {
            // LATE MOVE REDUCTION (Tuned: Soft Formula)
            let mut r = 0;
            if effective_depth > LMR_MIN_DEPTH
                && move_count > LMR_MIN_MOVES as usize
                && !mv.is_capture()
                && !mv.is_promotion()
                && !in_check_now
            {
                // Base reduction
                r = 1 + (effective_depth / 8) + (move_count as i32 / 20);

                // History Safety
                let history = ctx.history[mv.from.index() as usize][mv.to.index() as usize];
                if history > FP_HISTORY_THRESHOLD {
                    r -= 1; // Trust history
                }

                // PV Node Safety: if we are in a PV node (open window), reduce less
                if beta - alpha > 1 {
                    r -= 1;
                }

                r = r.clamp(0, effective_depth - 2);
            }

            // Perform the Reduced Search (Zero Window)
            let (val, _) = alpha_beta_inner(
                board,
                tables,
                ctx,
                tt,
                effective_depth - 1 - r,
                ply + 1,
                -alpha - 1,
                -alpha,
                nodes,
                time,
                None,
            );
            score = -val;

            // Re-search if the reduced search found a surprisingly good move
            if score > alpha && r > 0 {
                let (val, _) = alpha_beta_inner(
                    board,
                    tables,
                    ctx,
                    tt,
                    effective_depth - 1,
                    ply + 1,
                    -alpha - 1,
                    -alpha,
                    nodes,
                    time,
                    None,
                );
                score = -val;
            }

            if score > alpha && score < beta {
                let (val, _) = alpha_beta_inner(
                    board,
                    tables,
                    ctx,
                    tt,
                    effective_depth - 1 + mv_extension,
                    ply + 1,
                    -beta,
                    -alpha,
                    nodes,
                    time,
                    None,
                );
                score = -val;
            }
        }

        undo_move_basic(board, undo);
        ctx.nnue.undo_update(board, mover, mv, captured);
        move_count += 1;

        if time.stop_signal {
            return (0, None);
        }

        if score > best_score {
            best_score = score;
            if score > alpha {
                alpha = score;
                best_move = Some(mv);
            }
            if score >= beta {
                // TT SAVE WITH MATE SCORE ADJUSTMENT (LowerBound/Beta Cutoff)
                if excluded.is_none() {
                    let tt_score = score_to_tt(beta, ply as i32);
                    tt.save(
                        hash,
                        Some(mv),
                        tt_score,
                        effective_depth.max(0) as u8,
                        NodeType::LowerBound as u8,
                        ply as i32,
                    );
                }

                if !mv.is_capture() {
                    ctx.update_killer(ply, mv);
                    ctx.update_counter_move(ply, mv);

                    let bonus = depth * depth;
                    ctx.update_history(ply, mv, mover, &tried_quiets, bonus);
                }

                return (beta, Some(mv));
            }
        }
    }

    // No legal moves found - checkmate or stalemate
    if move_count == 0 {
        if excluded.is_some() {
            // All legal moves were excluded but the singular one: treat as
            // a normal alpha bound rather than a false mate.
            return (alpha, None);
        }
        if in_check_now {
            return (-MATE_SCORE + ply as i32, None);
        }
        return (0, None);
    }

    if time.stop_signal {
        return (0, None);
    }

    let node_type = if best_score >= beta {
        NodeType::LowerBound
    } else if best_score > original_alpha {
        NodeType::Exact
    } else {
        NodeType::UpperBound
    };

    // TT SAVE WITH MATE SCORE ADJUSTMENT (Best Score)
    // We save 'best_score' (which is alpha if exact, or the best failed low score if UpperBound)
    if excluded.is_none() {
        let tt_score = score_to_tt(best_score, ply as i32);
        tt.save(
            hash,
            best_move,
            tt_score,
            effective_depth.max(0) as u8,
            node_type as u8,
            ply as i32,
        );
    }

    (best_score, best_move)
}

pub fn search(
    board: &mut Board,
    tables: &MagicTables,
    max_depth: i32,
    time_limit: Option<Duration>,
) -> (i32, Option<Move>) {
    let tt = TranspositionTable::new(512);
    let mut ctx = SearchContext::new();
    let mut time = TimeManager::new(time_limit);
    let (score, mv, _nodes) = search_with(board, tables, &tt, &mut ctx, &mut time, max_depth, true);
    (score, mv)
}

/// Iterative-deepening driver shared by the single-threaded entry point and
/// each Lazy-SMP worker in [`crate::search::pool`]. `report` gates the UCI
/// `info` line: only the main thread of a pool should emit it. Returns the
/// total node count searched, since the caller's local counter is otherwise
/// invisible outside this function.
#[allow(clippy::too_many_arguments)]
pub fn search_with(
    board: &mut Board,
    tables: &MagicTables,
    tt: &TranspositionTable,
    ctx: &mut SearchContext,
    time: &mut TimeManager,
    max_depth: i32,
    report: bool,
) -> (i32, Option<Move>, u64) {
    let mut last_completed_best_move = None;
    let mut last_completed_best_score = 0;
    let mut nodes = 0;
    let mut last_iter_duration = Duration::from_millis(0);

    ctx.nnue.refresh(board);

    for depth in 1..=max_depth {
        let iter_start = Instant::now();

        // Predict if we can afford the next depth before starting it.
        // Conservative estimate: Next depth takes ~3x longer than previous.
        if depth > 1
            && let Some(limit) = time.allocated_time()
        {
            let total_elapsed = time.elapsed();
            let predicted_next = last_iter_duration * 3;

            if total_elapsed + predicted_next > limit {
                break;
            }
        }

        ctx.age_history();

        // Aspiration Window Logic
        let mut alpha = -INF;
        let mut beta = INF;
        let window = 50; // Window size (50cp)

        // Only apply aspiration windows at depth > 4 for stability
        if depth > 4 {
            alpha = last_completed_best_score - window;
            beta = last_completed_best_score + window;
        }

        let mut score;
        let mut mv;

        loop {
            let result = alpha_beta(board, tables, ctx, tt, depth, 0, alpha, beta, &mut nodes, time);

            score = result.0;
            mv = result.1;

            if time.stop_signal {
                break;
            }

            // Fail Low (Score <= Alpha): widen alpha downwards.
            if score <= alpha {
                alpha = -INF;
                continue;
            }

            // Fail High (Score >= Beta): widen beta upwards.
            if score >= beta {
                beta = INF;
                continue;
            }

            break;
        }

        last_iter_duration = iter_start.elapsed();

        if time.stop_signal {
            break;
        }

        last_completed_best_score = score;
        last_completed_best_move = mv;

        if report && let Some(valid_mv) = last_completed_best_move {
            let score_str = if last_completed_best_score.abs() >= MATE_THRESHOLD {
                let moves = (MATE_SCORE - last_completed_best_score.abs() + 1) / 2;
                if last_completed_best_score > 0 {
                    format!("mate {}", moves)
                } else {
                    format!("mate -{}", moves)
                }
            } else {
                format!("cp {}", last_completed_best_score)
            };

            println!(
                "info depth {} score {} nodes {} time {} pv {}",
                depth,
                score_str,
                nodes,
                time.start_time.elapsed().as_millis(),
                valid_mv.to_uci()
            );
        }

        if score.abs() >= MATE_THRESHOLD {
            break;
        }
    }

    (last_completed_best_score, last_completed_best_move, nodes)
}
