use crate::moves::types::Move;
use std::sync::atomic::{AtomicU64, Ordering};

pub const MATE_THRESHOLD: i32 = 30000;

const BUCKET_WAYS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Exact = 0,
    LowerBound = 1, // Beta cutoff (failed high)
    UpperBound = 2, // Alpha cutoff (failed low)
}

/// A decoded transposition table entry. The packed, atomic representation
/// lives in `Slot`; this is what callers actually work with.
#[derive(Clone, Copy, Debug)]
pub struct TTEntry {
    pub key: u64,
    pub best_move: Option<Move>,
    pub score: i16,
    pub static_eval: i16,
    pub depth: u8,
    pub bound: u8, // 0=Exact, 1=Lower, 2=Upper
    pub generation: u8,
    pub pv: bool,
}

/// Pack a `Move` into 20 bits: 6 (from) + 6 (to) + 3 (promotion, 0=none) + 5 spare.
fn pack_move(mv: Option<Move>) -> u32 {
    match mv {
        None => 0,
        Some(mv) => {
            let from = mv.from.index() as u32;
            let to = mv.to.index() as u32;
            let promo = match mv.promotion {
                None => 0u32,
                Some(crate::board::Piece::Knight) => 1,
                Some(crate::board::Piece::Bishop) => 2,
                Some(crate::board::Piece::Rook) => 3,
                Some(crate::board::Piece::Queen) => 4,
                _ => 0,
            };
            1 | (from << 1) | (to << 7) | (promo << 13)
        }
    }
}

/// Reconstruct a `Move` from its packed bits. `piece`/`flags` are not part of
/// the packed representation (the board already knows them); callers that
/// need the hash move only ever read `from`/`to`/`promotion` off it, or use
/// it purely for `to_uci()`.
fn unpack_move(bits: u32) -> Option<Move> {
    if bits & 1 == 0 {
        return None;
    }
    let from = crate::square::Square::from_index(((bits >> 1) & 0x3F) as u8);
    let to = crate::square::Square::from_index(((bits >> 7) & 0x3F) as u8);
    let promo_bits = (bits >> 13) & 0x7;
    let promotion = match promo_bits {
        1 => Some(crate::board::Piece::Knight),
        2 => Some(crate::board::Piece::Bishop),
        3 => Some(crate::board::Piece::Rook),
        4 => Some(crate::board::Piece::Queen),
        _ => None,
    };
    Some(Move {
        from,
        to,
        piece: crate::board::Piece::Pawn,
        promotion,
        flags: crate::moves::types::QUIET_MOVE,
    })
}

/// Single atomic slot: `key` publishes last so a reader that observes a
/// matching tag is guaranteed to see the `data` word that was written
/// alongside it (two-step tag-then-payload publish).
struct Slot {
    key: AtomicU64,
    data: AtomicU64,
}

impl Slot {
    const fn empty() -> Self {
        Slot {
            key: AtomicU64::new(0),
            data: AtomicU64::new(0),
        }
    }

    fn load(&self) -> (u64, u64) {
        let key = self.key.load(Ordering::Acquire);
        let data = self.data.load(Ordering::Relaxed);
        (key, data)
    }

    fn store(&self, key: u64, data: u64) {
        self.data.store(data, Ordering::Relaxed);
        self.key.store(key, Ordering::Release);
    }
}

// Bit layout of the packed 64-bit payload word:
//   0..16  move (1 valid bit + 6 from + 6 to + 3 promotion)
//   16     PV flag
//   20..36 score
//   36..52 static eval
//   52..60 depth
//   60..62 bound
//   62..64 generation
#[inline(always)]
fn pack_data(mv_bits: u32, score: i16, static_eval: i16, depth: u8, bound: u8, gen: u8, pv: bool) -> u64 {
    (mv_bits as u64)
        | ((pv as u64) << 16)
        | ((score as u16 as u64) << 20)
        | ((static_eval as u16 as u64) << 36)
        | ((depth as u64) << 52)
        | ((bound as u64) << 60)
        | ((gen as u64) << 62)
}

#[inline(always)]
fn unpack_data(data: u64) -> (u32, i16, i16, u8, u8, u8, bool) {
    let mv_bits = (data & 0xFFFF) as u32;
    let pv = ((data >> 16) & 1) != 0;
    let score = ((data >> 20) & 0xFFFF) as u16 as i16;
    let static_eval = ((data >> 36) & 0xFFFF) as u16 as i16;
    let depth = ((data >> 52) & 0xFF) as u8;
    let bound = ((data >> 60) & 0x3) as u8;
    let gen = ((data >> 62) & 0x3) as u8;
    (mv_bits, score, static_eval, depth, bound, gen, pv)
}

/// Relative replacement quality: higher survives. Mirrors the classic
/// Stockfish `depth - 8 * age_distance` victim score.
#[inline(always)]
fn quality(depth: u8, generation: u8, current_generation: u8) -> i32 {
    let age_distance = current_generation.wrapping_sub(generation) as i32;
    depth as i32 - 8 * age_distance
}

pub struct TranspositionTable {
    slots: Vec<Slot>,
    buckets: usize,
    pub generation: u8,
}

impl TranspositionTable {
    pub fn new(size_mb: usize) -> Self {
        let slot_size = std::mem::size_of::<Slot>();
        let total_slots = ((size_mb * 1024 * 1024) / slot_size).max(BUCKET_WAYS);
        let buckets = (total_slots / BUCKET_WAYS).max(1).next_power_of_two() / 2;
        let buckets = buckets.max(1);

        let mut slots = Vec::with_capacity(buckets * BUCKET_WAYS);
        slots.resize_with(buckets * BUCKET_WAYS, Slot::empty);

        Self {
            slots,
            buckets,
            generation: 0,
        }
    }

    pub fn resize(&mut self, size_mb: usize) {
        *self = TranspositionTable::new(size_mb);
    }

    pub fn new_search(&mut self) {
        self.generation = self.generation.wrapping_add(1) & 0x3;
    }

    pub fn clear(&mut self) {
        for slot in &self.slots {
            slot.key.store(0, Ordering::Relaxed);
            slot.data.store(0, Ordering::Relaxed);
        }
        self.generation = 0;
    }

    #[inline(always)]
    fn bucket_index(&self, key: u64) -> usize {
        ((key as u128 * self.buckets as u128) >> 64) as usize
    }

    #[inline(always)]
    fn tag(key: u64) -> u16 {
        (key >> 48) as u16
    }

    /// `&self`, not `&mut self`: slots publish through atomics so concurrent
    /// Lazy-SMP workers can all write through a shared `Arc<TranspositionTable>`.
    pub fn save(&self, key: u64, mv: Option<Move>, score: i32, depth: u8, bound: u8, _ply: i32) {
        self.save_pv(key, mv, score, 0, depth, bound, false);
    }

    pub fn save_pv(
        &self,
        key: u64,
        mv: Option<Move>,
        score: i32,
        static_eval: i32,
        depth: u8,
        bound: u8,
        pv: bool,
    ) {
        let score_i16 = score.clamp(i16::MIN as i32 + 1, i16::MAX as i32) as i16;
        let eval_i16 = static_eval.clamp(i16::MIN as i32 + 1, i16::MAX as i32) as i16;
        let tag = Self::tag(key);
        let base = self.bucket_index(key) * BUCKET_WAYS;

        let mut victim = base;
        let mut victim_quality = i32::MAX;
        for i in 0..BUCKET_WAYS {
            let idx = base + i;
            let (stored_key, data) = self.slots[idx].load();
            let (_, _, _, old_depth, _, old_gen, _) = unpack_data(data);
            if stored_key == 0 || (stored_key >> 48) as u16 == tag {
                victim = idx;
                victim_quality = i32::MIN;
                break;
            }
            let q = quality(old_depth, old_gen, self.generation);
            if q < victim_quality {
                victim_quality = q;
                victim = idx;
            }
        }

        let mv_bits = if mv.is_some() {
            pack_move(mv)
        } else {
            // Preserve the previously stored move if this write doesn't carry one.
            let (_, existing) = self.slots[victim].load();
            unpack_data(existing).0
        };

        let data = pack_data(mv_bits, score_i16, eval_i16, depth, bound, self.generation, pv);
        self.slots[victim].store(key, data);
    }

    pub fn probe(
        &self,
        key: u64,
        _depth: u8,
        _alpha: i32,
        _beta: i32,
        _ply: i32,
    ) -> Option<(Option<Move>, i32, u8, u8)> {
        self.probe_entry(key)
            .map(|e| (e.best_move, e.score as i32, e.depth, e.bound))
    }

    /// Decoded lookup for callers that want the full entry (static eval, PV
    /// flag) instead of the legacy 4-tuple.
    pub fn probe_entry(&self, key: u64) -> Option<TTEntry> {
        let base = self.bucket_index(key) * BUCKET_WAYS;
        for i in 0..BUCKET_WAYS {
            let (stored_key, data) = self.slots[base + i].load();
            if stored_key == key {
                let (mv_bits, score, static_eval, depth, bound, generation, pv) = unpack_data(data);
                return Some(TTEntry {
                    key,
                    best_move: unpack_move(mv_bits),
                    score,
                    static_eval,
                    depth,
                    bound,
                    generation,
                    pv,
                });
            }
        }
        None
    }

    /// Permille of slots occupied by the current generation, as UCI's `hashfull`.
    pub fn hashfull(&self) -> u32 {
        let sample = self.slots.len().min(1000);
        let mut used = 0u32;
        for slot in self.slots.iter().take(sample) {
            let (key, data) = slot.load();
            if key != 0 {
                let (_, _, _, _, _, gen, _) = unpack_data(data);
                if gen == self.generation {
                    used += 1;
                }
            }
        }
        ((used as u64 * 1000) / sample.max(1) as u64) as u32
    }
}

/// Encode a raw search score into a mate-distance-relative score suitable for
/// TT storage (distance measured from the root rather than from this node).
#[inline(always)]
pub fn score_to_tt(score: i32, ply: i32) -> i32 {
    if score >= MATE_THRESHOLD {
        score + ply
    } else if score <= -MATE_THRESHOLD {
        score - ply
    } else {
        score
    }
}

/// Inverse of `score_to_tt`: recover a root-relative score from a TT-stored one.
#[inline(always)]
pub fn score_from_tt(score: i32, ply: i32) -> i32 {
    if score >= MATE_THRESHOLD {
        score - ply
    } else if score <= -MATE_THRESHOLD {
        score + ply
    } else {
        score
    }
}
