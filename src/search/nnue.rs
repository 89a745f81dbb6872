//! Quantized NNUE evaluator: 768 piece/color/square features times 10 king
//! buckets, feeding a 1536-wide hidden layer per perspective, SCReLU
//! activation, and 8 output buckets selected by material count.

use crate::board::{Board, Color, Piece};
use crate::moves::types::Move;
use once_cell::sync::OnceCell;

pub const HL: usize = 1536;
pub const INPUT_BUCKETS: usize = 10;
pub const OUTPUT_BUCKETS: usize = 8;
const FEATURES: usize = 768;

pub const QA: i32 = 255;
pub const QB: i32 = 64;
pub const QAB: i32 = QA * QB;
pub const FV_SCALE: i32 = 400;

/// King-bucket assignment by square, mirrored for Black via `square ^ 56`.
/// Coarse 10-bucket split by king file/rank region; a real network would
/// ship this table as part of the weight file, but the bucket *count* and
/// *indexing contract* are fixed by the architecture regardless of values.
pub const INPUT_BUCKET: [usize; 64] = {
    let mut table = [0usize; 64];
    let mut sq = 0usize;
    while sq < 64 {
        let file = sq % 8;
        let rank = sq / 8;
        let region = if file <= 2 {
            0
        } else if file >= 5 {
            1
        } else {
            2
        };
        table[sq] = (region * 3 + (rank / 3).min(2)).min(INPUT_BUCKETS - 1);
        sq += 1;
    }
    table
};

pub struct NnueWeights {
    pub l1_weights: Vec<[[i16; HL]; FEATURES]>, // [bucket][feature][hidden]
    pub l1_bias: [i16; HL],
    pub l2_weights_stm: Vec<[i16; HL]>, // [bucket][hidden]
    pub l2_weights_opp: Vec<[i16; HL]>,
    pub l2_bias: Vec<i16>,
}

impl NnueWeights {
    /// Parse the big-endian int16 stream described in the weight-file format:
    /// `L1_WEIGHTS[feature][bucket][hidden]`, `L1_BIAS[hidden]`, then per
    /// output bucket `L2_WEIGHTS[stm][hidden]`, `L2_WEIGHTS[opp][hidden]`,
    /// `L2_BIAS[bucket]`.
    pub fn load(bytes: &[u8]) -> Result<Self, String> {
        let expected_len =
            (INPUT_BUCKETS * FEATURES * HL + HL + OUTPUT_BUCKETS * 2 * HL + OUTPUT_BUCKETS) * 2;
        if bytes.len() != expected_len {
            return Err(format!(
                "nnue weight file is {} bytes, expected {}",
                bytes.len(),
                expected_len
            ));
        }

        let mut cursor = 0usize;
        let mut read_i16 = |bytes: &[u8], cursor: &mut usize| -> i16 {
            let v = i16::from_be_bytes([bytes[*cursor], bytes[*cursor + 1]]);
            *cursor += 2;
            v
        };

        // Stored feature-major, bucket-minor; transpose into bucket-major
        // storage so `accumulate` indexes a single contiguous bucket slice.
        let mut l1_weights: Vec<[[i16; HL]; FEATURES]> =
            (0..INPUT_BUCKETS).map(|_| [[0i16; HL]; FEATURES]).collect();
        for feature in 0..FEATURES {
            for bucket in 0..INPUT_BUCKETS {
                for hidden in 0..HL {
                    l1_weights[bucket][feature][hidden] = read_i16(bytes, &mut cursor);
                }
            }
        }

        let mut l1_bias = [0i16; HL];
        for hidden in l1_bias.iter_mut() {
            *hidden = read_i16(bytes, &mut cursor);
        }

        let mut l2_weights_stm = vec![[0i16; HL]; OUTPUT_BUCKETS];
        let mut l2_weights_opp = vec![[0i16; HL]; OUTPUT_BUCKETS];
        let mut l2_bias = vec![0i16; OUTPUT_BUCKETS];
        for bucket in 0..OUTPUT_BUCKETS {
            for hidden in 0..HL {
                l2_weights_stm[bucket][hidden] = read_i16(bytes, &mut cursor);
            }
            for hidden in 0..HL {
                l2_weights_opp[bucket][hidden] = read_i16(bytes, &mut cursor);
            }
            l2_bias[bucket] = read_i16(bytes, &mut cursor);
        }

        Ok(Self {
            l1_weights,
            l1_bias,
            l2_weights_stm,
            l2_weights_opp,
            l2_bias,
        })
    }
}

static WEIGHTS: OnceCell<Option<NnueWeights>> = OnceCell::new();

/// Install network weights loaded from a file. Call once at startup; later
/// calls are ignored. Absence of a call (or a load failure reported via
/// `Err`) leaves evaluation on the classical material/PSQT fallback.
pub fn load_weights(bytes: &[u8]) -> Result<(), String> {
    let parsed = NnueWeights::load(bytes)?;
    let _ = WEIGHTS.set(Some(parsed));
    Ok(())
}

pub fn is_loaded() -> bool {
    matches!(WEIGHTS.get(), Some(Some(_)))
}

fn weights() -> Option<&'static NnueWeights> {
    WEIGHTS.get().and_then(|w| w.as_ref())
}

#[inline(always)]
fn feature_index(color: Color, piece: Piece, square: usize) -> usize {
    (color as usize) * 384 + (piece as usize) * 64 + square
}

/// Per-worker incremental accumulator state.
#[derive(Clone)]
pub struct NnueState {
    pub white_acc: [i16; HL],
    pub black_acc: [i16; HL],
    white_bucket: usize,
    black_bucket: usize,
}

impl NnueState {
    pub fn new() -> Self {
        Self {
            white_acc: [0; HL],
            black_acc: [0; HL],
            white_bucket: 0,
            black_bucket: 0,
        }
    }

    fn king_bucket(board: &Board, color: Color) -> usize {
        let king_sq = board.king_square(color).index() as usize;
        let mirrored = if color == Color::White {
            king_sq
        } else {
            king_sq ^ 56
        };
        INPUT_BUCKET[mirrored]
    }

    /// Recompute both perspective accumulators from scratch. Called at
    /// startup and whenever `update` detects a king-bucket crossing.
    pub fn refresh(&mut self, board: &Board) {
        let Some(w) = weights() else {
            return;
        };

        self.white_bucket = Self::king_bucket(board, Color::White);
        self.black_bucket = Self::king_bucket(board, Color::Black);
        self.white_acc = w.l1_bias;
        self.black_acc = w.l1_bias;

        for color in [Color::White, Color::Black] {
            for piece in [
                Piece::Pawn,
                Piece::Knight,
                Piece::Bishop,
                Piece::Rook,
                Piece::Queen,
                Piece::King,
            ] {
                let mut bb = board.pieces(piece, color);
                while bb != 0 {
                    let sq = bb.trailing_zeros() as usize;
                    bb &= bb - 1;
                    self.add_feature(w, color, piece, sq);
                }
            }
        }
    }

    fn add_feature(&mut self, w: &NnueWeights, color: Color, piece: Piece, square: usize) {
        let white_feat = feature_index(color, piece, square);
        let black_feat = feature_index(color.opposite(), piece, square ^ 56);
        let white_row = &w.l1_weights[self.white_bucket][white_feat];
        let black_row = &w.l1_weights[self.black_bucket][black_feat];
        for i in 0..HL {
            self.white_acc[i] = self.white_acc[i].wrapping_add(white_row[i]);
            self.black_acc[i] = self.black_acc[i].wrapping_add(black_row[i]);
        }
    }

    fn sub_feature(&mut self, w: &NnueWeights, color: Color, piece: Piece, square: usize) {
        let white_feat = feature_index(color, piece, square);
        let black_feat = feature_index(color.opposite(), piece, square ^ 56);
        let white_row = &w.l1_weights[self.white_bucket][white_feat];
        let black_row = &w.l1_weights[self.black_bucket][black_feat];
        for i in 0..HL {
            self.white_acc[i] = self.white_acc[i].wrapping_sub(white_row[i]);
            self.black_acc[i] = self.black_acc[i].wrapping_sub(black_row[i]);
        }
    }

    /// True if `mover` playing `mv` moves its king into a different input
    /// bucket, forcing a refresh. Only the mover's own king can change that
    /// king's bucket, and the bucket table is keyed by square alone, so this
    /// needs nothing beyond the move itself.
    fn crosses_bucket(mover: Color, mv: Move) -> bool {
        if mv.piece != Piece::King {
            return false;
        }
        if mv.is_castling() {
            return true;
        }
        let from_sq = mv.from.index() as usize;
        let to_sq = mv.to.index() as usize;
        let (from_m, to_m) = if mover == Color::White {
            (from_sq, to_sq)
        } else {
            (from_sq ^ 56, to_sq ^ 56)
        };
        INPUT_BUCKET[from_m] != INPUT_BUCKET[to_m]
    }

    /// Incrementally apply `mv`. `board` is the position after `mv` has
    /// already been played, used only to rebuild from scratch when the move
    /// crosses a king bucket.
    pub fn update(&mut self, board: &Board, mover: Color, mv: Move, captured: Option<Piece>) {
        if weights().is_none() {
            return;
        }

        if Self::crosses_bucket(mover, mv) {
            self.refresh(board);
            return;
        }

        let w = weights().unwrap();
        let from_sq = mv.from.index() as usize;
        let to_sq = mv.to.index() as usize;

        self.sub_feature(w, mover, mv.piece, from_sq);

        if let Some(cap) = captured {
            let cap_sq = if mv.is_en_passant() {
                if mover == Color::White {
                    to_sq - 8
                } else {
                    to_sq + 8
                }
            } else {
                to_sq
            };
            self.sub_feature(w, mover.opposite(), cap, cap_sq);
        }

        let landed_piece = mv.promotion.unwrap_or(mv.piece);
        self.add_feature(w, mover, landed_piece, to_sq);
    }

    /// Exact inverse of `update`. `board` is the position after the move has
    /// already been unmade, used only to rebuild from scratch on a crossing.
    pub fn undo_update(&mut self, board: &Board, mover: Color, mv: Move, captured: Option<Piece>) {
        if weights().is_none() {
            return;
        }

        if Self::crosses_bucket(mover, mv) {
            self.refresh(board);
            return;
        }

        let w = weights().unwrap();
        let from_sq = mv.from.index() as usize;
        let to_sq = mv.to.index() as usize;

        let landed_piece = mv.promotion.unwrap_or(mv.piece);
        self.sub_feature(w, mover, landed_piece, to_sq);

        if let Some(cap) = captured {
            let cap_sq = if mv.is_en_passant() {
                if mover == Color::White {
                    to_sq - 8
                } else {
                    to_sq + 8
                }
            } else {
                to_sq
            };
            self.add_feature(w, mover.opposite(), cap, cap_sq);
        }

        self.add_feature(w, mover, mv.piece, from_sq);
    }

    #[inline(always)]
    fn screlu(x: i16) -> i32 {
        let clamped = (x as i32).clamp(0, QA);
        clamped * clamped
    }

    fn output_bucket(board: &Board) -> usize {
        let occ = board.occupied().count_ones() as usize;
        let divisor = (32usize).div_ceil(OUTPUT_BUCKETS);
        ((occ.saturating_sub(2)) / divisor).min(OUTPUT_BUCKETS - 1)
    }

    /// Evaluate from the side-to-move's perspective; positive favors stm.
    /// Returns `None` if no weights have been loaded.
    pub fn evaluate(&self, board: &Board) -> Option<i32> {
        let w = weights()?;
        let bucket = Self::output_bucket(board);

        let (stm_acc, opp_acc) = match board.side_to_move {
            Color::White => (&self.white_acc, &self.black_acc),
            Color::Black => (&self.black_acc, &self.white_acc),
        };

        let mut sum: i64 = 0;
        let w_stm = &w.l2_weights_stm[bucket];
        let w_opp = &w.l2_weights_opp[bucket];
        for i in 0..HL {
            sum += (Self::screlu(stm_acc[i]) * w_stm[i] as i32) as i64;
            sum += (Self::screlu(opp_acc[i]) * w_opp[i] as i32) as i64;
        }

        let bias = w.l2_bias[bucket] as i64;
        let y = (sum / QA as i64 + bias) * FV_SCALE as i64 / QAB as i64;
        Some(y as i32)
    }
}

impl Default for NnueState {
    fn default() -> Self {
        Self::new()
    }
}
