//! Byte-pair primitives shared by the trainer and the tokenizer.
//!
//! Pieces are interned by content into small integer ids so that words can
//! be handled as `Vec<u32>` while pairs still compare by their bytes.
//! Ids `0..=255` are always the single bytes.

use std::sync::Arc;

use rustc_hash::FxHashMap;

pub(crate) type PieceId = u32;
pub(crate) type Pair = (PieceId, PieceId);

/// Rank table used for encoding: pair → (rank, merged piece).
pub(crate) type MergeRanks = FxHashMap<Pair, (u32, PieceId)>;

/// Byte pieces interned by content.
#[derive(Debug, Clone)]
pub(crate) struct PieceTable {
    bytes: Vec<Arc<[u8]>>,
    ids: FxHashMap<Arc<[u8]>, PieceId>,
}

impl PieceTable {
    /// A table holding the 256 single-byte pieces under their byte value.
    pub(crate) fn new() -> Self {
        let mut table = Self {
            bytes: Vec::with_capacity(256),
            ids: FxHashMap::default(),
        };
        for b in 0..=u8::MAX {
            table.intern(&[b]);
        }
        table
    }

    pub(crate) fn intern(&mut self, bytes: &[u8]) -> PieceId {
        if let Some(&id) = self.ids.get(bytes) {
            return id;
        }
        let id = self.bytes.len() as PieceId;
        let piece: Arc<[u8]> = Arc::from(bytes);
        self.bytes.push(Arc::clone(&piece));
        self.ids.insert(piece, id);
        id
    }

    pub(crate) fn get(&self, id: PieceId) -> &Arc<[u8]> {
        &self.bytes[id as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Intern the concatenation of two pieces.
    pub(crate) fn concat(&mut self, left: PieceId, right: PieceId) -> PieceId {
        let (l, r) = (self.get(left), self.get(right));
        let mut joined = Vec::with_capacity(l.len() + r.len());
        joined.extend_from_slice(l);
        joined.extend_from_slice(r);
        self.intern(&joined)
    }
}

/// Replace every occurrence of `pair` with `merged`, scanning left to right
/// and never reusing a piece that was already consumed: `[a, a, a]` merged on
/// `(a, a)` becomes `[aa, a]`.
pub(crate) fn merge_pair(pieces: &mut Vec<PieceId>, pair: Pair, merged: PieceId) {
    let len = pieces.len();
    let (mut read, mut write) = (0, 0);
    while read < len {
        if read + 1 < len && pieces[read] == pair.0 && pieces[read + 1] == pair.1 {
            pieces[write] = merged;
            read += 2;
        } else {
            pieces[write] = pieces[read];
            read += 1;
        }
        write += 1;
    }
    pieces.truncate(write);
}

/// Apply learned merges to the bytes of one word.
///
/// Starts from single-byte pieces and repeatedly merges the present pair
/// with the lowest rank until no present pair has a rank.
pub(crate) fn byte_pair_encode(bytes: &[u8], ranks: &MergeRanks) -> Vec<PieceId> {
    let mut pieces: Vec<PieceId> = bytes.iter().map(|&b| b as PieceId).collect();

    while pieces.len() > 1 {
        let mut best: Option<(u32, Pair, PieceId)> = None;
        for w in pieces.windows(2) {
            if let Some(&(rank, merged)) = ranks.get(&(w[0], w[1])) {
                if best.map_or(true, |(r, _, _)| rank < r) {
                    best = Some((rank, (w[0], w[1]), merged));
                }
            }
        }
        let Some((_, pair, merged)) = best else {
            break;
        };
        merge_pair(&mut pieces, pair, merged);
    }

    pieces
}
