//! Globally ranked leaderboards over tracked state fields.
//!
//! The index is process-wide shared state: many session workers update it,
//! so writes go through a single `RwLock` writer while `top`/`rank_of`
//! reads proceed concurrently with each other.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use state_core::{Path, PathError, PlayerId, resolver};

/// One ranked row of a tracked field's leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub player: PlayerId,
    pub score: i64,
    /// 1-based rank, highest score first.
    pub rank: usize,
}

/// Ordering key: highest score first, then earliest holder of that score.
///
/// `seq` is assigned from a global counter when a score value is attained,
/// which makes the tie-break deterministic and reproducible given the same
/// update order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BoardKey {
    score: Reverse<i64>,
    seq: u64,
}

#[derive(Default)]
struct FieldBoard {
    ordered: BTreeMap<BoardKey, PlayerId>,
    by_player: HashMap<PlayerId, BoardKey>,
}

#[derive(Default)]
struct Inner {
    fields: HashMap<String, FieldBoard>,
    next_seq: u64,
}

/// Process-wide ordered ranking over the configured tracked fields.
///
/// Updates are O(log n); `top` is O(k); entries for offline identities
/// persist until [`LeaderboardIndex::remove_player`].
pub struct LeaderboardIndex {
    tracked: HashMap<String, Path>,
    inner: RwLock<Inner>,
}

impl LeaderboardIndex {
    /// Build an index over the given tracked field paths.
    pub fn new(fields: impl IntoIterator<Item = String>) -> Result<Self, PathError> {
        let mut tracked = HashMap::new();
        for field in fields {
            let path = Path::parse(&field)?;
            tracked.insert(field, path);
        }
        Ok(Self {
            tracked,
            inner: RwLock::new(Inner::default()),
        })
    }

    pub fn is_tracked(&self, field: &str) -> bool {
        self.tracked.contains_key(field)
    }

    /// Interpret a tree value as a leaderboard score.
    ///
    /// Scores are `i64`; non-integral numbers truncate toward zero.
    pub fn score_from_value(value: &Value) -> Option<i64> {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
    }

    /// Record a score for `player` under `field`.
    ///
    /// A no-op for untracked fields. Re-submitting an unchanged score keeps
    /// the existing position (no self-demotion on ties).
    pub fn update(&self, field: &str, player: &PlayerId, score: i64) {
        if !self.is_tracked(field) {
            trace!(target: "runtime::leaderboard", field, "ignoring untracked field");
            return;
        }
        let mut guard = self.inner.write().expect("leaderboard lock poisoned");
        let Inner { fields, next_seq } = &mut *guard;
        let board = fields.entry(field.to_string()).or_default();

        if let Some(existing) = board.by_player.get(player) {
            if existing.score.0 == score {
                return;
            }
            board.ordered.remove(existing);
        }

        *next_seq += 1;
        let key = BoardKey {
            score: Reverse(score),
            seq: *next_seq,
        };
        board.ordered.insert(key, player.clone());
        board.by_player.insert(player.clone(), key);
    }

    /// Top `k` entries for `field`, highest score first.
    pub fn top(&self, field: &str, k: usize) -> Vec<LeaderboardEntry> {
        let guard = self.inner.read().expect("leaderboard lock poisoned");
        let Some(board) = guard.fields.get(field) else {
            return Vec::new();
        };
        board
            .ordered
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, (key, player))| LeaderboardEntry {
                player: player.clone(),
                score: key.score.0,
                rank: i + 1,
            })
            .collect()
    }

    /// 1-based rank of `player` under `field`, consistent with [`top`](Self::top).
    pub fn rank_of(&self, field: &str, player: &PlayerId) -> Option<usize> {
        let guard = self.inner.read().expect("leaderboard lock poisoned");
        let board = guard.fields.get(field)?;
        let key = *board.by_player.get(player)?;
        Some(board.ordered.range(..=key).count())
    }

    /// Drop every entry held by `player` across all tracked fields.
    pub fn remove_player(&self, player: &PlayerId) {
        let mut guard = self.inner.write().expect("leaderboard lock poisoned");
        for board in guard.fields.values_mut() {
            if let Some(key) = board.by_player.remove(player) {
                board.ordered.remove(&key);
            }
        }
    }

    /// Seed entries for `player` from a freshly loaded tree.
    ///
    /// Rebuilds rankings as identities come online after a process restart.
    pub fn seed_from_tree(&self, player: &PlayerId, tree: &Value) {
        for (field, path) in &self.tracked {
            if let Some(value) = resolver::get(tree, path)
                && let Some(score) = Self::score_from_value(value)
            {
                self.update(field, player, score);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> LeaderboardIndex {
        LeaderboardIndex::new(["Coins".to_string()]).unwrap()
    }

    fn player(id: &str) -> PlayerId {
        PlayerId::from(id)
    }

    #[test]
    fn test_top_orders_by_score_descending() {
        let board = index();
        board.update("Coins", &player("a"), 10);
        board.update("Coins", &player("b"), 30);
        board.update("Coins", &player("c"), 20);

        let top = board.top("Coins", 10);
        let order: Vec<_> = top.iter().map(|e| e.player.as_str()).collect();
        assert_eq!(order, ["b", "c", "a"]);
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[2].rank, 3);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let board = index();
        board.update("Coins", &player("first"), 50);
        board.update("Coins", &player("second"), 50);
        board.update("Coins", &player("third"), 50);

        let order: Vec<_> = board
            .top("Coins", 10)
            .into_iter()
            .map(|e| e.player)
            .collect();
        assert_eq!(
            order,
            [player("first"), player("second"), player("third")]
        );
    }

    #[test]
    fn test_resubmitting_same_score_keeps_position() {
        let board = index();
        board.update("Coins", &player("first"), 50);
        board.update("Coins", &player("second"), 50);
        board.update("Coins", &player("first"), 50);

        assert_eq!(board.rank_of("Coins", &player("first")), Some(1));
        assert_eq!(board.rank_of("Coins", &player("second")), Some(2));
    }

    #[test]
    fn test_score_change_reenters_at_tail_of_tie_group() {
        let board = index();
        board.update("Coins", &player("a"), 50);
        board.update("Coins", &player("b"), 10);
        // b climbs to 50 later, so a keeps the earlier claim on that score
        board.update("Coins", &player("b"), 50);

        assert_eq!(board.rank_of("Coins", &player("a")), Some(1));
        assert_eq!(board.rank_of("Coins", &player("b")), Some(2));
    }

    #[test]
    fn test_top_k_bound() {
        let board = index();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            board.update("Coins", &player(id), i as i64);
        }
        assert_eq!(board.top("Coins", 2).len(), 2);
        assert_eq!(board.top("Coins", 0).len(), 0);
        assert_eq!(board.top("Coins", 100).len(), 4);
    }

    #[test]
    fn test_rank_of_consistent_with_top() {
        let board = index();
        board.update("Coins", &player("a"), 5);
        board.update("Coins", &player("b"), 15);
        board.update("Coins", &player("c"), 15);
        board.update("Coins", &player("d"), 1);

        for entry in board.top("Coins", 10) {
            assert_eq!(board.rank_of("Coins", &entry.player), Some(entry.rank));
        }
    }

    #[test]
    fn test_untracked_field_is_noop() {
        let board = index();
        board.update("Gems", &player("a"), 10);
        assert!(board.top("Gems", 10).is_empty());
        assert_eq!(board.rank_of("Gems", &player("a")), None);
    }

    #[test]
    fn test_remove_player_clears_entries() {
        let board = index();
        board.update("Coins", &player("a"), 10);
        board.update("Coins", &player("b"), 5);
        board.remove_player(&player("a"));

        assert_eq!(board.rank_of("Coins", &player("a")), None);
        assert_eq!(board.rank_of("Coins", &player("b")), Some(1));
    }

    #[test]
    fn test_seed_from_tree() {
        let board = LeaderboardIndex::new(["Coins".to_string(), "Stats.Wins".to_string()]).unwrap();
        let tree = serde_json::json!({"Coins": 120, "Stats": {"Wins": 4}});
        board.seed_from_tree(&player("a"), &tree);

        assert_eq!(board.rank_of("Coins", &player("a")), Some(1));
        assert_eq!(board.rank_of("Stats.Wins", &player("a")), Some(1));
    }
}
