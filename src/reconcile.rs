use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::board::{Board, Cell, Player};
use crate::protocol::StateSnapshot;
use crate::symbols::SymbolMapping;

/// One cell whose local value changed, with its display symbol.
#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct CellChange {
    pub row: usize,
    pub column: usize,
    pub cell: Cell,
    pub symbol: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTerminal {
    /// `None` is a tie.
    pub winner: Option<Player>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub changes: Vec<CellChange>,
    pub current_player: Option<Player>,
    pub is_my_turn: bool,
    pub terminal: Option<RemoteTerminal>,
}

/// Merges backend snapshots into the local board through one symbol mapping.
#[derive(Clone, Debug)]
pub struct Reconciler {
    mapping: SymbolMapping,
}

impl Reconciler {
    pub fn new(mapping: SymbolMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &SymbolMapping {
        &self.mapping
    }

    pub fn display_symbol(&self, player: Player) -> &str {
        self.mapping.frontend_symbol(player)
    }

    pub fn change_for(&self, row: usize, column: usize, cell: Cell) -> CellChange {
        CellChange {
            row,
            column,
            cell,
            symbol: cell.owner().map(|p| self.display_symbol(p).to_string()),
        }
    }

    /// Writes only the cells whose mapped value differs. Snapshot cells outside
    /// the local board are ignored; a shared backend may send a larger grid.
    pub fn apply_board(&self, board: &mut Board, rows: &[Vec<Option<String>>]) -> Vec<CellChange> {
        if rows.len() > board.rows() || rows.iter().any(|r| r.len() > board.columns()) {
            debug!(
                rows = rows.len(),
                local_rows = board.rows(),
                local_columns = board.columns(),
                "truncating oversized snapshot board"
            );
        }
        let mut changes = Vec::new();
        for (row, values) in rows.iter().take(board.rows()).enumerate() {
            for (column, value) in values.iter().take(board.columns()).enumerate() {
                let cell = self.mapping.cell_for_backend(value.as_deref());
                if board.set(row, column, cell) {
                    changes.push(self.change_for(row, column, cell));
                }
            }
        }
        changes
    }

    pub fn player_for_symbol(&self, backend: Option<&str>) -> Option<Player> {
        let symbol = backend?.trim();
        if symbol.is_empty() {
            return None;
        }
        let player = self.mapping.player_for_backend(symbol);
        if player.is_none() {
            warn!(symbol, "symbol outside the backend vocabulary");
        }
        player
    }

    /// Looks up a participant's symbol in the snapshot's player table.
    pub fn player_for_id(&self, players: &HashMap<String, String>, id: &str) -> Option<Player> {
        players
            .get(id)
            .and_then(|symbol| self.mapping.player_for_backend(symbol))
    }

    /// The winner field may carry either a symbol or a player id.
    pub fn resolve_winner(
        &self,
        winner: Option<&str>,
        players: &HashMap<String, String>,
    ) -> Option<Player> {
        let winner = winner?.trim();
        if winner.is_empty() {
            return None;
        }
        self.mapping
            .player_for_backend(winner)
            .or_else(|| self.player_for_id(players, winner))
    }

    pub fn reconcile(
        &self,
        board: &mut Board,
        snapshot: &StateSnapshot,
        me: Option<Player>,
    ) -> Reconciliation {
        let changes = self.apply_board(board, &snapshot.board);
        let current_player = self.player_for_symbol(snapshot.current_player.as_deref());
        let is_my_turn = !snapshot.game_over && me.is_some() && current_player == me;
        let terminal = snapshot.game_over.then(|| RemoteTerminal {
            winner: self.resolve_winner(snapshot.winner.as_deref(), &snapshot.players),
        });
        Reconciliation {
            changes,
            current_player,
            is_my_turn,
            terminal,
        }
    }
}
