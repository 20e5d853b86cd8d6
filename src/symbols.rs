use serde::{Deserialize, Serialize};

use crate::board::{Cell, GameKind, Player};
use crate::error::SessionError;

/// Bijection between the backend's two symbols and the ones a game displays.
///
/// Index 0 of each pair belongs to [`Player::A`], index 1 to [`Player::B`].
/// The backend vocabulary stays the source of truth; frontend symbols only
/// exist for presentation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SymbolTable", into = "SymbolTable")]
pub struct SymbolMapping {
    backend: [String; 2],
    frontend: [String; 2],
}

#[derive(Clone, Serialize, Deserialize)]
struct SymbolTable {
    backend: [String; 2],
    frontend: [String; 2],
}

impl TryFrom<SymbolTable> for SymbolMapping {
    type Error = SessionError;

    fn try_from(table: SymbolTable) -> Result<Self, Self::Error> {
        SymbolMapping::new(table.backend, table.frontend)
    }
}

impl From<SymbolMapping> for SymbolTable {
    fn from(m: SymbolMapping) -> Self {
        SymbolTable {
            backend: m.backend,
            frontend: m.frontend,
        }
    }
}

impl std::fmt::Display for SymbolMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{}, {}->{}",
            self.backend[0], self.frontend[0], self.backend[1], self.frontend[1]
        )
    }
}

fn validate_pair(name: &str, pair: &[String; 2]) -> Result<(), SessionError> {
    if pair.iter().any(|s| s.trim().is_empty()) {
        return Err(SessionError::InvalidConfig(format!("{name} symbols must not be empty")));
    }
    if pair[0] == pair[1] {
        return Err(SessionError::InvalidConfig(format!(
            "{name} symbols must be distinct, got {:?} twice",
            pair[0]
        )));
    }
    Ok(())
}

impl SymbolMapping {
    pub fn new<B: Into<String>, F: Into<String>>(
        backend: [B; 2],
        frontend: [F; 2],
    ) -> Result<Self, SessionError> {
        let backend = backend.map(Into::into);
        let frontend = frontend.map(Into::into);
        validate_pair("backend", &backend)?;
        validate_pair("frontend", &frontend)?;
        Ok(Self { backend, frontend })
    }

    fn preset(backend: [&str; 2], frontend: [&str; 2]) -> Self {
        Self {
            backend: backend.map(String::from),
            frontend: frontend.map(String::from),
        }
    }

    /// Connect Four shows the backend's colors unchanged.
    pub fn connect_four() -> Self {
        Self::preset(["R", "Y"], ["R", "Y"])
    }

    pub fn tic_tac_toe() -> Self {
        Self::preset(["R", "Y"], ["X", "O"])
    }

    pub fn for_game(kind: GameKind) -> Self {
        match kind {
            GameKind::ConnectFour => Self::connect_four(),
            GameKind::TicTacToe => Self::tic_tac_toe(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.backend == self.frontend
    }

    pub fn player_for_backend(&self, symbol: &str) -> Option<Player> {
        let symbol = symbol.trim();
        if symbol == self.backend[0] {
            Some(Player::A)
        } else if symbol == self.backend[1] {
            Some(Player::B)
        } else {
            None
        }
    }

    pub fn player_for_frontend(&self, symbol: &str) -> Option<Player> {
        let symbol = symbol.trim();
        if symbol == self.frontend[0] {
            Some(Player::A)
        } else if symbol == self.frontend[1] {
            Some(Player::B)
        } else {
            None
        }
    }

    pub fn backend_symbol(&self, player: Player) -> &str {
        &self.backend[player.index()]
    }

    pub fn frontend_symbol(&self, player: Player) -> &str {
        &self.frontend[player.index()]
    }

    pub fn frontend_symbols(&self) -> [&str; 2] {
        [&self.frontend[0], &self.frontend[1]]
    }

    pub fn to_frontend(&self, backend: &str) -> Option<&str> {
        self.player_for_backend(backend).map(|p| self.frontend_symbol(p))
    }

    pub fn to_backend(&self, frontend: &str) -> Option<&str> {
        self.player_for_frontend(frontend).map(|p| self.backend_symbol(p))
    }

    /// Maps a raw snapshot cell. `None`, blank strings and unknown symbols
    /// all read as empty.
    pub fn cell_for_backend(&self, value: Option<&str>) -> Cell {
        value
            .and_then(|v| self.player_for_backend(v))
            .map_or(Cell::Empty, Player::cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tic_tac_toe_maps_colors_to_marks() {
        let m = SymbolMapping::tic_tac_toe();
        assert_eq!(m.to_frontend("R"), Some("X"));
        assert_eq!(m.to_frontend("Y"), Some("O"));
        assert_eq!(m.to_backend("O"), Some("Y"));
        assert_eq!(m.to_frontend("X"), None);
        assert!(!m.is_identity());
        assert!(SymbolMapping::connect_four().is_identity());
    }

    #[test]
    fn mapping_round_trips() {
        for m in [SymbolMapping::tic_tac_toe(), SymbolMapping::connect_four()] {
            for backend in ["R", "Y"] {
                let front = m.to_frontend(backend).unwrap();
                assert_eq!(m.to_backend(front), Some(backend));
            }
        }
    }

    #[test]
    fn blank_and_unknown_cells_are_empty() {
        let m = SymbolMapping::tic_tac_toe();
        assert_eq!(m.cell_for_backend(None), Cell::Empty);
        assert_eq!(m.cell_for_backend(Some("")), Cell::Empty);
        assert_eq!(m.cell_for_backend(Some(" ")), Cell::Empty);
        assert_eq!(m.cell_for_backend(Some("Q")), Cell::Empty);
        assert_eq!(m.cell_for_backend(Some("Y")), Cell::PlayerB);
    }

    #[test]
    fn rejects_non_bijective_tables() {
        assert!(SymbolMapping::new(["R", "R"], ["X", "O"]).is_err());
        assert!(SymbolMapping::new(["R", "Y"], ["X", ""]).is_err());
        let err = serde_json::from_str::<SymbolMapping>(
            r#"{"backend":["R","Y"],"frontend":["X","X"]}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn deserializes_from_table() {
        let m: SymbolMapping =
            serde_json::from_str(r#"{"backend":["R","Y"],"frontend":["X","O"]}"#).unwrap();
        assert_eq!(m, SymbolMapping::tic_tac_toe());
    }
}
