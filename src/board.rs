use serde::{Deserialize, Serialize};

use crate::error::MoveError;

const CONNECT_FOUR_ROWS: usize = 6;
const CONNECT_FOUR_COLUMNS: usize = 7;
const TIC_TAC_TOE_SIZE: usize = 3;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum Player {
    A,
    B,
}

impl Player {
    pub fn other(self) -> Player {
        match self {
            Player::A => Player::B,
            Player::B => Player::A,
        }
    }

    pub fn cell(self) -> Cell {
        match self {
            Player::A => Cell::PlayerA,
            Player::B => Cell::PlayerB,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Player::A => 0,
            Player::B => 1,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    PlayerA,
    PlayerB,
}

impl Cell {
    pub fn owner(self) -> Option<Player> {
        match self {
            Cell::Empty => None,
            Cell::PlayerA => Some(Player::A),
            Cell::PlayerB => Some(Player::B),
        }
    }

    pub fn is_empty(self) -> bool {
        self == Cell::Empty
    }
}

/// The two board games that share the match backend.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// 6x7 gravity-drop, four in a row.
    #[default]
    ConnectFour,
    /// 3x3 free placement, three in a row.
    TicTacToe,
}

impl GameKind {
    pub fn rows(self) -> usize {
        match self {
            GameKind::ConnectFour => CONNECT_FOUR_ROWS,
            GameKind::TicTacToe => TIC_TAC_TOE_SIZE,
        }
    }

    pub fn columns(self) -> usize {
        match self {
            GameKind::ConnectFour => CONNECT_FOUR_COLUMNS,
            GameKind::TicTacToe => TIC_TAC_TOE_SIZE,
        }
    }

    pub fn win_length(self) -> usize {
        match self {
            GameKind::ConnectFour => 4,
            GameKind::TicTacToe => 3,
        }
    }

    pub fn gravity(self) -> bool {
        matches!(self, GameKind::ConnectFour)
    }

    pub fn capacity(self) -> usize {
        self.rows() * self.columns()
    }

    /// Path segment used by the backend's websocket routes.
    pub fn slug(self) -> &'static str {
        match self {
            GameKind::ConnectFour => "connect4",
            GameKind::TicTacToe => "tictactoe",
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Move {
    /// Gravity variant: the piece settles in the lowest empty row.
    Drop { column: usize },
    /// Free-placement variant.
    Place { row: usize, column: usize },
}

impl Move {
    pub fn column(self) -> usize {
        match self {
            Move::Drop { column } | Move::Place { column, .. } => column,
        }
    }

    pub fn row(self) -> Option<usize> {
        match self {
            Move::Drop { .. } => None,
            Move::Place { row, .. } => Some(row),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct WinningLine {
    pub player: Player,
    pub cells: Vec<Position>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Win(WinningLine),
    Tie,
}

impl Outcome {
    pub fn winner(&self) -> Option<Player> {
        match self {
            Outcome::Win(line) => Some(line.player),
            Outcome::Tie => None,
        }
    }
}

// Scan directions as (row delta, column delta), in reporting order.
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (-1, 1)];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    kind: GameKind,
    cells: Vec<Cell>,
    moves: u32,
}

impl Board {
    pub fn new(kind: GameKind) -> Self {
        Self {
            kind,
            cells: vec![Cell::Empty; kind.capacity()],
            moves: 0,
        }
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn rows(&self) -> usize {
        self.kind.rows()
    }

    pub fn columns(&self) -> usize {
        self.kind.columns()
    }

    pub fn move_count(&self) -> u32 {
        self.moves
    }

    pub fn get(&self, row: usize, column: usize) -> Option<Cell> {
        if row < self.rows() && column < self.columns() {
            Some(self.cells[row * self.columns() + column])
        } else {
            None
        }
    }

    /// Overwrites one cell. Returns whether the value changed.
    pub(crate) fn set(&mut self, row: usize, column: usize, cell: Cell) -> bool {
        if row >= self.rows() || column >= self.columns() {
            return false;
        }
        let idx = row * self.columns() + column;
        if self.cells[idx] == cell {
            return false;
        }
        self.cells[idx] = cell;
        true
    }

    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn is_full(&self) -> bool {
        self.filled() == self.kind.capacity()
    }

    pub fn clear(&mut self) {
        self.cells.fill(Cell::Empty);
        self.moves = 0;
    }

    pub fn rows_iter(&self) -> impl Iterator<Item = &[Cell]> {
        self.cells.chunks(self.columns())
    }

    /// Lowest empty row of a column, counting rows from the top.
    pub fn drop_row(&self, column: usize) -> Option<usize> {
        (0..self.rows())
            .rev()
            .find(|&row| self.get(row, column) == Some(Cell::Empty))
    }

    /// Resolves the cell a move would occupy without touching the board.
    pub fn target(&self, mv: Move) -> Result<Position, MoveError> {
        if self.check_winner().is_some() {
            return Err(MoveError::GameOver);
        }
        match (mv, self.kind.gravity()) {
            (Move::Drop { column }, true) => {
                if column >= self.columns() {
                    return Err(MoveError::OutOfBounds { row: 0, column });
                }
                self.drop_row(column)
                    .map(|row| Position::new(row, column))
                    .ok_or(MoveError::ColumnFull { column })
            }
            (Move::Place { row, column }, false) => match self.get(row, column) {
                None => Err(MoveError::OutOfBounds { row, column }),
                Some(Cell::Empty) => Ok(Position::new(row, column)),
                Some(_) => Err(MoveError::Occupied { row, column }),
            },
            (_, true) => Err(MoveError::WrongMoveKind { expected: "column drop" }),
            (_, false) => Err(MoveError::WrongMoveKind { expected: "cell placement" }),
        }
    }

    pub fn apply_move(&mut self, mv: Move, player: Player) -> Result<Position, MoveError> {
        let pos = self.target(mv)?;
        self.set(pos.row, pos.column, player.cell());
        self.moves += 1;
        Ok(pos)
    }

    pub fn check_winner(&self) -> Option<Outcome> {
        let need = self.kind.win_length();
        for (dr, dc) in DIRECTIONS {
            for row in 0..self.rows() {
                for column in 0..self.columns() {
                    if let Some(line) = self.run_from(row, column, dr, dc, need) {
                        return Some(Outcome::Win(line));
                    }
                }
            }
        }
        if self.is_full() {
            Some(Outcome::Tie)
        } else {
            None
        }
    }

    fn run_from(
        &self,
        row: usize,
        column: usize,
        dr: isize,
        dc: isize,
        need: usize,
    ) -> Option<WinningLine> {
        let player = self.get(row, column)?.owner()?;
        let mut cells = Vec::with_capacity(need);
        for step in 0..need as isize {
            let r = row as isize + dr * step;
            let c = column as isize + dc * step;
            if r < 0 || c < 0 {
                return None;
            }
            let (r, c) = (r as usize, c as usize);
            if self.get(r, c)?.owner() != Some(player) {
                return None;
            }
            cells.push(Position::new(r, c));
        }
        Some(WinningLine { player, cells })
    }

    /// Text rendering with one symbol per player, `.` for empty cells.
    pub fn render(&self, symbols: [&str; 2]) -> String {
        let mut out = String::new();
        for row in self.rows_iter() {
            let line: Vec<&str> = row
                .iter()
                .map(|c| match c.owner() {
                    Some(p) => symbols[p.index()],
                    None => ".",
                })
                .collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(board: &mut Board, cells: &[(usize, usize, Player)]) {
        for &(row, column, p) in cells {
            board.apply_move(Move::Place { row, column }, p).unwrap();
        }
    }

    #[test]
    fn drop_settles_in_lowest_empty_row() {
        let mut board = Board::new(GameKind::ConnectFour);
        assert_eq!(board.apply_move(Move::Drop { column: 3 }, Player::A), Ok(Position::new(5, 3)));
        assert_eq!(board.apply_move(Move::Drop { column: 3 }, Player::B), Ok(Position::new(4, 3)));
        assert_eq!(board.move_count(), 2);
    }

    #[test]
    fn full_column_is_rejected_without_mutation() {
        let mut board = Board::new(GameKind::ConnectFour);
        let mut p = Player::A;
        for _ in 0..6 {
            board.apply_move(Move::Drop { column: 0 }, p).unwrap();
            p = p.other();
        }
        let before = board.clone();
        assert_eq!(
            board.apply_move(Move::Drop { column: 0 }, p),
            Err(MoveError::ColumnFull { column: 0 })
        );
        assert_eq!(board, before);
    }

    #[test]
    fn occupied_cell_is_not_double_counted() {
        let mut board = Board::new(GameKind::TicTacToe);
        let mv = Move::Place { row: 1, column: 1 };
        board.apply_move(mv, Player::A).unwrap();
        assert_eq!(
            board.apply_move(mv, Player::A),
            Err(MoveError::Occupied { row: 1, column: 1 })
        );
        assert_eq!(board.move_count(), 1);
        assert_eq!(board.filled(), 1);
    }

    #[test]
    fn wrong_move_kind_and_bounds() {
        let mut board = Board::new(GameKind::TicTacToe);
        assert!(matches!(
            board.apply_move(Move::Drop { column: 0 }, Player::A),
            Err(MoveError::WrongMoveKind { .. })
        ));
        assert_eq!(
            board.apply_move(Move::Place { row: 3, column: 0 }, Player::A),
            Err(MoveError::OutOfBounds { row: 3, column: 0 })
        );
        let mut c4 = Board::new(GameKind::ConnectFour);
        assert_eq!(
            c4.apply_move(Move::Drop { column: 7 }, Player::A),
            Err(MoveError::OutOfBounds { row: 0, column: 7 })
        );
    }

    #[test]
    fn vertical_four_reports_column_cells() {
        let mut board = Board::new(GameKind::ConnectFour);
        for _ in 0..4 {
            board.apply_move(Move::Drop { column: 2 }, Player::A).unwrap();
        }
        let expected = WinningLine {
            player: Player::A,
            cells: vec![
                Position::new(2, 2),
                Position::new(3, 2),
                Position::new(4, 2),
                Position::new(5, 2),
            ],
        };
        assert_eq!(board.check_winner(), Some(Outcome::Win(expected)));
    }

    #[test]
    fn moves_after_win_are_rejected() {
        let mut board = Board::new(GameKind::TicTacToe);
        place(
            &mut board,
            &[(0, 0, Player::A), (0, 1, Player::A), (0, 2, Player::A)],
        );
        assert_eq!(
            board.apply_move(Move::Place { row: 2, column: 2 }, Player::B),
            Err(MoveError::GameOver)
        );
    }

    #[test]
    fn short_diagonals_are_scanned_from_every_origin() {
        // Down-right diagonal that does not touch the main diagonal.
        let mut board = Board::new(GameKind::ConnectFour);
        board.set(0, 3, Cell::PlayerB);
        board.set(1, 4, Cell::PlayerB);
        board.set(2, 5, Cell::PlayerB);
        board.set(3, 6, Cell::PlayerB);
        let Some(Outcome::Win(line)) = board.check_winner() else {
            panic!("expected a win");
        };
        assert_eq!(line.player, Player::B);
        assert_eq!(line.cells[0], Position::new(0, 3));

        // Up-right diagonal in the lower-left corner.
        let mut board = Board::new(GameKind::ConnectFour);
        board.set(5, 0, Cell::PlayerA);
        board.set(4, 1, Cell::PlayerA);
        board.set(3, 2, Cell::PlayerA);
        board.set(2, 3, Cell::PlayerA);
        let Some(Outcome::Win(line)) = board.check_winner() else {
            panic!("expected a win");
        };
        assert_eq!(
            line.cells,
            vec![
                Position::new(5, 0),
                Position::new(4, 1),
                Position::new(3, 2),
                Position::new(2, 3)
            ]
        );
    }

    #[test]
    fn horizontal_runs_are_reported_before_vertical() {
        let mut board = Board::new(GameKind::TicTacToe);
        board.set(0, 0, Cell::PlayerA);
        board.set(1, 0, Cell::PlayerA);
        board.set(2, 0, Cell::PlayerA);
        board.set(2, 1, Cell::PlayerA);
        board.set(2, 2, Cell::PlayerA);
        let Some(Outcome::Win(line)) = board.check_winner() else {
            panic!("expected a win");
        };
        assert_eq!(
            line.cells,
            vec![Position::new(2, 0), Position::new(2, 1), Position::new(2, 2)]
        );
    }

    #[test]
    fn full_board_without_line_is_a_tie() {
        // X O X / X O O / O X X
        let mut board = Board::new(GameKind::TicTacToe);
        place(
            &mut board,
            &[
                (0, 0, Player::A),
                (0, 1, Player::B),
                (0, 2, Player::A),
                (1, 1, Player::B),
                (1, 0, Player::A),
                (1, 2, Player::B),
                (2, 1, Player::A),
                (2, 0, Player::B),
                (2, 2, Player::A),
            ],
        );
        assert_eq!(board.check_winner(), Some(Outcome::Tie));
    }

    #[test]
    fn partial_board_without_line_has_no_result() {
        let mut board = Board::new(GameKind::ConnectFour);
        // Two bottom rows in a checkerboard: no run longer than two.
        for column in 0..7 {
            let (bottom, above) = if column % 2 == 0 {
                (Cell::PlayerA, Cell::PlayerB)
            } else {
                (Cell::PlayerB, Cell::PlayerA)
            };
            board.set(5, column, bottom);
            board.set(4, column, above);
        }
        assert_eq!(board.filled(), 14);
        assert!(!board.is_full());
        assert_eq!(board.check_winner(), None);
        assert!(board.target(Move::Drop { column: 0 }).is_ok());
    }

    #[test]
    fn render_uses_player_symbols() {
        let mut board = Board::new(GameKind::TicTacToe);
        board.apply_move(Move::Place { row: 0, column: 0 }, Player::A).unwrap();
        board.apply_move(Move::Place { row: 2, column: 2 }, Player::B).unwrap();
        assert_eq!(board.render(["X", "O"]), "X . .\n. . .\n. . O\n");
    }
}
