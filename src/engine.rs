use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::board::{Board, GameKind, Move, Outcome, Player, Position};
use crate::error::MoveError;

/// How long a finished offline game stays on screen before it resets.
pub const AUTO_RESET_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub position: Position,
    pub player: Player,
    pub outcome: Option<Outcome>,
}

/// Two players sharing one keyboard.
#[derive(Clone, Debug)]
pub struct LocalGame {
    board: Board,
    current: Player,
    outcome: Option<Outcome>,
}

impl LocalGame {
    pub fn new(kind: GameKind) -> Self {
        Self {
            board: Board::new(kind),
            current: Player::A,
            outcome: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn current_player(&self) -> Player {
        self.current
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn move_count(&self) -> u32 {
        self.board.move_count()
    }

    pub fn play(&mut self, mv: Move) -> Result<TurnReport, MoveError> {
        if self.outcome.is_some() {
            return Err(MoveError::GameOver);
        }
        let player = self.current;
        let position = self.board.apply_move(mv, player)?;
        self.outcome = self.board.check_winner();
        match &self.outcome {
            Some(outcome) => info!(?outcome, moves = self.board.move_count(), "local game over"),
            None => self.current = player.other(),
        }
        Ok(TurnReport {
            position,
            player,
            outcome: self.outcome.clone(),
        })
    }

    pub fn reset(&mut self) {
        self.board.clear();
        self.current = Player::A;
        self.outcome = None;
    }
}
