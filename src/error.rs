use thiserror::Error;

/// Reasons a move is refused by the local board before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("cell ({row}, {column}) is already occupied")]
    Occupied { row: usize, column: usize },
    #[error("column {column} is full")]
    ColumnFull { column: usize },
    #[error("position ({row}, {column}) is outside the board")]
    OutOfBounds { row: usize, column: usize },
    #[error("this game expects {expected} moves")]
    WrongMoveKind { expected: &'static str },
    #[error("the game is already over")]
    GameOver,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid move: {0}")]
    InvalidMove(#[from] MoveError),
    #[error("it is not your turn")]
    NotMyTurn,
    #[error("server rejected move: {0}")]
    ServerRejectedMove(String),
    #[error("connection lost (reconnect attempt {attempt} of {max_attempts})")]
    ConnectionLost { attempt: u32, max_attempts: u32 },
    #[error("connection could not be restored after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no player identity or token available")]
    AuthenticationMissing,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is not a three-part JWT")]
    Malformed,
    #[error("token payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("token carries neither `sub` nor `user_id`")]
    MissingSubject,
}

#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("transport closed")]
    Closed,
}
