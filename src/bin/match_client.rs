#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use clap::{Parser, Subcommand};
#[cfg(not(target_arch = "wasm32"))]
use match_sync::board::{GameKind, Move, Outcome};
#[cfg(not(target_arch = "wasm32"))]
use match_sync::config::SessionConfig;
#[cfg(not(target_arch = "wasm32"))]
use match_sync::driver::{Command, DriverEvent, MatchDriver};
#[cfg(not(target_arch = "wasm32"))]
use match_sync::engine::{AUTO_RESET_DELAY, LocalGame};
#[cfg(not(target_arch = "wasm32"))]
use match_sync::session::{MatchSession, Notice, SessionView};
#[cfg(not(target_arch = "wasm32"))]
use match_sync::symbols::SymbolMapping;
#[cfg(not(target_arch = "wasm32"))]
use match_sync::transport::WsConnector;
#[cfg(not(target_arch = "wasm32"))]
use tokio::io::{AsyncBufReadExt, BufReader};
#[cfg(not(target_arch = "wasm32"))]
use tokio::sync::mpsc;
#[cfg(not(target_arch = "wasm32"))]
use tracing_subscriber::EnvFilter;

/// Terminal client for Connect Four and Tic-Tac-Toe matches.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug)]
struct Opts {
    #[command(subcommand)]
    mode: Mode,
}

#[cfg(not(target_arch = "wasm32"))]
#[derive(Subcommand, Debug)]
enum Mode {
    /// Join a match on the game server.
    Online {
        /// Websocket origin of the game server
        #[arg(long, default_value = "ws://127.0.0.1:8000")]
        base_url: String,
        #[arg(long, value_parser = parse_game, default_value = "connect4")]
        game: GameKind,
        #[arg(long)]
        match_id: String,
        /// Bearer token; also the source of the player id
        #[arg(long, env = "MATCH_TOKEN")]
        token: Option<String>,
        /// Used when the token carries no subject
        #[arg(long)]
        player_id: Option<String>,
    },
    /// Two players at one keyboard.
    Local {
        #[arg(long, value_parser = parse_game, default_value = "connect4")]
        game: GameKind,
    },
}

#[cfg(not(target_arch = "wasm32"))]
fn parse_game(s: &str) -> Result<GameKind, String> {
    match s {
        "connect4" | "connect_four" => Ok(GameKind::ConnectFour),
        "tictactoe" | "tic_tac_toe" => Ok(GameKind::TicTacToe),
        other => Err(format!("unknown game {other:?}, expected connect4 or tictactoe")),
    }
}

/// `<column>` for Connect Four, `<row> <column>` for Tic-Tac-Toe.
#[cfg(not(target_arch = "wasm32"))]
fn parse_move(kind: GameKind, line: &str) -> Option<Move> {
    let nums: Vec<usize> = line
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    match (kind.gravity(), nums.as_slice()) {
        (true, [column]) => Some(Move::Drop { column: *column }),
        (false, [row, column]) => Some(Move::Place {
            row: *row,
            column: *column,
        }),
        _ => None,
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_view(view: &SessionView) -> String {
    view.board
        .iter()
        .map(|row| {
            row.iter()
                .map(|c| c.as_deref().unwrap_or("."))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    match Opts::parse().mode {
        Mode::Online {
            base_url,
            game,
            match_id,
            token,
            player_id,
        } => run_online(base_url, game, match_id, token, player_id).await,
        Mode::Local { game } => run_local(game).await,
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn run_online(
    base_url: String,
    game: GameKind,
    match_id: String,
    token: Option<String>,
    player_id: Option<String>,
) -> anyhow::Result<()> {
    let player_id = match_sync::auth::resolve_player_id(token.as_deref(), player_id.as_deref())
        .ok_or_else(|| anyhow::anyhow!("no player id: pass --token or --player-id"))?;
    let mut config = SessionConfig::new(game, match_id, player_id).with_base_url(base_url);
    if let Some(token) = token {
        config = config.with_token(token);
    }
    let url = config.endpoint_url()?;
    println!("Joining {}{} as {}", url.origin().ascii_serialization(), url.path(), config.player_id);

    let (driver, mut events) = MatchDriver::new(MatchSession::new(config), WsConnector);
    let (commands, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(driver.run(rx));

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                let cmd = match line {
                    "" => continue,
                    "quit" | "q" => break,
                    "restart" | "r" => Command::Restart,
                    "state" | "s" => Command::RequestState,
                    "reconnect" => Command::Reconnect,
                    _ => match parse_move(game, line) {
                        Some(mv) => Command::MakeMove(mv),
                        None => {
                            println!("?? {line}");
                            continue;
                        }
                    },
                };
                if commands.send(cmd).is_err() {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(DriverEvent::View(view)) => {
                    println!("{}", render_view(&view));
                    match (&view.terminal, view.can_move) {
                        (Some(_), _) => println!("Game over. 'restart' for a new game."),
                        (None, true) => println!("Your move ({}).", view.my_symbol.as_deref().unwrap_or("?")),
                        (None, false) => {}
                    }
                }
                Some(DriverEvent::Notice(Notice::GameOver(terminal))) => {
                    println!("Result: {:?} (winner: {})", terminal.result, terminal.winner_symbol.as_deref().unwrap_or("none"));
                }
                Some(DriverEvent::Notice(Notice::ConnectionExhausted { attempts })) => {
                    println!("Could not reach the match after {attempts} attempts. Type 'reconnect' to try again.");
                }
                Some(DriverEvent::Notice(notice)) => println!("* {notice:?}"),
                Some(DriverEvent::Error(e)) => println!("! {e}"),
                Some(DriverEvent::CellsChanged(_)) => {}
                None => break,
            }
        }
    }

    let _ = commands.send(Command::Leave);
    task.await?;
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
async fn run_local(kind: GameKind) -> anyhow::Result<()> {
    let symbols = SymbolMapping::for_game(kind);
    let mut game = LocalGame::new(kind);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("{}", game.board().render(symbols.frontend_symbols()));
        println!("{} to move", symbols.frontend_symbol(game.current_player()));
        let Some(line) = stdin.next_line().await? else {
            return Ok(());
        };
        let line = line.trim();
        if line == "quit" || line == "q" {
            return Ok(());
        }
        let Some(mv) = parse_move(kind, line) else {
            println!("?? {line}");
            continue;
        };
        let report = match game.play(mv) {
            Ok(report) => report,
            Err(e) => {
                println!("! {e}");
                continue;
            }
        };
        if let Some(outcome) = &report.outcome {
            println!("{}", game.board().render(symbols.frontend_symbols()));
            match outcome {
                Outcome::Win(line) => println!("{} wins", symbols.frontend_symbol(line.player)),
                Outcome::Tie => println!("Tie"),
            }
            tokio::time::sleep(AUTO_RESET_DELAY).await;
            game.reset();
        }
    }
}
