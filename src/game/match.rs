//! Match state for a single two-player duel

use uuid::Uuid;

use crate::config::GameConfig;
use crate::util::time::unix_millis;

use super::engine::{self, Cell, Direction, Field, Snake, TickOutcome};
use super::snapshot::{MatchSnapshot, SnakeView};
use super::PlayerId;

/// Distance of each starting head from its side wall
const START_INSET: i32 = 5;

/// Which of the two fixed player slots a player occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Seat {
    First,
    Second,
}

impl Seat {
    pub fn index(self) -> usize {
        match self {
            Seat::First => 0,
            Seat::Second => 1,
        }
    }

    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            Seat::First
        } else {
            Seat::Second
        }
    }

    pub fn other(self) -> Self {
        match self {
            Seat::First => Seat::Second,
            Seat::Second => Seat::First,
        }
    }

    /// 1-based number shown to clients
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Paired, waiting for both ready signals
    Pairing,
    /// Countdown announced, not ticking yet
    Countdown,
    /// Simulation running
    Running,
    /// Terminal; retained read-only until disposal
    Finished,
}

/// What the tick scheduler learns from one call to [`GameMatch::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub terminated: bool,
    pub winner: Option<PlayerId>,
}

/// Authoritative state of one duel
#[derive(Debug, Clone)]
pub struct GameMatch {
    pub id: Uuid,
    players: [PlayerId; 2],
    snakes: [Snake; 2],
    field: Field,
    phase: MatchPhase,
    tick: u64,
    ready: [bool; 2],
    winner: Option<PlayerId>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    /// Set once the payout decision has been taken
    pub outcome_settled: bool,
    /// Set once the finished snapshot and `game_end` have been released
    pub terminal_event_sent: bool,
}

impl GameMatch {
    /// Create a match with both snakes facing each other on the middle row.
    pub fn new(id: Uuid, first: PlayerId, second: PlayerId, config: &GameConfig) -> Self {
        let field = Field {
            width: config.field_width,
            height: config.field_height,
        };
        let row = field.height / 2;
        let snakes = [
            Snake::new(
                Cell::new(START_INSET, row),
                Direction::Right,
                config.snake_length,
            ),
            Snake::new(
                Cell::new(field.width - 1 - START_INSET, row),
                Direction::Left,
                config.snake_length,
            ),
        ];

        Self {
            id,
            players: [first, second],
            snakes,
            field,
            phase: MatchPhase::Pairing,
            tick: 0,
            ready: [false, false],
            winner: None,
            created_at: unix_millis(),
            started_at: None,
            ended_at: None,
            outcome_settled: false,
            terminal_event_sent: false,
        }
    }

    pub fn players(&self) -> [PlayerId; 2] {
        self.players
    }

    pub fn player(&self, seat: Seat) -> PlayerId {
        self.players[seat.index()]
    }

    pub fn seat_of(&self, player: PlayerId) -> Option<Seat> {
        self.players
            .iter()
            .position(|p| *p == player)
            .map(Seat::from_index)
    }

    pub fn opponent_of(&self, player: PlayerId) -> Option<PlayerId> {
        self.seat_of(player).map(|seat| self.player(seat.other()))
    }

    pub fn snake(&self, seat: Seat) -> &Snake {
        &self.snakes[seat.index()]
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn tick_number(&self) -> u64 {
        self.tick
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn is_finished(&self) -> bool {
        self.phase == MatchPhase::Finished
    }

    /// Buffer a direction change for `player`. Returns false when the player is
    /// not seated here, the match is over, or the turn would reverse the snake.
    pub fn set_direction(&mut self, player: PlayerId, direction: Direction) -> bool {
        if self.is_finished() {
            return false;
        }
        match self.seat_of(player) {
            Some(seat) => self.snakes[seat.index()].request_direction(direction),
            None => false,
        }
    }

    /// Record a ready signal. Returns true when both seats are ready.
    pub fn mark_ready(&mut self, player: PlayerId) -> bool {
        if let Some(seat) = self.seat_of(player) {
            self.ready[seat.index()] = true;
        }
        self.ready[0] && self.ready[1]
    }

    pub fn is_ready(&self, seat: Seat) -> bool {
        self.ready[seat.index()]
    }

    /// Pairing -> Countdown. Returns false if the countdown already began.
    pub fn begin_countdown(&mut self) -> bool {
        if self.phase != MatchPhase::Pairing {
            return false;
        }
        self.phase = MatchPhase::Countdown;
        true
    }

    /// Countdown -> Running. Returns the start timestamp, or None if the match
    /// was aborted in the meantime.
    pub fn start(&mut self) -> Option<u64> {
        if self.phase != MatchPhase::Countdown {
            return None;
        }
        let now = unix_millis();
        self.phase = MatchPhase::Running;
        self.started_at = Some(now);
        Some(now)
    }

    /// Run one simulation step. Calling this on a match that is not running is
    /// a no-op that reports the current terminal state.
    pub fn tick(&mut self) -> TickReport {
        if !self.is_running() {
            return TickReport {
                terminated: self.is_finished(),
                winner: self.winner,
            };
        }

        let outcome = engine::advance(self.field, &mut self.snakes);
        self.tick += 1;

        match outcome {
            TickOutcome::Running => TickReport {
                terminated: false,
                winner: None,
            },
            TickOutcome::Draw => {
                self.finish(None);
                TickReport {
                    terminated: true,
                    winner: None,
                }
            }
            TickOutcome::Won(index) => {
                let winner = self.players[index];
                self.finish(Some(winner));
                TickReport {
                    terminated: true,
                    winner: Some(winner),
                }
            }
        }
    }

    /// Move to Finished with the given winner. Only the first call has an effect.
    pub fn finish(&mut self, winner: Option<PlayerId>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.phase = MatchPhase::Finished;
        self.winner = winner;
        self.ended_at = Some(unix_millis());
        true
    }

    /// A win pays out only if the simulation actually ran after the start.
    pub fn prize_eligible(&self) -> bool {
        self.started_at.is_some() && self.tick > 0
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => 0,
        }
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            match_id: self.id,
            tick: self.tick,
            snakes: [
                SnakeView::of(&self.snakes[0]),
                SnakeView::of(&self.snakes[1]),
            ],
            finished: self.is_finished(),
            winner: self.winner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_match() -> GameMatch {
        let mut game = GameMatch::new(Uuid::new_v4(), 11, 22, &GameConfig::default());
        assert!(game.begin_countdown());
        assert!(game.start().is_some());
        game
    }

    #[test]
    fn test_starting_layout() {
        let game = GameMatch::new(Uuid::new_v4(), 1, 2, &GameConfig::default());
        assert_eq!(game.snake(Seat::First).head(), Cell::new(5, 15));
        assert_eq!(game.snake(Seat::Second).head(), Cell::new(24, 15));
        assert_eq!(game.phase(), MatchPhase::Pairing);
        assert_eq!(game.opponent_of(1), Some(2));
        assert_eq!(game.opponent_of(3), None);
    }

    #[test]
    fn test_tick_is_noop_until_running() {
        let mut game = GameMatch::new(Uuid::new_v4(), 1, 2, &GameConfig::default());
        let report = game.tick();
        assert!(!report.terminated);
        assert_eq!(game.tick_number(), 0);
    }

    #[test]
    fn test_ready_needs_both_seats() {
        let mut game = GameMatch::new(Uuid::new_v4(), 1, 2, &GameConfig::default());
        assert!(!game.mark_ready(1));
        assert!(!game.mark_ready(1));
        assert!(!game.mark_ready(99));
        assert!(game.mark_ready(2));
    }

    #[test]
    fn test_facing_snakes_draw() {
        let mut game = running_match();
        let report = loop {
            let report = game.tick();
            if report.terminated {
                break report;
            }
        };
        assert_eq!(report.winner, None);
        assert_eq!(game.tick_number(), 10);
        assert!(game.is_finished());
        assert!(game.prize_eligible());
    }

    #[test]
    fn test_boundary_death_declares_opponent_winner() {
        let mut game = running_match();
        assert!(game.set_direction(11, Direction::Up));
        let report = loop {
            let report = game.tick();
            if report.terminated {
                break report;
            }
            for seat in [Seat::First, Seat::Second] {
                assert_eq!(game.snake(seat).len(), 5);
            }
        };
        // Head starts on row 15 and leaves the field on the 16th step up
        assert_eq!(game.tick_number(), 16);
        assert_eq!(report.winner, Some(22));
        assert_eq!(game.winner(), Some(22));
    }

    #[test]
    fn test_finish_only_once() {
        let mut game = running_match();
        assert!(game.finish(Some(11)));
        assert!(!game.finish(Some(22)));
        assert_eq!(game.winner(), Some(11));
        assert!(!game.set_direction(11, Direction::Up));
    }

    #[test]
    fn test_not_eligible_before_first_tick() {
        let mut game = GameMatch::new(Uuid::new_v4(), 1, 2, &GameConfig::default());
        game.begin_countdown();
        game.finish(Some(2));
        assert!(!game.prize_eligible());
        assert_eq!(game.start(), None);
    }
}
