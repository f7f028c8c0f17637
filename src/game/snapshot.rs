//! Snapshot building and the wire encoding of per-player views

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine::{Cell, Heading, Snake};
use super::r#match::Seat;
use super::PlayerId;

/// Immutable view of one snake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnakeView {
    pub body: Vec<Cell>,
    pub alive: bool,
    pub direction: Heading,
}

impl SnakeView {
    pub fn of(snake: &Snake) -> Self {
        Self {
            body: snake.body().copied().collect(),
            alive: snake.is_alive(),
            direction: snake.direction(),
        }
    }

    fn head(&self) -> Option<Cell> {
        self.body.first().copied()
    }
}

/// Seat-ordered state of a match at one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    pub match_id: Uuid,
    pub tick: u64,
    pub snakes: [SnakeView; 2],
    pub finished: bool,
    pub winner: Option<PlayerId>,
}

impl MatchSnapshot {
    /// Hash of the fields that decide whether a broadcast carries news.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.tick.hash(&mut hasher);
        self.finished.hash(&mut hasher);
        for snake in &self.snakes {
            snake.head().hash(&mut hasher);
            snake.alive.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Encode the view for the player in `seat`: their snake first.
    pub fn encode_for(&self, seat: Seat) -> GameStateView {
        let mine = &self.snakes[seat.index()];
        let theirs = &self.snakes[seat.other().index()];
        GameStateView {
            match_id: self.match_id,
            tick: self.tick,
            my_snake: WireSnake::from(mine),
            opponent_snake: WireSnake::from(theirs),
            finished: self.finished,
            winner_id: self.winner,
        }
    }

    /// Rebuild the seat-ordered snapshot from a view received by `seat`.
    pub fn decode_from(view: &GameStateView, seat: Seat) -> Self {
        let mine = SnakeView::from(&view.my_snake);
        let theirs = SnakeView::from(&view.opponent_snake);
        let snakes = match seat {
            Seat::First => [mine, theirs],
            Seat::Second => [theirs, mine],
        };
        Self {
            match_id: view.match_id,
            tick: view.tick,
            snakes,
            finished: view.finished,
            winner: view.winner_id,
        }
    }
}

/// Compact snake form on the wire: cells and headings as `[x, y]` pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSnake {
    pub body: Vec<[i32; 2]>,
    pub alive: bool,
    pub direction: [i32; 2],
}

impl From<&SnakeView> for WireSnake {
    fn from(view: &SnakeView) -> Self {
        Self {
            body: view.body.iter().map(|c| [c.x, c.y]).collect(),
            alive: view.alive,
            direction: [view.direction.dx, view.direction.dy],
        }
    }
}

impl From<&WireSnake> for SnakeView {
    fn from(wire: &WireSnake) -> Self {
        Self {
            body: wire.body.iter().map(|[x, y]| Cell::new(*x, *y)).collect(),
            alive: wire.alive,
            direction: Heading {
                dx: wire.direction[0],
                dy: wire.direction[1],
            },
        }
    }
}

/// Personalized `game_state` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStateView {
    pub match_id: Uuid,
    pub tick: u64,
    pub my_snake: WireSnake,
    pub opponent_snake: WireSnake,
    pub finished: bool,
    pub winner_id: Option<PlayerId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::engine::Direction;
    use crate::game::r#match::GameMatch;

    fn sample() -> MatchSnapshot {
        let mut game = GameMatch::new(Uuid::new_v4(), 7, 8, &GameConfig::default());
        game.begin_countdown();
        game.start();
        game.set_direction(7, Direction::Down);
        game.tick();
        game.tick();
        game.snapshot()
    }

    #[test]
    fn test_view_swaps_seats() {
        let snapshot = sample();
        let first = snapshot.encode_for(Seat::First);
        let second = snapshot.encode_for(Seat::Second);
        assert_eq!(first.my_snake, second.opponent_snake);
        assert_eq!(first.opponent_snake, second.my_snake);
        assert_eq!(first.my_snake.direction, [0, 1]);
        assert_eq!(first.my_snake.body[0], [5, 17]);
    }

    #[test]
    fn test_decode_after_json_transport() {
        let snapshot = sample();
        for seat in [Seat::First, Seat::Second] {
            let json = serde_json::to_string(&snapshot.encode_for(seat)).unwrap();
            let received: GameStateView = serde_json::from_str(&json).unwrap();
            assert_eq!(MatchSnapshot::decode_from(&received, seat), snapshot);
        }
    }

    #[test]
    fn test_fingerprint_tracks_heads_and_tick() {
        let snapshot = sample();
        let mut same = snapshot.clone();
        same.snakes[0].body[3] = Cell::new(0, 0);
        assert_eq!(snapshot.fingerprint(), same.fingerprint());

        let mut later = snapshot.clone();
        later.tick += 1;
        assert_ne!(snapshot.fingerprint(), later.fingerprint());

        let mut done = snapshot.clone();
        done.finished = true;
        assert_ne!(snapshot.fingerprint(), done.fingerprint());
    }
}
