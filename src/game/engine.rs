//! Grid snake simulation: movement, collisions and termination
//!
//! Everything in here is pure and synchronous. The match owns the snakes and
//! hands them to [`advance`] once per tick while holding its lock.

use std::collections::VecDeque;

/// A grid cell. `x` grows to the right, `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn step(self, heading: Heading) -> Self {
        Self::new(self.x + heading.dx, self.y + heading.dy)
    }
}

/// Movement vector of a snake. Always a unit vector, or zero before a snake
/// has been given a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Heading {
    pub dx: i32,
    pub dy: i32,
}

impl Heading {
    pub const ZERO: Heading = Heading { dx: 0, dy: 0 };

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    pub fn is_reverse_of(self, other: Heading) -> bool {
        !other.is_zero() && self.dx == -other.dx && self.dy == -other.dy
    }
}

/// Direction tokens accepted from clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn heading(self) -> Heading {
        match self {
            Direction::Up => Heading { dx: 0, dy: -1 },
            Direction::Down => Heading { dx: 0, dy: 1 },
            Direction::Left => Heading { dx: -1, dy: 0 },
            Direction::Right => Heading { dx: 1, dy: 0 },
        }
    }

    /// Parse a client token; case and surrounding whitespace are ignored.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }
}

/// Grid dimensions; valid cells are `[0, width) x [0, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub width: i32,
    pub height: i32,
}

impl Field {
    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.x < self.width && cell.y >= 0 && cell.y < self.height
    }
}

/// One player's snake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
    /// Head first. The length never changes.
    body: VecDeque<Cell>,
    direction: Heading,
    next_direction: Heading,
    alive: bool,
}

impl Snake {
    /// Lay out a straight snake with its head at `head`, trailing away from
    /// the direction it faces.
    pub fn new(head: Cell, facing: Direction, length: usize) -> Self {
        let heading = facing.heading();
        let body = (0..length as i32)
            .map(|i| Cell::new(head.x - heading.dx * i, head.y - heading.dy * i))
            .collect();
        Self {
            body,
            direction: heading,
            next_direction: heading,
            alive: true,
        }
    }

    /// Build a snake from explicit cells (head first) already moving along `direction`.
    #[cfg(test)]
    pub fn from_cells(cells: impl IntoIterator<Item = Cell>, direction: Heading) -> Self {
        Self {
            body: cells.into_iter().collect(),
            direction,
            next_direction: direction,
            alive: true,
        }
    }

    pub fn head(&self) -> Cell {
        self.body[0]
    }

    pub fn body(&self) -> impl ExactSizeIterator<Item = &Cell> + '_ {
        self.body.iter()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn direction(&self) -> Heading {
        self.direction
    }

    pub fn next_direction(&self) -> Heading {
        self.next_direction
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn kill(&mut self) {
        self.alive = false;
    }

    /// Buffer a direction for the next tick. Reversing onto the current
    /// heading is refused and leaves the buffered direction untouched.
    pub fn request_direction(&mut self, direction: Direction) -> bool {
        let heading = direction.heading();
        if heading.is_reverse_of(self.direction) {
            return false;
        }
        self.next_direction = heading;
        true
    }

    fn occupies(&self, cell: Cell) -> bool {
        self.body.contains(&cell)
    }

    fn bites_itself(&self) -> bool {
        let head = self.head();
        self.body.iter().skip(1).any(|c| *c == head)
    }

    fn slither(&mut self) {
        self.direction = self.next_direction;
        let head = self.head().step(self.direction);
        self.body.push_front(head);
        self.body.pop_back();
    }
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    Draw,
    /// Index (0 or 1) of the surviving snake
    Won(usize),
}

impl TickOutcome {
    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        !matches!(self, TickOutcome::Running)
    }
}

/// Advance both snakes by one cell and resolve collisions.
pub fn advance(field: Field, snakes: &mut [Snake; 2]) -> TickOutcome {
    let moved = [snakes[0].alive, snakes[1].alive];

    for snake in snakes.iter_mut().filter(|s| s.alive) {
        snake.slither();
    }

    for (i, snake) in snakes.iter_mut().enumerate() {
        if moved[i] && (!field.contains(snake.head()) || snake.bites_itself()) {
            snake.kill();
        }
    }

    if moved[0] && moved[1] {
        if snakes[0].head() == snakes[1].head() {
            snakes[0].kill();
            snakes[1].kill();
        } else {
            let first_hit = snakes[1].occupies(snakes[0].head());
            let second_hit = snakes[0].occupies(snakes[1].head());
            if first_hit {
                snakes[0].kill();
            }
            if second_hit {
                snakes[1].kill();
            }
        }
    }

    match (snakes[0].alive, snakes[1].alive) {
        (false, false) => TickOutcome::Draw,
        (false, true) => TickOutcome::Won(1),
        (true, false) => TickOutcome::Won(0),
        (true, true) => TickOutcome::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD: Field = Field {
        width: 30,
        height: 30,
    };

    fn facing_pair() -> [Snake; 2] {
        [
            Snake::new(Cell::new(5, 15), Direction::Right, 5),
            Snake::new(Cell::new(24, 15), Direction::Left, 5),
        ]
    }

    #[test]
    fn test_new_snake_trails_behind_head() {
        let snake = Snake::new(Cell::new(24, 15), Direction::Left, 5);
        let cells: Vec<Cell> = snake.body().copied().collect();
        assert_eq!(cells.first(), Some(&Cell::new(24, 15)));
        assert_eq!(cells.last(), Some(&Cell::new(28, 15)));
        assert_eq!(snake.direction(), Heading { dx: -1, dy: 0 });
    }

    #[test]
    fn test_parse_direction_tokens() {
        assert_eq!(Direction::parse(" UP "), Some(Direction::Up));
        assert_eq!(Direction::parse("left"), Some(Direction::Left));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn test_reverse_request_is_ignored() {
        let mut snake = Snake::new(Cell::new(5, 5), Direction::Right, 5);
        assert!(!snake.request_direction(Direction::Left));
        assert_eq!(snake.next_direction(), Direction::Right.heading());

        assert!(snake.request_direction(Direction::Up));
        assert_eq!(snake.next_direction(), Direction::Up.heading());
        // Still judged against the active heading, not the buffered one
        assert!(!snake.request_direction(Direction::Left));
        assert_eq!(snake.next_direction(), Direction::Up.heading());
    }

    #[test]
    fn test_zero_heading_accepts_any_direction() {
        let mut snake = Snake::from_cells([Cell::new(3, 3)], Heading::ZERO);
        assert!(snake.request_direction(Direction::Left));
        assert!(snake.request_direction(Direction::Right));
    }

    #[test]
    fn test_rapid_double_turn_cannot_reverse_within_a_tick() {
        let mut snakes = facing_pair();
        snakes[0].request_direction(Direction::Up);
        snakes[0].request_direction(Direction::Left);
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Running);
        assert_eq!(snakes[0].head(), Cell::new(5, 14));
    }

    #[test]
    fn test_length_is_constant_while_running() {
        let mut snakes = facing_pair();
        snakes[0].request_direction(Direction::Down);
        snakes[1].request_direction(Direction::Up);
        for _ in 0..8 {
            assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Running);
            assert_eq!(snakes[0].len(), 5);
            assert_eq!(snakes[1].len(), 5);
        }
    }

    #[test]
    fn test_facing_snakes_die_together() {
        let mut snakes = facing_pair();
        let mut ticks = 0;
        let outcome = loop {
            ticks += 1;
            let outcome = advance(FIELD, &mut snakes);
            if outcome.is_terminal() {
                break outcome;
            }
        };
        // Heads start 19 cells apart and close two cells per tick
        assert_eq!(ticks, 10);
        assert_eq!(outcome, TickOutcome::Draw);
        assert!(!snakes[0].is_alive());
        assert!(!snakes[1].is_alive());
    }

    #[test]
    fn test_head_to_head_on_same_cell_kills_both() {
        let mut snakes = [
            Snake::new(Cell::new(10, 10), Direction::Right, 5),
            Snake::new(Cell::new(12, 10), Direction::Left, 5),
        ];
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Draw);
        assert_eq!(snakes[0].head(), snakes[1].head());
    }

    #[test]
    fn test_wall_death_only_kills_that_snake() {
        let mut snakes = [
            Snake::new(Cell::new(29, 3), Direction::Right, 5),
            Snake::new(Cell::new(10, 20), Direction::Left, 5),
        ];
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Won(1));
        assert!(!snakes[0].is_alive());
        assert!(snakes[1].is_alive());
    }

    #[test]
    fn test_wall_at_top_edge() {
        let mut snakes = [
            Snake::new(Cell::new(10, 20), Direction::Right, 5),
            Snake::new(Cell::new(4, 0), Direction::Up, 5),
        ];
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Won(0));
    }

    #[test]
    fn test_self_collision() {
        // A tight hook: moving down into its own third segment
        let cells = [
            Cell::new(5, 5),
            Cell::new(6, 5),
            Cell::new(6, 6),
            Cell::new(5, 6),
            Cell::new(4, 6),
        ];
        let mut snakes = [
            Snake::from_cells(cells, Direction::Left.heading()),
            Snake::new(Cell::new(20, 20), Direction::Left, 5),
        ];
        assert!(snakes[0].request_direction(Direction::Down));
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Won(1));
    }

    #[test]
    fn test_head_into_opponent_body_kills_only_attacker() {
        let mut snakes = [
            Snake::new(Cell::new(10, 9), Direction::Down, 5),
            Snake::new(Cell::new(12, 10), Direction::Right, 5),
        ];
        // Snake 0 moves to (10, 10), which is part of snake 1's body
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Won(1));
        assert!(!snakes[0].is_alive());
        assert!(snakes[1].is_alive());
    }

    #[test]
    fn test_swapping_heads_kills_both() {
        let mut snakes = [
            Snake::new(Cell::new(10, 10), Direction::Right, 5),
            Snake::new(Cell::new(11, 10), Direction::Left, 5),
        ];
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Draw);
    }

    #[test]
    fn test_wall_death_does_not_spare_opponent_from_its_body() {
        // Snake 0 leaves the field while snake 1 turns into its neck
        let mut snakes = [
            Snake::new(Cell::new(29, 5), Direction::Right, 5),
            Snake::new(Cell::new(28, 6), Direction::Up, 5),
        ];
        assert_eq!(advance(FIELD, &mut snakes), TickOutcome::Draw);
        assert!(!snakes[0].is_alive());
        assert!(!snakes[1].is_alive());
    }
}
