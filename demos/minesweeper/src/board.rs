//! Minesweeper rules. Knows nothing about sockets.

use rand::seq::index;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Expert,
}

impl Difficulty {
    /// `(width, height, mines)`
    fn layout(self) -> (usize, usize, usize) {
        match self {
            Self::Beginner => (9, 9, 10),
            Self::Intermediate => (16, 16, 40),
            Self::Expert => (30, 16, 99),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Playing,
    Won,
    Lost,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Cover {
    #[default]
    Hidden,
    Flagged,
    Open,
}

/// What happened to a move.
#[derive(Debug, PartialEq, Eq)]
pub enum Move {
    Applied,
    /// Out of range, already open, or the game is over.
    Ignored,
}

pub struct Board {
    width: usize,
    height: usize,
    mines: Vec<bool>,
    cover: Vec<Cover>,
    status: Status,
}

/// The client-facing picture of a board. Each row is one character per
/// cell: `#` hidden, `F` flagged, `*` mine (only once lost), `0`-`8` open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub width: usize,
    pub height: usize,
    pub status: Status,
    pub rows: Vec<String>,
}

impl Board {
    pub fn random(difficulty: Difficulty) -> Self {
        let (width, height, mines) = difficulty.layout();
        let placed: Vec<usize> = index::sample(&mut rand::rng(), width * height, mines).into_vec();
        Self::with_mines(width, height, &placed)
    }

    /// A board with mines at exactly the given cell indices.
    pub fn with_mines(width: usize, height: usize, mines: &[usize]) -> Self {
        let mut field = vec![false; width * height];
        for &cell in mines {
            if let Some(slot) = field.get_mut(cell) {
                *slot = true;
            }
        }
        Self {
            width,
            height,
            mines: field,
            cover: vec![Cover::Hidden; width * height],
            status: Status::Playing,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Opens a cell. Opening a zero flood-fills its neighbourhood.
    pub fn explore(&mut self, cell: usize) -> Move {
        if self.status != Status::Playing || self.cover.get(cell) != Some(&Cover::Hidden) {
            return Move::Ignored;
        }
        if self.mines[cell] {
            self.cover[cell] = Cover::Open;
            self.status = Status::Lost;
            return Move::Applied;
        }

        let mut pending = vec![cell];
        while let Some(next) = pending.pop() {
            if self.cover[next] != Cover::Hidden {
                continue;
            }
            self.cover[next] = Cover::Open;
            if self.adjacent_mines(next) == 0 {
                pending.extend(self.neighbours(next));
            }
        }

        let safe_hidden = self
            .cover
            .iter()
            .zip(&self.mines)
            .any(|(cover, mine)| !mine && *cover != Cover::Open);
        if !safe_hidden {
            self.status = Status::Won;
        }
        Move::Applied
    }

    /// Toggles a flag on a hidden cell.
    pub fn flag(&mut self, cell: usize) -> Move {
        if self.status != Status::Playing {
            return Move::Ignored;
        }
        match self.cover.get_mut(cell) {
            Some(cover @ Cover::Hidden) => *cover = Cover::Flagged,
            Some(cover @ Cover::Flagged) => *cover = Cover::Hidden,
            _ => return Move::Ignored,
        }
        Move::Applied
    }

    pub fn view(&self) -> View {
        let rows = (0..self.height)
            .map(|row| {
                (0..self.width)
                    .map(|col| self.glyph(row * self.width + col))
                    .collect()
            })
            .collect();
        View {
            width: self.width,
            height: self.height,
            status: self.status,
            rows,
        }
    }

    fn glyph(&self, cell: usize) -> char {
        match self.cover[cell] {
            Cover::Flagged => 'F',
            _ if self.mines[cell] && self.status == Status::Lost => '*',
            Cover::Hidden => '#',
            Cover::Open => char::from(b'0' + self.adjacent_mines(cell) as u8),
        }
    }

    fn adjacent_mines(&self, cell: usize) -> usize {
        self.neighbours(cell).filter(|&n| self.mines[n]).count()
    }

    fn neighbours(&self, cell: usize) -> impl Iterator<Item = usize> + use<> {
        let (width, height) = (self.width as isize, self.height as isize);
        let (row, col) = ((cell / self.width) as isize, (cell % self.width) as isize);
        (-1..=1)
            .flat_map(|dr| (-1..=1).map(move |dc| (dr, dc)))
            .filter(|&offset| offset != (0, 0))
            .map(move |(dr, dc)| (row + dr, col + dc))
            .filter(move |&(r, c)| r >= 0 && r < height && c >= 0 && c < width)
            .map(move |(r, c)| (r * width + c) as usize)
    }
}
