//! Record count tracking
//!
//! The count is either known and maintained incrementally, or unknown and
//! recomputed from the directory on the next query.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountState {
    #[default]
    Unknown,
    Known(usize),
}

impl CountState {
    pub fn from_persisted(count: Option<usize>) -> Self {
        match count {
            Some(n) => CountState::Known(n),
            None => CountState::Unknown,
        }
    }

    pub fn known(&self) -> Option<usize> {
        match *self {
            CountState::Known(n) => Some(n),
            CountState::Unknown => None,
        }
    }

    /// Current count, computing and remembering it if unknown
    pub fn get_or_compute<F: FnOnce() -> usize>(&mut self, compute: F) -> usize {
        match *self {
            CountState::Known(n) => n,
            CountState::Unknown => {
                let n = compute();
                *self = CountState::Known(n);
                n
            }
        }
    }

    pub fn increment(&mut self) {
        if let CountState::Known(n) = self {
            *n += 1;
        }
    }

    pub fn decrement(&mut self) {
        if let CountState::Known(n) = self {
            *n = n.saturating_sub(1);
        }
    }

    pub fn invalidate(&mut self) {
        *self = CountState::Unknown;
    }
}
