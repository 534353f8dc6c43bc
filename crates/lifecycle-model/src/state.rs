//! Entry life-cycle states and the transition table
//!
//! The five states an entry slot goes through:
//!
//! | state | letter | meaning |
//! |---|---|---|
//! | `NotLoaded` | A | no entry in the table |
//! | `Created` | B | entry inserted, cell not set yet |
//! | `Placeholder` | C | entry holds an invalid placeholder cell |
//! | `Valid` | D | entry holds loaded data |
//! | `Evicted` | E | entry reclaimed, slot not yet removed |

use std::fmt;

/// Life-cycle state of the entry for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryState {
    NotLoaded,
    Created,
    Placeholder,
    Valid,
    Evicted,
}

impl EntryState {
    pub const ALL: [EntryState; 5] = [
        EntryState::NotLoaded,
        EntryState::Created,
        EntryState::Placeholder,
        EntryState::Valid,
        EntryState::Evicted,
    ];

    /// Short name, A to E
    pub fn letter(self) -> char {
        (b'A' + self as u8) as char
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.letter(), self)
    }
}

/// Allowed state changes, one flag per (from, to) pair
///
/// Staying in a state is always allowed.
///
/// # Example
///
/// ```
/// use pyramid_lifecycle_model::{EntryState, TransitionTable};
///
/// let table = TransitionTable::entry_lifecycle();
/// assert!(table.is_allowed(EntryState::Placeholder, EntryState::Valid));
/// assert!(!table.is_allowed(EntryState::Valid, EntryState::Placeholder));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionTable {
    allowed: [[bool; 5]; 5],
}

impl TransitionTable {
    /// A table allowing only self-transitions
    pub fn empty() -> Self {
        let mut allowed = [[false; 5]; 5];
        for (i, row) in allowed.iter_mut().enumerate() {
            row[i] = true;
        }
        Self { allowed }
    }

    /// The life-cycle the cache implements
    ///
    /// A→B→C on first request, C→D when loaded, C or D→E when reclaimed and
    /// E→A when the stale slot is removed. Loaded data never reverts to a
    /// placeholder.
    pub fn entry_lifecycle() -> Self {
        use EntryState::*;
        Self::empty()
            .allow(NotLoaded, Created)
            .allow(Created, Placeholder)
            .allow(Placeholder, Valid)
            .allow(Placeholder, Evicted)
            .allow(Valid, Evicted)
            .allow(Evicted, NotLoaded)
    }

    pub fn allow(mut self, from: EntryState, to: EntryState) -> Self {
        self.allowed[from.index()][to.index()] = true;
        self
    }

    pub fn forbid(mut self, from: EntryState, to: EntryState) -> Self {
        if from != to {
            self.allowed[from.index()][to.index()] = false;
        }
        self
    }

    pub fn is_allowed(&self, from: EntryState, to: EntryState) -> bool {
        self.allowed[from.index()][to.index()]
    }

    /// States reachable from `from` in one step, excluding `from` itself
    pub fn successors(&self, from: EntryState) -> impl Iterator<Item = EntryState> + '_ {
        EntryState::ALL
            .into_iter()
            .filter(move |&to| to != from && self.is_allowed(from, to))
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::entry_lifecycle()
    }
}

impl fmt::Display for TransitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " ")?;
        for to in EntryState::ALL {
            write!(f, " {}", to.letter())?;
        }
        for from in EntryState::ALL {
            write!(f, "\n{}", from.letter())?;
            for to in EntryState::ALL {
                let mark = if self.is_allowed(from, to) { 'x' } else { '.' };
                write!(f, " {mark}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntryState::*;

    #[test]
    fn test_letters() {
        let letters: String = EntryState::ALL.iter().map(|s| s.letter()).collect();
        assert_eq!(letters, "ABCDE");
        assert_eq!(Valid.to_string(), "D(Valid)");
    }

    #[test]
    fn test_self_transitions_always_allowed() {
        let table = TransitionTable::empty();
        for state in EntryState::ALL {
            assert!(table.is_allowed(state, state));
            assert!(table.forbid(state, state).is_allowed(state, state));
        }
    }

    #[test]
    fn test_lifecycle_table() {
        let table = TransitionTable::entry_lifecycle();
        assert_eq!(table.successors(NotLoaded).collect::<Vec<_>>(), vec![Created]);
        assert_eq!(
            table.successors(Placeholder).collect::<Vec<_>>(),
            vec![Valid, Evicted]
        );
        assert!(!table.is_allowed(NotLoaded, Valid));
        assert!(!table.is_allowed(Valid, Placeholder));
        assert!(!table.is_allowed(Evicted, Valid));
    }

    #[test]
    fn test_forbid() {
        let table = TransitionTable::entry_lifecycle().forbid(Valid, Evicted);
        assert!(!table.is_allowed(Valid, Evicted));
        assert_eq!(table.successors(Valid).count(), 0);
    }

    #[test]
    fn test_display_grid() {
        let rendered = TransitionTable::entry_lifecycle().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "  A B C D E");
        assert_eq!(lines[1], "A x x . . .");
        assert_eq!(lines[4], "D . . . x x");
    }
}
