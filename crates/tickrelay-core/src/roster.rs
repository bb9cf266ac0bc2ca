//! Participant roster.
//!
//! Both transports know every participant name before any peer connects. The
//! roster maps names to global indices and tracks which names a handshake has
//! already claimed, so a listener can tell when its set is complete.

use std::collections::HashMap;

use crate::error::TransportError;

/// Ordered set of expected participant names with claim tracking.
///
/// # Invariants
///
/// - Names are unique; a name's global index is its position in the list.
/// - Each name is claimed at most once.
#[derive(Debug, Clone)]
pub struct Roster {
    names: Vec<String>,
    index: HashMap<String, usize>,
    claimed: Vec<bool>,
    remaining: usize,
}

impl Roster {
    /// Build a roster from the ordered participant names.
    ///
    /// # Errors
    ///
    /// `InvalidRoster` if the list is empty, contains an empty name, or
    /// repeats a name.
    pub fn new(names: &[String]) -> Result<Self, TransportError> {
        if names.is_empty() {
            return Err(TransportError::InvalidRoster("no participants".to_string()));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(TransportError::InvalidRoster(format!("empty name at position {i}")));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(TransportError::InvalidRoster(format!("duplicate name '{name}'")));
            }
        }

        Ok(Self {
            names: names.to_vec(),
            index,
            claimed: vec![false; names.len()],
            remaining: names.len(),
        })
    }

    /// Claim `name` for a connecting peer and return its global index.
    ///
    /// # Errors
    ///
    /// - `UnknownParticipant` if the name is not on the roster
    /// - `DuplicateParticipant` if it was already claimed
    pub fn claim(&mut self, name: &str) -> Result<usize, TransportError> {
        let &global =
            self.index.get(name).ok_or_else(|| TransportError::UnknownParticipant(name.into()))?;

        if self.claimed[global] {
            return Err(TransportError::DuplicateParticipant(name.into()));
        }

        self.claimed[global] = true;
        self.remaining -= 1;
        Ok(global)
    }

    /// Ordered names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Total number of participants.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if the roster has no participants.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names not yet claimed.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// True once every name has been claimed.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn claims_complete_the_roster() {
        let mut roster = Roster::new(&names(&["a", "b", "c"])).unwrap();
        assert_eq!(roster.claim("c").unwrap(), 2);
        assert_eq!(roster.claim("a").unwrap(), 0);
        assert!(!roster.is_complete());
        assert_eq!(roster.remaining(), 1);
        assert_eq!(roster.claim("b").unwrap(), 1);
        assert!(roster.is_complete());
    }

    #[test]
    fn unknown_and_duplicate_claims_fail() {
        let mut roster = Roster::new(&names(&["a", "b"])).unwrap();
        assert!(matches!(roster.claim("z"), Err(TransportError::UnknownParticipant(n)) if n == "z"));
        roster.claim("a").unwrap();
        assert!(matches!(roster.claim("a"), Err(TransportError::DuplicateParticipant(n)) if n == "a"));
        assert_eq!(roster.remaining(), 1);
    }

    #[test]
    fn invalid_lists_rejected() {
        assert!(Roster::new(&[]).is_err());
        assert!(Roster::new(&names(&["a", "a"])).is_err());
        assert!(Roster::new(&names(&["a", ""])).is_err());
    }

    #[test]
    fn names_keep_their_order() {
        let roster = Roster::new(&names(&["x", "y"])).unwrap();
        assert_eq!(roster.names(), ["x", "y"]);
        assert_eq!(roster.len(), 2);
        assert!(!roster.is_empty());
    }
}
