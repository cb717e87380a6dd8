use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle operation that may propagate across a join property.
///
/// `Remove` is part of the vocabulary but is never applied: removing an
/// entity deletes its own row only, so shared join targets survive. A
/// property declaring `Remove` (directly or through `All`) behaves exactly
/// like one that does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CascadeType {
    Persist,
    Merge,
    Remove,
    Refresh,
    All,
}

impl CascadeType {
    fn bit(self) -> u8 {
        match self {
            CascadeType::Persist => 0b0001,
            CascadeType::Merge => 0b0010,
            CascadeType::Remove => 0b0100,
            CascadeType::Refresh => 0b1000,
            CascadeType::All => 0b1111,
        }
    }
}

/// Resolved cascade policy of one join property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cascade {
    bits: u8,
}

impl Cascade {
    pub const NONE: Cascade = Cascade { bits: 0 };
    pub const ALL: Cascade = Cascade { bits: 0b1111 };

    pub fn of(types: &[CascadeType]) -> Self {
        Self {
            bits: types.iter().fold(0, |acc, t| acc | t.bit()),
        }
    }

    pub fn with(self, cascade_type: CascadeType) -> Self {
        Self {
            bits: self.bits | cascade_type.bit(),
        }
    }

    /// Whether `operation` propagates under this policy. `All` covers every
    /// operation.
    pub fn applies_to(&self, operation: CascadeType) -> bool {
        let bit = operation.bit();
        self.bits & bit == bit
    }

    pub fn is_none(&self) -> bool {
        self.bits == 0
    }
}

impl From<CascadeType> for Cascade {
    fn from(cascade_type: CascadeType) -> Self {
        Cascade::of(&[cascade_type])
    }
}

impl fmt::Display for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "NONE");
        }
        if *self == Cascade::ALL {
            return write!(f, "ALL");
        }
        let names: Vec<&str> = [
            (CascadeType::Persist, "PERSIST"),
            (CascadeType::Merge, "MERGE"),
            (CascadeType::Remove, "REMOVE"),
            (CascadeType::Refresh, "REFRESH"),
        ]
        .into_iter()
        .filter(|(t, _)| self.applies_to(*t))
        .map(|(_, name)| name)
        .collect();
        write!(f, "{}", names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_every_operation() {
        let all = Cascade::from(CascadeType::All);
        assert_eq!(all, Cascade::ALL);
        for op in [
            CascadeType::Persist,
            CascadeType::Merge,
            CascadeType::Remove,
            CascadeType::Refresh,
        ] {
            assert!(all.applies_to(op));
        }
    }

    #[test]
    fn test_single_types_do_not_leak() {
        let persist = Cascade::from(CascadeType::Persist);
        assert!(persist.applies_to(CascadeType::Persist));
        assert!(!persist.applies_to(CascadeType::Merge));
        assert!(!persist.applies_to(CascadeType::All));
        assert!(!Cascade::NONE.applies_to(CascadeType::Refresh));
    }

    #[test]
    fn test_display() {
        assert_eq!(Cascade::NONE.to_string(), "NONE");
        assert_eq!(
            Cascade::of(&[CascadeType::Merge, CascadeType::Persist]).to_string(),
            "PERSIST|MERGE"
        );
        assert_eq!(Cascade::of(&[CascadeType::All]).to_string(), "ALL");
    }
}
