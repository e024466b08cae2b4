//! The indirect call table.
//!
//! A table is a vector of optional function references. A reference is
//! stored as an index into the owning instance's function index space
//! (imported functions included); the signature it is checked against on
//! `call_indirect` is the module's type for that index. Slots start out
//! absent and are filled by element segments during instantiation.

use super::Trap;
use crate::parser::module::Limits;

#[derive(Debug)]
pub struct Table {
    elements: Vec<Option<u32>>,
    limits: Limits,
}

impl Table {
    /// Create a table of `limits.min` empty slots.
    pub fn new(limits: Limits) -> Table {
        Table {
            elements: vec![None; limits.min as usize],
            limits,
        }
    }

    /// Current number of slots.
    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    /// The limits this table was created with.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Read a slot. An index past the end traps; an empty slot is
    /// returned as `None` and left for the caller to turn into the
    /// uninitialized-element trap.
    pub fn get(&self, index: u32) -> Result<Option<u32>, Trap> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(Trap::UndefinedElement)
    }

    /// Write a slot. Used by element segments after their ranges have
    /// been checked.
    pub fn set(&mut self, index: u32, entry: Option<u32>) -> Result<(), Trap> {
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(Trap::UndefinedElement)?;
        *slot = entry;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let table = Table::new(Limits { min: 4, max: Some(8) });
        assert_eq!(table.size(), 4);
        assert_eq!(table.limits(), Limits { min: 4, max: Some(8) });
        for i in 0..4 {
            assert_eq!(table.get(i).unwrap(), None);
        }
    }

    #[test]
    fn test_get_set() {
        let mut table = Table::new(Limits { min: 2, max: None });
        table.set(0, Some(7)).unwrap();
        assert_eq!(table.get(0).unwrap(), Some(7));
        table.set(0, None).unwrap();
        assert_eq!(table.get(0).unwrap(), None);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut table = Table::new(Limits { min: 2, max: None });
        assert_eq!(table.get(2), Err(Trap::UndefinedElement));
        assert_eq!(table.set(2, Some(0)), Err(Trap::UndefinedElement));
        assert_eq!(table.get(u32::MAX), Err(Trap::UndefinedElement));
    }
}
