//! Function/object symbol lookup in both directions.

use std::collections::HashMap;

/// Name→address and address→name maps built once at load time.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, u64>,
    by_address: HashMap<u64, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a symbol. A later name for an already-labelled address does not
    /// replace the label, but still resolves by name.
    pub fn insert(&mut self, name: impl Into<String>, address: u64) {
        let name = name.into();
        if name.is_empty() {
            return;
        }
        self.by_address
            .entry(address)
            .or_insert_with(|| name.clone());
        self.by_name.insert(name, address);
    }

    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    pub fn name_at(&self, address: u64) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Labelled addresses in ascending order.
    pub fn sorted(&self) -> Vec<(u64, &str)> {
        let mut out: Vec<(u64, &str)> = self
            .by_address
            .iter()
            .map(|(&a, n)| (a, n.as_str()))
            .collect();
        out.sort_unstable();
        out
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut table = SymbolTable::new();
        for (name, address) in iter {
            table.insert(name, address);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_both_ways() {
        let table: SymbolTable = [("main", 0x401000u64), ("helper", 0x401020)]
            .into_iter()
            .collect();
        assert_eq!(table.address_of("main"), Some(0x401000));
        assert_eq!(table.name_at(0x401020), Some("helper"));
        assert_eq!(table.name_at(0x401001), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn first_label_wins_for_aliases() {
        let table: SymbolTable = [("_start", 0x1000u64), ("alias", 0x1000), ("", 0x2000)]
            .into_iter()
            .collect();
        assert_eq!(table.name_at(0x1000), Some("_start"));
        assert_eq!(table.address_of("alias"), Some(0x1000));
        assert_eq!(table.name_at(0x2000), None);
        assert_eq!(table.sorted(), vec![(0x1000, "_start")]);
    }
}
