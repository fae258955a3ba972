//! Table registry: name → heap-file root page.
//!
//! This is deliberately thin. The core never parses column, type, or
//! constraint metadata — that lives in the opaque catalog payload stored
//! in the header page, owned by whatever collaborator sits above this
//! crate (a SQL front end, an embedding application). `Registry` only
//! tracks enough for the core itself to open the right heap file for a
//! table name: a name-to-root-page map, serialised into that same
//! payload so it survives a reopen.
//!
//! Serialisation is a simple length-prefixed record list, not a format
//! shared with the opaque payload above it — the registry owns the first
//! four bytes of the catalog blob as a sub-header and treats everything
//! after as a parallel region the catalog's owner can still read and
//! write via [`crate::pager::Pager::catalog_data`].

use std::collections::BTreeMap;

use crate::error::{GraniteError, Result};
use crate::pager::PageId;

/// `name -> heap file root page` registry, case-insensitive on name.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    tables: BTreeMap<String, PageId>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { tables: BTreeMap::new() }
    }

    /// Register a new table. Errors if the name is already taken.
    pub fn register(&mut self, name: &str, root_page: PageId) -> Result<()> {
        let key = name.to_ascii_lowercase();
        if self.tables.contains_key(&key) {
            return Err(GraniteError::Validation(format!("table '{name}' already exists")));
        }
        self.tables.insert(key, root_page);
        Ok(())
    }

    /// Look up a table's heap-file root page by name.
    pub fn root_page_of(&self, name: &str) -> Option<PageId> {
        self.tables.get(&name.to_ascii_lowercase()).copied()
    }

    /// Remove a table from the registry, returning its root page.
    pub fn remove(&mut self, name: &str) -> Option<PageId> {
        self.tables.remove(&name.to_ascii_lowercase())
    }

    /// All registered `(name, root_page)` pairs, in name order.
    pub fn tables(&self) -> Vec<(String, PageId)> {
        self.tables.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Serialise to the length-prefixed record list this registry stores
    /// in the front of the catalog payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.tables.len() as u32).to_le_bytes());
        for (name, root) in &self.tables {
            let name_bytes = name.as_bytes();
            out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(name_bytes);
            out.extend_from_slice(&root.to_le_bytes());
        }
        out
    }

    /// Decode a registry previously produced by [`Registry::encode`]. An
    /// empty slice decodes to an empty registry.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Registry::new());
        }
        let bad = || GraniteError::InvalidHeader("malformed catalog registry".into());

        let mut offset = 0usize;
        let count = u32::from_le_bytes(bytes.get(0..4).ok_or_else(bad)?.try_into().unwrap());
        offset += 4;

        let mut tables = BTreeMap::new();
        for _ in 0..count {
            let name_len = u32::from_le_bytes(
                bytes.get(offset..offset + 4).ok_or_else(bad)?.try_into().unwrap(),
            ) as usize;
            offset += 4;
            let name = std::str::from_utf8(bytes.get(offset..offset + name_len).ok_or_else(bad)?)
                .map_err(|_| bad())?
                .to_string();
            offset += name_len;
            let root = u32::from_le_bytes(bytes.get(offset..offset + 4).ok_or_else(bad)?.try_into().unwrap());
            offset += 4;
            tables.insert(name, root);
        }

        Ok(Registry { tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup() {
        let mut reg = Registry::new();
        reg.register("Orders", 3).unwrap();
        assert_eq!(reg.root_page_of("orders"), Some(3));
    }

    #[test]
    fn duplicate_register_errors() {
        let mut reg = Registry::new();
        reg.register("orders", 3).unwrap();
        assert!(reg.register("ORDERS", 9).is_err());
    }

    #[test]
    fn remove_drops_entry() {
        let mut reg = Registry::new();
        reg.register("orders", 3).unwrap();
        assert_eq!(reg.remove("Orders"), Some(3));
        assert_eq!(reg.root_page_of("orders"), None);
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut reg = Registry::new();
        reg.register("orders", 3).unwrap();
        reg.register("customers", 7).unwrap();

        let bytes = reg.encode();
        let decoded = Registry::decode(&bytes).unwrap();
        assert_eq!(decoded.tables(), reg.tables());
    }

    #[test]
    fn empty_bytes_decode_to_empty_registry() {
        let reg = Registry::decode(&[]).unwrap();
        assert!(reg.tables().is_empty());
    }

    #[test]
    fn tables_are_listed_in_name_order() {
        let mut reg = Registry::new();
        reg.register("zebra", 1).unwrap();
        reg.register("apple", 2).unwrap();
        assert_eq!(
            reg.tables(),
            vec![("apple".to_string(), 2), ("zebra".to_string(), 1)]
        );
    }
}
