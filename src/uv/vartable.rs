//! Variable table for a visibility stream.
//!
//! Every variable carried by a stream is declared in the `vartable` item,
//! one text line per variable in the form `"<type-char> <name>"`. The table
//! kept here mirrors that item in memory and additionally holds each
//! variable's current value, its declared byte length, and its bookkeeping
//! flags. Variable order is wire-significant: control words in `visdata`
//! refer to variables by their table index.

use ahash::AHashMap;

use crate::error::{MiriadError, Result};
use crate::item::Item;
use crate::types::TypeTag;

/// Longest accepted variable name, mirroring the item-name bound.
pub const VAR_NAME_MAX: usize = 15;

/// One stream variable and its current state.
pub(crate) struct UvVariable {
    pub name: String,
    pub tag: TypeTag,
    /// Current value in wire form (big-endian).
    pub data: Vec<u8>,
    /// Payload length from the stream's last SIZE entry, in bytes.
    /// `None` until the first SIZE entry is seen or written.
    pub declared: Option<usize>,
    /// Refreshed by the most recent record advance.
    pub updated: bool,
    /// Holds a pending value not yet emitted to `visdata`.
    pub dirty: bool,
}

impl UvVariable {
    fn new(name: &str, tag: TypeTag) -> Self {
        UvVariable {
            name: name.to_owned(),
            tag,
            data: Vec::new(),
            declared: None,
            updated: false,
            dirty: false,
        }
    }

    /// Element count of the current value.
    pub fn len(&self) -> usize {
        self.data.len() / self.tag.width()
    }
}

/// Result of probing one variable without decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarProbe {
    pub type_name: &'static str,
    pub length: usize,
    pub updated: bool,
}

/// In-memory image of the `vartable` item.
pub(crate) struct VarTable {
    vars: Vec<UvVariable>,
    index: AHashMap<String, usize>,
}

fn validate_var_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > VAR_NAME_MAX {
        return Err(MiriadError::validation(format!(
            "variable name {name:?} must be 1..={VAR_NAME_MAX} bytes"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(MiriadError::validation(format!(
            "variable name {name:?} carries invalid characters"
        )));
    }
    Ok(())
}

impl VarTable {
    pub fn new() -> Self {
        VarTable {
            vars: Vec::new(),
            index: AHashMap::new(),
        }
    }

    /// Load the table from an existing `vartable` item.
    pub fn load(item: &mut Item) -> Result<Self> {
        let mut table = VarTable::new();
        while let Some(line) = item.read_line()? {
            let mut parts = line.splitn(2, ' ');
            let type_char = parts
                .next()
                .and_then(|s| s.chars().next())
                .ok_or_else(|| MiriadError::fault("empty vartable line"))?;
            let name = parts
                .next()
                .ok_or_else(|| MiriadError::fault(format!("malformed vartable line {line:?}")))?;
            let tag = TypeTag::from_var_char(type_char)?;
            table.define(name, tag)?;
        }
        Ok(table)
    }

    /// Add a variable, appending its declaration to `vartable` when an item
    /// handle is supplied. Redefining an existing name with the same type is
    /// a no-op; a conflicting type is a fault.
    pub fn define_in(
        &mut self,
        name: &str,
        tag: TypeTag,
        item: Option<&mut Item>,
    ) -> Result<usize> {
        if let Some(&idx) = self.index.get(name) {
            if self.vars[idx].tag != tag {
                return Err(MiriadError::validation(format!(
                    "variable {name:?} is {}, not {}",
                    self.vars[idx].tag.name(),
                    tag.name()
                )));
            }
            return Ok(idx);
        }
        let idx = self.define(name, tag)?;
        if let Some(item) = item {
            item.write_line(&format!("{} {}", tag.var_char(), name))?;
        }
        Ok(idx)
    }

    fn define(&mut self, name: &str, tag: TypeTag) -> Result<usize> {
        validate_var_name(name)?;
        if self.index.contains_key(name) {
            return Err(MiriadError::fault(format!(
                "variable {name:?} declared twice"
            )));
        }
        if self.vars.len() > u16::MAX as usize {
            return Err(MiriadError::validation("too many stream variables"));
        }
        let idx = self.vars.len();
        self.vars.push(UvVariable::new(name, tag));
        self.index.insert(name.to_owned(), idx);
        Ok(idx)
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, idx: usize) -> Result<&UvVariable> {
        self.vars
            .get(idx)
            .ok_or_else(|| MiriadError::fault(format!("variable index {idx} out of range")))
    }

    pub fn get_mut(&mut self, idx: usize) -> Result<&mut UvVariable> {
        self.vars
            .get_mut(idx)
            .ok_or_else(|| MiriadError::fault(format!("variable index {idx} out of range")))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn clear_updated(&mut self) {
        for var in &mut self.vars {
            var.updated = false;
        }
    }

    pub fn probe(&self, name: &str) -> Option<VarProbe> {
        let idx = self.lookup(name)?;
        let var = &self.vars[idx];
        Some(VarProbe {
            type_name: var.tag.name(),
            length: var.len(),
            updated: var.updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_lookup() {
        let mut table = VarTable::new();
        let idx = table.define_in("time", TypeTag::Real64, None).unwrap();
        assert_eq!(table.lookup("time"), Some(idx));
        assert_eq!(table.get(idx).unwrap().tag, TypeTag::Real64);

        // Same name and type is idempotent.
        assert_eq!(table.define_in("time", TypeTag::Real64, None).unwrap(), idx);
        // Conflicting type is rejected.
        assert!(table.define_in("time", TypeTag::Int32, None).is_err());
    }

    #[test]
    fn test_name_validation() {
        let mut table = VarTable::new();
        assert!(table.define_in("", TypeTag::Int32, None).is_err());
        assert!(table
            .define_in("name-way-too-long-for-a-var", TypeTag::Int32, None)
            .is_err());
        assert!(table.define_in("bad name", TypeTag::Int32, None).is_err());
    }

    #[test]
    fn test_probe_reflects_state() {
        let mut table = VarTable::new();
        let idx = table.define_in("pol", TypeTag::Int32, None).unwrap();
        {
            let var = table.get_mut(idx).unwrap();
            var.data = vec![0, 0, 0, 1];
            var.updated = true;
        }
        let probe = table.probe("pol").unwrap();
        assert_eq!(probe.type_name, "integer");
        assert_eq!(probe.length, 1);
        assert!(probe.updated);
        assert_eq!(table.probe("missing"), None);
    }
}
