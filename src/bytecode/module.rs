use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bytecode::labels::LabelTable;

// ============================================================
// Interface & argument metadata
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortShape {
    Single,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceElement {
    pub direction: PortDirection,
    pub shape: PortShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgType {
    Integer,
    Uinteger,
    Str,
    Vector,
}

// ============================================================
// ModuleDesc
// ============================================================

/// Everything compiled out of one `module … end` block: the constant pool,
/// the declared interface, positional arguments, the bytecode stream, and
/// the jump-label table that resolves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDesc {
    pub name: String,
    pub constants: Vec<String>,
    pub interface_elements: BTreeMap<String, InterfaceElement>,
    pub argument_list: Vec<(usize, ArgType)>,
    pub bytecode: Vec<u8>,
    pub scope_depth: u32,
    pub labels: LabelTable,
}

impl ModuleDesc {
    pub fn new(name: &str) -> ModuleDesc {
        ModuleDesc {
            name: name.to_string(),
            constants: Vec::new(),
            interface_elements: BTreeMap::new(),
            argument_list: Vec::new(),
            bytecode: Vec::new(),
            scope_depth: 0,
            labels: LabelTable::new(),
        }
    }

    /// Index of `value` in the constant pool, adding it on first use.
    pub fn intern(&mut self, value: &str) -> usize {
        if let Some(idx) = self.lookup(value) {
            return idx;
        }
        self.constants.push(value.to_string());
        self.constants.len() - 1
    }

    pub fn lookup(&self, value: &str) -> Option<usize> {
        self.constants.iter().position(|c| c == value)
    }

    pub fn constant(&self, idx: u64) -> Option<&str> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.constants.get(i))
            .map(String::as_str)
    }

    /// Returns false when the name is already declared.
    pub fn add_interface_element(&mut self, name: &str, element: InterfaceElement) -> bool {
        if self.interface_elements.contains_key(name) {
            return false;
        }
        self.interface_elements.insert(name.to_string(), element);
        true
    }

    pub fn interface_element(&self, name: &str) -> Option<InterfaceElement> {
        self.interface_elements.get(name).copied()
    }

    /// Appends a positional argument. Returns false on a duplicate name.
    pub fn add_argument(&mut self, name: &str, ty: ArgType) -> bool {
        let idx = self.intern(name);
        if self.argument_list.iter().any(|(i, _)| *i == idx) {
            return false;
        }
        self.argument_list.push((idx, ty));
        true
    }
}

// ============================================================
// Registry
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GlobalValue {
    Integer(i64),
    Uinteger(u64),
    Str(String),
}

/// Compilation output for a whole program: modules and globals by name,
/// plus the `requires` worklist the driver runs to fixed point. Modules
/// are owned by value; cross references go through names only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    pub modules: BTreeMap<String, ModuleDesc>,
    pub globals: BTreeMap<String, GlobalValue>,
    pub imports: BTreeMap<String, bool>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Returns false when a module with the same name is already sealed.
    pub fn add_module(&mut self, module: ModuleDesc) -> bool {
        if self.modules.contains_key(&module.name) {
            return false;
        }
        self.modules.insert(module.name.clone(), module);
        true
    }

    /// Returns false when the global is already defined.
    pub fn add_global(&mut self, name: &str, value: GlobalValue) -> bool {
        if self.globals.contains_key(name) {
            return false;
        }
        self.globals.insert(name.to_string(), value);
        true
    }

    /// Queues a file for import; already-processed paths are not re-queued.
    pub fn add_import(&mut self, path: &str) {
        self.imports.entry(path.to_string()).or_insert(false);
    }

    pub fn next_unimported(&self) -> Option<String> {
        self.imports
            .iter()
            .find(|(_, done)| !**done)
            .map(|(path, _)| path.clone())
    }

    pub fn mark_imported(&mut self, path: &str) {
        self.imports.insert(path.to_string(), true);
    }
}
