use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Opaque jump target id. Jump operands carry the id itself, never a byte
/// offset, so emitted bytes are final the moment they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelId(pub u32);

impl LabelId {
    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }
}

/// Maps label ids to bytecode offsets. Ids are allocated before their
/// target offset is known; a label may be referenced while still
/// undefined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelTable {
    offsets: Vec<Option<u64>>,
}

impl LabelTable {
    pub fn new() -> LabelTable {
        LabelTable::default()
    }

    pub fn alloc(&mut self) -> LabelId {
        self.offsets.push(None);
        LabelId((self.offsets.len() - 1) as u32)
    }

    /// Binds a label to a bytecode offset, exactly once.
    pub fn define(&mut self, id: LabelId, offset: u64) -> Result<(), CompileError> {
        let slot = self
            .offsets
            .get_mut(id.0 as usize)
            .ok_or_else(|| CompileError::internal(format!("label {} never allocated", id.0)))?;
        if slot.is_some() {
            return Err(CompileError::internal(format!(
                "label {} defined twice",
                id.0
            )));
        }
        *slot = Some(offset);
        Ok(())
    }

    pub fn offset_of(&self, id: u64) -> Option<u64> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.offsets.get(i))
            .copied()
            .flatten()
    }

}
