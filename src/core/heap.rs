use crate::core::value::Val;

/// Index of a reference cell in the [`Arena`]. Every holder of the same
/// handle observes writes made through any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

/// Arena of reference cells. Cells are created when a variable is first
/// aliased (`&$x`, `global`, `static`, by-reference capture or argument)
/// and live until the VM is dropped or the cell is explicitly freed.
#[derive(Debug)]
pub struct Arena {
    storage: Vec<Val>,
    free_slots: Vec<usize>,
    null: Val,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    pub fn new() -> Self {
        Self {
            storage: Vec::with_capacity(256),
            free_slots: Vec::new(),
            null: Val::Null,
        }
    }

    pub fn alloc(&mut self, val: Val) -> Handle {
        if let Some(idx) = self.free_slots.pop() {
            self.storage[idx] = val;
            return Handle(idx as u32);
        }

        let idx = self.storage.len();
        self.storage.push(val);
        Handle(idx as u32)
    }

    /// Read a cell. Dangling handles read as null rather than panicking.
    pub fn get(&self, h: Handle) -> &Val {
        self.storage.get(h.0 as usize).unwrap_or(&self.null)
    }

    pub fn get_mut(&mut self, h: Handle) -> Option<&mut Val> {
        self.storage.get_mut(h.0 as usize)
    }

    pub fn set(&mut self, h: Handle, val: Val) {
        if let Some(slot) = self.storage.get_mut(h.0 as usize) {
            *slot = val;
        }
    }

    pub fn free(&mut self, h: Handle) {
        if let Some(slot) = self.storage.get_mut(h.0 as usize) {
            *slot = Val::Null;
            self.free_slots.push(h.0 as usize);
        }
    }

    /// Follow a chain of references down to the stored value
    pub fn deref<'a>(&'a self, val: &'a Val) -> &'a Val {
        let mut current = val;
        // A cell never legitimately points at itself; the bound stops cycles
        for _ in 0..64 {
            match current {
                Val::Reference(h) => current = self.get(*h),
                _ => return current,
            }
        }
        current
    }

    /// Number of live cells (for memory estimation)
    pub fn len(&self) -> usize {
        self.storage.len() - self.free_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_reuse() {
        let mut arena = Arena::new();
        let a = arena.alloc(Val::Int(1));
        let b = arena.alloc(Val::Int(2));
        assert_ne!(a, b);
        arena.free(a);
        let c = arena.alloc(Val::Int(3));
        assert_eq!(a, c);
        assert_eq!(arena.get(c), &Val::Int(3));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_deref_chain() {
        let mut arena = Arena::new();
        let inner = arena.alloc(Val::Int(7));
        let outer = arena.alloc(Val::Reference(inner));
        let v = Val::Reference(outer);
        assert_eq!(arena.deref(&v), &Val::Int(7));
    }

    #[test]
    fn test_dangling_handle_reads_null() {
        let arena = Arena::new();
        assert_eq!(arena.get(Handle(99)), &Val::Null);
    }
}
