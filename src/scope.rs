//! Lexical scopes and the stack frame layout behind them.
//!
//! Every handler or method body owns a root scope; nested blocks add
//! child scopes. Safe values live in numbered slots of the sprite's
//! stack list, laid out segment after segment, so a slot index can be
//! computed at compile time as `frame base + offset`. Unsafe values
//! opt out of the stack and get a dedicated variable or list instead,
//! keyed by the owning scope's id so distinct scopes never collide.

use crate::ast::DataType;

/// Name comparisons are case-insensitive throughout the language.
pub mod names {
    pub fn key(name: &str) -> String {
        name.to_lowercase()
    }

    pub fn eq(a: &str, b: &str) -> bool {
        key(a) == key(b)
    }
}

/// One declared value and where it lives at runtime.
#[derive(Debug, Clone)]
pub struct StackValue {
    pub name: String,
    pub data_type: DataType,
    pub is_array: bool,
    /// Slots occupied on the stack: 1 for scalars, the bound for arrays.
    pub stack_space: usize,
    stack_start: Option<usize>,
    storage: Option<String>,
}

impl StackValue {
    fn new(name: String, data_type: DataType, is_array: bool, stack_space: usize) -> Self {
        Self {
            name,
            data_type,
            is_array,
            stack_space,
            stack_start: None,
            storage: None,
        }
    }

    pub fn is_unsafe(&self) -> bool {
        self.storage.is_some()
    }

    fn place(&mut self, index: usize) {
        if self.stack_start.is_some() || self.storage.is_some() {
            panic!("value '{}' placed twice", self.name);
        }
        self.stack_start = Some(index);
    }

    fn place_off_stack(&mut self, storage: String) {
        if self.stack_start.is_some() || self.storage.is_some() {
            panic!("value '{}' placed twice", self.name);
        }
        self.storage = Some(storage);
    }
}

/// Resolved location of a value, detached from the arena so codegen
/// can hold it while mutating scopes.
#[derive(Debug, Clone)]
pub struct StackSlot {
    pub name: String,
    pub data_type: DataType,
    pub is_array: bool,
    pub stack_space: usize,
    /// 1-based offset of the first slot within the frame. Only
    /// meaningful when `storage` is `None`.
    pub stack_start: usize,
    /// Backing variable or list name for unsafe values.
    pub storage: Option<String>,
}

impl StackSlot {
    pub fn is_unsafe(&self) -> bool {
        self.storage.is_some()
    }
}

/// The contiguous run of slots owned by one scope.
#[derive(Debug, Clone)]
pub struct StackSegment {
    pub start: usize,
    values: Vec<StackValue>,
}

impl StackSegment {
    /// First free slot after this segment. Unsafe values take no
    /// slots, so only safe spaces count.
    pub fn next_index(&self) -> usize {
        self.start + self.safe_space()
    }

    /// Total slots held by safe values of this segment.
    pub fn safe_space(&self) -> usize {
        self.values
            .iter()
            .filter(|v| !v.is_unsafe())
            .map(|v| v.stack_space)
            .sum()
    }
}

pub type ScopeId = usize;

#[derive(Debug)]
pub struct Scope {
    /// Session-unique label, used in off-stack storage names.
    pub label: usize,
    pub parent: Option<ScopeId>,
    /// When set, every value declared here is placed off the stack.
    pub unsafe_scope: bool,
    pub segment: StackSegment,
}

/// Arena of all scopes of the sprite currently being compiled.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the root scope of a script. Slot indexing is 1-based, so
    /// the first frame value sits at offset 1.
    pub fn root(&mut self, label: usize, unsafe_scope: bool) -> ScopeId {
        self.scopes.push(Scope {
            label,
            parent: None,
            unsafe_scope,
            segment: StackSegment {
                start: 1,
                values: Vec::new(),
            },
        });
        self.scopes.len() - 1
    }

    /// Opens a child scope whose segment begins where the parent's
    /// segment currently ends.
    pub fn child(&mut self, parent: ScopeId, label: usize, force_unsafe: bool) -> ScopeId {
        let start = self.scopes[parent].segment.next_index();
        let unsafe_scope = self.scopes[parent].unsafe_scope || force_unsafe;
        self.scopes.push(Scope {
            label,
            parent: Some(parent),
            unsafe_scope,
            segment: StackSegment {
                start,
                values: Vec::new(),
            },
        });
        self.scopes.len() - 1
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    /// Declares a value in the scope and assigns its location. The
    /// caller checks for duplicates first; registering is final.
    pub fn register(
        &mut self,
        id: ScopeId,
        name: &str,
        data_type: DataType,
        is_array: bool,
        stack_space: usize,
        force_unsafe: bool,
    ) -> StackSlot {
        let scope = &mut self.scopes[id];
        let mut value = StackValue::new(name.to_string(), data_type, is_array, stack_space);
        if scope.unsafe_scope || force_unsafe {
            value.place_off_stack(format!("{}: {}", scope.label, name));
        } else {
            value.place(scope.segment.next_index());
        }
        scope.segment.values.push(value);
        slot_of(scope.segment.values.last().unwrap())
    }

    /// Looks a name up in this scope only. Shadowing an outer value is
    /// legal, so duplicate checks stop here.
    pub fn find_local(&self, id: ScopeId, name: &str) -> Option<StackSlot> {
        self.scopes[id]
            .segment
            .values
            .iter()
            .find(|v| names::eq(&v.name, name))
            .map(slot_of)
    }

    /// Walks the scope chain innermost first.
    pub fn find(&self, id: ScopeId, name: &str) -> Option<StackSlot> {
        let mut current = Some(id);
        while let Some(scope_id) = current {
            if let Some(slot) = self.find_local(scope_id, name) {
                return Some(slot);
            }
            current = self.scopes[scope_id].parent;
        }
        None
    }

    /// Slots to pop when this single scope exits.
    pub fn scope_space(&self, id: ScopeId) -> usize {
        self.scopes[id].segment.safe_space()
    }

    /// Slots to pop when returning out of every open scope at once.
    pub fn chain_space(&self, id: ScopeId) -> usize {
        let mut total = 0;
        let mut current = Some(id);
        while let Some(scope_id) = current {
            total += self.scopes[scope_id].segment.safe_space();
            current = self.scopes[scope_id].parent;
        }
        total
    }

    pub fn next_index(&self, id: ScopeId) -> usize {
        self.scopes[id].segment.next_index()
    }
}

fn slot_of(value: &StackValue) -> StackSlot {
    StackSlot {
        name: value.name.clone(),
        data_type: value.data_type,
        is_array: value.is_array,
        stack_space: value.stack_space,
        stack_start: value.stack_start.unwrap_or(0),
        storage: value.storage.clone(),
    }
}
