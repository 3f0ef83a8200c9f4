//! The scoped symbol table used by [`super::resolve`], queried by every later
//! pass through its flat `uniqueName -> Entry` map.
//!
//! Two views live on the same struct: a stack of scopes mapping a
//! source-spelled name to the unique name it currently resolves to (used only
//! during resolution, then discarded), and a flat map from unique name to
//! [`Entry`] that outlives resolution and is consulted by type checking, IR
//! generation, and instruction selection.

use crate::common::{id, Id, Map};
use super::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    /// File-scope visible only within this translation unit (`static`).
    Internal,
    /// File-scope visible to other translation units.
    External,
    /// Block-scope local with no linkage.
    None,
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub unique_name: Id,
    pub ty: Type,
    pub linkage: Linkage,
    /// True when the assembler must see `.globl name` for this entity
    /// (external linkage); false for internal-linkage and no-linkage names.
    pub global: bool,
    /// True for entities IR generation must emit as a top-level static
    /// object (file-scope variables and `static` locals); false for
    /// automatic locals and parameters, which live on the stack.
    pub static_storage: bool,
    pub defined: bool,
}

/// One lexical scope: source name -> the unique name it's bound to here.
#[derive(Debug, Default)]
struct Scope {
    names: Map<Id, Id>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    entries: Map<Id, Entry>,
}

pub enum LookupHit<'a> {
    /// Found, and bound in the innermost (current) scope.
    CurrentScope(&'a Entry),
    /// Found in an outer scope.
    OuterScope(&'a Entry),
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut t = SymbolTable::default();
        t.scopes.push(Scope::default());
        t
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        assert!(!self.scopes.is_empty(), "internal error: popped the file scope");
    }

    pub fn is_file_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    /// True if `name` is already bound in the *innermost* scope (used to
    /// detect same-scope redeclarations).
    pub fn bound_in_current_scope(&self, name: Id) -> bool {
        self.scopes.last().unwrap().names.contains_key(&name)
    }

    /// Bind `name` to `unique_name` in the current scope and record/replace
    /// its entry in the flat map.
    pub fn declare(&mut self, name: Id, unique_name: Id, entry: Entry) {
        self.scopes.last_mut().unwrap().names.insert(name, unique_name);
        self.entries.insert(unique_name, entry);
    }

    /// Bind `name` directly to an already-unique name without touching the
    /// flat map (used by block-scope `extern` declarations, which refer to
    /// an existing file-scope entity rather than introduce a new one).
    pub fn alias(&mut self, name: Id, unique_name: Id) {
        self.scopes.last_mut().unwrap().names.insert(name, unique_name);
    }

    /// Search from innermost scope outward for `name`, returning both the
    /// resolved unique name and whether the binding came from the current
    /// scope (linkage-rule checks need to tell these apart).
    pub fn lookup_name(&self, name: Id) -> Option<(Id, bool)> {
        for (depth, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(&unique) = scope.names.get(&name) {
                return Some((unique, depth == self.scopes.len() - 1));
            }
        }
        None
    }

    pub fn entry(&self, unique_name: Id) -> Option<&Entry> {
        self.entries.get(&unique_name)
    }

    pub fn entry_mut(&mut self, unique_name: Id) -> Option<&mut Entry> {
        self.entries.get_mut(&unique_name)
    }

    pub fn set_defined(&mut self, unique_name: Id) {
        if let Some(e) = self.entries.get_mut(&unique_name) {
            e.defined = true;
        }
    }

    pub fn all_entries(&self) -> impl Iterator<Item = (&Id, &Entry)> {
        self.entries.iter()
    }
}

/// Build the `original.N.tmp`-style unique name for a block-scope declaration
/// of source name `name`, using the shared [`crate::common::Counter`].
pub fn mangle_local(name: Id, counter: &mut crate::common::Counter) -> Id {
    id(format!("{name}.{}.tmp", counter.next()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::types::Base;

    fn entry(unique: Id) -> Entry {
        Entry {
            unique_name: unique,
            ty: Type::Var(Base::I32),
            linkage: Linkage::None,
            global: false,
            static_storage: false,
            defined: true,
        }
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut t = SymbolTable::new();
        t.declare(id("x"), id("x.0.tmp"), entry(id("x.0.tmp")));
        t.push_scope();
        t.declare(id("x"), id("x.1.tmp"), entry(id("x.1.tmp")));
        assert_eq!(t.lookup_name(id("x")), Some((id("x.1.tmp"), true)));
        t.pop_scope();
        assert_eq!(t.lookup_name(id("x")), Some((id("x.0.tmp"), true)));
    }
}
