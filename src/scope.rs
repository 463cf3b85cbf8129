//! Name resolution: lvalues, nested scopes, and lazy forward-reference
//! lookup.
//!
//! `LValue` is generic over the backend's address representation (an
//! `IrBuilder::Value`) since this crate never inspects the address itself —
//! it only ever hands it back to the builder's `load`/`store`.

use ahash::AHashMap;

use crate::error::{CompileError, CompileResult, Position};
use crate::intern::{Interner, StringId};

/// An opaque handle to a word-sized storage location: a global cell, an
/// `auto` stack slot, or a vector header. `fetch`/`store` live on the
/// emitter, which is the only code that also holds the `IrBuilder` needed to
/// perform them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LValue<Addr> {
    pub address: Addr,
}

impl<Addr> LValue<Addr> {
    pub fn new(address: Addr) -> Self {
        Self { address }
    }
}

/// A single level of name → lvalue bindings.
#[derive(Debug)]
pub struct Scope<Addr> {
    bindings: AHashMap<StringId, LValue<Addr>>,
}

impl<Addr> Default for Scope<Addr> {
    fn default() -> Self {
        Self { bindings: AHashMap::new() }
    }
}

impl<Addr: Copy> Scope<Addr> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` in this scope. Fails if `name` is already bound *in this
    /// scope* — shadowing an outer scope's binding is fine, redefining
    /// within the same one is not.
    pub fn define(
        &mut self,
        name: StringId,
        lvalue: LValue<Addr>,
        position: Position,
        interner: &Interner,
    ) -> CompileResult<()> {
        if self.bindings.contains_key(&name) {
            return Err(CompileError::DuplicateDefinition { position, name: interner.get(name).to_owned() });
        }
        self.bindings.insert(name, lvalue);
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, name: StringId) -> Option<LValue<Addr>> {
        self.bindings.get(&name).copied()
    }
}

/// Scopes form a stack; the innermost scope is searched first.
#[derive(Debug)]
pub struct ScopeStack<Addr> {
    scopes: Vec<Scope<Addr>>,
}

impl<Addr> Default for ScopeStack<Addr> {
    fn default() -> Self {
        Self { scopes: Vec::new() }
    }
}

impl<Addr: Copy> ScopeStack<Addr> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// # Panics
    /// Panics if no scope is currently pushed; every caller in this crate
    /// pairs this with a preceding `push_scope`.
    pub fn pop_scope(&mut self) {
        self.scopes.pop().expect("pop_scope called with no scope on the stack");
    }

    pub fn define(
        &mut self,
        name: StringId,
        lvalue: LValue<Addr>,
        position: Position,
        interner: &Interner,
    ) -> CompileResult<()> {
        self.scopes
            .last_mut()
            .expect("define called with no scope on the stack")
            .define(name, lvalue, position, interner)
    }

    /// Innermost-out search.
    #[must_use]
    pub fn lookup(&self, name: StringId) -> Option<LValue<Addr>> {
        self.scopes.iter().rev().find_map(|scope| scope.lookup(name))
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

/// A lazy handle to a name looked up during function-body emission.
///
/// B permits a function to call one defined later in the same file, so a
/// plain `ScopeStack::lookup` at the call site can't work — the callee's
/// module-scope binding may not exist yet. Instead emission of a name
/// reference produces a `DeferredName`, which is forced against the fully-
/// populated module scope only once the whole module's top-level names have
/// been declared (the emitter's two-phase global pass guarantees this holds
/// before any function body is emitted).
#[derive(Debug, Clone, Copy)]
pub struct DeferredName {
    pub name: StringId,
    pub position: Position,
}

impl DeferredName {
    #[must_use]
    pub fn new(name: StringId, position: Position) -> Self {
        Self { name, position }
    }

    /// Forces the lookup against the module scope. Fails with
    /// `UndefinedName` if the name is still unbound.
    pub fn resolve<Addr: Copy>(
        &self,
        module_scope: &Scope<Addr>,
        interner: &Interner,
    ) -> CompileResult<LValue<Addr>> {
        module_scope
            .lookup(self.name)
            .ok_or_else(|| CompileError::UndefinedName { position: self.position, name: interner.get(self.name).to_owned() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer_binding() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut stack: ScopeStack<u32> = ScopeStack::new();
        stack.push_scope();
        stack.define(x, LValue::new(1), Position::START, &interner).unwrap();
        stack.push_scope();
        stack.define(x, LValue::new(2), Position::START, &interner).unwrap();
        assert_eq!(stack.lookup(x).unwrap().address, 2);
        stack.pop_scope();
        assert_eq!(stack.lookup(x).unwrap().address, 1);
    }

    #[test]
    fn redefining_in_the_same_scope_fails() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut scope: Scope<u32> = Scope::new();
        scope.define(x, LValue::new(1), Position::START, &interner).unwrap();
        let err = scope.define(x, LValue::new(2), Position::START, &interner).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateDefinition { .. }));
    }

    #[test]
    fn deferred_name_resolves_once_module_scope_is_populated() {
        let mut interner = Interner::new();
        let later = interner.intern("later");
        let deferred = DeferredName::new(later, Position::START);

        let mut module_scope: Scope<u32> = Scope::new();
        // the deferred handle is created before `later` is defined...
        assert!(deferred.resolve(&module_scope, &interner).is_err());
        // ...and resolves once the module pre-pass has populated it.
        module_scope.define(later, LValue::new(42), Position::START, &interner).unwrap();
        assert_eq!(deferred.resolve(&module_scope, &interner).unwrap().address, 42);
    }

    #[test]
    fn unresolved_deferred_name_fails_with_undefined_name() {
        let mut interner = Interner::new();
        let missing = interner.intern("missing");
        let deferred = DeferredName::new(missing, Position::START);
        let module_scope: Scope<u32> = Scope::new();
        let err = deferred.resolve(&module_scope, &interner).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedName { .. }));
    }
}
