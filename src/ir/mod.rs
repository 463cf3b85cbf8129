//! The abstract IR-builder interface the emitter drives (§4.5).
//!
//! This crate never produces object code, assembly, or LLVM IR itself — that
//! is the external backend's job (§1 "Out of scope"). [`IrBuilder`] is the
//! narrow collaboration surface between the two: every operation the
//! emitter needs (§4.4's "Lvalue/rvalue emission", "Statements", "Function
//! emission", "Global emission") is expressed in terms of this trait, never
//! in terms of a concrete backend. [`recording::RecordingBuilder`] is the
//! in-repo reference implementation the test suite exercises; a real backend
//! implements the same trait against LLVM, Cranelift, or its own textual IR.

pub mod recording;

use crate::token::BinOp;
use crate::word::{TargetConfig, Word};

/// How a global or vector cell's initial value is determined.
///
/// A `Word` constant is resolved entirely within this translation unit. A
/// `SymbolAddress` is a relocation against another mangled symbol — either
/// another global, a function, or an anonymous string constant — left for
/// the backend/linker to resolve, exactly as §4.4 describes: "Initializers
/// … may themselves be … other names (deferred to link-time relocation)."
/// This crate never needs to resolve that relocation itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
    Zero,
    Word(Word),
    SymbolAddress(String),
}

/// The operations the emitter depends on (§4.5), expressed generically so
/// any backend — a real code generator or this crate's own recording/
/// interpreting reference implementation — can supply them.
///
/// All addressing is word-indexed per §3's central invariant: every
/// `Value` this trait hands back that represents an address is a byte
/// address divided by `BYTES_PER_WORD`, never a raw pointer. `to_pointer`/
/// `from_pointer` are the only sanctioned conversion points, and are
/// provided as default methods so a real backend gets the
/// multiply/divide-by-`BYTES_PER_WORD` glue for free and cannot get it
/// wrong independently in multiple places.
pub trait IrBuilder {
    /// A declared or defined function.
    type Func: Copy;
    /// A basic block within a function being built.
    type Block: Copy;
    /// An opaque SSA-style value handle — always word-typed from this
    /// trait's point of view.
    type Value: Copy;

    fn target(&self) -> TargetConfig;

    /// Declares a function with `arity` word parameters. `external` marks a
    /// declaration with no body this translation unit will define (a
    /// runtime entry reached via `extrn`, per §6).
    fn declare_function(&mut self, mangled_name: &str, arity: usize, external: bool) -> Self::Func;

    /// The function's own address, word-indexed — what a B program gets
    /// back when it evaluates the function's name as an rvalue.
    fn function_value(&mut self, func: Self::Func) -> Self::Value;

    /// The value of the `index`-th incoming word parameter. Used once per
    /// parameter, in the function's entry block, to seed its stack slot
    /// (§4.3 "Function parameters are defined in a new scope as auto-like
    /// LValues backed by stack slots initialized from the incoming argument
    /// values").
    fn param(&mut self, func: Self::Func, index: usize) -> Self::Value;

    fn new_block(&mut self, func: Self::Func) -> Self::Block;
    fn set_insert_block(&mut self, block: Self::Block);

    fn const_word(&mut self, value: Word) -> Self::Value;

    /// Reserves `words` contiguous word-sized stack cells and returns the
    /// word-index address of the first one.
    fn alloca(&mut self, words: i64) -> Self::Value;
    fn load(&mut self, addr: Self::Value) -> Self::Value;
    fn store(&mut self, addr: Self::Value, value: Self::Value);

    /// Word-indexed pointer arithmetic: `base + index`, both already
    /// word-indices (§3: "All pointer arithmetic in B becomes plain integer
    /// arithmetic on word-indices"). Kept distinct from `binop(Add, …)` so a
    /// real backend can emit a genuine (inbounds) GEP rather than raw
    /// integer addition when the base is a typed pointer.
    fn gep(&mut self, base: Self::Value, index: Self::Value) -> Self::Value;

    /// Reinterprets a word-index value as a callable function pointer of
    /// unspecified arity, per §4.4's call-expression rule: "convert
    /// word-index → function pointer of arity n".
    fn bitcast(&mut self, value: Self::Value) -> Self::Value;

    fn binop(&mut self, op: BinOp, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    /// A comparison operator (`Eq`/`Ne`/`Lt`/`Gt`/`Le`/`Ge`), yielding a word
    /// that is exactly `0` or `1` (§4.4 "Operator semantics").
    fn cmp(&mut self, op: BinOp, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn neg(&mut self, value: Self::Value) -> Self::Value;
    fn bit_not(&mut self, value: Self::Value) -> Self::Value;
    /// `!w`: yields `1` if `w == 0` else `0`.
    fn logical_not(&mut self, value: Self::Value) -> Self::Value;

    fn br(&mut self, target: Self::Block);
    fn cond_br(&mut self, cond: Self::Value, then_block: Self::Block, else_block: Self::Block);
    /// SSA join point, offered for backends that prefer it over the
    /// alloca/load/store pattern this crate's own emitter uses for
    /// ternary-expression results (§9 "Lvalue/Rvalue polymorphism" notes
    /// either encoding is a valid implementation choice; this crate never
    /// calls its own `phi` since the stack-slot form reads more plainly and
    /// needs no incoming-edge bookkeeping).
    fn phi(&mut self, incomings: &[(Self::Block, Self::Value)]) -> Self::Value;
    fn call(&mut self, callee: Self::Value, args: &[Self::Value]) -> Self::Value;
    fn ret(&mut self, value: Option<Self::Value>);

    /// Declares a single word-sized global cell, returning its word-index
    /// address.
    fn declare_global(&mut self, mangled_name: &str, init: GlobalInit) -> Self::Value;
    /// Declares `words.len()` contiguous word-sized global cells, returning
    /// the word-index address of cell 0.
    fn declare_global_array(&mut self, mangled_name: &str, words: Vec<GlobalInit>) -> Self::Value;
    /// Declares an anonymous read-only global holding `bytes` packed
    /// `BYTES_PER_WORD` characters to a word (the same packing a character
    /// literal uses), returning the word-index address of the first word.
    /// Callers are responsible for appending the EOT terminator themselves
    /// before calling this (§3 "StringExpr").
    fn declare_constant_bytes(&mut self, label: &str, bytes: &[u8]) -> Self::Value;

    /// `word_value * BYTES_PER_WORD`, reinterpreted as a pointer (§4.4 "Word
    /// and address IR types"). Exact only when `word_value` denotes an
    /// aligned address, which every pointer-valued word this crate produces
    /// satisfies.
    fn to_pointer(&mut self, word_value: Self::Value) -> Self::Value {
        let bytes_per_word = self.const_word(Word(self.target().bytes_per_word.bytes()));
        self.binop(BinOp::Mul, word_value, bytes_per_word)
    }

    fn from_pointer(&mut self, pointer_value: Self::Value) -> Self::Value {
        let bytes_per_word = self.const_word(Word(self.target().bytes_per_word.bytes()));
        self.binop(BinOp::Div, pointer_value, bytes_per_word)
    }
}

/// Prefixes every B-visible global symbol with `b.`, disjoint from the C
/// identifier namespace the runtime library lives in (§4.4 "Symbol
/// mangling", §6 "Symbol naming").
#[must_use]
pub fn mangle(name: &str) -> String {
    format!("b.{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangle_prefixes_with_b_dot() {
        assert_eq!(mangle("putchar"), "b.putchar");
        assert_eq!(mangle("main"), "b.main");
    }
}
