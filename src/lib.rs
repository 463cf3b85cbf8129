//! A front end and LLIR-lowering pipeline for the historical B programming
//! language (§1).
//!
//! This crate is the core of a B compiler: lexer → parser/AST → scope model
//! → emitter. It stops at an abstract [`ir::IrBuilder`] trait — the actual
//! code generator, the CLI driver, and the C runtime library are external
//! collaborators this crate never implements (§1 "Out of scope").
//!
//! [`compile`] is the single entry point a driver is expected to call:
//! parse `source`, then emit it into a caller-supplied `IrBuilder`.
//! [`parse_only`] exposes just the AST for tooling that never emits, such as
//! a graph visualizer (§9 "AST representation across alternate backends").

pub mod ast;
pub mod emitter;
pub mod error;
pub mod intern;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod scope;
pub mod token;
pub mod word;

use emitter::Emitter;
use error::CompileResult;
use intern::Interner;
use ir::IrBuilder;
use parser::DefaultSemantics;
use word::TargetConfig;

/// Parses and emits one translation unit into `builder`.
///
/// This is the whole pipeline of §2 run end to end: lex, parse into this
/// crate's own [`ast::Program`], then drive `builder` through [`emitter::Emitter`].
/// On success every function, global, and constant `source` defines has been
/// declared on `builder`; on the first error, emission stops and whatever
/// `builder` has recorded so far is incomplete (§7 "no partial emission" —
/// callers must discard it, not inspect it).
pub fn compile<B: IrBuilder>(source: &str, target: TargetConfig, builder: &mut B) -> CompileResult<()> {
    let mut interner = Interner::new();
    let mut semantics = DefaultSemantics;
    let program = parser::parse(source, &mut interner, target, &mut semantics)?;
    Emitter::new(&interner, target, builder).emit_program(&program)
}

/// Parses `source` and returns just the AST, without emitting anything.
///
/// For tooling that wants the parse tree and nothing downstream of it — a
/// graph visualizer, a formatter, a linter — without paying for an
/// `IrBuilder` it will never use (§9).
pub fn parse_only(source: &str, target: TargetConfig) -> CompileResult<ast::Program> {
    let mut interner = Interner::new();
    let mut semantics = DefaultSemantics;
    parser::parse(source, &mut interner, target, &mut semantics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::recording::{interpret, RecordingBuilder};
    use crate::word::BytesPerWord;

    #[test]
    fn compile_drives_parse_then_emit_through_the_public_entry_point() {
        let target = TargetConfig::new(BytesPerWord::Eight);
        let mut builder = RecordingBuilder::new(target);
        compile(r#"main(){ extrn putstr; putstr("hi*n"); }"#, target, &mut builder).unwrap();
        assert_eq!(interpret(&builder, &[]).unwrap(), b"hi\n");
    }

    #[test]
    fn parse_only_returns_the_ast_without_requiring_a_builder() {
        let target = TargetConfig::new(BytesPerWord::Eight);
        let program = parse_only("x 1; main() return(x);", target).unwrap();
        assert_eq!(program.definitions.len(), 2);
    }
}
