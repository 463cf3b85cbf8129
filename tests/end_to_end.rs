//! Integration suite against the public `rbc::compile` entry point, covering
//! the seed end-to-end scenarios and testable invariants of §8.
//!
//! Unlike `src/emitter.rs`'s unit tests, which build an `Emitter` directly,
//! these go through `rbc::compile` the way an external driver would, so the
//! crate's public surface (not just its internals) is what's under test.

use rbc::ir::recording::{interpret, RecordingBuilder};
use rbc::word::{BytesPerWord, TargetConfig};

fn target() -> TargetConfig {
    TargetConfig::new(BytesPerWord::Eight)
}

fn run(source: &str, stdin: &[u8]) -> Vec<u8> {
    let target = target();
    let mut builder = RecordingBuilder::new(target);
    rbc::compile(source, target, &mut builder).unwrap();
    interpret(&builder, stdin).unwrap()
}

fn run_str(source: &str) -> String {
    String::from_utf8(run(source, &[])).unwrap()
}

#[test]
fn e1_hello_world_string_literal() {
    assert_eq!(run_str(r#"main(){ extrn putstr; putstr("hello!*n"); }"#), "hello!\n");
}

#[test]
fn e2_recursive_factorial() {
    let src = "fact(n) return(n==0?1:n*fact(n-1)); main(){extrn putnumb, fact; putnumb(fact(5));}";
    assert_eq!(run_str(src), "120");
}

#[test]
fn e3_while_loop_counts_to_three() {
    let src = "main(){ auto i; i=0; while(i<3){ i=+1; } extrn putnumb; putnumb(i); }";
    assert_eq!(run_str(src), "3");
}

#[test]
fn e4_vector_sum_with_postfix_increment() {
    let src = "v[2] 1,2,3; main(){ extrn v, putnumb; auto s, i; s=0; i=0; while(i<3){ s=+v[i++]; } putnumb(s); }";
    assert_eq!(run_str(src), "6");
}

#[test]
fn e5_bytes_per_word_reflects_the_target() {
    assert_eq!(run_str("main(){ extrn putnumb, __bytes_per_word; putnumb(__bytes_per_word); }"), "8");

    let target32 = TargetConfig::new(BytesPerWord::Four);
    let mut builder = RecordingBuilder::new(target32);
    rbc::compile("main(){ extrn putnumb, __bytes_per_word; putnumb(__bytes_per_word); }", target32, &mut builder).unwrap();
    assert_eq!(String::from_utf8(interpret(&builder, &[]).unwrap()).unwrap(), "4");
}

#[test]
fn e6_getchar_echoes_stdin_until_eot() {
    let src = "main(){ auto c; while((c=getchar())!='*e') putchar(c); }";
    assert_eq!(run(src, b"abc\x04"), b"abc");
}

#[test]
fn invariant_1_numeric_literal_round_trips_through_putnumb() {
    assert_eq!(run_str("main(){ extrn putnumb; putnumb(12345); }"), "12345");
}

#[test]
fn invariant_2_address_of_the_same_global_is_identical() {
    assert_eq!(run_str("x; main(){ extrn x, putnumb; putnumb(&x == &x); }"), "1");
}

#[test]
fn invariant_3_word_stride_indexing() {
    assert_eq!(run_str("v[3] 10, 20, 30, 40; main(){ extrn v, putnumb; putnumb(v[2]); }"), "30");
}

#[test]
fn invariant_4_character_literal_packs_little_endian() {
    assert_eq!(run_str("main(){ extrn putnumb; putnumb('ab'); }"), (97 + 98 * 256).to_string());
}

#[test]
fn invariant_5_escape_expansion_writes_a_linefeed() {
    assert_eq!(run("main(){ extrn putchar; putchar('*n'); }", &[]), vec![b'\n']);
}

#[test]
fn invariant_6_forward_reference_to_a_later_function() {
    assert_eq!(run_str("main(){ extrn f, putnumb; putnumb(f()); } f() return(42);"), "42");
}

#[test]
fn boundary_empty_function_body_returns_zero_implicitly() {
    let target = target();
    let mut builder = RecordingBuilder::new(target);
    rbc::compile("main(){}", target, &mut builder).unwrap();
    assert!(interpret(&builder, &[]).unwrap().is_empty());
}

#[test]
fn boundary_zero_length_string_is_just_the_eot_terminator() {
    // putstr stops at EOT without printing anything for an empty literal.
    assert_eq!(run_str(r#"main(){ extrn putstr; putstr(""); }"#), "");
}

#[test]
fn boundary_single_cell_vector_with_maxidx_zero() {
    assert_eq!(run_str("v[0] 7; main(){ extrn v, putnumb; putnumb(v[0]); }"), "7");
}

#[test]
fn boundary_deref_of_address_of_is_identity() {
    assert_eq!(run_str("x 9; main(){ extrn x, putnumb; putnumb(*(&x)); }"), "9");
}

#[test]
fn boundary_plain_assign_then_unary_minus_vs_compound_subtract() {
    // `a = -b` is plain assignment of -b; `a=-b` (no space) is `a =- b`.
    assert_eq!(run_str("main(){ extrn putnumb; auto a, b; b=5; a = -b; putnumb(a); }"), "-5");
    assert_eq!(run_str("main(){ extrn putnumb; auto a, b; a=10; b=3; a=-b; putnumb(a); }"), "7");
}

#[test]
fn parse_error_surfaces_through_the_public_entry_point() {
    let target = target();
    let mut builder = RecordingBuilder::new(target);
    let err = rbc::compile("main( { return 0; }", target, &mut builder).unwrap_err();
    assert!(matches!(err, rbc::error::CompileError::ParseError { .. }));
}

#[test]
fn parse_only_exposes_the_ast_without_an_ir_builder() {
    let program = rbc::parse_only("x[2] 1, 2, 3;", target()).unwrap();
    match &program.definitions[0] {
        rbc::ast::Definition::VectorDefinition { initializers, .. } => assert_eq!(initializers.len(), 3),
        other => panic!("expected a vector definition, got {other:?}"),
    }
}
