//! The in-repo reference `IrBuilder`: records every call into a small
//! per-function block structure, and (test-only in spirit, though not
//! `#[cfg(test)]`-gated so integration tests can reach it — see
//! `DESIGN.md`) can replay that recording to produce actual program output.
//!
//! This is deliberately not a production backend. A real one talks to LLVM,
//! Cranelift, or emits its own textual IR; this one exists so the seed
//! end-to-end scenarios (§8 "E1"–"E6") can be asserted against as ordinary
//! `#[test]`s without this crate depending on an actual code generator.

use std::collections::HashMap;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::error::{CompileError, CompileResult};
use crate::ir::{GlobalInit, IrBuilder};
use crate::runtime::{RuntimeExtern, EOT};
use crate::token::BinOp;
use crate::word::{TargetConfig, Word};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    func: u32,
    block: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);

/// Describes how a value was produced. `Const`/`FunctionValue`/`GlobalAddr`
/// never depend on a particular call's registers and are resolved once,
/// up front, by [`interpret`]; every other kind is re-evaluated on each
/// execution of the block that defines it.
#[derive(Debug, Clone)]
enum ValueDef {
    Const(Word),
    FunctionValue(FuncId),
    GlobalAddr(String),
    Param(FuncId, usize),
    Alloca(i64),
    Load(ValueId),
    Gep(ValueId, ValueId),
    Bitcast(ValueId),
    BinOp(BinOp, ValueId, ValueId),
    Cmp(BinOp, ValueId, ValueId),
    Neg(ValueId),
    BitNot(ValueId),
    LogicalNot(ValueId),
    Call(ValueId, Vec<ValueId>),
    Phi(Vec<(BlockId, ValueId)>),
}

#[derive(Debug, Clone)]
enum BlockInstr {
    Value(ValueId),
    Store(ValueId, ValueId),
}

#[derive(Debug, Clone)]
enum Terminator {
    Br(BlockId),
    CondBr(ValueId, BlockId, BlockId),
    Ret(Option<ValueId>),
}

#[derive(Debug, Default)]
struct BlockRecord {
    instrs: Vec<BlockInstr>,
    terminator: Option<Terminator>,
}

#[derive(Debug)]
struct FunctionRecord {
    name: String,
    arity: usize,
    external: bool,
    blocks: Vec<BlockRecord>,
    param_values: Vec<ValueId>,
}

#[derive(Debug, Clone)]
enum GlobalKind {
    Scalar(GlobalInit),
    Array(Vec<GlobalInit>),
}

#[derive(Debug, Clone)]
struct GlobalRecord {
    kind: GlobalKind,
}

/// Records every `IrBuilder` call into a linear per-function block
/// structure, in call order — "the linear op sequence a real backend would
/// receive" (§4.5's abstract collaborator, made concrete).
#[derive(Debug, Default)]
pub struct RecordingBuilder {
    target_config: Option<TargetConfig>,
    functions: Vec<FunctionRecord>,
    func_by_name: AHashMap<String, FuncId>,
    globals: IndexMap<String, GlobalRecord>,
    values: Vec<ValueDef>,
    current_func: Option<FuncId>,
    current_block: Option<BlockId>,
}

impl RecordingBuilder {
    #[must_use]
    pub fn new(target: TargetConfig) -> Self {
        Self { target_config: Some(target), ..Self::default() }
    }

    fn push_value(&mut self, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len().try_into().expect("too many IR values"));
        self.values.push(def);
        if let Some(block) = self.current_block {
            self.block_mut(block).instrs.push(BlockInstr::Value(id));
        }
        id
    }

    fn block_mut(&mut self, block: BlockId) -> &mut BlockRecord {
        &mut self.functions[block.func as usize].blocks[block.block as usize]
    }

    fn func_mut(&mut self, func: FuncId) -> &mut FunctionRecord {
        &mut self.functions[func.0 as usize]
    }

    fn set_terminator(&mut self, term: Terminator) {
        let block = self.current_block.expect("terminator emitted with no insertion block");
        self.block_mut(block).terminator = Some(term);
    }
}

impl IrBuilder for RecordingBuilder {
    type Func = FuncId;
    type Block = BlockId;
    type Value = ValueId;

    fn target(&self) -> TargetConfig {
        self.target_config.expect("RecordingBuilder::new sets this")
    }

    fn declare_function(&mut self, mangled_name: &str, arity: usize, external: bool) -> FuncId {
        if let Some(&id) = self.func_by_name.get(mangled_name) {
            return id;
        }
        let id = FuncId(self.functions.len().try_into().expect("too many functions"));
        self.functions.push(FunctionRecord {
            name: mangled_name.to_owned(),
            arity,
            external,
            blocks: Vec::new(),
            param_values: Vec::new(),
        });
        self.func_by_name.insert(mangled_name.to_owned(), id);
        id
    }

    fn function_value(&mut self, func: FuncId) -> ValueId {
        self.push_value(ValueDef::FunctionValue(func))
    }

    fn param(&mut self, func: FuncId, index: usize) -> ValueId {
        let id = self.push_value(ValueDef::Param(func, index));
        let params = &mut self.func_mut(func).param_values;
        if params.len() <= index {
            params.resize(index + 1, id);
        }
        params[index] = id;
        id
    }

    fn new_block(&mut self, func: FuncId) -> BlockId {
        let block_idx = self.functions[func.0 as usize].blocks.len() as u32;
        self.functions[func.0 as usize].blocks.push(BlockRecord::default());
        BlockId { func: func.0, block: block_idx }
    }

    fn set_insert_block(&mut self, block: BlockId) {
        self.current_func = Some(FuncId(block.func));
        self.current_block = Some(block);
    }

    fn const_word(&mut self, value: Word) -> ValueId {
        self.push_value(ValueDef::Const(value))
    }

    fn alloca(&mut self, words: i64) -> ValueId {
        self.push_value(ValueDef::Alloca(words))
    }

    fn load(&mut self, addr: ValueId) -> ValueId {
        self.push_value(ValueDef::Load(addr))
    }

    fn store(&mut self, addr: ValueId, value: ValueId) {
        let block = self.current_block.expect("store emitted with no insertion block");
        self.block_mut(block).instrs.push(BlockInstr::Store(addr, value));
    }

    fn gep(&mut self, base: ValueId, index: ValueId) -> ValueId {
        self.push_value(ValueDef::Gep(base, index))
    }

    fn bitcast(&mut self, value: ValueId) -> ValueId {
        self.push_value(ValueDef::Bitcast(value))
    }

    fn binop(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push_value(ValueDef::BinOp(op, lhs, rhs))
    }

    fn cmp(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push_value(ValueDef::Cmp(op, lhs, rhs))
    }

    fn neg(&mut self, value: ValueId) -> ValueId {
        self.push_value(ValueDef::Neg(value))
    }

    fn bit_not(&mut self, value: ValueId) -> ValueId {
        self.push_value(ValueDef::BitNot(value))
    }

    fn logical_not(&mut self, value: ValueId) -> ValueId {
        self.push_value(ValueDef::LogicalNot(value))
    }

    fn br(&mut self, target: BlockId) {
        self.set_terminator(Terminator::Br(target));
    }

    fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.set_terminator(Terminator::CondBr(cond, then_block, else_block));
    }

    fn phi(&mut self, incomings: &[(BlockId, ValueId)]) -> ValueId {
        self.push_value(ValueDef::Phi(incomings.to_vec()))
    }

    fn call(&mut self, callee: ValueId, args: &[ValueId]) -> ValueId {
        self.push_value(ValueDef::Call(callee, args.to_vec()))
    }

    fn ret(&mut self, value: Option<ValueId>) {
        self.set_terminator(Terminator::Ret(value));
    }

    fn declare_global(&mut self, mangled_name: &str, init: GlobalInit) -> ValueId {
        self.globals.insert(mangled_name.to_owned(), GlobalRecord { kind: GlobalKind::Scalar(init) });
        self.push_value(ValueDef::GlobalAddr(mangled_name.to_owned()))
    }

    fn declare_global_array(&mut self, mangled_name: &str, words: Vec<GlobalInit>) -> ValueId {
        self.globals.insert(mangled_name.to_owned(), GlobalRecord { kind: GlobalKind::Array(words) });
        self.push_value(ValueDef::GlobalAddr(mangled_name.to_owned()))
    }

    fn declare_constant_bytes(&mut self, label: &str, bytes: &[u8]) -> ValueId {
        let bpw = self.target().bytes_per_word.bytes() as usize;
        let mut words = Vec::with_capacity(bytes.len().div_ceil(bpw).max(1));
        for chunk in bytes.chunks(bpw) {
            let mut w: i64 = 0;
            for (i, &b) in chunk.iter().enumerate() {
                w |= i64::from(b) << (8 * i);
            }
            words.push(GlobalInit::Word(Word(w)));
        }
        if words.is_empty() {
            words.push(GlobalInit::Word(Word::ZERO));
        }
        self.declare_global_array(label, words)
    }
}

/// Internal non-local control transfer for `b.exit()`: unwinds every active
/// call frame back to [`interpret`] without running further B code.
struct Exited;

struct Elaborated {
    memory: Vec<Word>,
    global_addr: HashMap<String, i64>,
    func_addr: HashMap<i64, FuncId>,
    value_cache: HashMap<ValueId, Word>,
}

const FUNCTION_ADDR_BASE: i64 = 1 << 40;

fn elaborate(builder: &RecordingBuilder) -> Elaborated {
    let mut memory = Vec::new();
    let mut global_addr = HashMap::new();
    let mut func_addr = HashMap::new();

    for (idx, func) in builder.functions.iter().enumerate() {
        let addr = FUNCTION_ADDR_BASE + idx as i64;
        func_addr.insert(addr, FuncId(idx as u32));
        global_addr.insert(func.name.clone(), addr);
    }

    for (name, record) in &builder.globals {
        let addr = memory.len() as i64;
        global_addr.insert(name.clone(), addr);
        match &record.kind {
            GlobalKind::Scalar(_) => memory.push(Word::ZERO),
            GlobalKind::Array(words) => memory.resize(memory.len() + words.len().max(1), Word::ZERO),
        }
    }

    let resolve_init = |init: &GlobalInit, global_addr: &HashMap<String, i64>| -> Word {
        match init {
            GlobalInit::Zero => Word::ZERO,
            GlobalInit::Word(w) => *w,
            GlobalInit::SymbolAddress(name) => {
                Word(*global_addr.get(name).unwrap_or_else(|| panic!("undefined relocation target '{name}'")))
            }
        }
    };

    for (name, record) in &builder.globals {
        let base = global_addr[name] as usize;
        match &record.kind {
            GlobalKind::Scalar(init) => memory[base] = resolve_init(init, &global_addr),
            GlobalKind::Array(words) => {
                for (i, w) in words.iter().enumerate() {
                    memory[base + i] = resolve_init(w, &global_addr);
                }
            }
        }
    }

    let mut value_cache = HashMap::new();
    for (idx, def) in builder.values.iter().enumerate() {
        let id = ValueId(idx as u32);
        match def {
            ValueDef::Const(w) => {
                value_cache.insert(id, *w);
            }
            ValueDef::FunctionValue(func) => {
                let name = &builder.functions[func.0 as usize].name;
                value_cache.insert(id, Word(global_addr[name]));
            }
            ValueDef::GlobalAddr(name) => {
                value_cache.insert(id, Word(global_addr[name]));
            }
            _ => {}
        }
    }

    Elaborated { memory, global_addr, func_addr, value_cache }
}

struct Machine<'b> {
    builder: &'b RecordingBuilder,
    elaborated: Elaborated,
    stdin: &'b [u8],
    stdin_pos: usize,
    stdout: Vec<u8>,
}

impl<'b> Machine<'b> {
    fn bytes_per_word(&self) -> i64 {
        self.builder.target().bytes_per_word.bytes()
    }

    fn read_word(&self, addr: i64) -> Word {
        self.elaborated.memory.get(addr as usize).copied().unwrap_or(Word::ZERO)
    }

    fn write_word(&mut self, addr: i64, value: Word) {
        let addr = addr as usize;
        if addr >= self.elaborated.memory.len() {
            self.elaborated.memory.resize(addr + 1, Word::ZERO);
        }
        self.elaborated.memory[addr] = value;
    }

    fn read_byte_of_string(&self, base_word_index: i64, byte_offset: i64) -> u8 {
        let bpw = self.bytes_per_word();
        let word = self.read_word(base_word_index + byte_offset / bpw);
        ((word.0 >> (8 * (byte_offset % bpw))) & 0xFF) as u8
    }

    fn write_byte_of_string(&mut self, base_word_index: i64, byte_offset: i64, byte: u8) {
        let bpw = self.bytes_per_word();
        let word_addr = base_word_index + byte_offset / bpw;
        let shift = 8 * (byte_offset % bpw);
        let mask = !(0xFFi64 << shift);
        let word = self.read_word(word_addr);
        self.write_word(word_addr, Word((word.0 & mask) | (i64::from(byte) << shift)));
    }

    fn resolve(&self, vid: ValueId, registers: &HashMap<ValueId, Word>) -> Word {
        if let Some(w) = self.elaborated.value_cache.get(&vid) {
            return *w;
        }
        *registers.get(&vid).unwrap_or_else(|| panic!("value {vid:?} read before it was defined"))
    }

    fn eval_binop(op: BinOp, l: Word, r: Word) -> Word {
        use BinOp::*;
        match op {
            Add => l + r,
            Sub => l - r,
            Mul => l * r,
            Div => l / r,
            Mod => l % r,
            BitOr => l | r,
            BitAnd => l & r,
            Shl => l << r,
            Shr => l >> r,
            Eq | Ne | Lt | Gt | Le | Ge => Self::eval_cmp(op, l, r),
        }
    }

    fn eval_cmp(op: BinOp, l: Word, r: Word) -> Word {
        let b = match op {
            BinOp::Eq => l == r,
            BinOp::Ne => l != r,
            BinOp::Lt => l < r,
            BinOp::Gt => l > r,
            BinOp::Le => l <= r,
            BinOp::Ge => l >= r,
            _ => unreachable!("non-comparison operator passed to eval_cmp"),
        };
        Word::from_bool(b)
    }

    fn run_function(&mut self, func: FuncId, args: &[Word]) -> Result<Word, Exited> {
        let record = &self.builder.functions[func.0 as usize];
        if record.external {
            return self.run_builtin(&record.name, args);
        }
        let mut registers: HashMap<ValueId, Word> = HashMap::new();
        for (param_value, arg) in record.param_values.iter().zip(args.iter()) {
            registers.insert(*param_value, *arg);
        }

        let mut block_idx = 0u32;
        loop {
            let block = &self.builder.functions[func.0 as usize].blocks[block_idx as usize];
            for instr in &block.instrs {
                match instr {
                    BlockInstr::Value(vid) => {
                        if self.elaborated.value_cache.contains_key(vid) {
                            continue;
                        }
                        let value = self.eval_value(func, *vid, &registers)?;
                        registers.insert(*vid, value);
                    }
                    BlockInstr::Store(addr, val) => {
                        let addr = self.resolve(*addr, &registers);
                        let val = self.resolve(*val, &registers);
                        self.write_word(addr.0, val);
                    }
                }
            }
            match block.terminator.as_ref().expect("every block ends with a terminator") {
                Terminator::Ret(v) => {
                    return Ok(v.map(|vid| self.resolve(vid, &registers)).unwrap_or(Word::ZERO));
                }
                Terminator::Br(target) => {
                    block_idx = target.block;
                }
                Terminator::CondBr(cond, then_block, else_block) => {
                    let cond = self.resolve(*cond, &registers);
                    block_idx = if cond.truth() { then_block.block } else { else_block.block };
                }
            }
        }
    }

    fn eval_value(&mut self, func: FuncId, vid: ValueId, registers: &HashMap<ValueId, Word>) -> Result<Word, Exited> {
        let def = &self.builder.values[vid.0 as usize];
        Ok(match def {
            ValueDef::Const(_) | ValueDef::FunctionValue(_) | ValueDef::GlobalAddr(_) => {
                unreachable!("these are always precomputed in value_cache")
            }
            ValueDef::Param(_, _) => {
                // Defined by the call-entry seeding above; if missing the
                // function was called with too few arguments.
                *registers.get(&vid).unwrap_or(&Word::ZERO)
            }
            ValueDef::Alloca(words) => {
                let addr = self.elaborated.memory.len() as i64;
                self.elaborated.memory.resize(self.elaborated.memory.len() + (*words).max(1) as usize, Word::ZERO);
                Word(addr)
            }
            ValueDef::Load(addr) => {
                let addr = self.resolve(*addr, registers);
                self.read_word(addr.0)
            }
            ValueDef::Gep(base, index) => {
                let base = self.resolve(*base, registers);
                let index = self.resolve(*index, registers);
                base + index
            }
            ValueDef::Bitcast(v) => self.resolve(*v, registers),
            ValueDef::BinOp(op, l, r) => {
                Self::eval_binop(*op, self.resolve(*l, registers), self.resolve(*r, registers))
            }
            ValueDef::Cmp(op, l, r) => Self::eval_cmp(*op, self.resolve(*l, registers), self.resolve(*r, registers)),
            ValueDef::Neg(v) => -self.resolve(*v, registers),
            ValueDef::BitNot(v) => !self.resolve(*v, registers),
            ValueDef::LogicalNot(v) => self.resolve(*v, registers).logical_not(),
            ValueDef::Phi(incomings) => {
                // Never produced by this crate's own emitter; supported
                // here only so a hand-built `IrOp` trace could still be
                // replayed. Takes the first incoming value literally,
                // which is wrong in general but unreachable from this
                // crate's emission.
                let (_, v) = incomings.first().expect("phi with no incoming edges");
                self.resolve(*v, registers)
            }
            ValueDef::Call(callee, args) => {
                let callee_addr = self.resolve(*callee, registers).0;
                let args: Vec<Word> = args.iter().map(|a| self.resolve(*a, registers)).collect();
                let target_func =
                    *self.elaborated.func_addr.get(&callee_addr).unwrap_or_else(|| panic!("call to non-function address {callee_addr}"));
                let _ = func;
                self.run_function(target_func, &args)?
            }
        })
    }

    fn run_builtin(&mut self, mangled_name: &str, args: &[Word]) -> Result<Word, Exited> {
        let short = mangled_name.strip_prefix("b.").unwrap_or(mangled_name);
        let Some(entry) = RuntimeExtern::lookup(short) else {
            panic!("no reference implementation for external function '{mangled_name}'");
        };
        match entry {
            RuntimeExtern::Main => unreachable!("b.main is always user-defined, never external"),
            RuntimeExtern::Putchar => {
                self.stdout.push(args[0].0 as u8);
                Ok(args[0])
            }
            RuntimeExtern::Getchar => {
                if self.stdin_pos < self.stdin.len() {
                    let b = self.stdin[self.stdin_pos];
                    self.stdin_pos += 1;
                    Ok(Word(i64::from(b)))
                } else {
                    Ok(Word(i64::from(EOT)))
                }
            }
            RuntimeExtern::Putnumb => {
                self.stdout.extend_from_slice(args[0].0.to_string().as_bytes());
                Ok(args[0])
            }
            RuntimeExtern::Putstr => {
                let base = args[0].0;
                let mut offset = 0i64;
                loop {
                    let b = self.read_byte_of_string(base, offset);
                    if b == EOT {
                        break;
                    }
                    self.stdout.push(b);
                    offset += 1;
                }
                Ok(args[0])
            }
            RuntimeExtern::Char => Ok(Word(i64::from(self.read_byte_of_string(args[0].0, args[1].0)))),
            RuntimeExtern::Lchar => {
                self.write_byte_of_string(args[0].0, args[1].0, args[2].0 as u8);
                Ok(args[2])
            }
            RuntimeExtern::Exit => Err(Exited),
        }
    }
}

/// Executes `b.main()` against the IR `builder` recorded, feeding it
/// `stdin` and returning everything written through `b.putchar`/
/// `b.putstr`/`b.putnumb`.
///
/// # Errors
/// Returns `InternalError` if `b.main` was never declared.
///
/// # Panics
/// Panics on malformed IR (an unresolved relocation, a call to a
/// non-function address, or a block lacking a terminator) — these would
/// indicate a bug in the emitter, not in the B source being compiled.
pub fn interpret(builder: &RecordingBuilder, stdin: &[u8]) -> CompileResult<Vec<u8>> {
    let main = *builder.func_by_name.get("b.main").ok_or_else(|| CompileError::InternalError {
        message: "b.main was never declared".to_owned(),
    })?;
    let elaborated = elaborate(builder);
    let mut machine = Machine { builder, elaborated, stdin, stdin_pos: 0, stdout: Vec::new() };
    match machine.run_function(main, &[]) {
        Ok(_) | Err(Exited) => {}
    }
    Ok(machine.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::BytesPerWord;

    #[test]
    fn declares_functions_idempotently_by_mangled_name() {
        let mut b = RecordingBuilder::new(TargetConfig::new(BytesPerWord::Eight));
        let f1 = b.declare_function("b.main", 0, false);
        let f2 = b.declare_function("b.main", 0, false);
        assert_eq!(f1, f2);
    }

    #[test]
    fn minimal_main_returning_zero_runs_to_completion() {
        let mut b = RecordingBuilder::new(TargetConfig::new(BytesPerWord::Eight));
        let main = b.declare_function("b.main", 0, false);
        let entry = b.new_block(main);
        b.set_insert_block(entry);
        let zero = b.const_word(Word::ZERO);
        b.ret(Some(zero));
        let out = interpret(&b, &[]).unwrap();
        assert!(out.is_empty());
    }
}
