//! Translates the AST into backend IR by driving an [`IrBuilder`] (§4.4).
//!
//! Two phases per translation unit, matching §4.4 "Global emission" and the
//! forward-reference requirement of §4.3/§9: a first pass over every
//! top-level definition declares its storage and binds its name into the
//! module scope (so `DeferredName` lookups inside any function body always
//! have something to resolve against, regardless of source order), and a
//! second pass emits each function's body. Expression emission follows the
//! lvalue/rvalue dual dispatch of §4.4 and §9 ("Lvalue/Rvalue polymorphism")
//! using two methods per node rather than a tagged return — option (b) of
//! the two strategies §9 allows.

use ahash::AHashMap;

use crate::ast::{self, UnaryOp};
use crate::error::{CompileError, CompileResult, Position};
use crate::intern::{Interner, StringId};
use crate::ir::{mangle, GlobalInit, IrBuilder};
use crate::runtime::{RuntimeExtern, BYTES_PER_WORD_EXTERN, EOT};
use crate::scope::{DeferredName, LValue, Scope, ScopeStack};
use crate::token::BinOp;
use crate::word::{TargetConfig, Word};

fn is_comparison(op: BinOp) -> bool {
    matches!(op, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge)
}

/// A word value, optionally tracking the lvalue it was fetched from (§3
/// "LValue vs RValue"). The origin is what makes `&x` definable for a
/// fetched name but not for an arbitrary computed value.
struct RValue<V> {
    value: V,
    origin: Option<LValue<V>>,
}

/// Recursively collects every `auto` declaration reachable from `stmt`,
/// following the nested-body chain `auto`/`extrn`/`label`/`case` wrap around
/// their tail statement, and descending into compound/if/while/switch bodies
/// (§4.4 "Function emission" step 1, §9 "no block-scoped auto" — every
/// `auto` in the function shares one scope, so the search covers the whole
/// body, not just its head).
fn collect_autos(stmt: &ast::Stmt, out: &mut Vec<(StringId, Option<Word>)>) {
    match stmt {
        ast::Stmt::Auto { names, body, .. } => {
            out.extend(names.iter().copied());
            collect_autos(body, out);
        }
        ast::Stmt::Label { body, .. }
        | ast::Stmt::Extrn { body, .. }
        | ast::Stmt::Case { body, .. }
        | ast::Stmt::While { body, .. }
        | ast::Stmt::Switch { body, .. } => collect_autos(body, out),
        ast::Stmt::Compound { statements, .. } => {
            for s in statements {
                collect_autos(s, out);
            }
        }
        ast::Stmt::If { then_stmt, else_stmt, .. } => {
            collect_autos(then_stmt, out);
            if let Some(e) = else_stmt {
                collect_autos(e, out);
            }
        }
        ast::Stmt::Return { .. }
        | ast::Stmt::Break { .. }
        | ast::Stmt::Goto { .. }
        | ast::Stmt::Expr { .. }
        | ast::Stmt::Null { .. } => {}
    }
}

/// Collects a single `switch`'s own cases in source order, stopping at a
/// nested `switch` (its cases belong to it, not to this dispatch) but
/// otherwise descending the same wrapping chain as [`collect_autos`] (§9
/// "Switch fall-through"). Returns the constant plus the `Case` node's
/// identity, which callers use to look up the block [`Emitter::prepass_function_body`]
/// already created for it.
fn collect_switch_cases(stmt: &ast::Stmt, out: &mut Vec<(Word, *const ast::Stmt)>) {
    match stmt {
        ast::Stmt::Case { constant, body, .. } => {
            out.push((*constant, std::ptr::from_ref(stmt)));
            collect_switch_cases(body, out);
        }
        ast::Stmt::Label { body, .. } | ast::Stmt::Auto { body, .. } | ast::Stmt::Extrn { body, .. } | ast::Stmt::While { body, .. } => {
            collect_switch_cases(body, out);
        }
        ast::Stmt::Compound { statements, .. } => {
            for s in statements {
                collect_switch_cases(s, out);
            }
        }
        ast::Stmt::If { then_stmt, else_stmt, .. } => {
            collect_switch_cases(then_stmt, out);
            if let Some(e) = else_stmt {
                collect_switch_cases(e, out);
            }
        }
        ast::Stmt::Switch { .. } => {}
        ast::Stmt::Return { .. }
        | ast::Stmt::Break { .. }
        | ast::Stmt::Goto { .. }
        | ast::Stmt::Expr { .. }
        | ast::Stmt::Null { .. } => {}
    }
}

/// Drives one [`IrBuilder`] through the emission of one translation unit.
///
/// Bundles exactly the mutable state §3's "EmitContext" specifies: the
/// active function and insertion point track themselves through `builder`;
/// what this struct adds is the scope stack, the current function's label
/// and case-block tables, the loop/switch exit-target stack, and the
/// anonymous-string counter.
pub struct Emitter<'a, B: IrBuilder> {
    builder: &'a mut B,
    interner: &'a Interner,
    target: TargetConfig,
    module_scope: Scope<B::Value>,
    scopes: ScopeStack<B::Value>,
    func: Option<B::Func>,
    labels: AHashMap<StringId, B::Block>,
    case_blocks: AHashMap<*const ast::Stmt, B::Block>,
    exit_targets: Vec<B::Block>,
    /// Whether the current insertion block already has a terminator. Tracked
    /// here (rather than queried from `builder`) so bridging a fallthrough
    /// into a label/case block never double-terminates a block that a
    /// preceding `return`/`goto`/`break` already closed.
    block_terminated: bool,
    anon_counter: u32,
}

impl<'a, B: IrBuilder> Emitter<'a, B> {
    #[must_use]
    pub fn new(interner: &'a Interner, target: TargetConfig, builder: &'a mut B) -> Self {
        Self {
            builder,
            interner,
            target,
            module_scope: Scope::new(),
            scopes: ScopeStack::new(),
            func: None,
            labels: AHashMap::new(),
            case_blocks: AHashMap::new(),
            exit_targets: Vec::new(),
            block_terminated: false,
            anon_counter: 0,
        }
    }

    fn current_func(&self) -> B::Func {
        self.func.expect("expression/statement emission always happens inside emit_function")
    }

    fn anon_string_label(&mut self) -> String {
        let id = self.anon_counter;
        self.anon_counter += 1;
        format!("b.$str{id}")
    }

    fn terminate_with_branch(&mut self, target: B::Block) {
        if !self.block_terminated {
            self.builder.br(target);
            self.block_terminated = true;
        }
    }

    // --- name resolution -----------------------------------------------------

    /// Resolves a bare name reference: the current function's scope first
    /// (params, autos, explicit `extrn`s), then the module scope via the
    /// lazy handle of §4.3/§9 (always resolvable once `emit_program`'s first
    /// pass has run, however early in the file this function sits), then
    /// finally the runtime's fixed extern table (§6) for names no B source
    /// in this translation unit defines at all.
    fn resolve_name(&mut self, name: StringId, position: Position) -> CompileResult<LValue<B::Value>> {
        if let Some(lv) = self.scopes.lookup(name) {
            return Ok(lv);
        }
        if let Ok(lv) = DeferredName::new(name, position).resolve(&self.module_scope, self.interner) {
            return Ok(lv);
        }
        self.resolve_runtime_extern(name, position)
    }

    /// Declares a runtime extern or the `__bytes_per_word` pseudo-extern on
    /// first reference and caches its binding in the module scope, so a
    /// second reference anywhere in the program resolves without declaring
    /// it twice.
    fn resolve_runtime_extern(&mut self, name: StringId, position: Position) -> CompileResult<LValue<B::Value>> {
        let text = self.interner.get(name).to_owned();

        if text == BYTES_PER_WORD_EXTERN {
            let mangled = mangle(&text);
            let addr = self.builder.declare_global(&mangled, GlobalInit::Word(Word(self.target.bytes_per_word.bytes())));
            let lv = LValue::new(addr);
            self.module_scope.define(name, lv, position, self.interner)?;
            return Ok(lv);
        }

        if let Some(entry) = RuntimeExtern::lookup(&text) {
            let mangled = mangle(&text);
            self.builder.declare_function(&mangled, entry.arity(), true);
            let header_label = format!("{mangled}$funcptr");
            let header = self.builder.declare_global(&header_label, GlobalInit::SymbolAddress(mangled));
            let lv = LValue::new(header);
            self.module_scope.define(name, lv, position, self.interner)?;
            return Ok(lv);
        }

        Err(CompileError::UndefinedName { position, name: text })
    }

    // --- global (module-scope) emission --------------------------------------

    pub fn emit_program(&mut self, program: &ast::Program) -> CompileResult<()> {
        let mut pending_functions = Vec::new();
        for def in &program.definitions {
            match def {
                ast::Definition::SimpleDefinition { position, name, initializer } => {
                    let init = match initializer {
                        Some(expr) => self.eval_global_initializer(expr)?,
                        None => GlobalInit::Zero,
                    };
                    let mangled = mangle(self.interner.get(*name));
                    let addr = self.builder.declare_global(&mangled, init);
                    self.module_scope.define(*name, LValue::new(addr), *position, self.interner)?;
                }
                ast::Definition::VectorDefinition { position, name, max_index, initializers } => {
                    let declared_cells = max_index.map(|w| (w.0 + 1).max(1) as usize).unwrap_or(0);
                    let cell_count = declared_cells.max(initializers.len()).max(1);
                    let mut words = Vec::with_capacity(cell_count);
                    for init_expr in initializers {
                        words.push(self.eval_global_initializer(init_expr)?);
                    }
                    words.resize(cell_count, GlobalInit::Zero);

                    let mangled = mangle(self.interner.get(*name));
                    let data_label = format!("{mangled}$vec");
                    self.builder.declare_global_array(&data_label, words);
                    // The name binds to a *header* cell holding the data's
                    // address, not the data directly (§4.4 "Global emission":
                    // "This makes `name` behave as a B vector reference").
                    let header = self.builder.declare_global(&mangled, GlobalInit::SymbolAddress(data_label));
                    self.module_scope.define(*name, LValue::new(header), *position, self.interner)?;
                }
                ast::Definition::FunctionDefinition { position, name, params, body } => {
                    let mangled = mangle(self.interner.get(*name));
                    let func = self.builder.declare_function(&mangled, params.len(), false);
                    // Mirrors the vector header: `name`'s LValue is a
                    // dedicated cell holding a relocation to the function's
                    // own symbol, so `&f`/reassignment read uniformly with
                    // every other identifier while `call` still dispatches
                    // on the function's real mangled symbol (DESIGN.md).
                    let header_label = format!("{mangled}$funcptr");
                    let header = self.builder.declare_global(&header_label, GlobalInit::SymbolAddress(mangled));
                    self.module_scope.define(*name, LValue::new(header), *position, self.interner)?;
                    pending_functions.push((*position, params.clone(), body.as_ref(), func));
                }
            }
        }

        for (position, params, body, func) in pending_functions {
            self.emit_function(position, &params, body, func)?;
        }
        Ok(())
    }

    /// Evaluates a global/vector initializer, which §4.2/§4.4 restrict to a
    /// constant: a numeric or character literal (optionally negated), a
    /// string literal (allocated as its own anonymous global), or a bare
    /// name (a link-time relocation against that name's mangled symbol).
    fn eval_global_initializer(&mut self, expr: &ast::Expr) -> CompileResult<GlobalInit> {
        match expr {
            ast::Expr::Numeric { value, .. } | ast::Expr::Character { value, .. } => Ok(GlobalInit::Word(*value)),
            ast::Expr::Unary { op: UnaryOp::Neg, operand, .. } => match self.eval_global_initializer(operand)? {
                GlobalInit::Word(w) => Ok(GlobalInit::Word(-w)),
                GlobalInit::Zero | GlobalInit::SymbolAddress(_) => {
                    Err(CompileError::InternalError { message: "cannot negate a non-constant global initializer".to_owned() })
                }
            },
            ast::Expr::String { bytes, .. } => {
                let label = self.anon_string_label();
                let mut full = bytes.clone();
                full.push(EOT);
                self.builder.declare_constant_bytes(&label, &full);
                Ok(GlobalInit::SymbolAddress(label))
            }
            ast::Expr::Name { name, .. } => Ok(GlobalInit::SymbolAddress(mangle(self.interner.get(*name)))),
            other => Err(CompileError::InternalError { message: format!("{other:?} is not a valid constant initializer") }),
        }
    }

    // --- function emission ----------------------------------------------------

    /// The six numbered steps of §4.4 "Function emission".
    fn emit_function(&mut self, position: Position, params: &[StringId], body: &ast::Stmt, func: B::Func) -> CompileResult<()> {
        self.func = Some(func);
        self.labels.clear();
        self.case_blocks.clear();
        self.exit_targets.clear();
        self.scopes = ScopeStack::new();
        self.scopes.push_scope();

        // Step 2 happened already (the caller declared `func`); step 3: the
        // entry block allocates parameter and auto storage. Created before
        // the label/case pre-pass below so it is always the function's first
        // block — a backend (this crate's own recording interpreter
        // included) that starts execution at the first block must land here,
        // not on some label/case block the pre-pass happens to create first.
        let entry = self.builder.new_block(func);
        self.builder.set_insert_block(entry);
        self.block_terminated = false;

        // Step 1: pre-pass for auto/label names and pre-create every label's
        // and case's block so goto/dispatch can target them before they're
        // walked in source order.
        self.prepass_function_body(func, body);
        let mut autos = Vec::new();
        collect_autos(body, &mut autos);

        for (index, param_name) in params.iter().enumerate() {
            let incoming = self.builder.param(func, index);
            let addr = self.builder.alloca(1);
            self.builder.store(addr, incoming);
            self.scopes.define(*param_name, LValue::new(addr), position, self.interner)?;
        }

        for (auto_name, size) in &autos {
            match size {
                None => {
                    let addr = self.builder.alloca(1);
                    self.scopes.define(*auto_name, LValue::new(addr), position, self.interner)?;
                }
                Some(max_index) => {
                    // `auto x[k]`: k+1 data cells plus a header cell holding
                    // cell 0's address (§4.3), matching global vectors.
                    let cells = (max_index.0 + 1).max(1);
                    let data_addr = self.builder.alloca(cells);
                    let header_addr = self.builder.alloca(1);
                    self.builder.store(header_addr, data_addr);
                    self.scopes.define(*auto_name, LValue::new(header_addr), position, self.interner)?;
                }
            }
        }

        // Step 5: emit the body.
        self.emit_stmt(body)?;

        // Step 6: implicit `return 0` if control falls off the end.
        if !self.block_terminated {
            let zero = self.builder.const_word(Word::ZERO);
            self.builder.ret(Some(zero));
            self.block_terminated = true;
        }

        self.scopes.pop_scope();
        self.func = None;
        Ok(())
    }

    fn prepass_function_body(&mut self, func: B::Func, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::Label { name, body, .. } => {
                let block = self.builder.new_block(func);
                self.labels.insert(*name, block);
                self.prepass_function_body(func, body);
            }
            ast::Stmt::Case { body, .. } => {
                let block = self.builder.new_block(func);
                self.case_blocks.insert(std::ptr::from_ref(stmt), block);
                self.prepass_function_body(func, body);
            }
            ast::Stmt::Auto { body, .. } | ast::Stmt::Extrn { body, .. } | ast::Stmt::While { body, .. } | ast::Stmt::Switch { body, .. } => {
                self.prepass_function_body(func, body);
            }
            ast::Stmt::Compound { statements, .. } => {
                for s in statements {
                    self.prepass_function_body(func, s);
                }
            }
            ast::Stmt::If { then_stmt, else_stmt, .. } => {
                self.prepass_function_body(func, then_stmt);
                if let Some(e) = else_stmt {
                    self.prepass_function_body(func, e);
                }
            }
            ast::Stmt::Return { .. }
            | ast::Stmt::Break { .. }
            | ast::Stmt::Goto { .. }
            | ast::Stmt::Expr { .. }
            | ast::Stmt::Null { .. } => {}
        }
    }

    // --- statements -------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &ast::Stmt) -> CompileResult<()> {
        match stmt {
            ast::Stmt::Compound { statements, .. } => {
                for s in statements {
                    self.emit_stmt(s)?;
                }
                Ok(())
            }
            ast::Stmt::If { condition, then_stmt, else_stmt, .. } => self.emit_if(condition, then_stmt, else_stmt.as_deref()),
            ast::Stmt::While { condition, body, .. } => self.emit_while(condition, body),
            ast::Stmt::Return { value, .. } => {
                let v = match value {
                    Some(e) => Some(self.emit_rvalue(e)?.value),
                    None => None,
                };
                self.builder.ret(v);
                self.block_terminated = true;
                Ok(())
            }
            ast::Stmt::Break { position } => {
                let target = *self.exit_targets.last().ok_or(CompileError::BreakOutsideLoop { position: *position })?;
                self.terminate_with_branch(target);
                Ok(())
            }
            ast::Stmt::Goto { position, label } => self.emit_goto(*position, label),
            ast::Stmt::Label { name, body, .. } => {
                let block = *self.labels.get(name).expect("prepass_function_body creates a block for every label");
                self.terminate_with_branch(block);
                self.builder.set_insert_block(block);
                self.block_terminated = false;
                self.emit_stmt(body)
            }
            ast::Stmt::Switch { expr, body, .. } => self.emit_switch(expr, body),
            ast::Stmt::Case { body, .. } => {
                let block = *self
                    .case_blocks
                    .get(&std::ptr::from_ref(stmt))
                    .expect("prepass_function_body creates a block for every case");
                self.terminate_with_branch(block);
                self.builder.set_insert_block(block);
                self.block_terminated = false;
                self.emit_stmt(body)
            }
            // Storage for every `auto` is already allocated in the function
            // prologue (§4.4 step 3); only its tail statement still needs emitting.
            ast::Stmt::Auto { body, .. } => self.emit_stmt(body),
            ast::Stmt::Extrn { names, body, position } => {
                for name in names {
                    let lv = match DeferredName::new(*name, *position).resolve(&self.module_scope, self.interner) {
                        Ok(lv) => lv,
                        Err(_) => self.resolve_runtime_extern(*name, *position)?,
                    };
                    self.scopes.define(*name, lv, *position, self.interner)?;
                }
                self.emit_stmt(body)
            }
            ast::Stmt::Expr { expr, .. } => {
                self.emit_rvalue(expr)?;
                Ok(())
            }
            ast::Stmt::Null { .. } => Ok(()),
        }
    }

    fn emit_if(&mut self, condition: &ast::Expr, then_stmt: &ast::Stmt, else_stmt: Option<&ast::Stmt>) -> CompileResult<()> {
        let cond = self.emit_rvalue(condition)?.value;
        let func = self.current_func();
        let then_block = self.builder.new_block(func);
        let merge_block = self.builder.new_block(func);
        let else_block = else_stmt.map(|_| self.builder.new_block(func));

        self.builder.cond_br(cond, then_block, else_block.unwrap_or(merge_block));
        self.block_terminated = true;

        self.builder.set_insert_block(then_block);
        self.block_terminated = false;
        self.emit_stmt(then_stmt)?;
        self.terminate_with_branch(merge_block);

        if let (Some(else_block), Some(else_stmt)) = (else_block, else_stmt) {
            self.builder.set_insert_block(else_block);
            self.block_terminated = false;
            self.emit_stmt(else_stmt)?;
            self.terminate_with_branch(merge_block);
        }

        self.builder.set_insert_block(merge_block);
        self.block_terminated = false;
        Ok(())
    }

    fn emit_while(&mut self, condition: &ast::Expr, body: &ast::Stmt) -> CompileResult<()> {
        let func = self.current_func();
        let header = self.builder.new_block(func);
        let body_block = self.builder.new_block(func);
        let exit_block = self.builder.new_block(func);

        self.terminate_with_branch(header);
        self.builder.set_insert_block(header);
        self.block_terminated = false;
        let cond = self.emit_rvalue(condition)?.value;
        self.builder.cond_br(cond, body_block, exit_block);
        self.block_terminated = true;

        self.builder.set_insert_block(body_block);
        self.block_terminated = false;
        self.exit_targets.push(exit_block);
        let result = self.emit_stmt(body);
        self.exit_targets.pop();
        result?;
        // B has no `continue` (§4.4 "While"); falling off the body always
        // re-tests the condition, never re-enters mid-body.
        self.terminate_with_branch(header);

        self.builder.set_insert_block(exit_block);
        self.block_terminated = false;
        Ok(())
    }

    fn emit_goto(&mut self, position: Position, label_expr: &ast::Expr) -> CompileResult<()> {
        let ast::Expr::Name { name, .. } = label_expr else {
            return Err(CompileError::GotoTargetUnknown { position, label: "<non-identifier goto target>".to_owned() });
        };
        let block = self
            .labels
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::GotoTargetUnknown { position, label: self.interner.get(*name).to_owned() })?;
        self.terminate_with_branch(block);
        Ok(())
    }

    /// No implicit `break` between cases (§9 "Switch fall-through"): the
    /// dispatch only decides *where execution first enters*; once inside, a
    /// fallthrough from one case's block to the next happens exactly the
    /// way it would between any two ordinary statements.
    fn emit_switch(&mut self, expr: &ast::Expr, body: &ast::Stmt) -> CompileResult<()> {
        let val = self.emit_rvalue(expr)?.value;
        let func = self.current_func();

        let mut cases = Vec::new();
        collect_switch_cases(body, &mut cases);
        let exit_block = self.builder.new_block(func);

        if cases.is_empty() {
            self.terminate_with_branch(exit_block);
        } else {
            for (index, (constant, case_ptr)) in cases.iter().enumerate() {
                let case_block = *self.case_blocks.get(case_ptr).expect("prepass_function_body creates a block for every case");
                let const_val = self.builder.const_word(*constant);
                let matches = self.builder.cmp(BinOp::Eq, val, const_val);
                let is_last = index + 1 == cases.len();
                let fallthrough = if is_last { exit_block } else { self.builder.new_block(func) };
                self.builder.cond_br(matches, case_block, fallthrough);
                self.block_terminated = true;
                if !is_last {
                    self.builder.set_insert_block(fallthrough);
                    self.block_terminated = false;
                }
            }
        }

        self.exit_targets.push(exit_block);
        let result = self.emit_stmt(body);
        self.exit_targets.pop();
        result?;
        self.terminate_with_branch(exit_block);

        self.builder.set_insert_block(exit_block);
        self.block_terminated = false;
        Ok(())
    }

    // --- expressions -------------------------------------------------------

    /// `*e` on any value yields an lvalue at the address `e` evaluates to
    /// (§3): since this crate represents every address word-indexed (§3
    /// "Address representation"), that's `e`'s rvalue directly, with no
    /// further scaling — the byte-address scaling only matters at the
    /// actual `load`/`store` boundary, which the `IrBuilder` backend owns.
    fn deref_lvalue(&mut self, operand: &ast::Expr) -> CompileResult<LValue<B::Value>> {
        let addr = self.emit_rvalue(operand)?.value;
        Ok(LValue::new(addr))
    }

    fn emit_lvalue(&mut self, expr: &ast::Expr) -> CompileResult<LValue<B::Value>> {
        match expr {
            ast::Expr::Name { position, name } => self.resolve_name(*name, *position),
            ast::Expr::Unary { op: UnaryOp::Deref, operand, .. } => self.deref_lvalue(operand),
            ast::Expr::Index { base, index, .. } => {
                let b = self.emit_rvalue(base)?.value;
                let i = self.emit_rvalue(index)?.value;
                let addr = self.builder.gep(b, i);
                Ok(LValue::new(addr))
            }
            other => Err(CompileError::NotAnLValue { position: other.position() }),
        }
    }

    fn emit_rvalue(&mut self, expr: &ast::Expr) -> CompileResult<RValue<B::Value>> {
        match expr {
            ast::Expr::Numeric { value, .. } | ast::Expr::Character { value, .. } => {
                Ok(RValue { value: self.builder.const_word(*value), origin: None })
            }
            ast::Expr::String { bytes, .. } => {
                let label = self.anon_string_label();
                let mut full = bytes.clone();
                full.push(EOT);
                Ok(RValue { value: self.builder.declare_constant_bytes(&label, &full), origin: None })
            }
            ast::Expr::Name { .. } => {
                let lv = self.emit_lvalue(expr)?;
                let v = self.builder.load(lv.address);
                Ok(RValue { value: v, origin: Some(lv) })
            }
            ast::Expr::Unary { op, operand, .. } => self.emit_unary_rvalue(*op, operand),
            ast::Expr::Binary { op, left, right, .. } => {
                let l = self.emit_rvalue(left)?.value;
                let r = self.emit_rvalue(right)?.value;
                let v = if is_comparison(*op) { self.builder.cmp(*op, l, r) } else { self.builder.binop(*op, l, r) };
                Ok(RValue { value: v, origin: None })
            }
            ast::Expr::Ternary { condition, then_expr, else_expr, .. } => {
                Ok(RValue { value: self.emit_ternary(condition, then_expr, else_expr)?, origin: None })
            }
            ast::Expr::Assign { compound_op, lvalue, rvalue, .. } => {
                Ok(RValue { value: self.emit_assign(*compound_op, lvalue, rvalue)?, origin: None })
            }
            ast::Expr::Call { callee, args, .. } => Ok(RValue { value: self.emit_call(callee, args)?, origin: None }),
            ast::Expr::Index { .. } => {
                let lv = self.emit_lvalue(expr)?;
                let v = self.builder.load(lv.address);
                Ok(RValue { value: v, origin: Some(lv) })
            }
        }
    }

    fn emit_unary_rvalue(&mut self, op: UnaryOp, operand: &ast::Expr) -> CompileResult<RValue<B::Value>> {
        match op {
            UnaryOp::Neg => {
                let v = self.emit_rvalue(operand)?.value;
                Ok(RValue { value: self.builder.neg(v), origin: None })
            }
            UnaryOp::LogicalNot => {
                let v = self.emit_rvalue(operand)?.value;
                Ok(RValue { value: self.builder.logical_not(v), origin: None })
            }
            UnaryOp::BitNot => {
                let v = self.emit_rvalue(operand)?.value;
                Ok(RValue { value: self.builder.bit_not(v), origin: None })
            }
            UnaryOp::Deref => {
                let lv = self.deref_lvalue(operand)?;
                let v = self.builder.load(lv.address);
                Ok(RValue { value: v, origin: Some(lv) })
            }
            UnaryOp::AddressOf => {
                let lv = self.emit_lvalue(operand)?;
                Ok(RValue { value: lv.address, origin: None })
            }
            UnaryOp::PreIncr | UnaryOp::PreDecr => {
                let lv = self.emit_lvalue(operand)?;
                let old = self.builder.load(lv.address);
                let one = self.builder.const_word(Word::ONE);
                let new = if op == UnaryOp::PreIncr { self.builder.binop(BinOp::Add, old, one) } else { self.builder.binop(BinOp::Sub, old, one) };
                self.builder.store(lv.address, new);
                Ok(RValue { value: new, origin: None })
            }
            UnaryOp::PostIncr | UnaryOp::PostDecr => {
                let lv = self.emit_lvalue(operand)?;
                let old = self.builder.load(lv.address);
                let one = self.builder.const_word(Word::ONE);
                let new = if op == UnaryOp::PostIncr { self.builder.binop(BinOp::Add, old, one) } else { self.builder.binop(BinOp::Sub, old, one) };
                self.builder.store(lv.address, new);
                Ok(RValue { value: old, origin: None })
            }
        }
    }

    /// Encodes the result in a stack slot (alloca/load/store) rather than a
    /// `phi`, per §9 "Lvalue/Rvalue polymorphism": either is a valid
    /// implementation choice and the stack-slot form needs no incoming-edge
    /// bookkeeping in this emitter.
    fn emit_ternary(&mut self, condition: &ast::Expr, then_expr: &ast::Expr, else_expr: &ast::Expr) -> CompileResult<B::Value> {
        let func = self.current_func();
        let cond = self.emit_rvalue(condition)?.value;
        let result_addr = self.builder.alloca(1);
        let then_block = self.builder.new_block(func);
        let else_block = self.builder.new_block(func);
        let merge_block = self.builder.new_block(func);

        self.builder.cond_br(cond, then_block, else_block);
        self.block_terminated = true;

        self.builder.set_insert_block(then_block);
        self.block_terminated = false;
        let then_val = self.emit_rvalue(then_expr)?.value;
        self.builder.store(result_addr, then_val);
        self.terminate_with_branch(merge_block);

        self.builder.set_insert_block(else_block);
        self.block_terminated = false;
        let else_val = self.emit_rvalue(else_expr)?.value;
        self.builder.store(result_addr, else_val);
        self.terminate_with_branch(merge_block);

        self.builder.set_insert_block(merge_block);
        self.block_terminated = false;
        Ok(self.builder.load(result_addr))
    }

    fn emit_assign(&mut self, compound_op: Option<BinOp>, lvalue_expr: &ast::Expr, rvalue_expr: &ast::Expr) -> CompileResult<B::Value> {
        let lv = self.emit_lvalue(lvalue_expr)?;
        let r = self.emit_rvalue(rvalue_expr)?.value;
        let result = match compound_op {
            None => {
                self.builder.store(lv.address, r);
                r
            }
            Some(op) => {
                let l = self.builder.load(lv.address);
                let new = if is_comparison(op) { self.builder.cmp(op, l, r) } else { self.builder.binop(op, l, r) };
                self.builder.store(lv.address, new);
                new
            }
        };
        Ok(result)
    }

    fn emit_call(&mut self, callee: &ast::Expr, args: &[ast::Expr]) -> CompileResult<B::Value> {
        let callee_val = self.emit_rvalue(callee)?.value;
        let func_ptr = self.builder.bitcast(callee_val);
        let mut arg_vals = Vec::with_capacity(args.len());
        for a in args {
            arg_vals.push(self.emit_rvalue(a)?.value);
        }
        Ok(self.builder.call(func_ptr, &arg_vals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;
    use crate::ir::recording::{interpret, RecordingBuilder};
    use crate::parser::{parse, DefaultSemantics};
    use crate::word::BytesPerWord;

    fn run(source: &str, stdin: &[u8]) -> Vec<u8> {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let target = TargetConfig::new(BytesPerWord::Eight);
        let program = parse(source, &mut interner, target, &mut semantics).unwrap();
        let mut builder = RecordingBuilder::new(target);
        Emitter::new(&interner, target, &mut builder).emit_program(&program).unwrap();
        interpret(&builder, stdin).unwrap()
    }

    fn run_str(source: &str) -> String {
        String::from_utf8(run(source, &[])).unwrap()
    }

    #[test]
    fn e1_hello_string_literal() {
        assert_eq!(run_str(r#"main(){ extrn putstr; putstr("hello!*n"); }"#), "hello!\n");
    }

    #[test]
    fn e2_recursive_factorial_without_explicit_self_extrn() {
        let src = "fact(n) return(n==0?1:n*fact(n-1)); main(){extrn putnumb, fact; putnumb(fact(5));}";
        assert_eq!(run_str(src), "120");
    }

    #[test]
    fn e3_while_loop_counts_to_three() {
        let src = "main(){ auto i; i=0; while(i<3){ i=+1; } extrn putnumb; putnumb(i); }";
        assert_eq!(run_str(src), "3");
    }

    #[test]
    fn e4_vector_index_and_word_stride() {
        let src = "v[2] 1,2,3; main(){ extrn v, putnumb; auto s, i; s=0; i=0; while(i<3){ s=+v[i++]; } putnumb(s); }";
        assert_eq!(run_str(src), "6");
    }

    #[test]
    fn e5_bytes_per_word_pseudo_extern() {
        assert_eq!(run_str("main(){ extrn putnumb, __bytes_per_word; putnumb(__bytes_per_word); }"), "8");
    }

    #[test]
    fn e6_getchar_echoes_until_eot() {
        let src = "main(){ auto c; while((c=getchar())!='*e') putchar(c); }";
        let out = run(src, b"abc\x04");
        assert_eq!(out, b"abc");
    }

    #[test]
    fn invariant_word_stride_vector_literal() {
        let src = "v[3] 10, 20, 30, 40; main(){ extrn v, putnumb; putnumb(v[2]); }";
        assert_eq!(run_str(src), "30");
    }

    #[test]
    fn invariant_address_identity() {
        let src = "x; main(){ extrn x, putnumb; putnumb(&x == &x); }";
        assert_eq!(run_str(src), "1");
    }

    #[test]
    fn invariant_character_packing() {
        let src = "main(){ extrn putnumb; putnumb('ab'); }";
        assert_eq!(run_str(src), (97 + 98 * 256).to_string());
    }

    #[test]
    fn invariant_escape_expansion_writes_linefeed() {
        let out = run("main(){ extrn putchar; putchar('*n'); }", &[]);
        assert_eq!(out, vec![b'\n']);
    }

    #[test]
    fn invariant_empty_function_body_returns_zero() {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let target = TargetConfig::new(BytesPerWord::Eight);
        let program = parse("main(){}", &mut interner, target, &mut semantics).unwrap();
        let mut builder = RecordingBuilder::new(target);
        Emitter::new(&interner, target, &mut builder).emit_program(&program).unwrap();
        assert_eq!(interpret(&builder, &[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn invariant_deref_of_address_of_is_identity() {
        let src = "x 7; main(){ extrn x, putnumb; putnumb(*(&x)); }";
        assert_eq!(run_str(src), "7");
    }

    #[test]
    fn switch_falls_through_cases_with_no_implicit_break() {
        let src = "main(){ extrn putnumb; auto sum; sum=0; switch(1){ case 1: sum=+1; case 2: sum=+10; break; case 3: sum=+100; } putnumb(sum); }";
        assert_eq!(run_str(src), "11");
    }

    #[test]
    fn switch_with_no_matching_case_runs_nothing() {
        let src = "main(){ extrn putnumb; auto sum; sum=5; switch(99){ case 1: sum=+1; } putnumb(sum); }";
        assert_eq!(run_str(src), "5");
    }

    #[test]
    fn forward_call_to_a_later_function_resolves() {
        let src = "main(){ extrn f, putnumb; putnumb(f()); } f() return(42);";
        assert_eq!(run_str(src), "42");
    }

    #[test]
    fn goto_to_a_forward_label_skips_intervening_code() {
        let src = "main(){ extrn putnumb; auto x; x=1; goto done; x=99; done: putnumb(x); }";
        assert_eq!(run_str(src), "1");
    }

    #[test]
    fn break_outside_loop_or_switch_is_an_error() {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let target = TargetConfig::new(BytesPerWord::Eight);
        let program = parse("main(){ break; }", &mut interner, target, &mut semantics).unwrap();
        let mut builder = RecordingBuilder::new(target);
        let err = Emitter::new(&interner, target, &mut builder).emit_program(&program).unwrap_err();
        assert!(matches!(err, CompileError::BreakOutsideLoop { .. }));
    }

    #[test]
    fn address_of_a_non_lvalue_expression_fails() {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let target = TargetConfig::new(BytesPerWord::Eight);
        let program = parse("main(){ auto a, b; return &(a+b); }", &mut interner, target, &mut semantics).unwrap();
        let mut builder = RecordingBuilder::new(target);
        let err = Emitter::new(&interner, target, &mut builder).emit_program(&program).unwrap_err();
        assert!(matches!(err, CompileError::NotAnLValue { .. }));
    }

    #[test]
    fn auto_vector_is_indexable_like_a_global_one() {
        let src = "main(){ extrn putnumb; auto v[2]; v[0]=5; v[1]=6; v[2]=7; putnumb(v[0]+v[1]+v[2]); }";
        assert_eq!(run_str(src), "18");
    }

    #[test]
    fn undefined_name_fails_with_the_right_error_kind() {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let target = TargetConfig::new(BytesPerWord::Eight);
        let program = parse("main(){ extrn nonexistent_symbol; return nonexistent_symbol; }", &mut interner, target, &mut semantics).unwrap();
        let mut builder = RecordingBuilder::new(target);
        let err = Emitter::new(&interner, target, &mut builder).emit_program(&program).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedName { .. }));
    }
}
