// lower.rs — Lowering: annotated tree to bytecode
//
// Syntax-directed emission, one unit per scope (module, function, lambda,
// class body). Every instruction that corresponds to a syntax node is
// emitted with that node's exact span; plumbing instructions are emitted
// with no position. The resolution side of the engine depends on these
// emission rules, so they are the single place where the two revisions'
// code shapes are defined:
//
//   - V2 prepends RESUME to every unit, quickens int Add/Mul and the
//     identity/membership comparisons, and compiles attribute calls to
//     LOAD_METHOD + CALL_METHOD.
//   - V1 compiles attribute calls to LOAD_ATTR + CALL, and folds
//     identity/membership tests in branch position into dedicated
//     branch opcodes.
//   - Both revisions fold `not` in branch position into an inverted
//     jump, fold int Add/Sub/Mul on literal operands into a constant,
//     and fold all-literal tuple displays into a constant tuple.
//     Division is never folded.

use std::sync::Arc;

use crate::ast::{BinOpKind, CmpKind, UnaryOpKind};
use crate::bytecode::{
    binop_code, cmp_code, CompiledUnit, Const, Encoding, Pos, RawOp, UnitBuilder,
};
use crate::source::{LineIndex, SourceUnit};
use crate::tree::{Ctx, FsSeg, NodeId, NodeKind, Tree};

/// Compile a source unit's module scope. `None` when the source did not
/// parse; callers fall back to unresolved execution points in that case.
pub fn compile(source: &SourceUnit, encoding: Encoding) -> Option<Arc<CompiledUnit>> {
    let tree = source.tree()?;
    let lw = Lowerer {
        tree,
        lines: source.lines(),
        source_id: &source.id,
        encoding,
    };
    let root = tree.root();
    let body = lw.tree.node(root).children.clone();
    Some(lw.unit("<module>", Scope::Module, &body))
}

enum Scope {
    Module,
    Function,
    Class,
    /// Body slice holds the single body expression.
    Lambda,
}

struct Lowerer<'a> {
    tree: &'a Tree,
    lines: &'a LineIndex,
    source_id: &'a str,
    encoding: Encoding,
}

impl Lowerer<'_> {
    fn pos(&self, id: NodeId) -> Pos {
        let span = self.tree.node(id).span;
        Pos::At {
            span,
            line: self.lines.line_of(span.start),
        }
    }

    // ── Scopes ──

    fn unit(&self, name: &str, scope: Scope, body: &[NodeId]) -> Arc<CompiledUnit> {
        let mut b = UnitBuilder::new(name, self.source_id, self.encoding);
        if self.encoding == Encoding::V2 {
            b.emit(RawOp::Resume, 0, Pos::None);
        }
        match scope {
            Scope::Lambda => {
                self.expr(&mut b, body[0]);
                b.emit(RawOp::ReturnValue, 0, Pos::None);
            }
            Scope::Class => {
                // Class bodies inherit the enclosing module name.
                let name_idx = b.add_name("__name__");
                b.emit(RawOp::LoadName, name_idx, Pos::None);
                let module_idx = b.add_name("__module__");
                b.emit(RawOp::StoreName, module_idx, Pos::None);
                for &stmt in body {
                    self.stmt(&mut b, stmt);
                }
                self.epilogue(&mut b);
            }
            Scope::Module | Scope::Function => {
                for &stmt in body {
                    self.stmt(&mut b, stmt);
                }
                self.epilogue(&mut b);
            }
        }
        b.finish()
    }

    fn epilogue(&self, b: &mut UnitBuilder) {
        let nil = b.add_const(Const::Nil);
        b.emit(RawOp::LoadConst, nil, Pos::None);
        b.emit(RawOp::ReturnValue, 0, Pos::None);
    }

    // ── Statements ──

    fn stmt(&self, b: &mut UnitBuilder, id: NodeId) {
        let node = self.tree.node(id);
        match &node.kind {
            NodeKind::ExprStmt => {
                self.expr(b, node.children[0]);
                b.emit(RawOp::PopTop, 0, Pos::None);
            }
            NodeKind::Assign { target_count } => {
                let n = *target_count as usize;
                let value = node.children[n];
                self.expr(b, value);
                for _ in 1..n {
                    b.emit(RawOp::DupTop, 0, Pos::None);
                }
                for &target in &node.children[..n] {
                    self.store(b, target);
                }
            }
            NodeKind::AugAssign { op } => {
                let target = node.children[0];
                let value = node.children[1];
                let name = match &self.tree.node(target).kind {
                    NodeKind::Name { id, .. } => id.clone(),
                    _ => return,
                };
                let idx = b.add_name(&name);
                b.emit(RawOp::LoadName, idx, self.pos(target));
                self.expr(b, value);
                b.emit(RawOp::BinaryOp, binop_code(*op, true), self.pos(id));
                b.emit(RawOp::StoreName, idx, self.pos(target));
            }
            NodeKind::Delete => {
                for &target in &node.children {
                    self.delete(b, target);
                }
            }
            NodeKind::Return { has_value } => {
                if *has_value {
                    self.expr(b, node.children[0]);
                } else {
                    let nil = b.add_const(Const::Nil);
                    b.emit(RawOp::LoadConst, nil, Pos::None);
                }
                b.emit(RawOp::ReturnValue, 0, self.pos(id));
            }
            NodeKind::If { then_count } => {
                let test = node.children[0];
                let then_end = 1 + *then_count as usize;
                let to_else = self.branch_if_false(b, test);
                for &stmt in &node.children[1..then_end] {
                    self.stmt(b, stmt);
                }
                if node.children.len() > then_end {
                    let to_end = b.emit_jump(RawOp::Jump, Pos::None);
                    b.patch_jump(to_else);
                    for &stmt in &node.children[then_end..] {
                        self.stmt(b, stmt);
                    }
                    b.patch_jump(to_end);
                } else {
                    b.patch_jump(to_else);
                }
            }
            NodeKind::While => {
                let test = node.children[0];
                let top = b.here();
                let to_end = self.branch_if_false(b, test);
                for &stmt in &node.children[1..] {
                    self.stmt(b, stmt);
                }
                let back = b.emit_jump(RawOp::Jump, Pos::None);
                b.patch_jump_to(back, top);
                b.patch_jump(to_end);
            }
            NodeKind::FnDef { name, param_count } => {
                let body = &node.children[*param_count as usize..];
                let unit = self.unit(name, Scope::Function, body);
                self.make_function(b, unit, name, id);
                let idx = b.add_name(name);
                b.emit(RawOp::StoreName, idx, self.pos(id));
            }
            NodeKind::ClassDef { name } => {
                b.emit(RawOp::LoadBuildClass, 0, self.pos(id));
                let unit = self.unit(name, Scope::Class, &node.children);
                self.make_function(b, unit, name, id);
                b.emit(RawOp::Call, 1, self.pos(id));
                let idx = b.add_name(name);
                b.emit(RawOp::StoreName, idx, self.pos(id));
            }
            _ => {
                debug_assert!(false, "not a statement: {:?}", node.kind);
            }
        }
    }

    /// LOAD_CONST unit + LOAD_CONST name + MAKE_FUNCTION, the creation
    /// triple the qualified-name resolver recognizes.
    fn make_function(&self, b: &mut UnitBuilder, unit: Arc<CompiledUnit>, name: &str, at: NodeId) {
        let unit_idx = b.add_const(Const::Unit(unit));
        b.emit(RawOp::LoadConst, unit_idx, Pos::None);
        let name_idx = b.add_const(Const::Str(name.to_string()));
        b.emit(RawOp::LoadConst, name_idx, Pos::None);
        b.emit(RawOp::MakeFunction, 0, self.pos(at));
    }

    fn store(&self, b: &mut UnitBuilder, id: NodeId) {
        let node = self.tree.node(id);
        match &node.kind {
            NodeKind::Name { id: name, .. } => {
                let idx = b.add_name(name);
                b.emit(RawOp::StoreName, idx, self.pos(id));
            }
            NodeKind::Attribute { name, .. } => {
                self.expr(b, node.children[0]);
                let idx = b.add_name(name);
                b.emit(RawOp::StoreAttr, idx, self.pos(id));
            }
            NodeKind::Subscript { .. } => {
                self.expr(b, node.children[0]);
                self.expr(b, node.children[1]);
                b.emit(RawOp::StoreSubscr, 0, self.pos(id));
            }
            NodeKind::Tuple { .. } => {
                b.emit(
                    RawOp::UnpackSequence,
                    node.children.len() as u32,
                    self.pos(id),
                );
                for &elem in &node.children {
                    self.store(b, elem);
                }
            }
            _ => {
                debug_assert!(false, "not a store target: {:?}", node.kind);
            }
        }
    }

    fn delete(&self, b: &mut UnitBuilder, id: NodeId) {
        let node = self.tree.node(id);
        match &node.kind {
            NodeKind::Name { id: name, .. } => {
                let idx = b.add_name(name);
                b.emit(RawOp::DeleteName, idx, self.pos(id));
            }
            NodeKind::Attribute { name, .. } => {
                self.expr(b, node.children[0]);
                let idx = b.add_name(name);
                b.emit(RawOp::DeleteAttr, idx, self.pos(id));
            }
            NodeKind::Subscript { .. } => {
                self.expr(b, node.children[0]);
                self.expr(b, node.children[1]);
                b.emit(RawOp::DeleteSubscr, 0, self.pos(id));
            }
            NodeKind::Tuple { .. } => {
                for &elem in &node.children {
                    self.delete(b, elem);
                }
            }
            _ => {
                debug_assert!(false, "not a delete target: {:?}", node.kind);
            }
        }
    }

    /// Lower a branch test, returning the patch for the jump taken when
    /// the test is false. Folds `not` into an inverted jump on both
    /// revisions and identity/membership tests into dedicated branch
    /// opcodes on V1.
    fn branch_if_false(&self, b: &mut UnitBuilder, test: NodeId) -> crate::bytecode::JumpPatch {
        let node = self.tree.node(test);
        match &node.kind {
            NodeKind::UnaryOp {
                op: UnaryOpKind::Not,
            } => {
                self.expr(b, node.children[0]);
                b.emit_jump(RawOp::PopJumpIfTrue, Pos::None)
            }
            NodeKind::Compare { op: CmpKind::Is } if self.encoding == Encoding::V1 => {
                self.expr(b, node.children[0]);
                self.expr(b, node.children[1]);
                b.emit_jump(RawOp::JumpIfIsFalse, Pos::None)
            }
            NodeKind::Compare { op: CmpKind::In } if self.encoding == Encoding::V1 => {
                self.expr(b, node.children[0]);
                self.expr(b, node.children[1]);
                b.emit_jump(RawOp::JumpIfInFalse, Pos::None)
            }
            _ => {
                self.expr(b, test);
                b.emit_jump(RawOp::PopJumpIfFalse, Pos::None)
            }
        }
    }

    // ── Expressions ──

    fn expr(&self, b: &mut UnitBuilder, id: NodeId) {
        let node = self.tree.node(id);
        match &node.kind {
            NodeKind::Literal(lit) => {
                let idx = b.add_const(Const::of_lit(lit));
                b.emit(RawOp::LoadConst, idx, self.pos(id));
            }
            NodeKind::Name { id: name, .. } => {
                let idx = b.add_name(name);
                b.emit(RawOp::LoadName, idx, self.pos(id));
            }
            NodeKind::Tuple { .. } => {
                if let Some(value) = self.fold_tuple(id) {
                    let idx = b.add_const(value);
                    b.emit(RawOp::LoadConst, idx, self.pos(id));
                    return;
                }
                for &elem in &node.children {
                    self.expr(b, elem);
                }
                b.emit(RawOp::BuildTuple, node.children.len() as u32, self.pos(id));
            }
            NodeKind::List => {
                for &elem in &node.children {
                    self.expr(b, elem);
                }
                b.emit(RawOp::BuildList, node.children.len() as u32, self.pos(id));
            }
            NodeKind::Dict => {
                for &child in &node.children {
                    self.expr(b, child);
                }
                b.emit(
                    RawOp::BuildMap,
                    node.children.len() as u32 / 2,
                    self.pos(id),
                );
            }
            NodeKind::BinOp { op } => {
                if let Some(value) = self.fold_binop(id, *op) {
                    let idx = b.add_const(value);
                    // The constant keeps the operator expression's span;
                    // the filter's fallback uses it to report the fold.
                    b.emit(RawOp::LoadConst, idx, self.pos(id));
                    return;
                }
                self.expr(b, node.children[0]);
                self.expr(b, node.children[1]);
                self.emit_binop(b, *op, false, self.pos(id));
            }
            NodeKind::UnaryOp { op } => {
                self.expr(b, node.children[0]);
                let arg = match op {
                    UnaryOpKind::Neg => 0,
                    UnaryOpKind::Not => 1,
                };
                b.emit(RawOp::UnaryOp, arg, self.pos(id));
            }
            NodeKind::BoolOp { op } => {
                // Short-circuit form: the operator node itself never
                // gets an instruction.
                self.expr(b, node.children[0]);
                let jump_op = match op {
                    crate::ast::BoolOpKind::And => RawOp::JumpIfFalseOrPop,
                    crate::ast::BoolOpKind::Or => RawOp::JumpIfTrueOrPop,
                };
                let patch = b.emit_jump(jump_op, Pos::None);
                self.expr(b, node.children[1]);
                b.patch_jump(patch);
            }
            NodeKind::Compare { op } => {
                self.expr(b, node.children[0]);
                self.expr(b, node.children[1]);
                self.emit_compare(b, *op, self.pos(id));
            }
            NodeKind::Call => {
                let func = node.children[0];
                let args = &node.children[1..];
                let func_node = self.tree.node(func);
                match &func_node.kind {
                    NodeKind::Attribute {
                        name,
                        ctx: Ctx::Load,
                    } => {
                        self.expr(b, func_node.children[0]);
                        let idx = b.add_name(name);
                        if self.encoding == Encoding::V2 {
                            b.emit(RawOp::LoadMethod, idx, self.pos(func));
                            for &arg in args {
                                self.expr(b, arg);
                            }
                            b.emit(RawOp::CallMethod, args.len() as u32, self.pos(id));
                        } else {
                            b.emit(RawOp::LoadAttr, idx, self.pos(func));
                            for &arg in args {
                                self.expr(b, arg);
                            }
                            b.emit(RawOp::Call, args.len() as u32, self.pos(id));
                        }
                    }
                    _ => {
                        self.expr(b, func);
                        for &arg in args {
                            self.expr(b, arg);
                        }
                        b.emit(RawOp::Call, args.len() as u32, self.pos(id));
                    }
                }
            }
            NodeKind::Attribute { name, .. } => {
                self.expr(b, node.children[0]);
                let idx = b.add_name(name);
                b.emit(RawOp::LoadAttr, idx, self.pos(id));
            }
            NodeKind::Subscript { .. } => {
                self.expr(b, node.children[0]);
                self.expr(b, node.children[1]);
                b.emit(RawOp::BinarySubscr, 0, self.pos(id));
            }
            NodeKind::Lambda { param_count } => {
                let body = &node.children[*param_count as usize..];
                let unit = self.unit("<lambda>", Scope::Lambda, body);
                self.make_function(b, unit, "<lambda>", id);
            }
            NodeKind::FString { segs } => {
                let mut field_iter = node.children.iter();
                let mut count = 0u32;
                for seg in segs {
                    match seg {
                        FsSeg::Text(text) => {
                            let idx = b.add_const(Const::Str(text.clone()));
                            b.emit(RawOp::LoadConst, idx, Pos::None);
                            count += 1;
                        }
                        FsSeg::Field => {
                            if let Some(&field) = field_iter.next() {
                                let name = self.tree.node(field).children[0];
                                self.expr(b, name);
                                b.emit(RawOp::FormatValue, 0, self.pos(field));
                                count += 1;
                            }
                        }
                    }
                }
                b.emit(RawOp::BuildString, count, self.pos(id));
            }
            _ => {
                debug_assert!(false, "not an expression: {:?}", node.kind);
            }
        }
    }

    fn emit_binop(&self, b: &mut UnitBuilder, op: BinOpKind, inplace: bool, pos: Pos) {
        if self.encoding == Encoding::V2 && !inplace {
            // Quickened forms; the decoder maps them back.
            match op {
                BinOpKind::Add => {
                    b.emit(RawOp::BinaryOpAddInt, 0, pos);
                    return;
                }
                BinOpKind::Mul => {
                    b.emit(RawOp::BinaryOpMulInt, 0, pos);
                    return;
                }
                _ => {}
            }
        }
        b.emit(RawOp::BinaryOp, binop_code(op, inplace), pos);
    }

    fn emit_compare(&self, b: &mut UnitBuilder, op: CmpKind, pos: Pos) {
        if self.encoding == Encoding::V2 {
            match op {
                CmpKind::Is => {
                    b.emit(RawOp::CompareOpIs, 0, pos);
                    return;
                }
                CmpKind::In => {
                    b.emit(RawOp::CompareOpIn, 0, pos);
                    return;
                }
                _ => {}
            }
        }
        b.emit(RawOp::CompareOp, cmp_code(op), pos);
    }

    // ── Constant folding ──

    /// Fold int arithmetic over literal operands. Division and modulo
    /// are never folded (they can trap at run time), and overflow
    /// suppresses the fold.
    fn fold_binop(&self, id: NodeId, op: BinOpKind) -> Option<Const> {
        let node = self.tree.node(id);
        let left = self.literal_int(node.children[0])?;
        let right = self.literal_int(node.children[1])?;
        let value = match op {
            BinOpKind::Add => left.checked_add(right)?,
            BinOpKind::Sub => left.checked_sub(right)?,
            BinOpKind::Mul => left.checked_mul(right)?,
            BinOpKind::Div | BinOpKind::Mod => return None,
        };
        Some(Const::Int(value))
    }

    fn literal_int(&self, id: NodeId) -> Option<i64> {
        match &self.tree.node(id).kind {
            NodeKind::Literal(crate::ast::Lit::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// A tuple display whose elements are all literals (or such tuples)
    /// folds into one constant.
    fn fold_tuple(&self, id: NodeId) -> Option<Const> {
        let node = self.tree.node(id);
        let mut items = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            match &self.tree.node(child).kind {
                NodeKind::Literal(lit) => items.push(Const::of_lit(lit)),
                NodeKind::Tuple { .. } => items.push(self.fold_tuple(child)?),
                _ => return None,
            }
        }
        Some(Const::Tuple(items))
    }
}
