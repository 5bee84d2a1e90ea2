// filter.rs — Candidate filter
//
// Maps a decoded instruction to the set of tree nodes that could have
// produced it, purely by structure: opcode kind against node kind, with
// operand details (identifier, operator, element count) narrowing the
// set. Position is deliberately not consulted here; the disambiguator
// layers that on top.
//
// The module also owns the exclusion table: instruction kinds the engine
// refuses to map because the compiler destroyed the correspondence. Each
// entry is a documented limitation, not a bug to fix.

use crate::ast::{BinOpKind, Lit, UnaryOpKind};
use crate::bytecode::{CompiledUnit, Const, Encoding};
use crate::decode::{ArgVal, Instruction, OpKind};
use crate::error::Limitation;
use crate::source::LineIndex;
use crate::tree::{Ctx, NodeId, NodeKind, Tree};

/// Outcome of structural filtering for one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Nodes that structurally match, in tree (post-order) id order.
    Candidates(Vec<NodeId>),
    /// The instruction kind is covered by the exclusion table.
    Excluded(Limitation),
    /// The instruction kind never corresponds to a node (plumbing).
    NonMapping,
}

/// Structural candidates for an instruction.
pub fn candidates(tree: &Tree, instr: &Instruction, unit: &CompiledUnit) -> Verdict {
    if let Some(limitation) = exclusion(instr.kind, unit.encoding) {
        return Verdict::Excluded(limitation);
    }
    if is_plumbing(instr.kind) {
        return Verdict::NonMapping;
    }
    let ids = tree
        .iter()
        .filter(|(_, node)| matches_node(tree, instr, node, unit))
        .map(|(id, _)| id)
        .collect();
    Verdict::Candidates(ids)
}

/// The exclusion table. Every entry corresponds to a compile-time
/// transformation that erases the node an instruction came from:
///
///   - V1 has no exact spans, so the interleaved constants and fields of
///     a format string cannot be told apart reliably; its BUILD_STRING
///     and FORMAT_VALUE are excluded wholesale.
///   - JUMP_IF_IS_FALSE / JUMP_IF_IN_FALSE (V1) absorb a comparison
///     node; the branch cannot stand in for it.
///   - POP_JUMP_IF_TRUE only ever comes from `not` folding into an
///     inverted jump; the negation node is gone.
///
/// One further limitation surfaces elsewhere: constant-folded operator
/// expressions are reported by `folded_fallback` below.
pub fn exclusion(kind: OpKind, encoding: Encoding) -> Option<Limitation> {
    match (kind, encoding) {
        (OpKind::BuildString, Encoding::V1) | (OpKind::FormatValue, Encoding::V1) => {
            Some(Limitation::FormatStringInternals)
        }
        (OpKind::JumpIfIsFalse, _) | (OpKind::JumpIfInFalse, _) => {
            Some(Limitation::FoldedBranchTest)
        }
        (OpKind::PopJumpIfTrue, _) => Some(Limitation::NegatedBranchTest),
        _ => None,
    }
}

/// Instruction kinds that never map to a node regardless of position.
fn is_plumbing(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Jump
            | OpKind::PopJumpIfFalse
            | OpKind::JumpIfFalseOrPop
            | OpKind::JumpIfTrueOrPop
            | OpKind::PopTop
            | OpKind::DupTop
            | OpKind::Nop
            | OpKind::Resume
            | OpKind::Invalid
    )
}

/// Does this node structurally match the instruction?
fn matches_node(
    tree: &Tree,
    instr: &Instruction,
    node: &crate::tree::Node,
    unit: &CompiledUnit,
) -> bool {
    let kind = &node.kind;
    match instr.kind {
        OpKind::LoadConst => {
            let value = match &instr.argval {
                ArgVal::Const(i) => unit.consts.get(*i as usize),
                _ => None,
            };
            match (kind, value) {
                // A literal whose parent folds is consumed by the
                // parent's constant and never loads on its own.
                (NodeKind::Literal(lit), Some(c)) => {
                    Const::of_lit(lit) == *c && !consumed_by_fold(tree, node)
                }
                // All-literal tuple displays fold into one constant but
                // the tuple node is still the right answer for it.
                (NodeKind::Tuple { ctx: Ctx::Load }, Some(c)) => {
                    folded_tuple(tree, node).as_ref() == Some(c)
                        && !consumed_by_fold(tree, node)
                }
                _ => false,
            }
        }
        OpKind::LoadName => {
            if matches_name(kind, instr, Ctx::Load) {
                return true;
            }
            // An augmented assignment reads its target before writing it,
            // so the read instruction points at a store-context name.
            matches_name(kind, instr, Ctx::Store) && parent_is_aug(tree, node)
        }
        OpKind::StoreName => match kind {
            NodeKind::Name {
                id,
                ctx: Ctx::Store,
            } => arg_name_is(instr, id),
            // fn/class definitions store their own name.
            NodeKind::FnDef { name, .. } | NodeKind::ClassDef { name } => {
                arg_name_is(instr, name)
            }
            _ => false,
        },
        OpKind::DeleteName => matches_name(kind, instr, Ctx::Del),
        OpKind::LoadAttr | OpKind::LoadMethod => matches_attr(kind, instr, Ctx::Load),
        OpKind::StoreAttr => matches_attr(kind, instr, Ctx::Store),
        OpKind::DeleteAttr => matches_attr(kind, instr, Ctx::Del),
        OpKind::BinaryOp => match (&instr.argval, kind) {
            // Literal int Add/Sub/Mul folds at lowering time; the node
            // never emits a BINARY_OP of its own.
            (ArgVal::BinOp(op, false), NodeKind::BinOp { op: node_op }) => {
                op == node_op && !binop_folds(tree, node, *node_op)
            }
            (ArgVal::BinOp(op, true), NodeKind::AugAssign { op: node_op }) => op == node_op,
            _ => false,
        },
        OpKind::UnaryOp => match kind {
            NodeKind::UnaryOp { op } => {
                let code = match op {
                    UnaryOpKind::Neg => 0,
                    UnaryOpKind::Not => 1,
                };
                instr.arg == code
            }
            _ => false,
        },
        OpKind::CompareOp => match (&instr.argval, kind) {
            (ArgVal::Cmp(op), NodeKind::Compare { op: node_op }) => op == node_op,
            _ => false,
        },
        OpKind::BinarySubscr => matches!(kind, NodeKind::Subscript { ctx: Ctx::Load }),
        OpKind::StoreSubscr => matches!(kind, NodeKind::Subscript { ctx: Ctx::Store }),
        OpKind::DeleteSubscr => matches!(kind, NodeKind::Subscript { ctx: Ctx::Del }),
        // Call children are [callee, args...]; the class-creation call
        // lowering emits always passes the one class body function.
        OpKind::Call => match kind {
            NodeKind::Call => count_is(instr, node.children.len() - 1),
            NodeKind::ClassDef { .. } => count_is(instr, 1),
            _ => false,
        },
        OpKind::CallMethod => {
            matches!(kind, NodeKind::Call) && count_is(instr, node.children.len() - 1)
        }
        OpKind::BuildList => {
            matches!(kind, NodeKind::List) && count_is(instr, node.children.len())
        }
        OpKind::BuildTuple => {
            // All-literal displays fold to one constant; the LOAD_CONST
            // claims those nodes instead.
            matches!(kind, NodeKind::Tuple { ctx: Ctx::Load })
                && count_is(instr, node.children.len())
                && folded_tuple(tree, node).is_none()
        }
        OpKind::BuildMap => {
            matches!(kind, NodeKind::Dict) && count_is(instr, node.children.len() / 2)
        }
        OpKind::BuildString => matches!(kind, NodeKind::FString { .. }),
        OpKind::FormatValue => matches!(kind, NodeKind::FormatField),
        OpKind::UnpackSequence => {
            matches!(kind, NodeKind::Tuple { ctx: Ctx::Store })
                && count_is(instr, node.children.len())
        }
        OpKind::MakeFunction => matches!(
            kind,
            NodeKind::FnDef { .. } | NodeKind::ClassDef { .. } | NodeKind::Lambda { .. }
        ),
        OpKind::LoadBuildClass => matches!(kind, NodeKind::ClassDef { .. }),
        OpKind::ReturnValue => matches!(kind, NodeKind::Return { .. }),
        _ => false,
    }
}

fn matches_name(kind: &NodeKind, instr: &Instruction, want: Ctx) -> bool {
    match kind {
        NodeKind::Name { id, ctx } if *ctx == want => arg_name_is(instr, id),
        _ => false,
    }
}

fn matches_attr(kind: &NodeKind, instr: &Instruction, want: Ctx) -> bool {
    match kind {
        NodeKind::Attribute { name, ctx } if *ctx == want => arg_name_is(instr, name),
        _ => false,
    }
}

fn arg_name_is(instr: &Instruction, name: &str) -> bool {
    matches!(&instr.argval, ArgVal::Name(n) if n == name)
}

fn parent_is_aug(tree: &Tree, node: &crate::tree::Node) -> bool {
    node.parent
        .map(|p| matches!(tree.node(p).kind, NodeKind::AugAssign { .. }))
        .unwrap_or(false)
}

/// Int Add/Sub/Mul over literal operands folds to a constant. Division
/// and modulo never fold (they can trap at run time).
fn binop_folds(tree: &Tree, node: &crate::tree::Node, op: BinOpKind) -> bool {
    matches!(op, BinOpKind::Add | BinOpKind::Sub | BinOpKind::Mul)
        && node
            .children
            .iter()
            .all(|&c| matches!(tree.node(c).kind, NodeKind::Literal(Lit::Int(_))))
}

/// The constant a binop folds to at lowering time, `None` when it emits
/// a BINARY_OP instead (unfoldable operator, non-literal operand,
/// overflow).
pub fn folded_binop(tree: &Tree, node: &crate::tree::Node) -> Option<Const> {
    let op = match &node.kind {
        NodeKind::BinOp { op } => *op,
        _ => return None,
    };
    let left = literal_int(tree, node.children[0])?;
    let right = literal_int(tree, node.children[1])?;
    let value = match op {
        BinOpKind::Add => left.checked_add(right)?,
        BinOpKind::Sub => left.checked_sub(right)?,
        BinOpKind::Mul => left.checked_mul(right)?,
        BinOpKind::Div | BinOpKind::Mod => return None,
    };
    Some(Const::Int(value))
}

fn literal_int(tree: &Tree, id: NodeId) -> Option<i64> {
    match &tree.node(id).kind {
        NodeKind::Literal(Lit::Int(v)) => Some(*v),
        _ => None,
    }
}

/// The constant a tuple display folds to when its elements are all
/// literals (or such tuples); `None` when it builds at run time.
fn folded_tuple(tree: &Tree, node: &crate::tree::Node) -> Option<Const> {
    let mut items = Vec::with_capacity(node.children.len());
    for &c in &node.children {
        let child = tree.node(c);
        match &child.kind {
            NodeKind::Literal(lit) => items.push(Const::of_lit(lit)),
            NodeKind::Tuple { .. } => items.push(folded_tuple(tree, child)?),
            _ => return None,
        }
    }
    Some(Const::Tuple(items))
}

/// True when the node's parent folds, absorbing this node into the
/// parent's constant.
fn consumed_by_fold(tree: &Tree, node: &crate::tree::Node) -> bool {
    match node.parent {
        Some(p) => {
            let parent = tree.node(p);
            match &parent.kind {
                NodeKind::BinOp { op } => binop_folds(tree, parent, *op),
                NodeKind::Tuple { ctx: Ctx::Load } => folded_tuple(tree, parent).is_some(),
                _ => false,
            }
        }
        None => false,
    }
}

/// Count narrowing for display builders and calls: when the element or
/// argument count doesn't line up the node can't be the producer.
fn count_is(instr: &Instruction, node_count: usize) -> bool {
    match instr.argval {
        ArgVal::Count(n) => n as usize == node_count,
        _ => true,
    }
}

/// Fallback for a LOAD_CONST with no surviving candidate: if its position
/// matches an operator expression over literal operands, the compiler
/// folded it and the limitation is reported instead of an error.
pub fn folded_fallback(
    tree: &Tree,
    lines: &LineIndex,
    instr: &Instruction,
) -> Option<Limitation> {
    if instr.kind != OpKind::LoadConst {
        return None;
    }
    for (_, node) in tree.iter() {
        let is_binop = matches!(node.kind, NodeKind::BinOp { .. });
        if !is_binop || !all_literal_children(tree, node) {
            continue;
        }
        let position_matches = match instr.span {
            Some(span) => span == node.span,
            None => match instr.line {
                Some(line) => lines.line_of(node.span.start) == line,
                None => false,
            },
        };
        if position_matches {
            return Some(Limitation::ConstantFolded);
        }
    }
    None
}

fn all_literal_children(tree: &Tree, node: &crate::tree::Node) -> bool {
    node.children
        .iter()
        .all(|&c| matches!(tree.node(c).kind, NodeKind::Literal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CompiledUnit;
    use crate::lower;
    use crate::source::{self, SourceUnit};
    use std::sync::Arc;

    fn setup(text: &str, encoding: Encoding) -> (Arc<SourceUnit>, Arc<CompiledUnit>) {
        let src = source::for_text(text);
        let unit = lower::compile(&src, encoding).expect("parse failed");
        (src, unit)
    }

    fn find(unit: &CompiledUnit, kind: OpKind) -> Instruction {
        unit.decoded()
            .iter()
            .find(|i| i.kind == kind)
            .cloned()
            .unwrap_or_else(|| panic!("no {:?} in unit", kind))
    }

    #[test]
    fn load_const_narrows_by_value() {
        let (src, unit) = setup("probe(1, 2)", Encoding::V1);
        let tree = src.tree().unwrap();
        let loads: Vec<Instruction> = unit
            .decoded()
            .iter()
            .filter(|i| i.kind == OpKind::LoadConst && i.has_position())
            .cloned()
            .collect();
        assert_eq!(loads.len(), 2);
        for (load, text) in loads.iter().zip(["1", "2"]) {
            match candidates(tree, load, &unit) {
                Verdict::Candidates(ids) => {
                    assert_eq!(ids.len(), 1);
                    assert_eq!(tree.node_text(ids[0], &src.text), text);
                }
                other => panic!("expected candidates, got {:?}", other),
            }
        }
    }

    #[test]
    fn folded_tuple_display_claims_the_constant() {
        let (src, unit) = setup("t = ((1, 2), y)", Encoding::V1);
        let tree = src.tree().unwrap();
        // The inner display folds; its constant maps to the tuple node,
        // and the literals inside it map to nothing.
        let load = find(&unit, OpKind::LoadConst);
        match candidates(tree, &load, &unit) {
            Verdict::Candidates(ids) => {
                assert_eq!(ids.len(), 1);
                assert_eq!(tree.node_text(ids[0], &src.text), "(1, 2)");
            }
            other => panic!("expected candidates, got {:?}", other),
        }
        // The outer display builds; the folded inner one is not offered.
        let build = find(&unit, OpKind::BuildTuple);
        match candidates(tree, &build, &unit) {
            Verdict::Candidates(ids) => {
                assert_eq!(ids.len(), 1);
                assert_eq!(tree.node_text(ids[0], &src.text), "((1, 2), y)");
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn load_name_narrows_by_identifier() {
        let (src, unit) = setup("a = b\nc = b", Encoding::V1);
        let tree = src.tree().unwrap();
        let load = find(&unit, OpKind::LoadName);
        match candidates(tree, &load, &unit) {
            Verdict::Candidates(ids) => {
                assert_eq!(ids.len(), 2);
                for id in ids {
                    match &tree.node(id).kind {
                        NodeKind::Name { id: name, ctx } => {
                            assert_eq!(name, "b");
                            assert_eq!(*ctx, Ctx::Load);
                        }
                        other => panic!("wrong candidate kind: {:?}", other),
                    }
                }
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn store_name_includes_definitions() {
        let (src, unit) = setup("fn probe() {\n  return 1\n}", Encoding::V1);
        let tree = src.tree().unwrap();
        let store = find(&unit, OpKind::StoreName);
        match candidates(tree, &store, &unit) {
            Verdict::Candidates(ids) => {
                assert_eq!(ids.len(), 1);
                assert!(matches!(tree.node(ids[0]).kind, NodeKind::FnDef { .. }));
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn binary_op_separates_plain_and_inplace() {
        let (src, unit) = setup("a = b - c\na -= 1", Encoding::V1);
        let tree = src.tree().unwrap();
        let binops: Vec<Instruction> = unit
            .decoded()
            .iter()
            .filter(|i| i.kind == OpKind::BinaryOp)
            .cloned()
            .collect();
        assert_eq!(binops.len(), 2);
        for instr in &binops {
            match candidates(tree, instr, &unit) {
                Verdict::Candidates(ids) => {
                    assert_eq!(ids.len(), 1, "ambiguous for {:?}", instr.argval);
                    let kind = &tree.node(ids[0]).kind;
                    match instr.argval {
                        ArgVal::BinOp(_, true) => {
                            assert!(matches!(kind, NodeKind::AugAssign { .. }))
                        }
                        ArgVal::BinOp(_, false) => {
                            assert!(matches!(kind, NodeKind::BinOp { .. }))
                        }
                        _ => panic!("unexpected argval"),
                    }
                }
                other => panic!("expected candidates, got {:?}", other),
            }
        }
    }

    #[test]
    fn v1_format_string_internals_excluded() {
        let (src, unit) = setup(r#"m = f"v {x}""#, Encoding::V1);
        let tree = src.tree().unwrap();
        let build = find(&unit, OpKind::BuildString);
        assert_eq!(
            candidates(tree, &build, &unit),
            Verdict::Excluded(Limitation::FormatStringInternals)
        );
        let fv = find(&unit, OpKind::FormatValue);
        assert_eq!(
            candidates(tree, &fv, &unit),
            Verdict::Excluded(Limitation::FormatStringInternals)
        );
    }

    #[test]
    fn v2_format_string_maps() {
        let (src, unit) = setup(r#"m = f"v {x}""#, Encoding::V2);
        let tree = src.tree().unwrap();
        let build = find(&unit, OpKind::BuildString);
        match candidates(tree, &build, &unit) {
            Verdict::Candidates(ids) => assert_eq!(ids.len(), 1),
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn folded_branch_tests_excluded() {
        let (src, unit) = setup("if a is b { probe() }", Encoding::V1);
        let tree = src.tree().unwrap();
        let jump = find(&unit, OpKind::JumpIfIsFalse);
        assert_eq!(
            candidates(tree, &jump, &unit),
            Verdict::Excluded(Limitation::FoldedBranchTest)
        );
    }

    #[test]
    fn plumbing_never_maps() {
        let (src, unit) = setup("probe()", Encoding::V2);
        let tree = src.tree().unwrap();
        let pop = find(&unit, OpKind::PopTop);
        assert_eq!(candidates(tree, &pop, &unit), Verdict::NonMapping);
        let resume = find(&unit, OpKind::Resume);
        assert_eq!(candidates(tree, &resume, &unit), Verdict::NonMapping);
    }

    #[test]
    fn folded_fallback_spots_literal_arithmetic() {
        let (src, unit) = setup("x = 2 + 3", Encoding::V2);
        let tree = src.tree().unwrap();
        let load = find(&unit, OpKind::LoadConst);
        // The folded constant structurally matches no literal node.
        match candidates(tree, &load, &unit) {
            Verdict::Candidates(ids) => {
                let matched: Vec<_> = ids
                    .iter()
                    .filter(|&&id| tree.node(id).span == load.span.unwrap())
                    .collect();
                assert!(matched.is_empty());
            }
            other => panic!("expected candidates, got {:?}", other),
        }
        assert_eq!(
            folded_fallback(tree, src.lines(), &load),
            Some(Limitation::ConstantFolded)
        );
    }

    #[test]
    fn folded_fallback_ignores_plain_constants() {
        let (src, unit) = setup("x = 5", Encoding::V2);
        let tree = src.tree().unwrap();
        let load = find(&unit, OpKind::LoadConst);
        assert_eq!(folded_fallback(tree, src.lines(), &load), None);
    }
}
