// verify.rs — Bytecode verification
//
// Cross-checks a proposed (instruction, node) pairing against what the
// lowering pass would actually emit for that node, instead of trusting
// position data alone. Two checks:
//
//   shape  — the instruction kind must be one of the node's own-emission
//            opcodes (the ops lowered with that node's span);
//   stack  — replaying stack depth from the unit start must stay
//            non-negative and leave enough operands at the offset.
//
// The module also owns ordinal alignment, the line-table fallback: when
// a line keeps several same-shaped candidates alive, instruction order
// within the line is matched against source order within the line.

use crate::bytecode::{CompiledUnit, Encoding};
use crate::decode::{stack_effect, Instruction, OpKind};
use crate::error::{ResolveError, VerifyReason};
use crate::source::LineIndex;
use crate::tree::{Ctx, NodeId, NodeKind, Tree};

/// The opcodes lowering emits with this node's own span, in emission
/// order. Empty for nodes that never carry an instruction (short-circuit
/// operators, plain statements, parameters).
pub fn expected_ops(tree: &Tree, id: NodeId, encoding: Encoding) -> Vec<OpKind> {
    let node = tree.node(id);
    match &node.kind {
        NodeKind::Literal(_) => vec![OpKind::LoadConst],
        NodeKind::Name { ctx, .. } => match ctx {
            Ctx::Load => vec![OpKind::LoadName],
            Ctx::Store => {
                if parent_is(tree, node.parent, |k| matches!(k, NodeKind::AugAssign { .. })) {
                    // Read-modify-write target.
                    vec![OpKind::LoadName, OpKind::StoreName]
                } else {
                    vec![OpKind::StoreName]
                }
            }
            Ctx::Del => vec![OpKind::DeleteName],
        },
        NodeKind::Tuple { ctx } => match ctx {
            Ctx::Load => {
                if all_literal(tree, id) {
                    vec![OpKind::LoadConst]
                } else {
                    vec![OpKind::BuildTuple]
                }
            }
            Ctx::Store => vec![OpKind::UnpackSequence],
            // Deletions distribute over the elements.
            Ctx::Del => vec![],
        },
        NodeKind::List => vec![OpKind::BuildList],
        NodeKind::Dict => vec![OpKind::BuildMap],
        NodeKind::BinOp { .. } => {
            if folds_to_const(tree, id) {
                vec![OpKind::LoadConst]
            } else {
                vec![OpKind::BinaryOp]
            }
        }
        NodeKind::UnaryOp { .. } => vec![OpKind::UnaryOp],
        NodeKind::BoolOp { .. } => vec![],
        NodeKind::Compare { .. } => vec![OpKind::CompareOp],
        NodeKind::Call => {
            if is_method_call(tree, id) && encoding == Encoding::V2 {
                vec![OpKind::CallMethod]
            } else {
                vec![OpKind::Call]
            }
        }
        NodeKind::Attribute { ctx, .. } => match ctx {
            Ctx::Load => {
                if is_method_receiver(tree, id, node.parent) && encoding == Encoding::V2 {
                    vec![OpKind::LoadMethod]
                } else {
                    vec![OpKind::LoadAttr]
                }
            }
            Ctx::Store => vec![OpKind::StoreAttr],
            Ctx::Del => vec![OpKind::DeleteAttr],
        },
        NodeKind::Subscript { ctx } => match ctx {
            Ctx::Load => vec![OpKind::BinarySubscr],
            Ctx::Store => vec![OpKind::StoreSubscr],
            Ctx::Del => vec![OpKind::DeleteSubscr],
        },
        NodeKind::Lambda { .. } => vec![OpKind::MakeFunction],
        NodeKind::FnDef { .. } => vec![OpKind::MakeFunction, OpKind::StoreName],
        NodeKind::ClassDef { .. } => vec![
            OpKind::LoadBuildClass,
            OpKind::MakeFunction,
            OpKind::Call,
            OpKind::StoreName,
        ],
        NodeKind::AugAssign { .. } => vec![OpKind::BinaryOp],
        NodeKind::Return { .. } => vec![OpKind::ReturnValue],
        NodeKind::FString { .. } => vec![OpKind::BuildString],
        NodeKind::FormatField => vec![OpKind::FormatValue],
        NodeKind::Module
        | NodeKind::Param { .. }
        | NodeKind::Assign { .. }
        | NodeKind::Delete
        | NodeKind::If { .. }
        | NodeKind::While
        | NodeKind::ExprStmt => vec![],
    }
}

/// Verify a proposed pairing. `Ok` means the mapping is trustworthy.
pub fn verify(
    unit: &CompiledUnit,
    tree: &Tree,
    instr: &Instruction,
    node: NodeId,
    encoding: Encoding,
) -> Result<(), VerifyReason> {
    let expected = expected_ops(tree, node, encoding);
    if !expected.contains(&instr.kind) {
        return Err(VerifyReason::ShapeMismatch {
            expected: describe(&expected),
        });
    }
    replay_stack(unit, instr)
}

fn describe(ops: &[OpKind]) -> String {
    if ops.is_empty() {
        return "no instruction".to_string();
    }
    ops.iter()
        .map(|op| op.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Linear stack-depth replay up to (and including the pops of) the
/// target instruction. Emission keeps straight-line depth balanced, so
/// branches need no special casing here.
fn replay_stack(unit: &CompiledUnit, target: &Instruction) -> Result<(), VerifyReason> {
    let mut depth: i64 = 0;
    for instr in unit.decoded() {
        let (pops, pushes) = stack_effect(instr.kind, instr.arg);
        if depth < pops as i64 {
            return Err(VerifyReason::StackUnderflow { at: instr.offset });
        }
        if instr.offset == target.offset {
            return Ok(());
        }
        depth += pushes as i64 - pops as i64;
    }
    // Offset not found in the stream; resolve catches this earlier.
    Err(VerifyReason::StackUnderflow { at: target.offset })
}

/// Line-table fallback: rank the instruction among its same-line,
/// same-shape peers and pair ranks with candidates in emission order.
/// Emission completes inner expressions before outer ones, so the order
/// is span end ascending with later starts breaking ties (post-order),
/// which coincides with source order for disjoint candidates. A count
/// mismatch means the correspondence broke down somewhere and no
/// candidate can be trusted.
pub fn align_ordinal(
    unit: &CompiledUnit,
    tree: &Tree,
    instr: &Instruction,
    candidates: &[NodeId],
) -> Result<NodeId, ResolveError> {
    let peers: Vec<&Instruction> = unit
        .decoded()
        .iter()
        .filter(|i| i.kind == instr.kind && i.line == instr.line && i.argval == instr.argval)
        .collect();
    let rank = peers
        .iter()
        .position(|i| i.offset == instr.offset)
        .unwrap_or(0);

    if peers.len() != candidates.len() {
        return Err(ResolveError::NotOneValueFound {
            offset: instr.offset,
            candidates: candidates.len(),
        });
    }

    let mut ordered: Vec<NodeId> = candidates.to_vec();
    ordered.sort_by_key(|&id| {
        let span = tree.node(id).span;
        (span.end, std::cmp::Reverse(span.start))
    });
    Ok(ordered[rank])
}

// ── Node shape helpers ──

fn parent_is(tree: &Tree, parent: Option<NodeId>, pred: impl Fn(&NodeKind) -> bool) -> bool {
    parent.map(|p| pred(&tree.node(p).kind)).unwrap_or(false)
}

fn all_literal(tree: &Tree, id: NodeId) -> bool {
    tree.node(id).children.iter().all(|&c| {
        matches!(tree.node(c).kind, NodeKind::Literal(_))
            || (matches!(tree.node(c).kind, NodeKind::Tuple { .. }) && all_literal(tree, c))
    })
}

fn folds_to_const(tree: &Tree, id: NodeId) -> bool {
    let node = tree.node(id);
    let foldable_op = matches!(
        node.kind,
        NodeKind::BinOp {
            op: crate::ast::BinOpKind::Add
                | crate::ast::BinOpKind::Sub
                | crate::ast::BinOpKind::Mul
        }
    );
    foldable_op
        && node.children.iter().all(|&c| {
            matches!(
                tree.node(c).kind,
                NodeKind::Literal(crate::ast::Lit::Int(_))
            )
        })
}

/// A call whose callee is a load-context attribute.
fn is_method_call(tree: &Tree, id: NodeId) -> bool {
    let node = tree.node(id);
    if !matches!(node.kind, NodeKind::Call) {
        return false;
    }
    matches!(
        tree.node(node.children[0]).kind,
        NodeKind::Attribute { ctx: Ctx::Load, .. }
    )
}

/// An attribute that is the callee of its parent call.
fn is_method_receiver(tree: &Tree, id: NodeId, parent: Option<NodeId>) -> bool {
    match parent {
        Some(p) => {
            let pnode = tree.node(p);
            matches!(pnode.kind, NodeKind::Call) && pnode.children.first() == Some(&id)
        }
        None => false,
    }
}
