// resolve.rs — Execution point resolution
//
// The pipeline: decode the instruction, fetch the source tree, filter
// structural candidates, narrow by position, then either verify the
// survivor or disambiguate the survivors. Outcomes (including failures)
// are cached on the unit; resolution is a pure function of the unit's
// identity and the offset, so a cached failure is as final as a cached
// node.

use std::sync::Arc;

use crate::bytecode::CompiledUnit;
use crate::decode::{ArgVal, Instruction, OpKind};
use crate::error::{Limitation, Resolution, ResolveError, UnresolvedReason};
use crate::filter::{self, Verdict};
use crate::position;
use crate::source::{self, LineIndex, SourceUnit};
use crate::tree::{NodeId, Tree};
use crate::verify;

/// A point of execution: a unit plus the byte offset of the instruction
/// the interpreter is about to run (or is blamed for a fault).
#[derive(Debug, Clone)]
pub struct ExecutionPoint {
    pub unit: Arc<CompiledUnit>,
    pub offset: u32,
}

impl ExecutionPoint {
    pub fn new(unit: Arc<CompiledUnit>, offset: u32) -> ExecutionPoint {
        ExecutionPoint { unit, offset }
    }
}

/// Resolve an execution point to its syntax node. Memoized per unit.
pub fn resolve(point: &ExecutionPoint) -> Result<Resolution, ResolveError> {
    if let Some(cached) = point.unit.cached(point.offset) {
        return cached;
    }
    let outcome = resolve_uncached(&point.unit, point.offset);
    point.unit.cache(point.offset, outcome.clone());
    outcome
}

fn resolve_uncached(unit: &CompiledUnit, offset: u32) -> Result<Resolution, ResolveError> {
    let instr = unit
        .decoded()
        .iter()
        .find(|i| i.offset == offset)
        .cloned()
        .ok_or(ResolveError::OffsetOutOfRange {
            offset,
            code_len: unit.code.len() as u32,
        })?;

    let src = match source::lookup(&unit.source_id) {
        Some(s) => s,
        None => return Ok(Resolution::Unresolved(UnresolvedReason::ParseUnavailable)),
    };
    let tree = match src.tree() {
        Some(t) => t,
        None => return Ok(Resolution::Unresolved(UnresolvedReason::ParseUnavailable)),
    };

    // Excluded kinds report their limitation even without a position;
    // the fold that produced them is exactly what erased it.
    if let Some(limitation) = filter::exclusion(instr.kind, unit.encoding) {
        return Ok(Resolution::Unresolved(UnresolvedReason::KnownLimitation(
            limitation,
        )));
    }
    if !instr.has_position() {
        return Ok(Resolution::Unresolved(UnresolvedReason::NoPosition));
    }

    let all = match filter::candidates(tree, &instr, unit) {
        Verdict::Excluded(limitation) => {
            return Ok(Resolution::Unresolved(UnresolvedReason::KnownLimitation(
                limitation,
            )))
        }
        Verdict::NonMapping => {
            return Ok(Resolution::Unresolved(UnresolvedReason::NoPosition))
        }
        Verdict::Candidates(ids) => ids,
    };

    let narrowed = position::narrow(tree, src.lines(), &instr, all);

    // A folded load shares line and interned constant with same-valued
    // literals; account for the folds before trusting a lone survivor.
    if !unit.encoding.has_spans() {
        if let Some(outcome) = align_folded_loads(unit, tree, src.lines(), &instr, &narrowed) {
            return outcome;
        }
    }

    match narrowed.len() {
        0 => {
            if let Some(limitation) = filter::folded_fallback(tree, src.lines(), &instr) {
                Ok(Resolution::Unresolved(UnresolvedReason::KnownLimitation(
                    limitation,
                )))
            } else {
                Err(ResolveError::NotOneValueFound {
                    offset,
                    candidates: 0,
                })
            }
        }
        1 => {
            let node = narrowed[0];
            check(unit, tree, &instr, node)?;
            Ok(Resolution::Node(node))
        }
        _ => {
            if unit.encoding.has_spans() {
                // Exact spans should not collide; when they do, trust a
                // candidate only if it alone survives verification.
                let verified: Vec<NodeId> = narrowed
                    .iter()
                    .copied()
                    .filter(|&id| verify::verify(unit, tree, &instr, id, unit.encoding).is_ok())
                    .collect();
                if verified.len() == 1 {
                    Ok(Resolution::Node(verified[0]))
                } else {
                    Err(ResolveError::NotOneValueFound {
                        offset,
                        candidates: narrowed.len(),
                    })
                }
            } else {
                // Line tables cannot tell structurally identical twins in
                // one statement apart; refusing beats guessing.
                if same_statement_identical(tree, &src, &narrowed) {
                    return Err(ResolveError::NotOneValueFound {
                        offset,
                        candidates: narrowed.len(),
                    });
                }
                let node = verify::align_ordinal(unit, tree, &instr, &narrowed)?;
                check(unit, tree, &instr, node)?;
                Ok(Resolution::Node(node))
            }
        }
    }
}

fn check(
    unit: &CompiledUnit,
    tree: &Tree,
    instr: &Instruction,
    node: NodeId,
) -> Result<(), ResolveError> {
    verify::verify(unit, tree, instr, node, unit.encoding).map_err(|reason| {
        ResolveError::Verification {
            offset: instr.offset,
            node,
            reason,
        }
    })
}

/// Line-table guard for constant loads: a folded operator expression
/// emits a LOAD_CONST of its value, and interning makes that load
/// indistinguishable by argval from a genuine literal of the same value
/// on the same line. When such peers outnumber the candidates, the
/// folded nodes must account for the surplus; pairing peers with the
/// merged list in emission order sends each extra load to its fold's
/// limitation instead of a literal's node. An unexplained surplus is
/// refused outright. `None` when peers and candidates already agree.
fn align_folded_loads(
    unit: &CompiledUnit,
    tree: &Tree,
    lines: &LineIndex,
    instr: &Instruction,
    narrowed: &[NodeId],
) -> Option<Result<Resolution, ResolveError>> {
    if instr.kind != OpKind::LoadConst {
        return None;
    }
    let peers: Vec<u32> = unit
        .decoded()
        .iter()
        .filter(|i| i.kind == instr.kind && i.line == instr.line && i.argval == instr.argval)
        .map(|i| i.offset)
        .collect();
    if peers.len() <= narrowed.len() {
        return None;
    }
    let value = match &instr.argval {
        ArgVal::Const(i) => unit.consts.get(*i as usize)?,
        _ => return None,
    };
    let folded: Vec<NodeId> = tree
        .iter()
        .filter(|(_, node)| {
            filter::folded_binop(tree, node).as_ref() == Some(value)
                && instr.line == Some(lines.line_of(node.span.start))
        })
        .map(|(id, _)| id)
        .collect();
    if narrowed.len() + folded.len() != peers.len() {
        return Some(Err(ResolveError::NotOneValueFound {
            offset: instr.offset,
            candidates: narrowed.len(),
        }));
    }
    let mut merged: Vec<NodeId> = narrowed.iter().chain(folded.iter()).copied().collect();
    merged.sort_by_key(|&id| {
        let span = tree.node(id).span;
        (span.end, std::cmp::Reverse(span.start))
    });
    let rank = peers.iter().position(|&o| o == instr.offset).unwrap_or(0);
    let id = merged[rank];
    if folded.contains(&id) {
        return Some(Ok(Resolution::Unresolved(UnresolvedReason::KnownLimitation(
            Limitation::ConstantFolded,
        ))));
    }
    Some(check(unit, tree, instr, id).map(|()| Resolution::Node(id)))
}

/// True when every candidate sits in the same statement and reads as the
/// same source text (e.g. the two targets of `a.b = a.b = 1`).
fn same_statement_identical(tree: &Tree, src: &SourceUnit, ids: &[NodeId]) -> bool {
    let stmt = tree.enclosing_statement(ids[0]);
    let text = tree.node_text(ids[0], &src.text);
    ids[1..].iter().all(|&id| {
        tree.enclosing_statement(id) == stmt && tree.node_text(id, &src.text) == text
    })
}
