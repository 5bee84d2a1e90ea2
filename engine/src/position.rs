// position.rs — Position disambiguator
//
// Narrows a structural candidate set using whatever position information
// the unit's encoding recorded. With exact spans (V2) equality is
// decisive; with a line table (V1) the line keeps several candidates
// alive and the verifier's ordinal alignment gets the remainder.

use crate::decode::Instruction;
use crate::source::LineIndex;
use crate::tree::{NodeId, Tree};

/// Keep the candidates compatible with the instruction's position.
/// Span-bearing instructions demand span equality; line-bearing ones
/// demand the candidate start on that line.
pub fn narrow(
    tree: &Tree,
    lines: &LineIndex,
    instr: &Instruction,
    candidates: Vec<NodeId>,
) -> Vec<NodeId> {
    if let Some(span) = instr.span {
        return candidates
            .into_iter()
            .filter(|&id| tree.node(id).span == span)
            .collect();
    }
    if let Some(line) = instr.line {
        return candidates
            .into_iter()
            .filter(|&id| lines.line_of(tree.node(id).span.start) == line)
            .collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Encoding;
    use crate::decode::OpKind;
    use crate::filter::{self, Verdict};
    use crate::lower;
    use crate::source;

    #[test]
    fn span_equality_separates_identical_targets() {
        let text = "a.b = a.b = 1";
        let src = source::for_text(text);
        let tree = src.tree().unwrap();
        let unit = lower::compile(&src, Encoding::V2).unwrap();
        let stores: Vec<_> = unit
            .decoded()
            .iter()
            .filter(|i| i.kind == OpKind::StoreAttr)
            .cloned()
            .collect();
        assert_eq!(stores.len(), 2);
        for instr in &stores {
            let all = match filter::candidates(tree, instr, &unit) {
                Verdict::Candidates(ids) => ids,
                other => panic!("expected candidates, got {:?}", other),
            };
            assert_eq!(all.len(), 2);
            let narrowed = narrow(tree, src.lines(), instr, all);
            assert_eq!(narrowed.len(), 1);
            assert_eq!(tree.node(narrowed[0]).span, instr.span.unwrap());
        }
    }

    #[test]
    fn line_narrowing_keeps_same_line_candidates() {
        let text = "a = probe(1)\nb = probe(2)";
        let src = source::for_text(text);
        let tree = src.tree().unwrap();
        let unit = lower::compile(&src, Encoding::V1).unwrap();
        let call = unit
            .decoded()
            .iter()
            .find(|i| i.kind == OpKind::Call)
            .cloned()
            .unwrap();
        assert_eq!(call.line, Some(1));
        let all = match filter::candidates(tree, &call, &unit) {
            Verdict::Candidates(ids) => ids,
            other => panic!("expected candidates, got {:?}", other),
        };
        assert_eq!(all.len(), 2);
        let narrowed = narrow(tree, src.lines(), &call, all);
        assert_eq!(narrowed.len(), 1);
    }

}
