// error.rs — Resolution outcome and failure taxonomy
//
// Shared result types for the resolution pipeline. Lives apart from the
// pipeline so the bytecode layer can cache outcomes without depending on
// the resolver itself.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::tree::NodeId;

// ── Successful outcomes ──────────────────────────────────────────────────

/// The answer for an execution point that the engine handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The instruction maps to exactly this syntax node, verified.
    Node(NodeId),
    /// The instruction is genuine but deliberately carries no node.
    Unresolved(UnresolvedReason),
}

impl Resolution {
    /// The resolved node, if there is one.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Resolution::Node(id) => Some(*id),
            Resolution::Unresolved(_) => None,
        }
    }
}

/// Why an instruction is correctly answered with "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The source text did not parse; there is no tree to map into.
    ParseUnavailable,
    /// The instruction is compiler plumbing with no position entry.
    NoPosition,
    /// A documented encoding limitation covers this instruction.
    KnownLimitation(Limitation),
}

/// Encoding situations the engine declines to map rather than guess at.
/// Each variant is backed by an entry in the exclusion table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limitation {
    /// The operand was folded into a constant at compile time; the
    /// constant no longer corresponds to a single literal node.
    ConstantFolded,
    /// An identity/membership test folded into the branch instruction.
    FoldedBranchTest,
    /// A negated test folded into an inverted jump.
    NegatedBranchTest,
    /// Format-string plumbing on encodings without exact spans.
    FormatStringInternals,
}

impl fmt::Display for Limitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Limitation::ConstantFolded => "constant-folded expression",
            Limitation::FoldedBranchTest => "identity/membership test folded into branch",
            Limitation::NegatedBranchTest => "negated test folded into branch",
            Limitation::FormatStringInternals => "format-string internals",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::ParseUnavailable => write!(f, "source did not parse"),
            UnresolvedReason::NoPosition => write!(f, "instruction has no source position"),
            UnresolvedReason::KnownLimitation(lim) => write!(f, "known limitation: {}", lim),
        }
    }
}

// ── Failures ─────────────────────────────────────────────────────────────

/// Errors from resolving an execution point. These indicate that the
/// engine could not produce a trustworthy answer, as opposed to the
/// deliberate `Resolution::Unresolved` outcomes above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The offset does not address an instruction in the unit.
    OffsetOutOfRange { offset: u32, code_len: u32 },
    /// Candidate narrowing ended with zero or several nodes and no
    /// disambiguator could separate them.
    NotOneValueFound { offset: u32, candidates: usize },
    /// A sole surviving candidate failed bytecode verification. The
    /// mapping would have been a guess, so it is refused outright.
    Verification {
        offset: u32,
        node: NodeId,
        reason: VerifyReason,
    },
}

/// What the verifier found wrong with a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyReason {
    /// The instructions around the offset do not match the shape this
    /// node kind compiles to.
    ShapeMismatch { expected: String },
    /// Stack replay went negative or lacked operands at the offset.
    StackUnderflow { at: u32 },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::OffsetOutOfRange { offset, code_len } => {
                write!(
                    f,
                    "offset {} out of range for unit of {} bytes",
                    offset, code_len
                )
            }
            ResolveError::NotOneValueFound { offset, candidates } => {
                write!(
                    f,
                    "offset {}: expected exactly one matching node, found {}",
                    offset, candidates
                )
            }
            ResolveError::Verification {
                offset,
                node,
                reason,
            } => {
                write!(
                    f,
                    "offset {}: candidate node {} failed verification: {}",
                    offset, node.0, reason
                )
            }
        }
    }
}

impl fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyReason::ShapeMismatch { expected } => {
                write!(f, "instruction shape does not match (expected {})", expected)
            }
            VerifyReason::StackUnderflow { at } => {
                write!(f, "stack replay underflowed at offset {}", at)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_one_value() {
        let e = ResolveError::NotOneValueFound {
            offset: 12,
            candidates: 3,
        };
        assert_eq!(
            format!("{e}"),
            "offset 12: expected exactly one matching node, found 3"
        );
    }

    #[test]
    fn display_limitation() {
        let r = UnresolvedReason::KnownLimitation(Limitation::ConstantFolded);
        assert_eq!(format!("{r}"), "known limitation: constant-folded expression");
    }

    #[test]
    fn resolution_node_accessor() {
        assert_eq!(Resolution::Node(NodeId(4)).node(), Some(NodeId(4)));
        assert_eq!(
            Resolution::Unresolved(UnresolvedReason::NoPosition).node(),
            None
        );
    }
}
