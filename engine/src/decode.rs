// decode.rs — Instruction decoder
//
// Turns a unit's raw code bytes into a normalized instruction stream that
// the rest of the engine works with. Normalization hides the revision
// differences that do not affect meaning:
//
//   - EXTENDED_ARG prefixes fold into the following instruction's arg;
//   - quickened forms (BINARY_OP_ADD_INT etc.) map back to their generic
//     opcode with the equivalent operand code;
//   - name/const indices are materialized into `ArgVal`.
//
// Revision differences that DO affect meaning stay visible: V1's folded
// branch tests keep their own kinds, and positions come through as a line
// or an exact span per what the unit recorded.

use std::fmt;
use std::fmt::Write as _;

use crate::ast::Span;
use crate::bytecode::{self, CompiledUnit, RawOp};

// ── Normalized opcodes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    LoadConst,
    LoadName,
    StoreName,
    DeleteName,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
    LoadMethod,
    CallMethod,
    BinaryOp,
    UnaryOp,
    CompareOp,
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,
    Call,
    BuildList,
    BuildTuple,
    BuildMap,
    BuildString,
    FormatValue,
    UnpackSequence,
    MakeFunction,
    LoadBuildClass,
    Jump,
    PopJumpIfFalse,
    PopJumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    JumpIfIsFalse,
    JumpIfInFalse,
    PopTop,
    DupTop,
    ReturnValue,
    Nop,
    Resume,
    /// A byte with no opcode in the unit's revision. Never produced by
    /// the lowering pass; kept so decoding is total.
    Invalid,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::LoadConst => "LOAD_CONST",
            OpKind::LoadName => "LOAD_NAME",
            OpKind::StoreName => "STORE_NAME",
            OpKind::DeleteName => "DELETE_NAME",
            OpKind::LoadAttr => "LOAD_ATTR",
            OpKind::StoreAttr => "STORE_ATTR",
            OpKind::DeleteAttr => "DELETE_ATTR",
            OpKind::LoadMethod => "LOAD_METHOD",
            OpKind::CallMethod => "CALL_METHOD",
            OpKind::BinaryOp => "BINARY_OP",
            OpKind::UnaryOp => "UNARY_OP",
            OpKind::CompareOp => "COMPARE_OP",
            OpKind::BinarySubscr => "BINARY_SUBSCR",
            OpKind::StoreSubscr => "STORE_SUBSCR",
            OpKind::DeleteSubscr => "DELETE_SUBSCR",
            OpKind::Call => "CALL",
            OpKind::BuildList => "BUILD_LIST",
            OpKind::BuildTuple => "BUILD_TUPLE",
            OpKind::BuildMap => "BUILD_MAP",
            OpKind::BuildString => "BUILD_STRING",
            OpKind::FormatValue => "FORMAT_VALUE",
            OpKind::UnpackSequence => "UNPACK_SEQUENCE",
            OpKind::MakeFunction => "MAKE_FUNCTION",
            OpKind::LoadBuildClass => "LOAD_BUILD_CLASS",
            OpKind::Jump => "JUMP",
            OpKind::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            OpKind::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            OpKind::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            OpKind::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            OpKind::JumpIfIsFalse => "JUMP_IF_IS_FALSE",
            OpKind::JumpIfInFalse => "JUMP_IF_IN_FALSE",
            OpKind::PopTop => "POP_TOP",
            OpKind::DupTop => "DUP_TOP",
            OpKind::ReturnValue => "RETURN_VALUE",
            OpKind::Nop => "NOP",
            OpKind::Resume => "RESUME",
            OpKind::Invalid => "INVALID",
        };
        write!(f, "{}", s)
    }
}

/// Decoded meaning of an instruction's arg.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgVal {
    None,
    /// Index into the constant table.
    Const(u32),
    /// A resolved entry from the name table.
    Name(String),
    /// An element/argument count.
    Count(u32),
    /// Binary operator with inplace flag.
    BinOp(crate::ast::BinOpKind, bool),
    /// Comparison operator.
    Cmp(crate::ast::CmpKind),
    /// Branch target byte offset.
    Target(u32),
}

/// One normalized instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: OpKind,
    pub arg: u32,
    pub argval: ArgVal,
    /// Byte offset of the opcode pair (EXTENDED_ARG prefixes excluded;
    /// this is the offset an execution point reports).
    pub offset: u32,
    pub line: Option<u32>,
    pub span: Option<Span>,
}

impl Instruction {
    /// True when the instruction carries a source position at all.
    pub fn has_position(&self) -> bool {
        self.line.is_some() || self.span.is_some()
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────

/// Decode a unit's code into normalized instructions. Total: bytes that
/// decode to nothing become `OpKind::Invalid` rather than failing.
pub fn decode_unit(unit: &CompiledUnit) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(unit.code.len() / 2);
    let mut ext: u32 = 0;
    let mut i = 0;
    while i + 1 < unit.code.len() {
        let offset = i as u32;
        let byte = unit.code[i];
        let low = unit.code[i + 1] as u32;
        i += 2;

        let raw = RawOp::from_byte(byte, unit.encoding);
        if raw == Some(RawOp::ExtendedArg) {
            ext = (ext | low) << 8;
            continue;
        }
        let arg = ext | low;
        ext = 0;

        let (kind, arg) = normalize(raw, arg);
        let argval = arg_value(kind, arg, unit);
        out.push(Instruction {
            kind,
            arg,
            argval,
            offset,
            line: unit.line_at(offset),
            span: unit.span_at(offset),
        });
    }
    out
}

/// Map a raw opcode to its normalized kind, rewriting quickened forms
/// back to the generic opcode with the equivalent operand code.
fn normalize(raw: Option<RawOp>, arg: u32) -> (OpKind, u32) {
    use crate::ast::{BinOpKind, CmpKind};
    let raw = match raw {
        Some(r) => r,
        None => return (OpKind::Invalid, arg),
    };
    match raw {
        RawOp::BinaryOpAddInt => (OpKind::BinaryOp, bytecode::binop_code(BinOpKind::Add, false)),
        RawOp::BinaryOpMulInt => (OpKind::BinaryOp, bytecode::binop_code(BinOpKind::Mul, false)),
        RawOp::CompareOpIs => (OpKind::CompareOp, bytecode::cmp_code(CmpKind::Is)),
        RawOp::CompareOpIn => (OpKind::CompareOp, bytecode::cmp_code(CmpKind::In)),
        RawOp::LoadConst => (OpKind::LoadConst, arg),
        RawOp::LoadName => (OpKind::LoadName, arg),
        RawOp::StoreName => (OpKind::StoreName, arg),
        RawOp::DeleteName => (OpKind::DeleteName, arg),
        RawOp::LoadAttr => (OpKind::LoadAttr, arg),
        RawOp::StoreAttr => (OpKind::StoreAttr, arg),
        RawOp::DeleteAttr => (OpKind::DeleteAttr, arg),
        RawOp::LoadMethod => (OpKind::LoadMethod, arg),
        RawOp::CallMethod => (OpKind::CallMethod, arg),
        RawOp::BinaryOp => (OpKind::BinaryOp, arg),
        RawOp::UnaryOp => (OpKind::UnaryOp, arg),
        RawOp::CompareOp => (OpKind::CompareOp, arg),
        RawOp::BinarySubscr => (OpKind::BinarySubscr, arg),
        RawOp::StoreSubscr => (OpKind::StoreSubscr, arg),
        RawOp::DeleteSubscr => (OpKind::DeleteSubscr, arg),
        RawOp::Call => (OpKind::Call, arg),
        RawOp::BuildList => (OpKind::BuildList, arg),
        RawOp::BuildTuple => (OpKind::BuildTuple, arg),
        RawOp::BuildMap => (OpKind::BuildMap, arg),
        RawOp::BuildString => (OpKind::BuildString, arg),
        RawOp::FormatValue => (OpKind::FormatValue, arg),
        RawOp::UnpackSequence => (OpKind::UnpackSequence, arg),
        RawOp::MakeFunction => (OpKind::MakeFunction, arg),
        RawOp::LoadBuildClass => (OpKind::LoadBuildClass, arg),
        RawOp::Jump => (OpKind::Jump, arg),
        RawOp::PopJumpIfFalse => (OpKind::PopJumpIfFalse, arg),
        RawOp::PopJumpIfTrue => (OpKind::PopJumpIfTrue, arg),
        RawOp::JumpIfFalseOrPop => (OpKind::JumpIfFalseOrPop, arg),
        RawOp::JumpIfTrueOrPop => (OpKind::JumpIfTrueOrPop, arg),
        RawOp::JumpIfIsFalse => (OpKind::JumpIfIsFalse, arg),
        RawOp::JumpIfInFalse => (OpKind::JumpIfInFalse, arg),
        RawOp::PopTop => (OpKind::PopTop, arg),
        RawOp::DupTop => (OpKind::DupTop, arg),
        RawOp::ReturnValue => (OpKind::ReturnValue, arg),
        RawOp::Nop => (OpKind::Nop, arg),
        RawOp::Resume => (OpKind::Resume, arg),
        RawOp::ExtendedArg => (OpKind::Invalid, arg),
    }
}

fn arg_value(kind: OpKind, arg: u32, unit: &CompiledUnit) -> ArgVal {
    match kind {
        OpKind::LoadConst => ArgVal::Const(arg),
        OpKind::LoadName
        | OpKind::StoreName
        | OpKind::DeleteName
        | OpKind::LoadAttr
        | OpKind::StoreAttr
        | OpKind::DeleteAttr
        | OpKind::LoadMethod => match unit.names.get(arg as usize) {
            Some(name) => ArgVal::Name(name.clone()),
            None => ArgVal::None,
        },
        OpKind::Call
        | OpKind::CallMethod
        | OpKind::BuildList
        | OpKind::BuildTuple
        | OpKind::BuildMap
        | OpKind::BuildString
        | OpKind::UnpackSequence => ArgVal::Count(arg),
        OpKind::BinaryOp => match bytecode::binop_from_code(arg) {
            Some((op, inplace)) => ArgVal::BinOp(op, inplace),
            None => ArgVal::None,
        },
        OpKind::CompareOp => match bytecode::cmp_from_code(arg) {
            Some(op) => ArgVal::Cmp(op),
            None => ArgVal::None,
        },
        OpKind::Jump
        | OpKind::PopJumpIfFalse
        | OpKind::PopJumpIfTrue
        | OpKind::JumpIfFalseOrPop
        | OpKind::JumpIfTrueOrPop
        | OpKind::JumpIfIsFalse
        | OpKind::JumpIfInFalse => ArgVal::Target(arg),
        _ => ArgVal::None,
    }
}

// ── Stack effects ────────────────────────────────────────────────────────

/// (pops, pushes) for an instruction, on the straight-line path. Branch
/// instructions are modeled on their fall-through behavior; the verifier
/// replays linearly and only needs depth to stay consistent.
pub fn stack_effect(kind: OpKind, arg: u32) -> (u32, u32) {
    match kind {
        OpKind::LoadConst | OpKind::LoadName | OpKind::LoadBuildClass => (0, 1),
        OpKind::StoreName => (1, 0),
        OpKind::DeleteName => (0, 0),
        OpKind::LoadAttr => (1, 1),
        OpKind::StoreAttr => (2, 0),
        OpKind::DeleteAttr => (1, 0),
        // LOAD_METHOD pushes the bound method and the receiver.
        OpKind::LoadMethod => (1, 2),
        OpKind::CallMethod => (arg + 2, 1),
        OpKind::BinaryOp | OpKind::CompareOp | OpKind::BinarySubscr => (2, 1),
        OpKind::UnaryOp => (1, 1),
        OpKind::StoreSubscr => (3, 0),
        OpKind::DeleteSubscr => (2, 0),
        OpKind::Call => (arg + 1, 1),
        OpKind::BuildList | OpKind::BuildTuple | OpKind::BuildString => (arg, 1),
        OpKind::BuildMap => (arg * 2, 1),
        OpKind::FormatValue => (1, 1),
        OpKind::UnpackSequence => (1, arg),
        // MAKE_FUNCTION consumes the unit constant and the name.
        OpKind::MakeFunction => (2, 1),
        OpKind::PopJumpIfFalse | OpKind::PopJumpIfTrue => (1, 0),
        OpKind::JumpIfIsFalse | OpKind::JumpIfInFalse => (2, 0),
        // On fall-through the operand is popped.
        OpKind::JumpIfFalseOrPop | OpKind::JumpIfTrueOrPop => (1, 0),
        OpKind::PopTop => (1, 0),
        OpKind::DupTop => (1, 2),
        OpKind::ReturnValue => (1, 0),
        OpKind::Jump | OpKind::Nop | OpKind::Resume | OpKind::Invalid => (0, 0),
    }
}

// ── Disassembly ──────────────────────────────────────────────────────────

/// Human-readable listing of a unit and its nested units, for the CLI
/// and snapshot tests. Deterministic for a given unit.
pub fn disasm(unit: &CompiledUnit) -> String {
    let mut out = String::new();
    render(unit, &mut out);
    out
}

fn render(unit: &CompiledUnit, out: &mut String) {
    let _ = writeln!(out, "unit {} ({}):", unit.name, unit.encoding);
    for instr in unit.decoded() {
        let pos = match (instr.span, instr.line) {
            (Some(span), _) => format!("{}..{}", span.start, span.end),
            (None, Some(line)) => format!("line {}", line),
            (None, None) => "-".to_string(),
        };
        let val = match &instr.argval {
            ArgVal::None => String::new(),
            ArgVal::Const(i) => match unit.consts.get(*i as usize) {
                Some(c) => format!(" ({})", c),
                None => format!(" (const {})", i),
            },
            ArgVal::Name(name) => format!(" ({})", name),
            ArgVal::Count(n) => format!(" (n={})", n),
            ArgVal::BinOp(op, inplace) => {
                if *inplace {
                    format!(" ({:?}=)", op)
                } else {
                    format!(" ({:?})", op)
                }
            }
            ArgVal::Cmp(op) => format!(" ({:?})", op),
            ArgVal::Target(t) => format!(" (-> {})", t),
        };
        let _ = writeln!(
            out,
            "  {:>4}  {:<20} {:>3}{}  [{}]",
            instr.offset, instr.kind.to_string(), instr.arg, val, pos
        );
    }
    for child in unit.child_units() {
        let _ = writeln!(out);
        render(child, out);
    }
}
