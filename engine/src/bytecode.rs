// bytecode.rs — Compiled units and the raw instruction encodings
//
// A `CompiledUnit` is an immutable compiled scope: code bytes, constant
// and name tables, and per-instruction position side tables. Two encoding
// revisions exist and differ in opcode numbering, position fidelity, and
// specialization:
//
//   V1 — line-table positions only; identity/membership tests fold into
//        dedicated branch opcodes; attribute calls stay LOAD_ATTR + CALL.
//   V2 — exact byte-span positions; common int arithmetic is quickened
//        into specialized opcodes; attribute calls collapse into
//        LOAD_METHOD + CALL_METHOD; units start with RESUME.
//
// Code is a sequence of 2-byte (opcode, arg) pairs. Args wider than a
// byte are carried by EXTENDED_ARG prefix pairs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::ast::{BinOpKind, CmpKind, Span};
use crate::decode::Instruction;
use crate::error::{Resolution, ResolveError};

// ── Encoding revision ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    V1,
    V2,
}

impl Encoding {
    /// True when instructions carry exact byte spans.
    pub fn has_spans(self) -> bool {
        matches!(self, Encoding::V2)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::V1 => write!(f, "v1"),
            Encoding::V2 => write!(f, "v2"),
        }
    }
}

// ── Raw opcodes ──────────────────────────────────────────────────────────

/// Assembly-level opcodes, the union over both revisions. The byte value
/// of each opcode differs per revision (see the numbering tables below),
/// and some opcodes exist in only one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawOp {
    LoadConst,
    LoadName,
    StoreName,
    DeleteName,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
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
    PopTop,
    DupTop,
    ReturnValue,
    Nop,
    ExtendedArg,
    // V1 only: comparison folded into the branch.
    JumpIfIsFalse,
    JumpIfInFalse,
    // V2 only.
    Resume,
    LoadMethod,
    CallMethod,
    BinaryOpAddInt,
    BinaryOpMulInt,
    CompareOpIs,
    CompareOpIn,
}

/// V1 opcode numbering. Dense from 1; 0 is reserved as invalid.
const V1_OPS: &[(u8, RawOp)] = &[
    (1, RawOp::LoadConst),
    (2, RawOp::LoadName),
    (3, RawOp::StoreName),
    (4, RawOp::DeleteName),
    (5, RawOp::LoadAttr),
    (6, RawOp::StoreAttr),
    (7, RawOp::DeleteAttr),
    (8, RawOp::BinaryOp),
    (9, RawOp::UnaryOp),
    (10, RawOp::CompareOp),
    (11, RawOp::BinarySubscr),
    (12, RawOp::StoreSubscr),
    (13, RawOp::DeleteSubscr),
    (14, RawOp::Call),
    (15, RawOp::BuildList),
    (16, RawOp::BuildTuple),
    (17, RawOp::BuildMap),
    (18, RawOp::BuildString),
    (19, RawOp::FormatValue),
    (20, RawOp::UnpackSequence),
    (21, RawOp::MakeFunction),
    (22, RawOp::LoadBuildClass),
    (23, RawOp::Jump),
    (24, RawOp::PopJumpIfFalse),
    (25, RawOp::PopJumpIfTrue),
    (26, RawOp::JumpIfFalseOrPop),
    (27, RawOp::JumpIfTrueOrPop),
    (28, RawOp::JumpIfIsFalse),
    (29, RawOp::JumpIfInFalse),
    (30, RawOp::PopTop),
    (31, RawOp::DupTop),
    (32, RawOp::ReturnValue),
    (33, RawOp::Nop),
    (34, RawOp::ExtendedArg),
];

/// V2 opcode numbering. Renumbered wholesale relative to V1 (the point of
/// modeling two revisions is that byte values cannot be shared).
const V2_OPS: &[(u8, RawOp)] = &[
    (80, RawOp::Resume),
    (81, RawOp::LoadConst),
    (82, RawOp::LoadName),
    (83, RawOp::StoreName),
    (84, RawOp::DeleteName),
    (85, RawOp::LoadAttr),
    (86, RawOp::StoreAttr),
    (87, RawOp::DeleteAttr),
    (88, RawOp::LoadMethod),
    (89, RawOp::CallMethod),
    (90, RawOp::BinaryOp),
    (91, RawOp::BinaryOpAddInt),
    (92, RawOp::BinaryOpMulInt),
    (93, RawOp::UnaryOp),
    (94, RawOp::CompareOp),
    (95, RawOp::CompareOpIs),
    (96, RawOp::CompareOpIn),
    (97, RawOp::BinarySubscr),
    (98, RawOp::StoreSubscr),
    (99, RawOp::DeleteSubscr),
    (100, RawOp::Call),
    (101, RawOp::BuildList),
    (102, RawOp::BuildTuple),
    (103, RawOp::BuildMap),
    (104, RawOp::BuildString),
    (105, RawOp::FormatValue),
    (106, RawOp::UnpackSequence),
    (107, RawOp::MakeFunction),
    (108, RawOp::LoadBuildClass),
    (109, RawOp::Jump),
    (110, RawOp::PopJumpIfFalse),
    (111, RawOp::PopJumpIfTrue),
    (112, RawOp::JumpIfFalseOrPop),
    (113, RawOp::JumpIfTrueOrPop),
    (114, RawOp::PopTop),
    (115, RawOp::DupTop),
    (116, RawOp::ReturnValue),
    (117, RawOp::Nop),
    (118, RawOp::ExtendedArg),
];

fn numbering(encoding: Encoding) -> &'static [(u8, RawOp)] {
    match encoding {
        Encoding::V1 => V1_OPS,
        Encoding::V2 => V2_OPS,
    }
}

impl RawOp {
    /// Byte value of this opcode in the given revision. `None` when the
    /// opcode does not exist there.
    pub fn byte(self, encoding: Encoding) -> Option<u8> {
        numbering(encoding)
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(b, _)| *b)
    }

    /// Decode a byte back to an opcode under the given revision.
    pub fn from_byte(byte: u8, encoding: Encoding) -> Option<RawOp> {
        numbering(encoding)
            .iter()
            .find(|(b, _)| *b == byte)
            .map(|(_, op)| *op)
    }
}

// ── Operand sub-codes ────────────────────────────────────────────────────

/// Inplace flag carried in a BINARY_OP arg, for augmented assignments.
pub const BINOP_INPLACE: u32 = 0x08;

pub fn binop_code(op: BinOpKind, inplace: bool) -> u32 {
    let base = match op {
        BinOpKind::Add => 0,
        BinOpKind::Sub => 1,
        BinOpKind::Mul => 2,
        BinOpKind::Div => 3,
        BinOpKind::Mod => 4,
    };
    if inplace {
        base | BINOP_INPLACE
    } else {
        base
    }
}

pub fn binop_from_code(code: u32) -> Option<(BinOpKind, bool)> {
    let inplace = code & BINOP_INPLACE != 0;
    let op = match code & !BINOP_INPLACE {
        0 => BinOpKind::Add,
        1 => BinOpKind::Sub,
        2 => BinOpKind::Mul,
        3 => BinOpKind::Div,
        4 => BinOpKind::Mod,
        _ => return None,
    };
    Some((op, inplace))
}

pub fn cmp_code(op: CmpKind) -> u32 {
    match op {
        CmpKind::Eq => 0,
        CmpKind::Ne => 1,
        CmpKind::Lt => 2,
        CmpKind::Le => 3,
        CmpKind::Gt => 4,
        CmpKind::Ge => 5,
        CmpKind::Is => 6,
        CmpKind::In => 7,
    }
}

pub fn cmp_from_code(code: u32) -> Option<CmpKind> {
    Some(match code {
        0 => CmpKind::Eq,
        1 => CmpKind::Ne,
        2 => CmpKind::Lt,
        3 => CmpKind::Le,
        4 => CmpKind::Gt,
        5 => CmpKind::Ge,
        6 => CmpKind::Is,
        7 => CmpKind::In,
        _ => return None,
    })
}

// ── Constants ────────────────────────────────────────────────────────────

/// A value in a unit's constant table. Nested units appear here the same
/// way any other constant does.
#[derive(Debug, Clone)]
pub enum Const {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
    Tuple(Vec<Const>),
    Unit(Arc<CompiledUnit>),
}

impl Const {
    /// The constant a literal lowers to.
    pub fn of_lit(lit: &crate::ast::Lit) -> Const {
        use crate::ast::Lit;
        match lit {
            Lit::Int(v) => Const::Int(*v),
            Lit::Float(v) => Const::Float(*v),
            Lit::Str(v) => Const::Str(v.clone()),
            Lit::Bool(v) => Const::Bool(*v),
            Lit::Nil => Const::Nil,
        }
    }
}

impl PartialEq for Const {
    fn eq(&self, other: &Const) -> bool {
        match (self, other) {
            (Const::Int(a), Const::Int(b)) => a == b,
            (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
            (Const::Str(a), Const::Str(b)) => a == b,
            (Const::Bool(a), Const::Bool(b)) => a == b,
            (Const::Nil, Const::Nil) => true,
            (Const::Tuple(a), Const::Tuple(b)) => a == b,
            // Units are identity-compared; two scopes never dedupe.
            (Const::Unit(a), Const::Unit(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{}", v),
            Const::Float(v) => write!(f, "{}", v),
            Const::Str(v) => write!(f, "{:?}", v),
            Const::Bool(v) => write!(f, "{}", v),
            Const::Nil => write!(f, "nil"),
            Const::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Const::Unit(unit) => write!(f, "<unit {}>", unit.name),
        }
    }
}

// ── Compiled unit ────────────────────────────────────────────────────────

/// An immutable compiled scope. Identity (`id`) distinguishes units even
/// when their code bytes coincide; the resolution cache is keyed on it
/// implicitly by living inside the unit.
pub struct CompiledUnit {
    id: u64,
    /// Scope name: function/class name, `<lambda>`, or `<module>`.
    pub name: String,
    /// Registry id of the source this unit was compiled from.
    pub source_id: String,
    pub encoding: Encoding,
    pub code: Vec<u8>,
    pub consts: Vec<Const>,
    pub names: Vec<String>,
    /// Line per instruction pair, indexed by `offset / 2`. `None` marks
    /// compiler plumbing with no source position.
    lines: Vec<Option<u32>>,
    /// Exact spans per instruction pair (V2 only; empty on V1).
    spans: Vec<Option<Span>>,
    decoded: OnceLock<Vec<Instruction>>,
    results: Mutex<HashMap<u32, Result<Resolution, ResolveError>>>,
}

impl CompiledUnit {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Normalized instructions, decoded once on first use.
    pub fn decoded(&self) -> &[Instruction] {
        self.decoded
            .get_or_init(|| crate::decode::decode_unit(self))
    }

    /// Position line for the instruction pair at `offset`.
    pub fn line_at(&self, offset: u32) -> Option<u32> {
        self.lines.get(offset as usize / 2).copied().flatten()
    }

    /// Exact span for the instruction pair at `offset` (V2 only).
    pub fn span_at(&self, offset: u32) -> Option<Span> {
        self.spans.get(offset as usize / 2).copied().flatten()
    }

    /// Cached resolution outcome for an offset, if one exists.
    pub fn cached(&self, offset: u32) -> Option<Result<Resolution, ResolveError>> {
        lock(&self.results).get(&offset).cloned()
    }

    /// Record an outcome. Resolution is a pure function of (unit, offset),
    /// so failures are cached as firmly as successes.
    pub fn cache(&self, offset: u32, outcome: Result<Resolution, ResolveError>) {
        lock(&self.results).insert(offset, outcome);
    }

    /// Nested units in constant-table order.
    pub fn child_units(&self) -> impl Iterator<Item = &Arc<CompiledUnit>> {
        self.consts.iter().filter_map(|c| match c {
            Const::Unit(u) => Some(u),
            _ => None,
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("encoding", &self.encoding)
            .field("code_len", &self.code.len())
            .finish()
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Source position attached to an emitted instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pos {
    /// No position: compiler plumbing.
    None,
    /// A node's span and its starting line. The builder records the
    /// exact span on V2 and only the line on V1.
    At { span: Span, line: u32 },
}

/// Accumulates one unit's code and tables, then freezes into an
/// `Arc<CompiledUnit>`. Jump targets are patched through handles so the
/// lowering pass can emit forward branches.
pub struct UnitBuilder {
    name: String,
    source_id: String,
    encoding: Encoding,
    code: Vec<u8>,
    consts: Vec<Const>,
    names: Vec<String>,
    lines: Vec<Option<u32>>,
    spans: Vec<Option<Span>>,
}

/// Handle to a jump emitted with a placeholder target.
#[derive(Debug, Clone, Copy)]
pub struct JumpPatch {
    /// Byte index of the EXTENDED_ARG pair that precedes the jump pair.
    prefix_at: usize,
}

impl UnitBuilder {
    pub fn new(
        name: impl Into<String>,
        source_id: impl Into<String>,
        encoding: Encoding,
    ) -> UnitBuilder {
        UnitBuilder {
            name: name.into(),
            source_id: source_id.into(),
            encoding,
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            lines: Vec::new(),
            spans: Vec::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Current byte offset; the offset the next emitted pair will get.
    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Intern a constant, reusing an existing equal entry.
    pub fn add_const(&mut self, value: Const) -> u32 {
        if let Some(i) = self.consts.iter().position(|c| *c == value) {
            return i as u32;
        }
        self.consts.push(value);
        self.consts.len() as u32 - 1
    }

    /// Intern a name.
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            return i as u32;
        }
        self.names.push(name.to_string());
        self.names.len() as u32 - 1
    }

    /// Emit one instruction, with EXTENDED_ARG prefixes as needed.
    /// Returns the byte offset of the actual opcode pair.
    pub fn emit(&mut self, op: RawOp, arg: u32, pos: Pos) -> u32 {
        debug_assert!(
            op.byte(self.encoding).is_some(),
            "{:?} does not exist in {}",
            op,
            self.encoding
        );
        let ext = RawOp::ExtendedArg.byte(self.encoding).unwrap_or(0);
        let mut shift = 24;
        let mut seen = false;
        while shift > 0 {
            let part = (arg >> shift) & 0xFF;
            if part != 0 || seen {
                self.push_pair(ext, part as u8, pos);
                seen = true;
            }
            shift -= 8;
        }
        let offset = self.here();
        let byte = op.byte(self.encoding).unwrap_or(0);
        self.push_pair(byte, (arg & 0xFF) as u8, pos);
        offset
    }

    /// Emit a branch with a placeholder target, fixed-width so the patch
    /// never has to move code. Targets up to 65535 are representable.
    pub fn emit_jump(&mut self, op: RawOp, pos: Pos) -> JumpPatch {
        let ext = RawOp::ExtendedArg.byte(self.encoding).unwrap_or(0);
        let prefix_at = self.code.len();
        self.push_pair(ext, 0, pos);
        let byte = op.byte(self.encoding).unwrap_or(0);
        self.push_pair(byte, 0, pos);
        JumpPatch { prefix_at }
    }

    /// Point a previously emitted branch at the current offset.
    pub fn patch_jump(&mut self, patch: JumpPatch) {
        let target = self.here();
        self.patch_jump_to(patch, target);
    }

    /// Point a previously emitted branch at an explicit target.
    pub fn patch_jump_to(&mut self, patch: JumpPatch, target: u32) {
        debug_assert!(
            target <= 0xFFFF,
            "jump target {} exceeds the fixed-width patch slot",
            target
        );
        self.code[patch.prefix_at + 1] = (target >> 8) as u8;
        self.code[patch.prefix_at + 3] = (target & 0xFF) as u8;
    }

    fn push_pair(&mut self, op: u8, arg: u8, pos: Pos) {
        self.code.push(op);
        self.code.push(arg);
        match pos {
            Pos::None => {
                self.lines.push(None);
                self.spans.push(None);
            }
            Pos::At { span, line } => {
                self.lines.push(Some(line));
                self.spans.push(if self.encoding.has_spans() {
                    Some(span)
                } else {
                    None
                });
            }
        }
    }

    pub fn finish(self) -> Arc<CompiledUnit> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Arc::new(CompiledUnit {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            source_id: self.source_id,
            encoding: self.encoding,
            code: self.code,
            consts: self.consts,
            names: self.names,
            lines: self.lines,
            spans: if self.encoding.has_spans() {
                self.spans
            } else {
                Vec::new()
            },
            decoded: OnceLock::new(),
            results: Mutex::new(HashMap::new()),
        })
    }
}
