// qualname.rs — Qualified scope names
//
// Derives dotted qualified names for every unit reachable from a module
// unit by replaying the creation triples lowering emits (LOAD_CONST
// unit, LOAD_CONST name, MAKE_FUNCTION). A MAKE_FUNCTION directly
// preceded by LOAD_BUILD_CLASS creates a class scope; children of a
// class join with `.`, children of a function with `.<locals>.`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bytecode::{CompiledUnit, Const};
use crate::decode::{ArgVal, OpKind};

#[derive(Clone, Copy)]
enum ScopeKind {
    Module,
    Function,
    Class,
}

/// Qualified names for a module unit and everything nested in it,
/// keyed by unit identity.
#[derive(Debug)]
pub struct QualnameTable {
    names: HashMap<u64, String>,
}

impl QualnameTable {
    pub fn build(module: &Arc<CompiledUnit>) -> QualnameTable {
        let mut names = HashMap::new();
        names.insert(module.id(), "<module>".to_string());
        walk(module, "", ScopeKind::Module, &mut names);
        QualnameTable { names }
    }

    /// The qualified name of a unit, if it is reachable from the module
    /// this table was built for.
    pub fn get(&self, unit: &CompiledUnit) -> Option<&str> {
        self.names.get(&unit.id()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn walk(
    unit: &Arc<CompiledUnit>,
    qual: &str,
    kind: ScopeKind,
    names: &mut HashMap<u64, String>,
) {
    let decoded = unit.decoded();
    for i in 2..decoded.len() {
        if decoded[i].kind != OpKind::MakeFunction {
            continue;
        }
        let child = match creation_unit(unit, &decoded[i - 2]) {
            Some(c) => c,
            None => continue,
        };
        let name = match creation_name(unit, &decoded[i - 1]) {
            Some(n) => n,
            None => continue,
        };
        let is_class = i >= 3 && decoded[i - 3].kind == OpKind::LoadBuildClass;
        let child_qual = match kind {
            ScopeKind::Module => name.to_string(),
            ScopeKind::Function => format!("{}.<locals>.{}", qual, name),
            ScopeKind::Class => format!("{}.{}", qual, name),
        };
        names.insert(child.id(), child_qual.clone());
        let child_kind = if is_class {
            ScopeKind::Class
        } else {
            ScopeKind::Function
        };
        walk(&child, &child_qual, child_kind, names);
    }
}

fn creation_unit(
    unit: &CompiledUnit,
    instr: &crate::decode::Instruction,
) -> Option<Arc<CompiledUnit>> {
    if instr.kind != OpKind::LoadConst {
        return None;
    }
    let idx = match instr.argval {
        ArgVal::Const(i) => i as usize,
        _ => return None,
    };
    match unit.consts.get(idx) {
        Some(Const::Unit(u)) => Some(Arc::clone(u)),
        _ => None,
    }
}

fn creation_name<'a>(unit: &'a CompiledUnit, instr: &crate::decode::Instruction) -> Option<&'a str> {
    if instr.kind != OpKind::LoadConst {
        return None;
    }
    let idx = match instr.argval {
        ArgVal::Const(i) => i as usize,
        _ => return None,
    };
    match unit.consts.get(idx) {
        Some(Const::Str(s)) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Encoding;
    use crate::lower;
    use crate::source;

    fn qualnames(text: &str, encoding: Encoding) -> (QualnameTable, Arc<CompiledUnit>) {
        let src = source::for_text(text);
        let module = lower::compile(&src, encoding).expect("parse failed");
        (QualnameTable::build(&module), module)
    }

    fn find_unit(unit: &Arc<CompiledUnit>, name: &str) -> Option<Arc<CompiledUnit>> {
        if unit.name == name {
            return Some(Arc::clone(unit));
        }
        for child in unit.child_units() {
            if let Some(found) = find_unit(child, name) {
                return Some(found);
            }
        }
        None
    }

    #[test]
    fn module_is_module() {
        let (table, module) = qualnames("x = 1", Encoding::V1);
        assert_eq!(table.get(&module), Some("<module>"));
    }

    #[test]
    fn nested_function_goes_through_locals() {
        let text = "fn f() {\n  fn g() {\n    return 1\n  }\n  return g\n}";
        for encoding in [Encoding::V1, Encoding::V2] {
            let (table, module) = qualnames(text, encoding);
            let f = find_unit(&module, "f").expect("f not compiled");
            let g = find_unit(&module, "g").expect("g not compiled");
            assert_eq!(table.get(&f), Some("f"));
            assert_eq!(table.get(&g), Some("f.<locals>.g"));
        }
    }

    #[test]
    fn class_methods_join_with_dot() {
        let text = "class A {\n  fn m() {\n    return 1\n  }\n}";
        let (table, module) = qualnames(text, Encoding::V2);
        let a = find_unit(&module, "A").expect("A not compiled");
        let m = find_unit(&module, "m").expect("m not compiled");
        assert_eq!(table.get(&a), Some("A"));
        assert_eq!(table.get(&m), Some("A.m"));
    }

    #[test]
    fn lambda_inside_function() {
        let text = "fn f() {\n  return fn(x) -> x\n}";
        let (table, module) = qualnames(text, Encoding::V1);
        let lam = find_unit(&module, "<lambda>").expect("lambda not compiled");
        assert_eq!(table.get(&lam), Some("f.<locals>.<lambda>"));
    }

    #[test]
    fn method_in_nested_class() {
        let text = "fn outer() {\n  class B {\n    fn m() {\n      return 1\n    }\n  }\n  return B\n}";
        let (table, module) = qualnames(text, Encoding::V2);
        let b = find_unit(&module, "B").expect("B not compiled");
        let m = find_unit(&module, "m").expect("m not compiled");
        assert_eq!(table.get(&b), Some("outer.<locals>.B"));
        assert_eq!(table.get(&m), Some("outer.<locals>.B.m"));
    }

    #[test]
    fn foreign_unit_is_unknown() {
        let (table, _) = qualnames("x = 1", Encoding::V1);
        let src = source::for_text("y = 2");
        let other = lower::compile(&src, Encoding::V1).unwrap();
        assert_eq!(table.get(&other), None);
    }
}
