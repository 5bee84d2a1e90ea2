// End-to-end pipeline tests through the public API: load a source file
// from disk, compile it for both revisions, and resolve execution points
// back to source text.

use std::path::PathBuf;
use std::sync::Arc;

use pinpoint::ast::BinOpKind;
use pinpoint::bytecode::{CompiledUnit, Encoding};
use pinpoint::decode::{ArgVal, OpKind};
use pinpoint::qualname::QualnameTable;
use pinpoint::resolve::ExecutionPoint;

const PROGRAM: &str = "\
# coding: utf-8
fn scale(values, factor) {
  total = 0
  i = 0
  while i < 3 {
    total += values[i] * factor
    i = i + 1
  }
  return total
}

class Meter {
  fn read(self) {
    return self.raw / 10
  }
}

m = Meter()
result = scale([1, 2, 3], m.read())
";

fn write_temp(name: &str, text: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pinpoint_it_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn offsets_of(unit: &CompiledUnit, kind: OpKind) -> Vec<u32> {
    unit.decoded()
        .iter()
        .filter(|i| i.kind == kind)
        .map(|i| i.offset)
        .collect()
}

fn resolved_text(src: &pinpoint::SourceUnit, unit: &Arc<CompiledUnit>, offset: u32) -> String {
    let point = ExecutionPoint::new(Arc::clone(unit), offset);
    let resolution = pinpoint::resolve(&point)
        .unwrap_or_else(|e| panic!("offset {} in {}: {}", offset, unit.name, e));
    let id = resolution
        .node()
        .unwrap_or_else(|| panic!("offset {} in {} unresolved", offset, unit.name));
    let tree = src.tree().unwrap();
    tree.node_text(id, &src.text).to_string()
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
fn program_resolves_from_disk_on_both_revisions() {
    let path = write_temp("program.mica", PROGRAM);
    let src = pinpoint::source::for_path(&path).expect("load failed");
    assert!(src.tree().is_some(), "program did not parse");

    for encoding in [Encoding::V1, Encoding::V2] {
        let module = pinpoint::lower::compile(&src, encoding).unwrap();
        let scale_unit = find_unit(&module, "scale").expect("scale not compiled");

        // Module level: every call site, plus the class-creation call
        // that resolves to the class definition itself.
        let mut call_offsets = offsets_of(&module, OpKind::Call);
        // V2 compiles m.read() through CALL_METHOD instead of CALL.
        call_offsets.extend(offsets_of(&module, OpKind::CallMethod));
        let texts: Vec<String> = call_offsets
            .iter()
            .map(|&o| resolved_text(&src, &module, o))
            .collect();
        assert_eq!(texts.len(), 4);
        assert!(texts.contains(&"Meter()".to_string()));
        assert!(texts.contains(&"m.read()".to_string()));
        assert!(texts.contains(&"scale([1, 2, 3], m.read())".to_string()));
        assert!(texts.iter().any(|t| t.starts_with("class Meter")));

        // Function level: subscript, comparison, augmented assignment.
        let sub = offsets_of(&scale_unit, OpKind::BinarySubscr);
        assert_eq!(sub.len(), 1);
        assert_eq!(resolved_text(&src, &scale_unit, sub[0]), "values[i]");

        let cmp = offsets_of(&scale_unit, OpKind::CompareOp);
        assert_eq!(cmp.len(), 1);
        assert_eq!(resolved_text(&src, &scale_unit, cmp[0]), "i < 3");

        let aug = scale_unit
            .decoded()
            .iter()
            .find(|i| matches!(i.argval, ArgVal::BinOp(_, true)))
            .map(|i| i.offset)
            .expect("no inplace binop");
        assert_eq!(
            resolved_text(&src, &scale_unit, aug),
            "total += values[i] * factor"
        );

        // Method level: the division inside Meter.read.
        let read_unit = find_unit(&module, "read").expect("read not compiled");
        let div = read_unit
            .decoded()
            .iter()
            .find(|i| matches!(i.argval, ArgVal::BinOp(BinOpKind::Div, false)))
            .map(|i| i.offset)
            .expect("no division");
        assert_eq!(resolved_text(&src, &read_unit, div), "self.raw / 10");
    }
}

#[test]
fn qualified_names_cover_every_unit() {
    let path = write_temp("qualnames.mica", PROGRAM);
    let src = pinpoint::source::for_path(&path).expect("load failed");
    let module = pinpoint::lower::compile(&src, Encoding::V2).unwrap();
    let table = QualnameTable::build(&module);

    assert_eq!(table.get(&module), Some("<module>"));
    let scale = find_unit(&module, "scale").unwrap();
    assert_eq!(table.get(&scale), Some("scale"));
    let meter = find_unit(&module, "Meter").unwrap();
    assert_eq!(table.get(&meter), Some("Meter"));
    let read = find_unit(&module, "read").unwrap();
    assert_eq!(table.get(&read), Some("Meter.read"));
    assert_eq!(table.len(), 4);
}

#[test]
fn revisions_agree_where_both_resolve() {
    let path = write_temp("agree.mica", PROGRAM);
    let src = pinpoint::source::for_path(&path).expect("load failed");
    let tree = src.tree().unwrap();

    let v1 = pinpoint::lower::compile(&src, Encoding::V1).unwrap();
    let v2 = pinpoint::lower::compile(&src, Encoding::V2).unwrap();

    for kind in [OpKind::BinarySubscr, OpKind::CompareOp] {
        let u1 = find_unit(&v1, "scale").unwrap();
        let u2 = find_unit(&v2, "scale").unwrap();
        let o1 = offsets_of(&u1, kind)[0];
        let o2 = offsets_of(&u2, kind)[0];
        let n1 = pinpoint::resolve(&ExecutionPoint::new(Arc::clone(&u1), o1))
            .unwrap()
            .node()
            .unwrap();
        let n2 = pinpoint::resolve(&ExecutionPoint::new(Arc::clone(&u2), o2))
            .unwrap()
            .node()
            .unwrap();
        assert_eq!(
            tree.node_text(n1, &src.text),
            tree.node_text(n2, &src.text),
            "revisions disagree on {:?}",
            kind
        );
    }
}

#[test]
fn broken_reload_reports_parse_unavailable() {
    // Compile the file, then break it on disk and reload: the stale
    // unit's source id now maps to text with no tree.
    let path = write_temp("broken.mica", "x = probe(1)\n");
    let src = pinpoint::source::for_path(&path).expect("load failed");
    let module = pinpoint::lower::compile(&src, Encoding::V1).unwrap();
    let call = offsets_of(&module, OpKind::Call)[0];

    std::fs::write(&path, "fn (((\n").unwrap();
    let reloaded = pinpoint::source::for_path(&path).expect("reload failed");
    assert!(reloaded.tree().is_none());

    let outcome = pinpoint::resolve(&ExecutionPoint::new(Arc::clone(&module), call));
    assert_eq!(
        outcome,
        Ok(pinpoint::Resolution::Unresolved(
            pinpoint::UnresolvedReason::ParseUnavailable
        ))
    );
}
