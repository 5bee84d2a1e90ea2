use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use pinpoint::bytecode::CompiledUnit;
use pinpoint::error::{Resolution, UnresolvedReason};
use pinpoint::qualname::QualnameTable;
use pinpoint::resolve::ExecutionPoint;
use pinpoint::Encoding;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Resolve,
    Disasm,
    Qualnames,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum Revision {
    V1,
    V2,
}

#[derive(Parser, Debug)]
#[command(
    name = "pinpoint",
    version,
    about = "Maps execution points in compiled .mica units back to the exact source syntax node"
)]
struct Cli {
    /// Input .mica source file
    source: PathBuf,

    /// Bytecode revision to compile for
    #[arg(long, value_enum, default_value_t = Revision::V2)]
    revision: Revision,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Resolve)]
    emit: EmitStage,

    /// Resolve only this instruction offset in the module unit
    #[arg(long)]
    offset: Option<u32>,

    /// Emit machine-readable JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Print compilation stages and unit counts
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct ResolveRecord {
    unit: String,
    offset: u32,
    op: String,
    line: Option<u32>,
    outcome: String,
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct QualnameRecord {
    unit: String,
    qualname: String,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("pinpoint: source   = {}", cli.source.display());
        eprintln!("pinpoint: revision = {:?}", cli.revision);
        eprintln!("pinpoint: emit     = {:?}", cli.emit);
    }

    let src = match pinpoint::source::for_path(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("pinpoint: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    if src.tree().is_none() {
        let parsed = pinpoint::parser::parse(&src.text);
        for err in &parsed.errors {
            eprintln!("pinpoint: parse error: {}", err);
        }
        std::process::exit(1);
    }

    let encoding = match cli.revision {
        Revision::V1 => Encoding::V1,
        Revision::V2 => Encoding::V2,
    };
    let module = match pinpoint::lower::compile(&src, encoding) {
        Some(u) => u,
        None => {
            eprintln!("pinpoint: compilation produced no unit");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        let mut count = 0;
        for_each_unit(&module, &mut |_| count += 1);
        eprintln!("pinpoint: compiled {} units", count);
    }

    match cli.emit {
        EmitStage::Disasm => {
            print!("{}", pinpoint::decode::disasm(&module));
        }
        EmitStage::Qualnames => {
            let table = QualnameTable::build(&module);
            let mut records = Vec::new();
            for_each_unit(&module, &mut |unit| {
                if let Some(q) = table.get(unit) {
                    records.push(QualnameRecord {
                        unit: unit.name.clone(),
                        qualname: q.to_string(),
                    });
                }
            });
            records.sort_by(|a, b| a.qualname.cmp(&b.qualname));
            if cli.json {
                print_json(&records);
            } else {
                for r in &records {
                    println!("{:<16} {}", r.unit, r.qualname);
                }
            }
        }
        EmitStage::Resolve => {
            let records = resolve_records(&src, &module, cli.offset);
            if cli.json {
                print_json(&records);
            } else {
                for r in &records {
                    let line = r
                        .line
                        .map(|l| l.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    match &r.text {
                        Some(t) => println!(
                            "{:<12} {:>4}  {:<20} L{:<4} {}",
                            r.unit, r.offset, r.op, line, t
                        ),
                        None => println!(
                            "{:<12} {:>4}  {:<20} L{:<4} ({})",
                            r.unit, r.offset, r.op, line, r.outcome
                        ),
                    }
                }
            }
        }
    }
}

fn resolve_records(
    src: &Arc<pinpoint::SourceUnit>,
    module: &Arc<CompiledUnit>,
    only_offset: Option<u32>,
) -> Vec<ResolveRecord> {
    let mut records = Vec::new();
    let mut units = Vec::new();
    collect_units(module, &mut units);
    for unit in units {
        for instr in unit.decoded() {
            if let Some(want) = only_offset {
                if unit.id() != module.id() || instr.offset != want {
                    continue;
                }
            }
            let point = ExecutionPoint::new(Arc::clone(&unit), instr.offset);
            let (outcome, text) = match pinpoint::resolve(&point) {
                Ok(Resolution::Node(id)) => {
                    let text = src
                        .tree()
                        .map(|tree| tree.node_text(id, &src.text).to_string());
                    ("node".to_string(), text)
                }
                Ok(Resolution::Unresolved(reason)) => (describe_unresolved(&reason), None),
                Err(e) => (format!("error: {}", e), None),
            };
            records.push(ResolveRecord {
                unit: unit.name.clone(),
                offset: instr.offset,
                op: instr.kind.to_string(),
                line: instr.line,
                outcome,
                text,
            });
        }
    }
    records
}

fn describe_unresolved(reason: &UnresolvedReason) -> String {
    match reason {
        UnresolvedReason::ParseUnavailable => "unresolved: no parse".to_string(),
        UnresolvedReason::NoPosition => "unresolved: no position".to_string(),
        UnresolvedReason::KnownLimitation(lim) => format!("unresolved: {}", lim),
    }
}

fn for_each_unit(unit: &Arc<CompiledUnit>, f: &mut impl FnMut(&Arc<CompiledUnit>)) {
    f(unit);
    for child in unit.child_units() {
        for_each_unit(child, f);
    }
}

fn collect_units(unit: &Arc<CompiledUnit>, out: &mut Vec<Arc<CompiledUnit>>) {
    out.push(Arc::clone(unit));
    for child in unit.child_units() {
        collect_units(child, out);
    }
}

fn print_json<T: Serialize>(records: &T) {
    match serde_json::to_string_pretty(records) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("pinpoint: error: {}", e);
            std::process::exit(2);
        }
    }
}
