//! Human-readable listings of procedures.

use super::instruction::Instruction;
use super::procedure::Procedure;
use std::fmt::Write;

/// Render a procedure as an assembly-style listing.
///
/// ```text
/// task Orders.fetch(int) -> Object  [locals=5]
///     0  L0:
///     1    iload 0
///   regions:
///     [L1, L2) -> L3 catch Exception
/// ```
pub fn disassemble(procedure: &Procedure) -> String {
    let mut out = String::new();
    let kind = match procedure.kind {
        super::ProcedureKind::Plain => "proc",
        super::ProcedureKind::Task => "task",
        super::ProcedureKind::Generator => "generator",
    };
    let params: Vec<String> = procedure.params.iter().map(ToString::to_string).collect();
    let _ = write!(
        out,
        "{kind} {}.{}({})",
        procedure.owner,
        procedure.name,
        params.join(", ")
    );
    if let Some(returns) = &procedure.returns {
        let _ = write!(out, " -> {returns}");
    }
    let _ = writeln!(out, "  [locals={}]", procedure.max_locals);

    for (index, instruction) in procedure.code.iter().enumerate() {
        match instruction {
            Instruction::Label(_) => {
                let _ = writeln!(out, "  {index:4}  {instruction}");
            }
            _ => {
                let _ = writeln!(out, "  {index:4}    {instruction}");
            }
        }
    }

    if !procedure.regions.is_empty() {
        out.push_str("  regions:\n");
        for region in &procedure.regions {
            let catch = region.catch_type.as_deref().unwrap_or("*");
            let _ = writeln!(
                out,
                "    [{}, {}) -> {} catch {catch}",
                region.start, region.end, region.handler
            );
        }
    }
    out
}
