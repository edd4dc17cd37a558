use crate::bytecode::code::{ByteCode, Inst};
use crate::bytecode::compare::{CharRange, CompareOp};
use crate::bytecode::op::OpCode;

/// Print disassembly of a bytecode stream.
pub fn print_code(code: &ByteCode) {
    print!("{}", disassemble_to_string(code));
}

/// Return disassembly as a String.
pub fn disassemble_to_string(code: &ByteCode) -> String {
    let mut output = String::new();
    let targets = collect_jump_targets(code);

    let mut ip = 0;
    while ip < code.len() {
        let inst = match code.inst_at(ip) {
            Ok(inst) => inst,
            Err(e) => {
                output.push_str(&format!("{:04}   <{}>\n", ip, e));
                break;
            }
        };

        if targets.contains(&ip) {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        output.push_str(&format!("{:04} ", ip));
        output.push_str(if targets.contains(&ip) { "► " } else { "  " });
        output.push_str(&format_inst(code, &inst));
        output.push('\n');

        ip += inst.size();
    }

    output
}

fn collect_jump_targets(code: &ByteCode) -> Vec<usize> {
    let mut targets = Vec::new();

    let mut ip = 0;
    while ip < code.len() {
        let Ok(inst) = code.inst_at(ip) else { break };

        let target = if inst.opcode.is_jump_family() {
            inst.resolve_jump(code.len()).ok()
        } else if inst.opcode == OpCode::Repeat {
            inst.resolve_repeat().ok()
        } else {
            None
        };

        if let Some(target) = target {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        ip += inst.size();
    }

    targets
}

fn format_inst(code: &ByteCode, inst: &Inst<'_>) -> String {
    let name = inst.opcode.name();

    if inst.opcode.is_jump_family() {
        let offset = inst.jump_offset();
        let direction = if offset < 0 { "↑" } else { "↓" };
        let target = match inst.resolve_jump(code.len()) {
            Ok(t) => format!("{:04}", t),
            Err(_) => "????".to_string(),
        };
        let mut line = format!("{:<18} {:+} {} (→ {})", name, offset, direction, target);
        if inst.opcode == OpCode::JumpNonEmpty {
            let form = inst
                .embedded_form()
                .map(|f| f.name())
                .unwrap_or("<bad form>");
            line.push_str(&format!(" checkpoint={} form={}", inst.checkpoint(), form));
        }
        return line;
    }

    match inst.opcode {
        OpCode::Compare => {
            let ops = match inst.compare_ops() {
                Ok(ops) => ops,
                Err(_) => return format!("{:<18} <bad payload>", name),
            };
            let rendered: Vec<String> = ops.iter().map(format_compare_op).collect();
            format!("{:<18} [{}]", name, rendered.join(" "))
        }
        OpCode::Repeat => {
            let target = match inst.resolve_repeat() {
                Ok(t) => format!("{:04}", t),
                Err(_) => "????".to_string(),
            };
            format!(
                "{:<18} -{} (→ {}) count={}",
                name,
                inst.repeat_offset(),
                target,
                inst.words()[2]
            )
        }
        OpCode::Checkpoint
        | OpCode::GoBack
        | OpCode::CheckBoundary
        | OpCode::SaveLeftCapture
        | OpCode::SaveRightCapture
        | OpCode::ClearCapture => format!("{:<18} {}", name, inst.words()[1]),
        _ => name.to_string(),
    }
}

fn format_compare_op(op: &CompareOp) -> String {
    fn ch(cp: u32) -> String {
        match char::from_u32(cp) {
            Some(c) if !c.is_control() => format!("'{}'", c),
            _ => format!("U+{:04X}", cp),
        }
    }

    fn range(r: &CharRange) -> String {
        format!("{}-{}", ch(r.from), ch(r.to))
    }

    match op {
        CompareOp::Inverse => "inverse".to_string(),
        CompareOp::TemporaryInverse => "tmp-inverse".to_string(),
        CompareOp::AnyChar => "any".to_string(),
        CompareOp::Char(cp) => ch(*cp),
        CompareOp::CharClass(class) => format!("[:{:?}:]", class).to_lowercase(),
        CompareOp::CharRange(r) => range(r),
        CompareOp::String(cps) => {
            let s: String = cps
                .iter()
                .map(|cp| char::from_u32(*cp).unwrap_or('\u{FFFD}'))
                .collect();
            format!("{:?}", s)
        }
        CompareOp::Reference(group) => format!("\\{}", group),
        CompareOp::Property(p) => format!("prop({})", p.0),
        CompareOp::GeneralCategory(gc) => format!("gc({})", gc.0),
        CompareOp::Script(s) => format!("script({})", s.0),
        CompareOp::ScriptExtension(s) => format!("scx({})", s.0),
        CompareOp::LookupTable(ranges) => {
            let rendered: Vec<String> = ranges.iter().map(range).collect();
            format!("table{{{}}}", rendered.join(","))
        }
        CompareOp::And => "and".to_string(),
        CompareOp::Or => "or".to_string(),
        CompareOp::EndAndOr => "end-and-or".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_marks_jump_targets() {
        let mut code = ByteCode::new();
        code.push_compare(&[CompareOp::Char('a' as u32)]);
        code.push_jump(OpCode::ForkStay, -7);

        let output = disassemble_to_string(&code);
        assert!(output.contains("FORK_STAY"));
        assert!(output.contains("► "));
        assert!(output.contains("(→ 0000)"));
    }

    #[test]
    fn test_disassemble_compare_operands() {
        let mut code = ByteCode::new();
        code.push_compare(&[
            CompareOp::CharRange(CharRange::new('a' as u32, 'z' as u32)),
            CompareOp::AnyChar,
        ]);

        let output = disassemble_to_string(&code);
        assert!(output.contains("COMPARE"));
        assert!(output.contains("'a'-'z'"));
        assert!(output.contains("any"));
    }

    #[test]
    fn test_disassemble_does_not_panic_on_bad_stream() {
        let mut code = ByteCode::new();
        code.push(1234);
        let output = disassemble_to_string(&code);
        assert!(output.contains("unknown opcode"));
    }
}
