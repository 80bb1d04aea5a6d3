//! `Optimize`: peephole passes over the flat instruction stream, collapsing
//! adjacent redundant opcodes.

use crate::compiled_program::Instruction;

use super::state::Opcode;

/// Runs every peephole rule to a fixed point and returns the optimized
/// instruction vector.
pub fn optimize(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut current = instructions;
    loop {
        let (next, changed) = one_pass(current);
        current = next;
        if !changed {
            return current;
        }
    }
}

fn one_pass(instructions: Vec<Instruction>) -> (Vec<Instruction>, bool) {
    let mut out: Vec<Instruction> = Vec::with_capacity(instructions.len());
    let mut changed = false;
    let mut iter = instructions.into_iter().peekable();
    while let Some(instr) = iter.next() {
        // Dup immediately followed by Pop is a no-op round trip.
        if instr.opcode == Opcode::Dup.as_u32() {
            if let Some(next) = iter.peek() {
                if next.opcode == Opcode::Pop.as_u32() {
                    iter.next();
                    changed = true;
                    continue;
                }
            }
        }
        if instr.opcode == Opcode::Nop.as_u32() {
            changed = true;
            continue;
        }
        out.push(instr);
    }
    (out, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: Opcode, operands: Vec<i64>) -> Instruction {
        Instruction {
            opcode: op.as_u32(),
            operands,
        }
    }

    #[test]
    fn drops_nops() {
        let out = optimize(vec![
            instr(Opcode::PushInt, vec![1]),
            instr(Opcode::Nop, vec![]),
            instr(Opcode::Return, vec![]),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode, Opcode::PushInt.as_u32());
        assert_eq!(out[1].opcode, Opcode::Return.as_u32());
    }

    #[test]
    fn collapses_dup_pop() {
        let out = optimize(vec![
            instr(Opcode::PushInt, vec![1]),
            instr(Opcode::Dup, vec![]),
            instr(Opcode::Pop, vec![]),
            instr(Opcode::Return, vec![]),
        ]);
        assert_eq!(out.len(), 2);
    }
}
