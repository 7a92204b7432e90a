use crate::{base::BaseId, instruction::InstrPtr};
use alloc::vec::Vec;
use core::fmt::{Display, Formatter};

/// Batch of instructions executed together, optionally repeated
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Instructions in program order
    pub instr_list: Vec<InstrPtr>,
    /// Number of repeats, at least one execution happens
    pub nrepeats: u64,
    /// Boolean base, repeating stops when it holds false after a repeat
    pub condition: Option<BaseId>,
}

impl Program {
    /// Program executed once
    pub fn new(instr_list: Vec<InstrPtr>) -> Program {
        Program { instr_list, nrepeats: 1, condition: None }
    }

    /// Repeat the program `nrepeats` times, stopping early when `condition` is false
    pub fn with_repeats(mut self, nrepeats: u64, condition: Option<BaseId>) -> Program {
        self.nrepeats = nrepeats;
        self.condition = condition;
        self
    }

    /// Does any view read its start, shape or stride from a base
    pub fn uses_pointer(&self) -> bool {
        self.instr_list.iter().any(|i| i.operand.iter().any(|v| v.uses_pointer()))
    }

    /// Does any view carry slide descriptors
    pub fn is_sliding(&self) -> bool {
        self.instr_list.iter().any(|i| i.operand.iter().any(|v| v.is_sliding()))
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("Program(repeats: {}", self.nrepeats))?;
        if let Some(c) = self.condition {
            f.write_fmt(format_args!(", condition: {c}"))?;
        }
        f.write_str(")\n")?;
        for instr in &self.instr_list {
            f.write_fmt(format_args!("  {instr}\n"))?;
        }
        Ok(())
    }
}
