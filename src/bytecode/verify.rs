use crate::bytecode::chunk::{Chunk, SENTINEL_IP};
use crate::bytecode::op::Op;

#[derive(Debug)]
pub struct VerifyError {
    pub message: String,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bytecode verification failed: {}", self.message)
    }
}

impl VerifyError {
    fn new(message: impl Into<String>) -> Self {
        VerifyError {
            message: message.into(),
        }
    }
}

/// Validate a finished chunk before execution.
///
/// Checks that every jump target and constant ordinal is in bounds and
/// that every registered function has been patched to a real start ip.
/// A call to the sentinel ordinal is allowed through: it is the code
/// generator's deterministic fallback for an unknown callee, and the VM
/// turns it into a runtime error.
pub fn verify_chunk(chunk: &Chunk) -> Result<(), VerifyError> {
    let count = chunk.instruction_count();

    for (i, ins) in chunk.instructions.iter().enumerate() {
        match ins.op {
            Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue => {
                if ins.a >= count {
                    return Err(VerifyError::new(format!(
                        "instruction {}: jump target {} out of bounds ({} instructions)",
                        i, ins.a, count
                    )));
                }
            }
            Op::PushConst => {
                if ins.a as usize >= chunk.constants.len() {
                    return Err(VerifyError::new(format!(
                        "instruction {}: constant ordinal {} out of bounds ({} constants)",
                        i,
                        ins.a,
                        chunk.constants.len()
                    )));
                }
            }
            Op::Call => {
                if ins.a != SENTINEL_IP && ins.a as usize >= chunk.functions.len() {
                    return Err(VerifyError::new(format!(
                        "instruction {}: function ordinal {} out of bounds ({} functions)",
                        i,
                        ins.a,
                        chunk.functions.len()
                    )));
                }
            }
            _ => {}
        }
    }

    for (i, f) in chunk.functions.iter().enumerate() {
        if f.start_ip == SENTINEL_IP {
            return Err(VerifyError::new(format!(
                "function [{}] '{}' was registered but never emitted",
                i, f.name
            )));
        }
        if f.start_ip >= count {
            return Err(VerifyError::new(format!(
                "function [{}] '{}' starts past the end of the chunk",
                i, f.name
            )));
        }
    }

    Ok(())
}
