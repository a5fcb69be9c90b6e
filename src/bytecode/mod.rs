pub mod chunk;
pub mod codegen;
pub mod disasm;
pub mod op;
pub mod verify;

pub use chunk::{Chunk, FuncEntry, Instruction, SENTINEL_IP};
pub use op::Op;
