use crate::bytecode::chunk::{Chunk, SENTINEL_IP};

/// Render the function table and instruction listing to a string.
pub fn disassemble(chunk: &Chunk) -> String {
    let mut out = String::new();

    out.push_str("=== Bytecode ===\n");
    out.push_str(&format!(
        "Instructions: {}\nConstants: {}\nFunctions: {}\n\n",
        chunk.instructions.len(),
        chunk.constants.len(),
        chunk.functions.len()
    ));

    if !chunk.functions.is_empty() {
        out.push_str("--- Function Table ---\n");
        for (i, f) in chunk.functions.iter().enumerate() {
            let ip = if f.start_ip == SENTINEL_IP {
                "????".to_string()
            } else {
                f.start_ip.to_string()
            };
            out.push_str(&format!(
                "  [{}] {:<20} ip={}  params={}  locals={}\n",
                i, f.name, ip, f.param_count, f.local_count
            ));
        }
        out.push('\n');
    }

    for (i, ins) in chunk.instructions.iter().enumerate() {
        out.push_str(&format!(
            "[{:04}] {:<16} ({}, {})  [{}]\n",
            i,
            ins.op.mnemonic(),
            ins.a,
            ins.b,
            ins.loc
        ));
    }

    out
}

/// Print the disassembly to stdout (`--bc` mode).
pub fn print_chunk(chunk: &Chunk) {
    print!("{}", disassemble(chunk));
}
