//! Trace event data model.
//!
//! A [`TraceEvent`] captures one executed instruction from the recorded
//! trace: decoded text, pre-state register reads, post-state register
//! writes, the resolved memory effect, and the call group it executed in.
//! Register names are stored in canonical form (lowercase, `wN` folded
//! into `xN`) so analyses never need to reason about aliasing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{QueryError, QueryResult};
use crate::insn::InsnKind;

/// Kind of memory access performed by an event, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemAccessKind {
    /// No memory access.
    None,
    /// Read from memory.
    Load,
    /// Write to memory.
    Store,
}

impl std::fmt::Display for MemAccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemAccessKind::None => write!(f, "none"),
            MemAccessKind::Load => write!(f, "load"),
            MemAccessKind::Store => write!(f, "store"),
        }
    }
}

/// One executed instruction from the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the parsed event sequence (skipped lines excluded).
    pub index: usize,
    /// 1-based line number in the source text.
    pub line: usize,
    /// Timestamp/step field, kept verbatim.
    pub timestamp: String,
    /// Module name, or `"unknown"` for bare-offset lines.
    pub module: String,
    /// Offset within the module, kept verbatim.
    pub module_offset: String,
    /// Raw instruction encoding, kept verbatim.
    pub encoding: String,
    /// Program counter.
    pub pc: u64,
    /// Decoded mnemonic and operands.
    pub asm: String,
    /// Registers read by this instruction: canonical name -> pre-state value.
    pub reads: HashMap<String, u64>,
    /// Registers written by this instruction: canonical name -> post-state value.
    pub writes: HashMap<String, u64>,
    /// Resolved effective memory address, when the access could be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_addr: Option<u64>,
    /// Access width in bytes (per register for multi-register transfers);
    /// 0 when no memory access.
    pub mem_width: u8,
    /// Load, store, or no memory access.
    pub mem_kind: MemAccessKind,
    /// Monotonic call group identifier; 0 is the outermost group.
    pub call_id: u64,
    /// Call depth at the time this event executed.
    pub call_depth: u32,
    /// Closed instruction classification driving the propagation rules.
    pub kind: InsnKind,
}

impl TraceEvent {
    /// First whitespace-delimited token of the decoded text.
    pub fn mnemonic(&self) -> &str {
        self.asm.split_whitespace().next().unwrap_or("")
    }

    /// Value read for a canonical register name, if recorded.
    pub fn read_value(&self, canonical: &str) -> Option<u64> {
        self.reads.get(canonical).copied()
    }

    /// Value written to a canonical register name, if recorded.
    pub fn write_value(&self, canonical: &str) -> Option<u64> {
        self.writes.get(canonical).copied()
    }
}

/// Canonicalize a register name.
///
/// Names are lowercased; `wN` aliases fold into `xN` and `wzr` into
/// `xzr`, since both views name the same architectural register.
/// Recognized: `r0`-`r15`, `x0`-`x30`, `w0`-`w30`, `sp`, `lr`, `pc`,
/// `cpsr`, `xzr`, `wzr`.
pub fn canonical_register(name: &str) -> QueryResult<String> {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "sp" | "lr" | "pc" | "cpsr" | "xzr" => return Ok(lower),
        "wzr" => return Ok("xzr".to_string()),
        _ => {}
    }
    let mut chars = lower.chars();
    let class = chars.next();
    let rest: String = chars.collect();
    if let (Some(c), Ok(n)) = (class, rest.parse::<u8>()) {
        let canonical = match c {
            'r' if n <= 15 => Some(lower.clone()),
            'x' if n <= 30 => Some(lower.clone()),
            'w' if n <= 30 => Some(format!("x{n}")),
            _ => None,
        };
        if let Some(canonical) = canonical {
            return Ok(canonical);
        }
    }
    Err(QueryError::UnknownRegister(name.to_string()))
}

/// True if the token names a recognized register.
pub fn is_register_name(token: &str) -> bool {
    canonical_register(token).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_folds_word_aliases() {
        assert_eq!(canonical_register("w8").unwrap(), "x8");
        assert_eq!(canonical_register("X8").unwrap(), "x8");
        assert_eq!(canonical_register("wzr").unwrap(), "xzr");
    }

    #[test]
    fn test_canonical_keeps_arm32_names() {
        assert_eq!(canonical_register("r0").unwrap(), "r0");
        assert_eq!(canonical_register("R15").unwrap(), "r15");
        assert_eq!(canonical_register("sp").unwrap(), "sp");
    }

    #[test]
    fn test_canonical_rejects_unknown() {
        assert!(canonical_register("r16").is_err());
        assert!(canonical_register("x31").is_err());
        assert!(canonical_register("q0").is_err());
        assert!(canonical_register("").is_err());
    }
}
