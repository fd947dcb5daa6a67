//! Forward taint propagation, boolean variant.
//!
//! Scans forward applying one propagation rule per instruction class to
//! a set of tainted registers and tainted byte addresses. A hit is an
//! event where the taint state changed, whether by gaining taint or by
//! a cleanup (constant write, untainted overwrite) removing it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::cancel::CancelToken;
use crate::error::QueryResult;
use crate::event::{canonical_register, TraceEvent};
use crate::insn::{self, InsnKind};
use crate::store::EventStore;

/// Inputs controlling a forward propagation scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardOptions {
    /// Register names carrying taint at the start event.
    pub source_registers: Vec<String>,
    /// Byte addresses carrying taint at the start event.
    pub source_addresses: Vec<u64>,
    /// Track taint through memory; disabling keeps the scan register-only.
    pub enable_memory_taint: bool,
    /// Bound on scanned events.
    pub max_steps: usize,
    /// Skip events executing in other call groups.
    pub same_call_only: bool,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            source_registers: Vec::new(),
            source_addresses: Vec::new(),
            enable_memory_taint: true,
            max_steps: 200_000,
            same_call_only: false,
        }
    }
}

/// Propagate taint forward from `start`.
///
/// Returns the ordered event indices where the taint state changed.
/// Empty for an empty store or out-of-range start; cancellation returns
/// the hits collected so far. `propagate_forward` is a pure function of
/// the store and its inputs.
pub fn propagate_forward(
    store: &EventStore,
    start: usize,
    options: &ForwardOptions,
    token: &CancelToken,
) -> QueryResult<Vec<usize>> {
    let mut tainted_regs: HashSet<String> = HashSet::new();
    for name in &options.source_registers {
        tainted_regs.insert(canonical_register(name)?);
    }
    let mut tainted_mem: HashSet<u64> = options.source_addresses.iter().copied().collect();

    if store.is_empty() || start >= store.len() {
        return Ok(Vec::new());
    }
    let base_call = store.events()[start].call_id;
    let mut hits = Vec::new();
    // Only processed events count against the budget; skipped call
    // groups can be arbitrarily long.
    let mut steps = 0usize;

    for event in &store.events()[start..] {
        if token.is_cancelled() || steps >= options.max_steps {
            break;
        }
        if options.same_call_only && event.call_id != base_call {
            continue;
        }
        steps += 1;
        if step_event(
            event,
            &mut tainted_regs,
            &mut tainted_mem,
            options.enable_memory_taint,
        ) {
            hits.push(event.index);
        }
    }
    Ok(hits)
}

/// Apply the propagation rule for one event. Returns true when the
/// taint state changed.
fn step_event(
    event: &TraceEvent,
    regs: &mut HashSet<String>,
    mem: &mut HashSet<u64>,
    memory_taint: bool,
) -> bool {
    let mut changed = false;
    let any_source = event
        .reads
        .keys()
        .any(|r| r != "pc" && r != "cpsr" && regs.contains(r));

    match event.kind {
        InsnKind::ConstWrite
        | InsnKind::CondSet
        | InsnKind::AddrConst
        | InsnKind::LiteralPoolLoad => {
            for rd in written_regs(event) {
                changed |= regs.remove(rd);
            }
        }
        // Untouched bits keep their taint; not modeled at sub-field
        // granularity.
        InsnKind::PartialImm => {}
        InsnKind::Load => {
            let loaded = memory_taint && loaded_range_tainted(event, mem, 1);
            for rd in data_dest_regs(event) {
                changed |= set_taint(regs, &rd, loaded);
            }
        }
        InsnKind::LoadMulti => {
            let dests = data_dest_regs(event);
            let loaded = if !memory_taint {
                false
            } else if event.mem_addr.is_some() {
                loaded_range_tainted(event, mem, dests.len())
            } else {
                // Unresolved address: over-approximate against all
                // tainted memory, never under-report.
                !mem.is_empty()
            };
            for rd in dests {
                changed |= set_taint(regs, &rd, loaded);
            }
        }
        InsnKind::Store => {
            if memory_taint {
                if let Some(addr) = event.mem_addr {
                    let tainted = data_dest_regs(event)
                        .first()
                        .is_some_and(|src| regs.contains(src));
                    changed |= set_range(mem, addr, event.mem_width, tainted);
                }
            }
        }
        InsnKind::StoreMulti => {
            if memory_taint {
                if let Some(addr) = event.mem_addr {
                    let width = event.mem_width.max(1) as u64;
                    for (i, src) in data_dest_regs(event).iter().enumerate() {
                        let tainted = regs.contains(src);
                        changed |= set_range(
                            mem,
                            addr.wrapping_add(i as u64 * width),
                            event.mem_width,
                            tainted,
                        );
                    }
                }
            }
        }
        InsnKind::CondSelect => {
            // The runtime-selected operand is unknown: taint if ANY
            // candidate source is tainted.
            for rd in written_regs(event) {
                changed |= set_taint(regs, rd, any_source);
            }
        }
        InsnKind::DataOp | InsnKind::MulLong | InsnKind::ExtendAcc | InsnKind::BitwiseNot => {
            for rd in written_regs(event) {
                changed |= set_taint(regs, rd, any_source);
            }
        }
        InsnKind::Compare
        | InsnKind::Branch { .. }
        | InsnKind::Return
        | InsnKind::Other => {}
    }
    changed
}

/// Registers written by a non-memory destination rule, flags and pc
/// excluded.
fn written_regs(event: &TraceEvent) -> impl Iterator<Item = &str> {
    event
        .writes
        .keys()
        .map(String::as_str)
        .filter(|r| *r != "pc" && *r != "cpsr" && *r != "xzr")
}

/// Data registers moved by a load/store, canonical, in list order.
/// Distinct from `written_regs`: writeback of the base register (e.g.
/// post-indexed sp) is not a data destination.
fn data_dest_regs(event: &TraceEvent) -> Vec<String> {
    let decoded = insn::decode(&event.asm);
    insn::transfer_registers(&decoded, event.kind)
        .iter()
        .filter_map(|r| canonical_register(r).ok())
        .collect()
}

fn loaded_range_tainted(event: &TraceEvent, mem: &HashSet<u64>, reg_count: usize) -> bool {
    let Some(addr) = event.mem_addr else {
        return false;
    };
    let len = event.mem_width.max(1) as u64 * reg_count.max(1) as u64;
    (0..len).any(|offset| mem.contains(&addr.wrapping_add(offset)))
}

fn set_taint(regs: &mut HashSet<String>, rd: &str, tainted: bool) -> bool {
    if tainted {
        regs.insert(rd.to_string())
    } else {
        regs.remove(rd)
    }
}

fn set_range(mem: &mut HashSet<u64>, addr: u64, width: u8, tainted: bool) -> bool {
    let mut changed = false;
    for offset in 0..width.max(1) as u64 {
        let byte = addr.wrapping_add(offset);
        changed |= if tainted {
            mem.insert(byte)
        } else {
            mem.remove(&byte)
        };
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lines: &[&str]) -> EventStore {
        EventStore::parse_str(&lines.join("\n"))
    }

    fn scenario_a() -> EventStore {
        store(&[
            r#"[1][m 0x0][0] 0x1000: "ldr r1, [r4]" r4=0x9000 => r1=0x41"#,
            r#"[2][m 0x4][0] 0x1004: "mov r2, r1" r1=0x41 => r2=0x41"#,
            r#"[3][m 0x8][0] 0x1008: "eor r3, r2, r2" r2=0x41 => r3=0x0"#,
            r#"[4][m 0xc][0] 0x100c: "str r3, [r4, #8]" r3=0x0 r4=0x9000 => "#,
        ])
    }

    #[test]
    fn test_scenario_load_move_selfxor_store() {
        let s = scenario_a();
        let options = ForwardOptions {
            source_addresses: vec![0x9000],
            ..Default::default()
        };
        let hits = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        // The load and the move gain taint; the self-XOR writes an
        // untainted r3 (no state change) and the store stays clean.
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn test_cleanup_removes_taint_and_counts_as_hit() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "mov r2, r1" r1=0x41 => r2=0x41"#,
            r#"[2][m 0x4][0] 0x1004: "mov r2, #0" => r2=0x0"#,
            r#"[3][m 0x8][0] 0x1008: "mov r3, r2" r2=0x0 => r3=0x0"#,
        ]);
        let options = ForwardOptions {
            source_registers: vec!["r1".to_string()],
            ..Default::default()
        };
        let hits = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        // Gain at 0, loss at 1, nothing at 2.
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "str r1, [sp, #4]" r1=0x41 sp=0x7f000000 => "#,
            r#"[2][m 0x4][0] 0x1004: "ldr r5, [sp, #4]" sp=0x7f000000 => r5=0x41"#,
        ]);
        let options = ForwardOptions {
            source_registers: vec!["r1".to_string()],
            ..Default::default()
        };
        let hits = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn test_memory_taint_disabled_keeps_scan_register_only() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "str r1, [sp, #4]" r1=0x41 sp=0x7f000000 => "#,
            r#"[2][m 0x4][0] 0x1004: "ldr r5, [sp, #4]" sp=0x7f000000 => r5=0x41"#,
        ]);
        let options = ForwardOptions {
            source_registers: vec!["r1".to_string()],
            enable_memory_taint: false,
            ..Default::default()
        };
        let hits = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let s = scenario_a();
        let options = ForwardOptions {
            source_addresses: vec![0x9000],
            ..Default::default()
        };
        let first = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        let second = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cancelled_token_returns_partial() {
        let s = scenario_a();
        let token = CancelToken::new();
        token.cancel();
        let options = ForwardOptions {
            source_registers: vec!["r1".to_string()],
            ..Default::default()
        };
        let hits = propagate_forward(&s, 0, &options, &token).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_empty_store_neutral() {
        let empty = EventStore::parse_str("");
        let hits = propagate_forward(&empty, 0, &ForwardOptions::default(), &CancelToken::new())
            .unwrap();
        assert!(hits.is_empty());
        assert!(propagate_forward(
            &empty,
            0,
            &ForwardOptions {
                source_registers: vec!["zz9".to_string()],
                ..Default::default()
            },
            &CancelToken::new()
        )
        .is_err());
    }

    #[test]
    fn test_max_steps_counts_processed_events_only() {
        let mut lines = vec![
            r#"[1][m 0x0][0] 0x1000: "mov r2, r0" r0=0x1 => r2=0x1"#.to_string(),
            r#"[2][m 0x4][0] 0x1004: "bl #0x2000" lr=0x1008"#.to_string(),
        ];
        for i in 0..6 {
            lines.push(format!(
                r#"[{}][m 0x0][0] 0x2000: "mov r7, #1" => r7=0x1"#,
                3 + i
            ));
        }
        lines.push(r#"[9][m 0x8][0] 0x2018: "bx lr" lr=0x1008"#.to_string());
        lines.push(r#"[10][m 0xc][0] 0x1008: "mov r4, r2" r2=0x1 => r4=0x1"#.to_string());
        let s = EventStore::parse_str(&lines.join("\n"));

        let options = ForwardOptions {
            source_registers: vec!["r0".to_string()],
            same_call_only: true,
            max_steps: 4,
            ..Default::default()
        };
        // The six callee events are skipped without draining the budget,
        // so the post-return move at index 9 still hits.
        let hits = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        assert_eq!(hits, vec![0, 9]);
    }

    #[test]
    fn test_partial_imm_preserves_taint() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "mov x8, x1" x1=0x41 => x8=0x41"#,
            r#"[2][m 0x4][0] 0x1004: "movk x8, #0x1234, lsl #16" x8=0x41 => x8=0x12340041"#,
            r#"[3][m 0x8][0] 0x1008: "mov x9, x8" x8=0x12340041 => x9=0x12340041"#,
        ]);
        let options = ForwardOptions {
            source_registers: vec!["x1".to_string()],
            ..Default::default()
        };
        let hits = propagate_forward(&s, 0, &options, &CancelToken::new()).unwrap();
        assert_eq!(hits, vec![0, 2]);
    }
}
