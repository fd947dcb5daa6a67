//! Backward value-flow tracing.
//!
//! A greedy def-use slice: starting from the event that defines the
//! traced value, walk strictly backward through each input operand's
//! nearest preceding write. Ordinary instructions have one destination,
//! so no multi-writer bookkeeping is needed; loads chain through the
//! nearest preceding store covering the loaded bytes, and multi-register
//! loads narrow the search to the byte sub-range belonging to the traced
//! register.

use std::collections::HashSet;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::QueryResult;
use crate::event::{canonical_register, TraceEvent};
use crate::insn::{self, InsnKind};
use crate::store::EventStore;

/// Tuning knobs for a backward trace.
#[derive(Debug, Clone)]
pub struct BackwardOptions {
    /// Value the traced register is expected to hold at the start
    /// event; `None` takes the value observed there.
    pub expected_value: Option<u64>,
    /// Do not traverse into other call groups.
    pub same_call_only: bool,
    /// Bound on visited (register, event) nodes.
    pub max_nodes: usize,
}

impl Default for BackwardOptions {
    fn default() -> Self {
        Self {
            expected_value: None,
            same_call_only: false,
            max_nodes: 4000,
        }
    }
}

/// Trace how `register`'s value at `start` arose.
///
/// Returns the chronologically ordered chain of contributing event
/// indices. Empty for an empty store or out-of-range start; unknown
/// register names are invalid input. Cancellation returns the partial
/// chain computed so far.
pub fn trace_backward(
    store: &EventStore,
    start: usize,
    register: &str,
    options: &BackwardOptions,
    token: &CancelToken,
) -> QueryResult<Vec<usize>> {
    let reg = canonical_register(register)?;
    if store.is_empty() || start >= store.len() {
        return Ok(Vec::new());
    }
    let base_call = store.events()[start].call_id;
    let want = options.expected_value.or_else(|| {
        let ev = &store.events()[start];
        ev.write_value(&reg).or_else(|| ev.read_value(&reg))
    });

    // Defining write for the traced value: the nearest write at or
    // before the start event producing the wanted value. When nothing
    // matches, slice from the start event itself.
    let mut writer = start;
    let mut cursor = start + 1;
    while let Some(idx) = store.prev_write(&reg, cursor) {
        let matches = want.map_or(true, |w| store.events()[idx].write_value(&reg) == Some(w));
        if matches {
            writer = idx;
            break;
        }
        cursor = idx;
    }

    let mut chain: HashSet<usize> = HashSet::new();
    let mut seen: HashSet<(String, usize)> = HashSet::new();
    let mut stack: Vec<(String, usize)> = vec![(reg, writer)];
    let mut budget = options.max_nodes;

    while let Some((target, idx)) = stack.pop() {
        if token.is_cancelled() {
            break;
        }
        if budget == 0 {
            debug!(visited = seen.len(), "backward trace node budget exhausted");
            break;
        }
        budget -= 1;
        if !seen.insert((target.clone(), idx)) {
            continue;
        }
        let ev = &store.events()[idx];
        if options.same_call_only && ev.call_id != base_call {
            continue;
        }
        chain.insert(idx);

        match ev.kind {
            // Constant producers terminate the branch.
            InsnKind::ConstWrite
            | InsnKind::AddrConst
            | InsnKind::CondSet
            | InsnKind::LiteralPoolLoad => {}
            InsnKind::Load | InsnKind::LoadMulti => {
                let same_call = options.same_call_only.then_some(base_call);
                if let Some(store_idx) = resolve_load_source(store, ev, &target, same_call) {
                    chain.insert(store_idx);
                    let st = &store.events()[store_idx];
                    let st_decoded = insn::decode(&st.asm);
                    for src in insn::transfer_registers(&st_decoded, st.kind) {
                        let Ok(src) = canonical_register(&src) else {
                            continue;
                        };
                        if let Some(def) = store.prev_write(&src, store_idx) {
                            stack.push((src, def));
                        }
                    }
                }
                // An unresolvable load is an untracked input: leaf.
            }
            _ => {
                for src in ev.reads.keys() {
                    if src == "pc" || src == "cpsr" || src == "xzr" {
                        continue;
                    }
                    if let Some(def) = store.prev_write(src, idx) {
                        stack.push((src.clone(), def));
                    }
                }
            }
        }
    }

    let mut ordered: Vec<usize> = chain.into_iter().collect();
    ordered.sort_unstable();
    Ok(ordered)
}

/// Nearest preceding store covering the bytes a load took `target`
/// from. Same-call matches are preferred; when none exists the search
/// falls back to any call group.
fn resolve_load_source(
    store: &EventStore,
    ev: &TraceEvent,
    target: &str,
    same_call: Option<u64>,
) -> Option<usize> {
    let addr = ev.mem_addr?;
    let width = ev.mem_width.max(1);
    let (sub_addr, sub_len) = if ev.kind == InsnKind::LoadMulti {
        let decoded = insn::decode(&ev.asm);
        let regs = insn::transfer_registers(&decoded, ev.kind);
        match regs
            .iter()
            .position(|r| canonical_register(r).ok().as_deref() == Some(target))
        {
            Some(pos) => (addr.wrapping_add(pos as u64 * width as u64), width),
            // Target not in the list: search the whole covered range.
            None => (addr, width.saturating_mul(regs.len().max(1) as u8)),
        }
    } else {
        (addr, width)
    };
    store
        .prev_store_to(sub_addr, sub_len, ev.index, same_call)
        .or_else(|| {
            same_call.is_some().then(|| store.prev_store_to(sub_addr, sub_len, ev.index, None))?
        })
}
