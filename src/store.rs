//! Event store: trace parsing, indexing, and call annotation.
//!
//! Parsing is line-oriented and fails per line, never globally: a line
//! that does not yield a program counter and mnemonic is counted and
//! skipped. The store is immutable once built; every analysis consumes
//! it read-only through event indices.
//!
//! Recognized line shapes:
//!
//! ```text
//! [ts][module 0xoff][e92d4800] 0x40001234: "push {fp, lr}" sp=0xbeff0000 => sp=0xbefefff8
//! [ts][0x1234] [e92d4800] 0x40001234: "push {fp, lr}" ...
//! ```
//!
//! The second (bare-offset) shape records its module as `"unknown"`.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::QueryResult;
use crate::event::{canonical_register, MemAccessKind, TraceEvent};
use crate::insn::{self, InsnKind};

lazy_static! {
    static ref LINE_RE: Regex = Regex::new(
        r#"^\[([^\]]*)\]\s*\[([^\]\s]+)(?:\s+([^\]]+))?\]\s*\[\s*([0-9a-fA-F][0-9a-fA-F ]*)\s*\]\s*(0x[0-9a-fA-F]+):\s*"([^"]*)"\s*(.*)$"#
    )
    .expect("trace line pattern");
    static ref REG_PAIR_RE: Regex = Regex::new(
        r"\b([rwx][0-9]{1,2}|sp|lr|pc|cpsr|xzr|wzr)\s*=\s*(0x[0-9a-fA-F]+|[0-9]+)"
    )
    .expect("register pair pattern");
}

/// Bound on how far a per-byte store list is walked when a same-call
/// filter keeps rejecting candidates.
const STORE_SCAN_LIMIT: usize = 512;

/// Immutable, randomly indexable sequence of parsed trace events plus
/// the lookup indices built during the single parsing pass.
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<TraceEvent>,
    skipped: usize,
    /// (canonical register, value) -> ascending event indices where the
    /// register's read or write equals the value.
    value_index: HashMap<(String, u64), Vec<usize>>,
    /// canonical register -> ascending indices of events writing it.
    write_index: HashMap<String, Vec<usize>>,
    /// canonical register -> ascending indices of events reading it.
    read_index: HashMap<String, Vec<usize>>,
    /// byte address -> ascending indices of store events covering it.
    store_index: HashMap<u64, Vec<usize>>,
}

impl EventStore {
    /// Parse trace text. Unparsable lines are skipped and counted; a
    /// text yielding zero events is a valid, empty store.
    pub fn parse_str(text: &str) -> Self {
        let mut store = EventStore::default();
        // Running register file seeded from observed reads, used to
        // resolve addressing bases the current line does not read.
        let mut running: HashMap<String, u64> = HashMap::new();
        let mut call_stack: Vec<u64> = Vec::new();
        let mut next_call_id: u64 = 0;

        for (line_no, raw) in text.lines().enumerate() {
            let line = line_no + 1;
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let Some(caps) = LINE_RE.captures(raw) else {
                store.skipped += 1;
                debug!(line, "skipping unparsable trace line");
                continue;
            };

            let asm = caps.get(6).map_or("", |m| m.as_str()).trim();
            let pc_text = &caps[5][2..];
            let Ok(pc) = u64::from_str_radix(pc_text, 16) else {
                store.skipped += 1;
                continue;
            };
            if asm.is_empty() {
                store.skipped += 1;
                debug!(line, "skipping line with empty mnemonic");
                continue;
            }

            let (module, module_offset) = match caps.get(3) {
                Some(off) => (caps[2].to_string(), off.as_str().trim().to_string()),
                None if caps[2].starts_with("0x") => {
                    ("unknown".to_string(), caps[2].to_string())
                }
                None => (caps[2].to_string(), String::new()),
            };

            let tail = caps.get(7).map_or("", |m| m.as_str());
            let (reads_text, writes_text) = match tail.split_once("=>") {
                Some((r, w)) => (r, w),
                None => (tail, ""),
            };
            let reads = parse_reg_pairs(reads_text);
            let writes = parse_reg_pairs(writes_text);

            let decoded = insn::decode(asm);
            let kind = insn::classify_decoded(&decoded);

            let call_depth = call_stack.len() as u32;
            let call_id = call_stack.last().copied().unwrap_or(0);
            if insn::is_call(&decoded) {
                next_call_id += 1;
                call_stack.push(next_call_id);
            } else if insn::is_return(&decoded, kind) {
                call_stack.pop();
            }

            let mem_kind = match kind {
                InsnKind::Load | InsnKind::LoadMulti | InsnKind::LiteralPoolLoad => {
                    MemAccessKind::Load
                }
                InsnKind::Store | InsnKind::StoreMulti => MemAccessKind::Store,
                _ => MemAccessKind::None,
            };
            let (mem_addr, mem_width, covered) = if mem_kind == MemAccessKind::None {
                (None, 0, 0)
            } else {
                let regs = insn::transfer_registers(&decoded, kind);
                let width = insn::access_width(&decoded.mnemonic, kind, &regs);
                let covered = width as u64 * regs.len().max(1) as u64;
                let resolve = |name: &str| {
                    reads
                        .get(name)
                        .copied()
                        .or_else(|| running.get(name).copied())
                };
                let addr = insn::effective_address(asm, resolve).or_else(|| {
                    // push/pop/ldm/stm carry their base outside any
                    // bracket; push stores below the pre-state sp.
                    let base = resolve(&insn::multi_base_register(&decoded)?)?;
                    if decoded.mnemonic == "push" {
                        Some(base.wrapping_sub(covered))
                    } else {
                        Some(base)
                    }
                });
                (addr, width, covered)
            };

            let index = store.events.len();
            let event = TraceEvent {
                index,
                line,
                timestamp: caps[1].to_string(),
                module,
                module_offset,
                encoding: caps[4].trim().to_string(),
                pc,
                asm: asm.to_string(),
                reads,
                writes,
                mem_addr,
                mem_width,
                mem_kind,
                call_id,
                call_depth,
                kind,
            };

            store.index_event(&event, covered);
            for (name, value) in &event.reads {
                running.entry(name.clone()).or_insert(*value);
            }
            for (name, value) in &event.writes {
                running.insert(name.clone(), *value);
            }
            store.events.push(event);
        }

        if store.skipped > 0 {
            warn!(
                skipped = store.skipped,
                parsed = store.events.len(),
                "trace contained unparsable lines"
            );
        }
        store
    }

    /// Parse a trace file from disk.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self::parse_str(&std::fs::read_to_string(path)?))
    }

    fn index_event(&mut self, event: &TraceEvent, covered: u64) {
        let index = event.index;
        for (name, value) in &event.reads {
            self.read_index.entry(name.clone()).or_default().push(index);
            push_dedup(
                self.value_index
                    .entry((name.clone(), *value))
                    .or_default(),
                index,
            );
        }
        for (name, value) in &event.writes {
            self.write_index
                .entry(name.clone())
                .or_default()
                .push(index);
            push_dedup(
                self.value_index
                    .entry((name.clone(), *value))
                    .or_default(),
                index,
            );
        }
        if event.mem_kind == MemAccessKind::Store {
            if let Some(addr) = event.mem_addr {
                for offset in 0..covered {
                    self.store_index
                        .entry(addr.wrapping_add(offset))
                        .or_default()
                        .push(index);
                }
            }
        }
    }

    /// Number of parsed events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when the trace yielded no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of lines skipped during parsing.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    /// Random access by event index.
    pub fn get(&self, index: usize) -> Option<&TraceEvent> {
        self.events.get(index)
    }

    /// The full parsed event sequence.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Ascending event indices where `register`'s read or write equals
    /// `value`. Empty when absent; unknown names are invalid input.
    pub fn locate(&self, register: &str, value: u64) -> QueryResult<Vec<usize>> {
        let canonical = canonical_register(register)?;
        Ok(self
            .value_index
            .get(&(canonical, value))
            .cloned()
            .unwrap_or_default())
    }

    /// Nearest event strictly before `before` that writes `canonical`.
    pub fn prev_write(&self, canonical: &str, before: usize) -> Option<usize> {
        let list = self.write_index.get(canonical)?;
        let pos = list.partition_point(|&i| i < before);
        pos.checked_sub(1).map(|p| list[p])
    }

    /// Nearest event strictly after `after` that writes `canonical`.
    pub fn next_write(&self, canonical: &str, after: usize) -> Option<usize> {
        let list = self.write_index.get(canonical)?;
        let pos = list.partition_point(|&i| i <= after);
        list.get(pos).copied()
    }

    /// Nearest event strictly before `before` storing to any byte of
    /// `[addr, addr + len)`, optionally restricted to one call group.
    /// Returns the latest such store across the covered bytes.
    pub fn prev_store_to(
        &self,
        addr: u64,
        len: u8,
        before: usize,
        same_call: Option<u64>,
    ) -> Option<usize> {
        let mut best: Option<usize> = None;
        for offset in 0..len.max(1) as u64 {
            let Some(list) = self.store_index.get(&addr.wrapping_add(offset)) else {
                continue;
            };
            let pos = list.partition_point(|&i| i < before);
            let mut scanned = 0usize;
            for &candidate in list[..pos].iter().rev() {
                scanned += 1;
                if scanned > STORE_SCAN_LIMIT {
                    break;
                }
                let matches_call = same_call
                    .map(|id| self.events[candidate].call_id == id)
                    .unwrap_or(true);
                if matches_call {
                    best = Some(best.map_or(candidate, |b: usize| b.max(candidate)));
                    break;
                }
            }
        }
        best
    }
}

fn push_dedup(list: &mut Vec<usize>, index: usize) {
    if list.last() != Some(&index) {
        list.push(index);
    }
}

/// Extract `name=value` register pairs, canonicalizing names. Pairs
/// whose name fails canonicalization (e.g. out-of-range numbers the
/// pattern still matches) are dropped.
fn parse_reg_pairs(text: &str) -> HashMap<String, u64> {
    let mut map = HashMap::new();
    for caps in REG_PAIR_RE.captures_iter(text) {
        let Ok(name) = canonical_register(&caps[1]) else {
            continue;
        };
        let value_text = &caps[2];
        let parsed = if let Some(hex) = value_text.strip_prefix("0x") {
            u64::from_str_radix(hex, 16)
        } else {
            value_text.parse::<u64>()
        };
        if let Ok(value) = parsed {
            map.insert(name, value);
        }
    }
    map
}
