//! Enhanced taint analysis.
//!
//! Superset of the boolean propagator: memory taint is byte-granular,
//! every tainted register and byte carries a set of [`TaintLabel`]s
//! recording provenance and hop count, confluence of independently
//! sourced values is detected, and control-flow-dependent (implicit)
//! propagation is governed by a selectable [`TaintPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::cancel::CancelToken;
use crate::error::QueryResult;
use crate::event::{canonical_register, TraceEvent};
use crate::insn::{self, InsnKind};
use crate::store::EventStore;

/// Taint memory in aligned blocks of this many bytes.
pub const TAINT_BLOCK_SIZE: u64 = 16;

/// Where a taint label originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaintSourceKind {
    /// Seeded from a register.
    Register,
    /// Seeded from a memory range.
    Memory,
    /// Seeded from a named external input.
    ExternalInput,
}

/// Provenance marker carried by every tainted register and byte.
///
/// Identity (equality, hashing) covers the source kind, identifier, and
/// origin event only — two labels differing just in generation are the
/// same label, so propagation never duplicates provenance while the hop
/// count still grows along the chain.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct TaintLabel {
    /// Source kind.
    pub kind: TaintSourceKind,
    /// Source identifier: register name, address range, or input name.
    pub id: String,
    /// Event index where the label was introduced.
    pub origin: usize,
    /// Hop count from the origin along the propagation chain.
    pub generation: u32,
}

impl PartialEq for TaintLabel {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id && self.origin == other.origin
    }
}

impl Hash for TaintLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
        self.origin.hash(state);
    }
}

impl TaintLabel {
    /// Fresh generation-zero label.
    pub fn new(kind: TaintSourceKind, id: impl Into<String>, origin: usize) -> Self {
        Self {
            kind,
            id: id.into(),
            origin,
            generation: 0,
        }
    }

    /// Copy with the hop count advanced by one.
    pub fn derived(&self) -> Self {
        Self {
            generation: self.generation + 1,
            ..self.clone()
        }
    }
}

/// Policy for control-flow-dependent propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaintPolicy {
    /// Explicit data flow only.
    Strict,
    /// Data flow plus recognized implicit patterns: conditional selects
    /// and comparisons over tainted operands.
    #[default]
    Normal,
    /// Additionally collect on every conditional control transfer whose
    /// condition inputs are tainted. Maximizes recall.
    Loose,
}

/// Byte-exact memory taint, stored as aligned 16-byte blocks mapping
/// byte offsets to label sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ByteMemoryTaint {
    blocks: BTreeMap<u64, HashMap<u8, HashSet<TaintLabel>>>,
}

impl ByteMemoryTaint {
    fn split(addr: u64) -> (u64, u8) {
        (
            addr & !(TAINT_BLOCK_SIZE - 1),
            (addr & (TAINT_BLOCK_SIZE - 1)) as u8,
        )
    }

    /// Overwrite each byte of `[addr, addr + len)` with `labels`.
    /// Returns true when any byte's label set changed.
    pub fn mark(&mut self, addr: u64, len: u64, labels: &HashSet<TaintLabel>) -> bool {
        if labels.is_empty() {
            return self.clear(addr, len);
        }
        let mut changed = false;
        for offset in 0..len {
            let (base, byte) = Self::split(addr.wrapping_add(offset));
            let slot = self.blocks.entry(base).or_default().entry(byte).or_default();
            if slot != labels {
                *slot = labels.clone();
                changed = true;
            }
        }
        changed
    }

    /// Remove all taint from `[addr, addr + len)`. Returns true when
    /// any tainted byte was cleared.
    pub fn clear(&mut self, addr: u64, len: u64) -> bool {
        let mut changed = false;
        for offset in 0..len {
            let (base, byte) = Self::split(addr.wrapping_add(offset));
            if let Some(block) = self.blocks.get_mut(&base) {
                if block.remove(&byte).is_some() {
                    changed = true;
                }
                if block.is_empty() {
                    self.blocks.remove(&base);
                }
            }
        }
        changed
    }

    /// True when any byte of `[addr, addr + len)` carries taint.
    pub fn any_tainted(&self, addr: u64, len: u64) -> bool {
        (0..len).any(|offset| {
            let (base, byte) = Self::split(addr.wrapping_add(offset));
            self.blocks
                .get(&base)
                .is_some_and(|block| block.contains_key(&byte))
        })
    }

    /// Union of labels over `[addr, addr + len)`.
    pub fn labels_in(&self, addr: u64, len: u64) -> HashSet<TaintLabel> {
        let mut labels = HashSet::new();
        for offset in 0..len {
            let (base, byte) = Self::split(addr.wrapping_add(offset));
            if let Some(set) = self.blocks.get(&base).and_then(|block| block.get(&byte)) {
                labels.extend(set.iter().cloned());
            }
        }
        labels
    }

    /// Union of labels over every tainted byte.
    pub fn all_labels(&self) -> HashSet<TaintLabel> {
        self.blocks
            .values()
            .flat_map(HashMap::values)
            .flatten()
            .cloned()
            .collect()
    }

    /// Total number of tainted bytes.
    pub fn tainted_bytes(&self) -> usize {
        self.blocks.values().map(HashMap::len).sum()
    }

    /// True when no byte carries taint.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A byte range used for taint sources and targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRange {
    /// First byte address.
    pub addr: u64,
    /// Length in bytes.
    pub len: u32,
}

/// A register carrying a named external input at the start event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalInput {
    /// Register holding the input value.
    pub register: String,
    /// Host-assigned input name (e.g. a parameter or buffer name).
    pub name: String,
}

/// Taint sources seeded before the scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaintSources {
    /// Registers tainted at the start event.
    pub registers: Vec<String>,
    /// Memory ranges tainted at the start event.
    pub memory: Vec<MemoryRange>,
    /// Registers carrying named external inputs.
    pub external: Vec<ExternalInput>,
}

/// Locations whose tainting the scan reports as reaching the target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaintTargets {
    /// Target registers.
    pub registers: Vec<String>,
    /// Target memory ranges.
    pub memory: Vec<MemoryRange>,
}

/// Inputs controlling an enhanced analysis scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedOptions {
    /// What to taint before scanning.
    pub sources: TaintSources,
    /// What to watch for.
    pub targets: TaintTargets,
    /// Implicit-flow policy.
    pub policy: TaintPolicy,
    /// Bound on scanned events.
    pub max_steps: usize,
    /// Skip events executing in other call groups.
    pub same_call_only: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            sources: TaintSources::default(),
            targets: TaintTargets::default(),
            policy: TaintPolicy::default(),
            max_steps: 200_000,
            same_call_only: false,
        }
    }
}

/// Counters collected during a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStatistics {
    /// Events scanned.
    pub steps: usize,
    /// Register destinations that received labels.
    pub register_propagations: usize,
    /// Byte ranges that received labels.
    pub memory_propagations: usize,
    /// Destinations explicitly cleaned.
    pub cleanups: usize,
    /// Implicit-flow label collections (Normal/Loose only).
    pub implicit_collections: usize,
    /// True when the scan stopped on cancellation.
    pub cancelled: bool,
}

/// Result of [`analyze_advanced`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedReport {
    /// Ordered event indices where the taint state changed.
    pub hits: Vec<usize>,
    /// Event index -> distinct merging label sets, first-seen order.
    pub confluence_points: BTreeMap<usize, Vec<HashSet<TaintLabel>>>,
    /// Scan counters.
    pub statistics: ScanStatistics,
    /// True when any target register or byte became tainted.
    pub reached_target: bool,
    /// Register taint state after the scan.
    pub final_registers: HashMap<String, HashSet<TaintLabel>>,
    /// Memory taint state after the scan.
    pub final_memory: ByteMemoryTaint,
    /// Labels collected from implicit flows, kept apart from the
    /// explicit data-flow state.
    pub implicit_labels: HashSet<TaintLabel>,
}

impl AdvancedReport {
    /// Pretty-printed JSON for host consumption.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Compact JSON.
    pub fn to_json_compact(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Labeled forward taint scan with confluence detection.
///
/// Holds the live state for one scan; [`analyze_advanced`] is the
/// validated entry point.
struct EnhancedTaintAnalyzer {
    policy: TaintPolicy,
    reg_taints: HashMap<String, HashSet<TaintLabel>>,
    mem_taints: ByteMemoryTaint,
    implicit_pool: HashSet<TaintLabel>,
    confluence: BTreeMap<usize, Vec<HashSet<TaintLabel>>>,
    stats: ScanStatistics,
    hits: Vec<usize>,
    reached: bool,
}

/// Run an enhanced taint analysis from `start`.
///
/// Tolerates an empty store or out-of-range start with a neutral
/// report; unknown register names in sources or targets are invalid
/// input. Cancellation ends the scan early with the partial state
/// collected so far (`statistics.cancelled` set).
pub fn analyze_advanced(
    store: &EventStore,
    start: usize,
    options: &AdvancedOptions,
    token: &CancelToken,
) -> QueryResult<AdvancedReport> {
    let mut target_regs: Vec<String> = Vec::new();
    for name in &options.targets.registers {
        target_regs.push(canonical_register(name)?);
    }

    let mut analyzer = EnhancedTaintAnalyzer::new(options.policy);
    for name in &options.sources.registers {
        let canonical = canonical_register(name)?;
        let label = TaintLabel::new(TaintSourceKind::Register, canonical.clone(), start);
        analyzer
            .reg_taints
            .entry(canonical)
            .or_default()
            .insert(label);
    }
    for input in &options.sources.external {
        let canonical = canonical_register(&input.register)?;
        let label = TaintLabel::new(TaintSourceKind::ExternalInput, input.name.clone(), start);
        analyzer
            .reg_taints
            .entry(canonical)
            .or_default()
            .insert(label);
    }
    for range in &options.sources.memory {
        let label = TaintLabel::new(
            TaintSourceKind::Memory,
            format!("0x{:x}", range.addr),
            start,
        );
        let labels = HashSet::from([label]);
        analyzer
            .mem_taints
            .mark(range.addr, range.len as u64, &labels);
    }

    if !store.is_empty() && start < store.len() {
        analyzer.scan(store, start, options, &target_regs, token);
    }
    Ok(analyzer.into_report())
}

impl EnhancedTaintAnalyzer {
    fn new(policy: TaintPolicy) -> Self {
        Self {
            policy,
            reg_taints: HashMap::new(),
            mem_taints: ByteMemoryTaint::default(),
            implicit_pool: HashSet::new(),
            confluence: BTreeMap::new(),
            stats: ScanStatistics::default(),
            hits: Vec::new(),
            reached: false,
        }
    }

    fn scan(
        &mut self,
        store: &EventStore,
        start: usize,
        options: &AdvancedOptions,
        target_regs: &[String],
        token: &CancelToken,
    ) {
        let base_call = store.events()[start].call_id;
        for event in &store.events()[start..] {
            if token.is_cancelled() {
                self.stats.cancelled = true;
                break;
            }
            // Only processed events count against the budget; skipped
            // call groups can be arbitrarily long.
            if self.stats.steps >= options.max_steps {
                break;
            }
            if options.same_call_only && event.call_id != base_call {
                continue;
            }
            self.stats.steps += 1;
            if self.step(event) {
                self.hits.push(event.index);
            }
            if !self.reached && self.targets_tainted(target_regs, &options.targets.memory) {
                self.reached = true;
            }
        }
    }

    fn targets_tainted(&self, target_regs: &[String], target_mem: &[MemoryRange]) -> bool {
        target_regs
            .iter()
            .any(|r| self.reg_taints.get(r).is_some_and(|s| !s.is_empty()))
            || target_mem
                .iter()
                .any(|range| self.mem_taints.any_tainted(range.addr, range.len as u64))
    }

    /// Apply the propagation rule for one event; true when the taint
    /// state changed.
    fn step(&mut self, event: &TraceEvent) -> bool {
        let mut changed = false;
        let source_labels = self.gather_source_labels(event);

        match event.kind {
            InsnKind::ConstWrite
            | InsnKind::CondSet
            | InsnKind::AddrConst
            | InsnKind::LiteralPoolLoad => {
                for rd in written_regs(event) {
                    changed |= self.clean_register(rd);
                }
            }
            InsnKind::PartialImm => {}
            InsnKind::Load | InsnKind::LoadMulti => {
                let dests = data_dest_regs(event);
                let labels = match event.mem_addr {
                    Some(addr) => {
                        let len = event.mem_width.max(1) as u64 * dests.len().max(1) as u64;
                        derive_all(&self.mem_taints.labels_in(addr, len))
                    }
                    // Unresolved multi-register load: over-approximate
                    // against all tainted memory, never under-report.
                    None if event.kind == InsnKind::LoadMulti => {
                        derive_all(&self.mem_taints.all_labels())
                    }
                    None => HashSet::new(),
                };
                self.record_confluence(event.index, &labels);
                for rd in &dests {
                    changed |= self.assign_register(rd, &labels);
                }
            }
            InsnKind::Store => {
                if let Some(addr) = event.mem_addr {
                    let labels = data_dest_regs(event)
                        .first()
                        .and_then(|src| self.reg_taints.get(src))
                        .map(derive_all)
                        .unwrap_or_default();
                    changed |= self.assign_memory(addr, event.mem_width.max(1) as u64, &labels);
                }
            }
            InsnKind::StoreMulti => {
                if let Some(addr) = event.mem_addr {
                    let width = event.mem_width.max(1) as u64;
                    for (i, src) in data_dest_regs(event).iter().enumerate() {
                        let labels = self
                            .reg_taints
                            .get(src)
                            .map(derive_all)
                            .unwrap_or_default();
                        changed |= self.assign_memory(
                            addr.wrapping_add(i as u64 * width),
                            width,
                            &labels,
                        );
                    }
                }
            }
            InsnKind::CondSelect => {
                // Conservative: any candidate source taints the result.
                self.record_confluence(event.index, &source_labels);
                for rd in owned(written_regs(event)) {
                    changed |= self.assign_register(&rd, &source_labels);
                }
                if self.policy != TaintPolicy::Strict && !source_labels.is_empty() {
                    self.collect_implicit(&source_labels);
                }
            }
            InsnKind::DataOp
            | InsnKind::MulLong
            | InsnKind::ExtendAcc
            | InsnKind::BitwiseNot => {
                self.record_confluence(event.index, &source_labels);
                for rd in owned(written_regs(event)) {
                    changed |= self.assign_register(&rd, &source_labels);
                }
            }
            InsnKind::Compare => {
                if self.policy != TaintPolicy::Strict && !source_labels.is_empty() {
                    self.collect_implicit(&source_labels);
                }
            }
            InsnKind::Branch { conditional, .. } => {
                if self.policy == TaintPolicy::Loose && conditional && !source_labels.is_empty()
                {
                    self.collect_implicit(&source_labels);
                }
            }
            InsnKind::Return | InsnKind::Other => {}
        }
        changed
    }

    /// Derived union of the labels on every register the event reads.
    fn gather_source_labels(&self, event: &TraceEvent) -> HashSet<TaintLabel> {
        let mut labels = HashSet::new();
        for name in event.reads.keys() {
            if name == "pc" || name == "cpsr" || name == "xzr" {
                continue;
            }
            if let Some(set) = self.reg_taints.get(name) {
                labels.extend(set.iter().map(TaintLabel::derived));
            }
        }
        labels
    }

    /// Overwrite a register's labels; empty labels clean it.
    fn assign_register(&mut self, rd: &str, labels: &HashSet<TaintLabel>) -> bool {
        if labels.is_empty() {
            return self.clean_register(rd);
        }
        let slot = self.reg_taints.entry(rd.to_string()).or_default();
        if slot == labels {
            return false;
        }
        *slot = labels.clone();
        self.stats.register_propagations += 1;
        true
    }

    fn clean_register(&mut self, rd: &str) -> bool {
        if self
            .reg_taints
            .remove(rd)
            .is_some_and(|set| !set.is_empty())
        {
            self.stats.cleanups += 1;
            true
        } else {
            false
        }
    }

    /// Overwrite a byte range's labels; empty labels clear it.
    fn assign_memory(&mut self, addr: u64, len: u64, labels: &HashSet<TaintLabel>) -> bool {
        if labels.is_empty() {
            let cleared = self.mem_taints.clear(addr, len);
            if cleared {
                self.stats.cleanups += 1;
            }
            cleared
        } else {
            let marked = self.mem_taints.mark(addr, len, labels);
            if marked {
                self.stats.memory_propagations += 1;
            }
            marked
        }
    }

    /// Record a confluence point when the unioned input labels span
    /// more than one distinct source. First-seen per distinct set.
    fn record_confluence(&mut self, index: usize, labels: &HashSet<TaintLabel>) {
        let distinct: HashSet<&str> = labels.iter().map(|l| l.id.as_str()).collect();
        if distinct.len() <= 1 {
            return;
        }
        let entry = self.confluence.entry(index).or_default();
        if !entry.iter().any(|seen| seen == labels) {
            entry.push(labels.clone());
        }
    }

    fn collect_implicit(&mut self, labels: &HashSet<TaintLabel>) {
        self.implicit_pool.extend(labels.iter().cloned());
        self.stats.implicit_collections += 1;
    }

    fn into_report(self) -> AdvancedReport {
        AdvancedReport {
            hits: self.hits,
            confluence_points: self.confluence,
            statistics: self.stats,
            reached_target: self.reached,
            final_registers: self.reg_taints,
            final_memory: self.mem_taints,
            implicit_labels: self.implicit_pool,
        }
    }
}

fn derive_all(labels: &HashSet<TaintLabel>) -> HashSet<TaintLabel> {
    labels.iter().map(TaintLabel::derived).collect()
}

fn written_regs(event: &TraceEvent) -> impl Iterator<Item = &str> {
    event
        .writes
        .keys()
        .map(String::as_str)
        .filter(|r| *r != "pc" && *r != "cpsr" && *r != "xzr")
}

fn owned<'a>(iter: impl Iterator<Item = &'a str>) -> Vec<String> {
    iter.map(str::to_string).collect()
}

/// Data registers moved by a load/store, canonical, in list order.
fn data_dest_regs(event: &TraceEvent) -> Vec<String> {
    let decoded = insn::decode(&event.asm);
    insn::transfer_registers(&decoded, event.kind)
        .iter()
        .filter_map(|r| canonical_register(r).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lines: &[&str]) -> EventStore {
        EventStore::parse_str(&lines.join("\n"))
    }

    fn reg_sources(names: &[&str]) -> TaintSources {
        TaintSources {
            registers: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_label_identity_excludes_generation() {
        let a = TaintLabel::new(TaintSourceKind::Register, "r0", 3);
        let b = a.derived();
        assert_eq!(b.generation, 1);
        assert_eq!(a, b);
        let set: HashSet<TaintLabel> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_byte_memory_taint_block_layout() {
        let mut mem = ByteMemoryTaint::default();
        let labels = HashSet::from([TaintLabel::new(TaintSourceKind::Memory, "0x1000", 0)]);
        assert!(mem.mark(0x100e, 4, &labels));
        // The range straddles two 16-byte blocks.
        assert!(mem.any_tainted(0x100e, 1));
        assert!(mem.any_tainted(0x1011, 1));
        assert!(!mem.any_tainted(0x1012, 1));
        assert_eq!(mem.tainted_bytes(), 4);
        assert!(mem.clear(0x100e, 2));
        assert!(!mem.any_tainted(0x100e, 2));
        assert!(mem.any_tainted(0x1010, 2));
    }

    #[test]
    fn test_confluence_of_independent_sources() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "mov r2, r0" r0=0x1 => r2=0x1"#,
            r#"[2][m 0x4][0] 0x1004: "add r3, r2, r1" r2=0x1 r1=0x2 => r3=0x3"#,
        ]);
        let options = AdvancedOptions {
            sources: reg_sources(&["r0", "r1"]),
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
        let sets = report.confluence_points.get(&1).expect("confluence at add");
        assert_eq!(sets.len(), 1);
        let origins: HashSet<&str> = sets[0].iter().map(|l| l.id.as_str()).collect();
        assert_eq!(origins.len(), 2);
        // No confluence at the single-source move.
        assert!(!report.confluence_points.contains_key(&0));
    }

    #[test]
    fn test_partial_overlap_reports_only_overlapping_bytes() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "str r1, [sp]" r1=0x41 sp=0x2000 => "#,
            r#"[2][m 0x4][0] 0x1004: "ldrb r5, [sp, #3]" sp=0x2000 => r5=0x0"#,
            r#"[3][m 0x8][0] 0x1008: "ldrb r6, [sp, #4]" sp=0x2000 => r6=0x0"#,
        ]);
        let options = AdvancedOptions {
            sources: reg_sources(&["r1"]),
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
        // Byte 0x2003 is the last byte of the 4-byte store; 0x2004 is past it.
        assert!(report.final_registers.contains_key("r5"));
        assert!(!report.final_registers.contains_key("r6"));
    }

    #[test]
    fn test_unresolved_multi_load_over_approximates() {
        // r9 is never observed, so the ldm address cannot be resolved;
        // every listed destination still gains the live memory labels.
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "str r1, [r8]" r1=0x41 r8=0x2000 => "#,
            r#"[2][m 0x4][0] 0x1004: "ldm r9, {r4, r5}" => r4=0x0 r5=0x0"#,
        ]);
        let options = AdvancedOptions {
            sources: reg_sources(&["r1"]),
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
        assert!(report.final_registers.contains_key("r4"));
        assert!(report.final_registers.contains_key("r5"));
    }

    #[test]
    fn test_max_steps_ignores_skipped_call_groups() {
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

        let options = AdvancedOptions {
            sources: reg_sources(&["r0"]),
            same_call_only: true,
            max_steps: 4,
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
        // The six callee events are skipped without draining the budget,
        // so the post-return move still propagates.
        assert!(report.final_registers.contains_key("r4"));
        assert_eq!(report.statistics.steps, 3);
    }

    #[test]
    fn test_generation_grows_along_chain() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "mov r2, r1" r1=0x5 => r2=0x5"#,
            r#"[2][m 0x4][0] 0x1004: "mov r3, r2" r2=0x5 => r3=0x5"#,
        ]);
        let options = AdvancedOptions {
            sources: reg_sources(&["r1"]),
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
        let r2 = report.final_registers.get("r2").unwrap();
        assert_eq!(r2.iter().next().unwrap().generation, 1);
        let r3 = report.final_registers.get("r3").unwrap();
        assert_eq!(r3.iter().next().unwrap().generation, 2);
    }

    #[test]
    fn test_policy_controls_implicit_collection() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "cmp r1, #0" r1=0x5"#,
            r#"[2][m 0x4][0] 0x1004: "bne #0x40""#,
        ]);
        for (policy, expected) in [
            (TaintPolicy::Strict, 0),
            (TaintPolicy::Normal, 1),
            (TaintPolicy::Loose, 1),
        ] {
            let options = AdvancedOptions {
                sources: reg_sources(&["r1"]),
                policy,
                ..Default::default()
            };
            let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
            assert_eq!(
                report.statistics.implicit_collections, expected,
                "policy {policy:?}"
            );
        }
    }

    #[test]
    fn test_target_reached() {
        let s = store(&[
            r#"[1][m 0x0][0] 0x1000: "mov r2, r1" r1=0x5 => r2=0x5"#,
            r#"[2][m 0x4][0] 0x1004: "mov r3, r2" r2=0x5 => r3=0x5"#,
        ]);
        let options = AdvancedOptions {
            sources: reg_sources(&["r1"]),
            targets: TaintTargets {
                registers: vec!["r3".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
        assert!(report.reached_target);

        let miss = AdvancedOptions {
            sources: reg_sources(&["r9"]),
            targets: TaintTargets {
                registers: vec!["r3".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &miss, &CancelToken::new()).unwrap();
        assert!(!report.reached_target);
    }

    #[test]
    fn test_empty_store_neutral_report() {
        let empty = EventStore::parse_str("");
        let report = analyze_advanced(
            &empty,
            0,
            &AdvancedOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(report.hits.is_empty());
        assert!(report.confluence_points.is_empty());
        assert!(!report.reached_target);
        assert_eq!(report.statistics.steps, 0);
    }

    #[test]
    fn test_invalid_source_register_is_error() {
        let s = store(&[r#"[1][m 0x0][0] 0x1000: "nop""#]);
        let options = AdvancedOptions {
            sources: reg_sources(&["q31"]),
            ..Default::default()
        };
        assert!(analyze_advanced(&s, 0, &options, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_report_serializes() {
        let s = store(&[r#"[1][m 0x0][0] 0x1000: "mov r2, r1" r1=0x5 => r2=0x5"#]);
        let options = AdvancedOptions {
            sources: reg_sources(&["r1"]),
            ..Default::default()
        };
        let report = analyze_advanced(&s, 0, &options, &CancelToken::new()).unwrap();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"hits\""));
        assert!(json.contains("\"reached_target\""));
    }
}
