//! Closed instruction classification over decoded trace text.
//!
//! Every propagation rule in the analyzers is keyed by one [`InsnKind`]
//! variant, so an unhandled instruction class is a visible gap in a
//! `match` rather than a silent string-pattern fallthrough. Classification
//! looks at the parsed shape (mnemonic class plus operand kinds): a move
//! with an immediate source and a move between registers land in
//! different variants even though the mnemonic text is identical.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::event::{canonical_register, is_register_name};

/// Instruction classification driving taint propagation and slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InsnKind {
    /// Register-to-register data operation (add/sub/and/orr/eor/mov/...).
    DataOp,
    /// Long or accumulating multiply with two result registers.
    MulLong,
    /// Sign/zero extend combined with accumulate.
    ExtendAcc,
    /// Bitwise-not family: or-not, bit-clear, move-not.
    BitwiseNot,
    /// Conditional select / increment / invert / negate.
    CondSelect,
    /// Condition-set writing a flag-derived 0/1 constant.
    CondSet,
    /// Address-constant computation (adr/adrp).
    AddrConst,
    /// Partial-width immediate merge (movk/movt/bfi/bfc/bfxil).
    PartialImm,
    /// Statically constant result: immediate move, self-XOR,
    /// self-subtract, multiply by zero.
    ConstWrite,
    /// Single-register load.
    Load,
    /// Multi-register load (pop/ldm/ldp/ldrd).
    LoadMulti,
    /// PC-relative load from the literal pool.
    LiteralPoolLoad,
    /// Single-register store.
    Store,
    /// Multi-register store (push/stm/stp/strd).
    StoreMulti,
    /// Flag-setting comparison with no destination register.
    Compare,
    /// Control transfer.
    Branch {
        /// Branch-with-link (call shape).
        link: bool,
        /// Condition-dependent transfer.
        conditional: bool,
    },
    /// Function return shape.
    Return,
    /// Anything else (system, barrier, hint, unrecognized).
    Other,
}

/// Mnemonic and comma-split operands of one decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Lowercased mnemonic.
    pub mnemonic: String,
    /// Operand tokens, split on commas outside brackets and braces.
    pub operands: Vec<String>,
}

lazy_static! {
    static ref BRACKET_RE: Regex = Regex::new(r"\[([^\]]+)\]").expect("bracket pattern");
    static ref DATA_OPS: HashSet<&'static str> = [
        "add", "adds", "adc", "adcs", "sub", "subs", "sbc", "sbcs", "rsb", "rsbs", "rsc",
        "and", "ands", "orr", "orrs", "eor", "eors", "mov", "movs", "movz", "movn", "movw",
        "lsl", "lsls", "lsr", "lsrs", "asr", "asrs", "ror", "rors", "rrx", "lslv", "lsrv",
        "asrv", "rorv", "mul", "muls", "mla", "mls", "madd", "msub", "mneg", "smulh", "umulh",
        "sdiv", "udiv", "neg", "negs", "ngc", "clz", "rev", "rev16", "rev32", "rbit",
        "ubfx", "sbfx", "uxtb", "uxth", "uxtw", "sxtb", "sxth", "sxtw", "extr",
    ]
    .into_iter()
    .collect();
    static ref SELF_CANCEL: HashSet<&'static str> =
        ["eor", "eors", "sub", "subs", "rsb", "rsbs", "bic", "bics"]
            .into_iter()
            .collect();
    static ref MOVE_FAMILY: HashSet<&'static str> =
        ["mov", "movs", "movz", "movn", "movw"].into_iter().collect();
    static ref BITWISE_NOT: HashSet<&'static str> =
        ["mvn", "mvns", "orn", "bic", "bics", "eon"].into_iter().collect();
    static ref MUL_LONG: HashSet<&'static str> = [
        "umull", "umulls", "smull", "smulls", "umlal", "umlals", "smlal", "smlals", "umaal",
    ]
    .into_iter()
    .collect();
    static ref EXTEND_ACC: HashSet<&'static str> =
        ["sxtab", "sxtab16", "sxtah", "uxtab", "uxtab16", "uxtah"]
            .into_iter()
            .collect();
    static ref COMPARES: HashSet<&'static str> =
        ["cmp", "cmn", "tst", "teq", "ccmp", "ccmn"].into_iter().collect();
    static ref COND_SUFFIXES: HashSet<&'static str> = [
        "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt",
        "gt", "le", "al",
    ]
    .into_iter()
    .collect();
}

/// Split decoded instruction text into mnemonic and operand tokens.
///
/// Commas inside `[...]` addressing expressions and `{...}` register
/// lists do not split operands.
pub fn decode(asm: &str) -> Decoded {
    let trimmed = asm.trim();
    let (mnemonic, rest) = match trimmed.find(char::is_whitespace) {
        Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
        None => (trimmed, ""),
    };

    let mut operands = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in rest.chars() {
        match ch {
            '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                let token = current.trim();
                if !token.is_empty() {
                    operands.push(token.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let token = current.trim();
    if !token.is_empty() {
        operands.push(token.to_string());
    }

    Decoded {
        mnemonic: mnemonic.to_ascii_lowercase(),
        operands,
    }
}

/// Classify raw decoded text.
pub fn classify(asm: &str) -> InsnKind {
    classify_decoded(&decode(asm))
}

/// Classify an already decoded instruction.
pub fn classify_decoded(d: &Decoded) -> InsnKind {
    let m = d.mnemonic.as_str();
    if m.is_empty() {
        return InsnKind::Other;
    }

    if let Some(kind) = classify_branch(d) {
        return kind;
    }

    // Memory transfers before anything suffix-based: "push" ends in 'h'
    // and "stp" would otherwise never reach the width logic.
    match m {
        "pop" => return InsnKind::LoadMulti,
        "push" => return InsnKind::StoreMulti,
        "ldp" | "ldpsw" | "ldrd" => return InsnKind::LoadMulti,
        "stp" | "strd" => return InsnKind::StoreMulti,
        _ => {}
    }
    if m.starts_with("ldm") {
        return InsnKind::LoadMulti;
    }
    if m.starts_with("stm") {
        return InsnKind::StoreMulti;
    }
    if m.starts_with("ldr") || m.starts_with("ldur") || m.starts_with("ldar") || m.starts_with("ldax") {
        if d.operands.iter().any(|op| is_pc_relative(op)) {
            return InsnKind::LiteralPoolLoad;
        }
        return InsnKind::Load;
    }
    if m.starts_with("str") || m.starts_with("stur") || m.starts_with("stlr") || m.starts_with("stx") {
        return InsnKind::Store;
    }

    let base = strip_cond_suffix(m);
    if COMPARES.contains(base) {
        return InsnKind::Compare;
    }
    match base {
        "csel" | "csinc" | "csinv" | "csneg" | "cinc" | "cinv" | "cneg" => {
            return InsnKind::CondSelect
        }
        "cset" | "csetm" => return InsnKind::CondSet,
        "adr" | "adrp" => return InsnKind::AddrConst,
        "movk" | "movt" | "bfi" | "bfc" | "bfxil" => return InsnKind::PartialImm,
        _ => {}
    }
    if MUL_LONG.contains(base) {
        return InsnKind::MulLong;
    }
    if EXTEND_ACC.contains(base) {
        return InsnKind::ExtendAcc;
    }

    if is_constant_result(base, &d.operands) {
        return InsnKind::ConstWrite;
    }
    if BITWISE_NOT.contains(base) {
        return InsnKind::BitwiseNot;
    }
    if DATA_OPS.contains(base) {
        return InsnKind::DataOp;
    }
    // Unknown mnemonic writing a register: treat as a plain data op so
    // taint still flows rather than silently stopping.
    if d.operands.first().is_some_and(|op| is_register_name(op)) && d.operands.len() >= 2 {
        return InsnKind::DataOp;
    }
    InsnKind::Other
}

/// Detect instructions whose result is statically zero or constant:
/// self-XOR, self-subtract, bit-clear against itself, AND with zero,
/// multiply by the zero register, and immediate-only moves.
fn is_constant_result(base: &str, ops: &[String]) -> bool {
    if SELF_CANCEL.contains(base)
        && ops.len() == 3
        && is_register_name(&ops[1])
        && ops[1].eq_ignore_ascii_case(&ops[2])
    {
        return true;
    }
    if (base == "and" || base == "ands")
        && ops
            .last()
            .is_some_and(|op| matches!(parse_imm(op), Some(0)))
    {
        return true;
    }
    if (base == "mul" || base == "muls")
        && ops.len() >= 2
        && ops[1..].iter().any(|op| is_zero_operand(op))
    {
        return true;
    }
    if MOVE_FAMILY.contains(base) && ops.len() >= 2 && ops[1..].iter().all(|op| is_zero_or_imm(op))
    {
        return true;
    }
    false
}

fn is_zero_operand(op: &str) -> bool {
    op.eq_ignore_ascii_case("xzr")
        || op.eq_ignore_ascii_case("wzr")
        || matches!(parse_imm(op), Some(0))
}

fn is_zero_or_imm(op: &str) -> bool {
    op.starts_with('#')
        || op.eq_ignore_ascii_case("xzr")
        || op.eq_ignore_ascii_case("wzr")
        || op.starts_with("lsl")
}

fn is_pc_relative(op: &str) -> bool {
    let lower = op.to_ascii_lowercase();
    lower.starts_with("[pc") || lower.starts_with("=")
}

fn classify_branch(d: &Decoded) -> Option<InsnKind> {
    let m = d.mnemonic.as_str();
    match m {
        "ret" => return Some(InsnKind::Return),
        "bx" => {
            return Some(if d.operands.first().map(String::as_str) == Some("lr") {
                InsnKind::Return
            } else {
                InsnKind::Branch {
                    link: false,
                    conditional: false,
                }
            })
        }
        "blx" | "blr" => {
            return Some(InsnKind::Branch {
                link: true,
                conditional: false,
            })
        }
        "bl" => {
            return Some(InsnKind::Branch {
                link: true,
                conditional: false,
            })
        }
        "b" | "br" => {
            return Some(InsnKind::Branch {
                link: false,
                conditional: false,
            })
        }
        "cbz" | "cbnz" | "tbz" | "tbnz" => {
            return Some(InsnKind::Branch {
                link: false,
                conditional: true,
            })
        }
        _ => {}
    }
    if let Some(cond) = m.strip_prefix("b.") {
        if COND_SUFFIXES.contains(cond) {
            return Some(InsnKind::Branch {
                link: false,
                conditional: true,
            });
        }
    }
    if let Some(cond) = m.strip_prefix("bl") {
        if COND_SUFFIXES.contains(cond) {
            return Some(InsnKind::Branch {
                link: true,
                conditional: true,
            });
        }
    }
    if let Some(cond) = m.strip_prefix("b") {
        if COND_SUFFIXES.contains(cond) {
            return Some(InsnKind::Branch {
                link: false,
                conditional: true,
            });
        }
    }
    None
}

/// Strip an ARM32 condition suffix when the remainder is still a
/// recognized mnemonic ("addne" -> "add"). Suffix-free names pass
/// through unchanged.
fn strip_cond_suffix(m: &str) -> &str {
    if m.len() > 2 {
        let (head, tail) = m.split_at(m.len() - 2);
        if COND_SUFFIXES.contains(tail)
            && (DATA_OPS.contains(head)
                || BITWISE_NOT.contains(head)
                || COMPARES.contains(head)
                || MUL_LONG.contains(head)
                || EXTEND_ACC.contains(head)
                || MOVE_FAMILY.contains(head))
        {
            return head;
        }
    }
    m
}

/// True for call shapes (branch with link).
pub fn is_call(d: &Decoded) -> bool {
    matches!(
        classify_branch(d),
        Some(InsnKind::Branch { link: true, .. })
    )
}

/// True for return shapes: `ret`, `bx lr`, writes to `pc` via move or
/// load, and multi-register loads whose list contains `pc`.
pub fn is_return(d: &Decoded, kind: InsnKind) -> bool {
    if kind == InsnKind::Return {
        return true;
    }
    let m = d.mnemonic.as_str();
    let first_is_pc = d
        .operands
        .first()
        .is_some_and(|op| op.eq_ignore_ascii_case("pc"));
    if first_is_pc && (MOVE_FAMILY.contains(m) || m.starts_with("ldr")) {
        return true;
    }
    if matches!(kind, InsnKind::LoadMulti) {
        return transfer_registers(d, kind)
            .iter()
            .any(|r| r == "pc");
    }
    false
}

/// Registers moved to or from memory, raw lowercase names in list order.
///
/// For `push`/`pop`/`ldm`/`stm` this is the braced register list (with
/// ranges expanded); for pair and double transfers the registers before
/// the addressing operand; for single transfers the first operand.
pub fn transfer_registers(d: &Decoded, kind: InsnKind) -> Vec<String> {
    match kind {
        InsnKind::Load | InsnKind::Store | InsnKind::LiteralPoolLoad => d
            .operands
            .first()
            .filter(|op| is_register_name(op))
            .map(|op| vec![op.to_ascii_lowercase()])
            .unwrap_or_default(),
        InsnKind::LoadMulti | InsnKind::StoreMulti => {
            if let Some(list) = d.operands.iter().find(|op| op.starts_with('{')) {
                parse_reg_list(list)
            } else {
                // ldp/stp/ldrd/strd: registers precede the bracket operand.
                d.operands
                    .iter()
                    .take_while(|op| !op.starts_with('['))
                    .filter(|op| is_register_name(op))
                    .map(|op| op.to_ascii_lowercase())
                    .collect()
            }
        }
        _ => Vec::new(),
    }
}

/// Expand a braced register list, including ranges like `{r4-r6, lr}`.
pub fn parse_reg_list(op: &str) -> Vec<String> {
    let inner = op.trim().trim_start_matches('{').trim_end_matches('}');
    let mut regs = Vec::new();
    for part in inner.split(',') {
        let part = part.trim().to_ascii_lowercase();
        if let Some((lo, hi)) = part.split_once('-') {
            if let Some(expanded) = expand_range(lo.trim(), hi.trim()) {
                regs.extend(expanded);
                continue;
            }
        }
        if is_register_name(&part) {
            regs.push(part);
        }
    }
    regs
}

fn expand_range(lo: &str, hi: &str) -> Option<Vec<String>> {
    let class = lo.chars().next()?;
    if hi.chars().next()? != class {
        return None;
    }
    let start: u8 = lo[1..].parse().ok()?;
    let end: u8 = hi[1..].parse().ok()?;
    if end < start {
        return None;
    }
    Some((start..=end).map(|n| format!("{class}{n}")).collect())
}

/// Resolve the effective address of a memory operand.
///
/// `resolve` maps a canonical register name to its pre-state value.
/// Handles `[base]`, `[base, #imm]`, `[base, index]`,
/// `[base, index, lsl #n]`, `uxtw`/`sxtw` extensions, and pre-index
/// writeback. Post-indexed immediates sit outside the brackets and are
/// excluded by construction.
pub fn effective_address<F>(asm: &str, resolve: F) -> Option<u64>
where
    F: Fn(&str) -> Option<u64>,
{
    let caps = BRACKET_RE.captures(asm)?;
    let inner = caps.get(1)?.as_str();
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    let base_name = canonical_register(parts.first()?).ok()?;
    let base = resolve(&base_name)?;

    let Some(second) = parts.get(1) else {
        return Some(base);
    };

    if let Some(imm) = parse_imm(second) {
        return Some(base.wrapping_add(imm as u64));
    }

    let raw_index = second.to_ascii_lowercase();
    let index_name = canonical_register(second).ok()?;
    let raw_value = resolve(&index_name)?;
    let mut index = if raw_index.starts_with('w') {
        raw_value & 0xffff_ffff
    } else {
        raw_value
    };
    if let Some(ext) = parts.get(2) {
        let ext = ext.to_ascii_lowercase();
        let shift = ext
            .split('#')
            .nth(1)
            .and_then(|n| n.trim().parse::<u32>().ok())
            .unwrap_or(0);
        if ext.starts_with("lsl") {
            index <<= shift;
        } else if ext.starts_with("uxtw") {
            index = (raw_value & 0xffff_ffff) << shift;
        } else if ext.starts_with("sxtw") {
            index = ((raw_value as u32 as i32 as i64) << shift) as u64;
        } else {
            return None;
        }
    }
    Some(base.wrapping_add(index))
}

/// Base register of a bracket-free multi-register transfer:
/// `sp` for push/pop, the first operand (writeback marker stripped)
/// for ldm/stm.
pub fn multi_base_register(d: &Decoded) -> Option<String> {
    match d.mnemonic.as_str() {
        "push" | "pop" => Some("sp".to_string()),
        m if m.starts_with("ldm") || m.starts_with("stm") => {
            let base = d.operands.first()?.trim_end_matches('!');
            canonical_register(base).ok()
        }
        _ => None,
    }
}

/// Parse an immediate token like `#16`, `#-8`, or `#0x1f`.
pub fn parse_imm(tok: &str) -> Option<i64> {
    let body = tok.trim().strip_prefix('#')?.trim();
    let (neg, digits) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if neg { -value } else { value })
}

/// Access width in bytes for a memory transfer; per register for
/// multi-register transfers. `regs` are the raw transfer register names.
pub fn access_width(mnemonic: &str, kind: InsnKind, regs: &[String]) -> u8 {
    match kind {
        InsnKind::LoadMulti | InsnKind::StoreMulti => per_register_width(regs),
        InsnKind::Load | InsnKind::Store | InsnKind::LiteralPoolLoad => {
            let m = mnemonic.to_ascii_lowercase();
            let base = strip_cond_suffix(&m);
            if base.ends_with("sb") || base.ends_with('b') {
                1
            } else if base.ends_with("sh") || base.ends_with('h') {
                2
            } else if base.ends_with("sw") {
                4
            } else {
                per_register_width(regs)
            }
        }
        _ => 0,
    }
}

fn per_register_width(regs: &[String]) -> u8 {
    for reg in regs {
        match reg.chars().next() {
            Some('x') => return 8,
            Some('w') | Some('r') => return 4,
            _ => {}
        }
    }
    // Only sp/lr/pc named: assume the narrow width, matching 32-bit
    // push/pop of the link register.
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_respects_brackets_and_braces() {
        let d = decode("ldr x0, [x1, #8]");
        assert_eq!(d.mnemonic, "ldr");
        assert_eq!(d.operands, vec!["x0", "[x1, #8]"]);

        let d = decode("push {r4, r5, lr}");
        assert_eq!(d.operands, vec!["{r4, r5, lr}"]);
    }

    #[test]
    fn test_classify_data_and_const() {
        assert_eq!(classify("add x0, x1, x2"), InsnKind::DataOp);
        assert_eq!(classify("mov r1, r2"), InsnKind::DataOp);
        assert_eq!(classify("mov r1, #5"), InsnKind::ConstWrite);
        assert_eq!(classify("movz x8, #0x10, lsl #16"), InsnKind::ConstWrite);
        assert_eq!(classify("mov x3, xzr"), InsnKind::ConstWrite);
        assert_eq!(classify("eor r2, r1, r1"), InsnKind::ConstWrite);
        assert_eq!(classify("sub x4, x9, x9"), InsnKind::ConstWrite);
        assert_eq!(classify("and r0, r3, #0"), InsnKind::ConstWrite);
        assert_eq!(classify("mul w2, w5, wzr"), InsnKind::ConstWrite);
        // Same mnemonics with live register sources stay data ops.
        assert_eq!(classify("eor r2, r1, r3"), InsnKind::DataOp);
    }

    #[test]
    fn test_classify_memory_shapes() {
        assert_eq!(classify("ldr x0, [x1]"), InsnKind::Load);
        assert_eq!(classify("ldrb w2, [x1, #1]"), InsnKind::Load);
        assert_eq!(classify("str w0, [sp, #0x10]"), InsnKind::Store);
        assert_eq!(classify("ldr r3, [pc, #0x18]"), InsnKind::LiteralPoolLoad);
        assert_eq!(classify("ldp x29, x30, [sp], #16"), InsnKind::LoadMulti);
        assert_eq!(classify("stp x19, x20, [sp, #-32]!"), InsnKind::StoreMulti);
        assert_eq!(classify("push {r4-r6, lr}"), InsnKind::StoreMulti);
        assert_eq!(classify("pop {r4, pc}"), InsnKind::LoadMulti);
        assert_eq!(classify("stmia sp!, {r0, r1}"), InsnKind::StoreMulti);
    }

    #[test]
    fn test_classify_special_rows() {
        assert_eq!(classify("csel x0, x1, x2, ne"), InsnKind::CondSelect);
        assert_eq!(classify("cset w0, eq"), InsnKind::CondSet);
        assert_eq!(classify("adrp x8, #0x7f0000"), InsnKind::AddrConst);
        assert_eq!(classify("movk x8, #0x1234, lsl #16"), InsnKind::PartialImm);
        assert_eq!(classify("umull r0, r1, r2, r3"), InsnKind::MulLong);
        assert_eq!(classify("uxtab r1, r2, r3"), InsnKind::ExtendAcc);
        assert_eq!(classify("mvn r0, r1"), InsnKind::BitwiseNot);
        assert_eq!(classify("bic r0, r1, r2"), InsnKind::BitwiseNot);
        assert_eq!(classify("cmp x0, #0"), InsnKind::Compare);
    }

    #[test]
    fn test_classify_branches() {
        assert_eq!(
            classify("bl #0x1234"),
            InsnKind::Branch {
                link: true,
                conditional: false
            }
        );
        assert_eq!(
            classify("b.eq #0x40"),
            InsnKind::Branch {
                link: false,
                conditional: true
            }
        );
        assert_eq!(
            classify("bne #0x40"),
            InsnKind::Branch {
                link: false,
                conditional: true
            }
        );
        assert_eq!(
            classify("cbz w0, #0x20"),
            InsnKind::Branch {
                link: false,
                conditional: true
            }
        );
        assert_eq!(classify("ret"), InsnKind::Return);
        assert_eq!(classify("bx lr"), InsnKind::Return);
    }

    #[test]
    fn test_call_and_return_shapes() {
        assert!(is_call(&decode("bl #0x4000")));
        assert!(is_call(&decode("blx r3")));
        assert!(!is_call(&decode("b #0x4000")));

        let pop_pc = decode("pop {r4, pc}");
        assert!(is_return(&pop_pc, classify_decoded(&pop_pc)));
        let pop_plain = decode("pop {r4, r5}");
        assert!(!is_return(&pop_plain, classify_decoded(&pop_plain)));
    }

    #[test]
    fn test_transfer_registers() {
        let d = decode("stp x19, x20, [sp, #16]");
        assert_eq!(
            transfer_registers(&d, InsnKind::StoreMulti),
            vec!["x19", "x20"]
        );
        let d = decode("push {r4-r6, lr}");
        assert_eq!(
            transfer_registers(&d, InsnKind::StoreMulti),
            vec!["r4", "r5", "r6", "lr"]
        );
        let d = decode("str w0, [x1]");
        assert_eq!(transfer_registers(&d, InsnKind::Store), vec!["w0"]);
    }

    #[test]
    fn test_effective_address_forms() {
        let resolve = |name: &str| match name {
            "x1" => Some(0x1000u64),
            "x2" => Some(0x10u64),
            "sp" => Some(0x7fff_0000u64),
            _ => None,
        };
        assert_eq!(effective_address("ldr x0, [x1]", resolve), Some(0x1000));
        assert_eq!(
            effective_address("ldr x0, [x1, #-8]", resolve),
            Some(0xff8)
        );
        assert_eq!(
            effective_address("ldr x0, [x1, x2, lsl #3]", resolve),
            Some(0x1080)
        );
        assert_eq!(
            effective_address("str x0, [sp, #0x20]!", resolve),
            Some(0x7fff_0020)
        );
        // Post-index: address is the base alone.
        assert_eq!(
            effective_address("ldr x0, [x1], #8", resolve),
            Some(0x1000)
        );
        assert_eq!(effective_address("add x0, x1, x2", resolve), None);
    }

    #[test]
    fn test_access_width() {
        assert_eq!(
            access_width("ldrb", InsnKind::Load, &["w2".to_string()]),
            1
        );
        assert_eq!(
            access_width("ldrsh", InsnKind::Load, &["w2".to_string()]),
            2
        );
        assert_eq!(access_width("ldr", InsnKind::Load, &["w2".to_string()]), 4);
        assert_eq!(access_width("ldr", InsnKind::Load, &["x2".to_string()]), 8);
        assert_eq!(
            access_width(
                "stp",
                InsnKind::StoreMulti,
                &["x19".to_string(), "x20".to_string()]
            ),
            8
        );
        assert_eq!(
            access_width("push", InsnKind::StoreMulti, &["r4".to_string()]),
            4
        );
    }
}
