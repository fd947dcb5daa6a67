//! Value-flow and taint analysis over recorded instruction traces.
//!
//! Every value in a recorded trace is already concrete and the executed
//! path already fixed, so this crate answers its two questions by exact
//! deterministic simulation over the event sequence rather than by
//! symbolic exploration:
//!
//! - "where did this value come from?" — [`trace_backward`] walks a
//!   greedy def-use slice backward through register writes and the
//!   stores feeding each load.
//! - "where does this value's influence spread?" — [`propagate_forward`]
//!   tracks a boolean taint set, and [`analyze_advanced`] tracks
//!   byte-granular memory taint with provenance labels, confluence
//!   detection, and selectable implicit-flow policies.
//!
//! Start by parsing trace text into an [`EventStore`]; the store is
//! immutable afterwards and every analysis consumes it read-only, so
//! concurrent queries need no locking over it. Long scans poll a
//! [`CancelToken`] every iteration and return partial results when the
//! host cancels.
//!
//! ```
//! use trace_taint::{EventStore, ForwardOptions, CancelToken, propagate_forward};
//!
//! let store = EventStore::parse_str(
//!     r#"[1][libdemo.so 0x0][e1a02001] 0x1000: "mov r2, r1" r1=0x41 => r2=0x41"#,
//! );
//! let options = ForwardOptions {
//!     source_registers: vec!["r1".to_string()],
//!     ..Default::default()
//! };
//! let hits = propagate_forward(&store, 0, &options, &CancelToken::new()).unwrap();
//! assert_eq!(hits, vec![0]);
//! ```

pub mod backward;
pub mod cancel;
pub mod enhanced;
pub mod error;
pub mod event;
pub mod forward;
pub mod insn;
pub mod regstate;
pub mod store;

pub use backward::{trace_backward, BackwardOptions};
pub use cancel::CancelToken;
pub use enhanced::{
    analyze_advanced, AdvancedOptions, AdvancedReport, ByteMemoryTaint, ExternalInput,
    MemoryRange, ScanStatistics, TaintLabel, TaintPolicy, TaintSourceKind, TaintSources,
    TaintTargets,
};
pub use error::{parse_address, QueryError, QueryResult};
pub use event::{canonical_register, MemAccessKind, TraceEvent};
pub use forward::{propagate_forward, ForwardOptions};
pub use insn::InsnKind;
pub use regstate::{RegisterReconstructor, DEFAULT_SNAPSHOT_CAPACITY};
pub use store::EventStore;
