//! x86-64 code generation
//!
//! Emits GNU-assembler text in Intel syntax for the System V AMD64 ABI.
//!
//! # Evaluation model
//!
//! Expressions evaluate on a software stack: each expression pushes exactly
//! one 8-byte value on the machine stack, binary operators pop two and push
//! one, and statement positions discard the leftover with `add rsp, 8`.
//! This keeps every node's emission self-contained at the cost of redundant
//! moves; there is no register allocation and no optimization.
//!
//! # Calls and stack alignment
//!
//! Arguments evaluate left to right onto the stack and pop into the
//! argument registers last-to-first. Because the evaluation stack moves rsp
//! in 8-byte steps, alignment at a call site is unknown statically, so each
//! site tests `rsp & 15` at runtime and inserts an 8-byte adjustment on the
//! misaligned path.
//!
//! # Labels
//!
//! All local labels use a `.L` prefix with a per-compilation ordinal:
//! control flow uses `.L.begin/.L.else/.L.end/.L.break/.L.continue`,
//! switch landing pads use `.L.case.N`, user labels are function-scoped as
//! `.L.label.FUNC.NAME`, and every function's epilogue is `.L.return.FUNC`.
//!
//! # Module structure
//!
//! - `state.rs`: the CodeGen struct, label counter, argument registers
//! - `program.rs`: sections, globals, prologue/epilogue, parameter spill
//! - `expr.rs`: expression lowering, loads/stores, calls
//! - `control_flow.rs`: if/loops/switch/goto
//! - `error.rs`: error types

mod control_flow;
mod error;
mod expr;
mod program;
mod state;

pub use error::CodeGenError;
pub use state::CodeGen;
