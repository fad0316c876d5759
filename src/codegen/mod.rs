//! OpenCL code generation support
//!
//! - [`registry`]: program-scoped patched blocks, emitted in dependency order
//! - [`context`]: kernel instances and the extensions hooked into them
//! - [`subgroup`]: the subgroup extension and its backends

pub mod context;
pub mod registry;
pub mod subgroup;

pub use context::{CompilationContext, KernelContext, KernelExtension, MetaArg, ProgramHost, Replacement};
pub use registry::{BlockId, PatchRegistry};
