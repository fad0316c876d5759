//! Subgroup operation codegen for OpenCL kernel templates
//!
//! Kernel templates call portable subgroup functions (`oclu.SubgroupBroadcast`,
//! `oclu.SubgroupSum`, ...). This crate resolves each call against what the
//! target device actually offers and emits the OpenCL C that implements it:
//! a builtin where one fits, otherwise patched helper functions built from
//! narrower primitives, local memory, or inline PTX.
//!
//! # Architecture
//!
//! ```text
//! DeviceQuery ─▶ Capabilities ─▶ Backend ─▶ AlgorithmCatalog
//!                                                │
//! oclu.Subgroup*(...) ─▶ SubgroupExtension ─▶ resolve ladder ─▶ PatchRegistry
//!                                │                                  │
//!                                ▼                                  ▼
//!                     ExtensionNegotiator ─▶ pragmas      blocks in dependency order
//! ```
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use oclu_subgroup::codegen::CompilationContext;
//! use oclu_subgroup::codegen::subgroup::{SubgroupAttributes, SubgroupExtension};
//! use oclu_subgroup::config::{DeviceProfile, Vendor};
//!
//! let device = Rc::new(DeviceProfile::new("gpu", Vendor::Amd).with_extensions(["cl_khr_subgroups"]));
//! let ext = SubgroupExtension::new(device.clone(), &SubgroupAttributes::new("none", ""));
//! let mut ctx = CompilationContext::new(device).with_extension(Box::new(ext));
//!
//! ctx.begin_kernel("scan", [64, 1, 1]).unwrap();
//! let rep = ctx.replace_func("oclu.SubgroupBroadcast", &["u32", "x", "0"]).unwrap().unwrap();
//! assert_eq!(rep.text, "sub_group_broadcast(x, 0)");
//! ctx.finish_kernel().unwrap();
//! ```

pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod types;

pub use codegen::subgroup::{Backend, SubgroupExtension, SubgroupProvider};
pub use config::{DeviceProfile, DeviceQuery, Vendor};
pub use diagnostics::{Result, SubgroupError};
pub use types::VecType;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
