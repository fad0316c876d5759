//! Extension negotiation
//!
//! Resolution only raises flags. At kernel finish the negotiator turns them
//! into extension enables and kernel attributes, checks the local mimic's
//! size invariant, and flushes warnings.

use rustc_hash::FxHashSet;

use super::catalog::Backend;
use super::patch::{Helper, PatchRecipe};
use crate::codegen::context::KernelContext;
use crate::codegen::registry::PatchRegistry;
use crate::diagnostics::{Result, SubgroupError};
use crate::types::{ElemKind, VecType};

/// What the compilation context offers a finishing extension
pub trait ExtensionHost {
    /// Request `#pragma OPENCL EXTENSION name : enable`; false when the
    /// device lacks it
    fn enable_extension(&mut self, name: &str) -> bool;

    fn registry(&mut self) -> &mut PatchRegistry;
}

/// Instance-scoped requests raised during resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionFlags {
    pub khr_basic: bool,
    pub khr_ext_type: bool,
    pub khr_shuffle: bool,
    pub khr_shuffle_rel: bool,
    pub khr_ballot: bool,
    pub intel: bool,
    pub intel16: bool,
    pub intel8: bool,
    pub fp16: bool,
    pub fp64: bool,
    pub need_subgroup_size: bool,
    pub need_local_temp: bool,
}

impl ExtensionFlags {
    /// fp16/fp64 for half and double data
    pub fn enable_vec_type(&mut self, vtype: VecType) {
        match (vtype.kind, vtype.bits) {
            (ElemKind::Float, 16) => self.fp16 = true,
            (ElemKind::Float, 64) => self.fp64 = true,
            _ => {}
        }
    }
}

/// Warnings already logged during this program's compilation
#[derive(Debug, Default)]
pub struct ProgramWarnings {
    seen: FxHashSet<String>,
}

impl ProgramWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the messages not seen before, returning them
    pub fn flush(&mut self, pending: Vec<String>) -> Vec<String> {
        let mut logged = Vec::new();
        for msg in pending {
            if self.seen.insert(msg.clone()) {
                tracing::warn!("{}", msg);
                logged.push(msg);
            }
        }
        logged
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Per-provider negotiation state
#[derive(Debug, Clone)]
pub struct ExtensionNegotiator {
    backend: Backend,
    pub flags: ExtensionFlags,
    kernel: Option<String>,
    pending: Vec<String>,
}

impl ExtensionNegotiator {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            flags: ExtensionFlags::default(),
            kernel: None,
            pending: Vec::new(),
        }
    }

    pub fn begin(&mut self, kernel: &str) {
        self.flags = ExtensionFlags::default();
        self.kernel = Some(kernel.to_string());
    }

    /// Kernel instance currently being generated
    pub fn kernel(&self) -> Option<&str> {
        self.kernel.as_deref()
    }

    /// Queue a warning, deduplicated by text
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        if !self.pending.contains(&msg) {
            self.pending.push(msg);
        }
    }

    pub fn pending_warnings(&self) -> &[String] {
        &self.pending
    }

    /// Apply the accumulated flags to `kernel`. `subgroup_size` is the
    /// requested size, 0 when unspecified.
    pub fn finish(
        &mut self,
        kernel: &mut KernelContext,
        host: &mut dyn ExtensionHost,
        subgroup_size: u32,
        warnings: &mut ProgramWarnings,
    ) -> Result<Vec<String>> {
        let flags = self.flags;
        if self.backend == Backend::Local {
            self.finish_local(kernel, host, subgroup_size)?;
        }

        let mut khr_basic = flags.khr_basic;
        if let Backend::Intel { .. } = self.backend {
            if flags.intel {
                host.enable_extension("cl_intel_subgroups");
            }
            if flags.intel16 {
                host.enable_extension("cl_intel_subgroups_short");
            }
            if flags.intel8 {
                host.enable_extension("cl_intel_subgroups_char");
            }
            if khr_basic {
                khr_basic = !host.enable_extension("cl_intel_subgroups");
            }
            if subgroup_size > 0 && host.enable_extension("cl_intel_required_subgroup_size") {
                kernel.add_attribute(
                    "reqd_sub_group_size",
                    format!("__attribute__((intel_reqd_sub_group_size({})))", subgroup_size),
                );
            }
        }

        if khr_basic {
            host.enable_extension("cl_khr_subgroups");
        }
        if flags.khr_ext_type {
            host.enable_extension("cl_khr_subgroup_extended_types");
        }
        if flags.khr_shuffle {
            host.enable_extension("cl_khr_subgroup_shuffle");
        }
        if flags.khr_shuffle_rel {
            host.enable_extension("cl_khr_subgroup_shuffle_relative");
        }
        if flags.khr_ballot {
            host.enable_extension("cl_khr_subgroup_ballot");
        }
        if flags.fp16 {
            host.enable_extension("cl_khr_fp16");
        }
        if flags.fp64 && !host.enable_extension("cl_khr_fp64") {
            host.enable_extension("cl_amd_fp64");
        }

        let logged = warnings.flush(std::mem::take(&mut self.pending));
        self.flags = ExtensionFlags::default();
        self.kernel = None;
        Ok(logged)
    }

    fn finish_local(
        &mut self,
        kernel: &mut KernelContext,
        host: &mut dyn ExtensionHost,
        subgroup_size: u32,
    ) -> Result<()> {
        let flags = self.flags;
        if !flags.need_subgroup_size && !flags.need_local_temp {
            return Ok(());
        }
        let wg_size = kernel.workgroup_size();
        if wg_size == 0 {
            return Err(SubgroupError::invariant(format!(
                "kernel [{}] need to define workgroup size when under fully mimic",
                kernel.instance_name
            )));
        }
        if subgroup_size > 0 && wg_size != subgroup_size {
            return Err(SubgroupError::invariant(format!(
                "requires only 1 subgroup for the whole workgroup, now have subgroup[{}] and workgroup[{}]",
                subgroup_size, wg_size
            )));
        }
        PatchRecipe::Helper(Helper::SizeDefine {
            kernel: kernel.instance_name.clone(),
            size: wg_size,
        })
        .register::<&str>(host.registry(), &[]);

        if flags.need_local_temp {
            kernel.add_body_prefix(
                "oclu_subgroup_mimic_local_slm",
                format!("    local ulong _oclu_subgroup_local[{}];", wg_size.max(16)),
            );
            tracing::debug!("Subgroup mimic [local] is enabled with size [{}]", wg_size);
        }
        Ok(())
    }
}
