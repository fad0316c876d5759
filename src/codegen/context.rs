//! Compilation context shared by kernel extensions
//!
//! ```text
//! begin_kernel ─▶ meta* ─▶ replace_func* ─▶ finish_kernel   (per instance)
//!                                   │
//!                                   ▼
//!                  ProgramHost: registry + enabled extensions (per program)
//! ```

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt::Write;
use std::rc::Rc;

use super::registry::PatchRegistry;
use super::subgroup::ExtensionHost;
use crate::config::DeviceQuery;
use crate::diagnostics::{Result, SubgroupError};

/// State of the kernel instance being generated
#[derive(Debug, Clone, Default, Serialize)]
pub struct KernelContext {
    pub instance_name: String,
    workgroup: [u32; 3],
    /// Keyed kernel attributes, e.g. `reqd_sub_group_size`
    pub attributes: IndexMap<String, String>,
    /// Keyed statements inserted at the top of the kernel body
    pub body_prefixes: IndexMap<String, String>,
    pub warnings: Vec<String>,
}

impl KernelContext {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            ..Default::default()
        }
    }

    pub fn set_workgroup_size(&mut self, dims: [u32; 3]) {
        self.workgroup = dims;
    }

    /// Total work items, 0 when undefined, saturating at `u32::MAX`
    pub fn workgroup_size(&self) -> u32 {
        self.workgroup
            .iter()
            .try_fold(1u32, |acc, &dim| acc.checked_mul(dim))
            .unwrap_or(u32::MAX)
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.attributes.insert(key.into(), text.into());
    }

    pub fn add_body_prefix(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.body_prefixes.insert(key.into(), text.into());
    }
}

/// Argument of a kernel meta directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaArg {
    Int(i64),
    Str(String),
}

impl MetaArg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaArg::Int(v) => Some(*v),
            MetaArg::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaArg::Str(s) => Some(s),
            MetaArg::Int(_) => None,
        }
    }
}

/// Text replacing a DSL call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub text: String,
    pub depends: Vec<String>,
}

/// A code generator hooked into kernel generation
pub trait KernelExtension {
    fn name(&self) -> &str;

    fn begin_instance(&mut self, _kernel: &mut KernelContext) -> Result<()> {
        Ok(())
    }

    /// Returns whether the meta was consumed
    fn instance_meta(&mut self, _meta: &str, _args: &[MetaArg], _kernel: &mut KernelContext) -> Result<bool> {
        Ok(false)
    }

    /// `Ok(None)` when the function is not this extension's
    fn replace_func(
        &mut self,
        func: &str,
        args: &[&str],
        host: &mut dyn ExtensionHost,
    ) -> Result<Option<Replacement>>;

    fn finish_instance(&mut self, _kernel: &mut KernelContext, _host: &mut dyn ExtensionHost) -> Result<()> {
        Ok(())
    }
}

/// Program-scoped state offered to extensions
pub struct ProgramHost {
    device: Rc<dyn DeviceQuery>,
    registry: PatchRegistry,
    enabled: IndexSet<String>,
}

impl ProgramHost {
    pub fn new(device: Rc<dyn DeviceQuery>) -> Self {
        Self {
            device,
            registry: PatchRegistry::new(),
            enabled: IndexSet::new(),
        }
    }

    pub fn enabled_extensions(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    pub fn patch_registry(&self) -> &PatchRegistry {
        &self.registry
    }
}

impl ExtensionHost for ProgramHost {
    fn enable_extension(&mut self, name: &str) -> bool {
        let available = match name {
            "cl_khr_fp16" => self.device.supports_fp16() || self.device.has_extension(name),
            "cl_khr_fp64" => self.device.supports_fp64() || self.device.has_extension(name),
            _ => self.device.has_extension(name),
        };
        if available && self.enabled.insert(name.to_string()) {
            tracing::debug!("Enabled extension [{}]", name);
        }
        available
    }

    fn registry(&mut self) -> &mut PatchRegistry {
        &mut self.registry
    }
}

/// Drives extensions through kernel instances of one program
pub struct CompilationContext {
    host: ProgramHost,
    extensions: Vec<Box<dyn KernelExtension>>,
    kernel: Option<KernelContext>,
}

impl CompilationContext {
    pub fn new(device: Rc<dyn DeviceQuery>) -> Self {
        Self {
            host: ProgramHost::new(device),
            extensions: Vec::new(),
            kernel: None,
        }
    }

    pub fn with_extension(mut self, ext: Box<dyn KernelExtension>) -> Self {
        self.extensions.push(ext);
        self
    }

    pub fn host(&self) -> &ProgramHost {
        &self.host
    }

    pub fn kernel(&self) -> Option<&KernelContext> {
        self.kernel.as_ref()
    }

    pub fn begin_kernel(&mut self, name: &str, workgroup: [u32; 3]) -> Result<()> {
        let mut kernel = KernelContext::new(name);
        kernel.set_workgroup_size(workgroup);
        for ext in self.extensions.iter_mut() {
            ext.begin_instance(&mut kernel)?;
        }
        tracing::debug!("Begin kernel [{}]", name);
        self.kernel = Some(kernel);
        Ok(())
    }

    /// Offer a meta directive to every extension; false if none took it
    pub fn apply_meta(&mut self, meta: &str, args: &[MetaArg]) -> Result<bool> {
        let kernel = self
            .kernel
            .as_mut()
            .ok_or_else(|| SubgroupError::invariant("meta outside a kernel instance"))?;
        let mut consumed = false;
        for ext in self.extensions.iter_mut() {
            consumed |= ext.instance_meta(meta, args, kernel)?;
        }
        Ok(consumed)
    }

    /// First extension claiming `func` produces the replacement
    pub fn replace_func(&mut self, func: &str, args: &[&str]) -> Result<Option<Replacement>> {
        for ext in self.extensions.iter_mut() {
            if let Some(rep) = ext.replace_func(func, args, &mut self.host)? {
                return Ok(Some(rep));
            }
        }
        Ok(None)
    }

    pub fn finish_kernel(&mut self) -> Result<KernelContext> {
        let Some(mut kernel) = self.kernel.take() else {
            return Err(SubgroupError::invariant("no kernel instance in progress"));
        };
        for ext in self.extensions.iter_mut() {
            ext.finish_instance(&mut kernel, &mut self.host)?;
        }
        tracing::debug!("Finish kernel [{}]", kernel.instance_name);
        Ok(kernel)
    }

    pub fn write_extension_pragmas(&self, out: &mut String) {
        for ext in self.host.enabled_extensions() {
            let _ = writeln!(out, "#pragma OPENCL EXTENSION {} : enable", ext);
        }
    }

    pub fn write_all_patched_blocks(&self, out: &mut String) -> Result<()> {
        self.host.registry.write_all(out)
    }

    /// Pragmas followed by every patched block in dependency order
    pub fn program_prelude(&self) -> Result<String> {
        let mut out = String::new();
        self.write_extension_pragmas(&mut out);
        if !out.is_empty() {
            out.push('\n');
        }
        self.write_all_patched_blocks(&mut out)?;
        Ok(out)
    }
}
