//! Subgroup code generation
//!
//! A [`SubgroupProvider`] owns everything fixed for one kernel instance:
//! the resolved capability set, the backend, that backend's algorithm
//! catalog and the extension negotiator. Resolution methods live next to
//! their ladders:
//!
//! - [`resolve`]: broadcast and the shuffle family
//! - [`reduce`]: reductions
//! - [`query`]: size and id queries, all/any votes
//!
//! All of them register helpers in a caller-supplied
//! [`PatchRegistry`](crate::codegen::registry::PatchRegistry), which is
//! program-scoped and outlives any one provider.

pub mod capability;
pub mod catalog;
pub mod extension;
pub mod negotiate;
pub mod op;
pub mod patch;
pub mod ptx;
pub mod query;
pub mod reduce;
pub mod resolve;

pub use capability::{Capabilities, MimicMode, SubgroupAttributes};
pub use catalog::{AlgoId, Algorithm, AlgorithmCatalog, Backend, DTypeSupport, Features, LaneSet};
pub use extension::SubgroupExtension;
pub use negotiate::{ExtensionFlags, ExtensionHost, ExtensionNegotiator, ProgramWarnings};
pub use op::{CallSite, CastTriple, ExtraParam, ReduceOp, ResolvedOperation, ShuffleOp, Tier};
pub use query::{QueryResult, SubgroupQuery};

use crate::codegen::context::KernelContext;
use crate::config::DeviceQuery;
use crate::diagnostics::Result;

/// Per-instance subgroup resolver
#[derive(Debug, Clone)]
pub struct SubgroupProvider {
    caps: Capabilities,
    backend: Backend,
    catalog: AlgorithmCatalog,
    negotiator: ExtensionNegotiator,
}

impl SubgroupProvider {
    /// Resolve capabilities and pick the backend for `device`
    pub fn new(device: &dyn DeviceQuery, attrs: &SubgroupAttributes) -> Self {
        let caps = Capabilities::resolve(device, &attrs.args);
        let backend = Backend::select(&caps, attrs.mimic, device);
        tracing::debug!(
            "Subgroup provider [{}] with mimic [{}] and caps [{}]",
            backend,
            attrs.mimic,
            caps
        );
        Self::with_backend(caps, backend)
    }

    pub fn with_backend(caps: Capabilities, backend: Backend) -> Self {
        Self {
            caps,
            backend,
            catalog: AlgorithmCatalog::for_backend(backend, &caps),
            negotiator: ExtensionNegotiator::new(backend),
        }
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn catalog(&self) -> &AlgorithmCatalog {
        &self.catalog
    }

    pub fn flags(&self) -> &ExtensionFlags {
        &self.negotiator.flags
    }

    pub fn pending_warnings(&self) -> &[String] {
        self.negotiator.pending_warnings()
    }

    pub fn begin(&mut self, kernel: &str) {
        self.negotiator.begin(kernel);
    }

    /// Apply the instance's flags; returns the warnings logged for the
    /// first time in this program
    pub fn finish(
        &mut self,
        kernel: &mut KernelContext,
        host: &mut dyn ExtensionHost,
        subgroup_size: u32,
        warnings: &mut ProgramWarnings,
    ) -> Result<Vec<String>> {
        self.negotiator.finish(kernel, host, subgroup_size, warnings)
    }

    fn sm_version(&self) -> u32 {
        match self.backend {
            Backend::Ptx { sm_version } => sm_version,
            _ => 0,
        }
    }
}
