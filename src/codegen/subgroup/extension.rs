//! Kernel extension exposing the `oclu.Subgroup*` functions

use serde::Serialize;
use std::fmt;
use std::rc::Rc;

use super::SubgroupProvider;
use super::capability::SubgroupAttributes;
use super::negotiate::{ExtensionHost, ProgramWarnings};
use super::op::{ReduceOp, ShuffleOp};
use super::ptx::VoteOp;
use super::query::SubgroupQuery;
use crate::codegen::context::{KernelContext, KernelExtension, MetaArg, Replacement};
use crate::config::DeviceQuery;
use crate::diagnostics::{Result, SubgroupError};
use crate::types::VecType;

/// Namespaces the DSL functions may be spelled under
const PREFIXES: [&str; 2] = ["oclu.", "xcomp."];

fn strip_prefix(name: &str) -> &str {
    PREFIXES
        .iter()
        .find_map(|p| name.strip_prefix(p))
        .unwrap_or(name)
}

/// One DSL-level subgroup request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "op", rename_all = "snake_case")]
pub enum Request {
    Query(SubgroupQuery),
    Vote(VoteOp),
    Shuffle(ShuffleOp),
    Reduce(ReduceOp),
}

impl Request {
    /// Look up an unprefixed DSL function name
    pub fn from_dsl(name: &str) -> Option<Request> {
        if let Some(query) = SubgroupQuery::ALL.into_iter().find(|q| q.dsl_name() == name) {
            return Some(Request::Query(query));
        }
        if let Some(op) = ShuffleOp::ALL.into_iter().find(|op| op.dsl_name() == name) {
            return Some(Request::Shuffle(op));
        }
        if let Some(op) = ReduceOp::ALL.into_iter().find(|op| op.dsl_name() == name) {
            return Some(Request::Reduce(op));
        }
        match name {
            "SubgroupAll" => Some(Request::Vote(VoteOp::All)),
            "SubgroupAny" => Some(Request::Vote(VoteOp::Any)),
            _ => None,
        }
    }

    /// Short command-line spelling: `broadcast`, `reduce_sum`, `size`, `all`
    pub fn from_short(name: &str) -> Option<Request> {
        if let Some(op) = ShuffleOp::ALL.into_iter().find(|op| op.name() == name) {
            return Some(Request::Shuffle(op));
        }
        let reduce = name.strip_prefix("reduce_").unwrap_or(name);
        if let Some(op) = ReduceOp::ALL.into_iter().find(|op| op.name() == reduce) {
            return Some(Request::Reduce(op));
        }
        let query = match name {
            "size" => SubgroupQuery::Size,
            "max_size" => SubgroupQuery::MaxSize,
            "count" => SubgroupQuery::Count,
            "id" => SubgroupQuery::Id,
            "local_id" => SubgroupQuery::LocalId,
            "all" => return Some(Request::Vote(VoteOp::All)),
            "any" => return Some(Request::Vote(VoteOp::Any)),
            _ => return None,
        };
        Some(Request::Query(query))
    }

    pub fn dsl_name(&self) -> &'static str {
        match self {
            Request::Query(q) => q.dsl_name(),
            Request::Vote(VoteOp::All) => "SubgroupAll",
            Request::Vote(VoteOp::Any) => "SubgroupAny",
            Request::Shuffle(op) => op.dsl_name(),
            Request::Reduce(op) => op.dsl_name(),
        }
    }

    /// Arguments the DSL call takes, the type name counted
    pub fn arg_count(&self) -> usize {
        match self {
            Request::Query(_) => 0,
            Request::Vote(_) => 1,
            Request::Shuffle(_) => 3,
            Request::Reduce(_) => 2,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dsl_name())
    }
}

/// Parse `op[:vtype]` into a prefixed call with placeholder arguments,
/// e.g. `broadcast:u8v4` becomes `oclu.SubgroupBroadcast(u8v4, x, idx)`
pub fn parse_request(text: &str) -> Result<(String, Vec<String>)> {
    let unknown = || SubgroupError::UnknownRequest {
        text: text.to_string(),
    };
    let (name, vtype) = match text.trim().split_once(':') {
        Some((name, vtype)) => (name.trim(), Some(vtype.trim())),
        None => (text.trim(), None),
    };
    let request = Request::from_short(name).ok_or_else(unknown)?;
    let args: Vec<String> = match (request, vtype) {
        (Request::Query(_), None) => Vec::new(),
        (Request::Vote(_), None) => vec!["pred".to_string()],
        (Request::Shuffle(_), Some(vtype)) => vec![vtype.to_string(), "x".to_string(), "idx".to_string()],
        (Request::Reduce(_), Some(vtype)) => vec![vtype.to_string(), "x".to_string()],
        _ => return Err(unknown()),
    };
    Ok((format!("{}{}", PREFIXES[0], request.dsl_name()), args))
}

/// Subgroup support for one program
pub struct SubgroupExtension {
    device: Rc<dyn DeviceQuery>,
    default: SubgroupProvider,
    active: Option<SubgroupProvider>,
    subgroup_size: u32,
    warnings: ProgramWarnings,
}

impl SubgroupExtension {
    pub fn new(device: Rc<dyn DeviceQuery>, attrs: &SubgroupAttributes) -> Self {
        let default = SubgroupProvider::new(device.as_ref(), attrs);
        Self {
            device,
            default,
            active: None,
            subgroup_size: 0,
            warnings: ProgramWarnings::new(),
        }
    }

    /// Provider of the current instance, the program default outside one
    pub fn provider(&self) -> &SubgroupProvider {
        self.active.as_ref().unwrap_or(&self.default)
    }

    pub fn subgroup_size(&self) -> u32 {
        self.subgroup_size
    }

    pub fn warnings(&self) -> &ProgramWarnings {
        &self.warnings
    }

    fn active_mut(&mut self, func: &str) -> Result<&mut SubgroupProvider> {
        self.active
            .as_mut()
            .ok_or_else(|| SubgroupError::invariant(format!("[{}] used outside a kernel instance", func)))
    }

    fn parse_vtype(func: &str, text: &str) -> Result<VecType> {
        text.parse().map_err(|_| SubgroupError::InvalidVecType {
            func: func.to_string(),
            text: text.to_string(),
        })
    }
}

impl KernelExtension for SubgroupExtension {
    fn name(&self) -> &str {
        "Subgroup"
    }

    fn begin_instance(&mut self, kernel: &mut KernelContext) -> Result<()> {
        let mut provider = self.default.clone();
        provider.begin(&kernel.instance_name);
        self.active = Some(provider);
        self.subgroup_size = 0;
        Ok(())
    }

    fn instance_meta(&mut self, meta: &str, args: &[MetaArg], kernel: &mut KernelContext) -> Result<bool> {
        let invalid = |message: &str| SubgroupError::InvalidMeta {
            meta: meta.to_string(),
            message: message.to_string(),
        };
        match strip_prefix(meta) {
            "SubgroupSize" => {
                let [arg] = args else {
                    return Err(invalid("expects exactly 1 arg"));
                };
                let size = arg
                    .as_int()
                    .filter(|&v| v > 0)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| invalid("subgroup size must be a positive integer"))?;
                self.subgroup_size = size;
                Ok(true)
            }
            "SubgroupExt" => {
                if args.len() > 2 {
                    return Err(invalid("expects at most 2 args"));
                }
                let mut texts = ["", ""];
                for (slot, arg) in texts.iter_mut().zip(args) {
                    *slot = arg.as_str().ok_or_else(|| invalid("args must be strings"))?;
                }
                let attrs = SubgroupAttributes::new(texts[0], texts[1]);
                let mut provider = SubgroupProvider::new(self.device.as_ref(), &attrs);
                provider.begin(&kernel.instance_name);
                self.active = Some(provider);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn replace_func(
        &mut self,
        func: &str,
        args: &[&str],
        host: &mut dyn ExtensionHost,
    ) -> Result<Option<Replacement>> {
        let Some(request) = Request::from_dsl(strip_prefix(func)) else {
            return Ok(None);
        };
        if args.len() != request.arg_count() {
            return Err(SubgroupError::ArgCount {
                func: func.to_string(),
                expected: request.arg_count(),
                found: args.len(),
            });
        }
        let provider = self.active_mut(func)?;
        let reg = host.registry();
        let rep = match request {
            Request::Query(query) => {
                let res = provider.resolve_query(reg, query)?;
                Replacement {
                    text: res.text,
                    depends: res.depends,
                }
            }
            Request::Vote(op) => {
                let res = provider.resolve_vote(reg, op, args[0])?;
                Replacement {
                    text: res.text,
                    depends: res.depends,
                }
            }
            Request::Shuffle(op) => {
                let vtype = Self::parse_vtype(func, args[0])?;
                let res = provider.resolve_shuffle(reg, vtype, op, false)?;
                Replacement {
                    text: res.call_text(args[1], Some(args[2])),
                    depends: res.depends,
                }
            }
            Request::Reduce(op) => {
                let vtype = Self::parse_vtype(func, args[0])?;
                let res = provider.resolve_reduce(reg, op, vtype)?;
                Replacement {
                    text: res.call_text(args[1], None),
                    depends: res.depends,
                }
            }
        };
        tracing::trace!("{} replaced with [{}]", func, rep.text);
        Ok(Some(rep))
    }

    fn finish_instance(&mut self, kernel: &mut KernelContext, host: &mut dyn ExtensionHost) -> Result<()> {
        let Some(mut provider) = self.active.take() else {
            return Ok(());
        };
        let logged = provider.finish(kernel, host, self.subgroup_size, &mut self.warnings)?;
        kernel.warnings.extend(logged);
        Ok(())
    }
}
