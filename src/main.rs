//! Subgroup codegen CLI
//!
//! Main entry point for the `sgc` command.

use clap::{Parser, Subcommand};
use miette::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use oclu_subgroup::codegen::subgroup::extension::parse_request;
use oclu_subgroup::codegen::subgroup::{Capabilities, MimicMode, SubgroupAttributes, SubgroupExtension};
use oclu_subgroup::codegen::{CompilationContext, KernelContext, MetaArg, Replacement};
use oclu_subgroup::{DeviceProfile, DeviceQuery, SubgroupProvider, Vendor};

#[derive(Parser)]
#[command(name = "sgc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resolve OpenCL subgroup operations against a device profile", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct DeviceArgs {
    /// Device profile (TOML)
    #[arg(short, long, value_name = "FILE")]
    device: Option<PathBuf>,

    /// Vendor when no profile is given
    #[arg(long, value_enum, default_value = "other")]
    vendor: VendorArg,

    /// Extra device extensions
    #[arg(long = "ext", value_name = "NAME")]
    extensions: Vec<String>,

    /// Device supports half
    #[arg(long)]
    fp16: bool,

    /// Device supports double
    #[arg(long)]
    fp64: bool,

    /// NVIDIA compute capability, e.g. `8.6`
    #[arg(long, value_name = "MAJOR.MINOR")]
    sm: Option<String>,

    /// Mimic backend: local, ptx, auto or none
    #[arg(long, default_value = "auto")]
    mimic: String,

    /// Capability overrides, e.g. `sg_khr,-sg_khrballot`
    #[arg(long, default_value = "")]
    caps: String,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum VendorArg {
    Nvidia,
    Intel,
    Amd,
    Arm,
    Qualcomm,
    Other,
}

impl From<VendorArg> for Vendor {
    fn from(v: VendorArg) -> Self {
        match v {
            VendorArg::Nvidia => Vendor::Nvidia,
            VendorArg::Intel => Vendor::Intel,
            VendorArg::Amd => Vendor::Amd,
            VendorArg::Arm => Vendor::Arm,
            VendorArg::Qualcomm => Vendor::Qualcomm,
            VendorArg::Other => Vendor::Other,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve subgroup requests for one kernel instance
    Resolve {
        #[command(flatten)]
        device: DeviceArgs,

        /// Kernel instance name
        #[arg(short, long, default_value = "kernel")]
        kernel: String,

        /// Workgroup size, up to three dimensions
        #[arg(short, long, value_delimiter = ',', default_value = "0")]
        workgroup: Vec<u32>,

        /// Required subgroup size
        #[arg(short = 's', long)]
        subgroup_size: Option<u32>,

        /// Print a JSON report instead of OpenCL C
        #[arg(long)]
        json: bool,

        /// Requests such as `broadcast:u8v4`, `reduce_sum:i16v4`, `size`
        #[arg(value_name = "REQUEST", required = true)]
        requests: Vec<String>,
    },

    /// Show resolved capabilities, backend and algorithm catalog
    Caps {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Show tool information
    Info,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Resolve {
            device,
            kernel,
            workgroup,
            subgroup_size,
            json,
            requests,
        } => resolve(&device, &kernel, &workgroup, subgroup_size, json, &requests),
        Commands::Caps { device } => caps(&device),
        Commands::Info => info(),
    }
}

fn load_device(args: &DeviceArgs) -> Result<DeviceProfile> {
    let mut profile = match &args.device {
        Some(path) => DeviceProfile::load(path)?,
        None => DeviceProfile::new("cli", args.vendor.into()),
    };
    profile.extensions.extend(args.extensions.iter().cloned());
    profile.fp16 |= args.fp16;
    profile.fp64 |= args.fp64;
    if let Some(sm) = &args.sm {
        let (major, minor) = sm.split_once('.').unwrap_or((sm.as_str(), "0"));
        let parse = |s: &str| {
            s.parse::<u32>()
                .map_err(|e| miette::miette!("Invalid compute capability `{}`: {}", sm, e))
        };
        profile.compute_capability = Some((parse(major)?, parse(minor)?));
    }
    tracing::debug!("Device [{}] from {:?}", profile.name, args.device);
    Ok(profile)
}

#[derive(Serialize)]
struct RequestReport {
    request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    replacement: Option<Replacement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ResolveReport {
    backend: String,
    caps: Capabilities,
    requests: Vec<RequestReport>,
    kernel: KernelContext,
    extensions: Vec<String>,
    blocks: Vec<String>,
}

fn resolve(
    args: &DeviceArgs,
    kernel: &str,
    workgroup: &[u32],
    subgroup_size: Option<u32>,
    json: bool,
    requests: &[String],
) -> Result<()> {
    let device: Rc<dyn DeviceQuery> = Rc::new(load_device(args)?);
    let attrs = SubgroupAttributes::new(&args.mimic, &args.caps);
    let ext = SubgroupExtension::new(device.clone(), &attrs);
    let backend = ext.provider().backend().to_string();
    let caps = *ext.provider().caps();
    let mut ctx = CompilationContext::new(device).with_extension(Box::new(ext));

    let mut dims = [1u32; 3];
    for (slot, &dim) in dims.iter_mut().zip(workgroup) {
        *slot = dim;
    }
    if workgroup.first() == Some(&0) {
        dims = [0; 3];
    }
    ctx.begin_kernel(kernel, dims)?;
    if let Some(size) = subgroup_size {
        ctx.apply_meta("oclu.SubgroupSize", &[MetaArg::Int(i64::from(size))])?;
    }

    let mut reports = Vec::with_capacity(requests.len());
    for request in requests {
        let (func, call_args) = parse_request(request)?;
        let call_args: Vec<&str> = call_args.iter().map(String::as_str).collect();
        match ctx.replace_func(&func, &call_args) {
            Ok(replacement) => reports.push(RequestReport {
                request: request.clone(),
                replacement,
                error: None,
            }),
            Err(err) if err.is_recoverable() => {
                tracing::warn!("{}", err);
                reports.push(RequestReport {
                    request: request.clone(),
                    replacement: None,
                    error: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err.into()),
        }
    }

    let finished = ctx.finish_kernel()?;
    let prelude = ctx.program_prelude()?;

    if json {
        let report = ResolveReport {
            backend,
            caps,
            requests: reports,
            kernel: finished,
            extensions: ctx.host().enabled_extensions().map(str::to_string).collect(),
            blocks: ctx.host().patch_registry().names().map(str::to_string).collect(),
        };
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| miette::miette!("Failed to serialize report: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("// backend: {}", backend);
    println!("// caps: {}", caps);
    for report in &reports {
        match (&report.replacement, &report.error) {
            (Some(rep), _) => println!("// {} => {}", report.request, rep.text),
            (None, Some(err)) => println!("// {} => error: {}", report.request, err),
            (None, None) => println!("// {} => not a subgroup function", report.request),
        }
    }
    for attr in finished.attributes.values() {
        println!("// attribute: {}", attr);
    }
    for prefix in finished.body_prefixes.values() {
        println!("// body prefix: {}", prefix.trim());
    }
    println!();
    print!("{}", prelude);
    Ok(())
}

fn caps(args: &DeviceArgs) -> Result<()> {
    let device = load_device(args)?;
    let attrs = SubgroupAttributes::new(&args.mimic, &args.caps);
    let provider = SubgroupProvider::new(&device, &attrs);

    println!("Device: {} ({})", device.name, device.vendor);
    println!("Mimic: {} -> {}", attrs.mimic, attrs.mimic.resolve(device.vendor));
    println!("Capabilities: {}", provider.caps());
    println!("Backend: {}", provider.backend());
    println!();
    println!("Shuffle algorithms:");
    for algo in &provider.catalog().shuffle {
        println!("  - {:?} [{}]", algo.id, algo.features);
    }
    println!("Reduce algorithms:");
    for algo in &provider.catalog().reduce {
        println!("  - {:?} [{}]", algo.id, algo.features);
    }
    if attrs.mimic == MimicMode::None && !provider.caps().basic_subgroup {
        println!();
        println!("No native subgroup support and mimic disabled.");
    }
    Ok(())
}

fn info() -> Result<()> {
    println!("OpenCL Subgroup Codegen");
    println!("Version: {}", oclu_subgroup::VERSION);
    println!();
    println!("Backends:");
    println!("  - khr   (cl_khr_subgroups family)");
    println!("  - intel (cl_intel_subgroups family)");
    println!("  - local (local memory mimic)");
    println!("  - ptx   (NVIDIA inline PTX)");
    println!();
    println!("Requests:");
    println!("  broadcast, shuffle, shuffle_xor, shuffle_down, shuffle_up   (op:vtype)");
    println!("  reduce_sum, reduce_min, reduce_max                          (op:vtype)");
    println!("  reduce_and, reduce_or, reduce_xor                           (op:vtype)");
    println!("  size, max_size, count, id, local_id, all, any");

    Ok(())
}
