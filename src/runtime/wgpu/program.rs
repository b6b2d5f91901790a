//! Program builds for WebGPU devices
//!
//! Programs are WGSL source. A build prepends one `const` declaration per
//! `-D` define, parses and validates the result with naga, and records the
//! compute entry points and the storage/uniform bindings of group 0. Naga
//! diagnostics become the build log.
//!
//! Bindings must be numbered `0..n` in group 0; kernel argument `i` binds to
//! `@binding(i)`. Pipelines are created lazily per entry point, except for
//! fast-path modules, which create every pipeline when the binary is loaded.
//!
//! The program binary is the WGSL text actually compiled, defines included.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use wgpu::naga;

use super::context::WgpuContext;
use super::device::WgpuDevice;
use crate::error::NativeCode;
use crate::runtime::Device;
use crate::runtime::handle::{ArcRef, ResourceRef};
use crate::runtime::program::{BuildFailure, CompileOptions};

/// Native program handle kind of WebGPU devices
pub type WgpuProgramHandle = ArcRef<WgpuProgramObject>;
/// Native kernel handle kind of WebGPU devices
pub type WgpuKernelHandle = ArcRef<WgpuKernelObject>;

/// How a shader binding is declared
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// `var<storage, read>` or `var<storage, read_write>`
    Storage {
        /// True unless the shader may write the binding
        read_only: bool,
    },
    /// `var<uniform>`
    Uniform,
}

impl BindingKind {
    /// True if the shader may write the binding
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Storage { read_only: false })
    }

    fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            Self::Storage { read_only } => wgpu::BufferBindingType::Storage { read_only },
            Self::Uniform => wgpu::BufferBindingType::Uniform,
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }
}

/// Shader interface shared by all entry points of a program
struct Interface {
    bindings: Arc<[BindingKind]>,
    entry_points: Vec<(String, [u32; 3])>,
}

/// Compiled shader objects of one program
struct Shader {
    context: WgpuContext,
    module: wgpu::ShaderModule,
    bind_group_layout: Arc<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    bindings: Arc<[BindingKind]>,
}

impl Shader {
    fn new(context: &WgpuContext, label: &str, source: &str, bindings: Arc<[BindingKind]>) -> Self {
        let device = context.wgpu_device();
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let entries: Vec<_> = bindings
            .iter()
            .enumerate()
            .map(|(i, kind)| kind.layout_entry(i as u32))
            .collect();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        Self {
            context: context.clone(),
            module,
            bind_group_layout: Arc::new(bind_group_layout),
            pipeline_layout,
            bindings,
        }
    }

    fn executable(&self, entry_point: &str, workgroup_size: [u32; 3]) -> WgpuExecutable {
        let pipeline = self
            .context
            .wgpu_device()
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&self.pipeline_layout),
                module: &self.module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            });
        WgpuExecutable {
            name: entry_point.into(),
            pipeline: Arc::new(pipeline),
            bind_group_layout: self.bind_group_layout.clone(),
            bindings: self.bindings.clone(),
            workgroup_size,
        }
    }
}

/// Built program object
pub struct WgpuProgramObject {
    source: String,
    shader: Shader,
    entry_points: Vec<(String, [u32; 3])>,
    pipelines: Mutex<HashMap<String, WgpuExecutable>>,
}

impl WgpuProgramObject {
    /// Compute entry point names in declaration order
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.entry_points.iter().map(|(name, _)| name.as_str())
    }

    /// Declared bindings of group 0
    pub fn bindings(&self) -> &[BindingKind] {
        &self.shader.bindings
    }

    /// Context the program was built in
    pub fn context(&self) -> &WgpuContext {
        &self.shader.context
    }

    fn workgroup_size(&self, name: &str) -> Option<[u32; 3]> {
        self.entry_points
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, size)| *size)
    }

    fn executable(&self, name: &str, workgroup_size: [u32; 3]) -> WgpuExecutable {
        self.pipelines
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(kernel = name, "creating wgpu compute pipeline");
                self.shader.executable(name, workgroup_size)
            })
            .clone()
    }
}

impl fmt::Debug for WgpuProgramObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuProgramObject")
            .field("kernels", &self.kernel_names().collect::<Vec<_>>())
            .field("bindings", &self.bindings())
            .finish()
    }
}

/// Kernel object created from a program; keeps its program alive
pub struct WgpuKernelObject {
    program: ResourceRef<WgpuProgramHandle>,
    name: String,
    workgroup_size: [u32; 3],
}

impl WgpuKernelObject {
    /// Program this kernel was created from
    pub fn program(&self) -> &ResourceRef<WgpuProgramHandle> {
        &self.program
    }

    /// Pipeline for this kernel; `None` if the program is null or belongs
    /// to another context
    pub(crate) fn executable(&self, context: &WgpuContext) -> Option<WgpuExecutable> {
        let program = self.program.object()?;
        if !program.context().is_same(context) {
            return None;
        }
        Some(program.executable(&self.name, self.workgroup_size))
    }
}

impl fmt::Debug for WgpuKernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuKernelObject")
            .field("name", &self.name)
            .field("workgroup_size", &self.workgroup_size)
            .finish()
    }
}

/// Launchable compute pipeline
#[derive(Clone)]
pub struct WgpuExecutable {
    name: Arc<str>,
    pub(crate) pipeline: Arc<wgpu::ComputePipeline>,
    pub(crate) bind_group_layout: Arc<wgpu::BindGroupLayout>,
    pub(crate) bindings: Arc<[BindingKind]>,
    pub(crate) workgroup_size: [u32; 3],
}

impl WgpuExecutable {
    /// Entry point name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `@workgroup_size` of the entry point
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
}

impl fmt::Debug for WgpuExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuExecutable")
            .field("name", &self.name)
            .field("workgroup_size", &self.workgroup_size)
            .finish_non_exhaustive()
    }
}

/// Fast-path module: every entry point's pipeline, created up front
#[derive(Debug)]
pub struct WgpuModule {
    kernels: HashMap<String, WgpuExecutable>,
}

impl WgpuModule {
    /// Entry point by name
    pub fn get(&self, name: &str) -> Option<&WgpuExecutable> {
        self.kernels.get(name)
    }

    /// Number of entry points
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// True if the module holds no entry points
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

// ============================================================================
// Front end
// ============================================================================

/// `const` declarations for the `-D` defines of `options`
fn define_prelude(options: &CompileOptions) -> String {
    options
        .defines()
        .iter()
        .map(|(name, value)| format!("const {} = {};\n", name, value.as_deref().unwrap_or("true")))
        .collect()
}

/// Parse and validate `source`; the error is the rendered diagnostic
fn analyze(source: &str) -> Result<Interface, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| e.emit_to_string(source))?;

    let mut bound = Vec::new();
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let label = var.name.as_deref().unwrap_or("<unnamed>");
        if binding.group != 0 {
            return Err(format!(
                "binding '{}' is in group {}; only group 0 is supported",
                label, binding.group
            ));
        }
        let kind = match var.space {
            naga::AddressSpace::Storage { access } => BindingKind::Storage {
                read_only: !access.contains(naga::StorageAccess::STORE),
            },
            naga::AddressSpace::Uniform => BindingKind::Uniform,
            _ => {
                return Err(format!(
                    "binding '{}' is not a storage or uniform buffer",
                    label
                ));
            }
        };
        bound.push((binding.binding, kind));
    }
    bound.sort_by_key(|(binding, _)| *binding);
    if let Some(pos) = bound
        .iter()
        .enumerate()
        .position(|(i, (binding, _))| *binding as usize != i)
    {
        return Err(format!(
            "bindings must be numbered 0..{} without gaps; @binding({}) is missing",
            bound.len(),
            pos
        ));
    }

    let entry_points: Vec<_> = module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Compute)
        .map(|ep| (ep.name.clone(), ep.workgroup_size))
        .collect();
    if entry_points.is_empty() {
        return Err("no compute entry points declared".to_string());
    }

    Ok(Interface {
        bindings: bound.into_iter().map(|(_, kind)| kind).collect(),
        entry_points,
    })
}

// ============================================================================
// Runtime entry points
// ============================================================================

/// Build `source` for `device` in `context`
pub(crate) fn build(
    context: &WgpuContext,
    device: &WgpuDevice,
    source: &str,
    options: &CompileOptions,
) -> Result<ResourceRef<WgpuProgramHandle>, BuildFailure> {
    if !device.is_same(context.device()) {
        return Err(BuildFailure::code(NativeCode::INVALID_DEVICE));
    }
    for flag in options.flags() {
        tracing::debug!(flag = %flag, "compiler flag has no effect on WGSL builds");
    }

    let full = define_prelude(options) + source;
    let interface = analyze(&full)
        .map_err(|log| BuildFailure::with_log(NativeCode::BUILD_PROGRAM_FAILURE, log))?;

    let shader = Shader::new(context, "dalrt program", &full, interface.bindings);
    Ok(ResourceRef::from_arc(Arc::new(WgpuProgramObject {
        source: full,
        shader,
        entry_points: interface.entry_points,
        pipelines: Mutex::new(HashMap::new()),
    })))
}

/// Compiled WGSL text of a built program
pub(crate) fn binary(program: &ResourceRef<WgpuProgramHandle>) -> Result<Vec<u8>, NativeCode> {
    program
        .object()
        .map(|object| object.source.clone().into_bytes())
        .ok_or(NativeCode::INVALID_PROGRAM)
}

/// Compile `binary` and create a pipeline for every entry point
pub(crate) fn load_module(context: &WgpuContext, binary: &[u8]) -> Result<WgpuModule, NativeCode> {
    let source = std::str::from_utf8(binary).map_err(|_| NativeCode::INVALID_BINARY)?;
    let interface = analyze(source).map_err(|_| NativeCode::INVALID_BINARY)?;

    let shader = Shader::new(context, "dalrt fast-path module", source, interface.bindings);
    let kernels = interface
        .entry_points
        .iter()
        .map(|(name, size)| (name.clone(), shader.executable(name, *size)))
        .collect();
    Ok(WgpuModule { kernels })
}

/// Create a kernel object for entry point `name`
pub(crate) fn create_kernel(
    program: &ResourceRef<WgpuProgramHandle>,
    name: &str,
) -> Result<ResourceRef<WgpuKernelHandle>, NativeCode> {
    let object = program.object().ok_or(NativeCode::INVALID_PROGRAM)?;
    let workgroup_size = object
        .workgroup_size(name)
        .ok_or(NativeCode::INVALID_KERNEL_NAME)?;
    Ok(ResourceRef::from_arc(Arc::new(WgpuKernelObject {
        program: program.clone(),
        name: name.to_string(),
        workgroup_size,
    })))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: &str = r#"
@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<storage, read> factor: f32;

@compute @workgroup_size(64)
fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&output)) {
        output[i] = input[i] * factor;
    }
}
"#;

    #[test]
    fn test_analyze_collects_interface() {
        let interface = analyze(SCALE).unwrap();
        assert_eq!(
            &*interface.bindings,
            &[
                BindingKind::Storage { read_only: true },
                BindingKind::Storage { read_only: false },
                BindingKind::Storage { read_only: true },
            ]
        );
        assert_eq!(interface.entry_points, vec![("scale".to_string(), [64, 1, 1])]);
    }

    #[test]
    fn test_analyze_reports_parse_error() {
        let log = analyze("fn broken( {").err().unwrap();
        assert!(!log.is_empty());
    }

    #[test]
    fn test_analyze_rejects_binding_gap() {
        let source = r#"
@group(0) @binding(1) var<storage, read_write> out: array<u32>;
@compute @workgroup_size(1)
fn main() { out[0] = 1u; }
"#;
        let log = analyze(source).err().unwrap();
        assert!(log.contains("@binding(0) is missing"), "{}", log);
    }

    #[test]
    fn test_analyze_requires_compute_entry() {
        let log = analyze("fn helper() -> u32 { return 1u; }").err().unwrap();
        assert!(log.contains("no compute entry points"));
    }

    #[test]
    fn test_define_prelude() {
        let options = CompileOptions::new()
            .define("TILE", 16)
            .define("USE_FMA", "true");
        let prelude = define_prelude(&options);
        assert_eq!(prelude, "const TILE = 16;\nconst USE_FMA = true;\n");

        let source = prelude
            + r#"
@group(0) @binding(0) var<storage, read_write> out: array<u32>;
@compute @workgroup_size(1)
fn main() { out[0] = u32(TILE); }
"#;
        assert!(analyze(&source).is_ok());
    }
}
