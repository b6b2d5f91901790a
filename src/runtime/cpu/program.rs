//! Program builds for the CPU device
//!
//! The CPU "compiler" works on OpenCL C source text:
//!
//! 1. strip comments and check that brackets balance
//! 2. collect `__kernel void name(` declarations
//! 3. link every declared kernel against the context's [`KernelRegistry`]
//!
//! Any problem fails the build with `BUILD_PROGRAM_FAILURE` and a build log
//! listing each diagnostic with its line number.
//!
//! The program binary is a manifest of the linked kernel names; loading it
//! resolves every name straight to its implementation (the fast path).
//!
//! [`KernelRegistry`]: super::kernels::KernelRegistry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::device::{CpuContext, CpuDevice};
use super::kernels::CpuKernelFn;
use crate::error::NativeCode;
use crate::runtime::handle::{ArcRef, ResourceRef};
use crate::runtime::program::{BuildFailure, CompileOptions};
use crate::runtime::Device;

/// Header line of a CPU program binary
const BINARY_MAGIC: &str = "DALRT-CPU-PROGRAM 1";

/// Native program handle kind of the CPU device
pub type CpuProgramHandle = ArcRef<CpuProgramObject>;
/// Native kernel handle kind of the CPU device
pub type CpuKernelHandle = ArcRef<CpuKernelObject>;

/// Built program object
pub struct CpuProgramObject {
    context: CpuContext,
    options: Arc<CompileOptions>,
    kernels: Vec<(String, CpuKernelFn)>,
}

impl CpuProgramObject {
    /// Names of the kernels in declaration order
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|(name, _)| name.as_str())
    }

    /// Context the program was built in
    pub fn context(&self) -> &CpuContext {
        &self.context
    }

    fn find(&self, name: &str) -> Option<&CpuKernelFn> {
        self.kernels.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    fn binary(&self) -> Vec<u8> {
        let mut text = String::from(BINARY_MAGIC);
        for (name, _) in &self.kernels {
            text.push('\n');
            text.push_str(name);
        }
        text.into_bytes()
    }
}

impl fmt::Debug for CpuProgramObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuProgramObject")
            .field("kernels", &self.kernel_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Kernel object created from a program; keeps its program alive
pub struct CpuKernelObject {
    program: ResourceRef<CpuProgramHandle>,
    executable: CpuExecutable,
}

impl CpuKernelObject {
    /// Program the kernel was created from
    pub fn program(&self) -> &ResourceRef<CpuProgramHandle> {
        &self.program
    }

    pub(crate) fn executable(&self, context: &CpuContext) -> Option<CpuExecutable> {
        let program = self.program.object()?;
        program
            .context
            .is_same(context)
            .then(|| self.executable.clone())
    }
}

/// Launchable kernel: implementation plus the program's build options
#[derive(Clone)]
pub struct CpuExecutable {
    name: Arc<str>,
    func: CpuKernelFn,
    options: Arc<CompileOptions>,
}

impl CpuExecutable {
    /// Kernel name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn func(&self) -> &CpuKernelFn {
        &self.func
    }

    pub(crate) fn options(&self) -> &CompileOptions {
        &self.options
    }
}

impl fmt::Debug for CpuExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuExecutable").field("name", &self.name).finish()
    }
}

/// Program binary loaded for direct kernel lookup
#[derive(Debug, Default)]
pub struct CpuModule {
    kernels: HashMap<String, CpuExecutable>,
}

impl CpuModule {
    /// Executable for kernel `name`
    pub fn get(&self, name: &str) -> Option<&CpuExecutable> {
        self.kernels.get(name)
    }

    /// Number of kernels in the module
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// True if the module holds no kernels
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

// ============================================================================
// Build
// ============================================================================

/// Diagnostics collected during one build
#[derive(Default)]
struct BuildLog {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl BuildLog {
    fn error(&mut self, line: usize, message: impl fmt::Display) {
        self.errors.push(format!("{}: error: {}", line, message));
    }

    fn warning(&mut self, line: usize, message: impl fmt::Display) {
        self.warnings.push(format!("{}: warning: {}", line, message));
    }

    fn render(&self) -> String {
        self.errors
            .iter()
            .chain(&self.warnings)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'s> {
    Ident(&'s str),
    Punct(char),
}

/// Remove `//` and `/* */` comments, keeping newlines so line numbers survive.
fn strip_comments(source: &str, log: &mut BuildLog) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut line = 1;
    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match (c, next) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        line += 1;
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                let start = line;
                chars.next();
                let mut closed = false;
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        line += 1;
                    }
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    log.error(start, "unterminated comment");
                }
                out.push(' ');
            }
            _ => {
                if c == '\n' {
                    line += 1;
                }
                out.push(c);
            }
        }
    }
    out
}

fn tokenize(source: &str) -> Vec<(usize, Token<'_>)> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut start = None;
    for (i, c) in source.char_indices() {
        let ident_char = c.is_ascii_alphanumeric() || c == '_';
        if ident_char {
            start.get_or_insert(i);
            continue;
        }
        if let Some(s) = start.take() {
            tokens.push((line, Token::Ident(&source[s..i])));
        }
        if c == '\n' {
            line += 1;
        } else if !c.is_whitespace() {
            tokens.push((line, Token::Punct(c)));
        }
    }
    if let Some(s) = start {
        tokens.push((line, Token::Ident(&source[s..])));
    }
    tokens
}

fn check_brackets(tokens: &[(usize, Token<'_>)], log: &mut BuildLog) {
    let mut open: Vec<(usize, char)> = Vec::new();
    for (line, token) in tokens {
        let Token::Punct(c) = token else { continue };
        let expected = match c {
            '(' | '[' | '{' => {
                open.push((*line, *c));
                continue;
            }
            ')' => '(',
            ']' => '[',
            '}' => '{',
            _ => continue,
        };
        match open.pop() {
            Some((_, o)) if o == expected => {}
            Some((open_line, o)) => {
                log.error(*line, format!("'{}' does not close '{}' opened on line {}", c, o, open_line));
                return;
            }
            None => {
                log.error(*line, format!("unmatched '{}'", c));
                return;
            }
        }
    }
    if let Some((line, c)) = open.pop() {
        log.error(line, format!("'{}' is never closed", c));
    }
}

/// `(line, name)` of every `__kernel void name(` / `kernel void name(` declaration
fn kernel_declarations<'s>(tokens: &[(usize, Token<'s>)]) -> Vec<(usize, &'s str)> {
    tokens
        .windows(4)
        .filter_map(|w| match w {
            [
                (line, Token::Ident("__kernel" | "kernel")),
                (_, Token::Ident("void")),
                (_, Token::Ident(name)),
                (_, Token::Punct('(')),
            ] => Some((*line, *name)),
            _ => None,
        })
        .collect()
}

/// Build `source` for `device` in `context`
pub(crate) fn build(
    context: &CpuContext,
    device: &CpuDevice,
    source: &str,
    options: &CompileOptions,
) -> Result<ResourceRef<CpuProgramHandle>, BuildFailure> {
    if !device.is_same(context.device()) {
        return Err(BuildFailure::code(NativeCode::INVALID_DEVICE));
    }

    let mut log = BuildLog::default();
    let stripped = strip_comments(source, &mut log);
    let tokens = tokenize(&stripped);
    check_brackets(&tokens, &mut log);

    let declarations = kernel_declarations(&tokens);
    if declarations.is_empty() && log.errors.is_empty() {
        log.error(1, "no kernel functions declared");
    }

    let mut kernels: Vec<(String, CpuKernelFn)> = Vec::with_capacity(declarations.len());
    for (line, name) in declarations {
        if kernels.iter().any(|(n, _)| n == name) {
            log.warning(line, format!("kernel '{}' declared more than once", name));
            continue;
        }
        match context.registry().get(name) {
            Some(func) => kernels.push((name.to_string(), func.clone())),
            None => log.error(line, format!("undefined kernel '{}'", name)),
        }
    }

    let flags = options.flags();
    if flags.iter().any(|f| f == "-w") {
        log.warnings.clear();
    }
    if flags.iter().any(|f| f == "-Werror") && !log.warnings.is_empty() {
        log.errors.append(&mut log.warnings);
    }

    if !log.errors.is_empty() {
        return Err(BuildFailure::with_log(
            NativeCode::BUILD_PROGRAM_FAILURE,
            log.render(),
        ));
    }
    if !log.warnings.is_empty() {
        tracing::debug!(log = %log.render(), "cpu program built with warnings");
    }

    Ok(ResourceRef::from_arc(Arc::new(CpuProgramObject {
        context: context.clone(),
        options: Arc::new(options.clone()),
        kernels,
    })))
}

/// Serialized manifest of a built program
pub(crate) fn binary(program: &ResourceRef<CpuProgramHandle>) -> Result<Vec<u8>, NativeCode> {
    program
        .object()
        .map(CpuProgramObject::binary)
        .ok_or(NativeCode::INVALID_PROGRAM)
}

/// Resolve every kernel listed in `binary` against `context`
pub(crate) fn load_module(
    context: &CpuContext,
    binary: &[u8],
    options: &CompileOptions,
) -> Result<CpuModule, NativeCode> {
    let text = std::str::from_utf8(binary).map_err(|_| NativeCode::INVALID_BINARY)?;
    let mut lines = text.lines();
    if lines.next() != Some(BINARY_MAGIC) {
        return Err(NativeCode::INVALID_BINARY);
    }
    let options = Arc::new(options.clone());
    let mut kernels = HashMap::new();
    for name in lines {
        let func = context
            .registry()
            .get(name)
            .ok_or(NativeCode::INVALID_BINARY)?;
        kernels.insert(
            name.to_string(),
            CpuExecutable {
                name: name.into(),
                func: func.clone(),
                options: options.clone(),
            },
        );
    }
    Ok(CpuModule { kernels })
}

/// Create a kernel object for `name`
pub(crate) fn create_kernel(
    program: &ResourceRef<CpuProgramHandle>,
    name: &str,
) -> Result<ResourceRef<CpuKernelHandle>, NativeCode> {
    let object = program.object().ok_or(NativeCode::INVALID_PROGRAM)?;
    let func = object.find(name).ok_or(NativeCode::INVALID_KERNEL_NAME)?;
    let executable = CpuExecutable {
        name: name.into(),
        func: func.clone(),
        options: object.options.clone(),
    };
    Ok(ResourceRef::from_arc(Arc::new(CpuKernelObject {
        program: program.clone(),
        executable,
    })))
}
