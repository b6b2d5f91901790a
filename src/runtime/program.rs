//! Program compilation
//!
//! A [`Program`] is built once from named source text for one device and
//! context. When the compile options request it, the built program's binary
//! is also loaded into a fast-path module from which kernels resolve their
//! executables directly.
//!
//! Build failures are reported as [`Error::Compile`] carrying the native
//! code. The device's build log, when available, is emitted through
//! `tracing` and never becomes part of the error value.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::Runtime;
use super::handle::ResourceRef;
use crate::error::{Error, NativeCode, Result};

/// Flags accepted in a compile options string, besides `-D` defines.
const KNOWN_FLAGS: &[&str] = &[
    "-cl-fast-relaxed-math",
    "-cl-mad-enable",
    "-cl-opt-disable",
    "-w",
    "-Werror",
];

/// Prefix of the language standard flag (`-cl-std=CL2.0`)
const STD_FLAG_PREFIX: &str = "-cl-std=";

/// Parsed compiler options
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    defines: Vec<(String, Option<String>)>,
    flags: Vec<String>,
    fast_path: bool,
    verbose: bool,
}

impl CompileOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an options string such as `"-D TILE=16 -cl-mad-enable"`
    pub fn parse(options: &str) -> std::result::Result<Self, String> {
        let mut parsed = Self::new();
        let mut tokens = options.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "-D" {
                let define = tokens
                    .next()
                    .ok_or_else(|| "'-D' must be followed by a macro name".to_string())?;
                parsed.push_define(define)?;
            } else if let Some(define) = token.strip_prefix("-D") {
                parsed.push_define(define)?;
            } else if token.starts_with(STD_FLAG_PREFIX) || KNOWN_FLAGS.contains(&token) {
                parsed.flags.push(token.to_string());
            } else {
                return Err(format!("unrecognized build option '{}'", token));
            }
        }
        Ok(parsed)
    }

    fn push_define(&mut self, define: &str) -> std::result::Result<(), String> {
        let (name, value) = match define.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (define, None),
        };
        if !is_identifier(name) {
            return Err(format!("invalid macro name '{}'", name));
        }
        self.defines.push((name.to_string(), value));
        Ok(())
    }

    /// Add a `-D NAME=VALUE` define
    pub fn define(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.defines.push((name.into(), Some(value.to_string())));
        self
    }

    /// Also load the program binary into a fast-path module
    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    /// Emit device build logs at warning level instead of debug level
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Macro definitions in declaration order
    pub fn defines(&self) -> &[(String, Option<String>)] {
        &self.defines
    }

    /// Value of a define, if present (`Some("")` for valueless defines)
    pub fn define_value(&self, name: &str) -> Option<&str> {
        self.defines
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// Compiler flags in declaration order
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// True if a fast-path module was requested
    pub fn is_fast_path(&self) -> bool {
        self.fast_path
    }

    /// True if build logs should be reported loudly
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

impl FromStr for CompileOptions {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CompileOptions {
    /// Canonical options string, as a device compiler would receive it
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| {
            if first {
                first = false;
                Ok(())
            } else {
                f.write_str(" ")
            }
        };
        for (name, value) in &self.defines {
            sep(f)?;
            match value {
                Some(value) => write!(f, "-D {}={}", name, value)?,
                None => write!(f, "-D {}", name)?,
            }
        }
        for flag in &self.flags {
            sep(f)?;
            f.write_str(flag)?;
        }
        Ok(())
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Failure reported by a backend's program build
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildFailure {
    /// Native error code
    pub code: NativeCode,
    /// Device build log, if the backend produced one
    pub log: Option<String>,
}

impl BuildFailure {
    /// Failure with a native code and no log
    pub fn code(code: NativeCode) -> Self {
        Self { code, log: None }
    }

    /// Failure with a native code and a build log
    pub fn with_log(code: NativeCode, log: impl Into<String>) -> Self {
        Self {
            code,
            log: Some(log.into()),
        }
    }
}

/// A program compiled for one device and context
pub struct Program<R: Runtime> {
    name: Arc<str>,
    handle: ResourceRef<R::ProgramHandle>,
    fast: Option<Arc<R::FastModule>>,
}

impl<R: Runtime> Program<R> {
    /// Compile `source` under `name` with an options string
    pub fn compile(
        context: &R::Context,
        device: &R::Device,
        name: &str,
        source: &str,
        options: &str,
    ) -> Result<Self> {
        let options = CompileOptions::parse(options).map_err(|reason| {
            tracing::debug!(program = name, %reason, "rejected build options");
            Error::compile(name, NativeCode::INVALID_BUILD_OPTIONS)
        })?;
        Self::compile_with(context, device, name, source, &options)
    }

    /// Compile `source` under `name` with parsed options
    pub fn compile_with(
        context: &R::Context,
        device: &R::Device,
        name: &str,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Self> {
        let handle = R::build_program(context, device, source, options).map_err(|failure| {
            if let Some(log) = failure.log.as_deref() {
                report_build_log(R::name(), name, failure.code, log, options.is_verbose());
            }
            Error::compile(name, failure.code)
        })?;

        // `handle` is released on every early return below, so a failed
        // fast-path load never leaves a half-built program behind.
        let fast = if options.is_fast_path() {
            let binary = R::program_binary(&handle).map_err(|code| Error::compile(name, code))?;
            if binary.is_empty() {
                return Err(Error::compile(name, NativeCode::INVALID_BINARY));
            }
            let module = R::load_fast_module(context, &binary, options)
                .map_err(|code| Error::compile(name, code))?;
            Some(Arc::new(module))
        } else {
            None
        };

        tracing::debug!(
            runtime = R::name(),
            program = name,
            fast_path = fast.is_some(),
            "program built"
        );

        Ok(Self {
            name: name.into(),
            handle,
            fast,
        })
    }

    /// Name the program was compiled under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native program handle
    pub fn handle(&self) -> &ResourceRef<R::ProgramHandle> {
        &self.handle
    }

    /// Fast-path module, if the program was compiled with one
    pub fn fast_module(&self) -> Option<&R::FastModule> {
        self.fast.as_deref()
    }
}

impl<R: Runtime> Clone for Program<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handle: self.handle.clone(),
            fast: self.fast.clone(),
        }
    }
}

impl<R: Runtime> fmt::Debug for Program<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("runtime", &R::name())
            .field("name", &self.name)
            .field("fast_path", &self.fast.is_some())
            .finish()
    }
}

#[cold]
fn report_build_log(runtime: &str, program: &str, code: NativeCode, log: &str, verbose: bool) {
    if verbose {
        tracing::warn!(runtime, program, %code, "failed to build program, log:\n{}", log);
    } else {
        tracing::debug!(runtime, program, %code, "failed to build program, log:\n{}", log);
    }
}
