//! Construction of expressions with inferred structural types.
//!
//! Call nodes are created unfinished, with no structural type. A
//! [`BlockBuilder`] finalizes them by inferring the types of their arguments
//! and then of the call itself. Results of inference are memoized, so that
//! structurally equal calls are only inferred once.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::diagnostics::{DiagnosticLevel, Diagnostics};
use crate::env::{env_flag, env_value};
use crate::infer::{InferType, TypeError};
use crate::ops::Op;
use crate::struct_info::{StructInfo, TensorType};

/// Environment variable which enables or disables memoization.
pub const MEMOIZE_ENV: &str = "STRUCTINFO_MEMOIZE";

/// Environment variable which sets the [`DiagnosticLevel`].
pub const DIAGNOSTICS_ENV: &str = "STRUCTINFO_DIAGNOSTICS";

/// Named value with a known structural type.
#[derive(Debug)]
pub struct Var {
    name: String,
    struct_info: StructInfo,
}

impl Var {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn struct_info(&self) -> &StructInfo {
        &self.struct_info
    }
}

/// Application of an operator to arguments.
#[derive(Debug)]
pub struct Call {
    op: Op,
    args: Vec<Expr>,

    /// Inferred type. Set once when the call is normalized.
    struct_info: OnceLock<StructInfo>,
}

impl Call {
    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }

    /// Return the inferred type, or `None` if the call is unfinished.
    pub fn struct_info(&self) -> Option<&StructInfo> {
        self.struct_info.get()
    }
}

/// Immutable expression node.
///
/// Cloning an expression is cheap and shares the underlying node.
#[derive(Clone, Debug)]
pub enum Expr {
    Var(Arc<Var>),
    Call(Arc<Call>),
}

impl Expr {
    /// Create a variable with a given type.
    pub fn var(name: &str, struct_info: impl Into<StructInfo>) -> Expr {
        Expr::Var(Arc::new(Var {
            name: name.to_string(),
            struct_info: struct_info.into(),
        }))
    }

    /// Create an unfinished call.
    ///
    /// This fails if attributes of the operator have an invalid number of
    /// elements. Errors that depend on argument types are reported when the
    /// call is normalized.
    pub fn call(op: impl Into<Op>, args: Vec<Expr>) -> Result<Expr, BuildError> {
        let op = op.into();
        op.validate().map_err(|error| BuildError {
            op: op.name(),
            error,
        })?;
        Ok(Expr::Call(Arc::new(Call {
            op,
            args,
            struct_info: OnceLock::new(),
        })))
    }

    /// Create an unfinished call with `self` as the first argument.
    pub fn apply(&self, op: impl Into<Op>, operands: &[Expr]) -> Result<Expr, BuildError> {
        let args = std::iter::once(self.clone())
            .chain(operands.iter().cloned())
            .collect();
        Expr::call(op, args)
    }

    /// Return the structural type of this expression, or `None` if it is an
    /// unfinished call.
    pub fn struct_info(&self) -> Option<&StructInfo> {
        match self {
            Expr::Var(var) => Some(&var.struct_info),
            Expr::Call(call) => call.struct_info(),
        }
    }

    /// Return true if this expression has a structural type.
    pub fn is_normalized(&self) -> bool {
        self.struct_info().is_some()
    }

    /// Return true if `self` and `other` are the same node.
    pub fn same_node(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Var(a), Expr::Var(b)) => Arc::ptr_eq(a, b),
            (Expr::Call(a), Expr::Call(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Error returned when a call cannot be constructed or normalized.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildError {
    op: &'static str,
    error: TypeError,
}

impl BuildError {
    /// Return the name of the operator which rejected the call.
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn error(&self) -> &TypeError {
        &self.error
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.error)
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Options which control a [`BlockBuilder`].
#[derive(Clone, Debug, PartialEq)]
pub struct BuilderOptions {
    /// Reuse inference results for structurally equal calls.
    pub memoize: bool,

    pub diagnostics: DiagnosticLevel,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        BuilderOptions {
            memoize: true,
            diagnostics: DiagnosticLevel::Off,
        }
    }
}

impl BuilderOptions {
    /// Read options from the `STRUCTINFO_MEMOIZE` and `STRUCTINFO_DIAGNOSTICS`
    /// environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = BuilderOptions::default();
        BuilderOptions {
            memoize: env_flag(MEMOIZE_ENV, defaults.memoize),
            diagnostics: env_value(
                DIAGNOSTICS_ENV,
                defaults.diagnostics,
                DiagnosticLevel::from_name,
            ),
        }
    }
}

type InferResult = Result<TensorType, TypeError>;

/// Cache key identifying structurally equal calls.
///
/// Both the operator attributes and the argument types are in canonical form.
#[derive(Debug, PartialEq, Eq, Hash)]
struct CallKey {
    op: Op,
    args: Vec<StructInfo>,
}

/// Memoized inference results.
///
/// The map lock is only held while looking up a slot. Each slot is
/// initialized at most once, and callers that look up the same key
/// concurrently block until the first has finished inference.
#[derive(Debug, Default)]
struct InferCache {
    entries: Mutex<FxHashMap<CallKey, Arc<OnceLock<InferResult>>>>,
}

impl InferCache {
    /// Return the cached result for a call, computing it with `infer` if
    /// there is none. The flag is true if `infer` was called.
    fn get_or_infer(
        &self,
        op: &Op,
        args: &[StructInfo],
        infer: impl FnOnce() -> InferResult,
    ) -> (InferResult, bool) {
        let key = CallKey {
            op: op.canonical(),
            args: args.iter().map(StructInfo::canonical).collect(),
        };
        let slot = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone();

        let mut computed = false;
        let result = slot.get_or_init(|| {
            computed = true;
            infer()
        });
        (result.clone(), computed)
    }

    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Binding of a normalized expression to a variable.
#[derive(Clone, Debug)]
pub struct Binding {
    pub var: Expr,
    pub value: Expr,
}

/// Context for building expressions.
///
/// The builder normalizes call nodes by attaching their inferred types, and
/// records the bindings emitted into the current block.
#[derive(Debug)]
pub struct BlockBuilder {
    options: BuilderOptions,
    diagnostics: Diagnostics,
    cache: InferCache,

    /// Number of times an operator's inference routine has run.
    inference_count: AtomicUsize,

    bindings: Vec<Binding>,

    /// Number of bindings emitted for each requested name.
    names: FxHashMap<String, usize>,
}

impl BlockBuilder {
    /// Create a builder with options read from the environment.
    ///
    /// See [`BuilderOptions::from_env`].
    pub fn new() -> Self {
        Self::with_options(BuilderOptions::from_env())
    }

    pub fn with_options(options: BuilderOptions) -> Self {
        BlockBuilder {
            diagnostics: Diagnostics::new(options.diagnostics),
            options,
            cache: InferCache::default(),
            inference_count: AtomicUsize::new(0),
            bindings: Vec::new(),
            names: FxHashMap::default(),
        }
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Infer the structural type of `expr` and of any unfinished calls it
    /// contains.
    ///
    /// Types are attached to call nodes in place, so the returned expression
    /// is the same node as `expr`. Calls which are already normalized are
    /// not inferred again.
    pub fn normalize(&self, expr: &Expr) -> Result<Expr, BuildError> {
        let Expr::Call(call) = expr else {
            return Ok(expr.clone());
        };
        if call.struct_info().is_some() {
            return Ok(expr.clone());
        }

        let mut arg_types = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let arg = self.normalize(arg)?;
            arg_types.push(arg.struct_info().cloned().unwrap_or(StructInfo::Object));
        }

        let ty = self.infer(&call.op, &arg_types)?;
        call.struct_info.get_or_init(|| ty.into());
        Ok(expr.clone())
    }

    /// Normalize independent expressions in parallel.
    pub fn normalize_all(&self, exprs: &[Expr]) -> Result<Vec<Expr>, BuildError> {
        exprs.par_iter().map(|expr| self.normalize(expr)).collect()
    }

    /// Normalize `expr` and bind it to a new variable.
    ///
    /// The variable is named `name`, with a numeric suffix if a binding of
    /// that name already exists in the block.
    pub fn emit(&mut self, name: &str, expr: &Expr) -> Result<Expr, BuildError> {
        let value = self.normalize(expr)?;
        let struct_info = value.struct_info().cloned().unwrap_or(StructInfo::Object);

        let count = self.names.entry(name.to_string()).or_insert(0);
        let var_name = if *count == 0 {
            name.to_string()
        } else {
            format!("{}{}", name, count)
        };
        *count += 1;

        let var = Expr::var(&var_name, struct_info);
        self.bindings.push(Binding {
            var: var.clone(),
            value,
        });
        Ok(var)
    }

    /// Return the bindings emitted so far, in order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Return the number of times an operator's inference routine has run.
    ///
    /// Calls whose result was reused from the cache are not counted.
    pub fn inference_count(&self) -> usize {
        self.inference_count.load(Ordering::Relaxed)
    }

    /// Return the number of distinct calls in the inference cache.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    fn infer(&self, op: &Op, args: &[StructInfo]) -> Result<TensorType, BuildError> {
        let run = || {
            self.inference_count.fetch_add(1, Ordering::Relaxed);
            op.infer_type(args)
        };
        let (result, computed) = if self.options.memoize {
            self.cache.get_or_infer(op, args, run)
        } else {
            (run(), true)
        };

        match &result {
            Ok(ty) if computed => {
                self.diagnostics.info(op.name(), format_args!("inferred {}", ty))
            }
            Ok(ty) => self.diagnostics.info(op.name(), format_args!("reused cached {}", ty)),
            Err(err) => self.diagnostics.warn(op.name(), format_args!("{}", err)),
        }

        result.map_err(|error| BuildError {
            op: op.name(),
            error,
        })
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}
