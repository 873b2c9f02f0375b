//! include / require / eval
//!
//! The VM never parses source text. Hosts that want `include` or `eval`
//! install a [`SourceCompiler`] that turns bytes into a [`Program`]; the VM
//! resolves paths, applies the `_once` bookkeeping, registers the unit's
//! functions and classes, and runs its main body in the includer's scope.
//!
//! Scope sharing is by name: every variable the included body names is
//! aliased to the includer's variable of the same name. Top-level includers
//! alias through the global table, so new names become globals.
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_include_or_eval

use crate::compiler::chunk::Program;
use crate::core::value::Val;
use crate::vm::engine::{ErrorLevel, VM, VmError};
use crate::vm::frame::ExecutionContext;
use crate::vm::opcode::{IncludeKind, OperandKind};
use std::path::{Path, PathBuf};

/// Front end used by include/require/eval
pub trait SourceCompiler {
    /// `path` is `None` for eval'd code
    fn compile(&mut self, source: &[u8], path: Option<&Path>) -> Result<Program, String>;
}

impl<F> SourceCompiler for F
where
    F: FnMut(&[u8], Option<&Path>) -> Result<Program, String>,
{
    fn compile(&mut self, source: &[u8], path: Option<&Path>) -> Result<Program, String> {
        self(source, path)
    }
}

impl VM {
    /// Run an include/require/eval and produce its expression value
    pub(crate) fn include_or_eval(
        &mut self,
        ctx: &mut ExecutionContext,
        kind: IncludeKind,
        operand: &Val,
    ) -> Result<Val, VmError> {
        let text = operand.to_php_string_bytes();
        if kind == IncludeKind::Eval {
            return self.eval_source(ctx, &text);
        }

        let raw = String::from_utf8_lossy(&text).into_owned();
        let resolved = self.resolve_include_path(ctx, &raw);
        let canonical = std::fs::canonicalize(&resolved).unwrap_or_else(|_| resolved.clone());
        tracing::debug!(kind = kind.name(), path = %canonical.display(), "include");

        if kind.is_once() && self.included_files.contains(&canonical) {
            return Ok(Val::Bool(true));
        }

        let source = match std::fs::read(&resolved) {
            Ok(source) => source,
            Err(err) => return self.include_failed(kind, &raw, &err.to_string()),
        };

        // Guard before running so recursive _once includes terminate
        let guarded = self.included_files.insert(canonical.clone());

        let compiled = self.compile_source(&source, Some(&canonical));
        if guarded && !matches!(compiled, Ok(Ok(_))) {
            self.included_files.remove(&canonical);
        }
        let program = match compiled {
            Ok(Ok(program)) => program,
            Ok(Err(message)) => return self.include_parse_failed(kind, &raw, &message),
            Err(err) => return Err(err),
        };

        let mut included = self.prepare_included(ctx, program);
        self.run_loop(&mut included)?;
        if included.returned {
            Ok(self.arena.deref(&included.return_value).clone())
        } else {
            Ok(Val::Int(1))
        }
    }

    fn eval_source(&mut self, ctx: &mut ExecutionContext, source: &[u8]) -> Result<Val, VmError> {
        tracing::debug!(bytes = source.len(), "eval");
        let program = match self.compile_source(source, None)? {
            Ok(program) => program,
            Err(message) => return Err(self.throw_error("ParseError", &message)),
        };
        let mut evaluated = self.prepare_included(ctx, program);
        self.run_loop(&mut evaluated)?;
        if evaluated.returned {
            Ok(self.arena.deref(&evaluated.return_value).clone())
        } else {
            Ok(Val::Null)
        }
    }

    /// Outer error: no compiler installed. Inner error: the compiler's message.
    fn compile_source(
        &mut self,
        source: &[u8],
        path: Option<&Path>,
    ) -> Result<Result<Program, String>, VmError> {
        let Some(compiler) = self.compiler.as_mut() else {
            return Err(VmError::NotImplemented(
                "include/eval without a source compiler".into(),
            ));
        };
        Ok(compiler.compile(source, path))
    }

    /// Register the unit and build its activation sharing the includer's scope
    fn prepare_included(&mut self, ctx: &mut ExecutionContext, program: Program) -> ExecutionContext {
        let main = self.load_program(program);
        let mut included = ExecutionContext::new(main);
        included.this = ctx.this.clone();
        included.class_scope = ctx.class_scope.clone();
        included.called_scope = ctx.called_scope.clone();

        if ctx.func.is_none() {
            self.bind_globals(&mut included);
            return included;
        }

        let names = included.chunk.var_names.clone();
        for (slot, name) in names.iter().enumerate() {
            let Some(outer) = ctx.chunk.var_names.iter().position(|n| n == name) else {
                continue;
            };
            if let Ok(handle) = self.make_ref(ctx, OperandKind::Cv, outer as u32) {
                included.vars.insert(slot as u32, Val::Reference(handle));
            }
        }
        included
    }

    /// Absolute paths as given; relative ones against the working
    /// directory, then the including file's directory, then the process cwd
    fn resolve_include_path(&self, ctx: &ExecutionContext, raw: &str) -> PathBuf {
        let candidate = PathBuf::from(raw);
        if candidate.is_absolute() {
            return candidate;
        }

        let mut bases: Vec<PathBuf> = Vec::new();
        if let Some(dir) = &self.working_dir {
            bases.push(dir.clone());
        }
        if let Some(dir) = ctx
            .chunk
            .file_path
            .as_deref()
            .and_then(|file| Path::new(file).parent())
        {
            bases.push(dir.to_path_buf());
        }
        if let Ok(cwd) = std::env::current_dir() {
            bases.push(cwd);
        }

        bases
            .iter()
            .map(|base| base.join(&candidate))
            .find(|path| path.exists())
            .or_else(|| bases.first().map(|base| base.join(&candidate)))
            .unwrap_or(candidate)
    }

    /// include warns and yields false; require is fatal
    fn include_failed(&mut self, kind: IncludeKind, raw: &str, reason: &str) -> Result<Val, VmError> {
        let name = kind.name();
        self.report_error(
            ErrorLevel::Warning,
            &format!("{}({}): Failed to open stream: {}", name, raw, reason),
        );
        if kind.is_require() {
            return Err(VmError::RuntimeError(format!(
                "Failed opening required '{}'",
                raw
            )));
        }
        self.report_error(
            ErrorLevel::Warning,
            &format!("{}(): Failed opening '{}' for inclusion", name, raw),
        );
        Ok(Val::Bool(false))
    }
}

impl VM {
    /// require raises `ParseError`; include warns and yields false
    fn include_parse_failed(
        &mut self,
        kind: IncludeKind,
        raw: &str,
        message: &str,
    ) -> Result<Val, VmError> {
        if kind.is_require() {
            return Err(self.throw_error("ParseError", message));
        }
        self.report_error(
            ErrorLevel::Warning,
            &format!("{}({}): {}", kind.name(), raw, message),
        );
        Ok(Val::Bool(false))
    }

    /// Files already pulled in by include/require, in no particular order
    pub fn included_paths(&self) -> impl Iterator<Item = &Path> {
        self.included_files.iter().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;
    use crate::vm::engine::CapturingErrorHandler;
    use crate::vm::opcode::{Instruction, OpCode, Operand};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Every compiled unit returns the length of its source
    fn length_compiler(source: &[u8], _path: Option<&Path>) -> Result<Program, String> {
        if source.starts_with(b"syntax error") {
            return Err("syntax error, unexpected end of file".into());
        }
        let chunk = CodeChunk {
            code: vec![Instruction::new(OpCode::Return).op1(Operand::Const(0))],
            constants: vec![Val::Int(source.len() as i64)],
            ..Default::default()
        };
        Ok(Program {
            main: Rc::new(chunk),
            functions: Vec::new(),
            classes: Vec::new(),
        })
    }

    fn top_level() -> ExecutionContext {
        ExecutionContext::new(Rc::new(CodeChunk::default()))
    }

    #[test]
    fn test_without_compiler_is_not_implemented() {
        let mut vm = VM::default();
        let mut ctx = top_level();
        let err = vm
            .include_or_eval(&mut ctx, IncludeKind::Eval, &Val::string("return 1;"))
            .unwrap_err();
        assert!(matches!(err, VmError::NotImplemented(_)));
    }

    #[test]
    fn test_eval_returns_body_value() {
        let mut vm = VM::default().with_compiler(Box::new(length_compiler));
        let mut ctx = top_level();
        let value = vm
            .include_or_eval(&mut ctx, IncludeKind::Eval, &Val::string("abc"))
            .unwrap();
        assert_eq!(value, Val::Int(3));
    }

    #[test]
    fn test_eval_parse_failure_is_catchable() {
        let mut vm = VM::default().with_compiler(Box::new(length_compiler));
        let mut ctx = top_level();
        let err = vm
            .include_or_eval(&mut ctx, IncludeKind::Eval, &Val::string("syntax error"))
            .unwrap_err();
        assert!(err.is_exception());
    }

    #[test]
    fn test_include_once_runs_file_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.php"), b"12345").unwrap();
        let mut vm = VM::default().with_compiler(Box::new(length_compiler));
        vm.working_dir = Some(dir.path().to_path_buf());
        let mut ctx = top_level();
        let path = Val::string("lib.php");

        let first = vm.include_or_eval(&mut ctx, IncludeKind::IncludeOnce, &path).unwrap();
        let second = vm.include_or_eval(&mut ctx, IncludeKind::IncludeOnce, &path).unwrap();
        assert_eq!(first, Val::Int(5));
        assert_eq!(second, Val::Bool(true));
        assert_eq!(vm.included_paths().count(), 1);
    }

    #[test]
    fn test_missing_include_warns_and_require_fails() {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        let mut vm = VM::default().with_compiler(Box::new(length_compiler));
        vm.error_handler = Box::new(CapturingErrorHandler::new(move |level, msg: &str| {
            sink.borrow_mut().push((level, msg.to_string()));
        }));
        let dir = tempfile::tempdir().unwrap();
        vm.working_dir = Some(dir.path().to_path_buf());
        let mut ctx = top_level();
        let path = Val::string("missing.php");

        let value = vm.include_or_eval(&mut ctx, IncludeKind::Include, &path).unwrap();
        assert_eq!(value, Val::Bool(false));
        assert!(warnings.borrow()[0].1.starts_with("include(missing.php): Failed to open stream"));

        let err = vm.include_or_eval(&mut ctx, IncludeKind::Require, &path).unwrap_err();
        assert!(err.to_string().contains("Failed opening required 'missing.php'"));
    }
}
