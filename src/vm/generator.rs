//! Generator protocol
//!
//! A call to a generator function does not run its body. The prepared
//! activation is parked inside a `Generator` object and driven from outside:
//! each resume re-enters the saved [`ExecutionContext`] through `run_loop`,
//! which halts again at the next `YIELD` with locals and temporaries intact.
//!
//! States follow [`GeneratorState`]: `Created` until first use, `Suspended`
//! between yields, `Running` while the body executes (re-entry is an error)
//! and `Finished` once the body returns or throws.
//!
//! `YIELD_FROM` delegates to an array or an inner generator. The outer
//! activation re-executes the `YIELD_FROM` instruction on every resume until
//! the delegate is exhausted, forwarding the inner key/value each time.
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_generators.c

use crate::core::value::{ObjectData, ObjectRef, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::{
    ExecutionContext, GeneratorData, GeneratorState, SubGenState, SubIterator, YieldState,
};
use crate::vm::opcode::{Instruction, OperandKind};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) type GeneratorRef = Rc<RefCell<GeneratorData>>;

/// Generator state behind a `Generator` object
pub(crate) fn generator_of(value: &Val) -> Option<GeneratorRef> {
    match value {
        Val::Object(obj) => generator_of_object(obj),
        _ => None,
    }
}

fn generator_of_object(obj: &ObjectRef) -> Option<GeneratorRef> {
    let internal = obj.borrow().internal.clone()?;
    internal.downcast::<RefCell<GeneratorData>>().ok()
}

impl VM {
    /// Wrap a prepared activation in a fresh `Generator` object
    pub(crate) fn create_generator(&mut self, mut ctx: ExecutionContext) -> Val {
        ctx.generator = Some(YieldState::default());
        tracing::debug!(function = ctx.function_name(), "generator created");
        let data: GeneratorRef = Rc::new(RefCell::new(GeneratorData::new(ctx)));
        let mut obj = ObjectData::new(Rc::from("Generator"));
        obj.internal = Some(data);
        Val::Object(Rc::new(RefCell::new(obj)))
    }

    /// Run a created generator to its first yield; no-op otherwise
    pub(crate) fn generator_start(&mut self, generator: &GeneratorRef) -> Result<(), VmError> {
        if generator.borrow().is_created() {
            self.run_generator(generator, None)?;
        }
        Ok(())
    }

    /// Advance past the current yield, delivering `sent` as its result
    pub(crate) fn generator_resume(
        &mut self,
        generator: &GeneratorRef,
        sent: Val,
    ) -> Result<(), VmError> {
        self.generator_start(generator)?;
        if generator.borrow().is_finished() {
            return Ok(());
        }
        generator.borrow_mut().advanced = true;
        self.run_generator(generator, Some(sent))
    }

    /// Drain a generator into key/value pairs
    pub(crate) fn collect_generator(
        &mut self,
        generator: &GeneratorRef,
    ) -> Result<Vec<(Val, Val)>, VmError> {
        self.generator_start(generator)?;
        let mut entries = Vec::new();
        loop {
            {
                let data = generator.borrow();
                if data.is_finished() {
                    break;
                }
                entries.push((data.current_key.clone(), data.current_val.clone()));
            }
            self.generator_resume(generator, Val::Null)?;
        }
        Ok(entries)
    }

    /// Re-enter the parked activation until it yields, returns or throws
    fn run_generator(&mut self, generator: &GeneratorRef, sent: Option<Val>) -> Result<(), VmError> {
        let state = std::mem::replace(&mut generator.borrow_mut().state, GeneratorState::Running);
        let mut ctx = match state {
            GeneratorState::Created(ctx) | GeneratorState::Suspended(ctx) => ctx,
            GeneratorState::Running => {
                return Err(self.throw_error("Error", "Cannot resume an already running generator"));
            }
            GeneratorState::Finished => {
                generator.borrow_mut().state = GeneratorState::Finished;
                return Ok(());
            }
        };

        let mut sent_target = None;
        if let Some(ys) = ctx.generator.as_mut() {
            ys.suspended = false;
            ctx.ip = ys.resume_ip;
            sent_target = ys.sent_target.take();
            if ys.delegate.is_some() {
                ys.pending_send = sent.clone();
            }
        }
        if let Some((kind, raw)) = sent_target {
            self.set(&mut ctx, kind, raw, sent.unwrap_or(Val::Null))?;
        }
        ctx.halted = false;

        let result = self.run_loop(&mut ctx);

        let suspended = ctx.generator.as_ref().is_some_and(|ys| ys.suspended);
        let mut data = generator.borrow_mut();
        if let Err(err) = result {
            tracing::debug!("generator finished by exception");
            data.state = GeneratorState::Finished;
            data.current_val = Val::Null;
            data.current_key = Val::Null;
            return Err(err);
        }
        if suspended {
            if let Some(ys) = ctx.generator.as_ref() {
                data.current_key = ys.key.clone();
                data.current_val = ys.value.clone();
            }
            data.state = GeneratorState::Suspended(ctx);
        } else {
            tracing::debug!("generator finished");
            data.return_val = Some(self.arena.deref(&ctx.return_value).clone());
            data.current_val = Val::Null;
            data.current_key = Val::Null;
            data.state = GeneratorState::Finished;
        }
        Ok(())
    }

    /// Park the activation with a yielded key/value; resume at `resume_ip`
    fn suspend(ctx: &mut ExecutionContext, key: Val, value: Val, resume_ip: usize) {
        if let Some(ys) = ctx.generator.as_mut() {
            ys.key = key;
            ys.value = value;
            ys.suspended = true;
            ys.resume_ip = resume_ip;
        }
        ctx.halted = true;
    }

    /// YIELD: op1 = value, op2 = key, result receives the sent value
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_YIELD
    pub(crate) fn exec_yield(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let value = self.op1(ctx, &inst);
        let explicit_key = match inst.op2_kind() {
            OperandKind::Unused => None,
            _ => Some(self.op2(ctx, &inst)),
        };
        let Some(ys) = ctx.generator.as_mut() else {
            return Err(VmError::runtime("Cannot yield outside of a generator"));
        };
        let key = match explicit_key {
            Some(key) => {
                if let Val::Int(i) = key {
                    if i >= ys.auto_key {
                        ys.auto_key = i + 1;
                    }
                }
                key
            }
            None => {
                let key = Val::Int(ys.auto_key);
                ys.auto_key += 1;
                key
            }
        };
        ys.sent_target = match inst.result_kind() {
            OperandKind::Unused => None,
            kind => Some((kind, inst.result)),
        };
        let resume_ip = ctx.ip;
        Self::suspend(ctx, key, value, resume_ip);
        Ok(())
    }

    /// YIELD_FROM: op1 = array or generator, result = the inner return value
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_YIELD_FROM
    pub(crate) fn exec_yield_from(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let Some(ys) = ctx.generator.as_mut() else {
            return Err(VmError::runtime("Cannot use \"yield from\" outside of a generator"));
        };
        let delegate = ys.delegate.take();
        let pending_send = ys.pending_send.take();

        let delegate = match delegate {
            Some(delegate) => delegate,
            None => {
                let source = self.op1(ctx, &inst);
                match &source {
                    Val::Array(arr) => SubIterator::Array {
                        entries: arr
                            .map
                            .iter()
                            .map(|(k, v)| (k.clone(), self.arena.deref(v).clone()))
                            .collect(),
                        index: 0,
                    },
                    _ => match generator_of(&source) {
                        Some(handle) => SubIterator::Generator {
                            handle,
                            state: SubGenState::Initial,
                        },
                        None => {
                            return Err(self.throw_error(
                                "Error",
                                "Can use \"yield from\" only with arrays and Traversables",
                            ));
                        }
                    },
                }
            }
        };

        let opline = ctx.opline;
        match delegate {
            SubIterator::Array { entries, index } => {
                let Some((key, value)) = entries.get(index).cloned() else {
                    return self.set_result(ctx, &inst, Val::Null);
                };
                if let Some(ys) = ctx.generator.as_mut() {
                    ys.delegate = Some(SubIterator::Array {
                        entries,
                        index: index + 1,
                    });
                }
                Self::suspend(ctx, key.to_val(), value, opline);
                Ok(())
            }
            SubIterator::Generator { handle, state } => {
                match state {
                    SubGenState::Initial => self.generator_start(&handle)?,
                    SubGenState::Yielded => {
                        self.generator_resume(&handle, pending_send.unwrap_or(Val::Null))?
                    }
                }
                let (finished, key, value, returned) = {
                    let data = handle.borrow();
                    (
                        data.is_finished(),
                        data.current_key.clone(),
                        data.current_val.clone(),
                        data.return_val.clone(),
                    )
                };
                if finished {
                    return self.set_result(ctx, &inst, returned.unwrap_or(Val::Null));
                }
                if let Some(ys) = ctx.generator.as_mut() {
                    ys.delegate = Some(SubIterator::Generator {
                        handle,
                        state: SubGenState::Yielded,
                    });
                }
                Self::suspend(ctx, key, value, opline);
                Ok(())
            }
        }
    }
}

/// The generator behind `$this` of a native Generator method
fn this_generator(vm: &VM, this: Option<&ObjectRef>) -> Result<GeneratorRef, VmError> {
    this.and_then(generator_of_object)
        .ok_or_else(|| vm.throw_error("Error", "Generator method called on a non-generator"))
}

/// Generator::current()
pub fn current(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    let generator = this_generator(vm, this)?;
    vm.generator_start(&generator)?;
    let value = generator.borrow().current_val.clone();
    Ok(value)
}

/// Generator::key()
pub fn key(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    let generator = this_generator(vm, this)?;
    vm.generator_start(&generator)?;
    let key = generator.borrow().current_key.clone();
    Ok(key)
}

/// Generator::next()
pub fn next(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    let generator = this_generator(vm, this)?;
    vm.generator_resume(&generator, Val::Null)?;
    Ok(Val::Null)
}

/// Generator::send($value): resume with a value, return the next yield
pub fn send(vm: &mut VM, this: Option<&ObjectRef>, args: &[Val]) -> Result<Val, VmError> {
    let generator = this_generator(vm, this)?;
    let sent = args.first().cloned().unwrap_or(Val::Null);
    vm.generator_resume(&generator, sent)?;
    let value = generator.borrow().current_val.clone();
    Ok(value)
}

/// Generator::valid()
pub fn valid(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    let generator = this_generator(vm, this)?;
    vm.generator_start(&generator)?;
    let finished = generator.borrow().is_finished();
    Ok(Val::Bool(!finished))
}

/// Generator::rewind(): only legal before the first resume
pub fn rewind(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    let generator = this_generator(vm, this)?;
    vm.generator_start(&generator)?;
    if generator.borrow().advanced {
        return Err(vm.throw_error("Exception", "Cannot rewind a generator that was already run"));
    }
    Ok(Val::Null)
}

/// Generator::getReturn()
pub fn get_return(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    let generator = this_generator(vm, this)?;
    let data = generator.borrow();
    match (&data.state, &data.return_val) {
        (GeneratorState::Finished, Some(value)) => Ok(value.clone()),
        _ => Err(vm.throw_error(
            "Exception",
            "Cannot get return value of a generator that hasn't returned",
        )),
    }
}
