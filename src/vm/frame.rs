use crate::compiler::chunk::{CatchEntry, CodeChunk, UserFunc};
use crate::core::heap::Handle;
use crate::core::value::{ArrayKey, ClosureData, ObjectRef, Val};
use crate::runtime::context::{NativeHandler, NativeMethod};
use crate::vm::opcode::OperandKind;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const INLINE_ARG_CAPACITY: usize = 8;
pub type ArgList = SmallVec<[Val; INLINE_ARG_CAPACITY]>;

/// All mutable state of one activation: the top-level script, a function or
/// method body, a closure invocation, an included file or a generator body.
#[derive(Debug)]
pub struct ExecutionContext {
    pub chunk: Rc<CodeChunk>,
    pub func: Option<Rc<UserFunc>>,
    pub ip: usize,
    /// Index of the instruction currently executing
    pub opline: usize,
    pub vars: HashMap<u32, Val>,
    pub temps: HashMap<u32, Val>,
    /// Write-back targets of temporaries produced by W/RW fetches
    pub places: HashMap<u32, Place>,
    pub current_call: Option<CallContext>,
    pub call_stack: Vec<CallContext>,
    pub iterators: HashMap<u32, ForeachIterator>,
    pub handlers: Vec<ExceptionHandler>,
    /// Exception waiting for the end of a finally block
    pub exception: Option<Val>,
    pub generator: Option<YieldState>,
    pub ropes: HashMap<u32, Vec<u8>>,
    pub this: Option<ObjectRef>,
    pub class_scope: Option<Rc<str>>,
    pub called_scope: Option<Rc<str>>,
    /// Arguments as received, including extras beyond the declared params
    pub args: ArgList,
    pub return_value: Val,
    pub returned: bool,
    pub halted: bool,
}

impl ExecutionContext {
    pub fn new(chunk: Rc<CodeChunk>) -> Self {
        Self {
            chunk,
            func: None,
            ip: 0,
            opline: 0,
            vars: HashMap::new(),
            temps: HashMap::new(),
            places: HashMap::new(),
            current_call: None,
            call_stack: Vec::new(),
            iterators: HashMap::new(),
            handlers: Vec::new(),
            exception: None,
            generator: None,
            ropes: HashMap::new(),
            this: None,
            class_scope: None,
            called_scope: None,
            args: ArgList::new(),
            return_value: Val::Null,
            returned: false,
            halted: false,
        }
    }

    pub fn for_function(func: Rc<UserFunc>) -> Self {
        let mut ctx = Self::new(func.chunk.clone());
        ctx.func = Some(func);
        ctx
    }

    pub fn function_name(&self) -> &str {
        self.func
            .as_ref()
            .map(|f| f.name.as_ref())
            .unwrap_or(self.chunk.name.as_ref())
    }

    /// Push the call being assembled (if any) and start a new one
    pub fn begin_call(&mut self, call: CallContext) {
        if let Some(outer) = self.current_call.take() {
            self.call_stack.push(outer);
        }
        self.current_call = Some(call);
    }

    /// Take the finished call and restore the enclosing one
    pub fn finish_call(&mut self) -> Option<CallContext> {
        let call = self.current_call.take();
        self.current_call = self.call_stack.pop();
        call
    }
}

/// What a staged call resolves to
#[derive(Debug, Clone)]
pub enum CallTarget {
    User(Rc<UserFunc>),
    Builtin(NativeHandler),
    Native(NativeMethod),
    Closure(Rc<ClosureData>),
    /// `__call` / `__callStatic` standing in for a missing method
    Magic { func: Rc<UserFunc>, method: Rc<str> },
    /// Constructor call on a class without `__construct`
    Nothing,
}

/// A call being assembled by INIT_* / SEND_* before DO_*CALL runs it
#[derive(Debug, Clone)]
pub struct CallContext {
    pub name: Rc<str>,
    pub target: CallTarget,
    pub this: Option<ObjectRef>,
    pub class_scope: Option<Rc<str>>,
    pub called_scope: Option<Rc<str>>,
    pub args: ArgList,
    pub arity: u32,
    pub is_method: bool,
    /// Object returned by CALL_CTOR
    pub ctor_object: Option<ObjectRef>,
}

impl CallContext {
    pub fn new(name: Rc<str>, target: CallTarget, arity: u32) -> Self {
        Self {
            name,
            target,
            this: None,
            class_scope: None,
            called_scope: None,
            args: ArgList::new(),
            arity,
            is_method: false,
            ctor_object: None,
        }
    }

    /// Whether argument `index` (0-based) is declared by-reference
    pub fn param_by_ref(&self, index: usize) -> bool {
        let func = match &self.target {
            CallTarget::User(func) => func,
            CallTarget::Closure(closure) => &closure.func,
            _ => return false,
        };
        match func.params.get(index) {
            Some(param) => param.by_ref,
            None => func.params.last().is_some_and(|p| p.is_variadic && p.by_ref),
        }
    }
}

/// A writable location a W/RW fetch resolved to
#[derive(Debug, Clone)]
pub enum Place {
    /// Variable slot
    Var(u32),
    /// Temporary slot with no further write-back
    Temp(u32),
    /// Reference cell (static properties, globals)
    Cell(Handle),
    Prop(ObjectRef, Rc<str>),
    /// Element of the container at the inner place; `None` appends
    Dim(Box<Place>, Option<ArrayKey>),
}

#[derive(Debug, Clone)]
pub enum IterSource {
    /// Snapshot taken at reset time
    Snapshot(Vec<(ArrayKey, Val)>),
    /// By-reference iteration: keys snapshotted, values reached through the place
    ByRef { place: Place, keys: Vec<ArrayKey> },
    Generator(Rc<RefCell<GeneratorData>>),
}

#[derive(Debug, Clone)]
pub struct ForeachIterator {
    pub source: IterSource,
    pub index: usize,
    pub has_more: bool,
    /// Temporaries last written by FE_FETCH, cleared by FE_FREE
    pub value_temp: Option<u32>,
    pub key_temp: Option<u32>,
}

impl ForeachIterator {
    pub fn new(source: IterSource) -> Self {
        let has_more = match &source {
            IterSource::Snapshot(entries) => !entries.is_empty(),
            IterSource::ByRef { keys, .. } => !keys.is_empty(),
            IterSource::Generator(_) => true,
        };
        Self {
            source,
            index: 0,
            has_more,
            value_temp: None,
            key_temp: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(IterSource::Snapshot(Vec::new()))
    }
}

/// A registered try/catch/finally region
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    /// Index in the chunk's catch table
    pub entry: usize,
    pub try_start: usize,
    pub try_end: usize,
    pub catch_start: Option<usize>,
    pub finally_start: Option<usize>,
    pub catch_var: Option<u32>,
    pub catch_types: Vec<Rc<str>>,
}

impl ExceptionHandler {
    pub fn from_entry(entry: usize, def: &CatchEntry) -> Self {
        Self {
            entry,
            try_start: def.try_start as usize,
            try_end: def.try_end as usize,
            catch_start: def.catch_start.map(|v| v as usize),
            finally_start: def.finally_start.map(|v| v as usize),
            catch_var: def.catch_var,
            catch_types: def.catch_types.clone(),
        }
    }

    pub fn covers(&self, ip: usize) -> bool {
        self.try_start <= ip && ip < self.try_end
    }

    /// Inside the catch body of a handler that also has a finally block
    pub fn in_catch_body(&self, ip: usize) -> bool {
        match (self.catch_start, self.finally_start) {
            (Some(catch), Some(finally)) => catch <= ip && ip < finally,
            _ => false,
        }
    }
}

/// Per-activation generator bookkeeping
#[derive(Debug, Clone, Default)]
pub struct YieldState {
    pub suspended: bool,
    pub key: Val,
    pub value: Val,
    pub auto_key: i64,
    pub resume_ip: usize,
    /// Where the value passed to send() lands on resume
    pub sent_target: Option<(OperandKind, u32)>,
    pub delegate: Option<SubIterator>,
    /// Value passed to send() while a `yield from` is delegating
    pub pending_send: Option<Val>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubGenState {
    Initial,
    Yielded,
}

/// Source of a `yield from`
#[derive(Debug, Clone)]
pub enum SubIterator {
    Array { entries: Vec<(ArrayKey, Val)>, index: usize },
    Generator { handle: Rc<RefCell<GeneratorData>>, state: SubGenState },
}

#[derive(Debug)]
pub enum GeneratorState {
    Created(Box<ExecutionContext>),
    Running,
    Suspended(Box<ExecutionContext>),
    Finished,
}

#[derive(Debug)]
pub struct GeneratorData {
    pub state: GeneratorState,
    pub current_val: Val,
    pub current_key: Val,
    pub return_val: Option<Val>,
    /// Advanced past the first yield; rewind() is no longer allowed
    pub advanced: bool,
}

impl GeneratorData {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self {
            state: GeneratorState::Created(Box::new(ctx)),
            current_val: Val::Null,
            current_key: Val::Null,
            return_val: None,
            advanced: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, GeneratorState::Finished)
    }

    pub fn is_created(&self) -> bool {
        matches!(self.state, GeneratorState::Created(_))
    }
}
