//! Bytecode instruction encoding
//!
//! Register-style three-address instructions modelled on Zend's `zend_op`:
//! two inputs, one result, each tagged with an [`OperandKind`].
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_compile.h - zend_op, IS_CONST/IS_TMP_VAR/IS_VAR/IS_CV

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Nop,
    ExtStmt,
    ExtNop,
    /// Carries the extra operand of the preceding instruction
    OpData,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    FastConcat,

    // Bitwise
    BwAnd,
    BwOr,
    BwXor,
    BwNot,
    Sl,
    Sr,

    // Logical
    BoolNot,
    BoolXor,
    BoolAnd,
    BoolOr,
    Bool,

    // Comparison
    IsEqual,
    IsNotEqual,
    IsIdentical,
    IsNotIdentical,
    IsSmaller,
    IsSmallerOrEqual,
    IsGreater,
    IsGreaterOrEqual,
    Spaceship,
    Case,
    CaseStrict,

    // Variables
    Assign,
    AssignRef,
    AssignOp,
    QmAssign,
    CopyTmp,
    Free,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    UnsetCv,
    IssetIsemptyCv,
    BindGlobal,
    BindStatic,

    // Type/introspection
    Cast,
    Strlen,
    Count,
    GetClass,
    GetCalledClass,
    GetType,
    Instanceof,
    FuncNumArgs,
    FuncGetArgs,

    // Strings
    RopeInit,
    RopeAdd,
    RopeEnd,

    // Control flow
    Jmp,
    Jmpz,
    Jmpnz,
    JmpzEx,
    JmpnzEx,
    JmpSet,
    Coalesce,
    JmpNull,
    SwitchLong,
    SwitchString,
    Match,
    MatchError,

    // Arrays
    InitArray,
    AddArrayElement,
    AddArrayUnpack,
    FetchDimR,
    FetchDimIs,
    FetchDimW,
    FetchDimRw,
    FetchDimUnset,
    FetchDimFuncArg,
    FetchListR,
    AssignDim,
    AssignDimOp,
    UnsetDim,
    IssetIsemptyDimObj,
    InArray,
    ArrayKeyExists,

    // Iteration
    FeResetR,
    FeResetRw,
    FeFetchR,
    FeFetchRw,
    FeFree,

    // Calls
    InitFcall,
    InitFcallByName,
    InitNsFcallByName,
    InitDynamicCall,
    InitUserCall,
    InitMethodCall,
    InitStaticMethodCall,
    InitCtorCall,
    SendVal,
    SendValEx,
    SendVar,
    SendVarEx,
    SendVarNoRef,
    SendRef,
    SendUnpack,
    DoFcall,
    DoIcall,
    DoUcall,
    DoFcallByName,
    CallCtor,
    Return,
    ReturnByRef,
    GeneratorReturn,
    DeclareLambdaFunction,
    BindLexical,

    // Objects
    New,
    Clone,
    FetchObjR,
    FetchObjIs,
    FetchObjW,
    FetchObjRw,
    FetchObjFuncArg,
    AssignObj,
    AssignObjOp,
    UnsetObj,
    IssetIsemptyPropObj,
    PreIncObj,
    PreDecObj,
    PostIncObj,
    PostDecObj,
    FetchThis,
    FetchClassName,

    // Static properties
    FetchStaticPropR,
    FetchStaticPropW,
    FetchStaticPropRw,
    FetchStaticPropIs,
    FetchStaticPropFuncArg,
    AssignStaticProp,
    AssignStaticPropOp,
    PreIncStaticProp,
    PreDecStaticProp,
    PostIncStaticProp,
    PostDecStaticProp,
    IssetIsemptyStaticProp,

    // Constants
    FetchClassConstant,
    DeclareConst,
    FetchConstant,

    // Exceptions
    Catch,
    Throw,
    FastRet,
    DiscardException,
    HandleException,

    // Generators
    Yield,
    YieldFrom,

    // System
    Echo,
    Exit,
    IncludeOrEval,
}

/// How an operand's raw value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum OperandKind {
    /// Not read; the raw value may carry an inline number
    #[default]
    Unused = 0,
    /// Index into the chunk's constant pool
    Const = 1,
    /// Temporary slot
    TmpVar = 2,
    /// Variable slot produced by an earlier instruction
    Var = 3,
    /// Compiled variable slot
    Cv = 4,
}

impl OperandKind {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b111 {
            1 => OperandKind::Const,
            2 => OperandKind::TmpVar,
            3 => OperandKind::Var,
            4 => OperandKind::Cv,
            _ => OperandKind::Unused,
        }
    }

    /// Var and Cv both address the variable table
    pub fn is_variable(self) -> bool {
        matches!(self, OperandKind::Var | OperandKind::Cv)
    }
}

/// Builder-side view of one operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Unused,
    /// Inline number in an otherwise unused operand (jump target, arity, table index)
    Num(u32),
    Const(u32),
    Tmp(u32),
    Var(u32),
    Cv(u32),
}

impl Operand {
    pub fn kind(self) -> OperandKind {
        match self {
            Operand::Unused | Operand::Num(_) => OperandKind::Unused,
            Operand::Const(_) => OperandKind::Const,
            Operand::Tmp(_) => OperandKind::TmpVar,
            Operand::Var(_) => OperandKind::Var,
            Operand::Cv(_) => OperandKind::Cv,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Operand::Unused => 0,
            Operand::Num(n)
            | Operand::Const(n)
            | Operand::Tmp(n)
            | Operand::Var(n)
            | Operand::Cv(n) => n,
        }
    }
}

const OP1_SHIFT: u16 = 0;
const OP2_SHIFT: u16 = 3;
const RESULT_SHIFT: u16 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub op1: u32,
    pub op2: u32,
    pub result: u32,
    /// Three packed 3-bit operand kinds: op1 bits 0-2, op2 bits 3-5, result bits 6-8
    pub op_types: u16,
    /// Opcode-specific sub-mode (cast kind, compound operator, isset/empty, ...)
    pub extended: u8,
}

impl Instruction {
    pub fn new(opcode: OpCode) -> Self {
        Self {
            opcode,
            op1: 0,
            op2: 0,
            result: 0,
            op_types: 0,
            extended: 0,
        }
    }

    pub fn op1(mut self, operand: Operand) -> Self {
        self.op1 = operand.raw();
        self.set_kind(OP1_SHIFT, operand.kind());
        self
    }

    pub fn op2(mut self, operand: Operand) -> Self {
        self.op2 = operand.raw();
        self.set_kind(OP2_SHIFT, operand.kind());
        self
    }

    pub fn result(mut self, operand: Operand) -> Self {
        self.result = operand.raw();
        self.set_kind(RESULT_SHIFT, operand.kind());
        self
    }

    pub fn ext(mut self, extended: u8) -> Self {
        self.extended = extended;
        self
    }

    fn set_kind(&mut self, shift: u16, kind: OperandKind) {
        self.op_types &= !(0b111 << shift);
        self.op_types |= (kind as u16) << shift;
    }

    pub fn op1_kind(&self) -> OperandKind {
        OperandKind::from_bits(self.op_types >> OP1_SHIFT)
    }

    pub fn op2_kind(&self) -> OperandKind {
        OperandKind::from_bits(self.op_types >> OP2_SHIFT)
    }

    pub fn result_kind(&self) -> OperandKind {
        OperandKind::from_bits(self.op_types >> RESULT_SHIFT)
    }

    pub fn has_result(&self) -> bool {
        self.result_kind() != OperandKind::Unused
    }
}

/// `extended` values for CAST
/// Reference: $PHP_SRC_PATH/Zend/zend_types.h - IS_LONG, IS_DOUBLE, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CastKind {
    Int = 0,
    Bool = 1,
    Float = 2,
    String = 3,
    Array = 4,
    Object = 5,
    Unset = 6,
}

impl CastKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Int),
            1 => Some(Self::Bool),
            2 => Some(Self::Float),
            3 => Some(Self::String),
            4 => Some(Self::Array),
            5 => Some(Self::Object),
            6 => Some(Self::Unset),
            _ => None,
        }
    }
}

/// `extended` values for ISSET_ISEMPTY_*
pub const ISSET: u8 = 0;
pub const ISEMPTY: u8 = 1;

/// `extended` values for INCLUDE_OR_EVAL
/// Reference: $PHP_SRC_PATH/Zend/zend_compile.h - ZEND_EVAL, ZEND_INCLUDE, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IncludeKind {
    Eval = 1,
    Include = 2,
    IncludeOnce = 4,
    Require = 8,
    RequireOnce = 16,
}

impl IncludeKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Self::Eval),
            2 => Some(Self::Include),
            4 => Some(Self::IncludeOnce),
            8 => Some(Self::Require),
            16 => Some(Self::RequireOnce),
            _ => None,
        }
    }

    pub fn is_require(self) -> bool {
        matches!(self, Self::Require | Self::RequireOnce)
    }

    pub fn is_once(self) -> bool {
        matches!(self, Self::IncludeOnce | Self::RequireOnce)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Eval => "eval",
            Self::Include => "include",
            Self::IncludeOnce => "include_once",
            Self::Require => "require",
            Self::RequireOnce => "require_once",
        }
    }
}

/// `extended` flag for BIND_LEXICAL: capture by reference
pub const BIND_REF: u8 = 1;

/// `extended` flag for INIT_ARRAY / ADD_ARRAY_ELEMENT: store a reference to op1
pub const ADD_BY_REF: u8 = 1;

/// `extended` flag for IN_ARRAY: compare with `===`
pub const IN_ARRAY_STRICT: u8 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_kinds_pack_independently() {
        let inst = Instruction::new(OpCode::Add)
            .op1(Operand::Cv(3))
            .op2(Operand::Const(7))
            .result(Operand::Tmp(1));

        assert_eq!(inst.op1_kind(), OperandKind::Cv);
        assert_eq!(inst.op2_kind(), OperandKind::Const);
        assert_eq!(inst.result_kind(), OperandKind::TmpVar);
        assert_eq!((inst.op1, inst.op2, inst.result), (3, 7, 1));
    }

    #[test]
    fn test_inline_number_is_unused_kind() {
        let inst = Instruction::new(OpCode::Jmp).op1(Operand::Num(42));
        assert_eq!(inst.op1_kind(), OperandKind::Unused);
        assert_eq!(inst.op1, 42);
        assert!(!inst.has_result());
    }

    #[test]
    fn test_overwriting_a_kind() {
        let inst = Instruction::new(OpCode::Assign)
            .op1(Operand::Tmp(0))
            .op1(Operand::Cv(0));
        assert_eq!(inst.op1_kind(), OperandKind::Cv);
    }
}
