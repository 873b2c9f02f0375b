//! Variable operations module
//!
//! Handles assignment, reference binding and the lifetime of variable and
//! temporary slots following PHP semantics.
//!
//! ## PHP Variable Semantics
//!
//! - Variables are created on first assignment
//! - Undefined variables read as null; isset/empty/unset never fault
//! - References allow multiple names for same value
//!
//! ## Reference Handling
//!
//! ```php
//! $a = &$b;  // $a and $b share one cell
//! $a = 5;    // Both $a and $b now equal 5
//! ```
//!
//! Implementation:
//! - A shared cell lives in the VM arena; aliased slots hold `Val::Reference`
//! - Assigning to an aliased slot writes into the cell
//! - `global $x` and `static $x` alias the slot to a cell owned by the VM
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_execute.c` - ZEND_ASSIGN*/ZEND_BIND_*
//! - Zend: `$PHP_SRC_PATH/Zend/zend_variables.c` - Variable management

use crate::core::value::Val;
use crate::vm::assign_op::BinaryOp;
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::ExecutionContext;
use crate::vm::opcode::{ISEMPTY, Instruction, OperandKind};
use std::rc::Rc;

impl VM {
    /// ZEND_ASSIGN: op1 = target, op2 = value
    pub(crate) fn exec_assign(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op2(ctx, &inst);
        if !inst.op1_kind().is_variable() && inst.op1_kind() != OperandKind::TmpVar {
            return Err(VmError::runtime("Cannot assign to a non-variable operand"));
        }
        self.set(ctx, inst.op1_kind(), inst.op1, val.clone())?;
        self.set_result(ctx, &inst, val)
    }

    /// ZEND_ASSIGN_REF: make op1 an alias of op2's cell
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_assign_to_variable_reference
    pub(crate) fn exec_assign_ref(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let source_kind = inst.op2_kind();
        // A by-reference return already carries its cell
        let returned = match ctx.temps.get(&inst.op2) {
            Some(Val::Reference(h))
                if source_kind == OperandKind::TmpVar && !ctx.places.contains_key(&inst.op2) =>
            {
                Some(*h)
            }
            _ => None,
        };
        let handle = match returned {
            Some(h) => h,
            None => self.make_ref(ctx, source_kind, inst.op2)?,
        };
        self.bind_ref(ctx, inst.op1_kind(), inst.op1, handle)?;
        let val = self.arena.get(handle).clone();
        self.set_result(ctx, &inst, val)
    }

    /// ZEND_ASSIGN_OP: `$x op= value`, operator in `extended`
    pub(crate) fn exec_assign_op(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let op = binary_op_of(&inst)?;
        let Some(place) = Self::place_of(ctx, inst.op1_kind(), inst.op1) else {
            return Err(VmError::runtime("Cannot use assign-op operators on a constant"));
        };
        let rhs = self.op2(ctx, &inst);
        let current = self.read_place(ctx, &place);
        let result = self.binary_op(op, &current, &rhs)?;
        self.write_place(ctx, &place, result.clone())?;
        self.set_result(ctx, &inst, result)
    }

    /// QM_ASSIGN / COPY_TMP: copy op1 into the result
    pub(crate) fn exec_qm_assign(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        self.set_result(ctx, &inst, val)
    }

    /// ZEND_FREE: release a temporary
    pub(crate) fn exec_free(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        if inst.op1_kind() == OperandKind::TmpVar {
            ctx.temps.remove(&inst.op1);
            ctx.places.remove(&inst.op1);
        }
        Ok(())
    }

    /// ZEND_UNSET_CV: drop the slot; an aliased cell survives for its other holders
    pub(crate) fn exec_unset_cv(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        ctx.vars.remove(&inst.op1);
        Ok(())
    }

    /// ZEND_ISSET_ISEMPTY_CV
    pub(crate) fn exec_isset_isempty_cv(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.get(ctx, inst.op1_kind(), inst.op1);
        let result = if inst.extended == ISEMPTY {
            !val.to_bool()
        } else {
            !val.is_null()
        };
        self.set_result(ctx, &inst, Val::Bool(result))
    }

    /// ZEND_BIND_GLOBAL: op1 = slot, op2 = variable name
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_BIND_GLOBAL
    pub(crate) fn exec_bind_global(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let name = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let handle = self.global_cell(&name);
        self.bind_ref(ctx, inst.op1_kind(), inst.op1, handle)
    }

    /// ZEND_BIND_STATIC: op1 = slot, op2 = initial value. The cell belongs to
    /// the function body and survives between calls.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_BIND_STATIC
    pub(crate) fn exec_bind_static(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let key = (Rc::as_ptr(&ctx.chunk) as usize, inst.op1);
        let handle = match self.statics.get(&key) {
            Some((_, h)) => *h,
            None => {
                let initial = self.op2(ctx, &inst);
                let h = self.arena.alloc(initial);
                self.statics.insert(key, (ctx.chunk.clone(), h));
                h
            }
        };
        self.bind_ref(ctx, inst.op1_kind(), inst.op1, handle)
    }
}

/// Compound operator carried in `extended`
pub(crate) fn binary_op_of(inst: &Instruction) -> Result<BinaryOp, VmError> {
    BinaryOp::from_u8(inst.extended)
        .ok_or_else(|| VmError::runtime(format!("Invalid assign-op operator {}", inst.extended)))
}
