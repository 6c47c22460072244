//! Stack-machine interpreter driving loaded method bodies.
//!
//! Execution is frame-based: each invocation gets its argument slots, local
//! slots and an operand stack. Control flow is sequential except for branch
//! instructions, whose operands are instruction indices. `callvirt` dispatches
//! through the receiver's runtime type, walking base edges until an
//! implementation is found - which is exactly why a virtual/interface mock
//! must have rewritten every implementation, not just one.
//!
//! `call.hook` is where injected mocks come alive: the interpreter pops the
//! hook's declared consumption, consults its gate and runtime argument
//! checkers, and either applies the hook action or falls back to the original
//! member.

use crate::{
    assembly::{MethodBody, OpCode, Operand},
    metadata::{token::Token, typesystem::UnitTypeRc},
    runtime::{HookAction, LoadedModule, ObjectData, Value},
    Error, Result,
};

/// Execution limits protecting against runaway loops and recursion.
#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    /// Maximum executed instructions per top-level invocation
    pub max_steps: usize,
    /// Maximum call depth
    pub max_depth: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        EvalLimits {
            max_steps: 1_000_000,
            max_depth: 128,
        }
    }
}

/// Bytecode interpreter over one loaded module.
pub struct Interpreter<'a> {
    module: &'a LoadedModule,
    limits: EvalLimits,
    steps: usize,
}

impl<'a> Interpreter<'a> {
    /// Creates an interpreter with default limits.
    #[must_use]
    pub fn new(module: &'a LoadedModule) -> Self {
        Interpreter {
            module,
            limits: EvalLimits::default(),
            steps: 0,
        }
    }

    /// Creates an interpreter with explicit limits.
    #[must_use]
    pub fn with_limits(module: &'a LoadedModule, limits: EvalLimits) -> Self {
        Interpreter {
            module,
            limits,
            steps: 0,
        }
    }

    /// Invokes a method.
    ///
    /// For instance methods `this` becomes argument 0; static methods ignore
    /// it. Returns [`Value::Null`] for methods without a return value.
    ///
    /// # Errors
    /// [`Error::Execution`] on interpreter faults, [`Error::RecursionLimit`]
    /// when the call depth is exhausted.
    pub fn invoke(&mut self, method: Token, this: Option<Value>, args: Vec<Value>) -> Result<Value> {
        self.invoke_at(method, this, args, 0)
    }

    fn invoke_at(
        &mut self,
        method: Token,
        this: Option<Value>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value> {
        if depth >= self.limits.max_depth {
            return Err(Error::RecursionLimit(self.limits.max_depth));
        }
        let definition = self.module.method_def(method)?;
        let body = self.module.body_of(method).ok_or_else(|| {
            Error::Execution(format!(
                "method {} ({}) has no body to execute",
                definition.name, method
            ))
        })?;

        let mut frame_args = Vec::with_capacity(args.len() + 1);
        if !definition.is_static() {
            frame_args.push(this.unwrap_or(Value::Null));
        }
        frame_args.extend(args);

        self.run(&definition, &body, frame_args, depth)
    }

    #[allow(clippy::too_many_lines)]
    fn run(
        &mut self,
        definition: &crate::metadata::method::Method,
        body: &MethodBody,
        frame_args: Vec<Value>,
        depth: usize,
    ) -> Result<Value> {
        let mut locals: Vec<Value> = body.locals.iter().map(Value::default_for).collect();
        let mut stack: Vec<Value> = Vec::with_capacity(body.max_stack.max(4));
        let mut ip = 0usize;

        while ip < body.instructions.len() {
            self.steps += 1;
            if self.steps > self.limits.max_steps {
                return Err(Error::Execution(format!(
                    "step limit of {} exceeded in {}",
                    self.limits.max_steps, definition.name
                )));
            }

            let instruction = &body.instructions[ip];
            let mut next = ip + 1;

            match instruction.opcode {
                OpCode::Nop => {}
                OpCode::LdArg => {
                    let index = operand_index(&instruction.operand)?;
                    let value = frame_args.get(index).cloned().ok_or_else(|| {
                        Error::Execution(format!(
                            "argument {index} out of range in {}",
                            definition.name
                        ))
                    })?;
                    stack.push(value);
                }
                OpCode::LdLoc => {
                    let index = operand_index(&instruction.operand)?;
                    let value = locals.get(index).cloned().ok_or_else(|| {
                        Error::Execution(format!("local {index} out of range in {}", definition.name))
                    })?;
                    stack.push(value);
                }
                OpCode::StLoc => {
                    let index = operand_index(&instruction.operand)?;
                    let value = pop(&mut stack, definition)?;
                    let slot = locals.get_mut(index).ok_or_else(|| {
                        Error::Execution(format!("local {index} out of range in {}", definition.name))
                    })?;
                    *slot = value;
                }
                OpCode::LdcI4 => {
                    if let Operand::Int32(value) = instruction.operand {
                        stack.push(Value::I32(value));
                    } else {
                        return Err(invalid_operand(instruction, definition));
                    }
                }
                OpCode::LdcI8 => {
                    if let Operand::Int64(value) = instruction.operand {
                        stack.push(Value::I64(value));
                    } else {
                        return Err(invalid_operand(instruction, definition));
                    }
                }
                OpCode::LdcR8 => {
                    if let Operand::Float64(value) = instruction.operand {
                        stack.push(Value::F64(value));
                    } else {
                        return Err(invalid_operand(instruction, definition));
                    }
                }
                OpCode::LdStr => {
                    if let Operand::Str(value) = &instruction.operand {
                        stack.push(Value::str(value));
                    } else {
                        return Err(invalid_operand(instruction, definition));
                    }
                }
                OpCode::LdNull => stack.push(Value::Null),
                OpCode::Dup => {
                    let top = stack.last().cloned().ok_or_else(|| underflow(definition))?;
                    stack.push(top);
                }
                OpCode::Pop => {
                    pop(&mut stack, definition)?;
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    let right = pop(&mut stack, definition)?;
                    let left = pop(&mut stack, definition)?;
                    stack.push(arithmetic(instruction.opcode, left, right, definition)?);
                }
                OpCode::Ceq => {
                    let right = pop(&mut stack, definition)?;
                    let left = pop(&mut stack, definition)?;
                    stack.push(Value::Bool(left == right));
                }
                OpCode::Br => {
                    next = branch_target(instruction, definition)?;
                }
                OpCode::BrTrue => {
                    let condition = pop(&mut stack, definition)?;
                    if condition.truthy() {
                        next = branch_target(instruction, definition)?;
                    }
                }
                OpCode::BrFalse => {
                    let condition = pop(&mut stack, definition)?;
                    if !condition.truthy() {
                        next = branch_target(instruction, definition)?;
                    }
                }
                OpCode::Ret => {
                    return if definition.return_type.is_unit() {
                        Ok(Value::Null)
                    } else {
                        pop(&mut stack, definition)
                    };
                }
                OpCode::Call | OpCode::CallVirt => {
                    self.execute_call(instruction, &mut stack, definition, depth)?;
                }
                OpCode::NewObj => {
                    self.execute_newobj(instruction, &mut stack, definition, depth)?;
                }
                OpCode::LdFld => {
                    let field_token = resolve_token(self.module, instruction, definition)?;
                    let field = self.module.field_of(field_token)?;
                    let receiver = pop(&mut stack, definition)?;
                    let object = receiver
                        .as_object()
                        .ok_or_else(|| null_reference(&field.name, definition))?;
                    let value = object
                        .fields
                        .get(&field.token.value())
                        .map(|e| e.value().clone())
                        .unwrap_or_else(|| Value::default_for(&field.sig));
                    stack.push(value);
                }
                OpCode::StFld => {
                    let field_token = resolve_token(self.module, instruction, definition)?;
                    let field = self.module.field_of(field_token)?;
                    let value = pop(&mut stack, definition)?;
                    let receiver = pop(&mut stack, definition)?;
                    let object = receiver
                        .as_object()
                        .ok_or_else(|| null_reference(&field.name, definition))?;
                    object.fields.insert(field.token.value(), value);
                }
                OpCode::CastClass => {
                    let target = resolve_token(self.module, instruction, definition)?;
                    let value = pop(&mut stack, definition)?;
                    match &value {
                        Value::Null => stack.push(value),
                        Value::Object(object) => {
                            if self.assignable(object.type_token, target)? {
                                stack.push(value);
                            } else {
                                return Err(Error::Execution(format!(
                                    "invalid cast of {} to {target} in {}",
                                    object.type_token, definition.name
                                )));
                            }
                        }
                        _ => {
                            return Err(Error::Execution(format!(
                                "castclass on a non-reference value in {}",
                                definition.name
                            )))
                        }
                    }
                }
                OpCode::Box => {
                    let target = resolve_token(self.module, instruction, definition)?;
                    let value = pop(&mut stack, definition)?;
                    let object = ObjectData::new(target);
                    object.fields.insert(0, value);
                    stack.push(Value::Object(object));
                }
                OpCode::CallHook => {
                    self.execute_hook(instruction, &mut stack, definition, depth)?;
                }
            }

            ip = next;
        }

        Err(Error::Execution(format!(
            "method {} ended without a return",
            definition.name
        )))
    }

    fn execute_call(
        &mut self,
        instruction: &crate::assembly::Instruction,
        stack: &mut Vec<Value>,
        definition: &crate::metadata::method::Method,
        depth: usize,
    ) -> Result<()> {
        let target = resolve_token(self.module, instruction, definition)?;
        let callee = self.module.method_def(target)?;
        let args = pop_n(stack, callee.params.len(), definition)?;
        let instance = if callee.is_static() {
            None
        } else {
            Some(pop(stack, definition)?)
        };

        let dispatch = if instruction.opcode == OpCode::CallVirt && callee.is_virtual() {
            self.resolve_override(instance.as_ref(), &callee)?
        } else {
            target
        };

        let result = self.invoke_at(dispatch, instance, args, depth + 1)?;
        if !callee.return_type.is_unit() {
            stack.push(result);
        }
        Ok(())
    }

    fn execute_newobj(
        &mut self,
        instruction: &crate::assembly::Instruction,
        stack: &mut Vec<Value>,
        definition: &crate::metadata::method::Method,
        depth: usize,
    ) -> Result<()> {
        let target = resolve_token(self.module, instruction, definition)?;
        let ctor = self.module.method_def(target)?;
        let args = pop_n(stack, ctor.params.len(), definition)?;
        let object = ObjectData::new(ctor.declaring_type);
        self.invoke_at(target, Some(Value::Object(object.clone())), args, depth + 1)?;
        stack.push(Value::Object(object));
        Ok(())
    }

    fn execute_hook(
        &mut self,
        instruction: &crate::assembly::Instruction,
        stack: &mut Vec<Value>,
        definition: &crate::metadata::method::Method,
        depth: usize,
    ) -> Result<()> {
        let Operand::Hook(id) = instruction.operand else {
            return Err(invalid_operand(instruction, definition));
        };
        let hook = self
            .module
            .hooks()
            .get(id)
            .ok_or_else(|| Error::Execution(format!("hook #{id} is not bound")))?;

        let mut consumed = pop_n(stack, hook.consumes, definition)?;
        let (instance, args) = if hook.has_instance {
            let rest = consumed.split_off(1);
            (consumed.pop(), rest)
        } else {
            (None, consumed)
        };

        if hook.context.gate_open() && hook.arguments_accepted(&args) {
            hook.context.increment();
            match &hook.action {
                HookAction::Return(source) => stack.push(source.evaluate()),
                HookAction::ReturnWith(compute) => stack.push(compute(&args)),
                HookAction::Discard { balance } => {
                    if let Some(sig) = balance {
                        stack.push(Value::default_for(sig));
                    }
                }
                HookAction::Invoke(closure) => closure(),
                HookAction::Count => {}
            }
            return Ok(());
        }

        // Gate closed or a runtime checker rejected: run the original member
        // uncounted. Observation-only hooks have nothing to fall back to.
        if let Some(fallback) = hook.fallback {
            if fallback.is_ctor {
                let ctor = self.module.method_def(fallback.method)?;
                let object = ObjectData::new(ctor.declaring_type);
                self.invoke_at(
                    fallback.method,
                    Some(Value::Object(object.clone())),
                    args,
                    depth + 1,
                )?;
                stack.push(Value::Object(object));
            } else {
                let callee = self.module.method_def(fallback.method)?;
                let result = self.invoke_at(fallback.method, instance, args, depth + 1)?;
                if !callee.return_type.is_unit() {
                    stack.push(result);
                }
            }
        }
        Ok(())
    }

    fn resolve_override(
        &self,
        instance: Option<&Value>,
        callee: &crate::metadata::method::Method,
    ) -> Result<Token> {
        let receiver = instance
            .and_then(|value| value.as_object())
            .ok_or_else(|| {
                Error::Execution(format!("virtual call to {} on a null reference", callee.name))
            })?;

        let mut current = Some(receiver.type_token);
        while let Some(type_token) = current {
            let ty = self.module.type_of(type_token)?;
            if let Some(found) = self.find_implementation(&ty, callee) {
                return Ok(found);
            }
            current = ty.base;
        }
        Err(Error::Execution(format!(
            "no implementation of {} reachable from {}",
            callee.name, receiver.type_token
        )))
    }

    fn find_implementation(
        &self,
        ty: &UnitTypeRc,
        callee: &crate::metadata::method::Method,
    ) -> Option<Token> {
        use crate::metadata::typesystem::sigs_equal_erased;
        for (_, method_token) in ty.methods.iter() {
            if let Ok(method) = self.module.method_def(*method_token) {
                if method.name == callee.name
                    && sigs_equal_erased(&method.params, &callee.params)
                    && !method.flags.contains(crate::metadata::method::MethodFlags::ABSTRACT)
                {
                    return Some(method.token);
                }
            }
        }
        None
    }

    fn assignable(&self, runtime_type: Token, target: Token) -> Result<bool> {
        if runtime_type == target {
            return Ok(true);
        }
        let mut current = Some(runtime_type);
        while let Some(type_token) = current {
            let ty = self.module.type_of(type_token)?;
            if ty.token == target || ty.interfaces.contains(&target) {
                return Ok(true);
            }
            current = ty.base;
        }
        Ok(false)
    }
}

fn operand_index(operand: &Operand) -> Result<usize> {
    match operand {
        Operand::Local(index) | Operand::Arg(index) => Ok(usize::from(*index)),
        _ => Err(Error::Execution("index operand expected".to_string())),
    }
}

fn branch_target(
    instruction: &crate::assembly::Instruction,
    definition: &crate::metadata::method::Method,
) -> Result<usize> {
    instruction.branch_target().ok_or_else(|| {
        Error::Execution(format!(
            "branch without target operand in {}",
            definition.name
        ))
    })
}

fn resolve_token(
    module: &LoadedModule,
    instruction: &crate::assembly::Instruction,
    definition: &crate::metadata::method::Method,
) -> Result<Token> {
    let token = instruction
        .operand
        .token()
        .ok_or_else(|| invalid_operand(instruction, definition))?;
    module.resolve(token)
}

fn invalid_operand(
    instruction: &crate::assembly::Instruction,
    definition: &crate::metadata::method::Method,
) -> Error {
    Error::Execution(format!(
        "invalid operand for {} in {}",
        instruction.opcode, definition.name
    ))
}

fn underflow(definition: &crate::metadata::method::Method) -> Error {
    Error::Execution(format!("operand stack underflow in {}", definition.name))
}

fn null_reference(field: &str, definition: &crate::metadata::method::Method) -> Error {
    Error::Execution(format!(
        "field {field} accessed through a null reference in {}",
        definition.name
    ))
}

fn pop(stack: &mut Vec<Value>, definition: &crate::metadata::method::Method) -> Result<Value> {
    stack.pop().ok_or_else(|| underflow(definition))
}

fn pop_n(
    stack: &mut Vec<Value>,
    count: usize,
    definition: &crate::metadata::method::Method,
) -> Result<Vec<Value>> {
    if stack.len() < count {
        return Err(underflow(definition));
    }
    let values = stack.split_off(stack.len() - count);
    Ok(values)
}

fn arithmetic(
    opcode: OpCode,
    left: Value,
    right: Value,
    definition: &crate::metadata::method::Method,
) -> Result<Value> {
    match (left, right) {
        (Value::I32(a), Value::I32(b)) => int32_arithmetic(opcode, a, b, definition),
        (Value::I64(a), Value::I64(b)) => int64_arithmetic(opcode, a, b, definition),
        (Value::F64(a), Value::F64(b)) => Ok(Value::F64(match opcode {
            OpCode::Add => a + b,
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            _ => a / b,
        })),
        _ => Err(Error::Execution(format!(
            "mismatched operand types for {opcode} in {}",
            definition.name
        ))),
    }
}

fn int32_arithmetic(
    opcode: OpCode,
    a: i32,
    b: i32,
    definition: &crate::metadata::method::Method,
) -> Result<Value> {
    let result = match opcode {
        OpCode::Add => a.wrapping_add(b),
        OpCode::Sub => a.wrapping_sub(b),
        OpCode::Mul => a.wrapping_mul(b),
        _ => {
            if b == 0 {
                return Err(Error::Execution(format!(
                    "division by zero in {}",
                    definition.name
                )));
            }
            a.wrapping_div(b)
        }
    };
    Ok(Value::I32(result))
}

fn int64_arithmetic(
    opcode: OpCode,
    a: i64,
    b: i64,
    definition: &crate::metadata::method::Method,
) -> Result<Value> {
    let result = match opcode {
        OpCode::Add => a.wrapping_add(b),
        OpCode::Sub => a.wrapping_sub(b),
        OpCode::Mul => a.wrapping_mul(b),
        _ => {
            if b == 0 {
                return Err(Error::Execution(format!(
                    "division by zero in {}",
                    definition.name
                )));
            }
            a.wrapping_div(b)
        }
    };
    Ok(Value::I64(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::BodyAssembler;
    use crate::metadata::method::MethodFlags;
    use crate::metadata::pool::UnitPool;
    use crate::metadata::typesystem::{TypeFlavor, TypeSig};
    use crate::metadata::unit::CompiledUnit;
    use crate::runtime::HookTable;
    use std::sync::Arc;

    fn load(unit: CompiledUnit) -> LoadedModule {
        LoadedModule::new(unit, Arc::new(HookTable::new()), Arc::new(UnitPool::new()))
    }

    fn static_method(
        unit: &CompiledUnit,
        ty: Token,
        name: &str,
        params: Vec<TypeSig>,
        ret: TypeSig,
        body: MethodBody,
    ) -> Token {
        let token = unit.add_method(ty, name, MethodFlags::STATIC, params, ret);
        unit.set_body(token, body);
        token
    }

    #[test]
    fn test_arithmetic_and_return() {
        let unit = CompiledUnit::new("Interp.Tests");
        let ty = unit.add_type("Interp", "Math", TypeFlavor::Class);
        let add = static_method(
            &unit,
            ty,
            "AddFive",
            vec![TypeSig::I32],
            TypeSig::I32,
            BodyAssembler::new().ldarg(0).ldc_i4(5).add().ret().finish(),
        );

        let module = load(unit);
        let result = module.invoke(add, None, vec![Value::I32(4)]).unwrap();
        assert_eq!(result, Value::I32(9));
    }

    #[test]
    fn test_branching() {
        let unit = CompiledUnit::new("Interp.Tests");
        let ty = unit.add_type("Interp", "Flow", TypeFlavor::Class);
        // return arg0 != 0 ? 1 : 0
        let body = BodyAssembler::new()
            .ldarg(0)
            .brtrue(4)
            .ldc_i4(0)
            .ret()
            .ldc_i4(1)
            .ret()
            .finish();
        let pick = static_method(&unit, ty, "Pick", vec![TypeSig::I32], TypeSig::I32, body);

        let module = load(unit);
        assert_eq!(
            module.invoke(pick, None, vec![Value::I32(7)]).unwrap(),
            Value::I32(1)
        );
        assert_eq!(
            module.invoke(pick, None, vec![Value::I32(0)]).unwrap(),
            Value::I32(0)
        );
    }

    #[test]
    fn test_locals() {
        let unit = CompiledUnit::new("Interp.Tests");
        let ty = unit.add_type("Interp", "Locals", TypeFlavor::Class);
        let mut asm = BodyAssembler::new();
        let slot = asm.local(TypeSig::I32);
        let body = asm.ldc_i4(21).stloc(slot).ldloc(slot).ldloc(slot).add().ret().finish();
        let double = static_method(&unit, ty, "Doubled", vec![], TypeSig::I32, body);

        let module = load(unit);
        assert_eq!(module.invoke(double, None, vec![]).unwrap(), Value::I32(42));
    }

    #[test]
    fn test_nested_call() {
        let unit = CompiledUnit::new("Interp.Tests");
        let ty = unit.add_type("Interp", "Calls", TypeFlavor::Class);
        let helper = static_method(
            &unit,
            ty,
            "Square",
            vec![TypeSig::I32],
            TypeSig::I32,
            BodyAssembler::new().ldarg(0).ldarg(0).mul().ret().finish(),
        );
        let outer = static_method(
            &unit,
            ty,
            "SquareOf3",
            vec![],
            TypeSig::I32,
            BodyAssembler::new().ldc_i4(3).call(helper).ret().finish(),
        );

        let module = load(unit);
        assert_eq!(module.invoke(outer, None, vec![]).unwrap(), Value::I32(9));
    }

    #[test]
    fn test_fields_and_construction() {
        let unit = CompiledUnit::new("Interp.Tests");
        let ty = unit.add_type("Interp", "Counter", TypeFlavor::Class);
        let field = unit.add_field(
            ty,
            "value",
            TypeSig::I32,
            crate::metadata::method::FieldFlags::empty(),
        );
        let ctor = unit.add_method(
            ty,
            ".ctor",
            MethodFlags::RT_SPECIAL_NAME,
            vec![TypeSig::I32],
            TypeSig::Unit,
        );
        unit.set_body(
            ctor,
            BodyAssembler::new().ldarg(0).ldarg(1).stfld(field).ret().finish(),
        );
        let read = unit.add_method(ty, "Value", MethodFlags::empty(), vec![], TypeSig::I32);
        unit.set_body(
            read,
            BodyAssembler::new().ldarg(0).ldfld(field).ret().finish(),
        );
        let make = static_method(
            &unit,
            ty,
            "Make",
            vec![],
            TypeSig::I32,
            BodyAssembler::new()
                .ldc_i4(11)
                .newobj(ctor, vec![])
                .call(read)
                .ret()
                .finish(),
        );

        let module = load(unit);
        assert_eq!(module.invoke(make, None, vec![]).unwrap(), Value::I32(11));
    }

    #[test]
    fn test_step_limit() {
        let unit = CompiledUnit::new("Interp.Tests");
        let ty = unit.add_type("Interp", "Loops", TypeFlavor::Class);
        let spin = static_method(
            &unit,
            ty,
            "Spin",
            vec![],
            TypeSig::Unit,
            BodyAssembler::new().br(0).finish(),
        );

        let module = load(unit);
        let mut interpreter = Interpreter::with_limits(
            &module,
            EvalLimits {
                max_steps: 1_000,
                max_depth: 8,
            },
        );
        assert!(matches!(
            interpreter.invoke(spin, None, vec![]),
            Err(Error::Execution(_))
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let unit = CompiledUnit::new("Interp.Tests");
        let ty = unit.add_type("Interp", "Math", TypeFlavor::Class);
        let div = static_method(
            &unit,
            ty,
            "Div",
            vec![TypeSig::I32, TypeSig::I32],
            TypeSig::I32,
            BodyAssembler::new()
                .ldarg(0)
                .ldarg(1)
                .raw(crate::assembly::Instruction::simple(OpCode::Div))
                .ret()
                .finish(),
        );

        let module = load(unit);
        assert!(module
            .invoke(div, None, vec![Value::I32(1), Value::I32(0)])
            .is_err());
    }
}
