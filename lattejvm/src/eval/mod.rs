//! The frame machine: per-invocation frames and the fetch-decode-execute
//! loop.

use std::rc::Rc;

use lattejvm_base::class::{ClassFile, CodeAttribute, MethodInfo};

use crate::value::{Reference, Value};
use crate::{natives, ExecError, Vm, VmError};

mod control_flow;
mod func;
mod instances;
pub mod op;
mod operation;
mod store_load;

/// A single invocation's execution state. Locals `0..param_count` hold the
/// call arguments on entry; for instance methods local 0 is the receiver.
pub struct Frame<'a> {
    locals: Vec<Value>,
    stack: Vec<Value>,
    max_stack: usize,
    pub code: &'a [u8],
    pub pc: usize,
    /// The class whose constant pool the opcodes reference.
    pub class: &'a Rc<ClassFile>,
}

impl<'a> Frame<'a> {
    #[must_use]
    pub fn new(code: &'a CodeAttribute, class: &'a Rc<ClassFile>) -> Frame<'a> {
        Frame {
            locals: vec![Value::Null; usize::from(code.max_locals)],
            stack: Vec::with_capacity(usize::from(code.max_stack)),
            max_stack: usize::from(code.max_stack),
            code: &code.code,
            pc: 0,
            class,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= self.max_stack {
            return Err(VmError::OperandStackOverflow {
                max: self.max_stack,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::OperandStackUnderflow)
    }

    pub fn peek(&self) -> Result<&Value, VmError> {
        self.stack.last().ok_or(VmError::OperandStackUnderflow)
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn local(&self, index: usize) -> Result<Value, VmError> {
        self.locals
            .get(index)
            .cloned()
            .ok_or(VmError::InvalidLocalIndex {
                index,
                max: self.locals.len(),
            })
    }

    pub fn set_local(&mut self, index: usize, value: Value) -> Result<(), VmError> {
        let max = self.locals.len();
        match self.locals.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::InvalidLocalIndex { index, max }),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, VmError> {
        let byte = *self
            .code
            .get(self.pc)
            .ok_or(VmError::UnexpectedEndOfCode { pc: self.pc })?;
        self.pc += 1;
        Ok(byte)
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i8(&mut self) -> Result<i8, VmError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, VmError> {
        let high = self.read_u8()?;
        let low = self.read_u8()?;
        Ok(u16::from_be_bytes([high, low]))
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i16(&mut self) -> Result<i16, VmError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, VmError> {
        let bytes = [
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
        ];
        Ok(i32::from_be_bytes(bytes))
    }
}

/// What a single instruction did to control flow.
pub(crate) enum InstOutcome {
    Continue,
    /// One of the return opcodes fired; `None` is a void return.
    Return(Option<Value>),
}

/// Executes a method and returns its value (`None` for void).
///
/// Native methods divert to the native dispatcher; the frame-depth bound
/// surfaces as a catchable `StackOverflowError`.
pub fn eval_method(
    vm: &mut Vm,
    class: &Rc<ClassFile>,
    method: &MethodInfo,
    args: Vec<Value>,
) -> Result<Option<Value>, ExecError> {
    let class_name = class.class_name().map(str::to_owned).unwrap_or_default();

    if method.is_native() {
        return natives::dispatch_native(vm, &class_name, &method.name, &method.descriptor, args);
    }
    if method.is_abstract() {
        return Err(VmError::AbstractMethodCall {
            class_name,
            method_name: method.name.clone(),
        }
        .into());
    }
    let code = method.code.as_ref().ok_or_else(|| VmError::MissingCode {
        class_name: class_name.clone(),
        method_name: method.name.clone(),
    })?;

    vm.enter_frame()?;
    let result = run_code(vm, class, method, code, args, &class_name);
    vm.exit_frame();
    result
}

fn run_code(
    vm: &mut Vm,
    class: &Rc<ClassFile>,
    method: &MethodInfo,
    code: &CodeAttribute,
    args: Vec<Value>,
    class_name: &str,
) -> Result<Option<Value>, ExecError> {
    tracing::trace!(
        "executing {}.{}{}",
        class_name,
        method.name,
        method.descriptor
    );

    let mut frame = Frame::new(code, class);
    for (index, arg) in args.into_iter().enumerate() {
        frame.set_local(index, arg)?;
    }

    while frame.pc < frame.code.len() {
        let instruction_pc = frame.pc;
        let opcode = frame.code[frame.pc];
        frame.pc += 1;

        tracing::trace!("# ({}) {}", instruction_pc, op::mnemonic(opcode));

        match run_instruction(vm, &mut frame, opcode, instruction_pc) {
            Ok(InstOutcome::Continue) => {}
            Ok(InstOutcome::Return(value)) => return Ok(value),
            Err(ExecError::Java(exc)) => {
                let handler = vm.find_exception_handler(
                    &code.exception_handlers,
                    instruction_pc,
                    &exc,
                    &class.constant_pool,
                );
                if let Some(handler) = handler {
                    frame.clear_stack();
                    frame.push(Value::Ref(Reference::Object(Rc::clone(&exc.object))))?;
                    frame.pc = usize::from(handler.handler_pc);
                } else {
                    return Err(ExecError::Java(exc));
                }
            }
            Err(err) => return Err(err),
        }
    }

    // Fell off the end of the code: implicit void return.
    Ok(None)
}

fn run_instruction(
    vm: &mut Vm,
    frame: &mut Frame<'_>,
    opcode: u8,
    opcode_pc: usize,
) -> Result<InstOutcome, ExecError> {
    match opcode {
        op::NOP => {}

        // Constants
        op::ACONST_NULL => frame.push(Value::Null)?,
        op::ICONST_M1..=op::ICONST_5 => {
            frame.push(Value::Int(i32::from(opcode) - i32::from(op::ICONST_0)))?;
        }
        op::LCONST_0 => frame.push(Value::Long(0))?,
        op::LCONST_1 => frame.push(Value::Long(1))?,
        op::FCONST_0 => frame.push(Value::Float(0.0))?,
        op::FCONST_1 => frame.push(Value::Float(1.0))?,
        op::FCONST_2 => frame.push(Value::Float(2.0))?,
        op::DCONST_0 => frame.push(Value::Double(0.0))?,
        op::DCONST_1 => frame.push(Value::Double(1.0))?,
        op::BIPUSH => {
            let value = frame.read_i8()?;
            frame.push(Value::Int(i32::from(value)))?;
        }
        op::SIPUSH => {
            let value = frame.read_i16()?;
            frame.push(Value::Int(i32::from(value)))?;
        }
        op::LDC => {
            let index = u16::from(frame.read_u8()?);
            store_load::push_constant(frame, index)?;
        }
        op::LDC_W | op::LDC2_W => {
            let index = frame.read_u16()?;
            store_load::push_constant(frame, index)?;
        }

        // Local variable loads
        op::ILOAD => store_load::load_int(frame, None)?,
        op::ILOAD_0..=op::ILOAD_3 => {
            store_load::load_int(frame, Some(usize::from(opcode - op::ILOAD_0)))?;
        }
        op::LLOAD => store_load::load_long(frame, None)?,
        op::LLOAD_0..=op::LLOAD_3 => {
            store_load::load_long(frame, Some(usize::from(opcode - op::LLOAD_0)))?;
        }
        op::FLOAD => store_load::load_float(frame, None)?,
        op::FLOAD_0..=op::FLOAD_3 => {
            store_load::load_float(frame, Some(usize::from(opcode - op::FLOAD_0)))?;
        }
        op::DLOAD => store_load::load_double(frame, None)?,
        op::DLOAD_0..=op::DLOAD_3 => {
            store_load::load_double(frame, Some(usize::from(opcode - op::DLOAD_0)))?;
        }
        op::ALOAD => store_load::load_reference(frame, None)?,
        op::ALOAD_0..=op::ALOAD_3 => {
            store_load::load_reference(frame, Some(usize::from(opcode - op::ALOAD_0)))?;
        }

        // Local variable stores
        op::ISTORE => store_load::store_int(frame, None)?,
        op::ISTORE_0..=op::ISTORE_3 => {
            store_load::store_int(frame, Some(usize::from(opcode - op::ISTORE_0)))?;
        }
        op::LSTORE => store_load::store_long(frame, None)?,
        op::LSTORE_0..=op::LSTORE_3 => {
            store_load::store_long(frame, Some(usize::from(opcode - op::LSTORE_0)))?;
        }
        op::FSTORE => store_load::store_float(frame, None)?,
        op::FSTORE_0..=op::FSTORE_3 => {
            store_load::store_float(frame, Some(usize::from(opcode - op::FSTORE_0)))?;
        }
        op::DSTORE => store_load::store_double(frame, None)?,
        op::DSTORE_0..=op::DSTORE_3 => {
            store_load::store_double(frame, Some(usize::from(opcode - op::DSTORE_0)))?;
        }
        op::ASTORE => store_load::store_reference(frame, None)?,
        op::ASTORE_0..=op::ASTORE_3 => {
            store_load::store_reference(frame, Some(usize::from(opcode - op::ASTORE_0)))?;
        }

        // Array element access
        op::IALOAD | op::LALOAD | op::FALOAD | op::DALOAD | op::AALOAD | op::BALOAD
        | op::CALOAD | op::SALOAD => store_load::array_load(frame)?,
        op::IASTORE | op::LASTORE | op::FASTORE | op::DASTORE | op::AASTORE | op::BASTORE
        | op::CASTORE | op::SASTORE => store_load::array_store(frame)?,
        op::ARRAYLENGTH => store_load::array_length(frame)?,

        // Operand stack manipulation
        op::POP => {
            frame.pop()?;
        }
        op::POP2 => store_load::pop2(frame)?,
        op::DUP => store_load::dup(frame)?,
        op::DUP_X1 => store_load::dup_x1(frame)?,
        op::DUP_X2 => store_load::dup_x2(frame)?,
        op::DUP2 => store_load::dup2(frame)?,
        op::DUP2_X1 => store_load::dup2_x1(frame)?,
        op::SWAP => store_load::swap(frame)?,

        // Arithmetic
        op::IADD => operation::int_binop(frame, i32::wrapping_add)?,
        op::ISUB => operation::int_binop(frame, i32::wrapping_sub)?,
        op::IMUL => operation::int_binop(frame, i32::wrapping_mul)?,
        op::IDIV => operation::int_div(frame)?,
        op::IREM => operation::int_rem(frame)?,
        op::INEG => operation::int_neg(frame)?,
        op::LADD => operation::long_binop(frame, i64::wrapping_add)?,
        op::LSUB => operation::long_binop(frame, i64::wrapping_sub)?,
        op::LMUL => operation::long_binop(frame, i64::wrapping_mul)?,
        op::LDIV => operation::long_div(frame)?,
        op::LREM => operation::long_rem(frame)?,
        op::LNEG => operation::long_neg(frame)?,
        op::FADD => operation::float_binop(frame, |a, b| a + b)?,
        op::FSUB => operation::float_binop(frame, |a, b| a - b)?,
        op::FMUL => operation::float_binop(frame, |a, b| a * b)?,
        op::FDIV => operation::float_binop(frame, |a, b| a / b)?,
        // Java frem keeps the dividend's sign, which is `%` here
        op::FREM => operation::float_binop(frame, |a, b| a % b)?,
        op::FNEG => operation::float_neg(frame)?,
        op::DADD => operation::double_binop(frame, |a, b| a + b)?,
        op::DSUB => operation::double_binop(frame, |a, b| a - b)?,
        op::DMUL => operation::double_binop(frame, |a, b| a * b)?,
        op::DDIV => operation::double_binop(frame, |a, b| a / b)?,
        op::DREM => operation::double_binop(frame, |a, b| a % b)?,
        op::DNEG => operation::double_neg(frame)?,

        // Shifts and bitwise
        op::ISHL => operation::int_shift(frame, |v, s| v.wrapping_shl(s))?,
        op::ISHR => operation::int_shift(frame, |v, s| v.wrapping_shr(s))?,
        op::IUSHR => operation::int_ushr(frame)?,
        op::LSHL => operation::long_shift(frame, |v, s| v.wrapping_shl(s))?,
        op::LSHR => operation::long_shift(frame, |v, s| v.wrapping_shr(s))?,
        op::LUSHR => operation::long_ushr(frame)?,
        op::IAND => operation::int_binop(frame, |a, b| a & b)?,
        op::IOR => operation::int_binop(frame, |a, b| a | b)?,
        op::IXOR => operation::int_binop(frame, |a, b| a ^ b)?,
        op::LAND => operation::long_binop(frame, |a, b| a & b)?,
        op::LOR => operation::long_binop(frame, |a, b| a | b)?,
        op::LXOR => operation::long_binop(frame, |a, b| a ^ b)?,
        op::IINC => operation::iinc(frame)?,

        // Conversions
        op::I2L | op::I2F | op::I2D | op::L2I | op::L2F | op::L2D | op::F2I | op::F2L
        | op::F2D | op::D2I | op::D2L | op::D2F | op::I2B | op::I2C | op::I2S => {
            operation::convert(frame, opcode)?;
        }

        // Comparisons
        op::LCMP => operation::lcmp(frame)?,
        op::FCMPL => operation::fcmp(frame, -1)?,
        op::FCMPG => operation::fcmp(frame, 1)?,
        op::DCMPL => operation::dcmp(frame, -1)?,
        op::DCMPG => operation::dcmp(frame, 1)?,

        // Branches
        op::IFEQ => control_flow::branch_unary(frame, opcode_pc, |v| v == 0)?,
        op::IFNE => control_flow::branch_unary(frame, opcode_pc, |v| v != 0)?,
        op::IFLT => control_flow::branch_unary(frame, opcode_pc, |v| v < 0)?,
        op::IFGE => control_flow::branch_unary(frame, opcode_pc, |v| v >= 0)?,
        op::IFGT => control_flow::branch_unary(frame, opcode_pc, |v| v > 0)?,
        op::IFLE => control_flow::branch_unary(frame, opcode_pc, |v| v <= 0)?,
        op::IF_ICMPEQ => control_flow::branch_binary(frame, opcode_pc, |a, b| a == b)?,
        op::IF_ICMPNE => control_flow::branch_binary(frame, opcode_pc, |a, b| a != b)?,
        op::IF_ICMPLT => control_flow::branch_binary(frame, opcode_pc, |a, b| a < b)?,
        op::IF_ICMPGE => control_flow::branch_binary(frame, opcode_pc, |a, b| a >= b)?,
        op::IF_ICMPGT => control_flow::branch_binary(frame, opcode_pc, |a, b| a > b)?,
        op::IF_ICMPLE => control_flow::branch_binary(frame, opcode_pc, |a, b| a <= b)?,
        op::IF_ACMPEQ => control_flow::branch_acmp(frame, opcode_pc, true)?,
        op::IF_ACMPNE => control_flow::branch_acmp(frame, opcode_pc, false)?,
        op::IFNULL => control_flow::branch_null(frame, opcode_pc, true)?,
        op::IFNONNULL => control_flow::branch_null(frame, opcode_pc, false)?,
        op::GOTO => control_flow::goto(frame, opcode_pc, false)?,
        op::GOTO_W => control_flow::goto(frame, opcode_pc, true)?,
        op::TABLESWITCH => control_flow::tableswitch(frame, opcode_pc)?,
        op::LOOKUPSWITCH => control_flow::lookupswitch(frame, opcode_pc)?,

        // Returns
        op::IRETURN => return control_flow::typed_return(frame, "int"),
        op::LRETURN => return control_flow::typed_return(frame, "long"),
        op::FRETURN => return control_flow::typed_return(frame, "float"),
        op::DRETURN => return control_flow::typed_return(frame, "double"),
        op::ARETURN => return control_flow::typed_return(frame, "reference"),
        op::RETURN => return Ok(InstOutcome::Return(None)),

        op::ATHROW => return control_flow::athrow(frame),

        // Field access
        op::GETSTATIC => store_load::getstatic(vm, frame)?,
        op::PUTSTATIC => store_load::putstatic(vm, frame)?,
        op::GETFIELD => store_load::getfield(frame)?,
        op::PUTFIELD => store_load::putfield(frame)?,

        // Invocation
        op::INVOKEVIRTUAL => func::invoke_virtual(vm, frame)?,
        op::INVOKESPECIAL => func::invoke_special(vm, frame)?,
        op::INVOKESTATIC => func::invoke_static(vm, frame)?,
        op::INVOKEINTERFACE => func::invoke_interface(vm, frame)?,
        op::INVOKEDYNAMIC => func::invoke_dynamic(frame)?,

        // Object and array creation
        op::NEW => instances::new_instance(vm, frame)?,
        op::NEWARRAY => instances::newarray(frame)?,
        op::ANEWARRAY => instances::anewarray(frame)?,
        op::MULTIANEWARRAY => instances::multianewarray(frame)?,
        op::CHECKCAST => instances::checkcast(vm, frame)?,
        op::INSTANCEOF => instances::instance_of(vm, frame)?,

        // Monitors are no-ops: the interpreter is single-threaded.
        op::MONITORENTER | op::MONITOREXIT => {
            frame.pop()?;
        }

        _ => {
            return Err(VmError::UnknownOpcode {
                opcode,
                pc: opcode_pc,
            }
            .into())
        }
    }

    Ok(InstOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use lattejvm_base::class::{access_flags, ClassFile, CodeAttribute, ExceptionHandler};

    use super::{eval_method, op, Frame};
    use crate::exception::class_names;
    use crate::test_support::{capture_vm, ClassFileBuilder, MapLoader};
    use crate::value::Value;
    use crate::{ExecError, Vm, VmError};

    const STATIC: u16 = access_flags::ACC_PUBLIC | access_flags::ACC_STATIC;

    /// Builds a VM whose loader knows a single class `Test` with one
    /// static method `run`.
    fn static_run(
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        handlers: Vec<ExceptionHandler>,
    ) -> (Vm, Rc<ClassFile>) {
        let mut builder = ClassFileBuilder::new("Test");
        builder.add_method("run", descriptor, STATIC, max_stack, max_locals, code, handlers);
        let class = builder.build();
        let mut loader = MapLoader::new();
        loader.insert(Rc::clone(&class));
        let (vm, _) = capture_vm(loader);
        (vm, class)
    }

    fn eval_run(
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        let (mut vm, class) = static_run(descriptor, max_stack, max_locals, code, Vec::new());
        let method = class.find_method("run", descriptor).expect("run method");
        eval_method(&mut vm, &class, method, args)
    }

    fn int_result(result: Result<Option<Value>, ExecError>) -> i32 {
        result.expect("no error").expect("has value").as_int().unwrap()
    }

    fn java_exception(result: Result<Option<Value>, ExecError>) -> String {
        match result.unwrap_err() {
            ExecError::Java(exc) => exc.class_name(),
            ExecError::Vm(err) => panic!("expected Java exception, got {err:?}"),
        }
    }

    #[test]
    fn frame_push_pop_and_bounds() {
        let code = CodeAttribute {
            max_stack: 2,
            max_locals: 1,
            code: vec![op::RETURN],
            exception_handlers: Vec::new(),
        };
        let class = ClassFileBuilder::new("FrameTest").build();
        let mut frame = Frame::new(&code, &class);

        frame.push(Value::Int(1)).unwrap();
        frame.push(Value::Int(2)).unwrap();
        assert!(matches!(
            frame.push(Value::Int(3)),
            Err(VmError::OperandStackOverflow { max: 2 })
        ));
        assert_eq!(frame.pop().unwrap().as_int().unwrap(), 2);
        assert_eq!(frame.pop().unwrap().as_int().unwrap(), 1);
        assert!(matches!(frame.pop(), Err(VmError::OperandStackUnderflow)));

        frame.set_local(0, Value::Int(9)).unwrap();
        assert_eq!(frame.local(0).unwrap().as_int().unwrap(), 9);
        assert!(matches!(
            frame.set_local(1, Value::Int(0)),
            Err(VmError::InvalidLocalIndex { index: 1, max: 1 })
        ));
    }

    #[test]
    fn int_add_and_wraparound() {
        let code = vec![op::ILOAD_0, op::ILOAD_1, op::IADD, op::IRETURN];
        assert_eq!(
            int_result(eval_run("(II)I", 2, 2, code.clone(), vec![Value::Int(3), Value::Int(4)])),
            7
        );
        assert_eq!(
            int_result(eval_run(
                "(II)I",
                2,
                2,
                code,
                vec![Value::Int(i32::MAX), Value::Int(1)]
            )),
            i32::MIN
        );
    }

    #[test]
    fn int_min_div_minus_one() {
        let code = vec![op::ILOAD_0, op::ILOAD_1, op::IDIV, op::IRETURN];
        assert_eq!(
            int_result(eval_run(
                "(II)I",
                2,
                2,
                code,
                vec![Value::Int(i32::MIN), Value::Int(-1)]
            )),
            i32::MIN
        );
    }

    #[test]
    fn division_by_zero_is_catchable_kind() {
        let code = vec![op::ILOAD_0, op::ILOAD_1, op::IDIV, op::IRETURN];
        assert_eq!(
            java_exception(eval_run(
                "(II)I",
                2,
                2,
                code,
                vec![Value::Int(10), Value::Int(0)]
            )),
            class_names::ARITHMETIC
        );
    }

    #[test]
    fn long_arithmetic() {
        let code = vec![op::LLOAD_0, op::LLOAD_1, op::LMUL, op::LRETURN];
        let result = eval_run("(JJ)J", 2, 2, code, vec![Value::Long(6), Value::Long(7)])
            .unwrap()
            .unwrap();
        assert_eq!(result.as_long().unwrap(), 42);
    }

    #[test]
    fn shift_amounts_are_masked() {
        let shl = vec![op::ILOAD_0, op::ILOAD_1, op::ISHL, op::IRETURN];
        // 33 & 0x1F == 1
        assert_eq!(
            int_result(eval_run("(II)I", 2, 2, shl, vec![Value::Int(1), Value::Int(33)])),
            2
        );
        let ushr = vec![op::ILOAD_0, op::ILOAD_1, op::IUSHR, op::IRETURN];
        assert_eq!(
            int_result(eval_run("(II)I", 2, 2, ushr, vec![Value::Int(-8), Value::Int(1)])),
            0x7FFF_FFFC
        );
    }

    #[test]
    fn float_compare_nan_tiebreaks() {
        let cmpg = vec![op::FLOAD_0, op::FLOAD_1, op::FCMPG, op::IRETURN];
        assert_eq!(
            int_result(eval_run(
                "(FF)I",
                2,
                2,
                cmpg,
                vec![Value::Float(f32::NAN), Value::Float(1.0)]
            )),
            1
        );
        let cmpl = vec![op::FLOAD_0, op::FLOAD_1, op::FCMPL, op::IRETURN];
        assert_eq!(
            int_result(eval_run(
                "(FF)I",
                2,
                2,
                cmpl,
                vec![Value::Float(f32::NAN), Value::Float(1.0)]
            )),
            -1
        );
    }

    #[test]
    fn f2i_saturates_and_flushes_nan() {
        let code = vec![op::FLOAD_0, op::F2I, op::IRETURN];
        assert_eq!(
            int_result(eval_run("(F)I", 1, 1, code.clone(), vec![Value::Float(3e9)])),
            i32::MAX
        );
        assert_eq!(
            int_result(eval_run("(F)I", 1, 1, code.clone(), vec![Value::Float(-3e9)])),
            i32::MIN
        );
        assert_eq!(
            int_result(eval_run("(F)I", 1, 1, code, vec![Value::Float(f32::NAN)])),
            0
        );
    }

    #[test]
    fn narrowing_conversions_sign_extend() {
        let i2b = vec![op::ILOAD_0, op::I2B, op::IRETURN];
        assert_eq!(int_result(eval_run("(I)I", 1, 1, i2b, vec![Value::Int(200)])), -56);
        let i2c = vec![op::ILOAD_0, op::I2C, op::IRETURN];
        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, i2c, vec![Value::Int(-1)])),
            65535
        );
        let i2s = vec![op::ILOAD_0, op::I2S, op::IRETURN];
        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, i2s, vec![Value::Int(40000)])),
            -25536
        );
    }

    #[test]
    fn factorial_loop() {
        // int r = 1; while (n > 0) { r *= n; n--; } return r;
        let code = vec![
            op::ICONST_1,
            op::ISTORE_1,
            op::ILOAD_0, // pc 2, loop head
            op::IFLE,
            0x00,
            13, // to pc 16
            op::ILOAD_1,
            op::ILOAD_0,
            op::IMUL,
            op::ISTORE_1,
            op::IINC,
            0,
            0xFF, // n += -1
            op::GOTO,
            0xFF,
            0xF5, // pc 13, back to 2
            op::ILOAD_1, // pc 16
            op::IRETURN,
        ];
        assert_eq!(int_result(eval_run("(I)I", 2, 2, code, vec![Value::Int(5)])), 120);
    }

    #[test]
    fn branch_offsets_are_relative_to_the_opcode() {
        // goto at pc 1 with offset 4 must land on pc 5, not pc 8.
        let code = vec![
            op::ICONST_1,
            op::GOTO,
            0x00,
            0x04,
            op::ICONST_0, // skipped
            op::IRETURN, // pc 5
        ];
        assert_eq!(int_result(eval_run("()I", 1, 0, code, Vec::new())), 1);
    }

    #[test]
    fn tableswitch_dispatch() {
        let mut code = vec![op::ILOAD_0, op::TABLESWITCH, 0, 0];
        let default: i32 = 29;
        let low: i32 = 1;
        let high: i32 = 2;
        for v in [default, low, high, 23, 26] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        code.extend_from_slice(&[op::BIPUSH, 10, op::IRETURN]); // pc 24
        code.extend_from_slice(&[op::BIPUSH, 20, op::IRETURN]); // pc 27
        code.extend_from_slice(&[op::ICONST_0, op::IRETURN]); // pc 30

        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, code.clone(), vec![Value::Int(1)])),
            10
        );
        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, code.clone(), vec![Value::Int(2)])),
            20
        );
        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, code, vec![Value::Int(7)])),
            0
        );
    }

    #[test]
    fn lookupswitch_dispatch() {
        let mut code = vec![op::ILOAD_0, op::LOOKUPSWITCH, 0, 0];
        let default: i32 = 33;
        for v in [default, 2, 10, 27, 20, 30] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        code.extend_from_slice(&[op::BIPUSH, 1, op::IRETURN]); // pc 28
        code.extend_from_slice(&[op::BIPUSH, 2, op::IRETURN]); // pc 31
        code.extend_from_slice(&[op::ICONST_0, op::IRETURN]); // pc 34

        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, code.clone(), vec![Value::Int(10)])),
            1
        );
        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, code.clone(), vec![Value::Int(20)])),
            2
        );
        assert_eq!(
            int_result(eval_run("(I)I", 1, 1, code, vec![Value::Int(99)])),
            0
        );
    }

    #[test]
    fn arithmetic_exception_reaches_its_handler() {
        // try { return 10 / 0; } catch (ArithmeticException e) { return 42; }
        let mut builder = ClassFileBuilder::new("Test");
        let catch_type = builder.class("java/lang/ArithmeticException");
        builder.add_method(
            "run",
            "()I",
            STATIC,
            2,
            1,
            vec![
                op::BIPUSH,
                10,
                op::ICONST_0,
                op::IDIV,
                op::IRETURN, // pc 4
                op::POP, // pc 5, handler
                op::BIPUSH,
                42,
                op::IRETURN,
            ],
            vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 5,
                handler_pc: 5,
                catch_type,
            }],
        );
        let class = builder.build();
        let mut loader = MapLoader::new();
        loader.insert(Rc::clone(&class));
        let (mut vm, _) = capture_vm(loader);
        let method = class.find_method("run", "()I").unwrap();
        assert_eq!(int_result(eval_method(&mut vm, &class, method, Vec::new())), 42);
    }

    #[test]
    fn non_matching_catch_type_propagates() {
        let mut builder = ClassFileBuilder::new("Test");
        let catch_type = builder.class("java/lang/IllegalStateException");
        builder.add_method(
            "run",
            "()I",
            STATIC,
            2,
            1,
            vec![
                op::BIPUSH,
                10,
                op::ICONST_0,
                op::IDIV,
                op::IRETURN,
                op::POP,
                op::BIPUSH,
                42,
                op::IRETURN,
            ],
            vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 5,
                handler_pc: 5,
                catch_type,
            }],
        );
        let class = builder.build();
        let mut loader = MapLoader::new();
        loader.insert(Rc::clone(&class));
        let (mut vm, _) = capture_vm(loader);
        let method = class.find_method("run", "()I").unwrap();
        assert_eq!(
            java_exception(eval_method(&mut vm, &class, method, Vec::new())),
            class_names::ARITHMETIC
        );
    }

    #[test]
    fn earliest_matching_handler_wins() {
        let handlers = vec![
            ExceptionHandler {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: 0,
            },
            ExceptionHandler {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 5,
                catch_type: 0,
            },
        ];
        // athrow on a null reference raises NullPointerException, caught
        // by the first catch-all.
        let code = vec![
            op::ACONST_NULL,
            op::ATHROW,
            op::POP, // pc 2: first handler
            op::ICONST_1,
            op::IRETURN,
            op::POP, // pc 5: second handler
            op::ICONST_2,
            op::IRETURN,
        ];
        let (mut vm, class) = static_run("()I", 1, 1, code, handlers);
        let method = class.find_method("run", "()I").unwrap();
        assert_eq!(int_result(eval_method(&mut vm, &class, method, Vec::new())), 1);
    }

    #[test]
    fn runaway_recursion_raises_stack_overflow_error() {
        let mut builder = ClassFileBuilder::new("Test");
        let self_ref = builder.methodref("Test", "run", "()V");
        let [hi, lo] = self_ref.to_be_bytes();
        builder.add_method(
            "run",
            "()V",
            STATIC,
            1,
            0,
            vec![op::INVOKESTATIC, hi, lo, op::RETURN],
            Vec::new(),
        );
        let class = builder.build();
        let mut loader = MapLoader::new();
        loader.insert(Rc::clone(&class));
        let (mut vm, _) = capture_vm(loader);
        let method = class.find_method("run", "()V").unwrap();
        assert_eq!(
            java_exception(eval_method(&mut vm, &class, method, Vec::new())),
            class_names::STACK_OVERFLOW
        );
    }

    #[test]
    fn int_array_store_load_and_length() {
        let code = vec![
            op::ILOAD_0,
            op::NEWARRAY,
            10, // T_INT
            op::ASTORE_1,
            op::ALOAD_1,
            op::ICONST_0,
            op::BIPUSH,
            9,
            op::IASTORE,
            op::ALOAD_1,
            op::ICONST_0,
            op::IALOAD,
            op::ALOAD_1,
            op::ARRAYLENGTH,
            op::IADD,
            op::IRETURN,
        ];
        // element 9 + length 3
        assert_eq!(int_result(eval_run("(I)I", 3, 2, code, vec![Value::Int(3)])), 12);
    }

    #[test]
    fn array_faults_are_java_exceptions() {
        let out_of_bounds = vec![
            op::ICONST_2,
            op::NEWARRAY,
            10,
            op::ICONST_5,
            op::IALOAD,
            op::IRETURN,
        ];
        assert_eq!(
            java_exception(eval_run("()I", 2, 1, out_of_bounds, Vec::new())),
            class_names::ARRAY_INDEX_OUT_OF_BOUNDS
        );

        let negative = vec![op::ILOAD_0, op::NEWARRAY, 10, op::ARETURN];
        assert_eq!(
            java_exception(eval_run(
                "(I)Ljava/lang/Object;",
                1,
                1,
                negative,
                vec![Value::Int(-1)]
            )),
            class_names::NEGATIVE_ARRAY_SIZE
        );

        let null_length = vec![op::ACONST_NULL, op::ARRAYLENGTH, op::IRETURN];
        assert_eq!(
            java_exception(eval_run("()I", 1, 0, null_length, Vec::new())),
            class_names::NULL_POINTER
        );
    }

    #[test]
    fn two_dimensional_array() {
        let mut builder = ClassFileBuilder::new("Test");
        let array_class = builder.class("[[I");
        let [hi, lo] = array_class.to_be_bytes();
        builder.add_method(
            "run",
            "()I",
            STATIC,
            3,
            1,
            vec![
                op::ICONST_3,
                op::ICONST_4,
                op::MULTIANEWARRAY,
                hi,
                lo,
                2,
                op::ASTORE_0,
                // a[1][2] = 5
                op::ALOAD_0,
                op::ICONST_1,
                op::AALOAD,
                op::ICONST_2,
                op::ICONST_5,
                op::IASTORE,
                // return a[1][2] * 100 + a.length * 10 + a[0].length
                op::ALOAD_0,
                op::ICONST_1,
                op::AALOAD,
                op::ICONST_2,
                op::IALOAD,
                op::BIPUSH,
                100,
                op::IMUL,
                op::ALOAD_0,
                op::ARRAYLENGTH,
                op::BIPUSH,
                10,
                op::IMUL,
                op::IADD,
                op::ALOAD_0,
                op::ICONST_0,
                op::AALOAD,
                op::ARRAYLENGTH,
                op::IADD,
                op::IRETURN,
            ],
            Vec::new(),
        );
        let class = builder.build();
        let mut loader = MapLoader::new();
        loader.insert(Rc::clone(&class));
        let (mut vm, _) = capture_vm(loader);
        let method = class.find_method("run", "()I").unwrap();
        assert_eq!(
            int_result(eval_method(&mut vm, &class, method, Vec::new())),
            5 * 100 + 3 * 10 + 4
        );
    }

    #[test]
    fn ldc_constants() {
        let mut builder = ClassFileBuilder::new("Test");
        let hello = builder.string_const("hi");
        builder.add_method(
            "text",
            "()Ljava/lang/String;",
            STATIC,
            1,
            0,
            vec![op::LDC, u8::try_from(hello).unwrap(), op::ARETURN],
            Vec::new(),
        );
        let big = builder.long_const(1_234_567_890_123);
        let [hi, lo] = big.to_be_bytes();
        builder.add_method(
            "big",
            "()J",
            STATIC,
            1,
            0,
            vec![op::LDC2_W, hi, lo, op::LRETURN],
            Vec::new(),
        );
        let class = builder.build();
        let mut loader = MapLoader::new();
        loader.insert(Rc::clone(&class));
        let (mut vm, _) = capture_vm(loader);

        let text = class.find_method("text", "()Ljava/lang/String;").unwrap();
        let result = eval_method(&mut vm, &class, text, Vec::new()).unwrap().unwrap();
        assert_eq!(crate::util::value_to_string(&result), "hi");

        let big = class.find_method("big", "()J").unwrap();
        let result = eval_method(&mut vm, &class, big, Vec::new()).unwrap().unwrap();
        assert_eq!(result.as_long().unwrap(), 1_234_567_890_123);
    }

    #[test]
    fn dup_and_swap_family() {
        // swap: 1 2 -> 2 1 -> subtract = 2 - 1
        let swap = vec![op::ICONST_1, op::ICONST_2, op::SWAP, op::ISUB, op::IRETURN];
        assert_eq!(int_result(eval_run("()I", 2, 0, swap, Vec::new())), 1);

        // dup2 on a long duplicates the single slot
        let dup2_long = vec![op::LCONST_1, op::DUP2, op::LADD, op::LRETURN];
        let result = eval_run("()J", 2, 0, dup2_long, Vec::new()).unwrap().unwrap();
        assert_eq!(result.as_long().unwrap(), 2);

        // pop2 on a long removes one slot
        let pop2_long = vec![op::ICONST_3, op::LCONST_1, op::POP2, op::IRETURN];
        assert_eq!(int_result(eval_run("()I", 2, 0, pop2_long, Vec::new())), 3);
    }

    #[test]
    fn unknown_opcode_is_a_vm_error() {
        let result = eval_run("()V", 1, 0, vec![0xC4, op::RETURN], Vec::new());
        assert!(matches!(
            result.unwrap_err(),
            ExecError::Vm(VmError::UnknownOpcode { opcode: 0xC4, .. })
        ));
    }

    #[test]
    fn operand_stack_never_exceeds_max_stack() {
        // max_stack of 1 cannot hold two constants
        let result = eval_run(
            "()I",
            1,
            0,
            vec![op::ICONST_1, op::ICONST_2, op::IADD, op::IRETURN],
            Vec::new(),
        );
        assert!(matches!(
            result.unwrap_err(),
            ExecError::Vm(VmError::OperandStackOverflow { max: 1 })
        ));
    }
}
