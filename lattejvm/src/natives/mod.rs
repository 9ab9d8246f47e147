//! The native-method dispatcher.
//!
//! Methods marked `ACC_NATIVE` in loaded class files are looked up here by
//! `class.name:descriptor`. Most entries exist only to satisfy the static
//! initializers of JDK bootstrap classes; their fixed return values are
//! safe because the interpreter is single-threaded (the always-succeeding
//! CAS family would be wrong under real concurrency).

use std::rc::Rc;

use crate::class_instance::{ArrayInstance, ClassInstance};
use crate::exception::{class_names, JavaThrowable};
use crate::value::{Reference, Value};
use crate::{ExecError, Vm, VmError};

pub mod boxed;
pub mod print_stream;
pub mod sort;
pub mod string;
pub mod string_builder;

fn arg(args: &[Value], index: usize, key: &str) -> Result<Value, VmError> {
    args.get(index)
        .cloned()
        .ok_or_else(|| VmError::Native(format!("{key}: missing argument {index}")))
}

/// The string form of a `Class`/`String` argument, for natives taking
/// class names.
fn string_arg(args: &[Value], index: usize) -> String {
    match args.get(index) {
        Some(Value::Ref(Reference::String(s))) => s.to_string(),
        Some(other) => crate::util::value_to_string(other),
        None => String::new(),
    }
}

pub fn dispatch_native(
    vm: &mut Vm,
    class_name: &str,
    method_name: &str,
    descriptor: &str,
    args: Vec<Value>,
) -> Result<Option<Value>, ExecError> {
    let key = format!("{class_name}.{method_name}:{descriptor}");
    tracing::trace!("native call {}", key);

    let result = match key.as_str() {
        "java/lang/Object.hashCode:()I" => {
            let receiver = arg(&args, 0, &key)?;
            match receiver.as_reference()? {
                Some(Reference::Object(obj)) => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    let hash = (Rc::as_ptr(obj) as usize & 0x7FFF_FFFF) as i32;
                    Some(Value::Int(hash))
                }
                _ => {
                    return Err(VmError::Native(format!(
                        "{key}: receiver is not an object"
                    ))
                    .into())
                }
            }
        }

        "java/lang/Object.getClass:()Ljava/lang/Class;" => {
            let receiver = arg(&args, 0, &key)?;
            let name = match receiver.as_reference()? {
                Some(Reference::Object(obj)) => obj.borrow().class_name.clone(),
                Some(Reference::String(_)) => "java/lang/String".to_owned(),
                Some(Reference::Array(_)) => "[Ljava/lang/Object;".to_owned(),
                _ => "java/lang/Object".to_owned(),
            };
            Some(Value::object(ClassInstance::class_mirror(&name)))
        }

        "java/lang/Class.getPrimitiveClass:(Ljava/lang/String;)Ljava/lang/Class;"
        | "java/lang/Class.forName0:(Ljava/lang/String;ZLjava/lang/ClassLoader;Ljava/lang/Class;)Ljava/lang/Class;" => {
            let name = string_arg(&args, 0);
            Some(Value::object(ClassInstance::class_mirror(&name)))
        }

        "java/lang/Class.desiredAssertionStatus0:(Ljava/lang/Class;)Z"
        | "java/lang/Class.desiredAssertionStatus:()Z" => Some(Value::Int(0)),

        "jdk/internal/misc/VM.getSavedProperty:(Ljava/lang/String;)Ljava/lang/String;" => {
            Some(Value::Null)
        }

        "jdk/internal/misc/VM.initialize:()V" => {
            // Seed savedProps so getSavedProperty callers don't trip over
            // an unset static.
            let props = ClassInstance::new("java/util/HashMap");
            vm.set_static_field("jdk/internal/misc/VM", "savedProps", Value::object(props));
            None
        }

        "jdk/internal/misc/CDS.initializeFromArchive:(Ljava/lang/Class;)V" => None,
        "jdk/internal/misc/CDS.isDumpingClassList0:()Z"
        | "jdk/internal/misc/CDS.isDumpingArchive0:()Z"
        | "jdk/internal/misc/CDS.isSharingEnabled0:()Z" => Some(Value::Int(0)),
        "jdk/internal/misc/CDS.getRandomSeedForDumping:()J" => Some(Value::Long(0)),

        "java/lang/Float.floatToRawIntBits:(F)I" => {
            #[allow(clippy::cast_possible_wrap)]
            let bits = arg(&args, 0, &key)?.as_float()?.to_bits() as i32;
            Some(Value::Int(bits))
        }
        "java/lang/Double.doubleToRawLongBits:(D)J" => {
            #[allow(clippy::cast_possible_wrap)]
            let bits = arg(&args, 0, &key)?.as_double()?.to_bits() as i64;
            Some(Value::Long(bits))
        }
        "java/lang/Double.longBitsToDouble:(J)D" => {
            #[allow(clippy::cast_sign_loss)]
            let bits = arg(&args, 0, &key)?.as_long()? as u64;
            Some(Value::Double(f64::from_bits(bits)))
        }

        "java/lang/Math.sqrt:(D)D" => Some(Value::Double(arg(&args, 0, &key)?.as_double()?.sqrt())),
        "java/lang/Math.pow:(DD)D" => Some(Value::Double(
            arg(&args, 0, &key)?
                .as_double()?
                .powf(arg(&args, 1, &key)?.as_double()?),
        )),

        "java/lang/Float.isNaN:(F)Z" => Some(Value::Int(0)),

        "java/lang/String.intern:()Ljava/lang/String;" => Some(arg(&args, 0, &key)?),

        "jdk/internal/misc/Unsafe.getUnsafe:()Ljdk/internal/misc/Unsafe;" => Some(Value::object(
            ClassInstance::new("jdk/internal/misc/Unsafe"),
        )),
        "jdk/internal/misc/Unsafe.storeFence:()V" => None,
        "jdk/internal/misc/Unsafe.arrayBaseOffset:(Ljava/lang/Class;)I" => Some(Value::Int(0)),
        "jdk/internal/misc/Unsafe.arrayIndexScale:(Ljava/lang/Class;)I" => Some(Value::Int(1)),
        "jdk/internal/misc/Unsafe.objectFieldOffset1:(Ljava/lang/Class;Ljava/lang/String;)J" => {
            Some(Value::Long(0))
        }
        // CAS always succeeds: there is exactly one thread to win the race.
        "jdk/internal/misc/Unsafe.compareAndSetInt:(Ljava/lang/Object;JII)Z"
        | "jdk/internal/misc/Unsafe.compareAndSetLong:(Ljava/lang/Object;JJJ)Z"
        | "jdk/internal/misc/Unsafe.compareAndSetReference:(Ljava/lang/Object;JLjava/lang/Object;Ljava/lang/Object;)Z" => {
            Some(Value::Int(1))
        }
        "jdk/internal/misc/Unsafe.getIntVolatile:(Ljava/lang/Object;J)I" => Some(Value::Int(0)),
        "jdk/internal/misc/Unsafe.getReferenceVolatile:(Ljava/lang/Object;J)Ljava/lang/Object;" => {
            Some(Value::Null)
        }
        "jdk/internal/misc/Unsafe.putReferenceVolatile:(Ljava/lang/Object;JLjava/lang/Object;)V" => {
            None
        }
        "jdk/internal/misc/Unsafe.getObjectSize:(Ljava/lang/Object;)J" => Some(Value::Long(16)),

        "java/lang/Class.isArray:()Z" | "java/lang/Class.isPrimitive:()Z" => Some(Value::Int(0)),
        "java/lang/Class.getComponentType:()Ljava/lang/Class;" => Some(Value::Null),
        "java/lang/Class.isAssignableFrom:(Ljava/lang/Class;)Z" => Some(Value::Int(1)),

        "java/lang/StringUTF16.isBigEndian:()Z" => Some(Value::Int(0)),

        "java/lang/System.arraycopy:(Ljava/lang/Object;ILjava/lang/Object;II)V" => {
            arraycopy(&args)?;
            None
        }
        "java/lang/System.nanoTime:()J" => Some(Value::Long(0)),

        "java/lang/Object.notify:()V" | "java/lang/Object.notifyAll:()V" => None,

        "java/lang/Thread.currentThread:()Ljava/lang/Thread;" => {
            Some(Value::object(ClassInstance::new("java/lang/Thread")))
        }
        "java/lang/Thread.setPriority:(I)V" => None,

        "java/lang/Runtime.maxMemory:()J" => Some(Value::Long(256 * 1024 * 1024)),

        "jdk/internal/reflect/Reflection.getCallerClass:()Ljava/lang/Class;" => Some(
            Value::object(ClassInstance::class_mirror("java/lang/Object")),
        ),

        "java/lang/reflect/Array.newArray:(Ljava/lang/Class;I)Ljava/lang/Object;" => {
            let length = usize::try_from(arg(&args, 1, &key)?.as_int()?).unwrap_or(0);
            Some(Value::array(ArrayInstance::new_reference(length)))
        }

        _ => {
            // Every registerNatives/initIDs is a no-op regardless of class.
            if (method_name == "registerNatives" || method_name == "initIDs")
                && descriptor == "()V"
            {
                None
            } else {
                return Err(VmError::NativeMethodNotImplemented { key }.into());
            }
        }
    };

    Ok(result)
}

/// `System.arraycopy`: an argument-validated memmove over reference
/// arrays.
fn arraycopy(args: &[Value]) -> Result<(), ExecError> {
    let src = arg(args, 0, "arraycopy")?;
    let src_pos = arg(args, 1, "arraycopy")?.as_int()?;
    let dest = arg(args, 2, "arraycopy")?;
    let dest_pos = arg(args, 3, "arraycopy")?.as_int()?;
    let length = arg(args, 4, "arraycopy")?.as_int()?;

    if src.is_null() || dest.is_null() {
        return Err(JavaThrowable::new(class_names::NULL_POINTER).into());
    }

    let (Some(Reference::Array(src)), Some(Reference::Array(dest))) =
        (src.as_reference()?, dest.as_reference()?)
    else {
        return Err(JavaThrowable::new(class_names::ARRAY_STORE).into());
    };

    let (Ok(src_pos), Ok(dest_pos), Ok(length)) = (
        usize::try_from(src_pos),
        usize::try_from(dest_pos),
        usize::try_from(length),
    ) else {
        return Err(JavaThrowable::new(class_names::ARRAY_INDEX_OUT_OF_BOUNDS).into());
    };

    if src_pos + length > src.borrow().len() || dest_pos + length > dest.borrow().len() {
        return Err(JavaThrowable::new(class_names::ARRAY_INDEX_OUT_OF_BOUNDS).into());
    }

    // src and dest may be the same array; copy through a staging buffer.
    let staged: Vec<Value> = src.borrow().elements[src_pos..src_pos + length].to_vec();
    dest.borrow_mut().elements[dest_pos..dest_pos + length].clone_from_slice(&staged);
    Ok(())
}
