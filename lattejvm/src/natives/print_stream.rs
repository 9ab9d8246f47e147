//! The intercepted `java/io/PrintStream` surface behind `System.out`.

use std::io::Write;

use crate::util::{char_from_java, format_double, format_float, value_to_string};
use crate::value::Value;
use crate::{ExecError, Vm, VmError};

fn bool_text(v: i32) -> &'static str {
    if v == 0 {
        "false"
    } else {
        "true"
    }
}

/// Formats and writes a `println`/`print` call to the VM's output sink.
/// Write errors on the sink are ignored, matching console semantics.
pub fn handle(
    vm: &mut Vm,
    method_name: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<(), ExecError> {
    let text = match (method_name, descriptor) {
        ("println", "()V") => String::new(),
        ("println" | "print", "(I)V") => args[0].as_int()?.to_string(),
        ("println" | "print", "(J)V") => args[0].as_long()?.to_string(),
        ("println" | "print", "(F)V") => format_float(args[0].as_float()?),
        ("println" | "print", "(D)V") => format_double(args[0].as_double()?),
        ("println" | "print", "(Z)V") => bool_text(args[0].as_int()?).to_owned(),
        ("println" | "print", "(C)V") => char_from_java(args[0].as_int()?).to_string(),
        ("println" | "print", "(Ljava/lang/String;)V")
        | ("println", "(Ljava/lang/Object;)V") => value_to_string(&args[0]),
        _ => {
            return Err(VmError::NativeMethodNotImplemented {
                key: format!("java/io/PrintStream.{method_name}:{descriptor}"),
            }
            .into())
        }
    };

    let stdout = vm.stdout.clone();
    let mut sink = stdout.borrow_mut();
    let _ = if method_name == "println" {
        writeln!(sink, "{text}")
    } else {
        write!(sink, "{text}")
    };
    Ok(())
}
