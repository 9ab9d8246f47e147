//! Native sorting for `Collections.sort` and `ArrayList.sort`.
//!
//! The list's `elementData` array and `size` field are accessed directly;
//! the sort is stable and keyed either by natural ordering or by a
//! comparator dispatched through the ordinary invocation path.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class_instance::{ArrayInstance, ClassInstance};
use crate::natives::boxed::numeric_compare;
use crate::value::{Reference, Value};
use crate::{ExecError, Vm, VmError};

/// Natural ordering: strings compare lexicographically, boxed numbers by
/// value. Unrelated values compare equal, keeping the sort stable.
fn compare_natural(a: &Value, b: &Value) -> i32 {
    if let (Value::Ref(Reference::String(x)), Value::Ref(Reference::String(y))) = (a, b) {
        return match x.cmp(y) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
    }
    if let (Some(Reference::Object(x)), Some(Reference::Object(y))) = (
        a.as_reference().ok().flatten(),
        b.as_reference().ok().flatten(),
    ) {
        let x = x.borrow().fields.get("value").cloned();
        let y = y.borrow().fields.get("value").cloned();
        if let (Some(x), Some(y)) = (x, y) {
            return numeric_compare(&x, &y).unwrap_or(0);
        }
    }
    0
}

/// Calls a comparator's `compare(Object, Object)`, through the lambda
/// target when the comparator is a proxy.
fn invoke_comparator(
    vm: &mut Vm,
    comparator: &Value,
    a: &Value,
    b: &Value,
) -> Result<i32, ExecError> {
    let Some(Reference::Object(object)) = comparator.as_reference()? else {
        return Ok(0);
    };
    let object = Rc::clone(object);

    let lambda = object.borrow().lambda_target.clone();
    if let Some(target) = lambda {
        let result = vm.invoke_lambda_target(&target, vec![a.clone(), b.clone()])?;
        return match result {
            Some(value) => Ok(value.as_int()?),
            None => Ok(0),
        };
    }

    let class_name = object.borrow().class_name.clone();
    let resolved =
        vm.resolve_method(&class_name, "compare", "(Ljava/lang/Object;Ljava/lang/Object;)I")?;
    let result = vm.call_resolved(&resolved, vec![comparator.clone(), a.clone(), b.clone()])?;
    match result {
        Some(value) => Ok(value.as_int()?),
        None => Ok(0),
    }
}

/// The list's backing array and live size.
fn list_internals(
    instance: &Rc<RefCell<ClassInstance>>,
    context: &str,
) -> Result<(Rc<RefCell<ArrayInstance>>, usize), ExecError> {
    let instance = instance.borrow();
    let Some(Value::Ref(Reference::Array(array))) = instance.fields.get("elementData") else {
        return Err(VmError::Native(format!("{context}: list has no elementData array")).into());
    };
    let size = match instance.fields.get("size") {
        Some(value) => usize::try_from(value.as_int()?).unwrap_or(0),
        None => 0,
    };
    let size = size.min(array.borrow().len());
    Ok((Rc::clone(array), size))
}

fn sort_in_place(
    vm: &mut Vm,
    array: &Rc<RefCell<ArrayInstance>>,
    size: usize,
    comparator: Option<&Value>,
) -> Result<(), ExecError> {
    // The elements are staged out so comparator code can touch the list
    // without holding a borrow.
    let mut staged: Vec<Value> = array.borrow().elements[..size].to_vec();

    match comparator {
        None => staged.sort_by(|a, b| compare_natural(a, b).cmp(&0)),
        Some(comparator) => {
            let mut failure = None;
            staged.sort_by(|a, b| {
                if failure.is_some() {
                    return std::cmp::Ordering::Equal;
                }
                match invoke_comparator(vm, comparator, a, b) {
                    Ok(result) => result.cmp(&0),
                    Err(err) => {
                        failure = Some(err);
                        std::cmp::Ordering::Equal
                    }
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
        }
    }

    array.borrow_mut().elements[..size].clone_from_slice(&staged);
    Ok(())
}

/// `Collections.sort(List)` and `Collections.sort(List, Comparator)`.
pub fn collections_sort(vm: &mut Vm, descriptor: &str, args: &[Value]) -> Result<(), ExecError> {
    let Some(Value::Ref(Reference::Object(list))) = args.first() else {
        return Err(VmError::Native("Collections.sort: list is not an object".to_owned()).into());
    };
    let list = Rc::clone(list);
    let (array, size) = list_internals(&list, "Collections.sort")?;

    let comparator = if descriptor == "(Ljava/util/List;)V" {
        None
    } else {
        args.get(1).filter(|c| !c.is_null())
    };
    sort_in_place(vm, &array, size, comparator)
}

/// `ArrayList.sort(Comparator)`; bumps `modCount` like the real one.
pub fn array_list_sort(
    vm: &mut Vm,
    instance: &Rc<RefCell<ClassInstance>>,
    args: &[Value],
) -> Result<(), ExecError> {
    let (array, size) = list_internals(instance, "ArrayList.sort")?;
    let comparator = args.first().filter(|c| !c.is_null());
    sort_in_place(vm, &array, size, comparator)?;

    let mod_count = instance.borrow().fields.get("modCount").cloned();
    if let Some(value) = mod_count {
        let bumped = value.as_int()?.wrapping_add(1);
        instance
            .borrow_mut()
            .fields
            .insert("modCount".to_owned(), Value::Int(bumped));
    }
    Ok(())
}
