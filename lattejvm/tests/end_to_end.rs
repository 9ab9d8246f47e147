//! End-to-end runs: raw class-file bytes on disk, loaded through the
//! directory loader, executed by the interpreter, output captured from
//! the print-stream sink.

use std::cell::RefCell;
use std::rc::Rc;

use lattejvm::Vm;
use lattejvm_class_loaders::{ClassLoader, DirectoryClassLoader, LoadClassError};

/// A parent loader that knows nothing, so lookups fall through to the
/// directory backend.
struct EmptyParent;

impl ClassLoader for EmptyParent {
    fn load_class(
        &mut self,
        name: &str,
    ) -> Result<Rc<lattejvm_base::ClassFile>, LoadClassError> {
        Err(LoadClassError::NotFound(name.to_owned()))
    }
}

/// Emits constant-pool entries and hands back their 1-based indices.
struct PoolWriter {
    bytes: Vec<u8>,
    count: u16,
}

impl PoolWriter {
    fn new() -> PoolWriter {
        PoolWriter {
            bytes: Vec::new(),
            count: 1,
        }
    }

    fn take(&mut self) -> u16 {
        let index = self.count;
        self.count += 1;
        index
    }

    fn utf8(&mut self, text: &str) -> u16 {
        self.bytes.push(1);
        self.bytes
            .extend_from_slice(&u16::try_from(text.len()).unwrap().to_be_bytes());
        self.bytes.extend_from_slice(text.as_bytes());
        self.take()
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.bytes.push(7);
        self.bytes.extend_from_slice(&name_index.to_be_bytes());
        self.take()
    }

    fn string(&mut self, text: &str) -> u16 {
        let string_index = self.utf8(text);
        self.bytes.push(8);
        self.bytes.extend_from_slice(&string_index.to_be_bytes());
        self.take()
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.bytes.push(12);
        self.bytes.extend_from_slice(&name_index.to_be_bytes());
        self.bytes.extend_from_slice(&descriptor_index.to_be_bytes());
        self.take()
    }

    fn fieldref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class_name);
        let nat_index = self.name_and_type(name, descriptor);
        self.bytes.push(9);
        self.bytes.extend_from_slice(&class_index.to_be_bytes());
        self.bytes.extend_from_slice(&nat_index.to_be_bytes());
        self.take()
    }

    fn methodref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class_name);
        let nat_index = self.name_and_type(name, descriptor);
        self.bytes.push(10);
        self.bytes.extend_from_slice(&class_index.to_be_bytes());
        self.bytes.extend_from_slice(&nat_index.to_be_bytes());
        self.take()
    }
}

struct RawMethod {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    /// (start_pc, end_pc, handler_pc, catch_type)
    handlers: Vec<(u16, u16, u16, u16)>,
}

/// Assembles a complete class file image.
fn class_bytes(
    pool: PoolWriter,
    this_class: u16,
    super_class: u16,
    code_attr_name: u16,
    methods: &[RawMethod],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&61u16.to_be_bytes());

    out.extend_from_slice(&pool.count.to_be_bytes());
    out.extend_from_slice(&pool.bytes);

    out.extend_from_slice(&0x0021u16.to_be_bytes()); // public super
    out.extend_from_slice(&this_class.to_be_bytes());
    out.extend_from_slice(&super_class.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // interfaces
    out.extend_from_slice(&0u16.to_be_bytes()); // fields

    out.extend_from_slice(&u16::try_from(methods.len()).unwrap().to_be_bytes());
    for method in methods {
        out.extend_from_slice(&method.access_flags.to_be_bytes());
        out.extend_from_slice(&method.name_index.to_be_bytes());
        out.extend_from_slice(&method.descriptor_index.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes()); // one attribute: Code
        out.extend_from_slice(&code_attr_name.to_be_bytes());

        let mut body = Vec::new();
        body.extend_from_slice(&method.max_stack.to_be_bytes());
        body.extend_from_slice(&method.max_locals.to_be_bytes());
        body.extend_from_slice(&u32::try_from(method.code.len()).unwrap().to_be_bytes());
        body.extend_from_slice(&method.code);
        body.extend_from_slice(&u16::try_from(method.handlers.len()).unwrap().to_be_bytes());
        for (start, end, handler, catch) in &method.handlers {
            body.extend_from_slice(&start.to_be_bytes());
            body.extend_from_slice(&end.to_be_bytes());
            body.extend_from_slice(&handler.to_be_bytes());
            body.extend_from_slice(&catch.to_be_bytes());
        }
        body.extend_from_slice(&0u16.to_be_bytes()); // nested attributes

        out.extend_from_slice(&u32::try_from(body.len()).unwrap().to_be_bytes());
        out.extend_from_slice(&body);
    }

    out.extend_from_slice(&0u16.to_be_bytes()); // class attributes
    out
}

fn run_class(dir: &tempfile::TempDir, main_class: &str) -> (Result<(), String>, String) {
    let loader = DirectoryClassLoader::new(dir.path().to_owned(), Box::new(EmptyParent));
    let sink = Rc::new(RefCell::new(Vec::<u8>::new()));
    let mut vm = Vm::with_stdout(Box::new(loader), sink.clone());
    let result = vm.run_main(main_class).map_err(|err| format!("{err:?}"));
    let output = String::from_utf8(sink.borrow().clone()).unwrap();
    (result, output)
}

#[test]
fn prints_the_result_of_a_static_call() {
    // class Sum { static int add(int, int); public static void main(...) {
    //     System.out.println(add(3, 4)); } }
    let mut pool = PoolWriter::new();
    let this_class = pool.class("Sum");
    let super_class = pool.class("java/lang/Object");
    let code_attr = pool.utf8("Code");
    let out_field = pool.fieldref("java/lang/System", "out", "Ljava/io/PrintStream;");
    let println = pool.methodref("java/io/PrintStream", "println", "(I)V");
    let add = pool.methodref("Sum", "add", "(II)I");
    let main_name = pool.utf8("main");
    let main_desc = pool.utf8("([Ljava/lang/String;)V");
    let add_name = pool.utf8("add");
    let add_desc = pool.utf8("(II)I");

    let [out_hi, out_lo] = out_field.to_be_bytes();
    let [pr_hi, pr_lo] = println.to_be_bytes();
    let [add_hi, add_lo] = add.to_be_bytes();

    let methods = [
        RawMethod {
            access_flags: 0x0009, // public static
            name_index: main_name,
            descriptor_index: main_desc,
            max_stack: 3,
            max_locals: 1,
            code: vec![
                0xB2, out_hi, out_lo, // getstatic System.out
                0x06, // iconst_3
                0x07, // iconst_4
                0xB8, add_hi, add_lo, // invokestatic add
                0xB6, pr_hi, pr_lo, // invokevirtual println
                0xB1, // return
            ],
            handlers: Vec::new(),
        },
        RawMethod {
            access_flags: 0x0009,
            name_index: add_name,
            descriptor_index: add_desc,
            max_stack: 2,
            max_locals: 2,
            code: vec![0x1A, 0x1B, 0x60, 0xAC], // iload_0 iload_1 iadd ireturn
            handlers: Vec::new(),
        },
    ];
    let bytes = class_bytes(pool, this_class, super_class, code_attr, &methods);

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Sum.class"), bytes).unwrap();

    let (result, output) = run_class(&dir, "Sum");
    result.unwrap();
    assert_eq!(output, "7\n");
}

#[test]
fn catches_division_by_zero() {
    // try { int x = 10 / 0; } catch (ArithmeticException e) {
    //     System.out.println("caught"); }
    let mut pool = PoolWriter::new();
    let this_class = pool.class("Catcher");
    let super_class = pool.class("java/lang/Object");
    let code_attr = pool.utf8("Code");
    let arithmetic = pool.class("java/lang/ArithmeticException");
    let out_field = pool.fieldref("java/lang/System", "out", "Ljava/io/PrintStream;");
    let println = pool.methodref("java/io/PrintStream", "println", "(Ljava/lang/String;)V");
    let caught = pool.string("caught");
    let main_name = pool.utf8("main");
    let main_desc = pool.utf8("([Ljava/lang/String;)V");

    let [out_hi, out_lo] = out_field.to_be_bytes();
    let [pr_hi, pr_lo] = println.to_be_bytes();
    let caught_index = u8::try_from(caught).unwrap();

    let methods = [RawMethod {
        access_flags: 0x0009,
        name_index: main_name,
        descriptor_index: main_desc,
        max_stack: 2,
        max_locals: 2,
        code: vec![
            0x10, 10, // 0: bipush 10
            0x03, // 2: iconst_0
            0x6C, // 3: idiv
            0x57, // 4: pop
            0xA7, 0x00, 12, // 5: goto 17
            0x57, // 8: pop (handler: discard the exception)
            0xB2, out_hi, out_lo, // 9: getstatic System.out
            0x12, caught_index, // 12: ldc "caught"
            0xB6, pr_hi, pr_lo, // 14: invokevirtual println
            0xB1, // 17: return
        ],
        handlers: vec![(0, 5, 8, arithmetic)],
    }];
    let bytes = class_bytes(pool, this_class, super_class, code_attr, &methods);

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Catcher.class"), bytes).unwrap();

    let (result, output) = run_class(&dir, "Catcher");
    result.unwrap();
    assert_eq!(output, "caught\n");
}

#[test]
fn uncaught_exception_surfaces_with_its_class() {
    // int x = 1 / 0; with no handler
    let mut pool = PoolWriter::new();
    let this_class = pool.class("Fails");
    let super_class = pool.class("java/lang/Object");
    let code_attr = pool.utf8("Code");
    let main_name = pool.utf8("main");
    let main_desc = pool.utf8("([Ljava/lang/String;)V");

    let methods = [RawMethod {
        access_flags: 0x0009,
        name_index: main_name,
        descriptor_index: main_desc,
        max_stack: 2,
        max_locals: 1,
        code: vec![0x04, 0x03, 0x6C, 0x57, 0xB1], // iconst_1 iconst_0 idiv pop return
        handlers: Vec::new(),
    }];
    let bytes = class_bytes(pool, this_class, super_class, code_attr, &methods);

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Fails.class"), bytes).unwrap();

    let (result, output) = run_class(&dir, "Fails");
    let err = result.unwrap_err();
    assert!(err.contains("ArithmeticException"), "unexpected error: {err}");
    assert_eq!(output, "");
}
