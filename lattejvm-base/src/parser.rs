//! Binary decoder for the class-file format.
//!
//! The format is big-endian throughout. Strings in the constant pool use the
//! JVM's modified UTF-8; the rare surrogate encodings that differ from real
//! UTF-8 are decoded lossily, which is sufficient for class/member names.

use crate::class::{
    BootstrapMethod, ClassFile, CodeAttribute, ExceptionHandler, FieldInfo, MethodInfo,
};
use crate::constant_pool::{tags, ConstantPool, ConstantPoolEntry, ConstantPoolError};

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// The newest class-format major version this decoder accepts (Java 17).
pub const MAX_SUPPORTED_MAJOR: u16 = 61;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassParseError {
    /// The stream ended before a read completed.
    UnexpectedEof {
        at: usize,
    },
    /// The first four bytes were not `0xCAFEBABE`.
    BadMagic(u32),
    UnsupportedVersion {
        major: u16,
        minor: u16,
    },
    UnknownConstantTag {
        tag: u8,
        index: u16,
    },
    /// A non-native, non-abstract method had no `Code` attribute.
    MissingCode {
        method: String,
    },
    /// The `Code` attribute's declared `code_length` exceeded its data.
    TruncatedCode {
        method: String,
    },
    ConstantPool(ConstantPoolError),
}

impl From<ConstantPoolError> for ClassParseError {
    fn from(err: ConstantPoolError) -> Self {
        ClassParseError::ConstantPool(err)
    }
}

/// A checked big-endian cursor over a byte slice.
pub(crate) struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> ClassReader<'a> {
        ClassReader { data, pos: 0 }
    }

    fn eof(&self) -> ClassParseError {
        ClassParseError::UnexpectedEof { at: self.pos }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ClassParseError> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, ClassParseError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, ClassParseError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassParseError> {
        let end = self.pos.checked_add(len).ok_or_else(|| self.eof())?;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| self.eof())?;
        self.pos = end;
        Ok(bytes)
    }
}

/// Parses a complete class file from its raw bytes.
pub fn parse(data: &[u8]) -> Result<ClassFile, ClassParseError> {
    let mut r = ClassReader::new(data);

    let magic = r.read_u32()?;
    if magic != CLASS_MAGIC {
        return Err(ClassParseError::BadMagic(magic));
    }

    let minor_version = r.read_u16()?;
    let major_version = r.read_u16()?;
    if major_version > MAX_SUPPORTED_MAJOR {
        return Err(ClassParseError::UnsupportedVersion {
            major: major_version,
            minor: minor_version,
        });
    }

    let pool_count = r.read_u16()?;
    let constant_pool = parse_constant_pool(&mut r, pool_count)?;

    let access_flags = r.read_u16()?;
    let this_class = r.read_u16()?;
    let super_class = r.read_u16()?;

    let interface_count = r.read_u16()?;
    let mut interfaces = Vec::with_capacity(usize::from(interface_count));
    for _ in 0..interface_count {
        interfaces.push(r.read_u16()?);
    }

    let field_count = r.read_u16()?;
    let mut fields = Vec::with_capacity(usize::from(field_count));
    for _ in 0..field_count {
        fields.push(parse_field(&mut r, &constant_pool)?);
    }

    let method_count = r.read_u16()?;
    let mut methods = Vec::with_capacity(usize::from(method_count));
    for _ in 0..method_count {
        methods.push(parse_method(&mut r, &constant_pool)?);
    }

    let bootstrap_methods = parse_class_attributes(&mut r, &constant_pool)?;

    Ok(ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        bootstrap_methods,
    })
}

fn parse_constant_pool(
    r: &mut ClassReader<'_>,
    count: u16,
) -> Result<ConstantPool, ClassParseError> {
    let mut entries = vec![ConstantPoolEntry::Skip; usize::from(count).max(1)];

    let mut index = 1u16;
    while index < count {
        let tag = r.read_u8()?;
        let entry = match tag {
            tags::UTF8 => {
                let len = r.read_u16()?;
                let bytes = r.read_bytes(usize::from(len))?;
                ConstantPoolEntry::Utf8(String::from_utf8_lossy(bytes).into_owned())
            }
            tags::INTEGER => ConstantPoolEntry::Integer(r.read_u32()? as i32),
            tags::FLOAT => ConstantPoolEntry::Float(f32::from_bits(r.read_u32()?)),
            tags::LONG => {
                let high = u64::from(r.read_u32()?);
                let low = u64::from(r.read_u32()?);
                ConstantPoolEntry::Long(((high << 32) | low) as i64)
            }
            tags::DOUBLE => {
                let high = u64::from(r.read_u32()?);
                let low = u64::from(r.read_u32()?);
                ConstantPoolEntry::Double(f64::from_bits((high << 32) | low))
            }
            tags::CLASS => ConstantPoolEntry::Class {
                name_index: r.read_u16()?,
            },
            tags::STRING => ConstantPoolEntry::String {
                string_index: r.read_u16()?,
            },
            tags::FIELDREF => ConstantPoolEntry::Fieldref {
                class_index: r.read_u16()?,
                name_and_type_index: r.read_u16()?,
            },
            tags::METHODREF => ConstantPoolEntry::Methodref {
                class_index: r.read_u16()?,
                name_and_type_index: r.read_u16()?,
            },
            tags::INTERFACE_METHODREF => ConstantPoolEntry::InterfaceMethodref {
                class_index: r.read_u16()?,
                name_and_type_index: r.read_u16()?,
            },
            tags::NAME_AND_TYPE => ConstantPoolEntry::NameAndType {
                name_index: r.read_u16()?,
                descriptor_index: r.read_u16()?,
            },
            tags::METHOD_HANDLE => ConstantPoolEntry::MethodHandle {
                reference_kind: r.read_u8()?,
                reference_index: r.read_u16()?,
            },
            tags::METHOD_TYPE => ConstantPoolEntry::MethodType {
                descriptor_index: r.read_u16()?,
            },
            tags::DYNAMIC => {
                // Consumed for its size only; condy is never resolved here.
                let _ = r.read_u16()?;
                let _ = r.read_u16()?;
                ConstantPoolEntry::Skip
            }
            tags::INVOKE_DYNAMIC => ConstantPoolEntry::InvokeDynamic {
                bootstrap_method_attr_index: r.read_u16()?,
                name_and_type_index: r.read_u16()?,
            },
            _ => return Err(ClassParseError::UnknownConstantTag { tag, index }),
        };

        let two_slots = matches!(
            entry,
            ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_)
        );
        entries[usize::from(index)] = entry;
        index += if two_slots { 2 } else { 1 };
    }

    Ok(ConstantPool::new(entries))
}

struct RawAttribute<'a> {
    name: String,
    data: &'a [u8],
}

fn parse_attributes<'a>(
    r: &mut ClassReader<'a>,
    pool: &ConstantPool,
) -> Result<Vec<RawAttribute<'a>>, ClassParseError> {
    let count = r.read_u16()?;
    let mut attrs = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name_index = r.read_u16()?;
        let length = r.read_u32()?;
        let data = r.read_bytes(length as usize)?;
        let name = pool.get_utf8(name_index)?.to_owned();
        attrs.push(RawAttribute { name, data });
    }
    Ok(attrs)
}

fn parse_field(r: &mut ClassReader<'_>, pool: &ConstantPool) -> Result<FieldInfo, ClassParseError> {
    let access_flags = r.read_u16()?;
    let name_index = r.read_u16()?;
    let descriptor_index = r.read_u16()?;
    let _attrs = parse_attributes(r, pool)?;

    Ok(FieldInfo {
        access_flags,
        name: pool.get_utf8(name_index)?.to_owned(),
        descriptor: pool.get_utf8(descriptor_index)?.to_owned(),
    })
}

fn parse_method(
    r: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<MethodInfo, ClassParseError> {
    let access_flags = r.read_u16()?;
    let name_index = r.read_u16()?;
    let descriptor_index = r.read_u16()?;
    let attrs = parse_attributes(r, pool)?;

    let name = pool.get_utf8(name_index)?.to_owned();
    let descriptor = pool.get_utf8(descriptor_index)?.to_owned();

    let mut code = None;
    for attr in &attrs {
        if attr.name == "Code" {
            code = Some(parse_code_attribute(attr.data, &name)?);
            break;
        }
    }

    let method = MethodInfo {
        access_flags,
        name,
        descriptor,
        code,
    };

    if method.code.is_none() && !method.is_native() && !method.is_abstract() {
        return Err(ClassParseError::MissingCode {
            method: method.name,
        });
    }

    Ok(method)
}

fn parse_code_attribute(data: &[u8], method: &str) -> Result<CodeAttribute, ClassParseError> {
    let mut r = ClassReader::new(data);

    let max_stack = r.read_u16()?;
    let max_locals = r.read_u16()?;
    let code_length = r.read_u32()? as usize;
    let code = r
        .read_bytes(code_length)
        .map_err(|_| ClassParseError::TruncatedCode {
            method: method.to_owned(),
        })?
        .to_vec();

    let handler_count = r.read_u16()?;
    let mut exception_handlers = Vec::with_capacity(usize::from(handler_count));
    for _ in 0..handler_count {
        exception_handlers.push(ExceptionHandler {
            start_pc: r.read_u16()?,
            end_pc: r.read_u16()?,
            handler_pc: r.read_u16()?,
            catch_type: r.read_u16()?,
        });
    }

    // Nested attributes (LineNumberTable, StackMapTable, ...) are ignored.

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_handlers,
    })
}

fn parse_class_attributes(
    r: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<BootstrapMethod>, ClassParseError> {
    let attrs = parse_attributes(r, pool)?;
    for attr in &attrs {
        if attr.name == "BootstrapMethods" {
            return parse_bootstrap_methods(attr.data);
        }
    }
    Ok(Vec::new())
}

fn parse_bootstrap_methods(data: &[u8]) -> Result<Vec<BootstrapMethod>, ClassParseError> {
    let mut r = ClassReader::new(data);
    let count = r.read_u16()?;
    let mut methods = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let method_ref = r.read_u16()?;
        let arg_count = r.read_u16()?;
        let mut arguments = Vec::with_capacity(usize::from(arg_count));
        for _ in 0..arg_count {
            arguments.push(r.read_u16()?);
        }
        methods.push(BootstrapMethod {
            method_ref,
            arguments,
        });
    }
    Ok(methods)
}
