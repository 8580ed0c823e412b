// Class file parser
//
// Sequential big-endian decode of the class-file format into a ClassModel.
// Only Code, LineNumberTable, LocalVariableTable and ConstantValue are
// decoded; every other attribute is skipped by its declared length.

use crate::protocol::{DebugError, DebugResult};

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_NATIVE: u16 = 0x0100;

// Constant pool tags
const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELD_REF: u8 = 9;
const TAG_METHOD_REF: u8 = 10;
const TAG_INTERFACE_METHOD_REF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_INVOKE_DYNAMIC: u8 = 18;

/// Big-endian cursor over class-file bytes
pub struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> DebugResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(DebugError::MalformedClassFile(format!(
                "truncated at offset {}: need {} bytes, have {}",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u1(&mut self) -> DebugResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u2(&mut self) -> DebugResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u4(&mut self) -> DebugResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u8(&mut self) -> DebugResult<u64> {
        let hi = self.read_u4()? as u64;
        let lo = self.read_u4()? as u64;
        Ok((hi << 32) | lo)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolEntry {
    Utf8(String),
    Integer(i32),
    /// IEEE-754 bit pattern
    Float(u32),
    Long(i64),
    /// IEEE-754 bit pattern
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    /// Slot 0 and the second slot of a long/double constant
    Unusable,
}

/// 1-indexed constant pool; slot 0 holds a placeholder
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<ConstantPoolEntry>,
}

impl ConstantPool {
    pub fn parse(reader: &mut ClassReader<'_>) -> DebugResult<Self> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count.max(1));
        entries.push(ConstantPoolEntry::Unusable);

        let mut index = 1;
        while index < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                TAG_UTF8 => {
                    let len = reader.read_u2()? as usize;
                    let bytes = reader.read_bytes(len)?;
                    ConstantPoolEntry::Utf8(String::from_utf8_lossy(bytes).into_owned())
                }
                TAG_INTEGER => ConstantPoolEntry::Integer(reader.read_u4()? as i32),
                TAG_FLOAT => ConstantPoolEntry::Float(reader.read_u4()?),
                TAG_LONG => ConstantPoolEntry::Long(reader.read_u8()? as i64),
                TAG_DOUBLE => ConstantPoolEntry::Double(reader.read_u8()?),
                TAG_CLASS => ConstantPoolEntry::Class {
                    name_index: reader.read_u2()?,
                },
                TAG_STRING => ConstantPoolEntry::String {
                    string_index: reader.read_u2()?,
                },
                TAG_FIELD_REF => ConstantPoolEntry::FieldRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_METHOD_REF => ConstantPoolEntry::MethodRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_INTERFACE_METHOD_REF => ConstantPoolEntry::InterfaceMethodRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_NAME_AND_TYPE => ConstantPoolEntry::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                TAG_METHOD_HANDLE => ConstantPoolEntry::MethodHandle {
                    reference_kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                TAG_METHOD_TYPE => ConstantPoolEntry::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                TAG_INVOKE_DYNAMIC => ConstantPoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                other => {
                    return Err(DebugError::MalformedClassFile(format!(
                        "unknown constant pool tag {} at index {}",
                        other, index
                    )))
                }
            };

            let wide = matches!(entry, ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_));
            entries.push(entry);
            index += 1;
            if wide {
                entries.push(ConstantPoolEntry::Unusable);
                index += 1;
            }
        }

        Ok(Self { entries })
    }

    /// Number of slots including the unused slot 0
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> DebugResult<&ConstantPoolEntry> {
        match self.entries.get(index as usize) {
            Some(ConstantPoolEntry::Unusable) | None => Err(DebugError::MalformedClassFile(
                format!("invalid constant pool index {}", index),
            )),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> DebugResult<&str> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(text) => Ok(text),
            other => Err(DebugError::MalformedClassFile(format!(
                "constant pool index {} is not UTF8: {:?}",
                index, other
            ))),
        }
    }

    pub fn class_name(&self, index: u16) -> DebugResult<&str> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8(*name_index),
            other => Err(DebugError::MalformedClassFile(format!(
                "constant pool index {} is not a class: {:?}",
                index, other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u32,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u32,
    pub length: u32,
    pub name: String,
    pub descriptor: String,
    pub index: u16,
}

impl LocalVariableEntry {
    pub fn is_live_at(&self, pc: u32) -> bool {
        pc >= self.start_pc && pc < self.start_pc + self.length
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub line_numbers: Vec<LineNumberEntry>,
    pub local_variables: Vec<LocalVariableEntry>,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub constant_value_index: Option<u16>,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Option<CodeAttribute>,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn code_length(&self) -> u32 {
        self.code.as_ref().map(|c| c.code.len() as u32).unwrap_or(0)
    }

    pub fn line_numbers(&self) -> &[LineNumberEntry] {
        self.code.as_ref().map(|c| c.line_numbers.as_slice()).unwrap_or(&[])
    }

    pub fn local_variables(&self) -> &[LocalVariableEntry] {
        self.code
            .as_ref()
            .map(|c| c.local_variables.as_slice())
            .unwrap_or(&[])
    }
}

/// A parsed class; immutable once built
#[derive(Debug, Clone)]
pub struct ClassModel {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub constant_pool: ConstantPool,
    pub fields: Vec<FieldInfo>,
    /// Native and bridge methods are excluded
    pub methods: Vec<MethodInfo>,
}

impl ClassModel {
    pub fn parse(bytes: &[u8]) -> DebugResult<Self> {
        let mut reader = ClassReader::new(bytes);
        let magic = reader.read_u4()?;
        if magic != CLASS_MAGIC {
            return Err(DebugError::MalformedClassFile(format!(
                "bad magic {:#010x}",
                magic
            )));
        }

        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;

        let access_flags = reader.read_u2()?;
        let this_class = constant_pool.class_name(reader.read_u2()?)?.to_string();
        let super_index = reader.read_u2()?;
        let super_class = if super_index == 0 {
            None
        } else {
            Some(constant_pool.class_name(super_index)?.to_string())
        };

        let interfaces_count = reader.read_u2()? as usize;
        let mut interfaces = Vec::with_capacity(interfaces_count);
        for _ in 0..interfaces_count {
            interfaces.push(constant_pool.class_name(reader.read_u2()?)?.to_string());
        }

        let fields_count = reader.read_u2()? as usize;
        let mut fields = Vec::with_capacity(fields_count);
        for _ in 0..fields_count {
            fields.push(parse_field(&mut reader, &constant_pool)?);
        }

        let methods_count = reader.read_u2()? as usize;
        let mut methods = Vec::with_capacity(methods_count);
        for _ in 0..methods_count {
            let method = parse_method(&mut reader, &constant_pool)?;
            if method.access_flags & (ACC_NATIVE | ACC_BRIDGE) == 0 {
                methods.push(method);
            }
        }

        // Class-level attributes carry nothing the debugger needs
        parse_attributes(&mut reader, &constant_pool, |_, _| Ok(()))?;

        Ok(Self {
            minor_version,
            major_version,
            access_flags,
            this_class,
            super_class,
            interfaces,
            constant_pool,
            fields,
            methods,
        })
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> DebugResult<&MethodInfo> {
        self.method(name, descriptor)
            .ok_or_else(|| DebugError::MethodNotFound {
                class: self.this_class.clone(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Last path segment of the class name
    pub fn simple_name(&self) -> &str {
        self.this_class
            .rsplit('/')
            .next()
            .unwrap_or(&self.this_class)
    }
}

/// Iterate an attribute table, handing each recognized body to `handle`
/// as its own sub-reader. Bodies are always consumed by declared length.
fn parse_attributes<F>(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    mut handle: F,
) -> DebugResult<()>
where
    F: FnMut(AttributeKind, &mut ClassReader<'_>) -> DebugResult<()>,
{
    let count = reader.read_u2()?;
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let body = reader.read_bytes(length)?;
        let kind = AttributeKind::from_name(pool.utf8(name_index)?);
        if kind != AttributeKind::Unknown {
            handle(kind, &mut ClassReader::new(body))?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeKind {
    Code,
    LineNumberTable,
    LocalVariableTable,
    ConstantValue,
    Unknown,
}

impl AttributeKind {
    fn from_name(name: &str) -> Self {
        match name {
            "Code" => Self::Code,
            "LineNumberTable" => Self::LineNumberTable,
            "LocalVariableTable" => Self::LocalVariableTable,
            "ConstantValue" => Self::ConstantValue,
            _ => Self::Unknown,
        }
    }
}

fn parse_field(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> DebugResult<FieldInfo> {
    let access_flags = reader.read_u2()?;
    let name = pool.utf8(reader.read_u2()?)?.to_string();
    let descriptor = pool.utf8(reader.read_u2()?)?.to_string();

    let mut constant_value_index = None;
    parse_attributes(reader, pool, |kind, body| {
        if kind == AttributeKind::ConstantValue {
            constant_value_index = Some(body.read_u2()?);
        }
        Ok(())
    })?;

    Ok(FieldInfo {
        access_flags,
        name,
        descriptor,
        constant_value_index,
    })
}

fn parse_method(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> DebugResult<MethodInfo> {
    let access_flags = reader.read_u2()?;
    let name = pool.utf8(reader.read_u2()?)?.to_string();
    let descriptor = pool.utf8(reader.read_u2()?)?.to_string();

    let mut code = None;
    parse_attributes(reader, pool, |kind, body| {
        if kind == AttributeKind::Code {
            code = Some(parse_code(body, pool)?);
        }
        Ok(())
    })?;

    Ok(MethodInfo {
        access_flags,
        name,
        descriptor,
        code,
    })
}

fn parse_code(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> DebugResult<CodeAttribute> {
    let max_stack = reader.read_u2()?;
    let max_locals = reader.read_u2()?;
    let code_length = reader.read_u4()? as usize;
    let code = reader.read_bytes(code_length)?.to_vec();

    // start_pc, end_pc, handler_pc, catch_type
    let exception_table_length = reader.read_u2()? as usize;
    reader.read_bytes(exception_table_length * 8)?;

    let mut line_numbers = Vec::new();
    let mut local_variables = Vec::new();
    parse_attributes(reader, pool, |kind, body| {
        match kind {
            AttributeKind::LineNumberTable => {
                let count = body.read_u2()?;
                for _ in 0..count {
                    line_numbers.push(LineNumberEntry {
                        start_pc: body.read_u2()? as u32,
                        line: body.read_u2()? as u32,
                    });
                }
            }
            AttributeKind::LocalVariableTable => {
                let count = body.read_u2()?;
                for _ in 0..count {
                    let start_pc = body.read_u2()? as u32;
                    let length = body.read_u2()? as u32;
                    let name = pool.utf8(body.read_u2()?)?.to_string();
                    let descriptor = pool.utf8(body.read_u2()?)?.to_string();
                    let index = body.read_u2()?;
                    local_variables.push(LocalVariableEntry {
                        start_pc,
                        length,
                        name,
                        descriptor,
                        index,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        line_numbers,
        local_variables,
    })
}
