// Class-file assembly helpers for tests
//
// Builds minimal but well-formed class files in memory so parser, locator
// and session tests can work without a Java toolchain. Kept free of crate
// paths so integration tests can include it directly.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_NATIVE: u16 = 0x0100;

/// One method to emit, with its line and local-variable tables
#[derive(Debug, Clone)]
pub struct MethodSpec {
    access_flags: u16,
    name: String,
    descriptor: String,
    code_length: Option<usize>,
    max_locals: u16,
    lines: Vec<(u16, u16)>,
    locals: Vec<(u16, u16, String, String, u16)>,
}

impl MethodSpec {
    pub fn new(name: &str, descriptor: &str) -> Self {
        Self {
            access_flags: ACC_PUBLIC,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code_length: Some(16),
            max_locals: 4,
            lines: Vec::new(),
            locals: Vec::new(),
        }
    }

    pub fn access(mut self, flags: u16) -> Self {
        self.access_flags = flags;
        self
    }

    pub fn code_length(mut self, len: usize) -> Self {
        self.code_length = Some(len);
        self
    }

    /// Emit no Code attribute (abstract and native methods)
    pub fn without_code(mut self) -> Self {
        self.code_length = None;
        self
    }

    pub fn line(mut self, start_pc: u16, line: u16) -> Self {
        self.lines.push((start_pc, line));
        self
    }

    pub fn local(mut self, start_pc: u16, length: u16, name: &str, descriptor: &str, slot: u16) -> Self {
        self.locals
            .push((start_pc, length, name.to_string(), descriptor.to_string(), slot));
        self.max_locals = self.max_locals.max(slot + 2);
        self
    }
}

/// Incremental class-file writer (big-endian, constant pool deduplicated)
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    name: String,
    pool: Vec<u8>,
    next_index: u16,
    utf8_indices: HashMap<String, u16>,
    class_indices: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut builder = Self {
            name: name.to_string(),
            pool: Vec::new(),
            next_index: 1,
            utf8_indices: HashMap::new(),
            class_indices: HashMap::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
        };
        builder.this_class = builder.class_ref(name);
        if let Some(super_name) = super_name {
            builder.super_class = builder.class_ref(super_name);
        }
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        if let Some(&index) = self.utf8_indices.get(text) {
            return index;
        }
        self.pool.push(1);
        self.pool.extend_from_slice(&(text.len() as u16).to_be_bytes());
        self.pool.extend_from_slice(text.as_bytes());
        let index = self.take_slots(1);
        self.utf8_indices.insert(text.to_string(), index);
        index
    }

    pub fn class_ref(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.class_indices.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        self.pool.push(7);
        self.pool.extend_from_slice(&name_index.to_be_bytes());
        let index = self.take_slots(1);
        self.class_indices.insert(name.to_string(), index);
        index
    }

    pub fn integer_constant(&mut self, value: i32) -> u16 {
        self.pool.push(3);
        self.pool.extend_from_slice(&value.to_be_bytes());
        self.take_slots(1)
    }

    pub fn float_constant(&mut self, value: f32) -> u16 {
        self.pool.push(4);
        self.pool.extend_from_slice(&value.to_bits().to_be_bytes());
        self.take_slots(1)
    }

    pub fn long_constant(&mut self, value: i64) -> u16 {
        self.pool.push(5);
        self.pool.extend_from_slice(&value.to_be_bytes());
        self.take_slots(2)
    }

    pub fn double_constant(&mut self, value: f64) -> u16 {
        self.pool.push(6);
        self.pool.extend_from_slice(&value.to_bits().to_be_bytes());
        self.take_slots(2)
    }

    pub fn string_constant(&mut self, text: &str) -> u16 {
        let utf8 = self.utf8(text);
        self.pool.push(8);
        self.pool.extend_from_slice(&utf8.to_be_bytes());
        self.take_slots(1)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_ref(class);
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.pool.push(12);
        self.pool.extend_from_slice(&name_index.to_be_bytes());
        self.pool.extend_from_slice(&descriptor_index.to_be_bytes());
        let nat_index = self.take_slots(1);
        self.pool.push(10);
        self.pool.extend_from_slice(&class_index.to_be_bytes());
        self.pool.extend_from_slice(&nat_index.to_be_bytes());
        self.take_slots(1)
    }

    pub fn field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut out = Vec::new();
        out.extend_from_slice(&access_flags.to_be_bytes());
        out.extend_from_slice(&name_index.to_be_bytes());
        out.extend_from_slice(&descriptor_index.to_be_bytes());
        if access_flags & ACC_STATIC != 0 && descriptor == "I" {
            let attr_name = self.utf8("ConstantValue");
            let value = self.integer_constant(0);
            out.extend_from_slice(&1u16.to_be_bytes());
            out.extend_from_slice(&attr_name.to_be_bytes());
            out.extend_from_slice(&2u32.to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        } else {
            out.extend_from_slice(&0u16.to_be_bytes());
        }
        self.fields.extend_from_slice(&out);
        self.field_count += 1;
        self
    }

    pub fn method(&mut self, spec: MethodSpec) -> &mut Self {
        let name_index = self.utf8(&spec.name);
        let descriptor_index = self.utf8(&spec.descriptor);
        let mut out = Vec::new();
        out.extend_from_slice(&spec.access_flags.to_be_bytes());
        out.extend_from_slice(&name_index.to_be_bytes());
        out.extend_from_slice(&descriptor_index.to_be_bytes());

        match spec.code_length {
            Some(code_length) => {
                let code = self.code_attribute(&spec, code_length);
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&code);
            }
            None => out.extend_from_slice(&0u16.to_be_bytes()),
        }

        self.methods.extend_from_slice(&out);
        self.method_count += 1;
        self
    }

    pub fn build(&mut self) -> Vec<u8> {
        let simple = self.name.rsplit('/').next().unwrap_or(&self.name).to_string();
        let source_attr = self.utf8("SourceFile");
        let source_name = self.utf8(&format!("{}.java", simple));

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&self.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&(ACC_PUBLIC | 0x0020).to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.field_count.to_be_bytes());
        out.extend_from_slice(&self.fields);
        out.extend_from_slice(&self.method_count.to_be_bytes());
        out.extend_from_slice(&self.methods);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&source_attr.to_be_bytes());
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&source_name.to_be_bytes());
        out
    }

    /// Write `<root>/<name>.class`, creating package directories
    pub fn write_to(&mut self, root: &Path) -> io::Result<PathBuf> {
        let path = root.join(format!("{}.class", self.name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.build())?;
        Ok(path)
    }

    fn take_slots(&mut self, slots: u16) -> u16 {
        let index = self.next_index;
        self.next_index += slots;
        index
    }

    fn code_attribute(&mut self, spec: &MethodSpec, code_length: usize) -> Vec<u8> {
        let code_name = self.utf8("Code");
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&spec.max_locals.to_be_bytes());
        body.extend_from_slice(&(code_length as u32).to_be_bytes());
        body.extend(std::iter::repeat(0u8).take(code_length));
        body.extend_from_slice(&0u16.to_be_bytes());

        let mut attributes = Vec::new();
        let mut attribute_count = 0u16;

        if !spec.lines.is_empty() {
            let name = self.utf8("LineNumberTable");
            let len = 2 + 4 * spec.lines.len() as u32;
            attributes.extend_from_slice(&name.to_be_bytes());
            attributes.extend_from_slice(&len.to_be_bytes());
            attributes.extend_from_slice(&(spec.lines.len() as u16).to_be_bytes());
            for (pc, line) in &spec.lines {
                attributes.extend_from_slice(&pc.to_be_bytes());
                attributes.extend_from_slice(&line.to_be_bytes());
            }
            attribute_count += 1;
        }

        if !spec.locals.is_empty() {
            let name = self.utf8("LocalVariableTable");
            let len = 2 + 10 * spec.locals.len() as u32;
            attributes.extend_from_slice(&name.to_be_bytes());
            attributes.extend_from_slice(&len.to_be_bytes());
            attributes.extend_from_slice(&(spec.locals.len() as u16).to_be_bytes());
            for (start_pc, length, local_name, descriptor, slot) in &spec.locals {
                let name_index = self.utf8(local_name);
                let descriptor_index = self.utf8(descriptor);
                attributes.extend_from_slice(&start_pc.to_be_bytes());
                attributes.extend_from_slice(&length.to_be_bytes());
                attributes.extend_from_slice(&name_index.to_be_bytes());
                attributes.extend_from_slice(&descriptor_index.to_be_bytes());
                attributes.extend_from_slice(&slot.to_be_bytes());
            }
            attribute_count += 1;
        }

        // An attribute the parser does not decode, to exercise skip-by-length
        let stack_map = self.utf8("StackMapTable");
        attributes.extend_from_slice(&stack_map.to_be_bytes());
        attributes.extend_from_slice(&2u32.to_be_bytes());
        attributes.extend_from_slice(&0u16.to_be_bytes());
        attribute_count += 1;

        body.extend_from_slice(&attribute_count.to_be_bytes());
        body.extend_from_slice(&attributes);

        let mut out = Vec::new();
        out.extend_from_slice(&code_name.to_be_bytes());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// Write a source file under `root`, creating directories
pub fn write_source(root: &Path, relative: &str, text: &str) -> io::Result<PathBuf> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, text)?;
    Ok(path)
}
