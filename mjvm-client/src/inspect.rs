// Object and array inspector
//
// Heap values are exposed as reference handles registered per stop. The host
// expands a handle on demand: objects yield their inherited-plus-own instance
// fields, arrays yield element runs. Strings are read through their backing
// array and shown as text instead of as an expandable object.

use crate::connection::MjvmConnection;
use crate::protocol::{DebugError, DebugResult};
use crate::symbols::SymbolTable;
use crate::types::{
    class_name, element_descriptor, element_size, is_array, is_reference, PrimitiveValue, Value,
    ValueInfo,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Elements per ReadArray request; keeps each response inside the VM transmit window
pub const ARRAY_CHUNK: u32 = 256;

pub const STRING_CLASS: &str = "java/lang/String";
const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";

const CODER_LATIN1: u8 = 0;

/// Reference map for the current stop
#[derive(Debug)]
pub struct Inspector {
    next_reference: u32,
    references: HashMap<u32, ValueInfo>,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self {
            next_reference: 1,
            references: HashMap::new(),
        }
    }

    /// Forget every handle; called whenever the VM resumes
    pub fn clear(&mut self) {
        self.references.clear();
        self.next_reference = 1;
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Assign a reference to expandable values; others pass through unchanged
    pub fn register(&mut self, mut info: ValueInfo) -> ValueInfo {
        if let Value::ObjectRef { .. } = info.value {
            let reference = self.next_reference;
            self.next_reference += 1;
            info.reference = reference;
            self.references.insert(reference, info.clone());
        }
        info
    }

    pub fn get(&self, reference: u32) -> Option<&ValueInfo> {
        self.references.get(&reference)
    }
}

/// Decode a String's backing bytes according to its coder flag
pub fn decode_string(bytes: &[u8], coder: u8) -> String {
    if coder == CODER_LATIN1 {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        let pairs = bytes.chunks_exact(2);
        let truncated = !pairs.remainder().is_empty();
        let units: Vec<u16> = pairs.map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect();
        let mut text = String::from_utf16_lossy(&units);
        if truncated {
            warn!("UTF-16 string has an odd byte count ({})", bytes.len());
            text.push(char::REPLACEMENT_CHARACTER);
        }
        text
    }
}

fn is_string(type_name: &str) -> bool {
    type_name == STRING_DESCRIPTOR || type_name == STRING_CLASS
}

/// Read the text of a remote String object
pub async fn read_string(connection: &MjvmConnection, handle: u32) -> DebugResult<String> {
    // VM builds without compact strings have no coder field
    let coder = match connection.read_field(handle, "coder", "B").await {
        Ok(Value::Primitive {
            value: PrimitiveValue::Byte(coder),
        }) => coder as u8,
        Ok(_) | Err(DebugError::CommandFailed(..)) => CODER_LATIN1,
        Err(e) => return Err(e),
    };

    let (array, size) = match connection.read_field(handle, "value", "[B").await? {
        Value::ObjectRef { handle, size, .. } => (handle, size),
        _ => return Ok(String::new()),
    };

    let mut bytes = Vec::with_capacity(size as usize);
    let mut index = 0;
    while index < size {
        let count = ARRAY_CHUNK.min(size - index);
        let run = connection.read_array(array, index, count, 1).await?;
        if run.is_empty() {
            break;
        }
        index += run.len() as u32;
        bytes.extend(run.into_iter().map(|b| b as u8));
    }

    Ok(decode_string(&bytes, coder))
}

/// Replace String references with their text; everything else is unchanged
pub async fn present_value(connection: &MjvmConnection, info: ValueInfo) -> DebugResult<ValueInfo> {
    let string_handle = match &info.value {
        Value::ObjectRef {
            handle, type_name, ..
        } if is_string(type_name) => Some(*handle),
        _ => None,
    };

    match string_handle {
        Some(handle) => {
            let text = read_string(connection, handle).await?;
            Ok(ValueInfo {
                value: Value::DisplayString { text },
                ..info
            })
        }
        None => Ok(info),
    }
}

/// Children of a registered reference.
///
/// For arrays, `start` and `count` select an element window (`count` None
/// reads to the end). Objects ignore the window and return all instance
/// fields. Every child is registered before it is returned.
pub async fn expand(
    connection: &MjvmConnection,
    symbols: &mut SymbolTable,
    inspector: &mut Inspector,
    reference: u32,
    start: u32,
    count: Option<u32>,
) -> DebugResult<Vec<ValueInfo>> {
    let parent = inspector
        .get(reference)
        .cloned()
        .ok_or_else(|| DebugError::InvalidState(format!("Unknown variable reference {}", reference)))?;

    let (handle, type_name, size) = match parent.value {
        Value::ObjectRef {
            handle,
            type_name,
            size,
        } => (handle, type_name, size),
        _ => return Ok(Vec::new()),
    };

    let children = if is_array(&type_name) {
        expand_array(connection, handle, &type_name, size, start, count).await?
    } else {
        expand_object(connection, symbols, handle, &type_name).await?
    };

    Ok(children
        .into_iter()
        .map(|child| inspector.register(child))
        .collect())
}

async fn expand_object(
    connection: &MjvmConnection,
    symbols: &mut SymbolTable,
    handle: u32,
    type_name: &str,
) -> DebugResult<Vec<ValueInfo>> {
    let name = class_name(type_name).unwrap_or(type_name);
    let class = symbols.resolve(name)?;
    let fields = symbols.fields_including_inherited(&class)?;
    debug!("Expanding {} ({} fields)", name, fields.len());

    let mut children = Vec::new();
    for field in fields.iter().filter(|f| !f.is_static()) {
        let value = connection
            .read_field(handle, &field.name, &field.descriptor)
            .await?;
        let info = ValueInfo::new(field.name.clone(), field.descriptor.clone(), value);
        children.push(present_value(connection, info).await?);
    }
    Ok(children)
}

async fn expand_array(
    connection: &MjvmConnection,
    handle: u32,
    type_name: &str,
    size: u32,
    start: u32,
    count: Option<u32>,
) -> DebugResult<Vec<ValueInfo>> {
    let element = element_descriptor(type_name).unwrap_or("I");
    let width = element_size(element);
    let length = size / width;
    let end = match count {
        Some(count) => length.min(start.saturating_add(count)),
        None => length,
    };
    debug!("Expanding {} elements [{}, {}) of {}", type_name, start, end, length);

    let mut children = Vec::new();
    let mut index = start;
    while index < end {
        let run = connection
            .read_array(handle, index, ARRAY_CHUNK.min(end - index), width)
            .await?;
        if run.is_empty() {
            break;
        }

        for raw in run {
            let value = if is_reference(element) {
                element_reference(connection, raw as u32, element).await?
            } else {
                let tag = element.chars().next().unwrap_or('I');
                let value = PrimitiveValue::decode(tag, raw).unwrap_or(PrimitiveValue::Int(raw as i32));
                Value::Primitive { value }
            };
            let info = ValueInfo::new(format!("[{}]", index), element, value);
            children.push(present_value(connection, info).await?);
            index += 1;
        }
    }
    Ok(children)
}

/// Object elements carry only a handle; size and type need their own query
async fn element_reference(connection: &MjvmConnection, handle: u32, element: &str) -> DebugResult<Value> {
    if handle == 0 {
        return Ok(Value::NullRef {
            type_name: element.to_string(),
        });
    }
    let info = connection.read_size_and_type(handle).await?;
    Ok(Value::ObjectRef {
        handle,
        type_name: info.type_name,
        size: info.size,
    })
}
