// Value types and JVM descriptor helpers

use crate::protocol::DebugResult;
use crate::reader::{read_const_utf8, read_u32, read_u64};
use serde::Serialize;

/// Decoded primitive, tagged by its JVM type
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PrimitiveValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl PrimitiveValue {
    /// Reinterpret a raw slot value according to a descriptor tag.
    /// Returns None for reference tags.
    pub fn decode(tag: char, raw: u64) -> Option<Self> {
        let value = match tag {
            'Z' => Self::Boolean(raw & 0xFF != 0),
            'B' => Self::Byte(raw as u8 as i8),
            'C' => Self::Char(raw as u16),
            'S' => Self::Short(raw as u16 as i16),
            'I' => Self::Int(raw as u32 as i32),
            'J' => Self::Long(raw as i64),
            'F' => Self::Float(f32::from_bits(raw as u32)),
            'D' => Self::Double(f64::from_bits(raw)),
            _ => return None,
        };
        Some(value)
    }

    pub fn display(&self) -> String {
        match self {
            Self::Boolean(v) => v.to_string(),
            Self::Byte(v) => v.to_string(),
            Self::Char(v) => match char::from_u32(*v as u32) {
                Some(c) if !c.is_control() => format!("'{}'", c),
                _ => format!("'\\u{:04x}'", v),
            },
            Self::Short(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
        }
    }
}

/// A variable's value as read from the VM
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Value {
    Primitive {
        value: PrimitiveValue,
    },
    /// Live heap object; `type_name` is the runtime type descriptor
    ObjectRef {
        handle: u32,
        type_name: String,
        size: u32,
    },
    NullRef {
        type_name: String,
    },
    DisplayString {
        text: String,
    },
}

impl Value {
    pub fn handle(&self) -> Option<u32> {
        match self {
            Self::ObjectRef { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Number of elements when this is an array reference
    pub fn array_length(&self) -> Option<u32> {
        match self {
            Self::ObjectRef { type_name, size, .. } => {
                let element = element_descriptor(type_name)?;
                Some(size / element_size(element))
            }
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Primitive { value } => value.display(),
            Self::ObjectRef { type_name, handle, .. } => match self.array_length() {
                Some(len) => {
                    let element = element_descriptor(type_name).unwrap_or("");
                    let names = simple_type_names(element);
                    format!("{}[{}]", names.first().map(String::as_str).unwrap_or("?"), len)
                }
                None => format!("{}@{:x}", simple_type_name(type_name), handle),
            },
            Self::NullRef { .. } => "null".to_string(),
            Self::DisplayString { text } => format!("\"{}\"", text.escape_debug()),
        }
    }
}

/// One named variable, field or array element
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfo {
    pub name: String,
    pub descriptor: String,
    pub value: Value,
    /// Handle for on-demand child expansion, 0 when not expandable
    pub reference: u32,
}

impl ValueInfo {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            value,
            reference: 0,
        }
    }
}

/// Decode a ReadLocal/ReadField payload for a slot or field of `descriptor`.
///
/// Layouts:
///   [4:u32][value:u32]                       32-bit primitive, or null reference
///   [8:u32][value:u64]                       long/double
///   [size:u32][ref:u32][type const-utf8]     live object
///   [0:u32]                                  null object field
pub fn decode_value(descriptor: &str, payload: &[u8]) -> DebugResult<Value> {
    let mut buf = payload;
    let size = read_u32(&mut buf)?;

    if is_reference(descriptor) {
        if buf.is_empty() {
            return Ok(Value::NullRef {
                type_name: descriptor.to_string(),
            });
        }
        let handle = read_u32(&mut buf)?;
        if handle == 0 || buf.is_empty() {
            return Ok(Value::NullRef {
                type_name: descriptor.to_string(),
            });
        }
        let type_name = read_const_utf8(&mut buf)?;
        return Ok(Value::ObjectRef {
            handle,
            type_name,
            size,
        });
    }

    let raw = if size == 8 || is_wide(descriptor) {
        read_u64(&mut buf)?
    } else {
        read_u32(&mut buf)? as u64
    };
    let tag = descriptor.chars().next().unwrap_or('I');
    let value = PrimitiveValue::decode(tag, raw).unwrap_or(PrimitiveValue::Int(raw as i32));
    Ok(Value::Primitive { value })
}

pub fn is_reference(descriptor: &str) -> bool {
    descriptor.starts_with('L') || descriptor.starts_with('[')
}

pub fn is_wide(descriptor: &str) -> bool {
    descriptor == "J" || descriptor == "D"
}

pub fn is_array(descriptor: &str) -> bool {
    descriptor.starts_with('[')
}

/// `[I` -> `I`, `[[LFoo;` -> `[LFoo;`
pub fn element_descriptor(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('[')
}

/// Bytes per array element on the VM heap; references are 4-byte handles
pub fn element_size(element_descriptor: &str) -> u32 {
    match element_descriptor {
        "Z" | "B" => 1,
        "C" | "S" => 2,
        "I" | "F" => 4,
        "J" | "D" => 8,
        _ => 4,
    }
}

/// `Ljava/lang/String;` -> `java/lang/String`; None for primitives and arrays
pub fn class_name(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('L')?.strip_suffix(';')
}

/// Source-level names for a run of concatenated descriptors:
/// `I[Ljava/lang/String;J` -> `["int", "String[]", "long"]`
pub fn simple_type_names(descriptors: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = descriptors.chars();
    while let Some(mut ch) = chars.next() {
        let mut dimensions = 0;
        while ch == '[' {
            dimensions += 1;
            match chars.next() {
                Some(next) => ch = next,
                None => return names,
            }
        }

        let mut name = match ch {
            'Z' => "boolean".to_string(),
            'B' => "byte".to_string(),
            'C' => "char".to_string(),
            'S' => "short".to_string(),
            'I' => "int".to_string(),
            'J' => "long".to_string(),
            'F' => "float".to_string(),
            'D' => "double".to_string(),
            'V' => "void".to_string(),
            'L' => {
                let class: String = chars.by_ref().take_while(|&c| c != ';').collect();
                class.rsplit('/').next().unwrap_or_default().to_string()
            }
            other => other.to_string(),
        };
        name.push_str(&"[]".repeat(dimensions));
        names.push(name);
    }
    names
}

/// Source-level name for a single descriptor
pub fn simple_type_name(descriptor: &str) -> String {
    simple_type_names(descriptor)
        .into_iter()
        .next()
        .unwrap_or_else(|| descriptor.to_string())
}

/// `Main`, `main`, `([Ljava/lang/String;)V` -> `Main.main(String[])`
pub fn method_display_name(class_name: &str, method_name: &str, descriptor: &str) -> String {
    let simple_class = class_name.rsplit('/').next().unwrap_or(class_name);
    let params = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.rsplit_once(')'))
        .map(|(params, _)| params)
        .unwrap_or("");
    format!(
        "{}.{}({})",
        simple_class,
        method_name,
        simple_type_names(params).join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::put_const_utf8;

    #[test]
    fn test_primitive_decode() {
        assert_eq!(PrimitiveValue::decode('I', 0xFFFF_FFFF), Some(PrimitiveValue::Int(-1)));
        assert_eq!(PrimitiveValue::decode('Z', 1), Some(PrimitiveValue::Boolean(true)));
        assert_eq!(PrimitiveValue::decode('B', 0x80), Some(PrimitiveValue::Byte(-128)));
        assert_eq!(PrimitiveValue::decode('S', 0xFFFE), Some(PrimitiveValue::Short(-2)));
        assert_eq!(
            PrimitiveValue::decode('J', u64::MAX),
            Some(PrimitiveValue::Long(-1))
        );
        assert_eq!(
            PrimitiveValue::decode('F', 1.5f32.to_bits() as u64),
            Some(PrimitiveValue::Float(1.5))
        );
        assert_eq!(
            PrimitiveValue::decode('D', 2.25f64.to_bits()),
            Some(PrimitiveValue::Double(2.25))
        );
        assert_eq!(PrimitiveValue::decode('L', 0), None);
    }

    #[test]
    fn test_primitive_display() {
        assert_eq!(PrimitiveValue::Char('A' as u16).display(), "'A'");
        assert_eq!(PrimitiveValue::Char(0).display(), "'\\u0000'");
        assert_eq!(PrimitiveValue::Boolean(false).display(), "false");
        assert_eq!(PrimitiveValue::Double(0.5).display(), "0.5");
    }

    #[test]
    fn test_decode_int_and_long() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&(-5i32).to_le_bytes());
        assert_eq!(
            decode_value("I", &payload).unwrap(),
            Value::Primitive { value: PrimitiveValue::Int(-5) }
        );

        let mut payload = Vec::new();
        payload.extend_from_slice(&8u32.to_le_bytes());
        payload.extend_from_slice(&0x1_0000_0000i64.to_le_bytes());
        assert_eq!(
            decode_value("J", &payload).unwrap(),
            Value::Primitive { value: PrimitiveValue::Long(0x1_0000_0000) }
        );
    }

    #[test]
    fn test_decode_object_and_nulls() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&12u32.to_le_bytes());
        payload.extend_from_slice(&0x2000_0010u32.to_le_bytes());
        put_const_utf8(&mut payload, "[I");
        let value = decode_value("[I", &payload).unwrap();
        assert_eq!(
            value,
            Value::ObjectRef {
                handle: 0x2000_0010,
                type_name: "[I".to_string(),
                size: 12
            }
        );
        assert_eq!(value.array_length(), Some(3));
        assert_eq!(value.display(), "int[3]");

        // null local: plain 32-bit zero
        let mut payload = Vec::new();
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            decode_value("Ljava/lang/Object;", &payload).unwrap(),
            Value::NullRef { .. }
        ));

        // null field: size only
        let payload = 0u32.to_le_bytes();
        assert!(matches!(
            decode_value("LFoo;", &payload).unwrap(),
            Value::NullRef { .. }
        ));
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(element_size("Z"), 1);
        assert_eq!(element_size("C"), 2);
        assert_eq!(element_size("F"), 4);
        assert_eq!(element_size("D"), 8);
        assert_eq!(element_size("Ljava/lang/String;"), 4);
        assert_eq!(element_size("[I"), 4);
        assert_eq!(element_descriptor("[[J"), Some("[J"));
        assert_eq!(element_descriptor("J"), None);
    }

    #[test]
    fn test_simple_names() {
        assert_eq!(
            simple_type_names("I[Ljava/lang/String;J[[Z"),
            vec!["int", "String[]", "long", "boolean[][]"]
        );
        assert_eq!(simple_type_name("Lapp/Point;"), "Point");
        assert_eq!(class_name("Lapp/Point;"), Some("app/Point"));
        assert_eq!(class_name("[Lapp/Point;"), None);
    }

    #[test]
    fn test_method_display_name() {
        assert_eq!(
            method_display_name("demo/Main", "main", "([Ljava/lang/String;)V"),
            "Main.main(String[])"
        );
        assert_eq!(method_display_name("Main", "add", "(IJ)J"), "Main.add(int, long)");
        assert_eq!(method_display_name("Main", "run", "()V"), "Main.run()");
    }
}
