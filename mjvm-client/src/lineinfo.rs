// Line and variable locator
//
// Maps bytecode offsets to source lines and source lines back to
// breakpoint-eligible offsets using a method's LineNumberTable.

use crate::classfile::{ClassModel, LineNumberEntry, LocalVariableEntry, MethodInfo};
use crate::protocol::{DebugError, DebugResult};
use crate::symbols::SymbolTable;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A resolved code location
#[derive(Debug, Clone)]
pub struct LineInfo {
    pub pc: u32,
    pub line: u32,
    /// Bytes of bytecode from `pc` to the start of the next line entry
    pub run_length: u32,
    pub method_name: String,
    pub descriptor: String,
    pub class: Arc<ClassModel>,
    pub source_path: PathBuf,
}

impl LineInfo {
    pub fn class_name(&self) -> &str {
        &self.class.this_class
    }

    pub fn method(&self) -> Option<&MethodInfo> {
        self.class.method(&self.method_name, &self.descriptor)
    }

    /// Local variables whose scope covers this location
    pub fn live_locals(&self) -> Vec<LocalVariableEntry> {
        self.method()
            .map(|m| {
                m.local_variables()
                    .iter()
                    .filter(|v| v.is_live_at(self.pc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Identity used by the VM: class, method, descriptor and pc
    pub fn same_location(&self, other: &LineInfo) -> bool {
        self.pc == other.pc
            && self.method_name == other.method_name
            && self.descriptor == other.descriptor
            && self.class.this_class == other.class.this_class
    }
}

impl PartialEq for LineInfo {
    fn eq(&self, other: &Self) -> bool {
        self.same_location(other)
    }
}

impl Eq for LineInfo {}

/// A line-table hit before it is bound to a class and source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMatch {
    pub pc: u32,
    pub line: u32,
    pub run_length: u32,
}

fn run_length_at(table: &[LineNumberEntry], index: usize, pc: u32, code_length: u32) -> u32 {
    let end = table
        .get(index + 1)
        .map(|next| next.start_pc)
        .unwrap_or(code_length);
    end.saturating_sub(pc)
}

/// Greatest-start-pc entry at or below `pc`. The table is scanned from the
/// end since compilers emit it in ascending pc order.
pub fn locate_pc(table: &[LineNumberEntry], code_length: u32, pc: u32) -> Option<LineMatch> {
    table
        .iter()
        .enumerate()
        .rev()
        .find(|(_, entry)| entry.start_pc <= pc)
        .map(|(index, entry)| LineMatch {
            pc,
            line: entry.line,
            run_length: run_length_at(table, index, pc, code_length),
        })
}

/// First entry whose line is at or after `line`, scanning entries in line
/// order. Run length is measured against the entry's original pc-order
/// successor.
pub fn locate_line(table: &[LineNumberEntry], code_length: u32, line: u32) -> Option<LineMatch> {
    let mut sorted: Vec<(usize, &LineNumberEntry)> = table.iter().enumerate().collect();
    // stable, so equal lines keep their pc-table order
    sorted.sort_by_key(|(_, entry)| entry.line);

    let (_, last) = sorted.last()?;
    if last.line < line {
        return None;
    }
    sorted
        .into_iter()
        .find(|(_, entry)| entry.line >= line)
        .map(|(index, entry)| LineMatch {
            pc: entry.start_pc,
            line: entry.line,
            run_length: run_length_at(table, index, entry.start_pc, code_length),
        })
}

/// Map a pc inside `class.method(descriptor)` to its source line
pub fn line_for_pc(
    symbols: &mut SymbolTable,
    class_name: &str,
    method_name: &str,
    descriptor: &str,
    pc: u32,
) -> DebugResult<LineInfo> {
    let class = symbols.resolve(class_name)?;
    let source_path = symbols.source_path(&class.this_class)?;
    let method = class.find_method(method_name, descriptor)?;

    let hit = locate_pc(method.line_numbers(), method.code_length(), pc).ok_or_else(|| {
        DebugError::SourceUnresolvable(format!(
            "{}.{}{} has no line for pc {}",
            class.this_class, method_name, descriptor, pc
        ))
    })?;

    Ok(LineInfo {
        pc: hit.pc,
        line: hit.line,
        run_length: hit.run_length,
        method_name: method_name.to_string(),
        descriptor: descriptor.to_string(),
        class: class.clone(),
        source_path,
    })
}

/// Map a source line to the closest executable location at or after it.
/// Among all methods covering the line, the one with the nearest executable
/// line wins; ties go to the method declared first.
pub fn pc_for_line(symbols: &mut SymbolTable, source: &Path, line: u32) -> DebugResult<LineInfo> {
    let class_name = symbols
        .paths()
        .class_name_for_source(source)
        .ok_or_else(|| DebugError::SourceUnresolvable(source.display().to_string()))?;
    let class = symbols.resolve(&class_name)?;
    let source_path = symbols.source_path(&class.this_class)?;

    let mut best: Option<(&MethodInfo, LineMatch)> = None;
    for method in &class.methods {
        let Some(code) = &method.code else { continue };
        let Some(hit) = locate_line(&code.line_numbers, code.code.len() as u32, line) else {
            continue;
        };
        if best.map_or(true, |(_, current)| hit.line < current.line) {
            best = Some((method, hit));
        }
    }

    let (method, hit) = best.ok_or_else(|| DebugError::LineNotExecutable {
        file: source.display().to_string(),
        line,
    })?;

    Ok(LineInfo {
        pc: hit.pc,
        line: hit.line,
        run_length: hit.run_length,
        method_name: method.name.clone(),
        descriptor: method.descriptor.clone(),
        class: class.clone(),
        source_path,
    })
}
