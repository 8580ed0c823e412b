// Symbol resolver
//
// Locates class and source files on disk, parses classes on first use and
// keeps them for the lifetime of the owning session.

use crate::classfile::{ClassModel, FieldInfo};
use crate::protocol::{DebugError, DebugResult};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Root of every class hierarchy; never loaded from disk
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// Search roots for class and source files
#[derive(Debug, Clone, Default)]
pub struct ClassPaths {
    pub workspace: PathBuf,
    pub sdk_class_path: Option<PathBuf>,
    pub sdk_source_path: Option<PathBuf>,
}

impl ClassPaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            sdk_class_path: None,
            sdk_source_path: None,
        }
    }

    /// `<name>.class` under the workspace, then under the SDK class path
    pub fn find_class_file(&self, class_name: &str) -> Option<PathBuf> {
        find_in(
            &self.workspace,
            self.sdk_class_path.as_deref(),
            &format!("{}.class", class_name),
        )
    }

    /// `<name>.java` under the workspace, then under the SDK source path
    pub fn find_source_file(&self, class_name: &str) -> Option<PathBuf> {
        find_in(
            &self.workspace,
            self.sdk_source_path.as_deref(),
            &format!("{}.java", class_name),
        )
    }

    /// Derive the internal class name from a `.java` path.
    /// Paths inside the workspace are made relative to it first.
    pub fn class_name_for_source(&self, source: &Path) -> Option<String> {
        let extension = source.extension()?.to_str()?;
        if !extension.eq_ignore_ascii_case("java") {
            return None;
        }
        let without_extension = source.with_extension("");
        let relative = without_extension
            .strip_prefix(&self.workspace)
            .unwrap_or(&without_extension);

        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/").replace('\\', "/"))
    }
}

fn find_in(workspace: &Path, fallback: Option<&Path>, relative: &str) -> Option<PathBuf> {
    let candidate = workspace.join(relative);
    if candidate.is_file() {
        return Some(candidate);
    }
    let candidate = fallback?.join(relative);
    candidate.is_file().then_some(candidate)
}

/// Class-name keyed cache of parsed classes
#[derive(Debug)]
pub struct SymbolTable {
    paths: ClassPaths,
    classes: HashMap<String, Arc<ClassModel>>,
    max_depth: usize,
}

impl SymbolTable {
    pub fn new(paths: ClassPaths, max_depth: usize) -> Self {
        Self {
            paths,
            classes: HashMap::new(),
            max_depth,
        }
    }

    pub fn paths(&self) -> &ClassPaths {
        &self.paths
    }

    /// Cached class, or locate, parse and cache it
    pub fn resolve(&mut self, class_name: &str) -> DebugResult<Arc<ClassModel>> {
        let class_name = class_name.replace('\\', "/");
        if let Some(model) = self.classes.get(&class_name) {
            return Ok(model.clone());
        }

        let path = self
            .paths
            .find_class_file(&class_name)
            .ok_or_else(|| DebugError::ClassNotFound(class_name.clone()))?;
        let bytes = std::fs::read(&path)?;
        let model = Arc::new(ClassModel::parse(&bytes)?);
        debug!(
            "Loaded class {} from {} ({} methods)",
            class_name,
            path.display(),
            model.methods.len()
        );

        self.classes.insert(class_name, model.clone());
        Ok(model)
    }

    /// Register an already parsed class
    pub fn insert(&mut self, model: ClassModel) -> Arc<ClassModel> {
        let model = Arc::new(model);
        self.classes.insert(model.this_class.clone(), model.clone());
        model
    }

    pub fn is_loaded(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    /// Source file for a class, as reported to the host
    pub fn source_path(&self, class_name: &str) -> DebugResult<PathBuf> {
        self.paths
            .find_source_file(class_name)
            .ok_or_else(|| DebugError::SourceUnresolvable(class_name.to_string()))
    }

    /// Walk the superclass chain looking for `ancestor`
    pub fn is_subclass_of(&mut self, class: &ClassModel, ancestor: &str) -> DebugResult<bool> {
        if class.this_class == ancestor {
            return Ok(true);
        }
        let mut next = class.super_class.clone();
        let mut depth = 0;
        while let Some(name) = next {
            if name == ancestor {
                return Ok(true);
            }
            if name == OBJECT_CLASS {
                return Ok(false);
            }
            depth += 1;
            if depth > self.max_depth {
                return Err(DebugError::HierarchyTooDeep(
                    class.this_class.clone(),
                    self.max_depth,
                ));
            }
            next = self.resolve(&name)?.super_class.clone();
        }
        Ok(false)
    }

    /// Ancestor fields (outermost first) followed by the class's own fields.
    /// A name declared again lower in the chain replaces the inherited entry
    /// in place, so each name appears once with its most-derived declaration.
    pub fn fields_including_inherited(&mut self, class: &ClassModel) -> DebugResult<Vec<FieldInfo>> {
        let mut chain = vec![class.fields.clone()];
        let mut next = class.super_class.clone();
        while let Some(name) = next {
            if name == OBJECT_CLASS {
                break;
            }
            if chain.len() > self.max_depth {
                return Err(DebugError::HierarchyTooDeep(
                    class.this_class.clone(),
                    self.max_depth,
                ));
            }
            let parent = self.resolve(&name)?;
            chain.push(parent.fields.clone());
            next = parent.super_class.clone();
        }

        let mut fields: Vec<FieldInfo> = Vec::new();
        for declared in chain.into_iter().rev() {
            for field in declared {
                match fields.iter_mut().find(|f| f.name == field.name) {
                    Some(existing) => *existing = field,
                    None => fields.push(field),
                }
            }
        }
        Ok(fields)
    }

    /// Resolve a field by name, preferring the most-derived declaration
    pub fn find_field(&mut self, class: &ClassModel, name: &str) -> DebugResult<Option<FieldInfo>> {
        Ok(self
            .fields_including_inherited(class)?
            .into_iter()
            .find(|f| f.name == name))
    }
}
