//! Process-wide type table with on-demand construction
//!
//! Readers only ever see the published table. Construction happens in a
//! builder arena guarded by the construction lock: new types are staged
//! there, possibly referring to each other, and the whole batch is published
//! in one write. A failed batch is discarded without touching the table.
//!
//! Lock order is always builder, then table.

use super::{ElementType, LayoutKind, TypeDesc, TypeHandle, TypeLayout, TypeResolver};
use crate::error::{FuncEvalError, FuncEvalResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};

/// Nesting bound for construction, guards against runaway recursion
const MAX_BUILD_DEPTH: usize = 32;

/// First identifier handed out; small values stay free for "no type"
const FIRST_HANDLE: u64 = 0x100;

/// Whether instances are values or references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    /// Value type laid out from its fields
    Struct,
    /// Reference type, passed as an object reference
    Class,
}

/// A named type registered with the loader
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    name: String,
    kind: DefinitionKind,
    generic_arity: u32,
    fields: Vec<TypeDesc>,
}

impl TypeDefinition {
    /// Non-generic value type
    pub fn structure(name: impl Into<String>, fields: Vec<TypeDesc>) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionKind::Struct,
            generic_arity: 0,
            fields,
        }
    }

    /// Generic value type; fields use `TypeDesc::Variable` for parameters
    pub fn generic_structure(name: impl Into<String>, arity: u32, fields: Vec<TypeDesc>) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionKind::Struct,
            generic_arity: arity,
            fields,
        }
    }

    /// Reference type
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionKind::Class,
            generic_arity: 0,
            fields: Vec::new(),
        }
    }

    /// Generic reference type
    pub fn generic_class(name: impl Into<String>, arity: u32) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionKind::Class,
            generic_arity: arity,
            fields: Vec::new(),
        }
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of generic parameters
    pub fn generic_arity(&self) -> u32 {
        self.generic_arity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Primitive(ElementType),
    Definition(u64),
    Instantiation(TypeHandle, Vec<TypeHandle>),
    Array(TypeHandle),
    Pointer(TypeHandle),
}

#[derive(Debug, Clone)]
struct TypeEntry {
    name: String,
    /// `None` for open generic definitions and for staged types whose layout
    /// is still being computed
    layout: Option<TypeLayout>,
    definition: Option<Arc<TypeDefinition>>,
}

#[derive(Debug, Default)]
struct TypeTable {
    entries: HashMap<TypeHandle, TypeEntry>,
    by_key: HashMap<TypeKey, TypeHandle>,
}

/// Pending type-build state, only reachable through the construction lock
#[derive(Debug, Default)]
struct BuilderArena {
    staged: Vec<(TypeHandle, TypeKey, TypeEntry)>,
    staged_keys: HashMap<TypeKey, usize>,
}

impl BuilderArena {
    /// Drop anything left over from an abandoned build
    fn flush(&mut self) {
        if !self.staged.is_empty() {
            trace!(discarded = self.staged.len(), "flushing staged types");
        }
        self.staged.clear();
        self.staged_keys.clear();
    }

    fn staged_entry(&self, handle: TypeHandle) -> Option<&TypeEntry> {
        self.staged
            .iter()
            .find(|(h, _, _)| *h == handle)
            .map(|(_, _, entry)| entry)
    }
}

/// Concrete [`TypeResolver`] owning the process type table
#[derive(Debug)]
pub struct TypeLoader {
    table: RwLock<TypeTable>,
    builder: Mutex<BuilderArena>,
    primitives: HashMap<ElementType, TypeHandle>,
    next_handle: AtomicU64,
    constructed: AtomicUsize,
}

impl TypeLoader {
    /// Create a loader with every built-in element type registered
    pub fn new() -> Self {
        let mut table = TypeTable::default();
        let mut primitives = HashMap::new();
        let mut next = FIRST_HANDLE;

        for element in ElementType::ALL {
            let handle = TypeHandle::from_raw(next);
            next += 1;
            table.entries.insert(
                handle,
                TypeEntry {
                    name: element.name().to_string(),
                    layout: Some(element.layout()),
                    definition: None,
                },
            );
            table.by_key.insert(TypeKey::Primitive(element), handle);
            primitives.insert(element, handle);
        }

        Self {
            table: RwLock::new(table),
            builder: Mutex::new(BuilderArena::default()),
            primitives,
            next_handle: AtomicU64::new(next),
            constructed: AtomicUsize::new(0),
        }
    }

    /// Handle of a built-in element type
    pub fn primitive(&self, element: ElementType) -> TypeHandle {
        self.primitives[&element]
    }

    /// Register a named type and return its handle
    pub fn define(&self, definition: TypeDefinition) -> FuncEvalResult<TypeHandle> {
        let definition = Arc::new(definition);
        self.with_builder(|loader, arena, table| {
            let handle = loader.allocate();
            let key = TypeKey::Definition(handle.raw());
            let index = stage(
                arena,
                handle,
                key,
                TypeEntry {
                    name: definition.name.clone(),
                    layout: None,
                    definition: Some(definition.clone()),
                },
            );

            if definition.generic_arity == 0 {
                let layout = match definition.kind {
                    DefinitionKind::Class => TypeLayout::reference(),
                    DefinitionKind::Struct => {
                        loader.struct_layout(arena, table, &definition.fields, &[], 0)?
                    }
                };
                arena.staged[index].2.layout = Some(layout);
            }
            Ok(handle)
        })
    }

    fn allocate(&self) -> TypeHandle {
        TypeHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Run `build` with the construction lock held, then publish or discard
    fn with_builder<T, F>(&self, build: F) -> FuncEvalResult<T>
    where
        F: FnOnce(&Self, &mut BuilderArena, &TypeTable) -> FuncEvalResult<T>,
    {
        // A panic mid-build leaves only staged state behind, which the flush
        // below throws away.
        let mut arena = self.builder.lock().unwrap_or_else(|e| e.into_inner());
        arena.flush();

        let result = {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            build(self, &mut *arena, &*table)
        };

        match result {
            Ok(value) => {
                let staged = std::mem::take(&mut arena.staged);
                arena.staged_keys.clear();
                if !staged.is_empty() {
                    let count = staged.len();
                    let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
                    for (handle, key, entry) in staged {
                        table.by_key.insert(key, handle);
                        table.entries.insert(handle, entry);
                    }
                    self.constructed.fetch_add(count, Ordering::AcqRel);
                    debug!(count, "published constructed types");
                }
                Ok(value)
            }
            Err(err) => {
                arena.flush();
                Err(err)
            }
        }
    }

    fn entry<'a>(
        table: &'a TypeTable,
        arena: &'a BuilderArena,
        handle: TypeHandle,
    ) -> Option<&'a TypeEntry> {
        table
            .entries
            .get(&handle)
            .or_else(|| arena.staged_entry(handle))
    }

    fn lookup(table: &TypeTable, desc: &TypeDesc) -> Option<TypeHandle> {
        match desc {
            TypeDesc::Primitive(e) => table.by_key.get(&TypeKey::Primitive(*e)).copied(),
            TypeDesc::Handle(h) => table.entries.contains_key(h).then_some(*h),
            TypeDesc::Array(inner) => {
                let element = Self::lookup(table, inner)?;
                table.by_key.get(&TypeKey::Array(element)).copied()
            }
            TypeDesc::Pointer(inner) => {
                let element = Self::lookup(table, inner)?;
                table.by_key.get(&TypeKey::Pointer(element)).copied()
            }
            TypeDesc::Instantiation {
                definition,
                arguments,
            } => {
                let definition = Self::lookup(table, definition)?;
                let arguments = arguments
                    .iter()
                    .map(|a| Self::lookup(table, a))
                    .collect::<Option<Vec<_>>>()?;
                table
                    .by_key
                    .get(&TypeKey::Instantiation(definition, arguments))
                    .copied()
            }
            TypeDesc::ByRef(_) | TypeDesc::Variable { .. } => None,
        }
    }

    /// Find or stage the type for `key`; `make` fills in the entry
    fn intern<F>(
        &self,
        arena: &mut BuilderArena,
        table: &TypeTable,
        key: TypeKey,
        name: String,
        make: F,
    ) -> FuncEvalResult<TypeHandle>
    where
        F: FnOnce(&Self, &mut BuilderArena, &TypeTable) -> FuncEvalResult<TypeLayout>,
    {
        if let Some(handle) = table.by_key.get(&key) {
            return Ok(*handle);
        }
        if let Some(index) = arena.staged_keys.get(&key) {
            return Ok(arena.staged[*index].0);
        }

        // Staged before its layout exists so that types referring back to it
        // through a reference can finish.
        let handle = self.allocate();
        let index = stage(
            arena,
            handle,
            key,
            TypeEntry {
                name,
                layout: None,
                definition: None,
            },
        );
        trace!(%handle, name = %arena.staged[index].2.name, "staging type");

        let layout = make(self, arena, table)?;
        arena.staged[index].2.layout = Some(layout);
        Ok(handle)
    }

    fn build(
        &self,
        arena: &mut BuilderArena,
        table: &TypeTable,
        desc: &TypeDesc,
        depth: usize,
    ) -> FuncEvalResult<TypeHandle> {
        if depth > MAX_BUILD_DEPTH {
            return Err(FuncEvalError::unresolved(format!(
                "type nesting deeper than {} while building {}",
                MAX_BUILD_DEPTH, desc
            )));
        }

        match desc {
            TypeDesc::Primitive(e) => Ok(self.primitive(*e)),
            TypeDesc::Handle(h) => match Self::entry(table, arena, *h) {
                Some(_) => Ok(*h),
                None => Err(FuncEvalError::unresolved(format!("unknown type {}", h))),
            },
            TypeDesc::Array(inner) => {
                let element = self.build_element(arena, table, inner, depth)?;
                let name = format!("{}[]", self.name_of(table, arena, element));
                self.intern(arena, table, TypeKey::Array(element), name, |_, _, _| {
                    Ok(TypeLayout::reference())
                })
            }
            TypeDesc::Pointer(inner) => {
                let element = self.build_element(arena, table, inner, depth)?;
                let name = format!("*{}", self.name_of(table, arena, element));
                self.intern(arena, table, TypeKey::Pointer(element), name, |_, _, _| {
                    Ok(TypeLayout::pointer())
                })
            }
            TypeDesc::ByRef(inner) => Err(FuncEvalError::unresolved(format!(
                "by-ref type &{} cannot be materialized",
                inner
            ))),
            TypeDesc::Variable { index, method } => Err(FuncEvalError::unresolved(format!(
                "{} type variable {} has no instantiation in a func-eval context",
                if *method { "method" } else { "type" },
                index
            ))),
            TypeDesc::Instantiation {
                definition,
                arguments,
            } => self.build_instantiation(arena, table, definition, arguments, depth),
        }
    }

    fn build_element(
        &self,
        arena: &mut BuilderArena,
        table: &TypeTable,
        desc: &TypeDesc,
        depth: usize,
    ) -> FuncEvalResult<TypeHandle> {
        let handle = self.build(arena, table, desc, depth + 1)?;
        let entry = Self::entry(table, arena, handle);
        if entry.is_some_and(|e| e.definition.as_ref().is_some_and(|d| d.generic_arity > 0)) {
            return Err(FuncEvalError::unresolved(format!(
                "open generic type {} used as a type argument",
                desc
            )));
        }
        if handle == self.primitive(ElementType::Void) {
            return Err(FuncEvalError::unresolved(format!(
                "void is not a valid element type in {}",
                desc
            )));
        }
        Ok(handle)
    }

    fn build_instantiation(
        &self,
        arena: &mut BuilderArena,
        table: &TypeTable,
        definition: &TypeDesc,
        arguments: &[TypeDesc],
        depth: usize,
    ) -> FuncEvalResult<TypeHandle> {
        let def_handle = self.build(arena, table, definition, depth + 1)?;
        let def = Self::entry(table, arena, def_handle)
            .and_then(|e| e.definition.clone())
            .filter(|d| d.generic_arity > 0)
            .ok_or_else(|| {
                FuncEvalError::unresolved(format!("{} is not a generic type definition", definition))
            })?;

        if def.generic_arity as usize != arguments.len() {
            return Err(FuncEvalError::unresolved(format!(
                "{} expects {} type arguments, got {}",
                def.name,
                def.generic_arity,
                arguments.len()
            )));
        }

        let mut argument_handles = Vec::with_capacity(arguments.len());
        for argument in arguments {
            argument_handles.push(self.build_element(arena, table, argument, depth)?);
        }

        let name = format!(
            "{}<{}>",
            def.name,
            argument_handles
                .iter()
                .map(|h| self.name_of(table, arena, *h))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let resolved_arguments: Vec<TypeDesc> =
            argument_handles.iter().map(|h| TypeDesc::Handle(*h)).collect();

        self.intern(
            arena,
            table,
            TypeKey::Instantiation(def_handle, argument_handles),
            name,
            |loader, arena, table| match def.kind {
                DefinitionKind::Class => Ok(TypeLayout::reference()),
                DefinitionKind::Struct => {
                    loader.struct_layout(arena, table, &def.fields, &resolved_arguments, depth + 1)
                }
            },
        )
    }

    fn struct_layout(
        &self,
        arena: &mut BuilderArena,
        table: &TypeTable,
        fields: &[TypeDesc],
        arguments: &[TypeDesc],
        depth: usize,
    ) -> FuncEvalResult<TypeLayout> {
        let mut layouts = Vec::with_capacity(fields.len());
        for field in fields {
            let field = field.substitute(arguments);
            let handle = self.build(arena, table, &field, depth + 1)?;
            let layout = Self::entry(table, arena, handle)
                .and_then(|e| e.layout.clone())
                .ok_or_else(|| {
                    FuncEvalError::unresolved(format!(
                        "field of type {} has no layout (a struct cannot contain itself)",
                        field
                    ))
                })?;
            if layout.kind == LayoutKind::Void {
                return Err(FuncEvalError::unresolved("struct field of type void"));
            }
            layouts.push(layout);
        }
        Ok(TypeLayout::structure(layouts))
    }

    fn name_of(&self, table: &TypeTable, arena: &BuilderArena, handle: TypeHandle) -> String {
        Self::entry(table, arena, handle)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| handle.to_string())
    }
}

fn stage(arena: &mut BuilderArena, handle: TypeHandle, key: TypeKey, entry: TypeEntry) -> usize {
    let index = arena.staged.len();
    arena.staged_keys.insert(key.clone(), index);
    arena.staged.push((handle, key, entry));
    index
}

impl Default for TypeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeResolver for TypeLoader {
    fn try_resolve(&self, desc: &TypeDesc) -> Option<TypeHandle> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        Self::lookup(&table, desc)
    }

    fn resolve_or_construct(&self, batch: &[TypeDesc]) -> FuncEvalResult<Vec<TypeHandle>> {
        debug!(batch = batch.len(), "resolving type batch under construction lock");
        self.with_builder(|loader, arena, table| {
            batch
                .iter()
                .map(|desc| loader.build(arena, table, desc, 0))
                .collect()
        })
    }

    fn layout(&self, handle: TypeHandle) -> Option<TypeLayout> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.entries.get(&handle).and_then(|e| e.layout.clone())
    }

    fn type_name(&self, handle: TypeHandle) -> Option<String> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.entries.get(&handle).map(|e| e.name.clone())
    }

    fn constructed_count(&self) -> usize {
        self.constructed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::POINTER_SIZE;

    fn var(index: u32) -> TypeDesc {
        TypeDesc::Variable {
            index,
            method: false,
        }
    }

    fn prim(e: ElementType) -> TypeDesc {
        TypeDesc::Primitive(e)
    }

    #[test]
    fn test_primitives_resolve_directly() {
        let loader = TypeLoader::new();
        for element in ElementType::ALL {
            assert_eq!(
                loader.try_resolve(&prim(element)),
                Some(loader.primitive(element))
            );
        }
        assert_eq!(loader.constructed_count(), 0);
    }

    #[test]
    fn test_define_struct_layout() {
        let loader = TypeLoader::new();
        let point = loader
            .define(TypeDefinition::structure(
                "Point",
                vec![prim(ElementType::I4), prim(ElementType::I4)],
            ))
            .unwrap();

        let layout = loader.layout(point).unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(loader.type_name(point).as_deref(), Some("Point"));
    }

    #[test]
    fn test_array_needs_construction_once() {
        let loader = TypeLoader::new();
        let desc = TypeDesc::Array(Box::new(prim(ElementType::I4)));

        assert_eq!(loader.try_resolve(&desc), None);
        let built = loader.resolve_or_construct(&[desc.clone()]).unwrap();
        assert_eq!(loader.try_resolve(&desc), Some(built[0]));
        assert_eq!(loader.type_name(built[0]).as_deref(), Some("i32[]"));
    }

    #[test]
    fn test_generic_struct_instantiation_layout() {
        let loader = TypeLoader::new();
        let pair = loader
            .define(TypeDefinition::generic_structure(
                "Pair",
                2,
                vec![var(0), var(1)],
            ))
            .unwrap();
        assert_eq!(loader.layout(pair), None);

        let desc = TypeDesc::Instantiation {
            definition: Box::new(TypeDesc::Handle(pair)),
            arguments: vec![prim(ElementType::U1), prim(ElementType::I8)],
        };
        let handle = loader.resolve_or_construct(&[desc]).unwrap()[0];
        let layout = loader.layout(handle).unwrap();

        assert_eq!(layout.size, 16);
        assert_eq!(layout.align, 8);
        assert_eq!(loader.type_name(handle).as_deref(), Some("Pair<u8, i64>"));
    }

    #[test]
    fn test_arity_mismatch() {
        let loader = TypeLoader::new();
        let list = loader.define(TypeDefinition::generic_class("List", 1)).unwrap();
        let desc = TypeDesc::Instantiation {
            definition: Box::new(TypeDesc::Handle(list)),
            arguments: vec![prim(ElementType::I4), prim(ElementType::I4)],
        };

        let err = loader.resolve_or_construct(&[desc]).unwrap_err();
        assert!(matches!(err, FuncEvalError::SignatureResolutionFailed { .. }));
    }

    #[test]
    fn test_struct_with_reference_fields() {
        let loader = TypeLoader::new();
        let holder = loader
            .define(TypeDefinition::structure(
                "Holder",
                vec![
                    prim(ElementType::U1),
                    TypeDesc::Array(Box::new(prim(ElementType::String))),
                ],
            ))
            .unwrap();

        let layout = loader.layout(holder).unwrap();
        assert_eq!(layout.size, 2 * POINTER_SIZE);
        // The field's array type was built alongside the definition.
        assert_eq!(loader.constructed_count(), 2);
    }

    #[test]
    fn test_generic_argument_must_be_closed() {
        let loader = TypeLoader::new();
        let list = loader.define(TypeDefinition::generic_class("List", 1)).unwrap();
        let desc = TypeDesc::Instantiation {
            definition: Box::new(TypeDesc::Handle(list)),
            arguments: vec![TypeDesc::Handle(list)],
        };
        let err = loader.resolve_or_construct(&[desc]).unwrap_err();
        assert!(err.to_string().contains("open generic"));
    }

    #[test]
    fn test_failed_batch_publishes_nothing() {
        let loader = TypeLoader::new();
        let good = TypeDesc::Array(Box::new(prim(ElementType::R8)));
        let bad = TypeDesc::Handle(TypeHandle::from_raw(0xdead));

        assert!(loader.resolve_or_construct(&[good.clone(), bad]).is_err());
        assert_eq!(loader.try_resolve(&good), None);
        assert_eq!(loader.constructed_count(), 0);
    }

    #[test]
    fn test_type_variable_rejected() {
        let loader = TypeLoader::new();
        let err = loader.resolve_or_construct(&[var(0)]).unwrap_err();
        assert!(err.to_string().contains("type variable 0"));
    }

    #[test]
    fn test_void_array_rejected() {
        let loader = TypeLoader::new();
        let desc = TypeDesc::Array(Box::new(prim(ElementType::Void)));
        assert!(loader.resolve_or_construct(&[desc]).is_err());
    }
}
