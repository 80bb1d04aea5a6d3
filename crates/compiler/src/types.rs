//! Data type model
//!
//! Types are uniqued into a program-owned pool and referred to by
//! [`DataTypeId`] index rather than shared pointers, following the
//! arena-and-index discipline used for [`crate::ast::NodeId`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::scope::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataTypeId(pub u32);

bitflags! {
    /// Qualifier bits attached to a type reference, not the type itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Qualifiers: u32 {
        const CONST     = 1 << 0;
        const REFERENCE = 1 << 1;
        const NOCOPY    = 1 << 2;
        const TRANSIENT = 1 << 3;
    }
}

/// A type reference: which [`DataType`] plus qualifier bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QDataType {
    pub ty: DataTypeId,
    pub qualifiers: Qualifiers,
}

impl QDataType {
    pub fn new(ty: DataTypeId) -> Self {
        QDataType {
            ty,
            qualifiers: Qualifiers::empty(),
        }
    }

    pub fn is_const(self) -> bool {
        self.qualifiers.contains(Qualifiers::CONST)
    }
}

/// Kind discriminant for every elementary and composite type the front
/// end models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTypeKind {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Char,
    F32,
    F64,
    Name,
    String,
    Enum,
    Struct,
    Class,
    StaticArray,
    DynamicArray,
    ArrayRef,
    FuncPtr,
    Delegate,
    RawPtr,
    StrongPtr,
    WeakPtr,
}

impl DataTypeKind {
    pub fn is_elementary(self) -> bool {
        matches!(
            self,
            DataTypeKind::Void
                | DataTypeKind::Bool
                | DataTypeKind::I8
                | DataTypeKind::U8
                | DataTypeKind::I16
                | DataTypeKind::U16
                | DataTypeKind::I32
                | DataTypeKind::U32
                | DataTypeKind::I64
                | DataTypeKind::U64
                | DataTypeKind::Char
                | DataTypeKind::F32
                | DataTypeKind::F64
                | DataTypeKind::Name
                | DataTypeKind::String
        )
    }

    pub fn is_pointerlike(self) -> bool {
        matches!(
            self,
            DataTypeKind::RawPtr | DataTypeKind::StrongPtr | DataTypeKind::WeakPtr
        )
    }

    pub fn is_composite(self) -> bool {
        matches!(
            self,
            DataTypeKind::Struct | DataTypeKind::Class | DataTypeKind::Enum
        )
    }

    /// Elementary size in bytes, or `None` for kinds whose size depends on
    /// layout (composites, arrays).
    pub fn elementary_size(self) -> Option<u32> {
        match self {
            DataTypeKind::Void => Some(0),
            DataTypeKind::Bool | DataTypeKind::I8 | DataTypeKind::U8 | DataTypeKind::Char => {
                Some(1)
            }
            DataTypeKind::I16 | DataTypeKind::U16 => Some(2),
            DataTypeKind::I32 | DataTypeKind::U32 | DataTypeKind::F32 | DataTypeKind::Name => {
                Some(4)
            }
            DataTypeKind::I64 | DataTypeKind::U64 | DataTypeKind::F64 => Some(8),
            DataTypeKind::String
            | DataTypeKind::RawPtr
            | DataTypeKind::StrongPtr
            | DataTypeKind::WeakPtr => Some(8),
            _ => None,
        }
    }
}

/// A member field of a struct/class.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub qtype: QDataType,
    pub offset: u32,
    pub bit_offset: Option<(u8, u8)>,
}

/// One entry in the program's type pool.
#[derive(Debug, Clone)]
pub struct DataType {
    pub kind: DataTypeKind,
    pub name: String,
    pub size: u32,
    pub align: u32,
    /// Element type for arrays/ptrs/delegates; `None` otherwise.
    pub elem_type: Option<QDataType>,
    /// Fixed dimensions for `StaticArray`.
    pub array_dims: Vec<u32>,
    pub members: Vec<Member>,
    /// Destructor function node, if the composite has a nontrivial one.
    pub fun_dtor: Option<crate::ast::NodeId>,
    /// Scope holding this composite's member declarations.
    pub struct_scope: Option<ScopeId>,
    /// Stable index into the program's type table, assigned once uniqued.
    pub type_index: u32,
}

impl DataType {
    fn elementary(kind: DataTypeKind, name: &str) -> Self {
        DataType {
            kind,
            name: name.to_string(),
            size: kind.elementary_size().unwrap_or(0),
            align: kind.elementary_size().unwrap_or(1).max(1),
            elem_type: None,
            array_dims: Vec::new(),
            members: Vec::new(),
            fun_dtor: None,
            struct_scope: None,
            type_index: 0,
        }
    }
}

/// Program-owned, uniquing type pool.
#[derive(Debug, Default)]
pub struct TypePool {
    types: Vec<DataType>,
    elementary_cache: HashMap<DataTypeKind, DataTypeId>,
    composite_cache: HashMap<String, DataTypeId>,
    array_cache: HashMap<(DataTypeId, Qualifiers, Vec<u32>), DataTypeId>,
    ptr_cache: HashMap<(DataTypeKind, DataTypeId, Qualifiers), DataTypeId>,
}

impl TypePool {
    pub fn new() -> Self {
        let mut pool = TypePool::default();
        for (kind, name) in [
            (DataTypeKind::Void, "void"),
            (DataTypeKind::Bool, "bool"),
            (DataTypeKind::I8, "sbyte"),
            (DataTypeKind::U8, "byte"),
            (DataTypeKind::I16, "short"),
            (DataTypeKind::U16, "ushort"),
            (DataTypeKind::I32, "int"),
            (DataTypeKind::U32, "uint"),
            (DataTypeKind::I64, "long"),
            (DataTypeKind::U64, "ulong"),
            (DataTypeKind::Char, "char"),
            (DataTypeKind::F32, "float"),
            (DataTypeKind::F64, "double"),
            (DataTypeKind::Name, "name"),
            (DataTypeKind::String, "string"),
        ] {
            pool.intern_elementary(kind, name);
        }
        pool
    }

    fn push(&mut self, mut dt: DataType) -> DataTypeId {
        let id = DataTypeId(self.types.len() as u32);
        dt.type_index = id.0;
        self.types.push(dt);
        id
    }

    fn intern_elementary(&mut self, kind: DataTypeKind, name: &str) -> DataTypeId {
        if let Some(&id) = self.elementary_cache.get(&kind) {
            return id;
        }
        let id = self.push(DataType::elementary(kind, name));
        self.elementary_cache.insert(kind, id);
        id
    }

    pub fn elementary(&mut self, kind: DataTypeKind) -> DataTypeId {
        self.elementary_cache
            .get(&kind)
            .copied()
            .unwrap_or_else(|| self.intern_elementary(kind, "<elementary>"))
    }

    pub fn get(&self, id: DataTypeId) -> &DataType {
        &self.types[id.0 as usize]
    }

    /// Declares a new named composite (struct/class/enum). Composites are
    /// keyed by name since Lethe forbids duplicate top-level definitions
    /// within one namespace (enforced at the name-resolution layer, spec
    /// §4.6), not by structural identity.
    pub fn declare_composite(&mut self, kind: DataTypeKind, name: &str) -> DataTypeId {
        if let Some(&id) = self.composite_cache.get(name) {
            return id;
        }
        let id = self.push(DataType {
            kind,
            name: name.to_string(),
            size: 0,
            align: 1,
            elem_type: None,
            array_dims: Vec::new(),
            members: Vec::new(),
            fun_dtor: None,
            struct_scope: None,
            type_index: 0,
        });
        self.composite_cache.insert(name.to_string(), id);
        id
    }

    /// Looks up an already-declared composite by name without creating
    /// one, for resolving a user type name written in source to the
    /// `DataTypeId` `predeclare` reserved for it.
    pub fn lookup_composite(&self, name: &str) -> Option<DataTypeId> {
        self.composite_cache.get(name).copied()
    }

    pub fn set_members(&mut self, id: DataTypeId, members: Vec<Member>, size: u32, align: u32) {
        let dt = &mut self.types[id.0 as usize];
        dt.members = members;
        dt.size = size;
        dt.align = align;
    }

    /// Records the scope holding a composite's member declarations, so
    /// `resolve_member` can look a field up by name before `gen_composite`
    /// has laid out (or even run for) its member table.
    pub fn set_struct_scope(&mut self, id: DataTypeId, scope: ScopeId) {
        self.types[id.0 as usize].struct_scope = Some(scope);
    }

    pub fn static_array(&mut self, elem: QDataType, dims: Vec<u32>) -> DataTypeId {
        let key = (elem.ty, elem.qualifiers, dims.clone());
        if let Some(&id) = self.array_cache.get(&key) {
            return id;
        }
        let elem_size = self.get(elem.ty).size;
        let count: u32 = dims.iter().product();
        let align = self.get(elem.ty).align;
        let id = self.push(DataType {
            kind: DataTypeKind::StaticArray,
            name: format!("{}[{}]", self.get(elem.ty).name, count),
            size: elem_size * count,
            align,
            elem_type: Some(elem),
            array_dims: dims.clone(),
            members: Vec::new(),
            fun_dtor: None,
            struct_scope: None,
            type_index: 0,
        });
        self.array_cache.insert(key, id);
        id
    }

    /// Dynamic array: a growable-array value type, lowered as a
    /// `{ptr, size, capacity}` descriptor.
    pub fn dynamic_array(&mut self, elem: QDataType) -> DataTypeId {
        self.pointerlike(DataTypeKind::DynamicArray, elem)
    }

    pub fn array_ref(&mut self, elem: QDataType) -> DataTypeId {
        self.pointerlike(DataTypeKind::ArrayRef, elem)
    }

    pub fn raw_ptr(&mut self, pointee: QDataType) -> DataTypeId {
        self.pointerlike(DataTypeKind::RawPtr, pointee)
    }

    pub fn strong_ptr(&mut self, pointee: QDataType) -> DataTypeId {
        self.pointerlike(DataTypeKind::StrongPtr, pointee)
    }

    pub fn weak_ptr(&mut self, pointee: QDataType) -> DataTypeId {
        self.pointerlike(DataTypeKind::WeakPtr, pointee)
    }

    fn pointerlike(&mut self, kind: DataTypeKind, elem: QDataType) -> DataTypeId {
        let key = (kind, elem.ty, elem.qualifiers);
        if let Some(&id) = self.ptr_cache.get(&key) {
            return id;
        }
        let name = match kind {
            DataTypeKind::RawPtr => format!("raw {}*", self.get(elem.ty).name),
            DataTypeKind::StrongPtr => format!("{}*", self.get(elem.ty).name),
            DataTypeKind::WeakPtr => format!("weak {}*", self.get(elem.ty).name),
            DataTypeKind::DynamicArray => format!("array<{}>", self.get(elem.ty).name),
            DataTypeKind::ArrayRef => format!("{}[]", self.get(elem.ty).name),
            _ => self.get(elem.ty).name.clone(),
        };
        let id = self.push(DataType {
            kind,
            name,
            size: 8,
            align: 8,
            elem_type: Some(elem),
            array_dims: Vec::new(),
            members: Vec::new(),
            fun_dtor: None,
            struct_scope: None,
            type_index: 0,
        });
        self.ptr_cache.insert(key, id);
        id
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elementary_types_are_uniqued() {
        let mut pool = TypePool::new();
        let a = pool.elementary(DataTypeKind::I32);
        let b = pool.elementary(DataTypeKind::I32);
        assert_eq!(a, b);
        assert_ne!(a, pool.elementary(DataTypeKind::I64));
    }

    #[test]
    fn static_array_size_is_elem_times_dims() {
        let mut pool = TypePool::new();
        let i32_ty = QDataType::new(pool.elementary(DataTypeKind::I32));
        let arr = pool.static_array(i32_ty, vec![4, 2]);
        assert_eq!(pool.get(arr).size, 32);
    }

    #[test]
    fn strong_and_weak_ptr_to_same_target_are_distinct() {
        let mut pool = TypePool::new();
        let cls = pool.declare_composite(DataTypeKind::Class, "Foo");
        let q = QDataType::new(cls);
        let strong = pool.strong_ptr(q);
        let weak = pool.weak_ptr(q);
        assert_ne!(strong, weak);
    }

    #[test]
    fn composites_are_keyed_by_name_not_structure() {
        let mut pool = TypePool::new();
        let a = pool.declare_composite(DataTypeKind::Struct, "Point");
        let b = pool.declare_composite(DataTypeKind::Struct, "Point");
        assert_eq!(a, b);
    }

    #[test]
    fn qualifiers_are_independent_of_underlying_type_identity() {
        let mut pool = TypePool::new();
        let base = pool.elementary(DataTypeKind::I32);
        let plain = QDataType::new(base);
        let mut constant = QDataType::new(base);
        constant.qualifiers |= Qualifiers::CONST;
        assert_eq!(plain.ty, constant.ty);
        assert!(constant.is_const());
        assert!(!plain.is_const());
    }
}
