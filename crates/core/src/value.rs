//! The tagged value cell
//!
//! Every node in the tree stores exactly one `NodeValue`. A cell is either a
//! leaf (scalar or packed array) or a compound (`Map` / `List`); compounds
//! hold their children by `NodeId`, never by ownership, so the cell itself
//! is always plain data.
//!
//! Key behaviors:
//! - Kind-checked access: `get::<T>()` only answers when the stored kind
//!   matches `T` exactly; `try_set` refuses to change the kind.
//! - Idempotence signaling: setters report `SameAndNotChange` when the new
//!   value equals the stored one (floats within `FLOAT_EPSILON`, arrays
//!   elementwise), so callers can skip version bumps and replication.
//! - Generic widening: any integer kind reads as `i64`, any float kind as
//!   `f64`; generic writes clamp to the destination's representable range
//!   and never change the stored kind.

use crate::id::NodeId;
use crate::name::Name;
use crate::result::OpResult;
use crate::types::{
    Color, DateTime, Int64Vec2, Int64Vec3, IntVec2, IntVec3, ClassPath, ObjectPath, Rotator, Vec2,
    Vec3, nearly_equal_f32, nearly_equal_f64,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminant of a value cell. The numeric values are the wire tags and
/// must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeKind {
    Empty = 0,
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    Float32 = 6,
    Float64 = 7,
    Name = 8,
    String = 9,
    Color = 10,
    Guid = 11,
    ClassPath = 12,
    ObjectPath = 13,
    DateTime = 14,
    Rotator = 15,
    Vec2 = 16,
    Vec3 = 17,
    IntVec2 = 18,
    IntVec3 = 19,
    Int64Vec2 = 20,
    Int64Vec3 = 21,
    ArrayInt8 = 22,
    ArrayInt16 = 23,
    ArrayInt32 = 24,
    ArrayInt64 = 25,
    ArrayFloat32 = 26,
    ArrayFloat64 = 27,
    Map = 28,
    List = 29,
}

impl NodeKind {
    pub fn from_u8(tag: u8) -> Option<NodeKind> {
        use NodeKind::*;
        Some(match tag {
            0 => Empty,
            1 => Bool,
            2 => Int8,
            3 => Int16,
            4 => Int32,
            5 => Int64,
            6 => Float32,
            7 => Float64,
            8 => Name,
            9 => String,
            10 => Color,
            11 => Guid,
            12 => ClassPath,
            13 => ObjectPath,
            14 => DateTime,
            15 => Rotator,
            16 => Vec2,
            17 => Vec3,
            18 => IntVec2,
            19 => IntVec3,
            20 => Int64Vec2,
            21 => Int64Vec3,
            22 => ArrayInt8,
            23 => ArrayInt16,
            24 => ArrayInt32,
            25 => ArrayInt64,
            26 => ArrayFloat32,
            27 => ArrayFloat64,
            28 => Map,
            29 => List,
            _ => return None,
        })
    }

    pub fn is_compound(self) -> bool {
        matches!(self, NodeKind::Map | NodeKind::List)
    }

    pub fn is_array(self) -> bool {
        (self as u8) >= NodeKind::ArrayInt8 as u8 && (self as u8) <= NodeKind::ArrayFloat64 as u8
    }

    pub fn is_leaf(self) -> bool {
        !self.is_compound()
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Empty => "Empty",
            NodeKind::Bool => "Bool",
            NodeKind::Int8 => "Int8",
            NodeKind::Int16 => "Int16",
            NodeKind::Int32 => "Int32",
            NodeKind::Int64 => "Int64",
            NodeKind::Float32 => "Float32",
            NodeKind::Float64 => "Float64",
            NodeKind::Name => "Name",
            NodeKind::String => "String",
            NodeKind::Color => "Color",
            NodeKind::Guid => "Guid",
            NodeKind::ClassPath => "ClassPath",
            NodeKind::ObjectPath => "ObjectPath",
            NodeKind::DateTime => "DateTime",
            NodeKind::Rotator => "Rotator",
            NodeKind::Vec2 => "Vec2",
            NodeKind::Vec3 => "Vec3",
            NodeKind::IntVec2 => "IntVec2",
            NodeKind::IntVec3 => "IntVec3",
            NodeKind::Int64Vec2 => "Int64Vec2",
            NodeKind::Int64Vec3 => "Int64Vec3",
            NodeKind::ArrayInt8 => "ArrayInt8",
            NodeKind::ArrayInt16 => "ArrayInt16",
            NodeKind::ArrayInt32 => "ArrayInt32",
            NodeKind::ArrayInt64 => "ArrayInt64",
            NodeKind::ArrayFloat32 => "ArrayFloat32",
            NodeKind::ArrayFloat64 => "ArrayFloat64",
            NodeKind::Map => "Map",
            NodeKind::List => "List",
        }
    }
}

/// Ordered key -> child association of a `Map` node.
///
/// Backed by a vector: iteration order is insertion order, lookup scans.
/// Attribute maps are small and the wire format reproduces the order
/// byte-for-byte, so determinism wins over hash lookups here.
#[derive(Debug, Clone, Default)]
pub struct MapData {
    children: Vec<(Name, NodeId)>,
}

impl MapData {
    pub fn get(&self, key: &Name) -> Option<NodeId> {
        self.children
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, id)| *id)
    }

    pub fn contains_key(&self, key: &Name) -> bool {
        self.children.iter().any(|(k, _)| k == key)
    }

    /// Mutable access to the child handle stored under `key`.
    pub fn slot_mut(&mut self, key: &Name) -> Option<&mut NodeId> {
        self.children
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, id)| id)
    }

    /// Insert or replace; insertion order of new keys is preserved.
    pub fn insert(&mut self, key: Name, id: NodeId) {
        match self.slot_mut(&key) {
            Some(slot) => *slot = id,
            None => self.children.push((key, id)),
        }
    }

    pub fn remove(&mut self, key: &Name) -> Option<NodeId> {
        let pos = self.children.iter().position(|(k, _)| k == key)?;
        Some(self.children.remove(pos).1)
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Name, NodeId)> {
        self.children.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Name> {
        self.children.iter().map(|(k, _)| k)
    }
}

/// Ordered child sequence of a `List` node.
#[derive(Debug, Clone, Default)]
pub struct ListData {
    pub children: Vec<NodeId>,
}

impl ListData {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, index: i32) -> Option<NodeId> {
        if index < 0 {
            return None;
        }
        self.children.get(index as usize).copied()
    }

    pub fn is_valid_index(&self, index: i32) -> bool {
        index >= 0 && (index as usize) < self.children.len()
    }
}

/// A Rust type that can live in a leaf cell.
///
/// Ties each payload type to its `NodeKind` and supplies the equality used
/// for `SameAndNotChange` detection (tolerance-aware for floats).
pub trait CellScalar: Sized + Clone {
    const KIND: NodeKind;

    fn from_cell(cell: &NodeValue) -> Option<&Self>;
    fn into_cell(self) -> NodeValue;
    fn cell_eq(a: &Self, b: &Self) -> bool;
}

fn float_slice_eq_f32(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| nearly_equal_f32(*x, *y))
}

fn float_slice_eq_f64(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| nearly_equal_f64(*x, *y))
}

macro_rules! cell_scalar {
    ($ty:ty, $variant:ident) => {
        cell_scalar!($ty, $variant, |a: &$ty, b: &$ty| a == b);
    };
    ($ty:ty, $variant:ident, $eq:expr) => {
        impl CellScalar for $ty {
            const KIND: NodeKind = NodeKind::$variant;

            fn from_cell(cell: &NodeValue) -> Option<&Self> {
                match cell {
                    NodeValue::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_cell(self) -> NodeValue {
                NodeValue::$variant(self)
            }

            fn cell_eq(a: &Self, b: &Self) -> bool {
                ($eq)(a, b)
            }
        }
    };
}

cell_scalar!(bool, Bool);
cell_scalar!(i8, Int8);
cell_scalar!(i16, Int16);
cell_scalar!(i32, Int32);
cell_scalar!(i64, Int64);
cell_scalar!(f32, Float32, |a: &f32, b: &f32| nearly_equal_f32(*a, *b));
cell_scalar!(f64, Float64, |a: &f64, b: &f64| nearly_equal_f64(*a, *b));
cell_scalar!(Name, Name);
cell_scalar!(String, String);
cell_scalar!(Color, Color);
cell_scalar!(Uuid, Guid);
cell_scalar!(ClassPath, ClassPath);
cell_scalar!(ObjectPath, ObjectPath);
cell_scalar!(DateTime, DateTime);
cell_scalar!(Rotator, Rotator, |a: &Rotator, b: &Rotator| a.nearly_equals(b));
cell_scalar!(Vec2, Vec2, |a: &Vec2, b: &Vec2| a.nearly_equals(b));
cell_scalar!(Vec3, Vec3, |a: &Vec3, b: &Vec3| a.nearly_equals(b));
cell_scalar!(IntVec2, IntVec2);
cell_scalar!(IntVec3, IntVec3);
cell_scalar!(Int64Vec2, Int64Vec2);
cell_scalar!(Int64Vec3, Int64Vec3);
cell_scalar!(Vec<i8>, ArrayInt8);
cell_scalar!(Vec<i16>, ArrayInt16);
cell_scalar!(Vec<i32>, ArrayInt32);
cell_scalar!(Vec<i64>, ArrayInt64);
cell_scalar!(Vec<f32>, ArrayFloat32, |a: &Vec<f32>, b: &Vec<f32>| {
    float_slice_eq_f32(a, b)
});
cell_scalar!(Vec<f64>, ArrayFloat64, |a: &Vec<f64>, b: &Vec<f64>| {
    float_slice_eq_f64(a, b)
});

/// One node's stored value. Freshly allocated cells are `Empty`.
#[derive(Debug, Clone, Default)]
pub enum NodeValue {
    #[default]
    Empty,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Name(Name),
    String(String),
    Color(Color),
    Guid(Uuid),
    ClassPath(ClassPath),
    ObjectPath(ObjectPath),
    DateTime(DateTime),
    Rotator(Rotator),
    Vec2(Vec2),
    Vec3(Vec3),
    IntVec2(IntVec2),
    IntVec3(IntVec3),
    Int64Vec2(Int64Vec2),
    Int64Vec3(Int64Vec3),
    ArrayInt8(Vec<i8>),
    ArrayInt16(Vec<i16>),
    ArrayInt32(Vec<i32>),
    ArrayInt64(Vec<i64>),
    ArrayFloat32(Vec<f32>),
    ArrayFloat64(Vec<f64>),
    Map(MapData),
    List(ListData),
}

impl NodeValue {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeValue::Empty => NodeKind::Empty,
            NodeValue::Bool(_) => NodeKind::Bool,
            NodeValue::Int8(_) => NodeKind::Int8,
            NodeValue::Int16(_) => NodeKind::Int16,
            NodeValue::Int32(_) => NodeKind::Int32,
            NodeValue::Int64(_) => NodeKind::Int64,
            NodeValue::Float32(_) => NodeKind::Float32,
            NodeValue::Float64(_) => NodeKind::Float64,
            NodeValue::Name(_) => NodeKind::Name,
            NodeValue::String(_) => NodeKind::String,
            NodeValue::Color(_) => NodeKind::Color,
            NodeValue::Guid(_) => NodeKind::Guid,
            NodeValue::ClassPath(_) => NodeKind::ClassPath,
            NodeValue::ObjectPath(_) => NodeKind::ObjectPath,
            NodeValue::DateTime(_) => NodeKind::DateTime,
            NodeValue::Rotator(_) => NodeKind::Rotator,
            NodeValue::Vec2(_) => NodeKind::Vec2,
            NodeValue::Vec3(_) => NodeKind::Vec3,
            NodeValue::IntVec2(_) => NodeKind::IntVec2,
            NodeValue::IntVec3(_) => NodeKind::IntVec3,
            NodeValue::Int64Vec2(_) => NodeKind::Int64Vec2,
            NodeValue::Int64Vec3(_) => NodeKind::Int64Vec3,
            NodeValue::ArrayInt8(_) => NodeKind::ArrayInt8,
            NodeValue::ArrayInt16(_) => NodeKind::ArrayInt16,
            NodeValue::ArrayInt32(_) => NodeKind::ArrayInt32,
            NodeValue::ArrayInt64(_) => NodeKind::ArrayInt64,
            NodeValue::ArrayFloat32(_) => NodeKind::ArrayFloat32,
            NodeValue::ArrayFloat64(_) => NodeKind::ArrayFloat64,
            NodeValue::Map(_) => NodeKind::Map,
            NodeValue::List(_) => NodeKind::List,
        }
    }

    pub fn is_empty_kind(&self) -> bool {
        matches!(self, NodeValue::Empty)
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, NodeValue::Map(_) | NodeValue::List(_))
    }

    pub fn is_array(&self) -> bool {
        self.kind().is_array()
    }

    /// Back to the freshly-allocated state.
    pub fn reset(&mut self) {
        *self = NodeValue::Empty;
    }

    pub fn get<T: CellScalar>(&self) -> Option<T> {
        T::from_cell(self).cloned()
    }

    pub fn get_ref<T: CellScalar>(&self) -> Option<&T> {
        T::from_cell(self)
    }

    /// Store `value` if the cell already holds the same kind.
    pub fn try_set<T: CellScalar>(&mut self, value: T) -> OpResult {
        let same = match T::from_cell(self) {
            Some(current) => T::cell_eq(current, &value),
            None => return OpResult::NodeTypeMismatch,
        };
        if same {
            return OpResult::SameAndNotChange;
        }
        *self = value.into_cell();
        OpResult::Success
    }

    /// Replace kind and value unconditionally. Reports `SameAndNotChange`
    /// when the cell already held an equal value of the same kind.
    pub fn override_to<T: CellScalar>(&mut self, value: T) -> OpResult {
        let same = T::from_cell(self)
            .map(|current| T::cell_eq(current, &value))
            .unwrap_or(false);
        if same {
            return OpResult::SameAndNotChange;
        }
        *self = value.into_cell();
        OpResult::Success
    }

    pub fn override_to_empty_map(&mut self) -> OpResult {
        if let NodeValue::Map(map) = self {
            if map.is_empty() {
                return OpResult::SameAndNotChange;
            }
        }
        *self = NodeValue::Map(MapData::default());
        OpResult::Success
    }

    pub fn override_to_empty_list(&mut self) -> OpResult {
        if let NodeValue::List(list) = self {
            if list.is_empty() {
                return OpResult::SameAndNotChange;
            }
        }
        *self = NodeValue::List(ListData::default());
        OpResult::Success
    }

    pub fn map_data(&self) -> Option<&MapData> {
        match self {
            NodeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn map_data_mut(&mut self) -> Option<&mut MapData> {
        match self {
            NodeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn list_data(&self) -> Option<&ListData> {
        match self {
            NodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn list_data_mut(&mut self) -> Option<&mut ListData> {
        match self {
            NodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Widen any boolean/integer kind to `i64`.
    pub fn generic_int(&self) -> Option<i64> {
        match self {
            NodeValue::Bool(b) => Some(if *b { 1 } else { 0 }),
            NodeValue::Int8(v) => Some(*v as i64),
            NodeValue::Int16(v) => Some(*v as i64),
            NodeValue::Int32(v) => Some(*v as i64),
            NodeValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Widen any float kind to `f64`.
    pub fn generic_float(&self) -> Option<f64> {
        match self {
            NodeValue::Float32(v) => Some(*v as f64),
            NodeValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Write an integer into whatever integer kind is stored, clamping to
    /// the destination range. The stored kind never changes.
    pub fn try_set_generic_int(&mut self, value: i64) -> OpResult {
        let current = match self.generic_int() {
            Some(v) => v,
            None => return OpResult::NodeTypeMismatch,
        };
        if current == value {
            return OpResult::SameAndNotChange;
        }
        match self {
            NodeValue::Bool(b) => {
                if *b == (value != 0) {
                    return OpResult::SameAndNotChange;
                }
                *b = value != 0;
                OpResult::Success
            }
            NodeValue::Int8(v) => {
                *v = value.clamp(i8::MIN as i64, i8::MAX as i64) as i8;
                OpResult::Success
            }
            NodeValue::Int16(v) => {
                *v = value.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
                OpResult::Success
            }
            NodeValue::Int32(v) => {
                *v = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
                OpResult::Success
            }
            NodeValue::Int64(v) => {
                *v = value;
                OpResult::Success
            }
            _ => OpResult::NodeTypeMismatch,
        }
    }

    /// Write a float into whatever float kind is stored.
    pub fn try_set_generic_float(&mut self, value: f64) -> OpResult {
        let current = match self.generic_float() {
            Some(v) => v,
            None => return OpResult::NodeTypeMismatch,
        };
        if nearly_equal_f64(current, value) {
            return OpResult::SameAndNotChange;
        }
        match self {
            NodeValue::Float32(v) => {
                *v = value as f32;
                OpResult::Success
            }
            NodeValue::Float64(v) => {
                *v = value;
                OpResult::Success
            }
            _ => OpResult::NodeTypeMismatch,
        }
    }

    /// Overwrite this leaf with another leaf's kind and value. Compounds on
    /// either side are rejected; their copies go through the container's
    /// deep-copy path instead.
    pub fn override_from_if_not_compound(&mut self, other: &NodeValue) -> OpResult {
        if self.is_compound() || other.is_compound() {
            return OpResult::NodeTypeMismatch;
        }
        if self.equals_values(other) {
            return OpResult::SameAndNotChange;
        }
        *self = other.clone();
        OpResult::Success
    }

    /// Value equality at the cell level: kind first, then payload with the
    /// float tolerance. Compounds always compare unequal here; their
    /// equality is structural and lives with the accessor.
    pub fn equals_values(&self, other: &NodeValue) -> bool {
        use NodeValue::*;
        match (self, other) {
            (Empty, Empty) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int8(a), Int8(b)) => a == b,
            (Int16(a), Int16(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Float32(a), Float32(b)) => nearly_equal_f32(*a, *b),
            (Float64(a), Float64(b)) => nearly_equal_f64(*a, *b),
            (Name(a), Name(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Color(a), Color(b)) => a == b,
            (Guid(a), Guid(b)) => a == b,
            (ClassPath(a), ClassPath(b)) => a == b,
            (ObjectPath(a), ObjectPath(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Rotator(a), Rotator(b)) => a.nearly_equals(b),
            (Vec2(a), Vec2(b)) => a.nearly_equals(b),
            (Vec3(a), Vec3(b)) => a.nearly_equals(b),
            (IntVec2(a), IntVec2(b)) => a == b,
            (IntVec3(a), IntVec3(b)) => a == b,
            (Int64Vec2(a), Int64Vec2(b)) => a == b,
            (Int64Vec3(a), Int64Vec3(b)) => a == b,
            (ArrayInt8(a), ArrayInt8(b)) => a == b,
            (ArrayInt16(a), ArrayInt16(b)) => a == b,
            (ArrayInt32(a), ArrayInt32(b)) => a == b,
            (ArrayInt64(a), ArrayInt64(b)) => a == b,
            (ArrayFloat32(a), ArrayFloat32(b)) => float_slice_eq_f32(a, b),
            (ArrayFloat64(a), ArrayFloat64(b)) => float_slice_eq_f64(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cell_is_empty() {
        let cell = NodeValue::default();
        assert_eq!(cell.kind(), NodeKind::Empty);
        assert!(cell.is_empty_kind());
    }

    #[test]
    fn try_set_requires_matching_kind() {
        let mut cell = NodeValue::Int32(10);
        assert_eq!(cell.try_set(20i32), OpResult::Success);
        assert_eq!(cell.try_set(20i32), OpResult::SameAndNotChange);
        assert_eq!(cell.try_set(1.0f32), OpResult::NodeTypeMismatch);
        assert_eq!(cell.get::<i32>(), Some(20));
    }

    #[test]
    fn override_changes_kind() {
        let mut cell = NodeValue::Int32(10);
        assert_eq!(cell.override_to("x".to_string()), OpResult::Success);
        assert_eq!(cell.kind(), NodeKind::String);
        assert_eq!(cell.override_to("x".to_string()), OpResult::SameAndNotChange);
    }

    #[test]
    fn float_set_uses_tolerance() {
        let mut cell = NodeValue::Float32(1.0);
        assert_eq!(cell.try_set(1.00005f32), OpResult::SameAndNotChange);
        assert_eq!(cell.try_set(1.01f32), OpResult::Success);
    }

    #[test]
    fn float_array_set_uses_tolerance() {
        let mut cell = NodeValue::ArrayFloat64(vec![1.0, 2.0]);
        assert_eq!(
            cell.try_set(vec![1.00005f64, 2.0]),
            OpResult::SameAndNotChange
        );
        assert_eq!(cell.try_set(vec![1.0f64, 2.5]), OpResult::Success);
        assert_eq!(cell.try_set(vec![1.0f64]), OpResult::Success);
    }

    #[test]
    fn generic_int_widening_and_clamping() {
        let mut cell = NodeValue::Int8(1);
        assert_eq!(cell.generic_int(), Some(1));
        assert_eq!(cell.try_set_generic_int(1000), OpResult::Success);
        assert_eq!(cell.get::<i8>(), Some(127));

        let mut flag = NodeValue::Bool(false);
        assert_eq!(flag.try_set_generic_int(5), OpResult::Success);
        assert_eq!(flag.get::<bool>(), Some(true));
        assert_eq!(flag.try_set_generic_int(1), OpResult::SameAndNotChange);

        assert_eq!(
            NodeValue::String("5".into()).generic_int(),
            None,
            "strings do not widen"
        );
    }

    #[test]
    fn generic_float_preserves_kind() {
        let mut cell = NodeValue::Float32(0.5);
        assert_eq!(cell.try_set_generic_float(2.25), OpResult::Success);
        assert_eq!(cell.kind(), NodeKind::Float32);
        assert_eq!(cell.get::<f32>(), Some(2.25));
    }

    #[test]
    fn equals_values_is_kind_strict() {
        assert!(!NodeValue::Int32(1).equals_values(&NodeValue::Int64(1)));
        assert!(NodeValue::Int32(1).equals_values(&NodeValue::Int32(1)));
        assert!(
            !NodeValue::Map(MapData::default()).equals_values(&NodeValue::Map(MapData::default()))
        );
    }

    #[test]
    fn map_preserves_insertion_order() {
        let mut map = MapData::default();
        map.insert(Name::new("b"), NodeId::new(1, 1));
        map.insert(Name::new("a"), NodeId::new(2, 1));
        map.insert(Name::new("c"), NodeId::new(3, 1));
        let keys: Vec<_> = map.keys().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, ["b", "a", "c"]);

        map.insert(Name::new("a"), NodeId::new(9, 1));
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&Name::new("a")), Some(NodeId::new(9, 1)));

        assert_eq!(map.remove(&Name::new("b")), Some(NodeId::new(1, 1)));
        let keys: Vec<_> = map.keys().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, ["a", "c"]);
    }

    #[test]
    fn override_from_leaf_only() {
        let mut dst = NodeValue::Int32(1);
        let src = NodeValue::String("hello".into());
        assert_eq!(dst.override_from_if_not_compound(&src), OpResult::Success);
        assert_eq!(dst.get::<String>(), Some("hello".to_string()));
        assert_eq!(
            dst.override_from_if_not_compound(&src),
            OpResult::SameAndNotChange
        );

        let compound = NodeValue::Map(MapData::default());
        assert_eq!(
            dst.override_from_if_not_compound(&compound),
            OpResult::NodeTypeMismatch
        );
    }
}
