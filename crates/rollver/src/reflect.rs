//! Type identity and shape description
//!
//! The graph builders need to know, for every type reachable from a
//! payload, its identity (to look up migrations) and its shape (to recurse
//! into fields and elements). [`Reflect`] captures both: a static
//! description via [`Reflect::type_info`] and a runtime view of a live
//! value via [`Reflect::value_shape`]. The runtime view exists because a
//! dynamically-typed field loses its concrete type the moment it is
//! flattened into a generic tree; the concrete type must be captured from
//! the source value, never recovered from the flattened shape.
//!
//! Applications describe their own types with [`reflect_struct!`] and
//! [`reflect_newtype!`]; std scalars, containers and smart pointers are
//! covered here.

use crate::error::RollverError;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::Value;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Identity of a type participating in migration graphs.
///
/// Equality and hashing use the Rust [`TypeId`]; the type path rides along
/// for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    rust_name: &'static str,
}

impl TypeKey {
    /// Key for a concrete type
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            rust_name: std::any::type_name::<T>(),
        }
    }

    /// Full Rust path of the type, for diagnostics
    #[inline]
    #[must_use]
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Static shape of a type.
///
/// Children are function pointers rather than inline descriptions so that
/// describing a self-referential type terminates; the pointer is only
/// invoked while a visited set is in place.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    /// Built-in scalar (numbers, strings, booleans)
    Scalar,

    /// Struct with named fields
    Struct(fn() -> Vec<Field>),

    /// Sequence of one element type (`Vec<T>`, arrays)
    List(fn() -> TypeInfo),

    /// String-keyed map of one value type
    Map(fn() -> TypeInfo),

    /// Named wrapper around another shape (`struct Email(String)`)
    Newtype(fn() -> TypeInfo),

    /// Concrete shape only known from a live value
    Dynamic,
}

/// One named field of a struct shape.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    /// Declared field name
    pub name: &'static str,

    /// Serialization name, when it differs from the declared name
    pub wire_name: Option<&'static str>,

    /// Shape of the field's declared type
    pub info: fn() -> TypeInfo,
}

impl Field {
    /// Key under which this field appears on the wire
    #[inline]
    #[must_use]
    pub fn key(&self) -> &'static str {
        self.wire_name.unwrap_or(self.name)
    }
}

/// Identity plus shape of a type.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    key: TypeKey,
    name: Option<&'static str>,
    shape: Shape,
}

impl TypeInfo {
    /// Describe a built-in scalar
    #[must_use]
    pub fn scalar<T: 'static>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: None,
            shape: Shape::Scalar,
        }
    }

    /// Describe a user-declared struct
    #[must_use]
    pub fn named_struct<T: 'static>(name: &'static str, fields: fn() -> Vec<Field>) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: Some(name),
            shape: Shape::Struct(fields),
        }
    }

    /// Describe an anonymous sequence type
    #[must_use]
    pub fn list<T: 'static>(element: fn() -> TypeInfo) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: None,
            shape: Shape::List(element),
        }
    }

    /// Describe an anonymous string-keyed map type
    #[must_use]
    pub fn map<T: 'static>(value: fn() -> TypeInfo) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: None,
            shape: Shape::Map(value),
        }
    }

    /// Describe a user-declared wrapper around another shape
    #[must_use]
    pub fn newtype<T: 'static>(name: &'static str, inner: fn() -> TypeInfo) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: Some(name),
            shape: Shape::Newtype(inner),
        }
    }

    /// Describe a dynamically-typed slot
    #[must_use]
    pub fn dynamic<T: 'static>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: None,
            shape: Shape::Dynamic,
        }
    }

    /// Identity of the described type
    #[inline]
    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Declared name, `None` for built-ins and anonymous composites
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Shape of the described type
    #[inline]
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Name to show in diagnostics
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        self.name.unwrap_or(self.key.rust_name)
    }

    /// Whether any type reachable from this shape is dynamically typed.
    ///
    /// Such types cannot use cached graphs directly; their graphs are built
    /// per call from the live value.
    #[must_use]
    pub fn has_dynamic_fields(&self) -> bool {
        fn walk(info: &TypeInfo, visited: &mut HashSet<TypeKey>) -> bool {
            if !visited.insert(info.key) {
                return false;
            }
            match info.shape {
                Shape::Dynamic => true,
                Shape::Scalar => false,
                Shape::Struct(fields) => fields().iter().any(|f| walk(&(f.info)(), visited)),
                Shape::List(inner) | Shape::Map(inner) | Shape::Newtype(inner) => {
                    walk(&inner(), visited)
                }
            }
        }
        walk(self, &mut HashSet::new())
    }

    /// Resolve newtype wrappers down to the underlying structural shape.
    ///
    /// Migrations stay attached to the outermost named type; only the
    /// structure below it is traversed.
    pub(crate) fn underlying_shape(&self) -> Result<Shape, RollverError> {
        let mut seen = vec![self.key];
        let mut shape = self.shape;
        while let Shape::Newtype(inner) = shape {
            let info = inner();
            if seen.contains(&info.key) {
                return Err(RollverError::UnresolvableShape {
                    name: self.key.rust_name,
                });
            }
            seen.push(info.key);
            shape = info.shape;
        }
        Ok(shape)
    }
}

/// Runtime view of a live value, used by the runtime graph builder.
pub enum ValueShape<'a> {
    /// Absent value; contributes nothing to the graph
    Nil,

    /// Leaf value
    Scalar,

    /// Struct value: wire name and live value per field
    Struct(Vec<(&'static str, &'a dyn ReflectAny)>),

    /// Sequence value: first element, if any (collections are assumed
    /// homogeneous)
    List(Option<&'a dyn ReflectAny>),

    /// Dynamically-typed slot: the concrete value held inside, if any
    Dynamic(Option<&'a dyn ReflectAny>),
}

/// A type that can describe itself to the graph builders.
pub trait Reflect: 'static {
    /// Static identity and shape of this type
    fn type_info() -> TypeInfo
    where
        Self: Sized;

    /// Runtime view of this value
    fn value_shape(&self) -> ValueShape<'_>;
}

/// Object-safe access to [`Reflect`] for values behind `dyn`.
///
/// Blanket-implemented for every `Reflect` type; never implemented by hand.
pub trait ReflectAny {
    /// Static identity and shape of the value's type
    fn info(&self) -> TypeInfo;

    /// Runtime view of the value
    fn runtime_shape(&self) -> ValueShape<'_>;
}

impl<T: Reflect> ReflectAny for T {
    fn info(&self) -> TypeInfo {
        T::type_info()
    }

    fn runtime_shape(&self) -> ValueShape<'_> {
        self.value_shape()
    }
}

macro_rules! impl_reflect_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Reflect for $ty {
                fn type_info() -> TypeInfo {
                    TypeInfo::scalar::<$ty>()
                }

                fn value_shape(&self) -> ValueShape<'_> {
                    ValueShape::Scalar
                }
            }
        )*
    };
}

impl_reflect_scalar!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char, String
);

impl<T: Reflect> Reflect for Option<T> {
    fn type_info() -> TypeInfo {
        T::type_info()
    }

    fn value_shape(&self) -> ValueShape<'_> {
        match self {
            None => ValueShape::Nil,
            Some(value) => value.value_shape(),
        }
    }
}

impl<T: Reflect> Reflect for Box<T> {
    fn type_info() -> TypeInfo {
        T::type_info()
    }

    fn value_shape(&self) -> ValueShape<'_> {
        (**self).value_shape()
    }
}

impl<T: Reflect> Reflect for Arc<T> {
    fn type_info() -> TypeInfo {
        T::type_info()
    }

    fn value_shape(&self) -> ValueShape<'_> {
        (**self).value_shape()
    }
}

impl<T: Reflect> Reflect for Vec<T> {
    fn type_info() -> TypeInfo {
        TypeInfo::list::<Vec<T>>(T::type_info)
    }

    fn value_shape(&self) -> ValueShape<'_> {
        ValueShape::List(self.first().map(|e| e as &dyn ReflectAny))
    }
}

impl<T: Reflect, const N: usize> Reflect for [T; N] {
    fn type_info() -> TypeInfo {
        TypeInfo::list::<[T; N]>(T::type_info)
    }

    fn value_shape(&self) -> ValueShape<'_> {
        ValueShape::List(self.first().map(|e| e as &dyn ReflectAny))
    }
}

impl<K: 'static, V: Reflect> Reflect for HashMap<K, V> {
    fn type_info() -> TypeInfo {
        TypeInfo::map::<HashMap<K, V>>(V::type_info)
    }

    fn value_shape(&self) -> ValueShape<'_> {
        ValueShape::List(self.values().next().map(|v| v as &dyn ReflectAny))
    }
}

impl<K: 'static, V: Reflect> Reflect for BTreeMap<K, V> {
    fn type_info() -> TypeInfo {
        TypeInfo::map::<BTreeMap<K, V>>(V::type_info)
    }

    fn value_shape(&self) -> ValueShape<'_> {
        ValueShape::List(self.values().next().map(|v| v as &dyn ReflectAny))
    }
}

// A raw JSON tree has no type identity left to migrate against.
impl Reflect for Value {
    fn type_info() -> TypeInfo {
        TypeInfo::dynamic::<Value>()
    }

    fn value_shape(&self) -> ValueShape<'_> {
        ValueShape::Dynamic(None)
    }
}

/// Boxed payload of a [`Dynamic`] field.
pub(crate) trait DynamicValue: Send + Sync {
    fn as_reflect(&self) -> &dyn ReflectAny;
    fn to_tree(&self) -> Result<Value, serde_json::Error>;
}

impl<T> DynamicValue for T
where
    T: Reflect + Serialize + Send + Sync,
{
    fn as_reflect(&self) -> &dyn ReflectAny {
        self
    }

    fn to_tree(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A field whose concrete type is only known from the value it holds.
///
/// Constructed in Rust, a `Dynamic` remembers the concrete type of its
/// payload, so marshaling migrates the payload as if the field were
/// statically typed. After a wire round-trip the payload degrades to an
/// untyped JSON tree and passes through migrations unchanged; that loss is
/// inherent to the generic tree representation, which is exactly why graph
/// construction inspects the live value before flattening.
#[derive(Default)]
pub struct Dynamic(Option<Box<dyn DynamicValue>>);

impl Dynamic {
    /// Wrap a concrete value
    #[must_use]
    pub fn new<T>(value: T) -> Self
    where
        T: Reflect + Serialize + Send + Sync,
    {
        Self(Some(Box::new(value)))
    }

    /// An absent dynamic value
    #[must_use]
    pub fn null() -> Self {
        Self(None)
    }

    /// Whether no value is present
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

impl Reflect for Dynamic {
    fn type_info() -> TypeInfo {
        TypeInfo::dynamic::<Dynamic>()
    }

    fn value_shape(&self) -> ValueShape<'_> {
        ValueShape::Dynamic(self.0.as_deref().map(DynamicValue::as_reflect))
    }
}

impl Serialize for Dynamic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            None => serializer.serialize_unit(),
            Some(value) => {
                let tree = value.to_tree().map_err(serde::ser::Error::custom)?;
                tree.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Dynamic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Self(None)),
            tree => Ok(Self(Some(Box::new(tree)))),
        }
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("Dynamic(null)"),
            Some(value) => match value.to_tree() {
                Ok(tree) => write!(f, "Dynamic({tree})"),
                Err(_) => f.write_str("Dynamic(<unserializable>)"),
            },
        }
    }
}

/// Implement [`Reflect`] for a struct with named fields.
///
/// Field entries mirror the struct definition; `as "wire_name"` overrides
/// the serialization name and must match the field's serde rename.
///
/// ```
/// use rollver::reflect_struct;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct User {
///     email: String,
///     #[serde(rename = "first_name")]
///     first: String,
/// }
///
/// reflect_struct!(User, "User", {
///     email: String,
///     first as "first_name": String,
/// });
/// ```
#[macro_export]
macro_rules! reflect_struct {
    ($ty:ty, $name:literal, { $( $field:ident $( as $wire:literal )? : $fty:ty ),* $(,)? }) => {
        impl $crate::reflect::Reflect for $ty {
            fn type_info() -> $crate::reflect::TypeInfo {
                fn fields() -> ::std::vec::Vec<$crate::reflect::Field> {
                    ::std::vec![
                        $(
                            $crate::reflect::Field {
                                name: stringify!($field),
                                wire_name: $crate::__reflect_wire!($( $wire )?),
                                info: <$fty as $crate::reflect::Reflect>::type_info,
                            }
                        ),*
                    ]
                }
                $crate::reflect::TypeInfo::named_struct::<$ty>($name, fields)
            }

            fn value_shape(&self) -> $crate::reflect::ValueShape<'_> {
                $crate::reflect::ValueShape::Struct(::std::vec![
                    $(
                        (
                            $crate::__reflect_wire_or!(stringify!($field) $(, $wire)?),
                            &self.$field as &dyn $crate::reflect::ReflectAny,
                        )
                    ),*
                ])
            }
        }
    };
}

/// Implement [`Reflect`] for a named tuple-struct wrapper.
///
/// ```
/// use rollver::reflect_newtype;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// #[serde(transparent)]
/// struct Email(String);
///
/// reflect_newtype!(Email, "Email", String);
/// ```
#[macro_export]
macro_rules! reflect_newtype {
    ($ty:ty, $name:literal, $inner:ty) => {
        impl $crate::reflect::Reflect for $ty {
            fn type_info() -> $crate::reflect::TypeInfo {
                $crate::reflect::TypeInfo::newtype::<$ty>(
                    $name,
                    <$inner as $crate::reflect::Reflect>::type_info,
                )
            }

            fn value_shape(&self) -> $crate::reflect::ValueShape<'_> {
                self.0.value_shape()
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __reflect_wire {
    () => {
        ::core::option::Option::None
    };
    ($wire:literal) => {
        ::core::option::Option::Some($wire)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __reflect_wire_or {
    ($name:expr) => {
        $name
    };
    ($name:expr, $wire:literal) => {
        $wire
    };
}
