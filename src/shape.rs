//! Field shape of a message type, traced through its `Deserialize` impl.
//!
//! The JSON of `T::default()` says nothing about the fields of a
//! sub-message that is `None` by default. Tracing drives `T`'s own
//! deserializer with default leaves and descends into every `Option`, so
//! the shape covers those sub-messages too. Types the tracer cannot drive
//! (untagged or internally tagged enums, `flatten`, string-parsed leaves
//! such as timestamps) yield no shape; callers then fall back to the
//! default value alone.

use serde::de::value::Error as TraceError;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess, IntoDeserializer, MapAccess,
    SeqAccess, VariantAccess, Visitor,
};
use serde_json::{Map, Value};

/// Nesting of `Option` followed before treating it as absent. Bounds
/// recursive types such as `Option<Box<Node>>`.
const MAX_OPTION_DEPTH: usize = 16;

const NO_FIELDS: &[&str] = &[];

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Shape {
    /// Scalar, sequence or map, with its default JSON value.
    Leaf(Value),
    /// Struct fields in declaration order.
    Message(Vec<(String, Shape)>),
    /// An optional field, absent by default.
    Optional(Box<Shape>),
    Tuple(Vec<Shape>),
}

impl Shape {
    pub fn trace<T: DeserializeOwned>() -> Result<Shape, TraceError> {
        let mut shape = Shape::Leaf(Value::Null);
        T::deserialize(Tracer {
            out: &mut shape,
            depth: 0,
        })?;
        Ok(shape)
    }

    /// Every path the type can hold, optional sub-messages filled in.
    pub fn schema(&self) -> Value {
        match self {
            Shape::Leaf(value) => value.clone(),
            Shape::Message(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, shape)| (name.clone(), shape.schema()))
                    .collect(),
            ),
            Shape::Optional(inner) => inner.schema(),
            Shape::Tuple(items) => Value::Array(items.iter().map(Shape::schema).collect()),
        }
    }

    /// The empty instance: default leaves, optional fields absent.
    pub fn instance(&self) -> Value {
        match self {
            Shape::Leaf(value) => value.clone(),
            Shape::Message(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, shape)| (name.clone(), shape.instance()))
                    .collect(),
            ),
            Shape::Optional(_) => Value::Null,
            Shape::Tuple(items) => Value::Array(items.iter().map(Shape::instance).collect()),
        }
    }

    /// Shape of the field `name`, looking through `Option`.
    pub fn field(&self, name: &str) -> Option<&Shape> {
        match self {
            Shape::Message(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, shape)| shape.present()),
            Shape::Optional(inner) => inner.field(name),
            _ => None,
        }
    }

    fn present(&self) -> &Shape {
        match self {
            Shape::Optional(inner) => inner.present(),
            shape => shape,
        }
    }
}

/// Deserializer that hands every visitor a default and records what was asked for.
struct Tracer<'a> {
    out: &'a mut Shape,
    depth: usize,
}

impl Tracer<'_> {
    fn leaf(&mut self, value: impl Into<Value>) {
        *self.out = Shape::Leaf(value.into());
    }
}

macro_rules! trace_scalar {
    ($($method:ident => $visit:ident($default:expr)),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
                self.leaf($default);
                visitor.$visit($default)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for Tracer<'_> {
    type Error = TraceError;

    trace_scalar! {
        deserialize_bool => visit_bool(false),
        deserialize_i8 => visit_i8(0),
        deserialize_i16 => visit_i16(0),
        deserialize_i32 => visit_i32(0),
        deserialize_i64 => visit_i64(0),
        deserialize_u8 => visit_u8(0),
        deserialize_u16 => visit_u16(0),
        deserialize_u32 => visit_u32(0),
        deserialize_u64 => visit_u64(0),
        deserialize_f32 => visit_f32(0.0),
        deserialize_f64 => visit_f64(0.0),
        deserialize_str => visit_str(""),
        deserialize_string => visit_str(""),
        deserialize_identifier => visit_str(""),
    }

    /// Self-describing fields (e.g. `serde_json::Value`) start out null.
    fn deserialize_any<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
        self.leaf(Value::Null);
        visitor.visit_unit()
    }

    fn deserialize_char<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
        self.leaf('\0'.to_string());
        visitor.visit_char('\0')
    }

    fn deserialize_bytes<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
        self.leaf(Value::Array(Vec::new()));
        visitor.visit_bytes(&[])
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, TraceError> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
        if self.depth >= MAX_OPTION_DEPTH {
            self.leaf(Value::Null);
            return visitor.visit_none();
        }
        let mut inner = Shape::Leaf(Value::Null);
        let value = visitor.visit_some(Tracer {
            out: &mut inner,
            depth: self.depth + 1,
        })?;
        *self.out = Shape::Optional(Box::new(inner));
        Ok(value)
    }

    fn deserialize_unit<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
        self.leaf(Value::Null);
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, TraceError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, TraceError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
        self.leaf(Value::Array(Vec::new()));
        visitor.visit_seq(Elements::new(0, self.depth))
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, TraceError> {
        let mut elements = Elements::new(len, self.depth);
        let value = visitor.visit_seq(&mut elements)?;
        *self.out = Shape::Tuple(elements.shapes);
        Ok(value)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, TraceError> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value, TraceError> {
        self.leaf(Value::Object(Map::new()));
        visitor.visit_map(Fields::new(NO_FIELDS, self.depth))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TraceError> {
        let mut access = Fields::new(fields, self.depth);
        let value = visitor.visit_map(&mut access)?;
        *self.out = Shape::Message(access.shapes);
        Ok(value)
    }

    /// Enums take their first variant.
    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TraceError> {
        let Some(&variant) = variants.first() else {
            return Err(de::Error::custom(format!("enum {} has no variants", name)));
        };
        visitor.visit_enum(Variant {
            name: variant,
            out: self.out,
            depth: self.depth,
        })
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, TraceError> {
        visitor.visit_unit()
    }
}

/// Struct fields, each traced into its own shape.
struct Fields {
    names: std::slice::Iter<'static, &'static str>,
    shapes: Vec<(String, Shape)>,
    depth: usize,
}

impl Fields {
    fn new(names: &'static [&'static str], depth: usize) -> Self {
        Self {
            names: names.iter(),
            shapes: Vec::with_capacity(names.len()),
            depth,
        }
    }
}

impl<'de> MapAccess<'de> for Fields {
    type Error = TraceError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, TraceError> {
        let Some(name) = self.names.next() else {
            return Ok(None);
        };
        self.shapes.push((name.to_string(), Shape::Leaf(Value::Null)));
        seed.deserialize(IntoDeserializer::<TraceError>::into_deserializer(*name))
            .map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, TraceError> {
        let depth = self.depth;
        match self.shapes.last_mut() {
            Some((_, out)) => seed.deserialize(Tracer { out, depth }),
            None => Err(de::Error::custom("field value requested before its name")),
        }
    }
}

/// Fixed-length tuple elements; zero-length for sequences.
struct Elements {
    remaining: usize,
    shapes: Vec<Shape>,
    depth: usize,
}

impl Elements {
    fn new(len: usize, depth: usize) -> Self {
        Self {
            remaining: len,
            shapes: Vec::with_capacity(len),
            depth,
        }
    }
}

impl<'de> SeqAccess<'de> for Elements {
    type Error = TraceError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, TraceError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let mut out = Shape::Leaf(Value::Null);
        let value = seed.deserialize(Tracer {
            out: &mut out,
            depth: self.depth,
        })?;
        self.shapes.push(out);
        Ok(Some(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

/// The variant an enum is traced through, in serde's externally tagged form.
struct Variant<'a> {
    name: &'static str,
    out: &'a mut Shape,
    depth: usize,
}

impl<'de, 'a> EnumAccess<'de> for Variant<'a> {
    type Error = TraceError;
    type Variant = Self;

    fn variant_seed<S: DeserializeSeed<'de>>(
        self,
        seed: S,
    ) -> Result<(S::Value, Self), TraceError> {
        let tag = seed.deserialize(IntoDeserializer::<TraceError>::into_deserializer(self.name))?;
        Ok((tag, self))
    }
}

impl<'de> VariantAccess<'de> for Variant<'_> {
    type Error = TraceError;

    fn unit_variant(self) -> Result<(), TraceError> {
        *self.out = Shape::Leaf(Value::String(self.name.to_string()));
        Ok(())
    }

    fn newtype_variant_seed<S: DeserializeSeed<'de>>(self, seed: S) -> Result<S::Value, TraceError> {
        let mut inner = Shape::Leaf(Value::Null);
        let value = seed.deserialize(Tracer {
            out: &mut inner,
            depth: self.depth,
        })?;
        *self.out = Shape::Message(vec![(self.name.to_string(), inner)]);
        Ok(value)
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, TraceError> {
        let mut elements = Elements::new(len, self.depth);
        let value = visitor.visit_seq(&mut elements)?;
        *self.out = Shape::Message(vec![(
            self.name.to_string(),
            Shape::Tuple(elements.shapes),
        )]);
        Ok(value)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TraceError> {
        let mut access = Fields::new(fields, self.depth);
        let value = visitor.visit_map(&mut access)?;
        *self.out = Shape::Message(vec![(self.name.to_string(), Shape::Message(access.shapes))]);
        Ok(value)
    }
}
