//! Declared body shapes.
//!
//! A [`Shape`] is an ordered set of named [`Field`]s, each wrapping a
//! [`Validator`] node. The same value drives request validation and the
//! rendered route documentation, so every node knows how to describe itself.

use indexmap::IndexMap;

/// Closed validator algebra.
#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    String,
    /// Any JSON number.
    Number,
    /// A number with no fractional part.
    Integer,
    Boolean,
    /// Accepts any value, including `null`.
    Any,
    Array(Box<Validator>),
    /// Nested object, matched as strictly as the top level.
    Object(Shape),
    /// One of a fixed set of strings.
    OneOf(Vec<String>),
}

impl Validator {
    pub fn array(item: Validator) -> Self {
        Validator::Array(Box::new(item))
    }

    pub fn one_of<I, T>(variants: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Validator::OneOf(variants.into_iter().map(Into::into).collect())
    }

    pub fn type_name(&self) -> String {
        match self {
            Validator::String => "string".into(),
            Validator::Number => "number".into(),
            Validator::Integer => "integer".into(),
            Validator::Boolean => "boolean".into(),
            Validator::Any => "any".into(),
            Validator::Array(item) => format!("array<{}>", item.type_name()),
            Validator::Object(shape) => format!("{{{}}}", shape.describe()),
            Validator::OneOf(variants) => variants
                .iter()
                .map(|v| format!("\"{v}\""))
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }

    /// Arrays and nested objects. Their rejections already name the exact
    /// offending path, so the pipeline surfaces them as-is.
    pub fn is_composite(&self) -> bool {
        matches!(self, Validator::Array(_) | Validator::Object(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub validator: Validator,
    pub optional: bool,
}

impl Field {
    pub fn required(validator: Validator) -> Self {
        Self {
            validator,
            optional: false,
        }
    }

    pub fn optional(validator: Validator) -> Self {
        Self {
            validator,
            optional: true,
        }
    }
}

impl From<Validator> for Field {
    fn from(validator: Validator) -> Self {
        Field::required(validator)
    }
}

/// Field name to [`Field`], in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    fields: IndexMap<String, Field>,
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: impl Into<String>, validator: Validator) -> Self {
        self.field(name, Field::required(validator))
    }

    pub fn optional(self, name: impl Into<String>, validator: Validator) -> Self {
        self.field(name, Field::optional(validator))
    }

    /// Declaring the same name twice keeps the original position and replaces
    /// the field.
    pub fn field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.fields.insert(name.into(), field.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `name: type, name?: type`; optional fields carry a `?`.
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|(name, field)| {
                let marker = if field.optional { "?" } else { "" };
                format!("{name}{marker}: {}", field.validator.type_name())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}
