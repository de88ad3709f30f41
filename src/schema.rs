//! Schema types for describing provider and resource structure.
//!
//! A schema is a tree of [`Block`]s holding named [`Attribute`]s. Nested
//! blocks are list, set or object attributes whose element is a block. The
//! tree is built once when the provider registers, validated with
//! [`Block::validate`], and then shared read-only.
//!
//! ```
//! use hemmer_provider_runtime::schema::{Attribute, Block, SchemaKind};
//!
//! let block = Block::new()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("size", Attribute::optional_int().with_force_new())
//!     .with_attribute(
//!         "rule",
//!         Attribute::list_of_blocks(
//!             Block::new().with_attribute("port", Attribute::required_int()),
//!         ),
//!     );
//! assert!(block.validate(SchemaKind::Resource).is_ok());
//! ```

use crate::diagnostic::Diagnostic;
use crate::error::ProviderError;
use crate::path::{AttributePath, PathStep};
use crate::value::{Value, WireType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Top-level names a managed resource may not declare.
pub const RESERVED_RESOURCE_NAMES: &[&str] = &[
    "connection",
    "count",
    "depends_on",
    "lifecycle",
    "provider",
    "provisioner",
];

/// Top-level names a data source may not declare.
pub const RESERVED_DATA_SOURCE_NAMES: &[&str] = &["count", "depends_on", "lifecycle", "provider"];

/// Top-level names the provider configuration may not declare.
pub const RESERVED_PROVIDER_NAMES: &[&str] = &["alias", "version"];

/// The kind of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A boolean value.
    Bool,
    /// A 64-bit integer.
    Int,
    /// A 64-bit floating point number.
    Float,
    /// A string value.
    String,
    /// An ordered list; needs an element schema.
    List,
    /// An unordered set of unique elements; needs an element schema and an
    /// equivalence key function.
    Set,
    /// A map from string keys to values of one type.
    Map,
    /// A single nested object; the element must be a block.
    Object,
}

impl AttributeType {
    /// True for bool, int, float and string.
    pub fn is_primitive(self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float | Self::String)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Set => "set",
            Self::Map => "map",
            Self::Object => "object",
        }
    }
}

/// How an attribute participates in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeMode {
    /// Must be set in configuration.
    Required,
    /// May be set in configuration.
    Optional,
    /// May be set in configuration; the provider fills it in otherwise.
    OptionalComputed,
    /// Set only by the provider.
    Computed,
}

impl AttributeMode {
    /// Convert the flag form into a mode.
    pub fn from_flags(flags: AttributeFlags) -> Result<Self, SchemaError> {
        match (flags.required, flags.optional, flags.computed) {
            (true, true, _) => Err(SchemaError::RequiredAndOptional {
                path: AttributePath::root(),
            }),
            (true, false, true) => Err(SchemaError::InvalidAttribute {
                path: AttributePath::root(),
                message: "required attributes cannot be computed".to_string(),
            }),
            (true, false, false) => Ok(Self::Required),
            (false, true, false) => Ok(Self::Optional),
            (false, true, true) => Ok(Self::OptionalComputed),
            (false, false, true) => Ok(Self::Computed),
            (false, false, false) => Err(SchemaError::InvalidAttribute {
                path: AttributePath::root(),
                message: "one of required, optional or computed must be set".to_string(),
            }),
        }
    }

    /// The flag form of this mode.
    pub fn flags(self) -> AttributeFlags {
        match self {
            Self::Required => AttributeFlags::required(),
            Self::Optional => AttributeFlags::optional(),
            Self::OptionalComputed => AttributeFlags::optional_computed(),
            Self::Computed => AttributeFlags::computed(),
        }
    }

    /// True for `Computed` and `OptionalComputed`.
    pub fn is_computed(self) -> bool {
        matches!(self, Self::Computed | Self::OptionalComputed)
    }
}

/// Describes how an attribute can be used.
///
/// This is the open flag form found in serialized schemas. It converts into
/// the closed [`AttributeMode`] with [`AttributeMode::from_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    pub required: bool,
    /// The attribute is optional in configuration.
    pub optional: bool,
    /// The attribute is computed by the provider (read-only).
    pub computed: bool,
    /// The attribute is sensitive and should be hidden in logs/UI.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Create flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Create flags for a computed attribute (read-only, set by provider).
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional+computed attribute.
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// How an identity attribute participates in import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// The attribute must be supplied when importing by identity.
    Required,
    /// The attribute may be supplied when importing by identity.
    Optional,
}

impl ImportMode {
    /// Convert the `required_for_import` / `optional_for_import` flag pair.
    pub fn from_flags(required: bool, optional: bool) -> Result<Option<Self>, SchemaError> {
        match (required, optional) {
            (true, true) => Err(SchemaError::InvalidIdentity {
                path: AttributePath::root(),
                message: "cannot be both required and optional for import".to_string(),
            }),
            (true, false) => Ok(Some(Self::Required)),
            (false, true) => Ok(Some(Self::Optional)),
            (false, false) => Ok(None),
        }
    }
}

/// Produces a default value on demand.
pub type DefaultFn = Arc<dyn Fn() -> Result<Value, ProviderError> + Send + Sync>;

/// Maps a set element to its equivalence key.
pub type SetKeyFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Validates a configured value, returning diagnostics.
pub type ValidateFn = Arc<dyn Fn(&Value, &AttributePath) -> Vec<Diagnostic> + Send + Sync>;

/// A default for an unset attribute.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value.
    Static(Value),
    /// A value computed when needed.
    Func(DefaultFn),
}

impl DefaultValue {
    /// Produce the default.
    pub fn resolve(&self) -> Result<Value, ProviderError> {
        match self {
            Self::Static(v) => Ok(v.clone()),
            Self::Func(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(v) => f.debug_tuple("Static").field(v).finish(),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// The element schema of a collection attribute.
#[derive(Debug, Clone)]
pub enum Elem {
    /// Elements are values described by an attribute.
    Attribute(Box<Attribute>),
    /// Elements are nested blocks.
    Block(Block),
}

impl From<Attribute> for Elem {
    fn from(attr: Attribute) -> Self {
        Self::Attribute(Box::new(attr))
    }
}

impl From<Block> for Elem {
    fn from(block: Block) -> Self {
        Self::Block(block)
    }
}

impl From<AttributeType> for Elem {
    fn from(attr_type: AttributeType) -> Self {
        Self::Attribute(Box::new(Attribute::new(attr_type, AttributeMode::Optional)))
    }
}

/// Describes a single attribute in a schema.
#[derive(Clone)]
pub struct Attribute {
    /// The kind of the attribute.
    pub attr_type: AttributeType,
    /// How the attribute participates in configuration.
    pub mode: AttributeMode,
    /// Human-readable description of the attribute.
    pub description: Option<String>,
    /// If set, changing this attribute forces resource replacement.
    pub force_new: bool,
    /// The attribute is accepted in configuration but never persisted.
    pub write_only: bool,
    /// The attribute is sensitive and should be hidden in logs/UI.
    pub sensitive: bool,
    /// Value used when configuration leaves the attribute unset.
    pub default: Option<DefaultValue>,
    /// Element schema for list, set, map and object attributes.
    pub elem: Option<Elem>,
    /// Equivalence key for set elements.
    pub set_key: Option<SetKeyFn>,
    /// Minimum number of elements (lists and sets).
    pub min_items: usize,
    /// Maximum number of elements, 0 for unlimited (lists and sets).
    pub max_items: usize,
    /// Custom validation of configured values.
    pub validate: Option<ValidateFn>,
    /// Import participation, for identity attributes only.
    pub import_mode: Option<ImportMode>,
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("attr_type", &self.attr_type)
            .field("mode", &self.mode)
            .field("force_new", &self.force_new)
            .field("write_only", &self.write_only)
            .field("sensitive", &self.sensitive)
            .field("default", &self.default)
            .field("elem", &self.elem)
            .field("min_items", &self.min_items)
            .field("max_items", &self.max_items)
            .field("import_mode", &self.import_mode)
            .finish_non_exhaustive()
    }
}

impl Attribute {
    /// Create a new attribute with the given type and mode.
    pub fn new(attr_type: AttributeType, mode: AttributeMode) -> Self {
        Self {
            attr_type,
            mode,
            description: None,
            force_new: false,
            write_only: false,
            sensitive: false,
            default: None,
            elem: None,
            set_key: None,
            min_items: 0,
            max_items: 0,
            validate: None,
            import_mode: None,
        }
    }

    /// Create an attribute from the flag form.
    pub fn from_flags(attr_type: AttributeType, flags: AttributeFlags) -> Result<Self, SchemaError> {
        let mut attr = Self::new(attr_type, AttributeMode::from_flags(flags)?);
        attr.sensitive = flags.sensitive;
        Ok(attr)
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeMode::Required)
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeMode::Optional)
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeMode::Computed)
    }

    /// Create an optional+computed string attribute.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeMode::OptionalComputed)
    }

    /// Create a required int attribute.
    pub fn required_int() -> Self {
        Self::new(AttributeType::Int, AttributeMode::Required)
    }

    /// Create an optional int attribute.
    pub fn optional_int() -> Self {
        Self::new(AttributeType::Int, AttributeMode::Optional)
    }

    /// Create a computed int attribute.
    pub fn computed_int() -> Self {
        Self::new(AttributeType::Int, AttributeMode::Computed)
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeMode::Required)
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeMode::Optional)
    }

    /// Create a computed bool attribute.
    pub fn computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeMode::Computed)
    }

    /// Create an optional float attribute.
    pub fn optional_float() -> Self {
        Self::new(AttributeType::Float, AttributeMode::Optional)
    }

    /// Create a list attribute.
    pub fn list(elem: impl Into<Elem>, mode: AttributeMode) -> Self {
        let mut attr = Self::new(AttributeType::List, mode);
        attr.elem = Some(elem.into());
        attr
    }

    /// Create a set attribute keyed by the canonical rendering of each element.
    ///
    /// For sets of blocks the key leaves out computed-only attributes, so an
    /// element keeps its key once the provider fills those in.
    pub fn set(elem: impl Into<Elem>, mode: AttributeMode) -> Self {
        let mut attr = Self::new(AttributeType::Set, mode);
        let elem = elem.into();
        let key: SetKeyFn = match &elem {
            Elem::Block(block) => {
                let keyed: Vec<String> = block
                    .attributes
                    .iter()
                    .filter(|(_, a)| !a.is_computed_only())
                    .map(|(name, _)| name.clone())
                    .collect();
                Arc::new(move |value: &Value| {
                    Value::object(keyed.iter().map(|name| {
                        (name.clone(), value.get_attr(name).cloned().unwrap_or_default())
                    }))
                    .canonical_string()
                })
            },
            Elem::Attribute(_) => Arc::new(Value::canonical_string),
        };
        attr.set_key = Some(key);
        attr.elem = Some(elem);
        attr
    }

    /// Create a map attribute.
    pub fn map(elem: impl Into<Elem>, mode: AttributeMode) -> Self {
        let mut attr = Self::new(AttributeType::Map, mode);
        attr.elem = Some(elem.into());
        attr
    }

    /// Create a single nested object attribute.
    pub fn object(block: Block, mode: AttributeMode) -> Self {
        let mut attr = Self::new(AttributeType::Object, mode);
        attr.elem = Some(Elem::Block(block));
        attr
    }

    /// Create an optional list of nested blocks.
    pub fn list_of_blocks(block: Block) -> Self {
        Self::list(block, AttributeMode::Optional)
    }

    /// Create an optional set of nested blocks.
    pub fn set_of_blocks(block: Block) -> Self {
        Self::set(block, AttributeMode::Optional)
    }

    /// Create a string identity attribute that must be given on import.
    pub fn required_for_import(attr_type: AttributeType) -> Self {
        let mut attr = Self::new(attr_type, AttributeMode::Required);
        attr.import_mode = Some(ImportMode::Required);
        attr
    }

    /// Create an identity attribute that may be given on import.
    pub fn optional_for_import(attr_type: AttributeType) -> Self {
        let mut attr = Self::new(attr_type, AttributeMode::Optional);
        attr.import_mode = Some(ImportMode::Optional);
        attr
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark this attribute as forcing resource replacement when changed.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Mark this attribute as write-only.
    pub fn with_write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    /// Set a static default value for this attribute.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(default.into()));
        self
    }

    /// Set a deferred default for this attribute.
    pub fn with_default_func<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Func(Arc::new(f)));
        self
    }

    /// Replace the set equivalence key function.
    pub fn with_set_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.set_key = Some(Arc::new(f));
        self
    }

    /// Set the minimum number of elements.
    pub fn with_min_items(mut self, min: usize) -> Self {
        self.min_items = min;
        self
    }

    /// Set the maximum number of elements.
    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }

    /// Attach a validation function.
    pub fn with_validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &AttributePath) -> Vec<Diagnostic> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(f));
        self
    }

    /// Mark this attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// True when the provider may fill the value in.
    pub fn is_computed(&self) -> bool {
        self.mode.is_computed()
    }

    /// True for [`AttributeMode::Required`].
    pub fn is_required(&self) -> bool {
        self.mode == AttributeMode::Required
    }

    /// True when only the provider sets the value.
    pub fn is_computed_only(&self) -> bool {
        self.mode == AttributeMode::Computed
    }

    /// The element block, for nested block attributes.
    pub fn elem_block(&self) -> Option<&Block> {
        match &self.elem {
            Some(Elem::Block(block)) => Some(block),
            _ => None,
        }
    }

    /// The element attribute, for collections of values.
    pub fn elem_attribute(&self) -> Option<&Attribute> {
        match &self.elem {
            Some(Elem::Attribute(attr)) => Some(attr),
            _ => None,
        }
    }

    /// The equivalence key of a set element.
    pub fn set_key_of(&self, value: &Value) -> String {
        match &self.set_key {
            Some(f) => f(value),
            None => value.canonical_string(),
        }
    }

    /// Resolve the default, if any.
    pub fn default_value(&self) -> Result<Option<Value>, ProviderError> {
        self.default.as_ref().map(DefaultValue::resolve).transpose()
    }

    /// The wire type of values of this attribute.
    pub fn wire_type(&self) -> WireType {
        let elem_type = || match &self.elem {
            Some(Elem::Attribute(attr)) => attr.wire_type(),
            Some(Elem::Block(block)) => block.implied_type(),
            None => WireType::Dynamic,
        };
        match self.attr_type {
            AttributeType::Bool => WireType::Bool,
            AttributeType::Int | AttributeType::Float => WireType::Number,
            AttributeType::String => WireType::String,
            AttributeType::List => WireType::list(elem_type()),
            AttributeType::Set => WireType::set(elem_type()),
            AttributeType::Map => WireType::map(elem_type()),
            AttributeType::Object => elem_type(),
        }
    }

    /// The zero value of this attribute's type.
    pub fn zero_value(&self) -> Value {
        self.wire_type().zero_value()
    }

    fn describe(&self, name: &str) -> AttributeDescriptor {
        let mut flags = self.mode.flags();
        flags.sensitive = self.sensitive;
        AttributeDescriptor {
            name: name.to_string(),
            wire_type: self.wire_type(),
            flags,
            description: self.description.clone(),
            write_only: self.write_only,
            import_mode: self.import_mode,
        }
    }
}

/// A block of named attributes.
///
/// Blocks are the root of every schema and the element of nested block
/// attributes.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// The attributes within this block.
    pub attributes: BTreeMap<String, Attribute>,
    /// Human-readable description of the block.
    pub description: Option<String>,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Set the description for this block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// The object wire type of values of this block.
    pub fn implied_type(&self) -> WireType {
        WireType::Object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.wire_type()))
                .collect(),
        )
    }

    /// Find the schema node a path leads to, and the path with every step
    /// resolved to its structural kind (list index, map key, set key).
    pub fn resolve(&self, path: &AttributePath) -> Option<(SchemaNode<'_>, AttributePath)> {
        let mut node = SchemaNode::Block(self);
        let mut resolved = AttributePath::root();
        for step in path.steps() {
            let (next, step) = node.child(step)?;
            resolved.push(step);
            node = next;
        }
        Some((node, resolved))
    }

    /// Check the block for structural mistakes.
    pub fn validate(&self, kind: SchemaKind) -> Result<(), SchemaError> {
        let reserved = match kind {
            SchemaKind::Resource => RESERVED_RESOURCE_NAMES,
            SchemaKind::DataSource => RESERVED_DATA_SOURCE_NAMES,
            SchemaKind::Provider => RESERVED_PROVIDER_NAMES,
            SchemaKind::Identity => return self.validate_identity(),
        };
        for name in self.attributes.keys() {
            if reserved.contains(&name.as_str()) {
                return Err(SchemaError::ReservedName { name: name.clone() });
            }
        }
        if let Some(id) = self.attributes.get("id") {
            if kind != SchemaKind::Provider && id.attr_type != AttributeType::String {
                return Err(SchemaError::InvalidAttribute {
                    path: AttributePath::parse("id"),
                    message: "the id attribute must be a string".to_string(),
                });
            }
        }
        validate_block(self, &AttributePath::root(), false)
    }

    fn validate_identity(&self) -> Result<(), SchemaError> {
        if self.attributes.is_empty() {
            return Err(SchemaError::EmptyBlock {
                path: AttributePath::root(),
            });
        }
        for (name, attr) in &self.attributes {
            let path = AttributePath::root().attribute(name.clone());
            let invalid = |message: &str| SchemaError::InvalidIdentity {
                path: path.clone(),
                message: message.to_string(),
            };
            if attr.is_computed() {
                return Err(invalid("identity attributes cannot be computed"));
            }
            if attr.import_mode.is_none() {
                return Err(invalid(
                    "identity attributes must be either required or optional for import",
                ));
            }
            if attr.force_new {
                return Err(invalid("identity attributes cannot force replacement"));
            }
            if attr.write_only {
                return Err(invalid("identity attributes cannot be write-only"));
            }
            match attr.attr_type {
                AttributeType::Set | AttributeType::Map | AttributeType::Object => {
                    return Err(invalid(&format!(
                        "identity attributes cannot be of type {}",
                        attr.attr_type.name()
                    )));
                },
                AttributeType::List => match attr.elem_attribute() {
                    Some(elem) if elem.attr_type.is_primitive() => {},
                    _ => return Err(invalid("identity lists must hold primitive values")),
                },
                _ => {},
            }
        }
        Ok(())
    }

    /// Serializable description of the block.
    pub fn describe(&self) -> BlockDescriptor {
        let mut attributes = Vec::new();
        let mut block_types = Vec::new();
        for (name, attr) in &self.attributes {
            match (attr.attr_type, attr.elem_block()) {
                (AttributeType::List | AttributeType::Set | AttributeType::Object, Some(block)) => {
                    let nesting_mode = match attr.attr_type {
                        AttributeType::List => BlockNestingMode::List,
                        AttributeType::Set => BlockNestingMode::Set,
                        _ => BlockNestingMode::Single,
                    };
                    block_types.push(NestedBlockDescriptor {
                        type_name: name.clone(),
                        block: block.describe(),
                        nesting_mode,
                        min_items: attr.min_items,
                        max_items: attr.max_items,
                    });
                },
                _ => attributes.push(attr.describe(name)),
            }
        }
        BlockDescriptor {
            attributes,
            block_types,
            description: self.description.clone(),
        }
    }
}

fn validate_block(block: &Block, path: &AttributePath, in_set: bool) -> Result<(), SchemaError> {
    for (name, attr) in &block.attributes {
        validate_attribute(attr, &path.attribute(name.clone()), in_set)?;
    }
    Ok(())
}

fn validate_attribute(attr: &Attribute, path: &AttributePath, in_set: bool) -> Result<(), SchemaError> {
    let invalid = |message: &str| SchemaError::InvalidAttribute {
        path: path.clone(),
        message: message.to_string(),
    };
    if attr.default.is_some() {
        if attr.is_computed() {
            return Err(SchemaError::ComputedWithDefault { path: path.clone() });
        }
        if attr.is_required() {
            return Err(SchemaError::RequiredWithDefault { path: path.clone() });
        }
    }
    if attr.write_only {
        if attr.is_computed() {
            return Err(invalid("write-only attributes cannot be computed"));
        }
        if attr.force_new {
            return Err(invalid("write-only attributes cannot force replacement"));
        }
        if attr.default.is_some() {
            return Err(invalid("write-only attributes cannot have a default"));
        }
        if in_set {
            return Err(invalid("write-only attributes cannot be nested in a set"));
        }
    }
    if attr.is_computed_only() && attr.validate.is_some() {
        return Err(invalid("computed-only attributes cannot have a validation function"));
    }
    if (attr.min_items > 0 || attr.max_items > 0)
        && !matches!(attr.attr_type, AttributeType::List | AttributeType::Set)
    {
        return Err(invalid("min_items and max_items apply to lists and sets only"));
    }
    if attr.max_items > 0 && attr.min_items > attr.max_items {
        return Err(invalid("min_items exceeds max_items"));
    }

    if attr.attr_type.is_primitive() {
        if attr.elem.is_some() {
            return Err(invalid("primitive attributes cannot have an element schema"));
        }
        return Ok(());
    }

    let elem = attr.elem.as_ref().ok_or_else(|| SchemaError::MissingElem {
        path: path.clone(),
        kind: attr.attr_type.name().to_string(),
    })?;
    if attr.attr_type == AttributeType::Set && attr.set_key.is_none() {
        return Err(SchemaError::MissingSetKey { path: path.clone() });
    }
    let nested_in_set = in_set || attr.attr_type == AttributeType::Set;
    match (attr.attr_type, elem) {
        (AttributeType::Object, Elem::Attribute(_)) => {
            Err(invalid("object attributes need a block element"))
        },
        (AttributeType::Map, Elem::Block(_)) => Err(invalid("maps cannot hold nested blocks")),
        (_, Elem::Block(block)) => {
            if block.attributes.is_empty() {
                return Err(SchemaError::EmptyBlock { path: path.clone() });
            }
            validate_block(block, path, nested_in_set)
        },
        (_, Elem::Attribute(inner)) => {
            if inner.attr_type.is_primitive() {
                Ok(())
            } else {
                validate_attribute(inner, path, nested_in_set)
            }
        },
    }
}

/// Where a block is used; decides which names are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// A managed resource.
    Resource,
    /// A data source.
    DataSource,
    /// The provider configuration.
    Provider,
    /// A resource identity.
    Identity,
}

/// A node reached by walking a schema.
#[derive(Debug, Clone, Copy)]
pub enum SchemaNode<'a> {
    /// A block (the root, or a nested block element).
    Block(&'a Block),
    /// An attribute or collection element.
    Attribute(&'a Attribute),
}

impl<'a> SchemaNode<'a> {
    /// The wire type of values at this node.
    pub fn wire_type(&self) -> WireType {
        match *self {
            Self::Block(block) => block.implied_type(),
            Self::Attribute(attr) => attr.wire_type(),
        }
    }

    /// The attribute, if this node is one.
    pub fn attribute(&self) -> Option<&'a Attribute> {
        match *self {
            Self::Attribute(attr) => Some(attr),
            Self::Block(_) => None,
        }
    }

    /// Step into a child node, resolving the step's kind.
    pub fn child(&self, step: &PathStep) -> Option<(SchemaNode<'a>, PathStep)> {
        match *self {
            Self::Block(block) => {
                let name = match step {
                    PathStep::Attribute(name) | PathStep::Key(name) => name,
                    PathStep::Index(_) => return None,
                };
                block
                    .attributes
                    .get(name)
                    .map(|attr| (Self::Attribute(attr), PathStep::Attribute(name.clone())))
            },
            Self::Attribute(attr) => {
                let resolved = match attr.attr_type {
                    AttributeType::List => PathStep::Index(match step {
                        PathStep::Index(i) => *i,
                        PathStep::Attribute(s) | PathStep::Key(s) => s.parse().ok()?,
                    }),
                    AttributeType::Set | AttributeType::Map => PathStep::Key(step.as_segment()),
                    AttributeType::Object => {
                        let block = attr.elem_block()?;
                        return Self::Block(block).child(step);
                    },
                    _ => return None,
                };
                let node = match attr.elem.as_ref()? {
                    Elem::Attribute(inner) => Self::Attribute(inner),
                    Elem::Block(block) => Self::Block(block),
                };
                Some((node, resolved))
            },
        }
    }
}

/// Serializable description of a block, as returned by `get_provider_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    /// Attributes that are not nested blocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeDescriptor>,
    /// Nested blocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_types: Vec<NestedBlockDescriptor>,
    /// Human-readable description of the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Serializable description of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Attribute name.
    pub name: String,
    /// Wire type of the attribute.
    #[serde(rename = "type")]
    pub wire_type: WireType,
    /// Flags describing how the attribute can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted in configuration but never persisted.
    #[serde(default)]
    pub write_only: bool,
    /// Import participation for identity attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_mode: Option<ImportMode>,
}

/// The nesting mode for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// A single nested block (at most one).
    #[default]
    Single,
    /// A list of nested blocks (zero or more, ordered).
    List,
    /// A set of nested blocks (zero or more, unordered, unique).
    Set,
}

/// Serializable description of a nested block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlockDescriptor {
    /// Name of the block attribute.
    pub type_name: String,
    /// The block definition.
    #[serde(flatten)]
    pub block: BlockDescriptor,
    /// How the block is nested.
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Minimum number of blocks required.
    #[serde(default)]
    pub min_items: usize,
    /// Maximum number of blocks allowed (0 = unlimited).
    #[serde(default)]
    pub max_items: usize,
}

/// Versioned description of a resource, data source or provider schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// The version of this schema (for state upgrades).
    #[serde(default)]
    pub version: u64,
    /// The root block.
    pub block: BlockDescriptor,
}

/// Errors found while validating a schema at registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The flag form named both required and optional.
    #[error("{path}: cannot be both required and optional")]
    RequiredAndOptional {
        /// Offending attribute.
        path: AttributePath,
    },
    /// A computed attribute declared a default.
    #[error("{path}: default must be unset on computed attributes")]
    ComputedWithDefault {
        /// Offending attribute.
        path: AttributePath,
    },
    /// A required attribute declared a default.
    #[error("{path}: default is not allowed on required attributes")]
    RequiredWithDefault {
        /// Offending attribute.
        path: AttributePath,
    },
    /// A set attribute without an equivalence key function.
    #[error("{path}: set attributes need an equivalence key function")]
    MissingSetKey {
        /// Offending attribute.
        path: AttributePath,
    },
    /// A collection attribute without an element schema.
    #[error("{path}: {kind} attributes need an element schema")]
    MissingElem {
        /// Offending attribute.
        path: AttributePath,
        /// The attribute kind.
        kind: String,
    },
    /// A nested block with no attributes.
    #[error("{path}: blocks must declare at least one attribute")]
    EmptyBlock {
        /// Offending block.
        path: AttributePath,
    },
    /// A reserved top-level name.
    #[error("{name} is a reserved attribute name")]
    ReservedName {
        /// The reserved name.
        name: String,
    },
    /// Any other attribute-level mistake.
    #[error("{path}: {message}")]
    InvalidAttribute {
        /// Offending attribute.
        path: AttributePath,
        /// What is wrong.
        message: String,
    },
    /// An identity attribute breaks the identity rules.
    #[error("identity {path}: {message}")]
    InvalidIdentity {
        /// Offending attribute.
        path: AttributePath,
        /// What is wrong.
        message: String,
    },
    /// A resource-level mistake, such as a broken upgrader chain.
    #[error("{resource}: {message}")]
    InvalidResource {
        /// The resource type name.
        resource: String,
        /// What is wrong.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_block() -> Block {
        Block::new()
            .with_attribute("port", Attribute::required_int())
            .with_attribute("proto", Attribute::optional_string())
    }

    #[test]
    fn test_attribute_flags_convert_to_modes() {
        assert_eq!(
            AttributeMode::from_flags(AttributeFlags::required()).unwrap(),
            AttributeMode::Required
        );
        assert_eq!(
            AttributeMode::from_flags(AttributeFlags::optional_computed()).unwrap(),
            AttributeMode::OptionalComputed
        );
        let both = AttributeFlags {
            required: true,
            optional: true,
            ..Default::default()
        };
        assert!(matches!(
            AttributeMode::from_flags(both),
            Err(SchemaError::RequiredAndOptional { .. })
        ));
        assert!(AttributeMode::from_flags(AttributeFlags::default()).is_err());
    }

    #[test]
    fn test_attribute_builders() {
        let attr = Attribute::required_string()
            .with_description("A test attribute")
            .with_force_new();

        assert_eq!(attr.attr_type, AttributeType::String);
        assert!(attr.is_required());
        assert_eq!(attr.description, Some("A test attribute".to_string()));
        assert!(attr.force_new);
    }

    #[test]
    fn test_implied_type() {
        let block = Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("tags", Attribute::set(AttributeType::String, AttributeMode::Optional))
            .with_attribute("rule", Attribute::list_of_blocks(rules_block()));

        let expected = WireType::object([
            ("name", WireType::String),
            ("tags", WireType::set(WireType::String)),
            (
                "rule",
                WireType::list(WireType::object([
                    ("port", WireType::Number),
                    ("proto", WireType::String),
                ])),
            ),
        ]);
        assert_eq!(block.implied_type(), expected);
    }

    #[test]
    fn test_validate_rejects_computed_default() {
        let block = Block::new().with_attribute("x", Attribute::computed_string().with_default("a"));
        assert!(matches!(
            block.validate(SchemaKind::Resource),
            Err(SchemaError::ComputedWithDefault { .. })
        ));

        let block = Block::new().with_attribute("x", Attribute::required_string().with_default("a"));
        assert!(matches!(
            block.validate(SchemaKind::Resource),
            Err(SchemaError::RequiredWithDefault { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_set_without_key() {
        let mut tags = Attribute::set(AttributeType::String, AttributeMode::Optional);
        tags.set_key = None;
        let block = Block::new().with_attribute("tags", tags);
        assert!(matches!(
            block.validate(SchemaKind::Resource),
            Err(SchemaError::MissingSetKey { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_elem_and_empty_block() {
        let block = Block::new().with_attribute(
            "ports",
            Attribute::new(AttributeType::List, AttributeMode::Optional),
        );
        assert!(matches!(
            block.validate(SchemaKind::Resource),
            Err(SchemaError::MissingElem { .. })
        ));

        let block = Block::new().with_attribute("rule", Attribute::list_of_blocks(Block::new()));
        assert!(matches!(
            block.validate(SchemaKind::Resource),
            Err(SchemaError::EmptyBlock { .. })
        ));
    }

    #[test]
    fn test_validate_reserved_names() {
        let block = Block::new().with_attribute("provisioner", Attribute::optional_string());
        assert!(matches!(
            block.validate(SchemaKind::Resource),
            Err(SchemaError::ReservedName { .. })
        ));
        // Data sources may use provisioner.
        assert!(block.validate(SchemaKind::DataSource).is_ok());

        let block = Block::new().with_attribute("id", Attribute::optional_int());
        assert!(block.validate(SchemaKind::Resource).is_err());
    }

    #[test]
    fn test_validate_write_only_rules() {
        let ok = Block::new().with_attribute("password", Attribute::optional_string().with_write_only());
        assert!(ok.validate(SchemaKind::Resource).is_ok());

        let bad = Block::new().with_attribute(
            "password",
            Attribute::optional_string().with_write_only().with_force_new(),
        );
        assert!(bad.validate(SchemaKind::Resource).is_err());

        let in_set = Block::new().with_attribute(
            "creds",
            Attribute::set_of_blocks(
                Block::new().with_attribute("secret", Attribute::optional_string().with_write_only()),
            ),
        );
        assert!(in_set.validate(SchemaKind::Resource).is_err());
    }

    #[test]
    fn test_validate_identity() {
        let identity = Block::new()
            .with_attribute("name", Attribute::required_for_import(AttributeType::String))
            .with_attribute("region", Attribute::optional_for_import(AttributeType::String));
        assert!(identity.validate(SchemaKind::Identity).is_ok());

        assert!(Block::new().validate(SchemaKind::Identity).is_err());

        let computed = Block::new().with_attribute("name", Attribute::computed_string());
        assert!(matches!(
            computed.validate(SchemaKind::Identity),
            Err(SchemaError::InvalidIdentity { .. })
        ));

        let mut map = Attribute::map(AttributeType::String, AttributeMode::Optional);
        map.import_mode = Some(ImportMode::Optional);
        let with_map = Block::new().with_attribute("labels", map);
        assert!(with_map.validate(SchemaKind::Identity).is_err());

        assert!(ImportMode::from_flags(true, true).is_err());
        assert_eq!(ImportMode::from_flags(false, true).unwrap(), Some(ImportMode::Optional));
    }

    #[test]
    fn test_resolve_paths() {
        let block = Block::new()
            .with_attribute("labels", Attribute::map(AttributeType::String, AttributeMode::Optional))
            .with_attribute("rule", Attribute::list_of_blocks(rules_block()))
            .with_attribute("tags", Attribute::set(AttributeType::String, AttributeMode::Optional));

        let (node, resolved) = block.resolve(&AttributePath::parse("rule.1.port")).unwrap();
        assert_eq!(node.attribute().unwrap().attr_type, AttributeType::Int);
        assert_eq!(resolved, AttributePath::root().attribute("rule").index(1).attribute("port"));

        let (_, resolved) = block.resolve(&AttributePath::parse("labels.0")).unwrap();
        assert_eq!(resolved, AttributePath::root().attribute("labels").key("0"));

        assert!(block.resolve(&AttributePath::parse("rule.x")).is_none());
        assert!(block.resolve(&AttributePath::parse("missing")).is_none());
    }

    #[test]
    fn test_describe_splits_blocks() {
        let block = Block::new()
            .with_attribute("name", Attribute::required_string().sensitive())
            .with_attribute("rule", Attribute::list_of_blocks(rules_block()).with_max_items(3));
        let desc = block.describe();
        assert_eq!(desc.attributes.len(), 1);
        assert_eq!(desc.attributes[0].name, "name");
        assert!(desc.attributes[0].flags.sensitive);
        assert_eq!(desc.block_types.len(), 1);
        assert_eq!(desc.block_types[0].nesting_mode, BlockNestingMode::List);
        assert_eq!(desc.block_types[0].max_items, 3);
    }

    #[test]
    fn test_default_func() {
        let attr = Attribute::optional_string().with_default_func(|| Ok(Value::from("generated")));
        assert_eq!(attr.default_value().unwrap(), Some(Value::from("generated")));
        assert_eq!(Attribute::optional_string().default_value().unwrap(), None);
    }
}
