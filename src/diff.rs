//! Instance diffs.
//!
//! [`schema_diff`] compares a resource's prior state with its configuration
//! and produces an [`InstanceDiff`]: one [`AttributeDiff`] per changed path.
//! Leaves are compared by raw equality; lists recurse per index, sets per
//! element matched by equivalence key, maps per key and nested objects per
//! attribute.
//!
//! After the structural diff, a resource's [`CustomizeDiff`] callbacks may
//! rewrite computed entries through a [`ResourceDiff`].

use crate::context::CallContext;
use crate::diagnostic::Diagnostic;
use crate::error::ProviderError;
use crate::path::AttributePath;
use crate::schema::{Attribute, AttributeType, Block, Elem};
use crate::value::{TypeError, Value};
use crate::walk::{
    normalize_attribute, normalize_block, remove_value_at, set_elements_by_key, set_value_at,
    value_at, zero_value_at,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// The change to a single attribute path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDiff {
    /// The prior value.
    pub old: Value,
    /// The planned value. Unknown when `new_computed` is set.
    pub new: Value,
    /// The value will only be known after apply.
    pub new_computed: bool,
    /// The value is removed.
    pub new_removed: bool,
    /// The change cannot be made in place.
    pub requires_new: bool,
}

impl AttributeDiff {
    /// A change from `old` to `new`.
    pub fn change(old: Value, new: Value) -> Self {
        Self {
            old,
            new,
            ..Default::default()
        }
    }

    /// A change from `old` to a value known only after apply.
    pub fn computed(old: Value) -> Self {
        Self {
            old,
            new: Value::Unknown,
            new_computed: true,
            ..Default::default()
        }
    }

    /// The removal of `old`.
    pub fn removed(old: Value) -> Self {
        Self {
            old,
            new: Value::Null,
            new_removed: true,
            ..Default::default()
        }
    }

    /// Set `requires_new`.
    pub fn requiring_new(mut self, requires_new: bool) -> Self {
        self.requires_new = requires_new;
        self
    }

    /// True when the entry changes anything.
    pub fn is_change(&self) -> bool {
        self.new_computed || self.new_removed || self.old != self.new
    }
}

/// Attribute-level changes planned for one resource instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceDiff {
    /// Changes keyed by resolved attribute path.
    pub attributes: BTreeMap<AttributePath, AttributeDiff>,
    /// The instance is destroyed.
    pub destroy: bool,
    /// Identity value planned for the instance, overriding the prior one.
    pub identity: Option<Value>,
}

impl InstanceDiff {
    /// An empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// A diff that destroys the instance.
    pub fn destroy() -> Self {
        Self {
            destroy: true,
            ..Default::default()
        }
    }

    /// True when nothing changes.
    pub fn is_empty(&self) -> bool {
        !self.destroy && self.attributes.values().all(|a| !a.is_change())
    }

    /// True when any entry requires the instance to be replaced.
    pub fn requires_new(&self) -> bool {
        self.attributes.values().any(|a| a.requires_new)
    }

    /// Paths that require replacement, `id` excluded.
    pub fn requires_replace(&self) -> Vec<AttributePath> {
        self.attributes
            .iter()
            .filter(|(path, a)| a.requires_new && path.root_attribute() != Some("id"))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// The entry at `path`.
    pub fn get(&self, path: &AttributePath) -> Option<&AttributeDiff> {
        self.attributes.get(path)
    }

    /// Add or replace the entry at `path`.
    pub fn insert(&mut self, path: AttributePath, diff: AttributeDiff) {
        self.attributes.insert(path, diff);
    }

    /// Entries at `prefix` or below it.
    pub fn entries_under<'a>(
        &'a self,
        prefix: &'a AttributePath,
    ) -> impl Iterator<Item = (&'a AttributePath, &'a AttributeDiff)> + 'a {
        self.attributes
            .iter()
            .filter(move |(path, _)| path.starts_with(prefix))
    }

    /// Drop every entry at `prefix` or below it.
    pub fn remove_under(&mut self, prefix: &AttributePath) {
        self.attributes.retain(|path, _| !path.starts_with(prefix));
    }

    /// Top-level attributes with at least one entry.
    pub fn changed_roots(&self) -> BTreeSet<String> {
        self.attributes
            .keys()
            .filter_map(|path| path.root_attribute().map(str::to_string))
            .collect()
    }

    /// Apply the diff to `prior`.
    ///
    /// A replacing diff starts from an empty object. New values are written
    /// in ascending path order with computed entries becoming unknown;
    /// removals run afterwards in descending order so list positions stay
    /// valid. The result is normalized against `block`.
    pub fn apply(&self, prior: &Value, block: &Block) -> Result<Value, TypeError> {
        if self.destroy {
            return Ok(Value::Null);
        }
        let mut out = if self.requires_new() || !prior.is_present() {
            Value::empty_object()
        } else {
            prior.clone()
        };
        for (path, entry) in &self.attributes {
            if entry.new_removed {
                continue;
            }
            let value = if entry.new_computed {
                Value::Unknown
            } else {
                entry.new.clone()
            };
            set_value_at(block, &mut out, path, value)?;
        }
        for (path, entry) in self.attributes.iter().rev() {
            if entry.new_removed {
                remove_value_at(block, &mut out, path);
            }
        }
        normalize_block(block, &out)
    }

    fn mark_id_replaced(&mut self, block: &Block, prior: &Value) {
        if !block.attributes.contains_key("id") {
            return;
        }
        let old = prior.get_attr("id").cloned().unwrap_or_default();
        self.insert(
            AttributePath::root().attribute("id"),
            AttributeDiff::computed(old).requiring_new(true),
        );
    }
}

/// Customized entries: `Some` replaces the entry, `None` clears the path.
pub type DiffOverrides = BTreeMap<AttributePath, Option<AttributeDiff>>;

/// Diff `config` against `prior` under `block`.
///
/// `config` must already be normalized against `block`. With no prior state
/// the diff describes a create: computed attributes left unset become
/// unknown. When any entry requires replacement the diff is expanded with
/// [`expand_replacement`].
pub fn schema_diff(
    block: &Block,
    prior: Option<&Value>,
    config: &Value,
) -> Result<InstanceDiff, ProviderError> {
    let diff = structural_diff(block, prior, config)?;
    match prior {
        Some(prior) if diff.requires_new() => {
            expand_replacement(block, prior, config, diff, &DiffOverrides::new())
        },
        _ => Ok(diff),
    }
}

fn structural_diff(
    block: &Block,
    prior: Option<&Value>,
    config: &Value,
) -> Result<InstanceDiff, ProviderError> {
    let old = prior.unwrap_or(&Value::Null);
    let mut differ = Differ::new(prior.is_none());
    differ.block(block, &AttributePath::root(), old, config, false)?;
    let mut diff = differ.diff;
    if prior.is_some() && diff.requires_new() {
        diff.mark_id_replaced(block, old);
    }
    trace!(entries = diff.attributes.len(), "Computed structural diff");
    Ok(diff)
}

/// Recompute a replacing diff as a create, keeping the prior values as the
/// old side.
///
/// Every entry of the create diff loses its `requires_new` flag and takes its
/// old value from `prior`. Entries of `diff` missing from the create diff are
/// carried over, and `requires_new` flags of `diff` are merged back in.
/// `overrides` are applied last.
pub fn expand_replacement(
    block: &Block,
    prior: &Value,
    config: &Value,
    diff: InstanceDiff,
    overrides: &DiffOverrides,
) -> Result<InstanceDiff, ProviderError> {
    let mut replacement = structural_diff(block, None, config)?;
    for (path, entry) in replacement.attributes.iter_mut() {
        entry.requires_new = false;
        entry.old = value_at(block, prior, path).cloned().unwrap_or_default();
    }
    for (path, entry) in diff.attributes {
        let requires_new = entry.requires_new;
        let merged = replacement.attributes.entry(path).or_insert(entry);
        if requires_new {
            merged.requires_new = true;
        }
    }
    for (path, entry) in overrides {
        match entry {
            Some(entry) => replacement.insert(path.clone(), entry.clone()),
            None => replacement.remove_under(path),
        }
    }
    replacement.destroy = diff.destroy;
    replacement.identity = diff.identity;
    debug!(
        entries = replacement.attributes.len(),
        "Expanded diff for replacement"
    );
    Ok(replacement)
}

struct Differ {
    diff: InstanceDiff,
    create: bool,
}

impl Differ {
    fn new(create: bool) -> Self {
        Self {
            diff: InstanceDiff::new(),
            create,
        }
    }

    fn insert(&mut self, path: AttributePath, entry: AttributeDiff) {
        trace!(path = %path, requires_new = entry.requires_new, "Diff entry");
        self.diff.insert(path, entry);
    }

    fn len(&self) -> usize {
        self.diff.attributes.len()
    }

    fn block(
        &mut self,
        block: &Block,
        path: &AttributePath,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) -> Result<(), ProviderError> {
        for (name, attr) in &block.attributes {
            let old = old.get_attr(name).unwrap_or(&Value::Null);
            let config = config.get_attr(name).unwrap_or(&Value::Null);
            self.attribute(
                attr,
                path.attribute(name.clone()),
                old,
                config,
                force_new || attr.force_new,
            )?;
        }
        Ok(())
    }

    fn attribute(
        &mut self,
        attr: &Attribute,
        path: AttributePath,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) -> Result<(), ProviderError> {
        let requires_new = force_new && !self.create;
        if config.is_unknown() {
            self.insert(path, AttributeDiff::computed(old.clone()).requiring_new(requires_new));
            return Ok(());
        }
        if config.is_null() {
            return self.absent(attr, path, old, requires_new);
        }
        match (attr.attr_type, &attr.elem) {
            (AttributeType::List, Some(_)) => self.list(attr, path, old, config, force_new),
            (AttributeType::Set, Some(_)) => self.set(attr, path, old, config, force_new),
            (AttributeType::Map, Some(_)) => self.map(attr, path, old, config, force_new),
            (AttributeType::Object, Some(Elem::Block(block))) => {
                self.nested(block, path, old, config, force_new)
            },
            _ => {
                if config != old {
                    self.insert(
                        path,
                        AttributeDiff::change(old.clone(), config.clone()).requiring_new(requires_new),
                    );
                }
                Ok(())
            },
        }
    }

    fn absent(
        &mut self,
        attr: &Attribute,
        path: AttributePath,
        old: &Value,
        requires_new: bool,
    ) -> Result<(), ProviderError> {
        if attr.is_computed() {
            if self.create {
                self.insert(path, AttributeDiff::computed(Value::Null));
            }
            return Ok(());
        }
        if let Some(default) = attr.default_value()? {
            if default != *old {
                self.insert(
                    path,
                    AttributeDiff::change(old.clone(), default).requiring_new(requires_new),
                );
            }
            return Ok(());
        }
        if old.is_present() {
            self.insert(path, AttributeDiff::removed(old.clone()).requiring_new(requires_new));
        }
        Ok(())
    }

    fn element(
        &mut self,
        attr: &Attribute,
        path: AttributePath,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) -> Result<(), ProviderError> {
        let requires_new = force_new && !self.create;
        if config.is_null() {
            if !old.is_null() {
                self.insert(
                    path,
                    AttributeDiff::change(old.clone(), Value::Null).requiring_new(requires_new),
                );
            }
            return Ok(());
        }
        match &attr.elem {
            Some(Elem::Attribute(inner)) => {
                self.attribute(inner, path, old, config, force_new || inner.force_new)
            },
            Some(Elem::Block(block)) => {
                if config.is_unknown() {
                    self.insert(path, AttributeDiff::computed(old.clone()).requiring_new(requires_new));
                    return Ok(());
                }
                self.nested(block, path, old, config, force_new)
            },
            None => {
                if config != old {
                    self.insert(
                        path,
                        AttributeDiff::change(old.clone(), config.clone()).requiring_new(requires_new),
                    );
                }
                Ok(())
            },
        }
    }

    fn nested(
        &mut self,
        block: &Block,
        path: AttributePath,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) -> Result<(), ProviderError> {
        let before = self.len();
        self.block(block, &path, old, config, force_new)?;
        self.presence(path, before, old, config, force_new);
        Ok(())
    }

    fn list(
        &mut self,
        attr: &Attribute,
        path: AttributePath,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) -> Result<(), ProviderError> {
        let before = self.len();
        let old_items = old.as_elements().unwrap_or_default();
        let new_items = config.as_elements().unwrap_or_default();
        for (i, item) in new_items.iter().enumerate() {
            let prior = old_items.get(i).unwrap_or(&Value::Null);
            self.element(attr, path.index(i), prior, item, force_new)?;
        }
        for (i, item) in old_items.iter().enumerate().skip(new_items.len()) {
            self.insert(
                path.index(i),
                AttributeDiff::removed(item.clone()).requiring_new(force_new && !self.create),
            );
        }
        self.presence(path, before, old, config, force_new);
        Ok(())
    }

    fn set(
        &mut self,
        attr: &Attribute,
        path: AttributePath,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) -> Result<(), ProviderError> {
        let requires_new = force_new && !self.create;
        let before = self.len();
        let old_by_key = set_elements_by_key(attr, old);
        let new_by_key = set_elements_by_key(attr, config);
        for (key, item) in &new_by_key {
            let elem_path = path.key(key.clone());
            match old_by_key.get(key) {
                Some(prior) => self.element(attr, elem_path, prior, item, force_new)?,
                None => {
                    let value = new_element(attr, item)?;
                    self.insert(
                        elem_path,
                        AttributeDiff::change(Value::Null, value).requiring_new(requires_new),
                    );
                },
            }
        }
        for (key, item) in &old_by_key {
            if !new_by_key.contains_key(key) {
                self.insert(
                    path.key(key.clone()),
                    AttributeDiff::removed((*item).clone()).requiring_new(requires_new),
                );
            }
        }
        self.presence(path, before, old, config, force_new);
        Ok(())
    }

    fn map(
        &mut self,
        attr: &Attribute,
        path: AttributePath,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) -> Result<(), ProviderError> {
        let empty = BTreeMap::new();
        let before = self.len();
        let old_entries = old.as_entries().unwrap_or(&empty);
        let new_entries = config.as_entries().unwrap_or(&empty);
        for (key, item) in new_entries {
            let prior = old_entries.get(key).unwrap_or(&Value::Null);
            self.element(attr, path.key(key.clone()), prior, item, force_new)?;
        }
        for (key, item) in old_entries {
            if !new_entries.contains_key(key) {
                self.insert(
                    path.key(key.clone()),
                    AttributeDiff::removed(item.clone()).requiring_new(force_new && !self.create),
                );
            }
        }
        self.presence(path, before, old, config, force_new);
        Ok(())
    }

    /// A container that appears or disappears without any entry below it
    /// (an empty collection, or an object with only null attributes) gets an
    /// entry of its own.
    fn presence(
        &mut self,
        path: AttributePath,
        before: usize,
        old: &Value,
        config: &Value,
        force_new: bool,
    ) {
        if self.len() == before && old.is_null() != config.is_null() {
            self.insert(
                path,
                AttributeDiff::change(old.clone(), config.clone())
                    .requiring_new(force_new && !self.create),
            );
        }
    }
}

/// The planned value of a set element with no prior counterpart. Nested
/// computed attributes become unknown and defaults are filled in.
fn new_element(attr: &Attribute, item: &Value) -> Result<Value, ProviderError> {
    match &attr.elem {
        Some(Elem::Block(block)) if item.is_present() => {
            let mut differ = Differ::new(true);
            differ.block(block, &AttributePath::root(), &Value::Null, item, false)?;
            Ok(differ.diff.apply(&Value::Null, block)?)
        },
        _ => Ok(item.clone()),
    }
}

/// Restricted view of a planned diff handed to [`CustomizeDiff`] callbacks.
///
/// Reads see the planned value. Writes are limited to top-level computed
/// attributes whose entries do not already require replacement.
#[derive(Debug)]
pub struct ResourceDiff<'a> {
    block: &'a Block,
    prior: &'a Value,
    config: &'a Value,
    diff: InstanceDiff,
    planned: Value,
    overrides: DiffOverrides,
    forced: bool,
}

impl<'a> ResourceDiff<'a> {
    /// Wrap a diff. `prior` is null for a create.
    pub fn new(
        block: &'a Block,
        prior: &'a Value,
        config: &'a Value,
        diff: InstanceDiff,
    ) -> Result<Self, ProviderError> {
        let planned = diff.apply(prior, block)?;
        Ok(Self {
            block,
            prior,
            config,
            diff,
            planned,
            overrides: DiffOverrides::new(),
            forced: false,
        })
    }

    fn resolve(&self, path: impl Into<AttributePath>) -> Result<(&'a Attribute, AttributePath), ProviderError> {
        let path = path.into();
        let (node, resolved) = self
            .block
            .resolve(&path)
            .ok_or_else(|| ProviderError::Validation(format!("{} is not a valid key", path)))?;
        let attr = node
            .attribute()
            .ok_or_else(|| ProviderError::Validation(format!("{} is not an attribute", path)))?;
        Ok((attr, resolved))
    }

    /// The planned value at `path`, or the zero value of its type.
    pub fn get(&self, path: impl Into<AttributePath>) -> Value {
        let path = path.into();
        value_at(self.block, &self.planned, &path)
            .cloned()
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| zero_value_at(self.block, &path))
    }

    /// The prior and planned values at `path`.
    pub fn get_change(&self, path: impl Into<AttributePath>) -> (Value, Value) {
        let path = path.into();
        let old = value_at(self.block, self.prior, &path).cloned().unwrap_or_default();
        let new = value_at(self.block, &self.planned, &path).cloned().unwrap_or_default();
        (old, new)
    }

    /// True when the planned value at `path` differs from the prior one.
    pub fn has_change(&self, path: impl Into<AttributePath>) -> bool {
        let (old, new) = self.get_change(path);
        old != new
    }

    /// True when the planned value at `path` contains no unknowns.
    pub fn new_value_known(&self, path: impl Into<AttributePath>) -> bool {
        let path = path.into();
        value_at(self.block, &self.planned, &path).map_or(true, Value::is_wholly_known)
    }

    /// The instance id from the prior state; empty on create.
    pub fn id(&self) -> &str {
        self.prior.get_attr("id").and_then(Value::as_str).unwrap_or_default()
    }

    /// The configuration as received.
    pub fn get_raw_config(&self) -> &Value {
        self.config
    }

    /// The prior state as received.
    pub fn get_raw_state(&self) -> &Value {
        self.prior
    }

    /// The planned value.
    pub fn get_raw_plan(&self) -> &Value {
        &self.planned
    }

    /// The diff as it stands.
    pub fn diff(&self) -> &InstanceDiff {
        &self.diff
    }

    fn check_key(&self, path: &AttributePath, caller: &str, nested: bool) -> Result<&'a Attribute, ProviderError> {
        let (attr, resolved) = self.resolve(path.clone())?;
        if !nested && resolved.len() > 1 {
            return Err(ProviderError::Validation(format!(
                "{} can only be set on root keys, not {}",
                caller, path
            )));
        }
        if !attr.is_computed() {
            return Err(ProviderError::Validation(format!(
                "{} only operates on computed keys - {} is not one",
                caller, path
            )));
        }
        if self.diff.entries_under(&resolved).any(|(_, e)| e.requires_new) {
            return Err(ProviderError::Validation(format!(
                "{} cannot change {}: it already requires replacement",
                caller, path
            )));
        }
        Ok(attr)
    }

    /// Plan a new value for a computed top-level attribute.
    pub fn set_new(&mut self, path: impl Into<AttributePath>, value: impl Into<Value>) -> Result<(), ProviderError> {
        let path = path.into();
        let attr = self.check_key(&path, "SetNew", false)?;
        let (_, resolved) = self.resolve(path.clone())?;
        let value = normalize_attribute(attr, &value.into(), &resolved)?;
        if value.is_null() && attr.is_required() {
            return Err(ProviderError::Validation(format!(
                "SetNew cannot remove required attribute {}",
                path
            )));
        }
        if attr.attr_type == AttributeType::Set {
            let removed: Vec<String> = self
                .diff
                .entries_under(&resolved)
                .filter(|(p, e)| e.new_removed && p.len() == resolved.len() + 1)
                .filter_map(|(p, _)| p.last().map(|s| s.as_segment()))
                .collect();
            let keys = set_elements_by_key(attr, &value);
            if let Some(key) = removed.iter().find(|k| keys.contains_key(*k)) {
                return Err(ProviderError::Validation(format!(
                    "SetNew cannot reintroduce removed element {} of {}",
                    key, path
                )));
            }
        }
        let old = value_at(self.block, self.prior, &resolved).cloned().unwrap_or_default();
        self.replace(resolved, Some(AttributeDiff::change(old, value)))
    }

    /// Mark a computed top-level attribute as known only after apply.
    pub fn set_new_computed(&mut self, path: impl Into<AttributePath>) -> Result<(), ProviderError> {
        let path = path.into();
        self.check_key(&path, "SetNewComputed", false)?;
        let (_, resolved) = self.resolve(path)?;
        let old = value_at(self.block, self.prior, &resolved).cloned().unwrap_or_default();
        self.replace(resolved, Some(AttributeDiff::computed(old)))
    }

    /// Drop every planned change at or below a computed path.
    pub fn clear(&mut self, path: impl Into<AttributePath>) -> Result<(), ProviderError> {
        let path = path.into();
        self.check_key(&path, "Clear", true)?;
        let (_, resolved) = self.resolve(path)?;
        self.replace(resolved, None)
    }

    /// Require replacement because of the change at `path`.
    pub fn force_new(&mut self, path: impl Into<AttributePath>) -> Result<(), ProviderError> {
        let path = path.into();
        let (_, resolved) = self.resolve(path.clone())?;
        if !self.has_change(resolved.clone()) {
            return Err(ProviderError::Validation(format!(
                "ForceNew: No changes for {}",
                path
            )));
        }
        let marked: Vec<AttributePath> = self
            .diff
            .entries_under(&resolved)
            .filter(|(_, e)| e.is_change())
            .map(|(p, _)| p.clone())
            .collect();
        for p in marked {
            if let Some(entry) = self.diff.attributes.get_mut(&p) {
                entry.requires_new = true;
                self.overrides.insert(p, Some(entry.clone()));
            }
        }
        if self.prior.is_present() {
            self.diff.mark_id_replaced(self.block, self.prior);
        }
        self.forced = true;
        self.planned = self.diff.apply(self.prior, self.block)?;
        Ok(())
    }

    fn replace(&mut self, path: AttributePath, entry: Option<AttributeDiff>) -> Result<(), ProviderError> {
        self.diff.remove_under(&path);
        if let Some(entry) = &entry {
            self.diff.insert(path.clone(), entry.clone());
        }
        self.overrides.insert(path, entry);
        self.planned = self.diff.apply(self.prior, self.block)?;
        Ok(())
    }

    /// Finish customization. A diff that newly requires replacement is
    /// expanded, keeping the customized entries.
    pub fn finish(self) -> Result<InstanceDiff, ProviderError> {
        if self.forced && self.prior.is_present() {
            return expand_replacement(self.block, self.prior, self.config, self.diff, &self.overrides);
        }
        Ok(self.diff)
    }
}

/// A callback that may adjust a planned diff.
#[async_trait]
pub trait CustomizeDiff: Send + Sync {
    /// Inspect and rewrite the diff.
    async fn customize(&self, ctx: &CallContext, diff: &mut ResourceDiff<'_>) -> Result<(), ProviderError>;
}

struct CustomizeDiffFn<F>(F);

#[async_trait]
impl<F> CustomizeDiff for CustomizeDiffFn<F>
where
    F: Fn(&CallContext, &mut ResourceDiff<'_>) -> Result<(), ProviderError> + Send + Sync,
{
    async fn customize(&self, ctx: &CallContext, diff: &mut ResourceDiff<'_>) -> Result<(), ProviderError> {
        (self.0)(ctx, diff)
    }
}

/// Wrap a synchronous function as a [`CustomizeDiff`].
pub fn customize_diff_fn<F>(f: F) -> Arc<dyn CustomizeDiff>
where
    F: Fn(&CallContext, &mut ResourceDiff<'_>) -> Result<(), ProviderError> + Send + Sync + 'static,
{
    Arc::new(CustomizeDiffFn(f))
}

/// Run customization callbacks in order. The first failure stops the chain;
/// edits made before it are kept.
pub async fn run_customize_chain(
    ctx: &CallContext,
    chain: &[Arc<dyn CustomizeDiff>],
    diff: &mut ResourceDiff<'_>,
) -> Vec<Diagnostic> {
    for (i, customizer) in chain.iter().enumerate() {
        if let Err(err) = customizer.customize(ctx, diff).await {
            debug!(index = i, error = %err, "Diff customization failed");
            return vec![Diagnostic::from(err)];
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeMode;
    use serde_json::json;

    fn block() -> Block {
        Block::new()
            .with_attribute("id", Attribute::optional_computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("size", Attribute::optional_int().with_force_new())
            .with_attribute("region", Attribute::optional_string().with_default("us-east-1"))
            .with_attribute("arn", Attribute::computed_string())
            .with_attribute("tags", Attribute::map(AttributeType::String, AttributeMode::Optional))
            .with_attribute("ports", Attribute::list(AttributeType::Int, AttributeMode::Optional))
            .with_attribute(
                "rule",
                Attribute::set_of_blocks(
                    Block::new()
                        .with_attribute("cidr", Attribute::required_string())
                        .with_attribute("rule_id", Attribute::computed_string()),
                ),
            )
    }

    fn val(json: serde_json::Value) -> Value {
        normalize_block(&block(), &Value::from(json)).unwrap()
    }

    fn path(s: &str) -> AttributePath {
        block().resolve(&AttributePath::parse(s)).unwrap().1
    }

    #[test]
    fn test_create_marks_computed_unknown_and_fills_defaults() {
        let b = block();
        let config = val(json!({"name": "web"}));
        let diff = schema_diff(&b, None, &config).unwrap();

        assert!(diff.get(&path("arn")).unwrap().new_computed);
        assert!(diff.get(&path("id")).unwrap().new_computed);
        assert_eq!(diff.get(&path("region")).unwrap().new, Value::from("us-east-1"));
        assert!(!diff.requires_new());

        let planned = diff.apply(&Value::Null, &b).unwrap();
        assert_eq!(planned.get_attr("name"), Some(&Value::from("web")));
        assert_eq!(planned.get_attr("arn"), Some(&Value::Unknown));
        assert_eq!(planned.get_attr("tags"), Some(&Value::Null));
    }

    #[test]
    fn test_force_new_marks_id() {
        let b = block();
        let prior = val(json!({"id": "i-1", "name": "web", "size": 5, "region": "us-east-1", "arn": "arn:1"}));
        let config = val(json!({"name": "web", "size": 10}));
        let diff = schema_diff(&b, Some(&prior), &config).unwrap();

        let size = diff.get(&path("size")).unwrap();
        assert_eq!(size.old, Value::int(5));
        assert_eq!(size.new, Value::int(10));
        assert!(size.requires_new);

        let id = diff.get(&path("id")).unwrap();
        assert_eq!(id.old, Value::from("i-1"));
        assert!(id.new_computed);
        assert!(id.requires_new);

        // Replacement turns computed attributes unknown, keeping prior as old.
        let arn = diff.get(&path("arn")).unwrap();
        assert!(arn.new_computed);
        assert_eq!(arn.old, Value::from("arn:1"));
        assert!(!arn.requires_new);

        assert_eq!(diff.requires_replace(), vec![path("size")]);
        let planned = diff.apply(&prior, &b).unwrap();
        assert_eq!(planned.get_attr("id"), Some(&Value::Unknown));
        assert_eq!(planned.get_attr("size"), Some(&Value::int(10)));
    }

    #[test]
    fn test_update_keeps_computed_and_removes_unset() {
        let b = block();
        let prior = val(json!({
            "id": "i-1", "name": "web", "region": "us-east-1", "arn": "arn:1",
            "tags": {"env": "prod", "team": "core"}, "ports": [80, 443, 8080]
        }));
        let config = val(json!({"name": "web", "tags": {"env": "dev"}, "ports": [80]}));
        let diff = schema_diff(&b, Some(&prior), &config).unwrap();

        assert!(diff.get(&path("arn")).is_none());
        assert!(diff.get(&path("tags.team")).unwrap().new_removed);
        assert_eq!(diff.get(&path("tags.env")).unwrap().new, Value::from("dev"));
        assert!(diff.get(&path("ports.1")).unwrap().new_removed);
        assert!(diff.get(&path("ports.2")).unwrap().new_removed);

        let planned = diff.apply(&prior, &b).unwrap();
        assert_eq!(planned.get_attr("arn"), Some(&Value::from("arn:1")));
        assert_eq!(planned.get_attr("ports"), Some(&Value::list([Value::int(80)])));
        assert_eq!(
            planned.get_attr("tags"),
            Some(&Value::map([("env", Value::from("dev"))]))
        );
    }

    #[test]
    fn test_unknown_config_is_computed() {
        let b = block();
        let prior = val(json!({"id": "i-1", "name": "web", "region": "us-east-1"}));
        let mut config = val(json!({"name": "web"}));
        if let Some(entries) = config.as_entries_mut() {
            entries.insert("name".to_string(), Value::Unknown);
        }
        let diff = schema_diff(&b, Some(&prior), &config).unwrap();
        let name = diff.get(&path("name")).unwrap();
        assert!(name.new_computed);
        assert!(!name.requires_new);
    }

    #[test]
    fn test_set_elements_matched_by_key() {
        let b = block();
        let prior = val(json!({
            "id": "i-1", "name": "web", "region": "us-east-1",
            "rule": [{"cidr": "10.0.0.0/8", "rule_id": "r1"}, {"cidr": "0.0.0.0/0", "rule_id": "r2"}]
        }));
        let config = val(json!({
            "name": "web",
            "rule": [{"cidr": "10.0.0.0/8"}, {"cidr": "192.168.0.0/16"}]
        }));
        let diff = schema_diff(&b, Some(&prior), &config).unwrap();

        let removed: Vec<_> = diff.attributes.values().filter(|e| e.new_removed).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].old.get_attr("cidr"), Some(&Value::from("0.0.0.0/0")));

        let planned = diff.apply(&prior, &b).unwrap();
        let rules = planned.get_attr("rule").unwrap().as_elements().unwrap();
        assert_eq!(rules.len(), 2);
        let kept = rules
            .iter()
            .find(|r| r.get_attr("cidr") == Some(&Value::from("10.0.0.0/8")))
            .unwrap();
        assert_eq!(kept.get_attr("rule_id"), Some(&Value::from("r1")));
        let added = rules
            .iter()
            .find(|r| r.get_attr("cidr") == Some(&Value::from("192.168.0.0/16")))
            .unwrap();
        assert_eq!(added.get_attr("rule_id"), Some(&Value::Unknown));
    }

    #[test]
    fn test_empty_collection_differs_from_null() {
        let b = block();
        let prior = val(json!({"id": "i-1", "name": "web", "region": "us-east-1"}));
        let config = val(json!({"name": "web", "ports": []}));
        let diff = schema_diff(&b, Some(&prior), &config).unwrap();
        let ports = diff.get(&path("ports")).unwrap();
        assert_eq!(ports.old, Value::Null);
        assert_eq!(ports.new, Value::List(vec![]));
        assert!(diff.apply(&prior, &b).unwrap().get_attr("ports").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_customize_rules() {
        let b = block();
        let prior = val(json!({"id": "i-1", "name": "web", "region": "us-east-1", "arn": "arn:1"}));
        let config = val(json!({"name": "api", "region": "us-east-1"}));
        let diff = schema_diff(&b, Some(&prior), &config).unwrap();
        let mut rd = ResourceDiff::new(&b, &prior, &config, diff).unwrap();

        assert!(rd.set_new("name", "other").is_err());
        assert!(rd.set_new("rule.0.rule_id", "x").is_err());
        assert!(rd.force_new("region").is_err());

        rd.set_new("arn", "arn:2").unwrap();
        assert_eq!(rd.get("arn"), Value::from("arn:2"));
        rd.set_new_computed("arn").unwrap();
        assert!(!rd.new_value_known("arn"));

        rd.force_new("name").unwrap();
        assert!(rd.set_new("name", "x").is_err());
        let diff = rd.finish().unwrap();
        assert!(diff.get(&path("id")).unwrap().requires_new);
        assert!(diff.get(&path("name")).unwrap().requires_new);
        assert!(diff.get(&path("arn")).unwrap().new_computed);
    }

    #[tokio::test]
    async fn test_customize_chain_stops_on_error_and_keeps_edits() {
        let b = block();
        let config = val(json!({"name": "web"}));
        let diff = schema_diff(&b, None, &config).unwrap();
        let mut rd = ResourceDiff::new(&b, &Value::Null, &config, diff).unwrap();

        let chain = vec![
            customize_diff_fn(|_, d| d.set_new("arn", "arn:first")),
            customize_diff_fn(|_, _| Err(ProviderError::Validation("second failed".to_string()))),
            customize_diff_fn(|_, d| d.set_new("arn", "arn:third")),
        ];
        let ctx = CallContext::new("test_thing");
        let diags = run_customize_chain(&ctx, &chain, &mut rd).await;
        assert_eq!(diags.len(), 1);
        assert!(diags[0].detail.as_deref().unwrap_or_default().contains("second failed"));
        assert_eq!(rd.get("arn"), Value::from("arn:first"));
    }
}
