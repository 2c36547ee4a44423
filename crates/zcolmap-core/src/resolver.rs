/*!
Value resolution.

Each descriptor's location chain is walked in order against the context and
the document; the first non-null hit wins, then the default literal, then
null. A null on a required descriptor stops the cycle with
[`ColmapError::MissingRequiredValue`] before anything is built. Values are
never coerced here.
*/

use crate::descriptor::{ColumnDescriptor, DescriptorId, DescriptorRegistry};
use crate::error::{ColmapError, Result};
use crate::source::{Location, MessageDocument, ValueSource};
use crate::value::ColumnValue;
use indexmap::IndexMap;
use tracing::{debug, trace};

/// Values resolved during one cycle; a missing entry is null
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedValues {
    values: IndexMap<DescriptorId, ColumnValue>,
}

impl ResolvedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DescriptorId) -> Option<&ColumnValue> {
        self.values.get(&id)
    }

    pub fn is_null(&self, id: DescriptorId) -> bool {
        !self.values.contains_key(&id)
    }

    /// Record a value; `None` and null-spelled text clear the slot
    pub fn set(&mut self, id: DescriptorId, value: Option<ColumnValue>) {
        match value.filter(|v| !v.is_sql_null()) {
            Some(v) => {
                self.values.insert(id, v);
            }
            None => {
                self.values.shift_remove(&id);
            }
        }
    }

    /// Number of non-null values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, &ColumnValue)> {
        self.values.iter().map(|(id, v)| (*id, v))
    }
}

/// Resolves descriptor values from a context and a document
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueResolver;

impl ValueResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve one descriptor. Returns `Ok(None)` only for optional descriptors.
    pub fn resolve(
        &self,
        descriptor: &ColumnDescriptor,
        context: &dyn ValueSource,
        document: &MessageDocument,
    ) -> Result<Option<ColumnValue>> {
        let found = descriptor.location_chain.iter().find_map(|token| {
            let value = Location::parse(token)
                .fetch(context, document)
                .filter(|v| !v.is_sql_null());
            if let Some(v) = &value {
                trace!("Location [{}] supplied [{}] for {}", token, v, descriptor.label());
            }
            value
        });

        let value = found.or_else(|| {
            let default = descriptor.default_value.clone().filter(|v| !v.is_sql_null());
            if default.is_some() {
                trace!("Using default value for {}", descriptor.label());
            }
            default
        });

        if value.is_none() && !descriptor.optional {
            debug!("No value for required descriptor {}", descriptor.describe());
            return Err(ColmapError::missing_required(descriptor.label()));
        }
        Ok(value)
    }

    /// Resolve every descriptor of a registry into a fresh value set
    pub fn resolve_all(
        &self,
        registry: &DescriptorRegistry,
        context: &dyn ValueSource,
        document: &MessageDocument,
    ) -> Result<ResolvedValues> {
        let mut values = ResolvedValues::new();
        for (id, descriptor) in registry.iter() {
            let value = self.resolve(descriptor, context, document)?;
            values.set(id, value);
        }
        debug!(
            "Resolved {} of {} descriptors",
            values.len(),
            registry.len()
        );
        Ok(values)
    }
}
