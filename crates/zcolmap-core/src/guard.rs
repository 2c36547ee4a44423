//! Pre-execution checks on a cycle's resolved values.

use crate::descriptor::DescriptorRegistry;
use crate::error::{ColmapError, Result};
use crate::resolver::ResolvedValues;
use tracing::warn;

/// Refuses vacuous writes and unresolved required descriptors
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationGuard;

impl ValidationGuard {
    pub fn new() -> Self {
        Self
    }

    /// Every required descriptor must carry a value
    pub fn ensure_required(&self, registry: &DescriptorRegistry, values: &ResolvedValues) -> Result<()> {
        match registry
            .iter()
            .find(|(id, d)| !d.optional && values.is_null(*id))
        {
            Some((_, descriptor)) => Err(ColmapError::missing_required(descriptor.label())),
            None => Ok(()),
        }
    }

    /// At least one descriptor must carry a value
    pub fn ensure_has_data(&self, table: &str, values: &ResolvedValues) -> Result<()> {
        if values.is_empty() {
            warn!("No column values are available to write to [{}]", table);
            return Err(ColmapError::no_data(table));
        }
        Ok(())
    }

    pub fn check(&self, table: &str, registry: &DescriptorRegistry, values: &ResolvedValues) -> Result<()> {
        self.ensure_required(registry, values)?;
        self.ensure_has_data(table, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ColumnDescriptor, DescriptorId};

    fn registry() -> DescriptorRegistry {
        DescriptorRegistry::new(
            vec![
                ColumnDescriptor::column("A").located_at(["a"]).optional(true),
                ColumnDescriptor::column("B").located_at(["b"]).optional(true),
            ],
            None,
        )
        .expect("valid registry")
    }

    #[test]
    fn test_all_null_is_no_data() {
        let err = ValidationGuard::new()
            .check("LOG", &registry(), &ResolvedValues::new())
            .unwrap_err();
        assert!(matches!(err, ColmapError::NoDataToWrite { ref table } if table == "LOG"));
    }

    #[test]
    fn test_one_value_is_enough() -> Result<()> {
        let mut values = ResolvedValues::new();
        values.set(DescriptorId::Column(1), Some("b".into()));
        ValidationGuard::new().check("LOG", &registry(), &values)
    }

    #[test]
    fn test_missing_required_detected() {
        let registry = DescriptorRegistry::new(
            vec![ColumnDescriptor::column("A").located_at(["a"])],
            None,
        )
        .expect("valid registry");
        let err = ValidationGuard::new()
            .ensure_required(&registry, &ResolvedValues::new())
            .unwrap_err();
        assert!(matches!(err, ColmapError::MissingRequiredValue { .. }));
    }
}
