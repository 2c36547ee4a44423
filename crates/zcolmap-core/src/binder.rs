/*!
Parameter binding.

The binder walks a [`StatementPlan`]'s bound entries in slot order and
coerces each resolved value according to its descriptor's type tag:

| tag | accepted values | bound as |
|---|---|---|
| none | anything | the value itself (documents as JSON text) |
| `DATE` | text in the configured date format | [`SqlParam::Timestamp`] |
| `TEXT_BLOB` | anything | [`SqlParam::Clob`] of its text |
| `BINARY_BLOB` | bytes, text, document | [`SqlParam::Blob`] |

Inlined entries are never bound, and the slot sequence is checked to be
exactly `1..=value_slots` before anything reaches the statement.
*/

use crate::connection::PreparedStatement;
use crate::date_format::is_time_sentinel;
use crate::descriptor::{ColumnDescriptor, DescriptorId, DescriptorRegistry, SqlTypeTag};
use crate::error::{ColmapError, Result};
use crate::plan::{BatchKey, StatementPlan};
use crate::resolver::ResolvedValues;
use crate::value::{ColumnValue, SqlParam};
use tracing::{debug, trace};

/// A coerced parameter and the plan entry it came from
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub slot: usize,
    pub id: DescriptorId,
    pub param: SqlParam,
}

#[derive(Debug, Clone, Default)]
pub struct ParameterBinder {
    null_marker: Option<String>,
}

impl ParameterBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text equal to `marker` binds as NULL, explicitly clearing the column
    pub fn with_null_marker(mut self, marker: impl Into<String>) -> Self {
        self.null_marker = Some(marker.into());
        self
    }

    /// Apply a descriptor's type tag to one value
    pub fn coerce(&self, descriptor: &ColumnDescriptor, value: &ColumnValue) -> Result<SqlParam> {
        if let (Some(marker), Some(text)) = (&self.null_marker, value.as_text()) {
            if text == marker.as_str() {
                trace!("Null marker for {} binds NULL", descriptor.label());
                return Ok(SqlParam::Null);
            }
        }

        match descriptor.tag {
            SqlTypeTag::Default => Ok(SqlParam::from(value)),
            SqlTypeTag::Date => coerce_date(descriptor, value),
            SqlTypeTag::TextBlob => Ok(SqlParam::Clob(value.to_text())),
            SqlTypeTag::BinaryBlob => match value {
                ColumnValue::Bytes(bytes) => Ok(SqlParam::Blob(bytes.clone())),
                ColumnValue::Text(text) => Ok(SqlParam::Blob(text.clone().into_bytes())),
                ColumnValue::Document(doc) => Ok(SqlParam::Blob(serde_json::to_vec(doc)?)),
                other => Err(ColmapError::unsupported_type(
                    descriptor.label(),
                    "bytes, text or document",
                    other.type_name(),
                )),
            },
        }
    }

    /// Coerce every bound entry of `plan`, in slot order
    pub fn parameters(
        &self,
        plan: &StatementPlan,
        registry: &DescriptorRegistry,
        values: &ResolvedValues,
    ) -> Result<Vec<BoundParameter>> {
        let mut bound = Vec::with_capacity(plan.value_slots());

        for (slot, entry) in plan.bound_entries() {
            let expected = bound.len() + 1;
            if slot != expected {
                return Err(ColmapError::plan_mismatch(format!(
                    "entry {} holds slot {} where slot {} was expected",
                    entry.id, slot, expected
                )));
            }
            let descriptor = registry.get(entry.id).ok_or_else(|| {
                ColmapError::plan_mismatch(format!("{} is not in the registry", entry.id))
            })?;
            let value = values.get(entry.id).ok_or_else(|| {
                ColmapError::plan_mismatch(format!("{} was planned but has no value", entry.id))
            })?;

            let param = self.coerce(descriptor, value)?;
            bound.push(BoundParameter {
                slot,
                id: entry.id,
                param,
            });
        }

        if bound.len() != plan.value_slots() {
            return Err(ColmapError::plan_mismatch(format!(
                "plan declares {} value slots but {} were bound",
                plan.value_slots(),
                bound.len()
            )));
        }
        Ok(bound)
    }

    /// Coerce and bind the plan's values into `stmt`
    pub fn bind(
        &self,
        stmt: &mut dyn PreparedStatement,
        plan: &StatementPlan,
        registry: &DescriptorRegistry,
        values: &ResolvedValues,
    ) -> Result<Vec<BoundParameter>> {
        let bound = self.parameters(plan, registry, values)?;
        for p in &bound {
            trace!("Binding slot {} ({}) = {}", p.slot, p.id, p.param);
            stmt.bind(p.slot, p.param.clone())?;
        }
        debug!("Bound {} parameters for {}", bound.len(), plan.table());
        Ok(bound)
    }

    /// Bind one batch key into the plan's trailing key slots
    pub fn bind_key(
        &self,
        stmt: &mut dyn PreparedStatement,
        plan: &StatementPlan,
        key: &BatchKey,
    ) -> Result<()> {
        if key.arity() != plan.key_arity() {
            return Err(ColmapError::plan_mismatch(format!(
                "batch key {} has arity {} but the statement expects {}",
                key,
                key.arity(),
                plan.key_arity()
            )));
        }
        for (slot, value) in plan.key_slots().zip(key.values()) {
            trace!("Binding key slot {} = {}", slot, value);
            stmt.bind(slot, SqlParam::from(value))?;
        }
        Ok(())
    }
}

fn coerce_date(descriptor: &ColumnDescriptor, value: &ColumnValue) -> Result<SqlParam> {
    let text = value.as_text().ok_or_else(|| {
        ColmapError::unsupported_type(descriptor.label(), "date text", value.type_name())
    })?;

    if is_time_sentinel(text) {
        return Err(ColmapError::plan_mismatch(format!(
            "current-time sentinel for {} reached the binder",
            descriptor.label()
        )));
    }

    let format = descriptor.date_format.as_ref().ok_or_else(|| {
        ColmapError::configuration(format!(
            "date column {} does not specify a date format",
            descriptor.label()
        ))
    })?;

    let parsed = format.parse(text)?;
    let timestamp = match &descriptor.zone_shift {
        Some(shift) => shift.apply(parsed)?,
        None => parsed,
    };
    Ok(SqlParam::Timestamp(timestamp))
}
