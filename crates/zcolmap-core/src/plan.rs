/*!
Statement plans.

The [`PlanBuilder`] walks the registry once, drops descriptors whose value is
null, and records for every survivor whether it was bound to a placeholder
slot or inlined as a dialect literal. The resulting [`StatementPlan`] carries
both the SQL text and that ordered entry list; the binder consumes the same
object, so the text and the bound parameters cannot drift apart.

Slots are 1-based, matching driver placeholder numbering.

## Shapes

```text
INSERT INTO T ( A, B, C ) VALUES ( ?, SYSDATE, ? )
UPDATE T SET A = ? , B = SYSDATE  <where template>
DELETE FROM T <where template>
UPDATE T SET A = ? , B = ?  WHERE KEY IN ( ?, ? )
```

Table and column names come only from configuration and are concatenated
verbatim; runtime values never appear in the text except as the current-time
literal.
*/

use crate::date_format::TimeSentinel;
use crate::descriptor::{ColumnDescriptor, DescriptorId, DescriptorRegistry, SqlTypeTag};
use crate::error::{ColmapError, Result};
use crate::resolver::ResolvedValues;
use crate::value::ColumnValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use tracing::{debug, trace, warn};

/// SQL dialect; only affects how the current-time sentinel is inlined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Oracle,
    Sqlite,
}

impl Dialect {
    /// Literal standing in for the database's current time
    pub fn current_time_literal(&self, sentinel: TimeSentinel, in_utc: bool) -> String {
        match self {
            Dialect::Oracle => {
                let base = match sentinel {
                    TimeSentinel::Date => "SYSDATE",
                    TimeSentinel::Timestamp => "SYSTIMESTAMP",
                };
                if in_utc {
                    format!("CONVERT_TIME({}, SESSIONTIMEZONE ,'GMT')", base)
                } else {
                    base.to_string()
                }
            }
            Dialect::Sqlite => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

impl FromStr for Dialect {
    type Err = ColmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oracle" => Ok(Dialect::Oracle),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(ColmapError::configuration(format!("unknown dialect [{}]", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    BatchUpdate,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::BatchUpdate => "BATCH UPDATE",
        };
        f.write_str(s)
    }
}

/// How a planned descriptor reaches the statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Bound { slot: usize },
    Inlined { literal: String },
}

/// One descriptor that survived null filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub id: DescriptorId,
    pub column: Option<String>,
    pub emission: Emission,
}

impl PlanEntry {
    pub fn slot(&self) -> Option<usize> {
        match self.emission {
            Emission::Bound { slot } => Some(slot),
            Emission::Inlined { .. } => None,
        }
    }
}

/// SQL text plus the ordered entries it was rendered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementPlan {
    kind: StatementKind,
    table: String,
    sql: String,
    entries: Vec<PlanEntry>,
    value_slots: usize,
    key_arity: usize,
}

impl StatementPlan {
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Entries that occupy a placeholder, with their slot, in slot order
    pub fn bound_entries(&self) -> impl Iterator<Item = (usize, &PlanEntry)> {
        self.entries.iter().filter_map(|e| e.slot().map(|slot| (slot, e)))
    }

    /// Columns the statement writes, in emission order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| e.column.as_deref())
    }

    /// Placeholders filled from resolved values
    pub fn value_slots(&self) -> usize {
        self.value_slots
    }

    /// Number of trailing key placeholders (batched updates only)
    pub fn key_arity(&self) -> usize {
        self.key_arity
    }

    /// Slots holding the batch key, after every value slot
    pub fn key_slots(&self) -> Range<usize> {
        let first = self.value_slots + 1;
        first..first + self.key_arity
    }

    pub fn parameter_count(&self) -> usize {
        self.value_slots + self.key_arity
    }
}

impl fmt::Display for StatementPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Values identifying the rows of one batch entry; arity matches the plan's `IN` list
#[derive(Debug, Clone, PartialEq)]
pub struct BatchKey {
    values: Vec<ColumnValue>,
}

impl BatchKey {
    pub fn new(values: Vec<ColumnValue>) -> Self {
        Self { values }
    }

    pub fn single(value: impl Into<ColumnValue>) -> Self {
        Self {
            values: vec![value.into()],
        }
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// Group keys into entries of `arity` values; a short final group repeats its last key
    pub fn chunk(keys: Vec<ColumnValue>, arity: usize) -> Vec<BatchKey> {
        if arity == 0 {
            return Vec::new();
        }
        keys.chunks(arity)
            .map(|chunk| {
                let mut values = chunk.to_vec();
                while values.len() < arity {
                    match values.last().cloned() {
                        Some(last) => values.push(last),
                        None => break,
                    }
                }
                BatchKey { values }
            })
            .collect()
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Renders plans from a registry and one cycle's resolved values
#[derive(Debug, Clone, Copy)]
pub struct PlanBuilder<'r> {
    registry: &'r DescriptorRegistry,
    dialect: Dialect,
    sysdate_in_utc: bool,
}

impl<'r> PlanBuilder<'r> {
    pub fn new(registry: &'r DescriptorRegistry) -> Self {
        Self {
            registry,
            dialect: Dialect::default(),
            sysdate_in_utc: false,
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_sysdate_in_utc(mut self, in_utc: bool) -> Self {
        self.sysdate_in_utc = in_utc;
        self
    }

    pub fn registry(&self) -> &'r DescriptorRegistry {
        self.registry
    }

    /// `INSERT INTO t ( names ) VALUES ( placeholders )`
    pub fn insert(&self, table: &str, values: &ResolvedValues) -> Result<StatementPlan> {
        if self.registry.where_clause().is_some() {
            warn!("WHERE clause configured for INSERT into {} is ignored", table);
        }

        let mut collector = Collector::default();
        self.collect_columns(values, &mut collector)?;
        if collector.entries.is_empty() {
            return Err(ColmapError::no_data(table));
        }

        let mut names = Vec::with_capacity(collector.entries.len());
        let mut placeholders = Vec::with_capacity(collector.entries.len());
        for entry in &collector.entries {
            names.push(entry.column.clone().unwrap_or_default());
            placeholders.push(render_emission(&entry.emission));
        }

        let sql = format!(
            "INSERT INTO {} ( {} ) VALUES ( {} )",
            table,
            names.join(", "),
            placeholders.join(", ")
        );
        Ok(collector.finish(StatementKind::Insert, table, sql, 0))
    }

    /// `UPDATE t SET a = ? , b = ?  <where template>`; WHERE values bind after SET values
    pub fn update(&self, table: &str, values: &ResolvedValues) -> Result<StatementPlan> {
        let clause = self.registry.where_clause().ok_or_else(|| {
            ColmapError::configuration(format!("UPDATE of {} has no WHERE template", table))
        })?;

        let mut collector = Collector::default();
        self.collect_columns(values, &mut collector)?;
        if collector.entries.is_empty() {
            return Err(ColmapError::no_data(table));
        }
        let set_list = render_set_list(&collector.entries);
        self.collect_where(values, &mut collector)?;

        let sql = format!("UPDATE {} SET {} {}", table, set_list, clause.template());
        Ok(collector.finish(StatementKind::Update, table, sql, 0))
    }

    /// `DELETE FROM t <where template>`
    pub fn delete(&self, table: &str, values: &ResolvedValues) -> Result<StatementPlan> {
        let clause = self.registry.where_clause().ok_or_else(|| {
            ColmapError::configuration(format!("DELETE from {} has no WHERE template", table))
        })?;

        let mut collector = Collector::default();
        self.collect_where(values, &mut collector)?;

        let sql = format!("DELETE FROM {} {}", table, clause.template());
        Ok(collector.finish(StatementKind::Delete, table, sql, 0))
    }

    /// `UPDATE t SET a = ? , b = ?  WHERE key IN ( ?, ... )` with a fixed key arity
    pub fn batched_update(
        &self,
        table: &str,
        values: &ResolvedValues,
        key_column: &str,
        key_arity: usize,
    ) -> Result<StatementPlan> {
        if key_arity == 0 {
            return Err(ColmapError::configuration("batch key arity must be at least 1"));
        }

        let mut collector = Collector::default();
        self.collect_columns(values, &mut collector)?;
        if collector.entries.is_empty() {
            return Err(ColmapError::no_data(table));
        }

        let keys = vec!["?"; key_arity].join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} IN ( {} )",
            table,
            render_set_list(&collector.entries),
            key_column,
            keys
        );
        Ok(collector.finish(StatementKind::BatchUpdate, table, sql, key_arity))
    }

    fn collect_columns(&self, values: &ResolvedValues, collector: &mut Collector) -> Result<()> {
        for (ix, descriptor) in self.registry.columns().iter().enumerate() {
            let id = DescriptorId::Column(ix);
            let Some(name) = descriptor.name.as_deref() else {
                continue;
            };
            let Some(value) = values.get(id) else {
                trace!("Skipping null column {}", name);
                continue;
            };

            let emission = match self.inline_literal(descriptor, value.as_text()) {
                Some(literal) => Emission::Inlined { literal },
                None => collector.next_slot(),
            };
            collector.entries.push(PlanEntry {
                id,
                column: Some(name.to_string()),
                emission,
            });
        }
        Ok(())
    }

    fn collect_where(&self, values: &ResolvedValues, collector: &mut Collector) -> Result<()> {
        for (ix, descriptor) in self.registry.where_descriptors().iter().enumerate() {
            let id = DescriptorId::Where(ix);
            let value = values
                .get(id)
                .ok_or_else(|| ColmapError::missing_required(descriptor.label()))?;

            if self.inline_literal(descriptor, value.as_text()).is_some() {
                return Err(ColmapError::unsupported_type(
                    descriptor.label(),
                    "a bindable date",
                    "current-time sentinel",
                ));
            }
            let emission = collector.next_slot();
            collector.entries.push(PlanEntry {
                id,
                column: None,
                emission,
            });
        }
        Ok(())
    }

    fn inline_literal(&self, descriptor: &ColumnDescriptor, text: Option<&str>) -> Option<String> {
        if descriptor.tag != SqlTypeTag::Date {
            return None;
        }
        let sentinel = TimeSentinel::recognise(text?)?;
        Some(self.dialect.current_time_literal(sentinel, self.sysdate_in_utc))
    }
}

#[derive(Default)]
struct Collector {
    entries: Vec<PlanEntry>,
    slots: usize,
}

impl Collector {
    fn next_slot(&mut self) -> Emission {
        self.slots += 1;
        Emission::Bound { slot: self.slots }
    }

    fn finish(self, kind: StatementKind, table: &str, sql: String, key_arity: usize) -> StatementPlan {
        debug!(
            "Built {} plan for {} with {} entries, {} value slots: {}",
            kind,
            table,
            self.entries.len(),
            self.slots,
            sql
        );
        StatementPlan {
            kind,
            table: table.to_string(),
            sql,
            entries: self.entries,
            value_slots: self.slots,
            key_arity,
        }
    }
}

fn render_emission(emission: &Emission) -> String {
    match emission {
        Emission::Bound { .. } => "?".to_string(),
        Emission::Inlined { literal } => literal.clone(),
    }
}

/// `A = ? , B = SYSDATE ` - each item keeps its trailing space
fn render_set_list(entries: &[PlanEntry]) -> String {
    entries
        .iter()
        .filter_map(|e| {
            e.column
                .as_deref()
                .map(|name| format!("{} = {} ", name, render_emission(&e.emission)))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ColumnDescriptor, WhereClause};

    fn values(pairs: &[(DescriptorId, &str)]) -> ResolvedValues {
        let mut values = ResolvedValues::new();
        for (id, v) in pairs {
            values.set(*id, Some(ColumnValue::from(*v)));
        }
        values
    }

    fn logger_registry() -> Result<DescriptorRegistry> {
        DescriptorRegistry::new(
            vec![
                ColumnDescriptor::column("TN").located_at(["tn"]),
                ColumnDescriptor::column("NOTE").located_at(["note"]).optional(true),
                ColumnDescriptor::column("LOGGED").located_at(["t"]).date("yyyy-MM-dd")?,
                ColumnDescriptor::column("SPID").located_at(["spid"]).optional(true),
            ],
            Some(WhereClause::new(
                "WHERE ID = ?",
                vec![ColumnDescriptor::where_param().located_at(["id"])],
            )?),
        )
    }

    #[test]
    fn test_insert_skips_nulls_and_inlines_sentinel() -> Result<()> {
        let registry = DescriptorRegistry::new(logger_registry()?.columns().to_vec(), None)?;
        let values = values(&[
            (DescriptorId::Column(0), "2135551212"),
            (DescriptorId::Column(2), "sysdate"),
            (DescriptorId::Column(3), "1234"),
        ]);

        let plan = PlanBuilder::new(&registry).insert("SOA_LOG", &values)?;
        assert_eq!(
            plan.sql(),
            "INSERT INTO SOA_LOG ( TN, LOGGED, SPID ) VALUES ( ?, SYSDATE, ? )"
        );
        assert_eq!(plan.parameter_count(), 2);

        let bound: Vec<_> = plan.bound_entries().map(|(slot, e)| (slot, e.id)).collect();
        assert_eq!(
            bound,
            vec![(1, DescriptorId::Column(0)), (2, DescriptorId::Column(3))]
        );
        Ok(())
    }

    #[test]
    fn test_update_renders_set_then_where() -> Result<()> {
        let registry = logger_registry()?;
        let values = values(&[
            (DescriptorId::Column(0), "2135551212"),
            (DescriptorId::Column(1), "moved"),
            (DescriptorId::Column(2), "2026-10-19"),
            (DescriptorId::Where(0), "77"),
        ]);

        let plan = PlanBuilder::new(&registry).update("SV", &values)?;
        assert_eq!(
            plan.sql(),
            "UPDATE SV SET TN = ? , NOTE = ? , LOGGED = ?  WHERE ID = ?"
        );
        let ids: Vec<_> = plan.bound_entries().map(|(_, e)| e.id).collect();
        assert_eq!(ids.last(), Some(&DescriptorId::Where(0)));
        assert_eq!(plan.parameter_count(), 4);
        Ok(())
    }

    #[test]
    fn test_utc_literal_for_oracle() -> Result<()> {
        let registry = DescriptorRegistry::new(
            vec![ColumnDescriptor::column("LOGGED").located_at(["t"]).date("yyyy")?],
            None,
        )?;
        let values = values(&[(DescriptorId::Column(0), "SYSTIMESTAMP")]);

        let plan = PlanBuilder::new(&registry)
            .with_sysdate_in_utc(true)
            .insert("T", &values)?;
        assert_eq!(
            plan.sql(),
            "INSERT INTO T ( LOGGED ) VALUES ( CONVERT_TIME(SYSTIMESTAMP, SESSIONTIMEZONE ,'GMT') )"
        );
        assert_eq!(plan.parameter_count(), 0);

        let sqlite = PlanBuilder::new(&registry)
            .with_dialect(Dialect::Sqlite)
            .insert("T", &values)?;
        assert_eq!(sqlite.sql(), "INSERT INTO T ( LOGGED ) VALUES ( CURRENT_TIMESTAMP )");
        Ok(())
    }

    #[test]
    fn test_sentinel_only_inlines_for_date_columns() -> Result<()> {
        let registry = DescriptorRegistry::new(
            vec![ColumnDescriptor::column("NOTE").located_at(["n"])],
            None,
        )?;
        let plan = PlanBuilder::new(&registry)
            .insert("T", &values(&[(DescriptorId::Column(0), "SYSDATE")]))?;
        assert_eq!(plan.sql(), "INSERT INTO T ( NOTE ) VALUES ( ? )");
        Ok(())
    }

    #[test]
    fn test_delete_binds_only_where() -> Result<()> {
        let registry = logger_registry()?;
        let values = values(&[(DescriptorId::Column(0), "x"), (DescriptorId::Where(0), "77")]);

        let plan = PlanBuilder::new(&registry).delete("SV", &values)?;
        assert_eq!(plan.sql(), "DELETE FROM SV WHERE ID = ?");
        assert_eq!(plan.entries().len(), 1);
        assert_eq!(plan.entries()[0].id, DescriptorId::Where(0));
        Ok(())
    }

    #[test]
    fn test_batched_update_key_arity() -> Result<()> {
        let registry = DescriptorRegistry::new(
            vec![
                ColumnDescriptor::column("LRN").located_at(["LRN"]).optional(true),
                ColumnDescriptor::column("CLASSDPC").located_at(["CLASSDPC"]).optional(true),
                ColumnDescriptor::column("CNAMDPC").located_at(["CNAMDPC"]).optional(true),
            ],
            None,
        )?;
        let values = values(&[(DescriptorId::Column(0), "9725550000"), (DescriptorId::Column(2), "-")]);

        let plan = PlanBuilder::new(&registry).batched_update("SV", &values, "REFERENCEKEY", 3)?;
        assert_eq!(
            plan.sql(),
            "UPDATE SV SET LRN = ? , CNAMDPC = ?  WHERE REFERENCEKEY IN ( ?, ?, ? )"
        );
        assert_eq!(plan.value_slots(), 2);
        assert_eq!(plan.key_slots(), 3..6);
        assert_eq!(plan.parameter_count(), 5);
        assert!(PlanBuilder::new(&registry)
            .batched_update("SV", &values, "REFERENCEKEY", 0)
            .unwrap_err()
            .is_configuration());
        Ok(())
    }

    #[test]
    fn test_empty_set_list_is_no_data() -> Result<()> {
        let registry = logger_registry()?;
        let values = values(&[(DescriptorId::Where(0), "77")]);
        let err = PlanBuilder::new(&registry).update("SV", &values).unwrap_err();
        assert!(matches!(err, ColmapError::NoDataToWrite { .. }));
        Ok(())
    }

    #[test]
    fn test_sentinel_in_where_is_rejected() -> Result<()> {
        let registry = DescriptorRegistry::new(
            vec![ColumnDescriptor::column("A").located_at(["a"])],
            Some(WhereClause::new(
                "WHERE T < ?",
                vec![ColumnDescriptor::where_param().located_at(["t"]).date("yyyy")?],
            )?),
        )?;
        let values = values(&[(DescriptorId::Column(0), "1"), (DescriptorId::Where(0), "SYSDATE")]);
        let err = PlanBuilder::new(&registry).update("T", &values).unwrap_err();
        assert!(matches!(err, ColmapError::UnsupportedValueType { .. }));
        Ok(())
    }

    #[test]
    fn test_batch_key_chunking() {
        let keys: Vec<ColumnValue> = (1..=5).map(ColumnValue::Integer).collect();

        let singles = BatchKey::chunk(keys.clone(), 1);
        assert_eq!(singles.len(), 5);

        let pairs = BatchKey::chunk(keys, 2);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|k| k.arity() == 2));
        assert_eq!(
            pairs[2].values(),
            &[ColumnValue::Integer(5), ColumnValue::Integer(5)]
        );
    }

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("SQLite".parse::<Dialect>().ok(), Some(Dialect::Sqlite));
        assert!("postgres".parse::<Dialect>().is_err());
    }
}
