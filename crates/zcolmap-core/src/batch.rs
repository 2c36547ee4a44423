/*!
Batch reference processor.

Two phases share one connection:

1. **SELECT** `<ref key>, <staging columns> FROM <search table> WHERE
   <correlation column> = ?`, bound with the correlation id resolved from the
   context or document.
2. **UPDATE** `<update table> SET <valid columns> WHERE <ref key> IN (?, ...)`,
   one batch entry per group of reference keys.

The first staging row decides which columns are valid (non-null) and supplies
their values; every row contributes a reference key. No rows is a successful
no-op. Rows without a single valid column are an error, never a silent skip.
A staging value equal to the delete marker binds as NULL, clearing the
column. The batch aborts as a whole on any driver failure; per-row results
are not reported.
*/

use crate::binder::ParameterBinder;
use crate::connection::{Connection, Row};
use crate::cycle::{Cycle, PlanShape};
use crate::date_format::STAGING_DATE_FORMAT;
use crate::descriptor::{
    load_family, split_chain, ColumnDescriptor, DescriptorRegistry, SqlTypeTag, STAGING_FAMILY,
};
use crate::error::{ColmapError, Result};
use crate::guard::ValidationGuard;
use crate::plan::{BatchKey, StatementKind};
use crate::processor::{settle, CycleReport, Processor, ProcessorSettings};
use crate::properties::{self, PropertySet};
use crate::resolver::ValueResolver;
use crate::source::{MessageDocument, ValueSource};
use crate::transaction::ConnectionSource;
use crate::value::{ColumnValue, SqlParam};
use tracing::{debug, info, warn};

pub const DEFAULT_CORRELATION_COLUMN: &str = "MESSAGEKEY";
pub const DEFAULT_REFERENCE_KEY_COLUMN: &str = "REFERENCEKEY";
pub const DEFAULT_DELETE_MARKER: &str = "-";

/// Batch-only configuration on top of [`ProcessorSettings`]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub search_table: String,
    pub correlation_column: String,
    pub reference_key_column: String,
    pub key_arity: usize,
    pub delete_marker: String,
}

impl BatchSettings {
    pub fn from_properties(props: &PropertySet) -> Result<Self> {
        let key_arity = props.get_u64(properties::BATCH_KEY_ARITY)?.unwrap_or(1) as usize;
        if key_arity == 0 {
            return Err(ColmapError::configuration(format!(
                "{} must be at least 1",
                properties::BATCH_KEY_ARITY
            )));
        }
        Ok(Self {
            search_table: props.required(properties::SEARCH_TABLE_NAME)?.trim().to_string(),
            correlation_column: props
                .get_or(properties::CORRELATION_COLUMN, DEFAULT_CORRELATION_COLUMN)
                .trim()
                .to_string(),
            reference_key_column: props
                .get_or(properties::REFERENCE_KEY_COLUMN, DEFAULT_REFERENCE_KEY_COLUMN)
                .trim()
                .to_string(),
            key_arity,
            delete_marker: props
                .get_or(properties::DELETE_MARKER, DEFAULT_DELETE_MARKER)
                .to_string(),
        })
    }
}

/// A staging row viewed as a value source; column labels match case-insensitively
/// and blank text counts as absent
struct StagingRow<'a>(&'a Row);

impl ValueSource for StagingRow<'_> {
    fn get(&self, key: &str) -> Option<ColumnValue> {
        let cell = match self.0.get(key) {
            Some(cell) => cell,
            None => self
                .0
                .iter()
                .find(|(label, _)| label.eq_ignore_ascii_case(key))
                .map(|(_, cell)| cell)?,
        };
        cell.clone().filter(|value| match value {
            ColumnValue::Text(text) => !text.trim().is_empty(),
            _ => true,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BatchReferenceProcessor {
    settings: ProcessorSettings,
    batch: BatchSettings,
    correlation: ColumnDescriptor,
    staging: DescriptorRegistry,
    resolver: ValueResolver,
    guard: ValidationGuard,
    binder: ParameterBinder,
}

impl BatchReferenceProcessor {
    pub fn new(
        settings: ProcessorSettings,
        batch: BatchSettings,
        correlation: ColumnDescriptor,
        staging: Vec<ColumnDescriptor>,
    ) -> Result<Self> {
        if staging.is_empty() {
            return Err(ColmapError::configuration(format!(
                "batch update of {} has no staging columns",
                settings.table
            )));
        }
        let staging = staging
            .into_iter()
            .map(|d| {
                if d.tag == SqlTypeTag::Date && d.date_format.is_none() {
                    d.date(STAGING_DATE_FORMAT)
                } else {
                    Ok(d)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let binder = ParameterBinder::new().with_null_marker(batch.delete_marker.clone());
        Ok(Self {
            settings,
            batch,
            correlation,
            staging: DescriptorRegistry::new(staging, None)?,
            resolver: ValueResolver::new(),
            guard: ValidationGuard::new(),
            binder,
        })
    }

    pub fn from_properties(props: &PropertySet) -> Result<Self> {
        let settings = ProcessorSettings::with_table_key(props, properties::UPDATE_TABLE_NAME)?;
        let batch = BatchSettings::from_properties(props)?;

        let chain = split_chain(
            props.required(properties::CORRELATION_LOCATION)?,
            &settings.separator,
        );
        let correlation = ColumnDescriptor::where_param().located_at(chain);
        let staging = load_family(props, &STAGING_FAMILY, &settings.separator)?;

        info!(
            "Batch processor: {} staging columns from {} into {} keyed by {}",
            staging.len(),
            batch.search_table,
            settings.table,
            batch.reference_key_column
        );
        Self::new(settings, batch, correlation, staging)
    }

    pub fn batch_settings(&self) -> &BatchSettings {
        &self.batch
    }

    pub fn staging(&self) -> &DescriptorRegistry {
        &self.staging
    }

    /// `SELECT <ref key>, <staging columns> FROM <search> WHERE <correlation> = ?`
    pub fn select_sql(&self) -> String {
        let mut columns = vec![self.batch.reference_key_column.as_str()];
        columns.extend(self.staging.columns().iter().filter_map(|d| d.name.as_deref()));
        format!(
            "SELECT {} FROM {} WHERE {} = ?",
            columns.join(", "),
            self.batch.search_table,
            self.batch.correlation_column
        )
    }

    fn run_cycle(
        &self,
        conn: &mut dyn Connection,
        context: &dyn ValueSource,
        document: &MessageDocument,
    ) -> Result<CycleReport> {
        let correlation = self
            .resolver
            .resolve(&self.correlation, context, document)?
            .ok_or_else(|| ColmapError::missing_required(self.correlation.label()))?;

        let select = self.select_sql();
        let rows = {
            let mut stmt = conn.prepare(&select)?;
            stmt.bind(1, SqlParam::from(&correlation))?;
            stmt.query()?
        };
        debug!("Staging lookup for [{}] returned {} rows", correlation, rows.len());

        let Some(first) = rows.first() else {
            info!(
                "No staging rows for [{}] in {}; nothing to update",
                correlation, self.batch.search_table
            );
            let mut report = CycleReport::nothing_to_do(StatementKind::BatchUpdate);
            report.statements.push(select);
            return Ok(report);
        };

        let values = self
            .resolver
            .resolve_all(&self.staging, &StagingRow(first), &MessageDocument::Empty)?;
        if values.is_empty() {
            return Err(ColmapError::no_valid_columns(correlation.to_text()));
        }

        let keys = self.collect_keys(&rows)?;
        let execution = Cycle::reset(&self.staging, self.settings.table.as_str())
            .with_values(values)
            .validate(&self.guard)?
            .build(
                &PlanShape::BatchUpdate {
                    key_column: self.batch.reference_key_column.clone(),
                    key_arity: self.batch.key_arity,
                },
                self.settings.render,
            )?
            .execute_batch(conn, &self.binder, &keys)?;

        let mut report = CycleReport::written(StatementKind::BatchUpdate, &[execution]);
        report.statements.insert(0, select);
        Ok(report)
    }

    fn collect_keys(&self, rows: &[Row]) -> Result<Vec<BatchKey>> {
        let column = self.batch.reference_key_column.as_str();
        let mut keys = Vec::with_capacity(rows.len());
        for (ix, row) in rows.iter().enumerate() {
            match StagingRow(row).get(column).filter(|v| !v.is_sql_null()) {
                Some(key) => keys.push(key),
                None => warn!("Staging row {} has no {}; skipped", ix, column),
            }
        }
        if keys.is_empty() {
            return Err(ColmapError::missing_required(column));
        }
        Ok(BatchKey::chunk(keys, self.batch.key_arity))
    }
}

impl Processor for BatchReferenceProcessor {
    fn kind(&self) -> StatementKind {
        StatementKind::BatchUpdate
    }

    fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    fn process(
        &self,
        source: ConnectionSource<'_>,
        context: &dyn ValueSource,
        document: &MessageDocument,
    ) -> Result<CycleReport> {
        let result = self
            .settings
            .scope()
            .run(source, |conn| self.run_cycle(conn, context, document));
        settle(&self.settings, StatementKind::BatchUpdate, result)
    }

    fn describe(&self) -> String {
        format!(
            "correlation: {}\n{}",
            self.correlation.describe(),
            self.staging.describe()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Outcome;
    use crate::recording::{ExecutionMode, RecordingConnection};
    use crate::source::MessageContext;

    fn props() -> PropertySet {
        PropertySet::new()
            .with("SEARCH_TABLE_NAME", "SV_STAGING")
            .with("UPDATE_TABLE_NAME", "SUBSCRIPTION_VERSION")
            .with("CORRELATION_LOCATION", "messageKey|@message.key")
            .with("STAGING_COLUMN_0", "LRN")
            .with("STAGING_COLUMN_1", "CNAMDPC")
            .with("STAGING_COLUMN_2", "ACTIVATED")
            .with("STAGING_COLUMN_TYPE_2", "DATE")
    }

    fn row(key: i64, lrn: Option<&str>, dpc: Option<&str>) -> Row {
        Row::from_iter([
            ("REFERENCEKEY".to_string(), Some(ColumnValue::Integer(key))),
            ("LRN".to_string(), lrn.map(ColumnValue::from)),
            ("CNAMDPC".to_string(), dpc.map(ColumnValue::from)),
            ("ACTIVATED".to_string(), None),
        ])
    }

    fn ctx() -> MessageContext {
        MessageContext::new().with("messageKey", "MK-42")
    }

    #[test]
    fn test_select_shape() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        assert_eq!(
            processor.select_sql(),
            "SELECT REFERENCEKEY, LRN, CNAMDPC, ACTIVATED FROM SV_STAGING WHERE MESSAGEKEY = ?"
        );
        let activated = &processor.staging().columns()[2];
        assert_eq!(
            activated.date_format.as_ref().map(|f| f.pattern()),
            Some(STAGING_DATE_FORMAT)
        );
        assert!(processor.staging().columns().iter().all(|d| d.optional));
        Ok(())
    }

    #[test]
    fn test_three_keys_two_values() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        let mut conn = RecordingConnection::new();
        conn.journal().push_query_result(vec![
            row(101, Some("9725550000"), Some("001002003")),
            row(102, None, None),
            row(103, None, None),
        ]);

        let report = processor.process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)?;
        assert_eq!(report.outcome, Outcome::Written);
        assert_eq!(report.batch_entries, 3);
        assert_eq!(
            report.statements[1],
            "UPDATE SUBSCRIPTION_VERSION SET LRN = ? , CNAMDPC = ?  WHERE REFERENCEKEY IN ( ? )"
        );

        let executed = conn.journal().executed();
        assert_eq!(executed[0].mode, ExecutionMode::Query);
        assert_eq!(executed[0].params(), vec![SqlParam::Text("MK-42".into())]);

        let batch = &executed[1];
        assert_eq!(batch.mode, ExecutionMode::Batch);
        assert_eq!(batch.bindings.len(), 3);
        for (entry, key) in batch.bindings.iter().zip([101_i64, 102, 103]) {
            assert_eq!(
                entry,
                &vec![
                    (1, SqlParam::Text("9725550000".into())),
                    (2, SqlParam::Text("001002003".into())),
                    (3, SqlParam::Integer(key)),
                ]
            );
        }
        Ok(())
    }

    #[test]
    fn test_no_rows_is_success_without_update() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        let mut conn = RecordingConnection::new();

        let report = processor.process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)?;
        assert_eq!(report.outcome, Outcome::NothingToDo);
        assert_eq!(conn.journal().prepared().len(), 1);
        assert!(conn
            .journal()
            .executed()
            .iter()
            .all(|e| e.mode == ExecutionMode::Query));
        Ok(())
    }

    #[test]
    fn test_rows_without_valid_columns_fail() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        let mut conn = RecordingConnection::new();
        conn.journal().push_query_result(vec![row(101, None, None)]);

        let err = processor
            .process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)
            .unwrap_err();
        assert!(matches!(err, ColmapError::NoValidColumnsToUpdate { ref correlation } if correlation == "MK-42"));
        Ok(())
    }

    #[test]
    fn test_blank_staging_values_are_not_valid_columns() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        let mut conn = RecordingConnection::new();
        conn.journal().push_query_result(vec![row(101, Some(""), Some("  "))]);

        let err = processor
            .process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)
            .unwrap_err();
        assert!(matches!(err, ColmapError::NoValidColumnsToUpdate { .. }));
        assert!(conn
            .journal()
            .executed()
            .iter()
            .all(|e| e.mode == ExecutionMode::Query));
        Ok(())
    }

    #[test]
    fn test_blank_column_skipped_in_mixed_row() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        let mut conn = RecordingConnection::new();
        conn.journal().push_query_result(vec![row(101, Some(""), Some("001002003"))]);

        let report = processor.process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)?;
        assert_eq!(
            report.statements[1],
            "UPDATE SUBSCRIPTION_VERSION SET CNAMDPC = ?  WHERE REFERENCEKEY IN ( ? )"
        );
        let batch = conn.journal().last_executed().expect("batch ran");
        assert_eq!(
            batch.bindings[0],
            vec![(1, SqlParam::Text("001002003".into())), (2, SqlParam::Integer(101))]
        );
        Ok(())
    }

    #[test]
    fn test_key_groups_pad_with_last_key() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props().with("BATCH_KEY_ARITY", "2"))?;
        let mut conn = RecordingConnection::new();
        conn.journal().push_query_result(vec![
            row(1, Some("9725550000"), None),
            row(2, None, None),
            row(3, None, None),
        ]);

        let report = processor.process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)?;
        assert_eq!(report.batch_entries, 2);

        let batch = conn.journal().last_executed().expect("batch ran");
        assert!(batch.sql.ends_with("WHERE REFERENCEKEY IN ( ?, ? )"));
        assert_eq!(batch.bindings[1][1..], [(2, SqlParam::Integer(3)), (3, SqlParam::Integer(3))]);
        Ok(())
    }

    #[test]
    fn test_delete_marker_clears_column() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        let mut conn = RecordingConnection::new();
        conn.journal()
            .push_query_result(vec![row(7, Some("-"), Some("001002003"))]);

        processor.process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)?;
        let batch = conn.journal().last_executed().expect("batch ran");
        assert_eq!(batch.bindings[0][0], (1, SqlParam::Null));
        assert_eq!(batch.bindings[0][1], (2, SqlParam::Text("001002003".into())));
        Ok(())
    }

    #[test]
    fn test_staging_date_parsed_with_default_format() -> Result<()> {
        let processor = BatchReferenceProcessor::from_properties(&props())?;
        let mut conn = RecordingConnection::new();
        let mut staged = row(7, None, None);
        staged.insert("ACTIVATED".into(), Some("03-01-2024-013000PM".into()));
        conn.journal().push_query_result(vec![staged]);

        processor.process(ConnectionSource::Ambient(&mut conn), &ctx(), &MessageDocument::Empty)?;
        let batch = conn.journal().last_executed().expect("batch ran");
        match &batch.bindings[0][0].1 {
            SqlParam::Timestamp(ts) => assert_eq!(ts.to_string(), "2024-03-01 13:30:00"),
            other => panic!("expected timestamp, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_correlation_required() {
        let processor = BatchReferenceProcessor::from_properties(&props()).expect("valid config");
        let mut conn = RecordingConnection::new();
        let err = processor
            .process(
                ConnectionSource::Ambient(&mut conn),
                &MessageContext::new(),
                &MessageDocument::Empty,
            )
            .unwrap_err();
        assert!(matches!(err, ColmapError::MissingRequiredValue { .. }));
        assert!(conn.journal().prepared().is_empty());
    }
}
