/*!
Delete-then-insert in one cycle.

Both statements are resolved, validated and planned before anything runs.
The two executions then happen back to back inside the caller's
[`CriticalSection`], so other threads sharing the same section never observe
the gap between the delete and the insert. The section is entered inside the
transaction scope and covers only the two executions.
*/

use crate::binder::ParameterBinder;
use crate::connection::Connection;
use crate::critical::CriticalSection;
use crate::cycle::{Cycle, Execution, PlanShape};
use crate::descriptor::{load_family, ColumnDescriptor, DescriptorRegistry, WhereClause, COLUMN_FAMILY};
use crate::error::{ColmapError, Result};
use crate::guard::ValidationGuard;
use crate::plan::StatementKind;
use crate::processor::{settle, CycleReport, Processor, ProcessorSettings};
use crate::properties::{self, PropertySet};
use crate::resolver::ValueResolver;
use crate::source::{MessageDocument, ValueSource};
use crate::transaction::ConnectionSource;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ReplaceProcessor {
    settings: ProcessorSettings,
    delete: DescriptorRegistry,
    insert: DescriptorRegistry,
    section: Arc<dyn CriticalSection>,
    resolver: ValueResolver,
    guard: ValidationGuard,
    binder: ParameterBinder,
}

impl ReplaceProcessor {
    pub fn new(
        settings: ProcessorSettings,
        delete: WhereClause,
        insert: Vec<ColumnDescriptor>,
        section: Arc<dyn CriticalSection>,
    ) -> Result<Self> {
        Ok(Self {
            settings,
            delete: DescriptorRegistry::new(Vec::new(), Some(delete))?,
            insert: DescriptorRegistry::new(insert, None)?,
            section,
            resolver: ValueResolver::new(),
            guard: ValidationGuard::new(),
            binder: ParameterBinder::new(),
        })
    }

    pub fn from_properties(props: &PropertySet, section: Arc<dyn CriticalSection>) -> Result<Self> {
        let settings = ProcessorSettings::from_properties(props)?;
        let clause = WhereClause::load(props, &settings.separator)?.ok_or_else(|| {
            ColmapError::configuration(format!(
                "replace on {} requires {}",
                settings.table,
                properties::WHERE_STATEMENT
            ))
        })?;
        let columns = load_family(props, &COLUMN_FAMILY, &settings.separator)?;
        info!(
            "Replace processor for {} with {} WHERE parameters and {} columns",
            settings.table,
            clause.descriptors().len(),
            columns.len()
        );
        Self::new(settings, clause, columns, section)
    }

    fn run_cycle(
        &self,
        conn: &mut dyn Connection,
        context: &dyn ValueSource,
        document: &MessageDocument,
    ) -> Result<CycleReport> {
        let table = self.settings.table.as_str();
        let delete = Cycle::reset(&self.delete, table)
            .resolve(&self.resolver, context, document)?
            .validate(&self.guard)?
            .build(&PlanShape::Delete, self.settings.render)?;
        let insert = Cycle::reset(&self.insert, table)
            .resolve(&self.resolver, context, document)?
            .validate(&self.guard)?
            .build(&PlanShape::Insert, self.settings.render)?;

        let mut pending = Some((delete, insert));
        let mut executions: Vec<Execution> = Vec::with_capacity(2);
        self.section.run(&mut || {
            let (delete, insert) = pending
                .take()
                .ok_or_else(|| ColmapError::plan_mismatch("replace cycle entered its critical section twice"))?;
            executions.push(delete.execute(&mut *conn, &self.binder)?);
            executions.push(insert.execute(&mut *conn, &self.binder)?);
            Ok(())
        })?;

        debug!(
            "Replaced {} rows of {} with {} new rows",
            executions.first().map_or(0, |e| e.rows_affected),
            table,
            executions.get(1).map_or(0, |e| e.rows_affected)
        );
        Ok(CycleReport::written(StatementKind::Insert, &executions))
    }
}

impl fmt::Debug for ReplaceProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplaceProcessor")
            .field("settings", &self.settings)
            .field("delete", &self.delete)
            .field("insert", &self.insert)
            .finish_non_exhaustive()
    }
}

impl Processor for ReplaceProcessor {
    /// Reported as an insert; the delete is a preamble
    fn kind(&self) -> StatementKind {
        StatementKind::Insert
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
        settle(&self.settings, StatementKind::Insert, result)
    }

    fn describe(&self) -> String {
        format!("{}{}", self.delete.describe(), self.insert.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical::{SharedLock, Unguarded};
    use crate::recording::{RecordingConnection, RecordingPool};
    use crate::source::MessageContext;
    use crate::value::SqlParam;

    fn props() -> PropertySet {
        PropertySet::new()
            .with("TABLE_NAME", "ROUTING")
            .with("SQL_WHERE_STATEMENT", "WHERE TN = ?")
            .with("WHERE_LOCATION_0", "tn")
            .with("COLUMN_0", "TN")
            .with("LOCATION_0", "tn")
            .with("OPTIONAL_0", "false")
            .with("COLUMN_1", "LRN")
            .with("LOCATION_1", "lrn")
            .with("OPTIONAL_1", "false")
    }

    #[test]
    fn test_delete_then_insert() -> Result<()> {
        let processor = ReplaceProcessor::from_properties(&props(), Arc::new(Unguarded))?;
        let ctx = MessageContext::new().with("tn", "3125550100").with("lrn", "3125559999");
        let mut conn = RecordingConnection::new();

        let report = processor.process(ConnectionSource::Ambient(&mut conn), &ctx, &MessageDocument::Empty)?;
        assert_eq!(
            report.statements,
            vec![
                "DELETE FROM ROUTING WHERE TN = ?".to_string(),
                "INSERT INTO ROUTING ( TN, LRN ) VALUES ( ?, ? )".to_string(),
            ]
        );
        assert_eq!(report.bound_parameters, 3);

        let executed = conn.journal().executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].params(), vec![SqlParam::Text("3125550100".into())]);
        Ok(())
    }

    #[test]
    fn test_insert_failure_rolls_back_delete() -> Result<()> {
        let props = props().with("TRANSACTIONAL_LOGGING", "false");
        let processor = ReplaceProcessor::from_properties(&props, Arc::new(SharedLock::new()))?;
        let pool = RecordingPool::new();
        pool.journal().fail_when("INSERT INTO ROUTING", "disk full");

        let ctx = MessageContext::new().with("tn", "3125550100").with("lrn", "3125559999");
        let err = processor
            .process(ConnectionSource::Pool(&pool), &ctx, &MessageDocument::Empty)
            .unwrap_err();
        assert!(matches!(err, ColmapError::Database { .. }));

        let journal = pool.journal();
        assert_eq!(journal.executed().len(), 1);
        assert_eq!(journal.commits(), 0);
        assert_eq!(journal.rollbacks(), 1);
        Ok(())
    }

    #[test]
    fn test_nothing_runs_when_insert_unresolvable() -> Result<()> {
        let processor = ReplaceProcessor::from_properties(&props(), Arc::new(Unguarded))?;
        let mut conn = RecordingConnection::new();

        let err = processor
            .process(
                ConnectionSource::Ambient(&mut conn),
                &MessageContext::new().with("tn", "3125550100"),
                &MessageDocument::Empty,
            )
            .unwrap_err();
        assert!(matches!(err, ColmapError::MissingRequiredValue { ref descriptor } if descriptor == "LRN"));
        assert!(conn.journal().prepared().is_empty());
        Ok(())
    }
}
