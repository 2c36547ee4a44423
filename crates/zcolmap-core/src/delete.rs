//! `DELETE FROM <table> <where template>`; only the WHERE family is read.

use crate::binder::ParameterBinder;
use crate::cycle::{Cycle, PlanShape};
use crate::descriptor::{DescriptorRegistry, WhereClause};
use crate::error::{ColmapError, Result};
use crate::guard::ValidationGuard;
use crate::plan::StatementKind;
use crate::processor::{settle, CycleReport, Processor, ProcessorSettings};
use crate::properties::{self, PropertySet};
use crate::resolver::ValueResolver;
use crate::source::{MessageDocument, ValueSource};
use crate::transaction::ConnectionSource;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DeleteProcessor {
    settings: ProcessorSettings,
    registry: DescriptorRegistry,
    resolver: ValueResolver,
    guard: ValidationGuard,
    binder: ParameterBinder,
}

impl DeleteProcessor {
    pub fn new(settings: ProcessorSettings, clause: WhereClause) -> Result<Self> {
        Ok(Self {
            settings,
            registry: DescriptorRegistry::new(Vec::new(), Some(clause))?,
            resolver: ValueResolver::new(),
            guard: ValidationGuard::new(),
            binder: ParameterBinder::new(),
        })
    }

    pub fn from_properties(props: &PropertySet) -> Result<Self> {
        let settings = ProcessorSettings::from_properties(props)?;
        let clause = WhereClause::load(props, &settings.separator)?.ok_or_else(|| {
            ColmapError::configuration(format!(
                "delete from {} requires {}",
                settings.table,
                properties::WHERE_STATEMENT
            ))
        })?;
        info!(
            "Delete processor for {} with {} WHERE parameters",
            settings.table,
            clause.descriptors().len()
        );
        Self::new(settings, clause)
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }
}

impl Processor for DeleteProcessor {
    fn kind(&self) -> StatementKind {
        StatementKind::Delete
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
        debug!("Delete cycle on {}", self.settings.table);
        let result = self.settings.scope().run(source, |conn| {
            let execution = Cycle::reset(&self.registry, self.settings.table.as_str())
                .resolve(&self.resolver, context, document)?
                .validate(&self.guard)?
                .build(&PlanShape::Delete, self.settings.render)?
                .execute(conn, &self.binder)?;
            Ok(CycleReport::written(StatementKind::Delete, &[execution]))
        });
        settle(&self.settings, StatementKind::Delete, result)
    }

    fn describe(&self) -> String {
        self.registry.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingPool;
    use crate::source::MessageContext;
    use crate::value::SqlParam;
    use serde_json::json;

    fn props() -> PropertySet {
        PropertySet::new()
            .with("TABLE_NAME", "PORT_REQUEST")
            .with("TRANSACTIONAL_LOGGING", "false")
            .with("SQL_WHERE_STATEMENT", "WHERE TN = ?")
            .with("WHERE_LOCATION_0", "@message.request.tn")
    }

    #[test]
    fn test_delete_commits_owned_connection() -> Result<()> {
        let processor = DeleteProcessor::from_properties(&props())?;
        let pool = RecordingPool::new();
        let doc = MessageDocument::json(json!({"request": {"tn": "3125550100"}}));

        let report = processor.process(ConnectionSource::Pool(&pool), &MessageContext::new(), &doc)?;
        assert_eq!(report.statements, vec!["DELETE FROM PORT_REQUEST WHERE TN = ?".to_string()]);

        let journal = pool.journal();
        assert_eq!(
            journal.last_executed().map(|e| e.params()),
            Some(vec![SqlParam::Text("3125550100".into())])
        );
        assert_eq!(journal.commits(), 1);
        assert_eq!(journal.releases(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_where_value_rolls_back() -> Result<()> {
        let processor = DeleteProcessor::from_properties(&props())?;
        let pool = RecordingPool::new();

        // context-only keys are never consulted for @message locations
        let ctx = MessageContext::new().with("request.tn", "3125550100");
        let err = processor
            .process(ConnectionSource::Pool(&pool), &ctx, &MessageDocument::Empty)
            .unwrap_err();
        assert!(matches!(err, ColmapError::MissingRequiredValue { .. }));
        assert_eq!(pool.journal().rollbacks(), 1);
        assert!(pool.journal().executed().is_empty());
        Ok(())
    }

    #[test]
    fn test_column_family_ignored() -> Result<()> {
        let props = props().with("COLUMN_0", "IGNORED").with("LOCATION_0", "x");
        let processor = DeleteProcessor::from_properties(&props)?;
        assert!(processor.registry().columns().is_empty());
        assert!(DeleteProcessor::from_properties(&PropertySet::new().with("TABLE_NAME", "T")).is_err());
        Ok(())
    }
}
