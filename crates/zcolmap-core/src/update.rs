//! `UPDATE <table> SET ... <where template>` driven by the column family.
//!
//! SET values bind first, in declared order, then the WHERE values.

use crate::binder::ParameterBinder;
use crate::cycle::{Cycle, PlanShape};
use crate::descriptor::DescriptorRegistry;
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
pub struct UpdateProcessor {
    settings: ProcessorSettings,
    registry: DescriptorRegistry,
    resolver: ValueResolver,
    guard: ValidationGuard,
    binder: ParameterBinder,
}

impl UpdateProcessor {
    pub fn new(settings: ProcessorSettings, registry: DescriptorRegistry) -> Result<Self> {
        if registry.where_clause().is_none() {
            return Err(ColmapError::configuration(format!(
                "update of {} requires {}",
                settings.table,
                properties::WHERE_STATEMENT
            )));
        }
        Ok(Self {
            settings,
            registry,
            resolver: ValueResolver::new(),
            guard: ValidationGuard::new(),
            binder: ParameterBinder::new(),
        })
    }

    pub fn from_properties(props: &PropertySet) -> Result<Self> {
        let settings = ProcessorSettings::from_properties(props)?;
        let registry = DescriptorRegistry::from_properties(props, &settings.separator)?;
        info!(
            "Update processor for {} with {} SET columns and {} WHERE parameters",
            settings.table,
            registry.columns().len(),
            registry.where_descriptors().len()
        );
        Self::new(settings, registry)
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }
}

impl Processor for UpdateProcessor {
    fn kind(&self) -> StatementKind {
        StatementKind::Update
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
        debug!("Update cycle on {}", self.settings.table);
        let result = self.settings.scope().run(source, |conn| {
            let execution = Cycle::reset(&self.registry, self.settings.table.as_str())
                .resolve(&self.resolver, context, document)?
                .validate(&self.guard)?
                .build(&PlanShape::Update, self.settings.render)?
                .execute(conn, &self.binder)?;
            Ok(CycleReport::written(StatementKind::Update, &[execution]))
        });
        settle(&self.settings, StatementKind::Update, result)
    }

    fn describe(&self) -> String {
        self.registry.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingConnection;
    use crate::source::MessageContext;
    use crate::value::SqlParam;

    fn props() -> PropertySet {
        PropertySet::new()
            .with("TABLE_NAME", "SUBSCRIPTION")
            .with("COLUMN_0", "STATUS")
            .with("LOCATION_0", "status")
            .with("OPTIONAL_0", "true")
            .with("COLUMN_1", "MODIFIED")
            .with("COLUMN_TYPE_1", "DATE")
            .with("DATE_FORMAT_1", "yyyyMMddHHmmss")
            .with("LOCATION_1", "modified")
            .with("OPTIONAL_1", "true")
            .with("SQL_WHERE_STATEMENT", "WHERE SPID = ? AND VERSION = ?")
            .with("WHERE_LOCATION_0", "spid")
            .with("WHERE_LOCATION_1", "version")
    }

    #[test]
    fn test_set_values_bind_before_where_values() -> Result<()> {
        let processor = UpdateProcessor::from_properties(&props())?;
        let ctx = MessageContext::new()
            .with("status", "active")
            .with("modified", "20240301120000")
            .with("spid", "1234")
            .with("version", 3_i64);
        let mut conn = RecordingConnection::new();

        let report = processor.process(ConnectionSource::Ambient(&mut conn), &ctx, &MessageDocument::Empty)?;
        assert_eq!(
            report.statements[0],
            "UPDATE SUBSCRIPTION SET STATUS = ? , MODIFIED = ?  WHERE SPID = ? AND VERSION = ?"
        );

        let params = conn.journal().last_executed().map(|e| e.params()).unwrap_or_default();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0], SqlParam::Text("active".into()));
        assert!(matches!(params[1], SqlParam::Timestamp(_)));
        assert_eq!(params[2], SqlParam::Text("1234".into()));
        assert_eq!(params[3], SqlParam::Integer(3));
        Ok(())
    }

    #[test]
    fn test_no_set_values_is_no_data() -> Result<()> {
        let processor = UpdateProcessor::from_properties(&props())?;
        let ctx = MessageContext::new().with("spid", "1234").with("version", "3");
        let mut conn = RecordingConnection::new();

        let err = processor
            .process(ConnectionSource::Ambient(&mut conn), &ctx, &MessageDocument::Empty)
            .unwrap_err();
        assert!(matches!(err, ColmapError::NoDataToWrite { .. }));
        assert!(conn.journal().executed().is_empty());
        Ok(())
    }

    #[test]
    fn test_where_template_required() {
        let props = PropertySet::new()
            .with("TABLE_NAME", "SUBSCRIPTION")
            .with("COLUMN_0", "STATUS")
            .with("LOCATION_0", "status")
            .with("OPTIONAL_0", "true");
        assert!(UpdateProcessor::from_properties(&props)
            .unwrap_err()
            .is_configuration());
    }
}
