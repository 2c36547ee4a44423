//! Database logger: one `INSERT` of the configured column family per cycle.

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
pub struct InsertProcessor {
    settings: ProcessorSettings,
    registry: DescriptorRegistry,
    resolver: ValueResolver,
    guard: ValidationGuard,
    binder: ParameterBinder,
}

impl InsertProcessor {
    /// An INSERT binds no WHERE values, so a registry carrying a WHERE clause is rejected
    pub fn new(settings: ProcessorSettings, registry: DescriptorRegistry) -> Result<Self> {
        if registry.where_clause().is_some() {
            return Err(ColmapError::configuration(format!(
                "insert into {} does not take {} or WHERE descriptors",
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
            "Insert processor for {} with {} columns",
            settings.table,
            registry.columns().len()
        );
        Self::new(settings, registry)
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }
}

impl Processor for InsertProcessor {
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
        debug!("Insert cycle into {}", self.settings.table);
        let result = self.settings.scope().run(source, |conn| {
            let execution = Cycle::reset(&self.registry, self.settings.table.as_str())
                .resolve(&self.resolver, context, document)?
                .validate(&self.guard)?
                .build(&PlanShape::Insert, self.settings.render)?
                .execute(conn, &self.binder)?;
            Ok(CycleReport::written(StatementKind::Insert, &[execution]))
        });
        settle(&self.settings, StatementKind::Insert, result)
    }

    fn describe(&self) -> String {
        self.registry.describe()
    }
}
