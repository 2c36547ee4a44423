/*!
Shared processor plumbing.

Every processor reads the same common properties into [`ProcessorSettings`],
runs one cycle per call inside a [`TransactionScope`], and reports what it did
as a [`CycleReport`]. With `FAIL_ON_ERROR=false` a failed cycle is still
rolled back (when owned) but the error is logged and reported as
[`Outcome::Suppressed`] instead of being returned.
*/

use crate::critical::CriticalSection;
use crate::cycle::{Execution, RenderOptions};
use crate::error::{ColmapError, Result};
use crate::plan::{Dialect, StatementKind};
use crate::properties::{self, PropertySet};
use crate::source::{MessageDocument, ValueSource};
use crate::transaction::{ConnectionSource, TransactionPolicy, TransactionScope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_SEPARATOR: &str = "|";

/// Properties common to every processor
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub table: String,
    pub policy: TransactionPolicy,
    pub fail_on_error: bool,
    pub separator: String,
    pub render: RenderOptions,
    pub query_timeout: Option<Duration>,
}

impl ProcessorSettings {
    /// Read settings, taking the target table from `TABLE_NAME`
    pub fn from_properties(props: &PropertySet) -> Result<Self> {
        Self::with_table_key(props, properties::TABLE_NAME)
    }

    /// Read settings, taking the target table from `table_key`
    pub fn with_table_key(props: &PropertySet, table_key: &str) -> Result<Self> {
        let table = props.required(table_key)?.trim().to_string();
        let transactional = props.get_bool(properties::TRANSACTIONAL_LOGGING, true)?;
        let dialect = props
            .get(properties::DIALECT)
            .map(Dialect::from_str)
            .transpose()?
            .unwrap_or_default();

        let settings = Self {
            table,
            policy: TransactionPolicy::from_transactional_flag(transactional),
            fail_on_error: props.get_bool(properties::FAIL_ON_ERROR, true)?,
            separator: props.get_or(properties::SEPARATOR, DEFAULT_SEPARATOR).to_string(),
            render: RenderOptions {
                dialect,
                sysdate_in_utc: props.get_bool(properties::LOG_SYSDATE_IN_UTC, false)?,
            },
            query_timeout: props
                .get_u64(properties::QUERY_TIMEOUT_SECS)?
                .map(Duration::from_secs),
        };
        debug!("Processor settings: {:?}", settings);
        Ok(settings)
    }

    pub fn scope(&self) -> TransactionScope {
        TransactionScope::new(self.policy).with_query_timeout(self.query_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Written,
    /// The batch lookup found no rows
    NothingToDo,
    /// The cycle failed and `FAIL_ON_ERROR` is off
    Suppressed,
}

/// Summary of one processed cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub kind: StatementKind,
    pub outcome: Outcome,
    /// SQL of every statement executed, in order
    pub statements: Vec<String>,
    pub rows_affected: u64,
    pub batch_entries: usize,
    pub bound_parameters: usize,
    pub error: Option<String>,
}

impl CycleReport {
    pub fn written(kind: StatementKind, executions: &[Execution]) -> Self {
        Self {
            kind,
            outcome: Outcome::Written,
            statements: executions.iter().map(|e| e.plan.sql().to_string()).collect(),
            rows_affected: executions.iter().map(|e| e.rows_affected).sum(),
            batch_entries: executions.iter().map(|e| e.batch_entries).sum(),
            bound_parameters: executions.iter().map(|e| e.bound.len()).sum(),
            error: None,
        }
    }

    pub fn nothing_to_do(kind: StatementKind) -> Self {
        Self {
            kind,
            outcome: Outcome::NothingToDo,
            statements: Vec::new(),
            rows_affected: 0,
            batch_entries: 0,
            bound_parameters: 0,
            error: None,
        }
    }

    pub fn suppressed(kind: StatementKind, error: &ColmapError) -> Self {
        Self {
            outcome: Outcome::Suppressed,
            error: Some(error.to_string()),
            ..Self::nothing_to_do(kind)
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?}: {} statements, {} rows, {} batch entries, {} parameters",
            self.kind,
            self.outcome,
            self.statements.len(),
            self.rows_affected,
            self.batch_entries,
            self.bound_parameters
        )?;
        if let Some(err) = &self.error {
            write!(f, " ({})", err)?;
        }
        Ok(())
    }
}

/// A configured processor that runs one cycle per call
pub trait Processor: Send + Sync {
    fn kind(&self) -> StatementKind;

    fn settings(&self) -> &ProcessorSettings;

    fn process(
        &self,
        source: ConnectionSource<'_>,
        context: &dyn ValueSource,
        document: &MessageDocument,
    ) -> Result<CycleReport>;

    /// One line per configured descriptor
    fn describe(&self) -> String;
}

/// Apply the fail-on-error policy to a finished cycle
pub(crate) fn settle(settings: &ProcessorSettings, kind: StatementKind, result: Result<CycleReport>) -> Result<CycleReport> {
    match result {
        Err(e) if !settings.fail_on_error && !e.is_configuration() => {
            warn!("{} on {} failed and was suppressed: {}", kind, settings.table, e);
            Ok(CycleReport::suppressed(kind, &e))
        }
        other => other,
    }
}

/// Processor selected by the `PROCESSOR` property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Insert,
    Update,
    Delete,
    Batch,
    Replace,
}

impl FromStr for ProcessorKind {
    type Err = ColmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" | "logger" => Ok(ProcessorKind::Insert),
            "update" => Ok(ProcessorKind::Update),
            "delete" => Ok(ProcessorKind::Delete),
            "batch" => Ok(ProcessorKind::Batch),
            "replace" => Ok(ProcessorKind::Replace),
            other => Err(ColmapError::configuration(format!(
                "unknown processor [{}]",
                other
            ))),
        }
    }
}

/// Build the processor named by `PROCESSOR` (default `insert`)
pub fn from_properties(
    props: &PropertySet,
    section: Arc<dyn CriticalSection>,
) -> Result<Box<dyn Processor>> {
    let kind: ProcessorKind = props.get_or(properties::PROCESSOR, "insert").parse()?;
    debug!("Building {:?} processor", kind);
    let processor: Box<dyn Processor> = match kind {
        ProcessorKind::Insert => Box::new(crate::insert::InsertProcessor::from_properties(props)?),
        ProcessorKind::Update => Box::new(crate::update::UpdateProcessor::from_properties(props)?),
        ProcessorKind::Delete => Box::new(crate::delete::DeleteProcessor::from_properties(props)?),
        ProcessorKind::Batch => {
            Box::new(crate::batch::BatchReferenceProcessor::from_properties(props)?)
        }
        ProcessorKind::Replace => Box::new(crate::replace::ReplaceProcessor::from_properties(
            props, section,
        )?),
    };
    Ok(processor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() -> Result<()> {
        let settings = ProcessorSettings::from_properties(&PropertySet::new().with("TABLE_NAME", "LOG"))?;
        assert_eq!(settings.table, "LOG");
        assert_eq!(settings.policy, TransactionPolicy::Ambient);
        assert!(settings.fail_on_error);
        assert_eq!(settings.separator, "|");
        assert_eq!(settings.render.dialect, Dialect::Oracle);
        assert_eq!(settings.query_timeout, None);
        Ok(())
    }

    #[test]
    fn test_settings_overrides() -> Result<()> {
        let props = PropertySet::new()
            .with("TABLE_NAME", "LOG")
            .with("TRANSACTIONAL_LOGGING", "false")
            .with("FAIL_ON_ERROR", "no")
            .with("SEPARATOR", ";")
            .with("DIALECT", "sqlite")
            .with("LOG_SYSDATE_IN_UTC", "true")
            .with("QUERY_TIMEOUT_SECS", "15");
        let settings = ProcessorSettings::from_properties(&props)?;
        assert_eq!(settings.policy, TransactionPolicy::Owned);
        assert!(!settings.fail_on_error);
        assert_eq!(settings.separator, ";");
        assert_eq!(settings.render.dialect, Dialect::Sqlite);
        assert!(settings.render.sysdate_in_utc);
        assert_eq!(settings.query_timeout, Some(Duration::from_secs(15)));
        Ok(())
    }

    #[test]
    fn test_missing_table() {
        assert!(ProcessorSettings::from_properties(&PropertySet::new())
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_settle_suppresses_data_errors_only() -> Result<()> {
        let props = PropertySet::new()
            .with("TABLE_NAME", "LOG")
            .with("FAIL_ON_ERROR", "false");
        let settings = ProcessorSettings::from_properties(&props)?;

        let report = settle(&settings, StatementKind::Insert, Err(ColmapError::no_data("LOG")))?;
        assert_eq!(report.outcome, Outcome::Suppressed);
        assert!(report.error.is_some());

        let err = settle(
            &settings,
            StatementKind::Insert,
            Err(ColmapError::configuration("bad")),
        )
        .unwrap_err();
        assert!(err.is_configuration());
        Ok(())
    }

    #[test]
    fn test_processor_kind_parsing() {
        assert_eq!("Batch".parse::<ProcessorKind>().ok(), Some(ProcessorKind::Batch));
        assert!("merge".parse::<ProcessorKind>().is_err());
    }
}
