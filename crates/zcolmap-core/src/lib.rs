/*!
# zcolmap-core

Configuration-driven column mapping for provisioning writes.

A processor is configured once from index-suffixed properties describing
table columns (`COLUMN_#`, `LOCATION_#`, `OPTIONAL_#`, ...). On every cycle it
resolves each column's value from the shared message context or the current
document, drops optional columns that resolved to null, renders an
`INSERT`/`UPDATE`/`DELETE` whose column and placeholder lists match exactly
what survived, and binds the survivors with type-specific coercion.

## Pipeline

```text
DescriptorRegistry -> ValueResolver -> ValidationGuard -> PlanBuilder -> ParameterBinder -> Connection
```

The [`StatementPlan`] produced by the builder is the only record of which
descriptor sits in which placeholder slot; the binder walks that same plan,
so SQL text and bound parameters cannot drift apart.

## Basic Usage

```rust,ignore
use zcolmap_core::prelude::*;

let props = PropertySet::new()
    .with("TABLE_NAME", "PORT_LOG")
    .with("COLUMN_0", "LRN")
    .with("LOCATION_0", "ctx.lrn")
    .with("OPTIONAL_0", "false");
let processor = InsertProcessor::from_properties(&props)?;

let mut conn = RecordingConnection::new();
let ctx = MessageContext::new().with("ctx.lrn", "2135551212");
let report = processor.process(ConnectionSource::Ambient(&mut conn), &ctx, &MessageDocument::Empty)?;
assert_eq!(report.statements[0], "INSERT INTO PORT_LOG ( LRN ) VALUES ( ? )");
```

## Architecture

- [`properties`] - property sets and their well-known names
- [`descriptor`] - column descriptors and the immutable registry
- [`source`] / [`resolver`] - value sources and location-chain resolution
- [`plan`] - statement plans and SQL rendering
- [`binder`] - type coercion and slot binding
- [`guard`] - pre-execution checks
- [`cycle`] - the per-cycle typestate machine
- [`connection`] / [`transaction`] - driver seam and connection ownership
- [`critical`] - caller-supplied mutual exclusion
- [`insert`], [`update`], [`delete`], [`replace`], [`batch`] - processors
*/

pub mod error;
pub mod value;
pub mod source;
pub mod properties;
pub mod date_format;
pub mod descriptor;
pub mod resolver;
pub mod plan;
pub mod binder;
pub mod guard;
pub mod connection;
pub mod transaction;
pub mod critical;
pub mod cycle;
pub mod recording;
pub mod processor;
pub mod insert;
pub mod update;
pub mod delete;
pub mod replace;
pub mod batch;
pub mod prelude;

#[cfg(test)]
mod tests;

pub use error::{ColmapError, ErrorCategory, Result};
pub use value::{ColumnValue, SqlParam};
pub use source::{Location, MessageContext, MessageDocument, ValueSource};
pub use properties::PropertySet;
pub use date_format::{DateFormat, TimeSentinel, ZoneShift};
pub use descriptor::{ColumnDescriptor, DescriptorId, DescriptorRegistry, SqlTypeTag, WhereClause};
pub use resolver::{ResolvedValues, ValueResolver};
pub use plan::{BatchKey, Dialect, Emission, PlanBuilder, PlanEntry, StatementKind, StatementPlan};
pub use binder::{BoundParameter, ParameterBinder};
pub use guard::ValidationGuard;
pub use connection::{Connection, ConnectionPool, PreparedStatement, Row};
pub use transaction::{ConnectionSource, TransactionPolicy, TransactionScope};
pub use critical::{CriticalSection, SharedLock, Unguarded};
pub use cycle::{cycle_states, Cycle, CycleState, Execution, PlanShape, RenderOptions};
pub use recording::{Journal, RecordingConnection, RecordingPool};
pub use processor::{CycleReport, Outcome, Processor, ProcessorKind, ProcessorSettings};
pub use insert::InsertProcessor;
pub use update::UpdateProcessor;
pub use delete::DeleteProcessor;
pub use replace::ReplaceProcessor;
pub use batch::{BatchReferenceProcessor, BatchSettings};
