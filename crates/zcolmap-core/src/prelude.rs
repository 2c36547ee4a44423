/*!
Commonly used types for building and running processors.

```rust,ignore
use zcolmap_core::prelude::*;
```
*/

pub use crate::error::{ColmapError, Result};
pub use crate::value::{ColumnValue, SqlParam};
pub use crate::source::{MessageContext, MessageDocument, ValueSource};
pub use crate::properties::PropertySet;
pub use crate::descriptor::{ColumnDescriptor, DescriptorRegistry, SqlTypeTag, WhereClause};
pub use crate::connection::{Connection, ConnectionPool, PreparedStatement};
pub use crate::transaction::{ConnectionSource, TransactionPolicy};
pub use crate::critical::{CriticalSection, SharedLock, Unguarded};
pub use crate::recording::{RecordingConnection, RecordingPool};

// Processors
pub use crate::processor::{self as processors, CycleReport, Outcome, Processor};
pub use crate::insert::InsertProcessor;
pub use crate::update::UpdateProcessor;
pub use crate::delete::DeleteProcessor;
pub use crate::replace::ReplaceProcessor;
pub use crate::batch::BatchReferenceProcessor;
