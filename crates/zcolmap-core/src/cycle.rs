/*!
The per-cycle state machine.

```text
RESET -> RESOLVE -> VALIDATE -> BUILD -> BIND -> EXECUTE
```

Each phase is a method that consumes a [`Cycle`] in one state and returns it
in the next, so phases cannot be skipped or reordered. [`Cycle::reset`] is the
only constructor: every cycle starts from an empty value set, and no two
cycles share resolved values. Commit, rollback and release wrap the whole
chain and belong to [`TransactionScope`](crate::transaction::TransactionScope).
*/

use crate::binder::{BoundParameter, ParameterBinder};
use crate::connection::Connection;
use crate::descriptor::DescriptorRegistry;
use crate::error::{ColmapError, Result};
use crate::guard::ValidationGuard;
use crate::plan::{BatchKey, Dialect, PlanBuilder, StatementKind, StatementPlan};
use crate::resolver::{ResolvedValues, ValueResolver};
use crate::source::{MessageDocument, ValueSource};
use std::marker::PhantomData;
use tracing::{debug, info};

/// Phantom states of a [`Cycle`]
pub mod cycle_states {
    /// Fresh cycle, no values yet
    #[derive(Debug, Clone, Copy)]
    pub struct Reset;

    /// Every descriptor has been resolved
    #[derive(Debug, Clone, Copy)]
    pub struct Resolved;

    /// Values passed the guard
    #[derive(Debug, Clone, Copy)]
    pub struct Validated;

    /// SQL text and plan are ready to bind
    #[derive(Debug, Clone, Copy)]
    pub struct Built;
}

/// Marker for valid cycle states
pub trait CycleState: 'static + Copy + Clone + std::fmt::Debug {}

impl CycleState for cycle_states::Reset {}
impl CycleState for cycle_states::Resolved {}
impl CycleState for cycle_states::Validated {}
impl CycleState for cycle_states::Built {}

/// Which statement shape a cycle builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanShape {
    Insert,
    Update,
    Delete,
    BatchUpdate { key_column: String, key_arity: usize },
}

/// Options applied when rendering the plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub dialect: Dialect,
    pub sysdate_in_utc: bool,
}

/// What one executed cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub plan: StatementPlan,
    pub bound: Vec<BoundParameter>,
    pub rows_affected: u64,
    pub batch_entries: usize,
}

impl Execution {
    pub fn kind(&self) -> StatementKind {
        self.plan.kind()
    }
}

/// One RESET..EXECUTE pass over a registry
#[derive(Debug)]
pub struct Cycle<'r, State = cycle_states::Reset> {
    registry: &'r DescriptorRegistry,
    table: String,
    values: ResolvedValues,
    plan: Option<StatementPlan>,
    _state: PhantomData<State>,
}

impl<'r, S: CycleState> Cycle<'r, S> {
    fn transition<T: CycleState>(self) -> Cycle<'r, T> {
        Cycle {
            registry: self.registry,
            table: self.table,
            values: self.values,
            plan: self.plan,
            _state: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn registry(&self) -> &'r DescriptorRegistry {
        self.registry
    }

    pub fn values(&self) -> &ResolvedValues {
        &self.values
    }
}

impl<'r> Cycle<'r, cycle_states::Reset> {
    pub fn reset(registry: &'r DescriptorRegistry, table: impl Into<String>) -> Self {
        let table = table.into();
        debug!("Starting cycle against {}", table);
        Self {
            registry,
            table,
            values: ResolvedValues::new(),
            plan: None,
            _state: PhantomData,
        }
    }

    /// Resolve every descriptor from the context and document
    pub fn resolve(
        mut self,
        resolver: &ValueResolver,
        context: &dyn ValueSource,
        document: &MessageDocument,
    ) -> Result<Cycle<'r, cycle_states::Resolved>> {
        self.values = resolver.resolve_all(self.registry, context, document)?;
        Ok(self.transition())
    }

    /// Adopt values resolved elsewhere, e.g. from a staging row
    pub fn with_values(mut self, values: ResolvedValues) -> Cycle<'r, cycle_states::Resolved> {
        self.values = values;
        self.transition()
    }
}

impl<'r> Cycle<'r, cycle_states::Resolved> {
    pub fn validate(self, guard: &ValidationGuard) -> Result<Cycle<'r, cycle_states::Validated>> {
        guard.check(&self.table, self.registry, &self.values)?;
        Ok(self.transition())
    }
}

impl<'r> Cycle<'r, cycle_states::Validated> {
    pub fn build(
        mut self,
        shape: &PlanShape,
        options: RenderOptions,
    ) -> Result<Cycle<'r, cycle_states::Built>> {
        let builder = PlanBuilder::new(self.registry)
            .with_dialect(options.dialect)
            .with_sysdate_in_utc(options.sysdate_in_utc);

        let plan = match shape {
            PlanShape::Insert => builder.insert(&self.table, &self.values)?,
            PlanShape::Update => builder.update(&self.table, &self.values)?,
            PlanShape::Delete => builder.delete(&self.table, &self.values)?,
            PlanShape::BatchUpdate {
                key_column,
                key_arity,
            } => builder.batched_update(&self.table, &self.values, key_column, *key_arity)?,
        };
        self.plan = Some(plan);
        Ok(self.transition())
    }
}

impl<'r> Cycle<'r, cycle_states::Built> {
    pub fn plan(&self) -> Result<&StatementPlan> {
        self.plan
            .as_ref()
            .ok_or_else(|| ColmapError::plan_mismatch("built cycle has no plan"))
    }

    /// Coerce the plan's parameters without touching a connection
    pub fn parameters(&self, binder: &ParameterBinder) -> Result<Vec<BoundParameter>> {
        binder.parameters(self.plan()?, self.registry, &self.values)
    }

    fn into_plan(self) -> Result<(StatementPlan, &'r DescriptorRegistry, ResolvedValues)> {
        let plan = self
            .plan
            .ok_or_else(|| ColmapError::plan_mismatch("built cycle has no plan"))?;
        Ok((plan, self.registry, self.values))
    }

    /// BIND and EXECUTE a single statement
    pub fn execute(self, conn: &mut dyn Connection, binder: &ParameterBinder) -> Result<Execution> {
        let (plan, registry, values) = self.into_plan()?;

        let (bound, rows_affected) = {
            let mut stmt = conn.prepare(plan.sql())?;
            let bound = binder.bind(stmt.as_mut(), &plan, registry, &values)?;
            let rows = stmt.execute_update()?;
            (bound, rows)
        };

        info!("{} on {} affected {} rows", plan.kind(), plan.table(), rows_affected);
        Ok(Execution {
            plan,
            bound,
            rows_affected,
            batch_entries: 0,
        })
    }

    /// BIND and EXECUTE one batch entry per key; values are identical across entries
    pub fn execute_batch(
        self,
        conn: &mut dyn Connection,
        binder: &ParameterBinder,
        keys: &[BatchKey],
    ) -> Result<Execution> {
        let (plan, registry, values) = self.into_plan()?;
        let bound = binder.parameters(&plan, registry, &values)?;

        let counts = {
            let mut stmt = conn.prepare(plan.sql())?;
            for key in keys {
                for p in &bound {
                    stmt.bind(p.slot, p.param.clone())?;
                }
                binder.bind_key(stmt.as_mut(), &plan, key)?;
                stmt.add_batch()?;
            }
            stmt.execute_batch()?
        };

        let rows_affected: u64 = counts.iter().sum();
        info!(
            "Batch on {} ran {} entries affecting {} rows",
            plan.table(),
            counts.len(),
            rows_affected
        );
        Ok(Execution {
            plan,
            bound,
            rows_affected,
            batch_entries: keys.len(),
        })
    }
}
