//! # Volcano Execution Engine
//!
//! Pull-based executors: every operator implements `init()` +
//! `next() -> Option<(Tuple, Rid)>` and pulls from its children one tuple at
//! a time. The engine builds the executor tree from a plan, pumps the root
//! into a result vector, and catches the first error exactly once — clearing
//! the partial result so a failed statement never leaks half an answer.
//!
//! ```text
//! ExecutionEngine::execute(plan, ctx)
//!        │ build_executor (recursive factory)
//!        ▼
//! Projection ── next() ──> Filter ── next() ──> SeqScan ──> TableHeap/MVCC
//! ```
//!
//! ## Error Contract
//!
//! Executors return `Err` (never unwind) and a write conflict taints the
//! transaction before the error propagates. The engine's caller decides
//! whether to abort.
//!
//! ## Init-Check Hook
//!
//! [`InitCheckExecutor`] wraps an operator with init/next counters; tests
//! wire a pair around a join's children and [`ExecutionEngine::execute`]
//! verifies the nested-loop rescan contract (`right.init + 1 >= left.next`)
//! after the pump drains.

pub mod agg;
pub mod dml;
pub mod join;
pub mod project;
pub mod scan;
pub mod sort;

use crate::catalog::Catalog;
use crate::config::SessionConfig;
use crate::error::DbError;
use crate::plan::PlanNode;
use crate::recovery::LogManager;
use crate::storage::{BufferPoolManager, Rid, Tuple};
use crate::txn::{Transaction, TransactionManager};
use crate::types::Schema;
use eyre::{ensure, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

pub trait Executor: Send {
    /// Prepares (or resets) the cursor. Called repeatedly on the inner side
    /// of nested loops; must restart iteration from the top.
    fn init(&mut self) -> Result<()>;

    /// Produces the next tuple, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>>;

    fn schema(&self) -> &Schema;
}

/// Everything an executor needs from the instance, cheap to clone.
#[derive(Clone)]
pub struct ExecutorContext {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub txn: Arc<Transaction>,
    pub txn_mgr: Arc<TransactionManager>,
    pub config: Arc<SessionConfig>,
    pub log: Arc<LogManager>,
    init_checks: Arc<Mutex<Vec<(Arc<InitCheckCounters>, Arc<InitCheckCounters>)>>>,
}

impl ExecutorContext {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        catalog: Arc<Catalog>,
        txn: Arc<Transaction>,
        txn_mgr: Arc<TransactionManager>,
        config: Arc<SessionConfig>,
        log: Arc<LogManager>,
    ) -> Self {
        Self {
            bpm,
            catalog,
            txn,
            txn_mgr,
            config,
            log,
            init_checks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a (left, right) counter pair for the nested-loop contract
    /// check after execution.
    pub fn register_init_check(
        &self,
        left: Arc<InitCheckCounters>,
        right: Arc<InitCheckCounters>,
    ) {
        self.init_checks.lock().push((left, right));
    }

    fn init_check_pairs(&self) -> Vec<(Arc<InitCheckCounters>, Arc<InitCheckCounters>)> {
        self.init_checks.lock().clone()
    }
}

/// Builds the executor tree for a plan.
pub fn build_executor(plan: &Arc<PlanNode>, ctx: &ExecutorContext) -> Result<Box<dyn Executor>> {
    let executor: Box<dyn Executor> = match plan.as_ref() {
        PlanNode::SeqScan(node) => Box::new(scan::SeqScanExecutor::new(ctx.clone(), node.clone())),
        PlanNode::IndexScan(node) => {
            Box::new(scan::IndexScanExecutor::new(ctx.clone(), node.clone()))
        }
        PlanNode::VectorIndexScan(node) => {
            Box::new(scan::VectorIndexScanExecutor::new(ctx.clone(), node.clone()))
        }
        PlanNode::MockScan(node) => Box::new(scan::MockScanExecutor::new(node.clone())),
        PlanNode::Values(node) => Box::new(project::ValuesExecutor::new(node.clone())),
        PlanNode::Insert(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(dml::InsertExecutor::new(ctx.clone(), node.clone(), child))
        }
        PlanNode::Update(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(dml::UpdateExecutor::new(ctx.clone(), node.clone(), child))
        }
        PlanNode::Delete(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(dml::DeleteExecutor::new(ctx.clone(), node.clone(), child))
        }
        PlanNode::Filter(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(project::FilterExecutor::new(node.clone(), child))
        }
        PlanNode::Projection(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(project::ProjectionExecutor::new(node.clone(), child))
        }
        PlanNode::NestedLoopJoin(node) => {
            let (left, left_counters) = InitCheckExecutor::new(build_executor(&node.left, ctx)?);
            let (right, right_counters) = InitCheckExecutor::new(build_executor(&node.right, ctx)?);
            ctx.register_init_check(left_counters, right_counters);
            Box::new(join::NestedLoopJoinExecutor::new(
                node.clone(),
                Box::new(left),
                Box::new(right),
            ))
        }
        PlanNode::NestedIndexJoin(node) => {
            let left = build_executor(&node.left, ctx)?;
            Box::new(join::NestedIndexJoinExecutor::new(ctx.clone(), node.clone(), left))
        }
        PlanNode::HashJoin(node) => {
            let left = build_executor(&node.left, ctx)?;
            let right = build_executor(&node.right, ctx)?;
            Box::new(join::HashJoinExecutor::new(node.clone(), left, right))
        }
        PlanNode::Aggregation(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(agg::AggregationExecutor::new(node.clone(), child))
        }
        PlanNode::Window(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(agg::WindowExecutor::new(node.clone(), child))
        }
        PlanNode::Sort(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(sort::SortExecutor::new(node.clone(), child))
        }
        PlanNode::Limit(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(sort::LimitExecutor::new(node.clone(), child))
        }
        PlanNode::TopN(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(sort::TopNExecutor::new(node.clone(), child))
        }
        PlanNode::TopNPerGroup(node) => {
            let child = build_executor(&node.child, ctx)?;
            Box::new(sort::TopNPerGroupExecutor::new(node.clone(), child))
        }
    };
    Ok(executor)
}

pub struct ExecutionEngine;

impl ExecutionEngine {
    /// Builds, initializes and drains the executor tree. On any executor
    /// error the partial result set is discarded and the error propagates;
    /// the transaction may have been tainted by a write conflict.
    pub fn execute(plan: &Arc<PlanNode>, ctx: &ExecutorContext) -> Result<Vec<Tuple>> {
        trace!(plan = plan.name(), "execute");
        let mut executor = build_executor(plan, ctx)?;
        let mut rows = Vec::new();

        let pump = (|| -> Result<()> {
            executor.init()?;
            while let Some((tuple, _rid)) = executor.next()? {
                rows.push(tuple);
            }
            Ok(())
        })();
        if let Err(err) = pump {
            rows.clear();
            return Err(err);
        }

        Self::perform_checks(ctx)?;
        Ok(rows)
    }

    /// Validates the nested-loop rescan contract for every registered
    /// init-check pair.
    fn perform_checks(ctx: &ExecutorContext) -> Result<()> {
        for (left, right) in ctx.init_check_pairs() {
            ensure!(
                right.inits() + 1 >= left.nexts(),
                DbError::Execution(format!(
                    "nested-loop contract violated: right init count {} + 1 < left next count {}",
                    right.inits(),
                    left.nexts()
                ))
            );
        }
        Ok(())
    }
}

/// Shared counters observed by [`InitCheckExecutor`].
#[derive(Debug, Default)]
pub struct InitCheckCounters {
    inits: AtomicUsize,
    nexts: AtomicUsize,
}

impl InitCheckCounters {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::Acquire)
    }

    pub fn nexts(&self) -> usize {
        self.nexts.load(Ordering::Acquire)
    }
}

/// Transparent wrapper counting init/next calls on its inner executor.
pub struct InitCheckExecutor {
    inner: Box<dyn Executor>,
    counters: Arc<InitCheckCounters>,
}

impl InitCheckExecutor {
    pub fn new(inner: Box<dyn Executor>) -> (Self, Arc<InitCheckCounters>) {
        let counters = Arc::new(InitCheckCounters::default());
        (Self { inner, counters: Arc::clone(&counters) }, counters)
    }
}

impl Executor for InitCheckExecutor {
    fn init(&mut self) -> Result<()> {
        self.counters.inits.fetch_add(1, Ordering::AcqRel);
        self.inner.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        self.counters.nexts.fetch_add(1, Ordering::AcqRel);
        self.inner.next()
    }

    fn schema(&self) -> &Schema {
        self.inner.schema()
    }
}
