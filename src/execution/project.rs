//! Stateless row shapers: filter, projection and the VALUES rowset source.

use super::Executor;
use crate::plan::{FilterNode, ProjectionNode, ValuesNode};
use crate::storage::{Rid, Tuple};
use crate::types::Schema;
use eyre::Result;

pub struct FilterExecutor {
    node: FilterNode,
    child: Box<dyn Executor>,
}

impl FilterExecutor {
    pub fn new(node: FilterNode, child: Box<dyn Executor>) -> Self {
        Self { node, child }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        while let Some((tuple, rid)) = self.child.next()? {
            let keep = self
                .node
                .predicate
                .evaluate(&tuple, self.child.schema())?
                .as_bool();
            if keep == Some(true) {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

pub struct ProjectionExecutor {
    node: ProjectionNode,
    child: Box<dyn Executor>,
}

impl ProjectionExecutor {
    pub fn new(node: ProjectionNode, child: Box<dyn Executor>) -> Self {
        Self { node, child }
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some((tuple, rid)) = self.child.next()? else {
            return Ok(None);
        };
        let values = self
            .node
            .expressions
            .iter()
            .map(|e| e.evaluate(&tuple, self.child.schema()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some((Tuple::from_values(&values, &self.node.schema)?, rid)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

/// Source executor for `INSERT ... VALUES`: evaluates each row of constant
/// expressions against the empty tuple.
pub struct ValuesExecutor {
    node: ValuesNode,
    pos: usize,
}

impl ValuesExecutor {
    pub fn new(node: ValuesNode) -> Self {
        Self { node, pos: 0 }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some(row) = self.node.rows.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        let empty = Tuple::empty();
        let empty_schema = Schema::new(Vec::new());
        let values = row
            .iter()
            .map(|e| e.evaluate(&empty, &empty_schema))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some((Tuple::from_values(&values, &self.node.schema)?, Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}
