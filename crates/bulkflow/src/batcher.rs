//! Statement batching by data locality
//!
//! Groups write statements that target the same partition (or the same set
//! of owning replicas) into batch statements, so that a logged batch never
//! spans partitions and an unlogged batch lands on one replica set. Batching
//! performs no I/O, cannot block and never fails: a statement whose routing
//! cannot be resolved simply passes through ungrouped.

use crate::statement::{BatchStatement, BatchType, Statement};
use crate::topology::{ReplicaLocator, ReplicaSet};
use futures::future::FutureExt;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How statements are grouped into batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Group by exact partition identity (routing key, else routing token).
    /// Maximizes single-partition locality; the right choice for logged
    /// batches.
    #[default]
    ByPartitionKey,
    /// Group by the set of replicas owning the partition. Coarser and
    /// cheaper; good enough for unlogged batches.
    ByReplicaSet,
}

/// The comparable locality key statements are grouped by
///
/// `Ungroupable` carries a per-batcher sequence number, so two statements
/// with unresolvable routing never compare equal and are never merged with
/// each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupingKey {
    /// Exact partition identity
    Partition(bytes::Bytes),
    /// Token-ring position, used when no routing key is available
    Token(crate::statement::Token),
    /// The set of nodes owning the destination partition
    Replicas(ReplicaSet),
    /// No locality information could be resolved
    Ungroupable(u64),
}

impl GroupingKey {
    /// Whether this key carries real locality information
    pub fn is_groupable(&self) -> bool {
        !matches!(self, Self::Ungroupable(_))
    }
}

/// Configuration for a [`StatementBatcher`], fixed for its lifetime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Grouping mode
    pub mode: BatchMode,
    /// Durability mode of emitted batches
    pub batch_type: BatchType,
    /// Maximum statements folded into one emitted batch; oversized groups
    /// are split into consecutive chunks (0 = unlimited)
    pub max_batch_statements: usize,
}

impl BatcherConfig {
    /// Set the grouping mode
    pub fn with_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the durability mode of emitted batches
    pub fn with_batch_type(mut self, batch_type: BatchType) -> Self {
        self.batch_type = batch_type;
        self
    }

    /// Cap the number of statements per emitted batch (0 = unlimited)
    pub fn with_max_batch_statements(mut self, max: usize) -> Self {
        self.max_batch_statements = max;
        self
    }
}

/// Groups write statements by locality and folds each group into one batch
///
/// Within a group, statements keep their relative order. Across groups, the
/// emission order is unspecified. A group of one is emitted as the bare
/// statement, never as a one-element batch.
pub struct StatementBatcher {
    config: BatcherConfig,
    locator: Option<Arc<dyn ReplicaLocator>>,
    ungroupable_seq: AtomicU64,
}

impl StatementBatcher {
    /// Create a batcher with the given configuration and no topology; in
    /// [`BatchMode::ByReplicaSet`] every statement is then ungroupable
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            locator: None,
            ungroupable_seq: AtomicU64::new(0),
        }
    }

    /// Attach a replica locator, enabling [`BatchMode::ByReplicaSet`]
    pub fn with_locator(mut self, locator: Arc<dyn ReplicaLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// The batcher configuration
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Derive the grouping key for a statement
    ///
    /// Resolution order: routing key, else routing token, then (in replica
    /// set mode) the replicas owning that identity. Statements resolving to
    /// [`GroupingKey::Ungroupable`] each receive a distinct sentinel.
    pub fn grouping_key(&self, statement: &Statement) -> GroupingKey {
        let locality = statement
            .routing_key()
            .map(|key| GroupingKey::Partition(key.clone()))
            .or_else(|| statement.routing_token().map(GroupingKey::Token));

        match (self.config.mode, locality) {
            (BatchMode::ByPartitionKey, Some(key)) => key,
            (BatchMode::ByReplicaSet, Some(key)) => self
                .replicas_for(&key)
                .map(GroupingKey::Replicas)
                .unwrap_or_else(|| self.ungroupable()),
            (_, None) => self.ungroupable(),
        }
    }

    fn replicas_for(&self, key: &GroupingKey) -> Option<ReplicaSet> {
        let locator = self.locator.as_ref()?;
        match key {
            GroupingKey::Partition(routing_key) => locator.replicas_for_key(routing_key),
            GroupingKey::Token(token) => locator.replicas_for_token(*token),
            _ => None,
        }
    }

    fn ungroupable(&self) -> GroupingKey {
        GroupingKey::Ungroupable(self.ungroupable_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Group the given statements by grouping key and fold each group into
    /// one batch (or the bare statement for groups of one)
    pub fn batch_by_grouping_key(
        &self,
        statements: impl IntoIterator<Item = Statement>,
    ) -> Vec<Statement> {
        // Group emission follows first appearance for determinism; callers
        // must not rely on cross-group order.
        let mut order: Vec<GroupingKey> = Vec::new();
        let mut groups: HashMap<GroupingKey, Vec<Statement>> = HashMap::new();

        for statement in statements {
            let key = self.grouping_key(&statement);
            match groups.get_mut(&key) {
                Some(members) => members.push(statement),
                None => {
                    order.push(key.clone());
                    groups.insert(key, vec![statement]);
                }
            }
        }

        let mut out = Vec::with_capacity(order.len());
        for key in order {
            let members = groups.remove(&key).unwrap_or_default();
            self.fold_chunked(members, &mut out);
        }
        out
    }

    /// Fold the entire input into one batch regardless of grouping key
    ///
    /// Returns the bare statement for an input of one, `None` for an empty
    /// input. Use with caution: statements with differing routing keys end
    /// up in one multi-partition batch, which degrades write throughput.
    pub fn batch_all(&self, statements: impl IntoIterator<Item = Statement>) -> Option<Statement> {
        let mut batch = BatchStatement::new(self.config.batch_type);
        for statement in statements {
            batch.add(statement);
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch.into_statement())
        }
    }

    /// Stream form of [`batch_by_grouping_key`](Self::batch_by_grouping_key):
    /// groups the whole input stream, then emits the folded batches
    pub fn batch_stream<'a, S>(&'a self, statements: S) -> BoxStream<'a, Statement>
    where
        S: Stream<Item = Statement> + Send + 'a,
    {
        statements
            .collect::<Vec<_>>()
            .map(|all| stream::iter(self.batch_by_grouping_key(all)))
            .flatten_stream()
            .boxed()
    }

    /// Stream form of [`batch_all`](Self::batch_all)
    pub async fn batch_all_stream<S>(&self, statements: S) -> Option<Statement>
    where
        S: Stream<Item = Statement> + Send,
    {
        self.batch_all(statements.collect::<Vec<_>>().await)
    }

    fn fold_chunked(&self, members: Vec<Statement>, out: &mut Vec<Statement>) {
        let cap = self.config.max_batch_statements;
        if cap == 0 || members.len() <= cap {
            out.push(self.fold(members));
            return;
        }
        let mut iter = members.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<_> = iter.by_ref().take(cap).collect();
            out.push(self.fold(chunk));
        }
    }

    fn fold(&self, members: Vec<Statement>) -> Statement {
        let mut batch = BatchStatement::new(self.config.batch_type);
        for statement in members {
            batch.add(statement);
        }
        batch.into_statement()
    }
}
