//! Statement types executed by the engine
//!
//! A [`Statement`] is an opaque unit of work destined for the database. The
//! engine never interprets its text; it only needs routing introspection
//! (which partition or token the statement targets) and batch composition.
//! Statements are immutable once constructed and cheap to clone.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Routing key identifying the destination partition of a statement.
///
/// Opaque bytes from the engine's point of view; equality is byte equality.
pub type RoutingKey = Bytes;

/// A position on the token ring, the coarser locality hint used when no
/// routing key is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token(pub i64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durability mode of a batch statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    /// Atomic batch written through the batch log
    Logged,
    /// Non-atomic batch, cheapest to apply
    #[default]
    Unlogged,
    /// Batch of counter updates
    Counter,
}

impl fmt::Display for BatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logged => write!(f, "logged"),
            Self::Unlogged => write!(f, "unlogged"),
            Self::Counter => write!(f, "counter"),
        }
    }
}

/// A single executable statement with optional routing information
///
/// The query text is shared, so cloning a bound statement never copies it.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    query: Arc<str>,
    routing_key: Option<RoutingKey>,
    routing_token: Option<Token>,
}

impl BoundStatement {
    /// Create a statement with no routing information
    pub fn new(query: impl Into<Arc<str>>) -> Self {
        Self {
            query: query.into(),
            routing_key: None,
            routing_token: None,
        }
    }

    /// Set the routing key (partition identity)
    pub fn with_routing_key(mut self, key: impl Into<Bytes>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    /// Set the routing token
    pub fn with_routing_token(mut self, token: Token) -> Self {
        self.routing_token = Some(token);
        self
    }

    /// The query text
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The routing key, if one could be computed upstream
    pub fn routing_key(&self) -> Option<&RoutingKey> {
        self.routing_key.as_ref()
    }

    /// The routing token, if one could be computed upstream
    pub fn routing_token(&self) -> Option<Token> {
        self.routing_token
    }
}

/// An ordered group of statements sharing a grouping key, applied with a
/// single durability mode
///
/// A batch routes like its first child. Batches are built by the
/// [`StatementBatcher`](crate::batcher::StatementBatcher); a batch holding a
/// single child is never handed downstream as a batch, see
/// [`into_statement`](Self::into_statement).
#[derive(Debug, Clone)]
pub struct BatchStatement {
    batch_type: BatchType,
    children: Vec<BoundStatement>,
}

impl BatchStatement {
    /// Create an empty batch of the given durability mode
    pub fn new(batch_type: BatchType) -> Self {
        Self {
            batch_type,
            children: Vec::new(),
        }
    }

    /// Append a statement. Appending a batch appends its children in order.
    pub fn add(&mut self, statement: Statement) {
        match statement {
            Statement::Single(bound) => self.children.push(bound),
            Statement::Batch(batch) => self.children.extend(batch.children),
        }
    }

    /// The durability mode
    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    /// The child statements in insertion order
    pub fn children(&self) -> &[BoundStatement] {
        &self.children
    }

    /// Number of child statements
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the batch has no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Routing key of the first child
    pub fn routing_key(&self) -> Option<&RoutingKey> {
        self.children.first().and_then(BoundStatement::routing_key)
    }

    /// Routing token of the first child
    pub fn routing_token(&self) -> Option<Token> {
        self.children.first().and_then(BoundStatement::routing_token)
    }

    /// Convert into a [`Statement`], unwrapping a single-child batch to the
    /// bare child
    pub fn into_statement(mut self) -> Statement {
        if self.children.len() == 1 {
            Statement::Single(self.children.remove(0))
        } else {
            Statement::Batch(self)
        }
    }
}

/// An opaque unit of work: a single statement or a batch of them
#[derive(Debug, Clone)]
pub enum Statement {
    /// A single bound statement
    Single(BoundStatement),
    /// A batch of statements sharing a grouping key
    Batch(BatchStatement),
}

impl Statement {
    /// Create a single statement with no routing information
    pub fn single(query: impl Into<Arc<str>>) -> Self {
        Self::Single(BoundStatement::new(query))
    }

    /// The routing key targeted by this statement (for a batch, the first
    /// child's)
    pub fn routing_key(&self) -> Option<&RoutingKey> {
        match self {
            Self::Single(s) => s.routing_key(),
            Self::Batch(b) => b.routing_key(),
        }
    }

    /// The routing token targeted by this statement (for a batch, the first
    /// child's)
    pub fn routing_token(&self) -> Option<Token> {
        match self {
            Self::Single(s) => s.routing_token(),
            Self::Batch(b) => b.routing_token(),
        }
    }

    /// Number of executable units: 1 for a single statement, the child count
    /// for a batch
    pub fn size(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(b) => b.len(),
        }
    }

    /// Whether this statement is a batch
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

impl From<BoundStatement> for Statement {
    fn from(bound: BoundStatement) -> Self {
        Self::Single(bound)
    }
}

impl From<BatchStatement> for Statement {
    fn from(batch: BatchStatement) -> Self {
        Self::Batch(batch)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(s) => write!(f, "{}", s.query()),
            Self::Batch(b) => write!(f, "{} batch of {} statements", b.batch_type(), b.len()),
        }
    }
}
