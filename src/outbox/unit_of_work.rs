use async_trait::async_trait;
use thiserror::Error;

/// What a successful commit wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Number of records the commit changed. May be zero.
    pub changes: usize,
}

impl CommitOutcome {
    pub fn new(changes: usize) -> Self {
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes == 0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitOfWorkError {
    #[error("concurrent write to {id}")]
    ConcurrentWrite { id: String },

    #[error("commit failed: {0}")]
    Failed(String),
}

/// The transactional work a message context is enlisted in.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(&mut self) -> Result<CommitOutcome, UnitOfWorkError>;
}
