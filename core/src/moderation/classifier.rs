/// Secondary content classifier collaborator (best-effort, fail-open)
use crate::error::Result;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub safe: bool,
}

pub trait ContentClassifier: Send + Sync {
    fn classify<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Classification>>;
}
