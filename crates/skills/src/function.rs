//! Closure-backed skills.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use supermean_common::{ContextMap, Result, Skill};

/// Adapts an async closure into a [`Skill`].
pub struct FnSkill<F> {
    f: F,
}

impl<F, Fut> FnSkill<F>
where
    F: Fn(ContextMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Skill for FnSkill<F>
where
    F: Fn(ContextMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn call(&self, args: &ContextMap) -> Result<Value> {
        (self.f)(args.clone()).await
    }
}
