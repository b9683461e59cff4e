//! Test doubles for exercising store-unavailable fallbacks

use async_trait::async_trait;
use std::time::Duration;

use crate::{StateStore, StoreError};

/// A store that is never reachable
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn down<T>() -> Result<T, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl StateStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Self::down()
    }

    async fn set_with_ttl(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Self::down()
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Self::down()
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Self::down()
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
        Self::down()
    }

    async fn scan(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Self::down()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Self::down()
    }

    fn backend(&self) -> &'static str {
        "unavailable"
    }
}
