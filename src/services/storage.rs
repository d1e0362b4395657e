use anyhow::Result;
use async_trait::async_trait;

/// The physical persistence engine the chat store writes through.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;

    use super::*;

    /// Every operation fails, as a full disk or revoked permission would.
    #[derive(Default)]
    pub struct BrokenStorage {
        pub writes: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for BrokenStorage {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            bail!("storage unavailable")
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            bail!("storage unavailable")
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            bail!("storage unavailable")
        }
    }
}
