//! LocalLeaseManager - プロセス内の bucket リース
//!
//! 同じプロセス内で複数の Promoter を動かす場合（テストや冗長構成の
//! シミュレーション）に使います。別プロセス間の調整には、同じ
//! `PromotionLease` trait を外部のロックサービスで実装してください。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::BucketKey;
use crate::ports::{Clock, PromotionLease, StoreError};

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at_ms: i64,
}

pub struct LocalLeaseManager {
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<BucketKey, Lease>>,
}

impl LocalLeaseManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn holder_of(&self, bucket: BucketKey) -> Option<String> {
        let now = self.clock.now_ms();
        self.leases
            .lock()
            .get(&bucket)
            .filter(|l| l.expires_at_ms > now)
            .map(|l| l.holder.clone())
    }
}

#[async_trait]
impl PromotionLease for LocalLeaseManager {
    async fn try_acquire(
        &self,
        bucket: BucketKey,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut leases = self.leases.lock();
        leases.retain(|_, l| l.expires_at_ms > now);

        if let Some(current) = leases.get(&bucket)
            && current.holder != holder
        {
            return Ok(false);
        }
        leases.insert(
            bucket,
            Lease {
                holder: holder.to_string(),
                expires_at_ms: now + ttl.as_millis() as i64,
            },
        );
        Ok(true)
    }

    async fn release(&self, bucket: BucketKey, holder: &str) -> Result<(), StoreError> {
        let mut leases = self.leases.lock();
        if leases.get(&bucket).is_some_and(|l| l.holder == holder) {
            leases.remove(&bucket);
        }
        Ok(())
    }
}
