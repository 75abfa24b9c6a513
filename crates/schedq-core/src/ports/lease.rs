//! PromotionLease port - bucket ごとの昇格リース
//!
//! 複数のスケジューラプロセスが同じ store を共有する場合、同じ bucket を
//! 二重に昇格しないように bucket 単位のリースを取ります。
//! 二重昇格は CAS で無害化されるので、リースは効率のためのものです。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::BucketKey;
use crate::ports::StoreError;

#[async_trait]
pub trait PromotionLease: Send + Sync {
    /// Take or refresh the lease on `bucket` for `holder`.
    ///
    /// Returns `false` while another holder owns an unexpired lease.
    async fn try_acquire(
        &self,
        bucket: BucketKey,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Drop the lease if `holder` still owns it.
    async fn release(&self, bucket: BucketKey, holder: &str) -> Result<(), StoreError>;
}
