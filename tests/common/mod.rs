//! Integration test common infrastructure.
//!
//! Builds bootstrapped services over either store and seeds the catalog
//! used by most scenarios.

use capgate::config::EngineConfig;
use capgate::{
    DeclareOptions, Effect, GrantStore, MemoryStore, PermissionService, SqliteStore, SubjectType,
};
use std::sync::Arc;

/// Service over an in-memory store, already bootstrapped.
#[allow(dead_code)]
pub async fn memory_service() -> PermissionService {
    service_over(Arc::new(MemoryStore::new())).await
}

/// Service over an in-memory SQLite database, already bootstrapped.
#[allow(dead_code)]
pub async fn sqlite_service() -> PermissionService {
    let store = SqliteStore::open(":memory:")
        .await
        .expect("Failed to open in-memory SQLite store");
    service_over(Arc::new(store)).await
}

#[allow(dead_code)]
pub async fn service_over(store: Arc<dyn GrantStore>) -> PermissionService {
    let service = PermissionService::new(store, EngineConfig::default());
    service.bootstrap().await.expect("Failed to bootstrap service");
    service
}

/// Role ids created by [`shop_scenario`].
#[allow(dead_code)]
pub struct Shop {
    pub member: i64,
    pub vip: i64,
}

/// `shop.buy` (default deny); `member` (rank 0); `vip` (rank 10, parent
/// `member`) allowed to buy. User `u` holds both roles.
#[allow(dead_code)]
pub async fn shop_scenario(service: &PermissionService) -> Shop {
    service
        .declare_exact("shop", "buy", DeclareOptions::deny())
        .expect("declare shop.buy");
    let member = service
        .create_role(None, 0, Some("member"))
        .await
        .expect("create member");
    let vip = service
        .create_role(Some(member), 10, Some("vip"))
        .await
        .expect("create vip");
    service
        .grant(SubjectType::Role, &vip.to_string(), Effect::Allow, "shop.buy")
        .await
        .expect("grant vip");
    service.assign_role("u", member).await.expect("assign member");
    service.assign_role("u", vip).await.expect("assign vip");
    Shop { member, vip }
}
