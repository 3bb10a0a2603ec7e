//! Integration tests for namespace teardown, reactivation and grant cleanup.

mod common;

use capgate::perm::{Layers, authorize};
use capgate::{Decision, DeclareOptions, Effect, SubjectType};
use common::memory_service;

#[tokio::test]
async fn test_stale_node_ref_denies_after_removal() {
    let service = memory_service().await;
    service.declare_exact("ns", "old", DeclareOptions::allow()).unwrap();
    let stale = service.resolve("ns.old").unwrap();

    assert!(service.remove_namespace("ns"));
    assert!(!service.remove_namespace("ns"));
    service.declare_exact("ns", "new", DeclareOptions::allow()).unwrap();

    let user = service.auth_user("u").await.unwrap();
    service.authorize_user("u", "ns.new").await.unwrap();
    // Warm caches, but the reference belongs to an older generation.
    assert_eq!(service.authorize_user_fast(&user, &stale), None);
    assert_eq!(service.authorize_user("u", "ns.old").await.unwrap(), Decision::Deny);

    let fresh = service.resolve("ns.new").unwrap();
    assert!(fresh.epoch() > stale.epoch());
    assert_eq!(fresh.ns_index(), stale.ns_index());
}

#[test]
fn test_engine_denies_stale_ref_directly() {
    let mut registry = capgate::perm::Registry::new();
    registry.declare_exact("ns", "x", DeclareOptions::allow()).unwrap();
    let stale = capgate::perm::Resolver::resolve_uncached(&registry, "ns.x").unwrap();
    registry.remove_namespace("ns");
    registry.declare_exact("ns", "x", DeclareOptions::allow()).unwrap();

    let roles = capgate::perm::RoleTree::new();
    let layers = Layers {
        registry: &registry,
        roles: &roles,
        user: None,
        role_ids: &[],
    };
    assert_eq!(authorize(&stale, &layers), Decision::Deny);
}

#[tokio::test]
async fn test_revoke_after_namespace_removed() {
    let service = memory_service().await;
    service.declare_exact("ns", "x", DeclareOptions::deny()).unwrap();
    service
        .grant(SubjectType::User, "u", Effect::Allow, "ns.x")
        .await
        .unwrap();
    service.remove_namespace("ns");

    // Granting needs the catalog; revoking does not.
    assert!(
        service
            .grant(SubjectType::User, "u", Effect::Allow, "ns.x")
            .await
            .is_err()
    );
    assert!(service.revoke(SubjectType::User, "u", "ns.x").await.unwrap());
    assert!(!service.revoke(SubjectType::User, "u", "ns.x").await.unwrap());
}

#[tokio::test]
async fn test_grant_revoke_round_trip() {
    let service = memory_service().await;
    service.declare_star("ns", "a", DeclareOptions::deny()).unwrap();
    let baseline = service.authorize_user("u", "ns.a.b").await.unwrap();

    service
        .grant(SubjectType::User, "u", Effect::Allow, "ns.a.b")
        .await
        .unwrap();
    assert_eq!(service.authorize_user("u", "ns.a.b").await.unwrap(), Decision::Allow);

    service.revoke(SubjectType::User, "u", "ns.a.b").await.unwrap();
    assert_eq!(service.authorize_user("u", "ns.a.b").await.unwrap(), baseline);
}

#[tokio::test]
async fn test_grants_return_with_namespace() {
    let service = memory_service().await;
    service.declare_exact("ns", "cmd", DeclareOptions::deny()).unwrap();
    let mods = service.create_role(None, 1, Some("mods")).await.unwrap();
    service.assign_role("u", mods).await.unwrap();
    service
        .grant(SubjectType::Role, &mods.to_string(), Effect::Allow, "ns.cmd")
        .await
        .unwrap();
    service
        .grant(SubjectType::User, "w", Effect::Allow, "ns.cmd")
        .await
        .unwrap();

    service.remove_namespace("ns");
    assert_eq!(service.authorize_user("u", "ns.cmd").await.unwrap(), Decision::Deny);

    // Stored grants apply again once the plugin re-declares.
    service.declare_exact("ns", "cmd", DeclareOptions::deny()).unwrap();
    assert_eq!(service.authorize_user("u", "ns.cmd").await.unwrap(), Decision::Allow);
    assert_eq!(service.authorize_user("w", "ns.cmd").await.unwrap(), Decision::Allow);
}

#[tokio::test]
async fn test_unknown_segment_under_star_becomes_known() {
    let service = memory_service().await;
    service.declare_star("ns", "", DeclareOptions::deny()).unwrap();

    // `fresh` is not yet interned, so it resolves to the sentinel.
    assert_eq!(service.authorize_user("u", "ns.fresh.cmd").await.unwrap(), Decision::Deny);

    service
        .grant(SubjectType::User, "u", Effect::Allow, "ns.fresh.*")
        .await
        .unwrap();
    assert_eq!(service.authorize_user("u", "ns.fresh.cmd").await.unwrap(), Decision::Allow);
}

#[tokio::test]
async fn test_introspection() {
    let service = memory_service().await;
    service
        .declare_exact("shop", "buy", DeclareOptions::deny().description("Buy items"))
        .unwrap();
    service.declare_star("shop", "admin", DeclareOptions::deny()).unwrap();
    service.declare_exact("chat", "say", DeclareOptions::allow()).unwrap();
    service.remove_namespace("chat");

    let namespaces = service.list_namespaces();
    assert_eq!(namespaces.len(), 2);
    let shop = namespaces.iter().find(|n| n.key == "shop").unwrap();
    assert!(shop.active);
    assert_eq!(shop.permission_count, 2);
    assert!(!namespaces.iter().find(|n| n.key == "chat").unwrap().active);

    let perms = service.list_permissions("shop");
    let nodes: Vec<String> = perms.iter().map(|p| p.node()).collect();
    assert_eq!(nodes, vec!["shop.buy", "shop.admin.*"]);
    assert_eq!(perms[0].description.as_deref(), Some("Buy items"));
    assert!(service.list_permissions("chat").is_empty());
}

#[tokio::test]
async fn test_fast_path_rejects_ref_with_outdated_vocabulary() {
    let service = memory_service().await;
    service.declare_star("ns", "", DeclareOptions::deny()).unwrap();
    service.authorize_user("u", "ns.fresh.cmd").await.unwrap();
    let user = service.auth_user("u").await.unwrap();
    let node = service.resolve("ns.fresh.cmd").unwrap();
    assert_eq!(service.authorize_user_fast(&user, &node), Some(Decision::Deny));

    // Compiling another user's grant interns `fresh`.
    service
        .grant(SubjectType::User, "w", Effect::Allow, "ns.fresh.*")
        .await
        .unwrap();
    assert!(service.can_user("w", "ns.fresh.cmd").await.unwrap());
    assert_eq!(service.authorize_user_fast(&user, &node), None);

    let node = service.resolve("ns.fresh.cmd").unwrap();
    assert_eq!(service.authorize_user_fast(&user, &node), Some(Decision::Deny));
}
