use domain::{ClosureEdge, ManagerEntry, OrgNode, TenantContext};
use hms_storage::{
    ClosureStore, InMemoryClosureStore, InMemoryManagerStore, InMemoryOrgNodeStore,
    InMemorySubjectStore, ManagerStore, OrgNodeStore, SubjectStore,
};

#[tokio::test]
async fn closure_delta_and_replace() {
    let store = InMemoryClosureStore::new();
    let ctx = TenantContext::system("tenant-1");
    let added = vec![
        ClosureEdge::new("tenant-1", "A", "A", 0),
        ClosureEdge::new("tenant-1", "B", "B", 0),
        ClosureEdge::new("tenant-1", "A", "B", 1),
    ];
    store.apply_delta(&ctx, &[], &added).await.expect("add");
    assert_eq!(store.load_edges(&ctx).await.expect("load").len(), 3);

    store
        .apply_delta(&ctx, &[ClosureEdge::new("tenant-1", "A", "B", 1)], &[])
        .await
        .expect("remove");
    assert_eq!(store.load_edges(&ctx).await.expect("load").len(), 2);

    store
        .replace_tenant(&ctx, &[ClosureEdge::new("tenant-1", "A", "A", 0)])
        .await
        .expect("replace");
    assert_eq!(store.load_edges(&ctx).await.expect("load").len(), 1);
}

#[tokio::test]
async fn failed_write_leaves_edges_untouched() {
    let store = InMemoryClosureStore::new();
    let ctx = TenantContext::system("tenant-1");
    store
        .apply_delta(&ctx, &[], &[ClosureEdge::new("tenant-1", "A", "A", 0)])
        .await
        .expect("add");
    store.set_fail_writes(true);
    let result = store
        .apply_delta(&ctx, &[], &[ClosureEdge::new("tenant-1", "B", "B", 0)])
        .await;
    assert!(result.is_err());
    assert_eq!(store.load_edges(&ctx).await.expect("load").len(), 1);
}

#[tokio::test]
async fn cross_tenant_edges_are_rejected() {
    let store = InMemoryClosureStore::new();
    let ctx = TenantContext::system("tenant-1");
    let result = store
        .apply_delta(&ctx, &[], &[ClosureEdge::new("tenant-2", "A", "A", 0)])
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn adjacency_managers_and_subjects() {
    let ctx = TenantContext::system("tenant-1");
    let nodes = InMemoryOrgNodeStore::new();
    nodes
        .upsert_node(OrgNode {
            org_id: "A".to_string(),
            parent_id: None,
            tenant_id: "tenant-1".to_string(),
            status: "active".to_string(),
            sort_order: 0,
        })
        .expect("node");
    assert_eq!(nodes.list_nodes(&ctx).await.expect("list").len(), 1);
    assert!(nodes.list_nodes(&TenantContext::system("tenant-2")).await.expect("list").is_empty());

    let managers = InMemoryManagerStore::new();
    let entry = ManagerEntry {
        org_id: "A".to_string(),
        tenant_id: "tenant-1".to_string(),
        user_id: "u-1".to_string(),
        role_type: "manager".to_string(),
    };
    managers.assign(entry.clone()).expect("assign");
    managers.assign(entry).expect("assign twice");
    assert_eq!(managers.list_managers(&ctx, "A", "manager").await.expect("list").len(), 1);
    assert!(managers.list_managers(&ctx, "A", "nurse").await.expect("list").is_empty());

    let subjects = InMemorySubjectStore::new();
    subjects.bind("tenant-1", "s-1", "A").expect("bind");
    assert_eq!(
        subjects.find_subject_org(&ctx, "s-1").await.expect("find").as_deref(),
        Some("A")
    );
    assert!(subjects.find_subject_org(&ctx, "s-2").await.expect("find").is_none());
}
