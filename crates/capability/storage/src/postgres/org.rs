//! Postgres 组织结构实现（邻接表、闭包表、负责人、被监护人）

use crate::error::StorageError;
use crate::traits::{ClosureStore, ManagerStore, OrgNodeStore, SubjectStore};
use crate::validation::{ensure_same_tenant, ensure_tenant};
use domain::{ClosureEdge, ManagerEntry, OrgNode, TenantContext};
use sqlx::{PgPool, Row};

pub struct PgOrgNodeStore {
    pub pool: PgPool,
}

impl PgOrgNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrgNodeStore for PgOrgNodeStore {
    async fn list_nodes(&self, ctx: &TenantContext) -> Result<Vec<OrgNode>, StorageError> {
        ensure_tenant(ctx)?;
        let rows = sqlx::query(
            "select org_id, tenant_id, parent_id, status, sort_order \
             from org_nodes where tenant_id = $1 \
             order by sort_order, org_id",
        )
        .bind(&ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(OrgNode {
                org_id: row.try_get("org_id")?,
                tenant_id: row.try_get("tenant_id")?,
                parent_id: row.try_get("parent_id")?,
                status: row.try_get("status")?,
                sort_order: row.try_get("sort_order")?,
            });
        }
        Ok(items)
    }
}

pub struct PgClosureStore {
    pub pool: PgPool,
}

impl PgClosureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_edge(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    edge: &ClosureEdge,
) -> Result<(), StorageError> {
    sqlx::query(
        "insert into org_closure (tenant_id, ancestor_id, descendant_id, depth) \
         values ($1, $2, $3, $4) \
         on conflict (tenant_id, ancestor_id, descendant_id) do update set depth = excluded.depth",
    )
    .bind(&edge.tenant_id)
    .bind(&edge.ancestor_id)
    .bind(&edge.descendant_id)
    .bind(edge.depth as i32)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl ClosureStore for PgClosureStore {
    async fn load_edges(&self, ctx: &TenantContext) -> Result<Vec<ClosureEdge>, StorageError> {
        ensure_tenant(ctx)?;
        let rows = sqlx::query(
            "select tenant_id, ancestor_id, descendant_id, depth \
             from org_closure where tenant_id = $1",
        )
        .bind(&ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let depth: i32 = row.try_get("depth")?;
            items.push(ClosureEdge {
                ancestor_id: row.try_get("ancestor_id")?,
                descendant_id: row.try_get("descendant_id")?,
                depth: depth.max(0) as u32,
                tenant_id: row.try_get("tenant_id")?,
            });
        }
        Ok(items)
    }

    async fn apply_delta(
        &self,
        ctx: &TenantContext,
        removed: &[ClosureEdge],
        added: &[ClosureEdge],
    ) -> Result<(), StorageError> {
        ensure_tenant(ctx)?;
        for edge in removed.iter().chain(added.iter()) {
            ensure_same_tenant(ctx, &edge.tenant_id)?;
        }
        let mut tx = self.pool.begin().await?;
        for edge in removed {
            sqlx::query(
                "delete from org_closure \
                 where tenant_id = $1 and ancestor_id = $2 and descendant_id = $3",
            )
            .bind(&ctx.tenant_id)
            .bind(&edge.ancestor_id)
            .bind(&edge.descendant_id)
            .execute(&mut *tx)
            .await?;
        }
        for edge in added {
            insert_edge(&mut tx, edge).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_tenant(
        &self,
        ctx: &TenantContext,
        edges: &[ClosureEdge],
    ) -> Result<(), StorageError> {
        ensure_tenant(ctx)?;
        for edge in edges {
            ensure_same_tenant(ctx, &edge.tenant_id)?;
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("delete from org_closure where tenant_id = $1")
            .bind(&ctx.tenant_id)
            .execute(&mut *tx)
            .await?;
        for edge in edges {
            insert_edge(&mut tx, edge).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

pub struct PgManagerStore {
    pub pool: PgPool,
}

impl PgManagerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ManagerStore for PgManagerStore {
    async fn list_managers(
        &self,
        ctx: &TenantContext,
        org_id: &str,
        role_type: &str,
    ) -> Result<Vec<ManagerEntry>, StorageError> {
        ensure_tenant(ctx)?;
        let rows = sqlx::query(
            "select org_id, tenant_id, user_id, role_type from org_managers \
             where tenant_id = $1 and org_id = $2 and role_type = $3 \
             order by assigned_at, user_id",
        )
        .bind(&ctx.tenant_id)
        .bind(org_id)
        .bind(role_type)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(ManagerEntry {
                org_id: row.try_get("org_id")?,
                tenant_id: row.try_get("tenant_id")?,
                user_id: row.try_get("user_id")?,
                role_type: row.try_get("role_type")?,
            });
        }
        Ok(items)
    }
}

pub struct PgSubjectStore {
    pub pool: PgPool,
}

impl PgSubjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SubjectStore for PgSubjectStore {
    async fn find_subject_org(
        &self,
        ctx: &TenantContext,
        subject_id: &str,
    ) -> Result<Option<String>, StorageError> {
        ensure_tenant(ctx)?;
        let row = sqlx::query(
            "select org_id from subjects where tenant_id = $1 and subject_id = $2",
        )
        .bind(&ctx.tenant_id)
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row.try_get("org_id")?))
    }
}
