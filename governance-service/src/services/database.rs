//! PostgreSQL store for governance-service.
//!
//! Composite mutations run inside one sqlx transaction together with their
//! audit rows; review resolutions lock the review row with `FOR UPDATE` so
//! only one resolver can move it out of `pending`. Mutations that may take
//! SUPER_ADMIN from a holder first take a transaction-scoped advisory lock
//! and re-count the holders under it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::error::GovernanceError;
use super::store::{GovernanceStore, QuorumGuard, StoreResult};
use crate::models::{
    AuditAction, AuditFilter, AuditLogEntry, ChangeRequest, PendingApproval, Resolution,
    ReviewStatus, Role, RoleAssignment, RoleSetReplacement, Session, User, UserFilter,
    SUPER_ADMIN,
};

/// `pg_advisory_xact_lock` key shared by every quorum-guarded mutation.
const QUORUM_LOCK_KEY: i64 = 0x7375_7065_725f_6164;

const USER_COLUMNS: &str = "user_id, email, username, display_name, active, suspended, external, \
     failed_attempts, locked_until, last_login_utc, created_utc, updated_utc, deleted_utc";

/// PostgreSQL connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(database_url), fields(service = "governance-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, GovernanceError> {
        info!(max_connections, min_connections, "Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| GovernanceError::store(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), GovernanceError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GovernanceError::store(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

async fn insert_audit(conn: &mut PgConnection, entries: &[AuditLogEntry]) -> StoreResult<()> {
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO audit_log (entry_id, actor_id, target_id, action, entity_type, entity_id,
                before_state, after_state, summary, ip_address, user_agent, session_id,
                risk_score, anomalous, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.actor_id)
        .bind(entry.target_id)
        .bind(entry.action)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.before_state)
        .bind(&entry.after_state)
        .bind(&entry.summary)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.session_id)
        .bind(entry.risk_score)
        .bind(entry.anomalous)
        .bind(entry.created_utc)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_assignments(
    conn: &mut PgConnection,
    assignments: &[RoleAssignment],
) -> StoreResult<()> {
    for a in assignments {
        sqlx::query(
            r#"
            INSERT INTO role_assignments (assignment_id, user_id, role_id, assigned_by, assigned_utc,
                expires_utc, active, deactivated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(a.assignment_id)
        .bind(a.user_id)
        .bind(a.role_id)
        .bind(a.assigned_by)
        .bind(a.assigned_utc)
        .bind(a.expires_utc)
        .bind(a.active)
        .bind(a.deactivated_utc)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_user(
    conn: &mut PgConnection,
    user: &User,
    credential_hash: Option<&str>,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO users (user_id, email, username, display_name, credential_hash, active,
            suspended, external, failed_attempts, locked_until, last_login_utc, created_utc,
            updated_utc, deleted_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(user.user_id)
    .bind(&user.email)
    .bind(&user.username)
    .bind(&user.display_name)
    .bind(credential_hash)
    .bind(user.active)
    .bind(user.suspended)
    .bind(user.external)
    .bind(user.failed_attempts)
    .bind(user.locked_until)
    .bind(user.last_login_utc)
    .bind(user.created_utc)
    .bind(user.updated_utc)
    .bind(user.deleted_utc)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Serialise against other guarded mutations, then refuse to take
/// SUPER_ADMIN from `user_id` while the quorum is short. `keeps` receives the
/// SUPER_ADMIN role id and says whether the user still holds it afterwards.
async fn ensure_quorum(
    conn: &mut PgConnection,
    quorum: Option<QuorumGuard>,
    user_id: Uuid,
    keeps: impl FnOnce(Uuid) -> bool,
) -> StoreResult<()> {
    let Some(guard) = quorum else {
        return Ok(());
    };
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(QUORUM_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    let role: Option<(Uuid,)> =
        sqlx::query_as("SELECT role_id FROM roles WHERE name = $1 AND active")
            .bind(SUPER_ADMIN)
            .fetch_optional(&mut *conn)
            .await?;
    let Some((role_id,)) = role else {
        return Ok(());
    };

    let holders: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT u.user_id
        FROM users u
        JOIN role_assignments ra ON ra.user_id = u.user_id
        WHERE ra.role_id = $1
          AND ra.active AND (ra.expires_utc IS NULL OR ra.expires_utc > $2)
          AND u.active AND NOT u.suspended AND u.deleted_utc IS NULL
        "#,
    )
    .bind(role_id)
    .bind(guard.at)
    .fetch_all(&mut *conn)
    .await?;

    if !holders.iter().any(|(id,)| *id == user_id) || keeps(role_id) {
        return Ok(());
    }
    guard.check(holders.len() as i64)
}

/// Lock the target user row, deactivate its active assignments and insert
/// the replacement set. Concurrent replacements on one user serialise on the
/// row lock; the last committer wins.
async fn replace_assignments(
    conn: &mut PgConnection,
    replacement: &RoleSetReplacement,
) -> StoreResult<Vec<RoleAssignment>> {
    let locked: Option<(Uuid,)> =
        sqlx::query_as("SELECT user_id FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(replacement.user_id)
            .fetch_optional(&mut *conn)
            .await?;
    if locked.is_none() {
        return Err(GovernanceError::not_found("User"));
    }

    sqlx::query(
        "UPDATE role_assignments SET active = FALSE, deactivated_utc = $2 \
         WHERE user_id = $1 AND active",
    )
    .bind(replacement.user_id)
    .bind(replacement.at)
    .execute(&mut *conn)
    .await?;

    let fresh = replacement.assignments();
    insert_assignments(conn, &fresh).await?;
    Ok(fresh)
}

fn search_pattern(filter: &UserFilter) -> Option<String> {
    filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")))
}

#[async_trait]
impl GovernanceStore for Database {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            GovernanceError::from(e)
        })?;
        Ok(())
    }

    // ==================== Users ====================

    #[instrument(skip(self, user, credential_hash, assignments, audit), fields(user_id = %user.user_id))]
    async fn create_user(
        &self,
        user: &User,
        credential_hash: Option<&str>,
        assignments: &[RoleAssignment],
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_user(&mut tx, user, credential_hash).await?;
        insert_assignments(&mut tx, assignments).await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE user_id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_credential(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT credential_hash FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(hash,)| hash))
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<User>, i64)> {
        let predicate = "($1::text IS NULL OR email ILIKE $1 OR username ILIKE $1 OR display_name ILIKE $1) \
             AND ($2::bool IS NULL OR active = $2) \
             AND ($3 OR deleted_utc IS NULL)";
        let pattern = search_pattern(filter);

        let sql = format!(
            "SELECT {} FROM users WHERE {} ORDER BY created_utc, email LIMIT $4 OFFSET $5",
            USER_COLUMNS, predicate
        );
        let users = sqlx::query_as::<_, User>(&sql)
            .bind(&pattern)
            .bind(filter.active)
            .bind(filter.include_deleted)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM users WHERE {}", predicate))
                .bind(&pattern)
                .bind(filter.active)
                .bind(filter.include_deleted)
                .fetch_one(&self.pool)
                .await?;

        Ok((users, total))
    }

    #[instrument(skip(self, user, audit), fields(user_id = %user.user_id))]
    async fn update_user(
        &self,
        user: &User,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        ensure_quorum(&mut tx, quorum, user.user_id, |_| user.active && !user.suspended).await?;
        let result = sqlx::query(
            r#"
            UPDATE users SET email = $2, username = $3, display_name = $4, active = $5,
                suspended = $6, failed_attempts = $7, locked_until = $8, last_login_utc = $9,
                updated_utc = $10
            WHERE user_id = $1
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(user.active)
        .bind(user.suspended)
        .bind(user.failed_attempts)
        .bind(user.locked_until)
        .bind(user.last_login_utc)
        .bind(user.updated_utc)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GovernanceError::not_found("User"));
        }
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, audit))]
    async fn soft_delete_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        ensure_quorum(&mut tx, quorum, user_id, |_| false).await?;
        let result = sqlx::query(
            "UPDATE users SET active = FALSE, deleted_utc = $2, updated_utc = $2 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GovernanceError::not_found("User"));
        }

        sqlx::query(
            "UPDATE role_assignments SET active = FALSE, deactivated_utc = $2 \
             WHERE user_id = $1 AND active",
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE sessions SET active = FALSE WHERE user_id = $1 AND active")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, audit))]
    async fn purge_user(
        &self,
        user_id: Uuid,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        ensure_quorum(&mut tx, quorum, user_id, |_| false).await?;
        // Assignments, sessions and pending approvals cascade.
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GovernanceError::not_found("User"));
        }
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count_role_holders(&self, role_name: &str, at: DateTime<Utc>) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(DISTINCT u.user_id)
            FROM users u
            JOIN role_assignments ra ON ra.user_id = u.user_id
            JOIN roles r ON r.role_id = ra.role_id
            WHERE r.name = $1 AND r.active
              AND ra.active AND (ra.expires_utc IS NULL OR ra.expires_utc > $2)
              AND u.active AND NOT u.suspended AND u.deleted_utc IS NULL
            "#,
        )
        .bind(role_name)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ==================== Roles ====================

    async fn create_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, name, description, permissions, active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(role.role_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.permissions.to_strings())
        .bind(role.active)
        .bind(role.created_utc)
        .bind(role.updated_utc)
        .execute(&mut *tx)
        .await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_role_if_absent(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO roles (role_id, name, description, permissions, active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(role.role_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.permissions.to_strings())
        .bind(role.active)
        .bind(role.created_utc)
        .bind(role.updated_utc)
        .execute(&mut *tx)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            insert_audit(&mut tx, audit).await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn update_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE roles SET name = $2, description = $3, permissions = $4, active = $5, updated_utc = $6
            WHERE role_id = $1
            "#,
        )
        .bind(role.role_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.permissions.to_strings())
        .bind(role.active)
        .bind(role.updated_utc)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GovernanceError::not_found("Role"));
        }
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> StoreResult<Option<Role>> {
        Ok(
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
                .bind(role_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        Ok(sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?)
    }

    // ==================== Role assignments ====================

    async fn list_assignments(&self, user_id: Uuid) -> StoreResult<Vec<RoleAssignment>> {
        Ok(sqlx::query_as::<_, RoleAssignment>(
            "SELECT * FROM role_assignments WHERE user_id = $1 ORDER BY assigned_utc",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn effective_roles(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<Vec<Role>> {
        Ok(sqlx::query_as::<_, Role>(
            r#"
            SELECT DISTINCT r.*
            FROM roles r
            JOIN role_assignments ra ON ra.role_id = r.role_id
            WHERE ra.user_id = $1 AND ra.active
              AND (ra.expires_utc IS NULL OR ra.expires_utc > $2)
              AND r.active
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .bind(at)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, replacement, audit), fields(user_id = %replacement.user_id))]
    async fn replace_role_set(
        &self,
        replacement: &RoleSetReplacement,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<Vec<RoleAssignment>> {
        let mut tx = self.pool.begin().await?;
        ensure_quorum(&mut tx, quorum, replacement.user_id, |id| {
            replacement.role_ids.contains(&id)
        })
        .await?;
        let fresh = replace_assignments(&mut tx, replacement).await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(fresh)
    }

    // ==================== Change requests ====================

    async fn create_change_request(
        &self,
        request: &ChangeRequest,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO change_requests (request_id, requester_id, target_user_id, change_type,
                proposed_role_ids, previous_role_ids, justification, status, emergency, risk_score,
                anomalous, created_utc, expires_utc, resolved_by, resolution_reason, resolved_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(request.request_id)
        .bind(request.requester_id)
        .bind(request.target_user_id)
        .bind(request.change_type)
        .bind(&request.proposed_role_ids)
        .bind(&request.previous_role_ids)
        .bind(&request.justification)
        .bind(request.status)
        .bind(request.emergency)
        .bind(request.risk_score)
        .bind(request.anomalous)
        .bind(request.created_utc)
        .bind(request.expires_utc)
        .bind(request.resolved_by)
        .bind(&request.resolution_reason)
        .bind(request.resolved_utc)
        .execute(&mut *tx)
        .await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_change_request(&self, request_id: Uuid) -> StoreResult<Option<ChangeRequest>> {
        Ok(sqlx::query_as::<_, ChangeRequest>(
            "SELECT * FROM change_requests WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_change_requests(
        &self,
        status: Option<ReviewStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<ChangeRequest>, i64)> {
        let requests = sqlx::query_as::<_, ChangeRequest>(
            r#"
            SELECT * FROM change_requests
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_utc DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM change_requests WHERE ($1::varchar IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((requests, total))
    }

    async fn list_stale_change_requests(&self, at: DateTime<Utc>) -> StoreResult<Vec<ChangeRequest>> {
        Ok(sqlx::query_as::<_, ChangeRequest>(
            "SELECT * FROM change_requests WHERE status = 'pending' AND expires_utc <= $1",
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, resolution, replacement, audit), fields(request_id = %resolution.id, status = %resolution.status))]
    async fn resolve_change_request(
        &self,
        resolution: &Resolution,
        replacement: Option<&RoleSetReplacement>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<ChangeRequest> {
        let mut tx = self.pool.begin().await?;
        let mut request = sqlx::query_as::<_, ChangeRequest>(
            "SELECT * FROM change_requests WHERE request_id = $1 FOR UPDATE",
        )
        .bind(resolution.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| GovernanceError::not_found("Change request"))?;
        request.apply(resolution)?;

        if let Some(replacement) = replacement {
            ensure_quorum(&mut tx, quorum, replacement.user_id, |id| {
                replacement.role_ids.contains(&id)
            })
            .await?;
            replace_assignments(&mut tx, replacement).await?;
        }

        sqlx::query(
            r#"
            UPDATE change_requests SET status = $2, resolved_by = $3, resolution_reason = $4, resolved_utc = $5
            WHERE request_id = $1 AND status = 'pending'
            "#,
        )
        .bind(request.request_id)
        .bind(request.status)
        .bind(request.resolved_by)
        .bind(&request.resolution_reason)
        .bind(request.resolved_utc)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(request)
    }

    // ==================== Pending approvals ====================

    async fn create_pending_approval(
        &self,
        user: &User,
        approval: &PendingApproval,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_user(&mut tx, user, None).await?;
        sqlx::query(
            r#"
            INSERT INTO pending_approvals (pending_id, provider, email, user_id, claims, role_ids,
                status, created_utc, expires_utc, resolved_by, resolution_reason, resolved_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(approval.pending_id)
        .bind(&approval.provider)
        .bind(&approval.email)
        .bind(approval.user_id)
        .bind(&approval.claims)
        .bind(&approval.role_ids)
        .bind(approval.status)
        .bind(approval.created_utc)
        .bind(approval.expires_utc)
        .bind(approval.resolved_by)
        .bind(&approval.resolution_reason)
        .bind(approval.resolved_utc)
        .execute(&mut *tx)
        .await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_pending_approval(&self, pending_id: Uuid) -> StoreResult<Option<PendingApproval>> {
        Ok(sqlx::query_as::<_, PendingApproval>(
            "SELECT * FROM pending_approvals WHERE pending_id = $1",
        )
        .bind(pending_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_pending_approvals(
        &self,
        status: Option<ReviewStatus>,
    ) -> StoreResult<Vec<PendingApproval>> {
        Ok(sqlx::query_as::<_, PendingApproval>(
            r#"
            SELECT * FROM pending_approvals
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, resolution, audit), fields(pending_id = %resolution.id, status = %resolution.status))]
    async fn resolve_pending_approval(
        &self,
        resolution: &Resolution,
        audit: &[AuditLogEntry],
    ) -> StoreResult<PendingApproval> {
        let mut tx = self.pool.begin().await?;
        let mut approval = sqlx::query_as::<_, PendingApproval>(
            "SELECT * FROM pending_approvals WHERE pending_id = $1 FOR UPDATE",
        )
        .bind(resolution.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| GovernanceError::not_found("Pending approval"))?;
        approval.apply(resolution)?;

        if approval.status == ReviewStatus::Approved {
            sqlx::query("UPDATE users SET active = TRUE, updated_utc = $2 WHERE user_id = $1")
                .bind(approval.user_id)
                .bind(resolution.at)
                .execute(&mut *tx)
                .await?;
            let replacement = RoleSetReplacement {
                user_id: approval.user_id,
                role_ids: approval.role_ids.clone(),
                assigned_by: resolution.resolved_by,
                at: resolution.at,
            };
            replace_assignments(&mut tx, &replacement).await?;
        }

        sqlx::query(
            r#"
            UPDATE pending_approvals SET status = $2, resolved_by = $3, resolution_reason = $4, resolved_utc = $5
            WHERE pending_id = $1 AND status = 'pending'
            "#,
        )
        .bind(approval.pending_id)
        .bind(approval.status)
        .bind(approval.resolved_by)
        .bind(&approval.resolution_reason)
        .bind(approval.resolved_utc)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(approval)
    }

    // ==================== Audit trail ====================

    async fn list_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<AuditLogEntry>, i64)> {
        let predicate = "($1::uuid IS NULL OR actor_id = $1) \
             AND ($2::uuid IS NULL OR target_id = $2) \
             AND ($3::varchar IS NULL OR action = $3) \
             AND ($4::varchar IS NULL OR entity_type = $4) \
             AND ($5::uuid IS NULL OR entity_id = $5) \
             AND ($6::timestamptz IS NULL OR created_utc >= $6) \
             AND ($7::timestamptz IS NULL OR created_utc < $7) \
             AND (NOT $8 OR anomalous)";

        let entries = sqlx::query_as::<_, AuditLogEntry>(&format!(
            "SELECT * FROM audit_log WHERE {} ORDER BY created_utc DESC LIMIT $9 OFFSET $10",
            predicate
        ))
        .bind(filter.actor_id)
        .bind(filter.target_id)
        .bind(filter.action)
        .bind(filter.entity_type)
        .bind(filter.entity_id)
        .bind(filter.from_utc)
        .bind(filter.to_utc)
        .bind(filter.anomalous_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM audit_log WHERE {}", predicate))
                .bind(filter.actor_id)
                .bind(filter.target_id)
                .bind(filter.action)
                .bind(filter.entity_type)
                .bind(filter.entity_id)
                .bind(filter.from_utc)
                .bind(filter.to_utc)
                .bind(filter.anomalous_only)
                .fetch_one(&self.pool)
                .await?;

        Ok((entries, total))
    }

    async fn count_privileged_actions(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let actions: Vec<String> = AuditAction::privileged()
            .iter()
            .map(|a| a.as_str().to_string())
            .collect();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM audit_log WHERE actor_id = $1 AND created_utc >= $2 AND action = ANY($3)",
        )
        .bind(actor_id)
        .bind(since)
        .bind(&actions)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ==================== Sessions ====================

    async fn create_session(&self, session: &Session, audit: &[AuditLogEntry]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, token_hash, ip_address, user_agent, active,
                created_utc, expires_utc, last_activity_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.active)
        .bind(session.created_utc)
        .bind(session.expires_utc)
        .bind(session.last_activity_utc)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET last_login_utc = $2 WHERE user_id = $1")
            .bind(session.user_id)
            .bind(session.created_utc)
            .execute(&mut *tx)
            .await?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<Session>> {
        Ok(
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_session_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        Ok(
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_sessions(&self, user_id: Uuid) -> StoreResult<Vec<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 ORDER BY created_utc DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn deactivate_session(
        &self,
        session_id: Uuid,
        audit: &[AuditLogEntry],
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("UPDATE sessions SET active = FALSE WHERE session_id = $1 AND active")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn touch_session(&self, session_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET last_activity_utc = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
