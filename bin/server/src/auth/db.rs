//! Postgres-backed credential and session stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_core::UserId;
use portcullis_identity::{
    CredentialStore, ExternalIdentityLink, Provider, Role, RoleSet, Session, SessionId,
    SessionStore, StoreError, User,
};
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable {
        details: e.to_string(),
    }
}

fn corrupt(details: String) -> StoreError {
    StoreError::Corrupt { details }
}

fn parse_user_id(raw: &str) -> Result<UserId, StoreError> {
    UserId::from_str(raw).map_err(|e| corrupt(format!("invalid user id '{raw}': {e}")))
}

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
    display_name: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct LinkRow {
    provider: String,
    external_id: String,
    linked_at: DateTime<Utc>,
}

impl LinkRow {
    fn try_into_link(self, user_id: UserId) -> Result<ExternalIdentityLink, StoreError> {
        let provider = Provider::from_str(&self.provider)
            .map_err(|e| corrupt(format!("invalid provider in external_logins: {e}")))?;
        Ok(ExternalIdentityLink {
            provider,
            external_id: self.external_id,
            user_id,
            linked_at: self.linked_at,
        })
    }
}

fn parse_roles(raw: Vec<String>) -> Result<RoleSet, StoreError> {
    raw.iter()
        .map(|r| Role::from_str(r).map_err(|e| corrupt(format!("invalid role in user_roles: {e}"))))
        .collect()
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    roles: serde_json::Value,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<Session, StoreError> {
        let roles: RoleSet = serde_json::from_value(self.roles)
            .map_err(|e| corrupt(format!("invalid roles for session '{}': {e}", self.id)))?;
        let user_id = parse_user_id(&self.user_id)?;
        Ok(Session::from_parts(
            SessionId::new(self.id),
            user_id,
            roles,
            self.issued_at,
            self.expires_at,
        ))
    }
}

/// Users, roles, and external logins in Postgres.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads roles and links for a user row.
    async fn hydrate(&self, row: UserRow) -> Result<User, StoreError> {
        let id = parse_user_id(&row.id)?;

        let roles: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT role FROM user_roles WHERE user_id = $1
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let links: Vec<LinkRow> = sqlx::query_as(
            r#"
            SELECT provider, external_id, linked_at
            FROM external_logins
            WHERE user_id = $1
            ORDER BY linked_at
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(User::with_all_fields(
            id,
            parse_roles(roles)?,
            links
                .into_iter()
                .map(|l| l.try_into_link(id))
                .collect::<Result<_, _>>()?,
            row.email,
            row.display_name,
            row.active,
            row.created_at,
            row.updated_at,
        ))
    }

    /// Locks the user row for the rest of the transaction, so concurrent
    /// role changes to one user apply one after another.
    async fn lock_user(conn: &mut PgConnection, id: UserId) -> Result<(), StoreError> {
        let found: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM users WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(unavailable)?;

        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::UserNotFound { user_id: id }),
        }
    }

    async fn touch(conn: &mut PgConnection, id: UserId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users SET updated_at = $2 WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(conn)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    /// Runs one membership statement under the user's row lock.
    async fn change_role(
        &self,
        id: UserId,
        role: Role,
        statement: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        Self::lock_user(&mut tx, id).await?;

        let changed = sqlx::query(statement)
            .bind(id.to_string())
            .bind(role.as_str().to_ascii_lowercase())
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?
            .rows_affected()
            > 0;

        if changed {
            Self::touch(&mut tx, id).await?;
        }
        tx.commit().await.map_err(unavailable)?;
        Ok(changed)
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_external_identity(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT u.id, u.email, u.display_name, u.active, u.created_at, u.updated_at
            FROM users u
            JOIN external_logins l ON l.user_id = u.id
            WHERE l.provider = $1 AND l.external_id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, display_name, active, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn create_with_link(
        &self,
        user: &User,
        link: &ExternalIdentityLink,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id().to_string())
        .bind(user.email())
        .bind(user.display_name())
        .bind(user.is_active())
        .bind(user.created_at())
        .bind(user.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        for role in user.roles().iter() {
            sqlx::query(
                r#"
                INSERT INTO user_roles (user_id, role) VALUES ($1, $2)
                "#,
            )
            .bind(user.id().to_string())
            .bind(role.as_str().to_ascii_lowercase())
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        // A conflicting row means another login for the same account won;
        // dropping the transaction discards the user inserted above.
        let linked = sqlx::query(
            r#"
            INSERT INTO external_logins (provider, external_id, user_id, linked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, external_id) DO NOTHING
            "#,
        )
        .bind(link.provider.as_str())
        .bind(&link.external_id)
        .bind(link.user_id.to_string())
        .bind(link.linked_at)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        if linked.rows_affected() == 0 {
            return Err(StoreError::DuplicateIdentity {
                provider: link.provider,
                external_id: link.external_id.clone(),
            });
        }

        tx.commit().await.map_err(unavailable)
    }

    async fn add_role(&self, id: UserId, role: Role) -> Result<bool, StoreError> {
        self.change_role(
            id,
            role,
            r#"
            INSERT INTO user_roles (user_id, role) VALUES ($1, $2)
            ON CONFLICT (user_id, role) DO NOTHING
            "#,
        )
        .await
    }

    async fn remove_role(&self, id: UserId, role: Role) -> Result<bool, StoreError> {
        self.change_role(
            id,
            role,
            r#"
            DELETE FROM user_roles WHERE user_id = $1 AND role = $2
            "#,
        )
        .await
    }

    async fn set_active(&self, id: UserId, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET active = $2, updated_at = $3 WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound { user_id: id });
        }
        Ok(())
    }
}

/// Sessions in Postgres.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let roles_json = serde_json::to_value(session.roles())
            .map_err(|e| corrupt(format!("failed to serialize roles: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, roles, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id().to_string())
        .bind(roles_json)
        .bind(session.issued_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, roles, issued_at, expires_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(SessionRow::try_into_session).transpose()
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM sessions WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions WHERE user_id = $1
            "#,
        )
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions WHERE expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected())
    }
}
