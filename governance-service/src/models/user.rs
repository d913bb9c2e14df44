//! User model - administrative and dashboard accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User entity.
///
/// The credential hash lives in its own column and is only read by the
/// authentication path; it is deliberately not part of this struct.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub active: bool,
    pub suspended: bool,
    pub external: bool,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(
        email: &str,
        username: &str,
        display_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: normalize_email(email),
            username: username.trim().to_string(),
            display_name,
            active: true,
            suspended: false,
            external: false,
            failed_attempts: 0,
            locked_until: None,
            last_login_utc: None,
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Whether the account may hold a session.
    pub fn can_authenticate(&self) -> bool {
        self.active && !self.suspended && !self.is_deleted()
    }

    /// Domain part of the email, lowercased.
    pub fn email_domain(&self) -> Option<&str> {
        email_domain(&self.email)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn email_domain(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain).filter(|d| !d.is_empty())
}

/// Partial update applied by `UpdateUser`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub active: Option<bool>,
    pub suspended: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.username.is_none()
            && self.display_name.is_none()
            && self.active.is_none()
            && self.suspended.is_none()
    }

    /// Whether applying this patch takes an account out of service.
    pub fn disables(&self) -> bool {
        self.active == Some(false) || self.suspended == Some(true)
    }

    pub fn apply(&self, user: &mut User, now: DateTime<Utc>) {
        if let Some(email) = &self.email {
            user.email = normalize_email(email);
        }
        if let Some(username) = &self.username {
            user.username = username.trim().to_string();
        }
        if let Some(display_name) = &self.display_name {
            user.display_name = Some(display_name.clone());
        }
        if let Some(active) = self.active {
            user.active = active;
        }
        if let Some(suspended) = self.suspended {
            user.suspended = suspended;
        }
        user.updated_utc = now;
    }
}

/// Filter for `ListUsers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    /// Case-insensitive substring of email, username or display name.
    pub search: Option<String>,
    pub active: Option<bool>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        if !self.include_deleted && user.is_deleted() {
            return false;
        }
        if self.active.is_some_and(|active| user.active != active) {
            return false;
        }
        match &self.search {
            Some(term) => {
                let term = term.to_lowercase();
                user.email.contains(&term)
                    || user.username.to_lowercase().contains(&term)
                    || user
                        .display_name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&term))
            }
            None => true,
        }
    }
}

/// User response for API (no credential material).
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub active: bool,
    pub suspended: bool,
    pub external: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email,
            username: u.username,
            display_name: u.display_name,
            active: u.active,
            suspended: u.suspended,
            external: u.external,
            locked_until: u.locked_until,
            last_login_utc: u.last_login_utc,
            created_utc: u.created_utc,
            updated_utc: u.updated_utc,
            deleted_utc: u.deleted_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_user_normalizes_email() {
        let user = User::new("  Ada@Example.COM ", "ada", None, Utc::now());
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.email_domain(), Some("example.com"));
    }

    #[test]
    fn test_lockout_window() {
        let now = Utc::now();
        let mut user = User::new("a@b.io", "a", None, now);
        assert!(!user.is_locked(now));

        user.locked_until = Some(now + Duration::minutes(5));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + Duration::minutes(6)));
    }

    #[test]
    fn test_patch_disables() {
        let patch = UserPatch {
            suspended: Some(true),
            ..Default::default()
        };
        assert!(patch.disables());

        let patch = UserPatch {
            display_name: Some("New".to_string()),
            ..Default::default()
        };
        assert!(!patch.disables());
    }

    #[test]
    fn test_filter_search_and_deleted() {
        let now = Utc::now();
        let mut user = User::new("grace@navy.mil", "ghopper", Some("Grace".into()), now);
        let filter = UserFilter {
            search: Some("GRACE".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&user));

        user.deleted_utc = Some(now);
        assert!(!filter.matches(&user));
    }
}
