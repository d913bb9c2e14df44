//! Role assignment model - user→role grants with provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role assignment entity.
///
/// An assignment is effective iff it is active and not expired. Inserting a
/// new assignment never deactivates existing ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RoleAssignment {
    pub assignment_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub assigned_utc: DateTime<Utc>,
    pub expires_utc: Option<DateTime<Utc>>,
    pub active: bool,
    pub deactivated_utc: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn new(user_id: Uuid, role_id: Uuid, assigned_by: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            assignment_id: Uuid::new_v4(),
            user_id,
            role_id,
            assigned_by,
            assigned_utc: now,
            expires_utc: None,
            active: true,
            deactivated_utc: None,
        }
    }

    pub fn expiring_at(mut self, expires_utc: DateTime<Utc>) -> Self {
        self.expires_utc = Some(expires_utc);
        self
    }

    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_utc.is_none_or(|expires| expires > now)
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.active {
            self.active = false;
            self.deactivated_utc = Some(now);
        }
    }
}

/// Replace a user's whole role set: every active assignment is deactivated
/// and one fresh assignment per role id is inserted, as a single store
/// operation.
#[derive(Debug, Clone)]
pub struct RoleSetReplacement {
    pub user_id: Uuid,
    pub role_ids: Vec<Uuid>,
    pub assigned_by: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl RoleSetReplacement {
    pub fn assignments(&self) -> Vec<RoleAssignment> {
        self.role_ids
            .iter()
            .map(|role_id| RoleAssignment::new(self.user_id, *role_id, self.assigned_by, self.at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_effective_requires_active_and_unexpired() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let role = Uuid::new_v4();

        let assignment = RoleAssignment::new(user, role, None, now);
        assert!(assignment.is_effective(now));

        let expired = assignment.clone().expiring_at(now - Duration::seconds(1));
        assert!(!expired.is_effective(now));

        let future = assignment.clone().expiring_at(now + Duration::hours(1));
        assert!(future.is_effective(now));

        let mut inactive = assignment;
        inactive.deactivate(now);
        assert!(!inactive.is_effective(now));
        assert_eq!(inactive.deactivated_utc, Some(now));
    }
}
