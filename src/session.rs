//! Session records as persisted in the store, plus the clock they are measured by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// The one identity the backup record can be promoted to an admin session for.
pub const ADMIN_USERNAME: &str = "festomanolo";
pub const ADMIN_DISPLAY_NAME: &str = "System Administrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Primary session record, stored under `userSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub login_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
}

/// Reduced backup record, stored under `eliva_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSession {
    pub username: String,
    #[serde(default)]
    pub logged_in: bool,
    pub login_time: DateTime<Utc>,
}

impl Session {
    pub fn new(username: &str, role: Role, display_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            username: username.to_string(),
            role,
            display_name: display_name.to_string(),
            login_time: now,
            last_activity: now,
        }
    }

    /// Rebuild a primary record from a backup one. Returns `None` unless the
    /// backup names a user and is marked logged in.
    pub fn promote(backup: &BackupSession, now: DateTime<Utc>) -> Option<Self> {
        if !backup.logged_in || backup.username.is_empty() {
            return None;
        }
        let role = role_for(&backup.username);
        let display_name = match role {
            Role::Admin => ADMIN_DISPLAY_NAME.to_string(),
            Role::User => backup.username.clone(),
        };
        Some(Self {
            username: backup.username.clone(),
            role,
            display_name,
            login_time: backup.login_time,
            last_activity: now,
        })
    }

    pub fn is_present(&self) -> bool {
        !self.username.is_empty()
    }

    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).to_std().unwrap_or(Duration::ZERO)
    }

    /// A session is valid iff it names a user and has been idle no longer than `timeout`.
    pub fn is_valid(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_present() && self.idle(now) <= timeout
    }

    pub fn backup(&self) -> BackupSession {
        BackupSession {
            username: self.username.clone(),
            logged_in: true,
            login_time: self.login_time,
        }
    }
}

/// Role inference used when promoting a backup record.
pub fn role_for(username: &str) -> Role {
    if username == ADMIN_USERNAME {
        Role::Admin
    } else {
        Role::User
    }
}

/// Wall clock anchored to tokio's monotonic clock, so paused test time moves it too.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.wall_origin + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn primary_record_uses_camel_case_keys() {
        let session = Session::new("clerk", Role::User, "Front Desk", at(1_700_000_000_000));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["displayName"], "Front Desk");
        assert_eq!(json["role"], "user");
        assert_eq!(json["lastActivity"], 1_700_000_000_000i64);
        assert!(json.get("loginTime").is_some());
    }

    #[test]
    fn promotes_admin_backup() {
        let backup: BackupSession = serde_json::from_str(
            r#"{"username":"festomanolo","loggedIn":true,"loginTime":"2024-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        let session = Session::promote(&backup, at(1_704_165_000_000)).unwrap();
        assert_eq!(session.role, Role::Admin);
        assert_eq!(session.display_name, ADMIN_DISPLAY_NAME);
        assert_eq!(session.login_time, backup.login_time);
        assert_eq!(session.last_activity, at(1_704_165_000_000));
    }

    #[test]
    fn other_users_promote_as_plain_users() {
        let backup = BackupSession {
            username: "clerk".into(),
            logged_in: true,
            login_time: at(0),
        };
        let session = Session::promote(&backup, at(10)).unwrap();
        assert_eq!(session.role, Role::User);
        assert_eq!(session.display_name, "clerk");
    }

    #[test]
    fn logged_out_backup_is_not_promoted() {
        let backup = BackupSession {
            username: ADMIN_USERNAME.into(),
            logged_in: false,
            login_time: at(0),
        };
        assert!(Session::promote(&backup, at(10)).is_none());
    }

    #[test]
    fn validity_boundary_is_inclusive() {
        let timeout = Duration::from_secs(60);
        let mut session = Session::new("clerk", Role::User, "Clerk", at(0));
        assert!(session.is_valid(at(60_000), timeout));
        assert!(!session.is_valid(at(60_001), timeout));

        session.username.clear();
        assert!(!session.is_valid(at(0), timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn clock_follows_paused_time() {
        let clock = Clock::starting_at(at(1_000));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now(), at(1_250));
    }
}
