//! User directory reconciliation.
//!
//! Presence arrives from three places: single-user `status_update` pushes,
//! `users_list` snapshots, and the polled user directory. All three are
//! applied as per-user upserts; nothing ever removes a row, so a user who
//! is merely missing from a stale snapshot keeps their last known status.

use std::collections::BTreeMap;

use chatsync_types::{User, UserPresence, UserStatus};

/// Result of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// A new row was created.
    Inserted,
    /// An existing row changed.
    Updated,
    /// Nothing changed.
    Unchanged,
}

/// Number of users per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Users with status `online`.
    pub online: usize,
    /// Users with status `away`.
    pub away: usize,
    /// Users with status `offline`.
    pub offline: usize,
}

/// The user directory: at most one row per username.
#[derive(Debug, Clone, Default)]
pub struct PresenceDirectory {
    users: BTreeMap<String, User>,
}

impl PresenceDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one user's status, creating the row if needed.
    pub fn upsert_status(&mut self, username: &str, status: UserStatus) -> PresenceChange {
        if username.is_empty() {
            return PresenceChange::Unchanged;
        }

        match self.users.get_mut(username) {
            Some(user) if user.status == status => PresenceChange::Unchanged,
            Some(user) => {
                user.status = status;
                PresenceChange::Updated
            }
            None => {
                self.users
                    .insert(username.to_string(), User::new(username, status));
                PresenceChange::Inserted
            }
        }
    }

    /// Apply an incremental `status_update`.
    pub fn apply_update(&mut self, presence: &UserPresence) -> PresenceChange {
        self.upsert_status(&presence.username, presence.status)
    }

    /// Apply a `users_list` snapshot as independent upserts.
    ///
    /// Returns how many rows were inserted or changed.
    pub fn apply_snapshot(&mut self, snapshot: &[UserPresence]) -> usize {
        snapshot
            .iter()
            .filter(|p| self.apply_update(p) != PresenceChange::Unchanged)
            .count()
    }

    /// Merge full rows from the polled directory.
    ///
    /// Status is taken from the row; id and email are filled in when the
    /// row carries them.
    pub fn merge_directory(&mut self, users: impl IntoIterator<Item = User>) -> usize {
        let mut changed = 0;
        for incoming in users {
            if incoming.username.is_empty() {
                continue;
            }
            match self.users.get_mut(&incoming.username) {
                Some(existing) => {
                    let before = existing.clone();
                    existing.status = incoming.status;
                    if !incoming.id.is_empty() {
                        existing.id = incoming.id;
                    }
                    if incoming.email.is_some() {
                        existing.email = incoming.email;
                    }
                    if *existing != before {
                        changed += 1;
                    }
                }
                None => {
                    self.users.insert(incoming.username.clone(), incoming);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Look up a user.
    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// All users in display order: `online` first, everyone else after,
    /// ascending username within each group.
    pub fn sorted(&self) -> Vec<User> {
        // BTreeMap iteration is already ascending by username.
        let online = self
            .users
            .values()
            .filter(|u| u.status == UserStatus::Online);
        let rest = self
            .users
            .values()
            .filter(|u| u.status != UserStatus::Online);
        online.chain(rest).cloned().collect()
    }

    /// Display-ordered users excluding `current`.
    pub fn others(&self, current: &str) -> Vec<User> {
        self.sorted()
            .into_iter()
            .filter(|u| u.username != current)
            .collect()
    }

    /// Users per status.
    pub fn counts(&self) -> StatusCounts {
        self.users
            .values()
            .fold(StatusCounts::default(), |mut counts, user| {
                match user.status {
                    UserStatus::Online => counts.online += 1,
                    UserStatus::Away => counts.away += 1,
                    UserStatus::Offline => counts.offline += 1,
                }
                counts
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(name: &str, status: UserStatus) -> UserPresence {
        UserPresence::new(name, status)
    }

    fn names(users: &[User]) -> Vec<&str> {
        users.iter().map(|u| u.username.as_str()).collect()
    }

    // ===========================================
    // Upsert Tests
    // ===========================================

    #[test]
    fn first_event_creates_row() {
        let mut dir = PresenceDirectory::new();
        let change = dir.apply_update(&presence("alice", UserStatus::Online));

        assert_eq!(change, PresenceChange::Inserted);
        assert_eq!(dir.len(), 1);
        assert!(dir.get("alice").unwrap().is_online());
        assert_eq!(dir.get("alice").unwrap().id, "");
    }

    #[test]
    fn repeated_events_never_duplicate_rows() {
        let mut dir = PresenceDirectory::new();
        let statuses = [
            UserStatus::Online,
            UserStatus::Away,
            UserStatus::Away,
            UserStatus::Offline,
            UserStatus::Online,
        ];
        for status in statuses {
            dir.apply_update(&presence("alice", status));
            dir.apply_snapshot(&[presence("alice", status), presence("bob", status)]);
            assert_eq!(dir.len(), 2);
            for user in dir.sorted() {
                assert_eq!(user.is_online(), user.status != UserStatus::Offline);
            }
        }
        assert_eq!(dir.get("alice").unwrap().status, UserStatus::Online);
    }

    #[test]
    fn unchanged_status_reports_unchanged() {
        let mut dir = PresenceDirectory::new();
        dir.upsert_status("bob", UserStatus::Away);
        assert_eq!(
            dir.upsert_status("bob", UserStatus::Away),
            PresenceChange::Unchanged
        );
        assert_eq!(
            dir.upsert_status("bob", UserStatus::Online),
            PresenceChange::Updated
        );
    }

    #[test]
    fn empty_username_is_ignored() {
        let mut dir = PresenceDirectory::new();
        assert_eq!(
            dir.upsert_status("", UserStatus::Online),
            PresenceChange::Unchanged
        );
        assert!(dir.is_empty());
    }

    // ===========================================
    // Snapshot Tests
    // ===========================================

    #[test]
    fn snapshot_does_not_remove_absent_users() {
        let mut dir = PresenceDirectory::new();
        dir.apply_snapshot(&[
            presence("alice", UserStatus::Online),
            presence("bob", UserStatus::Online),
        ]);

        // Stale snapshot missing bob
        let changed = dir.apply_snapshot(&[presence("alice", UserStatus::Away)]);

        assert_eq!(changed, 1);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.get("bob").unwrap().status, UserStatus::Online);
        assert_eq!(dir.get("alice").unwrap().status, UserStatus::Away);
    }

    #[test]
    fn directory_merge_fills_ids_and_keeps_rows() {
        let mut dir = PresenceDirectory::new();
        dir.upsert_status("alice", UserStatus::Online);
        dir.upsert_status("carol", UserStatus::Away);

        let changed = dir.merge_directory(vec![
            User::new("alice", UserStatus::Online)
                .with_id("u1")
                .with_email("alice@example.com"),
            User::new("bob", UserStatus::Offline).with_id("u2"),
        ]);

        assert_eq!(changed, 2);
        assert_eq!(dir.len(), 3);
        let alice = dir.get("alice").unwrap();
        assert_eq!(alice.id, "u1");
        assert_eq!(alice.email.as_deref(), Some("alice@example.com"));
        assert_eq!(dir.get("carol").unwrap().status, UserStatus::Away);
    }

    // ===========================================
    // Ordering Tests
    // ===========================================

    #[test]
    fn online_users_first_then_by_username() {
        let mut dir = PresenceDirectory::new();
        dir.apply_snapshot(&[
            presence("zed", UserStatus::Online),
            presence("carol", UserStatus::Offline),
            presence("bob", UserStatus::Away),
            presence("amy", UserStatus::Online),
            presence("dave", UserStatus::Offline),
        ]);

        assert_eq!(
            names(&dir.sorted()),
            vec!["amy", "zed", "bob", "carol", "dave"]
        );
    }

    #[test]
    fn others_excludes_current_user() {
        let mut dir = PresenceDirectory::new();
        dir.upsert_status("me", UserStatus::Online);
        dir.upsert_status("you", UserStatus::Offline);

        assert_eq!(names(&dir.others("me")), vec!["you"]);
    }

    #[test]
    fn counts_by_status() {
        let mut dir = PresenceDirectory::new();
        dir.upsert_status("a", UserStatus::Online);
        dir.upsert_status("b", UserStatus::Away);
        dir.upsert_status("c", UserStatus::Offline);
        dir.upsert_status("d", UserStatus::Offline);

        assert_eq!(
            dir.counts(),
            StatusCounts {
                online: 1,
                away: 1,
                offline: 2
            }
        );
    }
}
