use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

use crate::models::{CollaboratorPresence, CursorUpdate, PresenceSnapshot, TypingUpdate};
use crate::realtime::color::color_for;

/// Who is on the channel besides the local user.
///
/// Rebuilt wholesale from every presence sync, then patched in place by
/// cursor and typing broadcasts.
#[derive(Debug, Clone)]
pub struct PresenceRegistry {
    current_user_id: String,
    collaborators: Vec<CollaboratorPresence>,
}

impl PresenceRegistry {
    pub fn new(current_user_id: impl Into<String>) -> Self {
        Self {
            current_user_id: current_user_id.into(),
            collaborators: Vec::new(),
        }
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    pub fn collaborators(&self) -> &[CollaboratorPresence] {
        &self.collaborators
    }

    pub fn get(&self, user_id: &str) -> Option<&CollaboratorPresence> {
        self.collaborators.iter().find(|c| c.user_id == user_id)
    }

    /// Replace the list from a full presence snapshot
    pub fn sync(&mut self, snapshot: &PresenceSnapshot, now: DateTime<Utc>) {
        let mut seen = HashSet::new();
        let mut collaborators = Vec::with_capacity(snapshot.len());

        for state in snapshot.values().filter_map(|metas| metas.first()) {
            if state.user_id == self.current_user_id || !seen.insert(state.user_id.clone()) {
                continue;
            }
            collaborators.push(CollaboratorPresence {
                user_id: state.user_id.clone(),
                user_name: state.user_name.clone(),
                user_email: state.user_email.clone(),
                color: color_for(&state.user_id).to_string(),
                cursor_position: state.cursor_position,
                selection_start: state.selection_start,
                selection_end: state.selection_end,
                is_typing: false,
                last_seen: now,
            });
        }

        debug!("Presence sync: {} collaborator(s)", collaborators.len());
        self.collaborators = collaborators;
    }

    /// Patch cursor and selection for one collaborator. Returns whether anything changed.
    pub fn apply_cursor(&mut self, update: &CursorUpdate, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.remote_entry(&update.user_id) else {
            return false;
        };
        entry.cursor_position = Some(update.cursor_position);
        entry.selection_start = Some(update.selection_start);
        entry.selection_end = Some(update.selection_end);
        entry.is_typing = false;
        entry.last_seen = now;
        true
    }

    /// Patch the typing flag for one collaborator. Returns whether anything changed.
    pub fn apply_typing(&mut self, update: &TypingUpdate, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.remote_entry(&update.user_id) else {
            return false;
        };
        entry.is_typing = update.is_typing;
        entry.last_seen = now;
        true
    }

    pub fn clear(&mut self) {
        self.collaborators.clear();
    }

    fn remote_entry(&mut self, user_id: &str) -> Option<&mut CollaboratorPresence> {
        if user_id == self.current_user_id {
            return None;
        }
        self.collaborators.iter_mut().find(|c| c.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PresenceState;

    fn state(user_id: &str) -> PresenceState {
        PresenceState {
            user_id: user_id.to_string(),
            user_name: format!("{user_id} name"),
            user_email: format!("{user_id}@ideavault.test"),
            online_at: Utc::now(),
            cursor_position: None,
            selection_start: None,
            selection_end: None,
        }
    }

    fn snapshot(keys: &[(&str, &str)]) -> PresenceSnapshot {
        keys.iter()
            .map(|(key, user)| (key.to_string(), vec![state(user)]))
            .collect()
    }

    #[test]
    fn sync_excludes_current_user() {
        let mut registry = PresenceRegistry::new("me");
        registry.sync(&snapshot(&[("me", "me"), ("bob", "bob"), ("eve", "eve")]), Utc::now());

        let ids: Vec<_> = registry.collaborators().iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["bob", "eve"]);
        assert!(registry.get("me").is_none());
    }

    #[test]
    fn sync_keeps_one_entry_per_user() {
        let mut registry = PresenceRegistry::new("me");
        // Same user connected from two tabs under different presence keys
        registry.sync(&snapshot(&[("tab-1", "bob"), ("tab-2", "bob")]), Utc::now());
        assert_eq!(registry.collaborators().len(), 1);
    }

    #[test]
    fn sync_replaces_previous_list() {
        let mut registry = PresenceRegistry::new("me");
        registry.sync(&snapshot(&[("bob", "bob")]), Utc::now());
        registry.apply_typing(&TypingUpdate { user_id: "bob".into(), is_typing: true }, Utc::now());

        registry.sync(&snapshot(&[("eve", "eve")]), Utc::now());
        assert!(registry.get("bob").is_none());
        assert_eq!(registry.get("eve").unwrap().color, color_for("eve"));
    }

    #[test]
    fn cursor_update_patches_and_clears_typing() {
        let mut registry = PresenceRegistry::new("me");
        registry.sync(&snapshot(&[("bob", "bob")]), Utc::now());
        registry.apply_typing(&TypingUpdate { user_id: "bob".into(), is_typing: true }, Utc::now());

        let changed = registry.apply_cursor(
            &CursorUpdate {
                user_id: "bob".into(),
                cursor_position: 5,
                selection_start: 5,
                selection_end: 5,
            },
            Utc::now(),
        );
        assert!(changed);
        let bob = registry.get("bob").unwrap();
        assert_eq!(bob.cursor_position, Some(5));
        assert_eq!(bob.selection_start, Some(5));
        assert_eq!(bob.selection_end, Some(5));
        assert!(!bob.is_typing);
    }

    #[test]
    fn patches_from_self_or_strangers_are_ignored() {
        let mut registry = PresenceRegistry::new("me");
        registry.sync(&snapshot(&[("bob", "bob")]), Utc::now());

        assert!(!registry.apply_typing(&TypingUpdate { user_id: "me".into(), is_typing: true }, Utc::now()));
        assert!(!registry.apply_typing(&TypingUpdate { user_id: "zed".into(), is_typing: true }, Utc::now()));
        assert_eq!(registry.collaborators().len(), 1);
        assert!(!registry.get("bob").unwrap().is_typing);
    }
}
