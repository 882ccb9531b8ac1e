//! Local-only channel display order.
//!
//! The order lives on this client alone. It is never sent to the backend and
//! never derived from it, and it does not survive a restart.
//!
//! Local creates and deletes bump an [`Epoch`]. A channel-list refresh
//! records the epoch it started under and is refused by [`sync`] if a local
//! change happened since, so a list fetched before a create cannot drop the
//! new channel.
//!
//! [`sync`]: ChannelOrderStore::sync

use chatsync_types::{Channel, ChannelId};

use crate::messages::Epoch;

/// Display order of channels, keyed by channel id.
#[derive(Debug, Clone, Default)]
pub struct ChannelOrderStore {
    order: Vec<ChannelId>,
    epoch: Epoch,
}

impl ChannelOrderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch to record when starting a channel-list refresh.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Merge a server channel list fetched under `started`.
    ///
    /// Known ids keep their local position, unknown ids are appended in
    /// server order, and ids the server no longer reports are dropped.
    /// Returns `false` (and changes nothing) if a local create or delete
    /// happened after the fetch started.
    pub fn sync(&mut self, started: Epoch, channels: &[Channel]) -> bool {
        if started != self.epoch {
            return false;
        }
        self.order
            .retain(|id| channels.iter().any(|channel| &channel.id == id));
        for channel in channels {
            self.append(channel.id.clone());
        }
        true
    }

    /// Append a locally created channel if not already present.
    pub fn insert(&mut self, id: ChannelId) -> bool {
        let inserted = self.append(id);
        if inserted {
            self.epoch = self.epoch.next();
        }
        inserted
    }

    /// Remove a locally deleted channel.
    pub fn remove(&mut self, id: &ChannelId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.order.remove(index);
                self.epoch = self.epoch.next();
                true
            }
            None => false,
        }
    }

    fn append(&mut self, id: ChannelId) -> bool {
        if self.order.contains(&id) {
            return false;
        }
        self.order.push(id);
        true
    }

    /// Move `dragged` to where `target` currently sits.
    ///
    /// The drop index is taken before removal, so dragging downwards lands
    /// the channel just after the target and dragging upwards just before
    /// it. Returns `false` (and changes nothing) when both ids are the same
    /// or either is unknown.
    pub fn reorder(&mut self, dragged: &ChannelId, target: &ChannelId) -> bool {
        if dragged == target {
            return false;
        }
        let (Some(from), Some(to)) = (self.position(dragged), self.position(target)) else {
            return false;
        };

        let moved = self.order.remove(from);
        self.order.insert(to, moved);
        true
    }

    /// Current 0-based position of a channel.
    pub fn position(&self, id: &ChannelId) -> Option<usize> {
        self.order.iter().position(|known| known == id)
    }

    /// Ids in display order.
    pub fn ids(&self) -> &[ChannelId] {
        &self.order
    }

    /// Number of ordered channels.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Arrange `channels` in display order and stamp a dense `order` on
    /// each. Channels the store does not know come last, in input order.
    pub fn apply(&self, channels: &[Channel]) -> Vec<Channel> {
        let mut known: Vec<(usize, &Channel)> = Vec::with_capacity(channels.len());
        let mut unknown = Vec::new();
        for channel in channels {
            match self.position(&channel.id) {
                Some(position) => known.push((position, channel)),
                None => unknown.push(channel),
            }
        }
        known.sort_by_key(|(position, _)| *position);

        known
            .into_iter()
            .map(|(_, channel)| channel)
            .chain(unknown)
            .enumerate()
            .map(|(index, channel)| {
                let mut channel = channel.clone();
                channel.order = Some(index);
                channel
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(names: &[&str]) -> Vec<Channel> {
        names
            .iter()
            .map(|name| Channel::new(format!("id-{name}"), *name))
            .collect()
    }

    fn id(name: &str) -> ChannelId {
        ChannelId::new(format!("id-{name}"))
    }

    fn names(store: &ChannelOrderStore, list: &[Channel]) -> Vec<String> {
        store.apply(list).into_iter().map(|c| c.name).collect()
    }

    fn store_with(names: &[&str]) -> (ChannelOrderStore, Vec<Channel>) {
        let list = channels(names);
        let mut store = ChannelOrderStore::new();
        store.sync(store.epoch(), &list);
        (store, list)
    }

    // ===========================================
    // Reorder Tests
    // ===========================================

    #[test]
    fn drag_down_lands_after_target() {
        let (mut store, list) = store_with(&["a", "b", "c", "d"]);

        assert!(store.reorder(&id("a"), &id("c")));

        assert_eq!(names(&store, &list), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn drag_up_lands_before_target() {
        let (mut store, list) = store_with(&["a", "b", "c", "d"]);

        assert!(store.reorder(&id("d"), &id("b")));

        assert_eq!(names(&store, &list), vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn reorder_same_or_unknown_is_noop() {
        let (mut store, list) = store_with(&["a", "b"]);

        assert!(!store.reorder(&id("a"), &id("a")));
        assert!(!store.reorder(&id("a"), &id("zzz")));
        assert!(!store.reorder(&id("zzz"), &id("a")));
        assert_eq!(names(&store, &list), vec!["a", "b"]);
    }

    #[test]
    fn order_is_dense_after_reorder() {
        let (mut store, list) = store_with(&["a", "b", "c"]);
        store.reorder(&id("c"), &id("a"));

        let orders: Vec<_> = store.apply(&list).iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![Some(0), Some(1), Some(2)]);
    }

    // ===========================================
    // Sync Tests
    // ===========================================

    #[test]
    fn server_refresh_does_not_overwrite_local_order() {
        let (mut store, _) = store_with(&["general", "random", "dev-team"]);
        store.reorder(&id("dev-team"), &id("general"));

        // Server keeps reporting its own order, plus a new channel
        let refreshed = channels(&["general", "random", "dev-team", "ops"]);
        assert!(store.sync(store.epoch(), &refreshed));

        assert_eq!(
            names(&store, &refreshed),
            vec!["dev-team", "general", "random", "ops"]
        );
    }

    #[test]
    fn sync_drops_vanished_channels() {
        let (mut store, _) = store_with(&["a", "b", "c"]);

        let refreshed = channels(&["a", "c"]);
        assert!(store.sync(store.epoch(), &refreshed));

        assert_eq!(store.len(), 2);
        assert_eq!(store.position(&id("c")), Some(1));
    }

    #[test]
    fn insert_and_remove() {
        let (mut store, _) = store_with(&["a"]);

        assert!(store.insert(id("b")));
        assert!(!store.insert(id("b")));
        assert_eq!(store.ids(), &[id("a"), id("b")]);

        assert!(store.remove(&id("a")));
        assert!(!store.remove(&id("a")));
        assert_eq!(store.position(&id("b")), Some(0));
    }

    #[test]
    fn list_fetched_before_local_create_is_refused() {
        let (mut store, mut list) = store_with(&["general", "random"]);
        let started = store.epoch();
        let fetched = list.clone();

        store.insert(id("ops"));
        list.push(Channel::new("id-ops", "ops"));
        store.reorder(&id("ops"), &id("general"));

        assert!(!store.sync(started, &fetched));
        assert_eq!(names(&store, &list), vec!["ops", "general", "random"]);

        // A fresh list that includes the channel is accepted
        assert!(store.sync(store.epoch(), &list));
        assert_eq!(names(&store, &list), vec!["ops", "general", "random"]);
    }

    #[test]
    fn list_fetched_before_local_delete_is_refused() {
        let (mut store, list) = store_with(&["general", "ops"]);
        let started = store.epoch();

        store.remove(&id("ops"));
        assert_eq!(store.epoch().value(), started.value() + 1);

        assert!(!store.sync(started, &list));
        assert_eq!(store.position(&id("ops")), None);
    }

    #[test]
    fn unknown_channels_are_placed_last() {
        let (store, _) = store_with(&["b"]);
        let list = channels(&["a", "b"]);

        assert_eq!(names(&store, &list), vec!["b", "a"]);
    }
}
