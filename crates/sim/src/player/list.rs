use std::sync::Arc;

use super::state::{NetworkId, Player, PlayerId, PlayerMode};

/// Outcome of one `update_player_list` pass, for lifecycle notification.
#[derive(Debug, Default)]
pub struct ListChanges {
    pub added: Vec<(NetworkId, PlayerId)>,
    pub removed: Vec<(NetworkId, PlayerId)>,
}

impl ListChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The sorted, reference-stable player collection. Reads clone an `Arc`
/// snapshot that outlives any traversal; mutations are staged and applied
/// only by `update_player_list`, which runs once per background cycle.
///
/// Order invariant: ascending (network id, player id), so all local players
/// (network 0) are contiguous at the head.
#[derive(Debug, Default)]
pub struct PlayerList {
    snapshot: Arc<Vec<Arc<Player>>>,
    pending_adds: Vec<Arc<Player>>,
    baseline: Vec<Arc<Player>>,
}

impl PlayerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a configured (startup) player: part of the baseline that
    /// `reset` restores, staged like any other add.
    pub fn seed(&mut self, player: Arc<Player>) -> bool {
        if !self.stage(player.clone()) {
            return false;
        }
        self.baseline.push(player);
        true
    }

    /// Stages a runtime add (weapon release, incoming network entity). Not
    /// visible to traversals until the next `update_player_list`.
    pub fn add_new_player(&mut self, player: Arc<Player>) -> bool {
        self.stage(player)
    }

    fn stage(&mut self, player: Arc<Player>) -> bool {
        let key = (player.network_id(), player.id());
        if self.contains(key.0, key.1) {
            log::warn!("duplicate player {}:{} rejected", key.0, key.1);
            return false;
        }
        self.pending_adds.push(player);
        true
    }

    pub fn contains(&self, network_id: NetworkId, id: PlayerId) -> bool {
        self.find(network_id, id).is_some()
            || self
                .pending_adds
                .iter()
                .any(|p| p.network_id() == network_id && p.id() == id)
    }

    /// Binary search over the published snapshot.
    pub fn find(&self, network_id: NetworkId, id: PlayerId) -> Option<Arc<Player>> {
        let list = &self.snapshot;
        list.binary_search_by_key(&(network_id, id), |p| (p.network_id(), p.id()))
            .ok()
            .map(|slot| list[slot].clone())
    }

    /// The reference-stable read side: the returned vector never mutates,
    /// it is wholesale replaced by the next list update.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Player>>> {
        self.snapshot.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Applies staged adds and delete requests and publishes a fresh sorted
    /// snapshot. Single-threaded with respect to itself (background cycle).
    pub fn update_player_list(&mut self) -> ListChanges {
        let mut changes = ListChanges::default();
        let mut next: Vec<Arc<Player>> = Vec::with_capacity(self.snapshot.len() + self.pending_adds.len());

        for player in self.snapshot.iter() {
            match player.mode() {
                PlayerMode::DeleteRequest => {
                    player.set_mode(PlayerMode::Deleted);
                    changes.removed.push((player.network_id(), player.id()));
                }
                PlayerMode::Deleted => {
                    changes.removed.push((player.network_id(), player.id()));
                }
                _ => next.push(player.clone()),
            }
        }

        for player in self.pending_adds.drain(..) {
            player.set_mode(PlayerMode::Active);
            changes.added.push((player.network_id(), player.id()));
            next.push(player);
        }

        next.sort_by_key(|p| (p.network_id(), p.id()));
        self.snapshot = Arc::new(next);
        changes
    }

    /// Restores the configured baseline plus any still-active networked
    /// surrogates; pending mutations are discarded.
    pub fn reset(&mut self) {
        self.pending_adds.clear();

        let mut next: Vec<Arc<Player>> = Vec::with_capacity(self.baseline.len());
        for player in &self.baseline {
            player.revive();
            next.push(player.clone());
        }
        for player in self.snapshot.iter() {
            if !player.is_local()
                && player.mode() == PlayerMode::Active
                && !next
                    .iter()
                    .any(|held| held.network_id() == player.network_id() && held.id() == player.id())
            {
                next.push(player.clone());
            }
        }

        next.sort_by_key(|p| (p.network_id(), p.id()));
        self.snapshot = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::PlayerClass;
    use crate::player::Side;

    fn player(net: NetworkId, id: PlayerId) -> Arc<Player> {
        Arc::new(Player::networked(
            id,
            net,
            &format!("p{net}-{id}"),
            PlayerClass::Aircraft,
            "F-16C",
            Side::Blue,
        ))
    }

    fn keys(list: &PlayerList) -> Vec<(NetworkId, PlayerId)> {
        list.snapshot()
            .iter()
            .map(|p| (p.network_id(), p.id()))
            .collect()
    }

    #[test]
    fn staged_adds_invisible_until_update() {
        let mut list = PlayerList::new();
        assert!(list.add_new_player(player(0, 1)));
        assert!(list.is_empty());

        let changes = list.update_player_list();
        assert_eq!(changes.added, vec![(0, 1)]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.snapshot()[0].mode(), PlayerMode::Active);
    }

    #[test]
    fn locals_first_then_ascending_ids() {
        let mut list = PlayerList::new();
        for (net, id) in [(2, 9), (0, 4), (1, 7), (0, 2), (2, 1), (0, 9)] {
            assert!(list.add_new_player(player(net, id)));
        }
        list.update_player_list();

        assert_eq!(
            keys(&list),
            vec![(0, 2), (0, 4), (0, 9), (1, 7), (2, 1), (2, 9)]
        );
    }

    #[test]
    fn order_invariant_survives_mixed_mutation() {
        let mut list = PlayerList::new();
        for (net, id) in [(0, 1), (0, 3), (1, 5)] {
            list.add_new_player(player(net, id));
        }
        list.update_player_list();

        list.snapshot()[1].set_mode(PlayerMode::DeleteRequest);
        list.add_new_player(player(0, 2));
        list.add_new_player(player(1, 4));
        let changes = list.update_player_list();

        assert_eq!(changes.removed, vec![(0, 3)]);
        assert_eq!(keys(&list), vec![(0, 1), (0, 2), (1, 4), (1, 5)]);

        let ks = keys(&list);
        let split = ks.iter().filter(|(net, _)| *net == 0).count();
        assert!(ks[..split].iter().all(|(net, _)| *net == 0));
        assert!(ks[split..].iter().all(|(net, _)| *net > 0));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut list = PlayerList::new();
        assert!(list.add_new_player(player(0, 1)));
        assert!(!list.add_new_player(player(0, 1)));
        list.update_player_list();
        assert!(!list.add_new_player(player(0, 1)));
        // Same id on another network is a different player.
        assert!(list.add_new_player(player(3, 1)));
    }

    #[test]
    fn delete_requested_player_is_marked_deleted() {
        let mut list = PlayerList::new();
        list.add_new_player(player(0, 1));
        list.update_player_list();

        let held = list.find(0, 1).unwrap();
        held.set_mode(PlayerMode::DeleteRequest);
        list.update_player_list();

        assert!(list.is_empty());
        assert_eq!(held.mode(), PlayerMode::Deleted);
    }

    #[test]
    fn snapshot_is_reference_stable_across_mutation() {
        let mut list = PlayerList::new();
        list.add_new_player(player(0, 1));
        list.update_player_list();

        let traversal = list.snapshot();
        list.snapshot()[0].set_mode(PlayerMode::DeleteRequest);
        list.add_new_player(player(0, 2));
        list.update_player_list();

        // The old snapshot still holds the removed player for its readers.
        assert_eq!(traversal.len(), 1);
        assert_eq!(traversal[0].id(), 1);
        assert_eq!(keys(&list), vec![(0, 2)]);
    }

    #[test]
    fn reset_restores_baseline_and_active_surrogates() {
        let mut list = PlayerList::new();
        assert!(list.seed(player(0, 1)));
        assert!(list.seed(player(0, 2)));
        list.update_player_list();

        list.add_new_player(player(1, 9));
        list.update_player_list();

        // One baseline player dies, one runtime local add appears.
        list.find(0, 2).unwrap().set_mode(PlayerMode::DeleteRequest);
        list.add_new_player(player(0, 3));
        list.update_player_list();
        assert_eq!(keys(&list), vec![(0, 1), (0, 3), (1, 9)]);

        list.reset();
        assert_eq!(keys(&list), vec![(0, 1), (0, 2), (1, 9)]);
        assert_eq!(list.find(0, 2).unwrap().mode(), PlayerMode::Active);
    }

    #[test]
    fn find_uses_published_order() {
        let mut list = PlayerList::new();
        for (net, id) in [(0, 5), (1, 2), (0, 1)] {
            list.add_new_player(player(net, id));
        }
        list.update_player_list();

        assert_eq!(list.find(0, 5).unwrap().id(), 5);
        assert_eq!(list.find(1, 2).unwrap().network_id(), 1);
        assert!(list.find(2, 2).is_none());
    }
}
