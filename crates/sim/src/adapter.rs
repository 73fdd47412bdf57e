use std::sync::Arc;

use crate::events::{EventLog, SimEvent};
use crate::executive::Roster;
use crate::mapper::{EntityTypeCode, NtmSet, ProtocolFamily};
use crate::nib::{IoKind, Nib};
use crate::player::{NetworkId, Player, PlayerId, Side};

/// Everything an adapter sees of the executive during one of its windows:
/// the current roster snapshot, the staging handle, and the event sink.
pub struct AdapterContext<'a> {
    pub exec_time: f64,
    pub dt: f64,
    pub players: &'a [Arc<Player>],
    pub roster: &'a Roster,
    pub events: &'a EventLog,
    pub nib_timeout_secs: f64,
}

/// The seam a protocol adapter implements. The core never constructs
/// protocol-specific NIBs or parses wire traffic; it only drives these
/// windows: `output_frame` in the transmit phase, `input_frame` in the
/// receive phase, and `housekeeping` from the background pass.
pub trait NetAdapter: Send {
    fn family(&self) -> ProtocolFamily;

    /// Template lists supplied at configuration time, in declaration order.
    fn input_templates(&self) -> &NtmSet;
    fn output_templates(&self) -> &NtmSet;

    /// Factory for this adapter's NIBs; override to extend the base record.
    fn nib_factory(&self, io: IoKind, player: &Player) -> Nib {
        Nib::new(io, self.family(), player.id(), player.name(), player.side())
    }

    /// Transmit window: decide which local players need a state update and
    /// emit them.
    fn output_frame(&mut self, ctx: &AdapterContext<'_>);

    /// Receive window: ingest remote updates into NIBs and surrogates.
    fn input_frame(&mut self, ctx: &AdapterContext<'_>);

    /// Background window for timeout pruning and other non-time-critical
    /// work.
    fn housekeeping(&mut self, _ctx: &AdapterContext<'_>) {}

    /// Resolves a newly-discovered remote entity against the input
    /// templates and, on a match, stages a surrogate player with an
    /// attached, activated input NIB. Unmapped entities are dropped and
    /// reported, never instantiated.
    fn instantiate_remote(
        &self,
        ctx: &AdapterContext<'_>,
        network_id: NetworkId,
        player_id: PlayerId,
        name: &str,
        side: Side,
        entity_type: EntityTypeCode,
    ) -> Option<Arc<Player>> {
        let family = self.family();
        let Some(ntm) = self.input_templates().best_match_input(&entity_type) else {
            log::info!(
                "net {}: no template for incoming entity {:?}, dropped",
                family.id,
                entity_type
            );
            ctx.events.push(SimEvent::EntityUnmapped {
                family_id: family.id,
                entity_type,
            });
            return None;
        };

        let player = Arc::new(Player::networked(
            player_id,
            network_id,
            name,
            ntm.template_class(),
            ntm.template_type(),
            side,
        ));
        let mut nib = self.nib_factory(IoKind::Input, &player);
        if !nib.mark_valid() || !nib.set_entity_type(entity_type) || !nib.activate() {
            return None;
        }
        nib.set_timeout_enabled(true);
        if !player.attach_nib(nib) {
            return None;
        }
        if !ctx.roster.stage(player.clone()) {
            return None;
        }
        Some(player)
    }

    /// Builds the output NIB publishing a local player, or None when the
    /// player maps to no output template and must not be transmitted.
    fn make_output_nib(&self, player: &Player) -> Option<Nib> {
        let ntm = self
            .output_templates()
            .best_match_output(player.class(), player.type_string())?;
        let mut nib = self.nib_factory(IoKind::Output, player);
        if !nib.mark_valid() || !ntm.copy_entity_type(&mut nib) || !nib.activate() {
            log::warn!(
                "net {}: output mapping failed for player {}",
                self.family().id,
                player.id()
            );
            return None;
        }
        Some(nib)
    }
}
