use std::collections::{HashMap, VecDeque};

use tandem::{
    AdapterContext, DrAlgorithm, DrFrame, EntityTypeCode, NetAdapter, Nib, Ntm, NtmSet,
    NetworkId, PlayerClass, PlayerId, ProtocolFamily, SimEvent, Side,
};

pub const FAMILY: ProtocolFamily = ProtocolFamily::new(1, 9, 11);
pub const FIGHTER: EntityTypeCode = EntityTypeCode::new(1, 2, 225, 1);

/// Mirror offset: a local player N comes back as remote entity N + OFFSET.
pub const MIRROR_ID_OFFSET: PlayerId = 500;

#[derive(Debug, Clone)]
struct QueuedUpdate {
    player_id: PlayerId,
    entity_type: EntityTypeCode,
    frame: DrFrame,
}

/// In-process adapter that feeds every emitted state update straight back
/// as a remote entity, as if a second station republished our traffic.
/// Exercises the full seam - drift-policed output, template resolution,
/// surrogate instantiation, dead-reckoned tracking - without a socket.
pub struct LoopbackAdapter {
    input: NtmSet,
    output: NtmSet,
    outputs: HashMap<PlayerId, Nib>,
    queue: VecDeque<QueuedUpdate>,
    mirror_net: NetworkId,
}

impl LoopbackAdapter {
    pub fn new(mirror_net: NetworkId) -> Self {
        let mut input = NtmSet::new();
        input.push(Ntm::new(FAMILY, PlayerClass::Aircraft, "F-16C", FIGHTER).unwrap());
        let mut output = NtmSet::new();
        output.push(Ntm::new(FAMILY, PlayerClass::Aircraft, "F-16", FIGHTER).unwrap());
        Self {
            input,
            output,
            outputs: HashMap::new(),
            queue: VecDeque::new(),
            mirror_net,
        }
    }
}

impl NetAdapter for LoopbackAdapter {
    fn family(&self) -> ProtocolFamily {
        FAMILY
    }

    fn input_templates(&self) -> &NtmSet {
        &self.input
    }

    fn output_templates(&self) -> &NtmSet {
        &self.output
    }

    fn output_frame(&mut self, ctx: &AdapterContext<'_>) {
        for player in ctx.players.iter().filter(|p| p.is_local()) {
            if !self.outputs.contains_key(&player.id()) {
                let Some(nib) = self.make_output_nib(player) else {
                    continue;
                };
                self.outputs.insert(player.id(), nib);
            }
            let Some(nib) = self.outputs.get_mut(&player.id()) else {
                continue;
            };

            let actual = player.dr_frame();
            if !nib.is_player_state_update_required(ctx.exec_time, &actual) {
                continue;
            }
            nib.reset_dead_reckoning(DrAlgorithm::FixedPosWorld, actual, ctx.exec_time);
            let entity_type = nib.entity_type().unwrap_or(FIGHTER);
            self.queue.push_back(QueuedUpdate {
                player_id: player.id() + MIRROR_ID_OFFSET,
                entity_type,
                frame: actual,
            });
            ctx.events.push(SimEvent::StateUpdateEmitted {
                family_id: FAMILY.id,
                player_id: player.id(),
            });
        }
    }

    fn input_frame(&mut self, ctx: &AdapterContext<'_>) {
        while let Some(update) = self.queue.pop_front() {
            if let Some(surrogate) = ctx.roster.find(self.mirror_net, update.player_id) {
                surrogate.with_nib(|nib| {
                    nib.reset_dead_reckoning(
                        DrAlgorithm::FixedPosWorld,
                        update.frame,
                        ctx.exec_time,
                    );
                });
                continue;
            }

            let name = format!("mirror{}", update.player_id);
            if let Some(player) = self.instantiate_remote(
                ctx,
                self.mirror_net,
                update.player_id,
                &name,
                Side::Red,
                update.entity_type,
            ) {
                player.with_nib(|nib| {
                    nib.reset_dead_reckoning(
                        DrAlgorithm::FixedPosWorld,
                        update.frame,
                        ctx.exec_time,
                    );
                });
                log::info!("mirrored entity {} online", update.player_id);
            }
        }
    }

    fn housekeeping(&mut self, ctx: &AdapterContext<'_>) {
        log::debug!(
            "loopback housekeeping: {} output nibs, {} players, t={:.2}",
            self.outputs.len(),
            ctx.players.len(),
            ctx.exec_time
        );
    }
}
