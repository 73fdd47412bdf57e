mod parts;

pub use parts::{ArticulatedParts, ArticulatedValue, MissileStation};

use std::time::SystemTime;

use bitflags::bitflags;
use glam::DVec3;

use crate::mapper::{EntityTypeCode, ProtocolFamily};
use crate::player::{PlayerId, PlayerMode, Side};
use crate::reckoning::{self, DrAlgorithm, DrFrame, DrMatrices};

/// Which side of a player/entity relationship this NIB shadows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    /// Remote entity driving a local surrogate player.
    Input,
    /// Local player being published to the network.
    Output,
}

/// Type-mapping resolution state. One-way once decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapState {
    #[default]
    Unchecked,
    Valid,
    Invalid,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NibFlags: u8 {
        const TIMEOUT_ENABLED = 1 << 0;
        const DETONATION_SENT = 1 << 1;
        /// At least one state update has been published from this NIB.
        const SENT_ONCE = 1 << 2;
        /// Mode changed since the last published update.
        const MODE_DIRTY = 1 << 3;
    }
}

/// Sender-side thresholds for [`Nib::is_player_state_update_required`].
/// Adapter-tunable policy, not a universal constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdatePolicy {
    pub max_position_err_m: f64,
    pub max_orientation_err_rad: f64,
    pub heartbeat_secs: f64,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            max_position_err_m: 1.0,
            max_orientation_err_rad: 3.0_f64.to_radians(),
            heartbeat_secs: 5.0,
        }
    }
}

/// Appearance scalars carried alongside the kinematic state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Appearance {
    pub damage: f64,
    pub smoke: f64,
    pub flames: f64,
    pub camouflage_type: u32,
}

/// Per-entity shadow record linking a local player to its remote network
/// representation. Owned by exactly one network adapter; the back-reference
/// to the player is a plain id, never ownership.
#[derive(Debug, Clone)]
pub struct Nib {
    io: IoKind,
    family: ProtocolFamily,
    player_id: PlayerId,
    player_name: String,
    side: Side,
    mode: PlayerMode,
    map_state: MapState,
    entity_type: Option<EntityTypeCode>,
    algorithm: DrAlgorithm,
    anchor: DrFrame,
    matrices: DrMatrices,
    dr_time: f64,
    predicted_position: DVec3,
    predicted_angles: DVec3,
    appearance: Appearance,
    parts: ArticulatedParts,
    flags: NibFlags,
    policy: UpdatePolicy,
    last_update_exec: f64,
    last_update_utc: SystemTime,
}

impl Nib {
    pub fn new(
        io: IoKind,
        family: ProtocolFamily,
        player_id: PlayerId,
        player_name: &str,
        side: Side,
    ) -> Self {
        let anchor = DrFrame::default();
        Self {
            io,
            family,
            player_id,
            player_name: player_name.to_owned(),
            side,
            mode: PlayerMode::New,
            map_state: MapState::Unchecked,
            entity_type: None,
            algorithm: DrAlgorithm::Static,
            matrices: DrMatrices::new(&anchor),
            anchor,
            dr_time: 0.0,
            predicted_position: DVec3::ZERO,
            predicted_angles: DVec3::ZERO,
            appearance: Appearance::default(),
            parts: ArticulatedParts::new(),
            flags: NibFlags::default(),
            policy: UpdatePolicy::default(),
            last_update_exec: 0.0,
            last_update_utc: SystemTime::now(),
        }
    }

    pub fn io(&self) -> IoKind {
        self.io
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn mode(&self) -> PlayerMode {
        self.mode
    }

    /// Mode advances forward only (`New -> Active -> DeleteRequest ->
    /// Deleted`); a backward transition is rejected.
    pub fn set_mode(&mut self, mode: PlayerMode) -> bool {
        if mode == self.mode {
            return true;
        }
        if !self.mode.can_become(mode) {
            return false;
        }
        self.mode = mode;
        self.flags.insert(NibFlags::MODE_DIRTY);
        true
    }

    pub fn map_state(&self) -> MapState {
        self.map_state
    }

    /// True once type-mapping resolution has been decided either way.
    pub fn checked(&self) -> bool {
        self.map_state != MapState::Unchecked
    }

    pub fn mark_valid(&mut self) -> bool {
        if self.map_state != MapState::Unchecked {
            return self.map_state == MapState::Valid;
        }
        self.map_state = MapState::Valid;
        true
    }

    pub fn mark_invalid(&mut self) -> bool {
        if self.map_state != MapState::Unchecked {
            return self.map_state == MapState::Invalid;
        }
        self.map_state = MapState::Invalid;
        true
    }

    pub fn entity_type(&self) -> Option<EntityTypeCode> {
        self.entity_type
    }

    /// Immutable once set; rejected outright on an INVALID NIB or when any
    /// field is outside the family's enumeration ranges (no partial update).
    pub fn set_entity_type(&mut self, code: EntityTypeCode) -> bool {
        if self.map_state == MapState::Invalid {
            return false;
        }
        if let Some(existing) = self.entity_type {
            return existing == code;
        }
        if !self.family.accepts(&code) {
            log::warn!(
                "nib {}: entity type {:?} outside family ranges, rejected",
                self.player_id,
                code
            );
            return false;
        }
        self.entity_type = Some(code);
        true
    }

    /// Gate for bringing the paired player live. An input NIB whose mapping
    /// came back INVALID must be discarded, never activated.
    pub fn activate(&mut self) -> bool {
        if self.map_state != MapState::Valid {
            return false;
        }
        self.set_mode(PlayerMode::Active)
    }

    pub fn algorithm(&self) -> DrAlgorithm {
        self.algorithm
    }

    pub fn anchor(&self) -> &DrFrame {
        &self.anchor
    }

    pub fn dr_time(&self) -> f64 {
        self.dr_time
    }

    /// Re-anchors the dead-reckoning zero time: fresh ground truth arrived
    /// (input side) or local state is about to be re-published (output
    /// side). Always succeeds and overwrites prior state unconditionally.
    pub fn reset_dead_reckoning(
        &mut self,
        algorithm: DrAlgorithm,
        frame: DrFrame,
        exec_time: f64,
    ) {
        self.algorithm = algorithm;
        self.matrices = DrMatrices::new(&frame);
        self.anchor = frame;
        self.dr_time = 0.0;
        self.predicted_position = frame.position;
        self.predicted_angles = frame.angles;
        self.flags.insert(NibFlags::SENT_ONCE);
        self.flags.remove(NibFlags::MODE_DIRTY);
        self.last_update_exec = exec_time;
        self.last_update_utc = SystemTime::now();
    }

    /// Advances the DR-time accumulator and extrapolates from the anchor.
    /// An unsupported selector falls back to holding the anchor state.
    pub fn update_dead_reckoning(&mut self, dt: f64) -> (DVec3, DVec3) {
        self.dr_time += dt;
        let out = reckoning::dead_reckon_with(self.algorithm, &self.anchor, &self.matrices, self.dr_time);
        self.predicted_position = out.position;
        self.predicted_angles = out.angles;
        (out.position, out.angles)
    }

    pub fn predicted_position(&self) -> DVec3 {
        self.predicted_position
    }

    pub fn predicted_angles(&self) -> DVec3 {
        self.predicted_angles
    }

    /// Sender-side half of the bandwidth-reduction contract: true when the
    /// receiver's dead-reckoned picture of this player has drifted past the
    /// policy thresholds, the heartbeat expired, the mode changed, or
    /// nothing was ever sent. `actual` is the player's current state.
    pub fn is_player_state_update_required(&self, cur_exec_time: f64, actual: &DrFrame) -> bool {
        debug_assert_eq!(self.io, IoKind::Output);

        if !self.flags.contains(NibFlags::SENT_ONCE) {
            return true;
        }
        if self.flags.contains(NibFlags::MODE_DIRTY) {
            return true;
        }
        let age = cur_exec_time - self.last_update_exec;
        if age >= self.policy.heartbeat_secs {
            return true;
        }

        let seen = reckoning::dead_reckon_with(self.algorithm, &self.anchor, &self.matrices, age);
        if (actual.position - seen.position).length() > self.policy.max_position_err_m {
            return true;
        }
        let err = angle_error(actual.angles, seen.angles);
        err > self.policy.max_orientation_err_rad
    }

    pub fn policy(&self) -> &UpdatePolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: UpdatePolicy) {
        self.policy = policy;
    }

    pub fn appearance(&self) -> &Appearance {
        &self.appearance
    }

    pub fn set_damage(&mut self, damage: f64) -> bool {
        set_scalar(&mut self.appearance.damage, damage.clamp(0.0, 1.0))
    }

    pub fn set_smoke(&mut self, smoke: f64) -> bool {
        set_scalar(&mut self.appearance.smoke, smoke.clamp(0.0, 1.0))
    }

    pub fn set_flames(&mut self, flames: f64) -> bool {
        set_scalar(&mut self.appearance.flames, flames.clamp(0.0, 1.0))
    }

    pub fn set_camouflage_type(&mut self, id: u32) -> bool {
        if self.appearance.camouflage_type == id {
            return false;
        }
        self.appearance.camouflage_type = id;
        true
    }

    pub fn parts(&self) -> &ArticulatedParts {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut ArticulatedParts {
        &mut self.parts
    }

    pub fn detonation_sent(&self) -> bool {
        self.flags.contains(NibFlags::DETONATION_SENT)
    }

    /// Returns false when the detonation message was already sent, so the
    /// caller never double-fires it.
    pub fn claim_detonation(&mut self) -> bool {
        if self.flags.contains(NibFlags::DETONATION_SENT) {
            return false;
        }
        self.flags.insert(NibFlags::DETONATION_SENT);
        true
    }

    pub fn timeout_enabled(&self) -> bool {
        self.flags.contains(NibFlags::TIMEOUT_ENABLED)
    }

    pub fn set_timeout_enabled(&mut self, enabled: bool) {
        self.flags.set(NibFlags::TIMEOUT_ENABLED, enabled);
    }

    pub fn last_update_exec(&self) -> f64 {
        self.last_update_exec
    }

    pub fn last_update_utc(&self) -> SystemTime {
        self.last_update_utc
    }

    /// Whether this NIB has gone stale. Detection only; removal policy
    /// belongs to the owning adapter's housekeeping pass.
    pub fn is_timed_out(&self, cur_exec_time: f64, window_secs: f64) -> bool {
        self.timeout_enabled() && (cur_exec_time - self.last_update_exec) > window_secs
    }
}

fn set_scalar(slot: &mut f64, value: f64) -> bool {
    if (*slot - value).abs() < 1.0e-9 {
        return false;
    }
    *slot = value;
    true
}

/// Largest per-axis Euler difference, wrapped to [-pi, pi].
fn angle_error(a: DVec3, b: DVec3) -> f64 {
    let d = a - b;
    [d.x, d.y, d.z]
        .into_iter()
        .map(|v| wrap_pi(v).abs())
        .fold(0.0, f64::max)
}

fn wrap_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a < -PI {
        a += TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAMILY: ProtocolFamily = ProtocolFamily::new(1, 9, 11);

    fn input_nib() -> Nib {
        Nib::new(IoKind::Input, FAMILY, 42, "hawk1", Side::Blue)
    }

    fn output_nib() -> Nib {
        Nib::new(IoKind::Output, FAMILY, 7, "viper2", Side::Red)
    }

    fn moving_frame() -> DrFrame {
        DrFrame {
            velocity: DVec3::new(10.0, 0.0, 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn reset_then_zero_update_is_identity() {
        let mut nib = input_nib();
        let frame = DrFrame {
            position: DVec3::new(1.0, 2.0, 3.0),
            velocity: DVec3::new(9.0, 0.0, 0.0),
            angles: DVec3::new(0.1, 0.2, 0.3),
            ..Default::default()
        };
        nib.reset_dead_reckoning(DrAlgorithm::FixedPosWorld, frame, 0.0);
        let (pos, angles) = nib.update_dead_reckoning(0.0);
        assert_eq!(pos, frame.position);
        assert_eq!(angles, frame.angles);
    }

    #[test]
    fn static_versus_first_order_linear() {
        let mut fixed = input_nib();
        fixed.reset_dead_reckoning(DrAlgorithm::Static, moving_frame(), 0.0);
        let (pos, _) = fixed.update_dead_reckoning(5.0);
        assert_eq!(pos, DVec3::ZERO);

        let mut linear = input_nib();
        linear.reset_dead_reckoning(DrAlgorithm::FixedPosWorld, moving_frame(), 0.0);
        let (pos, _) = linear.update_dead_reckoning(5.0);
        assert!((pos - DVec3::new(50.0, 0.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn dr_time_accumulates_across_updates() {
        let mut nib = input_nib();
        nib.reset_dead_reckoning(DrAlgorithm::FixedPosWorld, moving_frame(), 0.0);
        for _ in 0..50 {
            nib.update_dead_reckoning(0.1);
        }
        assert!((nib.predicted_position() - DVec3::new(50.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn unsupported_selector_holds_anchor() {
        let mut nib = input_nib();
        nib.reset_dead_reckoning(DrAlgorithm::Other, moving_frame(), 0.0);
        let (pos, _) = nib.update_dead_reckoning(5.0);
        assert_eq!(pos, DVec3::ZERO);
    }

    #[test]
    fn map_state_is_one_way() {
        let mut nib = input_nib();
        assert!(!nib.checked());
        assert!(nib.mark_valid());
        assert!(nib.checked());
        assert!(!nib.mark_invalid());
        assert_eq!(nib.map_state(), MapState::Valid);
    }

    #[test]
    fn invalid_mapping_blocks_activation_and_type() {
        let mut nib = input_nib();
        assert!(nib.mark_invalid());
        assert!(!nib.activate());
        assert!(!nib.set_entity_type(EntityTypeCode::new(1, 2, 225, 1)));
        assert_eq!(nib.mode(), PlayerMode::New);
    }

    #[test]
    fn entity_type_immutable_once_set() {
        let mut nib = input_nib();
        let first = EntityTypeCode::new(1, 2, 225, 1);
        assert!(nib.set_entity_type(first));
        assert!(nib.set_entity_type(first));
        assert!(!nib.set_entity_type(EntityTypeCode::new(1, 2, 225, 9)));
        assert_eq!(nib.entity_type(), Some(first));
    }

    #[test]
    fn out_of_range_code_rejected_whole() {
        let mut nib = input_nib();
        assert!(!nib.set_entity_type(EntityTypeCode::new(10, 2, 225, 1)));
        assert_eq!(nib.entity_type(), None);
    }

    #[test]
    fn mode_never_moves_backward() {
        let mut nib = input_nib();
        assert!(nib.mark_valid());
        assert!(nib.activate());
        assert!(nib.set_mode(PlayerMode::DeleteRequest));
        assert!(!nib.set_mode(PlayerMode::Active));
        assert!(nib.set_mode(PlayerMode::Deleted));
        assert!(!nib.set_mode(PlayerMode::New));
        assert_eq!(nib.mode(), PlayerMode::Deleted);
    }

    #[test]
    fn first_update_is_always_required() {
        let nib = output_nib();
        assert!(nib.is_player_state_update_required(0.0, &DrFrame::default()));
    }

    #[test]
    fn no_drift_within_heartbeat_needs_no_update() {
        let mut nib = output_nib();
        nib.reset_dead_reckoning(DrAlgorithm::FixedPosWorld, moving_frame(), 0.0);

        // Actual motion agrees with the extrapolation two seconds later.
        let actual = DrFrame {
            position: DVec3::new(20.0, 0.0, 0.0),
            ..moving_frame()
        };
        assert!(!nib.is_player_state_update_required(2.0, &actual));
    }

    #[test]
    fn position_drift_triggers_update() {
        let mut nib = output_nib();
        nib.reset_dead_reckoning(DrAlgorithm::FixedPosWorld, moving_frame(), 0.0);

        let actual = DrFrame {
            position: DVec3::new(20.0, 2.5, 0.0),
            ..moving_frame()
        };
        assert!(nib.is_player_state_update_required(2.0, &actual));
    }

    #[test]
    fn heartbeat_expiry_triggers_update() {
        let mut nib = output_nib();
        nib.reset_dead_reckoning(DrAlgorithm::Static, DrFrame::default(), 0.0);
        assert!(!nib.is_player_state_update_required(4.9, &DrFrame::default()));
        assert!(nib.is_player_state_update_required(5.0, &DrFrame::default()));
    }

    #[test]
    fn mode_change_triggers_update() {
        let mut nib = output_nib();
        nib.mark_valid();
        nib.activate();
        nib.reset_dead_reckoning(DrAlgorithm::Static, DrFrame::default(), 0.0);
        assert!(!nib.is_player_state_update_required(1.0, &DrFrame::default()));
        nib.set_mode(PlayerMode::DeleteRequest);
        assert!(nib.is_player_state_update_required(1.0, &DrFrame::default()));
    }

    #[test]
    fn timeout_flag_and_window() {
        let mut nib = input_nib();
        nib.reset_dead_reckoning(DrAlgorithm::Static, DrFrame::default(), 100.0);

        assert!(!nib.is_timed_out(200.0, 12.5));
        nib.set_timeout_enabled(true);
        assert!(nib.is_timed_out(200.0, 12.5));
        assert!(!nib.is_timed_out(112.0, 12.5));
    }

    #[test]
    fn detonation_fires_once() {
        let mut nib = output_nib();
        assert!(nib.claim_detonation());
        assert!(!nib.claim_detonation());
        assert!(nib.detonation_sent());
    }

    #[test]
    fn appearance_setters_report_change() {
        let mut nib = input_nib();
        assert!(nib.set_damage(0.5));
        assert!(!nib.set_damage(0.5));
        assert!(nib.set_smoke(2.0));
        assert_eq!(nib.appearance().smoke, 1.0);
        assert!(nib.set_camouflage_type(3));
        assert!(!nib.set_camouflage_type(3));
    }
}
