use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::mapper::PlayerClass;
use crate::nib::{IoKind, Nib};
use crate::reckoning::DrFrame;

pub type PlayerId = u16;

/// 0 is the local network; everything else is a remote interoperability
/// network this player arrived from.
pub type NetworkId = u16;

pub const LOCAL_NET: NetworkId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Side {
    #[default]
    Blue,
    Red,
    Yellow,
    Cyan,
    Gray,
    White,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PlayerMode {
    #[default]
    New = 0,
    Active = 1,
    DeleteRequest = 2,
    Deleted = 3,
}

impl PlayerMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Active,
            2 => Self::DeleteRequest,
            _ => Self::Deleted,
        }
    }

    /// Modes only move forward; `Deleted` is terminal.
    pub fn can_become(self, next: PlayerMode) -> bool {
        (next as u8) > (self as u8)
    }
}

/// A simulation entity: locally owned, or a surrogate standing in for a
/// remote entity. Kinematics live behind a mutex so phase workers and
/// adapters can touch disjoint players without a global lock; the mode is
/// atomic so staged delete requests never block a traversal.
#[derive(Debug)]
pub struct Player {
    id: PlayerId,
    network_id: NetworkId,
    name: String,
    class: PlayerClass,
    type_string: String,
    side: Side,
    mode: AtomicU8,
    kin: Mutex<DrFrame>,
    nib: Mutex<Option<Nib>>,
}

impl Player {
    pub fn new(
        id: PlayerId,
        name: &str,
        class: PlayerClass,
        type_string: &str,
        side: Side,
    ) -> Self {
        Self::networked(id, LOCAL_NET, name, class, type_string, side)
    }

    /// A surrogate for an entity owned by a remote network.
    pub fn networked(
        id: PlayerId,
        network_id: NetworkId,
        name: &str,
        class: PlayerClass,
        type_string: &str,
        side: Side,
    ) -> Self {
        Self {
            id,
            network_id,
            name: name.to_owned(),
            class,
            type_string: type_string.to_owned(),
            side,
            mode: AtomicU8::new(PlayerMode::New as u8),
            kin: Mutex::new(DrFrame::default()),
            nib: Mutex::new(None),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn is_local(&self) -> bool {
        self.network_id == LOCAL_NET
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> PlayerClass {
        self.class
    }

    pub fn type_string(&self) -> &str {
        &self.type_string
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn mode(&self) -> PlayerMode {
        PlayerMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Forward-only; marking `DeleteRequest` stages removal for the next
    /// background player-list update.
    pub fn set_mode(&self, mode: PlayerMode) -> bool {
        let mut current = self.mode.load(Ordering::Acquire);
        loop {
            let held = PlayerMode::from_u8(current);
            if held == mode {
                return true;
            }
            if !held.can_become(mode) {
                return false;
            }
            match self.mode.compare_exchange_weak(
                current,
                mode as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(now) => current = now,
            }
        }
    }

    pub(crate) fn revive(&self) {
        self.mode.store(PlayerMode::Active as u8, Ordering::Release);
    }

    pub fn position(&self) -> DVec3 {
        self.kin.lock().unwrap().position
    }

    pub fn velocity(&self) -> DVec3 {
        self.kin.lock().unwrap().velocity
    }

    pub fn acceleration(&self) -> DVec3 {
        self.kin.lock().unwrap().acceleration
    }

    pub fn euler_angles(&self) -> DVec3 {
        self.kin.lock().unwrap().angles
    }

    pub fn angular_rates(&self) -> DVec3 {
        self.kin.lock().unwrap().angular_rates
    }

    /// Copy of the full kinematic state, usable as a dead-reckoning anchor.
    pub fn dr_frame(&self) -> DrFrame {
        *self.kin.lock().unwrap()
    }

    pub fn set_kinematics(&self, frame: DrFrame) {
        *self.kin.lock().unwrap() = frame;
    }

    pub fn set_position(&self, position: DVec3) {
        self.kin.lock().unwrap().position = position;
    }

    pub fn set_velocity(&self, velocity: DVec3) {
        self.kin.lock().unwrap().velocity = velocity;
    }

    pub fn set_acceleration(&self, acceleration: DVec3) {
        self.kin.lock().unwrap().acceleration = acceleration;
    }

    pub fn set_euler_angles(&self, angles: DVec3) {
        self.kin.lock().unwrap().angles = angles;
    }

    pub fn set_angular_rates(&self, rates: DVec3) {
        self.kin.lock().unwrap().angular_rates = rates;
    }

    /// Point-mass integration for locally-owned players; richer dynamics
    /// come from external model plug-ins driving the setters instead.
    pub fn integrate(&self, dt: f64) {
        let mut kin = self.kin.lock().unwrap();
        let dt2 = 0.5 * dt * dt;
        let velocity = kin.velocity;
        let acceleration = kin.acceleration;
        let angular_rates = kin.angular_rates;
        kin.position += velocity * dt + acceleration * dt2;
        kin.velocity += acceleration * dt;
        kin.angles += angular_rates * dt;
    }

    /// Attaches the input NIB whose remote entity this surrogate shadows.
    /// Rejected for output NIBs or when one is already attached.
    pub fn attach_nib(&self, nib: Nib) -> bool {
        if nib.io() != IoKind::Input {
            return false;
        }
        let mut slot = self.nib.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some(nib);
        true
    }

    pub fn has_input_nib(&self) -> bool {
        self.nib.lock().unwrap().is_some()
    }

    pub fn take_nib(&self) -> Option<Nib> {
        self.nib.lock().unwrap().take()
    }

    /// Runs `f` against the attached input NIB, if any.
    pub fn with_nib<R>(&self, f: impl FnOnce(&mut Nib) -> R) -> Option<R> {
        self.nib.lock().unwrap().as_mut().map(f)
    }

    /// Phase-0 step for a networked surrogate: advance the NIB's dead
    /// reckoning and adopt the prediction as displayed state. Falls back to
    /// holding still when no NIB is attached.
    pub fn drive_from_nib(&self, dt: f64) {
        let predicted = self.with_nib(|nib| nib.update_dead_reckoning(dt));
        if let Some((position, angles)) = predicted {
            let mut kin = self.kin.lock().unwrap();
            kin.position = position;
            kin.angles = angles;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::ProtocolFamily;
    use crate::reckoning::DrAlgorithm;

    const FAMILY: ProtocolFamily = ProtocolFamily::new(1, 9, 11);

    #[test]
    fn mode_transitions_forward_only() {
        let player = Player::new(1, "t1", PlayerClass::Aircraft, "F-16C", Side::Blue);
        assert_eq!(player.mode(), PlayerMode::New);
        assert!(player.set_mode(PlayerMode::Active));
        assert!(!player.set_mode(PlayerMode::New));
        assert!(player.set_mode(PlayerMode::DeleteRequest));
        assert!(player.set_mode(PlayerMode::Deleted));
        assert!(!player.set_mode(PlayerMode::Active));
    }

    #[test]
    fn integrate_second_order() {
        let player = Player::new(1, "t1", PlayerClass::Aircraft, "F-16C", Side::Blue);
        player.set_velocity(DVec3::new(10.0, 0.0, 0.0));
        player.set_acceleration(DVec3::new(0.0, 2.0, 0.0));

        player.integrate(1.0);
        assert!((player.position() - DVec3::new(10.0, 1.0, 0.0)).length() < 1e-9);
        assert!((player.velocity() - DVec3::new(10.0, 2.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn surrogate_follows_its_nib() {
        let player = Player::networked(5, 2, "bogey", PlayerClass::Aircraft, "MiG-29", Side::Red);
        let mut nib = Nib::new(IoKind::Input, FAMILY, 5, "bogey", Side::Red);
        nib.reset_dead_reckoning(
            DrAlgorithm::FixedPosWorld,
            DrFrame {
                velocity: DVec3::new(100.0, 0.0, 0.0),
                ..Default::default()
            },
            0.0,
        );
        assert!(player.attach_nib(nib));

        player.drive_from_nib(0.5);
        assert!((player.position() - DVec3::new(50.0, 0.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn output_nib_cannot_attach() {
        let player = Player::new(1, "t1", PlayerClass::Aircraft, "F-16C", Side::Blue);
        let nib = Nib::new(IoKind::Output, FAMILY, 1, "t1", Side::Blue);
        assert!(!player.attach_nib(nib));
        assert!(!player.has_input_nib());
    }
}
