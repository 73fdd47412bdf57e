use glam::{DMat3, DQuat, DVec3, EulerRot};
use serde::{Deserialize, Serialize};

/// Angular rates below this magnitude (rad/s) are treated as no rotation.
pub const MIN_ANGULAR_RATE: f64 = 1.0e-9;

const MIN_DT: f64 = 1.0e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum DrAlgorithm {
    /// Caller-supplied extrapolation; the engine reports it as unsupported.
    Other = 0,
    #[default]
    Static = 1,
    FixedPosWorld = 2,
    RotatingPosWorld = 3,
    RotatingVelWorld = 4,
    FixedVelWorld = 5,
    FixedPosBody = 6,
    RotatingPosBody = 7,
    RotatingVelBody = 8,
    FixedVelBody = 9,
}

impl From<u8> for DrAlgorithm {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Other,
            1 => Self::Static,
            2 => Self::FixedPosWorld,
            3 => Self::RotatingPosWorld,
            4 => Self::RotatingVelWorld,
            5 => Self::FixedVelWorld,
            6 => Self::FixedPosBody,
            7 => Self::RotatingPosBody,
            8 => Self::RotatingVelBody,
            9 => Self::FixedVelBody,
            _ => Self::Other,
        }
    }
}

impl DrAlgorithm {
    pub fn rotates(self) -> bool {
        matches!(
            self,
            Self::RotatingPosWorld
                | Self::RotatingVelWorld
                | Self::RotatingPosBody
                | Self::RotatingVelBody
        )
    }

    pub fn body_frame(self) -> bool {
        matches!(
            self,
            Self::FixedPosBody | Self::RotatingPosBody | Self::RotatingVelBody | Self::FixedVelBody
        )
    }
}

/// Kinematic state captured at the reckoning zero time.
///
/// Angles are aerospace Euler angles in radians, stored as
/// `(x: roll, y: pitch, z: yaw)`. Angular rates are body-axis rates in rad/s.
/// For the body-frame algorithms, velocity and acceleration are body-axis;
/// otherwise they are earth-fixed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DrFrame {
    pub position: DVec3,
    pub velocity: DVec3,
    pub acceleration: DVec3,
    pub angles: DVec3,
    pub angular_rates: DVec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrOutput {
    pub position: DVec3,
    pub angles: DVec3,
    /// False when the selector has no engine-side model (OTHER); position and
    /// angles are then the inputs unchanged and callers fall back to STATIC
    /// handling.
    pub supported: bool,
}

/// Intermediate matrices built once per anchor state: the attitude matrix
/// `R0`, the angular-rate outer product `w wT`, and the skew matrix `Omega`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrMatrices {
    pub rot0: DMat3,
    pub wwt: DMat3,
    pub omega: DMat3,
    pub rate: f64,
}

impl DrMatrices {
    pub fn new(frame: &DrFrame) -> Self {
        let w = frame.angular_rates;
        Self {
            rot0: rotation_from_angles(frame.angles),
            wwt: outer(w),
            omega: skew(w),
            rate: w.length(),
        }
    }

    /// Rodrigues rotation `exp(Omega * dt)`: the body attitude increment over
    /// `dt` seconds of constant body rates.
    fn rotation_increment(&self, dt: f64) -> DMat3 {
        if self.rate < MIN_ANGULAR_RATE {
            return DMat3::IDENTITY;
        }
        let w = self.rate;
        let wt = w * dt;
        DMat3::IDENTITY * wt.cos()
            + self.omega * (wt.sin() / w)
            + self.wwt * ((1.0 - wt.cos()) / (w * w))
    }

    /// `R1 = (1/dt) * integral of exp(Omega s) ds from 0 to dt`, the mean
    /// attitude used to carry body-axis velocity into earth coordinates.
    /// Limit for zero rate (or zero dt) is the identity.
    fn linear_correction(&self, dt: f64) -> DMat3 {
        if self.rate < MIN_ANGULAR_RATE || dt < MIN_DT {
            return DMat3::IDENTITY;
        }
        let w = self.rate;
        let wt = w * dt;
        DMat3::IDENTITY * (wt.sin() / wt)
            + self.omega * ((1.0 - wt.cos()) / (w * w * dt))
            + self.wwt * ((wt - wt.sin()) / (w * w * w * dt))
    }

    /// `R2 = (1/dt^2) * double integral of exp(Omega s)`, carrying body-axis
    /// acceleration. Limit for zero rate (or zero dt) is `I/2`, which folds
    /// the usual one-half factor of the acceleration term into the matrix.
    fn quadratic_correction(&self, dt: f64) -> DMat3 {
        if self.rate < MIN_ANGULAR_RATE || dt < MIN_DT {
            return DMat3::IDENTITY * 0.5;
        }
        let w = self.rate;
        let wt = w * dt;
        let w2 = w * w;
        let dt2 = dt * dt;
        DMat3::IDENTITY * ((1.0 - wt.cos()) / (w2 * dt2))
            + self.omega * ((wt - wt.sin()) / (w2 * w * dt2))
            + self.wwt * ((0.5 * wt * wt - 1.0 + wt.cos()) / (w2 * w2 * dt2))
    }
}

/// Extrapolates `frame` forward by `dt` seconds under `algorithm`, building
/// the intermediate matrices on the fly. Stateless and safe from any thread.
pub fn dead_reckon(algorithm: DrAlgorithm, frame: &DrFrame, dt: f64) -> DrOutput {
    dead_reckon_with(algorithm, frame, &DrMatrices::new(frame), dt)
}

/// Same as [`dead_reckon`] but reuses matrices cached since the last anchor
/// reset, so per-phase callers pay only the trig terms.
pub fn dead_reckon_with(
    algorithm: DrAlgorithm,
    frame: &DrFrame,
    matrices: &DrMatrices,
    dt: f64,
) -> DrOutput {
    let held = DrOutput {
        position: frame.position,
        angles: frame.angles,
        supported: true,
    };

    if dt <= 0.0 {
        return DrOutput {
            supported: algorithm != DrAlgorithm::Other,
            ..held
        };
    }

    let position = match algorithm {
        DrAlgorithm::Other | DrAlgorithm::Static => frame.position,
        DrAlgorithm::FixedPosWorld | DrAlgorithm::RotatingPosWorld => {
            frame.position + frame.velocity * dt
        }
        DrAlgorithm::RotatingVelWorld | DrAlgorithm::FixedVelWorld => {
            frame.position + frame.velocity * dt + frame.acceleration * (0.5 * dt * dt)
        }
        DrAlgorithm::FixedPosBody | DrAlgorithm::RotatingPosBody => {
            let r1 = matrices.linear_correction(dt);
            frame.position + matrices.rot0 * (r1 * frame.velocity) * dt
        }
        DrAlgorithm::RotatingVelBody | DrAlgorithm::FixedVelBody => {
            let r1 = matrices.linear_correction(dt);
            let r2 = matrices.quadratic_correction(dt);
            frame.position
                + matrices.rot0 * (r1 * frame.velocity * dt + r2 * frame.acceleration * dt * dt)
        }
    };

    let angles = if algorithm.rotates() && matrices.rate >= MIN_ANGULAR_RATE {
        angles_from_rotation(&(matrices.rot0 * matrices.rotation_increment(dt)))
    } else {
        frame.angles
    };

    DrOutput {
        position,
        angles,
        supported: algorithm != DrAlgorithm::Other,
    }
}

/// Body-to-earth attitude matrix from `(roll, pitch, yaw)` radians.
pub fn rotation_from_angles(angles: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_euler(EulerRot::ZYX, angles.z, angles.y, angles.x))
}

/// `(roll, pitch, yaw)` radians extracted from a body-to-earth matrix.
pub fn angles_from_rotation(rot: &DMat3) -> DVec3 {
    let (yaw, pitch, roll) = DQuat::from_mat3(rot).to_euler(EulerRot::ZYX);
    DVec3::new(roll, pitch, yaw)
}

fn skew(w: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, w.z, -w.y),
        DVec3::new(-w.z, 0.0, w.x),
        DVec3::new(w.y, -w.x, 0.0),
    )
}

fn outer(w: DVec3) -> DMat3 {
    DMat3::from_cols(w * w.x, w * w.y, w * w.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const ALL: [DrAlgorithm; 10] = [
        DrAlgorithm::Other,
        DrAlgorithm::Static,
        DrAlgorithm::FixedPosWorld,
        DrAlgorithm::RotatingPosWorld,
        DrAlgorithm::RotatingVelWorld,
        DrAlgorithm::FixedVelWorld,
        DrAlgorithm::FixedPosBody,
        DrAlgorithm::RotatingPosBody,
        DrAlgorithm::RotatingVelBody,
        DrAlgorithm::FixedVelBody,
    ];

    fn resting_frame() -> DrFrame {
        DrFrame {
            position: DVec3::new(100.0, -20.0, 3000.0),
            angles: DVec3::new(0.1, -0.2, 1.5),
            ..Default::default()
        }
    }

    #[test]
    fn at_rest_every_algorithm_holds_state() {
        let frame = resting_frame();
        for algorithm in ALL {
            for dt in [0.0, 0.25, 1.0, 60.0] {
                let out = dead_reckon(algorithm, &frame, dt);
                assert_eq!(out.position, frame.position, "{algorithm:?} dt={dt}");
                assert_eq!(out.angles, frame.angles, "{algorithm:?} dt={dt}");
            }
        }
    }

    #[test]
    fn constant_velocity_is_exact() {
        let frame = DrFrame {
            position: DVec3::new(1.0, 2.0, 3.0),
            velocity: DVec3::new(10.0, -4.0, 0.5),
            ..Default::default()
        };
        for dt in [0.0, 1.0, 10.0] {
            let out = dead_reckon(DrAlgorithm::FixedPosWorld, &frame, dt);
            let expected = frame.position + frame.velocity * dt;
            assert!((out.position - expected).length() < 1e-9, "dt={dt}");
            assert_eq!(out.angles, frame.angles);
        }
    }

    #[test]
    fn second_order_world_adds_half_a_t_squared() {
        let frame = DrFrame {
            velocity: DVec3::new(10.0, 0.0, 0.0),
            acceleration: DVec3::new(2.0, 0.0, -1.0),
            ..Default::default()
        };
        let out = dead_reckon(DrAlgorithm::FixedVelWorld, &frame, 4.0);
        let expected = frame.velocity * 4.0 + frame.acceleration * 8.0;
        assert!((out.position - expected).length() < 1e-9);
    }

    #[test]
    fn static_ignores_motion() {
        let frame = DrFrame {
            position: DVec3::ZERO,
            velocity: DVec3::new(10.0, 0.0, 0.0),
            ..Default::default()
        };
        let out = dead_reckon(DrAlgorithm::Static, &frame, 5.0);
        assert_eq!(out.position, DVec3::ZERO);
        assert!(out.supported);
    }

    #[test]
    fn other_is_flagged_unsupported() {
        let frame = DrFrame {
            velocity: DVec3::new(1.0, 1.0, 1.0),
            ..Default::default()
        };
        let out = dead_reckon(DrAlgorithm::Other, &frame, 2.0);
        assert!(!out.supported);
        assert_eq!(out.position, frame.position);
        assert_eq!(out.angles, frame.angles);
    }

    #[test]
    fn body_frame_without_rotation_matches_world() {
        // Zero attitude and zero rates: body axes coincide with earth axes,
        // so the R1 correction must collapse to the identity.
        let frame = DrFrame {
            velocity: DVec3::new(50.0, 0.0, 0.0),
            ..Default::default()
        };
        let out = dead_reckon(DrAlgorithm::FixedPosBody, &frame, 3.0);
        assert!((out.position - DVec3::new(150.0, 0.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn body_second_order_without_rotation() {
        let frame = DrFrame {
            velocity: DVec3::new(10.0, 0.0, 0.0),
            acceleration: DVec3::new(0.0, 4.0, 0.0),
            ..Default::default()
        };
        let out = dead_reckon(DrAlgorithm::RotatingVelBody, &frame, 2.0);
        let expected = DVec3::new(20.0, 8.0, 0.0);
        assert!((out.position - expected).length() < 1e-9);
    }

    #[test]
    fn constant_yaw_rate_rotates_heading() {
        let rate = 0.1;
        let frame = DrFrame {
            angular_rates: DVec3::new(0.0, 0.0, rate),
            ..Default::default()
        };
        let out = dead_reckon(DrAlgorithm::RotatingPosWorld, &frame, FRAC_PI_2 / rate);
        assert!((out.angles.z - FRAC_PI_2).abs() < 1e-9);
        assert!(out.angles.x.abs() < 1e-9);
        assert!(out.angles.y.abs() < 1e-9);
    }

    #[test]
    fn body_velocity_under_yaw_rate_curves_the_path() {
        // Forward body velocity plus a constant yaw rate traces a circle of
        // radius v/w. After a quarter turn the displacement is (r, r, 0).
        let v = 10.0;
        let w = 0.5;
        let frame = DrFrame {
            velocity: DVec3::new(v, 0.0, 0.0),
            angular_rates: DVec3::new(0.0, 0.0, w),
            ..Default::default()
        };
        let quarter_turn = FRAC_PI_2 / w;
        let out = dead_reckon(DrAlgorithm::RotatingPosBody, &frame, quarter_turn);
        let r = v / w;
        assert!((out.position - DVec3::new(r, r, 0.0)).length() < 1e-6);
        assert!((out.angles.z - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn cached_matrices_match_direct_computation() {
        let frame = DrFrame {
            position: DVec3::new(5.0, 6.0, 7.0),
            velocity: DVec3::new(1.0, 2.0, 3.0),
            acceleration: DVec3::new(0.1, 0.0, -0.1),
            angles: DVec3::new(0.2, 0.1, -0.4),
            angular_rates: DVec3::new(0.01, -0.02, 0.3),
        };
        let cached = DrMatrices::new(&frame);
        for algorithm in ALL {
            let direct = dead_reckon(algorithm, &frame, 2.5);
            let reused = dead_reckon_with(algorithm, &frame, &cached, 2.5);
            assert_eq!(direct, reused, "{algorithm:?}");
        }
    }

    #[test]
    fn wire_selector_fallback() {
        assert_eq!(DrAlgorithm::from(3), DrAlgorithm::RotatingPosWorld);
        assert_eq!(DrAlgorithm::from(42), DrAlgorithm::Other);
    }

    #[test]
    fn angle_roundtrip() {
        let angles = DVec3::new(0.3, -0.7, 2.1);
        let back = angles_from_rotation(&rotation_from_angles(angles));
        assert!((back - angles).length() < 1e-9);
    }
}
