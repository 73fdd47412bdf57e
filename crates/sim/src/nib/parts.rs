use crate::mapper::EntityTypeCode;

const VALUE_EPSILON: f64 = 1.0e-6;

/// One articulated value plus its change counter. The counter advances only
/// when the value actually moves, so consumers detect retransmit work by
/// comparing counters instead of polling values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArticulatedValue {
    value: f64,
    change_count: u16,
}

impl ArticulatedValue {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn change_count(&self) -> u16 {
        self.change_count
    }

    /// Returns true when the stored value (and the counter) changed.
    pub fn set(&mut self, value: f64) -> bool {
        if (value - self.value).abs() < VALUE_EPSILON {
            return false;
        }
        self.value = value;
        self.change_count = self.change_count.wrapping_add(1);
        true
    }
}

/// A weapon station: which munition is mounted and whether it is still
/// attached. Detaching (release) and re-arming both count as changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissileStation {
    entity_type: EntityTypeCode,
    attached: bool,
    change_count: u16,
}

impl MissileStation {
    pub fn new(entity_type: EntityTypeCode) -> Self {
        Self {
            entity_type,
            attached: true,
            change_count: 0,
        }
    }

    pub fn entity_type(&self) -> EntityTypeCode {
        self.entity_type
    }

    pub fn attached(&self) -> bool {
        self.attached
    }

    pub fn change_count(&self) -> u16 {
        self.change_count
    }

    pub fn set_attached(&mut self, attached: bool) -> bool {
        if attached == self.attached {
            return false;
        }
        self.attached = attached;
        self.change_count = self.change_count.wrapping_add(1);
        true
    }

    pub fn rearm(&mut self, entity_type: EntityTypeCode) -> bool {
        if self.attached && entity_type == self.entity_type {
            return false;
        }
        self.entity_type = entity_type;
        self.attached = true;
        self.change_count = self.change_count.wrapping_add(1);
        true
    }
}

/// Articulated-part block of one NIB: control surfaces and stores whose
/// state is tracked independently of the entity's gross kinematics.
#[derive(Debug, Clone, Default)]
pub struct ArticulatedParts {
    wing_sweep: ArticulatedValue,
    landing_gear: ArticulatedValue,
    bay_door: ArticulatedValue,
    launcher_elevation: ArticulatedValue,
    missiles: Vec<MissileStation>,
}

impl ArticulatedParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wing_sweep(&self) -> &ArticulatedValue {
        &self.wing_sweep
    }

    pub fn landing_gear(&self) -> &ArticulatedValue {
        &self.landing_gear
    }

    pub fn bay_door(&self) -> &ArticulatedValue {
        &self.bay_door
    }

    pub fn launcher_elevation(&self) -> &ArticulatedValue {
        &self.launcher_elevation
    }

    pub fn set_wing_sweep(&mut self, radians: f64) -> bool {
        self.wing_sweep.set(radians)
    }

    /// Gear position in [0, 1]: 0 = up and locked, 1 = down and locked.
    pub fn set_landing_gear(&mut self, position: f64) -> bool {
        self.landing_gear.set(position.clamp(0.0, 1.0))
    }

    pub fn set_bay_door(&mut self, position: f64) -> bool {
        self.bay_door.set(position.clamp(0.0, 1.0))
    }

    pub fn set_launcher_elevation(&mut self, radians: f64) -> bool {
        self.launcher_elevation.set(radians)
    }

    pub fn add_missile_station(&mut self, entity_type: EntityTypeCode) -> usize {
        self.missiles.push(MissileStation::new(entity_type));
        self.missiles.len() - 1
    }

    pub fn missile_stations(&self) -> &[MissileStation] {
        &self.missiles
    }

    pub fn missile_station_mut(&mut self, index: usize) -> Option<&mut MissileStation> {
        self.missiles.get_mut(index)
    }

    /// Sum of all part counters; cheap dirty check for a whole-block scan.
    pub fn total_change_count(&self) -> u32 {
        let fixed = [
            &self.wing_sweep,
            &self.landing_gear,
            &self.bay_door,
            &self.launcher_elevation,
        ];
        let mut total: u32 = fixed.iter().map(|v| v.change_count() as u32).sum();
        for station in &self.missiles {
            total = total.wrapping_add(station.change_count() as u32);
        }
        total
    }
}
