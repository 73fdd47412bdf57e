use serde::{Deserialize, Serialize};

use crate::nib::Nib;

/// A network family's declared enumeration ranges for entity-type codes.
/// Codes are validated against these limits before they are accepted
/// anywhere; two families with the same `id` are the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolFamily {
    pub id: u8,
    pub kind_limit: u8,
    pub domain_limit: u8,
}

impl ProtocolFamily {
    pub const fn new(id: u8, kind_limit: u8, domain_limit: u8) -> Self {
        Self {
            id,
            kind_limit,
            domain_limit,
        }
    }

    pub fn accepts(&self, code: &EntityTypeCode) -> bool {
        code.kind <= self.kind_limit && code.domain <= self.domain_limit
    }
}

/// Wire-level entity-type tuple. The trailing three fields default to zero
/// and act as wildcards during input-direction matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntityTypeCode {
    pub kind: u8,
    pub domain: u8,
    pub country: u16,
    pub category: u8,
    pub subcategory: u8,
    pub specific: u8,
    pub extra: u8,
}

impl EntityTypeCode {
    pub const fn new(kind: u8, domain: u8, country: u16, category: u8) -> Self {
        Self {
            kind,
            domain,
            country,
            category,
            subcategory: 0,
            specific: 0,
            extra: 0,
        }
    }

    pub const fn with_detail(mut self, subcategory: u8, specific: u8, extra: u8) -> Self {
        self.subcategory = subcategory;
        self.specific = specific;
        self.extra = extra;
        self
    }

    fn fields(&self) -> [u16; 7] {
        [
            self.kind as u16,
            self.domain as u16,
            self.country,
            self.category as u16,
            self.subcategory as u16,
            self.specific as u16,
            self.extra as u16,
        ]
    }

    /// Number of leading fields of `self` that match `target`, where a zero
    /// field in `self` past the first mismatch ends the comparison. A
    /// template code with trailing zeros therefore matches any refinement.
    fn prefix_specificity(&self, target: &EntityTypeCode) -> Option<u8> {
        let mine = self.fields();
        let theirs = target.fields();
        let mut matched = 0u8;
        for (a, b) in mine.iter().zip(theirs.iter()) {
            if a == b {
                matched += 1;
            } else if *a == 0 {
                break;
            } else {
                return None;
            }
        }
        Some(matched)
    }
}

/// Closed player-type taxonomy used for template matching. `parent` links
/// replace the class hierarchy of a reflective object system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerClass {
    Player,
    AirVehicle,
    Aircraft,
    Helicopter,
    GroundVehicle,
    Tank,
    Ship,
    Weapon,
    Missile,
    Bomb,
    LifeForm,
    SpaceVehicle,
}

impl PlayerClass {
    pub fn parent(self) -> Option<PlayerClass> {
        match self {
            Self::Player => None,
            Self::AirVehicle
            | Self::GroundVehicle
            | Self::Ship
            | Self::Weapon
            | Self::LifeForm
            | Self::SpaceVehicle => Some(Self::Player),
            Self::Aircraft | Self::Helicopter => Some(Self::AirVehicle),
            Self::Tank => Some(Self::GroundVehicle),
            Self::Missile | Self::Bomb => Some(Self::Weapon),
        }
    }

    pub fn is_a(self, ancestor: PlayerClass) -> bool {
        self.distance_to(ancestor).is_some()
    }

    /// Number of parent hops from `self` up to `ancestor`; 0 for the exact
    /// class, None when `ancestor` is not on the chain.
    pub fn distance_to(self, ancestor: PlayerClass) -> Option<u8> {
        let mut current = self;
        let mut hops = 0u8;
        loop {
            if current == ancestor {
                return Some(hops);
            }
            current = current.parent()?;
            hops += 1;
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MapError {
    #[error("entity kind {kind} exceeds family limit {limit}")]
    KindOutOfRange { kind: u8, limit: u8 },
    #[error("entity domain {domain} exceeds family limit {limit}")]
    DomainOutOfRange { domain: u8, limit: u8 },
    #[error("template type string is empty")]
    EmptyTypeString,
}

/// One network-type-mapper template: associates an example player (class +
/// free-form type string) with a wire entity-type code of one family.
#[derive(Debug, Clone)]
pub struct Ntm {
    family: ProtocolFamily,
    entity_type: EntityTypeCode,
    template_class: PlayerClass,
    template_type: String,
}

impl Ntm {
    pub fn new(
        family: ProtocolFamily,
        template_class: PlayerClass,
        template_type: &str,
        entity_type: EntityTypeCode,
    ) -> Result<Self, MapError> {
        if entity_type.kind > family.kind_limit {
            return Err(MapError::KindOutOfRange {
                kind: entity_type.kind,
                limit: family.kind_limit,
            });
        }
        if entity_type.domain > family.domain_limit {
            return Err(MapError::DomainOutOfRange {
                domain: entity_type.domain,
                limit: family.domain_limit,
            });
        }
        if template_type.is_empty() {
            return Err(MapError::EmptyTypeString);
        }
        Ok(Self {
            family,
            entity_type,
            template_class,
            template_type: template_type.to_owned(),
        })
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn entity_type(&self) -> EntityTypeCode {
        self.entity_type
    }

    pub fn template_class(&self) -> PlayerClass {
        self.template_class
    }

    pub fn template_type(&self) -> &str {
        &self.template_type
    }

    /// Writes this template's entity-type code onto a NIB being prepared for
    /// transmission. Fails when the NIB belongs to a different network family
    /// or has already been ruled invalid.
    pub fn copy_entity_type(&self, nib: &mut Nib) -> bool {
        if nib.family() != self.family {
            log::debug!(
                "ntm {:?}: family mismatch for nib {}",
                self.template_type,
                nib.player_id()
            );
            return false;
        }
        nib.set_entity_type(self.entity_type)
    }

    /// Output-direction score against a candidate player. The template class
    /// must be the candidate's class or an ancestor of it, and the template
    /// type string must be a case-sensitive prefix of the candidate's.
    fn output_score(&self, class: PlayerClass, type_string: &str) -> Option<MatchScore> {
        let class_distance = class.distance_to(self.template_class)?;
        if !type_string.starts_with(self.template_type.as_str()) {
            return None;
        }
        Some(MatchScore {
            class_distance,
            prefix_len: self.template_type.len(),
        })
    }
}

/// Higher is better: exact class beats subclass, longer prefix beats shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MatchScore {
    class_distance: u8,
    prefix_len: usize,
}

impl MatchScore {
    fn beats(&self, other: &MatchScore) -> bool {
        if self.class_distance != other.class_distance {
            return self.class_distance < other.class_distance;
        }
        self.prefix_len > other.prefix_len
    }
}

/// Ordered template list for one direction of one adapter. Declaration
/// order breaks ties, first wins.
#[derive(Debug, Default)]
pub struct NtmSet {
    templates: Vec<Ntm>,
}

impl NtmSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ntm: Ntm) {
        self.templates.push(ntm);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Best template for publishing a local player to the network, or None
    /// when the player is unmapped and must not be transmitted.
    pub fn best_match_output(&self, class: PlayerClass, type_string: &str) -> Option<&Ntm> {
        let mut best: Option<(&Ntm, MatchScore)> = None;
        for ntm in &self.templates {
            if let Some(score) = ntm.output_score(class, type_string) {
                match &best {
                    Some((_, held)) if !score.beats(held) => {}
                    _ => best = Some((ntm, score)),
                }
            }
        }
        best.map(|(ntm, _)| ntm)
    }

    /// Best template for an incoming wire code, by most-specific field
    /// prefix, or None when the entity is unmapped and must not be
    /// instantiated.
    pub fn best_match_input(&self, code: &EntityTypeCode) -> Option<&Ntm> {
        let mut best: Option<(&Ntm, u8)> = None;
        for ntm in &self.templates {
            if let Some(specificity) = ntm.entity_type.prefix_specificity(code) {
                match &best {
                    Some((_, held)) if specificity <= *held => {}
                    _ => best = Some((ntm, specificity)),
                }
            }
        }
        best.map(|(ntm, _)| ntm)
    }
}
