pub mod adapter;
pub mod config;
pub mod events;
pub mod executive;
pub mod mapper;
pub mod nib;
pub mod player;
pub mod reckoning;

pub use adapter::{AdapterContext, NetAdapter};
pub use config::{ConfigError, ExecConfig};
pub use events::{EventLog, SimEvent};
pub use executive::{
    ExecStats, Executive, FRAMES_PER_CYCLE, FrameStats, FrameTimer, HandshakeGroup, IdCycle, Phase,
    PhaseProbe, Roster, SimClock, TaskHandle, TaskKind, WorkerPool, spawn_task,
};
pub use mapper::{EntityTypeCode, MapError, Ntm, NtmSet, PlayerClass, ProtocolFamily};
pub use nib::{
    Appearance, ArticulatedParts, ArticulatedValue, IoKind, MapState, MissileStation, Nib,
    NibFlags, UpdatePolicy,
};
pub use player::{
    LOCAL_NET, ListChanges, NetworkId, Player, PlayerId, PlayerList, PlayerMode, Side,
};
pub use reckoning::{
    DrAlgorithm, DrFrame, DrMatrices, DrOutput, dead_reckon, dead_reckon_with,
};
