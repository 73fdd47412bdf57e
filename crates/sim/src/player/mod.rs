mod list;
mod state;

pub use list::{ListChanges, PlayerList};
pub use state::{LOCAL_NET, NetworkId, Player, PlayerId, PlayerMode, Side};
