pub mod guard;
pub mod playlist;
pub mod providers;

pub use guard::DependencyGuard;
pub use playlist::{BuiltPlaylist, PlaylistBuilder, PlaylistService};
pub use providers::{MusicCatalog, SpotifyProvider};
