pub mod auth;
pub mod entitlement;
mod sqlite_user_store;
mod user_manager;
pub mod user_models;
mod user_store;

pub use auth::{AuthToken, AuthTokenValue, MixtapeHasher, PasswordCredentials};
pub use entitlement::{RemainingPlays, SubscriptionStatus, INITIAL_PLAYCOUNT};
pub use sqlite_user_store::SqliteUserStore;
pub use user_manager::UserManager;
pub use user_models::{
    Playlist, PlaylistDetails, PlaylistSongsUpdate, PlaylistSummary, User, UserDetails,
    UserSummary,
};
pub use user_store::{
    EntitlementStore, FollowStore, PlaylistStore, UserAccountStore, UserAuthStore, UserStore,
};
