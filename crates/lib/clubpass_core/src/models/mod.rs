//! Domain models shared by the HTTP and bus surfaces.

pub mod identity;
pub mod role;

pub use identity::{ClubRole, DirectoryUser, Identity, Membership};
pub use role::{PermissionTier, Role};
