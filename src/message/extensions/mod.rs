//! Typed views over hello extension payloads.

pub mod ec_point_formats;
pub mod heartbeat;
pub mod max_fragment_length;
pub mod server_name;
pub mod signature_algorithms;
pub mod supported_groups;
pub mod user_mapping;

pub use ec_point_formats::{ECPointFormat, ECPointFormatsExtension};
pub use heartbeat::HeartbeatExtension;
pub use max_fragment_length::MaxFragmentLengthExtension;
pub use server_name::ServerNameExtension;
pub use signature_algorithms::SignatureAlgorithmsExtension;
pub use supported_groups::SupportedGroupsExtension;
pub use user_mapping::UserMappingExtension;
