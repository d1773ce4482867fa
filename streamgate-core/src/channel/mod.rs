pub mod error;
pub mod models;
pub mod provisioner;
pub mod retry;
pub mod store;

pub use error::{ChannelError, ChannelResult, PresetError, ProvisionError, ProvisionResult};
pub use models::{
    cache_key_for, manifest_path_for, parse_abr_preset, AbrVariant, Assignment,
    AvailabilityWindow, ChannelMetadata, ChannelProvisioningRequest, ChannelProvisioningResult,
    ChannelStatus, Classification, DrmKeys, GeoRestrictions, MASTER_MANIFEST_NAME,
};
pub use provisioner::ChannelProvisioner;
pub use retry::RetryEnvelope;
pub use store::{MetadataRepository, SqliteMetadataStore, SqliteMetadataStoreBuilder};
