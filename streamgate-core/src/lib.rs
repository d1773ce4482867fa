pub mod alert;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod notify;
pub mod reconcile;
mod sqlite;
pub mod worker;

pub use alert::{AlertError, AlertResult, AlertingSink, FileAlertingSink};
pub use channel::{
    cache_key_for, manifest_path_for, parse_abr_preset, AbrVariant, Assignment,
    AvailabilityWindow, ChannelError, ChannelMetadata, ChannelProvisioner,
    ChannelProvisioningRequest, ChannelProvisioningResult, ChannelResult, ChannelStatus,
    Classification, DrmKeys, GeoRestrictions, MetadataRepository, PresetError, ProvisionError,
    ProvisionResult, RetryEnvelope, SqliteMetadataStore, SqliteMetadataStoreBuilder,
    MASTER_MANIFEST_NAME,
};
pub use config::{load_streamgate_config, StreamGateConfig};
pub use engine::{EngineError, EngineResult, HttpMediaEngineClient, MediaEngineClient};
pub use error::{ConfigError, Result};
pub use event::{
    decode_upload_event, EventContext, EventError, EventResult, PubSubEnvelope,
    UploadCompletedEvent, UploadPayload, UPLOAD_COMPLETED_TYPE,
};
pub use notify::{
    HttpNotificationPublisher, NotificationPublisher, NotifyError, NotifyResult,
    PlaybackReadyNotice,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use worker::{HandlerVerdict, UploadEventWorker, WorkerError};
