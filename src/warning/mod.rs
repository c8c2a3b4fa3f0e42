//! Weather warnings: ingestion, asset matching and notifications

pub mod ingest;
pub mod model;
pub mod notifier;
pub mod templates;

pub use ingest::WarningIngestor;
pub use model::{
    Asset, AssetHolder, Channel, DeliveryStatus, IngestReport, NotificationKey,
    NotificationRecord, SkipReason, Warning,
};
pub use notifier::{Dispatcher, LogDispatcher, MemoryDispatcher, Notifier, OutboundMessage, SendLog};
pub use templates::{TemplateConfig, TemplateRegistry};
