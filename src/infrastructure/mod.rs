pub mod chain_session;
pub mod device;
pub mod event_bus;
pub mod logging;
pub mod multisig_indexer;

pub use chain_session::{ChainConnector, ChainSession, SessionGuard};
pub use device::{DeviceError, SigningDevice};
pub use event_bus::{EventBus, InMemoryEventBus, MigrationEvent};
pub use multisig_indexer::MultisigIndexer;
