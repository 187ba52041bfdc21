pub mod mock_connector;

pub use mock_connector::{MockConnector, MockConnectorFactory, MOCK_CONNECTOR};
