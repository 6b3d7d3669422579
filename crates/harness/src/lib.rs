pub mod classifier;
pub mod network;
pub mod peer;

pub use classifier::StaticClassifier;
pub use network::TestNetwork;
pub use peer::TestPeer;
