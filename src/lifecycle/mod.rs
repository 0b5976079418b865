//! Node lifecycle: creation, deletion, idle/activate, transfer, power

pub mod addhost;
pub mod manager;
pub mod nodespec;
pub mod results;

pub use addhost::{AddHostSession, AddHostSessionRegistry};
pub use manager::{Collaborators, CreateNodeRequest, NodeManager};
pub use nodespec::NodeSpec;
pub use results::{BatchReport, NodeOutcome, NodeResult};
