//! Remote UI inspection through an automation agent
//!
//! The agent exposes two websocket endpoints: `/monitor`, where an operator
//! picks a node in a running application, and `/flowtracer`, where code is run
//! against that application. [`ElementPicker`] and [`ScriptRunner`] each own
//! one socket per call. The pure halves live in [`codec`] (structure-preserving
//! result transport) and [`resolver`] (robust selectors from a picked path).

pub mod codec;
pub mod config;
pub mod console;
pub mod dom;
pub mod errors;
pub mod events;
pub mod inspect;
pub mod picker;
pub mod protocol;
pub mod resolver;
pub mod runner;
pub mod settle;
pub mod socket;

pub use codec::{DateValue, DecodedValue, RemoteValue};
pub use config::{Credentials, CredentialsProvider, Endpoint, EndpointProvider, InspectorConfig};
pub use console::{Console, HistoryEntry};
pub use dom::{node_path, DomNode};
pub use errors::InspectorError;
pub use events::EventBus;
pub use inspect::{inspect_target, select_and_inspect, HighlightSession, InspectOptions, Inspection};
pub use picker::{ElementPicker, PickerEvent, PickerState};
pub use protocol::{Placement, TargetDescriptor};
pub use resolver::{resolve, NodeEntry, PathEntry, Resolution, SelectorPath};
pub use runner::{RunnerEvent, ScriptExecutor, ScriptRunner};
