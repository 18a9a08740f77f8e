pub mod audio;
pub mod common;
pub mod items;
pub mod session;
pub mod tools;

pub use audio::{AudioFormat, TurnDetection};
pub use common::{
    ArbitraryJson, DEFAULT_MODEL, JsonSchema, Modality, Role, Temperature, TemperatureError, Voice,
};
pub use items::{ContentPart, Item};
pub use session::{Session, SessionUpdate};
pub use tools::{Tool, ToolChoice};
