pub mod ids;
pub mod message;
pub mod response;
pub mod session;

pub use message::{Message, Role};
pub use response::{AiResponse, ProviderId, Usage};
pub use session::{ChatSession, SessionPhase};
