pub mod config;
pub mod models;
pub mod providers;
pub mod services;

pub use config::AppConfig;
pub use models::{AiResponse, ChatSession, Message, SessionPhase};
pub use services::{ChatEvent, ChatStore, SessionController};
