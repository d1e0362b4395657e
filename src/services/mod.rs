pub mod database;
pub mod response;
pub mod session;
pub mod settings;
pub mod storage;
pub mod store;
pub mod streaming;
pub mod title;

pub use database::Database;
pub use response::{ResponseError, ResponseOptions, ResponseService};
pub use session::SessionController;
pub use settings::{AppSettings, ResponseSource, SettingsService};
pub use storage::KeyValueStore;
pub use store::{ChatEvent, ChatStore};
pub use streaming::{StreamOutcome, StreamingConfig, StreamingEngine};
pub use title::{generate_basic_title, TitleGenerator};
