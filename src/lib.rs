pub mod browser;
pub mod dom;
pub mod engine;
pub mod errors;
pub mod harness;
pub mod health;
pub mod session;
pub mod types;
pub mod value;

pub use browser::{Browser, BrowserConfig, Response};
pub use dom::{Document, Selection};
pub use engine::{new_engine, LogSink, ScriptEngine};
pub use errors::{Result, ScriptHostError};
pub use harness::{invoke, invoke_validated, CallOutcome, EntryPoint};
pub use session::{ExecutionSession, SessionConfig};
pub use types::*;
pub use value::{GuestValue, JsonIndent};
