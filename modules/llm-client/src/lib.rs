pub mod mock;
pub mod ollama;
pub mod traits;
pub mod util;

pub use mock::MockClient;
pub use ollama::OllamaClient;
pub use traits::{ChatClient, ChatMessage, ChatRequest, MessageRole};
