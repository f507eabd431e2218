pub mod gemini;
pub mod media;
pub mod prompt;

pub use gemini::{GeminiClient, GeminiSettings};
pub use media::ImageFile;
pub use prompt::ChatRequest;
