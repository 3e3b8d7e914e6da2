pub mod preprocessor;
pub mod prompts;
pub mod providers;
pub mod teaser;
pub mod upload;

pub use preprocessor::{ImagePreprocessor, PreprocessError};
pub use prompts::{PromptPair, PromptSet};
pub use providers::{MockVisionProvider, OpenAiVisionProvider, ProviderError, VisionProvider};
pub use teaser::build_teaser;
pub use upload::{TempUpload, UploadedImage};
