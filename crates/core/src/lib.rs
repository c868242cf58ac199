pub mod completion;
pub mod engine;
pub mod error;
pub mod pacing;
pub mod publisher;
pub mod traits;

pub use completion::*;
pub use engine::*;
pub use error::*;
pub use pacing::*;
pub use publisher::*;
pub use traits::*;
