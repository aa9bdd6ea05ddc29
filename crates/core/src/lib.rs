pub mod error;
pub mod intent;
pub mod models;
pub mod template;

pub use error::CoreError;
pub use intent::{classify, IntentClassifier, IntentScore, PatternRule};
pub use models::*;
pub use template::{escape_xml, explanation, render, render_named};
