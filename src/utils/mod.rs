pub mod logging;
pub mod text_metrics;

pub use text_metrics::{count_visible_chars, detect_language, strip_markup, Language};
