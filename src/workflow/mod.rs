pub mod compression_round;
pub mod round_ctx;
pub mod validation_round;

pub use compression_round::CompressionRound;
pub use round_ctx::{RoundCtx, Stage};
pub use validation_round::{SkipReason, ValidationOutcome, ValidationRound};
