//! Plant image analysis: the outbound vision call and the parser for its answer.
//!
//! - [`client`]: [`AnalyzeImage`] and its OpenAI-compatible implementation [`VisionClient`]
//! - [`parser`]: [`parse`], turning the model's free text into an [`AnalysisResult`]

pub mod client;
pub mod parser;

pub use client::{AnalyzeImage, EncodedImage, VisionClient};
pub use parser::{AnalysisResult, NOT_AVAILABLE, Section, parse};
