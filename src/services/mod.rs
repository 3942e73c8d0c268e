pub mod pipeline;

pub use pipeline::ActivityPipeline;
