pub mod jobs;
pub mod retention;

pub use jobs::ImportJobService;
pub use retention::RetentionService;
