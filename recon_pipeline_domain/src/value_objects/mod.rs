pub mod generic_id;
pub mod pipeline_id;
pub mod priority;
pub mod stage_id;

pub use generic_id::{GenericId, IdCategory};
pub use pipeline_id::PipelineId;
pub use priority::StagePriority;
pub use stage_id::StageId;
