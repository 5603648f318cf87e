pub mod error;
pub mod planner;

pub use error::PlannerError;
pub use planner::{
    build_candidate, compatible_images, link_sibling_blocks, refresh_operation_blocks,
    select_source_image, select_target_image, Planner,
};
