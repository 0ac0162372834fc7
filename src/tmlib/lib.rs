pub mod batch;
pub mod cfg;
pub mod crop;
pub mod domain;
pub mod egui_mappers;
mod events;
pub mod file_util;
pub mod image_util;
pub mod model;
pub mod record;
pub mod result;
pub mod session;
#[cfg(test)]
mod test_helpers;
pub mod tracing_setup;
pub use batch::{BatchCfg, BatchOrchestrator, BatchSummary};
pub use domain::{BoundingBox, PtF, PtI, ShapeI, YoloBox};
pub use events::{Event, Events, KeyCode};
pub use model::AnnotatorModel;
pub use record::{MalformedRecordPolicy, RecordLine, RecordStore, SaveMode};
pub use session::{DrawState, Session, SessionEnd};
