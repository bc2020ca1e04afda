pub mod binarizer;
pub mod bounding_box;
pub mod differencer;
pub mod frame;
pub mod frame_buffer;
pub mod morphology;
pub mod preprocessor;
pub mod region_extractor;
