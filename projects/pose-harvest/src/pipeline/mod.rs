// Video pose pipeline: geometry, decoding, dedup and the stage workers

pub mod dedup;
pub mod detection;
pub mod detection_worker;
pub mod distributor;
pub mod encode;
pub mod feature;
pub mod finalize;
pub mod geometry;
pub mod orchestrator;
pub mod overlay;
pub mod pose;
pub mod reader;
pub mod types;

#[cfg(test)]
pub mod test_support;
