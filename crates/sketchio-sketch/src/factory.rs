//! Sketch construction by kind

use crate::bloom::BloomFilter;
use crate::count_min::CountMinSketch;
use crate::dict::Dict;
use crate::hyperloglog::HyperLogLog;
use crate::sketch::Sketch;
use crate::topk::TopK;
use sketchio_common::{Result, SketchInfo, SketchKind};

/// Build an empty sketch for `info`, writing default sizing properties back
/// into it
pub fn new_sketch(info: &mut SketchInfo) -> Result<Box<dyn Sketch>> {
    let sketch: Box<dyn Sketch> = match info.kind {
        SketchKind::Bloom => Box::new(BloomFilter::from_info(info)?),
        SketchKind::CountMin => Box::new(CountMinSketch::from_info(info)?),
        SketchKind::HyperLogLog => Box::new(HyperLogLog::from_info(info)?),
        SketchKind::TopK => Box::new(TopK::from_info(info)?),
        SketchKind::Dict => Box::new(Dict::new()),
    };
    Ok(sketch)
}

/// Restore a sketch of `info.kind` from its marshalled state
pub fn unmarshal(info: &SketchInfo, data: &[u8]) -> Result<Box<dyn Sketch>> {
    let sketch: Box<dyn Sketch> = match info.kind {
        SketchKind::Bloom => Box::new(BloomFilter::unmarshal(data)?),
        SketchKind::CountMin => Box::new(CountMinSketch::unmarshal(data)?),
        SketchKind::HyperLogLog => Box::new(HyperLogLog::unmarshal(data)?),
        SketchKind::TopK => Box::new(TopK::unmarshal(data)?),
        SketchKind::Dict => Box::new(Dict::unmarshal(data)?),
    };
    Ok(sketch)
}
