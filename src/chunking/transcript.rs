//! Video strategy: transcript segments aggregate until the size bounds
//! are met; each chunk keeps the timestamp of its first segment.

use super::Unit;
use crate::models::TranscriptSegment;

pub(crate) fn units(segments: &[TranscriptSegment]) -> Vec<Unit> {
    segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|segment| {
            let mut unit = Unit::new(segment.text.trim().to_string());
            unit.timestamp = Some(segment.start_secs);
            unit
        })
        .collect()
}
