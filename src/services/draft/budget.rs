use crate::core::error::{PipelineError, PipelineResult};

/// Words for one chapter: `total / chapters`, rounded half away from zero.
pub fn initial_target(total_words: i64, chapter_count: i64) -> PipelineResult<usize> {
    if chapter_count <= 0 {
        return Err(PipelineError::InvalidArgument(format!(
            "chapter count must be positive, got {}",
            chapter_count
        )));
    }
    let target = (total_words as f64 / chapter_count as f64).round();
    Ok(target.max(0.0) as usize)
}

/// Spreads what is left of the book over the chapters still to write.
/// Underspent chapters feed the pool; overruns drain it.
pub fn reallocate(remaining_words: i64, chapters_left: i64) -> PipelineResult<usize> {
    initial_target(remaining_words, chapters_left)
}

/// Pieces needed to reach `target_words`, never fewer than one.
pub fn pieces_for(target_words: usize, piece_size_words: usize) -> usize {
    target_words.div_ceil(piece_size_words.max(1)).max(1)
}
