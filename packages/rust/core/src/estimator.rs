//! Duration estimate from script length, used whenever no measured duration exists.

/// Whitespace-separated words in `script`.
pub fn word_count(script: &str) -> usize {
    script.split_whitespace().count()
}

/// `round(words / words_per_minute * 60)` seconds.
pub fn estimate_duration_secs(script: &str, words_per_minute: u32) -> u32 {
    let wpm = f64::from(words_per_minute.max(1));
    let secs = word_count(script) as f64 / wpm * 60.0;
    secs.round() as u32
}
