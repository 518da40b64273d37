use std::time::Duration;

use supportline_core::config::StreamingConfig;
use supportline_core::domain::chunk::{Granularity, ResponseChunk};
use supportline_core::domain::tool::{is_listing_entry, line_indent, listing_indent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    pub char_threshold: usize,
    pub word_threshold: usize,
    pub char_delay: Duration,
    pub word_delay: Duration,
    pub line_delay: Duration,
    pub max_items_display: usize,
    pub truncation_enabled: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            char_threshold: 200,
            word_threshold: 1000,
            char_delay: Duration::from_millis(40),
            word_delay: Duration::from_millis(80),
            line_delay: Duration::from_millis(100),
            max_items_display: 8,
            truncation_enabled: true,
        }
    }
}

impl From<&StreamingConfig> for StreamSettings {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            char_threshold: config.char_threshold,
            word_threshold: config.word_threshold,
            char_delay: Duration::from_millis(config.char_delay_ms),
            word_delay: Duration::from_millis(config.word_delay_ms),
            line_delay: Duration::from_millis(config.line_delay_ms),
            max_items_display: config.max_items_display,
            truncation_enabled: config.truncation_enabled,
        }
    }
}

impl StreamSettings {
    pub fn without_delays(mut self) -> Self {
        self.char_delay = Duration::ZERO;
        self.word_delay = Duration::ZERO;
        self.line_delay = Duration::ZERO;
        self
    }
}

/// Re-chunks a finished response for incremental delivery.
#[derive(Clone, Debug, Default)]
pub struct StreamEmitter {
    settings: StreamSettings,
}

impl StreamEmitter {
    pub fn new(settings: StreamSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Truncates oversized listings. Runs before any chunking.
    pub fn prepare(&self, text: &str) -> String {
        if self.settings.truncation_enabled {
            truncate_listing(text, self.settings.max_items_display)
        } else {
            text.to_string()
        }
    }

    pub fn granularity_for(&self, text: &str) -> Granularity {
        let length = text.chars().count();
        if length <= self.settings.char_threshold {
            Granularity::Character
        } else if length <= self.settings.word_threshold {
            Granularity::Word
        } else {
            Granularity::Line
        }
    }

    pub fn pacing(&self, granularity: Granularity) -> Duration {
        match granularity {
            Granularity::Character => self.settings.char_delay,
            Granularity::Word => self.settings.word_delay,
            Granularity::Line => self.settings.line_delay,
        }
    }

    /// Fresh, lazy chunk sequence for one response.
    pub fn emit(&self, text: &str) -> ChunkStream {
        let prepared = self.prepare(text);
        let granularity = self.granularity_for(&prepared);
        ChunkStream { text: prepared, granularity, cursor: 0, sequence: 0, finished: false }
    }
}

/// Ordered chunks of one prepared response. The last item is the only one
/// with `is_final` set; an empty response yields a single empty final chunk.
#[derive(Clone, Debug)]
pub struct ChunkStream {
    text: String,
    granularity: Granularity,
    cursor: usize,
    sequence: u64,
    finished: bool,
}

impl ChunkStream {
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Iterator for ChunkStream {
    type Item = ResponseChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let rest = &self.text[self.cursor..];
        let span = match self.granularity {
            Granularity::Character => rest.chars().next().map(char::len_utf8).unwrap_or(0),
            Granularity::Word => word_span(rest),
            Granularity::Line => line_span(rest),
        };

        let fragment = rest[..span].to_string();
        self.cursor += span;
        let is_final = self.cursor >= self.text.len();
        self.finished = is_final;

        let chunk = ResponseChunk { sequence: self.sequence, text: fragment, is_final };
        self.sequence += 1;
        Some(chunk)
    }
}

/// Leading whitespace, one word, then the whitespace that follows it.
fn word_span(rest: &str) -> usize {
    let leading = rest.len() - rest.trim_start().len();
    let after_leading = &rest[leading..];
    let word = after_leading.find(char::is_whitespace).unwrap_or(after_leading.len());
    let after_word = &after_leading[word..];
    let trailing = after_word.len() - after_word.trim_start().len();
    leading + word + trailing
}

fn line_span(rest: &str) -> usize {
    rest.find('\n').map(|index| index + 1).unwrap_or(rest.len())
}

/// Keeps the first `max_items` listing entries and replaces the rest with a
/// remainder note. Entries are the list lines at the depth of the first one;
/// deeper lines are details and travel with their entry. Details and blank
/// lines of hidden entries are dropped with them.
pub fn truncate_listing(text: &str, max_items: usize) -> String {
    let Some(indent) = listing_indent(text) else {
        return text.to_string();
    };
    let total = text.lines().filter(|line| is_listing_entry(line, indent)).count();
    if total <= max_items {
        return text.to_string();
    }

    let hidden = total - max_items;
    let mut kept: Vec<String> = Vec::new();
    let mut seen = 0_usize;
    let mut dropping = false;
    let mut noted = false;

    for line in text.lines() {
        if is_listing_entry(line, indent) {
            seen += 1;
            if seen <= max_items {
                dropping = false;
                kept.push(line.to_string());
                continue;
            }
            if !noted {
                kept.push(format!("... and {hidden} more available."));
                noted = true;
            }
            dropping = true;
            continue;
        }

        if dropping {
            if line.trim().is_empty() || line_indent(line) > indent {
                continue;
            }
            dropping = false;
            kept.push(String::new());
        }
        kept.push(line.to_string());
    }

    let mut truncated = kept.join("\n");
    if text.ends_with('\n') {
        truncated.push('\n');
    }
    truncated
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use supportline_core::domain::chunk::{Granularity, ResponseChunk};

    use super::{truncate_listing, StreamEmitter, StreamSettings};

    fn emitter() -> StreamEmitter {
        StreamEmitter::new(StreamSettings::default())
    }

    fn concat(chunks: &[ResponseChunk]) -> String {
        chunks.iter().map(|chunk| chunk.text.as_str()).collect()
    }

    fn assert_well_formed(chunks: &[ResponseChunk]) {
        assert!(!chunks.is_empty());
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, index as u64);
        }
        assert_eq!(chunks.iter().filter(|chunk| chunk.is_final).count(), 1);
        assert!(chunks.last().map(|chunk| chunk.is_final).unwrap_or(false));
    }

    fn listing(count: usize) -> String {
        let mut text = format!("Found {count} products:\n");
        for index in 1..=count {
            text.push_str(&format!("- [P{index:03}] Gaming Laptop {index} - $1{index:03}\n"));
        }
        text
    }

    #[test]
    fn short_text_streams_per_character() {
        let text = "Héllo ☕ there";
        let chunks: Vec<_> = emitter().emit(text).collect();

        assert_well_formed(&chunks);
        assert_eq!(chunks.len(), text.chars().count());
        assert_eq!(concat(&chunks), text);
    }

    #[test]
    fn empty_text_yields_single_final_chunk() {
        let chunks: Vec<_> = emitter().emit("").collect();
        let expected = ResponseChunk { sequence: 0, text: String::new(), is_final: true };
        assert_eq!(chunks, vec![expected]);
    }

    #[test]
    fn medium_text_streams_on_word_boundaries() {
        let paragraph = "  Here are some suggestions for your new setup.\n\nA monitor arm helps. ";
        let text = paragraph.repeat(6);
        let stream = emitter().emit(&text);
        assert_eq!(stream.granularity(), Granularity::Word);

        let chunks: Vec<_> = stream.collect();
        assert_well_formed(&chunks);
        assert_eq!(concat(&chunks), text);
        for chunk in &chunks {
            let word = chunk.text.trim();
            assert!(!word.is_empty());
            assert!(!word.contains(char::is_whitespace), "partial word chunk {:?}", chunk.text);
        }
    }

    #[test]
    fn long_text_streams_per_line() {
        let text = "This line is exactly long enough to matter for the test.\n".repeat(20);
        let stream = emitter().emit(&text);
        assert_eq!(stream.granularity(), Granularity::Line);

        let chunks: Vec<_> = stream.collect();
        assert_well_formed(&chunks);
        assert_eq!(chunks.len(), 20);
        assert_eq!(concat(&chunks), text);
    }

    #[test]
    fn threshold_boundaries_are_inclusive() {
        let emitter = emitter();
        assert_eq!(emitter.granularity_for(&"a".repeat(200)), Granularity::Character);
        assert_eq!(emitter.granularity_for(&"a".repeat(201)), Granularity::Word);
        assert_eq!(emitter.granularity_for(&"a".repeat(1000)), Granularity::Word);
        assert_eq!(emitter.granularity_for(&"a".repeat(1001)), Granularity::Line);
    }

    #[test]
    fn oversized_listing_is_truncated_before_chunking() {
        let text = listing(12);
        let stream = emitter().emit(&text);
        let prepared = stream.text().to_string();

        assert_eq!(prepared.lines().filter(|line| line.starts_with("- [")).count(), 8);
        assert!(prepared.contains("[P008]"));
        assert!(!prepared.contains("[P009]"));
        assert!(prepared.contains("... and 4 more available."));

        let chunks: Vec<_> = stream.collect();
        assert_well_formed(&chunks);
        assert_eq!(concat(&chunks), prepared);
    }

    #[test]
    fn truncation_keeps_trailing_text_and_drops_hidden_details() {
        let text = "Orders:\n1. Laptop\n   shipped\n2. Mouse\n   pending\n3. Dock\n   pending\n\n\
                    Need anything else?";
        let truncated = truncate_listing(text, 1);
        assert_eq!(
            truncated,
            "Orders:\n1. Laptop\n   shipped\n... and 2 more available.\n\nNeed anything else?"
        );
    }

    #[test]
    fn nested_details_do_not_count_as_entries() {
        let text = "Found 3 products:\n1. Laptop A\n   - 16GB RAM\n   - $1,499\n\
                    2. Laptop B\n   - 32GB RAM\n   - $2,199\n\
                    3. Laptop C\n   - 8GB RAM\n   - $999\n";

        assert_eq!(emitter().prepare(text), text);
    }

    #[test]
    fn truncation_keeps_details_of_shown_entries_only() {
        let text = "1. Laptop A\n   - 16GB RAM\n2. Laptop B\n   - 32GB RAM\n\
                    3. Laptop C\n   - 8GB RAM\n4. Laptop D\n   - 64GB RAM\nWant details?\n";

        assert_eq!(
            truncate_listing(text, 2),
            "1. Laptop A\n   - 16GB RAM\n2. Laptop B\n   - 32GB RAM\n\
             ... and 2 more available.\n\nWant details?\n"
        );
    }

    #[test]
    fn indented_listing_counts_entries_at_its_own_depth() {
        let text = "Orders:\n  - ORD-1\n      shipped\n  - ORD-2\n  - ORD-3\n";

        assert_eq!(truncate_listing(text, 3), text);
        assert_eq!(
            truncate_listing(text, 1),
            "Orders:\n  - ORD-1\n      shipped\n... and 2 more available.\n"
        );
    }

    #[test]
    fn truncation_can_be_disabled() {
        let settings = StreamSettings { truncation_enabled: false, ..StreamSettings::default() };
        let text = listing(12);
        assert_eq!(StreamEmitter::new(settings).prepare(&text), text);
        assert_eq!(truncate_listing(&listing(8), 8), listing(8));
    }

    #[test]
    fn pacing_follows_granularity() {
        let emitter = emitter();
        assert_eq!(emitter.pacing(Granularity::Character), Duration::from_millis(40));
        assert_eq!(emitter.pacing(Granularity::Word), Duration::from_millis(80));
        assert_eq!(emitter.pacing(Granularity::Line), Duration::from_millis(100));

        let quiet = StreamEmitter::new(StreamSettings::default().without_delays());
        assert_eq!(quiet.pacing(Granularity::Line), Duration::ZERO);
    }

    #[test]
    fn each_emit_is_a_fresh_sequence() {
        let emitter = emitter();
        let first: Vec<_> = emitter.emit("hi").collect();
        let second: Vec<_> = emitter.emit("hi").collect();
        assert_eq!(first, second);
        assert_eq!(first[0].sequence, 0);
    }
}
