use crate::core::outline::ChapterOutline;
use crate::services::draft::style::DraftStyle;

/// Everything a piece prompt needs to know about the chapter being drafted.
pub struct ChapterContext<'a> {
    pub genre: &'a str,
    pub act_index: usize,
    pub act_count: usize,
    pub chapter: &'a ChapterOutline,
    pub running_summary: &'a str,
    pub summary_words: usize,
    pub style: &'a DraftStyle,
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ChapterContext<'_> {
    pub fn render(&self) -> String {
        let hallmarks = if self.style.hallmarks.is_empty() {
            "(none)".to_string()
        } else {
            self.style.hallmarks.join("; ")
        };

        format!(
            "GLOBAL\n  Genre: {genre}\n  Act: {act} of {acts}\n\n\
             STYLE\n  Voice: {voice}\n  Tone: {tone}\n  Hallmarks to hint: {hallmarks}\n\n\
             RUNNING SUMMARY (last {summary_words} words)\n{summary}\n\n\
             CHAPTER {number}\nSummary:\n{chapter_summary}\nBeats:\n{beats}\nSub-plots:\n{sub_plots}",
            genre = self.genre,
            act = self.act_index + 1,
            acts = self.act_count.max(1),
            voice = self.style.voice,
            tone = self.style.preferred_tone,
            hallmarks = hallmarks,
            summary_words = self.summary_words,
            summary = self.running_summary,
            number = self.chapter.number,
            chapter_summary = self.chapter.summary,
            beats = bullet_list(&self.chapter.beats),
            sub_plots = bullet_list(&self.chapter.sub_plots),
        )
    }
}
