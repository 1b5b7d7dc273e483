use crate::error::IngestError;
use crate::models::{Chunk, ChunkType};
use regex::Regex;

const DEFAULT_MAX_CHARS: usize = 800;
const DEFAULT_COMBINE_UNDER_CHARS: usize = 100;
const MAX_TITLE_CHARS: usize = 80;
const PARAGRAPH_SEPARATOR: &str = "\n\n";

const NUMBERED_HEADING_PATTERN: &str = r"(?i)^(?:(?:article|section|clause|schedule|exhibit|annex|appendix|part)\s+[0-9ivxlc]+(?:\.\d+)*[.:)]?|\d+(?:\.\d+)*[.)]?)\s+\S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Hard upper bound on chunk length, in characters.
    pub max_chars: usize,
    /// Soft bound: once a chunk grows past this, the next element opens a new chunk.
    pub new_after_chars: usize,
    /// Chunks shorter than this are folded into a neighbour when it fits.
    pub combine_under_chars: usize,
}

impl ChunkingConfig {
    pub fn for_max_chars(max_chars: usize) -> Self {
        Self {
            max_chars,
            new_after_chars: max_chars * 8 / 10,
            combine_under_chars: DEFAULT_COMBINE_UNDER_CHARS,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.new_after_chars > self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "new_after_chars {} exceeds max_chars {}",
                self.new_after_chars, self.max_chars
            )));
        }
        if self.combine_under_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "combine_under_chars {} must be below max_chars {}",
                self.combine_under_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::for_max_chars(DEFAULT_MAX_CHARS)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Element {
    Title(String),
    Text(String),
}

impl Element {
    fn text(&self) -> &str {
        match self {
            Element::Title(text) | Element::Text(text) => text,
        }
    }

    fn is_title(&self) -> bool {
        matches!(self, Element::Title(_))
    }
}

#[derive(Debug, Default)]
struct Draft {
    text: String,
    length: usize,
    opens_on_title: bool,
}

impl Draft {
    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn append(&mut self, piece: &str) {
        if !self.text.is_empty() {
            self.text.push_str(PARAGRAPH_SEPARATOR);
            self.length += PARAGRAPH_SEPARATOR.len();
        }
        self.text.push_str(piece);
        self.length += char_len(piece);
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits extracted text into numbered chunks, opening a new chunk at every
/// detected title and closing chunks on the configured size bounds.
pub fn chunk_text(
    text: &str,
    source_file: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;
    let heading_re = Regex::new(NUMBERED_HEADING_PATTERN)?;

    let elements = partition(text, &heading_re);
    let drafts = assemble(&elements, config);
    let drafts = combine_small(drafts, config);

    if drafts.is_empty() {
        return Err(IngestError::EmptyChunking(source_file.to_string()));
    }

    let total_chunks = drafts.len() as u32;
    Ok(drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| Chunk {
            content: draft.text,
            source_file: source_file.to_string(),
            chunk_id: index as u32 + 1,
            total_chunks,
            chunk_type: if draft.opens_on_title {
                ChunkType::TitleBased
            } else {
                ChunkType::SizeBased
            },
        })
        .collect())
}

fn partition(text: &str, heading_re: &Regex) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut elements);
            continue;
        }

        if is_title(trimmed, heading_re) {
            flush_paragraph(&mut paragraph, &mut elements);
            elements.push(Element::Title(normalize_whitespace(trimmed)));
            continue;
        }

        paragraph.push(trimmed);
    }
    flush_paragraph(&mut paragraph, &mut elements);

    elements
}

fn flush_paragraph(paragraph: &mut Vec<&str>, elements: &mut Vec<Element>) {
    if paragraph.is_empty() {
        return;
    }
    let joined = normalize_whitespace(&paragraph.join(" "));
    if !joined.is_empty() {
        elements.push(Element::Text(joined));
    }
    paragraph.clear();
}

fn is_title(line: &str, heading_re: &Regex) -> bool {
    if char_len(line) > MAX_TITLE_CHARS {
        return false;
    }
    if line.ends_with(['.', ',', ';']) {
        return false;
    }
    if heading_re.is_match(line) {
        return true;
    }

    let letters: Vec<char> = line.chars().filter(|ch| ch.is_alphabetic()).collect();
    letters.len() >= 2
        && letters.iter().all(|ch| ch.is_uppercase())
        && line.split_whitespace().count() <= 10
}

fn assemble(elements: &[Element], config: ChunkingConfig) -> Vec<Draft> {
    let mut drafts = Vec::new();
    let mut current = Draft::default();

    for element in elements {
        for (position, piece) in split_to_fit(element.text(), config.max_chars)
            .into_iter()
            .enumerate()
        {
            let opens_section = element.is_title() && position == 0;
            let piece_len = char_len(&piece);

            if !current.is_empty() {
                let overflows =
                    current.length + PARAGRAPH_SEPARATOR.len() + piece_len > config.max_chars;
                if opens_section || current.length > config.new_after_chars || overflows {
                    drafts.push(std::mem::take(&mut current));
                }
            }

            if current.is_empty() {
                current.opens_on_title = opens_section;
            }
            current.append(&piece);
        }
    }

    if !current.is_empty() {
        drafts.push(current);
    }

    drafts
}

fn combine_small(drafts: Vec<Draft>, config: ChunkingConfig) -> Vec<Draft> {
    let mut combined: Vec<Draft> = Vec::with_capacity(drafts.len());

    for draft in drafts {
        if let Some(previous) = combined.last_mut() {
            let either_small = previous.length < config.combine_under_chars
                || draft.length < config.combine_under_chars;
            let fits =
                previous.length + PARAGRAPH_SEPARATOR.len() + draft.length <= config.max_chars;
            if either_small && fits {
                previous.append(&draft.text);
                continue;
            }
        }
        combined.push(draft);
    }

    combined
}

/// Cuts a single element into pieces no longer than `max_chars`, preferring
/// word boundaries and hard-splitting words that are longer than the limit.
fn split_to_fit(text: &str, max_chars: usize) -> Vec<String> {
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = char_len(word);

        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for window in chars.chunks(max_chars) {
                pieces.push(window.iter().collect());
            }
            continue;
        }

        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            pieces.push(std::mem::replace(&mut current, word.to_string()));
            current_len = word_len;
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_whitespace(text: &str) -> String {
        text.chars().filter(|ch| !ch.is_whitespace()).collect()
    }

    fn sample_contract() -> String {
        let mut text = String::from("MASTER SERVICES AGREEMENT\n\n");
        for section in 1..=6 {
            text.push_str(&format!("{section}. Obligations of the Parties\n"));
            for sentence in 0..5 {
                text.push_str(&format!(
                    "The Supplier shall deliver item {section}-{sentence} within thirty days of the purchase order and the Customer shall pay the invoice within sixty days of receipt.\n"
                ));
            }
            text.push('\n');
        }
        text.push_str("Either party may terminate this Agreement with ninety days written notice.\n");
        text
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn chunks_are_numbered_and_share_total() -> Result<(), Box<dyn std::error::Error>> {
        let chunks = chunk_text(&sample_contract(), "msa.pdf", ChunkingConfig::default())?;
        let total = chunks.len() as u32;

        assert!(total >= 2);
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, index as u32 + 1);
            assert_eq!(chunk.total_chunks, total);
            assert_eq!(chunk.source_file, "msa.pdf");
        }
        Ok(())
    }

    #[test]
    fn chunking_keeps_every_non_whitespace_character() -> Result<(), Box<dyn std::error::Error>> {
        let text = sample_contract();
        let chunks = chunk_text(&text, "msa.pdf", ChunkingConfig::for_max_chars(300))?;
        let rebuilt: String = chunks.iter().map(|chunk| chunk.content.as_str()).collect();

        assert_eq!(strip_whitespace(&rebuilt), strip_whitespace(&text));
        Ok(())
    }

    #[test]
    fn chunks_never_exceed_max_chars() -> Result<(), Box<dyn std::error::Error>> {
        let mut text = sample_contract();
        text.push_str(&"x".repeat(1_000));
        let config = ChunkingConfig::for_max_chars(250);
        let chunks = chunk_text(&text, "msa.pdf", config)?;

        assert!(chunks
            .iter()
            .all(|chunk| chunk.content.chars().count() <= config.max_chars));
        Ok(())
    }

    #[test]
    fn titles_open_new_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let body = "The Licensee shall not sublicense the Software to any third party without prior written consent of the Licensor.";
        let text = format!("ARTICLE 1 DEFINITIONS\n{body}\n\nARTICLE 2 LICENSE GRANT\n{body}\n");
        let chunks = chunk_text(&text, "license.pdf", ChunkingConfig::default())?;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("ARTICLE 1 DEFINITIONS"));
        assert!(chunks[1].content.starts_with("ARTICLE 2 LICENSE GRANT"));
        assert!(chunks
            .iter()
            .all(|chunk| chunk.chunk_type == ChunkType::TitleBased));
        Ok(())
    }

    #[test]
    fn small_fragments_are_merged_into_neighbours() -> Result<(), Box<dyn std::error::Error>> {
        let body = "Payment terms are net sixty days from the date of a correct invoice, with interest accruing on late payments at one percent per month.";
        let text = format!("SCHEDULE A\n\nFEES\n{body}\n");
        let chunks = chunk_text(&text, "fees.pdf", ChunkingConfig::default())?;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.starts_with("SCHEDULE A"));
        assert!(chunks[0].content.contains("FEES"));
        Ok(())
    }

    #[test]
    fn size_boundary_opens_chunk_after_soft_limit() -> Result<(), Box<dyn std::error::Error>> {
        let paragraph = "word ".repeat(40);
        let text = [paragraph.as_str(); 6].join("\n\n");
        let config = ChunkingConfig::for_max_chars(500);
        let chunks = chunk_text(&text, "plain.pdf", config)?;

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].chunk_type, ChunkType::SizeBased);
        Ok(())
    }

    #[test]
    fn whitespace_only_text_is_an_empty_chunking_result() {
        let result = chunk_text(" \n\n\t ", "blank.pdf", ChunkingConfig::default());
        assert!(matches!(result, Err(IngestError::EmptyChunking(file)) if file == "blank.pdf"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ChunkingConfig {
            max_chars: 50,
            new_after_chars: 40,
            combine_under_chars: 100,
        };
        assert!(matches!(
            chunk_text("text", "a.pdf", config),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn long_words_are_hard_split() {
        let pieces = split_to_fit(&"a".repeat(25), 10);
        assert_eq!(pieces, vec!["a".repeat(10), "a".repeat(10), "a".repeat(5)]);
    }
}
