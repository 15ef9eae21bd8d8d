use std::io::Write;
use std::path::Path;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Pdf,
}

impl DocumentKind {
    /// Decides from the MIME type, falling back to the file extension.
    pub fn detect(mime_type: Option<&str>, file_name: Option<&str>) -> Option<Self> {
        match mime_type.map(|m| m.trim().to_lowercase()).as_deref() {
            Some("text/plain") => return Some(DocumentKind::PlainText),
            Some("application/pdf") => return Some(DocumentKind::Pdf),
            _ => {}
        }
        let extension = file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("txt") => Some(DocumentKind::PlainText),
            Some("pdf") => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_chunks: usize,
    pub max_upload_bytes: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            top_chunks: 3,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl IngestOptions {
    pub fn check_size(&self, size: u64) -> Result<(), IngestError> {
        if size > self.max_upload_bytes {
            return Err(IngestError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }
}

/// Extracts the text of an uploaded document.
pub async fn load_text(kind: DocumentKind, bytes: Vec<u8>) -> Result<String, IngestError> {
    let text = match kind {
        DocumentKind::PlainText => {
            let text = String::from_utf8(bytes).map_err(|_| IngestError::InvalidUtf8)?;
            text.trim_start_matches('\u{feff}').to_string()
        }
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .map_err(|e| IngestError::Pdf(e.to_string()))??,
    };
    if text.trim().is_empty() {
        return Err(IngestError::Empty);
    }
    Ok(text)
}

/// The PDF reader works on paths, so the bytes go through a temporary file
/// that is removed when it goes out of scope.
fn extract_pdf_text(bytes: &[u8]) -> Result<String, IngestError> {
    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    pdf_extract::extract_text(file.path()).map_err(|e| IngestError::Pdf(e.to_string()))
}

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

#[derive(Debug)]
struct Piece {
    text: String,
    /// Separator that preceded this piece in the source text.
    joiner: &'static str,
}

impl Piece {
    fn len(&self) -> usize {
        self.text.chars().count() + self.joiner.len()
    }
}

/// Splits text into chunks of at most `size` characters, preferring paragraph,
/// then line, then word boundaries. Consecutive chunks share up to `overlap`
/// characters.
pub fn split_into_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size / 2);

    let mut pieces = Vec::new();
    split_pieces(text, size, &SEPARATORS, "", &mut pieces);

    let mut chunks = Vec::new();
    let mut window: Vec<Piece> = Vec::new();
    let mut window_len = 0;
    for piece in pieces {
        let piece_len = piece.len();
        if !window.is_empty() && window_len + piece_len > size {
            chunks.push(join(&window));
            while !window.is_empty() && (window_len > overlap || window_len + piece_len > size) {
                let dropped = window.remove(0);
                window_len -= dropped.len();
            }
        }
        window_len += piece_len;
        window.push(piece);
    }
    if !window.is_empty() {
        chunks.push(join(&window));
    }
    chunks
}

fn split_pieces(
    text: &str,
    size: usize,
    separators: &[&'static str],
    joiner: &'static str,
    out: &mut Vec<Piece>,
) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if trimmed.chars().count() <= size {
        out.push(Piece {
            text: trimmed.to_string(),
            joiner,
        });
        return;
    }
    match separators.split_first() {
        Some((separator, rest)) => {
            let mut next_joiner = joiner;
            for part in trimmed.split(separator) {
                if part.trim().is_empty() {
                    continue;
                }
                split_pieces(part, size, rest, next_joiner, out);
                next_joiner = separator;
            }
        }
        None => {
            let chars: Vec<char> = trimmed.chars().collect();
            for (i, window) in chars.chunks(size).enumerate() {
                out.push(Piece {
                    text: window.iter().collect(),
                    joiner: if i == 0 { joiner } else { "" },
                });
            }
        }
    }
}

fn join(pieces: &[Piece]) -> String {
    let mut joined = String::new();
    for (i, piece) in pieces.iter().enumerate() {
        if i > 0 {
            joined.push_str(piece.joiner);
        }
        joined.push_str(&piece.text);
    }
    joined
}

/// The first `count` chunks, which stand in for a retriever's top results.
pub fn leading_context(chunks: &[String], count: usize) -> String {
    chunks
        .iter()
        .take(count)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_mime_or_extension() {
        assert_eq!(
            DocumentKind::detect(Some("application/pdf"), None),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::detect(Some("application/octet-stream"), Some("notes.TXT")),
            Some(DocumentKind::PlainText)
        );
        assert_eq!(DocumentKind::detect(None, Some("slides.pptx")), None);
        assert_eq!(DocumentKind::detect(Some("image/png"), None), None);
    }

    #[test]
    fn size_limit_is_enforced() {
        let options = IngestOptions::default();
        assert!(options.check_size(20 * 1024 * 1024).is_ok());
        assert!(matches!(
            options.check_size(20 * 1024 * 1024 + 1),
            Err(IngestError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn plain_text_is_decoded() {
        let text = load_text(DocumentKind::PlainText, "\u{feff}Qu'est-ce qu'une onde ?".into())
            .await
            .unwrap();
        assert_eq!(text, "Qu'est-ce qu'une onde ?");
    }

    #[tokio::test]
    async fn invalid_or_empty_text_is_rejected() {
        assert!(matches!(
            load_text(DocumentKind::PlainText, vec![0xff, 0xfe, 0x00]).await,
            Err(IngestError::InvalidUtf8)
        ));
        assert!(matches!(
            load_text(DocumentKind::PlainText, b"  \n ".to_vec()).await,
            Err(IngestError::Empty)
        ));
    }

    #[tokio::test]
    async fn garbage_pdf_is_an_error_not_a_panic() {
        let result = load_text(DocumentKind::Pdf, b"not a pdf".to_vec()).await;
        assert!(matches!(result, Err(IngestError::Pdf(_))));
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_into_chunks("  one question?  ", 1000, 100), vec!["one question?"]);
        assert!(split_into_chunks("   ", 1000, 100).is_empty());
    }

    #[test]
    fn chunks_respect_the_size_limit() {
        let text = (0..200)
            .map(|i| format!("Question {} about waves and sound?", i))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = split_into_chunks(&text, 300, 50);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 300, "{} chars", chunk.chars().count());
        }
        assert!(chunks[0].starts_with("Question 0 "));
        assert!(chunks.last().unwrap().ends_with("Question 199 about waves and sound?"));
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = (0..40)
            .map(|i| format!("line{:02}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = split_into_chunks(&text, 60, 20);

        let last_line_of_first = chunks[0].lines().last().unwrap();
        assert!(chunks[1].lines().any(|l| l == last_line_of_first));
    }

    #[test]
    fn paragraphs_are_preferred_split_points() {
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = split_into_chunks(&text, 50, 0);
        assert_eq!(chunks, vec!["a".repeat(40), "b".repeat(40)]);
    }

    #[test]
    fn unbroken_text_is_cut_by_characters() {
        let chunks = split_into_chunks(&"x".repeat(25), 10, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "xxxxx");
    }

    #[test]
    fn leading_context_takes_the_first_chunks() {
        let chunks = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(leading_context(&chunks, 2), "one\n\ntwo");
        assert_eq!(leading_context(&chunks, 10), "one\n\ntwo\n\nthree");
    }
}
