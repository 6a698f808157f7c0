//! Troceado recursivo de texto por separadores, con tamaño máximo y solape.
//!
//! Las longitudes se miden en caracteres. Se intenta cortar primero por
//! párrafos, luego por líneas, por palabras y, en último caso, por caracteres.

use std::collections::VecDeque;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    /// `chunk_overlap` debe ser menor que `chunk_size` (lo valida la configuración).
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        // Primer separador presente en el texto; "" siempre aplica.
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).map(String::as_str).unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }
        chunks
    }

    /// Une piezas pequeñas hasta `chunk_size`, conservando un solape de hasta
    /// `chunk_overlap` caracteres con el chunk anterior.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined_sep = if window.is_empty() { 0 } else { sep_len };

            if total + len + joined_sep > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window, separator);

                while total > self.chunk_overlap
                    || (total > 0
                        && total + len + if window.is_empty() { 0 } else { sep_len } > self.chunk_size)
                {
                    let Some(front) = window.pop_front() else { break };
                    total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
                }
            }

            if !window.is_empty() {
                total += sep_len;
            }
            total += len;
            window.push_back(piece);
        }

        push_joined(&mut docs, &window, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = RecursiveSplitter::new(500, 100);
        assert_eq!(splitter.split("  hello world  "), vec!["hello world".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let splitter = RecursiveSplitter::new(500, 100);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("\n\n\n\n").is_empty());
    }

    #[test]
    fn chunks_never_exceed_size() {
        let splitter = RecursiveSplitter::new(50, 10);
        let text = "Lorem ipsum dolor sit amet consectetur adipiscing elit. ".repeat(20);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 50, "chunk demasiado largo: {chunk:?}");
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let splitter = RecursiveSplitter::new(30, 12);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = splitter.split(text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(pair[0].split(' ').any(|w| w == first_word), "{pair:?}");
        }
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let splitter = RecursiveSplitter::new(40, 0);
        let text = "First paragraph is here.\n\nSecond paragraph is here.";
        assert_eq!(
            splitter.split(text),
            vec!["First paragraph is here.".to_string(), "Second paragraph is here.".to_string()]
        );
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let splitter = RecursiveSplitter::new(10, 2);
        let text = "ñ".repeat(25);
        let chunks = splitter.split(&text);
        assert!(chunks.iter().all(|c| char_len(c) <= 10));
        assert!(chunks.len() >= 3);
    }
}
