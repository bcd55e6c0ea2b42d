//! CTC decoding and dictionary handling for text recognition.

use crate::core::errors::{OCRError, OcrResult};
use ndarray::ArrayView2;
use std::path::Path;
use std::sync::Arc;

/// Pseudo-token stored at index 0 for the CTC blank class. Never emitted.
const BLANK_TOKEN: &str = "blank";

/// Loads a recognition dictionary.
///
/// The file is UTF-8 with one token per line; trailing carriage returns are
/// stripped. The blank token is prepended at index 0 and, when
/// `use_space_char` is set, a space token is appended at the end. The
/// resulting length must match the recognition model's output channel
/// count.
pub fn load_dictionary(path: &Path, use_space_char: bool) -> OcrResult<Arc<Vec<String>>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        OCRError::config(format!(
            "failed to read dictionary from '{}': {e}",
            path.display()
        ))
    })?;

    let mut tokens = Vec::with_capacity(raw.lines().count() + 2);
    tokens.push(BLANK_TOKEN.to_string());
    for line in raw.lines() {
        let token = line.strip_suffix('\r').unwrap_or(line);
        tokens.push(token.to_string());
    }
    if use_space_char {
        tokens.push(" ".to_string());
    }

    if tokens.len() <= 1 {
        return Err(OCRError::config(format!(
            "dictionary '{}' contains no tokens",
            path.display()
        )));
    }

    Ok(Arc::new(tokens))
}

/// Greedy CTC decoder over a shared dictionary.
#[derive(Debug, Clone)]
pub struct CtcLabelDecode {
    characters: Arc<Vec<String>>,
}

impl CtcLabelDecode {
    /// Creates a decoder over a loaded dictionary.
    pub fn new(characters: Arc<Vec<String>>) -> Self {
        Self { characters }
    }

    /// Number of classes, including the blank.
    pub fn class_count(&self) -> usize {
        self.characters.len()
    }

    /// Decodes a `[T, C]` prediction into text and confidence.
    ///
    /// Per timestep the argmax class is taken; runs of repeated indices
    /// collapse to their first occurrence, then blanks are dropped.
    /// Confidence is the arithmetic mean of the surviving timestep
    /// probabilities, or 0 when nothing survives.
    pub fn decode(&self, pred: &ArrayView2<f32>) -> (String, f32) {
        let timesteps = pred.shape()[0];
        let classes = pred.shape()[1];

        let mut text = String::new();
        let mut prob_sum = 0.0f32;
        let mut emitted = 0usize;
        let mut previous: Option<usize> = None;

        for t in 0..timesteps {
            let mut best_idx = 0usize;
            let mut best_prob = f32::NEG_INFINITY;
            for c in 0..classes {
                let p = pred[[t, c]];
                if p > best_prob {
                    best_prob = p;
                    best_idx = c;
                }
            }

            if best_idx != 0
                && previous != Some(best_idx)
                && let Some(token) = self.characters.get(best_idx)
            {
                text.push_str(token);
                prob_sum += best_prob;
                emitted += 1;
            }
            previous = Some(best_idx);
        }

        let confidence = if emitted == 0 {
            0.0
        } else {
            prob_sum / emitted as f32
        };
        (text, confidence)
    }
}
