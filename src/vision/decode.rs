//! Greedy CTC decoding of recognition model output

use ndarray::{ArrayView2, ArrayView3, Axis};

use crate::config::DEFAULT_ALPHABET;

/// Maps per-timestep class scores to a string.
///
/// Class 0 is the CTC blank; class `i` for `1 <= i <= alphabet.len()` is
/// `alphabet[i - 1]`. Classes past the alphabet are ignored.
#[derive(Debug, Clone)]
pub struct CtcDecoder {
    characters: Vec<char>,
}

impl Default for CtcDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHABET)
    }
}

impl CtcDecoder {
    pub const BLANK: usize = 0;

    pub fn new(alphabet: &str) -> Self {
        Self {
            characters: alphabet.chars().collect(),
        }
    }

    /// Decode a `[T, C]` score matrix: argmax per step, collapse repeats,
    /// drop blanks
    pub fn decode(&self, scores: ArrayView2<f32>) -> String {
        let indices: Vec<usize> = scores
            .axis_iter(Axis(0))
            .map(|step| {
                step.iter()
                    .enumerate()
                    .fold((Self::BLANK, f32::MIN), |best, (i, &v)| {
                        if v > best.1 { (i, v) } else { best }
                    })
                    .0
            })
            .collect();
        self.decode_indices(&indices)
    }

    /// Decode the first sample of a `[N, T, C]` batch
    pub fn decode_batch_first(&self, scores: ArrayView3<f32>) -> String {
        if scores.shape()[0] == 0 {
            return String::new();
        }
        self.decode(scores.index_axis(Axis(0), 0))
    }

    /// Collapse an already-argmaxed index sequence
    pub fn decode_indices(&self, indices: &[usize]) -> String {
        let mut text = String::new();
        let mut previous: Option<usize> = None;

        for &idx in indices {
            if previous == Some(idx) {
                continue;
            }
            previous = Some(idx);

            if idx == Self::BLANK {
                continue;
            }
            if let Some(&c) = self.characters.get(idx - 1) {
                text.push(c);
            }
        }

        text
    }
}
