//! Token-aware text chunker.
//!
//! Splits file text into contiguous chunks of at most a fixed token budget,
//! using a byte-pair-encoding tokenizer selected by id (`cl100k_base` by
//! default). The full text is encoded once; windows of tokens are decoded
//! back to text, and a byte cursor tracks where each decoded window lands in
//! the original bytes. Decoding is not guaranteed to reproduce byte-identical
//! substrings at arbitrary token boundaries, so the chunker realigns by
//! searching forward for the decoded text when the expected range does not
//! match. When the decoded text cannot be found at all, that is an
//! alignment error signalling a tokenizer/content mismatch, never something
//! to paper over.
//!
//! Postconditions are checked, not assumed: chunks are ordered, contiguous,
//! non-overlapping, and concatenating their texts reproduces the input
//! exactly.

use anyhow::{anyhow, bail, Context, Result};
use tiktoken_rs::CoreBPE;

/// Default token budget per chunk.
pub const DEFAULT_MAX_TOKENS_PER_CHUNK: usize = 768;

/// A token-bounded, byte-aligned slice of a file's text.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenChunk {
    pub text: String,
    /// Byte offset of the chunk's first byte in the original text.
    pub start: usize,
    /// Byte offset one past the chunk's last byte.
    pub end: usize,
    pub token_count: usize,
}

/// Tokenizer-backed chunker; construct once, reuse across files.
#[derive(Debug)]
pub struct TokenChunker {
    bpe: CoreBPE,
    max_tokens: usize,
}

impl TokenChunker {
    /// Load the tokenizer named by `tokenizer_id`.
    ///
    /// Accepts encoding names (`cl100k_base`, `o200k_base`, `p50k_base`,
    /// `r50k_base`), an optional `tiktoken/` prefix, or a model name resolved
    /// through the tokenizer registry.
    pub fn new(tokenizer_id: &str, max_tokens: usize) -> Result<Self> {
        let id = tokenizer_id.trim();
        if id.is_empty() {
            bail!("tokenizer id is required");
        }
        if max_tokens == 0 {
            bail!("max tokens per chunk must be > 0");
        }
        let id = id.strip_prefix("tiktoken/").unwrap_or(id);

        let bpe = match id {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
            model => tiktoken_rs::get_bpe_from_model(model),
        }
        .with_context(|| format!("load tokenizer {tokenizer_id}"))?;

        Ok(Self { bpe, max_tokens })
    }

    /// Split `text` into token-bounded, byte-aligned chunks.
    ///
    /// Empty input (or input that encodes to zero tokens) yields no chunks.
    pub fn chunk(&self, text: &str) -> Result<Vec<TokenChunk>> {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let bytes = text.as_bytes();
        let mut chunks = Vec::with_capacity((tokens.len() + self.max_tokens - 1) / self.max_tokens);
        let mut cursor = 0usize;
        let mut tok_start = 0usize;

        while tok_start < tokens.len() {
            let mut tok_end = (tok_start + self.max_tokens).min(tokens.len());
            let decoded = loop {
                match self.bpe.decode(tokens[tok_start..tok_end].to_vec()) {
                    Ok(decoded) => break decoded,
                    Err(err) => {
                        // A window boundary can split a multi-byte character;
                        // retreat one token until it lands on a whole one.
                        if tok_end - tok_start > 1 {
                            tok_end -= 1;
                        } else {
                            return Err(anyhow!(
                                "decode token window at byte {cursor}: {err}"
                            ));
                        }
                    }
                }
            };
            let token_count = tok_end - tok_start;
            tok_start = tok_end;
            if decoded.is_empty() {
                continue;
            }
            let needle = decoded.as_bytes();

            let aligned = cursor + needle.len() <= bytes.len()
                && &bytes[cursor..cursor + needle.len()] == needle;
            if !aligned {
                // Decoded text drifted from the source bytes; find where it
                // actually starts.
                let offset = find_forward(&bytes[cursor..], needle).ok_or_else(|| {
                    anyhow!("token chunk alignment failed at byte {cursor}")
                })?;
                cursor += offset;
            }

            let start = cursor;
            let end = cursor + needle.len();
            let chunk_text = text
                .get(start..end)
                .ok_or_else(|| anyhow!("token chunk alignment failed at byte {start}"))?;
            chunks.push(TokenChunk {
                text: chunk_text.to_string(),
                start,
                end,
                token_count,
            });
            cursor = end;
        }

        verify_coverage(text, &chunks)?;
        Ok(chunks)
    }
}

/// First occurrence of `needle` in `haystack`, byte-wise.
fn find_forward(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Check the chunk set tiles the input exactly.
fn verify_coverage(text: &str, chunks: &[TokenChunk]) -> Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    if chunks[0].start != 0 {
        bail!(
            "token chunk alignment failed: first chunk starts at byte {}",
            chunks[0].start
        );
    }
    for pair in chunks.windows(2) {
        if pair[0].end != pair[1].start {
            bail!(
                "token chunk alignment failed: gap between bytes {} and {}",
                pair[0].end,
                pair[1].start
            );
        }
    }
    let last = &chunks[chunks.len() - 1];
    if last.end != text.len() {
        bail!(
            "token chunk alignment failed: coverage ends at byte {} of {}",
            last.end,
            text.len()
        );
    }
    Ok(())
}
