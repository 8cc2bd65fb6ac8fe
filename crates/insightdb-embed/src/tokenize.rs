use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use tokenizers::{Encoding, Tokenizer, TruncationParams};

/// XLM-RoBERTa `<pad>` id.
pub const PAD_ID: u32 = 1;

/// Load `tokenizer.json` with truncation fixed to `max_len` tokens.
pub fn load_tokenizer(path: &std::path::Path, max_len: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;
    tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
        .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
    Ok(tokenizer)
}

/// Pack encodings into `[B,T]` id / mask / type tensors, padding to the longest row.
pub fn encodings_to_tensors(encodings: &[Encoding], max_len: usize, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
    let width = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(encodings.len() * width);
    let mut mask = Vec::with_capacity(encodings.len() * width);
    for enc in encodings {
        let n = enc.get_ids().len().min(width);
        ids.extend_from_slice(&enc.get_ids()[..n]);
        mask.extend_from_slice(&enc.get_attention_mask()[..n]);
        ids.extend(std::iter::repeat(PAD_ID).take(width - n));
        mask.extend(std::iter::repeat(0).take(width - n));
    }
    let batch = encodings.len();
    let input_ids = Tensor::from_vec(ids, (batch, width), device)?;
    let attention_mask = Tensor::from_vec(mask, (batch, width), device)?;
    let token_type_ids = Tensor::zeros((batch, width), DType::I64, device)?;
    Ok((input_ids, attention_mask, token_type_ids))
}

pub fn tokenize_texts(tokenizer: &Tokenizer, texts: &[String]) -> Result<Vec<Encoding>> {
    tokenizer
        .encode_batch(texts.iter().map(String::as_str).collect::<Vec<_>>(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))
}

/// Encode `(query, candidate)` pairs as single cross-encoder inputs.
pub fn tokenize_pairs(tokenizer: &Tokenizer, query: &str, candidates: &[String]) -> Result<Vec<Encoding>> {
    let pairs: Vec<(&str, &str)> = candidates.iter().map(|c| (query, c.as_str())).collect();
    tokenizer
        .encode_batch(pairs, true)
        .map_err(|e| anyhow!("Pair tokenization failed: {}", e))
}
