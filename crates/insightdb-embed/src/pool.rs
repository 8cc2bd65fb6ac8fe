use anyhow::{anyhow, ensure, Result};
use candle_core::{DType, Tensor};

/// Sentence embedding from token states: the mean over tokens whose mask is
/// set, scaled to unit length. `[batch, tokens, width] x [batch, tokens] -> [batch, width]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, tokens, width) = hidden
        .dims3()
        .map_err(|_| anyhow!("hidden states must be [batch, tokens, width], got {:?}", hidden.dims()))?;
    ensure!(
        attention_mask.dims() == [batch, tokens],
        "attention mask {:?} does not cover hidden states [{batch}, {tokens}]",
        attention_mask.dims()
    );
    let dtype = hidden.dtype();
    let weights = attention_mask.to_device(hidden.device())?.to_dtype(dtype)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
    // fully padded rows divide by one instead of zero
    let counts = weights.sum(1)?.maximum(1.0)?;
    let mean = summed.broadcast_div(&counts)?;

    let eps = if dtype == DType::F16 { 1e-6 } else { 1e-12 };
    let norms = mean.sqr()?.sum_keepdim(1)?.sqrt()?.affine(1.0, eps)?;
    let pooled = mean.broadcast_div(&norms)?;
    ensure!(pooled.dims() == [batch, width], "pooled shape {:?}, expected [{batch}, {width}]", pooled.dims());
    Ok(pooled)
}
