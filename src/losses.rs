//! Loss functions of the Wasserstein GAN with gradient penalty, in graph
//! paradigm.
//!
//! Loss functions here are regular Rust functions that take symbolic
//! `Tensor` descriptors and add the nodes needed to compute the loss. All
//! means are taken over the runtime element count, so the same graph works
//! for any batch size.

use crate::tensor::Tensor;

// ============================================================================
// Critic
// ============================================================================

/// Critic loss.
///
/// Formula: `L_D = -mean(D(real)) + mean(D(fake)) + λ · GP`.
///
/// # Arguments
///
/// * `real_scores` - Critic scores of the real batch, `[N, 1]`.
/// * `fake_scores` - Critic scores of the generated batch, `[N, 1]`.
/// * `penalty` - Scalar gradient penalty.
/// * `lambda_gp` - Penalty weight.
pub fn critic_loss(real_scores: &Tensor, fake_scores: &Tensor, penalty: &Tensor, lambda_gp: f32) -> Tensor {
    let adversarial = &fake_scores.mean() - &real_scores.mean();
    &adversarial + &penalty.scale(lambda_gp)
}

// ============================================================================
// Generator
// ============================================================================

/// Generator loss: `L_G = -mean(D(G(z)))`.
pub fn generator_loss(fake_scores: &Tensor) -> Tensor {
    -&fake_scores.mean()
}
