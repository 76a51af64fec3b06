use schemars::JsonSchema;
use serde::Deserialize;

/// Request to generate an image.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateRequest {
    /// Identifier of the requesting user. One generation per user at a time.
    pub user_id: String,
    /// Model: "anything", "aom" or "nemu" (case-insensitive). See `listmodels`.
    pub model: String,
    /// Prompt followed by optional flags:
    /// `--negative <text>` (alias `--n`), `--cfgscale <0-20>` (aliases `--cfgs`, `--cs`),
    /// `--denoisestrength <0.0-1.0>` (aliases `--denoisingstrength`, `--ds`), `--seed <int>`.
    pub prompt: String,
}

/// Activation of a regenerate control returned by an earlier generation.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegenerateRequest {
    /// Identifier of the activating user. Must be the user who made the original request.
    pub user_id: String,
    /// Control id from a previous `generate` or `regenerate` result (e.g. "ctl-3").
    pub control_id: String,
}
