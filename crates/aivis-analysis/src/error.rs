use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CostError {
    /// The model has no pricing entry. Never priced as zero.
    #[error("unknown model '{model_id}': no pricing configured")]
    UnknownModel { model_id: String },
}
